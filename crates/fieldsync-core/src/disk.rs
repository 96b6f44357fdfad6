//! Free-space preflight for the storage filesystem.
//!
//! A sync that runs out of disk mid-stream wastes an FC round-trip and
//! leaves a partial file to clean up, so the orchestrator checks before it
//! opens a session: the flash's used size plus a configured headroom must be
//! available.

use std::{io, path::Path};

use thiserror::Error;

/// Preflight failures.
#[derive(Debug, Error)]
pub enum PreflightError {
    /// Querying the filesystem failed.
    #[error("querying free space on {path}: {source}")]
    Io {
        /// Path that was queried.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Not enough space for the flash contents plus headroom.
    #[error("insufficient space: {have} bytes free, {need} required")]
    InsufficientSpace {
        /// Bytes available on the filesystem.
        have: u64,
        /// Bytes required, headroom included.
        need: u64,
    },
}

/// Bytes available to unprivileged writes on `path`'s filesystem.
pub fn free_bytes(path: &Path) -> Result<u64, PreflightError> {
    fs2::available_space(path)
        .map_err(|source| PreflightError::Io { path: path.display().to_string(), source })
}

/// Require `need_bytes + headroom_bytes` free on `path`'s filesystem.
pub fn require_space(
    path: &Path,
    need_bytes: u64,
    headroom_bytes: u64,
) -> Result<(), PreflightError> {
    let need = need_bytes.saturating_add(headroom_bytes);
    let have = free_bytes(path)?;
    if have < need {
        return Err(PreflightError::InsufficientSpace { have, need });
    }
    tracing::debug!(have, need, "disk preflight passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn zero_requirement_always_passes() {
        let tmp = TempDir::new().unwrap();
        require_space(tmp.path(), 0, 0).unwrap();
    }

    #[test]
    fn absurd_requirement_fails_with_context() {
        let tmp = TempDir::new().unwrap();
        let err = require_space(tmp.path(), u64::MAX / 2, u64::MAX / 2).unwrap_err();
        match err {
            PreflightError::InsufficientSpace { have, need } => {
                assert!(need > have);
            },
            PreflightError::Io { .. } => panic!("expected space error"),
        }
    }

    #[test]
    fn missing_path_is_an_io_error() {
        let err = free_bytes(Path::new("/definitely/not/a/real/path")).unwrap_err();
        assert!(matches!(err, PreflightError::Io { .. }));
    }
}
