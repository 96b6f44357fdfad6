//! Per-sync session directories, the raw flash file, and the audit manifest.
//!
//! Layout under the storage root:
//!
//! ```text
//! fc_<variant>_uid-<uid8hex>/<YYYY-MM-DD_HHMMSS>/
//!     raw_flash.bbl     # exact flash bytes, no framing
//!     manifest.json     # audit record, written atomically
//! ```
//!
//! A session directory is created with exclusive semantics so a timestamp
//! collision can never overwrite an earlier sync. The manifest is written to
//! a temporary file, fsynced, renamed into place, and the directory fsynced,
//! so the audit trail survives a crash between sealing and erasing.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::identity::FcIdentity;

/// Name of the raw flash dump inside a session directory.
pub const FLASH_FILE_NAME: &str = "raw_flash.bbl";

/// Name of the audit manifest inside a session directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Manifest schema version.
const MANIFEST_VERSION: u32 = 1;

/// Errors from session storage.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Filesystem operation failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted.
        context: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The timestamped directory already exists.
    #[error("session directory already exists: {path}")]
    DirectoryCollision {
        /// The colliding path.
        path: PathBuf,
    },

    /// On-disk bytes do not hash to the streamed digest.
    #[error("flash copy failed verification: streamed sha256 {expected}, on disk {actual}")]
    VerifyMismatch {
        /// Digest accumulated while streaming, hex.
        expected: String,
        /// Digest of the re-read file, hex.
        actual: String,
    },

    /// Seal or verify was called before the stream was finished.
    #[error("stream not finished: {operation} requires a completed flash copy")]
    StreamNotFinished {
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// Manifest serialization failed.
    #[error("encoding manifest: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SessionError {
    fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }
}

/// Audit manifest, one per session directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Schema version.
    pub version: u32,
    /// Session start time, ISO-8601 with `Z` suffix.
    pub created_utc: String,
    /// Flight controller the flash came from.
    pub fc: ManifestFc,
    /// The flash dump this manifest vouches for.
    pub file: ManifestFile,
    /// An erase was (or will be) issued for this session.
    pub erase_attempted: bool,
    /// The erase poll confirmed an empty flash.
    ///
    /// True implies the on-disk file re-read to exactly `file.sha256`.
    pub erase_completed: bool,
}

/// FC identity block of the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFc {
    /// Firmware variant string.
    pub variant: String,
    /// Full UID in hex.
    pub uid: String,
    /// API version, `"major.minor"`.
    pub api_version: String,
    /// Blackbox device byte as reported by the firmware.
    pub blackbox_device: u8,
}

/// File block of the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// File name inside the session directory.
    pub name: String,
    /// Byte count written.
    pub bytes: u64,
    /// SHA-256 of the file contents, hex.
    pub sha256: String,
}

/// Factory for session directories under one storage root.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    /// Create a store rooted at `root`. The root itself is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage root path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open a fresh session for `fc`, creating its timestamped directory.
    ///
    /// # Errors
    ///
    /// [`SessionError::DirectoryCollision`] if a session with the same
    /// timestamp already exists; the caller must not retry into the same
    /// second.
    pub fn open(
        &self,
        fc: &FcIdentity,
        blackbox_device: u8,
        started: DateTime<Utc>,
    ) -> Result<Session, SessionError> {
        let fc_dir = self
            .root
            .join(format!("fc_{}_uid-{}", fc.variant_str(), fc.uid_prefix_hex()));
        fs::create_dir_all(&fc_dir)
            .map_err(|e| SessionError::io(format!("creating {}", fc_dir.display()), e))?;

        let directory = fc_dir.join(started.format("%Y-%m-%d_%H%M%S").to_string());
        match fs::create_dir(&directory) {
            Ok(()) => {},
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(SessionError::DirectoryCollision { path: directory });
            },
            Err(e) => {
                return Err(SessionError::io(format!("creating {}", directory.display()), e));
            },
        }

        let file_path = directory.join(FLASH_FILE_NAME);
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&file_path)
            .map_err(|e| SessionError::io(format!("opening {}", file_path.display()), e))?;

        tracing::info!(directory = %directory.display(), "session opened");

        Ok(Session {
            directory,
            file_path,
            file: Some(file),
            hasher: Sha256::new(),
            bytes_written: 0,
            streamed_digest: None,
            fc: *fc,
            blackbox_device,
            started,
        })
    }
}

/// One sync attempt: the open flash file, its running digest, and enough
/// context to seal a manifest.
#[derive(Debug)]
pub struct Session {
    directory: PathBuf,
    file_path: PathBuf,
    file: Option<File>,
    hasher: Sha256,
    bytes_written: u64,
    streamed_digest: Option<[u8; 32]>,
    fc: FcIdentity,
    blackbox_device: u8,
    started: DateTime<Utc>,
}

impl Session {
    /// The session directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Bytes written so far.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append a chunk to the flash file and fold it into the digest.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), SessionError> {
        let file = self
            .file
            .as_mut()
            .ok_or(SessionError::StreamNotFinished { operation: "write_chunk" })?;
        file.write_all(chunk)
            .map_err(|e| SessionError::io(format!("writing {}", self.file_path.display()), e))?;
        self.hasher.update(chunk);
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    /// Flush and fsync the flash file, closing it for writing.
    ///
    /// Returns the digest accumulated while streaming.
    pub fn finish_stream(&mut self) -> Result<[u8; 32], SessionError> {
        let file = self
            .file
            .take()
            .ok_or(SessionError::StreamNotFinished { operation: "finish_stream" })?;
        file.sync_all()
            .map_err(|e| SessionError::io(format!("syncing {}", self.file_path.display()), e))?;
        let digest: [u8; 32] = self.hasher.clone().finalize().into();
        self.streamed_digest = Some(digest);
        Ok(digest)
    }

    /// Re-read the file from disk and compare its hash to the streamed one.
    ///
    /// A mismatch leaves the directory untouched: the bytes on disk are the
    /// only copy once the FC is erased, so nothing is deleted and no erase
    /// may follow.
    pub fn verify(&self) -> Result<(), SessionError> {
        let expected = self
            .streamed_digest
            .ok_or(SessionError::StreamNotFinished { operation: "verify" })?;

        let mut file = File::open(&self.file_path)
            .map_err(|e| SessionError::io(format!("reopening {}", self.file_path.display()), e))?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file
                .read(&mut buf)
                .map_err(|e| SessionError::io(format!("re-reading {}", self.file_path.display()), e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let actual: [u8; 32] = hasher.finalize().into();

        if actual != expected {
            return Err(SessionError::VerifyMismatch {
                expected: hex::encode(expected),
                actual: hex::encode(actual),
            });
        }
        Ok(())
    }

    /// Write the manifest atomically: temp file, fsync, rename, dir fsync.
    ///
    /// Callable more than once; the erase-poll path re-seals with
    /// `erase_completed = true` after the FC reports empty.
    pub fn seal(
        &self,
        erase_attempted: bool,
        erase_completed: bool,
    ) -> Result<(), SessionError> {
        let digest = self
            .streamed_digest
            .ok_or(SessionError::StreamNotFinished { operation: "seal" })?;

        let manifest = Manifest {
            version: MANIFEST_VERSION,
            created_utc: self.started.to_rfc3339_opts(SecondsFormat::Secs, true),
            fc: ManifestFc {
                variant: self.fc.variant_str(),
                uid: self.fc.uid_hex(),
                api_version: self.fc.api_version_str(),
                blackbox_device: self.blackbox_device,
            },
            file: ManifestFile {
                name: FLASH_FILE_NAME.to_string(),
                bytes: self.bytes_written,
                sha256: hex::encode(digest),
            },
            erase_attempted,
            erase_completed,
        };

        let json = serde_json::to_vec_pretty(&manifest)?;
        let tmp_path = self.directory.join(format!("{MANIFEST_FILE_NAME}.tmp"));
        let final_path = self.directory.join(MANIFEST_FILE_NAME);

        let mut tmp = File::create(&tmp_path)
            .map_err(|e| SessionError::io(format!("creating {}", tmp_path.display()), e))?;
        tmp.write_all(&json)
            .map_err(|e| SessionError::io(format!("writing {}", tmp_path.display()), e))?;
        tmp.sync_all()
            .map_err(|e| SessionError::io(format!("syncing {}", tmp_path.display()), e))?;
        drop(tmp);

        fs::rename(&tmp_path, &final_path)
            .map_err(|e| SessionError::io(format!("renaming to {}", final_path.display()), e))?;

        // Make the rename itself durable before any erase byte leaves.
        File::open(&self.directory)
            .and_then(|dir| dir.sync_all())
            .map_err(|e| SessionError::io(format!("syncing {}", self.directory.display()), e))?;

        tracing::debug!(
            erase_attempted,
            erase_completed,
            manifest = %final_path.display(),
            "manifest sealed"
        );
        Ok(())
    }

    /// Delete the partial file and the session directory.
    ///
    /// Only valid for a failed stream; a verified session is never discarded.
    pub fn discard(self) -> Result<(), SessionError> {
        drop(self.file);
        fs::remove_file(&self.file_path)
            .map_err(|e| SessionError::io(format!("removing {}", self.file_path.display()), e))?;
        fs::remove_dir(&self.directory)
            .map_err(|e| SessionError::io(format!("removing {}", self.directory.display()), e))?;
        tracing::info!(directory = %self.directory.display(), "partial session discarded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;

    fn fc() -> FcIdentity {
        FcIdentity {
            variant: *b"BTFL",
            uid: [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07],
            api_version: (1, 45),
        }
    }

    fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 45).unwrap()
    }

    #[test]
    fn directory_layout_matches_identity() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path());
        let session = store.open(&fc(), 1, start_time()).unwrap();

        let expected = tmp
            .path()
            .join("fc_BTFL_uid-deadbeef00010203")
            .join("2024-06-01_123045");
        assert_eq!(session.directory(), expected);
        assert!(expected.join(FLASH_FILE_NAME).exists());
    }

    #[test]
    fn timestamp_collision_refuses_to_overwrite() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path());
        let _first = store.open(&fc(), 1, start_time()).unwrap();
        let second = store.open(&fc(), 1, start_time());
        assert!(matches!(second, Err(SessionError::DirectoryCollision { .. })));
    }

    #[test]
    fn write_finish_verify_seal_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path());
        let mut session = store.open(&fc(), 1, start_time()).unwrap();

        session.write_chunk(b"hello ").unwrap();
        session.write_chunk(b"flash").unwrap();
        let digest = session.finish_stream().unwrap();
        session.verify().unwrap();
        session.seal(true, false).unwrap();

        let manifest_path = session.directory().join(MANIFEST_FILE_NAME);
        let manifest: Manifest =
            serde_json::from_slice(&fs::read(&manifest_path).unwrap()).unwrap();
        assert_eq!(manifest.version, 1);
        assert_eq!(manifest.created_utc, "2024-06-01T12:30:45Z");
        assert_eq!(manifest.fc.variant, "BTFL");
        assert_eq!(manifest.fc.uid, "deadbeef0001020304050607");
        assert_eq!(manifest.file.bytes, 11);
        assert_eq!(manifest.file.sha256, hex::encode(digest));
        assert!(manifest.erase_attempted);
        assert!(!manifest.erase_completed);
        assert!(!manifest_path.with_extension("json.tmp").exists());
    }

    #[test]
    fn reseal_flips_erase_completed() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path());
        let mut session = store.open(&fc(), 1, start_time()).unwrap();
        session.write_chunk(&[0u8; 128]).unwrap();
        session.finish_stream().unwrap();

        session.seal(true, false).unwrap();
        session.seal(true, true).unwrap();

        let manifest: Manifest = serde_json::from_slice(
            &fs::read(session.directory().join(MANIFEST_FILE_NAME)).unwrap(),
        )
        .unwrap();
        assert!(manifest.erase_completed);
    }

    #[test]
    fn corruption_on_disk_fails_verify_and_retains_everything() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path());
        let mut session = store.open(&fc(), 1, start_time()).unwrap();
        session.write_chunk(&[0x55u8; 4096]).unwrap();
        session.finish_stream().unwrap();

        // Flip one byte behind the session's back.
        let path = session.directory().join(FLASH_FILE_NAME);
        let mut bytes = fs::read(&path).unwrap();
        bytes[1000] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let err = session.verify().unwrap_err();
        assert!(matches!(err, SessionError::VerifyMismatch { .. }));
        assert!(path.exists());
    }

    #[test]
    fn seal_before_finish_is_refused() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path());
        let session = store.open(&fc(), 1, start_time()).unwrap();
        assert!(matches!(
            session.seal(false, false),
            Err(SessionError::StreamNotFinished { operation: "seal" })
        ));
    }

    #[test]
    fn discard_removes_file_and_directory() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path());
        let mut session = store.open(&fc(), 1, start_time()).unwrap();
        session.write_chunk(&[1, 2, 3]).unwrap();
        let dir = session.directory().to_path_buf();

        session.discard().unwrap();
        assert!(!dir.exists());
    }
}
