//! Deterministic simulation harness.
//!
//! [`SimFc`] is a scripted flight controller that plugs into the client's
//! `Transport` seam: it answers the handshake, serves pipelined flash reads
//! (optionally permuted, truncated, or dropped), acknowledges erases, and
//! steps its summary through a scripted sequence, all without a serial port
//! or real time. Tests drive the full orchestrator against it under tokio's
//! paused clock.

mod sim_fc;

use std::path::{Path, PathBuf};

pub use sim_fc::{SimFc, WireLog};

/// Deterministic pseudo-random flash contents for tests.
#[must_use]
pub fn test_flash(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + 7) ^ (i >> 8)) as u8).collect()
}

/// Locate the single session directory under a storage root.
///
/// Returns `None` when no session was created (empty flash, early abort).
#[must_use]
pub fn find_session_dir(root: &Path) -> Option<PathBuf> {
    let fc_dir = std::fs::read_dir(root).ok()?.flatten().map(|e| e.path()).find(|p| p.is_dir())?;
    std::fs::read_dir(fc_dir).ok()?.flatten().map(|e| e.path()).find(|p| p.is_dir())
}
