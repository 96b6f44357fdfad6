//! Domain model for the field syncer.
//!
//! Everything in this crate is deliberately I/O-light: the session store
//! touches the filesystem, the preflight queries it, and nothing else does.
//! Serial transport lives in `fieldsync-client`; the orchestrator and the
//! signal task that drive these types live in `fieldsync-agent`.

pub mod config;
pub mod disk;
pub mod identity;
pub mod session;
pub mod signal;

pub use config::{AgentConfig, LedConfig, SerialConfig};
pub use disk::PreflightError;
pub use identity::{FcIdentity, FlashSummary};
pub use session::{Manifest, Session, SessionError, SessionStore};
pub use signal::{Pattern, PatternCursor, PatternStep, SignalEvent};
