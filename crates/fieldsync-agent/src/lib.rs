//! Field syncer agent library.
//!
//! Wires the MSP client, the session store, and the operator signal into
//! one cancellable sync run. The binary in `main.rs` adds configuration
//! loading, CLI flags, and exit-code mapping; everything else lives here so
//! the simulation harness can drive a full sync without a serial port.

pub mod error;
pub mod led;
pub mod orchestrator;
pub mod signal;

pub use error::{SyncError, TimeoutStage};
pub use led::{GpioLed, LedBackend, NullLed, SysfsLed, backend_for};
pub use orchestrator::{CancelHandle, Orchestrator, SyncOutcome};
pub use signal::run_signal_task;
