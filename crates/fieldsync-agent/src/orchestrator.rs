//! The sync state machine.
//!
//! One run walks ten steps: identify, summarize, preflight the disk, open a
//! session, stream the flash, verify the copy, seal the manifest, erase,
//! poll until empty, done. Two short-circuits exist: an empty flash ends the
//! run successfully without touching the disk, and any unrecoverable error
//! ends it with a sealed audit trail wherever one is possible.
//!
//! The hard ordering guarantees live here:
//!
//! - bytes reach the session writer strictly in offset order (the client's
//!   window enforces it, this module relies on it),
//! - the manifest is durable on disk before any erase byte leaves,
//! - `erase_completed = true` is only ever written after the on-disk copy
//!   re-hashed to the streamed digest *and* the FC reported empty.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use chrono::Utc;
use fieldsync_client::{
    ClientError, FlashReadPlan, MspClient, Transport, blackbox_device, flash_summary, identify,
};
use fieldsync_core::{
    AgentConfig, FlashSummary, Session, SessionError, SessionStore, SignalEvent, disk,
};
use fieldsync_proto::{Opcode, payloads::DataflashSummaryReply};
use tokio::{
    sync::watch,
    time::{Instant, timeout},
};

use crate::error::{SyncError, TimeoutStage};

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Flash copied, verified, and sealed.
    Completed {
        /// Bytes written to the session file.
        bytes: u64,
        /// Session directory holding the file and manifest.
        directory: PathBuf,
        /// Whether the erase ran and the poll confirmed an empty flash.
        erase_completed: bool,
    },
    /// Flash had no log data; no session directory was created.
    FlashEmpty,
}

/// Cancels a running sync from outside.
///
/// Cancellation is cooperative: the orchestrator stops issuing requests,
/// abandons its read window, retains whatever reached the disk, seals an
/// error manifest if a session exists, and reports [`SyncError::Cancelled`].
#[derive(Debug, Clone)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    /// Trigger cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

/// Fault-injection hook type, run between stream fsync and verification.
pub type PreVerifyHook = Box<dyn FnMut(&Path) + Send>;

/// Drives one sync over a [`Transport`].
pub struct Orchestrator<T: Transport> {
    client: MspClient<T>,
    store: SessionStore,
    config: AgentConfig,
    dry_run: bool,
    events: watch::Sender<Option<SignalEvent>>,
    cancel: watch::Receiver<bool>,
    pre_verify_hook: Option<PreVerifyHook>,
}

impl<T: Transport> Orchestrator<T> {
    /// Build an orchestrator.
    ///
    /// Returns the signal-event receiver for the signal task and the cancel
    /// handle. `dry_run` skips the erase and records `erase_attempted =
    /// false`, as does `erase_after_sync = false` in the config.
    pub fn new(
        transport: T,
        store: SessionStore,
        config: AgentConfig,
        dry_run: bool,
    ) -> (Self, watch::Receiver<Option<SignalEvent>>, CancelHandle) {
        let (events, events_rx) = watch::channel(None);
        let (cancel_tx, cancel) = watch::channel(false);
        let client = MspClient::new(transport, config.request_timeout());
        let orchestrator = Self {
            client,
            store,
            config,
            dry_run,
            events,
            cancel,
            pre_verify_hook: None,
        };
        (orchestrator, events_rx, CancelHandle(cancel_tx))
    }

    /// Install a fault-injection hook, run after the stream is fsynced and
    /// before verification. The simulation harness uses this to model
    /// on-disk corruption; production never sets it.
    pub fn set_pre_verify_hook(&mut self, hook: PreVerifyHook) {
        self.pre_verify_hook = Some(hook);
    }

    /// Run the sync to completion under the whole-run watchdog.
    pub async fn run(mut self) -> Result<SyncOutcome, SyncError> {
        let watchdog = self.config.sync_timeout();
        let result = match timeout(watchdog, self.run_steps()).await {
            Ok(result) => result,
            Err(_elapsed) => {
                tracing::error!("sync watchdog expired; partial state may remain on disk");
                Err(SyncError::Timeout { stage: TimeoutStage::FullSync })
            },
        };

        match &result {
            Ok(SyncOutcome::Completed { bytes, directory, erase_completed }) => {
                tracing::info!(
                    bytes,
                    directory = %directory.display(),
                    erase_completed,
                    "sync complete"
                );
                self.emit(SignalEvent::Success);
            },
            Ok(SyncOutcome::FlashEmpty) => {
                tracing::info!("flash empty, nothing to sync");
                self.emit(SignalEvent::Empty);
            },
            Err(error) => {
                tracing::error!(%error, "sync failed");
                self.emit(SignalEvent::Error);
            },
        }
        result
    }

    /// The ten steps, in order.
    async fn run_steps(&mut self) -> Result<SyncOutcome, SyncError> {
        // IDENTIFY
        self.check_cancel()?;
        let identity = identify(&mut self.client).await?;

        // SUMMARY
        self.check_cancel()?;
        let summary = flash_summary(&mut self.client).await?;
        let device = blackbox_device(&mut self.client).await?;
        if summary.is_empty() {
            return Ok(SyncOutcome::FlashEmpty);
        }

        // CHECK_DISK
        self.check_cancel()?;
        fs::create_dir_all(self.store.root()).map_err(|e| {
            SyncError::Storage(format!("creating {}: {e}", self.store.root().display()))
        })?;
        disk::require_space(
            self.store.root(),
            u64::from(summary.used_size),
            self.config.headroom_bytes(),
        )?;

        // OPEN_SESSION
        let mut session = self.store.open(&identity, device, Utc::now())?;

        // STREAM
        self.emit(SignalEvent::CopyStart);
        match self.stream(&mut session, &summary).await {
            Ok(()) => {},
            Err(SyncError::Cancelled) => {
                // Keep whatever made it to disk, with an honest manifest.
                if let Err(e) = session.finish_stream() {
                    tracing::warn!(error = %e, "closing partial file after cancel");
                } else if let Err(e) = session.seal(false, false) {
                    tracing::warn!(error = %e, "sealing manifest after cancel");
                }
                return Err(SyncError::Cancelled);
            },
            Err(error) => {
                // A partial file is useless and would shadow a future retry.
                if let Err(e) = session.discard() {
                    tracing::warn!(error = %e, "discarding partial session");
                }
                return Err(error);
            },
        }

        // VERIFY
        self.emit(SignalEvent::VerifyStart);
        session.finish_stream()?;
        if let Some(hook) = &mut self.pre_verify_hook {
            hook(session.directory());
        }
        match session.verify() {
            Ok(()) => {},
            Err(mismatch @ SessionError::VerifyMismatch { .. }) => {
                // The copy is suspect: retain everything, never erase.
                session.seal(false, false)?;
                return Err(mismatch.into());
            },
            Err(other) => return Err(other.into()),
        }

        // WRITE_MANIFEST
        let erase = self.config.erase_after_sync && !self.dry_run;
        if !erase {
            session.seal(false, false)?;
            return Ok(SyncOutcome::Completed {
                bytes: session.bytes_written(),
                directory: session.directory().to_path_buf(),
                erase_completed: false,
            });
        }
        session.seal(true, false)?;

        // ERASE
        self.check_cancel()?;
        self.emit(SignalEvent::EraseStart);
        self.client.request(Opcode::DataflashErase, Bytes::new()).await?;

        // POLL_EMPTY
        self.poll_until_empty().await?;
        session.seal(true, true)?;

        // DONE_OK
        Ok(SyncOutcome::Completed {
            bytes: session.bytes_written(),
            directory: session.directory().to_path_buf(),
            erase_completed: true,
        })
    }

    /// Pipelined flash stream into the session file, cancellable.
    async fn stream(
        &mut self,
        session: &mut Session,
        summary: &FlashSummary,
    ) -> Result<(), SyncError> {
        let plan = FlashReadPlan {
            used_size: summary.used_size,
            chunk_size: self.config.chunk_size_bytes.clamp(256, u32::from(u16::MAX)) as u16,
            depth: self.config.pipeline_depth(),
            compression: summary.supports_compression(),
            chunk_timeout: self.config.chunk_timeout(),
        };
        tracing::info!(
            used = summary.used_size,
            chunk = plan.chunk_size,
            depth = plan.depth,
            compression = plan.compression,
            "streaming flash"
        );

        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            () = cancel_requested(cancel) => Err(SyncError::Cancelled),
            result = self.client.read_flash(&plan, |chunk| {
                session.write_chunk(chunk).map_err(io::Error::other)
            }) => result.map_err(SyncError::from),
        }
    }

    /// Poll the summary until the flash is empty and ready, or time out.
    ///
    /// The first poll goes out immediately after the erase acknowledgment
    /// so a fast erase finishes the sync without waiting a full interval;
    /// the configured interval only separates subsequent polls.
    async fn poll_until_empty(&mut self) -> Result<(), SyncError> {
        let deadline = Instant::now() + self.config.erase_timeout();
        loop {
            self.check_cancel()?;

            // `flash_summary` gates on readiness, which an erasing chip
            // legitimately drops; poll the raw reply instead.
            match self.client.request(Opcode::DataflashSummary, Bytes::new()).await {
                Ok(payload) => {
                    let reply = DataflashSummaryReply::parse(&payload)
                        .map_err(|e| SyncError::Protocol { reason: e.to_string() })?;
                    let summary = FlashSummary::from(reply);
                    tracing::debug!(
                        used = summary.used_size,
                        ready = summary.is_ready(),
                        "erase poll"
                    );
                    if summary.is_empty() && summary.is_ready() {
                        return Ok(());
                    }
                },
                Err(ClientError::RequestTimeout { .. }) => {
                    // A busy chip can starve one poll; the deadline decides.
                    tracing::debug!("summary poll unanswered while erasing");
                },
                Err(e) => return Err(e.into()),
            }

            if Instant::now() >= deadline {
                return Err(SyncError::EraseTimeout);
            }
            tokio::time::sleep(self.config.erase_poll_interval()).await;
        }
    }

    /// Report a progress event to the signal task.
    fn emit(&self, event: SignalEvent) {
        let _ = self.events.send(Some(event));
    }

    /// Fail fast if cancellation was requested.
    fn check_cancel(&self) -> Result<(), SyncError> {
        if *self.cancel.borrow() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }
}

/// Resolves when cancellation is asserted; never resolves if the handle was
/// dropped without cancelling.
async fn cancel_requested(mut cancel: watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}
