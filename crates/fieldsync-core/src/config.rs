//! Agent configuration model.
//!
//! Deserialized from the agent's TOML file by the binary; every field has a
//! default so an empty file (or none at all) yields a working configuration.
//! CLI flags override individual fields after loading.

use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

/// Default storage root on the device image.
const DEFAULT_STORAGE_PATH: &str = "/var/lib/fieldsync";

fn default_storage_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORAGE_PATH)
}

fn default_min_free_space_mb() -> u32 {
    200
}

fn default_erase_after_sync() -> bool {
    true
}

fn default_chunk_size_bytes() -> u32 {
    16 * 1024
}

fn default_pipeline_depth() -> u8 {
    2
}

fn default_request_timeout_ms() -> u32 {
    2_000
}

fn default_chunk_timeout_ms() -> u32 {
    3_000
}

fn default_sync_timeout_ms() -> u32 {
    600_000
}

fn default_erase_poll_interval_ms() -> u32 {
    2_000
}

fn default_erase_timeout_ms() -> u32 {
    120_000
}

fn default_baud() -> u32 {
    115_200
}

/// Top-level agent configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Root directory for session storage.
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// Headroom the storage filesystem must keep free beyond the flash size.
    #[serde(default = "default_min_free_space_mb")]
    pub min_free_space_mb: u32,

    /// Erase the FC flash after a verified copy.
    #[serde(default = "default_erase_after_sync")]
    pub erase_after_sync: bool,

    /// Bytes requested per dataflash read.
    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: u32,

    /// In-flight read requests (clamped to 1..=8).
    #[serde(default = "default_pipeline_depth")]
    pub pipeline_depth: u8,

    /// Per-request response timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u32,

    /// Per-chunk timeout during the pipelined stream.
    #[serde(default = "default_chunk_timeout_ms")]
    pub chunk_timeout_ms: u32,

    /// Whole-sync watchdog timeout.
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u32,

    /// Interval between erase-poll summary requests.
    #[serde(default = "default_erase_poll_interval_ms")]
    pub erase_poll_interval_ms: u32,

    /// Total time allowed for the erase to complete.
    #[serde(default = "default_erase_timeout_ms")]
    pub erase_timeout_ms: u32,

    /// Serial link settings.
    #[serde(default)]
    pub serial: SerialConfig,

    /// Indicator light settings.
    #[serde(default)]
    pub led: LedConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            min_free_space_mb: default_min_free_space_mb(),
            erase_after_sync: default_erase_after_sync(),
            chunk_size_bytes: default_chunk_size_bytes(),
            pipeline_depth: default_pipeline_depth(),
            request_timeout_ms: default_request_timeout_ms(),
            chunk_timeout_ms: default_chunk_timeout_ms(),
            sync_timeout_ms: default_sync_timeout_ms(),
            erase_poll_interval_ms: default_erase_poll_interval_ms(),
            erase_timeout_ms: default_erase_timeout_ms(),
            serial: SerialConfig::default(),
            led: LedConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Preflight headroom in bytes.
    #[must_use]
    pub fn headroom_bytes(&self) -> u64 {
        u64::from(self.min_free_space_mb) * 1024 * 1024
    }

    /// Pipeline depth clamped to the supported window.
    #[must_use]
    pub fn pipeline_depth(&self) -> usize {
        usize::from(self.pipeline_depth.clamp(1, 8))
    }

    /// Per-request response timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.request_timeout_ms))
    }

    /// Per-chunk stream timeout.
    #[must_use]
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.chunk_timeout_ms))
    }

    /// Whole-sync watchdog timeout.
    #[must_use]
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.sync_timeout_ms))
    }

    /// Erase poll interval.
    #[must_use]
    pub fn erase_poll_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.erase_poll_interval_ms))
    }

    /// Erase poll deadline.
    #[must_use]
    pub fn erase_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.erase_timeout_ms))
    }
}

/// Serial link settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SerialConfig {
    /// Device path; `None` means the CLI must supply `--port`.
    #[serde(default)]
    pub port: Option<String>,

    /// Baud rate.
    #[serde(default = "default_baud")]
    pub baud: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self { port: None, baud: default_baud() }
    }
}

/// Indicator light backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum LedConfig {
    /// No light attached; patterns are dropped.
    #[default]
    None,
    /// A sysfs LED class device.
    Sysfs {
        /// Name under `/sys/class/leds/`.
        name: String,
    },
    /// A sysfs GPIO line.
    Gpio {
        /// GPIO number under `/sys/class/gpio/`.
        pin: u32,
    },
}
