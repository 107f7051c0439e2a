//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Service-level settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Timer and alert settings
    #[serde(default)]
    pub timers: RawTimerConfig,

    /// Order backend connection
    #[serde(default)]
    pub backend: RawBackendConfig,

    /// Kitchen workstations
    #[serde(default)]
    pub workstations: Vec<RawWorkstation>,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// IPC socket path
    pub socket_path: Option<PathBuf>,

    /// Data directory for the store
    pub data_dir: Option<PathBuf>,

    /// Tick cadence in milliseconds (default 1000)
    pub tick_interval_ms: Option<u64>,

    /// Keep ticking when no client holds a timer subscription (default true)
    pub tick_without_subscribers: Option<bool>,

    /// Periodic backend re-fetch in seconds. 0 disables. (default 30)
    pub sync_interval_seconds: Option<u64>,
}

/// Timer and alert settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawTimerConfig {
    /// Upper bound on the warning window (default 300)
    pub alert_threshold_cap_seconds: Option<u64>,

    /// Warning window as a fraction of the timer duration (default 0.1)
    pub alert_threshold_ratio: Option<f64>,

    /// Repeat interval for overdue reminders. 0 disables. (default 30)
    pub overdue_reminder_seconds: Option<u64>,

    /// "compensated" or "legacy"
    pub pause_accounting: Option<String>,
}

/// Order backend connection
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawBackendConfig {
    /// Base URL of the order service. Without it galleyd runs offline.
    pub base_url: Option<String>,

    /// Per-request timeout (default 10)
    pub request_timeout_seconds: Option<u64>,

    /// "default" or "reject"
    pub missing_fields: Option<String>,
}

/// Workstation definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawWorkstation {
    pub id: String,

    /// Display label (defaults to the ID)
    pub label: Option<String>,

    /// Maximum concurrently cooking orders
    pub capacity: u32,
}
