//! Validated configuration structures

use crate::schema::{RawBackendConfig, RawConfig, RawServiceConfig, RawTimerConfig, RawWorkstation};
use galley_util::WorkstationId;
use std::path::PathBuf;
use std::time::Duration;

/// Validated configuration ready for use by the engine and service
#[derive(Debug, Clone, Default)]
pub struct KitchenConfig {
    pub service: ServiceConfig,
    pub timers: TimerSettings,
    pub backend: BackendConfig,
    pub workstations: Vec<Workstation>,
}

impl KitchenConfig {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            timers: TimerSettings::from_raw(raw.timers),
            backend: BackendConfig::from_raw(raw.backend),
            workstations: raw.workstations.into_iter().map(Workstation::from_raw).collect(),
        }
    }

    /// Get workstation by ID
    pub fn get_workstation(&self, id: &WorkstationId) -> Option<&Workstation> {
        self.workstations.iter().find(|w| &w.id == id)
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
    pub tick_interval: Duration,
    pub tick_without_subscribers: bool,
    /// None disables the periodic re-fetch
    pub sync_interval: Option<Duration>,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        let defaults = Self::default();
        Self {
            socket_path: raw.socket_path.unwrap_or(defaults.socket_path),
            data_dir: raw.data_dir.unwrap_or(defaults.data_dir),
            tick_interval: raw
                .tick_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_interval),
            tick_without_subscribers: raw
                .tick_without_subscribers
                .unwrap_or(defaults.tick_without_subscribers),
            sync_interval: raw
                .sync_interval_seconds
                .map(seconds_or_disabled)
                .unwrap_or(defaults.sync_interval),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: galley_util::default_socket_path(),
            data_dir: galley_util::default_data_dir(),
            tick_interval: Duration::from_secs(1),
            tick_without_subscribers: true,
            sync_interval: Some(Duration::from_secs(30)),
        }
    }
}

/// How paused time is treated when a timer resumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PauseAccounting {
    /// Paused time is excluded from elapsed time
    #[default]
    Compensated,
    /// Pausing only freezes the display; on resume the countdown jumps to
    /// where it would be had the pause never happened
    Legacy,
}

impl PauseAccounting {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "compensated" => Some(PauseAccounting::Compensated),
            "legacy" => Some(PauseAccounting::Legacy),
            _ => None,
        }
    }
}

/// Timer and alert settings
#[derive(Debug, Clone)]
pub struct TimerSettings {
    pub alert_threshold_cap: Duration,
    pub alert_threshold_ratio: f64,
    /// None disables reminders
    pub overdue_reminder_interval: Option<Duration>,
    pub pause_accounting: PauseAccounting,
}

impl TimerSettings {
    fn from_raw(raw: RawTimerConfig) -> Self {
        let defaults = Self::default();
        Self {
            alert_threshold_cap: raw
                .alert_threshold_cap_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.alert_threshold_cap),
            alert_threshold_ratio: raw
                .alert_threshold_ratio
                .unwrap_or(defaults.alert_threshold_ratio),
            overdue_reminder_interval: raw
                .overdue_reminder_seconds
                .map(seconds_or_disabled)
                .unwrap_or(defaults.overdue_reminder_interval),
            pause_accounting: raw
                .pause_accounting
                .as_deref()
                .and_then(PauseAccounting::parse)
                .unwrap_or_default(),
        }
    }

    /// Warning window for a timer of the given length
    pub fn alert_threshold(&self, duration: Duration) -> Duration {
        duration
            .mul_f64(self.alert_threshold_ratio)
            .min(self.alert_threshold_cap)
    }
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            alert_threshold_cap: Duration::from_secs(300),
            alert_threshold_ratio: 0.1,
            overdue_reminder_interval: Some(Duration::from_secs(30)),
            pause_accounting: PauseAccounting::Compensated,
        }
    }
}

/// What to do when a backend payload omits an optional field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingFieldPolicy {
    /// Substitute a placeholder value
    #[default]
    FillDefaults,
    /// Refuse the payload
    Reject,
}

impl MissingFieldPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "default" | "defaults" => Some(MissingFieldPolicy::FillDefaults),
            "reject" => Some(MissingFieldPolicy::Reject),
            _ => None,
        }
    }
}

/// Order backend configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// None means no backend; the service runs on local state only
    pub base_url: Option<String>,
    pub request_timeout: Duration,
    pub missing_fields: MissingFieldPolicy,
}

impl BackendConfig {
    fn from_raw(raw: RawBackendConfig) -> Self {
        Self {
            base_url: raw.base_url.map(|u| u.trim_end_matches('/').to_string()),
            request_timeout: Duration::from_secs(raw.request_timeout_seconds.unwrap_or(10)),
            missing_fields: raw
                .missing_fields
                .as_deref()
                .and_then(MissingFieldPolicy::parse)
                .unwrap_or_default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout: Duration::from_secs(10),
            missing_fields: MissingFieldPolicy::FillDefaults,
        }
    }
}

/// A kitchen workstation and how many orders it can cook at once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workstation {
    pub id: WorkstationId,
    pub label: String,
    pub capacity: u32,
}

impl Workstation {
    pub fn new(id: impl Into<String>, capacity: u32) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id: WorkstationId::new(id),
            capacity,
        }
    }

    fn from_raw(raw: RawWorkstation) -> Self {
        Self {
            label: raw.label.unwrap_or_else(|| raw.id.clone()),
            id: WorkstationId::new(raw.id),
            capacity: raw.capacity,
        }
    }
}

/// Convert seconds to Duration, treating 0 as "disabled" (None)
fn seconds_or_disabled(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_threshold_is_capped() {
        let timers = TimerSettings::default();

        // 10% of 30 minutes is 3 minutes
        assert_eq!(
            timers.alert_threshold(Duration::from_secs(1800)),
            Duration::from_secs(180)
        );
        // 10% of 2 hours would be 12 minutes; capped at 5
        assert_eq!(
            timers.alert_threshold(Duration::from_secs(7200)),
            Duration::from_secs(300)
        );
        assert_eq!(timers.alert_threshold(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn zero_disables_intervals() {
        let raw: RawConfig = toml::from_str(
            r#"
            config_version = 1
            [service]
            sync_interval_seconds = 0
            [timers]
            overdue_reminder_seconds = 0
        "#,
        )
        .unwrap();

        let config = KitchenConfig::from_raw(raw);
        assert!(config.service.sync_interval.is_none());
        assert!(config.timers.overdue_reminder_interval.is_none());
    }

    #[test]
    fn workstation_label_defaults_to_id() {
        let ws = Workstation::from_raw(RawWorkstation {
            id: "fryer".into(),
            label: None,
            capacity: 2,
        });
        assert_eq!(ws.label, "fryer");
        assert_eq!(ws.id.as_str(), "fryer");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let backend = BackendConfig::from_raw(RawBackendConfig {
            base_url: Some("http://orders.local/api/".into()),
            request_timeout_seconds: None,
            missing_fields: Some("reject".into()),
        });
        assert_eq!(backend.base_url.as_deref(), Some("http://orders.local/api"));
        assert_eq!(backend.missing_fields, MissingFieldPolicy::Reject);
    }
}
