//! Event types for galleyd -> client streaming

use chrono::{DateTime, Local};
use galley_util::OrderId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{KitchenStateSnapshot, KitchenStatus, TimerInfo, TimerKey, TimerStopReason, API_VERSION};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: galley_util::now(),
            payload,
        }
    }
}

/// All possible events from the service to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Full state snapshot (sent on subscribe and major changes)
    StateChanged(KitchenStateSnapshot),

    OrderStatusChanged {
        order_id: OrderId,
        old_status: KitchenStatus,
        new_status: KitchenStatus,
        version: u64,
    },

    TimerStarted {
        key: TimerKey,
        estimated_duration: Duration,
        start_time: DateTime<Local>,
    },

    TimerStopped {
        key: TimerKey,
        reason: TimerStopReason,
    },

    TimerPaused {
        key: TimerKey,
        remaining_time: Duration,
    },

    TimerResumed {
        key: TimerKey,
        remaining_time: Duration,
    },

    /// Remaining time dropped into the alert window
    TimerWarning {
        key: TimerKey,
        remaining_time: Duration,
        alert_threshold: Duration,
    },

    /// Timer reached zero
    TimerOverdue { key: TimerKey },

    /// Timer is still overdue
    OverdueReminder {
        key: TimerKey,
        overdue_for: Duration,
    },

    /// Per-tick timer snapshot
    TimersUpdated { timers: Vec<TimerInfo> },

    /// Orders were reloaded from the backend
    OrdersSynced { order_count: usize },

    /// Configuration was reloaded
    ConfigReloaded { workstation_count: usize },

    /// Service is shutting down
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization() {
        let event = Event::new(EventPayload::TimerStarted {
            key: TimerKey::order("12"),
            estimated_duration: Duration::from_secs(600),
            start_time: galley_util::now(),
        });

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.api_version, API_VERSION);
        assert!(matches!(parsed.payload, EventPayload::TimerStarted { .. }));
    }

    #[test]
    fn status_change_is_tagged() {
        let event = Event::new(EventPayload::OrderStatusChanged {
            order_id: OrderId::new("12"),
            old_status: KitchenStatus::Active,
            new_status: KitchenStatus::Overdue,
            version: 3,
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["payload"]["type"], "order_status_changed");
        assert_eq!(value["payload"]["new_status"], "overdue");
    }
}
