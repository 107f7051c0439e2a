//! Core events emitted by the engine

use chrono::{DateTime, Local};
use galley_api::{KitchenStatus, TimerInfo, TimerKey, TimerStopReason};
use galley_util::OrderId;
use std::time::Duration;

/// Events emitted by the kitchen engine
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// Order moved between kitchen statuses
    OrderStatusChanged {
        order_id: OrderId,
        old_status: KitchenStatus,
        new_status: KitchenStatus,
        version: u64,
    },

    /// Order changed without a status change (items, steps, backend refresh)
    OrderUpdated { order_id: OrderId, version: u64 },

    /// Order dropped because the backend no longer has it
    OrderRemoved { order_id: OrderId },

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

    /// Remaining time entered the alert window
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

    /// Timer values after a tick
    TimersUpdated { timers: Vec<TimerInfo> },

    /// Order table replaced from the backend
    OrdersSynced { order_count: usize },

    /// Configuration was reloaded
    ConfigReloaded { workstation_count: usize },
}

impl CoreEvent {
    /// Whether the event changes what a full state snapshot would show,
    /// beyond timer values
    pub fn changes_orders(&self) -> bool {
        matches!(
            self,
            CoreEvent::OrderStatusChanged { .. }
                | CoreEvent::OrderUpdated { .. }
                | CoreEvent::OrderRemoved { .. }
                | CoreEvent::OrdersSynced { .. }
        )
    }
}
