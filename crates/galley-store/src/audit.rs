//! Audit event types

use chrono::{DateTime, Local};
use galley_api::{KitchenStatus, TimerKey};
use galley_util::{ItemId, OrderId, WorkstationId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Service started
    ServiceStarted,

    /// Service stopped
    ServiceStopped,

    /// Config loaded/reloaded
    ConfigLoaded { workstation_count: usize },

    /// Order went onto the line
    OrderStarted {
        order_id: OrderId,
        workstation: Option<WorkstationId>,
        estimated_duration: Duration,
    },

    /// Order timer ran out
    OrderOverdue { order_id: OrderId },

    /// Order finished
    OrderCompleted {
        order_id: OrderId,
        /// Time from start to completion, if the order was started here
        duration: Option<Duration>,
    },

    /// Order sent back to the queue
    OrderReset { order_id: OrderId },

    /// Manual status change by a client
    StatusChanged {
        order_id: OrderId,
        from: KitchenStatus,
        to: KitchenStatus,
        version: u64,
    },

    TimerPaused { key: TimerKey },

    TimerResumed { key: TimerKey },

    ItemStarted { order_id: OrderId, item_id: ItemId },

    ItemCompleted { order_id: OrderId, item_id: ItemId },

    /// Local order overwritten with the backend's view
    OrderReconciled {
        order_id: OrderId,
        status: KitchenStatus,
        version: u64,
    },

    /// Order no longer present at the backend
    OrderRemoved { order_id: OrderId },

    /// Full order list reloaded from the backend
    OrdersSynced { order_count: usize },

    /// A backend call failed
    BackendFailure {
        operation: String,
        order_id: Option<OrderId>,
        message: String,
    },

    /// Client connected
    ClientConnected {
        client_id: String,
        role: String,
        uid: Option<u32>,
    },

    /// Client disconnected
    ClientDisconnected { client_id: String },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp: galley_util::now(),
            event,
        }
    }
}
