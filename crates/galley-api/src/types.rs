//! Shared types for the galleyd API

use chrono::{DateTime, Local};
use galley_util::{ItemId, OrderId, WorkstationId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::Order;

/// Identifies a cooking timer: one per order, or one per order item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerKey {
    pub order_id: OrderId,
    pub item_id: Option<ItemId>,
}

impl TimerKey {
    /// Key of the order-level timer
    pub fn order(order_id: impl Into<OrderId>) -> Self {
        Self {
            order_id: order_id.into(),
            item_id: None,
        }
    }

    /// Key of an item-level timer
    pub fn item(order_id: impl Into<OrderId>, item_id: impl Into<ItemId>) -> Self {
        Self {
            order_id: order_id.into(),
            item_id: Some(item_id.into()),
        }
    }

    pub fn is_order_timer(&self) -> bool {
        self.item_id.is_none()
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.item_id {
            Some(item) => write!(f, "{}/{}", self.order_id, item),
            None => write!(f, "{}", self.order_id),
        }
    }
}

/// Timer state as seen by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerInfo {
    pub key: TimerKey,
    pub start_time: DateTime<Local>,
    pub estimated_duration: Duration,
    pub remaining_time: Duration,
    pub alert_threshold: Duration,
    pub is_running: bool,
    pub is_paused: bool,
    pub is_overdue: bool,
}

/// Why a timer was destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerStopReason {
    /// The order was completed
    Completed,
    /// The order was reset to the queue
    Reset,
    /// The item the timer belonged to is ready
    ItemReady,
    /// The backend's view of the order no longer has it cooking
    Reconciled,
    /// The order disappeared from the backend
    OrderRemoved,
}

/// Workstation with its current load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkstationView {
    pub workstation_id: WorkstationId,
    pub label: String,
    pub capacity: u32,
    /// In-progress orders routed here
    pub load: u32,
    pub at_capacity: bool,
}

/// Full service state snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KitchenStateSnapshot {
    pub api_version: u32,
    pub orders: Vec<Order>,
    pub timers: Vec<TimerInfo>,
    #[serde(default)]
    pub workstations: Vec<WorkstationView>,
    /// Number of outstanding tick subscriptions
    pub tick_subscribers: usize,
}

/// Role for authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Kitchen display - can view state and drive orders and timers
    Station,
    /// Local admin - can also reload config
    Admin,
    /// Read-only observer
    Observer,
}

impl ClientRole {
    pub fn can_mutate_orders(&self) -> bool {
        matches!(self, ClientRole::Station | ClientRole::Admin)
    }

    pub fn can_reload_config(&self) -> bool {
        matches!(self, ClientRole::Admin)
    }
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub ready: bool,
    pub store_ok: bool,
    /// Whether the last backend sync succeeded
    pub backend_ok: bool,
    pub order_count: usize,
    pub timer_count: usize,
}
