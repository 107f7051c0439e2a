//! Store trait definitions

use chrono::{DateTime, Local};
use galley_api::{Order, TimerKey};
use galley_util::OrderId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{AuditEvent, StoreResult};

/// Main store trait
pub trait Store: Send + Sync {
    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Orders

    /// Load every persisted order
    fn load_orders(&self) -> StoreResult<Vec<Order>>;

    /// Load one order
    fn get_order(&self, order_id: &OrderId) -> StoreResult<Option<Order>>;

    /// Insert or overwrite an order.
    ///
    /// Fails with [`StoreError::Conflict`](crate::StoreError::Conflict) when
    /// the stored copy has a version greater than or equal to `order.version`.
    fn save_order(&self, order: &Order) -> StoreResult<()>;

    /// Remove an order. Removing an unknown order is not an error.
    fn delete_order(&self, order_id: &OrderId) -> StoreResult<()>;

    // Timers

    /// Load every persisted timer
    fn load_timers(&self) -> StoreResult<Vec<TimerSnapshot>>;

    /// Insert or overwrite the snapshot for `snapshot.key`
    fn save_timer(&self, snapshot: &TimerSnapshot) -> StoreResult<()>;

    /// Remove a timer. Removing an unknown timer is not an error.
    fn delete_timer(&self, key: &TimerKey) -> StoreResult<()>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}

/// Snapshot of a running timer for restart recovery.
///
/// Remaining time is not stored; it is derived again from the start time
/// and pause bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    pub key: TimerKey,
    pub start_time: DateTime<Local>,
    pub estimated_duration: Duration,
    pub paused_at: Option<DateTime<Local>>,
    pub paused_accumulated: Duration,
    pub warning_issued: bool,
}
