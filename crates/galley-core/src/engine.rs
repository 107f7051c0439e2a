//! Kitchen engine

use chrono::{DateTime, Local};
use galley_api::{
    ItemStatus, KitchenStateSnapshot, KitchenStatus, Order, TimerInfo, TimerKey, TimerStopReason,
    WorkstationView, API_VERSION,
};
use galley_config::KitchenConfig;
use galley_store::{AuditEvent, AuditEventType, Store, StoreError, TimerSnapshot};
use galley_util::{elapsed_between, minutes_to_duration, ItemId, OrderId, WorkstationId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{ActiveTimer, CoreError, CoreEvent, CoreResult, TimerSignal};

/// The kitchen engine: orders, their cooking timers, and the state machine
/// coupling them.
///
/// All operations take the current time explicitly. The engine has no
/// interior locking; the owner serializes access.
pub struct KitchenEngine {
    config: KitchenConfig,
    store: Arc<dyn Store>,
    orders: BTreeMap<OrderId, Order>,
    timers: BTreeMap<TimerKey, ActiveTimer>,
    tick_refs: usize,
}

impl KitchenEngine {
    /// Create a new kitchen engine
    pub fn new(config: KitchenConfig, store: Arc<dyn Store>) -> Self {
        info!(
            workstation_count = config.workstations.len(),
            pause_accounting = ?config.timers.pause_accounting,
            "Kitchen engine initialized"
        );

        let _ = store.append_audit(AuditEvent::new(AuditEventType::ConfigLoaded {
            workstation_count: config.workstations.len(),
        }));

        Self {
            config,
            store,
            orders: BTreeMap::new(),
            timers: BTreeMap::new(),
            tick_refs: 0,
        }
    }

    /// Get current configuration
    pub fn config(&self) -> &KitchenConfig {
        &self.config
    }

    /// Reload configuration. Running timers pick up the new alert window.
    pub fn reload_config(&mut self, config: KitchenConfig) -> CoreEvent {
        let workstation_count = config.workstations.len();
        self.config = config;

        for timer in self.timers.values_mut() {
            timer.alert_threshold = self.config.timers.alert_threshold(timer.estimated_duration);
        }

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::ConfigLoaded {
            workstation_count,
        }));

        info!(workstation_count, "Configuration reloaded");

        CoreEvent::ConfigReloaded { workstation_count }
    }

    // Queries

    /// All orders, most urgent first
    pub fn list_orders(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.orders.values().cloned().collect();
        orders.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        orders
    }

    pub fn get_order(&self, order_id: &OrderId) -> Option<&Order> {
        self.orders.get(order_id)
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn timer(&self, key: &TimerKey) -> Option<&ActiveTimer> {
        self.timers.get(key)
    }

    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    pub fn timers(&self) -> Vec<TimerInfo> {
        self.timers.values().map(ActiveTimer::info).collect()
    }

    /// Each configured workstation with its current load
    pub fn list_workstations(&self) -> Vec<WorkstationView> {
        self.config
            .workstations
            .iter()
            .map(|ws| {
                let load = self.workstation_load(&ws.id);
                WorkstationView {
                    workstation_id: ws.id.clone(),
                    label: ws.label.clone(),
                    capacity: ws.capacity,
                    load,
                    at_capacity: load >= ws.capacity,
                }
            })
            .collect()
    }

    /// Get current state snapshot
    pub fn get_state(&self) -> KitchenStateSnapshot {
        KitchenStateSnapshot {
            api_version: API_VERSION,
            orders: self.list_orders(),
            timers: self.timers(),
            workstations: self.list_workstations(),
            tick_subscribers: self.tick_refs,
        }
    }

    // Tick reference counting

    /// Register interest in ticks. Returns the new reference count.
    pub fn acquire_ticks(&mut self) -> usize {
        self.tick_refs += 1;
        if self.tick_refs == 1 {
            debug!("Tick loop requested");
        }
        self.tick_refs
    }

    /// Drop interest in ticks. Returns the new reference count.
    pub fn release_ticks(&mut self) -> usize {
        self.tick_refs = self.tick_refs.saturating_sub(1);
        if self.tick_refs == 0 {
            debug!("Tick loop no longer requested");
        }
        self.tick_refs
    }

    /// Whether anyone wants the tick loop running
    pub fn is_ticking(&self) -> bool {
        self.tick_refs > 0
    }

    pub fn tick_subscribers(&self) -> usize {
        self.tick_refs
    }

    // Tick

    /// Advance every running timer to `now`, raise alerts, then mark the
    /// orders of overdue timers as overdue.
    pub fn tick(&mut self, now: DateTime<Local>) -> Vec<CoreEvent> {
        let mut events = Vec::new();

        if self.timers.is_empty() {
            return events;
        }

        let reminder_interval = self.config.timers.overdue_reminder_interval;

        for timer in self.timers.values_mut() {
            for signal in timer.advance(now, reminder_interval) {
                match signal {
                    TimerSignal::Warning { remaining } => {
                        info!(
                            timer = %timer.key,
                            remaining_secs = remaining.as_secs(),
                            "Timer entered alert window"
                        );
                        events.push(CoreEvent::TimerWarning {
                            key: timer.key.clone(),
                            remaining_time: remaining,
                            alert_threshold: timer.alert_threshold,
                        });
                    }
                    TimerSignal::Overdue => {
                        info!(timer = %timer.key, "Timer overdue");
                        events.push(CoreEvent::TimerOverdue {
                            key: timer.key.clone(),
                        });
                    }
                    TimerSignal::Reminder { overdue_for } => {
                        debug!(
                            timer = %timer.key,
                            overdue_secs = overdue_for.as_secs(),
                            "Overdue reminder"
                        );
                        events.push(CoreEvent::OverdueReminder {
                            key: timer.key.clone(),
                            overdue_for,
                        });
                    }
                }
            }
        }

        // Sweep only after every timer has advanced
        let overdue_orders: BTreeSet<OrderId> = self
            .timers
            .values()
            .filter(|t| t.is_overdue)
            .map(|t| t.key.order_id.clone())
            .collect();

        for order_id in overdue_orders {
            let Some(order) = self.orders.get_mut(&order_id) else {
                debug!(order_id = %order_id, "Overdue timer has no order, skipping");
                continue;
            };

            if matches!(order.status, KitchenStatus::Completed | KitchenStatus::Overdue) {
                continue;
            }

            let old_status = order.status;
            order.status = KitchenStatus::Overdue;
            order.version += 1;
            persist(self.store.as_ref(), order);

            let _ = self.store.append_audit(AuditEvent::new(AuditEventType::OrderOverdue {
                order_id: order_id.clone(),
            }));

            info!(order_id = %order_id, "Order overdue");

            events.push(CoreEvent::OrderStatusChanged {
                order_id,
                old_status,
                new_status: KitchenStatus::Overdue,
                version: order.version,
            });
        }

        events.push(CoreEvent::TimersUpdated {
            timers: self.timers(),
        });

        events
    }

    // Order transitions

    /// Put a queued order on the line and start its timer
    pub fn start_order(
        &mut self,
        order_id: &OrderId,
        now: DateTime<Local>,
    ) -> CoreResult<Vec<CoreEvent>> {
        let order = self.order(order_id)?;
        let key = TimerKey::order(order_id.clone());

        match order.status {
            KitchenStatus::Queued => {}
            KitchenStatus::Active => {
                if self.timers.contains_key(&key) {
                    debug!(order_id = %order_id, "Order already started");
                    return Ok(Vec::new());
                }
                // Active without a timer: restore the timer only
                let start = order.actual_start_time.unwrap_or(now);
                let duration = minutes_to_duration(order.estimated_time.into());
                return Ok(vec![self.create_timer(key, duration, start)]);
            }
            from => {
                return Err(CoreError::InvalidTransition {
                    order_id: order_id.clone(),
                    from,
                    action: "start",
                });
            }
        }

        if let Some(ws_id) = &order.workstation {
            self.check_capacity(ws_id)?;
        }

        let duration = minutes_to_duration(order.estimated_time.into());
        let workstation = order.workstation.clone();

        let order = order_entry(&mut self.orders, order_id)?;
        let old_status = order.status;
        order.status = KitchenStatus::Active;
        order.actual_start_time.get_or_insert(now);
        order.version += 1;
        let version = order.version;
        persist(self.store.as_ref(), order);

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::OrderStarted {
            order_id: order_id.clone(),
            workstation,
            estimated_duration: duration,
        }));

        info!(
            order_id = %order_id,
            estimated_secs = duration.as_secs(),
            "Order started"
        );

        Ok(vec![
            CoreEvent::OrderStatusChanged {
                order_id: order_id.clone(),
                old_status,
                new_status: KitchenStatus::Active,
                version,
            },
            self.create_timer(key, duration, now),
        ])
    }

    /// Finish an order: stop its timers and mark every item ready
    pub fn complete_order(
        &mut self,
        order_id: &OrderId,
        now: DateTime<Local>,
    ) -> CoreResult<Vec<CoreEvent>> {
        let order = self.order(order_id)?;

        match order.status {
            KitchenStatus::Completed => return Ok(Vec::new()),
            KitchenStatus::Queued => {
                return Err(CoreError::InvalidTransition {
                    order_id: order_id.clone(),
                    from: KitchenStatus::Queued,
                    action: "complete",
                });
            }
            KitchenStatus::Active | KitchenStatus::Overdue => {}
        }

        let mut events = self.stop_timers(order_id, |_| true, TimerStopReason::Completed);

        let order = order_entry(&mut self.orders, order_id)?;
        let old_status = order.status;
        order.status = KitchenStatus::Completed;
        order.actual_end_time.get_or_insert(now);
        for item in &mut order.items {
            item.status = ItemStatus::Ready;
        }
        order.version += 1;
        let version = order.version;
        let duration = order
            .actual_start_time
            .map(|start| elapsed_between(start, now));
        persist(self.store.as_ref(), order);

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::OrderCompleted {
            order_id: order_id.clone(),
            duration,
        }));

        info!(
            order_id = %order_id,
            duration_secs = duration.map(|d| d.as_secs()),
            "Order completed"
        );

        events.push(CoreEvent::OrderStatusChanged {
            order_id: order_id.clone(),
            old_status,
            new_status: KitchenStatus::Completed,
            version,
        });

        Ok(events)
    }

    /// Send an order back to the queue, dropping all of its timers.
    ///
    /// Resetting an order that is already queued, idle, and untouched is a
    /// no-op.
    pub fn reset_order(
        &mut self,
        order_id: &OrderId,
        _now: DateTime<Local>,
    ) -> CoreResult<Vec<CoreEvent>> {
        let order = self.order(order_id)?;
        let has_timers = self.timers.keys().any(|k| &k.order_id == order_id);
        let items_pending = order.items.iter().all(|i| i.status == ItemStatus::Pending);

        if order.status == KitchenStatus::Queued && !has_timers && items_pending {
            return Ok(Vec::new());
        }

        let mut events = self.stop_timers(order_id, |_| true, TimerStopReason::Reset);

        let order = order_entry(&mut self.orders, order_id)?;
        let old_status = order.status;
        order.status = KitchenStatus::Queued;
        for item in &mut order.items {
            item.status = ItemStatus::Pending;
        }
        order.version += 1;
        let version = order.version;
        persist(self.store.as_ref(), order);

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::OrderReset {
            order_id: order_id.clone(),
        }));

        info!(order_id = %order_id, from = %old_status, "Order reset");

        events.push(if old_status != KitchenStatus::Queued {
            CoreEvent::OrderStatusChanged {
                order_id: order_id.clone(),
                old_status,
                new_status: KitchenStatus::Queued,
                version,
            }
        } else {
            CoreEvent::OrderUpdated {
                order_id: order_id.clone(),
                version,
            }
        });

        Ok(events)
    }

    /// Manual status change requested by a client.
    ///
    /// With `expected_version`, the change only applies if the order has not
    /// been modified since the client last saw it.
    pub fn update_status(
        &mut self,
        order_id: &OrderId,
        status: KitchenStatus,
        expected_version: Option<u64>,
        now: DateTime<Local>,
    ) -> CoreResult<Vec<CoreEvent>> {
        let order = self.order(order_id)?;

        if let Some(expected) = expected_version
            && expected != order.version
        {
            return Err(CoreError::VersionConflict {
                order_id: order_id.clone(),
                expected,
                actual: order.version,
            });
        }

        let from = order.status;
        if from == status {
            return Ok(Vec::new());
        }

        let events = match status {
            KitchenStatus::Active => self.start_order(order_id, now)?,
            KitchenStatus::Completed => self.complete_order(order_id, now)?,
            KitchenStatus::Queued => self.reset_order(order_id, now)?,
            KitchenStatus::Overdue => self.mark_overdue(order_id, now)?,
        };

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::StatusChanged {
            order_id: order_id.clone(),
            from,
            to: status,
            version: self.order(order_id)?.version,
        }));

        Ok(events)
    }

    fn mark_overdue(
        &mut self,
        order_id: &OrderId,
        now: DateTime<Local>,
    ) -> CoreResult<Vec<CoreEvent>> {
        let order = order_entry(&mut self.orders, order_id)?;
        if order.status != KitchenStatus::Active {
            return Err(CoreError::InvalidTransition {
                order_id: order_id.clone(),
                from: order.status,
                action: "mark overdue",
            });
        }

        order.status = KitchenStatus::Overdue;
        order.version += 1;
        let version = order.version;
        persist(self.store.as_ref(), order);

        info!(order_id = %order_id, "Order marked overdue");

        let mut events = vec![CoreEvent::OrderStatusChanged {
            order_id: order_id.clone(),
            old_status: KitchenStatus::Active,
            new_status: KitchenStatus::Overdue,
            version,
        }];

        let key = TimerKey::order(order_id.clone());
        if let Some(timer) = self.timers.get_mut(&key)
            && timer.force_overdue(now)
        {
            events.push(CoreEvent::TimerOverdue { key });
        }

        Ok(events)
    }

    // Timers

    /// Freeze a timer's countdown
    pub fn pause_timer(
        &mut self,
        key: &TimerKey,
        now: DateTime<Local>,
    ) -> CoreResult<Vec<CoreEvent>> {
        let timer = self
            .timers
            .get_mut(key)
            .ok_or_else(|| CoreError::TimerNotFound(key.clone()))?;

        if timer.is_overdue {
            return Err(CoreError::InvalidTransition {
                order_id: key.order_id.clone(),
                from: KitchenStatus::Overdue,
                action: "pause the timer of",
            });
        }

        if !timer.pause(now) {
            return Ok(Vec::new());
        }

        persist_timer(self.store.as_ref(), timer);
        let remaining_time = timer.remaining_time;

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::TimerPaused {
            key: key.clone(),
        }));

        info!(timer = %key, remaining_secs = remaining_time.as_secs(), "Timer paused");

        Ok(vec![CoreEvent::TimerPaused {
            key: key.clone(),
            remaining_time,
        }])
    }

    /// Continue a paused timer
    pub fn resume_timer(
        &mut self,
        key: &TimerKey,
        now: DateTime<Local>,
    ) -> CoreResult<Vec<CoreEvent>> {
        let accounting = self.config.timers.pause_accounting;
        let timer = self
            .timers
            .get_mut(key)
            .ok_or_else(|| CoreError::TimerNotFound(key.clone()))?;

        if !timer.resume(now, accounting) {
            return Ok(Vec::new());
        }

        persist_timer(self.store.as_ref(), timer);
        let remaining_time = timer.compute_remaining(now);

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::TimerResumed {
            key: key.clone(),
        }));

        info!(timer = %key, remaining_secs = remaining_time.as_secs(), "Timer resumed");

        Ok(vec![CoreEvent::TimerResumed {
            key: key.clone(),
            remaining_time,
        }])
    }

    // Items

    /// Start an item-level timer, starting the order first if it is queued.
    ///
    /// The duration comes from `minutes`, then the item's estimate, then the
    /// order's estimate.
    pub fn start_item(
        &mut self,
        order_id: &OrderId,
        item_id: &ItemId,
        minutes: Option<u32>,
        now: DateTime<Local>,
    ) -> CoreResult<Vec<CoreEvent>> {
        let order = self.order(order_id)?;
        let item = find_item(order, item_id)?;

        if order.status.is_terminal() {
            return Err(CoreError::InvalidTransition {
                order_id: order_id.clone(),
                from: order.status,
                action: "start an item of",
            });
        }

        let minutes = minutes
            .or(item.estimated_time)
            .unwrap_or(order.estimated_time);
        let order_queued = order.status == KitchenStatus::Queued;

        let mut events = Vec::new();
        if order_queued {
            events.extend(self.start_order(order_id, now)?);
        }

        let key = TimerKey::item(order_id.clone(), item_id.clone());
        if self.timers.contains_key(&key) {
            return Ok(events);
        }

        let order = order_entry(&mut self.orders, order_id)?;
        if let Some(item) = order.item_mut(item_id) {
            item.status = ItemStatus::Preparing;
        }
        order.version += 1;
        let version = order.version;
        persist(self.store.as_ref(), order);

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::ItemStarted {
            order_id: order_id.clone(),
            item_id: item_id.clone(),
        }));

        info!(order_id = %order_id, item_id = %item_id, minutes, "Item started");

        let duration = minutes_to_duration(minutes.into());
        events.push(self.create_timer(key, duration, now));
        events.push(CoreEvent::OrderUpdated {
            order_id: order_id.clone(),
            version,
        });

        Ok(events)
    }

    /// Mark an item ready and stop its timer
    pub fn complete_item(
        &mut self,
        order_id: &OrderId,
        item_id: &ItemId,
        _now: DateTime<Local>,
    ) -> CoreResult<Vec<CoreEvent>> {
        let order = self.order(order_id)?;
        let item = find_item(order, item_id)?;
        let key = TimerKey::item(order_id.clone(), item_id.clone());

        if item.status == ItemStatus::Ready && !self.timers.contains_key(&key) {
            return Ok(Vec::new());
        }

        let mut events = self.stop_timers(
            order_id,
            |k| k.item_id.as_ref() == Some(item_id),
            TimerStopReason::ItemReady,
        );

        let order = order_entry(&mut self.orders, order_id)?;
        if let Some(item) = order.item_mut(item_id) {
            item.status = ItemStatus::Ready;
        }
        order.version += 1;
        let version = order.version;
        persist(self.store.as_ref(), order);

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::ItemCompleted {
            order_id: order_id.clone(),
            item_id: item_id.clone(),
        }));

        info!(order_id = %order_id, item_id = %item_id, "Item ready");

        events.push(CoreEvent::OrderUpdated {
            order_id: order_id.clone(),
            version,
        });

        Ok(events)
    }

    /// Tick off one preparation step of an item
    pub fn complete_step(
        &mut self,
        order_id: &OrderId,
        item_id: &ItemId,
        step_index: usize,
    ) -> CoreResult<Vec<CoreEvent>> {
        let order = order_entry(&mut self.orders, order_id)?;
        let item = order
            .item_mut(item_id)
            .ok_or_else(|| CoreError::ItemNotFound {
                order_id: order_id.clone(),
                item_id: item_id.clone(),
            })?;
        let step = item
            .preparation_steps
            .get_mut(step_index)
            .ok_or_else(|| CoreError::StepNotFound {
                order_id: order_id.clone(),
                item_id: item_id.clone(),
                step_index,
            })?;

        if step.completed {
            return Ok(Vec::new());
        }
        step.completed = true;
        order.version += 1;
        let version = order.version;
        persist(self.store.as_ref(), order);

        debug!(order_id = %order_id, item_id = %item_id, step_index, "Step completed");

        Ok(vec![CoreEvent::OrderUpdated {
            order_id: order_id.clone(),
            version,
        }])
    }

    // Reconciliation

    /// Replace the order table with a backend snapshot.
    ///
    /// Orders missing from the snapshot are dropped along with their timers.
    pub fn load_orders(&mut self, orders: Vec<Order>, now: DateTime<Local>) -> Vec<CoreEvent> {
        let incoming: BTreeSet<OrderId> = orders.iter().map(|o| o.id.clone()).collect();
        let stale: Vec<OrderId> = self
            .orders
            .keys()
            .filter(|id| !incoming.contains(*id))
            .cloned()
            .collect();

        let mut events = Vec::new();
        for order_id in stale {
            events.extend(self.remove_order(&order_id));
        }

        let order_count = orders.len();
        for order in orders {
            events.extend(self.reconcile_order(order, now));
        }

        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::OrdersSynced { order_count }));

        debug!(order_count, "Orders synced");

        events.push(CoreEvent::OrdersSynced { order_count });
        events
    }

    /// Overwrite the local copy of an order with the backend's view, then
    /// repair timer coupling.
    ///
    /// The backend wins, with two exceptions: start/end stamps it does not
    /// know about are kept, and a locally latched overdue is not cleared by
    /// a backend `active`. Replaying the same order is a no-op.
    pub fn reconcile_order(&mut self, remote: Order, now: DateTime<Local>) -> Vec<CoreEvent> {
        let order_id = remote.id.clone();
        let local = self.orders.get(&order_id);
        let mut order = remote;

        if let Some(local) = local {
            order.actual_start_time = order.actual_start_time.or(local.actual_start_time);
            order.actual_end_time = order.actual_end_time.or(local.actual_end_time);
        }

        // Same rule as the tick sweep: any overdue timer makes the order overdue
        if order.status == KitchenStatus::Active && self.has_overdue_timer(&order_id) {
            order.status = KitchenStatus::Overdue;
        }

        if order.status.is_in_progress() && order.actual_start_time.is_none() {
            order.actual_start_time = Some(now);
        }

        let mut events = Vec::new();
        let unchanged = local.is_some_and(|l| {
            order.version <= l.version && Order { version: l.version, ..order.clone() } == *l
        });

        if !unchanged {
            let local_version = local.map(|l| l.version).unwrap_or(0);
            let old_status = local.map(|l| l.status);
            order.version = local_version.max(order.version) + 1;
            let new_status = order.status;
            let version = order.version;

            persist(self.store.as_ref(), &order);
            self.orders.insert(order_id.clone(), order);

            let _ = self.store.append_audit(AuditEvent::new(AuditEventType::OrderReconciled {
                order_id: order_id.clone(),
                status: new_status,
                version,
            }));

            debug!(order_id = %order_id, status = %new_status, version, "Order reconciled");

            events.push(match old_status {
                Some(old_status) if old_status != new_status => CoreEvent::OrderStatusChanged {
                    order_id: order_id.clone(),
                    old_status,
                    new_status,
                    version,
                },
                _ => CoreEvent::OrderUpdated {
                    order_id: order_id.clone(),
                    version,
                },
            });
        }

        events.extend(self.repair_timers(&order_id, now));
        events
    }

    /// Load orders saved by a previous run and recreate their timers.
    ///
    /// Timers come back from their saved snapshots, paused ones included.
    /// Time spent while the service was down counts as cooking time. An
    /// in-progress order without a saved order timer gets one starting at its
    /// `actual_start_time`.
    pub fn restore(&mut self, orders: Vec<Order>, now: DateTime<Local>) -> Vec<CoreEvent> {
        let mut snapshots: BTreeMap<TimerKey, TimerSnapshot> = match self.store.load_timers() {
            Ok(timers) => timers.into_iter().map(|t| (t.key.clone(), t)).collect(),
            Err(e) => {
                warn!(error = %e, "Failed to load stored timers");
                BTreeMap::new()
            }
        };

        let mut events = Vec::new();

        for mut order in orders {
            if order.status.is_in_progress() && order.actual_start_time.is_none() {
                order.actual_start_time = Some(now);
                order.version += 1;
                persist(self.store.as_ref(), &order);
            }

            let order_id = order.id.clone();
            let in_progress = order.status.is_in_progress();
            self.orders.insert(order_id.clone(), order);

            let keys: Vec<TimerKey> = snapshots
                .keys()
                .filter(|k| k.order_id == order_id)
                .cloned()
                .collect();
            for key in keys {
                let Some(snapshot) = snapshots.remove(&key) else {
                    continue;
                };
                if !in_progress {
                    forget_timer(self.store.as_ref(), &key);
                    continue;
                }

                let threshold = self.config.timers.alert_threshold(snapshot.estimated_duration);
                let timer = ActiveTimer::from_snapshot(snapshot, threshold, now);
                debug!(
                    timer = %key,
                    remaining_secs = timer.remaining_time.as_secs(),
                    paused = timer.is_paused,
                    "Timer restored"
                );
                events.push(CoreEvent::TimerStarted {
                    key: key.clone(),
                    estimated_duration: timer.estimated_duration,
                    start_time: timer.start_time,
                });
                self.timers.insert(key, timer);
            }

            events.extend(self.repair_timers(&order_id, now));
        }

        for key in snapshots.into_keys() {
            debug!(timer = %key, "Dropping stored timer without an order");
            forget_timer(self.store.as_ref(), &key);
        }

        info!(
            order_count = self.orders.len(),
            timer_count = self.timers.len(),
            "Orders restored"
        );

        events
    }

    /// Drop an order and its timers
    pub fn remove_order(&mut self, order_id: &OrderId) -> Vec<CoreEvent> {
        let mut events = self.stop_timers(order_id, |_| true, TimerStopReason::OrderRemoved);

        if self.orders.remove(order_id).is_some() {
            if let Err(e) = self.store.delete_order(order_id) {
                warn!(order_id = %order_id, error = %e, "Failed to delete stored order");
            }
            let _ = self.store.append_audit(AuditEvent::new(AuditEventType::OrderRemoved {
                order_id: order_id.clone(),
            }));
            info!(order_id = %order_id, "Order removed");
            events.push(CoreEvent::OrderRemoved {
                order_id: order_id.clone(),
            });
        }

        events
    }

    /// Bring timers in line with the order's status
    fn repair_timers(&mut self, order_id: &OrderId, now: DateTime<Local>) -> Vec<CoreEvent> {
        let Some(order) = self.orders.get(order_id) else {
            return Vec::new();
        };

        let status = order.status;
        let start = order.actual_start_time.unwrap_or(now);
        let duration = minutes_to_duration(order.estimated_time.into());
        let ready_items: Vec<ItemId> = order
            .items
            .iter()
            .filter(|i| i.status == ItemStatus::Ready)
            .map(|i| i.id.clone())
            .collect();

        let mut events = Vec::new();

        match status {
            KitchenStatus::Queued | KitchenStatus::Completed => {
                events.extend(self.stop_timers(order_id, |_| true, TimerStopReason::Reconciled));
            }
            KitchenStatus::Active | KitchenStatus::Overdue => {
                events.extend(self.stop_timers(
                    order_id,
                    |k| k.item_id.as_ref().is_some_and(|i| ready_items.contains(i)),
                    TimerStopReason::ItemReady,
                ));

                let key = TimerKey::order(order_id.clone());
                if !self.timers.contains_key(&key) {
                    events.push(self.create_timer(key.clone(), duration, start));
                }

                if status == KitchenStatus::Overdue
                    && let Some(timer) = self.timers.get_mut(&key)
                    && timer.force_overdue(now)
                {
                    events.push(CoreEvent::TimerOverdue { key });
                }
            }
        }

        events
    }

    // Helpers

    fn order(&self, order_id: &OrderId) -> CoreResult<&Order> {
        self.orders
            .get(order_id)
            .ok_or_else(|| CoreError::OrderNotFound(order_id.clone()))
    }

    fn has_overdue_timer(&self, order_id: &OrderId) -> bool {
        self.timers
            .iter()
            .any(|(key, timer)| &key.order_id == order_id && timer.is_overdue)
    }

    fn workstation_load(&self, ws_id: &WorkstationId) -> u32 {
        self.orders
            .values()
            .filter(|o| o.workstation.as_ref() == Some(ws_id) && o.status.is_in_progress())
            .count() as u32
    }

    fn check_capacity(&self, ws_id: &WorkstationId) -> CoreResult<()> {
        let Some(ws) = self.config.get_workstation(ws_id) else {
            warn!(workstation_id = %ws_id, "Order routed to unknown workstation");
            return Ok(());
        };

        if self.workstation_load(ws_id) >= ws.capacity {
            return Err(CoreError::WorkstationAtCapacity {
                workstation_id: ws_id.clone(),
                capacity: ws.capacity,
            });
        }

        Ok(())
    }

    fn create_timer(
        &mut self,
        key: TimerKey,
        duration: Duration,
        start: DateTime<Local>,
    ) -> CoreEvent {
        let threshold = self.config.timers.alert_threshold(duration);
        let timer = ActiveTimer::new(key.clone(), duration, threshold, start);
        persist_timer(self.store.as_ref(), &timer);
        self.timers.insert(key.clone(), timer);

        debug!(
            timer = %key,
            duration_secs = duration.as_secs(),
            threshold_secs = threshold.as_secs(),
            "Timer created"
        );

        CoreEvent::TimerStarted {
            key,
            estimated_duration: duration,
            start_time: start,
        }
    }

    fn stop_timers(
        &mut self,
        order_id: &OrderId,
        filter: impl Fn(&TimerKey) -> bool,
        reason: TimerStopReason,
    ) -> Vec<CoreEvent> {
        let keys: Vec<TimerKey> = self
            .timers
            .keys()
            .filter(|k| &k.order_id == order_id && filter(k))
            .cloned()
            .collect();

        keys.into_iter()
            .map(|key| {
                self.timers.remove(&key);
                forget_timer(self.store.as_ref(), &key);
                debug!(timer = %key, reason = ?reason, "Timer destroyed");
                CoreEvent::TimerStopped { key, reason }
            })
            .collect()
    }
}

fn order_entry<'a>(
    orders: &'a mut BTreeMap<OrderId, Order>,
    order_id: &OrderId,
) -> CoreResult<&'a mut Order> {
    orders
        .get_mut(order_id)
        .ok_or_else(|| CoreError::OrderNotFound(order_id.clone()))
}

fn find_item<'a>(order: &'a Order, item_id: &ItemId) -> CoreResult<&'a galley_api::LineItem> {
    order.item(item_id).ok_or_else(|| CoreError::ItemNotFound {
        order_id: order.id.clone(),
        item_id: item_id.clone(),
    })
}

/// Best-effort write of a timer's start and pause bookkeeping
fn persist_timer(store: &dyn Store, timer: &ActiveTimer) {
    if let Err(e) = store.save_timer(&timer.snapshot()) {
        warn!(timer = %timer.key, error = %e, "Failed to persist timer");
    }
}

fn forget_timer(store: &dyn Store, key: &TimerKey) {
    if let Err(e) = store.delete_timer(key) {
        warn!(timer = %key, error = %e, "Failed to delete stored timer");
    }
}

/// Best-effort write of an order snapshot
fn persist(store: &dyn Store, order: &Order) {
    match store.save_order(order) {
        Ok(()) => {}
        Err(StoreError::Conflict { stored, .. }) => {
            warn!(
                order_id = %order.id,
                version = order.version,
                stored,
                "Stored order is newer, not overwriting"
            );
        }
        Err(e) => warn!(order_id = %order.id, error = %e, "Failed to persist order"),
    }
}
