//! Service-side coordination around the kitchen engine
//!
//! `Kitchen` owns the engine behind a single async mutex and adds what the
//! engine leaves to its host: backend calls after optimistic mutations,
//! periodic sync, per-client tick holds, and command dispatch.

use chrono::{DateTime, Local};
use galley_api::{
    ClientInfo, Command, ErrorCode, ErrorInfo, Event, EventPayload, HealthStatus, KitchenStatus,
    Request, Response, ResponsePayload, TimerKey, API_VERSION,
};
use galley_backend::{BackendError, BackendResult, OrderBackend};
use galley_config::{load_config, KitchenConfig};
use galley_core::{CoreEvent, CoreResult, KitchenEngine};
use galley_store::{AuditEvent, AuditEventType, Store, StoreResult};
use galley_util::{ClientId, Clock, OrderId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{backend_error_info, broadcast_events, core_error_info};

/// Backend call that mirrors a local status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackendCall {
    Start,
    Complete,
    Status(KitchenStatus),
}

impl BackendCall {
    fn for_status(status: KitchenStatus) -> Self {
        match status {
            KitchenStatus::Active => BackendCall::Start,
            KitchenStatus::Completed => BackendCall::Complete,
            other => BackendCall::Status(other),
        }
    }

    fn operation(&self) -> &'static str {
        match self {
            BackendCall::Start => "start_order",
            BackendCall::Complete => "complete_order",
            BackendCall::Status(_) => "update_status",
        }
    }
}

/// Outcome of a command: the reply for the caller and events for everyone
pub struct Handled {
    pub response: Response,
    pub events: Vec<Event>,
}

impl Handled {
    fn reply(response: Response) -> Self {
        Self {
            response,
            events: Vec::new(),
        }
    }
}

pub struct Kitchen {
    engine: Mutex<KitchenEngine>,
    store: Arc<dyn Store>,
    backend: Option<Arc<dyn OrderBackend>>,
    clock: Arc<dyn Clock>,
    config_path: Option<PathBuf>,
    /// Outcome of the most recent backend call
    backend_ok: AtomicBool,
    /// Tick references held per connected client
    timer_holds: Mutex<HashMap<ClientId, usize>>,
}

impl Kitchen {
    pub fn new(
        engine: KitchenEngine,
        store: Arc<dyn Store>,
        backend: Option<Arc<dyn OrderBackend>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine: Mutex::new(engine),
            store,
            backend,
            clock,
            config_path: None,
            backend_ok: AtomicBool::new(true),
            timer_holds: Mutex::new(HashMap::new()),
        }
    }

    /// File that `ReloadConfig` re-reads
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn engine(&self) -> &Mutex<KitchenEngine> {
        &self.engine
    }

    pub fn is_online(&self) -> bool {
        self.backend.is_some()
    }

    /// Load orders saved by a previous run
    pub async fn restore(&self) -> StoreResult<usize> {
        let orders = self.store.load_orders()?;
        let count = orders.len();
        self.engine.lock().await.restore(orders, self.clock.now());
        Ok(count)
    }

    /// Keep the tick loop running with no subscribers
    pub async fn hold_ticks(&self) -> usize {
        self.engine.lock().await.acquire_ticks()
    }

    /// Advance timers if anyone wants ticks
    pub async fn tick(&self) -> Vec<Event> {
        let mut engine = self.engine.lock().await;
        if !engine.is_ticking() {
            return Vec::new();
        }
        let events = engine.tick(self.clock.now());
        broadcast_events(&engine, events)
    }

    /// Replace local orders with the backend's. Offline kitchens have
    /// nothing to sync.
    pub async fn sync(&self) -> BackendResult<Vec<Event>> {
        let Some(backend) = &self.backend else {
            return Ok(Vec::new());
        };

        let orders = match backend.fetch_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                self.backend_failed("fetch_orders", None, &e);
                return Err(e);
            }
        };
        self.backend_ok.store(true, Ordering::Relaxed);

        let mut engine = self.engine.lock().await;
        let events = engine.load_orders(orders, self.clock.now());
        Ok(broadcast_events(&engine, events))
    }

    /// Re-read the config file and apply it
    pub async fn reload_config(&self) -> Result<Vec<Event>, ErrorInfo> {
        let Some(path) = &self.config_path else {
            return Err(ErrorInfo::new(
                ErrorCode::ConfigError,
                "Service was started without a configuration file",
            ));
        };

        let config = load_config(path).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Config reload failed");
            ErrorInfo::new(ErrorCode::ConfigError, e.to_string())
        })?;

        Ok(self.apply_config(config).await)
    }

    pub async fn apply_config(&self, config: KitchenConfig) -> Vec<Event> {
        let mut engine = self.engine.lock().await;
        let event = engine.reload_config(config);
        broadcast_events(&engine, vec![event])
    }

    /// Allow a new client to hold tick references
    pub async fn client_connected(&self, client_id: &ClientId) {
        self.timer_holds.lock().await.insert(client_id.clone(), 0);
    }

    /// Release whatever tick references a departed client held.
    ///
    /// Later `SubscribeTimers` requests from this client take no hold.
    pub async fn client_disconnected(&self, client_id: &ClientId) -> usize {
        // Holds lock stays taken until the release, same order as SubscribeTimers
        let mut holds = self.timer_holds.lock().await;
        let held = holds.remove(client_id).unwrap_or(0);
        if held > 0 {
            let mut engine = self.engine.lock().await;
            for _ in 0..held {
                engine.release_ticks();
            }
            debug!(client_id = %client_id, released = held, "Released tick holds");
        }
        held
    }

    /// Check and dispatch one client request
    pub async fn handle_request(&self, client: &ClientInfo, request: Request) -> Handled {
        let request_id = request.request_id;

        if request.api_version != API_VERSION {
            return Handled::reply(Response::error(
                request_id,
                ErrorInfo::new(
                    ErrorCode::InvalidRequest,
                    format!(
                        "Unsupported API version {} (expected {})",
                        request.api_version, API_VERSION
                    ),
                ),
            ));
        }

        if request.command.is_mutation() && !client.role.can_mutate_orders() {
            return Handled::reply(Response::error(
                request_id,
                ErrorInfo::new(ErrorCode::PermissionDenied, "Role may not change orders"),
            ));
        }

        self.handle_command(client, request_id, request.command).await
    }

    async fn handle_command(&self, client: &ClientInfo, request_id: u64, command: Command) -> Handled {
        let now = self.clock.now();

        match command {
            Command::GetState => {
                let state = self.engine.lock().await.get_state();
                Handled::reply(Response::success(request_id, ResponsePayload::State(state)))
            }

            Command::ListOrders => {
                let orders = self.engine.lock().await.list_orders();
                Handled::reply(Response::success(request_id, ResponsePayload::Orders(orders)))
            }

            Command::GetOrder { order_id } => {
                let order = self.engine.lock().await.get_order(&order_id).cloned();
                Handled::reply(match order {
                    Some(order) => Response::success(request_id, ResponsePayload::Order(order)),
                    None => Response::error(
                        request_id,
                        ErrorInfo::new(ErrorCode::OrderNotFound, format!("Order not found: {}", order_id)),
                    ),
                })
            }

            Command::ListWorkstations => {
                let workstations = self.engine.lock().await.list_workstations();
                Handled::reply(Response::success(
                    request_id,
                    ResponsePayload::Workstations(workstations),
                ))
            }

            Command::StartOrder { order_id } => {
                self.mutate_order(request_id, &order_id, |engine| engine.start_order(&order_id, now))
                    .await
            }

            Command::CompleteOrder { order_id } => {
                self.mutate_order(request_id, &order_id, |engine| {
                    engine.complete_order(&order_id, now)
                })
                .await
            }

            Command::ResetOrder { order_id } => {
                self.mutate_order(request_id, &order_id, |engine| engine.reset_order(&order_id, now))
                    .await
            }

            Command::UpdateStatus {
                order_id,
                status,
                expected_version,
            } => {
                self.mutate_order(request_id, &order_id, |engine| {
                    engine.update_status(&order_id, status, expected_version, now)
                })
                .await
            }

            Command::StartItem {
                order_id,
                item_id,
                minutes,
            } => {
                self.mutate_order(request_id, &order_id, |engine| {
                    engine.start_item(&order_id, &item_id, minutes, now)
                })
                .await
            }

            Command::CompleteItem { order_id, item_id } => {
                self.mutate_order(request_id, &order_id, |engine| {
                    engine.complete_item(&order_id, &item_id, now)
                })
                .await
            }

            Command::CompleteStep {
                order_id,
                item_id,
                step_index,
            } => {
                self.mutate_order(request_id, &order_id, |engine| {
                    engine.complete_step(&order_id, &item_id, step_index)
                })
                .await
            }

            Command::PauseTimer { key } => self.timer_command(request_id, key, true, now).await,

            Command::ResumeTimer { key } => self.timer_command(request_id, key, false, now).await,

            Command::SyncOrders => {
                if !self.is_online() {
                    return Handled::reply(Response::error(
                        request_id,
                        ErrorInfo::new(ErrorCode::BackendError, "No order backend configured"),
                    ));
                }

                match self.sync().await {
                    Ok(events) => {
                        let order_count = self.engine.lock().await.order_count();
                        Handled {
                            response: Response::success(
                                request_id,
                                ResponsePayload::Synced { order_count },
                            ),
                            events,
                        }
                    }
                    Err(e) => Handled::reply(Response::error(request_id, backend_error_info(&e))),
                }
            }

            Command::SubscribeEvents => {
                let state = self.engine.lock().await.get_state();
                Handled {
                    response: Response::success(
                        request_id,
                        ResponsePayload::Subscribed {
                            client_id: client.client_id.clone(),
                        },
                    ),
                    events: vec![Event::new(EventPayload::StateChanged(state))],
                }
            }

            Command::UnsubscribeEvents => {
                Handled::reply(Response::success(request_id, ResponsePayload::Unsubscribed))
            }

            Command::SubscribeTimers => {
                let mut holds = self.timer_holds.lock().await;
                let Some(count) = holds.get_mut(&client.client_id) else {
                    debug!(client_id = %client.client_id, "Timer subscription from departed client");
                    return Handled::reply(Response::error(
                        request_id,
                        ErrorInfo::new(ErrorCode::InvalidRequest, "Client is not connected"),
                    ));
                };
                *count += 1;
                let tick_subscribers = self.engine.lock().await.acquire_ticks();
                Handled::reply(Response::success(
                    request_id,
                    ResponsePayload::TimersSubscribed { tick_subscribers },
                ))
            }

            Command::UnsubscribeTimers => {
                let mut holds = self.timer_holds.lock().await;
                let held = match holds.get_mut(&client.client_id) {
                    Some(count) if *count > 0 => {
                        *count -= 1;
                        true
                    }
                    _ => false,
                };

                let mut engine = self.engine.lock().await;
                let tick_subscribers = if held {
                    engine.release_ticks()
                } else {
                    engine.tick_subscribers()
                };
                Handled::reply(Response::success(
                    request_id,
                    ResponsePayload::TimersUnsubscribed { tick_subscribers },
                ))
            }

            Command::GetHealth => {
                let engine = self.engine.lock().await;
                // An offline kitchen has no backend to be healthy
                let backend_ok = match &self.backend {
                    Some(backend) => self.backend_ok.load(Ordering::Relaxed) && backend.is_healthy(),
                    None => false,
                };
                let store_ok = self.store.is_healthy();
                let health = HealthStatus {
                    live: true,
                    ready: store_ok,
                    store_ok,
                    backend_ok,
                    order_count: engine.order_count(),
                    timer_count: engine.timer_count(),
                };
                Handled::reply(Response::success(request_id, ResponsePayload::Health(health)))
            }

            Command::ReloadConfig => {
                if !client.role.can_reload_config() {
                    return Handled::reply(Response::error(
                        request_id,
                        ErrorInfo::new(ErrorCode::PermissionDenied, "Admin role required"),
                    ));
                }

                match self.reload_config().await {
                    Ok(events) => Handled {
                        response: Response::success(request_id, ResponsePayload::ConfigReloaded),
                        events,
                    },
                    Err(info) => Handled::reply(Response::error(request_id, info)),
                }
            }

            Command::Ping => Handled::reply(Response::success(request_id, ResponsePayload::Pong)),
        }
    }

    async fn timer_command(
        &self,
        request_id: u64,
        key: TimerKey,
        pause: bool,
        now: DateTime<Local>,
    ) -> Handled {
        let mut engine = self.engine.lock().await;
        let result = if pause {
            engine.pause_timer(&key, now)
        } else {
            engine.resume_timer(&key, now)
        };

        let events = match result {
            Ok(events) => events,
            Err(e) => return Handled::reply(Response::error(request_id, core_error_info(&e))),
        };

        let response = match engine.timer(&key) {
            Some(timer) => Response::success(request_id, ResponsePayload::TimerUpdated(timer.info())),
            None => Response::error(
                request_id,
                ErrorInfo::new(ErrorCode::TimerNotFound, format!("Timer not found: {}", key)),
            ),
        };

        Handled {
            response,
            events: broadcast_events(&engine, events),
        }
    }

    /// Apply a mutation locally, then mirror any status change to the
    /// backend. If the backend refuses, the server's view of the order
    /// replaces ours.
    async fn mutate_order<F>(&self, request_id: u64, order_id: &OrderId, apply: F) -> Handled
    where
        F: FnOnce(&mut KitchenEngine) -> CoreResult<Vec<CoreEvent>>,
    {
        let (call, mut events) = {
            let mut engine = self.engine.lock().await;
            match apply(&mut *engine) {
                Ok(events) => (status_call(order_id, &events), broadcast_events(&engine, events)),
                Err(e) => {
                    debug!(order_id = %order_id, error = %e, "Mutation rejected");
                    return Handled::reply(Response::error(request_id, core_error_info(&e)));
                }
            }
        };

        if let Some(call) = call
            && let Err(e) = self.mirror(order_id, call).await
        {
            match self.refetch(order_id).await {
                Some(reconciled) => {
                    events.extend(reconciled);
                    return Handled {
                        response: Response::error(request_id, backend_error_info(&e)),
                        events,
                    };
                }
                None => {
                    warn!(
                        order_id = %order_id,
                        "Keeping local state until the next sync"
                    );
                }
            }
        }

        let order = self.engine.lock().await.get_order(order_id).cloned();
        let response = match order {
            Some(order) => Response::success(request_id, ResponsePayload::Updated(order)),
            None => Response::error(
                request_id,
                ErrorInfo::new(ErrorCode::OrderNotFound, format!("Order not found: {}", order_id)),
            ),
        };

        Handled { response, events }
    }

    async fn mirror(&self, order_id: &OrderId, call: BackendCall) -> BackendResult<()> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };

        let result = match call {
            BackendCall::Start => backend.start_order(order_id).await,
            BackendCall::Complete => backend.complete_order(order_id).await,
            BackendCall::Status(status) => backend.update_status(order_id, status).await,
        };

        match &result {
            Ok(()) => {
                self.backend_ok.store(true, Ordering::Relaxed);
                debug!(order_id = %order_id, operation = call.operation(), "Backend updated");
            }
            Err(e) => self.backend_failed(call.operation(), Some(order_id), e),
        }

        result
    }

    /// Reconcile one order against the backend. `None` when the backend
    /// could not be reached either.
    async fn refetch(&self, order_id: &OrderId) -> Option<Vec<Event>> {
        let backend = self.backend.as_ref()?;

        match backend.fetch_order(order_id).await {
            Ok(order) => {
                let mut engine = self.engine.lock().await;
                let events = engine.reconcile_order(order, self.clock.now());
                info!(order_id = %order_id, "Order reconciled after backend failure");
                Some(broadcast_events(&engine, events))
            }
            Err(BackendError::NotFound(_)) => {
                let mut engine = self.engine.lock().await;
                let events = engine.remove_order(order_id);
                Some(broadcast_events(&engine, events))
            }
            Err(e) => {
                self.backend_failed("fetch_order", Some(order_id), &e);
                None
            }
        }
    }

    fn backend_failed(&self, operation: &str, order_id: Option<&OrderId>, err: &BackendError) {
        self.backend_ok.store(false, Ordering::Relaxed);
        warn!(
            operation,
            order_id = ?order_id,
            transient = err.is_transient(),
            error = %err,
            "Backend call failed"
        );
        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::BackendFailure {
            operation: operation.to_string(),
            order_id: order_id.cloned(),
            message: err.to_string(),
        }));
    }
}

/// The backend call for the last status change a mutation made to `order_id`
fn status_call(order_id: &OrderId, events: &[CoreEvent]) -> Option<BackendCall> {
    events.iter().rev().find_map(|event| match event {
        CoreEvent::OrderStatusChanged {
            order_id: changed,
            new_status,
            ..
        } if changed == order_id => Some(BackendCall::for_status(*new_status)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changed(id: &str, new_status: KitchenStatus) -> CoreEvent {
        CoreEvent::OrderStatusChanged {
            order_id: OrderId::new(id),
            old_status: KitchenStatus::Queued,
            new_status,
            version: 1,
        }
    }

    #[test]
    fn status_call_follows_last_change() {
        let id = OrderId::new("1");

        assert_eq!(status_call(&id, &[]), None);
        assert_eq!(
            status_call(&id, &[changed("1", KitchenStatus::Active)]),
            Some(BackendCall::Start)
        );
        assert_eq!(
            status_call(
                &id,
                &[
                    changed("1", KitchenStatus::Active),
                    changed("1", KitchenStatus::Overdue)
                ]
            ),
            Some(BackendCall::Status(KitchenStatus::Overdue))
        );
        assert_eq!(
            status_call(&id, &[changed("2", KitchenStatus::Completed)]),
            None
        );
    }
}
