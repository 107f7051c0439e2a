//! Translation between engine types and the wire protocol

use galley_api::{ErrorCode, ErrorInfo, Event, EventPayload};
use galley_backend::BackendError;
use galley_core::{CoreError, CoreEvent, KitchenEngine};

/// Protocol error for an engine failure
pub fn core_error_info(err: &CoreError) -> ErrorInfo {
    let code = match err {
        CoreError::OrderNotFound(_) => ErrorCode::OrderNotFound,
        CoreError::ItemNotFound { .. } | CoreError::StepNotFound { .. } => ErrorCode::ItemNotFound,
        CoreError::TimerNotFound(_) => ErrorCode::TimerNotFound,
        CoreError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
        CoreError::VersionConflict { .. } => ErrorCode::VersionConflict,
        CoreError::WorkstationAtCapacity { .. } => ErrorCode::WorkstationAtCapacity,
    };
    ErrorInfo::new(code, err.to_string())
}

/// Protocol error for a backend failure
pub fn backend_error_info(err: &BackendError) -> ErrorInfo {
    match err {
        BackendError::NotFound(_) => ErrorInfo::new(ErrorCode::OrderNotFound, err.to_string()),
        _ => ErrorInfo::new(ErrorCode::BackendError, err.to_string()),
    }
}

/// Events to broadcast for a batch of engine events.
///
/// Order edits without a dedicated event, and any batch that changed the
/// order table, are followed by one full snapshot.
pub fn broadcast_events(engine: &KitchenEngine, events: Vec<CoreEvent>) -> Vec<Event> {
    let snapshot = events.iter().any(CoreEvent::changes_orders);

    let mut out: Vec<Event> = events
        .into_iter()
        .filter_map(event_payload)
        .map(Event::new)
        .collect();

    if snapshot {
        out.push(Event::new(EventPayload::StateChanged(engine.get_state())));
    }

    out
}

fn event_payload(event: CoreEvent) -> Option<EventPayload> {
    let payload = match event {
        CoreEvent::OrderStatusChanged {
            order_id,
            old_status,
            new_status,
            version,
        } => EventPayload::OrderStatusChanged {
            order_id,
            old_status,
            new_status,
            version,
        },
        CoreEvent::OrderUpdated { .. } | CoreEvent::OrderRemoved { .. } => return None,
        CoreEvent::TimerStarted {
            key,
            estimated_duration,
            start_time,
        } => EventPayload::TimerStarted {
            key,
            estimated_duration,
            start_time,
        },
        CoreEvent::TimerStopped { key, reason } => EventPayload::TimerStopped { key, reason },
        CoreEvent::TimerPaused { key, remaining_time } => {
            EventPayload::TimerPaused { key, remaining_time }
        }
        CoreEvent::TimerResumed { key, remaining_time } => {
            EventPayload::TimerResumed { key, remaining_time }
        }
        CoreEvent::TimerWarning {
            key,
            remaining_time,
            alert_threshold,
        } => EventPayload::TimerWarning {
            key,
            remaining_time,
            alert_threshold,
        },
        CoreEvent::TimerOverdue { key } => EventPayload::TimerOverdue { key },
        CoreEvent::OverdueReminder { key, overdue_for } => {
            EventPayload::OverdueReminder { key, overdue_for }
        }
        CoreEvent::TimersUpdated { timers } => EventPayload::TimersUpdated { timers },
        CoreEvent::OrdersSynced { order_count } => EventPayload::OrdersSynced { order_count },
        CoreEvent::ConfigReloaded { workstation_count } => {
            EventPayload::ConfigReloaded { workstation_count }
        }
    };
    Some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use galley_api::{KitchenStatus, TimerKey};
    use galley_config::KitchenConfig;
    use galley_store::SqliteStore;
    use galley_util::OrderId;
    use std::sync::Arc;

    fn engine() -> KitchenEngine {
        KitchenEngine::new(
            KitchenConfig::default(),
            Arc::new(SqliteStore::in_memory().unwrap()),
        )
    }

    #[test]
    fn status_change_adds_snapshot() {
        let events = broadcast_events(
            &engine(),
            vec![CoreEvent::OrderStatusChanged {
                order_id: OrderId::new("1"),
                old_status: KitchenStatus::Queued,
                new_status: KitchenStatus::Active,
                version: 1,
            }],
        );

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].payload, EventPayload::OrderStatusChanged { .. }));
        assert!(matches!(events[1].payload, EventPayload::StateChanged(_)));
    }

    #[test]
    fn order_updates_become_snapshots() {
        let events = broadcast_events(
            &engine(),
            vec![
                CoreEvent::OrderUpdated {
                    order_id: OrderId::new("1"),
                    version: 2,
                },
                CoreEvent::OrderRemoved {
                    order_id: OrderId::new("2"),
                },
            ],
        );

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].payload, EventPayload::StateChanged(_)));
    }

    #[test]
    fn timer_alerts_do_not_add_snapshot() {
        let events = broadcast_events(
            &engine(),
            vec![CoreEvent::TimerOverdue {
                key: TimerKey::order("1"),
            }],
        );

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].payload, EventPayload::TimerOverdue { .. }));
    }

    #[test]
    fn error_codes() {
        let err = CoreError::OrderNotFound(OrderId::new("9"));
        assert_eq!(core_error_info(&err).code, ErrorCode::OrderNotFound);

        let err = CoreError::VersionConflict {
            order_id: OrderId::new("9"),
            expected: 1,
            actual: 2,
        };
        assert_eq!(core_error_info(&err).code, ErrorCode::VersionConflict);

        let err = BackendError::Transport("down".into());
        assert_eq!(backend_error_info(&err).code, ErrorCode::BackendError);
    }
}
