//! Integration tests for galleyd
//!
//! These drive the service through `Kitchen::handle_request`, the same path
//! IPC requests take, with a mock order backend and a manual clock.

use galley_api::{
    ClientInfo, ClientRole, Command, ErrorCode, EventPayload, KitchenStatus, LineItem, Order,
    Request, ResponsePayload, ResponseResult, TimerKey,
};
use galley_backend::{BackendCall, MockBackend, OrderBackend};
use galley_config::KitchenConfig;
use galley_core::KitchenEngine;
use galley_store::{AuditEventType, SqliteStore, Store};
use galley_util::{ItemId, ManualClock, OrderId};
use galleyd::{Handled, Kitchen};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    kitchen: Kitchen,
    backend: MockBackend,
    clock: ManualClock,
    store: Arc<SqliteStore>,
}

async fn online(orders: Vec<Order>) -> Harness {
    let backend = MockBackend::with_orders(orders);
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let clock = ManualClock::new(galley_util::now());

    let engine = KitchenEngine::new(KitchenConfig::default(), store.clone());
    let kitchen = Kitchen::new(
        engine,
        store.clone(),
        Some(Arc::new(backend.clone()) as Arc<dyn OrderBackend>),
        Arc::new(clock.clone()),
    );
    kitchen.sync().await.unwrap();
    kitchen.hold_ticks().await;

    Harness {
        kitchen,
        backend,
        clock,
        store,
    }
}

async fn offline(orders: Vec<Order>) -> Harness {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let clock = ManualClock::new(galley_util::now());

    let mut engine = KitchenEngine::new(KitchenConfig::default(), store.clone());
    engine.restore(orders, galley_util::now());
    let kitchen = Kitchen::new(engine, store.clone(), None, Arc::new(clock.clone()));
    kitchen.hold_ticks().await;

    Harness {
        kitchen,
        backend: MockBackend::new(),
        clock,
        store,
    }
}

fn station() -> ClientInfo {
    ClientInfo::new(ClientRole::Station)
}

fn id(n: u64) -> OrderId {
    OrderId::from(n)
}

async fn send(h: &Harness, client: &ClientInfo, command: Command) -> Handled {
    h.kitchen.handle_request(client, Request::new(1, command)).await
}

fn payload(handled: &Handled) -> &ResponsePayload {
    match &handled.response.result {
        ResponseResult::Ok(payload) => payload,
        ResponseResult::Err(e) => panic!("request failed: {:?} {}", e.code, e.message),
    }
}

fn error_code(handled: &Handled) -> ErrorCode {
    match &handled.response.result {
        ResponseResult::Err(e) => e.code,
        ResponseResult::Ok(payload) => panic!("expected an error, got {:?}", payload),
    }
}

async fn status_of(h: &Harness, order_id: &OrderId) -> KitchenStatus {
    h.kitchen
        .engine()
        .lock()
        .await
        .get_order(order_id)
        .unwrap()
        .status
}

async fn has_timer(h: &Harness, key: &TimerKey) -> bool {
    h.kitchen.engine().lock().await.timer(key).is_some()
}

#[tokio::test]
async fn test_one_minute_order_lifecycle() {
    let h = offline(vec![Order::new(1u64, 1)]).await;
    let client = station();
    let key = TimerKey::order(id(1));

    let handled = send(&h, &client, Command::StartOrder { order_id: id(1) }).await;
    match payload(&handled) {
        ResponsePayload::Updated(order) => assert_eq!(order.status, KitchenStatus::Active),
        other => panic!("unexpected payload {:?}", other),
    }
    assert!(handled
        .events
        .iter()
        .any(|e| matches!(e.payload, EventPayload::TimerStarted { .. })));

    for _ in 0..59 {
        h.clock.advance(Duration::from_secs(1));
        h.kitchen.tick().await;
    }
    assert_eq!(status_of(&h, &id(1)).await, KitchenStatus::Active);
    {
        let engine = h.kitchen.engine().lock().await;
        assert_eq!(engine.timer(&key).unwrap().remaining_time, Duration::from_secs(1));
    }

    h.clock.advance(Duration::from_secs(1));
    let events = h.kitchen.tick().await;
    assert!(events
        .iter()
        .any(|e| matches!(e.payload, EventPayload::TimerOverdue { .. })));
    assert!(events.iter().any(|e| matches!(
        e.payload,
        EventPayload::OrderStatusChanged {
            new_status: KitchenStatus::Overdue,
            ..
        }
    )));
    assert_eq!(status_of(&h, &id(1)).await, KitchenStatus::Overdue);

    let handled = send(&h, &client, Command::CompleteOrder { order_id: id(1) }).await;
    payload(&handled);
    assert_eq!(status_of(&h, &id(1)).await, KitchenStatus::Completed);
    assert!(!has_timer(&h, &key).await);
}

#[tokio::test]
async fn test_start_is_mirrored_to_backend() {
    let h = online(vec![Order::new(1u64, 10)]).await;

    let handled = send(&h, &station(), Command::StartOrder { order_id: id(1) }).await;
    payload(&handled);

    assert!(h.backend.calls().contains(&BackendCall::StartOrder(id(1))));
    assert_eq!(h.backend.order(&id(1)).unwrap().status, KitchenStatus::Active);
    assert_eq!(status_of(&h, &id(1)).await, KitchenStatus::Active);
}

#[tokio::test]
async fn test_reset_is_mirrored_as_status_update() {
    let h = online(vec![Order::new(1u64, 10)]).await;
    let client = station();

    send(&h, &client, Command::StartOrder { order_id: id(1) }).await;
    send(&h, &client, Command::ResetOrder { order_id: id(1) }).await;

    assert!(h
        .backend
        .calls()
        .contains(&BackendCall::UpdateStatus(id(1), KitchenStatus::Queued)));
}

#[tokio::test]
async fn test_rejected_mutation_reverts_to_server_view() {
    let h = online(vec![Order::new(1u64, 10)]).await;
    h.backend.set_fail_mutations(true);

    let handled = send(&h, &station(), Command::StartOrder { order_id: id(1) }).await;

    assert_eq!(error_code(&handled), ErrorCode::BackendError);
    assert_eq!(status_of(&h, &id(1)).await, KitchenStatus::Queued);
    assert!(!has_timer(&h, &TimerKey::order(id(1))).await);
    assert!(h.backend.calls().contains(&BackendCall::FetchOrder(id(1))));

    let audits = h.store.get_recent_audits(20).unwrap();
    assert!(audits
        .iter()
        .any(|a| matches!(a.event, AuditEventType::BackendFailure { .. })));
}

#[tokio::test]
async fn test_unreachable_backend_keeps_local_state() {
    let h = online(vec![Order::new(1u64, 10)]).await;
    h.backend.set_fail_mutations(true);
    h.backend.set_fail_fetch(true);

    let handled = send(&h, &station(), Command::StartOrder { order_id: id(1) }).await;

    payload(&handled);
    assert_eq!(status_of(&h, &id(1)).await, KitchenStatus::Active);
    assert!(has_timer(&h, &TimerKey::order(id(1))).await);

    // The next successful sync repairs it
    h.backend.set_fail_fetch(false);
    h.kitchen.sync().await.unwrap();
    assert_eq!(status_of(&h, &id(1)).await, KitchenStatus::Queued);
    assert!(!has_timer(&h, &TimerKey::order(id(1))).await);
}

#[tokio::test]
async fn test_sync_drops_orders_the_backend_forgot() {
    let h = online(vec![Order::new(1u64, 10), Order::new(2u64, 10)]).await;
    send(&h, &station(), Command::StartOrder { order_id: id(2) }).await;

    h.backend.remove_order(&id(2));
    let events = h.kitchen.sync().await.unwrap();

    let engine = h.kitchen.engine().lock().await;
    assert!(engine.get_order(&id(2)).is_none());
    assert_eq!(engine.timer_count(), 0);
    assert!(events
        .iter()
        .any(|e| matches!(e.payload, EventPayload::OrdersSynced { order_count: 1 })));
    assert!(events
        .iter()
        .any(|e| matches!(e.payload, EventPayload::StateChanged(_))));
}

#[tokio::test]
async fn test_sync_orders_command() {
    let h = online(vec![Order::new(1u64, 10)]).await;
    h.backend.put_order(Order::new(5u64, 20));

    let handled = send(&h, &station(), Command::SyncOrders).await;
    match payload(&handled) {
        ResponsePayload::Synced { order_count } => assert_eq!(*order_count, 2),
        other => panic!("unexpected payload {:?}", other),
    }

    let offline = offline(vec![]).await;
    let handled = send(&offline, &station(), Command::SyncOrders).await;
    assert_eq!(error_code(&handled), ErrorCode::BackendError);
}

#[tokio::test]
async fn test_observer_cannot_mutate() {
    let h = offline(vec![Order::new(1u64, 10)]).await;
    let observer = ClientInfo::new(ClientRole::Observer);

    let handled = send(&h, &observer, Command::StartOrder { order_id: id(1) }).await;
    assert_eq!(error_code(&handled), ErrorCode::PermissionDenied);
    assert_eq!(status_of(&h, &id(1)).await, KitchenStatus::Queued);

    // Reads are fine
    let handled = send(&h, &observer, Command::ListOrders).await;
    assert!(matches!(payload(&handled), ResponsePayload::Orders(orders) if orders.len() == 1));

    // Stations may not reload config
    let handled = send(&h, &station(), Command::ReloadConfig).await;
    assert_eq!(error_code(&handled), ErrorCode::PermissionDenied);
}

#[tokio::test]
async fn test_version_conflict_over_ipc() {
    let h = offline(vec![Order::new(1u64, 10)]).await;
    let client = station();

    send(&h, &client, Command::StartOrder { order_id: id(1) }).await;

    let handled = send(
        &h,
        &client,
        Command::UpdateStatus {
            order_id: id(1),
            status: KitchenStatus::Completed,
            expected_version: Some(0),
        },
    )
    .await;
    assert_eq!(error_code(&handled), ErrorCode::VersionConflict);

    let handled = send(
        &h,
        &client,
        Command::UpdateStatus {
            order_id: id(1),
            status: KitchenStatus::Completed,
            expected_version: Some(1),
        },
    )
    .await;
    match payload(&handled) {
        ResponsePayload::Updated(order) => {
            assert_eq!(order.status, KitchenStatus::Completed);
            assert_eq!(order.version, 2);
        }
        other => panic!("unexpected payload {:?}", other),
    }
}

#[tokio::test]
async fn test_item_workflow() {
    let order = Order::new(1u64, 15)
        .with_item(LineItem::new("fries", "Fries").with_estimate(4).with_step("Drop basket"))
        .with_item(LineItem::new("burger", "Burger"));
    let h = offline(vec![order]).await;
    let client = station();
    let fries = ItemId::new("fries");

    send(
        &h,
        &client,
        Command::StartItem {
            order_id: id(1),
            item_id: fries.clone(),
            minutes: None,
        },
    )
    .await;
    assert_eq!(status_of(&h, &id(1)).await, KitchenStatus::Active);
    assert!(has_timer(&h, &TimerKey::item(id(1), "fries")).await);

    let handled = send(
        &h,
        &client,
        Command::CompleteStep {
            order_id: id(1),
            item_id: fries.clone(),
            step_index: 0,
        },
    )
    .await;
    match payload(&handled) {
        ResponsePayload::Updated(order) => {
            assert!(order.item(&fries).unwrap().preparation_steps[0].completed)
        }
        other => panic!("unexpected payload {:?}", other),
    }

    send(
        &h,
        &client,
        Command::CompleteItem {
            order_id: id(1),
            item_id: fries,
        },
    )
    .await;
    assert!(!has_timer(&h, &TimerKey::item(id(1), "fries")).await);
    assert!(has_timer(&h, &TimerKey::order(id(1))).await);

    let handled = send(
        &h,
        &client,
        Command::CompleteItem {
            order_id: id(1),
            item_id: ItemId::new("salad"),
        },
    )
    .await;
    assert_eq!(error_code(&handled), ErrorCode::ItemNotFound);
}

#[tokio::test]
async fn test_pause_and_resume_over_ipc() {
    let h = offline(vec![Order::new(1u64, 10)]).await;
    let client = station();
    let key = TimerKey::order(id(1));

    send(&h, &client, Command::StartOrder { order_id: id(1) }).await;
    h.clock.advance(Duration::from_secs(60));
    h.kitchen.tick().await;

    let handled = send(&h, &client, Command::PauseTimer { key: key.clone() }).await;
    match payload(&handled) {
        ResponsePayload::TimerUpdated(info) => {
            assert!(info.is_paused);
            assert_eq!(info.remaining_time, Duration::from_secs(540));
        }
        other => panic!("unexpected payload {:?}", other),
    }

    h.clock.advance(Duration::from_secs(120));
    h.kitchen.tick().await;

    send(&h, &client, Command::ResumeTimer { key: key.clone() }).await;
    h.clock.advance(Duration::from_secs(10));
    h.kitchen.tick().await;

    let engine = h.kitchen.engine().lock().await;
    assert_eq!(engine.timer(&key).unwrap().remaining_time, Duration::from_secs(530));
}

#[tokio::test]
async fn test_timer_holds_released_on_disconnect() {
    let h = offline(vec![]).await;
    let client = station();
    h.kitchen.client_connected(&client.client_id).await;

    let handled = send(&h, &client, Command::SubscribeTimers).await;
    assert!(matches!(
        payload(&handled),
        ResponsePayload::TimersSubscribed { tick_subscribers: 2 }
    ));
    send(&h, &client, Command::SubscribeTimers).await;

    let released = h.kitchen.client_disconnected(&client.client_id).await;
    assert_eq!(released, 2);
    assert_eq!(h.kitchen.engine().lock().await.tick_subscribers(), 1);

    // Unsubscribing without a hold leaves the count alone
    let handled = send(&h, &station(), Command::UnsubscribeTimers).await;
    assert!(matches!(
        payload(&handled),
        ResponsePayload::TimersUnsubscribed { tick_subscribers: 1 }
    ));
}

#[tokio::test]
async fn test_subscription_after_disconnect_takes_no_hold() {
    let h = offline(vec![]).await;
    let client = station();
    h.kitchen.client_connected(&client.client_id).await;

    // The disconnect is handled before the client's queued request runs
    assert_eq!(h.kitchen.client_disconnected(&client.client_id).await, 0);
    let handled = send(&h, &client, Command::SubscribeTimers).await;

    assert_eq!(error_code(&handled), ErrorCode::InvalidRequest);
    assert_eq!(h.kitchen.engine().lock().await.tick_subscribers(), 1);
}

#[tokio::test]
async fn test_offline_health_reports_no_backend() {
    let h = offline(vec![Order::new(1u64, 10)]).await;

    let handled = send(&h, &station(), Command::GetHealth).await;
    match payload(&handled) {
        ResponsePayload::Health(health) => {
            assert!(health.live);
            assert!(health.ready);
            assert!(health.store_ok);
            assert!(!health.backend_ok);
            assert_eq!(health.order_count, 1);
        }
        other => panic!("unexpected payload {:?}", other),
    }
}

#[tokio::test]
async fn test_health_reports_backend() {
    let h = online(vec![Order::new(1u64, 10)]).await;
    h.backend.set_fail_fetch(true);
    assert!(h.kitchen.sync().await.is_err());

    let handled = send(&h, &station(), Command::GetHealth).await;
    match payload(&handled) {
        ResponsePayload::Health(health) => {
            assert!(health.live);
            assert!(health.store_ok);
            assert!(!health.backend_ok);
            assert_eq!(health.order_count, 1);
        }
        other => panic!("unexpected payload {:?}", other),
    }
}

#[tokio::test]
async fn test_wrong_api_version_rejected() {
    let h = offline(vec![]).await;
    let mut request = Request::new(1, Command::Ping);
    request.api_version = 99;

    let handled = h.kitchen.handle_request(&station(), request).await;
    assert_eq!(error_code(&handled), ErrorCode::InvalidRequest);
}

#[tokio::test]
async fn test_restart_recovers_running_timers() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("galley.db");
    let start = galley_util::now();
    let clock = ManualClock::new(start);

    {
        let store = Arc::new(SqliteStore::open(&db_path).unwrap());
        let mut engine = KitchenEngine::new(KitchenConfig::default(), store.clone());
        engine.restore(vec![Order::new(1u64, 10)], start);
        engine.start_order(&id(1), start).unwrap();
    }

    clock.advance(Duration::from_secs(240));

    let store = Arc::new(SqliteStore::open(&db_path).unwrap());
    let engine = KitchenEngine::new(KitchenConfig::default(), store.clone());
    let kitchen = Kitchen::new(engine, store, None, Arc::new(clock.clone()));

    assert_eq!(kitchen.restore().await.unwrap(), 1);
    kitchen.hold_ticks().await;
    kitchen.tick().await;

    let engine = kitchen.engine().lock().await;
    let timer = engine.timer(&TimerKey::order(id(1))).unwrap();
    assert_eq!(timer.remaining_time, Duration::from_secs(360));
    assert_eq!(engine.get_order(&id(1)).unwrap().status, KitchenStatus::Active);
}

#[tokio::test]
async fn test_tick_idle_without_holds() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let mut engine = KitchenEngine::new(KitchenConfig::default(), store.clone());
    let now = galley_util::now();
    engine.restore(vec![Order::new(1u64, 0)], now);
    engine.start_order(&id(1), now).unwrap();

    let kitchen = Kitchen::new(engine, store, None, Arc::new(ManualClock::new(now)));

    assert!(kitchen.tick().await.is_empty());
    assert_eq!(status_of_kitchen(&kitchen, &id(1)).await, KitchenStatus::Active);

    kitchen.hold_ticks().await;
    assert!(!kitchen.tick().await.is_empty());
    assert_eq!(status_of_kitchen(&kitchen, &id(1)).await, KitchenStatus::Overdue);
}

async fn status_of_kitchen(kitchen: &Kitchen, order_id: &OrderId) -> KitchenStatus {
    kitchen.engine().lock().await.get_order(order_id).unwrap().status
}
