//! Mock order backend for testing

use async_trait::async_trait;
use galley_api::{ItemStatus, KitchenStatus, Order};
use galley_util::OrderId;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{BackendError, BackendResult, OrderBackend};

/// A call the mock received, for assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    FetchOrders,
    FetchOrder(OrderId),
    StartOrder(OrderId),
    CompleteOrder(OrderId),
    UpdateStatus(OrderId, KitchenStatus),
}

/// In-memory order backend for unit/integration testing.
///
/// Mutations are applied to the stored orders the way a real order service
/// would apply them, so a re-fetch returns the server's view.
#[derive(Clone, Default)]
pub struct MockBackend {
    orders: Arc<Mutex<BTreeMap<OrderId, Order>>>,
    calls: Arc<Mutex<Vec<BackendCall>>>,

    /// Configure fetches to fail
    pub fail_fetch: Arc<Mutex<bool>>,

    /// Configure start/complete/update to fail
    pub fail_mutations: Arc<Mutex<bool>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let backend = Self::new();
        for order in orders {
            backend.put_order(order);
        }
        backend
    }

    /// Insert or replace an order on the "server"
    pub fn put_order(&self, order: Order) {
        lock(&self.orders).insert(order.id.clone(), order);
    }

    /// Drop an order from the "server"
    pub fn remove_order(&self, order_id: &OrderId) {
        lock(&self.orders).remove(order_id);
    }

    /// The server's copy of an order
    pub fn order(&self, order_id: &OrderId) -> Option<Order> {
        lock(&self.orders).get(order_id).cloned()
    }

    /// Calls received so far
    pub fn calls(&self) -> Vec<BackendCall> {
        lock(&self.calls).clone()
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        *lock(&self.fail_fetch) = fail;
    }

    pub fn set_fail_mutations(&self, fail: bool) {
        *lock(&self.fail_mutations) = fail;
    }

    fn record(&self, call: BackendCall) {
        lock(&self.calls).push(call);
    }

    fn check_fetch(&self) -> BackendResult<()> {
        if *lock(&self.fail_fetch) {
            return Err(BackendError::Transport("Mock fetch failure".into()));
        }
        Ok(())
    }

    fn mutate(&self, order_id: &OrderId, f: impl FnOnce(&mut Order)) -> BackendResult<()> {
        if *lock(&self.fail_mutations) {
            return Err(BackendError::Transport("Mock mutation failure".into()));
        }

        let mut orders = lock(&self.orders);
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| BackendError::NotFound(order_id.clone()))?;
        f(order);
        order.version += 1;
        Ok(())
    }
}

#[async_trait]
impl OrderBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_orders(&self) -> BackendResult<Vec<Order>> {
        self.record(BackendCall::FetchOrders);
        self.check_fetch()?;
        Ok(lock(&self.orders).values().cloned().collect())
    }

    async fn fetch_order(&self, order_id: &OrderId) -> BackendResult<Order> {
        self.record(BackendCall::FetchOrder(order_id.clone()));
        self.check_fetch()?;
        self.order(order_id)
            .ok_or_else(|| BackendError::NotFound(order_id.clone()))
    }

    async fn start_order(&self, order_id: &OrderId) -> BackendResult<()> {
        self.record(BackendCall::StartOrder(order_id.clone()));
        self.mutate(order_id, |order| {
            order.status = KitchenStatus::Active;
            order.actual_start_time.get_or_insert_with(galley_util::now);
        })
    }

    async fn complete_order(&self, order_id: &OrderId) -> BackendResult<()> {
        self.record(BackendCall::CompleteOrder(order_id.clone()));
        self.mutate(order_id, |order| {
            order.status = KitchenStatus::Completed;
            order.actual_end_time.get_or_insert_with(galley_util::now);
            for item in &mut order.items {
                item.status = ItemStatus::Ready;
            }
        })
    }

    async fn update_status(&self, order_id: &OrderId, status: KitchenStatus) -> BackendResult<()> {
        self.record(BackendCall::UpdateStatus(order_id.clone(), status));
        self.mutate(order_id, |order| order.status = status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_start_and_complete() {
        let backend = MockBackend::with_orders([Order::new(1u64, 10)]);
        let id = OrderId::from(1u64);

        backend.start_order(&id).await.unwrap();
        let order = backend.fetch_order(&id).await.unwrap();
        assert_eq!(order.status, KitchenStatus::Active);
        assert!(order.actual_start_time.is_some());
        assert_eq!(order.version, 1);

        backend.complete_order(&id).await.unwrap();
        let order = backend.fetch_order(&id).await.unwrap();
        assert_eq!(order.status, KitchenStatus::Completed);

        assert_eq!(
            backend.calls(),
            vec![
                BackendCall::StartOrder(id.clone()),
                BackendCall::FetchOrder(id.clone()),
                BackendCall::CompleteOrder(id.clone()),
                BackendCall::FetchOrder(id),
            ]
        );
    }

    #[tokio::test]
    async fn mock_failures() {
        let backend = MockBackend::with_orders([Order::new(1u64, 10)]);
        let id = OrderId::from(1u64);

        backend.set_fail_mutations(true);
        assert!(backend.start_order(&id).await.is_err());
        // The server copy is untouched
        assert_eq!(backend.order(&id).unwrap().status, KitchenStatus::Queued);

        backend.set_fail_fetch(true);
        assert!(backend.fetch_orders().await.is_err());
    }

    #[tokio::test]
    async fn mock_unknown_order() {
        let backend = MockBackend::new();
        let result = backend.fetch_order(&OrderId::new("nope")).await;
        assert!(matches!(result, Err(BackendError::NotFound(_))));
    }
}
