//! Order backend trait

use async_trait::async_trait;
use galley_api::{KitchenStatus, Order};
use galley_util::OrderId;
use thiserror::Error;

use crate::PayloadError;

/// Errors from order backend operations
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Backend returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Order not found: {0}")]
    NotFound(OrderId),

    #[error("Invalid payload: {0}")]
    Payload(#[from] PayloadError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BackendError {
    /// Whether retrying the same call later could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Transport(_) => true,
            BackendError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// The external order service, seen as a black box
#[async_trait]
pub trait OrderBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Fetch every open order
    async fn fetch_orders(&self) -> BackendResult<Vec<Order>>;

    /// Fetch one order
    async fn fetch_order(&self, order_id: &OrderId) -> BackendResult<Order>;

    /// Tell the backend an order went onto the line
    async fn start_order(&self, order_id: &OrderId) -> BackendResult<()>;

    /// Tell the backend an order is finished
    async fn complete_order(&self, order_id: &OrderId) -> BackendResult<()>;

    /// Set an order's status directly
    async fn update_status(&self, order_id: &OrderId, status: KitchenStatus) -> BackendResult<()>;

    /// Optional: check if the backend is reachable
    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors() {
        assert!(BackendError::Transport("connection refused".into()).is_transient());
        assert!(
            BackendError::Status {
                status: 503,
                message: "busy".into()
            }
            .is_transient()
        );
        assert!(
            !BackendError::Status {
                status: 409,
                message: "conflict".into()
            }
            .is_transient()
        );
        assert!(!BackendError::NotFound(OrderId::new("9")).is_transient());
    }
}
