//! Engine errors

use galley_api::{KitchenStatus, TimerKey};
use galley_util::{ItemId, OrderId, WorkstationId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Item {item_id} not found in order {order_id}")]
    ItemNotFound { order_id: OrderId, item_id: ItemId },

    #[error("Item {item_id} of order {order_id} has no step {step_index}")]
    StepNotFound {
        order_id: OrderId,
        item_id: ItemId,
        step_index: usize,
    },

    #[error("No timer for {0}")]
    TimerNotFound(TimerKey),

    #[error("Cannot {action} order {order_id} while it is {from}")]
    InvalidTransition {
        order_id: OrderId,
        from: KitchenStatus,
        action: &'static str,
    },

    #[error("Order {order_id} is at version {actual}, not {expected}")]
    VersionConflict {
        order_id: OrderId,
        expected: u64,
        actual: u64,
    },

    #[error("Workstation {workstation_id} is at capacity ({capacity})")]
    WorkstationAtCapacity {
        workstation_id: WorkstationId,
        capacity: u32,
    },
}

pub type CoreResult<T> = Result<T, CoreError>;
