//! Command types for the galleyd protocol

use serde::{Deserialize, Serialize};
use galley_util::{ClientId, ItemId, OrderId};

use crate::{ClientRole, KitchenStatus, Order, TimerKey, WorkstationView, API_VERSION};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.result, ResponseResult::Ok(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    OrderNotFound,
    ItemNotFound,
    TimerNotFound,
    InvalidTransition,
    VersionConflict,
    WorkstationAtCapacity,
    BackendError,
    PermissionDenied,
    RateLimited,
    ConfigError,
    InternalError,
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Get the full kitchen state
    GetState,

    /// List all known orders
    ListOrders,

    /// Get a single order
    GetOrder { order_id: OrderId },

    /// Move a queued order onto the line and start its timer
    StartOrder { order_id: OrderId },

    /// Finish an order and stop its timers
    CompleteOrder { order_id: OrderId },

    /// Put an order back in the queue
    ResetOrder { order_id: OrderId },

    /// Manual status change. `expected_version` enables compare-and-swap.
    UpdateStatus {
        order_id: OrderId,
        status: KitchenStatus,
        #[serde(default)]
        expected_version: Option<u64>,
    },

    PauseTimer { key: TimerKey },

    ResumeTimer { key: TimerKey },

    /// Start an item-level timer
    StartItem {
        order_id: OrderId,
        item_id: ItemId,
        /// Overrides the item's estimate
        #[serde(default)]
        minutes: Option<u32>,
    },

    CompleteItem { order_id: OrderId, item_id: ItemId },

    CompleteStep {
        order_id: OrderId,
        item_id: ItemId,
        step_index: usize,
    },

    ListWorkstations,

    /// Re-fetch all orders from the backend now
    SyncOrders,

    /// Subscribe to events (returns immediately, events stream separately)
    SubscribeEvents,

    /// Unsubscribe from events
    UnsubscribeEvents,

    /// Ask the service to keep its tick loop running for this client
    SubscribeTimers,

    /// Release this client's hold on the tick loop
    UnsubscribeTimers,

    /// Get health status
    GetHealth,

    /// Reload configuration (admin only)
    ReloadConfig,

    /// Ping for keepalive
    Ping,
}

impl Command {
    /// Whether the command changes kitchen state
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Command::StartOrder { .. }
                | Command::CompleteOrder { .. }
                | Command::ResetOrder { .. }
                | Command::UpdateStatus { .. }
                | Command::PauseTimer { .. }
                | Command::ResumeTimer { .. }
                | Command::StartItem { .. }
                | Command::CompleteItem { .. }
                | Command::CompleteStep { .. }
                | Command::SyncOrders
        )
    }
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    State(crate::KitchenStateSnapshot),
    Orders(Vec<Order>),
    Order(Order),
    Workstations(Vec<WorkstationView>),
    /// A mutation was applied; carries the order as it now stands
    Updated(Order),
    TimerUpdated(crate::TimerInfo),
    Synced { order_count: usize },
    ConfigReloaded,
    Subscribed { client_id: ClientId },
    Unsubscribed,
    TimersSubscribed { tick_subscribers: usize },
    TimersUnsubscribed { tick_subscribers: usize },
    Health(crate::HealthStatus),
    Pong,
}

/// Client connection info (set by IPC layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub role: ClientRole,
    /// Unix UID if available
    pub uid: Option<u32>,
}

impl ClientInfo {
    pub fn new(role: ClientRole) -> Self {
        Self {
            client_id: ClientId::new(),
            role,
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }
}
