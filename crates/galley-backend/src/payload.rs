//! Wire payloads from the order backend
//!
//! The backend speaks JSON with either `snake_case` or `camelCase` field
//! names and is not strict about which fields it sends. Every field except
//! the order ID is optional on the wire; [`MissingFieldPolicy`] decides
//! whether a gap is filled with a placeholder or rejected.

use chrono::{DateTime, Local};
use galley_api::{ItemStatus, KitchenStatus, LineItem, Order, PreparationStep, Priority};
use galley_config::MissingFieldPolicy;
use galley_util::{ItemId, OrderId, WorkstationId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Placeholder customer name for orders that arrive without one
pub const DEFAULT_CUSTOMER_NAME: &str = "Guest";

/// Payload decoding errors
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Order is missing an id")]
    MissingId,

    #[error("Order {order_id}: missing field '{field}'")]
    MissingField { order_id: String, field: &'static str },

    #[error("Order {order_id}: invalid {field} '{value}'")]
    InvalidValue {
        order_id: String,
        field: &'static str,
        value: String,
    },
}

/// IDs arrive as either JSON numbers or strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Number(u64),
    Text(String),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Number(n) => n.to_string(),
            RawId::Text(s) => s.trim().to_string(),
        }
    }
}

/// A preparation step: either a bare description or a full object
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawStep {
    Text(String),
    Full {
        description: String,
        #[serde(default)]
        completed: bool,
    },
}

/// Line item as sent by the backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawLineItem {
    #[serde(default)]
    pub id: Option<RawId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "estimatedTime")]
    pub estimated_time: Option<i64>,
    #[serde(default, alias = "preparationSteps")]
    pub preparation_steps: Option<Vec<RawStep>>,
}

/// Order as sent by the backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawOrder {
    #[serde(default)]
    pub id: Option<RawId>,
    #[serde(default, alias = "customerName")]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default, alias = "estimatedTime")]
    pub estimated_time: Option<i64>,
    #[serde(default, alias = "actualStartTime")]
    pub actual_start_time: Option<DateTime<Local>>,
    #[serde(default, alias = "actualEndTime")]
    pub actual_end_time: Option<DateTime<Local>>,
    #[serde(default)]
    pub items: Option<Vec<RawLineItem>>,
    #[serde(default)]
    pub workstation: Option<String>,
    #[serde(default)]
    pub version: Option<u64>,
}

/// The list endpoint may return a bare array or wrap it
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOrderList {
    Bare(Vec<RawOrder>),
    Wrapped { orders: Vec<RawOrder> },
}

impl RawOrder {
    /// Convert to the kitchen model under the given policy
    pub fn into_order(self, policy: MissingFieldPolicy) -> Result<Order, PayloadError> {
        let id = self
            .id
            .map(RawId::into_string)
            .filter(|s| !s.is_empty())
            .ok_or(PayloadError::MissingId)?;

        let fill = Filler {
            order_id: &id,
            policy,
        };

        let customer_name = match self.customer_name.filter(|s| !s.trim().is_empty()) {
            Some(name) => name,
            None => fill.missing("customer_name", || DEFAULT_CUSTOMER_NAME.to_string())?,
        };

        // Status strings that cannot be interpreted are never guessed at
        let status = match self.status {
            Some(raw) => KitchenStatus::parse_lenient(&raw).ok_or_else(|| {
                PayloadError::InvalidValue {
                    order_id: id.clone(),
                    field: "status",
                    value: raw.clone(),
                }
            })?,
            None => fill.missing("status", || KitchenStatus::Queued)?,
        };

        let priority = match self.priority {
            Some(raw) => match Priority::parse(&raw) {
                Some(p) => p,
                None => fill.invalid("priority", &raw, Priority::default)?,
            },
            None => fill.missing("priority", Priority::default)?,
        };

        let estimated_time = match self.estimated_time {
            Some(minutes) => clamp_minutes(minutes),
            None => fill.missing("estimated_time", || 0)?,
        };

        let raw_items = match self.items {
            Some(items) => items,
            None => fill.missing("items", Vec::new)?,
        };
        let items = raw_items
            .into_iter()
            .enumerate()
            .map(|(index, item)| item.into_line_item(index, &fill))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Order {
            id: OrderId::new(id.clone()),
            customer_name,
            status,
            priority,
            estimated_time,
            actual_start_time: self.actual_start_time,
            actual_end_time: self.actual_end_time,
            items,
            workstation: self
                .workstation
                .filter(|w| !w.trim().is_empty())
                .map(WorkstationId::new),
            version: self.version.unwrap_or(0),
        })
    }
}

impl RawLineItem {
    fn into_line_item(self, index: usize, fill: &Filler<'_>) -> Result<LineItem, PayloadError> {
        let id = match self.id.map(RawId::into_string).filter(|s| !s.is_empty()) {
            Some(id) => id,
            None => fill.missing("items.id", || format!("item-{}", index + 1))?,
        };

        let name = match self.name.filter(|s| !s.trim().is_empty()) {
            Some(name) => name,
            None => fill.missing("items.name", || id.clone())?,
        };

        let status = match self.status {
            Some(raw) => match ItemStatus::parse(&raw) {
                Some(s) => s,
                None => fill.invalid("items.status", &raw, ItemStatus::default)?,
            },
            None => ItemStatus::default(),
        };

        let preparation_steps = self
            .preparation_steps
            .unwrap_or_default()
            .into_iter()
            .map(|step| match step {
                RawStep::Text(description) => PreparationStep {
                    description,
                    completed: false,
                },
                RawStep::Full {
                    description,
                    completed,
                } => PreparationStep {
                    description,
                    completed,
                },
            })
            .collect();

        Ok(LineItem {
            id: ItemId::new(id),
            name,
            quantity: self.quantity.unwrap_or(1).max(1),
            status,
            estimated_time: self.estimated_time.map(clamp_minutes),
            preparation_steps,
        })
    }
}

/// Applies the missing-field policy for one order
struct Filler<'a> {
    order_id: &'a str,
    policy: MissingFieldPolicy,
}

impl Filler<'_> {
    fn missing<T>(&self, field: &'static str, default: impl FnOnce() -> T) -> Result<T, PayloadError> {
        match self.policy {
            MissingFieldPolicy::FillDefaults => Ok(default()),
            MissingFieldPolicy::Reject => Err(PayloadError::MissingField {
                order_id: self.order_id.to_string(),
                field,
            }),
        }
    }

    fn invalid<T>(
        &self,
        field: &'static str,
        value: &str,
        default: impl FnOnce() -> T,
    ) -> Result<T, PayloadError> {
        match self.policy {
            MissingFieldPolicy::FillDefaults => {
                warn!(order_id = self.order_id, field, value, "Unrecognized value, using default");
                Ok(default())
            }
            MissingFieldPolicy::Reject => Err(PayloadError::InvalidValue {
                order_id: self.order_id.to_string(),
                field,
                value: value.to_string(),
            }),
        }
    }
}

fn clamp_minutes(minutes: i64) -> u32 {
    minutes.clamp(0, u32::MAX as i64) as u32
}

/// Decode a single order body
pub fn decode_order(body: &[u8], policy: MissingFieldPolicy) -> Result<Order, PayloadError> {
    let raw: RawOrder = serde_json::from_slice(body)?;
    raw.into_order(policy)
}

/// Decode an order list body (bare array or `{"orders": [...]}`)
pub fn decode_orders(body: &[u8], policy: MissingFieldPolicy) -> Result<Vec<Order>, PayloadError> {
    let raw: RawOrderList = serde_json::from_slice(body)?;
    let raw = match raw {
        RawOrderList::Bare(orders) => orders,
        RawOrderList::Wrapped { orders } => orders,
    };
    raw.into_iter().map(|o| o.into_order(policy)).collect()
}
