//! The order record and its status enumerations

use chrono::{DateTime, Local};
use galley_util::{ItemId, OrderId, WorkstationId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kitchen-side order status. This is the canonical state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KitchenStatus {
    Queued,
    Active,
    Overdue,
    Completed,
}

impl KitchenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KitchenStatus::Queued => "queued",
            KitchenStatus::Active => "active",
            KitchenStatus::Overdue => "overdue",
            KitchenStatus::Completed => "completed",
        }
    }

    /// No further transitions are modeled out of this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, KitchenStatus::Completed)
    }

    /// Whether the order is being cooked (a timer may exist)
    pub fn is_in_progress(&self) -> bool {
        matches!(self, KitchenStatus::Active | KitchenStatus::Overdue)
    }

    /// Parse a status string from either vocabulary.
    ///
    /// Matching ignores case, and `-` or spaces count as `_`. Customer-facing
    /// lifecycle names are mapped onto the kitchen view.
    pub fn parse_lenient(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "queued" => Some(KitchenStatus::Queued),
            "active" | "in_progress" | "cooking" => Some(KitchenStatus::Active),
            "overdue" => Some(KitchenStatus::Overdue),
            "completed" | "done" => Some(KitchenStatus::Completed),
            other => OrderLifecycle::parse(other).map(KitchenStatus::from),
        }
    }
}

impl fmt::Display for KitchenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Customer-facing order lifecycle, as used by order management
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderLifecycle {
    Pending,
    Confirmed,
    Preparing,
    Ready,
    Completed,
    Cancelled,
}

impl OrderLifecycle {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(OrderLifecycle::Pending),
            "confirmed" => Some(OrderLifecycle::Confirmed),
            "preparing" => Some(OrderLifecycle::Preparing),
            "ready" => Some(OrderLifecycle::Ready),
            "completed" => Some(OrderLifecycle::Completed),
            "cancelled" | "canceled" => Some(OrderLifecycle::Cancelled),
            _ => None,
        }
    }
}

impl From<OrderLifecycle> for KitchenStatus {
    fn from(lifecycle: OrderLifecycle) -> Self {
        match lifecycle {
            OrderLifecycle::Pending | OrderLifecycle::Confirmed => KitchenStatus::Queued,
            OrderLifecycle::Preparing => KitchenStatus::Active,
            OrderLifecycle::Ready | OrderLifecycle::Completed | OrderLifecycle::Cancelled => {
                KitchenStatus::Completed
            }
        }
    }
}

impl From<KitchenStatus> for OrderLifecycle {
    fn from(status: KitchenStatus) -> Self {
        match status {
            KitchenStatus::Queued => OrderLifecycle::Confirmed,
            KitchenStatus::Active | KitchenStatus::Overdue => OrderLifecycle::Preparing,
            KitchenStatus::Completed => OrderLifecycle::Ready,
        }
    }
}

/// Order priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "normal" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            "urgent" => Some(Priority::Urgent),
            _ => None,
        }
    }
}

/// Per-item preparation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Pending,
    Preparing,
    Ready,
}

impl ItemStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(ItemStatus::Pending),
            "preparing" => Some(ItemStatus::Preparing),
            "ready" => Some(ItemStatus::Ready),
            _ => None,
        }
    }
}

/// One step of an item's recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparationStep {
    pub description: String,
    #[serde(default)]
    pub completed: bool,
}

/// A line item of an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: ItemId,
    pub name: String,
    pub quantity: u32,
    pub status: ItemStatus,
    /// Minutes budgeted for this item, if it is timed separately
    pub estimated_time: Option<u32>,
    #[serde(default)]
    pub preparation_steps: Vec<PreparationStep>,
}

impl LineItem {
    pub fn new(id: impl Into<ItemId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            quantity: 1,
            status: ItemStatus::Pending,
            estimated_time: None,
            preparation_steps: Vec::new(),
        }
    }

    pub fn with_estimate(mut self, minutes: u32) -> Self {
        self.estimated_time = Some(minutes);
        self
    }

    pub fn with_step(mut self, description: impl Into<String>) -> Self {
        self.preparation_steps.push(PreparationStep {
            description: description.into(),
            completed: false,
        });
        self
    }
}

/// An order as tracked by the kitchen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_name: String,
    pub status: KitchenStatus,
    pub priority: Priority,
    /// Minutes budgeted for preparation
    pub estimated_time: u32,
    pub actual_start_time: Option<DateTime<Local>>,
    pub actual_end_time: Option<DateTime<Local>>,
    #[serde(default)]
    pub items: Vec<LineItem>,
    pub workstation: Option<WorkstationId>,
    /// Bumped on every local mutation
    #[serde(default)]
    pub version: u64,
}

impl Order {
    /// A queued order with no items
    pub fn new(id: impl Into<OrderId>, estimated_time: u32) -> Self {
        Self {
            id: id.into(),
            customer_name: String::new(),
            status: KitchenStatus::Queued,
            priority: Priority::Normal,
            estimated_time,
            actual_start_time: None,
            actual_end_time: None,
            items: Vec::new(),
            workstation: None,
            version: 0,
        }
    }

    pub fn with_customer(mut self, name: impl Into<String>) -> Self {
        self.customer_name = name.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_item(mut self, item: LineItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn with_workstation(mut self, workstation: impl Into<WorkstationId>) -> Self {
        self.workstation = Some(workstation.into());
        self
    }

    pub fn with_status(mut self, status: KitchenStatus) -> Self {
        self.status = status;
        self
    }

    pub fn item(&self, item_id: &ItemId) -> Option<&LineItem> {
        self.items.iter().find(|i| &i.id == item_id)
    }

    pub fn item_mut(&mut self, item_id: &ItemId) -> Option<&mut LineItem> {
        self.items.iter_mut().find(|i| &i.id == item_id)
    }

    /// Customer-facing view of the status
    pub fn lifecycle(&self) -> OrderLifecycle {
        self.status.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_KITCHEN: [KitchenStatus; 4] = [
        KitchenStatus::Queued,
        KitchenStatus::Active,
        KitchenStatus::Overdue,
        KitchenStatus::Completed,
    ];

    const ALL_LIFECYCLE: [OrderLifecycle; 6] = [
        OrderLifecycle::Pending,
        OrderLifecycle::Confirmed,
        OrderLifecycle::Preparing,
        OrderLifecycle::Ready,
        OrderLifecycle::Completed,
        OrderLifecycle::Cancelled,
    ];

    #[test]
    fn kitchen_status_survives_lifecycle_round_trip_except_overdue() {
        for status in ALL_KITCHEN {
            let back = KitchenStatus::from(OrderLifecycle::from(status));
            if status == KitchenStatus::Overdue {
                // Overdue is derived from timers and has no lifecycle equivalent
                assert_eq!(back, KitchenStatus::Active);
            } else {
                assert_eq!(back, status);
            }
        }
    }

    #[test]
    fn lifecycle_terminal_states_map_to_completed() {
        for lifecycle in ALL_LIFECYCLE {
            let status = KitchenStatus::from(lifecycle);
            let terminal = matches!(
                lifecycle,
                OrderLifecycle::Ready | OrderLifecycle::Completed | OrderLifecycle::Cancelled
            );
            assert_eq!(status.is_terminal(), terminal, "{:?}", lifecycle);
        }
    }

    #[test]
    fn parse_lenient_accepts_both_vocabularies() {
        assert_eq!(KitchenStatus::parse_lenient("QUEUED"), Some(KitchenStatus::Queued));
        assert_eq!(KitchenStatus::parse_lenient("in-progress"), Some(KitchenStatus::Active));
        assert_eq!(KitchenStatus::parse_lenient("preparing"), Some(KitchenStatus::Active));
        assert_eq!(KitchenStatus::parse_lenient("pending"), Some(KitchenStatus::Queued));
        assert_eq!(KitchenStatus::parse_lenient("Cancelled"), Some(KitchenStatus::Completed));
        assert_eq!(KitchenStatus::parse_lenient(" overdue "), Some(KitchenStatus::Overdue));
        assert_eq!(KitchenStatus::parse_lenient("plated"), None);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&KitchenStatus::Overdue).unwrap();
        assert_eq!(json, "\"overdue\"");
    }

    #[test]
    fn order_builder_defaults() {
        let order = Order::new(7u64, 12)
            .with_item(LineItem::new("fries", "Fries").with_estimate(4))
            .with_workstation("fryer");

        assert_eq!(order.id.as_str(), "7");
        assert_eq!(order.status, KitchenStatus::Queued);
        assert_eq!(order.priority, Priority::Normal);
        assert_eq!(order.lifecycle(), OrderLifecycle::Confirmed);
        assert_eq!(order.item(&ItemId::new("fries")).unwrap().estimated_time, Some(4));
    }
}
