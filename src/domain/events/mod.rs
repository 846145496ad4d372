//! Domain events
//!
//! Raised by the order aggregate and handed to the notification hook after the
//! change has been stored.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::aggregates::{ActorKind, OrderStatus};
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    #[serde(rename_all = "camelCase")]
    Placed { order_id: Uuid, code: String, customer_id: Option<String>, total: Money },
    #[serde(rename_all = "camelCase")]
    StatusChanged { order_id: Uuid, code: String, customer_id: Option<String>, from: OrderStatus, to: OrderStatus, actor: ActorKind },
    #[serde(rename_all = "camelCase")]
    Deleted { order_id: Uuid, code: String, customer_id: Option<String> },
}

impl OrderEvent {
    pub fn order_id(&self) -> Uuid {
        match self {
            Self::Placed { order_id, .. } | Self::StatusChanged { order_id, .. } | Self::Deleted { order_id, .. } => *order_id,
        }
    }

    /// Subject suffix used when the event is published on a message bus.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Placed { .. } => "placed",
            Self::StatusChanged { .. } => "status_changed",
            Self::Deleted { .. } => "deleted",
        }
    }
}
