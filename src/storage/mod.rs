//! Persistence seams for orders and coupons.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::{Coupon, Order, OrderStatus};
use crate::domain::value_objects::CouponCode;
use crate::Result;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const MAX_PER_PAGE: u32 = 100;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub customer_id: Option<String>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.status.map_or(true, |s| order.status() == s)
            && self.customer_id.as_deref().map_or(true, |c| order.is_owned_by(c))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub page: u32,
    pub per_page: u32,
}

impl Page {
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self { page: page.unwrap_or(1).max(1), per_page: per_page.unwrap_or(20).clamp(1, MAX_PER_PAGE) }
    }
    pub fn offset(&self) -> u64 { u64::from(self.page - 1) * u64::from(self.per_page) }
}

impl Default for Page {
    fn default() -> Self { Self::new(None, None) }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
}

/// Result of an all-or-nothing delete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted(Vec<Order>),
    /// Orders that are still active; nothing was deleted.
    Blocked(Vec<Uuid>),
    /// Ids that do not exist; nothing was deleted.
    Missing(Vec<Uuid>),
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert(&self, order: &Order) -> Result<()>;

    async fn find(&self, id: Uuid) -> Result<Option<Order>>;

    /// Newest first.
    async fn list(&self, filter: &OrderFilter, page: Page) -> Result<PaginatedResponse<Order>>;

    /// Stores the new status of `order` only if the stored status is still
    /// `expected`. Returns false when another writer got there first.
    async fn update_status(&self, order: &Order, expected: OrderStatus) -> Result<bool>;

    /// Deletes every id, or none of them if any is missing or not terminal.
    async fn delete_terminal(&self, ids: &[Uuid]) -> Result<DeleteOutcome>;
}

#[async_trait]
pub trait CouponRepository: Send + Sync {
    /// Case-insensitive lookup.
    async fn find_by_code(&self, code: &CouponCode) -> Result<Option<Coupon>>;

    async fn record_redemption(&self, code: &CouponCode) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_bounds() {
        assert_eq!(Page::new(Some(0), Some(500)), Page { page: 1, per_page: MAX_PER_PAGE });
        assert_eq!(Page::new(Some(3), Some(10)).offset(), 20);
        assert_eq!(Page::default(), Page { page: 1, per_page: 20 });
    }
}
