//! In-memory repositories, used by tests and when no database is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::aggregates::{Coupon, Order, OrderStatus};
use crate::domain::value_objects::CouponCode;
use crate::storage::{CouponRepository, DeleteOutcome, OrderFilter, OrderRepository, Page, PaginatedResponse};
use crate::Result;

#[derive(Debug, Default)]
pub struct MemoryStore {
    orders: RwLock<HashMap<Uuid, Order>>,
    coupons: RwLock<HashMap<CouponCode, Coupon>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn with_coupons(coupons: impl IntoIterator<Item = Coupon>) -> Self {
        Self {
            orders: RwLock::default(),
            coupons: RwLock::new(coupons.into_iter().map(|c| (c.code.clone(), c)).collect()),
        }
    }

    pub async fn put_coupon(&self, coupon: Coupon) {
        self.coupons.write().await.insert(coupon.code.clone(), coupon);
    }

    pub async fn coupon(&self, code: &CouponCode) -> Option<Coupon> {
        self.coupons.read().await.get(code).cloned()
    }

    pub async fn order_count(&self) -> usize { self.orders.read().await.len() }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn insert(&self, order: &Order) -> Result<()> {
        self.orders.write().await.insert(order.id(), without_events(order));
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn list(&self, filter: &OrderFilter, page: Page) -> Result<PaginatedResponse<Order>> {
        let orders = self.orders.read().await;
        let mut matching: Vec<&Order> = orders.values().filter(|o| filter.matches(o)).collect();
        matching.sort_by(|a, b| b.created_at().cmp(&a.created_at()).then_with(|| b.id().cmp(&a.id())));
        let total = i64::try_from(matching.len()).unwrap_or(i64::MAX);
        let skip = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let data = matching.into_iter().skip(skip).take(page.per_page as usize).cloned().collect();
        Ok(PaginatedResponse { data, total, page: page.page })
    }

    async fn update_status(&self, order: &Order, expected: OrderStatus) -> Result<bool> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(&order.id()) {
            Some(stored) if stored.status() == expected => {
                *stored = without_events(order);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_terminal(&self, ids: &[Uuid]) -> Result<DeleteOutcome> {
        let mut orders = self.orders.write().await;
        let missing: Vec<Uuid> = ids.iter().copied().filter(|id| !orders.contains_key(id)).collect();
        if !missing.is_empty() { return Ok(DeleteOutcome::Missing(missing)); }
        let blocked: Vec<Uuid> = ids.iter().copied().filter(|id| orders.get(id).is_some_and(|o| !o.is_deletable())).collect();
        if !blocked.is_empty() { return Ok(DeleteOutcome::Blocked(blocked)); }
        Ok(DeleteOutcome::Deleted(ids.iter().filter_map(|id| orders.remove(id)).collect()))
    }
}

/// Copy without pending events; those belong to the caller.
fn without_events(order: &Order) -> Order {
    let mut copy = order.clone();
    copy.take_events();
    copy
}

#[async_trait]
impl CouponRepository for MemoryStore {
    async fn find_by_code(&self, code: &CouponCode) -> Result<Option<Coupon>> {
        Ok(self.coupons.read().await.get(code).cloned())
    }

    async fn record_redemption(&self, code: &CouponCode) -> Result<()> {
        if let Some(coupon) = self.coupons.write().await.get_mut(code) {
            coupon.used_count = coupon.used_count.saturating_add(1);
        }
        Ok(())
    }
}
