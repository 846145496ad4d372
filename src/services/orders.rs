//! Order service: authoritative order creation and the status state machine.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{
    Actor, Destination, NewOrder, Order, OrderItem, OrderStatus, PaymentMethod, TransitionError, TransitionPolicy,
};
use crate::domain::events::OrderEvent;
use crate::domain::value_objects::Money;
use crate::pricing::{PricingBreakdown, PricingCalculator};
use crate::services::coupons::CouponResolver;
use crate::services::notifier::EventPublisher;
use crate::storage::{DeleteOutcome, OrderFilter, OrderRepository, Page, PaginatedResponse};
use crate::{EngineError, FieldErrors, Result};

/// Order submission as sent by the storefront.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub items: Vec<OrderItem>,
    pub subtotal: Money,
    pub delivery_fee: Money,
    pub discount_amount: Money,
    pub coupon_code: Option<String>,
    pub total_price: Money,
    pub payment_method: PaymentMethod,
    pub destination: Destination,
}

impl CreateOrderRequest {
    pub fn breakdown(&self) -> PricingBreakdown {
        PricingBreakdown { subtotal: self.subtotal, delivery_fee: self.delivery_fee, discount: self.discount_amount, total: self.total_price }
    }

    /// Shape checks that need no storage.
    pub fn field_errors(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if self.items.is_empty() {
            errors.add("items", "Your cart is empty");
        }
        if self.items.iter().any(|i| i.quantity == 0) {
            errors.add("items", "Every item needs a quantity of at least 1");
        }
        if self.items.iter().any(|i| i.price.is_negative()) {
            errors.add("items", "Item prices cannot be negative");
        }
        if let Err(e) = self.destination.validate() {
            errors.merge(e.into());
        }
        errors
    }
}

pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    coupons: CouponResolver,
    calculator: PricingCalculator,
    policy: TransitionPolicy,
    publisher: Arc<dyn EventPublisher>,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        coupons: CouponResolver,
        calculator: PricingCalculator,
        policy: TransitionPolicy,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self { orders, coupons, calculator, policy, publisher }
    }

    pub fn policy(&self) -> TransitionPolicy { self.policy }
    pub fn calculator(&self) -> &PricingCalculator { &self.calculator }
    pub fn coupons(&self) -> &CouponResolver { &self.coupons }

    /// Creates a pending order after re-pricing the submission.
    ///
    /// Totals from the client are compared, never trusted: a mismatch means the
    /// client priced a stale cart and the order is refused.
    #[instrument(skip(self, customer_id, request), fields(customer_id = ?customer_id, items = request.items.len()))]
    pub async fn create_order(&self, customer_id: Option<String>, request: CreateOrderRequest) -> Result<Order> {
        request.field_errors().into_result()?;

        let subtotal: Money = request.items.iter().map(OrderItem::line_total).sum();
        let coupon = match request.coupon_code.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(code) => Some(self.coupons.resolve(code, subtotal).await?),
            None => None,
        };
        let breakdown = self.calculator.price_items(&request.items, coupon.as_ref());
        if breakdown != request.breakdown() {
            warn!("Stale totals submitted: client {:?}, server {:?}", request.breakdown(), breakdown);
            return Err(FieldErrors::single("totalPrice", "Prices have changed; please review your order").into());
        }

        let mut order = Order::place(NewOrder {
            customer_id,
            items: request.items,
            breakdown,
            coupon_code: coupon.map(|c| c.code),
            payment_method: request.payment_method,
            destination: request.destination,
        });
        self.orders.insert(&order).await?;
        info!("Order {} ({}) placed for {} via {}", order.code(), order.id(), order.total_price(), order.payment_method());
        self.publish(order.take_events()).await;
        Ok(order)
    }

    /// Customers only see their own orders.
    pub async fn get_order(&self, id: Uuid, actor: &Actor) -> Result<Order> {
        let order = self.load(id).await?;
        match actor {
            Actor::Customer { customer_id } if !order.is_owned_by(customer_id) => Err(EngineError::OrderNotFound(id)),
            _ => Ok(order),
        }
    }

    pub async fn list_orders(&self, filter: &OrderFilter, page: Page) -> Result<PaginatedResponse<Order>> {
        self.orders.list(filter, page).await
    }

    #[instrument(skip(self), fields(order_id = %id))]
    pub async fn cancel_order(&self, id: Uuid, actor: &Actor) -> Result<Order> {
        self.change_status(id, OrderStatus::Cancelled, actor).await
    }

    /// Applies a status change for `actor` and fires the notification hook.
    #[instrument(skip(self), fields(order_id = %id, new_status = %next))]
    pub async fn change_status(&self, id: Uuid, next: OrderStatus, actor: &Actor) -> Result<Order> {
        let mut order = self.get_order(id, actor).await?;
        let previous = order.status();
        let changed = order.request_status(next, actor, self.policy).map_err(|e| {
            warn!("Rejected transition of order {} from {} to {}: {}", id, previous, next, e);
            e
        })?;
        if !changed {
            return Ok(order);
        }
        if !self.orders.update_status(&order, previous).await? {
            warn!("Order {} changed concurrently; expected {}", id, previous);
            return Err(TransitionError::Conflict { order_id: id }.into());
        }
        info!("Order {} status updated from '{}' to '{}'", order.code(), previous, next);

        // Redeemed once, when the order first leaves pending, even if confirmed is skipped.
        if previous == OrderStatus::Pending && next.is_accepted() {
            if let Some(code) = order.coupon_code() {
                if let Err(e) = self.coupons.redeem(code).await {
                    error!("Failed to record redemption of coupon {} for order {}: {}", code, id, e);
                }
            }
        }
        self.publish(order.take_events()).await;
        Ok(order)
    }

    pub async fn delete_order(&self, id: Uuid) -> Result<()> {
        self.bulk_delete(&[id]).await.map(|_| ())
    }

    /// Removes terminal orders. Either every id is deleted or none is.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn bulk_delete(&self, ids: &[Uuid]) -> Result<usize> {
        if ids.is_empty() {
            return Err(FieldErrors::single("ids", "Select at least one order").into());
        }
        let mut unique = ids.to_vec();
        unique.sort_unstable();
        unique.dedup();
        match self.orders.delete_terminal(&unique).await? {
            DeleteOutcome::Deleted(orders) => {
                info!("Deleted {} orders", orders.len());
                self.publish(orders.iter().map(Order::deleted_event).collect()).await;
                Ok(orders.len())
            }
            DeleteOutcome::Blocked(order_ids) => {
                warn!("Refused to delete active orders {:?}", order_ids);
                Err(TransitionError::NotDeletable { order_ids }.into())
            }
            DeleteOutcome::Missing(order_ids) => match order_ids.first() {
                Some(first) => Err(EngineError::OrderNotFound(*first)),
                None => Ok(0),
            },
        }
    }

    async fn load(&self, id: Uuid) -> Result<Order> {
        self.orders.find(id).await?.ok_or(EngineError::OrderNotFound(id))
    }

    async fn publish(&self, events: Vec<OrderEvent>) {
        for event in events {
            if let Err(e) = self.publisher.publish(&event).await {
                warn!("Failed to publish {} for order {}: {}", event.name(), event.order_id(), e);
            }
        }
    }
}
