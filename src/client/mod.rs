//! Storefront side of the engine.
//!
//! The client owns the cart and drives checkout, but every decision that
//! matters (coupon discounts, order totals, status changes) is made by the
//! server behind [`StorefrontApi`].

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::api::ListParams;
use crate::domain::aggregates::{CouponError, Order, OrderStatus, PaymentProvider, ResolvedCoupon, TransitionError};
use crate::domain::value_objects::Money;
use crate::services::{CreateOrderRequest, PaymentSession, PaymentSessionRequest};
use crate::storage::PaginatedResponse;
use crate::FieldErrors;

pub mod checkout;
pub mod http;
pub mod orders;
pub mod payment;

pub use checkout::{CheckoutError, CheckoutOutcome, CheckoutSession};
pub use http::HttpApi;
pub use orders::OrderActions;
pub use payment::{
    CommandNavigator, DispatchError, FilePendingStore, MemoryPendingStore, Navigator, PaymentDispatch, PendingPayment,
    PendingPaymentStore, RecordingNavigator, ResumeOutcome,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),
    #[error(transparent)]
    Coupon(CouponError),
    #[error(transparent)]
    Transition(TransitionError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("Request failed: {0}")]
    Transport(String),
    /// The same operation is already running; nothing was sent.
    #[error("Another request is already in progress")]
    Busy,
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self { Self::Transport(err.to_string()) }
}

/// The order service as seen from the storefront.
#[async_trait]
pub trait StorefrontApi: Send + Sync {
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<Order, ClientError>;

    async fn apply_coupon(&self, code: &str, subtotal: Money) -> Result<ResolvedCoupon, ClientError>;

    async fn create_payment_session(&self, provider: PaymentProvider, request: &PaymentSessionRequest) -> Result<PaymentSession, ClientError>;

    async fn get_order(&self, id: Uuid) -> Result<Order, ClientError>;

    /// Orders of the calling customer.
    async fn list_my_orders(&self, params: &ListParams) -> Result<PaginatedResponse<Order>, ClientError>;

    async fn cancel_order(&self, id: Uuid) -> Result<Order, ClientError>;

    async fn list_orders(&self, params: &ListParams) -> Result<PaginatedResponse<Order>, ClientError>;

    async fn update_order_status(&self, id: Uuid, status: OrderStatus) -> Result<Order, ClientError>;

    async fn delete_order(&self, id: Uuid) -> Result<(), ClientError>;

    async fn bulk_delete_orders(&self, ids: &[Uuid]) -> Result<usize, ClientError>;
}

/// Re-entrancy flag for one kind of request.
#[derive(Debug, Default)]
pub struct InFlight(AtomicBool);

impl InFlight {
    pub fn new() -> Self { Self::default() }

    /// Marks the operation as running, or returns `None` if it already is.
    /// The flag is released when the guard drops, whatever the outcome.
    pub fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        self.0.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).ok().map(|_| InFlightGuard(&self.0))
    }

    pub fn is_active(&self) -> bool { self.0.load(Ordering::Acquire) }
}

#[derive(Debug)]
pub struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) { self.0.store(false, Ordering::Release); }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scriptable in-process stand-in for the order service.

    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use chrono::Utc;
    use tokio::sync::Mutex;
    use url::Url;

    use super::*;
    use crate::domain::aggregates::{Actor, Coupon, NewOrder, TransitionPolicy};
    use crate::pricing::PricingCalculator;

    #[derive(Default)]
    pub(crate) struct FakeApi {
        pub orders: Mutex<HashMap<Uuid, Order>>,
        pub coupons: Mutex<Vec<Coupon>>,
        pub created: AtomicUsize,
        pub session_failures: AtomicUsize,
        pub delay: Option<Duration>,
    }

    impl FakeApi {
        pub async fn set_status(&self, id: Uuid, status: OrderStatus) {
            if let Some(order) = self.orders.lock().await.get_mut(&id) {
                order.request_status(status, &Actor::Admin, TransitionPolicy::Unrestricted).unwrap();
            }
        }

        async fn pause(&self) {
            if let Some(delay) = self.delay { tokio::time::sleep(delay).await; }
        }
    }

    #[async_trait]
    impl StorefrontApi for FakeApi {
        async fn create_order(&self, request: &CreateOrderRequest) -> Result<Order, ClientError> {
            self.pause().await;
            request.field_errors().into_result().map_err(ClientError::Validation)?;
            let coupon = match &request.coupon_code {
                Some(code) => Some(self.apply_coupon(code, request.subtotal).await?),
                None => None,
            };
            let breakdown = PricingCalculator::default().price_items(&request.items, coupon.as_ref());
            if breakdown != request.breakdown() {
                return Err(ClientError::Validation(FieldErrors::single("totalPrice", "stale")));
            }
            let order = Order::place(NewOrder {
                customer_id: Some("C1".into()),
                items: request.items.clone(),
                breakdown,
                coupon_code: coupon.map(|c| c.code),
                payment_method: request.payment_method,
                destination: request.destination.clone(),
            });
            self.created.fetch_add(1, Ordering::SeqCst);
            self.orders.lock().await.insert(order.id(), order.clone());
            Ok(order)
        }

        async fn apply_coupon(&self, code: &str, subtotal: Money) -> Result<ResolvedCoupon, ClientError> {
            self.pause().await;
            let coupons = self.coupons.lock().await;
            let coupon = coupons
                .iter()
                .find(|c| c.code.as_str().eq_ignore_ascii_case(code.trim()))
                .ok_or_else(|| ClientError::Coupon(CouponError::NotFound { code: code.to_string() }))?;
            coupon.check(Utc::now(), subtotal).map_err(ClientError::Coupon)
        }

        async fn create_payment_session(&self, provider: PaymentProvider, request: &PaymentSessionRequest) -> Result<PaymentSession, ClientError> {
            if self.session_failures.load(Ordering::SeqCst) > 0 {
                self.session_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ClientError::Rejected { status: 503, message: "gateway down".into() });
            }
            let url = format!("https://pay.example.com/{provider}?order={}&amount={}", request.order_id, request.amount.amount());
            Ok(PaymentSession { payment_url: Url::parse(&url).unwrap() })
        }

        async fn get_order(&self, id: Uuid) -> Result<Order, ClientError> {
            self.orders.lock().await.get(&id).cloned().ok_or_else(|| ClientError::NotFound(id.to_string()))
        }

        async fn list_my_orders(&self, params: &ListParams) -> Result<PaginatedResponse<Order>, ClientError> {
            self.list_orders(params).await
        }

        async fn cancel_order(&self, id: Uuid) -> Result<Order, ClientError> {
            self.pause().await;
            let mut orders = self.orders.lock().await;
            let order = orders.get_mut(&id).ok_or_else(|| ClientError::NotFound(id.to_string()))?;
            order.cancel(&Actor::customer("C1"), TransitionPolicy::ForwardOnly).map_err(ClientError::Transition)?;
            Ok(order.clone())
        }

        async fn list_orders(&self, params: &ListParams) -> Result<PaginatedResponse<Order>, ClientError> {
            let data: Vec<Order> = self.orders.lock().await.values().filter(|o| params.status.map_or(true, |s| o.status() == s)).cloned().collect();
            Ok(PaginatedResponse { total: data.len() as i64, data, page: 1 })
        }

        async fn update_order_status(&self, id: Uuid, status: OrderStatus) -> Result<Order, ClientError> {
            self.pause().await;
            let mut orders = self.orders.lock().await;
            let order = orders.get_mut(&id).ok_or_else(|| ClientError::NotFound(id.to_string()))?;
            order.request_status(status, &Actor::Admin, TransitionPolicy::ForwardOnly).map_err(ClientError::Transition)?;
            Ok(order.clone())
        }

        async fn delete_order(&self, id: Uuid) -> Result<(), ClientError> {
            self.bulk_delete_orders(&[id]).await.map(|_| ())
        }

        async fn bulk_delete_orders(&self, ids: &[Uuid]) -> Result<usize, ClientError> {
            let mut orders = self.orders.lock().await;
            let blocked: Vec<Uuid> = ids.iter().copied().filter(|id| orders.get(id).is_some_and(|o| !o.is_deletable())).collect();
            if !blocked.is_empty() {
                return Err(ClientError::Transition(TransitionError::NotDeletable { order_ids: blocked }));
            }
            Ok(ids.iter().filter(|id| orders.remove(id).is_some()).count())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_guard_releases_on_drop() {
        let flag = InFlight::new();
        let guard = flag.try_begin();
        assert!(guard.is_some());
        assert!(flag.is_active());
        assert!(flag.try_begin().is_none());
        drop(guard);
        assert!(!flag.is_active());
        assert!(flag.try_begin().is_some());
    }
}
