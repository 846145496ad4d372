//! Payment dispatch for redirect gateways.
//!
//! Handing off to a gateway ends the current flow, so dispatch runs in two
//! phases. Before navigating, the order is recorded in a [`PendingPaymentStore`]
//! that outlives the process. After the gateway sends the customer back,
//! [`PaymentDispatch::resume`] reloads that record and asks the server what
//! happened to the order.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::client::{ClientError, InFlight, StorefrontApi};
use crate::domain::aggregates::{Order, OrderStatus, PaymentMethod, PaymentProvider};
use crate::domain::value_objects::Money;
use crate::services::PaymentSessionRequest;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("{0} is not paid through a gateway")]
    NoGateway(PaymentMethod),
    #[error("Could not create a payment session: {0}")]
    Session(ClientError),
    #[error("Payment gateway returned an unusable url: {0}")]
    UnusableUrl(String),
    #[error("Could not open the payment page: {0}")]
    Navigation(String),
    #[error("Could not record the pending payment: {0}")]
    Store(String),
    #[error("A payment is already being started")]
    Busy,
}

/// What the storefront remembers across the redirect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPayment {
    pub order_id: Uuid,
    pub order_code: String,
    pub provider: PaymentProvider,
    pub amount: Money,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// The gateway callback confirmed the order.
    Paid(Order),
    /// The order was cancelled while away.
    Failed(Order),
    /// The callback has not landed yet. Dispatch may be retried.
    AwaitingConfirmation(Order),
}

impl ResumeOutcome {
    pub fn order(&self) -> &Order {
        match self {
            Self::Paid(order) | Self::Failed(order) | Self::AwaitingConfirmation(order) => order,
        }
    }
}

/// Hands control to the gateway's payment page.
#[async_trait]
pub trait Navigator: Send + Sync {
    async fn navigate(&self, url: &Url) -> Result<(), DispatchError>;
}

/// Opens the URL with an external program such as `xdg-open`.
#[derive(Clone, Debug)]
pub struct CommandNavigator {
    program: String,
}

impl CommandNavigator {
    pub fn new(program: impl Into<String>) -> Self { Self { program: program.into() } }
}

#[async_trait]
impl Navigator for CommandNavigator {
    async fn navigate(&self, url: &Url) -> Result<(), DispatchError> {
        let status = tokio::process::Command::new(&self.program)
            .arg(url.as_str())
            .status()
            .await
            .map_err(|e| DispatchError::Navigation(format!("{}: {e}", self.program)))?;
        if !status.success() {
            return Err(DispatchError::Navigation(format!("{} exited with {status}", self.program)));
        }
        Ok(())
    }
}

/// Remembers every URL it was asked to open.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    visited: Mutex<Vec<Url>>,
}

impl RecordingNavigator {
    pub fn new() -> Self { Self::default() }
    pub async fn visited(&self) -> Vec<Url> { self.visited.lock().await.clone() }
}

#[async_trait]
impl Navigator for RecordingNavigator {
    async fn navigate(&self, url: &Url) -> Result<(), DispatchError> {
        self.visited.lock().await.push(url.clone());
        Ok(())
    }
}

#[async_trait]
pub trait PendingPaymentStore: Send + Sync {
    async fn load(&self) -> Result<Option<PendingPayment>, DispatchError>;
    async fn save(&self, pending: &PendingPayment) -> Result<(), DispatchError>;
    async fn clear(&self) -> Result<(), DispatchError>;
}

/// Keeps the pending payment as a JSON file.
#[derive(Clone, Debug)]
pub struct FilePendingStore {
    path: PathBuf,
}

impl FilePendingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }
}

#[async_trait]
impl PendingPaymentStore for FilePendingStore {
    async fn load(&self) -> Result<Option<PendingPayment>, DispatchError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| DispatchError::Store(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DispatchError::Store(e.to_string())),
        }
    }

    async fn save(&self, pending: &PendingPayment) -> Result<(), DispatchError> {
        let bytes = serde_json::to_vec_pretty(pending).map_err(|e| DispatchError::Store(e.to_string()))?;
        tokio::fs::write(&self.path, bytes).await.map_err(|e| DispatchError::Store(e.to_string()))
    }

    async fn clear(&self) -> Result<(), DispatchError> {
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(DispatchError::Store(e.to_string())),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryPendingStore {
    pending: Mutex<Option<PendingPayment>>,
}

impl MemoryPendingStore {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl PendingPaymentStore for MemoryPendingStore {
    async fn load(&self) -> Result<Option<PendingPayment>, DispatchError> { Ok(self.pending.lock().await.clone()) }

    async fn save(&self, pending: &PendingPayment) -> Result<(), DispatchError> {
        *self.pending.lock().await = Some(pending.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), DispatchError> {
        self.pending.lock().await.take();
        Ok(())
    }
}

pub struct PaymentDispatch {
    api: Arc<dyn StorefrontApi>,
    navigator: Arc<dyn Navigator>,
    store: Arc<dyn PendingPaymentStore>,
    in_flight: InFlight,
}

impl PaymentDispatch {
    pub fn new(api: Arc<dyn StorefrontApi>, navigator: Arc<dyn Navigator>, store: Arc<dyn PendingPaymentStore>) -> Self {
        Self { api, navigator, store, in_flight: InFlight::new() }
    }

    /// Opens the gateway session for `order` and navigates to it.
    ///
    /// On failure the order is untouched and dispatch can be retried with the
    /// same order.
    #[instrument(skip(self, order), fields(order_id = %order.id(), method = %order.payment_method()))]
    pub async fn dispatch(&self, order: &Order) -> Result<Url, DispatchError> {
        let _guard = self.in_flight.try_begin().ok_or(DispatchError::Busy)?;
        let provider = order.payment_method().provider().ok_or(DispatchError::NoGateway(order.payment_method()))?;
        let request = PaymentSessionRequest { order_id: order.id(), amount: order.total_price() };
        let session = self.api.create_payment_session(provider, &request).await.map_err(|e| {
            warn!("Payment session for order {} failed: {}", order.code(), e);
            DispatchError::Session(e)
        })?;
        let url = session.payment_url;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(DispatchError::UnusableUrl(url.to_string()));
        }

        self.store
            .save(&PendingPayment { order_id: order.id(), order_code: order.code().to_string(), provider, amount: request.amount })
            .await?;
        info!("Redirecting order {} to {}", order.code(), provider);
        self.navigator.navigate(&url).await?;
        Ok(url)
    }

    pub async fn pending(&self) -> Result<Option<PendingPayment>, DispatchError> { self.store.load().await }

    /// Drops the pending record if it belongs to `order_id`.
    pub async fn forget(&self, order_id: Uuid) -> Result<(), DispatchError> {
        match self.store.load().await? {
            Some(pending) if pending.order_id == order_id => self.store.clear().await,
            _ => Ok(()),
        }
    }

    /// Reconciles a payment started before the redirect. `None` when nothing was pending.
    #[instrument(skip(self))]
    pub async fn resume(&self) -> Result<Option<ResumeOutcome>, DispatchError> {
        let Some(pending) = self.store.load().await? else { return Ok(None) };
        let order = self.api.get_order(pending.order_id).await.map_err(DispatchError::Session)?;
        let outcome = match order.status() {
            OrderStatus::Pending => ResumeOutcome::AwaitingConfirmation(order),
            OrderStatus::Cancelled => ResumeOutcome::Failed(order),
            OrderStatus::Confirmed | OrderStatus::Shipping | OrderStatus::Delivered => ResumeOutcome::Paid(order),
        };
        if !matches!(outcome, ResumeOutcome::AwaitingConfirmation(_)) {
            self.store.clear().await?;
        }
        info!("Order {} is {} after returning from {}", pending.order_code, outcome.order().status(), pending.provider);
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeApi;
    use crate::domain::aggregates::{NewOrder, OrderItem};
    use crate::pricing::PricingBreakdown;
    use crate::test_support::destination;
    use std::sync::atomic::Ordering;

    async fn seeded(api: &FakeApi, method: PaymentMethod) -> Order {
        let order = Order::place(NewOrder {
            customer_id: Some("C1".into()),
            items: vec![OrderItem { product_id: "P".into(), product_name: "Bun cha".into(), product_image: None, quantity: 1, price: Money::new(80_000) }],
            breakdown: PricingBreakdown { subtotal: Money::new(80_000), delivery_fee: Money::new(30_000), discount: Money::ZERO, total: Money::new(110_000) },
            coupon_code: None,
            payment_method: method,
            destination: destination(),
        });
        api.orders.lock().await.insert(order.id(), order.clone());
        order
    }

    struct Rig {
        api: Arc<FakeApi>,
        navigator: Arc<RecordingNavigator>,
        store: Arc<MemoryPendingStore>,
        dispatch: PaymentDispatch,
    }

    fn rig() -> Rig {
        let api = Arc::new(FakeApi::default());
        let navigator = Arc::new(RecordingNavigator::new());
        let store = Arc::new(MemoryPendingStore::new());
        let dispatch = PaymentDispatch::new(api.clone(), navigator.clone(), store.clone());
        Rig { api, navigator, store, dispatch }
    }

    #[tokio::test]
    async fn test_dispatch_records_then_navigates() {
        let rig = rig();
        let order = seeded(&rig.api, PaymentMethod::Vnpay).await;
        let url = rig.dispatch.dispatch(&order).await.unwrap();
        assert_eq!(rig.navigator.visited().await, vec![url]);
        let pending = rig.store.load().await.unwrap().unwrap();
        assert_eq!(pending.order_id, order.id());
        assert_eq!(pending.amount, Money::new(110_000));
    }

    #[tokio::test]
    async fn test_failed_session_keeps_order_pending() {
        let rig = rig();
        rig.api.session_failures.store(1, Ordering::SeqCst);
        let order = seeded(&rig.api, PaymentMethod::Momo).await;
        assert!(matches!(rig.dispatch.dispatch(&order).await, Err(DispatchError::Session(_))));
        assert!(rig.navigator.visited().await.is_empty());
        assert_eq!(rig.store.load().await.unwrap(), None);
        assert!(rig.dispatch.dispatch(&order).await.is_ok());
    }

    #[tokio::test]
    async fn test_cod_has_no_gateway() {
        let rig = rig();
        let order = seeded(&rig.api, PaymentMethod::Cod).await;
        assert_eq!(rig.dispatch.dispatch(&order).await, Err(DispatchError::NoGateway(PaymentMethod::Cod)));
    }

    #[tokio::test]
    async fn test_resume_reads_status_from_server() {
        let rig = rig();
        assert_eq!(rig.dispatch.resume().await.unwrap(), None);

        let order = seeded(&rig.api, PaymentMethod::Vnpay).await;
        rig.dispatch.dispatch(&order).await.unwrap();
        assert!(matches!(rig.dispatch.resume().await.unwrap(), Some(ResumeOutcome::AwaitingConfirmation(_))));
        assert!(rig.dispatch.pending().await.unwrap().is_some());

        rig.api.set_status(order.id(), OrderStatus::Confirmed).await;
        let outcome = rig.dispatch.resume().await.unwrap().unwrap();
        assert!(matches!(outcome, ResumeOutcome::Paid(ref o) if o.status() == OrderStatus::Confirmed));
        assert!(rig.dispatch.pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_survives_restart() {
        let path = std::env::temp_dir().join(format!("pending-{}.json", Uuid::new_v4()));
        let pending = PendingPayment { order_id: Uuid::new_v4(), order_code: "ORD1".into(), provider: PaymentProvider::Momo, amount: Money::new(5) };
        FilePendingStore::new(&path).save(&pending).await.unwrap();
        let reopened = FilePendingStore::new(&path);
        assert_eq!(reopened.load().await.unwrap(), Some(pending));
        reopened.clear().await.unwrap();
        reopened.clear().await.unwrap();
        assert_eq!(reopened.load().await.unwrap(), None);
    }
}
