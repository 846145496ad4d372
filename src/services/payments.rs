//! Payment-gateway session creation for redirect providers.
//!
//! Only the session hand-off lives here. The provider's callback that settles
//! the order goes through [`OrderService::change_status`] as
//! [`Actor::PaymentGateway`].
//!
//! [`OrderService::change_status`]: crate::services::orders::OrderService::change_status
//! [`Actor::PaymentGateway`]: crate::domain::aggregates::Actor::PaymentGateway

use std::collections::HashMap;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::domain::aggregates::{Actor, Order, OrderStatus, PaymentProvider};
use crate::domain::value_objects::Money;
use crate::storage::OrderRepository;
use crate::{EngineError, FieldErrors, Result};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSessionRequest {
    pub order_id: Uuid,
    pub amount: Money,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    pub payment_url: Url,
}

/// Builds the hosted payment page URL for an order.
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;
    fn session_url(&self, order: &Order, amount: Money) -> Result<Url>;
}

/// Gateway whose payment page takes a signed query string.
#[derive(Clone, Debug)]
pub struct HostedCheckout {
    config: GatewayConfig,
}

impl HostedCheckout {
    pub fn new(config: GatewayConfig) -> Self { Self { config } }

    fn sign(&self, payload: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.config.secret.as_bytes())
            .map_err(|e| EngineError::Payment(format!("invalid signing key: {e}")))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Checks the signature on a URL produced by [`HostedCheckout::session_url`].
    pub fn verify(&self, url: &Url) -> bool {
        let mut signature = None;
        let mut unsigned = url.clone();
        unsigned.query_pairs_mut().clear().extend_pairs(url.query_pairs().filter(|(k, v)| {
            if k == "signature" { signature = Some(v.to_string()); false } else { true }
        }));
        match (signature, unsigned.query()) {
            (Some(signature), Some(query)) => self.sign(query).is_ok_and(|expected| expected == signature),
            _ => false,
        }
    }
}

impl PaymentGateway for HostedCheckout {
    fn provider(&self) -> PaymentProvider { self.config.provider }

    fn session_url(&self, order: &Order, amount: Money) -> Result<Url> {
        let mut url = self.config.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("merchant", &self.config.merchant_id)
            .append_pair("orderId", &order.id().to_string())
            .append_pair("orderRef", order.code())
            .append_pair("amount", &amount.amount().to_string())
            .append_pair("returnUrl", self.config.return_url.as_str());
        let payload = url.query().unwrap_or_default().to_string();
        let signature = self.sign(&payload)?;
        url.query_pairs_mut().append_pair("signature", &signature);
        Ok(url)
    }
}

pub struct PaymentService {
    orders: Arc<dyn OrderRepository>,
    gateways: HashMap<PaymentProvider, Arc<dyn PaymentGateway>>,
}

impl PaymentService {
    pub fn new(orders: Arc<dyn OrderRepository>, gateways: Vec<Arc<dyn PaymentGateway>>) -> Self {
        Self { orders, gateways: gateways.into_iter().map(|g| (g.provider(), g)).collect() }
    }

    pub fn from_config(orders: Arc<dyn OrderRepository>, configs: &[GatewayConfig]) -> Self {
        let gateways = configs.iter().cloned().map(|c| Arc::new(HostedCheckout::new(c)) as Arc<dyn PaymentGateway>).collect();
        Self::new(orders, gateways)
    }

    /// Creates a gateway session for a pending order paid by `provider`.
    ///
    /// Nothing about the order changes here, so a failed attempt can simply be retried.
    /// Customers can only pay for their own orders.
    #[instrument(skip(self, actor), fields(order_id = %request.order_id, amount = request.amount.amount()))]
    pub async fn create_session(&self, provider: PaymentProvider, request: PaymentSessionRequest, actor: &Actor) -> Result<PaymentSession> {
        let order = self
            .orders
            .find(request.order_id)
            .await?
            .filter(|order| match actor {
                Actor::Customer { customer_id } => order.is_owned_by(customer_id),
                _ => true,
            })
            .ok_or(EngineError::OrderNotFound(request.order_id))?;

        let mut errors = FieldErrors::new();
        if order.payment_method().provider() != Some(provider) {
            errors.add("paymentMethod", format!("Order {} is paid by {}, not {}", order.code(), order.payment_method(), provider));
        }
        if request.amount != order.total_price() {
            errors.add("amount", format!("Amount must equal the order total of {}", order.total_price()));
        }
        errors.into_result()?;
        if order.status() != OrderStatus::Pending {
            warn!("Payment requested for order {} in status {}", order.code(), order.status());
            return Err(EngineError::Payment(format!("order {} is {} and no longer awaits payment", order.code(), order.status())));
        }

        let gateway = self.gateways.get(&provider).ok_or(EngineError::GatewayUnavailable(provider))?;
        let payment_url = gateway.session_url(&order, request.amount)?;
        info!("Created {} payment session for order {}", provider, order.code());
        Ok(PaymentSession { payment_url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{Actor, NewOrder, OrderItem, PaymentMethod, TransitionPolicy};
    use crate::pricing::PricingBreakdown;
    use crate::storage::MemoryStore;
    use crate::test_support::destination;

    fn gateway_config(provider: PaymentProvider) -> GatewayConfig {
        GatewayConfig {
            provider,
            endpoint: Url::parse("https://sandbox.pay.example.com/checkout").unwrap(),
            merchant_id: "FOODIE".into(),
            secret: "top-secret".into(),
            return_url: Url::parse("https://shop.example.com/checkout/return").unwrap(),
        }
    }

    async fn stored_order(store: &MemoryStore, method: PaymentMethod) -> Order {
        let order = Order::place(NewOrder {
            customer_id: Some("C1".into()),
            items: vec![OrderItem { product_id: "P".into(), product_name: "Lau".into(), product_image: None, quantity: 1, price: Money::new(300_000) }],
            breakdown: PricingBreakdown { subtotal: Money::new(300_000), delivery_fee: Money::new(30_000), discount: Money::new(20_000), total: Money::new(310_000) },
            coupon_code: None,
            payment_method: method,
            destination: destination(),
        });
        store.insert(&order).await.unwrap();
        order
    }

    fn service(store: Arc<MemoryStore>) -> PaymentService {
        PaymentService::from_config(store, &[gateway_config(PaymentProvider::Vnpay)])
    }

    #[tokio::test]
    async fn test_session_url_is_signed() {
        let store = Arc::new(MemoryStore::new());
        let order = stored_order(&store, PaymentMethod::Vnpay).await;
        let session = service(store).create_session(PaymentProvider::Vnpay, PaymentSessionRequest { order_id: order.id(), amount: Money::new(310_000) }, &Actor::customer("C1")).await.unwrap();
        let url = session.payment_url;
        assert_eq!(url.host_str(), Some("sandbox.pay.example.com"));
        assert!(url.query_pairs().any(|(k, v)| k == "orderRef" && v == order.code()));
        let gateway = HostedCheckout::new(gateway_config(PaymentProvider::Vnpay));
        assert!(gateway.verify(&url));
        let mut tampered = url.clone();
        tampered.set_query(Some(&url.query().unwrap().replace("amount=310000", "amount=1")));
        assert!(!gateway.verify(&tampered));
    }

    #[tokio::test]
    async fn test_amount_and_method_must_match() {
        let store = Arc::new(MemoryStore::new());
        let order = stored_order(&store, PaymentMethod::Momo).await;
        let err = service(store).create_session(PaymentProvider::Vnpay, PaymentSessionRequest { order_id: order.id(), amount: Money::new(1) }, &Actor::customer("C1")).await.unwrap_err();
        let EngineError::Validation(fields) = err else { panic!("expected validation error") };
        assert!(fields.contains("paymentMethod"));
        assert!(fields.contains("amount"));
    }

    #[tokio::test]
    async fn test_unconfigured_provider() {
        let store = Arc::new(MemoryStore::new());
        let order = stored_order(&store, PaymentMethod::Momo).await;
        let err = service(store).create_session(PaymentProvider::Momo, PaymentSessionRequest { order_id: order.id(), amount: Money::new(310_000) }, &Actor::customer("C1")).await.unwrap_err();
        assert!(matches!(err, EngineError::GatewayUnavailable(PaymentProvider::Momo)));
    }

    #[tokio::test]
    async fn test_customers_pay_only_for_own_orders() {
        let store = Arc::new(MemoryStore::new());
        let order = stored_order(&store, PaymentMethod::Vnpay).await;
        let request = PaymentSessionRequest { order_id: order.id(), amount: Money::new(310_000) };
        let err = service(store.clone()).create_session(PaymentProvider::Vnpay, request.clone(), &Actor::customer("C2")).await.unwrap_err();
        assert!(matches!(err, EngineError::OrderNotFound(id) if id == order.id()));
        assert!(service(store).create_session(PaymentProvider::Vnpay, request, &Actor::PaymentGateway).await.is_ok());
    }

    #[tokio::test]
    async fn test_only_pending_orders_can_pay() {
        let store = Arc::new(MemoryStore::new());
        let mut order = stored_order(&store, PaymentMethod::Vnpay).await;
        order.cancel(&Actor::customer("C1"), TransitionPolicy::ForwardOnly).unwrap();
        store.update_status(&order, OrderStatus::Pending).await.unwrap();
        let err = service(store).create_session(PaymentProvider::Vnpay, PaymentSessionRequest { order_id: order.id(), amount: Money::new(310_000) }, &Actor::customer("C1")).await.unwrap_err();
        assert!(matches!(err, EngineError::Payment(_)));
    }
}
