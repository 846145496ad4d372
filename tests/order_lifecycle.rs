//! End-to-end checkout against the HTTP server on a local port.

use std::sync::Arc;

use order_engine::api::{self, AppState, ListParams};
use order_engine::client::{
    CheckoutError, CheckoutOutcome, CheckoutSession, ClientError, HttpApi, MemoryPendingStore, OrderActions,
    PaymentDispatch, RecordingNavigator, ResumeOutcome, StorefrontApi,
};
use order_engine::config::GatewayConfig;
use order_engine::domain::aggregates::{Actor, TransitionError};
use order_engine::services::{CouponResolver, HostedCheckout, MemoryPublisher, OrderService, PaymentService};
use order_engine::storage::MemoryStore;
use order_engine::{
    CartItem, Coupon, CouponCode, CouponError, Destination, Money, OrderStatus, PaymentMethod, PaymentProvider,
    PricingCalculator, TransitionPolicy,
};
use url::Url;

struct Server {
    base: Url,
    store: Arc<MemoryStore>,
    orders: Arc<OrderService>,
    events: Arc<MemoryPublisher>,
}

fn gateway() -> GatewayConfig {
    GatewayConfig {
        provider: PaymentProvider::Vnpay,
        endpoint: Url::parse("https://sandbox.vnpay.example.com/pay").unwrap(),
        merchant_id: "FOODIE".into(),
        secret: "integration-secret".into(),
        return_url: Url::parse("http://localhost:3000/checkout/return").unwrap(),
    }
}

async fn spawn_server() -> Server {
    let store = Arc::new(MemoryStore::with_coupons([Coupon {
        code: CouponCode::new("SALE50").unwrap(),
        discount_amount: Some(Money::new(50_000)),
        discount_percent: Some(10),
        min_order_amount: Money::new(200_000),
        valid_from: None,
        valid_to: None,
        usage_limit: Some(5),
        used_count: 0,
    }]));
    let events = Arc::new(MemoryPublisher::new());
    let orders = OrderService::new(
        store.clone(),
        CouponResolver::new(store.clone()),
        PricingCalculator::default(),
        TransitionPolicy::ForwardOnly,
        events.clone(),
    );
    let state = AppState::new(orders, PaymentService::from_config(store.clone(), &[gateway()]));
    let orders = state.orders.clone();
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    Server { base: Url::parse(&format!("http://{addr}")).unwrap(), store, orders, events }
}

fn destination() -> Destination {
    Destination {
        recipient_name: "Tran Thi B".into(),
        phone: "0987654321".into(),
        email: "b@example.com".into(),
        region: "Ha Noi".into(),
        district: "Hoan Kiem".into(),
        ward: "Hang Trong".into(),
        detail: "5 Hang Gai".into(),
    }
}

fn dish(product_id: &str, unit_price: i64, quantity: u32) -> CartItem {
    CartItem {
        product_id: product_id.into(),
        name: format!("Dish {product_id}"),
        image: None,
        unit_price: Money::new(unit_price),
        quantity,
        stock_ceiling: 10,
    }
}

fn checkout(api: Arc<HttpApi>, navigator: Arc<RecordingNavigator>) -> CheckoutSession {
    let dispatch = PaymentDispatch::new(api.clone(), navigator, Arc::new(MemoryPendingStore::new()));
    CheckoutSession::new(api, PricingCalculator::default(), dispatch)
}

#[tokio::test]
async fn test_cod_checkout_with_coupon_then_admin_fulfilment() {
    let server = spawn_server().await;
    let customer = Arc::new(HttpApi::new(server.base.clone()).with_customer("C1"));
    let session = checkout(customer.clone(), Arc::new(RecordingNavigator::new()));

    session.add_item(dish("PHO", 125_000, 2)).await.unwrap();
    let coupon = session.apply_coupon("sale50").await.unwrap();
    assert_eq!(coupon.discount, Money::new(50_000));

    let outcome = session.submit(PaymentMethod::Cod, destination()).await.unwrap();
    let CheckoutOutcome::Placed(order) = outcome else { panic!("expected a placed order") };
    assert_eq!(order.total_price(), Money::new(230_000));
    assert!(session.cart().await.is_empty());

    let admin = OrderActions::new(Arc::new(HttpApi::new(server.base.clone())));
    admin.set_status(order.id(), OrderStatus::Confirmed).await.unwrap();
    let code = CouponCode::new("SALE50").unwrap();
    assert_eq!(server.store.coupon(&code).await.unwrap().used_count, 1);

    admin.set_status(order.id(), OrderStatus::Shipping).await.unwrap();
    let err = OrderActions::new(customer.clone()).cancel(order.id()).await.unwrap_err();
    assert_eq!(err, ClientError::Transition(TransitionError::NotCancellable { status: OrderStatus::Shipping }));

    let err = admin.set_status(order.id(), OrderStatus::Confirmed).await.unwrap_err();
    assert!(matches!(err, ClientError::Transition(TransitionError::Regression { .. })));
    assert!(matches!(admin.delete(order.id()).await, Err(ClientError::Transition(TransitionError::NotDeletable { .. }))));

    admin.set_status(order.id(), OrderStatus::Delivered).await.unwrap();
    assert_eq!(admin.bulk_delete(&[order.id()]).await, Ok(1));
    assert!(matches!(customer.get_order(order.id()).await, Err(ClientError::NotFound(_))));
    assert_eq!(server.events.events().await.len(), 5);
}

#[tokio::test]
async fn test_coupon_minimum_is_surfaced() {
    let server = spawn_server().await;
    let session = checkout(Arc::new(HttpApi::new(server.base.clone()).with_customer("C1")), Arc::new(RecordingNavigator::new()));
    session.add_item(dish("TRA", 100_000, 1)).await.unwrap();
    let before = session.pricing().await;

    let err = session.apply_coupon("SALE50").await.unwrap_err();
    let ClientError::Coupon(CouponError::MinOrderNotMet { min_order_amount, .. }) = err else { panic!("expected min order error") };
    assert_eq!(min_order_amount, Money::new(200_000));
    assert_eq!(session.pricing().await, before);
}

#[tokio::test]
async fn test_gateway_redirect_and_resume() {
    let server = spawn_server().await;
    let customer = Arc::new(HttpApi::new(server.base.clone()).with_customer("C7"));
    let navigator = Arc::new(RecordingNavigator::new());
    let session = checkout(customer.clone(), navigator.clone());

    session.add_item(dish("BUN", 260_000, 2)).await.unwrap();
    let outcome = session.submit(PaymentMethod::Vnpay, destination()).await.unwrap();
    let CheckoutOutcome::Redirected { order, payment_url } = outcome else { panic!("expected a redirect") };
    assert_eq!(order.total_price(), Money::new(470_000));
    assert_eq!(navigator.visited().await, vec![payment_url.clone()]);
    assert!(HostedCheckout::new(gateway()).verify(&payment_url));
    assert!(!session.cart().await.is_empty());

    assert!(matches!(session.resume().await.unwrap(), Some(ResumeOutcome::AwaitingConfirmation(_))));

    server.orders.change_status(order.id(), OrderStatus::Confirmed, &Actor::PaymentGateway).await.unwrap();
    let outcome = session.resume().await.unwrap().unwrap();
    assert!(matches!(outcome, ResumeOutcome::Paid(ref o) if o.status() == OrderStatus::Confirmed));
    assert!(session.cart().await.is_empty());

    let history = customer.list_my_orders(&ListParams::default()).await.unwrap();
    assert_eq!(history.total, 1);
}

#[tokio::test]
async fn test_unconfigured_gateway_keeps_order_for_retry() {
    let server = spawn_server().await;
    let customer = Arc::new(HttpApi::new(server.base.clone()).with_customer("C3"));
    let session = checkout(customer.clone(), Arc::new(RecordingNavigator::new()));
    session.add_item(dish("COM", 90_000, 1)).await.unwrap();

    let err = session.submit(PaymentMethod::Momo, destination()).await.unwrap_err();
    let CheckoutError::Dispatch { order, .. } = err else { panic!("expected a dispatch error") };
    assert_eq!(session.unpaid_order().await.map(|o| o.id()), Some(order.id()));
    assert!(matches!(session.retry_payment().await, Err(CheckoutError::Dispatch { .. })));
    assert_eq!(server.store.order_count().await, 1);
    assert_eq!(customer.get_order(order.id()).await.unwrap().status(), OrderStatus::Pending);
}
