//! Order engine server.

use std::sync::Arc;

use anyhow::Result;
use order_engine::api::{self, AppState};
use order_engine::config::Config;
use order_engine::services::{CouponResolver, EventPublisher, NatsPublisher, OrderService, PaymentService, TracingPublisher};
use order_engine::storage::{CouponRepository, MemoryStore, OrderRepository, PgStore};
use order_engine::PricingCalculator;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    let config = Config::from_env()?;

    let (orders, coupons) = match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url).await?;
            store.migrate().await?;
            repositories(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; orders are kept in memory");
            repositories(Arc::new(MemoryStore::new()))
        }
    };
    let publisher: Arc<dyn EventPublisher> = match &config.nats_url {
        Some(url) => Arc::new(NatsPublisher::new(async_nats::connect(url).await?, config.event_subject.clone())),
        None => Arc::new(TracingPublisher),
    };

    let order_service = OrderService::new(
        orders.clone(),
        CouponResolver::new(coupons),
        PricingCalculator::new(config.pricing.clone()),
        config.transition_policy,
        publisher,
    );
    let payments = PaymentService::from_config(orders, &config.gateways);
    let app = api::router(AppState::new(order_service, payments));

    tracing::info!(
        "Order engine listening on 0.0.0.0:{} (policy {:?}, gateways {:?})",
        config.port,
        config.transition_policy,
        config.gateways.iter().map(|g| g.provider).collect::<Vec<_>>()
    );
    axum::serve(tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?, app).await?;
    Ok(())
}

fn repositories<S>(store: Arc<S>) -> (Arc<dyn OrderRepository>, Arc<dyn CouponRepository>)
where
    S: OrderRepository + CouponRepository + 'static,
{
    (store.clone(), store)
}
