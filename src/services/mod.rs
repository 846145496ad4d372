//! Application services: the server-side authority over coupons, orders and payment sessions.

pub mod coupons;
pub mod notifier;
pub mod orders;
pub mod payments;

pub use coupons::CouponResolver;
pub use notifier::{EventPublisher, MemoryPublisher, NatsPublisher, PublishError, TracingPublisher};
pub use orders::{CreateOrderRequest, OrderService};
pub use payments::{HostedCheckout, PaymentGateway, PaymentService, PaymentSession, PaymentSessionRequest};
