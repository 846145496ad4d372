//! Aggregates module
pub mod cart;
pub mod coupon;
pub mod order;

pub use cart::{Cart, CartError, CartItem};
pub use coupon::{Coupon, CouponError, DiscountRule, ResolvedCoupon};
pub use order::{
    Actor, ActorKind, Destination, NewOrder, Order, OrderItem, OrderParts, OrderStatus, PaymentMethod,
    PaymentProvider, TransitionError, TransitionPolicy, UnknownVariant,
};
