//! Shared fixtures for unit tests.

use crate::domain::aggregates::{CartItem, Coupon, Destination};
use crate::domain::value_objects::{CouponCode, Money};

pub(crate) fn destination() -> Destination {
    Destination {
        recipient_name: "Nguyen Van A".into(),
        phone: "0912345678".into(),
        email: "a@example.com".into(),
        region: "Ho Chi Minh".into(),
        district: "Quan 1".into(),
        ward: "Ben Nghe".into(),
        detail: "12 Le Loi".into(),
    }
}

pub(crate) fn cart_item(product_id: &str, unit_price: i64, quantity: u32) -> CartItem {
    CartItem {
        product_id: product_id.into(),
        name: format!("Dish {product_id}"),
        image: Some(format!("https://cdn.example.com/{product_id}.jpg")),
        unit_price: Money::new(unit_price),
        quantity,
        stock_ceiling: 50,
    }
}

pub(crate) fn sale50() -> Coupon {
    Coupon {
        code: CouponCode::new("SALE50").unwrap(),
        discount_amount: Some(Money::new(50_000)),
        discount_percent: None,
        min_order_amount: Money::new(200_000),
        valid_from: None,
        valid_to: None,
        usage_limit: Some(100),
        used_count: 0,
    }
}
