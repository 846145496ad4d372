//! Order lifecycle and pricing engine for a food-ordering storefront.
//!
//! Turns a mutable cart into an immutable priced order and governs it afterwards.
//!
//! ## Features
//! - Cart pricing with automatic tier discounts and free shipping
//! - Server-authoritative coupon resolution
//! - Checkout with cash-on-delivery or redirect payment gateways
//! - Order status state machine with customer and admin permissions
//! - HTTP service (axum) and a storefront client (reqwest)

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod api;
pub mod client;
pub mod config;
pub mod domain;
pub mod pricing;
pub mod services;
pub mod storage;

#[cfg(test)]
mod test_support;

pub use domain::aggregates::{
    Actor, Cart, CartItem, Coupon, CouponError, Destination, Order, OrderItem, OrderStatus, PaymentMethod,
    PaymentProvider, ResolvedCoupon, TransitionError, TransitionPolicy,
};
pub use domain::value_objects::{CouponCode, Money};
pub use pricing::{PricingBreakdown, PricingCalculator, PricingConfig};

// =============================================================================
// Field Errors
// =============================================================================

/// Field-level validation messages, keyed by the camelCase field name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self { Self::default() }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn merge(&mut self, other: FieldErrors) {
        for (field, messages) in other.0 {
            self.0.entry(field).or_default().extend(messages);
        }
    }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn get(&self, field: &str) -> Option<&[String]> { self.0.get(field).map(Vec::as_slice) }
    pub fn contains(&self, field: &str) -> bool { self.0.contains_key(field) }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> { self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice())) }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> std::result::Result<(), FieldErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl From<validator::ValidationErrors> for FieldErrors {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields = Self::new();
        for (field, errs) in errors.field_errors() {
            for err in errs {
                let message = err.message.as_ref().map_or_else(|| format!("{} is invalid", camel_case(field)), ToString::to_string);
                fields.add(camel_case(field), message);
            }
        }
        fields
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(field, messages)| format!("{field}: {}", messages.join(", "))).collect();
        f.write_str(&parts.join("; "))
    }
}

fn camel_case(snake: &str) -> String {
    let mut out = String::with_capacity(snake.len());
    let mut upper = false;
    for c in snake.chars() {
        if c == '_' { upper = true; continue; }
        if upper { out.extend(c.to_uppercase()); upper = false; } else { out.push(c); }
    }
    out
}

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error(transparent)]
    Coupon(#[from] CouponError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Order {0} not found")]
    OrderNotFound(Uuid),

    #[error("Payment not possible: {0}")]
    Payment(String),

    #[error("Payment provider {0} is not configured")]
    GatewayUnavailable(PaymentProvider),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl From<FieldErrors> for EngineError {
    fn from(errors: FieldErrors) -> Self { Self::Validation(errors) }
}

impl From<validator::ValidationErrors> for EngineError {
    fn from(errors: validator::ValidationErrors) -> Self { Self::Validation(errors.into()) }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self { Self::StorageError(err.to_string()) }
}

pub type Result<T> = std::result::Result<T, EngineError>;
