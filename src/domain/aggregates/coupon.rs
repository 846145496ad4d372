//! Coupon Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{CouponCode, Money};

/// A coupon as stored by the administration side. The engine only reads it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub code: CouponCode,
    pub discount_amount: Option<Money>,
    pub discount_percent: Option<u8>,
    pub min_order_amount: Money,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub usage_limit: Option<u32>,
    #[serde(default)]
    pub used_count: u32,
}

/// The effective discount of a coupon. A fixed amount wins over a percentage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DiscountRule {
    Fixed(Money),
    Percent(u8),
    Nothing,
}

impl DiscountRule {
    /// Discount for `subtotal`, always within `[0, subtotal]`.
    pub fn discount_for(self, subtotal: Money) -> Money {
        let raw = match self {
            Self::Fixed(amount) => amount,
            Self::Percent(percent) => subtotal.percent(percent),
            Self::Nothing => Money::ZERO,
        };
        raw.clamp_to(Money::ZERO, subtotal)
    }
}

impl Coupon {
    pub fn rule(&self) -> DiscountRule {
        match (self.discount_amount, self.discount_percent) {
            (Some(amount), _) => DiscountRule::Fixed(amount),
            (None, Some(percent)) => DiscountRule::Percent(percent.min(100)),
            (None, None) => DiscountRule::Nothing,
        }
    }

    pub fn remaining_uses(&self) -> Option<u32> {
        self.usage_limit.map(|limit| limit.saturating_sub(self.used_count))
    }

    /// Checks the validity window, remaining uses and minimum order, in that order.
    pub fn check(&self, now: DateTime<Utc>, subtotal: Money) -> Result<ResolvedCoupon, CouponError> {
        let opened = self.valid_from.map_or(true, |from| now >= from);
        let not_closed = self.valid_to.map_or(true, |to| now <= to);
        if !(opened && not_closed) {
            return Err(CouponError::Expired { code: self.code.to_string() });
        }
        if self.remaining_uses() == Some(0) {
            return Err(CouponError::UsageExhausted { code: self.code.to_string() });
        }
        if subtotal < self.min_order_amount {
            return Err(CouponError::MinOrderNotMet { code: self.code.to_string(), min_order_amount: self.min_order_amount });
        }
        let rule = self.rule();
        Ok(ResolvedCoupon {
            code: self.code.clone(),
            rule,
            discount: rule.discount_for(subtotal),
            min_order_amount: self.min_order_amount,
        })
    }
}

/// Server-resolved coupon. This is the only discount source the client trusts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedCoupon {
    pub code: CouponCode,
    pub rule: DiscountRule,
    /// Discount computed against the subtotal the coupon was resolved for.
    pub discount: Money,
    pub min_order_amount: Money,
}

impl ResolvedCoupon {
    pub fn applies_to(&self, subtotal: Money) -> bool { subtotal >= self.min_order_amount }
    pub fn discount_for(&self, subtotal: Money) -> Money { self.rule.discount_for(subtotal) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CouponError {
    #[error("Coupon {code} does not exist")]
    NotFound { code: String },
    #[error("Coupon {code} is not valid at this time")]
    Expired { code: String },
    #[error("Coupon {code} has no uses left")]
    UsageExhausted { code: String },
    #[error("Coupon {code} requires a minimum order of {min_order_amount}")]
    #[serde(rename_all = "camelCase")]
    MinOrderNotMet { code: String, min_order_amount: Money },
}
