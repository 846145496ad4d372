//! Cart pricing.
//!
//! A pure function of the items and the applied coupon. Callers re-run it after
//! every cart or coupon change; nothing here is cached.

use serde::{Deserialize, Serialize};

use crate::domain::aggregates::{Cart, OrderItem, ResolvedCoupon};
use crate::domain::value_objects::Money;

/// `total = subtotal + delivery_fee - discount`, with `0 <= discount <= subtotal`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingBreakdown {
    pub subtotal: Money,
    pub delivery_fee: Money,
    pub discount: Money,
    pub total: Money,
}

/// Discount granted by subtotal alone, no code required.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountTier {
    pub threshold: Money,
    pub discount: Money,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingConfig {
    pub free_shipping_threshold: Money,
    pub delivery_fee: Money,
    tiers: Vec<DiscountTier>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self::new(
            Money::new(500_000),
            Money::new(30_000),
            vec![
                DiscountTier { threshold: Money::new(500_000), discount: Money::new(50_000) },
                DiscountTier { threshold: Money::new(300_000), discount: Money::new(20_000) },
            ],
        )
    }
}

impl PricingConfig {
    pub fn new(free_shipping_threshold: Money, delivery_fee: Money, mut tiers: Vec<DiscountTier>) -> Self {
        tiers.sort_by(|a, b| b.threshold.cmp(&a.threshold));
        Self { free_shipping_threshold, delivery_fee, tiers }
    }

    /// Tiers, highest threshold first.
    pub fn tiers(&self) -> &[DiscountTier] { &self.tiers }
}

#[derive(Clone, Debug, Default)]
pub struct PricingCalculator {
    config: PricingConfig,
}

impl PricingCalculator {
    pub fn new(config: PricingConfig) -> Self { Self { config } }

    pub fn config(&self) -> &PricingConfig { &self.config }

    pub fn price_cart(&self, cart: &Cart, coupon: Option<&ResolvedCoupon>) -> PricingBreakdown {
        self.price_subtotal(cart.subtotal(), !cart.is_empty(), coupon)
    }

    pub fn price_items(&self, items: &[OrderItem], coupon: Option<&ResolvedCoupon>) -> PricingBreakdown {
        let subtotal = items.iter().map(OrderItem::line_total).sum();
        self.price_subtotal(subtotal, !items.is_empty(), coupon)
    }

    fn price_subtotal(&self, subtotal: Money, has_items: bool, coupon: Option<&ResolvedCoupon>) -> PricingBreakdown {
        if !has_items {
            return PricingBreakdown::default();
        }
        let delivery_fee = if subtotal >= self.config.free_shipping_threshold { Money::ZERO } else { self.config.delivery_fee };
        // An applied coupon replaces the automatic tier, even when it is worth less.
        let discount = match coupon {
            Some(coupon) => coupon.discount_for(subtotal),
            None => self.tier_discount(subtotal),
        }
        .clamp_to(Money::ZERO, subtotal);
        PricingBreakdown { subtotal, delivery_fee, discount, total: subtotal + delivery_fee - discount }
    }

    pub fn tier_discount(&self, subtotal: Money) -> Money {
        self.config.tiers.iter().find(|tier| subtotal >= tier.threshold).map_or(Money::ZERO, |tier| tier.discount)
    }
}
