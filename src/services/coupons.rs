//! Server-side coupon resolution.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::domain::aggregates::{CouponError, ResolvedCoupon};
use crate::domain::value_objects::{CouponCode, Money};
use crate::storage::CouponRepository;
use crate::Result;

#[derive(Clone)]
pub struct CouponResolver {
    coupons: Arc<dyn CouponRepository>,
}

impl CouponResolver {
    pub fn new(coupons: Arc<dyn CouponRepository>) -> Self { Self { coupons } }

    /// Resolves `code` against `subtotal`. Applying never consumes a use.
    pub async fn resolve(&self, code: &str, subtotal: Money) -> Result<ResolvedCoupon> {
        self.resolve_at(code, subtotal, Utc::now()).await
    }

    #[instrument(skip(self, subtotal), fields(subtotal = subtotal.amount()))]
    pub async fn resolve_at(&self, code: &str, subtotal: Money, now: DateTime<Utc>) -> Result<ResolvedCoupon> {
        let not_found = || CouponError::NotFound { code: code.trim().to_string() };
        let code = CouponCode::new(code).map_err(|_| not_found())?;
        let coupon = self.coupons.find_by_code(&code).await?.ok_or_else(not_found)?;
        match coupon.check(now, subtotal) {
            Ok(resolved) => {
                info!("Coupon {} resolved to a discount of {}", resolved.code, resolved.discount);
                Ok(resolved)
            }
            Err(e) => {
                warn!("Coupon {} rejected: {}", code, e);
                Err(e.into())
            }
        }
    }

    /// Counts one use of `code`; called once the order carrying it is accepted for fulfilment.
    pub async fn redeem(&self, code: &CouponCode) -> Result<()> {
        self.coupons.record_redemption(code).await?;
        info!("Coupon {} redeemed", code);
        Ok(())
    }
}
