//! Runtime configuration read from the environment.

use std::str::FromStr;

use thiserror::Error;
use url::Url;

use crate::domain::aggregates::{PaymentProvider, TransitionPolicy};
use crate::domain::value_objects::Money;
use crate::pricing::{DiscountTier, PricingConfig};

const DEFAULT_PORT: u16 = 8083;
const DEFAULT_FREE_SHIPPING_THRESHOLD: i64 = 500_000;
const DEFAULT_DELIVERY_FEE: i64 = 30_000;
const DEFAULT_DISCOUNT_TIERS: &str = "500000:50000,300000:20000";
const DEFAULT_RETURN_URL: &str = "http://localhost:3000/checkout/return";
const DEFAULT_EVENT_SUBJECT: &str = "orders";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} has an invalid value `{value}`: {reason}")]
    Invalid { var: &'static str, value: String, reason: String },
    #[error("{var} is required when {other} is set")]
    Missing { var: &'static str, other: &'static str },
}

/// Hosted-checkout settings for one redirect provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayConfig {
    pub provider: PaymentProvider,
    pub endpoint: Url,
    pub merchant_id: String,
    pub secret: String,
    pub return_url: Url,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
    pub event_subject: String,
    pub pricing: PricingConfig,
    pub transition_policy: TransitionPolicy,
    pub gateways: Vec<GatewayConfig>,
}

impl Config {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let return_url = parse_url("PAYMENT_RETURN_URL", get("PAYMENT_RETURN_URL").as_deref().unwrap_or(DEFAULT_RETURN_URL))?;
        let mut gateways = vec![];
        for (provider, url_var, merchant_var, secret_var) in [
            (PaymentProvider::Vnpay, "VNPAY_URL", "VNPAY_MERCHANT", "VNPAY_SECRET"),
            (PaymentProvider::Momo, "MOMO_URL", "MOMO_MERCHANT", "MOMO_SECRET"),
        ] {
            let Some(endpoint) = get(url_var) else { continue };
            gateways.push(GatewayConfig {
                provider,
                endpoint: parse_url(url_var, &endpoint)?,
                merchant_id: get(merchant_var).ok_or(ConfigError::Missing { var: merchant_var, other: url_var })?,
                secret: get(secret_var).ok_or(ConfigError::Missing { var: secret_var, other: url_var })?,
                return_url: return_url.clone(),
            });
        }

        Ok(Self {
            port: parse_or("PORT", get("PORT"), DEFAULT_PORT)?,
            database_url: get("DATABASE_URL"),
            nats_url: get("NATS_URL"),
            event_subject: get("EVENT_SUBJECT").unwrap_or_else(|| DEFAULT_EVENT_SUBJECT.to_string()),
            pricing: PricingConfig::new(
                Money::new(parse_or("FREE_SHIPPING_THRESHOLD", get("FREE_SHIPPING_THRESHOLD"), DEFAULT_FREE_SHIPPING_THRESHOLD)?),
                Money::new(parse_or("DELIVERY_FEE", get("DELIVERY_FEE"), DEFAULT_DELIVERY_FEE)?),
                parse_tiers(get("DISCOUNT_TIERS").as_deref().unwrap_or(DEFAULT_DISCOUNT_TIERS))?,
            ),
            transition_policy: parse_or("ADMIN_TRANSITION_POLICY", get("ADMIN_TRANSITION_POLICY"), TransitionPolicy::ForwardOnly)?,
            gateways,
        })
    }
}

fn parse_or<T>(var: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid { var, reason: e.to_string(), value }),
        None => Ok(default),
    }
}

fn parse_url(var: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::Invalid { var, value: value.to_string(), reason: e.to_string() })
}

/// Parses `threshold:discount` pairs separated by commas.
pub fn parse_tiers(value: &str) -> Result<Vec<DiscountTier>, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid { var: "DISCOUNT_TIERS", value: value.to_string(), reason: reason.to_string() };
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (threshold, discount) = pair.split_once(':').ok_or_else(|| invalid("expected threshold:discount"))?;
            let threshold: i64 = threshold.trim().parse().map_err(|_| invalid("threshold is not an integer"))?;
            let discount: i64 = discount.trim().parse().map_err(|_| invalid("discount is not an integer"))?;
            if threshold < 0 || discount < 0 {
                return Err(invalid("amounts must not be negative"));
            }
            Ok(DiscountTier { threshold: Money::new(threshold), discount: Money::new(discount) })
        })
        .collect()
}
