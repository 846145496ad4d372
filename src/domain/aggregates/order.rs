//! Order Aggregate
//!
//! An order is an immutable priced snapshot of a cart. After placement only its
//! status changes, and only through the transition rules below.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::domain::aggregates::cart::CartItem;
use crate::domain::events::OrderEvent;
use crate::domain::value_objects::{CouponCode, Money};
use crate::pricing::PricingBreakdown;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus { #[default] Pending, Confirmed, Shipping, Delivered, Cancelled }

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [Self::Pending, Self::Confirmed, Self::Shipping, Self::Delivered, Self::Cancelled];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Shipping => "shipping",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool { matches!(self, Self::Delivered | Self::Cancelled) }

    /// Accepted for fulfilment: confirmed or any later happy-path status.
    pub fn is_accepted(self) -> bool { matches!(self, Self::Confirmed | Self::Shipping | Self::Delivered) }

    /// Position on the happy path. Cancelled sits outside it.
    fn rank(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Confirmed => Some(1),
            Self::Shipping => Some(2),
            Self::Delivered => Some(3),
            Self::Cancelled => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|status| status.as_str().eq_ignore_ascii_case(s.trim())).ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "COD")]
    Cod,
    #[serde(rename = "VNPAY")]
    Vnpay,
    #[serde(rename = "MOMO")]
    Momo,
}

/// Redirect-based payment providers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider { Vnpay, Momo }

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self { Self::Cod => "COD", Self::Vnpay => "VNPAY", Self::Momo => "MOMO" }
    }

    pub fn provider(self) -> Option<PaymentProvider> {
        match self {
            Self::Cod => None,
            Self::Vnpay => Some(PaymentProvider::Vnpay),
            Self::Momo => Some(PaymentProvider::Momo),
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for PaymentMethod {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Cod, Self::Vnpay, Self::Momo].into_iter().find(|m| m.as_str().eq_ignore_ascii_case(s.trim())).ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

impl PaymentProvider {
    pub fn as_str(self) -> &'static str {
        match self { Self::Vnpay => "vnpay", Self::Momo => "momo" }
    }
    pub fn method(self) -> PaymentMethod {
        match self { Self::Vnpay => PaymentMethod::Vnpay, Self::Momo => PaymentMethod::Momo }
    }
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for PaymentProvider {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vnpay" => Ok(Self::Vnpay),
            "momo" => Ok(Self::Momo),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown value `{0}`")]
pub struct UnknownVariant(pub String);

/// Shipping destination entered at checkout.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    #[validate(custom = "not_blank")]
    pub recipient_name: String,
    #[validate(custom = "valid_phone")]
    pub phone: String,
    #[validate(email(message = "Email address is invalid"))]
    pub email: String,
    #[validate(custom = "not_blank")]
    pub region: String,
    #[validate(custom = "not_blank")]
    pub district: String,
    #[validate(custom = "not_blank")]
    pub ward: String,
    #[validate(custom = "not_blank")]
    pub detail: String,
}

pub const PHONE_DIGITS: usize = 10;

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if !value.trim().is_empty() { return Ok(()); }
    let mut err = ValidationError::new("required");
    err.message = Some(Cow::from("This field is required"));
    Err(err)
}

fn valid_phone(value: &str) -> Result<(), ValidationError> {
    let value = value.trim();
    if value.len() == PHONE_DIGITS && value.starts_with('0') && value.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(());
    }
    let mut err = ValidationError::new("phone");
    err.message = Some(Cow::from(format!("Phone number must be {PHONE_DIGITS} digits starting with 0")));
    Err(err)
}

/// Line snapshot, decoupled from the live product.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub product_name: String,
    pub product_image: Option<String>,
    pub quantity: u32,
    pub price: Money,
}

impl OrderItem {
    pub fn line_total(&self) -> Money { self.price.multiply(self.quantity) }
}

impl From<&CartItem> for OrderItem {
    fn from(item: &CartItem) -> Self {
        Self {
            product_id: item.product_id.clone(),
            product_name: item.name.clone(),
            product_image: item.image.clone(),
            quantity: item.quantity,
            price: item.unit_price,
        }
    }
}

/// Who is asking for a state change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Actor {
    Customer { customer_id: String },
    Admin,
    /// Payment callback collaborator; follows the admin rules.
    PaymentGateway,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind { Customer, Admin, PaymentGateway }

impl Actor {
    pub fn customer(customer_id: impl Into<String>) -> Self { Self::Customer { customer_id: customer_id.into() } }

    pub fn kind(&self) -> ActorKind {
        match self {
            Self::Customer { .. } => ActorKind::Customer,
            Self::Admin => ActorKind::Admin,
            Self::PaymentGateway => ActorKind::PaymentGateway,
        }
    }
}

/// How far admins and the payment gateway may move an order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// Forward along the happy path, or cancel while active. Terminal states are frozen.
    #[default]
    ForwardOnly,
    /// Any of the five statuses may be set directly.
    Unrestricted,
}

impl FromStr for TransitionPolicy {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward_only" | "forward-only" => Ok(Self::ForwardOnly),
            "unrestricted" | "free" => Ok(Self::Unrestricted),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TransitionError {
    #[error("Customers may only cancel orders, not move them to {to}")]
    NotPermitted { from: OrderStatus, to: OrderStatus },
    #[error("Only pending orders can be cancelled; this order is {status}")]
    NotCancellable { status: OrderStatus },
    #[error("This order belongs to another customer")]
    NotOwner,
    #[error("Order is already {status} and can no longer change")]
    Terminal { status: OrderStatus },
    #[error("Order cannot move back from {from} to {to}")]
    Regression { from: OrderStatus, to: OrderStatus },
    #[error("Only cancelled or delivered orders can be deleted")]
    #[serde(rename_all = "camelCase")]
    NotDeletable { order_ids: Vec<Uuid> },
    #[error("Order was changed by someone else; reload and try again")]
    #[serde(rename_all = "camelCase")]
    Conflict { order_id: Uuid },
}

/// Everything needed to place an order.
#[derive(Clone, Debug)]
pub struct NewOrder {
    pub customer_id: Option<String>,
    pub items: Vec<OrderItem>,
    pub breakdown: PricingBreakdown,
    pub coupon_code: Option<CouponCode>,
    pub payment_method: PaymentMethod,
    pub destination: Destination,
}

/// Stored shape of an order, used to rebuild the aggregate from storage.
#[derive(Clone, Debug)]
pub struct OrderParts {
    pub id: Uuid,
    pub code: String,
    pub customer_id: Option<String>,
    pub items: Vec<OrderItem>,
    pub subtotal: Money,
    pub delivery_fee: Money,
    pub discount_amount: Money,
    pub coupon_code: Option<CouponCode>,
    pub total_price: Money,
    pub payment_method: PaymentMethod,
    pub status: OrderStatus,
    pub destination: Destination,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    id: Uuid,
    code: String,
    customer_id: Option<String>,
    items: Vec<OrderItem>,
    subtotal: Money,
    delivery_fee: Money,
    discount_amount: Money,
    coupon_code: Option<CouponCode>,
    total_price: Money,
    payment_method: PaymentMethod,
    status: OrderStatus,
    destination: Destination,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<OrderEvent>,
}

impl Order {
    pub fn place(new: NewOrder) -> Self {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let mut order = Self {
            id,
            code: order_code(id),
            customer_id: new.customer_id,
            items: new.items,
            subtotal: new.breakdown.subtotal,
            delivery_fee: new.breakdown.delivery_fee,
            discount_amount: new.breakdown.discount,
            coupon_code: new.coupon_code,
            total_price: new.breakdown.total,
            payment_method: new.payment_method,
            status: OrderStatus::Pending,
            destination: new.destination,
            created_at: now,
            updated_at: now,
            events: vec![],
        };
        order.raise_event(OrderEvent::Placed { order_id: id, code: order.code.clone(), customer_id: order.customer_id.clone(), total: order.total_price });
        order
    }

    pub fn rehydrate(parts: OrderParts) -> Self {
        Self {
            id: parts.id,
            code: parts.code,
            customer_id: parts.customer_id,
            items: parts.items,
            subtotal: parts.subtotal,
            delivery_fee: parts.delivery_fee,
            discount_amount: parts.discount_amount,
            coupon_code: parts.coupon_code,
            total_price: parts.total_price,
            payment_method: parts.payment_method,
            status: parts.status,
            destination: parts.destination,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
            events: vec![],
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn code(&self) -> &str { &self.code }
    pub fn customer_id(&self) -> Option<&str> { self.customer_id.as_deref() }
    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn subtotal(&self) -> Money { self.subtotal }
    pub fn delivery_fee(&self) -> Money { self.delivery_fee }
    pub fn discount_amount(&self) -> Money { self.discount_amount }
    pub fn coupon_code(&self) -> Option<&CouponCode> { self.coupon_code.as_ref() }
    pub fn total_price(&self) -> Money { self.total_price }
    pub fn payment_method(&self) -> PaymentMethod { self.payment_method }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn destination(&self) -> &Destination { &self.destination }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn is_owned_by(&self, customer_id: &str) -> bool { self.customer_id.as_deref() == Some(customer_id) }

    /// Applies a status change requested by `actor`.
    ///
    /// Returns `Ok(false)` when the order already has `next`; nothing changes
    /// and no event is raised.
    pub fn request_status(&mut self, next: OrderStatus, actor: &Actor, policy: TransitionPolicy) -> Result<bool, TransitionError> {
        match actor {
            Actor::Customer { customer_id } => {
                if !self.is_owned_by(customer_id) { return Err(TransitionError::NotOwner); }
                if next != OrderStatus::Cancelled {
                    return Err(TransitionError::NotPermitted { from: self.status, to: next });
                }
                if self.status != OrderStatus::Pending {
                    return Err(TransitionError::NotCancellable { status: self.status });
                }
            }
            Actor::Admin | Actor::PaymentGateway => {
                if next == self.status { return Ok(false); }
                check_privileged(self.status, next, policy)?;
            }
        }
        let from = self.status;
        self.status = next;
        self.touch();
        self.raise_event(OrderEvent::StatusChanged {
            order_id: self.id,
            code: self.code.clone(),
            customer_id: self.customer_id.clone(),
            from,
            to: next,
            actor: actor.kind(),
        });
        Ok(true)
    }

    pub fn cancel(&mut self, actor: &Actor, policy: TransitionPolicy) -> Result<bool, TransitionError> {
        self.request_status(OrderStatus::Cancelled, actor, policy)
    }

    pub fn is_deletable(&self) -> bool { self.status.is_terminal() }

    pub fn ensure_deletable(&self) -> Result<(), TransitionError> {
        if self.is_deletable() { return Ok(()); }
        Err(TransitionError::NotDeletable { order_ids: vec![self.id] })
    }

    pub fn deleted_event(&self) -> OrderEvent {
        OrderEvent::Deleted { order_id: self.id, code: self.code.clone(), customer_id: self.customer_id.clone() }
    }

    pub fn take_events(&mut self) -> Vec<OrderEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: OrderEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

fn check_privileged(from: OrderStatus, to: OrderStatus, policy: TransitionPolicy) -> Result<(), TransitionError> {
    if policy == TransitionPolicy::Unrestricted { return Ok(()); }
    if from.is_terminal() { return Err(TransitionError::Terminal { status: from }); }
    match (from.rank(), to.rank()) {
        (_, None) => Ok(()),
        (Some(a), Some(b)) if b > a => Ok(()),
        _ => Err(TransitionError::Regression { from, to }),
    }
}

fn order_code(id: Uuid) -> String {
    // v7 ids end in random bits; the date prefix keeps codes readable.
    let tail = (id.as_u128() & 0xFFFF_FFFF) as u32;
    format!("ORD{}{:08X}", Utc::now().format("%y%m%d"), tail)
}
