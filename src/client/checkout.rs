//! Checkout session: the cart, its pricing and order submission.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use url::Url;
use validator::Validate;

use crate::client::payment::{DispatchError, PaymentDispatch, ResumeOutcome};
use crate::client::{ClientError, InFlight, StorefrontApi};
use crate::domain::aggregates::{Cart, CartError, CartItem, CouponError, Destination, Order, OrderItem, PaymentMethod, ResolvedCoupon};
use crate::pricing::{PricingBreakdown, PricingCalculator};
use crate::services::CreateOrderRequest;
use crate::FieldErrors;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckoutError {
    #[error("Please correct the highlighted fields: {0}")]
    Validation(FieldErrors),
    #[error(transparent)]
    Coupon(CouponError),
    /// No order was created; submitting again is safe.
    #[error("Could not place the order, please try again: {0}")]
    Submission(ClientError),
    /// The order exists but payment could not start. Retry with [`CheckoutSession::retry_payment`].
    #[error("Order {} was placed but payment could not start: {source}", .order.code())]
    Dispatch { order: Box<Order>, source: DispatchError },
    #[error("Could not check the earlier payment: {0}")]
    Payment(DispatchError),
    #[error("There is no placed order waiting for payment")]
    NothingToRetry,
    #[error("The order is already being submitted")]
    Busy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckoutOutcome {
    /// The order needs no further payment step and the cart is cleared: cash
    /// on delivery, or a gateway order that was paid before resubmitting.
    Placed(Order),
    /// The customer was sent to the gateway. Call [`CheckoutSession::resume`] on return.
    Redirected { order: Order, payment_url: Url },
}

impl CheckoutOutcome {
    pub fn order(&self) -> &Order {
        match self {
            Self::Placed(order) | Self::Redirected { order, .. } => order,
        }
    }
}

/// One customer's checkout.
///
/// Pricing is recomputed from the current cart and coupon on every read, so a
/// submission always carries the latest breakdown.
pub struct CheckoutSession {
    api: Arc<dyn StorefrontApi>,
    calculator: PricingCalculator,
    dispatch: PaymentDispatch,
    cart: Mutex<Cart>,
    coupon: Mutex<Option<ResolvedCoupon>>,
    /// Placed redirect order whose payment has not started yet.
    unpaid: Mutex<Option<Order>>,
    applying: InFlight,
    submitting: InFlight,
}

impl CheckoutSession {
    pub fn new(api: Arc<dyn StorefrontApi>, calculator: PricingCalculator, dispatch: PaymentDispatch) -> Self {
        Self {
            api,
            calculator,
            dispatch,
            cart: Mutex::new(Cart::new()),
            coupon: Mutex::new(None),
            unpaid: Mutex::new(None),
            applying: InFlight::new(),
            submitting: InFlight::new(),
        }
    }

    pub async fn cart(&self) -> Cart { self.cart.lock().await.clone() }
    pub async fn applied_coupon(&self) -> Option<ResolvedCoupon> { self.coupon.lock().await.clone() }
    pub async fn unpaid_order(&self) -> Option<Order> { self.unpaid.lock().await.clone() }
    pub fn is_submitting(&self) -> bool { self.submitting.is_active() }

    pub async fn pricing(&self) -> PricingBreakdown {
        let cart = self.cart.lock().await;
        let coupon = self.coupon.lock().await;
        self.calculator.price_cart(&cart, coupon.as_ref())
    }

    // =========================================================================
    // Cart
    // =========================================================================

    pub async fn add_item(&self, item: CartItem) -> Result<PricingBreakdown, CartError> {
        self.cart.lock().await.add_item(item)?;
        Ok(self.after_cart_change().await)
    }

    pub async fn increment(&self, product_id: &str) -> Result<PricingBreakdown, CartError> {
        self.cart.lock().await.increment(product_id)?;
        Ok(self.after_cart_change().await)
    }

    /// Dropping below one removes the line.
    pub async fn decrement(&self, product_id: &str) -> Result<PricingBreakdown, CartError> {
        self.cart.lock().await.decrement(product_id)?;
        Ok(self.after_cart_change().await)
    }

    pub async fn remove_item(&self, product_id: &str) -> Result<PricingBreakdown, CartError> {
        self.cart.lock().await.remove_item(product_id)?;
        Ok(self.after_cart_change().await)
    }

    /// Empties the cart. A placed order waiting for payment is no longer retried.
    pub async fn clear_cart(&self) {
        self.cart.lock().await.clear();
        self.coupon.lock().await.take();
        self.unpaid.lock().await.take();
    }

    /// Drops a coupon whose minimum the cart no longer meets.
    async fn after_cart_change(&self) -> PricingBreakdown {
        let cart = self.cart.lock().await;
        let mut coupon = self.coupon.lock().await;
        if let Some(applied) = coupon.as_ref() {
            if !applied.applies_to(cart.subtotal()) {
                info!("Coupon {} dropped: subtotal {} is below {}", applied.code, cart.subtotal(), applied.min_order_amount);
                coupon.take();
            }
        }
        self.calculator.price_cart(&cart, coupon.as_ref())
    }

    // =========================================================================
    // Coupons
    // =========================================================================

    /// Asks the server to resolve `code` for the current subtotal.
    ///
    /// On rejection the previous pricing stays in place.
    pub async fn apply_coupon(&self, code: &str) -> Result<ResolvedCoupon, ClientError> {
        let _guard = self.applying.try_begin().ok_or(ClientError::Busy)?;
        if code.trim().is_empty() {
            return Err(ClientError::Validation(FieldErrors::single("couponCode", "Enter a coupon code")));
        }
        let subtotal = self.cart.lock().await.subtotal();
        let resolved = self.api.apply_coupon(code, subtotal).await?;
        // The cart may have changed while the request was out.
        let cart = self.cart.lock().await;
        if !resolved.applies_to(cart.subtotal()) {
            return Err(ClientError::Coupon(CouponError::MinOrderNotMet {
                code: resolved.code.to_string(),
                min_order_amount: resolved.min_order_amount,
            }));
        }
        *self.coupon.lock().await = Some(resolved.clone());
        Ok(resolved)
    }

    /// Back to the automatic tier discount.
    pub async fn remove_coupon(&self) {
        self.coupon.lock().await.take();
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Places the order and starts payment.
    ///
    /// A second call while one is running returns [`CheckoutError::Busy`]
    /// without contacting the server. A redirect the customer never resumed is
    /// settled first. A placed order still waiting for payment is dispatched
    /// again when the cart, coupon, method and destination are unchanged, and
    /// cancelled otherwise before the new order is placed.
    #[instrument(skip(self, destination))]
    pub async fn submit(&self, payment_method: PaymentMethod, destination: Destination) -> Result<CheckoutOutcome, CheckoutError> {
        let _guard = self.submitting.try_begin().ok_or(CheckoutError::Busy)?;
        if let Some(paid) = self.settle_redirect().await? {
            return Ok(CheckoutOutcome::Placed(paid));
        }

        let request = self.build_request(payment_method, destination).await?;
        let unpaid = self.unpaid.lock().await.clone();
        if let Some(order) = unpaid {
            if same_checkout(&order, &request) {
                info!("Order {} is unchanged; dispatching it again", order.code());
                return self.start_payment(order).await;
            }
            self.discard(&order).await?;
        }

        let order = self.api.create_order(&request).await.map_err(|e| match e {
            ClientError::Validation(fields) => CheckoutError::Validation(fields),
            ClientError::Coupon(coupon) => CheckoutError::Coupon(coupon),
            other => {
                warn!("Order submission failed: {}", other);
                CheckoutError::Submission(other)
            }
        });
        let order = match order {
            Ok(order) => order,
            Err(CheckoutError::Coupon(e)) => {
                self.coupon.lock().await.take();
                return Err(CheckoutError::Coupon(e));
            }
            Err(e) => return Err(e),
        };
        info!("Order {} placed for {}", order.code(), order.total_price());

        if order.payment_method().provider().is_none() {
            self.clear_cart().await;
            return Ok(CheckoutOutcome::Placed(order));
        }
        self.start_payment(order).await
    }

    /// Cancels the placed order waiting for payment so the next submission starts over.
    pub async fn abandon_payment(&self) -> Result<Order, CheckoutError> {
        let _guard = self.submitting.try_begin().ok_or(CheckoutError::Busy)?;
        if self.settle_redirect().await?.is_some() {
            return Err(CheckoutError::NothingToRetry);
        }
        let order = self.unpaid.lock().await.clone().ok_or(CheckoutError::NothingToRetry)?;
        self.discard(&order).await?;
        Ok(order)
    }

    /// Dispatches the placed order again after a failed payment start.
    pub async fn retry_payment(&self) -> Result<CheckoutOutcome, CheckoutError> {
        let _guard = self.submitting.try_begin().ok_or(CheckoutError::Busy)?;
        let order = self.unpaid.lock().await.clone().ok_or(CheckoutError::NothingToRetry)?;
        self.start_payment(order).await
    }

    /// Settles a checkout after the gateway sends the customer back.
    ///
    /// A paid order clears the cart. An order still awaiting confirmation can
    /// be dispatched again with [`CheckoutSession::retry_payment`].
    pub async fn resume(&self) -> Result<Option<ResumeOutcome>, DispatchError> {
        let outcome = self.dispatch.resume().await?;
        match &outcome {
            Some(ResumeOutcome::Paid(_)) => self.clear_cart().await,
            Some(ResumeOutcome::Failed(_)) => {
                self.unpaid.lock().await.take();
            }
            Some(ResumeOutcome::AwaitingConfirmation(order)) => {
                *self.unpaid.lock().await = Some(order.clone());
            }
            None => {}
        }
        Ok(outcome)
    }

    /// Resumes a redirect left pending. Returns the order if it was paid meanwhile.
    async fn settle_redirect(&self) -> Result<Option<Order>, CheckoutError> {
        if self.dispatch.pending().await.map_err(CheckoutError::Payment)?.is_none() {
            return Ok(None);
        }
        match self.resume().await.map_err(CheckoutError::Payment)? {
            Some(ResumeOutcome::Paid(order)) => Ok(Some(order)),
            _ => Ok(None),
        }
    }

    /// Cancels an order placed for an earlier version of this checkout.
    async fn discard(&self, order: &Order) -> Result<(), CheckoutError> {
        match self.api.cancel_order(order.id()).await {
            Ok(_) | Err(ClientError::NotFound(_)) => {}
            Err(e) => {
                warn!("Could not cancel superseded order {}: {}", order.code(), e);
                return Err(CheckoutError::Submission(e));
            }
        }
        self.unpaid.lock().await.take();
        self.dispatch.forget(order.id()).await.map_err(CheckoutError::Payment)?;
        info!("Order {} cancelled in favour of a new submission", order.code());
        Ok(())
    }

    async fn build_request(&self, payment_method: PaymentMethod, destination: Destination) -> Result<CreateOrderRequest, CheckoutError> {
        let cart = self.cart.lock().await;
        let coupon = self.coupon.lock().await;

        let mut errors = FieldErrors::new();
        if cart.is_empty() {
            errors.add("items", "Your cart is empty");
        }
        if let Err(e) = destination.validate() {
            errors.merge(e.into());
        }
        errors.into_result().map_err(CheckoutError::Validation)?;

        let breakdown = self.calculator.price_cart(&cart, coupon.as_ref());
        Ok(CreateOrderRequest {
            items: cart.items().iter().map(OrderItem::from).collect(),
            subtotal: breakdown.subtotal,
            delivery_fee: breakdown.delivery_fee,
            discount_amount: breakdown.discount,
            coupon_code: coupon.as_ref().map(|c| c.code.to_string()),
            total_price: breakdown.total,
            payment_method,
            destination,
        })
    }

    async fn start_payment(&self, order: Order) -> Result<CheckoutOutcome, CheckoutError> {
        match self.dispatch.dispatch(&order).await {
            Ok(payment_url) => {
                self.unpaid.lock().await.take();
                Ok(CheckoutOutcome::Redirected { order, payment_url })
            }
            Err(source) => {
                *self.unpaid.lock().await = Some(order.clone());
                Err(CheckoutError::Dispatch { order: Box::new(order), source })
            }
        }
    }
}

fn same_checkout(order: &Order, request: &CreateOrderRequest) -> bool {
    order.payment_method() == request.payment_method
        && order.items() == request.items.as_slice()
        && order.total_price() == request.total_price
        && order.coupon_code().map(|c| c.as_str()) == request.coupon_code.as_deref()
        && order.destination() == &request.destination
}
