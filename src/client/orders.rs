//! Order status requests from the customer and admin screens.
//!
//! The server decides every transition. These helpers only keep one request
//! of each kind in flight and hand back the server's view of the order.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::api::ListParams;
use crate::client::{ClientError, InFlight, StorefrontApi};
use crate::domain::aggregates::{Order, OrderStatus};
use crate::storage::PaginatedResponse;
use crate::FieldErrors;

pub struct OrderActions {
    api: Arc<dyn StorefrontApi>,
    cancelling: InFlight,
    updating: InFlight,
    deleting: InFlight,
}

impl OrderActions {
    pub fn new(api: Arc<dyn StorefrontApi>) -> Self {
        Self { api, cancelling: InFlight::new(), updating: InFlight::new(), deleting: InFlight::new() }
    }

    /// Fresh copy from the server. Use after returning from a gateway rather than a cached order.
    pub async fn refresh(&self, id: Uuid) -> Result<Order, ClientError> { self.api.get_order(id).await }

    pub async fn history(&self, params: &ListParams) -> Result<PaginatedResponse<Order>, ClientError> {
        self.api.list_my_orders(params).await
    }

    pub async fn list_all(&self, params: &ListParams) -> Result<PaginatedResponse<Order>, ClientError> {
        self.api.list_orders(params).await
    }

    /// Customer cancellation. Only pending orders can be cancelled.
    pub async fn cancel(&self, id: Uuid) -> Result<Order, ClientError> {
        let _guard = self.cancelling.try_begin().ok_or(ClientError::Busy)?;
        let order = self.api.cancel_order(id).await.map_err(|e| {
            warn!("Cancel of order {} rejected: {}", id, e);
            e
        })?;
        info!("Order {} cancelled", order.code());
        Ok(order)
    }

    pub async fn set_status(&self, id: Uuid, status: OrderStatus) -> Result<Order, ClientError> {
        let _guard = self.updating.try_begin().ok_or(ClientError::Busy)?;
        let order = self.api.update_order_status(id, status).await?;
        info!("Order {} is now {}", order.code(), order.status());
        Ok(order)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ClientError> {
        let _guard = self.deleting.try_begin().ok_or(ClientError::Busy)?;
        self.api.delete_order(id).await
    }

    /// Deletes all of `ids` or none of them.
    pub async fn bulk_delete(&self, ids: &[Uuid]) -> Result<usize, ClientError> {
        if ids.is_empty() {
            return Err(ClientError::Validation(FieldErrors::single("ids", "Select at least one order")));
        }
        let _guard = self.deleting.try_begin().ok_or(ClientError::Busy)?;
        let deleted = self.api.bulk_delete_orders(ids).await?;
        info!("Deleted {} orders", deleted);
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::client::fake::FakeApi;
    use crate::domain::aggregates::{NewOrder, PaymentMethod, TransitionError};
    use crate::pricing::PricingBreakdown;
    use crate::test_support::destination;

    async fn seeded(api: &FakeApi, status: OrderStatus) -> Uuid {
        let order = Order::place(NewOrder {
            customer_id: Some("C1".into()),
            items: vec![],
            breakdown: PricingBreakdown::default(),
            coupon_code: None,
            payment_method: PaymentMethod::Cod,
            destination: destination(),
        });
        let id = order.id();
        api.orders.lock().await.insert(id, order);
        if status != OrderStatus::Pending {
            api.set_status(id, status).await;
        }
        id
    }

    #[tokio::test]
    async fn test_cancel_shipping_order_is_rejected() {
        let api = Arc::new(FakeApi::default());
        let id = seeded(&api, OrderStatus::Shipping).await;
        let actions = OrderActions::new(api.clone());
        let err = actions.cancel(id).await.unwrap_err();
        assert_eq!(err, ClientError::Transition(TransitionError::NotCancellable { status: OrderStatus::Shipping }));
        assert_eq!(actions.refresh(id).await.unwrap().status(), OrderStatus::Shipping);
    }

    #[tokio::test]
    async fn test_second_cancel_while_in_flight_is_busy() {
        let api = Arc::new(FakeApi { delay: Some(Duration::from_millis(50)), ..FakeApi::default() });
        let id = seeded(&api, OrderStatus::Pending).await;
        let actions = Arc::new(OrderActions::new(api.clone()));
        let first = tokio::spawn({
            let actions = actions.clone();
            async move { actions.cancel(id).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(actions.cancel(id).await, Err(ClientError::Busy));
        assert_eq!(first.await.unwrap().unwrap().status(), OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_bulk_delete_is_all_or_nothing() {
        let api = Arc::new(FakeApi::default());
        let done = seeded(&api, OrderStatus::Delivered).await;
        let active = seeded(&api, OrderStatus::Confirmed).await;
        let actions = OrderActions::new(api.clone());

        assert!(matches!(actions.bulk_delete(&[]).await, Err(ClientError::Validation(_))));
        let err = actions.bulk_delete(&[done, active]).await.unwrap_err();
        assert_eq!(err, ClientError::Transition(TransitionError::NotDeletable { order_ids: vec![active] }));
        assert_eq!(api.orders.lock().await.len(), 2);

        actions.set_status(active, OrderStatus::Cancelled).await.unwrap();
        assert_eq!(actions.bulk_delete(&[done, active]).await, Ok(2));
    }
}
