//! reqwest transport for [`StorefrontApi`].

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::api::{ApplyCouponRequest, BulkDeleteRequest, BulkDeleteResponse, ErrorBody, ListParams, UpdateStatusRequest, CUSTOMER_HEADER};
use crate::client::{ClientError, StorefrontApi};
use crate::domain::aggregates::{Order, OrderStatus, PaymentProvider, ResolvedCoupon};
use crate::domain::value_objects::Money;
use crate::services::{CreateOrderRequest, PaymentSession, PaymentSessionRequest};
use crate::storage::PaginatedResponse;

#[derive(Clone, Debug)]
pub struct HttpApi {
    client: reqwest::Client,
    base: Url,
    customer_id: Option<String>,
}

impl HttpApi {
    pub fn new(mut base: Url) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { client: reqwest::Client::new(), base, customer_id: None }
    }

    /// Sends `x-customer-id` on every request.
    pub fn with_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
        let url = self.base.join(path).map_err(|e| ClientError::Transport(format!("invalid url {path}: {e}")))?;
        debug!("{} {}", method, url);
        let builder = self.client.request(method, url);
        Ok(match &self.customer_id {
            Some(id) => builder.header(CUSTOMER_HEADER, id),
            None => builder,
        })
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ClientError> {
        let response = checked(builder.send().await?).await?;
        Ok(response.json().await?)
    }
}

/// Turns an error status into the matching [`ClientError`].
async fn checked(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let Ok(body) = serde_json::from_str::<ErrorBody>(&text) else {
        return Err(ClientError::Rejected { status: status.as_u16(), message: text });
    };
    Err(match body {
        ErrorBody { fields: Some(fields), .. } => ClientError::Validation(fields),
        ErrorBody { coupon: Some(coupon), .. } => ClientError::Coupon(coupon),
        ErrorBody { transition: Some(transition), .. } => ClientError::Transition(transition),
        ErrorBody { message, .. } if status == StatusCode::NOT_FOUND => ClientError::NotFound(message),
        ErrorBody { message, .. } => ClientError::Rejected { status: status.as_u16(), message },
    })
}

#[async_trait]
impl StorefrontApi for HttpApi {
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<Order, ClientError> {
        self.send(self.request(Method::POST, "api/v1/orders")?.json(request)).await
    }

    async fn apply_coupon(&self, code: &str, subtotal: Money) -> Result<ResolvedCoupon, ClientError> {
        let body = ApplyCouponRequest { code: code.to_string(), subtotal };
        self.send(self.request(Method::POST, "api/v1/coupons/apply")?.json(&body)).await
    }

    async fn create_payment_session(&self, provider: PaymentProvider, request: &PaymentSessionRequest) -> Result<PaymentSession, ClientError> {
        let path = format!("api/v1/payments/{provider}/session");
        self.send(self.request(Method::POST, &path)?.json(request)).await
    }

    async fn get_order(&self, id: Uuid) -> Result<Order, ClientError> {
        self.send(self.request(Method::GET, &format!("api/v1/orders/{id}"))?).await
    }

    async fn list_my_orders(&self, params: &ListParams) -> Result<PaginatedResponse<Order>, ClientError> {
        self.send(self.request(Method::GET, "api/v1/orders")?.query(params)).await
    }

    async fn cancel_order(&self, id: Uuid) -> Result<Order, ClientError> {
        self.send(self.request(Method::POST, &format!("api/v1/orders/{id}/cancel"))?).await
    }

    async fn list_orders(&self, params: &ListParams) -> Result<PaginatedResponse<Order>, ClientError> {
        self.send(self.request(Method::GET, "api/v1/admin/orders")?.query(params)).await
    }

    async fn update_order_status(&self, id: Uuid, status: OrderStatus) -> Result<Order, ClientError> {
        let path = format!("api/v1/admin/orders/{id}/status");
        self.send(self.request(Method::PUT, &path)?.json(&UpdateStatusRequest { status })).await
    }

    async fn delete_order(&self, id: Uuid) -> Result<(), ClientError> {
        let builder = self.request(Method::DELETE, &format!("api/v1/admin/orders/{id}"))?;
        checked(builder.send().await?).await?;
        Ok(())
    }

    async fn bulk_delete_orders(&self, ids: &[Uuid]) -> Result<usize, ClientError> {
        let body = BulkDeleteRequest { ids: ids.to_vec() };
        let response: BulkDeleteResponse = self.send(self.request(Method::POST, "api/v1/admin/orders/bulk-delete")?.json(&body)).await?;
        Ok(response.deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_path_gets_trailing_slash() {
        let api = HttpApi::new(Url::parse("http://localhost:8083/shop").unwrap());
        let request = api.request(Method::GET, "api/v1/orders").unwrap().build().unwrap();
        assert_eq!(request.url().as_str(), "http://localhost:8083/shop/api/v1/orders");
    }

    #[test]
    fn test_customer_header_is_sent() {
        let api = HttpApi::new(Url::parse("http://localhost:8083").unwrap()).with_customer("C9");
        let request = api.request(Method::GET, "api/v1/orders").unwrap().build().unwrap();
        assert_eq!(request.headers().get(CUSTOMER_HEADER).unwrap(), "C9");
    }
}
