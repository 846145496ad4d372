//! HTTP surface of the engine.
//!
//! Customers are identified by the `x-customer-id` header set by the upstream
//! auth proxy. Every customer route requires it, including order placement and
//! payment sessions. Routes under `/api/v1/admin` act as [`Actor::Admin`].

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;
use uuid::Uuid;

use crate::domain::aggregates::{Actor, CouponError, Order, OrderStatus, PaymentProvider, ResolvedCoupon, TransitionError};
use crate::domain::value_objects::Money;
use crate::services::{CreateOrderRequest, OrderService, PaymentService, PaymentSession, PaymentSessionRequest};
use crate::storage::{OrderFilter, Page, PaginatedResponse};
use crate::{EngineError, FieldErrors};

pub const CUSTOMER_HEADER: &str = "x-customer-id";

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
}

impl AppState {
    pub fn new(orders: OrderService, payments: PaymentService) -> Self {
        Self { orders: Arc::new(orders), payments: Arc::new(payments) }
    }
}

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/orders", get(admin_list_orders))
        .route("/orders/bulk-delete", post(bulk_delete_orders))
        .route("/orders/:id", delete(delete_order))
        .route("/orders/:id/status", put(update_order_status));

    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "order-engine"})) }))
        .route("/api/v1/orders", get(list_my_orders).post(create_order))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/coupons/apply", post(apply_coupon))
        .route("/api/v1/payments/:provider/session", post(create_payment_session))
        .nest("/api/v1/admin", admin)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// =============================================================================
// Request Types
// =============================================================================

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, alias = "per_page", skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(default, alias = "customer_id", skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
}

impl ListParams {
    fn split(self) -> (OrderFilter, Page) {
        (OrderFilter { status: self.status, customer_id: self.customer_id }, Page::new(self.page, self.per_page))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyCouponRequest {
    pub code: String,
    pub subtotal: Money,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Vec<Uuid>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDeleteResponse {
    pub deleted: usize,
}

/// Identity forwarded by the auth proxy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomerId(pub String);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CustomerId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(CUSTOMER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| CustomerId(v.to_string()))
            .ok_or(ApiError::Unauthenticated)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// JSON body of every error response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldErrors>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon: Option<CouponError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<TransitionError>,
}

impl ErrorBody {
    fn new(error: &str, message: impl Into<String>) -> Self {
        Self { error: error.to_string(), message: message.into(), fields: None, coupon: None, transition: None }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Missing {CUSTOMER_HEADER} header")]
    Unauthenticated,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, body) = match self {
            ApiError::Unauthenticated => (StatusCode::UNAUTHORIZED, ErrorBody::new("unauthenticated", message)),
            ApiError::Engine(EngineError::Validation(fields)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, ErrorBody { fields: Some(fields), ..ErrorBody::new("validation_failed", "Validation failed") })
            }
            ApiError::Engine(EngineError::Coupon(coupon)) => {
                (StatusCode::BAD_REQUEST, ErrorBody { coupon: Some(coupon), ..ErrorBody::new("coupon_rejected", message) })
            }
            ApiError::Engine(EngineError::Transition(transition)) => {
                (StatusCode::CONFLICT, ErrorBody { transition: Some(transition), ..ErrorBody::new("transition_rejected", message) })
            }
            ApiError::Engine(EngineError::OrderNotFound(_)) => (StatusCode::NOT_FOUND, ErrorBody::new("not_found", message)),
            ApiError::Engine(EngineError::Payment(_)) => (StatusCode::CONFLICT, ErrorBody::new("payment_not_possible", message)),
            ApiError::Engine(EngineError::GatewayUnavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, ErrorBody::new("gateway_unavailable", message))
            }
            ApiError::Engine(EngineError::StorageError(e)) => {
                error!("Storage failure: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorBody::new("internal_error", "Internal server error"))
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Handlers
// =============================================================================

async fn create_order(
    State(s): State<AppState>,
    CustomerId(customer_id): CustomerId,
    Json(r): Json<CreateOrderRequest>,
) -> ApiResult<(StatusCode, Json<Order>)> {
    let order = s.orders.create_order(Some(customer_id), r).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn list_my_orders(
    State(s): State<AppState>,
    CustomerId(customer_id): CustomerId,
    Query(p): Query<ListParams>,
) -> ApiResult<Json<PaginatedResponse<Order>>> {
    let (filter, page) = ListParams { customer_id: Some(customer_id), ..p }.split();
    Ok(Json(s.orders.list_orders(&filter, page).await?))
}

async fn get_order(State(s): State<AppState>, CustomerId(customer_id): CustomerId, Path(id): Path<Uuid>) -> ApiResult<Json<Order>> {
    Ok(Json(s.orders.get_order(id, &Actor::customer(customer_id)).await?))
}

async fn cancel_order(State(s): State<AppState>, CustomerId(customer_id): CustomerId, Path(id): Path<Uuid>) -> ApiResult<Json<Order>> {
    Ok(Json(s.orders.cancel_order(id, &Actor::customer(customer_id)).await?))
}

async fn apply_coupon(State(s): State<AppState>, Json(r): Json<ApplyCouponRequest>) -> ApiResult<Json<ResolvedCoupon>> {
    Ok(Json(s.orders.coupons().resolve(&r.code, r.subtotal).await?))
}

async fn create_payment_session(
    State(s): State<AppState>,
    CustomerId(customer_id): CustomerId,
    Path(provider): Path<PaymentProvider>,
    Json(r): Json<PaymentSessionRequest>,
) -> ApiResult<Json<PaymentSession>> {
    Ok(Json(s.payments.create_session(provider, r, &Actor::customer(customer_id)).await?))
}

async fn admin_list_orders(State(s): State<AppState>, Query(p): Query<ListParams>) -> ApiResult<Json<PaginatedResponse<Order>>> {
    let (filter, page) = p.split();
    Ok(Json(s.orders.list_orders(&filter, page).await?))
}

async fn update_order_status(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<UpdateStatusRequest>) -> ApiResult<Json<Order>> {
    Ok(Json(s.orders.change_status(id, r.status, &Actor::Admin).await?))
}

async fn delete_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    s.orders.delete_order(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn bulk_delete_orders(State(s): State<AppState>, Json(r): Json<BulkDeleteRequest>) -> ApiResult<Json<BulkDeleteResponse>> {
    let deleted = s.orders.bulk_delete(&r.ids).await?;
    Ok(Json(BulkDeleteResponse { deleted }))
}
