//! Postgres repositories (sqlx).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::domain::aggregates::{Coupon, Destination, Order, OrderItem, OrderParts, OrderStatus, PaymentMethod};
use crate::domain::value_objects::{CouponCode, Money};
use crate::storage::{CouponRepository, DeleteOutcome, OrderFilter, OrderRepository, Page, PaginatedResponse};
use crate::{EngineError, Result};

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(database_url).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| EngineError::StorageError(e.to_string()))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    code: String,
    customer_id: Option<String>,
    items: Json<Vec<OrderItem>>,
    subtotal: i64,
    delivery_fee: i64,
    discount_amount: i64,
    coupon_code: Option<String>,
    total_price: i64,
    payment_method: String,
    status: String,
    destination: Json<Destination>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = EngineError;

    fn try_from(row: OrderRow) -> Result<Self> {
        let corrupt = |what: &str, value: &str| EngineError::StorageError(format!("order {} has invalid {what} `{value}`", row.id));
        let status: OrderStatus = row.status.parse().map_err(|_| corrupt("status", &row.status))?;
        let payment_method: PaymentMethod = row.payment_method.parse().map_err(|_| corrupt("payment method", &row.payment_method))?;
        let coupon_code = match row.coupon_code.as_deref() {
            Some(code) => Some(CouponCode::new(code).map_err(|_| corrupt("coupon code", code))?),
            None => None,
        };
        Ok(Order::rehydrate(OrderParts {
            id: row.id,
            code: row.code,
            customer_id: row.customer_id,
            items: row.items.0,
            subtotal: Money::new(row.subtotal),
            delivery_fee: Money::new(row.delivery_fee),
            discount_amount: Money::new(row.discount_amount),
            coupon_code,
            total_price: Money::new(row.total_price),
            payment_method,
            status,
            destination: row.destination.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CouponRow {
    code: String,
    discount_amount: Option<i64>,
    discount_percent: Option<i16>,
    min_order_amount: i64,
    valid_from: Option<DateTime<Utc>>,
    valid_to: Option<DateTime<Utc>>,
    usage_limit: Option<i32>,
    used_count: i32,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = EngineError;

    fn try_from(row: CouponRow) -> Result<Self> {
        let code = CouponCode::new(row.code.as_str()).map_err(|e| EngineError::StorageError(format!("coupon `{}`: {e}", row.code)))?;
        Ok(Coupon {
            code,
            discount_amount: row.discount_amount.map(Money::new),
            discount_percent: row.discount_percent.map(|p| u8::try_from(p.clamp(0, 100)).unwrap_or(0)),
            min_order_amount: Money::new(row.min_order_amount),
            valid_from: row.valid_from,
            valid_to: row.valid_to,
            usage_limit: row.usage_limit.map(|l| u32::try_from(l).unwrap_or(0)),
            used_count: u32::try_from(row.used_count).unwrap_or(0),
        })
    }
}

#[async_trait]
impl OrderRepository for PgStore {
    #[instrument(skip(self, order), fields(order_id = %order.id()))]
    async fn insert(&self, order: &Order) -> Result<()> {
        sqlx::query("INSERT INTO orders (id, code, customer_id, items, subtotal, delivery_fee, discount_amount, coupon_code, total_price, payment_method, status, destination, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)")
            .bind(order.id()).bind(order.code()).bind(order.customer_id()).bind(Json(order.items()))
            .bind(order.subtotal().amount()).bind(order.delivery_fee().amount()).bind(order.discount_amount().amount())
            .bind(order.coupon_code().map(CouponCode::as_str)).bind(order.total_price().amount())
            .bind(order.payment_method().as_str()).bind(order.status().as_str()).bind(Json(order.destination()))
            .bind(order.created_at()).bind(order.updated_at())
            .execute(&self.pool).await
            .map_err(|e| { error!("Failed to insert order {}: {}", order.id(), e); EngineError::from(e) })?;
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Order>> {
        sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?
            .map(Order::try_from).transpose()
    }

    async fn list(&self, filter: &OrderFilter, page: Page) -> Result<PaginatedResponse<Order>> {
        let status = filter.status.map(OrderStatus::as_str);
        let customer = filter.customer_id.as_deref();
        let rows = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE ($1::text IS NULL OR status = $1) AND ($2::text IS NULL OR customer_id = $2) ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4")
            .bind(status).bind(customer).bind(i64::from(page.per_page)).bind(i64::try_from(page.offset()).unwrap_or(i64::MAX))
            .fetch_all(&self.pool).await?;
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE ($1::text IS NULL OR status = $1) AND ($2::text IS NULL OR customer_id = $2)")
            .bind(status).bind(customer).fetch_one(&self.pool).await?;
        let data = rows.into_iter().map(Order::try_from).collect::<Result<Vec<_>>>()?;
        Ok(PaginatedResponse { data, total: total.0, page: page.page })
    }

    async fn update_status(&self, order: &Order, expected: OrderStatus) -> Result<bool> {
        let done = sqlx::query("UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1 AND status = $4")
            .bind(order.id()).bind(order.status().as_str()).bind(order.updated_at()).bind(expected.as_str())
            .execute(&self.pool).await?;
        Ok(done.rows_affected() == 1)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn delete_terminal(&self, ids: &[Uuid]) -> Result<DeleteOutcome> {
        let mut txn = self.pool.begin().await?;
        let rows = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = ANY($1) FOR UPDATE")
            .bind(ids).fetch_all(&mut *txn).await?;
        let orders = rows.into_iter().map(Order::try_from).collect::<Result<Vec<_>>>()?;

        let missing: Vec<Uuid> = ids.iter().copied().filter(|id| !orders.iter().any(|o| o.id() == *id)).collect();
        if !missing.is_empty() { return Ok(DeleteOutcome::Missing(missing)); }
        let blocked: Vec<Uuid> = orders.iter().filter(|o| !o.is_deletable()).map(Order::id).collect();
        if !blocked.is_empty() { return Ok(DeleteOutcome::Blocked(blocked)); }

        sqlx::query("DELETE FROM orders WHERE id = ANY($1)").bind(ids).execute(&mut *txn).await?;
        txn.commit().await?;
        Ok(DeleteOutcome::Deleted(orders))
    }
}

#[async_trait]
impl CouponRepository for PgStore {
    async fn find_by_code(&self, code: &CouponCode) -> Result<Option<Coupon>> {
        sqlx::query_as::<_, CouponRow>("SELECT * FROM coupons WHERE UPPER(code) = $1")
            .bind(code.as_str()).fetch_optional(&self.pool).await?
            .map(Coupon::try_from).transpose()
    }

    async fn record_redemption(&self, code: &CouponCode) -> Result<()> {
        sqlx::query("UPDATE coupons SET used_count = used_count + 1 WHERE UPPER(code) = $1")
            .bind(code.as_str()).execute(&self.pool).await?;
        Ok(())
    }
}
