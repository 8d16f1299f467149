//! Inventory stock lookup and ordering.
//!
//! Every operation acquires its connection through [`with_retry`]; only
//! connection-class failures (pool timeouts, I/O, SQLite busy/locked) are
//! retried. Statement errors surface immediately.

use crate::{
    models::inventory::InventoryItem,
    services::retry::{RetryPolicy, with_retry},
};
use sqlx::{SqlitePool, pool::PoolConnection, sqlite::Sqlite};
use std::sync::Arc;
use thiserror::Error;

/// SQLite primary result codes for a busy or locked database.
const SQLITE_BUSY: &str = "5";
const SQLITE_LOCKED: &str = "6";

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Item {0} not found")]
    ItemNotFound(String),
    #[error("Insufficient stock for {item}: requested {requested}, available {available}")]
    InsufficientStock {
        item: String,
        requested: i64,
        available: i64,
    },
    #[error("Quantity must be a positive integer")]
    InvalidQuantity,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct InventoryService {
    db: Arc<SqlitePool>,
    retry: RetryPolicy,
}

impl InventoryService {
    pub fn new(db: Arc<SqlitePool>, retry: RetryPolicy) -> Self {
        Self { db, retry }
    }

    async fn connection(&self) -> Result<PoolConnection<Sqlite>, sqlx::Error> {
        with_retry(self.retry, is_transient_connect_error, || self.db.acquire()).await
    }

    /// Current stock for `item`.
    pub async fn stock(&self, item: &str) -> Result<InventoryItem, InventoryError> {
        let mut conn = self.connection().await?;
        sqlx::query_as::<_, InventoryItem>(
            "SELECT item_name, stock FROM inventory WHERE item_name = ?",
        )
        .bind(item)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| InventoryError::ItemNotFound(item.to_string()))
    }

    /// Decrement stock for `item` by `quantity`; returns the remaining stock.
    ///
    /// Stock never goes negative: an order larger than what is available is
    /// refused without changing the row.
    pub async fn order(&self, item: &str, quantity: i64) -> Result<i64, InventoryError> {
        if quantity <= 0 {
            return Err(InventoryError::InvalidQuantity);
        }

        let mut conn = self.connection().await?;
        let remaining: Option<i64> = sqlx::query_scalar(
            "UPDATE inventory SET stock = stock - ?
             WHERE item_name = ? AND stock >= ?
             RETURNING stock",
        )
        .bind(quantity)
        .bind(item)
        .bind(quantity)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(remaining) = remaining {
            tracing::info!(item, quantity, remaining, "order placed");
            return Ok(remaining);
        }

        let available: Option<i64> =
            sqlx::query_scalar("SELECT stock FROM inventory WHERE item_name = ?")
                .bind(item)
                .fetch_optional(&mut *conn)
                .await?;
        match available {
            None => Err(InventoryError::ItemNotFound(item.to_string())),
            Some(available) => Err(InventoryError::InsufficientStock {
                item: item.to_string(),
                requested: quantity,
                available,
            }),
        }
    }
}

/// Connection-class errors worth another attempt.
pub fn is_transient_connect_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db_err) => matches!(
            db_err.code().as_deref(),
            Some(SQLITE_BUSY) | Some(SQLITE_LOCKED)
        ),
        _ => false,
    }
}
