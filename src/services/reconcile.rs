//! Reconciliation ledger for partially completed deliveries.
//!
//! A delivery that fails after the object was written leaves the object in
//! place with no usable token or without downstream acceptance. Those objects
//! are recorded here so an operator can clean them up.

use crate::models::{delivery::Stage, object::ObjectAddress, orphan::OrphanRecord};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Hook invoked when a pipeline run fails after its store write.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// `stage` is the last stage the run completed.
    async fn record_partial(&self, address: &ObjectAddress, stage: Stage, reason: &str);
}

/// Persists orphaned objects to the `orphaned_objects` table.
#[derive(Clone)]
pub struct OrphanLedger {
    db: Arc<SqlitePool>,
}

impl OrphanLedger {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// All recorded orphans, oldest first.
    pub async fn list(&self) -> sqlx::Result<Vec<OrphanRecord>> {
        sqlx::query_as::<_, OrphanRecord>(
            "SELECT id, container, key, stage, reason, recorded_at
             FROM orphaned_objects ORDER BY recorded_at ASC, id ASC",
        )
        .fetch_all(&*self.db)
        .await
    }
}

#[async_trait]
impl Reconciler for OrphanLedger {
    async fn record_partial(&self, address: &ObjectAddress, stage: Stage, reason: &str) {
        let result = sqlx::query(
            "INSERT INTO orphaned_objects (container, key, stage, reason, recorded_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&address.container)
        .bind(&address.key)
        .bind(stage.as_str())
        .bind(reason)
        .bind(Utc::now())
        .execute(&*self.db)
        .await;

        // The ledger is best effort: the caller already failed and logged.
        if let Err(err) = result {
            tracing::error!(
                container = %address.container,
                key = %address.key,
                error = %err,
                "failed to record orphaned object"
            );
        }
    }
}
