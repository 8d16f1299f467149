//! Objects left behind by a pipeline run that failed after the store write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One row of the reconciliation ledger.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct OrphanRecord {
    pub id: i64,
    pub container: String,
    pub key: String,

    /// Last stage reached before the failure (`stored` or `tokenized`).
    pub stage: String,

    /// Internal failure detail. Never returned to upload clients.
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}
