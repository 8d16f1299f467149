//! User accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A registered user. The password hash never leaves the database layer.
#[derive(Serialize, Clone, FromRow, Debug, PartialEq)]
pub struct Account {
    pub user_id: i64,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// Body of `POST /accounts`.
#[derive(Debug, Deserialize)]
pub struct NewAccountRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}
