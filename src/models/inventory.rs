//! Inventory rows and order requests.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Stock level for one item.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct InventoryItem {
    pub item_name: String,
    pub stock: i64,
}

/// Body of `POST /orders`. `quantity` may be a number or a numeric string.
#[derive(Debug, Deserialize)]
pub struct OrderRequest {
    pub item: Option<String>,
    pub quantity: Option<serde_json::Value>,
}
