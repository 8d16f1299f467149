//! Inventory endpoints: stock lookup and ordering.

use crate::{
    errors::AppError,
    models::inventory::OrderRequest,
    services::inventory_service::InventoryError,
    state::AppState,
};
use axum::{
    extract::{Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct StockQuery {
    pub item: Option<String>,
}

/// GET `/orders?item=<name>`: current stock as plain text.
pub async fn get_stock(
    State(state): State<AppState>,
    Query(query): Query<StockQuery>,
) -> Result<impl IntoResponse, AppError> {
    let item = query
        .item
        .filter(|item| !item.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("Missing item parameter"))?;
    let row = state.inventory.stock(&item).await?;
    Ok(plain_text(row.stock.to_string()))
}

/// POST `/orders` with `{"item": .., "quantity": ..}`.
///
/// The body is parsed here rather than through `Json` so that malformed input
/// is a 400 with a readable message.
pub async fn place_order(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let request: OrderRequest =
        serde_json::from_slice(&body).map_err(|_| AppError::bad_request("Invalid JSON"))?;
    let item = request
        .item
        .filter(|item| !item.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("Missing item"))?;
    let quantity = request
        .quantity
        .ok_or_else(|| AppError::bad_request("Missing quantity"))?;
    let quantity = parse_quantity(&quantity).ok_or(InventoryError::InvalidQuantity)?;

    state.inventory.order(&item, quantity).await?;
    Ok(plain_text(format!("Order for {item} placed successfully")))
}

/// Integers and integer strings only.
fn parse_quantity(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn plain_text(body: String) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quantity_accepts_numbers_and_numeric_strings() {
        assert_eq!(parse_quantity(&json!(3)), Some(3));
        assert_eq!(parse_quantity(&json!(" 7 ")), Some(7));
        assert_eq!(parse_quantity(&json!(2.5)), None);
        assert_eq!(parse_quantity(&json!("two")), None);
        assert_eq!(parse_quantity(&json!(null)), None);
    }
}
