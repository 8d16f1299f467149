//! `POST /accounts`: user registration.

use crate::{
    errors::AppError, models::account::NewAccountRequest,
    services::account_service::AccountError, state::AppState,
};
use axum::{
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use bytes::Bytes;

pub async fn create_account(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let request: NewAccountRequest =
        serde_json::from_slice(&body).map_err(|_| AppError::bad_request("Bad request"))?;
    let (Some(username), Some(password)) = (request.username, request.password) else {
        return Err(AccountError::MissingField.into());
    };

    let account = state.accounts.create(&username, &password).await?;
    Ok((
        StatusCode::CREATED,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("User {} created successfully!", account.username),
    ))
}
