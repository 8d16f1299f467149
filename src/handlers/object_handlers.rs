//! Token-guarded object reads.
//! Streams object bodies to avoid buffering in memory and delegates storage
//! concerns to `LocalObjectStore`.

use crate::{
    errors::AppError,
    models::{
        object::{ObjectAddress, StoredObject},
        token::{Operation, TokenParams},
    },
    services::credentials::TokenError,
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::Response,
};
use chrono::Utc;
use tokio_util::io::ReaderStream;

/// GET `/{container}/{*key}?<token>` as a streaming response.
pub async fn get_object(
    State(state): State<AppState>,
    method: Method,
    Path((container, key)): Path<(String, String)>,
    Query(token): Query<TokenParams>,
) -> Result<Response, AppError> {
    authorize(&state, &method, &container, &key, &token).await?;

    let (meta, file) = state.store.open(&container, &key).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// HEAD `/{container}/{*key}?<token>`: same headers as GET but no body.
pub async fn head_object(
    State(state): State<AppState>,
    method: Method,
    Path((container, key)): Path<(String, String)>,
    Query(token): Query<TokenParams>,
) -> Result<Response, AppError> {
    authorize(&state, &method, &container, &key, &token).await?;

    let meta = state.store.metadata(&container, &key).await?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

async fn authorize(
    state: &AppState,
    method: &Method,
    container: &str,
    key: &str,
    token: &TokenParams,
) -> Result<(), AppError> {
    let op = Operation::for_method(method).ok_or(TokenError::PermissionDenied)?;
    let address = ObjectAddress::new(container, key);
    state
        .issuer
        .verify(&address, token, op, Utc::now())
        .await?;
    Ok(())
}

fn set_object_headers(headers: &mut HeaderMap, meta: &StoredObject) {
    let content_type = meta
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size_bytes.max(0)));

    if let Some(etag) = meta.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(&meta.created_at.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
