//! `POST /fileupload`: multipart intake for the delivery pipeline.

use crate::{
    errors::AppError,
    models::{delivery::UploadPayload, token::format_timestamp},
    state::AppState,
};
use axum::{
    extract::{Multipart, State},
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

/// Multipart field carrying the file.
pub const UPLOAD_FIELD: &str = "file";

pub const DOWNSTREAM_ACCEPTED_HEADER: HeaderName =
    HeaderName::from_static("x-downstream-accepted");

/// RFC 3339 instant after which the returned fetch URL stops working.
pub const TOKEN_EXPIRES_HEADER: HeaderName = HeaderName::from_static("x-token-expires");

/// Run the first `file` field through the pipeline and answer with its fetch URL.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| AppError::bad_request("Uploaded file has no filename"))?;
        let bytes = field.bytes().await?;
        tracing::debug!(filename, size = bytes.len(), "upload received");

        let delivered = state
            .pipeline
            .deliver(UploadPayload::new(filename, bytes))
            .await?;
        tracing::debug!(key = %delivered.object.key, etag = ?delivered.object.etag, "upload stored");

        let mut response = (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            delivered.fetch_url,
        )
            .into_response();
        if let Ok(expires) = HeaderValue::from_str(&format_timestamp(&delivered.token.not_after)) {
            response.headers_mut().insert(TOKEN_EXPIRES_HEADER, expires);
        }
        if let Some(accepted) = delivered.downstream_accepted {
            response.headers_mut().insert(
                DOWNSTREAM_ACCEPTED_HEADER,
                HeaderValue::from_static(if accepted { "true" } else { "false" }),
            );
        }
        return Ok(response);
    }

    Err(AppError::bad_request("No file uploaded"))
}
