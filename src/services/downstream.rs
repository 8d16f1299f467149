//! Relay of uploaded payloads to a downstream webhook.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{StatusCode, header::CONTENT_TYPE};
use std::time::Duration;
use thiserror::Error;

/// The only status a downstream consumer may answer with to accept a payload.
pub const ACCEPTED_STATUS: StatusCode = StatusCode::ACCEPTED;

/// Longest slice of a rejection body kept for logs.
const MAX_REJECTION_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("downstream answered {status}: {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("downstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// One-shot delivery of a payload to a downstream consumer.
#[async_trait]
pub trait Forwarder: Send + Sync + 'static {
    async fn forward(&self, payload: Bytes, content_type: &str) -> Result<(), DownstreamError>;
}

/// POSTs payloads to a fixed URL. No retries.
pub struct WebhookForwarder {
    client: reqwest::Client,
    url: String,
}

impl WebhookForwarder {
    pub fn new(url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Forwarder for WebhookForwarder {
    async fn forward(&self, payload: Bytes, content_type: &str) -> Result<(), DownstreamError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, content_type)
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        if status == ACCEPTED_STATUS {
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_REJECTION_BODY {
            let mut cut = MAX_REJECTION_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(DownstreamError::Rejected { status, body })
    }
}
