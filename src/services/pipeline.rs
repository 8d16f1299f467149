//! Delivery pipeline: verify → sanitize → store → tokenize → [forward].
//!
//! Stages run strictly in order and a failure at any stage is terminal.
//! Nothing is rolled back: an object that was stored but never tokenized, or
//! tokenized but refused downstream, stays in the store and is handed to the
//! [`Reconciler`].

use crate::{
    models::{
        delivery::{DeliveryResult, Stage, UploadPayload},
        object::ObjectAddress,
    },
    services::{
        credentials::{CredentialIssuer, IssuanceError},
        downstream::{DownstreamError, Forwarder},
        reconcile::Reconciler,
        sanitizer::sanitize,
        storage_service::{NewObject, ObjectStore, StoreError},
        verifier::{ContentVerifier, ValidationError},
    },
};
use bytes::Bytes;
use std::{io::Cursor, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("store write failed: {0}")]
    Store(#[from] StoreError),
    #[error("token issuance failed for stored object {address}: {source}")]
    Issuance {
        address: ObjectAddress,
        source: IssuanceError,
    },
    #[error("downstream refused {address}: {source}")]
    Downstream {
        address: ObjectAddress,
        source: DownstreamError,
    },
}

impl PipelineError {
    /// True when the client can fix the request (wrong type, wrong content).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PipelineError::Validation(
                ValidationError::UnsupportedExtension { .. }
                    | ValidationError::ContentMismatch { .. }
            )
        )
    }

    /// Terminal stage a run ends in when it fails with this error.
    pub fn terminal_stage(&self) -> Stage {
        if self.is_rejection() {
            Stage::Rejected
        } else {
            Stage::Failed
        }
    }
}

/// Per-deployment pipeline settings.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub container: String,
    pub public_url: String,
    pub token_ttl: chrono::Duration,
    pub store_timeout: Duration,
    pub issue_timeout: Duration,
}

pub struct DeliveryPipeline {
    verifier: ContentVerifier,
    store: Arc<dyn ObjectStore>,
    issuer: Arc<dyn CredentialIssuer>,
    forwarder: Option<Arc<dyn Forwarder>>,
    reconciler: Arc<dyn Reconciler>,
    settings: PipelineSettings,
}

impl DeliveryPipeline {
    pub fn new(
        verifier: ContentVerifier,
        store: Arc<dyn ObjectStore>,
        issuer: Arc<dyn CredentialIssuer>,
        reconciler: Arc<dyn Reconciler>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            verifier,
            store,
            issuer,
            forwarder: None,
            reconciler,
            settings,
        }
    }

    /// Relay every accepted payload to `forwarder` after tokenization.
    pub fn with_forwarder(mut self, forwarder: Arc<dyn Forwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    pub fn relays(&self) -> bool {
        self.forwarder.is_some()
    }

    pub async fn deliver(&self, mut payload: UploadPayload) -> Result<DeliveryResult, PipelineError> {
        let mut stage = Stage::Received;

        let declared = payload.declared_extension().map(str::to_owned);
        let detected = match self.verifier.verify(declared.as_deref(), &mut payload.body) {
            Ok(detected) => detected,
            Err(err) => {
                let err = PipelineError::from(err);
                advance(&mut stage, err.terminal_stage(), &payload.filename);
                return Err(err);
            }
        };
        advance(&mut stage, Stage::Validated, &payload.filename);

        let key = sanitize(&payload.filename);
        advance(&mut stage, Stage::Sanitized, &key);

        let body = take_remaining(&mut payload.body);
        let meta = NewObject {
            filename: &payload.filename,
            content_type: Some(detected),
        };
        let object = match timeout(
            self.settings.store_timeout,
            self.store
                .put(&self.settings.container, &key, meta, body.clone()),
        )
        .await
        {
            Ok(Ok(object)) => object,
            Ok(Err(err)) => {
                advance(&mut stage, Stage::Failed, &key);
                return Err(err.into());
            }
            Err(_) => {
                advance(&mut stage, Stage::Failed, &key);
                return Err(StoreError::Timeout(self.settings.store_timeout).into());
            }
        };
        let address = object.address();
        advance(&mut stage, Stage::Stored, &key);

        let issued = match timeout(
            self.settings.issue_timeout,
            self.issuer.issue(&address, self.settings.token_ttl),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(IssuanceError::Timeout(self.settings.issue_timeout)),
        };
        let token = match issued {
            Ok(token) => token,
            Err(source) => {
                self.partial_failure(&address, stage, &source).await;
                advance(&mut stage, Stage::Failed, &key);
                return Err(PipelineError::Issuance { address, source });
            }
        };
        advance(&mut stage, Stage::Tokenized, &key);

        let mut downstream_accepted = None;
        if let Some(forwarder) = &self.forwarder {
            if let Err(source) = forwarder.forward(body, detected).await {
                self.partial_failure(&address, stage, &source).await;
                advance(&mut stage, Stage::Failed, &key);
                return Err(PipelineError::Downstream { address, source });
            }
            downstream_accepted = Some(true);
            advance(&mut stage, Stage::Forwarded, &key);
        }

        let fetch_url = token.fetch_url(&self.settings.public_url);
        advance(&mut stage, Stage::Completed, &key);
        info!(
            container = %address.container,
            key = %address.key,
            size_bytes = object.size_bytes,
            relayed = downstream_accepted.is_some(),
            "upload delivered"
        );

        Ok(DeliveryResult {
            object,
            token,
            fetch_url,
            downstream_accepted,
        })
    }

    async fn partial_failure(
        &self,
        address: &ObjectAddress,
        reached: Stage,
        cause: &(dyn std::error::Error + Send + Sync),
    ) {
        error!(
            container = %address.container,
            key = %address.key,
            stage = %reached,
            error = %cause,
            "delivery failed after store write; object left for reconciliation"
        );
        self.reconciler
            .record_partial(address, reached, &cause.to_string())
            .await;
    }
}

fn advance(stage: &mut Stage, next: Stage, subject: &str) {
    debug_assert!(
        !stage.is_terminal() && next > *stage,
        "stage {next} cannot follow {stage}"
    );
    debug!(from = %stage, to = %next, subject, "pipeline stage");
    *stage = next;
}

/// Everything from the cursor position to the end, leaving the cursor at the end.
fn take_remaining(cursor: &mut Cursor<Bytes>) -> Bytes {
    let len = cursor.get_ref().len();
    let start = usize::try_from(cursor.position()).map_or(len, |pos| pos.min(len));
    cursor.set_position(len as u64);
    cursor.get_ref().slice(start..)
}
