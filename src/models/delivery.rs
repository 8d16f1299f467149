//! Per-request types flowing through the delivery pipeline.

use crate::models::{object::StoredObject, token::AccessToken};
use bytes::Bytes;
use std::{fmt, io::Cursor};

/// A file as received from the client. Owned by one pipeline run.
#[derive(Debug)]
pub struct UploadPayload {
    /// Filename exactly as the client declared it.
    pub filename: String,

    /// Payload bytes behind a read cursor.
    pub body: Cursor<Bytes>,
}

impl UploadPayload {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            body: Cursor::new(bytes.into()),
        }
    }

    /// Extension after the last dot of the declared filename, if any.
    pub fn declared_extension(&self) -> Option<&str> {
        self.filename
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty())
    }
}

/// Stages of the delivery state machine, in the only order they may occur.
///
/// `Completed`, `Rejected` and `Failed` are terminal. A run is `Rejected` when
/// the client sent the wrong type or content and `Failed` on any other error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Received,
    Validated,
    Sanitized,
    Stored,
    Tokenized,
    Forwarded,
    Completed,
    Rejected,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Rejected | Stage::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Validated => "validated",
            Stage::Sanitized => "sanitized",
            Stage::Stored => "stored",
            Stage::Tokenized => "tokenized",
            Stage::Forwarded => "forwarded",
            Stage::Completed => "completed",
            Stage::Rejected => "rejected",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful outcome of a pipeline run.
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub object: StoredObject,
    pub token: AccessToken,

    /// Object URL with the token appended as its query.
    pub fetch_url: String,

    /// `None` when relay is disabled, `Some(true)` once downstream accepted.
    pub downstream_accepted: Option<bool>,
}
