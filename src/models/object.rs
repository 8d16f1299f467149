//! Represents an object (file) stored in a container.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Metadata for a single stored blob.
///
/// The struct mirrors a row of the `objects` table; the payload itself lives
/// on disk. Overwriting a key replaces every field.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct StoredObject {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Container (top-level namespace) holding the object.
    pub container: String,

    /// Sanitized storage key, unique within the container.
    pub key: String,

    /// Filename as the client declared it.
    pub filename: String,

    /// Content type (MIME type) detected at upload time.
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the payload, hex encoded.
    pub etag: Option<String>,

    /// When the current version of the object was written.
    pub created_at: DateTime<Utc>,
}

impl StoredObject {
    pub fn address(&self) -> ObjectAddress {
        ObjectAddress::new(&self.container, &self.key)
    }
}

/// Canonical address of a stored object: `(container, key)`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectAddress {
    pub container: String,
    pub key: String,
}

impl ObjectAddress {
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
        }
    }

    /// Resource string covered by token signatures, e.g. `/local/uploads/a-1f2e3d.json`.
    pub fn canonical_resource(&self, account: &str) -> String {
        format!("/{}/{}/{}", account, self.container, self.key)
    }

    /// Public URL of the object under `base_url`, without any credential.
    pub fn url(&self, base_url: &str) -> String {
        format!(
            "{}/{}/{}",
            base_url.trim_end_matches('/'),
            self.container,
            self.key
        )
    }
}

impl fmt::Display for ObjectAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.key)
    }
}
