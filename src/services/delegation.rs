//! Delegation keys: short-lived signing keys handed out by an identity
//! authority so tokens can be minted without a long-lived account secret.

use crate::models::token::{DelegationKeyInfo, format_timestamp};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Longest window, in days, an authority will sign a delegation key for.
const MAX_DELEGATION_DAYS: i64 = 7;

#[derive(Debug, Error)]
pub enum DelegationError {
    #[error("invalid delegation key window: {0}")]
    InvalidWindow(&'static str),
    #[error("delegation authority unavailable: {0}")]
    Unavailable(String),
}

/// A delegation key and its material.
#[derive(Clone)]
pub struct DelegationKey {
    pub info: DelegationKeyInfo,
    pub value: Vec<u8>,
}

impl std::fmt::Debug for DelegationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegationKey")
            .field("info", &self.info)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Source of delegation keys.
#[async_trait]
pub trait DelegationKeySource: Send + Sync + 'static {
    /// Obtain a key valid over `[start, expiry]`.
    async fn get_delegation_key(
        &self,
        start: DateTime<Utc>,
        expiry: DateTime<Utc>,
    ) -> Result<DelegationKey, DelegationError>;

    /// Material of a key previously returned by `get_delegation_key`.
    async fn key_material(&self, info: &DelegationKeyInfo) -> Result<Vec<u8>, DelegationError>;
}

/// In-process authority deriving key material from a master secret.
///
/// `material = HMAC-SHA256(master, "{key_id}\n{start}\n{expiry}")`, so any key
/// can be re-derived from the identity embedded in a token.
pub struct LocalKeyAuthority {
    master: Vec<u8>,
}

impl LocalKeyAuthority {
    pub fn new(master: impl Into<Vec<u8>>) -> Self {
        Self {
            master: master.into(),
        }
    }

    fn derive(&self, info: &DelegationKeyInfo) -> Result<Vec<u8>, DelegationError> {
        let mut mac = HmacSha256::new_from_slice(&self.master)
            .map_err(|err| DelegationError::Unavailable(err.to_string()))?;
        mac.update(
            format!(
                "{}\n{}\n{}",
                info.key_id,
                format_timestamp(&info.signed_start),
                format_timestamp(&info.signed_expiry)
            )
            .as_bytes(),
        );
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

#[async_trait]
impl DelegationKeySource for LocalKeyAuthority {
    async fn get_delegation_key(
        &self,
        start: DateTime<Utc>,
        expiry: DateTime<Utc>,
    ) -> Result<DelegationKey, DelegationError> {
        if expiry <= start {
            return Err(DelegationError::InvalidWindow("expiry must follow start"));
        }
        if expiry <= Utc::now() {
            return Err(DelegationError::InvalidWindow("expiry is in the past"));
        }
        if expiry - start > Duration::days(MAX_DELEGATION_DAYS) {
            return Err(DelegationError::InvalidWindow("window exceeds seven days"));
        }

        let info = DelegationKeyInfo {
            key_id: Uuid::new_v4().simple().to_string(),
            signed_start: start.trunc_subsecs(0),
            signed_expiry: expiry.trunc_subsecs(0),
        };
        let value = self.derive(&info)?;
        tracing::debug!(key_id = %info.key_id, "issued delegation key");
        Ok(DelegationKey { info, value })
    }

    async fn key_material(&self, info: &DelegationKeyInfo) -> Result<Vec<u8>, DelegationError> {
        if info.signed_expiry <= info.signed_start {
            return Err(DelegationError::InvalidWindow("expiry must follow start"));
        }
        self.derive(info)
    }
}
