//! Credential issuance and verification.
//!
//! Both trust models sign the same canonical string with HMAC-SHA256:
//!
//! ```text
//! sp \n st \n se \n /{account}/{container}/{key} \n sr \n skid \n skt \n ske
//! ```
//!
//! Shared-key tokens leave the three delegation fields empty and are signed
//! with the account secret. Delegated tokens are signed with the material of a
//! short-lived delegation key whose identity travels in the token, so the
//! verifier can ask the authority to re-derive it.

use crate::{
    config::{AppConfig, SigningMode},
    models::{
        object::ObjectAddress,
        token::{
            AccessToken, DelegationKeyInfo, Operation, Permissions, RESOURCE_BLOB,
            SigningBasis, TokenParams, format_timestamp, parse_timestamp,
        },
    },
    services::delegation::{DelegationError, DelegationKeySource, LocalKeyAuthority},
};
use anyhow::{Context, bail};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Delegation keys start this far in the past to absorb clock skew.
pub const DELEGATION_CLOCK_SKEW_MINUTES: i64 = 15;
/// Delegation keys expire this soon after issuance.
pub const DELEGATION_KEY_LIFETIME_MINUTES: i64 = 1;

const MIN_SECRET_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum IssuanceError {
    #[error("token validity must be positive")]
    InvalidValidity,
    #[error(transparent)]
    Delegation(#[from] DelegationError),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("credential issuer did not respond within {0:?}")]
    Timeout(std::time::Duration),
}

/// Reasons a presented token is refused. All map to `403`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(&'static str),
    #[error("token is not valid yet")]
    NotYetValid,
    #[error("token has expired")]
    Expired,
    #[error("operation not permitted by token")]
    PermissionDenied,
    #[error("token does not cover this resource type")]
    WrongResource,
    #[error("signature mismatch")]
    BadSignature,
}

/// Mints and checks object-scoped read credentials.
#[async_trait]
pub trait CredentialIssuer: Send + Sync + 'static {
    /// Issue a read-only token for `address` valid from now for `validity`.
    async fn issue(
        &self,
        address: &ObjectAddress,
        validity: Duration,
    ) -> Result<AccessToken, IssuanceError>;

    /// Check that `params` authorize `op` on `address` at `now`.
    async fn verify(
        &self,
        address: &ObjectAddress,
        params: &TokenParams,
        op: Operation,
        now: DateTime<Utc>,
    ) -> Result<(), TokenError>;
}

/// Signs with the long-lived account secret.
pub struct SharedKeyIssuer {
    account: String,
    key: Vec<u8>,
}

impl SharedKeyIssuer {
    pub fn new(account: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        Self {
            account: account.into(),
            key: key.into(),
        }
    }
}

#[async_trait]
impl CredentialIssuer for SharedKeyIssuer {
    async fn issue(
        &self,
        address: &ObjectAddress,
        validity: Duration,
    ) -> Result<AccessToken, IssuanceError> {
        let (not_before, not_after) = token_window(validity)?;
        let fields = SignedFields::new(
            Permissions::READ_ONLY,
            &not_before,
            &not_after,
            address.canonical_resource(&self.account),
            None,
        );
        let signature = sign(&self.key, &fields)?;
        Ok(AccessToken {
            address: address.clone(),
            permissions: Permissions::READ_ONLY,
            not_before,
            not_after,
            basis: SigningBasis::SharedKey,
            signature,
        })
    }

    async fn verify(
        &self,
        address: &ObjectAddress,
        params: &TokenParams,
        op: Operation,
        now: DateTime<Utc>,
    ) -> Result<(), TokenError> {
        let presented = PresentedToken::parse(params, op, now)?;
        if presented.delegation.is_some() {
            return Err(TokenError::Malformed("unexpected delegation fields"));
        }
        presented.check_signature(&self.key, address.canonical_resource(&self.account))
    }
}

/// Signs with a fresh delegation key per token.
pub struct DelegatedIssuer {
    account: String,
    authority: Arc<dyn DelegationKeySource>,
    clock_skew: Duration,
    key_lifetime: Duration,
}

impl DelegatedIssuer {
    pub fn new(account: impl Into<String>, authority: Arc<dyn DelegationKeySource>) -> Self {
        Self {
            account: account.into(),
            authority,
            clock_skew: Duration::minutes(DELEGATION_CLOCK_SKEW_MINUTES),
            key_lifetime: Duration::minutes(DELEGATION_KEY_LIFETIME_MINUTES),
        }
    }
}

#[async_trait]
impl CredentialIssuer for DelegatedIssuer {
    async fn issue(
        &self,
        address: &ObjectAddress,
        validity: Duration,
    ) -> Result<AccessToken, IssuanceError> {
        let now = Utc::now();
        let key = self
            .authority
            .get_delegation_key(now - self.clock_skew, now + self.key_lifetime)
            .await?;

        // The token outlives the key that signed it.
        let (not_before, not_after) = token_window(validity)?;
        let fields = SignedFields::new(
            Permissions::READ_ONLY,
            &not_before,
            &not_after,
            address.canonical_resource(&self.account),
            Some(&key.info),
        );
        let signature = sign(&key.value, &fields)?;
        Ok(AccessToken {
            address: address.clone(),
            permissions: Permissions::READ_ONLY,
            not_before,
            not_after,
            basis: SigningBasis::Delegated(key.info),
            signature,
        })
    }

    async fn verify(
        &self,
        address: &ObjectAddress,
        params: &TokenParams,
        op: Operation,
        now: DateTime<Utc>,
    ) -> Result<(), TokenError> {
        let presented = PresentedToken::parse(params, op, now)?;
        let info = presented
            .delegation
            .as_ref()
            .ok_or(TokenError::Malformed("missing delegation fields"))?;
        let material = self
            .authority
            .key_material(info)
            .await
            .map_err(|_| TokenError::BadSignature)?;
        presented.check_signature(&material, address.canonical_resource(&self.account))
    }
}

/// Build the issuer selected by configuration.
pub fn issuer_from_config(cfg: &AppConfig) -> anyhow::Result<Arc<dyn CredentialIssuer>> {
    match cfg.signing_mode {
        SigningMode::SharedKey => {
            let key = cfg
                .account_key
                .as_ref()
                .context("COURIER_ACCOUNT_KEY is required for shared-key signing")?;
            if key.expose().len() < MIN_SECRET_LEN {
                bail!("COURIER_ACCOUNT_KEY must be at least {MIN_SECRET_LEN} bytes");
            }
            Ok(Arc::new(SharedKeyIssuer::new(
                cfg.account_name.clone(),
                key.expose().as_bytes().to_vec(),
            )))
        }
        SigningMode::Delegated => {
            let secret = cfg
                .delegation_secret
                .as_ref()
                .context("COURIER_DELEGATION_SECRET is required for delegated signing")?;
            if secret.expose().len() < MIN_SECRET_LEN {
                bail!("COURIER_DELEGATION_SECRET must be at least {MIN_SECRET_LEN} bytes");
            }
            let authority = LocalKeyAuthority::new(secret.expose().as_bytes().to_vec());
            Ok(Arc::new(DelegatedIssuer::new(
                cfg.account_name.clone(),
                Arc::new(authority),
            )))
        }
    }
}

/// `[now, now + validity]` at second precision.
fn token_window(validity: Duration) -> Result<(DateTime<Utc>, DateTime<Utc>), IssuanceError> {
    if validity < Duration::seconds(1) {
        return Err(IssuanceError::InvalidValidity);
    }
    let not_before = Utc::now().trunc_subsecs(0);
    Ok((not_before, not_before + validity))
}

struct SignedFields {
    permissions: String,
    start: String,
    expiry: String,
    resource: String,
    key_id: String,
    key_start: String,
    key_expiry: String,
}

impl SignedFields {
    fn new(
        permissions: Permissions,
        not_before: &DateTime<Utc>,
        not_after: &DateTime<Utc>,
        resource: String,
        key: Option<&DelegationKeyInfo>,
    ) -> Self {
        Self {
            permissions: permissions.as_query(),
            start: format_timestamp(not_before),
            expiry: format_timestamp(not_after),
            resource,
            key_id: key.map(|k| k.key_id.clone()).unwrap_or_default(),
            key_start: key
                .map(|k| format_timestamp(&k.signed_start))
                .unwrap_or_default(),
            key_expiry: key
                .map(|k| format_timestamp(&k.signed_expiry))
                .unwrap_or_default(),
        }
    }

    fn string_to_sign(&self) -> String {
        [
            self.permissions.as_str(),
            &self.start,
            &self.expiry,
            &self.resource,
            RESOURCE_BLOB,
            &self.key_id,
            &self.key_start,
            &self.key_expiry,
        ]
        .join("\n")
    }
}

fn sign(key: &[u8], fields: &SignedFields) -> Result<String, IssuanceError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|err| IssuanceError::Signing(err.to_string()))?;
    mac.update(fields.string_to_sign().as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Token parameters after syntactic and temporal checks, before the signature check.
struct PresentedToken {
    permissions: Permissions,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    delegation: Option<DelegationKeyInfo>,
    signature: Vec<u8>,
}

impl PresentedToken {
    fn parse(params: &TokenParams, op: Operation, now: DateTime<Utc>) -> Result<Self, TokenError> {
        let permissions = params
            .sp
            .as_deref()
            .and_then(Permissions::parse)
            .ok_or(TokenError::Malformed("sp"))?;
        let not_before = params
            .st
            .as_deref()
            .and_then(parse_timestamp)
            .ok_or(TokenError::Malformed("st"))?;
        let not_after = params
            .se
            .as_deref()
            .and_then(parse_timestamp)
            .ok_or(TokenError::Malformed("se"))?;
        let signature = params
            .sig
            .as_deref()
            .and_then(|sig| URL_SAFE_NO_PAD.decode(sig).ok())
            .ok_or(TokenError::Malformed("sig"))?;

        let delegation = match (&params.skid, &params.skt, &params.ske) {
            (None, None, None) => None,
            (Some(key_id), Some(start), Some(expiry)) => Some(DelegationKeyInfo {
                key_id: key_id.clone(),
                signed_start: parse_timestamp(start).ok_or(TokenError::Malformed("skt"))?,
                signed_expiry: parse_timestamp(expiry).ok_or(TokenError::Malformed("ske"))?,
            }),
            _ => return Err(TokenError::Malformed("incomplete delegation fields")),
        };

        if params.sr.as_deref() != Some(RESOURCE_BLOB) {
            return Err(TokenError::WrongResource);
        }
        if !permissions.allows(op) {
            return Err(TokenError::PermissionDenied);
        }
        if now < not_before {
            return Err(TokenError::NotYetValid);
        }
        if now > not_after {
            return Err(TokenError::Expired);
        }

        Ok(Self {
            permissions,
            not_before,
            not_after,
            delegation,
            signature,
        })
    }

    fn check_signature(&self, key: &[u8], resource: String) -> Result<(), TokenError> {
        let fields = SignedFields::new(
            self.permissions,
            &self.not_before,
            &self.not_after,
            resource,
            self.delegation.as_ref(),
        );
        let mut mac = HmacSha256::new_from_slice(key).map_err(|_| TokenError::BadSignature)?;
        mac.update(fields.string_to_sign().as_bytes());
        mac.verify_slice(&self.signature)
            .map_err(|_| TokenError::BadSignature)
    }
}
