//! Access tokens: signed, time-scoped, capability-limited credentials for
//! exactly one stored object.

use crate::models::object::ObjectAddress;
use axum::http::Method;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Resource kind marker carried in `sr`. Only single blobs are ever signed.
pub const RESOURCE_BLOB: &str = "b";

/// An operation a token holder may attempt against an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Delete,
    List,
}

impl Operation {
    /// Operation an HTTP request against a single object performs.
    pub fn for_method(method: &Method) -> Option<Self> {
        match *method {
            Method::GET | Method::HEAD => Some(Operation::Read),
            Method::PUT | Method::POST => Some(Operation::Write),
            Method::DELETE => Some(Operation::Delete),
            _ => None,
        }
    }

    const ALL: [Operation; 4] = [
        Operation::Read,
        Operation::Write,
        Operation::Delete,
        Operation::List,
    ];

    fn flag(self) -> char {
        match self {
            Operation::Read => 'r',
            Operation::Write => 'w',
            Operation::Delete => 'd',
            Operation::List => 'l',
        }
    }

    fn bit(self) -> u8 {
        match self {
            Operation::Read => 0b0001,
            Operation::Write => 0b0010,
            Operation::Delete => 0b0100,
            Operation::List => 0b1000,
        }
    }
}

/// Set of permitted operations, serialized as `sp` in canonical `rwdl` order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Permissions {
    bits: u8,
}

impl Permissions {
    pub const READ_ONLY: Permissions = Permissions {
        bits: 0b0001,
    };

    pub fn allows(&self, op: Operation) -> bool {
        self.bits & op.bit() != 0
    }

    pub fn as_query(&self) -> String {
        Operation::ALL
            .iter()
            .filter(|op| self.allows(**op))
            .map(|op| op.flag())
            .collect()
    }

    /// Parse an `sp` value. Unknown flags or an empty set are rejected.
    pub fn parse(value: &str) -> Option<Self> {
        let mut bits = 0u8;
        for c in value.chars() {
            let op = Operation::ALL.iter().find(|op| op.flag() == c)?;
            bits |= op.bit();
        }
        (bits != 0).then_some(Self { bits })
    }
}

/// Identity of the delegation key a token was signed with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationKeyInfo {
    pub key_id: String,
    pub signed_start: DateTime<Utc>,
    pub signed_expiry: DateTime<Utc>,
}

/// Which trust model produced a token's signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SigningBasis {
    SharedKey,
    Delegated(DelegationKeyInfo),
}

/// A signed read credential bound to one object.
#[derive(Clone, Debug)]
pub struct AccessToken {
    pub address: ObjectAddress,
    pub permissions: Permissions,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub basis: SigningBasis,
    pub signature: String,
}

impl AccessToken {
    /// Render the token as a URL query component (no leading `?`).
    pub fn to_query(&self) -> String {
        let mut query = format!(
            "sp={}&st={}&se={}&sr={}",
            self.permissions.as_query(),
            format_timestamp(&self.not_before),
            format_timestamp(&self.not_after),
            RESOURCE_BLOB,
        );
        if let SigningBasis::Delegated(key) = &self.basis {
            query.push_str(&format!(
                "&skid={}&skt={}&ske={}",
                key.key_id,
                format_timestamp(&key.signed_start),
                format_timestamp(&key.signed_expiry),
            ));
        }
        query.push_str("&sig=");
        query.push_str(&self.signature);
        query
    }

    /// Full fetch URL: the object's public address followed by the token.
    pub fn fetch_url(&self, base_url: &str) -> String {
        format!("{}?{}", self.address.url(base_url), self.to_query())
    }
}

/// Token parameters as presented on a fetch request.
///
/// Every field is optional so that a missing parameter surfaces as a token
/// rejection rather than a query parsing failure.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct TokenParams {
    pub sp: Option<String>,
    pub st: Option<String>,
    pub se: Option<String>,
    pub sr: Option<String>,
    pub skid: Option<String>,
    pub skt: Option<String>,
    pub ske: Option<String>,
    pub sig: Option<String>,
}

/// RFC 3339, second precision, `Z` suffix.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn methods_map_to_operations() {
        assert_eq!(Operation::for_method(&Method::GET), Some(Operation::Read));
        assert_eq!(Operation::for_method(&Method::HEAD), Some(Operation::Read));
        assert_eq!(Operation::for_method(&Method::PUT), Some(Operation::Write));
        assert_eq!(Operation::for_method(&Method::DELETE), Some(Operation::Delete));
        assert_eq!(Operation::for_method(&Method::OPTIONS), None);
    }

    #[test]
    fn permissions_parse_in_any_order() {
        let perms = Permissions::parse("lr").unwrap();
        assert!(perms.allows(Operation::Read));
        assert!(perms.allows(Operation::List));
        assert!(!perms.allows(Operation::Write));
        assert_eq!(perms.as_query(), "rl");
    }

    #[test]
    fn permissions_reject_unknown_and_empty() {
        assert!(Permissions::parse("rx").is_none());
        assert!(Permissions::parse("").is_none());
    }

    #[test]
    fn read_only_grants_nothing_else() {
        let perms = Permissions::READ_ONLY;
        assert_eq!(perms.as_query(), "r");
        assert!(!perms.allows(Operation::Write));
        assert!(!perms.allows(Operation::Delete));
        assert!(!perms.allows(Operation::List));
    }

    #[test]
    fn query_includes_delegation_fields() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let token = AccessToken {
            address: ObjectAddress::new("uploads", "a-123abc.json"),
            permissions: Permissions::READ_ONLY,
            not_before: start,
            not_after: start + chrono::Duration::hours(24),
            basis: SigningBasis::Delegated(DelegationKeyInfo {
                key_id: "k1".into(),
                signed_start: start - chrono::Duration::minutes(15),
                signed_expiry: start + chrono::Duration::minutes(1),
            }),
            signature: "c2ln".into(),
        };

        assert_eq!(
            token.to_query(),
            "sp=r&st=2026-03-01T12:00:00Z&se=2026-03-02T12:00:00Z&sr=b\
             &skid=k1&skt=2026-03-01T11:45:00Z&ske=2026-03-01T12:01:00Z&sig=c2ln"
        );
        assert_eq!(
            token.fetch_url("http://localhost:3000"),
            format!("http://localhost:3000/uploads/a-123abc.json?{}", token.to_query())
        );
    }

    #[test]
    fn timestamps_round_trip_at_second_precision() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_timestamp(&format_timestamp(&ts)), Some(ts));
        assert!(parse_timestamp("yesterday").is_none());
    }
}
