//! ACME JSON payloads.
//!
//! These mirror the RFC 8555 resource model closely. The renewal machinery only looks at a handful
//! of fields; everything else is kept for logging and debugging.

use std::fmt;

use serde::{
    ser::{SerializeMap as _, Serializer},
    Deserialize, Serialize,
};

mod account;
mod authorization;
mod challenge;
mod directory;
mod finalize;
mod identifier;
mod order;

pub use self::{
    account::Account,
    authorization::{Authorization, AuthorizationStatus},
    challenge::{Challenge, ChallengeStatus, ChallengeType},
    directory::{Directory, DirectoryMeta},
    finalize::Finalize,
    identifier::Identifier,
    order::{Order, OrderStatus},
};

/// Serializes to `""`.
///
/// Used as the payload of POST-as-GET requests.
pub struct EmptyString;

impl Serialize for EmptyString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("")
    }
}

/// Serializes to `{}`.
///
/// Used as the payload when answering a challenge.
pub struct EmptyObject;

impl Serialize for EmptyObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_map(Some(0))?.end()
    }
}

const ERROR_NS: &str = "urn:ietf:params:acme:error:";
const LEGACY_ERROR_NS: &str = "urn:acme:error:";

/// Problem document returned by the CA, see [RFC 8555 §6.7].
///
/// [RFC 8555 §6.7]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.7
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub _type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subproblems: Option<Vec<Subproblem>>,
}

impl Problem {
    pub(crate) fn new(_type: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            _type: _type.into(),
            detail: Some(detail.into()),
            ..Default::default()
        }
    }

    /// Problem type without the ACME URN namespace.
    pub fn kind(&self) -> &str {
        self._type
            .strip_prefix(ERROR_NS)
            .or_else(|| self._type.strip_prefix(LEGACY_ERROR_NS))
            .unwrap_or(&self._type)
    }

    /// Returns true if the nonce was rejected and the request can be repeated with a fresh one.
    pub fn is_bad_nonce(&self) -> bool {
        self.kind() == "badNonce"
    }

    /// Returns true if the CA is throttling us.
    pub fn is_rate_limited(&self) -> bool {
        self.kind() == "rateLimited"
    }

    /// Returns true for CA side failures (`serverInternal` or any 5xx status).
    pub fn is_server_error(&self) -> bool {
        self.kind() == "serverInternal" || self.status.is_some_and(|status| status >= 500)
    }

    /// Returns true if the request could not be sent or no response was read.
    pub fn is_network_error(&self) -> bool {
        self._type == "httpReqError" && self.status.is_none()
    }

    /// Returns true if problem details indicate that JWS verification failed.
    pub fn is_jws_verification_error(&self) -> bool {
        self.kind() == "malformed"
            && self
                .detail
                .as_deref()
                .is_some_and(|detail| detail == "JWS verification error")
    }

    /// Problems that are worth repeating the same request for.
    pub fn is_transient(&self) -> bool {
        self.is_bad_nonce()
            || self.is_rate_limited()
            || self.is_server_error()
            || self.is_network_error()
            || self.is_jws_verification_error()
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {detail}", self._type)?,
            _ => write!(f, "{}", self._type)?,
        }

        for sub in self.subproblems.iter().flatten() {
            write!(f, "; {sub}")?;
        }

        Ok(())
    }
}

impl std::error::Error for Problem {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subproblem {
    #[serde(rename = "type")]
    pub _type: String,
    pub detail: Option<String>,
    pub identifier: Option<identifier::Identifier>,
}

impl fmt::Display for Subproblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(identifier) = &self.identifier {
            write!(f, "[{}] ", identifier.value)?;
        }

        match &self.detail {
            Some(detail) => write!(f, "{}: {detail}", self._type),
            _ => write!(f, "{}", self._type),
        }
    }
}
