use serde::{Deserialize, Serialize};

use crate::api::{self, ChallengeType};

/// The status of an [`api::Authorization`].
///
/// See [RFC 8555 §7.1.6].
///
/// [RFC 8555 §7.1.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

impl AuthorizationStatus {
    /// Statuses that will never change again.
    pub fn is_final(&self) -> bool {
        !matches!(self, AuthorizationStatus::Pending)
    }
}

/// Proof-of-control record for a single identifier in an order.
///
/// On failure the CA reports the reason on the attempted challenge, e.g.
///
/// ```json
/// {
///   "type": "dns-01",
///   "status": "invalid",
///   "error": {
///     "type": "urn:ietf:params:acme:error:dns",
///     "detail": "DNS problem: NXDOMAIN looking up TXT for _acme-challenge.example.com",
///     "status": 400
///   },
///   "url": "https://example.com/acme/chall/afyChhlFB8GLLmIqEnqqcXzX0Ss3GBw6oUlKAGDG6lY",
///   "token": "YsNqBWZnyYjDun3aUC2CkCopOaqZRrI5hp3tUjxPLQU"
/// }
/// ```
///
/// See [RFC 8555 §7.1.4].
///
/// [RFC 8555 §7.1.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.4
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub identifier: api::Identifier,

    pub status: AuthorizationStatus,

    /// Uses RFC 3339 format. Required for valid authorizations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,

    /// For pending authorizations, the challenges that can be fulfilled; for valid or invalid
    /// ones, the challenge that was attempted.
    pub challenges: Vec<api::Challenge>,

    /// Present and true for authorizations created for a wildcard identifier. The identifier value
    /// then carries the base domain without the `*.` prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wildcard: Option<bool>,
}

impl Authorization {
    pub fn is_wildcard(&self) -> bool {
        self.wildcard.unwrap_or(false)
    }

    /// Identifier as it was requested in the order, restoring the `*.` prefix for wildcards.
    pub fn requested_identifier(&self) -> String {
        if self.is_wildcard() {
            format!("*.{}", self.identifier.value)
        } else {
            self.identifier.value.clone()
        }
    }

    pub fn challenge(&self, kind: ChallengeType) -> Option<&api::Challenge> {
        self.challenges.iter().find(|c| c.is_type(kind))
    }

    /// Concatenated errors of all attempted challenges.
    pub fn error_summary(&self) -> Option<String> {
        let errors = self
            .challenges
            .iter()
            .filter_map(|c| c.error.as_ref())
            .map(ToString::to_string)
            .collect::<Vec<_>>();

        (!errors.is_empty()).then(|| errors.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_identifier_is_restored() {
        let auth: Authorization = serde_json::from_str(
            r#"{
                "identifier": { "type": "dns", "value": "example.org" },
                "status": "pending",
                "wildcard": true,
                "challenges": [
                    { "type": "dns-01", "status": "pending", "url": "https://ca/chall/1", "token": "abc" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(auth.requested_identifier(), "*.example.org");
        assert!(auth.challenge(ChallengeType::Dns01).is_some());
        assert!(auth.challenge(ChallengeType::Http01).is_none());
        assert!(auth.error_summary().is_none());
    }
}
