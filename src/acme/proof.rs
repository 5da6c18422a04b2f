use sha2::{Digest as _, Sha256};

use crate::{
    acme::{
        jws::{Jwk, JwkThumb},
        key::AccountKey,
    },
    api::ChallengeType,
    util::base64url,
};

/// `<token>.<base64url(JWK thumbprint)>`, see [RFC 8555 §8.1].
///
/// [RFC 8555 §8.1]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.1
pub(crate) fn key_authorization(token: &str, key: &AccountKey) -> eyre::Result<String> {
    let jwk = Jwk::try_from(key)?;
    let thumb = serde_json::to_string(&JwkThumb::from(&jwk))?;
    let digest = base64url(&Sha256::digest(thumb));

    Ok(format!("{token}.{digest}"))
}

/// What a validation plugin has to publish for one challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeProof {
    /// Serve `content` at `http://<identifier>/<path>`.
    Http01 { path: String, content: String },

    /// Publish `value` as a TXT record at `record_name`.
    Dns01 { record_name: String, value: String },

    /// Serve a self-signed certificate carrying `digest` in the acmeIdentifier extension.
    TlsAlpn01 { digest: [u8; 32] },
}

impl ChallengeProof {
    pub fn new(kind: ChallengeType, identifier: &str, token: &str, key_authorization: &str) -> Self {
        match kind {
            ChallengeType::Http01 => ChallengeProof::Http01 {
                path: format!(".well-known/acme-challenge/{token}"),
                content: key_authorization.to_owned(),
            },
            ChallengeType::Dns01 => ChallengeProof::Dns01 {
                record_name: format!(
                    "_acme-challenge.{}",
                    identifier.trim_start_matches("*.")
                ),
                value: base64url(&Sha256::digest(key_authorization)),
            },
            ChallengeType::TlsAlpn01 => ChallengeProof::TlsAlpn01 {
                digest: Sha256::digest(key_authorization).into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_record_strips_wildcard() {
        let proof = ChallengeProof::new(ChallengeType::Dns01, "*.example.com", "token", "token.x");

        let ChallengeProof::Dns01 { record_name, value } = proof else {
            panic!("expected dns proof");
        };

        assert_eq!(record_name, "_acme-challenge.example.com");
        assert_eq!(value.len(), 43);
    }

    #[test]
    fn key_authorization_starts_with_token() {
        let key = AccountKey::generate();
        let auth = key_authorization("abc", &key).unwrap();

        assert!(auth.starts_with("abc."));
        assert_eq!(auth, key_authorization("abc", &key).unwrap());
    }
}
