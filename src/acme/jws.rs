//! Request signing, see [RFC 8555 §6.2](https://datatracker.ietf.org/doc/html/rfc8555#section-6.2).

use ecdsa::signature::Signer as _;
use eyre::eyre;
use serde::{Deserialize, Serialize};

use crate::{acme::key::AccountKey, util::base64url};

/// Protected header of every signed request.
///
/// `newAccount` requests carry the public key (`jwk`); everything after that refers to the account
/// URL (`kid`). The two fields are mutually exclusive.
#[derive(Debug, Serialize, Deserialize, Default)]
pub(crate) struct JwsProtectedHeader {
    alg: String,
    nonce: String,
    url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,

    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

impl JwsProtectedHeader {
    pub(crate) fn new_jwk(jwk: Jwk, url: &str, nonce: String) -> Self {
        JwsProtectedHeader {
            alg: "ES256".to_owned(),
            url: url.to_owned(),
            nonce,
            jwk: Some(jwk),
            ..Default::default()
        }
    }

    pub(crate) fn new_kid(kid: &str, url: &str, nonce: String) -> Self {
        JwsProtectedHeader {
            alg: "ES256".to_owned(),
            url: url.to_owned(),
            nonce,
            kid: Some(kid.to_owned()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct Jwk {
    alg: String,
    crv: String,
    kty: String,
    #[serde(rename = "use")]
    _use: String,
    x: String,
    y: String,
}

impl TryFrom<&AccountKey> for Jwk {
    type Error = eyre::Error;

    fn try_from(key: &AccountKey) -> eyre::Result<Self> {
        let point = key.signing_key().verifying_key().to_encoded_point(false);

        let x = point.x().ok_or_else(|| eyre!("public key has no x coordinate"))?;
        let y = point.y().ok_or_else(|| eyre!("public key has no y coordinate"))?;

        Ok(Jwk {
            alg: "ES256".to_owned(),
            kty: "EC".to_owned(),
            crv: "P-256".to_owned(),
            _use: "sig".to_owned(),
            x: base64url(x),
            y: base64url(y),
        })
    }
}

/// Thumbprint input per RFC 7638: required members only, in lexical order.
#[derive(Debug, Serialize, Clone)]
pub(crate) struct JwkThumb<'a> {
    crv: &'a str,
    kty: &'a str,
    x: &'a str,
    y: &'a str,
}

impl<'a> From<&'a Jwk> for JwkThumb<'a> {
    fn from(jwk: &'a Jwk) -> Self {
        JwkThumb {
            crv: &jwk.crv,
            kty: &jwk.kty,
            x: &jwk.x,
            y: &jwk.y,
        }
    }
}

/// <https://datatracker.ietf.org/doc/html/rfc7515#section-7.2.2>
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FlattenedJsonJws {
    protected: String,
    payload: String,
    signature: String,
}

/// Signs `payload` under `protected` and returns the flattened JSON serialization.
pub(crate) fn sign<T: Serialize + ?Sized>(
    protected: &JwsProtectedHeader,
    key: &AccountKey,
    payload: &T,
) -> eyre::Result<String> {
    let protected = base64url(&serde_json::to_string(protected)?);

    let payload = match serde_json::to_string(payload)?.as_str() {
        // POST-as-GET: the payload is the empty string itself, not its encoding
        "\"\"" => String::new(),
        json => base64url(json),
    };

    let signature: p256::ecdsa::Signature = key
        .signing_key()
        .try_sign(format!("{protected}.{payload}").as_bytes())?;

    let jws = FlattenedJsonJws {
        protected,
        payload,
        signature: base64url(&signature.to_bytes()),
    };

    Ok(serde_json::to_string(&jws)?)
}

#[cfg(test)]
mod tests {
    use base64::prelude::*;
    use ecdsa::signature::Verifier as _;

    use super::*;
    use crate::api;

    #[test]
    fn post_as_get_has_empty_payload() {
        let key = AccountKey::generate();
        let header = JwsProtectedHeader::new_kid("https://ca/acct/1", "https://ca/order/1", "n".into());

        let jws = sign(&header, &key, &api::EmptyString).unwrap();
        let jws: FlattenedJsonJws = serde_json::from_str(&jws).unwrap();

        assert_eq!(jws.payload, "");

        let signature = BASE64_URL_SAFE_NO_PAD.decode(&jws.signature).unwrap();
        let signature = p256::ecdsa::Signature::from_slice(&signature).unwrap();
        key.signing_key()
            .verifying_key()
            .verify(format!("{}.", jws.protected).as_bytes(), &signature)
            .unwrap();
    }
}
