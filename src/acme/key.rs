use eyre::{eyre, WrapErr as _};
use pkcs8::{DecodePrivateKey as _, EncodePrivateKey as _};
use zeroize::Zeroizing;

/// The account key signing every request to the CA.
#[derive(Clone, Debug)]
pub(crate) struct AccountKey {
    signing_key: p256::ecdsa::SigningKey,

    /// Account URL, known once `newAccount` has answered.
    key_id: Option<String>,
}

impl AccountKey {
    pub(crate) fn generate() -> AccountKey {
        Self::from_key(crate::cert::create_p256_key())
    }

    pub(crate) fn from_pem(pem: &str) -> eyre::Result<AccountKey> {
        let signing_key = p256::ecdsa::SigningKey::from_pkcs8_pem(pem)
            .wrap_err("failed to read account key PEM")?;
        Ok(Self::from_key(signing_key))
    }

    fn from_key(signing_key: p256::ecdsa::SigningKey) -> AccountKey {
        AccountKey {
            signing_key,
            key_id: None,
        }
    }

    pub(crate) fn to_pem(&self) -> eyre::Result<Zeroizing<String>> {
        self.signing_key
            .to_pkcs8_pem(pem::LineEnding::LF)
            .wrap_err("failed to encode account key")
    }

    pub(crate) fn signing_key(&self) -> &p256::ecdsa::SigningKey {
        &self.signing_key
    }

    pub(crate) fn key_id(&self) -> eyre::Result<&str> {
        self.key_id
            .as_deref()
            .ok_or_else(|| eyre!("account key has not been registered"))
    }

    pub(crate) fn set_key_id(&mut self, kid: String) {
        self.key_id = Some(kid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pem_round_trip_keeps_key() {
        let key = AccountKey::generate();
        let pem = key.to_pem().unwrap();
        let loaded = AccountKey::from_pem(&pem).unwrap();

        assert_eq!(
            key.signing_key().verifying_key(),
            loaded.signing_key().verifying_key()
        );
        assert!(loaded.key_id().is_err());
    }
}
