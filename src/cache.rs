//! Issued certificates, kept between runs.
//!
//! The cached certificate of an order is the "old" certificate on its next renewal: installation
//! plugins get it next to the new one, stores may delete it, and its key can be reused.

use std::path::PathBuf;

use eyre::WrapErr as _;
use zeroize::Zeroizing;

use crate::{
    cert::CertificateInfo,
    order::Order,
    util::{write_atomic, write_private},
};

#[derive(Debug, Clone)]
pub struct CertificateCache {
    dir: PathBuf,
}

impl CertificateCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CertificateCache { dir: dir.into() }
    }

    fn chain_file(&self, order: &Order) -> PathBuf {
        self.dir.join(format!("{}.pem", order.cache_key()))
    }

    fn key_file(&self, order: &Order) -> PathBuf {
        self.dir.join(format!("{}-key.pem", order.cache_key()))
    }

    /// The certificate last issued for `order`. Unreadable cache entries are treated as missing.
    pub async fn load(&self, order: &Order) -> Option<CertificateInfo> {
        let chain_file = self.chain_file(order);

        let chain = match tokio::fs::read_to_string(&chain_file).await {
            Ok(chain) => chain,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                log::warn!("Unable to read cached {}: {err}", chain_file.display());
                return None;
            }
        };

        let key = tokio::fs::read_to_string(self.key_file(order))
            .await
            .ok()
            .map(Zeroizing::new);

        match CertificateInfo::parse(chain, key) {
            Ok(mut info) => {
                info.cache_file = Some(chain_file);
                Some(info)
            }
            Err(err) => {
                log::warn!("Ignoring cached {}: {err:#}", chain_file.display());
                None
            }
        }
    }

    /// Caches `certificate` for `order`, replacing the previous one.
    pub async fn save(&self, order: &Order, certificate: &mut CertificateInfo) -> eyre::Result<()> {
        let chain_file = self.chain_file(order);

        write_atomic(&chain_file, certificate.chain_pem())
            .await
            .wrap_err("caching certificate")?;

        let key_file = self.key_file(order);
        match certificate.private_key_pem() {
            Some(key) => write_private(&key_file, key).await?,
            // a user supplied CSR has no key here; drop any key of an earlier certificate
            None => match tokio::fs::remove_file(&key_file).await {
                Err(err) if err.kind() != std::io::ErrorKind::NotFound => return Err(err.into()),
                _ => {}
            },
        }

        log::debug!("Cached certificate in {}", chain_file.display());
        certificate.cache_file = Some(chain_file);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        target::{Target, TargetPart},
        test::self_signed,
    };

    fn order(part: Option<&str>) -> Order {
        let target = Target::new("test", None, vec![TargetPart::new(None, ["example.com"])]);
        Order::new("renewal1", target, None, part.map(str::to_owned))
    }

    #[tokio::test]
    async fn cached_certificate_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CertificateCache::new(dir.path());
        let order = order(None);

        assert!(cache.load(&order).await.is_none());

        let mut certificate = self_signed(&["example.com"]);
        cache.save(&order, &mut certificate).await.unwrap();
        assert_eq!(
            certificate.cache_file.as_deref(),
            Some(dir.path().join("renewal1.pem").as_path())
        );

        let cached = cache.load(&order).await.unwrap();
        assert_eq!(cached.thumbprint, certificate.thumbprint);
        assert_eq!(cached.private_key_pem(), certificate.private_key_pem());
    }

    #[tokio::test]
    async fn split_orders_use_own_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CertificateCache::new(dir.path());

        let mut first = self_signed(&["a.example.com"]);
        let mut second = self_signed(&["b.example.com"]);
        cache.save(&order(Some("a.example.com")), &mut first).await.unwrap();
        cache.save(&order(Some("b.example.com")), &mut second).await.unwrap();

        let cached = cache.load(&order(Some("a.example.com"))).await.unwrap();
        assert_eq!(cached.thumbprint, first.thumbprint);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cached_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt as _;

        let dir = tempfile::tempdir().unwrap();
        let mut certificate = self_signed(&["example.com"]);
        CertificateCache::new(dir.path())
            .save(&order(None), &mut certificate)
            .await
            .unwrap();

        let key = std::fs::metadata(dir.path().join("renewal1-key.pem")).unwrap();
        assert_eq!(key.permissions().mode() & 0o777, 0o600);
    }

    #[tokio::test]
    async fn garbage_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("renewal1.pem"), "not a certificate").unwrap();

        assert!(CertificateCache::new(dir.path())
            .load(&order(None))
            .await
            .is_none());
    }
}
