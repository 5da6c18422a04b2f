//! Store plugins persist issued certificates where services can pick them up.

use std::path::PathBuf;

use async_trait::async_trait;
use eyre::WrapErr as _;
use serde::{Deserialize, Serialize};

use super::{Descriptors, PluginContext, PluginDescriptor, PluginOptions};
use crate::{
    cert::CertificateInfo,
    input::InputService,
    target::Target,
    util::{safe_file_name, write_private},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "plugin", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum StoreOptions {
    /// Chain, certificate and key as PEM files in a directory.
    PemFiles { path: PathBuf },

    /// Keep the certificate in the cache only.
    None,
}

/// Where a store put a certificate, handed to installation plugins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    pub name: &'static str,
    pub path: Option<PathBuf>,
}

#[async_trait]
pub trait StorePlugin: Send + Sync {
    async fn save(&self, certificate: &CertificateInfo) -> eyre::Result<StoreInfo>;

    /// Removes a certificate that has been replaced.
    async fn delete(&self, certificate: &CertificateInfo) -> eyre::Result<()>;
}

impl PluginOptions for StoreOptions {
    const CATEGORY: &'static str = "store";

    type Plugin = dyn StorePlugin;

    fn plugin_name(&self) -> &'static str {
        match self {
            StoreOptions::PemFiles { .. } => "pemfiles",
            StoreOptions::None => "none",
        }
    }

    fn create(&self, _ctx: &PluginContext) -> eyre::Result<Box<dyn StorePlugin>> {
        Ok(match self {
            StoreOptions::PemFiles { path } => Box::new(PemFiles { path: path.clone() }),
            StoreOptions::None => Box::new(NoStore),
        })
    }
}

pub(super) fn descriptors() -> Descriptors<StoreOptions> {
    vec![Box::new(PemFilesDescriptor), Box::new(NoStoreDescriptor)]
}

struct PemFiles {
    path: PathBuf,
}

impl PemFiles {
    fn base_name(certificate: &CertificateInfo) -> String {
        safe_file_name(certificate.subject_name())
    }
}

#[async_trait]
impl StorePlugin for PemFiles {
    async fn save(&self, certificate: &CertificateInfo) -> eyre::Result<StoreInfo> {
        tokio::fs::create_dir_all(&self.path)
            .await
            .wrap_err_with(|| format!("creating {}", self.path.display()))?;

        let name = Self::base_name(certificate);

        let chain = self.path.join(format!("{name}-chain.pem"));
        tokio::fs::write(&chain, certificate.chain_pem()).await?;
        log::info!("Exporting .pem files to {}", self.path.display());

        let crt = self.path.join(format!("{name}-crt.pem"));
        tokio::fs::write(&crt, certificate.certificate_pem()?).await?;

        if let Some(key) = certificate.private_key_pem() {
            let key_file = self.path.join(format!("{name}-key.pem"));
            write_private(&key_file, key).await?;
        }

        Ok(StoreInfo {
            name: "pemfiles",
            path: Some(self.path.clone()),
        })
    }

    async fn delete(&self, certificate: &CertificateInfo) -> eyre::Result<()> {
        // files are named by subject, so a renewed certificate already replaced them
        log::debug!(
            "Not removing .pem files of {} ({})",
            certificate.subject_name(),
            certificate.thumbprint
        );
        Ok(())
    }
}

struct NoStore;

#[async_trait]
impl StorePlugin for NoStore {
    async fn save(&self, _certificate: &CertificateInfo) -> eyre::Result<StoreInfo> {
        Ok(StoreInfo {
            name: "none",
            path: None,
        })
    }

    async fn delete(&self, _certificate: &CertificateInfo) -> eyre::Result<()> {
        Ok(())
    }
}

struct PemFilesDescriptor;

#[async_trait]
impl PluginDescriptor<StoreOptions> for PemFilesDescriptor {
    fn name(&self) -> &'static str {
        "pemfiles"
    }

    fn description(&self) -> &'static str {
        "PEM encoded files (Apache, nginx, etc.)"
    }

    async fn configure(
        &self,
        _target: Option<&Target>,
        input: &dyn InputService,
    ) -> eyre::Result<StoreOptions> {
        let path = input.request_string("Path to the .pem files").await?;

        Ok(StoreOptions::PemFiles {
            path: PathBuf::from(path),
        })
    }
}

struct NoStoreDescriptor;

#[async_trait]
impl PluginDescriptor<StoreOptions> for NoStoreDescriptor {
    fn name(&self) -> &'static str {
        "none"
    }

    fn description(&self) -> &'static str {
        "No (additional) store steps"
    }

    async fn configure(
        &self,
        _target: Option<&Target>,
        _input: &dyn InputService,
    ) -> eyre::Result<StoreOptions> {
        Ok(StoreOptions::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{plugin_context, self_signed};

    #[tokio::test]
    async fn pem_files() {
        let dir = tempfile::tempdir().unwrap();
        let certificate = self_signed(&["*.example.com", "example.com"]);

        let store = StoreOptions::PemFiles {
            path: dir.path().join("pem"),
        }
        .create(&plugin_context())
        .unwrap();

        let info = store.save(&certificate).await.unwrap();
        assert_eq!(info.path.as_deref(), Some(dir.path().join("pem").as_path()));

        let name = safe_file_name(certificate.subject_name());
        for suffix in ["chain", "crt", "key"] {
            let file = dir.path().join("pem").join(format!("{name}-{suffix}.pem"));
            assert!(file.exists(), "{}", file.display());
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;

            let key = dir.path().join("pem").join(format!("{name}-key.pem"));
            let mode = std::fs::metadata(key).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        store.delete(&certificate).await.unwrap();
    }
}
