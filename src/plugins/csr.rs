//! CSR plugins create the private key and request for an order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{Descriptors, PluginContext, PluginDescriptor, PluginOptions};
use crate::{cert, input::InputService, target::Target};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "plugin", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum CsrOptions {
    /// P-256 key.
    Ec {
        /// Keep the key of the previous certificate instead of generating a new one.
        #[serde(default)]
        reuse_private_key: bool,
    },
}

impl Default for CsrOptions {
    fn default() -> Self {
        CsrOptions::Ec {
            reuse_private_key: false,
        }
    }
}

/// A signed request and the key it was made for.
#[derive(Debug)]
pub struct CsrBundle {
    pub csr_der: Vec<u8>,
    pub private_key_pem: Zeroizing<String>,
}

pub trait CsrPlugin: Send + Sync {
    /// `cached_key_pem` is the key of the order's previous certificate, if any.
    fn generate(&self, target: &Target, cached_key_pem: Option<&str>) -> eyre::Result<CsrBundle>;
}

impl PluginOptions for CsrOptions {
    const CATEGORY: &'static str = "csr";

    type Plugin = dyn CsrPlugin;

    fn plugin_name(&self) -> &'static str {
        match self {
            CsrOptions::Ec { .. } => "ec",
        }
    }

    fn create(&self, _ctx: &PluginContext) -> eyre::Result<Box<dyn CsrPlugin>> {
        let CsrOptions::Ec { reuse_private_key } = *self;
        Ok(Box::new(Ec { reuse_private_key }))
    }
}

pub(super) fn descriptors() -> Descriptors<CsrOptions> {
    vec![Box::new(EcDescriptor)]
}

struct Ec {
    reuse_private_key: bool,
}

impl CsrPlugin for Ec {
    fn generate(&self, target: &Target, cached_key_pem: Option<&str>) -> eyre::Result<CsrBundle> {
        let key = match cached_key_pem.filter(|_| self.reuse_private_key) {
            Some(pem) => {
                log::debug!("Reusing private key for {}", target.common_name);
                cert::key_from_pem(pem)?
            }
            None => cert::create_p256_key(),
        };

        let identifiers = target.identifiers();
        let csr_der = cert::create_csr(&key, &identifiers)?;

        Ok(CsrBundle {
            csr_der,
            private_key_pem: cert::key_to_pem(&key)?,
        })
    }
}

struct EcDescriptor;

#[async_trait]
impl PluginDescriptor<CsrOptions> for EcDescriptor {
    fn name(&self) -> &'static str {
        "ec"
    }

    fn description(&self) -> &'static str {
        "Elliptic curve key (P-256)"
    }

    async fn configure(
        &self,
        _target: Option<&Target>,
        input: &dyn InputService,
    ) -> eyre::Result<CsrOptions> {
        let reuse_private_key = input
            .confirm("Reuse the private key when renewing?", false)
            .await?;

        Ok(CsrOptions::Ec { reuse_private_key })
    }
}
