//! Target plugins decide which identifiers a renewal requests.

use std::path::PathBuf;

use async_trait::async_trait;
use eyre::WrapErr as _;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{Descriptors, PluginContext, PluginDescriptor, PluginOptions};
use crate::{
    cert::UserCsr,
    error::ConfigurationError,
    input::InputService,
    target::{is_dns_name, Target, TargetPart},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "plugin", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum TargetOptions {
    /// A fixed list of host names.
    Manual {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        common_name: Option<String>,
        hosts: Vec<String>,
    },

    /// Host names grouped by the site serving them.
    Sites { sites: Vec<SiteBinding> },

    /// Identifiers taken from a CSR created by the user.
    Csr {
        csr_path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pk_path: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteBinding {
    pub site_id: u64,
    pub hosts: Vec<String>,
}

#[async_trait]
pub trait TargetPlugin: Send + Sync {
    /// Builds the current target. Called on every run, so changes to the source are picked up.
    async fn generate(&self) -> eyre::Result<Target>;
}

impl PluginOptions for TargetOptions {
    const CATEGORY: &'static str = "target";

    type Plugin = dyn TargetPlugin;

    fn plugin_name(&self) -> &'static str {
        match self {
            TargetOptions::Manual { .. } => "manual",
            TargetOptions::Sites { .. } => "sites",
            TargetOptions::Csr { .. } => "csr",
        }
    }

    fn create(&self, _ctx: &PluginContext) -> eyre::Result<Box<dyn TargetPlugin>> {
        Ok(match self.clone() {
            TargetOptions::Manual { common_name, hosts } => Box::new(Manual { common_name, hosts }),
            TargetOptions::Sites { sites } => Box::new(Sites { sites }),
            TargetOptions::Csr { csr_path, pk_path } => Box::new(Csr { csr_path, pk_path }),
        })
    }
}

pub(super) fn descriptors() -> Descriptors<TargetOptions> {
    vec![
        Box::new(ManualDescriptor),
        Box::new(SitesDescriptor),
        Box::new(CsrDescriptor),
    ]
}

fn check_identifiers<'a>(identifiers: impl IntoIterator<Item = &'a str>) -> eyre::Result<()> {
    for identifier in identifiers {
        if !is_dns_name(identifier) {
            return Err(ConfigurationError::Invalid(format!(
                "`{identifier}` is not a valid host name"
            ))
            .into());
        }
    }

    Ok(())
}

fn split_hosts(input: &str) -> Vec<String> {
    input
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|host| !host.is_empty())
        .map(str::to_owned)
        .collect()
}

struct Manual {
    common_name: Option<String>,
    hosts: Vec<String>,
}

#[async_trait]
impl TargetPlugin for Manual {
    async fn generate(&self) -> eyre::Result<Target> {
        let part = TargetPart::new(None, &self.hosts);
        check_identifiers(part.identifiers.iter().map(String::as_str))?;

        let friendly_name = self
            .common_name
            .clone()
            .or_else(|| part.identifiers.first().cloned())
            .unwrap_or_default();

        let target = Target::new(friendly_name, self.common_name.as_deref(), vec![part]);

        if target.is_empty() {
            return Err(ConfigurationError::EmptyTarget.into());
        }

        Ok(target)
    }
}

struct Sites {
    sites: Vec<SiteBinding>,
}

#[async_trait]
impl TargetPlugin for Sites {
    async fn generate(&self) -> eyre::Result<Target> {
        let parts = self
            .sites
            .iter()
            .map(|site| TargetPart::new(Some(site.site_id), &site.hosts))
            .collect::<Vec<_>>();

        check_identifiers(
            parts
                .iter()
                .flat_map(|part| part.identifiers.iter().map(String::as_str)),
        )?;

        let name = self
            .sites
            .iter()
            .map(|site| format!("#{}", site.site_id))
            .collect::<Vec<_>>()
            .join(", ");

        let target = Target::new(format!("Sites {name}"), None, parts);

        if target.is_empty() {
            return Err(ConfigurationError::EmptyTarget.into());
        }

        Ok(target)
    }
}

struct Csr {
    csr_path: PathBuf,
    pk_path: Option<PathBuf>,
}

#[async_trait]
impl TargetPlugin for Csr {
    async fn generate(&self) -> eyre::Result<Target> {
        let pem = tokio::fs::read_to_string(&self.csr_path)
            .await
            .wrap_err_with(|| format!("reading CSR {}", self.csr_path.display()))?;

        let csr = UserCsr::from_pem(&pem)
            .wrap_err_with(|| format!("in {}", self.csr_path.display()))?;

        let mut part = TargetPart::new(None, &csr.identifiers);
        if let Some(cn) = &csr.common_name {
            part.add_identifier(cn);
        }

        let mut target = Target::new(
            format!("CSR {}", self.csr_path.display()),
            csr.common_name.as_deref(),
            vec![part],
        );

        if target.is_empty() {
            return Err(ConfigurationError::EmptyTarget.into());
        }

        target.user_csr_bytes = Some(csr.der);

        if let Some(pk_path) = &self.pk_path {
            let key = Zeroizing::new(
                tokio::fs::read_to_string(pk_path)
                    .await
                    .wrap_err_with(|| format!("reading private key {}", pk_path.display()))?,
            );
            target.user_private_key_pem = Some(key);
        }

        Ok(target)
    }
}

struct ManualDescriptor;

#[async_trait]
impl PluginDescriptor<TargetOptions> for ManualDescriptor {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn description(&self) -> &'static str {
        "Manually entered host names"
    }

    async fn configure(
        &self,
        _target: Option<&Target>,
        input: &dyn InputService,
    ) -> eyre::Result<TargetOptions> {
        let hosts = split_hosts(&input.request_string("Host names, comma separated").await?);
        check_identifiers(hosts.iter().map(String::as_str))?;

        let common_name = if hosts.len() > 1 {
            let idx = input.choose("Common name", &hosts).await?;
            Some(hosts[idx].clone())
        } else {
            None
        };

        Ok(TargetOptions::Manual { common_name, hosts })
    }
}

struct SitesDescriptor;

#[async_trait]
impl PluginDescriptor<TargetOptions> for SitesDescriptor {
    fn name(&self) -> &'static str {
        "sites"
    }

    fn description(&self) -> &'static str {
        "Host names of one or more sites"
    }

    async fn configure(
        &self,
        _target: Option<&Target>,
        input: &dyn InputService,
    ) -> eyre::Result<TargetOptions> {
        let mut sites = Vec::new();

        loop {
            let answer = input.request_string("Site id (empty to finish)").await?;
            if answer.is_empty() {
                break;
            }

            let Ok(site_id) = answer.parse::<u64>() else {
                input.show("Not a site id", &answer).await;
                continue;
            };

            let hosts = split_hosts(
                &input
                    .request_string(&format!("Host names of site {site_id}"))
                    .await?,
            );
            check_identifiers(hosts.iter().map(String::as_str))?;

            sites.push(SiteBinding { site_id, hosts });
        }

        if sites.is_empty() {
            return Err(ConfigurationError::EmptyTarget.into());
        }

        Ok(TargetOptions::Sites { sites })
    }
}

struct CsrDescriptor;

#[async_trait]
impl PluginDescriptor<TargetOptions> for CsrDescriptor {
    fn name(&self) -> &'static str {
        "csr"
    }

    fn description(&self) -> &'static str {
        "Certificate request created elsewhere"
    }

    async fn configure(
        &self,
        _target: Option<&Target>,
        input: &dyn InputService,
    ) -> eyre::Result<TargetOptions> {
        let csr_path = PathBuf::from(input.request_string("Path to the CSR (PEM)").await?);
        let pk_path = input
            .request_string("Path to its private key (optional)")
            .await?;

        Ok(TargetOptions::Csr {
            csr_path,
            pk_path: (!pk_path.is_empty()).then(|| PathBuf::from(pk_path)),
        })
    }
}
