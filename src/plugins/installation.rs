//! Installation plugins make services use a newly stored certificate.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{store::StoreInfo, Descriptors, PluginContext, PluginDescriptor, PluginOptions};
use crate::{cert::CertificateInfo, input::InputService, script, target::Target};

const DEFAULT_ARGUMENTS: &str = "{Thumbprint} {OldThumbprint} {CommonName} {CacheFile}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "plugin", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum InstallationOptions {
    /// Run a program after the certificate was stored.
    Script {
        script: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<String>,
    },

    None,
}

#[async_trait]
pub trait InstallationPlugin: Send + Sync {
    /// `old` is the certificate being replaced, absent on the first run. Returns false when the
    /// plugin decided there was nothing to do.
    async fn install(
        &self,
        stores: &[StoreInfo],
        new: &CertificateInfo,
        old: Option<&CertificateInfo>,
    ) -> eyre::Result<bool>;
}

impl PluginOptions for InstallationOptions {
    const CATEGORY: &'static str = "installation";

    type Plugin = dyn InstallationPlugin;

    fn plugin_name(&self) -> &'static str {
        match self {
            InstallationOptions::Script { .. } => "script",
            InstallationOptions::None => "none",
        }
    }

    fn create(&self, _ctx: &PluginContext) -> eyre::Result<Box<dyn InstallationPlugin>> {
        Ok(match self {
            InstallationOptions::Script { script, arguments } => Box::new(Script {
                script: script.clone(),
                arguments: arguments
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ARGUMENTS.to_owned()),
            }),
            InstallationOptions::None => Box::new(NoInstallation),
        })
    }
}

pub(super) fn descriptors() -> Descriptors<InstallationOptions> {
    vec![Box::new(ScriptDescriptor), Box::new(NoInstallationDescriptor)]
}

struct Script {
    script: PathBuf,
    arguments: String,
}

#[async_trait]
impl InstallationPlugin for Script {
    async fn install(
        &self,
        stores: &[StoreInfo],
        new: &CertificateInfo,
        old: Option<&CertificateInfo>,
    ) -> eyre::Result<bool> {
        let cache_file = new
            .cache_file
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_default();

        let store_path = stores
            .iter()
            .find_map(|store| store.path.as_ref())
            .map(|path| path.display().to_string())
            .unwrap_or_default();

        let args = script::expand_arguments(
            &self.arguments,
            &[
                ("Thumbprint", new.thumbprint.as_str()),
                (
                    "OldThumbprint",
                    old.map(|cert| cert.thumbprint.as_str()).unwrap_or_default(),
                ),
                ("CommonName", new.subject_name()),
                ("CacheFile", cache_file.as_str()),
                ("StorePath", store_path.as_str()),
            ],
        );

        script::run(&self.script, &args).await?;
        Ok(true)
    }
}

struct NoInstallation;

#[async_trait]
impl InstallationPlugin for NoInstallation {
    async fn install(
        &self,
        _stores: &[StoreInfo],
        _new: &CertificateInfo,
        _old: Option<&CertificateInfo>,
    ) -> eyre::Result<bool> {
        Ok(false)
    }
}

struct ScriptDescriptor;

#[async_trait]
impl PluginDescriptor<InstallationOptions> for ScriptDescriptor {
    fn name(&self) -> &'static str {
        "script"
    }

    fn description(&self) -> &'static str {
        "Start external script or program"
    }

    async fn configure(
        &self,
        _target: Option<&Target>,
        input: &dyn InputService,
    ) -> eyre::Result<InstallationOptions> {
        let script = PathBuf::from(input.request_string("Path to the script").await?);

        input
            .show(
                "Placeholders",
                "{Thumbprint} {OldThumbprint} {CommonName} {CacheFile} {StorePath}",
            )
            .await;
        let arguments = input
            .request_string("Arguments (empty for the default)")
            .await?;

        Ok(InstallationOptions::Script {
            script,
            arguments: (!arguments.is_empty()).then_some(arguments),
        })
    }
}

struct NoInstallationDescriptor;

#[async_trait]
impl PluginDescriptor<InstallationOptions> for NoInstallationDescriptor {
    fn name(&self) -> &'static str {
        "none"
    }

    fn description(&self) -> &'static str {
        "No (additional) installation steps"
    }

    async fn configure(
        &self,
        _target: Option<&Target>,
        _input: &dyn InputService,
    ) -> eyre::Result<InstallationOptions> {
        Ok(InstallationOptions::None)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test::{plugin_context, self_signed};

    #[tokio::test]
    async fn script_gets_thumbprints() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("args.log");
        let hook = dir.path().join("install.sh");
        std::fs::write(&hook, format!("echo \"$@\" > {}\n", log.display())).unwrap();

        let new = self_signed(&["example.com"]);
        let old = self_signed(&["example.com"]);

        let installed = InstallationOptions::Script {
            script: PathBuf::from("/bin/sh"),
            arguments: Some(format!(
                "{} {{CommonName}} {{Thumbprint}} {{OldThumbprint}} {{StorePath}}",
                hook.display()
            )),
        }
        .create(&plugin_context())
        .unwrap()
        .install(
            &[StoreInfo {
                name: "pemfiles",
                path: Some(PathBuf::from("/srv/pem")),
            }],
            &new,
            Some(&old),
        )
        .await
        .unwrap();

        assert!(installed);
        assert_eq!(
            std::fs::read_to_string(&log).unwrap().trim(),
            format!("example.com {} {} /srv/pem", new.thumbprint, old.thumbprint)
        );
    }
}
