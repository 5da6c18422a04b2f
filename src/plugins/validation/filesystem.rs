use std::path::PathBuf;

use async_trait::async_trait;
use eyre::{bail, eyre, WrapErr as _};
use parking_lot::Mutex;

use super::{
    challenge_capability, Parallelism, ValidationContextParameters, ValidationOptions,
    ValidationPlugin,
};
use crate::{
    acme::ChallengeProof,
    api::ChallengeType,
    error::ConfigurationError,
    input::InputService,
    plugins::{Capability, CapabilityScope, PluginDescriptor},
    target::Target,
};

/// Serves `http-01` proofs from files below a web root.
pub struct FileSystem {
    root: Option<PathBuf>,
    pending: Mutex<Vec<(PathBuf, String)>>,
    written: Mutex<Vec<PathBuf>>,
}

impl FileSystem {
    pub fn new(root: Option<PathBuf>) -> Self {
        FileSystem {
            root,
            pending: Mutex::new(Vec::new()),
            written: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ValidationPlugin for FileSystem {
    fn parallelism(&self) -> Parallelism {
        Parallelism::ALL
    }

    async fn prepare_challenge(&self, params: &ValidationContextParameters<'_>) -> eyre::Result<()> {
        let ChallengeProof::Http01 { path, content } = params.proof else {
            bail!("filesystem validation only supports http-01");
        };

        let root = self.root.as_ref().ok_or_else(|| {
            ConfigurationError::Invalid("no web root configured for filesystem validation".to_owned())
        })?;

        log::debug!("Queued {path} for {}", params.identifier);
        self.pending.lock().push((root.join(path), content.clone()));

        Ok(())
    }

    async fn commit(&self) -> eyre::Result<()> {
        let pending = std::mem::take(&mut *self.pending.lock());

        for (path, content) in pending {
            if let Some(dir) = path.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }

            // recorded before writing so a partial write is still removed by cleanup
            self.written.lock().push(path.clone());

            tokio::fs::write(&path, content.as_bytes())
                .await
                .wrap_err_with(|| format!("writing {}", path.display()))?;

            log::info!("Answer should now be browsable at {}", path.display());
        }

        Ok(())
    }

    async fn cleanup(&self) -> eyre::Result<()> {
        self.pending.lock().clear();
        let written = std::mem::take(&mut *self.written.lock());

        let mut failed = Vec::new();

        for path in written {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => log::debug!("Removed {}", path.display()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => failed.push(format!("{}: {err}", path.display())),
            }
        }

        if !failed.is_empty() {
            return Err(eyre!("could not remove {}", failed.join(", ")));
        }

        Ok(())
    }
}

pub(super) struct Descriptor;

#[async_trait]
impl PluginDescriptor<ValidationOptions> for Descriptor {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn description(&self) -> &'static str {
        "[http-01] Save verification files on (network) path"
    }

    fn capability(&self, scope: &CapabilityScope<'_>) -> Capability {
        challenge_capability(ChallengeType::Http01, scope)
    }

    async fn configure(
        &self,
        _target: Option<&Target>,
        input: &dyn InputService,
    ) -> eyre::Result<ValidationOptions> {
        let path = input.request_string("Path to the web root").await?;

        Ok(ValidationOptions::FileSystem {
            path: Some(PathBuf::from(path)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api;

    fn authorization() -> api::Authorization {
        serde_json::from_value(serde_json::json!({
            "identifier": { "type": "dns", "value": "example.com" },
            "status": "pending",
            "challenges": [],
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn files_exist_between_commit_and_cleanup() {
        let root = tempfile::tempdir().unwrap();
        let plugin = FileSystem::new(Some(root.path().to_path_buf()));

        let authorization = authorization();
        let proof = ChallengeProof::new(ChallengeType::Http01, "example.com", "tok", "tok.key");
        let params = ValidationContextParameters {
            authorization: &authorization,
            identifier: "example.com",
            challenge_type: ChallengeType::Http01,
            target_part: None,
            order_valid: false,
            proof: &proof,
        };

        plugin.prepare_challenge(&params).await.unwrap();

        let file = root.path().join(".well-known/acme-challenge/tok");
        assert!(!file.exists());

        plugin.commit().await.unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "tok.key");

        plugin.cleanup().await.unwrap();
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn missing_web_root() {
        let plugin = FileSystem::new(None);

        let authorization = authorization();
        let proof = ChallengeProof::new(ChallengeType::Http01, "example.com", "tok", "tok.key");
        let params = ValidationContextParameters {
            authorization: &authorization,
            identifier: "example.com",
            challenge_type: ChallengeType::Http01,
            target_part: None,
            order_valid: false,
            proof: &proof,
        };

        let err = plugin.prepare_challenge(&params).await.unwrap_err();
        assert!(crate::error::is_configuration_error(&err));
    }
}
