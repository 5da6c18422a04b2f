use std::path::PathBuf;

use async_trait::async_trait;
use eyre::{bail, eyre};
use parking_lot::Mutex;

use super::{
    challenge_capability, Parallelism, ValidationContextParameters, ValidationOptions,
    ValidationPlugin,
};
use crate::{
    acme::ChallengeProof,
    api::ChallengeType,
    input::InputService,
    plugins::{Capability, CapabilityScope, PluginDescriptor},
    script,
    target::{is_dns_name, Target},
};

const DEFAULT_CREATE_ARGUMENTS: &str = "create {Identifier} {RecordName} {Token}";
const DEFAULT_DELETE_ARGUMENTS: &str = "delete {Identifier} {RecordName} {Token}";

#[derive(Debug, Clone)]
struct Record {
    identifier: String,
    name: String,
    value: String,
}

impl Record {
    fn arguments(&self, template: &str) -> Vec<String> {
        script::expand_arguments(
            template,
            &[
                ("Identifier", self.identifier.as_str()),
                ("RecordName", self.name.as_str()),
                ("Token", self.value.as_str()),
            ],
        )
    }
}

/// Creates and deletes `dns-01` records through external programs.
pub struct Script {
    create_script: PathBuf,
    create_arguments: String,
    delete_script: Option<PathBuf>,
    delete_arguments: String,
    parallel: bool,
    created: Mutex<Vec<Record>>,
}

impl Script {
    pub fn new(
        create_script: PathBuf,
        create_arguments: Option<String>,
        delete_script: Option<PathBuf>,
        delete_arguments: Option<String>,
        parallel: bool,
    ) -> Self {
        Script {
            create_script,
            create_arguments: create_arguments
                .unwrap_or_else(|| DEFAULT_CREATE_ARGUMENTS.to_owned()),
            delete_script,
            delete_arguments: delete_arguments
                .unwrap_or_else(|| DEFAULT_DELETE_ARGUMENTS.to_owned()),
            parallel,
            created: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ValidationPlugin for Script {
    fn parallelism(&self) -> Parallelism {
        if self.parallel {
            Parallelism::ALL
        } else {
            Parallelism::NONE
        }
    }

    async fn prepare_challenge(&self, params: &ValidationContextParameters<'_>) -> eyre::Result<()> {
        let ChallengeProof::Dns01 { record_name, value } = params.proof else {
            bail!("script validation only supports dns-01");
        };

        let record = Record {
            identifier: params.identifier.to_owned(),
            name: record_name.clone(),
            value: value.clone(),
        };

        // recorded first so cleanup also covers a record the script created before failing
        self.created.lock().push(record.clone());

        script::run(
            &self.create_script,
            &record.arguments(&self.create_arguments),
        )
        .await
    }

    async fn cleanup(&self) -> eyre::Result<()> {
        let created = std::mem::take(&mut *self.created.lock());

        let Some(delete_script) = &self.delete_script else {
            return Ok(());
        };

        let mut failed = Vec::new();

        for record in created {
            if let Err(err) =
                script::run(delete_script, &record.arguments(&self.delete_arguments)).await
            {
                failed.push(format!("{}: {err}", record.name));
            }
        }

        if !failed.is_empty() {
            return Err(eyre!("could not delete {}", failed.join(", ")));
        }

        Ok(())
    }
}

pub(super) struct Descriptor;

#[async_trait]
impl PluginDescriptor<ValidationOptions> for Descriptor {
    fn name(&self) -> &'static str {
        "script"
    }

    fn description(&self) -> &'static str {
        "[dns-01] Create verification records with your own script"
    }

    fn capability(&self, scope: &CapabilityScope<'_>) -> Capability {
        if let Some(target) = scope.target {
            if let Some(id) = target.identifiers().into_iter().find(|id| !is_dns_name(id)) {
                return Capability::disabled(format!("{id} is not a DNS name"));
            }
        }

        challenge_capability(ChallengeType::Dns01, scope)
    }

    async fn configure(
        &self,
        _target: Option<&Target>,
        input: &dyn InputService,
    ) -> eyre::Result<ValidationOptions> {
        let create_script = PathBuf::from(input.request_string("Path to the create script").await?);
        let delete_script = input
            .request_string("Path to the delete script (optional)")
            .await?;
        let parallel = input
            .confirm("Can the scripts handle several records at once?", false)
            .await?;

        Ok(ValidationOptions::Script {
            create_script,
            create_arguments: None,
            delete_script: (!delete_script.is_empty()).then(|| PathBuf::from(delete_script)),
            delete_arguments: None,
            parallel,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::api;

    #[tokio::test]
    async fn create_and_delete_records() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls.log");

        let hook = dir.path().join("dns.sh");
        std::fs::write(
            &hook,
            format!("#!/bin/sh\necho \"$@\" >> {}\n", log.display()),
        )
        .unwrap();

        let sh = PathBuf::from("/bin/sh");
        let plugin = Script::new(
            sh.clone(),
            Some(format!("{} create {{Identifier}} {{RecordName}} {{Token}}", hook.display())),
            Some(sh),
            Some(format!("{} delete {{Identifier}} {{RecordName}} {{Token}}", hook.display())),
            false,
        );
        assert_eq!(plugin.parallelism(), Parallelism::NONE);

        let authorization: api::Authorization = serde_json::from_value(serde_json::json!({
            "identifier": { "type": "dns", "value": "example.com" },
            "status": "pending",
            "challenges": [],
        }))
        .unwrap();
        let proof = ChallengeProof::Dns01 {
            record_name: "_acme-challenge.example.com".to_owned(),
            value: "digest".to_owned(),
        };

        plugin
            .prepare_challenge(&ValidationContextParameters {
                authorization: &authorization,
                identifier: "example.com",
                challenge_type: ChallengeType::Dns01,
                target_part: None,
                order_valid: false,
                proof: &proof,
            })
            .await
            .unwrap();
        plugin.cleanup().await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&log).unwrap(),
            "create example.com _acme-challenge.example.com digest\n\
             delete example.com _acme-challenge.example.com digest\n"
        );
    }
}
