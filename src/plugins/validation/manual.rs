use std::sync::Arc;

use async_trait::async_trait;
use eyre::bail;
use parking_lot::Mutex;

use super::{
    challenge_capability, ValidationContextParameters, ValidationOptions, ValidationPlugin,
};
use crate::{
    acme::ChallengeProof,
    api::ChallengeType,
    input::InputService,
    plugins::{Capability, CapabilityScope, PluginDescriptor},
    target::Target,
};

/// Asks the operator to create `dns-01` records by hand.
pub struct Manual {
    input: Arc<dyn InputService>,
    records: Mutex<Vec<String>>,
}

impl Manual {
    pub fn new(input: Arc<dyn InputService>) -> Self {
        Manual {
            input,
            records: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ValidationPlugin for Manual {
    async fn prepare_challenge(&self, params: &ValidationContextParameters<'_>) -> eyre::Result<()> {
        let ChallengeProof::Dns01 { record_name, value } = params.proof else {
            bail!("manual validation only supports dns-01");
        };

        self.records.lock().push(record_name.clone());

        self.input.show("Domain", params.identifier).await;
        self.input.show("Record", record_name).await;
        self.input.show("Type", "TXT").await;
        self.input.show("Content", value).await;
        self.input
            .wait("Please create the record and wait for it to propagate")
            .await
    }

    async fn cleanup(&self) -> eyre::Result<()> {
        let records = std::mem::take(&mut *self.records.lock());

        for record in records {
            self.input.show("Record to remove", &record).await;
        }

        Ok(())
    }
}

pub(super) struct Descriptor;

#[async_trait]
impl PluginDescriptor<ValidationOptions> for Descriptor {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn description(&self) -> &'static str {
        "[dns-01] Create verification records manually"
    }

    fn capability(&self, scope: &CapabilityScope<'_>) -> Capability {
        if !scope.run_level.is_interactive() {
            return Capability::disabled("requires user interaction");
        }

        challenge_capability(ChallengeType::Dns01, scope)
    }

    async fn configure(
        &self,
        _target: Option<&Target>,
        _input: &dyn InputService,
    ) -> eyre::Result<ValidationOptions> {
        Ok(ValidationOptions::Manual)
    }
}
