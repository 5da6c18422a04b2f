//! Validation plugins publish challenge proofs so the CA can verify control of an identifier.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Capability, CapabilityScope, Descriptors, PluginContext, PluginOptions};
use crate::{
    acme::ChallengeProof,
    api::{self, ChallengeType},
    target::TargetPart,
};

mod filesystem;
mod manual;
mod script;

pub use self::{filesystem::FileSystem, manual::Manual, script::Script};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "plugin", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ValidationOptions {
    /// `http-01` token files written below a web root.
    FileSystem {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
    },

    /// `dns-01` records managed by external scripts.
    Script {
        create_script: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        create_arguments: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delete_script: Option<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delete_arguments: Option<String>,
        /// The scripts can handle several records at once.
        #[serde(default)]
        parallel: bool,
    },

    /// `dns-01` records created by the operator.
    Manual,
}

impl ValidationOptions {
    pub fn challenge_type(&self) -> ChallengeType {
        match self {
            ValidationOptions::FileSystem { .. } => ChallengeType::Http01,
            ValidationOptions::Script { .. } | ValidationOptions::Manual => ChallengeType::Dns01,
        }
    }
}

/// Which phases a plugin may run for several identifiers at the same time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Parallelism {
    pub prepare: bool,
    pub answer: bool,
}

impl Parallelism {
    pub const NONE: Parallelism = Parallelism {
        prepare: false,
        answer: false,
    };

    pub const ALL: Parallelism = Parallelism {
        prepare: true,
        answer: true,
    };
}

/// What a plugin gets to see of one identifier's validation.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContextParameters<'a> {
    pub authorization: &'a api::Authorization,
    pub identifier: &'a str,
    pub challenge_type: ChallengeType,
    pub target_part: Option<&'a TargetPart>,

    /// The CA already considers the identifier validated.
    pub order_valid: bool,

    pub proof: &'a ChallengeProof,
}

/// One instance handles every identifier of its group within an order.
///
/// `cleanup` is called exactly once after any `prepare_challenge` call, whatever the outcome.
#[async_trait]
pub trait ValidationPlugin: Send + Sync {
    fn parallelism(&self) -> Parallelism {
        Parallelism::NONE
    }

    async fn prepare_challenge(&self, params: &ValidationContextParameters<'_>)
        -> eyre::Result<()>;

    /// Publishes everything prepared so far in one go.
    async fn commit(&self) -> eyre::Result<()> {
        Ok(())
    }

    async fn cleanup(&self) -> eyre::Result<()>;
}

/// Builds validation plugins for the orchestrator.
pub trait ValidationPluginFactory: Send + Sync {
    fn create(&self, options: &ValidationOptions) -> eyre::Result<Box<dyn ValidationPlugin>>;
}

impl ValidationPluginFactory for PluginContext {
    fn create(&self, options: &ValidationOptions) -> eyre::Result<Box<dyn ValidationPlugin>> {
        PluginOptions::create(options, self)
    }
}

impl PluginOptions for ValidationOptions {
    const CATEGORY: &'static str = "validation";

    type Plugin = dyn ValidationPlugin;

    fn plugin_name(&self) -> &'static str {
        match self {
            ValidationOptions::FileSystem { .. } => "filesystem",
            ValidationOptions::Script { .. } => "script",
            ValidationOptions::Manual => "manual",
        }
    }

    fn create(&self, ctx: &PluginContext) -> eyre::Result<Box<dyn ValidationPlugin>> {
        Ok(match self.clone() {
            ValidationOptions::FileSystem { path } => Box::new(FileSystem::new(path)),
            ValidationOptions::Script {
                create_script,
                create_arguments,
                delete_script,
                delete_arguments,
                parallel,
            } => Box::new(Script::new(
                create_script,
                create_arguments,
                delete_script,
                delete_arguments,
                parallel,
            )),
            ValidationOptions::Manual => Box::new(Manual::new(ctx.input.clone())),
        })
    }
}

pub(super) fn descriptors() -> Descriptors<ValidationOptions> {
    vec![
        Box::new(filesystem::Descriptor),
        Box::new(script::Descriptor),
        Box::new(manual::Descriptor),
    ]
}

/// Whether `challenge_type` can validate every identifier of the scoped target.
pub(crate) fn challenge_capability(
    challenge_type: ChallengeType,
    scope: &CapabilityScope<'_>,
) -> Capability {
    let Some(target) = scope.target else {
        return Capability::Enabled;
    };

    if !challenge_type.supports_wildcard() && target.has_wildcard() {
        return Capability::disabled(format!(
            "{challenge_type} cannot validate wildcard identifiers"
        ));
    }

    Capability::Enabled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        plugins::RunLevel,
        target::{Target, TargetPart},
    };

    #[test]
    fn wildcards_need_dns() {
        let target = Target::new(
            "test",
            None,
            vec![TargetPart::new(None, ["example.com", "*.example.com"])],
        );
        let scope = CapabilityScope {
            target: Some(&target),
            run_level: RunLevel::SIMPLE,
        };

        let enabled = descriptors()
            .iter()
            .filter(|descriptor| descriptor.capability(&scope).is_enabled())
            .map(|descriptor| descriptor.name())
            .collect::<Vec<_>>();

        assert_eq!(enabled, ["script", "manual"]);
    }

    #[test]
    fn options_round_trip() {
        let options = ValidationOptions::Script {
            create_script: PathBuf::from("/usr/local/bin/dns"),
            create_arguments: None,
            delete_script: None,
            delete_arguments: Some("remove {RecordName}".to_owned()),
            parallel: true,
        };

        let json = serde_json::to_string(&options).unwrap();
        assert!(json.contains(r#""plugin":"script""#));
        assert!(json.contains(r#""deleteArguments""#));
        assert_eq!(serde_json::from_str::<ValidationOptions>(&json).unwrap(), options);

        assert_eq!(
            serde_json::from_str::<ValidationOptions>(r#"{"plugin":"manual"}"#).unwrap(),
            ValidationOptions::Manual
        );
    }
}
