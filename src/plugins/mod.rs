//! Plugin categories, the registry of built-in plugins and their shared context.
//!
//! Every category has a closed options enum that is persisted with the renewal (the `plugin` field
//! is the discriminator) and a trait implemented by the plugin instances built from it. The
//! registry lists one [`PluginDescriptor`] per plugin, which knows the plugin's name, when it can
//! be used and how to ask the user for its options.

use std::{fmt, sync::Arc};

use async_trait::async_trait;

use crate::{input::InputService, settings::Settings, target::Target};

pub mod csr;
pub mod installation;
pub mod order;
pub mod resolver;
pub mod store;
pub mod target;
pub mod validation;

pub use self::resolver::{PluginResolver, Resolved};

/// How much user interaction is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    /// Scheduled runs; nothing may prompt.
    Unattended,
    /// Interactive with sensible defaults.
    Simple,
    /// Interactive, every option is asked for.
    Advanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLevel {
    pub interaction: Interaction,

    /// Run renewals regardless of their due date.
    pub force: bool,
}

impl RunLevel {
    pub const UNATTENDED: RunLevel = RunLevel {
        interaction: Interaction::Unattended,
        force: false,
    };

    pub const SIMPLE: RunLevel = RunLevel {
        interaction: Interaction::Simple,
        force: false,
    };

    pub const ADVANCED: RunLevel = RunLevel {
        interaction: Interaction::Advanced,
        force: false,
    };

    pub fn forced(self) -> Self {
        RunLevel {
            force: true,
            ..self
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.interaction != Interaction::Unattended
    }
}

/// Whether a plugin can be used in the current situation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    Enabled,
    Disabled(String),
}

impl Capability {
    pub fn disabled(reason: impl Into<String>) -> Self {
        Capability::Disabled(reason.into())
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Capability::Enabled)
    }
}

/// What a capability check may look at.
#[derive(Debug, Clone, Copy)]
pub struct CapabilityScope<'a> {
    /// Absent while the target itself is being resolved.
    pub target: Option<&'a Target>,
    pub run_level: RunLevel,
}

/// Collaborators shared by all plugins of a run.
#[derive(Clone)]
pub struct PluginContext {
    pub settings: Arc<Settings>,
    pub input: Arc<dyn InputService>,
    pub http: reqwest::Client,
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Persisted options of one plugin category.
pub trait PluginOptions: Clone + fmt::Debug + Send + Sync {
    /// Category name for messages.
    const CATEGORY: &'static str;

    /// The plugin built from these options.
    type Plugin: ?Sized + Send + Sync;

    /// Discriminator matching [`PluginDescriptor::name`].
    fn plugin_name(&self) -> &'static str;

    /// Builds the plugin. Must not perform I/O.
    fn create(&self, ctx: &PluginContext) -> eyre::Result<Box<Self::Plugin>>;
}

/// Registry entry for one plugin.
#[async_trait]
pub trait PluginDescriptor<O: PluginOptions>: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn capability(&self, _scope: &CapabilityScope<'_>) -> Capability {
        Capability::Enabled
    }

    /// Asks the user for this plugin's options.
    async fn configure(
        &self,
        target: Option<&Target>,
        input: &dyn InputService,
    ) -> eyre::Result<O>;
}

pub type Descriptors<O> = Vec<Box<dyn PluginDescriptor<O>>>;

/// All plugins available to this process.
pub struct PluginRegistry {
    pub targets: Descriptors<target::TargetOptions>,
    pub orders: Descriptors<order::OrderOptions>,
    pub csrs: Descriptors<csr::CsrOptions>,
    pub validations: Descriptors<validation::ValidationOptions>,
    pub stores: Descriptors<store::StoreOptions>,
    pub installations: Descriptors<installation::InstallationOptions>,
}

impl PluginRegistry {
    /// The built-in plugins, in the order they are offered to the user.
    pub fn builtin() -> Self {
        PluginRegistry {
            targets: target::descriptors(),
            orders: order::descriptors(),
            csrs: csr::descriptors(),
            validations: validation::descriptors(),
            stores: store::descriptors(),
            installations: installation::descriptors(),
        }
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn names<O: PluginOptions>(descriptors: &Descriptors<O>) -> Vec<&'static str> {
            descriptors.iter().map(|d| d.name()).collect()
        }

        f.debug_struct("PluginRegistry")
            .field("targets", &names(&self.targets))
            .field("orders", &names(&self.orders))
            .field("csrs", &names(&self.csrs))
            .field("validations", &names(&self.validations))
            .field("stores", &names(&self.stores))
            .field("installations", &names(&self.installations))
            .finish()
    }
}
