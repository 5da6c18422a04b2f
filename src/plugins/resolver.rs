use super::{
    csr::CsrOptions, installation::InstallationOptions, order::OrderOptions, store::StoreOptions,
    target::TargetOptions, validation::ValidationOptions, Capability, CapabilityScope,
    Descriptors, Interaction, PluginContext, PluginDescriptor, PluginOptions, PluginRegistry,
    RunLevel,
};
use crate::{error::ConfigurationError, target::Target};

/// Options together with the plugin built from them.
pub struct Resolved<O: PluginOptions> {
    pub options: O,
    pub plugin: Box<O::Plugin>,
}

/// Turns persisted (or freshly chosen) options into plugin instances.
///
/// Saved options are taken as they are, after checking the plugin still exists and is still
/// capable of handling the target. Missing options are asked for when the run level allows it.
/// Building plugins never touches the network.
pub struct PluginResolver<'a> {
    registry: &'a PluginRegistry,
    ctx: &'a PluginContext,
    run_level: RunLevel,
}

impl<'a> PluginResolver<'a> {
    pub fn new(registry: &'a PluginRegistry, ctx: &'a PluginContext, run_level: RunLevel) -> Self {
        PluginResolver {
            registry,
            ctx,
            run_level,
        }
    }

    pub fn run_level(&self) -> RunLevel {
        self.run_level
    }

    pub async fn target(
        &self,
        existing: Option<&TargetOptions>,
    ) -> eyre::Result<Resolved<TargetOptions>> {
        let options = self
            .resolve(&self.registry.targets, existing, None, None)
            .await?;
        self.build(options)
    }

    pub async fn order(
        &self,
        existing: Option<&OrderOptions>,
        target: &Target,
    ) -> eyre::Result<Resolved<OrderOptions>> {
        let options = self
            .resolve(
                &self.registry.orders,
                existing,
                Some(target),
                Some(OrderOptions::default()),
            )
            .await?;
        self.build(options)
    }

    pub async fn csr(
        &self,
        existing: Option<&CsrOptions>,
        target: &Target,
    ) -> eyre::Result<Resolved<CsrOptions>> {
        let options = self
            .resolve(
                &self.registry.csrs,
                existing,
                Some(target),
                Some(CsrOptions::default()),
            )
            .await?;
        self.build(options)
    }

    pub async fn validation(
        &self,
        existing: Option<&ValidationOptions>,
        target: &Target,
    ) -> eyre::Result<Resolved<ValidationOptions>> {
        let options = self
            .resolve(&self.registry.validations, existing, Some(target), None)
            .await?;
        self.build(options)
    }

    /// Stores in their configured order. An empty list stays empty in unattended runs.
    pub async fn stores(
        &self,
        existing: &[StoreOptions],
        target: &Target,
    ) -> eyre::Result<Vec<Resolved<StoreOptions>>> {
        self.resolve_list(&self.registry.stores, existing, target, StoreOptions::None)
            .await
    }

    pub async fn installations(
        &self,
        existing: &[InstallationOptions],
        target: &Target,
    ) -> eyre::Result<Vec<Resolved<InstallationOptions>>> {
        self.resolve_list(
            &self.registry.installations,
            existing,
            target,
            InstallationOptions::None,
        )
        .await
    }

    fn build<O: PluginOptions>(&self, options: O) -> eyre::Result<Resolved<O>> {
        let plugin = options.create(self.ctx)?;
        Ok(Resolved { options, plugin })
    }

    fn scope<'t>(&self, target: Option<&'t Target>) -> CapabilityScope<'t> {
        CapabilityScope {
            target,
            run_level: self.run_level,
        }
    }

    async fn resolve<O: PluginOptions>(
        &self,
        descriptors: &Descriptors<O>,
        existing: Option<&O>,
        target: Option<&Target>,
        simple_default: Option<O>,
    ) -> eyre::Result<O> {
        let scope = self.scope(target);

        if let Some(options) = existing {
            let descriptor = find(descriptors, options.plugin_name())?;
            check(descriptor, &scope)?;
            return Ok(options.clone());
        }

        if !self.run_level.is_interactive() {
            return Err(ConfigurationError::Missing {
                category: O::CATEGORY,
            }
            .into());
        }

        if self.run_level.interaction == Interaction::Simple {
            if let Some(default) = simple_default {
                let descriptor = find(descriptors, default.plugin_name())?;
                if descriptor.capability(&scope).is_enabled() {
                    return Ok(default);
                }
            }
        }

        self.choose(descriptors, &scope, target).await
    }

    async fn choose<O: PluginOptions>(
        &self,
        descriptors: &Descriptors<O>,
        scope: &CapabilityScope<'_>,
        target: Option<&Target>,
    ) -> eyre::Result<O> {
        let enabled = descriptors
            .iter()
            .filter(|descriptor| match descriptor.capability(scope) {
                Capability::Enabled => true,
                Capability::Disabled(reason) => {
                    log::debug!("{} plugin {} disabled: {reason}", O::CATEGORY, descriptor.name());
                    false
                }
            })
            .collect::<Vec<_>>();

        let choice = match enabled.len() {
            0 => {
                return Err(ConfigurationError::Invalid(format!(
                    "no {} plugin can handle this target",
                    O::CATEGORY
                ))
                .into())
            }
            1 => 0,
            _ => {
                let labels = enabled
                    .iter()
                    .map(|descriptor| descriptor.description().to_owned())
                    .collect::<Vec<_>>();

                self.ctx
                    .input
                    .choose(&format!("How would you like to configure the {}?", O::CATEGORY), &labels)
                    .await?
            }
        };

        enabled[choice]
            .configure(target, self.ctx.input.as_ref())
            .await
    }

    async fn resolve_list<O: PluginOptions>(
        &self,
        descriptors: &Descriptors<O>,
        existing: &[O],
        target: &Target,
        terminator: O,
    ) -> eyre::Result<Vec<Resolved<O>>> {
        let scope = self.scope(Some(target));

        if !existing.is_empty() || !self.run_level.is_interactive() {
            let mut resolved = Vec::with_capacity(existing.len());

            for options in existing {
                check(find(descriptors, options.plugin_name())?, &scope)?;
                resolved.push(self.build(options.clone())?);
            }

            return Ok(resolved);
        }

        let mut resolved = Vec::new();

        loop {
            let options = self.choose(descriptors, &scope, Some(target)).await?;

            if options.plugin_name() == terminator.plugin_name() {
                break;
            }

            resolved.push(self.build(options)?);

            let another = self
                .ctx
                .input
                .confirm(&format!("Add another {} step?", O::CATEGORY), false)
                .await?;
            if !another {
                break;
            }
        }

        Ok(resolved)
    }
}

fn find<'d, O: PluginOptions>(
    descriptors: &'d Descriptors<O>,
    name: &str,
) -> eyre::Result<&'d dyn PluginDescriptor<O>> {
    descriptors
        .iter()
        .find(|descriptor| descriptor.name() == name)
        .map(|descriptor| descriptor.as_ref())
        .ok_or_else(|| {
            ConfigurationError::UnknownPlugin {
                category: O::CATEGORY,
                name: name.to_owned(),
            }
            .into()
        })
}

fn check<O: PluginOptions>(
    descriptor: &dyn PluginDescriptor<O>,
    scope: &CapabilityScope<'_>,
) -> eyre::Result<()> {
    match descriptor.capability(scope) {
        Capability::Enabled => Ok(()),
        Capability::Disabled(reason) => Err(ConfigurationError::Disabled {
            category: O::CATEGORY,
            name: descriptor.name().to_owned(),
            reason,
        }
        .into()),
    }
}
