//! Creating a renewal interactively.

use crate::{
    input::InputService,
    plugins::{Interaction, PluginOptions as _, PluginResolver},
    renewal::Renewal,
};

/// Walks the user through every plugin category and returns the new renewal, not yet saved.
pub async fn create_renewal(
    resolver: &PluginResolver<'_>,
    input: &dyn InputService,
) -> eyre::Result<Renewal> {
    let target_options = resolver.target(None).await?;
    let target = target_options.plugin.generate().await?;

    input
        .show("Identifiers", &target.identifiers().join(", "))
        .await;

    let order = resolver.order(None, &target).await?;
    let csr = resolver.csr(None, &target).await?;
    let validation = resolver.validation(None, &target).await?;
    let stores = resolver.stores(&[], &target).await?;
    let installations = resolver.installations(&[], &target).await?;

    let mut renewal = Renewal::new(target_options.options, validation.options);
    renewal.order = order.options;
    renewal.csr = csr.options;
    renewal.stores = stores.into_iter().map(|store| store.options).collect();
    renewal.installations = installations
        .into_iter()
        .map(|installation| installation.options)
        .collect();

    if resolver.run_level().interaction == Interaction::Advanced {
        let name = input
            .request_string(&format!("Friendly name (empty for {})", target.friendly_name))
            .await?;
        renewal.friendly_name = (!name.is_empty()).then_some(name);
    }

    log::info!(
        "Created renewal {renewal}: {} validation, {} order(s) per run",
        renewal.validation.plugin_name(),
        order.plugin.split(&renewal, &target).len()
    );

    Ok(renewal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        plugins::{
            order::OrderOptions, store::StoreOptions, target::TargetOptions,
            validation::ValidationOptions, PluginRegistry, RunLevel,
        },
        test::{plugin_context, ScriptedInput},
    };

    #[tokio::test]
    async fn simple_setup() {
        let registry = PluginRegistry::builtin();
        let mut ctx = plugin_context();
        ctx.input = ScriptedInput::new([
            // target: manual
            "1",
            "example.com, www.example.com",
            // common name
            "2",
            // validation: filesystem
            "1",
            "/var/www/html",
            // store: pemfiles
            "1",
            "/etc/ssl/wacs",
            // no further stores
            "n",
            // installation: none
            "2",
        ]);
        let resolver = PluginResolver::new(&registry, &ctx, RunLevel::SIMPLE);

        let renewal = create_renewal(&resolver, ctx.input.as_ref()).await.unwrap();

        assert!(renewal.new);
        assert_eq!(
            renewal.target,
            TargetOptions::Manual {
                common_name: Some("www.example.com".to_owned()),
                hosts: vec!["example.com".to_owned(), "www.example.com".to_owned()],
            }
        );
        assert_eq!(renewal.order, OrderOptions::Single);
        assert_eq!(
            renewal.validation,
            ValidationOptions::FileSystem {
                path: Some("/var/www/html".into())
            }
        );
        assert_eq!(
            renewal.stores,
            [StoreOptions::PemFiles {
                path: "/etc/ssl/wacs".into()
            }]
        );
        assert!(renewal.installations.is_empty());
        assert!(renewal.friendly_name.is_none());
    }

    #[tokio::test]
    async fn unattended_setup_is_refused() {
        let registry = PluginRegistry::builtin();
        let ctx = plugin_context();
        let resolver = PluginResolver::new(&registry, &ctx, RunLevel::UNATTENDED);

        assert!(create_renewal(&resolver, ctx.input.as_ref()).await.is_err());
    }
}
