//! Running renewals: due check, plugin resolution, orders, validation, issuance, storage and
//! installation.

use eyre::{bail, eyre, WrapErr as _};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::{
    acme::{wait_for_order, AcmeOrder, AcmeService},
    api,
    cache::CertificateCache,
    cert::CertificateInfo,
    error::{is_configuration_error, ConfigurationError},
    order::Order,
    plugins::{
        csr::CsrPlugin,
        installation::InstallationOptions,
        store::{StoreInfo, StoreOptions},
        validation::{ValidationOptions, ValidationPluginFactory},
        PluginContext, PluginOptions as _, PluginRegistry, PluginResolver, Resolved, RunLevel,
    },
    renewal::{RenewResult, Renewal},
    renewal_store::RenewalStore,
    validation::ValidationOrchestrator,
};

mod due;

pub use self::due::is_due;

/// Everything resolved for one run of a renewal.
struct Plan {
    orders: Vec<Order>,
    csr: Box<dyn CsrPlugin>,
    validation: ValidationOptions,
    stores: Vec<Resolved<StoreOptions>>,
    installations: Vec<Resolved<InstallationOptions>>,
}

/// Outcome of a batch run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped: usize,

    /// Display names of the renewals that failed.
    pub failed: Vec<String>,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct RenewalExecutor<'a> {
    registry: &'a PluginRegistry,
    ctx: &'a PluginContext,
    acme: &'a dyn AcmeService,
    validations: &'a dyn ValidationPluginFactory,
    cache: CertificateCache,
    cancel: CancellationToken,
}

impl<'a> RenewalExecutor<'a> {
    pub fn new(
        registry: &'a PluginRegistry,
        ctx: &'a PluginContext,
        acme: &'a dyn AcmeService,
        cancel: CancellationToken,
    ) -> Self {
        RenewalExecutor {
            registry,
            ctx,
            acme,
            validations: ctx,
            cache: CertificateCache::new(ctx.settings.paths.cache_dir()),
            cancel,
        }
    }

    /// Builds validation plugins with `factory` instead of the plugin context.
    pub fn with_validation_factory(mut self, factory: &'a dyn ValidationPluginFactory) -> Self {
        self.validations = factory;
        self
    }

    /// Processes every stored renewal in turn, saving each one right after it ran.
    pub async fn renew_all(
        &self,
        store: &dyn RenewalStore,
        run_level: RunLevel,
    ) -> eyre::Result<RunSummary> {
        let renewals = store.load().await?;
        let mut summary = RunSummary::default();

        log::info!("Checking {} renewal(s)", renewals.len());

        for mut renewal in renewals {
            if self.cancel.is_cancelled() {
                log::warn!("Cancelled, not processing {renewal}");
                summary.skipped += 1;
                continue;
            }

            let Some(result) = self.execute(&mut renewal, run_level).await else {
                summary.skipped += 1;
                continue;
            };

            summary.processed += 1;
            if !result.success {
                summary.failed.push(renewal.to_string());
            }

            if let Err(err) = store.save(&mut renewal).await {
                log::error!("Unable to save renewal {renewal}: {err:#}");
                if result.success {
                    summary.failed.push(renewal.to_string());
                }
            }
        }

        log::info!(
            "Processed {} renewal(s), {} not due, {} failed",
            summary.processed,
            summary.skipped,
            summary.failed.len()
        );

        Ok(summary)
    }

    /// Runs `renewal` if it is due and appends the result to its history.
    pub async fn execute(&self, renewal: &mut Renewal, run_level: RunLevel) -> Option<RenewResult> {
        let now = OffsetDateTime::now_utc();

        if !is_due(renewal, &self.ctx.settings, run_level, now) {
            if let Some(due) = renewal.next_due(&self.ctx.settings) {
                log::info!("Renewal {renewal} is due after {}", due.date());
            }
            return None;
        }

        log::info!("Running renewal {renewal}");

        let result = match self.plan(renewal, run_level).await {
            Ok(plan) => self.run(plan, now).await,
            Err(err) => {
                if is_configuration_error(&err) {
                    log::error!("Renewal {renewal} is misconfigured: {err:#}");
                } else {
                    log::error!("Renewal {renewal} could not be started: {err:#}");
                }
                RenewResult::failure(now, format!("{err:#}"))
            }
        };

        if result.success {
            log::info!("Renewal {renewal} succeeded");
        } else {
            for error in &result.errors {
                log::error!("Renewal {renewal} failed: {error}");
            }
        }

        renewal.history.push(result.clone());
        Some(result)
    }

    async fn plan(&self, renewal: &Renewal, run_level: RunLevel) -> eyre::Result<Plan> {
        let resolver = PluginResolver::new(self.registry, self.ctx, run_level);

        let target = resolver
            .target(Some(&renewal.target))
            .await?
            .plugin
            .generate()
            .await?;

        if target.is_empty() {
            return Err(ConfigurationError::EmptyTarget.into());
        }

        let order = resolver.order(Some(&renewal.order), &target).await?;
        let csr = resolver.csr(Some(&renewal.csr), &target).await?;
        let validation = resolver
            .validation(Some(&renewal.validation), &target)
            .await?;

        // nothing to ask for here, setup already did
        let stores = match renewal.stores.as_slice() {
            [] => Vec::new(),
            stores => resolver.stores(stores, &target).await?,
        };
        let installations = match renewal.installations.as_slice() {
            [] => Vec::new(),
            installations => resolver.installations(installations, &target).await?,
        };

        let orders = order.plugin.split(renewal, &target);
        log::debug!("Split into {} order(s)", orders.len());

        Ok(Plan {
            orders,
            csr: csr.plugin,
            validation: validation.options,
            stores,
            installations,
        })
    }

    async fn run(&self, plan: Plan, now: OffsetDateTime) -> RenewResult {
        let mut results = Vec::with_capacity(plan.orders.len());

        for mut order in plan.orders.iter().cloned() {
            if self.cancel.is_cancelled() {
                order.result.add_error("cancelled");
            } else if let Err(err) = self.run_order(&mut order, &plan).await {
                order.result.add_error(format!("{err:#}"));
            }

            results.push(order.result);
        }

        RenewResult::from_orders(now, results)
    }

    async fn run_order(&self, order: &mut Order, plan: &Plan) -> eyre::Result<()> {
        let identifiers = order
            .target
            .identifiers()
            .into_iter()
            .map(str::to_owned)
            .collect::<Vec<_>>();

        log::info!(
            "[{}] Requesting certificate for {}",
            order.friendly_name(),
            identifiers.join(", ")
        );

        let acme_order = self.acme.create_order(&identifiers).await?;

        let outcome = ValidationOrchestrator::new(
            self.acme,
            self.validations,
            &self.ctx.settings,
            self.cancel.clone(),
        )
        .validate(order, &acme_order, &plan.validation)
        .await;

        if !outcome.is_success() {
            for failure in outcome.failures() {
                order.result.add_error(failure);
            }
            return Ok(());
        }

        if self.cancel.is_cancelled() {
            bail!("cancelled");
        }

        let old = self.cache.load(order).await;
        let mut certificate = self.issue(order, &acme_order, plan, old.as_ref()).await?;

        order.result.thumbprint = Some(certificate.thumbprint.clone());
        order.result.expires = Some(certificate.not_after);

        self.cache.save(order, &mut certificate).await?;

        let stored = self.store(order, plan, &certificate).await;

        // installing from a partial set of stores would leave services half updated
        if let Some(stored) = stored {
            self.install(order, plan, &stored, &certificate, old.as_ref())
                .await;
        }

        if order.result.errors.is_empty() {
            order.result.success = true;

            if let Some(old) = &old {
                self.remove_old(plan, old, &certificate).await;
            }
        }

        Ok(())
    }

    async fn issue(
        &self,
        order: &Order,
        acme_order: &AcmeOrder,
        plan: &Plan,
        old: Option<&CertificateInfo>,
    ) -> eyre::Result<CertificateInfo> {
        let (csr_der, private_key_pem) = match &order.target.user_csr_bytes {
            Some(csr_der) => (csr_der.clone(), order.target.user_private_key_pem.clone()),
            None => {
                let bundle = plan
                    .csr
                    .generate(&order.target, old.and_then(CertificateInfo::private_key_pem))?;
                (bundle.csr_der, Some(bundle.private_key_pem))
            }
        };

        let acme = &self.ctx.settings.acme;

        let finalized = self
            .acme
            .finalize(acme_order, &csr_der)
            .await
            .wrap_err("finalizing order")?;

        let issued = if finalized.status() == api::OrderStatus::Valid {
            finalized
        } else {
            wait_for_order(
                self.acme,
                &acme_order.url,
                acme.order_poll_interval(),
                acme.order_poll_attempts,
            )
            .await?
        };

        match issued.status() {
            api::OrderStatus::Valid => {}
            api::OrderStatus::Invalid => match &issued.error {
                Some(problem) => bail!("order is invalid: {problem}"),
                None => bail!("order is invalid"),
            },
            status => bail!("order is still {status:?}"),
        }

        let url = issued
            .certificate
            .as_deref()
            .ok_or_else(|| eyre!("valid order without certificate url"))?;

        let chain = self.acme.download_certificate(url).await?;
        let certificate = CertificateInfo::parse(chain, private_key_pem)?;

        log::info!(
            "[{}] Issued certificate {} valid until {}",
            order.friendly_name(),
            certificate.thumbprint,
            certificate.not_after.date()
        );

        Ok(certificate)
    }

    /// Saves to every store; `None` when any of them failed.
    async fn store(
        &self,
        order: &mut Order,
        plan: &Plan,
        certificate: &CertificateInfo,
    ) -> Option<Vec<StoreInfo>> {
        let mut stored = Vec::with_capacity(plan.stores.len());
        let mut failed = false;

        for store in &plan.stores {
            match store.plugin.save(certificate).await {
                Ok(info) => stored.push(info),
                Err(err) => {
                    failed = true;
                    order.result.add_error(format!(
                        "{} store failed: {err:#}",
                        store.options.plugin_name()
                    ));
                }
            }
        }

        (!failed).then_some(stored)
    }

    async fn install(
        &self,
        order: &mut Order,
        plan: &Plan,
        stored: &[StoreInfo],
        certificate: &CertificateInfo,
        old: Option<&CertificateInfo>,
    ) {
        for installation in &plan.installations {
            let name = installation.options.plugin_name();

            match installation.plugin.install(stored, certificate, old).await {
                Ok(true) => log::info!("[{}] Installed with {name}", order.friendly_name()),
                Ok(false) => log::debug!("[{}] Nothing installed by {name}", order.friendly_name()),
                Err(err) => order
                    .result
                    .add_error(format!("{name} installation failed: {err:#}")),
            }
        }
    }

    async fn remove_old(&self, plan: &Plan, old: &CertificateInfo, new: &CertificateInfo) {
        if self.ctx.settings.store.keep_existing || old.thumbprint == new.thumbprint {
            return;
        }

        for store in &plan.stores {
            if let Err(err) = store.plugin.delete(old).await {
                log::warn!(
                    "Unable to remove {} from {} store: {err:#}",
                    old.thumbprint,
                    store.options.plugin_name()
                );
            }
        }
    }
}
