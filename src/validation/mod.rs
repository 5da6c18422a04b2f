//! Drives the authorizations of an order through the validation plugins.
//!
//! Authorizations are grouped by challenge type and plugin options. Every group gets a single plugin
//! instance which runs through prepare, commit, answer and cleanup. A plugin's [`Parallelism`]
//! decides whether its identifiers are prepared (and answered) concurrently or one at a time.
//! Cleanup runs for every group that got as far as preparing, whatever happened afterwards.

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::{
    acme::{AcmeOrder, AcmeService, ChallengeProof},
    api,
    order::Order,
    plugins::{
        validation::{Parallelism, ValidationOptions, ValidationPlugin, ValidationPluginFactory},
        PluginOptions as _,
    },
    settings::Settings,
};

mod context;

pub use self::context::{AuthorizationContext, ValidationContext};

/// Result of validating one order.
#[derive(Debug, Default)]
pub struct ValidationOutcome {
    pub contexts: Vec<ValidationContext>,

    /// Failures not tied to a single authorization.
    pub errors: Vec<String>,
}

impl ValidationOutcome {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
            && self
                .contexts
                .iter()
                .all(|vc| vc.auth.success() == Some(true))
    }

    /// Error messages of everything that failed, prefixed with the identifier.
    pub fn failures(&self) -> Vec<String> {
        let failed = self
            .contexts
            .iter()
            .filter(|vc| vc.auth.success() != Some(true))
            .map(|vc| {
                let errors = match vc.auth.errors() {
                    [] => "validation did not complete".to_owned(),
                    errors => errors.join("; "),
                };
                format!("{}: {errors}", vc.auth.identifier)
            });

        self.errors.iter().cloned().chain(failed).collect()
    }
}

pub struct ValidationOrchestrator<'a> {
    acme: &'a dyn AcmeService,
    factory: &'a dyn ValidationPluginFactory,
    settings: &'a Settings,
    cancel: CancellationToken,
}

impl<'a> ValidationOrchestrator<'a> {
    pub fn new(
        acme: &'a dyn AcmeService,
        factory: &'a dyn ValidationPluginFactory,
        settings: &'a Settings,
        cancel: CancellationToken,
    ) -> Self {
        ValidationOrchestrator {
            acme,
            factory,
            settings,
            cancel,
        }
    }

    /// Validates every authorization of `acme_order`. Errors are recorded in the outcome.
    pub async fn validate(
        &self,
        order: &Order,
        acme_order: &AcmeOrder,
        options: &ValidationOptions,
    ) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();

        let urls = acme_order
            .details
            .authorizations
            .as_deref()
            .unwrap_or_default();

        let mut pending: Vec<ValidationContext> = Vec::new();

        for url in urls {
            let authorization = match self.acme.authorization(url).await {
                Ok(authorization) => authorization,
                Err(err) => {
                    outcome
                        .errors
                        .push(format!("retrieving authorization {url}: {err:#}"));
                    outcome.contexts.extend(pending.into_iter().map(|mut vc| {
                        vc.auth
                            .add_error("not validated because the order is incomplete", true);
                        vc
                    }));
                    return outcome;
                }
            };

            let vc = self.context(order, url, authorization, options);

            if vc.auth.is_pending() {
                pending.push(vc);
            } else {
                if vc.auth.order_valid {
                    log::info!("[{}] Cached authorization result: valid", vc.auth.identifier);
                }
                outcome.contexts.push(vc);
            }
        }

        for group in group_contexts(pending) {
            if self.cancel.is_cancelled() {
                outcome.contexts.extend(group.into_iter().map(|mut vc| {
                    vc.auth.add_error("cancelled", true);
                    vc
                }));
                continue;
            }

            outcome.contexts.extend(self.validate_group(group).await);
        }

        outcome
    }

    fn context(
        &self,
        order: &Order,
        url: &str,
        authorization: api::Authorization,
        default: &ValidationOptions,
    ) -> ValidationContext {
        let auth = AuthorizationContext::new(url, authorization);

        let options = self
            .settings
            .validation
            .iter()
            .find(|rule| rule.matches(&auth.identifier))
            .map_or_else(|| default.clone(), |rule| rule.options.clone());

        let part = order.target.part_for(&auth.identifier).cloned();
        let mut vc = ValidationContext::new(auth, options, part);

        if vc.auth.is_pending() {
            if let Err(err) = self.select_challenge(&mut vc) {
                vc.auth.add_error(format!("{err:#}"), true);
            }
        }

        vc
    }

    fn select_challenge(&self, vc: &mut ValidationContext) -> eyre::Result<()> {
        let authorization = &vc.auth.authorization;

        if authorization.status != api::AuthorizationStatus::Pending {
            eyre::bail!("authorization is {:?}", authorization.status);
        }

        if vc.auth.identifier.starts_with("*.") && !vc.challenge_type.supports_wildcard() {
            eyre::bail!(
                "{} cannot validate wildcard identifiers",
                vc.challenge_type
            );
        }

        let challenge = authorization
            .challenge(vc.challenge_type)
            .ok_or_else(|| eyre::eyre!("the CA does not offer {}", vc.challenge_type))?
            .clone();

        let key_authorization = self.acme.key_authorization(&challenge.token)?;

        vc.proof = Some(ChallengeProof::new(
            vc.challenge_type,
            &vc.auth.identifier,
            &challenge.token,
            &key_authorization,
        ));
        vc.challenge = Some(challenge);

        Ok(())
    }

    async fn validate_group(&self, mut contexts: Vec<ValidationContext>) -> Vec<ValidationContext> {
        let Some(options) = contexts.first().map(|vc| vc.options.clone()) else {
            return contexts;
        };

        let plugin = match self.factory.create(&options) {
            Ok(plugin) => plugin,
            Err(err) => {
                for vc in &mut contexts {
                    vc.auth
                        .add_error(format!("{} plugin: {err:#}", options.plugin_name()), true);
                }
                return contexts;
            }
        };

        let parallelism = plugin.parallelism();
        log::debug!(
            "Validating {} identifier(s) with {} ({:?})",
            contexts.len(),
            options.plugin_name(),
            parallelism
        );

        self.prepare(plugin.as_ref(), parallelism, &mut contexts)
            .await;

        if self.cancel.is_cancelled() {
            for vc in contexts.iter_mut().filter(|vc| vc.auth.is_pending()) {
                vc.auth.add_error("cancelled", true);
            }
        } else if !contexts.iter().all(|vc| vc.auth.is_pending()) {
            for vc in contexts.iter_mut().filter(|vc| vc.auth.is_pending()) {
                vc.auth
                    .add_error("not submitted because another identifier failed", true);
            }
        } else if let Err(err) = plugin.commit().await {
            for vc in &mut contexts {
                vc.auth.add_error(format!("commit failed: {err:#}"), true);
            }
        } else {
            self.answer(parallelism, &mut contexts).await;
        }

        if let Err(err) = plugin.cleanup().await {
            log::warn!(
                "Error cleaning up {} validation: {err:#}",
                options.plugin_name()
            );
        }

        contexts
    }

    async fn prepare(
        &self,
        plugin: &dyn ValidationPlugin,
        parallelism: Parallelism,
        contexts: &mut [ValidationContext],
    ) {
        if parallelism.prepare {
            join_all(contexts.iter_mut().map(|vc| prepare_one(plugin, vc))).await;
            return;
        }

        let mut remaining = contexts.iter_mut();

        while let Some(vc) = remaining.next() {
            if self.cancel.is_cancelled() {
                vc.auth.add_error("cancelled", true);
                continue;
            }

            prepare_one(plugin, vc).await;

            if vc.auth.success() == Some(false) {
                for rest in remaining.by_ref() {
                    rest.auth.add_error("skipped after an earlier failure", true);
                }
            }
        }
    }

    async fn answer(&self, parallelism: Parallelism, contexts: &mut [ValidationContext]) {
        if parallelism.answer {
            join_all(contexts.iter_mut().map(|vc| self.answer_one(vc))).await;
        } else {
            for vc in contexts.iter_mut() {
                self.answer_one(vc).await;
            }
        }
    }

    async fn answer_one(&self, vc: &mut ValidationContext) {
        if !vc.auth.is_pending() {
            return;
        }

        if self.cancel.is_cancelled() {
            vc.auth.add_error("cancelled", true);
            return;
        }

        let Some(challenge) = vc.challenge.as_ref() else {
            vc.auth.add_error("no challenge selected", true);
            return;
        };

        log::info!("[{}] Submitting challenge", vc.auth.identifier);

        let answered = match self.acme.answer_challenge(challenge).await {
            Ok(answered) => answered,
            Err(err) => {
                vc.auth
                    .add_error(format!("submitting challenge: {err:#}"), true);
                return;
            }
        };

        match answered.status {
            api::ChallengeStatus::Valid => {
                vc.auth.mark_valid();
                return;
            }
            api::ChallengeStatus::Invalid => {
                let reason = answered
                    .error
                    .map(|problem| problem.to_string())
                    .unwrap_or_else(|| "challenge is invalid".to_owned());
                vc.auth.add_error(reason, true);
                return;
            }
            api::ChallengeStatus::Pending | api::ChallengeStatus::Processing => {}
        }

        self.poll(vc).await;
    }

    async fn poll(&self, vc: &mut ValidationContext) {
        let interval = self.settings.acme.authorization_poll_interval();
        let attempts = self.settings.acme.authorization_poll_attempts.max(1);

        for attempt in 1..=attempts {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    vc.auth.add_error("cancelled", true);
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            let authorization = match self.acme.authorization(&vc.auth.url).await {
                Ok(authorization) => authorization,
                Err(err) => {
                    vc.auth
                        .add_error(format!("refreshing authorization: {err:#}"), true);
                    return;
                }
            };

            match authorization.status {
                api::AuthorizationStatus::Pending => {
                    log::debug!("[{}] Still pending (attempt {attempt})", vc.auth.identifier);
                }
                api::AuthorizationStatus::Valid => {
                    log::info!("[{}] Authorization result: valid", vc.auth.identifier);
                    vc.auth.authorization = authorization;
                    vc.auth.mark_valid();
                    return;
                }
                status => {
                    let reason = authorization
                        .error_summary()
                        .unwrap_or_else(|| format!("authorization is {status:?}"));
                    vc.auth.authorization = authorization;
                    vc.auth.add_error(reason, true);
                    return;
                }
            }
        }

        vc.auth.add_error(
            format!("authorization still pending after {attempts} attempts"),
            true,
        );
    }
}

async fn prepare_one(plugin: &dyn ValidationPlugin, vc: &mut ValidationContext) {
    let result = match vc.parameters() {
        Some(params) => plugin.prepare_challenge(&params).await,
        None => Err(eyre::eyre!("no challenge proof available")),
    };

    if let Err(err) = result {
        vc.auth
            .add_error(format!("preparation failed: {err:#}"), true);
    }
}

/// Groups by challenge type and plugin options, in order of first appearance.
fn group_contexts(contexts: Vec<ValidationContext>) -> Vec<Vec<ValidationContext>> {
    let mut groups: Vec<Vec<ValidationContext>> = Vec::new();

    for vc in contexts {
        let existing = groups.iter_mut().find(|group| {
            group.first().is_some_and(|first| {
                first.challenge_type == vc.challenge_type && first.options == vc.options
            })
        });

        match existing {
            Some(group) => group.push(vc),
            None => groups.push(vec![vc]),
        }
    }

    groups
}
