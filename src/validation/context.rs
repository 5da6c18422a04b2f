use crate::{
    acme::ChallengeProof,
    api::{self, ChallengeType},
    plugins::validation::{ValidationContextParameters, ValidationOptions},
    target::TargetPart,
};

/// Validation state of a single authorization.
///
/// `success` is `None` while pending. Once it is `Some(_)` it never changes again.
#[derive(Debug, Clone)]
pub struct AuthorizationContext {
    pub url: String,
    pub authorization: api::Authorization,
    pub identifier: String,

    /// The CA already had a valid authorization when the order was placed.
    pub order_valid: bool,

    success: Option<bool>,
    errors: Vec<String>,
}

impl AuthorizationContext {
    pub fn new(url: impl Into<String>, authorization: api::Authorization) -> Self {
        let order_valid = authorization.status == api::AuthorizationStatus::Valid;

        AuthorizationContext {
            url: url.into(),
            identifier: authorization.requested_identifier(),
            authorization,
            order_valid,
            success: order_valid.then_some(true),
            errors: Vec::new(),
        }
    }

    pub fn success(&self) -> Option<bool> {
        self.success
    }

    pub fn is_pending(&self) -> bool {
        self.success.is_none()
    }

    /// Records that the CA considers the identifier validated.
    pub fn mark_valid(&mut self) {
        if self.success.is_none() {
            self.success = Some(true);
        }
    }

    /// Records an error. A fatal error fails a pending context.
    pub fn add_error(&mut self, message: impl Into<String>, fatal: bool) {
        let message = message.into();

        if fatal {
            log::error!("[{}] {message}", self.identifier);
            if self.success.is_none() {
                self.success = Some(false);
            }
        } else {
            log::warn!("[{}] {message}", self.identifier);
        }

        self.errors.push(message);
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

/// An authorization together with the plugin assigned to validate it.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub auth: AuthorizationContext,
    pub options: ValidationOptions,
    pub challenge_type: ChallengeType,
    pub target_part: Option<TargetPart>,

    /// Present once the challenge was selected and its proof derived.
    pub challenge: Option<api::Challenge>,
    pub proof: Option<ChallengeProof>,
}

impl ValidationContext {
    pub fn new(
        auth: AuthorizationContext,
        options: ValidationOptions,
        target_part: Option<TargetPart>,
    ) -> Self {
        ValidationContext {
            auth,
            challenge_type: options.challenge_type(),
            options,
            target_part,
            challenge: None,
            proof: None,
        }
    }

    /// Parameters for the plugin, once a proof is available.
    pub fn parameters(&self) -> Option<ValidationContextParameters<'_>> {
        Some(ValidationContextParameters {
            authorization: &self.auth.authorization,
            identifier: &self.auth.identifier,
            challenge_type: self.challenge_type,
            target_part: self.target_part.as_ref(),
            order_valid: self.auth.order_valid,
            proof: self.proof.as_ref()?,
        })
    }
}
