use thiserror::Error;

/// A renewal cannot be executed as configured.
///
/// These are reported and recorded in the renewal history like any other failure, but they are not
/// retried within a run and never abort sibling renewals in a batch.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("no {category} plugin named `{name}` is available")]
    UnknownPlugin { category: &'static str, name: String },

    #[error("{category} plugin `{name}` cannot be used: {reason}")]
    Disabled {
        category: &'static str,
        name: String,
        reason: String,
    },

    #[error("no {category} plugin configured and user input is not available")]
    Missing { category: &'static str },

    #[error("target is empty")]
    EmptyTarget,

    #[error("{0}")]
    Invalid(String),
}

/// Returns true if the error chain contains a [`ConfigurationError`].
pub fn is_configuration_error(err: &eyre::Report) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<ConfigurationError>().is_some())
}
