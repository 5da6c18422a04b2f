//! Unattended certificate renewal against ACME (Automatic Certificate Management Environment)
//! providers such as [Let's Encrypt](https://letsencrypt.org/).
//!
//! A [`Renewal`] records what to secure and which plugins to use for it. Every run turns it back
//! into plugin instances, splits its [`Target`] into one or more [`Order`]s and drives each order
//! through the [RFC 8555](https://datatracker.ietf.org/doc/html/rfc8555) life cycle: order
//! creation, authorization, challenge validation, finalization and download. Issued certificates
//! are then handed to store and installation plugins.
//!
//! # Plugins
//!
//! | Category     | Built in                       |
//! |--------------|--------------------------------|
//! | target       | `manual`, `sites`, `csr`       |
//! | order        | `single`, `host`, `site`, `domain` |
//! | csr          | `ec`                           |
//! | validation   | `filesystem`, `script`, `manual` |
//! | store        | `pemfiles`, `none`             |
//! | installation | `script`, `none`               |
//!
//! Options are persisted with a `plugin` discriminator, so a saved renewal resolves to the same
//! plugins on the next (unattended) run. See [`plugins::PluginResolver`].
//!
//! # Validation
//!
//! Authorizations of an order are grouped by challenge type and validation plugin. Each plugin
//! declares whether it can prepare and answer several identifiers at once; see
//! [`validation::ValidationOrchestrator`].
//!
//! # Rate Limits
//!
//! Let's Encrypt uses [rate limits] to ensure the API is not being abused. Failed renewals are
//! retried on every scheduled run, so use the staging environment while setting things up. See
//! [`DirectoryUrl::LetsEncryptStaging`].
//!
//! [rate limits]: https://letsencrypt.org/docs/rate-limits

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]

mod cache;
mod script;
mod util;

pub mod acme;
pub mod api;
pub mod cert;
pub mod error;
pub mod input;
pub mod order;
pub mod plugins;
pub mod renew;
pub mod renewal;
pub mod renewal_store;
pub mod scheduler;
pub mod settings;
pub mod setup;
pub mod target;
pub mod validation;

#[cfg(test)]
mod test;

pub use crate::{
    acme::{AcmeClient, AcmeService, DirectoryUrl},
    cache::CertificateCache,
    cert::{create_p256_key, CertificateInfo},
    error::ConfigurationError,
    order::Order,
    renew::{RenewalExecutor, RunSummary},
    renewal::{OrderResult, RenewResult, Renewal},
    renewal_store::{FileRenewalStore, RenewalStore},
    settings::Settings,
    target::{Target, TargetPart},
};
