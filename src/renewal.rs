//! Persisted renewal definitions and their history.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::{
    plugins::{
        csr::CsrOptions, installation::InstallationOptions, order::OrderOptions,
        store::StoreOptions, target::TargetOptions, validation::ValidationOptions,
    },
    settings::Settings,
};

/// What to keep securing, and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Renewal {
    pub id: String,

    #[serde(default)]
    pub friendly_name: Option<String>,

    pub target: TargetOptions,

    #[serde(default)]
    pub order: OrderOptions,

    #[serde(default)]
    pub csr: CsrOptions,

    pub validation: ValidationOptions,

    #[serde(default)]
    pub stores: Vec<StoreOptions>,

    #[serde(default)]
    pub installations: Vec<InstallationOptions>,

    /// Overrides the renewal period from the settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_renewal_days: Option<u32>,

    /// Oldest first. Only ever appended to.
    #[serde(default)]
    pub history: Vec<RenewResult>,

    /// Created during this run and not saved yet.
    #[serde(skip)]
    pub new: bool,

    /// Options were changed during this run.
    #[serde(skip)]
    pub updated: bool,

    /// Cancelled by the user; removed from storage on the next save.
    #[serde(skip)]
    pub deleted: bool,
}

impl Renewal {
    pub fn new(target: TargetOptions, validation: ValidationOptions) -> Self {
        Renewal {
            id: crate::util::random_id(12),
            friendly_name: None,
            target,
            order: OrderOptions::default(),
            csr: CsrOptions::default(),
            validation,
            stores: Vec::new(),
            installations: Vec::new(),
            custom_renewal_days: None,
            history: Vec::new(),
            new: true,
            updated: false,
            deleted: false,
        }
    }

    pub fn last_result(&self) -> Option<&RenewResult> {
        self.history.last()
    }

    pub fn last_success(&self) -> Option<&RenewResult> {
        self.history.iter().rev().find(|result| result.success)
    }

    pub fn renewal_days(&self, settings: &Settings) -> u32 {
        self.custom_renewal_days.unwrap_or(settings.renewal.days)
    }

    /// When the renewal is due again after its last success. `None` if it never succeeded.
    pub fn next_due(&self, settings: &Settings) -> Option<OffsetDateTime> {
        self.last_success()
            .map(|result| result.date + Duration::days(i64::from(self.renewal_days(settings))))
    }

    /// Thumbprints from the last successful run.
    pub fn current_thumbprints(&self) -> &[String] {
        self.last_success()
            .map(|result| result.thumbprints.as_slice())
            .unwrap_or_default()
    }
}

impl fmt::Display for Renewal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.friendly_name {
            Some(name) => write!(f, "[{name}] ({})", self.id),
            None => write!(f, "[{}]", self.id),
        }
    }
}

/// Outcome of one renewal attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewResult {
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,

    pub success: bool,

    #[serde(default)]
    pub orders: Vec<OrderResult>,

    #[serde(default)]
    pub thumbprints: Vec<String>,

    #[serde(default)]
    pub errors: Vec<String>,
}

impl RenewResult {
    /// Aggregates order results; success requires every order to succeed.
    pub fn from_orders(date: OffsetDateTime, orders: Vec<OrderResult>) -> Self {
        let success = !orders.is_empty() && orders.iter().all(|order| order.success);

        let thumbprints = orders
            .iter()
            .filter_map(|order| order.thumbprint.clone())
            .collect();

        let errors = orders
            .iter()
            .flat_map(|order| {
                order
                    .errors
                    .iter()
                    .map(move |err| format!("{}: {err}", order.name))
            })
            .collect();

        RenewResult {
            date,
            success,
            orders,
            thumbprints,
            errors,
        }
    }

    /// A run that failed before any order could be attempted.
    pub fn failure(date: OffsetDateTime, error: impl Into<String>) -> Self {
        RenewResult {
            date,
            success: false,
            orders: Vec::new(),
            thumbprints: Vec::new(),
            errors: vec![error.into()],
        }
    }
}

/// Outcome of one order within a renewal attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResult {
    pub name: String,

    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbprint: Option<String>,

    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires: Option<OffsetDateTime>,

    #[serde(default)]
    pub errors: Vec<String>,
}

impl OrderResult {
    pub fn new(name: impl Into<String>) -> Self {
        OrderResult {
            name: name.into(),
            success: false,
            thumbprint: None,
            expires: None,
            errors: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.success = false;
        self.errors.push(error.into());
    }
}
