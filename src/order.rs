//! A single ACME order's worth of work within a renewal run.

use crate::{renewal::OrderResult, target::Target};

/// Created fresh by the order plugin on every run; only its [`OrderResult`] is persisted.
#[derive(Debug, Clone)]
pub struct Order {
    pub renewal_id: String,
    pub target: Target,

    /// Appended to the renewal's name when the renewal is split into several orders.
    pub friendly_name_part: Option<String>,

    /// Appended to the cache file name so split orders do not overwrite each other.
    pub cache_key_part: Option<String>,

    pub result: OrderResult,
}

impl Order {
    pub fn new(
        renewal_id: &str,
        target: Target,
        friendly_name_part: Option<String>,
        cache_key_part: Option<String>,
    ) -> Self {
        let name = match &friendly_name_part {
            Some(part) => format!("{} [{part}]", target.friendly_name),
            None => target.friendly_name.clone(),
        };

        Order {
            renewal_id: renewal_id.to_owned(),
            target,
            friendly_name_part,
            cache_key_part,
            result: OrderResult::new(name),
        }
    }

    pub fn friendly_name(&self) -> &str {
        &self.result.name
    }

    /// Base name of this order's files in the certificate cache.
    pub fn cache_key(&self) -> String {
        match &self.cache_key_part {
            Some(part) => format!("{}-{}", self.renewal_id, crate::util::safe_file_name(part)),
            None => self.renewal_id.clone(),
        }
    }
}
