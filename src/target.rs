//! What a certificate is requested for.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// A group of identifiers originating from the same place, e.g. the bindings of one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<u64>,
    pub identifiers: Vec<String>,
}

impl TargetPart {
    /// Creates a part with normalized, deduplicated identifiers.
    pub fn new<I, S>(site_id: Option<u64>, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut part = TargetPart {
            site_id,
            identifiers: Vec::new(),
        };

        for identifier in identifiers {
            part.add_identifier(identifier.as_ref());
        }

        part
    }

    /// Adds `identifier` unless the part already has it. Returns true if it was added.
    pub fn add_identifier(&mut self, identifier: &str) -> bool {
        let identifier = normalize_identifier(identifier);

        if identifier.is_empty() || self.identifiers.contains(&identifier) {
            return false;
        }

        self.identifiers.push(identifier);
        true
    }
}

/// The identifiers a renewal wants certified, as produced by a target plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub friendly_name: String,
    pub common_name: String,
    pub parts: Vec<TargetPart>,

    /// DER encoded CSR supplied by the user. Such targets cannot be split.
    pub user_csr_bytes: Option<Vec<u8>>,

    /// Private key matching the user's CSR, when the user provided it.
    pub user_private_key_pem: Option<Zeroizing<String>>,
}

impl Target {
    /// Creates a target, dropping empty parts. The common name defaults to the first identifier.
    pub fn new(
        friendly_name: impl Into<String>,
        common_name: Option<&str>,
        parts: Vec<TargetPart>,
    ) -> Self {
        let parts = parts
            .into_iter()
            .filter(|part| !part.identifiers.is_empty())
            .collect::<Vec<_>>();

        let common_name = common_name
            .map(normalize_identifier)
            .or_else(|| {
                parts
                    .iter()
                    .flat_map(|part| part.identifiers.first())
                    .next()
                    .cloned()
            })
            .unwrap_or_default();

        Target {
            friendly_name: friendly_name.into(),
            common_name,
            parts,
            user_csr_bytes: None,
            user_private_key_pem: None,
        }
    }

    /// All distinct identifiers, common name first.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut seen = HashSet::new();

        std::iter::once(self.common_name.as_str())
            .filter(|cn| {
                self.parts
                    .iter()
                    .any(|part| part.identifiers.iter().any(|id| id.as_str() == *cn))
            })
            .chain(
                self.parts
                    .iter()
                    .flat_map(|part| part.identifiers.iter().map(String::as_str)),
            )
            .filter(|id| seen.insert(*id))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(|part| part.identifiers.is_empty())
    }

    pub fn has_wildcard(&self) -> bool {
        self.identifiers().iter().any(|id| is_wildcard(id))
    }

    /// The part carrying `identifier`, preferring one with a site id.
    pub fn part_for(&self, identifier: &str) -> Option<&TargetPart> {
        let mut candidates = self
            .parts
            .iter()
            .filter(|part| part.identifiers.iter().any(|id| id == identifier));

        let first = candidates.next()?;
        if first.site_id.is_some() {
            return Some(first);
        }

        candidates.find(|part| part.site_id.is_some()).or(Some(first))
    }
}

pub fn is_wildcard(identifier: &str) -> bool {
    identifier.starts_with("*.")
}

/// Lowercase, trimmed, without a trailing dot.
pub fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Rough check that `identifier` can be requested as a `dns` identifier.
pub fn is_dns_name(identifier: &str) -> bool {
    let name = identifier.strip_prefix("*.").unwrap_or(identifier);

    !name.is_empty()
        && name.len() <= 253
        && name.parse::<std::net::IpAddr>().is_err()
        && name.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        })
}
