//! Order plugins split a target into the orders placed at the CA.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    Capability, CapabilityScope, Descriptors, PluginContext, PluginDescriptor, PluginOptions,
};
use crate::{
    input::InputService,
    order::Order,
    renewal::Renewal,
    target::{Target, TargetPart},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "plugin", rename_all = "lowercase")]
pub enum OrderOptions {
    /// One certificate for the whole target.
    #[default]
    Single,

    /// One certificate per host name.
    Host,

    /// One certificate per site.
    Site,

    /// One certificate per registrable domain.
    Domain,
}

pub trait OrderPlugin: Send + Sync {
    fn split(&self, renewal: &Renewal, target: &Target) -> Vec<Order>;
}

impl PluginOptions for OrderOptions {
    const CATEGORY: &'static str = "order";

    type Plugin = dyn OrderPlugin;

    fn plugin_name(&self) -> &'static str {
        match self {
            OrderOptions::Single => "single",
            OrderOptions::Host => "host",
            OrderOptions::Site => "site",
            OrderOptions::Domain => "domain",
        }
    }

    fn create(&self, _ctx: &PluginContext) -> eyre::Result<Box<dyn OrderPlugin>> {
        Ok(match self {
            OrderOptions::Single => Box::new(Single),
            OrderOptions::Host => Box::new(Host),
            OrderOptions::Site => Box::new(Site),
            OrderOptions::Domain => Box::new(Domain),
        })
    }
}

pub(super) fn descriptors() -> Descriptors<OrderOptions> {
    [
        (OrderOptions::Single, "Single certificate for all host names"),
        (OrderOptions::Host, "Separate certificate for each host name"),
        (OrderOptions::Site, "Separate certificate for each site"),
        (
            OrderOptions::Domain,
            "Separate certificate for each registrable domain",
        ),
    ]
    .into_iter()
    .map(|(options, description)| {
        Box::new(OrderDescriptor {
            options,
            description,
        }) as Box<dyn PluginDescriptor<OrderOptions>>
    })
    .collect()
}

struct OrderDescriptor {
    options: OrderOptions,
    description: &'static str,
}

#[async_trait]
impl PluginDescriptor<OrderOptions> for OrderDescriptor {
    fn name(&self) -> &'static str {
        self.options.plugin_name()
    }

    fn description(&self) -> &'static str {
        self.description
    }

    fn capability(&self, scope: &CapabilityScope<'_>) -> Capability {
        let has_user_csr = scope
            .target
            .is_some_and(|target| target.user_csr_bytes.is_some());

        if self.options != OrderOptions::Single && has_user_csr {
            return Capability::disabled("a target with a user supplied CSR cannot be split");
        }

        Capability::Enabled
    }

    async fn configure(
        &self,
        _target: Option<&Target>,
        _input: &dyn InputService,
    ) -> eyre::Result<OrderOptions> {
        Ok(self.options)
    }
}

fn base_name<'a>(renewal: &'a Renewal, target: &'a Target) -> &'a str {
    renewal
        .friendly_name
        .as_deref()
        .unwrap_or(&target.friendly_name)
}

/// Builds the order for a subset of `target`, keeping its common name when it is included.
fn sub_order(renewal: &Renewal, target: &Target, key: String, parts: Vec<TargetPart>) -> Order {
    let keeps_common_name = parts
        .iter()
        .any(|part| part.identifiers.contains(&target.common_name));

    let sub = Target::new(
        base_name(renewal, target),
        keeps_common_name.then_some(target.common_name.as_str()),
        parts,
    );

    Order::new(&renewal.id, sub, Some(key.clone()), Some(key))
}

/// Groups identifiers by `key`, in order of first appearance. Within a group, identifiers stay
/// with a part of their original site.
fn split_by(renewal: &Renewal, target: &Target, key: impl Fn(&str) -> String) -> Vec<Order> {
    let mut groups: Vec<(String, Vec<TargetPart>)> = Vec::new();

    for part in &target.parts {
        for identifier in &part.identifiers {
            let group_key = key(identifier);

            let idx = match groups.iter().position(|(k, _)| *k == group_key) {
                Some(idx) => idx,
                None => {
                    groups.push((group_key, Vec::new()));
                    groups.len() - 1
                }
            };

            let parts = &mut groups[idx].1;
            match parts.iter_mut().find(|p| p.site_id == part.site_id) {
                Some(existing) => {
                    existing.add_identifier(identifier);
                }
                None => parts.push(TargetPart::new(part.site_id, [identifier])),
            }
        }
    }

    groups
        .into_iter()
        .map(|(key, parts)| sub_order(renewal, target, key, parts))
        .collect()
}

/// The registrable domain of `identifier`, or the identifier itself for unknown suffixes.
pub(crate) fn registrable_domain(identifier: &str) -> String {
    let name = identifier.strip_prefix("*.").unwrap_or(identifier);

    psl::domain_str(name).unwrap_or(name).to_owned()
}

struct Single;

impl OrderPlugin for Single {
    fn split(&self, renewal: &Renewal, target: &Target) -> Vec<Order> {
        let mut target = target.clone();
        target.friendly_name = base_name(renewal, &target).to_owned();

        vec![Order::new(&renewal.id, target, None, None)]
    }
}

struct Host;

impl OrderPlugin for Host {
    fn split(&self, renewal: &Renewal, target: &Target) -> Vec<Order> {
        split_by(renewal, target, str::to_owned)
    }
}

struct Site;

impl OrderPlugin for Site {
    fn split(&self, renewal: &Renewal, target: &Target) -> Vec<Order> {
        target
            .parts
            .iter()
            .enumerate()
            .map(|(idx, part)| {
                let key = match part.site_id {
                    Some(site_id) => format!("site {site_id}"),
                    None => format!("part {}", idx + 1),
                };

                sub_order(renewal, target, key, vec![part.clone()])
            })
            .collect()
    }
}

struct Domain;

impl OrderPlugin for Domain {
    fn split(&self, renewal: &Renewal, target: &Target) -> Vec<Order> {
        split_by(renewal, target, registrable_domain)
    }
}
