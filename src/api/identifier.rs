use serde::{Deserialize, Serialize};

/// An identifier the certificate is requested for.
///
/// Only the `dns` type is produced by this crate; `ip` identifiers returned by the CA are
/// deserialized faithfully but never requested.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub _type: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(value: &str) -> Self {
        Self {
            _type: "dns".to_owned(),
            value: value.to_owned(),
        }
    }

    pub fn is_type_dns(&self) -> bool {
        self._type == "dns"
    }
}
