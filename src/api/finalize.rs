use serde::{Deserialize, Serialize};

/// Finalize request carrying the CSR, see [RFC 8555 §7.4].
///
/// [RFC 8555 §7.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.4
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finalize {
    /// CSR in base64url-encoded DER (not PEM).
    pub csr: String,
}

impl Finalize {
    pub(crate) fn from_der(csr_der: &[u8]) -> Self {
        Self {
            csr: crate::util::base64url(csr_der),
        }
    }
}
