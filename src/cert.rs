use std::{
    io::{BufReader, Cursor},
    path::PathBuf,
};

use der::{
    asn1::Ia5String,
    oid::{AssociatedOid, ObjectIdentifier},
    Decode as _, DecodePem as _, Encode as _,
};
use eyre::{eyre, WrapErr as _};
use pkcs8::{DecodePrivateKey as _, EncodePrivateKey as _};
use sha2::{Digest as _, Sha256};
use time::OffsetDateTime;
use x509_cert::{
    builder::{Builder, RequestBuilder as CsrBuilder},
    ext::{
        pkix::{name::GeneralName, SubjectAltName},
        Extension,
    },
    name::Name,
    request::CertReq,
};
use zeroize::Zeroizing;

const OID_COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const OID_EXTENSION_REQUEST: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.14");

/// Make a P-256 private key (from which we can derive a public key).
pub fn create_p256_key() -> p256::ecdsa::SigningKey {
    let csprng = &mut rand::thread_rng();
    ecdsa::SigningKey::from(p256::SecretKey::random(csprng))
}

pub(crate) fn key_to_pem(key: &p256::ecdsa::SigningKey) -> eyre::Result<Zeroizing<String>> {
    Ok(key.to_pkcs8_pem(pem::LineEnding::LF)?)
}

pub(crate) fn key_from_pem(pem: &str) -> eyre::Result<p256::ecdsa::SigningKey> {
    p256::ecdsa::SigningKey::from_pkcs8_pem(pem).wrap_err("invalid P-256 private key")
}

/// Creates a DER encoded CSR with `domains` and signs it with `signer`.
///
/// The first item of `domains` is picked for the CSR's Common Name (CN). All domains are added to a
/// Subject Alternative Name (SAN) extension.
pub(crate) fn create_csr(signer: &p256::ecdsa::SigningKey, domains: &[&str]) -> eyre::Result<Vec<u8>> {
    let primary_domain = domains
        .first()
        .ok_or_else(|| eyre!("cannot create a CSR without domains"))?;
    let subject = format!("CN={primary_domain}").parse::<Name>()?;

    let mut csr = CsrBuilder::new(subject, signer)?;

    csr.add_extension(&SubjectAltName(
        domains
            .iter()
            .map(|domain| Ok(GeneralName::DnsName(Ia5String::new(domain)?)))
            .collect::<der::Result<Vec<_>>>()?,
    ))?;

    let csr = csr
        .build::<p256::ecdsa::DerSignature>()
        .context("build csr")?;

    Ok(csr.to_der()?)
}

/// A CSR supplied by the user instead of one generated per order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCsr {
    pub der: Vec<u8>,
    pub common_name: Option<String>,
    pub identifiers: Vec<String>,
}

impl UserCsr {
    pub fn from_pem(pem: &str) -> eyre::Result<UserCsr> {
        let csr = CertReq::from_pem(pem.trim()).wrap_err("invalid certificate request")?;

        let mut identifiers = Vec::new();

        for attribute in csr.info.attributes.iter() {
            if attribute.oid != OID_EXTENSION_REQUEST {
                continue;
            }

            for value in attribute.values.iter() {
                let extensions = Vec::<Extension>::from_der(&value.to_der()?)?;
                identifiers.extend(dns_names(&extensions)?);
            }
        }

        Ok(UserCsr {
            der: csr.to_der()?,
            common_name: common_name(&csr.info.subject),
            identifiers,
        })
    }
}

fn common_name(name: &Name) -> Option<String> {
    name.0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .find(|atv| atv.oid == OID_COMMON_NAME)
        .and_then(|atv| std::str::from_utf8(atv.value.value()).ok())
        .map(str::to_owned)
}

fn dns_names(extensions: &[Extension]) -> eyre::Result<Vec<String>> {
    let mut names = Vec::new();

    for ext in extensions {
        if ext.extn_id != SubjectAltName::OID {
            continue;
        }

        let san = SubjectAltName::from_der(ext.extn_value.as_bytes())?;
        names.extend(san.0.iter().filter_map(|name| match name {
            GeneralName::DnsName(dns) => Some(dns.to_string()),
            _ => None,
        }));
    }

    Ok(names)
}

/// An issued certificate chain with its private key and where it was cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    chain_pem: String,
    private_key_pem: Option<Zeroizing<String>>,

    /// Hex encoded SHA-256 of the leaf certificate, uppercase.
    pub thumbprint: String,
    pub common_name: Option<String>,
    pub sans: Vec<String>,
    pub not_after: OffsetDateTime,

    /// Location in the certificate cache, when cached.
    pub cache_file: Option<PathBuf>,
}

impl CertificateInfo {
    /// Parses a PEM chain (leaf first). The key is absent for user-supplied CSRs.
    pub fn parse(chain_pem: String, private_key_pem: Option<Zeroizing<String>>) -> eyre::Result<Self> {
        if let Some(key) = &private_key_pem {
            key_from_pem(key)?;
        }

        let chain = certificate_chain(&chain_pem)?;
        let leaf_der = chain
            .first() // EE cert is first
            .ok_or_else(|| eyre!("no certificates in chain"))?;

        let leaf = x509_cert::Certificate::from_der(leaf_der)?;
        let tbs = &leaf.tbs_certificate;

        let not_after = OffsetDateTime::from_unix_timestamp(
            i64::try_from(tbs.validity.not_after.to_unix_duration().as_secs())?,
        )?;

        let sans = match &tbs.extensions {
            Some(extensions) => dns_names(extensions)?,
            None => Vec::new(),
        };

        Ok(CertificateInfo {
            thumbprint: hex::encode_upper(Sha256::digest(leaf_der)),
            common_name: common_name(&tbs.subject),
            sans,
            not_after,
            chain_pem,
            private_key_pem,
            cache_file: None,
        })
    }

    /// The full chain in PEM format, leaf first.
    pub fn chain_pem(&self) -> &str {
        &self.chain_pem
    }

    /// The leaf certificate alone in PEM format.
    pub fn certificate_pem(&self) -> eyre::Result<String> {
        let chain = certificate_chain(&self.chain_pem)?;
        let leaf = chain.first().ok_or_else(|| eyre!("no certificates in chain"))?;

        pem::encode_string("CERTIFICATE", pem::LineEnding::LF, leaf)
            .map_err(|err| eyre!("encoding certificate: {err}"))
    }

    /// The private key in PEM format.
    pub fn private_key_pem(&self) -> Option<&str> {
        self.private_key_pem.as_deref().map(String::as_str)
    }

    /// Common name, falling back to the first SAN.
    pub fn subject_name(&self) -> &str {
        self.common_name
            .as_deref()
            .or(self.sans.first().map(String::as_str))
            .unwrap_or_default()
    }

    /// Count of (whole) valid days left, negative for expired certificates.
    pub fn valid_days_left(&self) -> i64 {
        (self.not_after - OffsetDateTime::now_utc()).whole_days()
    }
}

/// The certificates of a PEM chain in DER format.
pub(crate) fn certificate_chain(chain_pem: &str) -> eyre::Result<Vec<Vec<u8>>> {
    let mut rdr = BufReader::new(Cursor::new(chain_pem));

    rustls_pemfile::certs(&mut rdr)
        .map(|res| res.map(|cert| cert.to_vec()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csr_round_trips_identifiers() {
        let key = create_p256_key();
        let der = create_csr(&key, &["example.com", "www.example.com"]).unwrap();
        let pem = pem::encode_string("CERTIFICATE REQUEST", pem::LineEnding::LF, &der).unwrap();

        let csr = UserCsr::from_pem(&pem).unwrap();
        assert_eq!(csr.common_name.as_deref(), Some("example.com"));
        assert_eq!(csr.identifiers, ["example.com", "www.example.com"]);
        assert_eq!(csr.der, der);
    }

    #[test]
    fn parses_issued_certificate() {
        let key = rcgen::KeyPair::generate().unwrap();
        let params =
            rcgen::CertificateParams::new(vec!["example.com".to_owned(), "www.example.com".to_owned()])
                .unwrap();
        let cert = params.self_signed(&key).unwrap();

        let info = CertificateInfo::parse(cert.pem(), Some(Zeroizing::new(key.serialize_pem())))
            .unwrap();

        assert_eq!(info.sans, ["example.com", "www.example.com"]);
        assert_eq!(info.thumbprint.len(), 64);
        assert_eq!(info.subject_name(), "rcgen self signed cert");
        assert!(info.valid_days_left() > 0);
        assert!(info.certificate_pem().unwrap().starts_with("-----BEGIN CERTIFICATE-----"));
    }

    #[test]
    fn rejects_garbage_chain() {
        assert!(CertificateInfo::parse("CERT HERE".to_owned(), None).is_err());
    }
}
