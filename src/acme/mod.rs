//! ACME protocol client.
//!
//! [`AcmeClient`] owns the account key, the nonce pool and the retry policy for a run. The renewal
//! machinery only talks to it through [`AcmeService`], so every step of the order life cycle can be
//! driven against a scripted CA in tests.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use eyre::{bail, eyre, WrapErr as _};

use crate::{api, error::ConfigurationError, settings::Settings, util::write_private};

mod jws;
mod key;
mod proof;
mod req;
mod transport;

pub use self::proof::ChallengeProof;
use self::{
    key::AccountKey,
    req::{req_expect_header, req_get, req_handle_error, req_safe_read_body},
    transport::{RetryPolicy, Transport},
};

const LETSENCRYPT_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";
const LETSENCRYPT_STAGING_URL: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Known ACME directories.
#[derive(Debug, Clone)]
pub enum DirectoryUrl<'a> {
    /// The production Let's Encrypt directory.
    LetsEncrypt,

    /// The staging Let's Encrypt directory. Issues untrusted certificates under relaxed rate
    /// limits.
    LetsEncryptStaging,

    /// Any other directory URL.
    Other(&'a str),
}

impl<'a> DirectoryUrl<'a> {
    pub fn from_url(url: &'a str) -> Self {
        match url.trim_end_matches('/') {
            LETSENCRYPT_URL => DirectoryUrl::LetsEncrypt,
            LETSENCRYPT_STAGING_URL => DirectoryUrl::LetsEncryptStaging,
            _ => DirectoryUrl::Other(url),
        }
    }

    pub fn to_url(&self) -> &str {
        match self {
            DirectoryUrl::LetsEncrypt => LETSENCRYPT_URL,
            DirectoryUrl::LetsEncryptStaging => LETSENCRYPT_STAGING_URL,
            DirectoryUrl::Other(url) => url,
        }
    }
}

/// An order created at the CA together with its URL.
#[derive(Debug, Clone)]
pub struct AcmeOrder {
    pub url: String,
    pub details: api::Order,
}

/// Order life cycle operations the renewal machinery relies on.
///
/// Implementations retry transient CA errors themselves; an error returned from here is final for
/// the current run.
#[async_trait]
pub trait AcmeService: Send + Sync {
    /// Creates a new order for `identifiers`, the first one being the common name.
    async fn create_order(&self, identifiers: &[String]) -> eyre::Result<AcmeOrder>;

    /// Fetches (or refreshes) an authorization.
    async fn authorization(&self, url: &str) -> eyre::Result<api::Authorization>;

    /// Tells the CA the proof for `challenge` is in place.
    async fn answer_challenge(&self, challenge: &api::Challenge) -> eyre::Result<api::Challenge>;

    /// Key authorization for `token` under the account key.
    fn key_authorization(&self, token: &str) -> eyre::Result<String>;

    /// Submits the DER encoded CSR.
    async fn finalize(&self, order: &AcmeOrder, csr_der: &[u8]) -> eyre::Result<api::Order>;

    async fn refresh_order(&self, url: &str) -> eyre::Result<api::Order>;

    /// Downloads the PEM chain, leaf first.
    async fn download_certificate(&self, url: &str) -> eyre::Result<String>;
}

/// Polls the order until it leaves `processing` (or `pending` after finalize).
pub async fn wait_for_order(
    acme: &dyn AcmeService,
    url: &str,
    interval: Duration,
    attempts: u32,
) -> eyre::Result<api::Order> {
    for attempt in 1..=attempts.max(1) {
        let order = acme.refresh_order(url).await?;

        match order.status() {
            api::OrderStatus::Processing | api::OrderStatus::Pending | api::OrderStatus::Ready => {
                log::debug!("Order {url} is {:?} (attempt {attempt})", order.status());
                tokio::time::sleep(interval).await;
            }
            _ => return Ok(order),
        }
    }

    Err(eyre!("order {url} was not processed after {attempts} attempts"))
}

/// Client for one CA account.
#[derive(Debug)]
pub struct AcmeClient {
    transport: Transport,
    directory: api::Directory,
    account: api::Account,
}

impl AcmeClient {
    /// Discovers the directory and looks up (or creates) the account for the configured key.
    ///
    /// The account key is read from the config directory; when there is none yet a new key is
    /// generated and written there before the account is registered.
    pub async fn connect(settings: &Settings, http: reqwest::Client) -> eyre::Result<AcmeClient> {
        let url = settings.acme.directory_url();

        log::info!("Connecting to {}", url.to_url());

        let res = req_handle_error(req_get(&http, url.to_url()).await?).await?;
        let directory = res
            .json::<api::Directory>()
            .await
            .wrap_err("invalid ACME directory")?;

        if directory
            .meta
            .as_ref()
            .is_some_and(api::DirectoryMeta::external_account_required)
        {
            return Err(ConfigurationError::Invalid(
                "the CA requires external account binding".to_owned(),
            )
            .into());
        }

        let key = load_or_create_key(&settings.paths.account_key_file()).await?;

        let mut transport = Transport::new(
            http,
            &directory.new_nonce,
            key,
            RetryPolicy::from_settings(&settings.acme),
        );

        // newAccount answers 200 with the existing account for a known key, so this doubles
        // as the lookup
        let request = api::Account {
            contact: (!settings.acme.contact.is_empty()).then(|| settings.acme.contact.clone()),
            terms_of_service_agreed: Some(true),
            ..Default::default()
        };

        let res = transport.call_jwk(&directory.new_account, &request).await?;
        let kid = req_expect_header(&res, "location")?;
        log::debug!("Key ID is: {kid}");
        let account = res.json::<api::Account>().await?;

        if account.is_status_deactivated() || account.is_status_revoked() {
            bail!("ACME account {kid} is {:?}", account.status);
        }

        transport.set_key_id(kid);

        Ok(AcmeClient {
            transport,
            directory,
            account,
        })
    }

    pub fn api_directory(&self) -> &api::Directory {
        &self.directory
    }

    pub fn api_account(&self) -> &api::Account {
        &self.account
    }
}

async fn load_or_create_key(path: &Path) -> eyre::Result<AccountKey> {
    match tokio::fs::read_to_string(path).await {
        Ok(pem) => {
            log::debug!("Using account key {}", path.display());
            AccountKey::from_pem(&pem)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            log::info!("Creating new account key {}", path.display());

            let key = AccountKey::generate();

            write_private(path, key.to_pem()?.as_bytes()).await?;

            Ok(key)
        }
        Err(err) => Err(err).wrap_err_with(|| format!("reading {}", path.display())),
    }
}

#[async_trait]
impl AcmeService for AcmeClient {
    async fn create_order(&self, identifiers: &[String]) -> eyre::Result<AcmeOrder> {
        let requested = identifiers
            .iter()
            .map(|identifier| api::Identifier::dns(identifier))
            .collect::<Vec<_>>();

        let order = api::Order::from_identifiers(requested.clone());

        let res = self
            .transport
            .call_kid(&self.directory.new_order, &order)
            .await?;

        let url = req_expect_header(&res, "location")?;
        let mut details = res.json::<api::Order>().await?;

        // CAs may return identifiers in a different order, which would flip the common name
        if details.identifiers.len() != requested.len()
            || details.identifiers.iter().any(|id| !requested.contains(id))
        {
            bail!(
                "order identifier mismatch: requested {:?} and got {:?}",
                requested,
                details.identifiers
            );
        }
        details.identifiers = requested;

        log::debug!("Created order {url} ({:?})", details.status());

        Ok(AcmeOrder { url, details })
    }

    async fn authorization(&self, url: &str) -> eyre::Result<api::Authorization> {
        let res = self.transport.call_kid(url, &api::EmptyString).await?;
        Ok(res.json().await?)
    }

    async fn answer_challenge(&self, challenge: &api::Challenge) -> eyre::Result<api::Challenge> {
        let res = self
            .transport
            .call_kid(&challenge.url, &api::EmptyObject)
            .await?;
        Ok(res.json().await?)
    }

    fn key_authorization(&self, token: &str) -> eyre::Result<String> {
        proof::key_authorization(token, self.transport.key())
    }

    async fn finalize(&self, order: &AcmeOrder, csr_der: &[u8]) -> eyre::Result<api::Order> {
        let res = self
            .transport
            .call_kid(&order.details.finalize, &api::Finalize::from_der(csr_der))
            .await?;
        Ok(res.json().await?)
    }

    async fn refresh_order(&self, url: &str) -> eyre::Result<api::Order> {
        let res = self.transport.call_kid(url, &api::EmptyString).await?;
        Ok(res.json().await?)
    }

    async fn download_certificate(&self, url: &str) -> eyre::Result<String> {
        let res = self.transport.call_kid(url, &api::EmptyString).await?;
        let chain = req_safe_read_body(res).await;

        if !chain.contains("-----BEGIN CERTIFICATE-----") {
            bail!("certificate download from {url} did not return a PEM chain");
        }

        Ok(chain)
    }
}
