//! Process-wide settings.
//!
//! Loaded once at startup from a TOML file and passed down as `Arc<Settings>`. Every field has a
//! default so an empty (or missing) file yields a working configuration against Let's Encrypt.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use eyre::WrapErr as _;
use serde::Deserialize;

use crate::{acme::DirectoryUrl, plugins::validation::ValidationOptions};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub acme: AcmeSettings,
    pub renewal: RenewalSettings,
    pub paths: PathSettings,
    pub http: HttpSettings,
    pub store: StoreSettings,

    /// Validation used for matching identifiers instead of the renewal's own, first match wins.
    pub validation: Vec<ValidationRule>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AcmeSettings {
    /// Directory URL of the CA.
    pub base_uri: String,

    /// Account contacts, e.g. `mailto:admin@example.com`.
    pub contact: Vec<String>,

    /// Attempts per ACME request before a transient error is surfaced.
    pub retry_count: u32,

    /// Initial delay between attempts, doubled after each one.
    pub retry_backoff_ms: u64,

    /// Upper bound for the delay between attempts.
    pub retry_backoff_max_ms: u64,

    pub authorization_poll_interval_ms: u64,
    pub authorization_poll_attempts: u32,

    pub order_poll_interval_ms: u64,
    pub order_poll_attempts: u32,
}

impl Default for AcmeSettings {
    fn default() -> Self {
        Self {
            base_uri: DirectoryUrl::LetsEncrypt.to_url().to_owned(),
            contact: Vec::new(),
            retry_count: 4,
            retry_backoff_ms: 1_000,
            retry_backoff_max_ms: 30_000,
            authorization_poll_interval_ms: 2_000,
            authorization_poll_attempts: 30,
            order_poll_interval_ms: 2_000,
            order_poll_attempts: 30,
        }
    }
}

impl AcmeSettings {
    pub fn directory_url(&self) -> DirectoryUrl<'_> {
        DirectoryUrl::from_url(&self.base_uri)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn retry_backoff_max(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_max_ms)
    }

    pub fn authorization_poll_interval(&self) -> Duration {
        Duration::from_millis(self.authorization_poll_interval_ms)
    }

    pub fn order_poll_interval(&self) -> Duration {
        Duration::from_millis(self.order_poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenewalSettings {
    /// Days after a successful run before the renewal is due again.
    pub days: u32,
}

impl Default for RenewalSettings {
    fn default() -> Self {
        Self { days: 55 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathSettings {
    /// Holds the account key and the persisted renewals.
    pub config: PathBuf,

    /// Issued certificates and their keys. Defaults to `<config>/certificates`.
    pub cache: Option<PathBuf>,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            config: PathBuf::from("wacs"),
            cache: None,
        }
    }
}

impl PathSettings {
    pub fn cache_dir(&self) -> PathBuf {
        self.cache
            .clone()
            .unwrap_or_else(|| self.config.join("certificates"))
    }

    pub fn account_key_file(&self) -> PathBuf {
        self.config.join("account.pem")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSettings {
    pub timeout_secs: u64,

    /// Proxy for all outgoing requests, e.g. `http://proxy.local:3128`.
    pub proxy: Option<String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            proxy: None,
        }
    }
}

impl HttpSettings {
    pub fn client(&self) -> eyre::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .user_agent(concat!("wacs/", env!("CARGO_PKG_VERSION")));

        if let Some(proxy) = &self.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy).wrap_err("invalid proxy url")?);
        }

        Ok(builder.build()?)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSettings {
    /// Leave replaced certificates in their stores instead of deleting them.
    pub keep_existing: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationRule {
    /// Host name glob; `*` matches any run of characters, case is ignored.
    pub pattern: String,
    pub options: ValidationOptions,
}

const RULE_MATCH: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

impl ValidationRule {
    pub fn matches(&self, identifier: &str) -> bool {
        glob::Pattern::new(&self.pattern)
            .is_ok_and(|pattern| pattern.matches_with(identifier, RULE_MATCH))
    }
}

impl Settings {
    pub fn from_toml(toml: &str) -> eyre::Result<Settings> {
        let settings: Settings = basic_toml::from_str(toml).wrap_err("invalid settings")?;

        for rule in &settings.validation {
            glob::Pattern::new(&rule.pattern)
                .wrap_err_with(|| format!("invalid validation pattern {:?}", rule.pattern))?;
        }

        Ok(settings)
    }

    /// Loads settings from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> eyre::Result<Settings> {
        match std::fs::read_to_string(path) {
            Ok(toml) => Self::from_toml(&toml).wrap_err_with(|| format!("in {}", path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!("{} not found, using default settings", path.display());
                Ok(Settings::default())
            }
            Err(err) => Err(err).wrap_err_with(|| format!("reading {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let settings = Settings::from_toml(
            r#"
            [acme]
            base_uri = "https://acme-staging-v02.api.letsencrypt.org/directory"
            contact = ["mailto:admin@example.com"]
            retry_count = 2

            [renewal]
            days = 60

            [paths]
            config = "/var/lib/wacs"
            "#,
        )
        .unwrap();

        assert_eq!(settings.acme.retry_count, 2);
        assert_eq!(settings.acme.order_poll_attempts, 30);
        assert_eq!(settings.renewal.days, 60);
        assert_eq!(
            settings.paths.cache_dir(),
            PathBuf::from("/var/lib/wacs/certificates")
        );
        assert!(matches!(
            settings.acme.directory_url(),
            DirectoryUrl::LetsEncryptStaging
        ));
        assert!(!settings.store.keep_existing);
    }

    #[test]
    fn validation_rules() {
        let settings = Settings::from_toml(
            r#"
            [[validation]]
            pattern = "*.intranet.example.com"
            options = { plugin = "script", createScript = "/usr/local/bin/dns-create" }
            "#,
        )
        .unwrap();

        let rule = &settings.validation[0];
        assert!(rule.matches("*.intranet.example.com"));
        assert!(rule.matches("Host.Intranet.example.com"));
        assert!(!rule.matches("intranet.example.com"));
        assert!(matches!(rule.options, ValidationOptions::Script { .. }));
    }

    #[test]
    fn invalid_validation_pattern() {
        let err = Settings::from_toml(
            r#"
            [[validation]]
            pattern = "[example.com"
            options = { plugin = "manual" }
            "#,
        )
        .unwrap_err();

        assert!(format!("{err:#}").contains("invalid validation pattern"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Settings::from_toml("[acme]\nbase_url = \"x\"\n").is_err());
    }
}
