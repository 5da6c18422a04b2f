use std::{collections::VecDeque, time::Duration};

use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    acme::{
        jws::{self, Jwk, JwsProtectedHeader},
        key::AccountKey,
        req::{req_expect_header, req_handle_error, req_head, req_post, ReqResult},
    },
    api::Problem,
    settings::AcmeSettings,
};

/// Bounded retry with exponential backoff for transient CA errors.
#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub(crate) fn from_settings(settings: &AcmeSettings) -> Self {
        Self {
            attempts: settings.retry_count.max(1),
            backoff: settings.retry_backoff(),
            max_backoff: settings.retry_backoff_max(),
        }
    }

    /// Delay before attempt number `attempt + 1` (zero based).
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_backoff)
    }
}

/// JWS payload and nonce handling for requests to the CA.
///
/// Setup is:
///
/// 1. `Transport::new()`
/// 2. `call_jwk()` against the newAccount url
/// 3. `set_key_id` from the returned `Location` header
/// 4. `call_kid()` for all calls after that
///
/// The transport is shared by reference across concurrent validations; the only mutable state is
/// the nonce pool, which hands every nonce out exactly once.
#[derive(Debug)]
pub(crate) struct Transport {
    http: reqwest::Client,
    key: AccountKey,
    nonce_pool: NoncePool,
    retry: RetryPolicy,
}

impl Transport {
    pub(crate) fn new(
        http: reqwest::Client,
        nonce_url: &str,
        key: AccountKey,
        retry: RetryPolicy,
    ) -> Self {
        Transport {
            nonce_pool: NoncePool::new(http.clone(), nonce_url),
            http,
            key,
            retry,
        }
    }

    pub(crate) fn set_key_id(&mut self, kid: String) {
        self.key.set_key_id(kid);
    }

    pub(crate) fn key(&self) -> &AccountKey {
        &self.key
    }

    /// Signed call carrying the full public key. Only needed for newAccount.
    pub(crate) async fn call_jwk<T>(&self, url: &str, body: &T) -> eyre::Result<reqwest::Response>
    where
        T: Serialize + ?Sized,
    {
        let jwk = Jwk::try_from(&self.key)?;

        self.do_call(url, |nonce| {
            let protected = JwsProtectedHeader::new_jwk(jwk.clone(), url, nonce);
            jws::sign(&protected, &self.key, body)
        })
        .await
    }

    /// Signed call referring to the registered account.
    pub(crate) async fn call_kid<T>(&self, url: &str, body: &T) -> eyre::Result<reqwest::Response>
    where
        T: Serialize + ?Sized,
    {
        let kid = self.key.key_id()?;

        self.do_call(url, |nonce| {
            let protected = JwsProtectedHeader::new_kid(kid, url, nonce);
            jws::sign(&protected, &self.key, body)
        })
        .await
    }

    async fn do_call<F>(&self, url: &str, make_body: F) -> eyre::Result<reqwest::Response>
    where
        F: Fn(String) -> eyre::Result<String>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = self.try_call(url, &make_body).await?;

            let problem = match result {
                Ok(res) => return Ok(res),
                Err(problem) => problem,
            };

            if !problem.is_transient() || attempt >= self.retry.attempts {
                if attempt > 1 {
                    log::warn!("Giving up on {url} after {attempt} attempt(s): {problem}");
                }
                return Err(problem.into());
            }

            // a rejected nonce is replaced right away, everything else backs off
            if problem.is_bad_nonce() || problem.is_jws_verification_error() {
                log::debug!("Retrying {url} with a fresh nonce: {problem}");
            } else {
                let delay = self.retry.delay(attempt - 1);
                log::debug!("Retrying {url} in {delay:?}: {problem}");
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Outer error is local (signing); inner error is what the CA or network reported.
    async fn try_call<F>(
        &self,
        url: &str,
        make_body: &F,
    ) -> eyre::Result<ReqResult<reqwest::Response>>
    where
        F: Fn(String) -> eyre::Result<String>,
    {
        let nonce = match self.nonce_pool.get_nonce().await {
            Ok(nonce) => nonce,
            Err(problem) => return Ok(Err(problem)),
        };

        let body = make_body(nonce)?;

        log::debug!("Call endpoint: {url}");

        let res = match req_post(&self.http, url, body).await {
            Ok(res) => res,
            Err(problem) => return Ok(Err(problem)),
        };

        // error responses carry fresh nonces too
        self.nonce_pool.extract_nonce(&res);

        Ok(req_handle_error(res).await)
    }
}

/// Nonces handed out by the CA, consumed at most once.
#[derive(Debug)]
pub(crate) struct NoncePool {
    http: reqwest::Client,
    nonce_url: String,
    pool: Mutex<VecDeque<String>>,
}

impl NoncePool {
    fn new(http: reqwest::Client, nonce_url: &str) -> Self {
        NoncePool {
            http,
            nonce_url: nonce_url.to_owned(),
            pool: Mutex::new(VecDeque::new()),
        }
    }

    fn extract_nonce(&self, res: &reqwest::Response) {
        let Some(nonce) = res
            .headers()
            .get("replay-nonce")
            .and_then(|value| value.to_str().ok())
        else {
            return;
        };

        // https://datatracker.ietf.org/doc/html/rfc8555#section-6.5.1
        if !is_base64url(nonce) {
            log::debug!("Ignoring malformed nonce {nonce:?}");
            return;
        }

        log::trace!("Extracting new nonce");

        let mut pool = self.pool.lock();
        pool.push_back(nonce.to_owned());

        if pool.len() > 10 {
            pool.pop_front();
        }
    }

    async fn get_nonce(&self) -> ReqResult<String> {
        if let Some(nonce) = self.pool.lock().pop_front() {
            log::trace!("Use previous nonce");
            return Ok(nonce);
        }

        log::debug!("Request new nonce");
        let res = req_head(&self.http, &self.nonce_url).await?;
        let res = req_handle_error(res).await?;

        let nonce = req_expect_header(&res, "replay-nonce")?;

        if !is_base64url(&nonce) {
            return Err(Problem::new("badNonce", format!("malformed nonce {nonce:?}")));
        }

        Ok(nonce)
    }
}

fn is_base64url(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let retry = RetryPolicy {
            attempts: 5,
            backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };

        assert_eq!(retry.delay(0), Duration::from_millis(100));
        assert_eq!(retry.delay(1), Duration::from_millis(200));
        assert_eq!(retry.delay(2), Duration::from_millis(350));
        assert_eq!(retry.delay(30), Duration::from_millis(350));
    }

    #[test]
    fn nonce_alphabet() {
        assert!(is_base64url("8_uBBV3N2DBRJczhoiB46ugJKUkUHxGzVe6xIMpjHFM"));
        assert!(!is_base64url("not a nonce"));
        assert!(!is_base64url(""));
    }
}
