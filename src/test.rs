#![allow(clippy::trivial_regex)]

use std::{
    collections::{HashMap, HashSet, VecDeque},
    convert::Infallible,
    future::ready,
    net::TcpListener,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, OnceLock,
    },
};

use actix_http::{HttpService, Method, Request, Response, StatusCode};
use actix_server::{Server, ServerHandle};
use actix_web::body::MessageBody;
use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use zeroize::Zeroizing;

use crate::{
    acme::{AcmeOrder, AcmeService},
    api,
    cert::CertificateInfo,
    input::{InputService, Unattended},
    plugins::PluginContext,
    settings::Settings,
};

static RE_URL: OnceLock<Regex> = OnceLock::new();

fn re_url() -> &'static Regex {
    RE_URL.get_or_init(|| regex::Regex::new("<URL>").unwrap())
}

const NONCE: &str = "8_uBBV3N2DBRJczhoiB46ugJKUkUHxGzVe6xIMpjHFM";

#[derive(Default)]
struct ServerState {
    reject_nonces: AtomicUsize,
    rejected_nonces: AtomicUsize,
    chain: OnceLock<String>,
}

pub struct TestServer {
    pub dir_url: String,
    state: Arc<ServerState>,
    handle: ServerHandle,
}

impl TestServer {
    /// The next `count` signed requests are answered with `badNonce`.
    pub fn reject_next_nonces(&self, count: usize) {
        self.state.reject_nonces.store(count, Ordering::SeqCst);
    }

    pub fn rejected_nonces(&self) -> usize {
        self.state.rejected_nonces.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        drop(self.handle.stop(false));
    }
}

fn get_directory(url: &str) -> Response<impl MessageBody> {
    const BODY: &str = r#"{
    "keyChange": "<URL>/acme/key-change",
    "newAccount": "<URL>/acme/new-acct",
    "newNonce": "<URL>/acme/new-nonce",
    "newOrder": "<URL>/acme/new-order",
    "revokeCert": "<URL>/acme/revoke-cert",
    "meta": {
        "caaIdentities": [
        "testdir.org"
        ]
    }
    }"#;

    Response::with_body(StatusCode::OK, re_url().replace_all(BODY, url).into_owned())
}

fn head_new_nonce() -> Response<impl MessageBody> {
    Response::build(StatusCode::NO_CONTENT)
        .insert_header(("Replay-Nonce", NONCE))
        .finish()
}

fn bad_nonce() -> Response<impl MessageBody> {
    const BODY: &str = r#"{
    "type": "urn:ietf:params:acme:error:badNonce",
    "detail": "JWS has an invalid anti-replay nonce",
    "status": 400
    }"#;

    Response::build(StatusCode::BAD_REQUEST)
        .insert_header(("Content-Type", "application/problem+json"))
        .insert_header(("Replay-Nonce", NONCE))
        .body(BODY)
}

fn post_new_acct(url: &str) -> Response<impl MessageBody> {
    const BODY: &str = r#"{
    "key": {
        "kty": "EC",
        "crv": "P-256",
        "x": "ttpobTRK2bw7ttGBESRO7Nb23mbIRfnRZwunL1W6wRI",
        "y": "h2Z00J37_2qRKH0-flrHEsH0xbit915Tyvd2v_CAOSk"
    },
    "contact": [
        "mailto:foo@bar.com"
    ],
    "status": "valid"
    }"#;

    let location = re_url()
        .replace_all("<URL>/acme/acct/7728515", url)
        .into_owned();

    Response::build(StatusCode::CREATED)
        .insert_header(("Location", location))
        .insert_header(("Replay-Nonce", NONCE))
        .body(BODY)
}

const ORDER: &str = r#"{
    "status": "<STATUS>",
    "expires": "2019-01-09T08:26:43.570360537Z",
    "identifiers": [
        {
        "type": "dns",
        "value": "acme-test.example.com"
        }
    ],
    "authorizations": [
        "<URL>/acme/authz/YTqpYUthlVfwBncUufE8IRWLMSRqcSs"
    ],
    "finalize": "<URL>/acme/finalize/7738992/18234324"<CERTIFICATE>
    }"#;

fn order_body(url: &str, status: &str) -> String {
    let certificate = if status == "valid" {
        r#",
    "certificate": "<URL>/acme/cert/fae41c070f967713109028""#
    } else {
        ""
    };

    let body = ORDER
        .replace("<STATUS>", status)
        .replace("<CERTIFICATE>", certificate);

    re_url().replace_all(&body, url).into_owned()
}

fn post_new_order(url: &str) -> Response<impl MessageBody> {
    let location = re_url()
        .replace_all("<URL>/acme/order/YTqpYUthlVfwBncUufE8", url)
        .into_owned();

    Response::build(StatusCode::CREATED)
        .insert_header(("Location", location))
        .insert_header(("Replay-Nonce", NONCE))
        .body(order_body(url, "pending"))
}

fn post_get_order(url: &str) -> Response<impl MessageBody> {
    Response::build(StatusCode::OK)
        .insert_header(("Replay-Nonce", NONCE))
        .body(order_body(url, "valid"))
}

fn post_authz(url: &str) -> Response<impl MessageBody> {
    const BODY: &str = r#"{
        "identifier": {
            "type": "dns",
            "value": "acme-test.example.com"
        },
        "status": "pending",
        "expires": "2019-01-09T08:26:43Z",
        "challenges": [
        {
            "type": "http-01",
            "status": "pending",
            "url": "<URL>/acme/challenge/YTqpYUthlVfwBncUufE8IRWLMSRqcSs/216789597",
            "token": "MUi-gqeOJdRkSb_YR2eaMxQBqf6al8dgt_dOttSWb0w"
        },
        {
            "type": "tls-alpn-01",
            "status": "pending",
            "url": "<URL>/acme/challenge/YTqpYUthlVfwBncUufE8IRWLMSRqcSs/216789598",
            "token": "WCdRWkCy4THTD_j5IH4ISAzr59lFIg5wzYmKxuOJ1lU"
        },
        {
            "type": "dns-01",
            "status": "pending",
            "url": "<URL>/acme/challenge/YTqpYUthlVfwBncUufE8IRWLMSRqcSs/216789599",
            "token": "RRo2ZcXAEqxKvMH8RGcATjSK1KknLEUmauwfQ5i3gG8"
        }
        ]
    }"#;

    Response::build(StatusCode::OK)
        .insert_header(("Replay-Nonce", NONCE))
        .body(re_url().replace_all(BODY, url).into_owned())
}

fn post_challenge(url: &str) -> Response<impl MessageBody> {
    const BODY: &str = r#"{
        "type": "http-01",
        "status": "processing",
        "url": "<URL>/acme/challenge/YTqpYUthlVfwBncUufE8IRWLMSRqcSs/216789597",
        "token": "MUi-gqeOJdRkSb_YR2eaMxQBqf6al8dgt_dOttSWb0w"
    }"#;

    Response::build(StatusCode::OK)
        .insert_header(("Replay-Nonce", NONCE))
        .body(re_url().replace_all(BODY, url).into_owned())
}

fn post_finalize(url: &str) -> Response<impl MessageBody> {
    Response::build(StatusCode::OK)
        .insert_header(("Replay-Nonce", NONCE))
        .body(order_body(url, "processing"))
}

fn post_certificate(state: &ServerState) -> Response<impl MessageBody> {
    let chain = state
        .chain
        .get_or_init(|| issue(&["acme-test.example.com".to_owned()]).0);

    Response::build(StatusCode::OK)
        .insert_header(("Content-Type", "application/pem-certificate-chain"))
        .insert_header(("Replay-Nonce", NONCE))
        .body(chain.clone())
}

fn route_request(req: Request, url: &str, state: &ServerState) -> Response<impl MessageBody> {
    if req.method() == Method::POST
        && req.path() != "/acme/new-acct"
        && state
            .reject_nonces
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    {
        state.rejected_nonces.fetch_add(1, Ordering::SeqCst);
        return bad_nonce().map_into_boxed_body();
    }

    match (req.method(), req.path()) {
        (&Method::GET, "/directory") => get_directory(url).map_into_boxed_body(),
        (&Method::HEAD, "/acme/new-nonce") => head_new_nonce().map_into_boxed_body(),
        (&Method::POST, "/acme/new-acct") => post_new_acct(url).map_into_boxed_body(),
        (&Method::POST, "/acme/new-order") => post_new_order(url).map_into_boxed_body(),

        (&Method::POST, "/acme/order/YTqpYUthlVfwBncUufE8") => {
            post_get_order(url).map_into_boxed_body()
        }

        (&Method::POST, "/acme/authz/YTqpYUthlVfwBncUufE8IRWLMSRqcSs") => {
            post_authz(url).map_into_boxed_body()
        }

        (&Method::POST, path) if path.starts_with("/acme/challenge/") => {
            post_challenge(url).map_into_boxed_body()
        }

        (&Method::POST, "/acme/finalize/7738992/18234324") => {
            post_finalize(url).map_into_boxed_body()
        }

        (&Method::POST, "/acme/cert/fae41c070f967713109028") => {
            post_certificate(state).map_into_boxed_body()
        }

        (_, _) => Response::build(StatusCode::NOT_FOUND)
            .finish()
            .map_into_boxed_body(),
    }
}

pub fn with_directory_server() -> TestServer {
    let lst = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = lst.local_addr().unwrap().port();

    let url = format!("http://127.0.0.1:{port}");
    let dir_url = format!("{url}/directory");

    let state = Arc::new(ServerState::default());
    let server_state = state.clone();

    let server = Server::build()
        .listen("acme", lst, move || {
            let url = url.clone();
            let state = server_state.clone();

            HttpService::build()
                .finish(move |req| ready(Ok::<_, Infallible>(route_request(req, &url, &state))))
                .tcp()
        })
        .unwrap()
        .workers(1)
        .run();

    let handle = server.handle();

    tokio::spawn(server);

    TestServer {
        dir_url,
        state,
        handle,
    }
}

/// Default settings with polling and backoff shortened to a millisecond.
pub fn settings_for_tests() -> Settings {
    let mut settings = Settings::default();
    settings.acme.retry_backoff_ms = 1;
    settings.acme.authorization_poll_interval_ms = 1;
    settings.acme.authorization_poll_attempts = 5;
    settings.acme.order_poll_interval_ms = 1;
    settings.acme.order_poll_attempts = 5;
    settings
}

pub fn plugin_context() -> PluginContext {
    PluginContext {
        settings: Arc::new(settings_for_tests()),
        input: Arc::new(Unattended),
        http: reqwest::Client::new(),
    }
}

/// Self-signed chain and PKCS#8 key for `names`, the first one being the common name.
fn issue(names: &[String]) -> (String, Zeroizing<String>) {
    let mut params = rcgen::CertificateParams::new(names.to_vec()).unwrap();
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, names[0].clone());

    let key = rcgen::KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();

    (cert.pem(), Zeroizing::new(key.serialize_pem()))
}

pub fn self_signed(names: &[&str]) -> CertificateInfo {
    let names = names.iter().map(|name| name.to_string()).collect::<Vec<_>>();
    let (chain, key) = issue(&names);
    CertificateInfo::parse(chain, Some(key)).unwrap()
}

/// Answers questions from a fixed script.
///
/// Choices are 1-based, like on the console. `confirm` falls back to its default once the script
/// runs out or on an empty answer.
pub struct ScriptedInput {
    answers: Mutex<VecDeque<String>>,
}

impl ScriptedInput {
    #[allow(clippy::new_ret_no_self)]
    pub fn new<I, S>(answers: I) -> Arc<dyn InputService>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(ScriptedInput {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
        })
    }

    fn next(&self, question: &str) -> eyre::Result<String> {
        self.answers
            .lock()
            .pop_front()
            .ok_or_else(|| eyre::eyre!("no scripted answer for {question:?}"))
    }
}

#[async_trait]
impl InputService for ScriptedInput {
    async fn choose(&self, question: &str, options: &[String]) -> eyre::Result<usize> {
        let answer = self.next(question)?;

        match answer.parse::<usize>() {
            Ok(choice) if (1..=options.len()).contains(&choice) => Ok(choice - 1),
            _ => Err(eyre::eyre!("{answer:?} is not a choice for {question:?}: {options:?}")),
        }
    }

    async fn request_string(&self, question: &str) -> eyre::Result<String> {
        self.next(question)
    }

    async fn confirm(&self, _question: &str, default: bool) -> eyre::Result<bool> {
        let answer = self.answers.lock().pop_front().unwrap_or_default();

        Ok(match answer.as_str() {
            "y" | "yes" => true,
            "n" | "no" => false,
            _ => default,
        })
    }

    async fn show(&self, label: &str, value: &str) {
        log::debug!("{label}: {value}");
    }

    async fn wait(&self, _message: &str) -> eyre::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct MockState {
    orders: HashMap<String, api::Order>,
    authorizations: HashMap<String, api::Authorization>,
    chains: HashMap<String, String>,
    rejected: HashSet<String>,
    prevalidated: HashSet<String>,
    fail_finalize: bool,
    created: usize,
    answered: usize,
    finalized: usize,
}

/// Scripted CA. Authorizations succeed unless their identifier was rejected.
#[derive(Default)]
pub struct MockAcme {
    state: Mutex<MockState>,
}

const MOCK_URL: &str = "https://ca.test/acme";

impl MockAcme {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validation of `identifier` will fail.
    pub fn reject(&self, identifier: &str) {
        self.state.lock().rejected.insert(identifier.to_owned());
    }

    /// Authorizations for `identifier` are valid from the start.
    pub fn prevalidate(&self, identifier: &str) {
        self.state.lock().prevalidated.insert(identifier.to_owned());
    }

    pub fn fail_finalize(&self) {
        self.state.lock().fail_finalize = true;
    }

    pub fn created(&self) -> usize {
        self.state.lock().created
    }

    pub fn answered(&self) -> usize {
        self.state.lock().answered
    }

    pub fn finalized(&self) -> usize {
        self.state.lock().finalized
    }

    fn challenge(url: &str, kind: api::ChallengeType, token: &str) -> api::Challenge {
        api::Challenge {
            _type: kind.as_str().to_owned(),
            url: url.to_owned(),
            status: api::ChallengeStatus::Pending,
            validated: None,
            error: None,
            token: token.to_owned(),
        }
    }
}

#[async_trait]
impl AcmeService for MockAcme {
    async fn create_order(&self, identifiers: &[String]) -> eyre::Result<AcmeOrder> {
        let mut state = self.state.lock();
        state.created += 1;
        let n = state.created;

        let mut authorizations = Vec::new();

        for identifier in identifiers {
            let url = format!("{MOCK_URL}/authz/{n}/{identifier}");
            let token = format!("token-{}", identifier.replace('*', "star"));
            let wildcard = identifier.starts_with("*.");

            let mut challenges = vec![Self::challenge(
                &format!("{url}/dns"),
                api::ChallengeType::Dns01,
                &token,
            )];
            if !wildcard {
                challenges.push(Self::challenge(
                    &format!("{url}/http"),
                    api::ChallengeType::Http01,
                    &token,
                ));
            }

            let status = if state.prevalidated.contains(identifier) {
                api::AuthorizationStatus::Valid
            } else {
                api::AuthorizationStatus::Pending
            };

            state.authorizations.insert(
                url.clone(),
                api::Authorization {
                    identifier: api::Identifier::dns(identifier.trim_start_matches("*.")),
                    status,
                    expires: None,
                    challenges,
                    wildcard: wildcard.then_some(true),
                },
            );
            authorizations.push(url);
        }

        let url = format!("{MOCK_URL}/order/{n}");
        let details = api::Order {
            status: Some(api::OrderStatus::Pending),
            identifiers: identifiers.iter().map(|id| api::Identifier::dns(id)).collect(),
            authorizations: Some(authorizations),
            finalize: format!("{url}/finalize"),
            ..Default::default()
        };

        state.orders.insert(url.clone(), details.clone());

        Ok(AcmeOrder { url, details })
    }

    async fn authorization(&self, url: &str) -> eyre::Result<api::Authorization> {
        self.state
            .lock()
            .authorizations
            .get(url)
            .cloned()
            .ok_or_else(|| eyre::eyre!("unknown authorization {url}"))
    }

    async fn answer_challenge(&self, challenge: &api::Challenge) -> eyre::Result<api::Challenge> {
        let mut state = self.state.lock();
        state.answered += 1;

        let MockState {
            authorizations,
            rejected,
            ..
        } = &mut *state;

        let authorization = authorizations
            .values_mut()
            .find(|auth| auth.challenges.iter().any(|c| c.url == challenge.url))
            .ok_or_else(|| eyre::eyre!("unknown challenge {}", challenge.url))?;

        let is_rejected = rejected.contains(&authorization.requested_identifier());

        let attempted = authorization
            .challenges
            .iter_mut()
            .find(|c| c.url == challenge.url)
            .ok_or_else(|| eyre::eyre!("unknown challenge {}", challenge.url))?;

        if is_rejected {
            attempted.status = api::ChallengeStatus::Invalid;
            attempted.error = Some(api::Problem::new(
                "urn:ietf:params:acme:error:unauthorized",
                "no TXT record found",
            ));
            authorization.status = api::AuthorizationStatus::Invalid;
        } else {
            attempted.status = api::ChallengeStatus::Valid;
            authorization.status = api::AuthorizationStatus::Valid;
        }

        let mut answered = attempted.clone();
        answered.status = api::ChallengeStatus::Processing;
        answered.error = None;

        Ok(answered)
    }

    fn key_authorization(&self, token: &str) -> eyre::Result<String> {
        Ok(format!("{token}.thumbprint"))
    }

    async fn finalize(&self, order: &AcmeOrder, csr_der: &[u8]) -> eyre::Result<api::Order> {
        let mut state = self.state.lock();
        state.finalized += 1;

        if state.fail_finalize {
            return Err(api::Problem::new(
                "urn:ietf:params:acme:error:badCSR",
                "key is too weak",
            )
            .into());
        }

        eyre::ensure!(!csr_der.is_empty(), "empty csr");

        let names = order
            .details
            .domains()
            .into_iter()
            .map(str::to_owned)
            .collect::<Vec<_>>();
        let (chain, _) = issue(&names);

        let cert_url = format!("{}/cert", order.url);
        state.chains.insert(cert_url.clone(), chain);

        let details = state
            .orders
            .get_mut(&order.url)
            .ok_or_else(|| eyre::eyre!("unknown order {}", order.url))?;
        details.status = Some(api::OrderStatus::Valid);
        details.certificate = Some(cert_url);

        let mut processing = details.clone();
        processing.status = Some(api::OrderStatus::Processing);
        processing.certificate = None;

        Ok(processing)
    }

    async fn refresh_order(&self, url: &str) -> eyre::Result<api::Order> {
        self.state
            .lock()
            .orders
            .get(url)
            .cloned()
            .ok_or_else(|| eyre::eyre!("unknown order {url}"))
    }

    async fn download_certificate(&self, url: &str) -> eyre::Result<String> {
        self.state
            .lock()
            .chains
            .get(url)
            .cloned()
            .ok_or_else(|| eyre::eyre!("unknown certificate {url}"))
    }
}

#[tokio::test]
pub async fn test_make_directory() {
    let server = with_directory_server();
    let res = reqwest::get(&server.dir_url).await.unwrap();
    assert!(res.status().is_success());
}
