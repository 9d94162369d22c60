// Scripted network and login for integration tests.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use amo_cli::auth::{AuthFlow, Credentials, LoginMode, LoginPrompter};
use amo_cli::config::SessionConfig;
use amo_cli::credentials::{CredentialStore, TokenSet};
use amo_cli::session::Session;
use amo_cli::transport::{Transport, Url, WireRequest, WireResponse};
use amo_cli::upload::{Sleeper, ValidationJob};
use amo_cli::{Error, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION};

pub type RequestLog = Rc<RefCell<Vec<WireRequest>>>;

/// Answers every request with a closure and keeps what was sent.
pub struct FnTransport {
    pub log: RequestLog,
    respond: Box<dyn Fn(&WireRequest) -> WireResponse>,
}

impl FnTransport {
    pub fn new(respond: impl Fn(&WireRequest) -> WireResponse + 'static) -> (Self, RequestLog) {
        let log = RequestLog::default();
        let transport = FnTransport {
            log: log.clone(),
            respond: Box::new(respond),
        };
        (transport, log)
    }
}

impl Transport for FnTransport {
    fn execute(&self, request: &WireRequest) -> Result<WireResponse> {
        self.log.borrow_mut().push(request.clone());
        Ok((self.respond)(request))
    }
}

pub fn response(request: &WireRequest, status: u16, body: &str) -> WireResponse {
    WireResponse {
        status,
        url: request.url.clone(),
        headers: HeaderMap::new(),
        body: body.as_bytes().to_vec(),
    }
}

pub fn with_header(mut res: WireResponse, name: &'static str, value: &str) -> WireResponse {
    res.headers.append(
        HeaderName::from_static(name),
        HeaderValue::from_str(value).unwrap(),
    );
    res
}

pub fn redirect(request: &WireRequest, status: u16, location: &str) -> WireResponse {
    let mut res = response(request, status, "");
    res.headers.insert(LOCATION, HeaderValue::from_str(location).unwrap());
    res
}

/// Where the session is sent when it is not logged in.
pub fn login_url() -> String {
    SessionConfig::default().login_url
}

pub fn query_value(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Login flow that always succeeds and counts its runs.
pub struct CountingAuth(pub Rc<Cell<u32>>);

impl AuthFlow for CountingAuth {
    fn authenticate(&self, _: &dyn Transport, _: &dyn LoginPrompter) -> Result<TokenSet> {
        self.0.set(self.0.get() + 1);
        let mut tokens = TokenSet::new();
        tokens.insert("sessionid", format!("session-{}", self.0.get()));
        Ok(tokens)
    }
}

/// A prompter for tests that must never ask anything.
pub struct NoPrompt;

impl LoginPrompter for NoPrompt {
    fn prompt(&self, _: &LoginMode) -> Result<Credentials> {
        Err(Error::Auth("unexpected prompt".into()))
    }
}

/// Records the waits instead of sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    pub waits: Vec<Duration>,
}

impl Sleeper for RecordingSleeper {
    fn sleep(&mut self, duration: Duration, _: &ValidationJob) {
        self.waits.push(duration);
    }
}

/// A session over `transport` with default settings and no cookie file.
/// Returns the number of logins run so far.
pub fn session(transport: FnTransport) -> (Session, Rc<Cell<u32>>) {
    let logins = Rc::new(Cell::new(0));
    let session = Session::new(
        SessionConfig::default(),
        Box::new(transport),
        Box::new(CountingAuth(logins.clone())),
        Box::new(NoPrompt),
        CredentialStore::in_memory(),
    )
    .unwrap();
    (session, logins)
}
