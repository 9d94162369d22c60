// Session manager: every request to the site goes through here.
//
// The session attaches the stored cookies, follows redirects hop by hop,
// and checks each hop for a login wall. On a wall it runs the auth flow
// and sends the original request again, at most `max_login_attempts`
// times over the life of the session. Nothing else in the crate knows
// that logins exist. Whenever a response changes the cookies they are
// written to the credential store right away.
//
// All methods take `&mut self`, so a session can only run one request,
// and one login sequence, at a time.

use std::io::Write;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::auth::{AuthFlow, LoginPrompter};
use crate::config::SessionConfig;
use crate::credentials::{CredentialStore, TokenSet};
use crate::error::{Error, HttpError, Result};
use crate::transport::{Body, Method, Part, Transport, Url, WireRequest, WireResponse};

/// Request timeout chosen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    After(Duration),
    /// Wait as long as the server takes (uploads).
    Unbounded,
}

/// Per-request options. Redirects are followed unless `no_redirects` is set.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Body,
    timeout: Option<Timeout>,
    follow_redirects: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        RequestOptions {
            query: Vec::new(),
            headers: Vec::new(),
            body: Body::Empty,
            timeout: None,
            follow_redirects: true,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn form<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.body = Body::Form(fields.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = Body::Json(value);
        self
    }

    pub fn multipart(mut self, parts: Vec<Part>) -> Self {
        self.body = Body::Multipart(parts);
        self
    }

    pub fn timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Return 3xx responses to the caller instead of following them.
    pub fn no_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }
}

enum Hop {
    Done(WireResponse),
    LoginWall(Url),
}

pub struct Session {
    transport: Box<dyn Transport>,
    auth: Box<dyn AuthFlow>,
    prompter: Box<dyn LoginPrompter>,
    store: CredentialStore,
    tokens: TokenSet,
    config: SessionConfig,
    login_failures: u32,
}

impl Session {
    /// Create a session, starting from the tokens in `store`.
    pub fn new(
        config: SessionConfig,
        transport: Box<dyn Transport>,
        auth: Box<dyn AuthFlow>,
        prompter: Box<dyn LoginPrompter>,
        store: CredentialStore,
    ) -> Result<Self> {
        let tokens = store.load()?;
        debug!(count = tokens.len(), "loaded session tokens");
        Ok(Session {
            transport,
            auth,
            prompter,
            store,
            tokens,
            config,
            login_failures: 0,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn tokens(&self) -> &TokenSet {
        &self.tokens
    }

    pub fn token(&self, name: &str) -> Option<&str> {
        self.tokens.get(name)
    }

    /// Login attempts made so far; never decreases.
    pub fn login_failures(&self) -> u32 {
        self.login_failures
    }

    /// Write the current tokens to the credential store.
    pub fn persist(&self) -> Result<()> {
        self.store.persist(&self.tokens)
    }

    pub fn get(&mut self, url: &Url, options: RequestOptions) -> Result<WireResponse> {
        self.request(Method::GET, url, options)
    }

    pub fn post(&mut self, url: &Url, options: RequestOptions) -> Result<WireResponse> {
        self.request(Method::POST, url, options)
    }

    /// Send a request, logging in again whenever the site asks for it.
    ///
    /// Fails with `Error::Http` for 4xx/5xx, `Error::Network` when the
    /// transport fails and `Error::AuthExhausted` once no login attempts
    /// are left.
    pub fn request(&mut self, method: Method, url: &Url, options: RequestOptions) -> Result<WireResponse> {
        self.request_into(method, url, options, None)
    }

    /// GET `url` and copy the body of the final response into `sink` as it
    /// arrives. The returned response carries no body.
    pub fn download(&mut self, url: &Url, options: RequestOptions, sink: &mut dyn Write) -> Result<WireResponse> {
        self.request_into(Method::GET, url, options, Some(sink))
    }

    fn request_into(
        &mut self,
        method: Method,
        url: &Url,
        options: RequestOptions,
        mut sink: Option<&mut (dyn Write + '_)>,
    ) -> Result<WireResponse> {
        let mut url = url.clone();
        if !options.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&options.query);
        }
        let timeout = match options.timeout {
            Some(Timeout::After(duration)) => Some(duration),
            Some(Timeout::Unbounded) => None,
            None => Some(self.config.timeout_for(url.as_str())),
        };

        loop {
            match self.send(method.clone(), url.clone(), &options, timeout, sink.as_deref_mut())? {
                Hop::Done(res) => return Ok(res),
                Hop::LoginWall(at) => {
                    info!(%url, wall = %at, "not logged in");
                    self.reauthenticate()?;
                }
            }
        }
    }

    fn send(
        &mut self,
        mut method: Method,
        mut url: Url,
        options: &RequestOptions,
        timeout: Option<Duration>,
        mut sink: Option<&mut (dyn Write + '_)>,
    ) -> Result<Hop> {
        let mut body = options.body.clone();
        for hop in 0..=self.config.max_redirects {
            let mut headers = options.headers.clone();
            let host = url.host_str().unwrap_or_default();
            if let Some(cookie) = self.tokens.cookie_header_for(host, &self.config.cookie_hosts) {
                headers.push(("Cookie".into(), cookie));
            }
            debug!(%method, %url, hop, "request");
            let request = WireRequest {
                method: method.clone(),
                url: url.clone(),
                headers,
                body: body.clone(),
                timeout,
            };
            let res = match sink.as_deref_mut() {
                Some(sink) => self.transport.download(&request, sink)?,
                None => self.transport.execute(&request)?,
            };
            if self.tokens.absorb(&res.headers, &url, Utc::now()) {
                self.save_tokens();
            }
            debug!(status = res.status, "response");

            if res.status >= 400 {
                return Err(HttpError::new(res.status, &res.url, res.text()).into());
            }

            let target = if res.is_redirect() {
                res.location()
            } else {
                Some(res.url.clone())
            };
            if let Some(target) = &target {
                if self.is_login_wall(target) {
                    return Ok(Hop::LoginWall(target.clone()));
                }
            }

            let next = match target {
                Some(next) if res.is_redirect() && options.follow_redirects => next,
                _ => return Ok(Hop::Done(res)),
            };
            if matches!(res.status, 301..=303) && method != Method::HEAD {
                method = Method::GET;
                body = Body::Empty;
            }
            url = next;
        }
        Err(Error::network(url, "too many redirects"))
    }

    /// Save the tokens as soon as they change, so an interrupted run keeps
    /// what it was given. A failed save is only logged.
    fn save_tokens(&self) {
        if let Err(e) = self.persist() {
            warn!("could not save session cookies: {e}");
        }
    }

    fn is_login_wall(&self, target: &Url) -> bool {
        let target = target.as_str();
        target.starts_with(&self.config.login_url) || target.contains(&self.config.oauth_fragment)
    }

    fn reauthenticate(&mut self) -> Result<()> {
        loop {
            if self.login_failures >= self.config.max_login_attempts {
                return Err(Error::AuthExhausted {
                    attempts: self.login_failures,
                });
            }
            self.login_failures += 1;
            self.tokens.clear_expired(Utc::now());
            info!(attempt = self.login_failures, "logging in");

            match self.auth.authenticate(self.transport.as_ref(), self.prompter.as_ref()) {
                Ok(fresh) => {
                    self.tokens.merge(fresh);
                    self.save_tokens();
                    return Ok(());
                }
                Err(Error::Auth(reason)) => {
                    warn!(attempt = self.login_failures, "login failed: {reason}");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
