// Authentication handshakes.
//
// A flow runs one complete login against the site and hands back the
// cookies it ended up with. Flows talk to the transport directly, not to
// the session: the session is what calls them when it hits a login wall,
// and a flow that went through the session would find the wall again.
// Anything that needs a human goes through the injected `LoginPrompter`,
// which may be a terminal, a GUI or a test script.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use tracing::{debug, info};

use crate::config::SiteConfig;
use crate::credentials::TokenSet;
use crate::decode::{FxaConfig, LoginForm};
use crate::error::{Error, HttpError, Result};
use crate::paginate::Page;
use crate::transport::{Body, Method, Transport, Url, WireRequest, WireResponse};

/// What the prompter is asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginMode {
    Password,
    /// The account was blocked and a code was mailed to the user.
    UnblockCode,
    /// The user has to sign in at `url` in a browser and paste back the
    /// code, or the whole URL they were redirected to.
    AuthorizationCode { url: String },
}

/// What the prompter answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Password { username: String, password: String },
    UnblockCode(String),
    AuthorizationCode(String),
}

/// Asks whoever is at the other end for credentials.
pub trait LoginPrompter {
    fn prompt(&self, mode: &LoginMode) -> Result<Credentials>;
}

/// One login handshake. Returning `Error::Auth` means the attempt failed
/// and may be retried; any other error ends the login.
pub trait AuthFlow {
    fn authenticate(&self, transport: &dyn Transport, prompter: &dyn LoginPrompter) -> Result<TokenSet>;
}

/// Cookie bookkeeping for the requests of a single handshake.
struct Handshake<'a> {
    transport: &'a dyn Transport,
    tokens: TokenSet,
    timeout: Duration,
}

const MAX_LOGIN_REDIRECTS: usize = 10;

impl<'a> Handshake<'a> {
    fn new(transport: &'a dyn Transport, timeout: Duration) -> Self {
        Handshake {
            transport,
            tokens: TokenSet::new(),
            timeout,
        }
    }

    fn send(&mut self, method: Method, url: Url, mut headers: Vec<(String, String)>, body: Body) -> Result<WireResponse> {
        // Every token here was set during this handshake and carries its domain.
        if let Some(cookie) = self.tokens.cookie_header_for(url.host_str().unwrap_or_default(), &[]) {
            headers.push(("Cookie".into(), cookie));
        }
        debug!(%method, %url, "login request");
        let request = WireRequest {
            method,
            url,
            headers,
            body,
            timeout: Some(self.timeout),
        };
        let res = self.transport.execute(&request)?;
        self.tokens.absorb(&res.headers, &request.url, Utc::now());
        Ok(res)
    }

    /// GET a page, following redirects.
    fn page(&mut self, mut url: Url) -> Result<Page> {
        for _ in 0..=MAX_LOGIN_REDIRECTS {
            let res = self.send(Method::GET, url.clone(), Vec::new(), Body::Empty)?;
            if res.status >= 400 {
                return Err(HttpError::new(res.status, &res.url, res.text()).into());
            }
            match res.location() {
                Some(next) if res.is_redirect() => url = next,
                _ => return Ok(Page::from_response(&res)),
            }
        }
        Err(Error::network(url, "too many redirects"))
    }

    fn into_tokens(self) -> TokenSet {
        self.tokens
    }
}

/// Username and password posted to the site's own login form, with the
/// unblock code round trip when the account is blocked.
pub struct PasswordFormFlow {
    login_url: String,
    timeout: Duration,
}

impl PasswordFormFlow {
    pub fn new(site: &SiteConfig, timeout: Duration) -> Self {
        PasswordFormFlow {
            login_url: site.login_url(),
            timeout,
        }
    }

    fn accepted(&self, res: &WireResponse) -> Result<bool> {
        if res.status >= 400 {
            return Err(Error::Auth(format!("login form rejected with HTTP {}", res.status)));
        }
        Ok(res.is_redirect()
            && res
                .location()
                .map_or(false, |to| !to.as_str().starts_with(&self.login_url)))
    }
}

impl AuthFlow for PasswordFormFlow {
    fn authenticate(&self, transport: &dyn Transport, prompter: &dyn LoginPrompter) -> Result<TokenSet> {
        let login_url = Url::parse(&self.login_url)
            .map_err(|e| Error::Config(format!("invalid login url {}: {e}", self.login_url)))?;
        let mut handshake = Handshake::new(transport, self.timeout);
        let page = handshake.page(login_url)?;
        let form = LoginForm::decode(&page)?;

        let (username, password) = match prompter.prompt(&LoginMode::Password)? {
            Credentials::Password { username, password } => (username, password),
            _ => return Err(Error::Auth("expected a username and password".into())),
        };

        let target = form.target(&page)?;
        let referer = vec![("Referer".to_string(), page.url.to_string())];
        let mut fields = vec![("username".to_string(), username), ("password".to_string(), password)];
        if let Some(token) = &form.token {
            fields.insert(0, ("csrfmiddlewaretoken".into(), token.clone()));
        }

        let res = handshake.send(Method::POST, target.clone(), referer.clone(), Body::Form(fields.clone()))?;
        if self.accepted(&res)? {
            info!("logged in with password");
            return Ok(handshake.into_tokens());
        }

        let retry_page = Page::from_response(&res);
        let retry = LoginForm::decode(&retry_page)?;
        if retry.wants_unblock_code {
            let code = match prompter.prompt(&LoginMode::UnblockCode)? {
                Credentials::UnblockCode(code) => code,
                _ => return Err(Error::Auth("expected an unblock code".into())),
            };
            if let Some(token) = retry.token {
                fields.retain(|(name, _)| name != "csrfmiddlewaretoken");
                fields.insert(0, ("csrfmiddlewaretoken".into(), token));
            }
            fields.push(("unblock_code".into(), code.trim().to_string()));

            let res = handshake.send(Method::POST, target, referer, Body::Form(fields))?;
            if self.accepted(&res)? {
                info!("logged in with password and unblock code");
                return Ok(handshake.into_tokens());
            }
        }

        Err(Error::Auth("incorrect username or password".into()))
    }
}

/// Browser sign-in with the accounts service. The user authorizes in a
/// browser and pastes the code back; the code is then exchanged on the
/// site's accounts endpoint, which answers with the session cookie.
pub struct OAuthCodeFlow {
    login_url: String,
    api_base: String,
    locale: String,
    timeout: Duration,
}

impl OAuthCodeFlow {
    pub fn new(site: &SiteConfig, timeout: Duration) -> Self {
        OAuthCodeFlow {
            login_url: site.login_url(),
            api_base: site.api_base(),
            locale: site.locale.clone(),
            timeout,
        }
    }

    /// The state the site expects back: the accounts state, then the
    /// page to land on afterwards, base64 encoded.
    fn state(&self, fxa: &FxaConfig) -> String {
        let landing = format!("/{}/firefox/", self.locale);
        format!("{}:{}", fxa.state, STANDARD.encode(landing))
    }
}

impl AuthFlow for OAuthCodeFlow {
    fn authenticate(&self, transport: &dyn Transport, prompter: &dyn LoginPrompter) -> Result<TokenSet> {
        let login_url = Url::parse(&self.login_url)
            .map_err(|e| Error::Config(format!("invalid login url {}: {e}", self.login_url)))?;
        let mut handshake = Handshake::new(transport, self.timeout);
        let page = handshake.page(login_url)?;
        let fxa = FxaConfig::decode(&page)?;

        let mode = LoginMode::AuthorizationCode {
            url: fxa.authorization_url()?.to_string(),
        };
        let code = match prompter.prompt(&mode)? {
            Credentials::AuthorizationCode(input) => extract_code(&input)
                .ok_or_else(|| Error::Auth("no authorization code in the answer".into()))?,
            _ => return Err(Error::Auth("expected an authorization code".into())),
        };

        let endpoint = format!("{}/accounts/authenticate/", self.api_base);
        let url = Url::parse_with_params(
            &endpoint,
            &[
                ("state", self.state(&fxa)),
                ("action", "signin".to_string()),
                ("code", code),
            ],
        )
        .map_err(|e| Error::Config(format!("invalid api url {endpoint}: {e}")))?;

        let res = handshake.send(Method::GET, url, Vec::new(), Body::Empty)?;
        if res.status == 302 {
            info!("logged in through the accounts service");
            Ok(handshake.into_tokens())
        } else {
            Err(Error::Auth(format!("authorization code rejected (HTTP {})", res.status)))
        }
    }
}

/// Pull the code out of what the user pasted: either the bare code or the
/// URL the browser was redirected to.
pub fn extract_code(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    match Url::parse(input) {
        Ok(url) => url
            .query_pairs()
            .find(|(key, _)| key == "code")
            .map(|(_, value)| value.into_owned())
            .filter(|code| !code.is_empty()),
        Err(_) if !input.contains(char::is_whitespace) => Some(input.to_string()),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, LOCATION, SET_COOKIE};
    use std::cell::RefCell;

    struct Script {
        responses: RefCell<Vec<WireResponse>>,
        seen: RefCell<Vec<WireRequest>>,
    }

    impl Script {
        fn new(mut responses: Vec<WireResponse>) -> Self {
            responses.reverse();
            Script {
                responses: RefCell::new(responses),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl Transport for Script {
        fn execute(&self, request: &WireRequest) -> Result<WireResponse> {
            self.seen.borrow_mut().push(request.clone());
            let mut res = self
                .responses
                .borrow_mut()
                .pop()
                .ok_or_else(|| Error::network(&request.url, "script exhausted"))?;
            res.url = request.url.clone();
            Ok(res)
        }
    }

    struct Answers(RefCell<Vec<Credentials>>);

    impl LoginPrompter for Answers {
        fn prompt(&self, _mode: &LoginMode) -> Result<Credentials> {
            self.0
                .borrow_mut()
                .pop()
                .ok_or_else(|| Error::Auth("no more answers".into()))
        }
    }

    fn res(status: u16, body: &str, location: Option<&str>, cookie: Option<&str>) -> WireResponse {
        let mut headers = HeaderMap::new();
        if let Some(location) = location {
            headers.insert(LOCATION, HeaderValue::from_str(location).unwrap());
        }
        if let Some(cookie) = cookie {
            headers.insert(SET_COOKIE, HeaderValue::from_str(cookie).unwrap());
        }
        WireResponse {
            status,
            url: Url::parse("https://placeholder.invalid/").unwrap(),
            headers,
            body: body.as_bytes().to_vec(),
        }
    }

    const FORM: &str = r#"<form action="/en-US/firefox/users/login" method="post">
        <input name="csrfmiddlewaretoken" value="abc"></form>"#;

    #[test]
    fn test_password_flow_posts_form_and_keeps_cookies() {
        let transport = Script::new(vec![
            res(200, FORM, None, Some("csrftoken=c1; Path=/")),
            res(302, "", Some("/en-US/firefox/"), Some("sessionid=s1; Path=/")),
        ]);
        let prompter = Answers(RefCell::new(vec![Credentials::Password {
            username: "me".into(),
            password: "pw".into(),
        }]));
        let flow = PasswordFormFlow::new(&SiteConfig::default(), Duration::from_secs(5));

        let tokens = flow.authenticate(&transport, &prompter).unwrap();
        assert_eq!(tokens.get("sessionid"), Some("s1"));
        assert_eq!(tokens.get("csrftoken"), Some("c1"));

        let seen = transport.seen.borrow();
        assert_eq!(seen[1].method, Method::POST);
        assert_eq!(seen[1].header("cookie"), Some("csrftoken=c1"));
        match &seen[1].body {
            Body::Form(fields) => {
                assert_eq!(fields[0], ("csrfmiddlewaretoken".into(), "abc".into()));
                assert!(fields.contains(&("username".into(), "me".into())));
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn test_password_flow_asks_for_unblock_code() {
        let transport = Script::new(vec![
            res(200, FORM, None, None),
            res(200, r#"<form><input name="unblock_code"></form>"#, None, None),
            res(302, "", Some("/en-US/firefox/"), Some("sessionid=s2")),
        ]);
        // Answers are popped from the back.
        let prompter = Answers(RefCell::new(vec![
            Credentials::UnblockCode(" 1234 ".into()),
            Credentials::Password {
                username: "me".into(),
                password: "pw".into(),
            },
        ]));
        let flow = PasswordFormFlow::new(&SiteConfig::default(), Duration::from_secs(5));

        let tokens = flow.authenticate(&transport, &prompter).unwrap();
        assert_eq!(tokens.get("sessionid"), Some("s2"));
        let seen = transport.seen.borrow();
        match &seen[2].body {
            Body::Form(fields) => assert!(fields.contains(&("unblock_code".into(), "1234".into()))),
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn test_password_flow_rejected_is_auth_error() {
        let login = "https://addons.mozilla.org/en-US/firefox/users/login";
        let transport = Script::new(vec![res(200, FORM, None, None), res(302, "", Some(login), None)]);
        let prompter = Answers(RefCell::new(vec![Credentials::Password {
            username: "me".into(),
            password: "wrong".into(),
        }]));
        let flow = PasswordFormFlow::new(&SiteConfig::default(), Duration::from_secs(5));
        assert!(matches!(flow.authenticate(&transport, &prompter), Err(Error::Auth(_))));
    }

    #[test]
    fn test_oauth_flow_exchanges_code() {
        let page = r#"<body data-fxa-config='{"oauthHost": "https://oauth.example/v1", "clientId": "c", "scope": "profile", "state": "st"}'></body>"#;
        let transport = Script::new(vec![
            res(200, page, None, None),
            res(302, "", Some("/en-US/firefox/"), Some("sessionid=s3")),
        ]);
        let prompter = Answers(RefCell::new(vec![Credentials::AuthorizationCode(
            "https://addons.mozilla.org/api/v3/accounts/authenticate/?code=xyz&state=st".into(),
        )]));
        let flow = OAuthCodeFlow::new(&SiteConfig::default(), Duration::from_secs(5));

        let tokens = flow.authenticate(&transport, &prompter).unwrap();
        assert_eq!(tokens.get("sessionid"), Some("s3"));

        let seen = transport.seen.borrow();
        let exchange = &seen[1].url;
        assert!(exchange
            .as_str()
            .starts_with("https://addons.mozilla.org/api/v3/accounts/authenticate/?"));
        let pairs: Vec<(String, String)> = exchange.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("state".into(), "st:L2VuLVVTL2ZpcmVmb3gv".into())));
        assert!(pairs.contains(&("code".into(), "xyz".into())));
    }

    #[test]
    fn test_extract_code() {
        assert_eq!(extract_code("  abc123 ").as_deref(), Some("abc123"));
        assert_eq!(extract_code("https://x.example/cb?state=1&code=q").as_deref(), Some("q"));
        assert_eq!(extract_code("https://x.example/cb?state=1"), None);
        assert_eq!(extract_code("two words"), None);
        assert_eq!(extract_code(""), None);
    }
}
