// Session cookies and where they live between runs.
//
// `TokenSet` is the cookie jar of the session: a flat name -> value map,
// the same shape the site's cookies have when they are saved and loaded
// again. Each token remembers the domain it was set for; the site's own
// tokens go to every site host, anything else only back to its domain. `CredentialStore` reads and writes it as JSON. Writes go to a
// temporary file in the same directory that is then renamed over the old
// one, so an interrupted write never leaves a truncated file behind.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::{HeaderMap, SET_COOKIE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::transport::Url;

/// One cookie value with its optional expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    /// Host or `Domain` the cookie was set for. `None` means the site.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// Opaque set of authentication cookies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSet {
    tokens: BTreeMap<String, Token>,
}

impl TokenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.tokens.get(name).map(|t| t.value.as_str())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.tokens.insert(
            name.into(),
            Token {
                value: value.into(),
                expires: None,
                domain: None,
            },
        );
    }

    pub fn insert_token(&mut self, name: impl Into<String>, token: Token) {
        self.tokens.insert(name.into(), token);
    }

    pub fn remove(&mut self, name: &str) -> Option<Token> {
        self.tokens.remove(name)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Token)> {
        self.tokens.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Drop every token whose expiry lies before `now`.
    pub fn clear_expired(&mut self, now: DateTime<Utc>) {
        self.tokens
            .retain(|_, token| token.expires.map_or(true, |expires| expires > now));
    }

    /// Take over every token of `other`, replacing same-named ones.
    pub fn merge(&mut self, other: TokenSet) {
        self.tokens.extend(other.tokens);
    }

    /// Value for the `Cookie` header of a request to `host`, `None` when
    /// there is nothing to send.
    ///
    /// Tokens without a domain, or with one under `site_hosts`, go to every
    /// site host. Other tokens only go to their own domain.
    pub fn cookie_header_for(&self, host: &str, site_hosts: &[String]) -> Option<String> {
        let host = host.to_ascii_lowercase();
        let on_site = |domain: &str| site_hosts.iter().any(|site| domain_matches(domain, site));
        let pairs: Vec<String> = self
            .tokens
            .iter()
            .filter(|(_, token)| match token.domain.as_deref() {
                None => on_site(&host),
                Some(domain) if on_site(domain) => on_site(&host),
                Some(domain) => domain_matches(&host, domain),
            })
            .map(|(name, token)| format!("{}={}", name, token.value))
            .collect();
        (!pairs.is_empty()).then(|| pairs.join("; "))
    }

    /// Apply the `Set-Cookie` headers of a response to a request for `url`.
    /// Returns whether any token was added, changed or removed.
    pub fn absorb(&mut self, headers: &HeaderMap, url: &Url, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        for value in headers.get_all(SET_COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            match parse_set_cookie(raw, now) {
                Some((_, Some(token))) if token.domain.as_deref().is_some_and(|d| !domain_matches(&host, d)) => {
                    debug!(%host, "ignoring cookie for another domain");
                }
                Some((name, Some(mut token))) => {
                    token.domain.get_or_insert_with(|| host.clone());
                    // A refreshed expiry alone is not worth a save.
                    let same = self
                        .tokens
                        .get(&name)
                        .is_some_and(|old| old.value == token.value && old.domain == token.domain);
                    if !same {
                        debug!(cookie = %name, "session cookie updated");
                        changed = true;
                    }
                    self.tokens.insert(name, token);
                }
                Some((name, None)) => {
                    if self.tokens.remove(&name).is_some() {
                        debug!(cookie = %name, "session cookie removed");
                        changed = true;
                    }
                }
                None => {}
            }
        }
        changed
    }
}

/// Find one cookie value among the `Set-Cookie` headers of a response.
pub fn set_cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|raw| parse_set_cookie(raw, Utc::now()))
        .find(|(cookie, _)| cookie == name)
        .and_then(|(_, token)| token.map(|t| t.value))
}

/// Whether `host` is `domain` or one of its subdomains.
fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain || host.strip_suffix(domain).is_some_and(|rest| rest.ends_with('.'))
}

/// Parse `name=value; Path=/; Domain=...; Expires=...; Max-Age=...`.
///
/// Returns the name and either the token to store or `None` when the
/// server asked for the cookie to be deleted.
fn parse_set_cookie(raw: &str, now: DateTime<Utc>) -> Option<(String, Option<Token>)> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim().trim_matches('"').to_string();

    let mut expires = None;
    let mut max_age = None;
    let mut domain = None;
    for attr in parts {
        let Some((key, val)) = attr.split_once('=') else { continue };
        let val = val.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "max-age" => max_age = val.parse::<i64>().ok().or(max_age),
            "expires" => expires = parse_cookie_date(val),
            "domain" if !val.is_empty() => domain = Some(val.trim_start_matches('.').to_ascii_lowercase()),
            _ => {}
        }
    }
    // Max-Age wins over Expires.
    if let Some(secs) = max_age {
        expires = Some(now + chrono::Duration::seconds(secs));
    }

    if value.is_empty() || expires.is_some_and(|at| at <= now) {
        return Some((name.to_string(), None));
    }
    Some((name.to_string(), Some(Token { value, expires, domain })))
}

fn parse_cookie_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }
    // Older servers still send the Netscape format: `Wed, 21-Oct-2015 07:28:00 GMT`.
    NaiveDateTime::parse_from_str(value, "%a, %d-%b-%Y %H:%M:%S GMT")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Loads and persists a `TokenSet`. Without a path nothing is stored.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    path: Option<PathBuf>,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CredentialStore {
            path: Some(path.into()),
        }
    }

    /// A store that keeps nothing, for tests and one-off runs.
    pub fn in_memory() -> Self {
        CredentialStore { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load the saved tokens. A missing file is an empty set.
    pub fn load(&self) -> Result<TokenSet> {
        let Some(path) = &self.path else {
            return Ok(TokenSet::new());
        };
        match fs::read_to_string(path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(TokenSet::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the tokens, readable by the owner only, replacing the previous
    /// file in one rename.
    pub fn persist(&self, tokens: &TokenSet) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let content = serde_json::to_string_pretty(tokens)?;
        let mut file = tempfile::NamedTempFile::new_in(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(content.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| e.error)?;
        debug!(path = %path.display(), tokens = tokens.len(), "session cookies saved");
        Ok(())
    }
}
