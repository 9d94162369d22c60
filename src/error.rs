// Error types shared by every module of the library.
//
// The variants mirror how failures are handled by callers: transport
// failures and HTTP errors surface to the user for a manual retry,
// `AuthExhausted` ends the process, `Parse` means the server sent a page we
// do not understand. Validation failures are not errors at all, see
// `upload::ValidationOutcome`.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure (timeout, connection reset, TLS, ...).
    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },

    /// The login retry ceiling was reached.
    #[error("giving up after {attempts} failed login attempts")]
    AuthExhausted { attempts: u32 },

    /// Unexpected status that is not a login wall.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The page did not have the shape the decoder expected.
    #[error("unexpected page at {url}: {reason}")]
    Parse { url: String, reason: String },

    /// Named versions that could not be found after exhausting all pages.
    #[error("could not find version(s): {}", join_names(.unresolved))]
    Resolution { unresolved: Vec<String> },

    /// One login handshake failed. Only the session retries these.
    #[error("login failed: {0}")]
    Auth(String),

    /// The server redirected with a flash message instead of the page.
    #[error("{0}")]
    ServerMessage(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn parse(url: impl fmt::Display, reason: impl Into<String>) -> Self {
        Error::Parse {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn network(url: impl fmt::Display, message: impl Into<String>) -> Self {
        Error::Network {
            url: url.to_string(),
            message: message.into(),
        }
    }

    /// Whether a batch operation must stop instead of recording the failure
    /// and moving on to the next item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::AuthExhausted { .. })
    }
}

/// A non-2xx/3xx response. Form endpoints answer 400 with a JSON object of
/// field errors (`{"__all__": ["..."], "upload": ["..."]}`), which is kept in
/// `fields` so callers can show something better than the raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    pub status: u16,
    pub url: String,
    pub body: String,
    pub fields: BTreeMap<String, Vec<String>>,
}

impl HttpError {
    pub fn new(status: u16, url: impl fmt::Display, body: impl Into<String>) -> Self {
        let body = body.into();
        let fields = parse_field_errors(&body);
        HttpError {
            status,
            url: url.to_string(),
            body,
            fields,
        }
    }

    /// Human readable form of the error payload.
    pub fn summary(&self) -> String {
        if let Some(all) = self.fields.get("__all__") {
            return all.join(" ");
        }
        if !self.fields.is_empty() {
            return self
                .fields
                .iter()
                .map(|(field, messages)| format!("{}: {}", field, messages.join(" ")))
                .collect::<Vec<_>>()
                .join("; ");
        }
        let text = self.body.trim();
        if text.len() > 200 {
            // Cut on a char boundary; bodies are often whole HTML pages.
            let end = (0..=200).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0);
            format!("{}...", &text[..end])
        } else {
            text.to_string()
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {} for {}: {}", self.status, self.url, self.summary())
    }
}

impl std::error::Error for HttpError {}

fn join_names(names: &[String]) -> String {
    names.join(", ")
}

fn parse_field_errors(body: &str) -> BTreeMap<String, Vec<String>> {
    let mut fields = BTreeMap::new();
    let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) else {
        return fields;
    };
    for (key, value) in map {
        let messages = match value {
            serde_json::Value::String(s) => vec![s],
            serde_json::Value::Array(items) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => continue,
        };
        fields.insert(key, messages);
    }
    fields
}
