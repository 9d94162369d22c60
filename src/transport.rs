// Transport module: the only place that talks to `reqwest`.
//
// Requests are plain values (`WireRequest`) so the session can send the
// same request again after logging in, and so tests can swap the network
// for a scripted `Transport`. The reqwest client never follows redirects
// and never keeps cookies itself: both are the session's job, because each
// redirect hop has to be checked for a login wall and the cookies have to
// end up in the credential store.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{multipart, Client};
use reqwest::header::{HeaderMap, LOCATION};
use reqwest::redirect::Policy;
use serde::de::DeserializeOwned;
use tracing::debug;

pub use reqwest::{Method, Url};

use crate::error::{Error, Result};

const USER_AGENT: &str = concat!("amo-cli/", env!("CARGO_PKG_VERSION"));

/// Request payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    /// `application/x-www-form-urlencoded`; keys may repeat.
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
    Multipart(Vec<Part>),
}

/// One field of a multipart form. File contents are held in memory so the
/// request can be sent again after a re-login.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub name: String,
    pub content: PartContent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PartContent {
    Text(String),
    File {
        file_name: String,
        mime: String,
        bytes: Vec<u8>,
    },
}

impl Part {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Part {
            name: name.into(),
            content: PartContent::Text(value.into()),
        }
    }

    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Part {
            name: name.into(),
            content: PartContent::File {
                file_name: file_name.into(),
                mime: mime.into(),
                bytes,
            },
        }
    }

    /// Read a file from disk into a part, named after the file.
    pub fn from_path(name: impl Into<String>, path: &Path, mime: &str) -> Result<Self> {
        let bytes = fs::read(path)?;
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("upload")
            .to_string();
        Ok(Part::file(name, file_name, mime, bytes))
    }
}

/// A fully prepared request: cookies and query already applied.
#[derive(Debug, Clone, PartialEq)]
pub struct WireRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Body,
    /// `None` waits as long as the server takes.
    pub timeout: Option<Duration>,
}

impl WireRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A received response with the body read to the end.
#[derive(Debug, Clone)]
pub struct WireResponse {
    pub status: u16,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl WireResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::parse(&self.url, format!("invalid JSON: {e}")))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    /// Redirect target resolved against the request URL.
    pub fn location(&self) -> Option<Url> {
        let raw = self.headers.get(LOCATION)?.to_str().ok()?;
        self.url.join(raw).ok()
    }
}

/// Sends one request and returns the raw response, whatever its status.
pub trait Transport {
    fn execute(&self, request: &WireRequest) -> Result<WireResponse>;

    /// Like `execute`, but the body of a 2xx response is copied into `sink`
    /// and left out of the returned response.
    fn download(&self, request: &WireRequest, sink: &mut dyn Write) -> Result<WireResponse> {
        let mut res = self.execute(request)?;
        if (200..300).contains(&res.status) {
            sink.write_all(&res.body)?;
            res.body.clear();
        }
        Ok(res)
    }
}

/// Blocking reqwest client.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(Policy::none())
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| Error::network("client setup", e.to_string()))?;
        Ok(ReqwestTransport { client })
    }
}

impl ReqwestTransport {
    fn send(&self, request: &WireRequest) -> Result<reqwest::blocking::Response> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder = match &request.body {
            Body::Empty => builder,
            Body::Form(fields) => builder.form(fields),
            Body::Json(value) => builder.json(value),
            Body::Multipart(parts) => builder.multipart(multipart_form(parts, &request.url)?),
        };

        builder.send().map_err(|e| network_error(&request.url, e))
    }
}

impl Transport for ReqwestTransport {
    fn execute(&self, request: &WireRequest) -> Result<WireResponse> {
        let res = self.send(request)?;
        let status = res.status().as_u16();
        let url = res.url().clone();
        let headers = res.headers().clone();
        let body = res
            .bytes()
            .map_err(|e| network_error(&request.url, e))?
            .to_vec();
        Ok(WireResponse {
            status,
            url,
            headers,
            body,
        })
    }

    fn download(&self, request: &WireRequest, sink: &mut dyn Write) -> Result<WireResponse> {
        let mut res = self.send(request)?;
        let status = res.status().as_u16();
        let url = res.url().clone();
        let headers = res.headers().clone();
        let body = if res.status().is_success() {
            let bytes = io::copy(&mut res, sink).map_err(|e| Error::network(&request.url, e.to_string()))?;
            debug!(%url, bytes, "body streamed");
            Vec::new()
        } else {
            res.bytes().map_err(|e| network_error(&request.url, e))?.to_vec()
        };
        Ok(WireResponse {
            status,
            url,
            headers,
            body,
        })
    }
}

fn multipart_form(parts: &[Part], url: &Url) -> Result<multipart::Form> {
    let mut form = multipart::Form::new();
    for part in parts {
        form = match &part.content {
            PartContent::Text(value) => form.text(part.name.clone(), value.clone()),
            PartContent::File {
                file_name,
                mime,
                bytes,
            } => {
                let file = multipart::Part::bytes(bytes.clone())
                    .file_name(file_name.clone())
                    .mime_str(mime)
                    .map_err(|e| Error::InvalidArgument(format!("bad mime type for {url}: {e}")))?;
                form.part(part.name.clone(), file)
            }
        };
    }
    Ok(form)
}

fn network_error(url: &Url, err: reqwest::Error) -> Error {
    let message = if err.is_timeout() {
        "timed out".to_string()
    } else if err.is_connect() {
        format!("could not connect: {err}")
    } else {
        err.to_string()
    };
    Error::network(url, message)
}
