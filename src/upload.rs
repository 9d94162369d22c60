// Uploading a new version: send the xpi, wait for the validator, then
// attach the validated upload to a version of the add-on.
//
// Validation is a small state machine. After the upload the job is
// `Uploaded`; polling moves it to `Pending` until the job reports either a
// failure or a finished report. There is no overall time limit, the job
// always ends up in one of the two terminal states.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use scraper::Html;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::SiteConfig;
use crate::decode::VersionsPageDecoder;
use crate::error::{Error, HttpError, Result};
use crate::paginate::{Page, PageDecoder};
use crate::session::{RequestOptions, Session, Timeout};
use crate::transport::{Part, Url};

const ATTACH_TIMEOUT: Duration = Duration::from_secs(60);
const XPI_MIME: &str = "application/x-xpinstall";

static BETA_VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(a|alpha|b|beta|pre|rc)(([\.-]\d)?\d*)$").expect("BETA_VERSION_RE should compile")
});

/// Versions like `1.0b2` or `2.1rc` can only go to the beta channel.
pub fn is_beta_version(version: &str) -> bool {
    BETA_VERSION_RE.is_match(version)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    All,
    Linux,
    Mac,
    Windows,
    Android,
}

impl Platform {
    /// Value of the `supported_platforms` form field.
    pub fn code(self) -> &'static str {
        match self {
            Platform::All => "1",
            Platform::Linux => "2",
            Platform::Mac => "3",
            Platform::Windows => "5",
            Platform::Android => "7",
        }
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Platform::All),
            "linux" => Ok(Platform::Linux),
            "mac" | "osx" => Ok(Platform::Mac),
            "windows" | "win" | "win32" => Ok(Platform::Windows),
            "android" => Ok(Platform::Android),
            other => Err(Error::InvalidArgument(format!(
                "unknown platform {other}, expected all, linux, mac, win or android"
            ))),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::All => "all",
            Platform::Linux => "linux",
            Platform::Mac => "mac",
            Platform::Windows => "windows",
            Platform::Android => "android",
        })
    }
}

/// A version listed on the developer versions page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionLink {
    pub text: String,
    pub url: String,
}

/// The developer versions page: form token and existing versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionsPage {
    pub token: Option<String>,
    pub versions: Vec<VersionLink>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageCounts {
    pub errors: u64,
    pub warnings: u64,
    pub notices: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningSummary {
    pub trivial: u64,
    pub low: u64,
    pub medium: u64,
    pub high: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Description {
    One(String),
    Many(Vec<String>),
}

impl Default for Description {
    fn default() -> Self {
        Description::Many(Vec::new())
    }
}

impl Description {
    /// The text with the validator's HTML escaping undone.
    pub fn unescaped(&self) -> String {
        Html::parse_fragment(&self.to_string()).root_element().text().collect()
    }
}

impl fmt::Display for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Description::One(text) => f.write_str(text),
            Description::Many(parts) => f.write_str(&parts.concat()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationMessage {
    /// "error", "warning" or "notice".
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub description: Description,
}

/// Message levels, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageLevel {
    Error,
    Warning,
    Notice,
    All,
}

impl ValidationMessage {
    fn level(&self) -> MessageLevel {
        match self.kind.as_str() {
            "error" => MessageLevel::Error,
            "warning" => MessageLevel::Warning,
            _ => MessageLevel::Notice,
        }
    }
}

/// Status document of a validation job, as the upload endpoint serves it.
#[derive(Debug, Clone, Deserialize)]
struct JobStatus {
    upload: String,
    #[serde(default)]
    full_report_url: Option<String>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    validation: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Report {
    errors: u64,
    warnings: u64,
    notices: u64,
    metadata: Map<String, Value>,
    compatibility_summary: MessageCounts,
    signing_summary: SigningSummary,
    messages: Vec<ValidationMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationState {
    Uploaded,
    Pending,
    Succeeded,
    Failed,
}

impl ValidationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ValidationState::Succeeded | ValidationState::Failed)
    }
}

/// An uploaded xpi and what the validator has said about it so far.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationJob {
    pub upload_id: String,
    pub addon_id: String,
    pub platform: String,
    pub report_url: Option<String>,
    pub state_url: String,
    pub terminal: bool,
    pub success: bool,
    pub counts: MessageCounts,
    pub compatibility: MessageCounts,
    pub signing: SigningSummary,
    pub messages: Vec<ValidationMessage>,
    pub metadata: Map<String, Value>,
    /// Set when the validator gave up on the upload.
    pub failure: Option<String>,
}

impl ValidationJob {
    fn uploaded(addon_id: &str, platform: Platform, state_url: &Url) -> Self {
        ValidationJob {
            upload_id: String::new(),
            addon_id: addon_id.to_string(),
            platform: platform.to_string(),
            report_url: None,
            state_url: state_url.to_string(),
            terminal: false,
            success: false,
            counts: MessageCounts::default(),
            compatibility: MessageCounts::default(),
            signing: SigningSummary::default(),
            messages: Vec::new(),
            metadata: Map::new(),
            failure: None,
        }
    }

    /// Fold one status document into the job and return the new state.
    fn update(&mut self, status: JobStatus, state_url: &Url) -> Result<ValidationState> {
        self.upload_id = status.upload;
        self.report_url = status
            .full_report_url
            .and_then(|href| state_url.join(&href).ok())
            .map(|url| url.to_string());

        if let Some(error) = status.error.filter(|e| !e.is_null()) {
            self.failure = Some(match error {
                Value::String(text) => text,
                other => other.to_string(),
            });
            self.terminal = true;
            self.success = false;
            return Ok(ValidationState::Failed);
        }

        let Some(validation) = status.validation.filter(Value::is_object) else {
            return Ok(ValidationState::Pending);
        };
        let report: Report = serde_json::from_value(validation)
            .map_err(|e| Error::parse(state_url, format!("validation report: {e}")))?;
        self.counts = MessageCounts {
            errors: report.errors,
            warnings: report.warnings,
            notices: report.notices,
        };
        self.compatibility = report.compatibility_summary;
        self.signing = report.signing_summary;
        self.messages = report.messages;
        self.metadata = report.metadata;
        self.terminal = true;
        self.success = report.errors == 0;
        Ok(if self.success {
            ValidationState::Succeeded
        } else {
            ValidationState::Failed
        })
    }

    pub fn name(&self) -> &str {
        self.metadata.get("name").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn version(&self) -> &str {
        self.metadata.get("version").and_then(Value::as_str).unwrap_or_default()
    }

    fn flag(&self, key: &str, label: &str) -> String {
        match self.metadata.get(key) {
            Some(Value::Bool(true)) => format!("[{label}]"),
            _ => String::new(),
        }
    }

    /// Messages at `level` or more severe.
    pub fn messages_at(&self, level: MessageLevel) -> impl Iterator<Item = &ValidationMessage> {
        self.messages.iter().filter(move |m| m.level() <= level)
    }
}

impl fmt::Display for ValidationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.report_url.as_deref().unwrap_or(&self.state_url);
        if !self.terminal {
            writeln!(f, "Validation in progress for {}", self.addon_id)?;
            return write!(f, "Full report at {report}");
        }
        if !self.success {
            writeln!(f, "Validation failed for {}", self.addon_id)?;
            if let Some(failure) = &self.failure {
                writeln!(f, "{failure}")?;
            }
            writeln!(f, "Full report at {report}")?;
            return write!(f, "{} validation messages", self.messages.len());
        }
        writeln!(
            f,
            "Validation complete for {} {} {}{}",
            self.name(),
            self.version(),
            self.flag("contains_binary_extension", "binary"),
            self.flag("requires_chrome", "requires_chrome")
        )?;
        writeln!(
            f,
            "Total {} errors, {} warnings, {} notices",
            self.counts.errors, self.counts.warnings, self.counts.notices
        )?;
        writeln!(f, "Full report at {report}")?;
        writeln!(
            f,
            "Compatibility {} notices, {} warnings, {} errors",
            self.compatibility.notices, self.compatibility.warnings, self.compatibility.errors
        )?;
        writeln!(
            f,
            "Signing {} trivial, {} low, {} medium, {} high",
            self.signing.trivial, self.signing.low, self.signing.medium, self.signing.high
        )?;
        write!(f, "{} validation messages", self.messages.len())
    }
}

/// How a validation ended. A failed validation is an answer, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Succeeded(ValidationJob),
    Failed(ValidationJob),
}

impl ValidationOutcome {
    pub fn job(&self) -> &ValidationJob {
        match self {
            ValidationOutcome::Succeeded(job) | ValidationOutcome::Failed(job) => job,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ValidationOutcome::Succeeded(_))
    }
}

/// Waits between two polls.
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration, job: &ValidationJob);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration, _: &ValidationJob) {
        std::thread::sleep(duration);
    }
}

/// Poll `state_url` every `interval` until the job is done.
pub fn wait_for_validation(
    session: &mut Session,
    state_url: &Url,
    addon_id: &str,
    platform: Platform,
    interval: Duration,
    sleeper: &mut dyn Sleeper,
) -> Result<ValidationOutcome> {
    let mut job = ValidationJob::uploaded(addon_id, platform, state_url);
    let mut state = ValidationState::Uploaded;
    loop {
        let res = session.get(state_url, RequestOptions::new().timeout(Timeout::Unbounded))?;
        let status: JobStatus = res.json()?;
        let next = job.update(status, state_url)?;
        debug!(from = ?state, to = ?next, upload = %job.upload_id, "validation polled");
        state = next;

        match state {
            ValidationState::Succeeded => return Ok(ValidationOutcome::Succeeded(job)),
            ValidationState::Failed => return Ok(ValidationOutcome::Failed(job)),
            ValidationState::Uploaded | ValidationState::Pending => sleeper.sleep(interval, &job),
        }
    }
}

fn developer_url(site: &SiteConfig, path: &str) -> Result<Url> {
    let raw = format!("{}/{}", site.developer_base(), path);
    Url::parse(&raw).map_err(|e| Error::InvalidArgument(format!("bad developer url {raw}: {e}")))
}

fn versions_page(session: &mut Session, site: &SiteConfig, addon_id: &str) -> Result<VersionsPage> {
    let url = developer_url(site, &format!("addon/{}/versions", urlencoding::encode(addon_id)))?;
    let res = session.get(&url, RequestOptions::new())?;
    VersionsPageDecoder.decode(&Page::from_response(&res))
}

fn form_token(page: &VersionsPage, site: &SiteConfig) -> Result<String> {
    page.token
        .clone()
        .ok_or_else(|| Error::parse(site.developer_base(), "no form token on the versions page"))
}

/// Upload `xpi` and wait for its validation.
pub fn upload(
    session: &mut Session,
    site: &SiteConfig,
    addon_id: &str,
    xpi: &Path,
    platform: Platform,
    interval: Duration,
    sleeper: &mut dyn Sleeper,
) -> Result<ValidationOutcome> {
    let page = versions_page(session, site, addon_id)?;
    let parts = vec![
        Part::text("csrfmiddlewaretoken", form_token(&page, site)?),
        Part::from_path("upload", xpi, XPI_MIME)?,
    ];

    let url = developer_url(site, &format!("addon/{}/upload-listed", urlencoding::encode(addon_id)))?;
    info!(addon = addon_id, xpi = %xpi.display(), %platform, "uploading");
    let res = session.post(
        &url,
        RequestOptions::new()
            .multipart(parts)
            .timeout(Timeout::Unbounded)
            .no_redirects(),
    )?;
    if res.status != 302 {
        return Err(HttpError::new(res.status, &res.url, res.text()).into());
    }
    let state_url = res
        .location()
        .ok_or_else(|| Error::parse(&res.url, "upload redirect without location"))?;

    wait_for_validation(session, &state_url, addon_id, platform, interval, sleeper)
}

/// Attach a validated upload to its version, creating the version when the
/// add-on does not have it yet. Returns the version's page.
pub fn attach(
    session: &mut Session,
    site: &SiteConfig,
    job: &ValidationJob,
    platform: Platform,
    source: Option<&Path>,
    beta: bool,
) -> Result<Url> {
    let addon_id = job.addon_id.as_str();
    let page = versions_page(session, site, addon_id)?;
    let label = format!("Version {}", job.version());
    let existing = page.versions.iter().find(|v| v.text.contains(&label));

    let submit_url = match existing {
        Some(version) => Url::parse(&format!("{}/submit-file/", version.url.trim_end_matches('/')))
            .map_err(|e| Error::parse(&version.url, format!("bad version link: {e}")))?,
        None => developer_url(site, &format!("addon/{}/versions/submit/", urlencoding::encode(addon_id)))?,
    };

    let mut parts = vec![
        Part::text("csrfmiddlewaretoken", form_token(&page, site)?),
        Part::text("upload", job.upload_id.clone()),
        Part::text("supported_platforms", platform.code()),
    ];
    if beta {
        parts.push(Part::text("beta", "on"));
    }
    parts.push(match source {
        Some(path) => Part::from_path("source", path, "application/octet-stream")?,
        None => Part::file("source", "", "application/octet-stream", Vec::new()),
    });

    info!(addon = addon_id, version = job.version(), url = %submit_url, "adding file to version");
    let res = session.post(
        &submit_url,
        RequestOptions::new()
            .multipart(parts)
            .timeout(Timeout::After(ATTACH_TIMEOUT))
            .no_redirects(),
    )?;

    if let Some(version) = existing {
        return Url::parse(&version.url).map_err(|e| Error::parse(&version.url, format!("bad version link: {e}")));
    }
    let location = res
        .location()
        .ok_or_else(|| Error::parse(&res.url, "new version without redirect"))?;
    // The id is the next to last piece of e.g. `.../versions/submit/555/`.
    let version_id = location
        .path()
        .rsplit('/')
        .nth(1)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::parse(&location, "no version id in redirect"))?;
    developer_url(site, &format!("addon/{}/versions/{}", urlencoding::encode(addon_id), version_id))
}

/// A batch of xpis for one add-on, one per platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub addon_id: String,
    pub files: Vec<(Platform, PathBuf)>,
    pub source: Option<PathBuf>,
    pub beta: bool,
}

/// What happened to one file of an `UploadRequest`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformUpload {
    pub platform: Platform,
    pub xpi: PathBuf,
    pub outcome: ValidationOutcome,
    pub version_url: Option<Url>,
    /// Sent to the beta channel.
    pub beta: bool,
    /// Why a validated upload could not be added to a version.
    pub attach_error: Option<HttpError>,
}

/// Upload every file of the request in order. The first failed validation
/// cancels the files after it; it is the last entry of the result. A file
/// the site refuses to add to a version keeps its error and the batch
/// goes on.
pub fn upload_all(
    session: &mut Session,
    site: &SiteConfig,
    request: &UploadRequest,
    interval: Duration,
    sleeper: &mut dyn Sleeper,
) -> Result<Vec<PlatformUpload>> {
    let mut beta = request.beta;
    let mut results = Vec::new();
    for (index, (platform, xpi)) in request.files.iter().enumerate() {
        let outcome = upload(session, site, &request.addon_id, xpi, *platform, interval, sleeper)?;

        let version = outcome.job().version().to_string();
        if !beta && is_beta_version(&version) {
            info!(%version, "version matches the beta pattern, uploading as beta");
            beta = true;
        }

        let (version_url, attach_error) = match &outcome {
            ValidationOutcome::Succeeded(job) => {
                match attach(session, site, job, *platform, request.source.as_deref(), beta) {
                    Ok(url) => (Some(url), None),
                    Err(Error::Http(e)) => {
                        warn!(%platform, error = %e, "could not add the upload to a version");
                        (None, Some(e))
                    }
                    Err(e) => return Err(e),
                }
            }
            ValidationOutcome::Failed(_) => (None, None),
        };
        let failed = !outcome.is_success();
        results.push(PlatformUpload {
            platform: *platform,
            xpi: xpi.clone(),
            outcome,
            version_url,
            beta,
            attach_error,
        });
        if failed {
            let cancelled = request.files.len() - index - 1;
            if cancelled > 0 {
                warn!(cancelled, "validation failed, cancelling the remaining uploads");
            }
            break;
        }
    }
    Ok(results)
}
