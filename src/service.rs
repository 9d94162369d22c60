// The entry point for commands: owns the configuration and the session and
// hands out the models built on them.

use tracing::{info, warn};

use crate::admin::AdminInfo;
use crate::auth::{AuthFlow, LoginPrompter, OAuthCodeFlow, PasswordFormFlow};
use crate::config::{Config, LoginMethod, SiteConfig};
use crate::credentials::CredentialStore;
use crate::error::Result;
use crate::listing::{get_logs, get_queue, LogEntry, LogQuery, QueueEntry};
use crate::review::{Channel, Review};
use crate::session::Session;
use crate::transport::ReqwestTransport;
use crate::upload::{upload_all, PlatformUpload, Sleeper, UploadRequest};

/// Result of an operation over several add-ons.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    /// Add-on and what went wrong with it.
    pub failed: Vec<(String, String)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct AddonsService {
    config: Config,
    session: Session,
}

impl AddonsService {
    pub fn new(config: Config, session: Session) -> Self {
        AddonsService { config, session }
    }

    /// Set up the real network stack: reqwest transport, the cookie file
    /// from the configuration and the configured login method.
    pub fn connect(config: Config, prompter: Box<dyn LoginPrompter>) -> Result<Self> {
        let session_config = config.session_config();
        let timeout = session_config.default_timeout;
        let auth: Box<dyn AuthFlow> = match config.session.login {
            LoginMethod::Oauth => Box::new(OAuthCodeFlow::new(&config.site, timeout)),
            LoginMethod::Password => Box::new(PasswordFormFlow::new(&config.site, timeout)),
        };
        let store = CredentialStore::new(config.cookie_file());
        let session = Session::new(
            session_config,
            Box::new(ReqwestTransport::new()?),
            auth,
            prompter,
            store,
        )?;
        Ok(AddonsService::new(config, session))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn site(&self) -> &SiteConfig {
        &self.config.site
    }

    pub fn session(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn persist(&self) -> Result<()> {
        self.session.persist()
    }

    /// The review page of an add-on with its first page loaded.
    pub fn review(&mut self, id_or_url: &str, channel: Channel) -> Result<Review<'_>> {
        let mut review = Review::new(&mut self.session, &self.config.site, id_or_url, channel)?;
        review.load()?;
        Ok(review)
    }

    /// The admin manage page, with every page loaded when `all` is set.
    pub fn admin_info(&mut self, id_or_url: &str, all: bool) -> Result<AdminInfo<'_>> {
        let mut admin = AdminInfo::new(&mut self.session, &self.config.site, id_or_url)?;
        if all {
            admin.load_all()?;
        } else {
            admin.load()?;
        }
        Ok(admin)
    }

    pub fn queue(&mut self, name_or_url: &str) -> Result<Vec<QueueEntry>> {
        get_queue(&mut self.session, &self.config.site, name_or_url)
    }

    pub fn logs(&mut self, query: &LogQuery) -> Result<Vec<LogEntry>> {
        get_logs(&mut self.session, &self.config.site, query)
    }

    pub fn upload(&mut self, request: &UploadRequest, sleeper: &mut dyn Sleeper) -> Result<Vec<PlatformUpload>> {
        let interval = self.config.validation_interval();
        upload_all(&mut self.session, &self.config.site, request, interval, sleeper)
    }

    /// Disable add-ons as an admin, first rejecting their enabled versions
    /// with `message` when one is given. A failure on one add-on is recorded
    /// and the batch goes on; only a fatal error ends it early.
    pub fn disable_addons<S: AsRef<str>>(
        &mut self,
        addons: &[S],
        message: Option<&str>,
        mut progress: impl FnMut(&str, bool),
    ) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        for addon in addons {
            let addon = addon.as_ref().trim();
            match self.disable_one(addon, message) {
                Ok(true) => {
                    progress(addon, true);
                    report.succeeded.push(addon.to_string());
                }
                Ok(false) => {
                    progress(addon, false);
                    report.failed.push((addon.to_string(), "rejected by the server".to_string()));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(addon, error = %e, "could not disable add-on");
                    progress(addon, false);
                    report.failed.push((addon.to_string(), e.to_string()));
                }
            }
        }
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "disable batch finished"
        );
        Ok(report)
    }

    fn disable_one(&mut self, addon: &str, message: Option<&str>) -> Result<bool> {
        let mut review = self.review(addon, Channel::Listed)?;
        if let Some(message) = message {
            let versions = review.aggregate.enabled_versions.clone();
            if !review.decide_ids("reject_multiple_versions", message, &versions)? {
                return Ok(false);
            }
        }
        review.admin_disable()
    }
}
