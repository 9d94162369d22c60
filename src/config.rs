// Configuration: where the site lives, how long requests may take and
// which defaults each command starts from.
//
// Everything is read once at start-up from `~/.amo.toml` (or `--config`)
// and then passed around explicitly. `SessionConfig` is the part the
// session manager needs, derived from `Config` so tests can build one
// directly with whatever policy they want to exercise.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub site: SiteConfig,
    pub session: SessionSettings,
    pub validation: ValidationSettings,
    /// Per-command default arguments, e.g. `get = "-o ~/addons"`.
    pub defaults: BTreeMap<String, String>,
}

/// Hosts and locale of the marketplace. All URLs are derived from these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub host: String,
    pub internal_host: String,
    pub locale: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginMethod {
    /// Browser based authorization, the user pastes back the redirect URL.
    #[default]
    Oauth,
    /// Username/password form on the site itself.
    Password,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Default request timeout in seconds.
    pub timeout: f64,
    /// Timeout for the admin host in seconds. The admin tools sit behind a
    /// VPN, so fail fast there.
    pub admin_timeout: f64,
    pub max_login_attempts: u32,
    pub cookie_file: Option<PathBuf>,
    pub login: LoginMethod,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    /// Seconds between validation status polls.
    pub interval: u64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        SiteConfig {
            host: "addons.mozilla.org".into(),
            internal_host: "addons-internal.prod.mozaws.net".into(),
            locale: "en-US".into(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            timeout: 10.0,
            admin_timeout: 2.0,
            max_login_attempts: 3,
            cookie_file: None,
            login: LoginMethod::default(),
        }
    }
}

impl Default for ValidationSettings {
    fn default() -> Self {
        ValidationSettings { interval: 5 }
    }
}

impl SiteConfig {
    pub fn base(&self) -> String {
        format!("https://{}/{}", self.host, self.locale)
    }

    /// Reviewer tools (queues, logs, review pages).
    pub fn editor_base(&self) -> String {
        format!("https://reviewers.{}/{}/reviewers", self.host, self.locale)
    }

    pub fn reviewers_api_base(&self) -> String {
        format!("https://reviewers.{}/api/v3/reviewers", self.host)
    }

    pub fn api_base(&self) -> String {
        format!("https://{}/api/v3", self.host)
    }

    pub fn developer_base(&self) -> String {
        format!("{}/developers", self.base())
    }

    pub fn admin_base(&self) -> String {
        format!("https://{}/{}/admin", self.internal_host, self.locale)
    }

    pub fn login_url(&self) -> String {
        format!("{}/firefox/users/login", self.base())
    }

    /// Whether `url` points into the site (public or reviewer pages), used to
    /// turn full URLs given on the command line back into ids.
    pub fn owns(&self, url: &str) -> bool {
        url.starts_with(&self.base()) || url.starts_with(&self.editor_base())
    }
}

/// What the session manager needs to know: timeouts, login wall markers
/// and the retry ceiling.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub default_timeout: Duration,
    /// Checked in order, first matching prefix wins.
    pub host_timeouts: Vec<HostTimeout>,
    pub max_login_attempts: u32,
    /// A response landing on a URL with this prefix is a login wall.
    pub login_url: String,
    /// A response landing on a URL containing this is a login wall.
    pub oauth_fragment: String,
    pub max_redirects: usize,
    /// Hosts, with their subdomains, that are sent the site's cookies.
    pub cookie_hosts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostTimeout {
    pub prefix: String,
    pub timeout: Duration,
}

impl SessionConfig {
    pub fn timeout_for(&self, url: &str) -> Duration {
        self.host_timeouts
            .iter()
            .find(|rule| url.starts_with(&rule.prefix))
            .map(|rule| rule.timeout)
            .unwrap_or(self.default_timeout)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        let site = SiteConfig::default();
        SessionConfig {
            default_timeout: Duration::from_secs(10),
            host_timeouts: vec![HostTimeout {
                prefix: site.admin_base(),
                timeout: Duration::from_secs(2),
            }],
            max_login_attempts: 3,
            login_url: site.login_url(),
            oauth_fragment: "v1/authorization".into(),
            max_redirects: 10,
            cookie_hosts: vec![site.host.clone(), site.internal_host.clone()],
        }
    }
}

impl Config {
    /// Default configuration path: `~/.amo.toml`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".amo.toml")
    }

    /// Load the configuration. A missing default file just means defaults;
    /// a missing file that was asked for explicitly is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_toml(&text)?
            }
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::from_toml(&fs::read_to_string(&path)?)?
                } else {
                    Config::default()
                }
            }
        };

        // AMO_HOST=addons.allizom.org points everything at staging.
        if let Ok(host) = std::env::var("AMO_HOST") {
            if !host.trim().is_empty() {
                config.site.host = host.trim().to_string();
            }
        }
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, secs) in [
            ("session.timeout", self.session.timeout),
            ("session.admin_timeout", self.session.admin_timeout),
        ] {
            if Duration::try_from_secs_f64(secs).is_err() {
                return Err(Error::Config(format!("{name} must be a positive number of seconds")));
            }
        }
        if self.session.max_login_attempts == 0 {
            return Err(Error::Config("session.max_login_attempts must be at least 1".into()));
        }
        Ok(())
    }

    /// Replace the global default timeout (the `--timeout` flag).
    pub fn set_timeout(&mut self, secs: f64) -> Result<()> {
        Duration::try_from_secs_f64(secs)
            .map_err(|_| Error::Config(format!("invalid timeout {secs}")))?;
        self.session.timeout = secs;
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        // validate() already rejected values that do not convert.
        let secs = |value: f64| Duration::try_from_secs_f64(value).unwrap_or(Duration::from_secs(10));
        SessionConfig {
            default_timeout: secs(self.session.timeout),
            host_timeouts: vec![HostTimeout {
                prefix: self.site.admin_base(),
                timeout: secs(self.session.admin_timeout),
            }],
            max_login_attempts: self.session.max_login_attempts,
            login_url: self.site.login_url(),
            cookie_hosts: vec![
                self.site.host.to_ascii_lowercase(),
                self.site.internal_host.to_ascii_lowercase(),
            ],
            ..SessionConfig::default()
        }
    }

    /// Where session cookies are kept: `~/.amo_cookie` unless configured.
    pub fn cookie_file(&self) -> PathBuf {
        self.session.cookie_file.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".amo_cookie")
        })
    }

    pub fn validation_interval(&self) -> Duration {
        Duration::from_secs(self.validation.interval)
    }

    /// Default arguments configured for a command, split like a shell would
    /// split a simple word list.
    pub fn command_defaults(&self, command: &str) -> Vec<String> {
        self.defaults
            .get(command)
            .map(|line| line.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_production_site() {
        let config = Config::default();
        assert_eq!(config.site.base(), "https://addons.mozilla.org/en-US");
        assert_eq!(
            config.site.editor_base(),
            "https://reviewers.addons.mozilla.org/en-US/reviewers"
        );
        assert_eq!(
            config.site.admin_base(),
            "https://addons-internal.prod.mozaws.net/en-US/admin"
        );
        assert_eq!(config.session.max_login_attempts, 3);
        assert_eq!(config.validation_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_partial_file() {
        let config = Config::from_toml(
            r#"
            [site]
            host = "addons.allizom.org"

            [session]
            timeout = 30
            login = "password"

            [defaults]
            get = "-o /tmp/addons --limit 2"
            "#,
        )
        .unwrap();

        assert_eq!(config.site.host, "addons.allizom.org");
        assert_eq!(config.site.locale, "en-US");
        assert_eq!(config.session.timeout, 30.0);
        assert_eq!(config.session.admin_timeout, 2.0);
        assert_eq!(config.session.login, LoginMethod::Password);
        assert_eq!(
            config.command_defaults("get"),
            vec!["-o", "/tmp/addons", "--limit", "2"]
        );
        assert!(config.command_defaults("list").is_empty());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            Config::from_toml("[session]\ntimeout = -1.0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_toml("[session]\nmax_login_attempts = 0"),
            Err(Error::Config(_))
        ));
        assert!(Config::from_toml("[site\n").is_err());
    }

    #[test]
    fn test_admin_host_gets_short_timeout() {
        let config = Config::default().session_config();
        let admin = format!("{}/addon/manage/foo/", SiteConfig::default().admin_base());
        assert_eq!(config.timeout_for(&admin), Duration::from_secs(2));
        assert_eq!(
            config.timeout_for("https://reviewers.addons.mozilla.org/en-US/reviewers/queue/new"),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_timeout_flag_replaces_default() {
        let mut config = Config::default();
        config.set_timeout(42.0).unwrap();
        assert_eq!(config.session_config().default_timeout, Duration::from_secs(42));
        assert!(config.set_timeout(f64::NAN).is_err());
    }
}
