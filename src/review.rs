// Review history of one add-on, built up a page at a time.
//
// The reviewer page lists versions newest page first: page 1 holds the
// most recent versions, the last page the oldest. `ReviewAggregate` keeps
// them oldest first, so each older page goes in front of what is already
// there, and re-reading a page puts the same versions back in the same
// place.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::SiteConfig;
use crate::credentials::set_cookie_value;
use crate::decode::ReviewPageDecoder;
use crate::error::{Error, HttpError, Result};
use crate::paginate::{Page, PageDecoder};
use crate::session::{RequestOptions, Session};
use crate::transport::{Method, Url, WireResponse};

/// One file of a version, usually one per platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub url: String,
    pub platforms: Vec<String>,
    /// Moderation status as shown on the page, e.g. "Approved".
    pub status: String,
    /// Permissions the add-on asks for; `None` when the page shows none.
    pub permissions: Option<String>,
    pub file_name: String,
    pub file_id: String,
    /// Set once the file has been downloaded.
    pub saved_path: Option<PathBuf>,
}

impl FileRecord {
    pub fn has_permissions(&self) -> bool {
        self.permissions.as_deref().map_or(false, |p| !p.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: String,
    pub date: String,
    pub confirmed: bool,
    /// Internal version id; deleted versions may not have one.
    pub id: Option<String>,
    pub files: Vec<FileRecord>,
    /// Link to the source archive, if sources were submitted.
    pub sources: Option<String>,
    /// Applications the version supports, e.g. "firefox".
    pub apps: Vec<String>,
    pub source_path: Option<PathBuf>,
    pub source_file_name: Option<String>,
}

/// Everything read from one review page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewPage {
    pub addon_id: String,
    pub name: String,
    pub slug: Option<String>,
    pub token: Option<String>,
    pub actions: Vec<String>,
    pub enabled_versions: Vec<String>,
    pub developers: Vec<String>,
    pub downloads: u64,
    pub users: u64,
    /// The page's own pagination says it is page 1. Asking for a page past
    /// the end gets page 1 back.
    pub is_first_page: bool,
    /// Versions on the page, in page order.
    pub versions: Vec<VersionRecord>,
}

/// The add-on as known so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewAggregate {
    pub addon_id: String,
    pub slug: Option<String>,
    pub name: Option<String>,
    /// Anti-forgery token for the next write.
    pub token: Option<String>,
    pub actions: Vec<String>,
    pub enabled_versions: Vec<String>,
    pub developers: Vec<String>,
    pub downloads: u64,
    pub users: u64,
    /// Oldest first.
    pub versions: Vec<VersionRecord>,
    /// Last page fetched, 0 before the first.
    pub page: u32,
    /// Number of versions each fetched page contributed.
    loaded: BTreeMap<u32, usize>,
}

impl ReviewAggregate {
    pub fn new(addon_id: impl Into<String>) -> Self {
        ReviewAggregate {
            addon_id: addon_id.into(),
            ..Default::default()
        }
    }

    pub fn reset(&mut self) {
        self.versions.clear();
        self.loaded.clear();
        self.developers.clear();
        self.page = 0;
    }

    /// Take over the identity fields of a freshly read page.
    pub fn update_identity(&mut self, page: &ReviewPage) {
        self.addon_id = page.addon_id.clone();
        self.name = Some(page.name.clone());
        if page.slug.is_some() {
            self.slug = page.slug.clone();
        }
        self.token = page.token.clone();
        self.actions = page.actions.clone();
        self.enabled_versions = page.enabled_versions.clone();
        self.downloads = page.downloads;
        self.users = page.users;
    }

    /// Put the versions of page `number` in their place: after every older
    /// page and before every newer one. A page read before is replaced.
    pub fn insert_page(&mut self, number: u32, versions: Vec<VersionRecord>) {
        let offset: usize = self
            .loaded
            .range(number + 1..)
            .map(|(_, count)| count)
            .sum();
        let previous = self.loaded.insert(number, versions.len()).unwrap_or(0);
        self.versions.splice(offset..offset + previous, versions);
    }

    pub fn add_developers(&mut self, developers: &[String]) {
        for dev in developers {
            if !self.developers.contains(dev) {
                self.developers.push(dev.clone());
            }
        }
    }

    pub fn latest(&self) -> Option<&VersionRecord> {
        self.versions.last()
    }

    pub fn find(&self, version: &str) -> Option<&VersionRecord> {
        self.versions.iter().rev().find(|v| v.version == version)
    }
}

/// Which review queue page to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Channel {
    #[default]
    Listed,
    Unlisted,
}

impl Channel {
    fn review_path(self) -> &'static str {
        match self {
            Channel::Listed => "review-listed",
            Channel::Unlisted => "review-unlisted",
        }
    }
}

/// The review page of one add-on, and the actions that can be taken on it.
pub struct Review<'s, D = ReviewPageDecoder> {
    session: &'s mut Session,
    decoder: D,
    editor_base: String,
    reviewers_api: String,
    channel: Channel,
    url: Url,
    pub aggregate: ReviewAggregate,
}

impl<'s> Review<'s> {
    pub fn new(session: &'s mut Session, site: &SiteConfig, id_or_url: &str, channel: Channel) -> Result<Self> {
        Review::with_decoder(session, site, id_or_url, channel, ReviewPageDecoder)
    }
}

impl<'s, D> Review<'s, D>
where
    D: PageDecoder<Output = ReviewPage>,
{
    pub fn with_decoder(
        session: &'s mut Session,
        site: &SiteConfig,
        id_or_url: &str,
        channel: Channel,
        decoder: D,
    ) -> Result<Self> {
        let addon_id = addon_id_from(site, id_or_url)?;
        let editor_base = site.editor_base();
        let url = review_url(&editor_base, channel, &addon_id)?;
        Ok(Review {
            session,
            decoder,
            editor_base,
            reviewers_api: site.reviewers_api_base(),
            channel,
            url,
            aggregate: ReviewAggregate::new(addon_id),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn versions(&self) -> &[VersionRecord] {
        &self.aggregate.versions
    }

    pub fn session(&mut self) -> &mut Session {
        self.session
    }

    /// Start over from page 1.
    pub fn load(&mut self) -> Result<()> {
        self.aggregate.reset();
        self.fetch_page(1)?;
        Ok(())
    }

    /// Read page `number` into the aggregate. Returns `false` when the page
    /// does not exist, i.e. the site answered with page 1 instead.
    pub fn fetch_page(&mut self, number: u32) -> Result<bool> {
        let res = self.session.get(
            &self.url,
            RequestOptions::new()
                .query([("page", number.to_string())])
                .no_redirects(),
        )?;
        let res = self.check_redirects(res)?;
        let page = self.decoder.decode(&Page::from_response(&res))?;

        self.aggregate.update_identity(&page);
        if let Some(slug) = &self.aggregate.slug {
            self.url = review_url(&self.editor_base, self.channel, slug)?;
        }

        if number > 1 && page.is_first_page {
            debug!(number, "past the last review page");
            return Ok(false);
        }

        debug!(number, versions = page.versions.len(), "review page read");
        self.aggregate.insert_page(number, page.versions);
        self.aggregate.add_developers(&page.developers);
        self.aggregate.page = number;
        Ok(true)
    }

    pub fn fetch_next(&mut self) -> Result<bool> {
        self.fetch_page(self.aggregate.page + 1)
    }

    pub fn fetch_all(&mut self) -> Result<&[VersionRecord]> {
        while self.fetch_next()? {}
        Ok(&self.aggregate.versions)
    }

    /// Fetch older pages until `predicate` gives an answer. The predicate is
    /// asked first with what is already loaded; `default` is returned when
    /// the pages run out.
    pub fn fetch_until<R, F>(&mut self, default: R, mut predicate: F) -> Result<R>
    where
        F: FnMut(&[VersionRecord], u32) -> Option<R>,
    {
        loop {
            if let Some(found) = predicate(&self.aggregate.versions, self.aggregate.page) {
                return Ok(found);
            }
            if !self.fetch_next()? {
                return Ok(default);
            }
        }
    }

    /// A 302 from a review page carries a flash message instead of content,
    /// a 301 moves to another review page.
    fn check_redirects(&mut self, res: WireResponse) -> Result<WireResponse> {
        match res.status {
            302 => Err(flash_message(&res)),
            301 => {
                let target = res
                    .location()
                    .ok_or_else(|| Error::parse(&res.url, "redirect without location"))?;
                if target.as_str().starts_with(&self.editor_base) {
                    debug!(%target, "review page moved");
                    self.session.get(&target, RequestOptions::new().no_redirects())
                } else {
                    Err(HttpError::new(res.status, &res.url, res.text()).into())
                }
            }
            _ => Ok(res),
        }
    }

    fn token(&self) -> Result<String> {
        self.aggregate
            .token
            .clone()
            .ok_or_else(|| Error::InvalidArgument("review page not loaded yet".into()))
    }

    /// Submit a review decision. Version ids are only sent for
    /// `reject_multiple_versions`.
    pub fn decide(&mut self, action: &str, comments: &str, versions: &[&VersionRecord]) -> Result<bool> {
        let ids = if action == "reject_multiple_versions" {
            versions.iter().filter_map(|v| v.id.clone()).collect()
        } else {
            Vec::new()
        };
        self.decide_ids(action, comments, &ids)
    }

    pub fn decide_ids(&mut self, action: &str, comments: &str, version_ids: &[String]) -> Result<bool> {
        let mut form = vec![
            ("csrfmiddlewaretoken".to_string(), self.token()?),
            ("action".to_string(), action.to_string()),
            ("comments".to_string(), comments.to_string()),
            ("applications".to_string(), String::new()),
            ("operating_systems".to_string(), String::new()),
            ("info_request".to_string(), "sometime in the past".to_string()),
            ("info_request_deadline".to_string(), "7".to_string()),
        ];
        form.extend(version_ids.iter().map(|id| ("versions".to_string(), id.clone())));

        info!(addon = %self.aggregate.addon_id, action, "submitting review");
        let referer = self.url.to_string();
        let url = self.url.clone();
        let res = self
            .session
            .post(&url, RequestOptions::new().form(form).header("Referer", referer))?;
        Ok(res.status == 200)
    }

    fn api_url(&self, path: &str) -> Result<Url> {
        let raw = format!("{}/addon/{}/{}", self.reviewers_api, self.aggregate.addon_id, path);
        Url::parse(&raw).map_err(|e| Error::InvalidArgument(format!("bad api url {raw}: {e}")))
    }

    fn api_options(&self) -> Result<RequestOptions> {
        let session_id = self
            .session
            .token("sessionid")
            .ok_or_else(|| Error::Auth("no session cookie, log in first".into()))?;
        Ok(RequestOptions::new()
            .header("Authorization", format!("Session {session_id}"))
            .no_redirects())
    }

    /// Change reviewer flags; returns the flags as the server now has them.
    pub fn flags(&mut self, patch: Value) -> Result<Value> {
        let url = self.api_url("flags/")?;
        let options = self.api_options()?.json(patch);
        let res = self.session.request(Method::PATCH, &url, options)?;
        if res.status != 200 {
            return Err(HttpError::new(res.status, &res.url, res.text()).into());
        }
        res.json()
    }

    pub fn remove_extra_delay(&mut self) -> Result<bool> {
        let flags = self.flags(json!({ "auto_approval_delayed_until": null }))?;
        Ok(flags["auto_approval_delayed_until"].is_null())
    }

    /// Disable auto-approval until the next manual approval (or allow it
    /// again with `false`).
    pub fn set_next_autoapproval(&mut self, disabled: bool) -> Result<bool> {
        let mut key = "auto_approval_disabled_until_next_approval".to_string();
        if self.channel == Channel::Unlisted {
            key.push_str("_unlisted");
        }
        let flags = self.flags(json!({ key.as_str(): disabled }))?;
        Ok(flags[key.as_str()] == Value::Bool(disabled))
    }

    pub fn admin_disable(&mut self) -> Result<bool> {
        let url = self.api_url("disable/")?;
        let options = self.api_options()?;
        Ok(self.session.post(&url, options)?.status == 202)
    }

    pub fn subscription(&mut self, subscribe: bool) -> Result<bool> {
        let path = format!(
            "{}subscribe_{}listed/",
            if subscribe { "" } else { "un" },
            if self.channel == Channel::Unlisted { "un" } else { "" },
        );
        let url = self.api_url(&path)?;
        let options = self.api_options()?;
        Ok(self.session.post(&url, options)?.status == 202)
    }
}

fn review_url(editor_base: &str, channel: Channel, addon: &str) -> Result<Url> {
    let raw = format!(
        "{}/{}/{}",
        editor_base,
        channel.review_path(),
        urlencoding::encode(addon)
    );
    Url::parse(&raw).map_err(|e| Error::InvalidArgument(format!("bad review url {raw}: {e}")))
}

/// Accept an id, a slug or a link to one of the site's pages.
pub fn addon_id_from(site: &SiteConfig, id_or_url: &str) -> Result<String> {
    let id_or_url = id_or_url.trim();
    let id = if site.owns(id_or_url) {
        id_or_url.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
    } else {
        // Shell completion likes to add a trailing slash.
        id_or_url.trim_end_matches('/')
    };
    if id.is_empty() {
        return Err(Error::InvalidArgument(format!("no add-on id in {id_or_url:?}")));
    }
    Ok(id.to_string())
}

/// Decode the flash message of a 302. The `messages` cookie holds the
/// message between escaped newlines.
pub(crate) fn flash_message(res: &WireResponse) -> Error {
    let Some(cookie) = set_cookie_value(&res.headers, "messages") else {
        return Error::parse(&res.url, "unexpected redirect from review page");
    };
    let parts: Vec<&str> = cookie.split(r"\\n").collect();
    match parts.as_slice() {
        [_, message, _, _] => Error::ServerMessage(message.trim().to_string()),
        _ => Error::parse(&res.url, "unexpected message cookie on redirect"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(name: &str) -> VersionRecord {
        VersionRecord {
            version: name.into(),
            date: "Jan. 1, 2020".into(),
            confirmed: false,
            id: None,
            files: Vec::new(),
            sources: None,
            apps: Vec::new(),
            source_path: None,
            source_file_name: None,
        }
    }

    fn names(aggregate: &ReviewAggregate) -> Vec<&str> {
        aggregate.versions.iter().map(|v| v.version.as_str()).collect()
    }

    #[test]
    fn test_older_pages_go_in_front() {
        let mut aggregate = ReviewAggregate::new("x");
        aggregate.insert_page(1, vec![version("3.0"), version("3.1")]);
        aggregate.insert_page(2, vec![version("2.0"), version("2.1")]);
        aggregate.insert_page(3, vec![version("1.0")]);
        assert_eq!(names(&aggregate), ["1.0", "2.0", "2.1", "3.0", "3.1"]);
        assert_eq!(aggregate.latest().unwrap().version, "3.1");
    }

    #[test]
    fn test_refetching_a_page_is_idempotent() {
        let mut aggregate = ReviewAggregate::new("x");
        aggregate.insert_page(1, vec![version("3.0"), version("3.1")]);
        aggregate.insert_page(2, vec![version("2.0")]);
        let before = aggregate.versions.clone();

        aggregate.insert_page(2, vec![version("2.0")]);
        aggregate.insert_page(1, vec![version("3.0"), version("3.1")]);
        assert_eq!(aggregate.versions, before);

        // A page that grew replaces its own slice only.
        aggregate.insert_page(1, vec![version("3.0"), version("3.1"), version("3.2")]);
        assert_eq!(names(&aggregate), ["2.0", "3.0", "3.1", "3.2"]);
    }

    #[test]
    fn test_addon_id_from_url_or_id() {
        let site = SiteConfig::default();
        assert_eq!(
            addon_id_from(&site, "https://reviewers.addons.mozilla.org/en-US/reviewers/review/my-addon").unwrap(),
            "my-addon"
        );
        assert_eq!(addon_id_from(&site, "my-addon/").unwrap(), "my-addon");
        assert_eq!(addon_id_from(&site, "12345").unwrap(), "12345");
        assert!(addon_id_from(&site, "/").is_err());
    }

    #[test]
    fn test_flash_message() {
        use reqwest::header::{HeaderMap, HeaderValue, SET_COOKIE};

        let mut headers = HeaderMap::new();
        headers.insert(
            SET_COOKIE,
            HeaderValue::from_static(r#"messages="x\\nThis add-on has been deleted.\\ny\\nz"; Path=/"#),
        );
        let res = WireResponse {
            status: 302,
            url: Url::parse("https://reviewers.addons.mozilla.org/en-US/reviewers/review-listed/x").unwrap(),
            headers,
            body: Vec::new(),
        };
        match flash_message(&res) {
            Error::ServerMessage(message) => assert_eq!(message, "This add-on has been deleted."),
            other => panic!("unexpected {other:?}"),
        }
    }
}
