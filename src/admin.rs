// Admin manage page of an add-on: the add-on status and the status of every
// file, changed together through one form. The page lives on the internal
// admin host, so requests get that host's short timeout from the session.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::SiteConfig;
use crate::decode::AdminPageDecoder;
use crate::error::{Error, HttpError, Result};
use crate::paginate::{Page, PageDecoder};
use crate::review::{addon_id_from, flash_message};
use crate::session::{RequestOptions, Session};
use crate::transport::Url;

/// Add-on states as the admin form knows them.
pub const ADDON_STATES: &[(&str, i32)] = &[
    ("incomplete", 0),
    ("waiting", 3),
    ("approved", 4),
    ("disabled", 5),
    ("deleted", 11),
];

/// File states as the admin form knows them.
pub const FILE_STATES: &[(&str, i32)] = &[("waiting", 1), ("approved", 4), ("disabled", 5), ("beta", 7)];

pub const ADDON_APPROVED: i32 = 4;
pub const ADDON_DISABLED: i32 = 5;
pub const ADDON_INCOMPLETE: i32 = 0;
pub const FILE_APPROVED: i32 = 4;
pub const FILE_DISABLED: i32 = 5;
pub const FILE_BETA: i32 = 7;

fn state_name(states: &[(&'static str, i32)], code: i32) -> String {
    states
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(name, _)| name.to_string())
        .unwrap_or_else(|| code.to_string())
}

pub fn addon_state_name(code: i32) -> String {
    state_name(ADDON_STATES, code)
}

pub fn file_state_name(code: i32) -> String {
    state_name(FILE_STATES, code)
}

/// Accept a state either by name or by number.
pub fn parse_addon_state(value: &str) -> Result<i32> {
    if let Ok(code) = value.trim().parse() {
        return Ok(code);
    }
    ADDON_STATES
        .iter()
        .find(|(name, _)| *name == value.trim())
        .map(|(_, code)| *code)
        .ok_or_else(|| Error::InvalidArgument(format!("invalid add-on state {value}")))
}

/// One file row of the manage page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminFile {
    pub date: String,
    pub version: String,
    pub channel: String,
    pub file_id: u64,
    pub platform: String,
    pub status: i32,
    /// Status as loaded, to tell which rows were changed.
    pub original_status: i32,
    pub hash: String,
}

impl AdminFile {
    pub fn changed(&self) -> bool {
        self.status != self.original_status
    }
}

impl fmt::Display for AdminFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<20} ({}, id {}, {:>14}) for {:<13}: {:<8} [{}]",
            self.version,
            self.channel,
            self.file_id,
            self.date,
            self.platform,
            file_state_name(self.status),
            self.hash
        )
    }
}

/// What the admin page decoder reads from one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminPage {
    pub is_first_page: bool,
    pub status: Option<i32>,
    pub token: Option<String>,
    pub files: Vec<AdminFile>,
}

/// States of an add-on and its files, as written by `adminget -f` and read
/// back by `adminchange -f`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: i32,
    /// File id to file state.
    pub files: BTreeMap<String, i32>,
}

pub struct AdminInfo<'s> {
    session: &'s mut Session,
    url: Url,
    pub addon_id: String,
    pub status: i32,
    token: Option<String>,
    /// Oldest first, in the order the pages list them.
    pub files: Vec<AdminFile>,
    pub page: u32,
}

impl<'s> AdminInfo<'s> {
    pub fn new(session: &'s mut Session, site: &SiteConfig, id_or_url: &str) -> Result<Self> {
        let addon_id = addon_id_from(site, id_or_url)?;
        let raw = format!("{}/addon/manage/{}/", site.admin_base(), urlencoding::encode(&addon_id));
        let url = Url::parse(&raw).map_err(|e| Error::InvalidArgument(format!("bad admin url {raw}: {e}")))?;
        Ok(AdminInfo {
            session,
            url,
            addon_id,
            status: -1,
            token: None,
            files: Vec::new(),
            page: 0,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Read the first page only.
    pub fn load(&mut self) -> Result<()> {
        self.files.clear();
        self.page = 0;
        self.fetch_page(1)?;
        Ok(())
    }

    /// Read every page.
    pub fn load_all(&mut self) -> Result<()> {
        self.files.clear();
        self.page = 0;
        while self.fetch_page(self.page + 1)? {}
        Ok(())
    }

    /// Read page `number`; `false` once past the last page.
    pub fn fetch_page(&mut self, number: u32) -> Result<bool> {
        let res = self.session.get(
            &self.url,
            RequestOptions::new()
                .query([("page", number.to_string())])
                .no_redirects(),
        )?;
        if res.status == 302 {
            return Err(flash_message(&res));
        }
        let page = AdminPageDecoder.decode(&Page::from_response(&res))?;
        if number > 1 && page.is_first_page {
            debug!(number, "past the last admin page");
            return Ok(false);
        }

        self.status = page
            .status
            .ok_or_else(|| Error::parse(&res.url, "no add-on status on admin page"))?;
        self.token = page.token;
        self.files.extend(page.files);
        self.page = number;
        Ok(true)
    }

    /// Distinct version names, oldest first.
    pub fn version_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for file in &self.files {
            if !names.contains(&file.version) {
                names.push(file.version.clone());
            }
        }
        names
    }

    /// Set every file of the named versions to `status`. Fails naming the
    /// versions that are not on the page, without changing anything.
    pub fn versions_to_status<S: AsRef<str>>(&mut self, versions: &[S], status: i32) -> Result<()> {
        let wanted: BTreeSet<&str> = versions.iter().map(|v| v.as_ref()).collect();
        let known: BTreeSet<&str> = self.files.iter().map(|f| f.version.as_str()).collect();
        let unknown: Vec<&str> = wanted.difference(&known).copied().collect();
        if !unknown.is_empty() {
            return Err(Error::InvalidArgument(format!("unknown versions: {}", unknown.join(", "))));
        }
        for file in self.files.iter_mut().filter(|f| wanted.contains(f.version.as_str())) {
            file.status = status;
        }
        Ok(())
    }

    /// Apply a snapshot written by `snapshot`; files not in it keep their state.
    pub fn apply_snapshot(&mut self, snapshot: &StatusSnapshot) {
        self.status = snapshot.status;
        for file in &mut self.files {
            if let Some(status) = snapshot.files.get(&file.file_id.to_string()) {
                file.status = *status;
            }
        }
    }

    pub fn snapshot(&self, include_beta: bool) -> StatusSnapshot {
        StatusSnapshot {
            status: self.status,
            files: self
                .files
                .iter()
                .filter(|f| include_beta || f.status != FILE_BETA)
                .map(|f| (f.file_id.to_string(), f.status))
                .collect(),
        }
    }

    /// Refuse add-on and file states that contradict each other.
    pub fn check_status(&self) -> Result<()> {
        let name = addon_state_name;
        let conflict = if self.status == ADDON_APPROVED && self.files.iter().all(|f| f.status == FILE_DISABLED) {
            Some(format!(
                "status is \"{}\" but should be \"{}\" or \"{}\"",
                name(self.status),
                name(ADDON_INCOMPLETE),
                name(ADDON_DISABLED)
            ))
        } else if self.status == ADDON_INCOMPLETE && self.files.iter().any(|f| f.status == FILE_APPROVED) {
            Some(format!(
                "status is \"{}\" but should be \"{}\"",
                name(self.status),
                name(ADDON_APPROVED)
            ))
        } else if self.status == ADDON_DISABLED && self.files.iter().any(|f| f.status != FILE_DISABLED) {
            Some(format!("status is \"{}\" but not all versions are disabled", name(self.status)))
        } else {
            None
        };
        match conflict {
            Some(message) => Err(Error::InvalidArgument(message)),
            None => Ok(()),
        }
    }

    pub fn has_changes(&self) -> bool {
        self.files.iter().any(AdminFile::changed)
    }

    /// The manage formset. With `changed_only`, unchanged rows are left out.
    pub fn form_data(&self, changed_only: bool) -> Result<Vec<(String, String)>> {
        let token = self
            .token
            .clone()
            .ok_or_else(|| Error::InvalidArgument("admin page not loaded yet".into()))?;
        let total = self.files.len().to_string();
        let mut form = vec![
            ("form-TOTAL_FORMS".to_string(), total.clone()),
            ("form-INITIAL_FORMS".to_string(), total),
            ("form-MIN_NUM_FORMS".to_string(), "0".to_string()),
            ("form-MAX_NUM_FORMS".to_string(), "1000".to_string()),
            ("csrfmiddlewaretoken".to_string(), token),
            ("status".to_string(), self.status.to_string()),
        ];
        let rows = self.files.iter().filter(|f| !changed_only || f.changed());
        for (index, file) in rows.enumerate() {
            form.push((format!("form-{index}-id"), file.file_id.to_string()));
            form.push((format!("form-{index}-status"), file.status.to_string()));
        }
        Ok(form)
    }

    pub fn save(&mut self, changed_only: bool) -> Result<()> {
        let form = self.form_data(changed_only)?;
        info!(addon = %self.addon_id, status = self.status, "saving admin changes");
        let url = self.url.clone();
        let res = self
            .session
            .post(&url, RequestOptions::new().form(form).no_redirects())?;
        if res.status != 200 {
            return Err(HttpError::new(res.status, &res.url, res.text()).into());
        }
        for file in &mut self.files {
            file.original_status = file.status;
        }
        Ok(())
    }
}
