// Review queues and the review log.

use std::fmt;

use chrono::{DateTime, Days, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::America::Los_Angeles;
use serde::Serialize;
use tracing::debug;

use crate::config::SiteConfig;
use crate::decode::{LogDecoder, QueueDecoder};
use crate::error::{Error, Result};
use crate::paginate::{collect, collect_listing, PageDecoder, PageFetcher};
use crate::transport::Url;

/// Short queue names and the pages they stand for.
pub const QUEUES: &[(&str, &str)] = &[
    ("new", "queue/new"),
    ("updates", "queue/updates"),
    ("unlisted/nominated", "unlisted_queue/nominated"),
    ("unlisted/pending", "unlisted_queue/pending"),
];

pub const DEFAULT_QUEUE: &str = "new";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub addon_num: String,
    pub addon_id: String,
    pub url: String,
    pub name: String,
    pub version: String,
    pub addon_type: String,
    pub age: String,
}

impl fmt::Display for QueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<10} - {} {} [{}]", self.age, self.name, self.version, self.addon_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub addon_num: String,
    pub date: DateTime<Utc>,
    pub addon_name: String,
    pub addon_id: String,
    pub url: String,
    pub version: String,
    pub reviewer: String,
    pub action: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:<20} {:<25} {:<30} {} {}",
            self.date.with_timezone(&Local).format("%Y-%m-%d %I:%M:%S"),
            self.reviewer,
            self.action,
            self.addon_id,
            self.addon_name,
            self.version
        )
    }
}

/// Sort keys accepted for log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSortKey {
    Date,
    AddonName,
    Version,
    Reviewer,
    Action,
}

impl std::str::FromStr for LogSortKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "date" => Ok(LogSortKey::Date),
            "addonname" => Ok(LogSortKey::AddonName),
            "version" => Ok(LogSortKey::Version),
            "reviewer" => Ok(LogSortKey::Reviewer),
            "action" => Ok(LogSortKey::Action),
            other => Err(Error::InvalidArgument(format!("unknown sort key {other}"))),
        }
    }
}

pub fn sort_logs(entries: &mut [LogEntry], key: LogSortKey) {
    match key {
        LogSortKey::Date => entries.sort_by_key(|e| e.date),
        LogSortKey::AddonName => entries.sort_by(|a, b| a.addon_name.cmp(&b.addon_name)),
        LogSortKey::Version => entries.sort_by(|a, b| a.version.cmp(&b.version)),
        LogSortKey::Reviewer => entries.sort_by(|a, b| a.reviewer.cmp(&b.reviewer)),
        LogSortKey::Action => entries.sort_by(|a, b| a.action.cmp(&b.action)),
    }
}

/// Page path of a queue: an alias, a full queue path or a link to it.
pub fn queue_path(site: &SiteConfig, name_or_url: &str) -> Result<String> {
    let name = if site.owns(name_or_url) {
        let segments: Vec<&str> = name_or_url
            .trim_end_matches('/')
            .rsplit('/')
            .take(2)
            .collect();
        match segments.as_slice() {
            [last, parent] => format!("{parent}/{last}"),
            _ => return Err(Error::InvalidArgument(format!("not a queue url: {name_or_url}"))),
        }
    } else {
        name_or_url.to_string()
    };

    QUEUES
        .iter()
        .find(|(alias, path)| *alias == name || *path == name)
        .map(|(_, path)| path.to_string())
        .ok_or_else(|| {
            let known: Vec<&str> = QUEUES.iter().map(|(alias, _)| *alias).collect();
            Error::InvalidArgument(format!("unknown queue {name}, expected one of {}", known.join(", ")))
        })
}

pub fn get_queue<P: PageFetcher + ?Sized>(fetcher: &mut P, site: &SiteConfig, name_or_url: &str) -> Result<Vec<QueueEntry>> {
    let url = site_url(&format!("{}/{}", site.editor_base(), queue_path(site, name_or_url)?))?;
    collect_listing(fetcher, &QueueDecoder, url, &[], None)
}

/// Time range of a log query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogRange {
    pub start: Option<DateTime<Utc>>,
    /// Inclusive.
    pub end: Option<DateTime<Utc>>,
}

impl LogRange {
    /// Build a range from wall clock times in `tz`. An end at midnight means
    /// the whole of that day.
    pub fn from_local<Tz: TimeZone>(start: Option<NaiveDateTime>, end: Option<NaiveDateTime>, tz: &Tz) -> Result<Self> {
        let to_utc = |at: NaiveDateTime| {
            tz.from_local_datetime(&at)
                .earliest()
                .map(|local| local.with_timezone(&Utc))
                .ok_or_else(|| Error::InvalidArgument(format!("{at} does not exist in the local time zone")))
        };
        let end = match end {
            Some(at) if at.time() == NaiveTime::MIN => Some(
                at.checked_add_days(Days::new(1))
                    .ok_or_else(|| Error::InvalidArgument(format!("end date {at} out of range")))?,
            ),
            other => other,
        };
        Ok(LogRange {
            start: start.map(to_utc).transpose()?,
            end: end.map(to_utc).transpose()?,
        })
    }

    /// Query parameters, as dates in the site's time zone.
    pub fn params(&self) -> Vec<(String, String)> {
        let day = |at: DateTime<Utc>| at.with_timezone(&Los_Angeles).format("%Y-%m-%d").to_string();
        let mut params = Vec::new();
        if let Some(start) = self.start {
            params.push(("start".to_string(), day(start)));
        }
        if let Some(end) = self.end {
            params.push(("end".to_string(), day(end)));
        }
        params
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at <= end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    /// Which log, e.g. "reviewlog".
    pub list: String,
    pub search: Option<String>,
    pub range: LogRange,
    pub limit: Option<usize>,
}

impl Default for LogQuery {
    fn default() -> Self {
        LogQuery {
            list: "reviewlog".into(),
            search: None,
            range: LogRange::default(),
            limit: None,
        }
    }
}

pub fn get_logs<P: PageFetcher + ?Sized>(fetcher: &mut P, site: &SiteConfig, query: &LogQuery) -> Result<Vec<LogEntry>> {
    let url = site_url(&format!("{}/{}", site.editor_base(), query.list))?;
    let mut params = Vec::new();
    if let Some(search) = &query.search {
        params.push(("search".to_string(), search.clone()));
    }
    params.extend(query.range.params());
    debug!(?params, "fetching logs");

    let range = query.range;
    collect(fetcher, url, &params, query.limit, |logs, page| {
        let listing = LogDecoder.decode(page)?;
        logs.extend(listing.items.into_iter().filter(|entry| range.contains(entry.date)));
        Ok(listing.next)
    })
}

/// Parse a date or date and time typed on the command line.
pub fn parse_local_time(input: &str) -> Result<NaiveDateTime> {
    let input = input.trim();
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(at) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(at);
        }
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .map(|day| day.and_time(NaiveTime::MIN))
        .map_err(|_| Error::InvalidArgument(format!("cannot read {input:?} as a date, use YYYY-MM-DD [HH:MM]")))
}

/// Drop consecutive duplicates, keeping the first.
pub fn uniq<T: PartialEq>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::new();
    for item in items {
        if out.last() != Some(&item) {
            out.push(item);
        }
    }
    out
}

fn site_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::InvalidArgument(format!("bad url {raw}: {e}")))
}
