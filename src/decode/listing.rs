// Review queue and review log tables.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::America::Los_Angeles;
use regex::Regex;

use super::{attr, child_elements, own_text, select_all, select_first, tail_text, text, unquote};
use crate::error::{Error, Result};
use crate::listing::{LogEntry, QueueEntry};
use crate::paginate::{Listing, Page, PageDecoder};

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueDecoder;

impl PageDecoder for QueueDecoder {
    type Output = Listing<QueueEntry>;

    fn decode(&self, page: &Page) -> Result<Listing<QueueEntry>> {
        let doc = page.document();
        let root = doc.root_element();

        let mut items = Vec::new();
        for row in select_all(page, root, "#addon-queue > tbody > .addon-row")? {
            let addon_num = attr(row, "data-addon")
                .unwrap_or_default()
                .replace("addon-", "");
            let cells = child_elements(row);
            let [_, link_cell, type_cell, age_cell, ..] = cells.as_slice() else {
                return Err(Error::parse(&page.url, "queue row has too few cells"));
            };
            let anchor = child_elements(*link_cell)
                .into_iter()
                .next()
                .ok_or_else(|| Error::parse(&page.url, "queue row without link"))?;
            let href = attr(anchor, "href").unwrap_or_default();
            let version = child_elements(anchor)
                .first()
                .map(|el| text(*el))
                .unwrap_or_default();

            items.push(QueueEntry {
                addon_num,
                addon_id: unquote(href.trim_end_matches('/').rsplit('/').next().unwrap_or_default()),
                url: page.join(&href)?.to_string(),
                name: own_text(anchor),
                version,
                addon_type: text(*type_cell),
                age: text(*age_cell),
            });
        }

        let next = select_first(page, root, r#".data-grid-top > .pagination > li > a[rel="next"]"#)?
            .and_then(|a| attr(a, "href"));
        Ok(Listing { items, next })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogDecoder;

impl PageDecoder for LogDecoder {
    type Output = Listing<LogEntry>;

    fn decode(&self, page: &Page) -> Result<Listing<LogEntry>> {
        let doc = page.document();
        let root = doc.root_element();

        let mut items = Vec::new();
        for row in select_all(page, root, "#log-listing > tbody > tr[data-addonid]")? {
            let cells = child_elements(row);
            let [date_cell, message_cell, reviewer_cell, ..] = cells.as_slice() else {
                return Err(Error::parse(&page.url, "log row has too few cells"));
            };
            let parts = child_elements(*message_cell);
            let [name, action, ..] = parts.as_slice() else {
                return Err(Error::parse(&page.url, "log message without add-on and action"));
            };
            let href = attr(*action, "href").unwrap_or_default();

            items.push(LogEntry {
                addon_num: attr(row, "data-addonid").unwrap_or_default(),
                date: parse_site_date(&text(*date_cell))
                    .map_err(|reason| Error::parse(&page.url, reason))?,
                addon_name: own_text(*name),
                addon_id: unquote(href.trim_end_matches('/').rsplit('/').next().unwrap_or_default()),
                url: page.join(&href)?.to_string(),
                version: tail_text(*name),
                reviewer: text(*reviewer_cell),
                action: text(*action),
            });
        }

        let next = select_first(page, root, r#".pagination > li > a[rel="next"]"#)?.and_then(|a| attr(a, "href"));
        Ok(Listing { items, next })
    }
}

// "9 AM" has no minutes, which chrono will not parse. The hour must not
// follow a colon or "3:04 PM" would get a second set of minutes.
static HOUR_ONLY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[ ,])(\d{1,2}) (AM|PM)$").expect("HOUR_ONLY_RE should compile"));

const SITE_DATE_FORMATS: &[&str] = &[
    "%B %d, %Y, %I:%M %p",
    "%B %d, %Y %I:%M %p",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parse a date as the site prints it ("Sept. 3, 2020, 4:05 p.m."), in the
/// site's own time zone.
pub(crate) fn parse_site_date(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    let normalized = raw
        .trim()
        .replace("a.m.", "AM")
        .replace("p.m.", "PM")
        .replace("noon", "12:00 PM")
        .replace("midnight", "12:00 AM")
        .replace("Sept.", "Sep.")
        .replace('.', "");
    let normalized = HOUR_ONLY_RE.replace(&normalized, "${1}${2}:00 ${3}");
    let naive = SITE_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&normalized, format).ok())
        .ok_or_else(|| format!("unrecognized date {raw:?}"))?;
    Los_Angeles
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| format!("date {raw:?} does not exist in the site's time zone"))
}
