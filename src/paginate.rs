// Pagination engine: walks "next" links until a listing runs out.
//
// The engine only knows URLs and item counts. What a page contains, and
// where its next link is, is up to the page function or `PageDecoder`
// handed in, so the same loop serves queues, logs and review history.

use std::collections::HashSet;

use scraper::Html;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::session::{RequestOptions, Session};
use crate::transport::{Url, WireResponse};

/// A fetched document and the URL it was finally served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub url: Url,
    pub body: String,
}

impl Page {
    pub fn new(url: Url, body: impl Into<String>) -> Self {
        Page { url, body: body.into() }
    }

    pub fn from_response(res: &WireResponse) -> Self {
        Page::new(res.url.clone(), res.text())
    }

    pub fn document(&self) -> Html {
        Html::parse_document(&self.body)
    }

    /// Resolve a link found on this page.
    pub fn join(&self, href: &str) -> Result<Url> {
        self.url
            .join(href)
            .map_err(|e| Error::parse(&self.url, format!("bad link {href:?}: {e}")))
    }
}

/// Items of one listing page and the link to the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

/// Turns one page into typed records.
pub trait PageDecoder {
    type Output;

    fn decode(&self, page: &Page) -> Result<Self::Output>;
}

/// Anything that can fetch a page, usually the session.
pub trait PageFetcher {
    fn fetch_page(&mut self, url: &Url, params: &[(String, String)]) -> Result<Page>;
}

impl PageFetcher for Session {
    fn fetch_page(&mut self, url: &Url, params: &[(String, String)]) -> Result<Page> {
        let res = self.get(url, RequestOptions::new().query(params.iter().cloned()))?;
        Ok(Page::from_response(&res))
    }
}

/// Collect items from `start` onwards.
///
/// `page_fn` appends the items of a page to the accumulator and returns
/// the next link, relative links being resolved against the page. `params`
/// go on the first request only. Collection stops when there is no next
/// link, when `limit` items are collected, when a page adds nothing and
/// has no next link, or when a link leads back to a page already read.
pub fn collect<T, P, F>(
    fetcher: &mut P,
    start: Url,
    params: &[(String, String)],
    limit: Option<usize>,
    mut page_fn: F,
) -> Result<Vec<T>>
where
    P: PageFetcher + ?Sized,
    F: FnMut(&mut Vec<T>, &Page) -> Result<Option<String>>,
{
    let mut items = Vec::new();
    let mut params = params.to_vec();
    let mut visited = HashSet::new();
    let mut fetched = 0usize;
    let mut next = Some(start);

    while let Some(url) = next.take() {
        if limit.map_or(false, |limit| items.len() >= limit) {
            break;
        }
        if !visited.insert(url.to_string()) {
            warn!(%url, "next link leads back to a page already read, stopping");
            break;
        }

        let page = fetcher.fetch_page(&url, &params)?;
        params.clear();
        fetched += 1;

        let before = items.len();
        let link = page_fn(&mut items, &page)?;
        debug!(%url, added = items.len() - before, more = link.is_some(), "page collected");

        if items.len() == before && link.is_none() {
            if fetched > 1 {
                warn!(%url, "page had no entries and no next link, stopping");
            }
            break;
        }
        if let Some(limit) = limit {
            if items.len() > limit {
                items.truncate(limit);
                break;
            }
        }
        next = link.map(|href| page.join(&href)).transpose()?;
    }
    Ok(items)
}

/// `collect` driven by a listing decoder.
pub fn collect_listing<T, P, D>(
    fetcher: &mut P,
    decoder: &D,
    start: Url,
    params: &[(String, String)],
    limit: Option<usize>,
) -> Result<Vec<T>>
where
    P: PageFetcher + ?Sized,
    D: PageDecoder<Output = Listing<T>> + ?Sized,
{
    collect(fetcher, start, params, limit, |items, page| {
        let listing = decoder.decode(page)?;
        items.extend(listing.items);
        Ok(listing.next)
    })
}
