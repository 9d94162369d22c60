// Page decoders: the only code that knows what the site's HTML looks like.
//
// Each decoder turns one fetched `Page` into typed records. The paging,
// review and upload logic never looks at markup, so a change on the site
// means a change here and nowhere else.

pub mod admin;
pub mod developer;
pub mod listing;
pub mod login;
pub mod review;

use scraper::{ElementRef, Html, Selector};

use crate::error::{Error, Result};
use crate::paginate::Page;

pub use admin::AdminPageDecoder;
pub use developer::VersionsPageDecoder;
pub use listing::{LogDecoder, QueueDecoder};
pub use login::{FxaConfig, LoginForm};
pub use review::ReviewPageDecoder;

/// Compile a selector. All selectors in this module are literals, so a
/// failure here is a bug, reported as a parse error of the page at hand.
pub(crate) fn selector(page: &Page, css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Error::parse(&page.url, format!("bad selector {css:?}: {e}")))
}

pub(crate) fn select_first<'a>(
    page: &Page,
    root: ElementRef<'a>,
    css: &str,
) -> Result<Option<ElementRef<'a>>> {
    Ok(root.select(&selector(page, css)?).next())
}

pub(crate) fn select_all<'a>(page: &Page, root: ElementRef<'a>, css: &str) -> Result<Vec<ElementRef<'a>>> {
    Ok(root.select(&selector(page, css)?).collect())
}

/// Like `select_first`, but the element has to be there.
pub(crate) fn require<'a>(page: &Page, root: ElementRef<'a>, css: &str) -> Result<ElementRef<'a>> {
    select_first(page, root, css)?.ok_or_else(|| Error::parse(&page.url, format!("missing {css}")))
}

/// All text below an element, whitespace trimmed.
pub(crate) fn text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Text directly inside an element, before its first child element.
pub(crate) fn own_text(el: ElementRef<'_>) -> String {
    el.children()
        .map_while(|node| node.value().as_text().map(|t| t.to_string()))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Text right after an element, up to the next element.
pub(crate) fn tail_text(el: ElementRef<'_>) -> String {
    el.next_siblings()
        .map_while(|node| node.value().as_text().map(|t| t.to_string()))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Child elements, skipping text and comments.
pub(crate) fn child_elements(el: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    el.children().filter_map(ElementRef::wrap).collect()
}

pub(crate) fn next_element(el: ElementRef<'_>) -> Option<ElementRef<'_>> {
    el.next_siblings().find_map(ElementRef::wrap)
}

pub(crate) fn attr(el: ElementRef<'_>, name: &str) -> Option<String> {
    el.value().attr(name).map(str::to_string)
}

/// Anti-forgery token of the first form on the page.
pub(crate) fn csrf_token(page: &Page, doc: &Html) -> Result<Option<String>> {
    Ok(select_first(page, doc.root_element(), r#"form input[name="csrfmiddlewaretoken"]"#)?
        .and_then(|input| attr(input, "value")))
}

/// Path segment `offset` places from the end, `1` being the last one.
/// Trailing slashes do not count as a segment.
pub(crate) fn segment_from_end(href: &str, offset: usize) -> Option<String> {
    let path = href.split(['?', '#']).next().unwrap_or(href);
    let segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();
    segments
        .len()
        .checked_sub(offset)
        .and_then(|i| segments.get(i))
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Percent-decode an id taken from a URL.
pub(crate) fn unquote(value: &str) -> String {
    urlencoding::decode(value)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| value.to_string())
}
