// Reviewer page of an add-on: identity, moderation token, available
// actions and one block per version with its files.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;

use super::{
    attr, child_elements, csrf_token, next_element, own_text, require, segment_from_end, select_all,
    select_first, tail_text, text, unquote,
};
use crate::error::{Error, Result};
use crate::paginate::{Page, PageDecoder};
use crate::review::{FileRecord, ReviewPage, VersionRecord};

static APP_SPRITE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ed-sprite-(\w+)").expect("APP_SPRITE_RE should compile"));

// Tables get an implicit tbody from the HTML parser.
const VERSION_HEADERS: &str = ".review-files > .listing-header, .review-files > tbody > .listing-header, \
     #review-files > .listing-header, #review-files > tbody > .listing-header";

#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewPageDecoder;

impl PageDecoder for ReviewPageDecoder {
    type Output = ReviewPage;

    fn decode(&self, page: &Page) -> Result<ReviewPage> {
        let doc = page.document();
        let root = doc.root_element();

        let name = text(require(page, root, "h2.addon span:first-of-type")?);
        let name = name.strip_prefix("Review ").unwrap_or(&name).to_string();

        let addon_id = attr(require(page, root, "#addon")?, "data-id")
            .ok_or_else(|| Error::parse(&page.url, "#addon has no data-id"))?;

        let slug = match select_first(page, root, ".file-info > .light > a:not([title])")? {
            Some(link) => attr(link, "href"),
            None => select_first(page, root, "#actions-addon > li > a[href$='/edit']")?
                .and_then(|link| attr(link, "href")),
        }
        .and_then(|href| segment_after(&href, "addon"))
        .map(|slug| unquote(&slug));

        let actions = select_all(page, root, r#"[name="action"]"#)?
            .into_iter()
            .filter_map(|input| attr(input, "value"))
            .collect();

        let enabled_versions = select_all(page, root, "#id_versions > option")?
            .into_iter()
            .filter_map(|option| attr(option, "value"))
            .collect();

        let version_ids: HashMap<String, String> = select_all(page, root, "#id_versions option")?
            .into_iter()
            .filter_map(|option| Some((text(option), attr(option, "value")?)))
            .collect();

        let counts: Vec<u64> = select_all(page, root, "strong.downloads")?
            .into_iter()
            .map(|node| text(node).replace(',', "").parse().unwrap_or(0))
            .collect();

        let is_first_page = select_first(
            page,
            root,
            ".review-files-paginate > .pagination > li > strong:first-of-type, \
             #review-files-paginate > .pagination > li > strong:first-of-type",
        )?
        .map_or(true, |current| text(current) == "1");

        let mut versions = Vec::new();
        for head in select_all(page, root, VERSION_HEADERS)? {
            let body = next_element(head)
                .ok_or_else(|| Error::parse(&page.url, "version header without files"))?;
            versions.push(decode_version(page, head, body, &version_ids)?);
        }

        let developers = select_all(page, root, r#"#scroll_sidebar ul:not([id]) a[href*="/user/"]"#)?
            .into_iter()
            .filter_map(|link| attr(link, "href"))
            .filter_map(|href| segment_after(&href, "user"))
            .collect();

        Ok(ReviewPage {
            addon_id,
            name,
            slug,
            token: csrf_token(page, &doc)?,
            actions,
            enabled_versions,
            developers,
            downloads: counts.first().copied().unwrap_or(0),
            users: counts.get(1).copied().unwrap_or(0),
            is_first_page,
            versions,
        })
    }
}

fn decode_version(
    page: &Page,
    head: ElementRef<'_>,
    body: ElementRef<'_>,
    version_ids: &HashMap<String, String>,
) -> Result<VersionRecord> {
    // "Version 1.2 · Jan. 5, 2020"
    let title = child_elements(head)
        .first()
        .map(|cell| own_text(*cell))
        .unwrap_or_default();
    let words: Vec<&str> = title.split_whitespace().collect();
    let (version, date) = match words.as_slice() {
        [_, version, _, month, day, year, ..] => (version.to_string(), format!("{month} {day} {year}")),
        _ => return Err(Error::parse(&page.url, format!("unexpected version header {title:?}"))),
    };

    let lights = select_all(page, head, "th .light")?;
    let confirmed = lights.get(1).map_or(false, |light| text(*light) == "(Confirmed)");

    let mut files = Vec::new();
    for info in select_all(page, body, ".file-info")? {
        files.push(decode_file(page, info)?);
    }

    let mut id = version_ids.get(&version).cloned();
    if id.is_none() {
        // Deleted versions are not in the version list, the code manager
        // link still has their id.
        if let Some(info) = select_first(page, body, ".file-info")? {
            id = select_first(page, info, "a[href^='https://code.addons.mozilla.org']")?
                .and_then(|link| attr(link, "href"))
                .and_then(|href| segment_from_end(&href, 1));
        }
    }

    let sources = match select_first(page, body, ".files > div > a[href]")?.and_then(|a| attr(a, "href")) {
        Some(href) => Some(page.join(&href)?.to_string()),
        None => None,
    };

    let apps = select_all(page, body, ".files > ul > li > .app-icon")?
        .into_iter()
        .filter_map(|icon| attr(icon, "class"))
        .filter_map(|class| APP_SPRITE_RE.captures(&class).map(|caps| caps[1].to_string()))
        .collect();

    Ok(VersionRecord {
        version,
        date,
        confirmed,
        id,
        files,
        sources,
        apps,
        source_path: None,
        source_file_name: None,
    })
}

fn decode_file(page: &Page, info: ElementRef<'_>) -> Result<FileRecord> {
    let install = require(page, info, ".reviewers-install")?;
    let href = attr(install, "href").ok_or_else(|| Error::parse(&page.url, "install link without href"))?;
    let url = page.join(&href)?;

    let mut platforms: Vec<String> = own_text(install)
        .split(" / ")
        .map(|label| platform_name(label.trim()))
        .collect();
    if ["linux", "mac", "windows"]
        .iter()
        .all(|p| platforms.iter().any(|have| have == p))
    {
        platforms = vec!["all".to_string()];
    }

    let status = own_text(require(page, info, ".light > div")?);
    let permissions = select_first(page, info, ".file-permissions strong")?.map(tail_text);

    let path = url.path();
    let file_name = segment_from_end(path, 1)
        .ok_or_else(|| Error::parse(&page.url, format!("no file name in {href}")))?;
    let file_id = segment_from_end(path, 3)
        .ok_or_else(|| Error::parse(&page.url, format!("no file id in {href}")))?;

    Ok(FileRecord {
        url: url.to_string(),
        platforms,
        status,
        permissions,
        file_name,
        file_id,
        saved_path: None,
    })
}

fn platform_name(label: &str) -> String {
    match label {
        "Linux" => "linux".into(),
        "Mac OS X" => "mac".into(),
        "Windows" => "windows".into(),
        // Themes just say "Download".
        "All Platforms" | "Download" => "all".into(),
        "Android" => "android".into(),
        other => other.to_lowercase(),
    }
}

/// The path segment following `marker`, e.g. the slug in
/// `/en-US/developers/addon/<slug>/edit`.
fn segment_after(href: &str, marker: &str) -> Option<String> {
    let path = href.split(['?', '#']).next().unwrap_or(href);
    let mut segments = path.split('/');
    segments.find(|s| *s == marker)?;
    segments.next().filter(|s| !s.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Url;

    const REVIEW_PAGE: &str = r##"<html><body>
      <h2 class="addon"><span>Review My Addon</span><span>(listed)</span></h2>
      <div id="addon" data-id="4242"></div>
      <strong class="downloads">1,234</strong><strong class="downloads">56</strong>
      <div id="scroll_sidebar"><ul><li><a href="/en-US/reviewers/user/77/">Dev</a></li></ul></div>
      <div class="review-files-paginate"><ol class="pagination">
        <li><strong>2</strong></li><li><a href="?page=3">3</a></li>
      </ol></div>
      <table class="review-files">
        <tr class="listing-header"><th>Version 1.0 &middot; Jan. 5, 2020 <span class="light">x</span><span class="light">(Confirmed)</span></th></tr>
        <tr class="listing-body"><td>
          <div class="files">
            <ul><li class="file-info">
              <a class="reviewers-install" href="/en-US/firefox/files/901/type:attachment/my_addon-1.0.xpi">Linux / Mac OS X / Windows</a>
              <div class="light"><div>Approved</div><a href="/en-US/firefox/addon/my-addon/versions/">v</a></div>
              <div class="file-permissions"><strong>Permissions:</strong> tabs, storage</div>
            </li></ul>
            <div><a href="/en-US/reviewers/download-source/11">Download sources</a></div>
            <ul><li><span class="app-icon ed-sprite-firefox"></span></li></ul>
          </div>
        </td></tr>
        <tr class="listing-header"><th>Version 1.1 &middot; Feb. 1, 2020 <span class="light">x</span><span class="light">(Awaiting Review)</span></th></tr>
        <tr class="listing-body"><td>
          <div class="files">
            <ul><li class="file-info">
              <a class="reviewers-install" href="/en-US/firefox/files/902/type:attachment/my_addon-1.1.xpi">Android</a>
              <div class="light"><div>Awaiting Review</div></div>
              <a href="https://code.addons.mozilla.org/browse/4242/versions/555/">code</a>
            </li></ul>
          </div>
        </td></tr>
      </table>
      <form method="post"><input name="csrfmiddlewaretoken" value="t0k">
        <input type="radio" name="action" value="public"><input type="radio" name="action" value="reject">
        <select id="id_versions" name="versions"><option value="321">1.0</option></select>
      </form>
    </body></html>"##;

    fn decode(body: &str) -> ReviewPage {
        let url = Url::parse("https://reviewers.addons.mozilla.org/en-US/reviewers/review-listed/4242").unwrap();
        ReviewPageDecoder.decode(&Page::new(url, body)).unwrap()
    }

    #[test]
    fn test_identity() {
        let page = decode(REVIEW_PAGE);
        assert_eq!(page.name, "My Addon");
        assert_eq!(page.addon_id, "4242");
        assert_eq!(page.slug.as_deref(), Some("my-addon"));
        assert_eq!(page.token.as_deref(), Some("t0k"));
        assert_eq!(page.actions, ["public", "reject"]);
        assert_eq!(page.enabled_versions, ["321"]);
        assert_eq!(page.developers, ["77"]);
        assert_eq!((page.downloads, page.users), (1234, 56));
        assert!(!page.is_first_page);
    }

    #[test]
    fn test_versions_and_files() {
        let page = decode(REVIEW_PAGE);
        assert_eq!(page.versions.len(), 2);

        let v1 = &page.versions[0];
        assert_eq!(v1.version, "1.0");
        assert_eq!(v1.date, "Jan. 5, 2020");
        assert!(v1.confirmed);
        assert_eq!(v1.id.as_deref(), Some("321"));
        assert_eq!(v1.apps, ["firefox"]);
        assert_eq!(
            v1.sources.as_deref(),
            Some("https://reviewers.addons.mozilla.org/en-US/reviewers/download-source/11")
        );
        let file = &v1.files[0];
        assert_eq!(file.platforms, ["all"]);
        assert_eq!(file.status, "Approved");
        assert_eq!(file.permissions.as_deref(), Some("tabs, storage"));
        assert_eq!(file.file_name, "my_addon-1.0.xpi");
        assert_eq!(file.file_id, "901");

        let v2 = &page.versions[1];
        assert!(!v2.confirmed);
        assert_eq!(v2.id.as_deref(), Some("555"));
        assert_eq!(v2.files[0].platforms, ["android"]);
        assert_eq!(v2.files[0].permissions, None);
        assert_eq!(v2.sources, None);
    }

    #[test]
    fn test_page_without_pagination_is_first() {
        let page = decode(r#"<h2 class="addon"><span>Review X</span></h2><div id="addon" data-id="1"></div>"#);
        assert!(page.is_first_page);
        assert!(page.versions.is_empty());
        assert_eq!(page.slug, None);
    }

    #[test]
    fn test_missing_identity_is_parse_error() {
        let url = Url::parse("https://reviewers.addons.mozilla.org/x").unwrap();
        let err = ReviewPageDecoder.decode(&Page::new(url, "<html></html>")).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }
}
