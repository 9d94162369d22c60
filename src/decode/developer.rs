// Developer hub versions page: the form token and the existing versions.

use super::{attr, csrf_token, select_all, text};
use crate::error::Result;
use crate::paginate::{Page, PageDecoder};
use crate::upload::{VersionLink, VersionsPage};

#[derive(Debug, Clone, Copy, Default)]
pub struct VersionsPageDecoder;

impl PageDecoder for VersionsPageDecoder {
    type Output = VersionsPage;

    fn decode(&self, page: &Page) -> Result<VersionsPage> {
        let doc = page.document();
        let mut versions = Vec::new();
        for link in select_all(page, doc.root_element(), ".item_wrapper a")? {
            let Some(href) = attr(link, "href") else {
                continue;
            };
            versions.push(VersionLink {
                text: text(link),
                url: page.join(&href)?.to_string(),
            });
        }
        Ok(VersionsPage {
            token: csrf_token(page, &doc)?,
            versions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Url;

    #[test]
    fn test_versions_page() {
        let page = Page::new(
            Url::parse("https://addons.mozilla.org/en-US/developers/addon/foo/versions").unwrap(),
            r#"<form><input type="hidden" name="csrfmiddlewaretoken" value="tok"></form>
               <div class="item_wrapper"><a href="/en-US/developers/addon/foo/versions/123">Version 1.2</a></div>
               <div class="item_wrapper"><a href="/en-US/developers/addon/foo/versions/99">Version 1.1</a></div>"#,
        );
        let decoded = VersionsPageDecoder.decode(&page).unwrap();
        assert_eq!(decoded.token.as_deref(), Some("tok"));
        assert_eq!(decoded.versions.len(), 2);
        assert_eq!(decoded.versions[0].text, "Version 1.2");
        assert_eq!(
            decoded.versions[0].url,
            "https://addons.mozilla.org/en-US/developers/addon/foo/versions/123"
        );
    }
}
