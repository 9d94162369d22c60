// Admin manage page: add-on status and one row per file. A row with seven
// cells opens a version; the rows after it only carry the file columns and
// share the version's date and channel.

use scraper::ElementRef;

use super::{attr, child_elements, csrf_token, select_all, select_first, text};
use crate::admin::{AdminFile, AdminPage};
use crate::error::{Error, Result};
use crate::paginate::{Page, PageDecoder};

#[derive(Debug, Clone, Copy, Default)]
pub struct AdminPageDecoder;

impl PageDecoder for AdminPageDecoder {
    type Output = AdminPage;

    fn decode(&self, page: &Page) -> Result<AdminPage> {
        let doc = page.document();
        let root = doc.root_element();

        let is_first_page = select_first(page, root, ".pagination > li.selected > a")?
            .map_or(true, |current| text(current) == "1");

        let status = select_first(page, root, "form > p > select > option[selected]")?
            .and_then(|option| attr(option, "value"))
            .map(|value| parse_number(page, &value))
            .transpose()?;

        let mut files = Vec::new();
        let mut head: Option<ElementRef<'_>> = None;
        for row in select_all(page, root, "form > table > tbody > tr")? {
            let cells = child_elements(row);
            if cells.len() == 7 {
                head = Some(row);
            }
            let head_cells = match head {
                Some(head) => child_elements(head),
                None => return Err(Error::parse(&page.url, "file row before any version row")),
            };
            files.push(decode_file(page, &head_cells, &cells)?);
        }

        Ok(AdminPage {
            is_first_page,
            status,
            token: csrf_token(page, &doc)?,
            files,
        })
    }
}

fn decode_file(page: &Page, head: &[ElementRef<'_>], row: &[ElementRef<'_>]) -> Result<AdminFile> {
    let [date, version, channel, ..] = head else {
        return Err(Error::parse(&page.url, "version row has too few cells"));
    };
    let (file, platform, status, hash) = match row {
        [_, _, _, file, platform, status, hash] | [_, file, platform, status, hash] => (file, platform, status, hash),
        _ => return Err(Error::parse(&page.url, format!("file row with {} cells", row.len()))),
    };

    let first_child_text = |cell: &ElementRef<'_>| child_elements(*cell).first().map(|el| text(*el));

    let file_id = first_child_text(file)
        .ok_or_else(|| Error::parse(&page.url, "file cell without id"))?
        .parse()
        .map_err(|e| Error::parse(&page.url, format!("file id: {e}")))?;
    let status = select_first(page, *status, "option[selected]")?
        .and_then(|option| attr(option, "value"))
        .ok_or_else(|| Error::parse(&page.url, "file without selected status"))?;
    let status = parse_number(page, &status)?;

    Ok(AdminFile {
        date: text(*date),
        version: first_child_text(version).unwrap_or_else(|| text(*version)),
        channel: text(*channel),
        file_id,
        platform: text(*platform),
        status,
        original_status: status,
        hash: child_elements(*hash)
            .first()
            .and_then(|el| attr(*el, "title"))
            .unwrap_or_default(),
    })
}

fn parse_number(page: &Page, value: &str) -> Result<i32> {
    value
        .trim()
        .parse()
        .map_err(|e| Error::parse(&page.url, format!("status {value:?}: {e}")))
}
