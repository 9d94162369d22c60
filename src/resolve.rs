// Version tags: "latest", "previous", "latestwx" or a version number,
// resolved against the review history. Tags are answered from what is
// already loaded when possible; otherwise older pages are pulled in one
// at a time until the tag resolves or the history runs out.

use std::fmt;
use std::str::FromStr;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::paginate::PageDecoder;
use crate::review::{Review, ReviewPage, VersionRecord};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionTag {
    /// The newest version.
    Latest,
    /// The newest version that has a file asking for permissions.
    LatestWithPermissions,
    /// The newest confirmed version before the latest one.
    Previous,
    Exact(String),
}

impl FromStr for VersionTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim() {
            "" => return Err(Error::InvalidArgument("empty version".into())),
            "latest" => VersionTag::Latest,
            "latestwx" => VersionTag::LatestWithPermissions,
            "previous" => VersionTag::Previous,
            other => VersionTag::Exact(other.to_string()),
        })
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionTag::Latest => f.write_str("latest"),
            VersionTag::LatestWithPermissions => f.write_str("latestwx"),
            VersionTag::Previous => f.write_str("previous"),
            VersionTag::Exact(version) => f.write_str(version),
        }
    }
}

/// Resolve a tag against `versions` (oldest first) without fetching.
pub fn resolve_tag<'a>(tag: &VersionTag, versions: &'a [VersionRecord]) -> Option<&'a VersionRecord> {
    match tag {
        VersionTag::Latest => versions.last(),
        VersionTag::LatestWithPermissions => versions
            .iter()
            .rev()
            .find(|v| v.files.iter().any(|file| file.has_permissions())),
        VersionTag::Previous => {
            let (_, older) = versions.split_last()?;
            older.iter().rev().find(|v| v.confirmed)
        }
        VersionTag::Exact(version) => versions.iter().rev().find(|v| &v.version == version),
    }
}

/// Outcome of resolving several tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// One record per resolved tag, in the order the tags were given.
    /// A version named twice is listed once.
    pub versions: Vec<VersionRecord>,
    /// Optional tags ("previous") that had no answer.
    pub skipped: Vec<VersionTag>,
}

/// Resolve `tags`, fetching older review pages as needed.
///
/// "previous" may go unresolved; it is reported in `skipped`. Any other
/// tag that cannot be found makes the whole call fail with
/// `Error::Resolution` naming every such tag.
pub fn resolve_versions<D>(review: &mut Review<'_, D>, tags: &[VersionTag]) -> Result<Resolution>
where
    D: PageDecoder<Output = ReviewPage>,
{
    let mut versions: Vec<VersionRecord> = Vec::new();
    let mut skipped = Vec::new();
    let mut unresolved = Vec::new();

    for tag in tags {
        let found = match tag {
            // The newest version is on page 1, which is always loaded.
            VersionTag::Latest => resolve_tag(tag, review.versions()).cloned(),
            _ => review.fetch_until(None, |loaded, page| {
                let found = resolve_tag(tag, loaded).cloned();
                if found.is_none() {
                    debug!(%tag, page, "not found yet, trying the next page");
                }
                found.map(Some)
            })?,
        };

        match found {
            Some(record) => {
                if !versions.iter().any(|v| v.version == record.version) {
                    versions.push(record);
                }
            }
            None if *tag == VersionTag::Previous => {
                warn!("could not find a previous confirmed version");
                skipped.push(tag.clone());
            }
            None => unresolved.push(tag.to_string()),
        }
    }

    if unresolved.is_empty() {
        Ok(Resolution { versions, skipped })
    } else {
        Err(Error::Resolution { unresolved })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::FileRecord;

    fn version(name: &str, confirmed: bool, permissions: Option<&str>) -> VersionRecord {
        VersionRecord {
            version: name.into(),
            date: String::new(),
            confirmed,
            id: None,
            files: vec![FileRecord {
                url: format!("https://example.com/{name}.xpi"),
                platforms: vec!["all".into()],
                status: String::new(),
                permissions: permissions.map(str::to_string),
                file_name: format!("{name}.xpi"),
                file_id: "1".into(),
                saved_path: None,
            }],
            sources: None,
            apps: Vec::new(),
            source_path: None,
            source_file_name: None,
        }
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!("latest".parse::<VersionTag>().unwrap(), VersionTag::Latest);
        assert_eq!("latestwx".parse::<VersionTag>().unwrap(), VersionTag::LatestWithPermissions);
        assert_eq!(" previous ".parse::<VersionTag>().unwrap(), VersionTag::Previous);
        assert_eq!("1.0".parse::<VersionTag>().unwrap(), VersionTag::Exact("1.0".into()));
        assert!("".parse::<VersionTag>().is_err());
        assert_eq!(VersionTag::LatestWithPermissions.to_string(), "latestwx");
    }

    #[test]
    fn test_previous_skips_unconfirmed() {
        let versions = vec![
            version("A", true, None),
            version("B", false, None),
            version("C", false, None),
        ];
        assert_eq!(resolve_tag(&VersionTag::Previous, &versions).unwrap().version, "A");
        assert_eq!(resolve_tag(&VersionTag::Latest, &versions).unwrap().version, "C");
    }

    #[test]
    fn test_previous_never_returns_latest() {
        let versions = vec![version("A", false, None), version("B", true, None)];
        assert_eq!(resolve_tag(&VersionTag::Previous, &versions), None);
        assert_eq!(resolve_tag(&VersionTag::Previous, &[]), None);
    }

    #[test]
    fn test_latest_with_permissions() {
        let versions = vec![
            version("A", true, Some("tabs")),
            version("B", true, Some("")),
            version("C", true, None),
        ];
        assert_eq!(
            resolve_tag(&VersionTag::LatestWithPermissions, &versions).unwrap().version,
            "A"
        );
    }

    #[test]
    fn test_exact_prefers_newest_duplicate() {
        let mut older = version("1.0", true, None);
        older.id = Some("old".into());
        let mut newer = version("1.0", false, None);
        newer.id = Some("new".into());
        let versions = vec![older, version("1.1", true, None), newer];
        let found = resolve_tag(&VersionTag::Exact("1.0".into()), &versions).unwrap();
        assert_eq!(found.id.as_deref(), Some("new"));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn latest_is_always_last(flags in proptest::collection::vec(any::<bool>(), 1..20)) {
                let versions: Vec<VersionRecord> = flags
                    .iter()
                    .enumerate()
                    .map(|(i, confirmed)| version(&i.to_string(), *confirmed, None))
                    .collect();
                let latest = resolve_tag(&VersionTag::Latest, &versions).unwrap();
                prop_assert_eq!(latest, versions.last().unwrap());
            }
        }
    }
}
