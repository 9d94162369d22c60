// Saving the files and sources of a version to disk, and unpacking them.
//
// Layout below the add-on directory:
//   <version>/addon[-<platforms>].xpi   the file as downloaded
//   <version>/xpi[-<platforms>]/        its contents
//   <version>/sources.<ext>             the submitted source archive
//   <version>/src/                      its contents
// The platform suffix is only used when a version has more than one file.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::review::{FileRecord, VersionRecord};
use crate::session::{RequestOptions, Session, Timeout};
use crate::transport::{Url, WireResponse};

/// Archive formats we know how to unpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    /// Sniff the format from the first bytes of the file.
    pub fn detect(path: &Path) -> Result<Option<Self>> {
        let mut magic = [0u8; 4];
        let mut file = File::open(path)?;
        let read = file.read(&mut magic)?;
        Ok(match &magic[..read] {
            [0x50, 0x4b, 0x03, 0x04] => Some(ArchiveKind::Zip),
            [0x1f, 0x8b, ..] => Some(ArchiveKind::TarGz),
            _ => None,
        })
    }
}

fn platform_suffix(file: &FileRecord, siblings: usize) -> String {
    if siblings > 1 {
        format!("-{}", file.platforms.join("-"))
    } else {
        String::new()
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::InvalidArgument(format!("bad download url {raw}: {e}")))
}

/// Stream `url` into a temporary file in `dir`. The file disappears unless
/// it is persisted.
fn fetch(session: &mut Session, url: &Url, dir: &Path) -> Result<(WireResponse, NamedTempFile)> {
    fs::create_dir_all(dir)?;
    let mut file = NamedTempFile::new_in(dir)?;
    let res = session.download(url, RequestOptions::new().timeout(Timeout::Unbounded), file.as_file_mut())?;
    Ok((res, file))
}

fn keep(file: NamedTempFile, path: &Path) -> Result<()> {
    file.persist(path).map_err(|e| e.error)?;
    debug!(path = %path.display(), bytes = fs::metadata(path)?.len(), "download saved");
    Ok(())
}

impl FileRecord {
    /// Download the file into `<addon_dir>/<version>/`.
    pub fn save(&mut self, session: &mut Session, addon_dir: &Path, version: &str, siblings: usize) -> Result<PathBuf> {
        let url = parse_url(&self.url)?;
        let dir = addon_dir.join(version);
        let (res, file) = fetch(session, &url, &dir)?;
        let content_type = res.header("content-type").unwrap_or_default();
        let name = if content_type == "application/x-xpinstall" {
            format!("addon{}.xpi", platform_suffix(self, siblings))
        } else if content_type.starts_with("text/xml") {
            "addon.xml".to_string()
        } else {
            return Err(Error::parse(&res.url, format!("unknown content type {content_type:?}")));
        };

        let path = dir.join(name);
        keep(file, &path)?;
        self.saved_path = Some(path.clone());
        Ok(path)
    }

    /// Unpack a saved xpi next to it. Search definitions (`addon.xml`) and
    /// files that are not zips are left alone.
    pub fn extract(&self, addon_dir: &Path, version: &str, siblings: usize) -> Result<Option<PathBuf>> {
        let Some(saved) = &self.saved_path else {
            return Err(Error::InvalidArgument(format!("{} has not been downloaded", self.file_name)));
        };
        if saved.extension().map_or(false, |ext| ext == "xml") {
            return Ok(None);
        }
        let target = addon_dir
            .join(version)
            .join(format!("xpi{}", platform_suffix(self, siblings)));
        match extract_zip(saved, &target) {
            Ok(()) => Ok(Some(target)),
            Err(e) => {
                warn!(file = %saved.display(), error = %e, "could not extract xpi, skipping");
                Ok(None)
            }
        }
    }
}

impl VersionRecord {
    /// Download every file of the version and unpack the xpis.
    pub fn save_files(&mut self, session: &mut Session, addon_dir: &Path) -> Result<Vec<PathBuf>> {
        let siblings = self.files.len();
        let version = self.version.clone();
        let mut saved = Vec::new();
        for file in &mut self.files {
            info!(file = %file.file_name, platforms = %file.platforms.join(", "), "getting file");
            saved.push(file.save(session, addon_dir, &version, siblings)?);
            file.extract(addon_dir, &version, siblings)?;
        }
        Ok(saved)
    }

    /// Download the source archive, if the version has one. The archive is
    /// saved as `sources` plus the extension of the name the server gives.
    pub fn save_sources(&mut self, session: &mut Session, addon_dir: &Path) -> Result<Option<PathBuf>> {
        let Some(sources) = &self.sources else {
            return Ok(None);
        };
        let url = parse_url(sources)?;
        let dir = addon_dir.join(&self.version);
        let (res, file) = fetch(session, &url, &dir)?;
        let file_name = res
            .header("content-disposition")
            .and_then(disposition_file_name)
            .ok_or_else(|| Error::parse(&res.url, "source download without file name"))?;

        let path = dir.join(format!("sources{}", archive_extension(&file_name)));
        keep(file, &path)?;
        self.source_file_name = Some(file_name);
        self.source_path = Some(path.clone());
        Ok(Some(path))
    }

    /// Unpack the saved sources into `<version>/src`, replacing what was
    /// there. Unknown or broken archives are skipped with a warning.
    pub fn extract_sources(&self, addon_dir: &Path) -> Result<Option<PathBuf>> {
        let Some(archive) = &self.source_path else {
            return Ok(None);
        };
        let target = addon_dir.join(&self.version).join("src");
        if target.exists() {
            fs::remove_dir_all(&target)?;
        }

        let kind = match ArchiveKind::detect(archive)? {
            Some(kind) => kind,
            None => {
                warn!(file = %archive.display(), "unknown archive format, skipping extraction");
                return Ok(None);
            }
        };
        let result = match kind {
            ArchiveKind::Zip => extract_zip(archive, &target),
            ArchiveKind::TarGz => extract_tar_gz(archive, &target),
        };
        match result {
            Ok(()) => Ok(Some(target)),
            Err(e) => {
                warn!(file = %archive.display(), error = %e, "could not extract sources, skipping");
                if target.exists() {
                    fs::remove_dir_all(&target)?;
                }
                Ok(None)
            }
        }
    }
}

/// File name from a `Content-Disposition` header.
pub fn disposition_file_name(header: &str) -> Option<String> {
    header.split(';').map(str::trim).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Extension of an archive name, keeping `.tar.gz` whole.
pub fn archive_extension(file_name: &str) -> String {
    let path = Path::new(file_name);
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!(".{ext}"),
        None => return String::new(),
    };
    let is_tar = path
        .file_stem()
        .map(Path::new)
        .and_then(Path::extension)
        .map_or(false, |inner| inner == "tar");
    if ext == ".gz" && is_tar {
        ".tar.gz".to_string()
    } else {
        ext
    }
}

fn escapes(path: &Path) -> bool {
    path.components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
}

fn traversal(archive: &Path, entry: impl std::fmt::Display) -> Error {
    Error::InvalidArgument(format!(
        "{}: entry {} points outside the extraction directory",
        archive.display(),
        entry
    ))
}

/// Unpack a zip archive into `target`.
pub fn extract_zip(archive: &Path, target: &Path) -> Result<()> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?).map_err(io::Error::other)?;
    fs::create_dir_all(target)?;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(io::Error::other)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| traversal(archive, entry.name()))?;
        let out = target.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        io::copy(&mut entry, &mut File::create(&out)?)?;
    }
    Ok(())
}

/// Unpack a gzipped tarball into `target`.
pub fn extract_tar_gz(archive: &Path, target: &Path) -> Result<()> {
    let mut tar = tar::Archive::new(GzDecoder::new(File::open(archive)?));
    fs::create_dir_all(target)?;
    for entry in tar.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        if escapes(&path) {
            return Err(traversal(archive, path.display()));
        }
        entry.unpack_in(target)?;
    }
    Ok(())
}
