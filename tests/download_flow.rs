mod common;

use std::fs;

use amo_cli::review::FileRecord;
use amo_cli::Error;
use common::{redirect, response, session, with_header, FnTransport};
use tempfile::TempDir;

fn file_record(url: &str) -> FileRecord {
    FileRecord {
        url: url.into(),
        platforms: vec!["all".into()],
        status: "Approved".into(),
        permissions: None,
        file_name: "addon-1.0.xpi".into(),
        file_id: "1".into(),
        saved_path: None,
    }
}

#[test]
fn test_file_is_written_through_redirects() {
    let dir = TempDir::new().unwrap();
    let (transport, log) = FnTransport::new(|req| {
        if req.url.host_str() == Some("addons.mozilla.org") {
            redirect(req, 302, "https://addons.cdn.mozilla.net/user-media/files/1/addon-1.0.xpi")
        } else {
            with_header(response(req, 200, "PK fake xpi"), "content-type", "application/x-xpinstall")
        }
    });
    let (mut session, _) = session(transport);
    let mut file = file_record("https://addons.mozilla.org/firefox/downloads/file/1/addon-1.0.xpi");

    let path = file.save(&mut session, dir.path(), "1.0", 1).unwrap();

    assert_eq!(path, dir.path().join("1.0").join("addon.xpi"));
    assert_eq!(fs::read(&path).unwrap(), b"PK fake xpi");
    assert_eq!(file.saved_path.as_deref(), Some(path.as_path()));
    assert_eq!(fs::read_dir(dir.path().join("1.0")).unwrap().count(), 1);
    assert_eq!(log.borrow().len(), 2);
}

#[test]
fn test_unknown_content_type_leaves_nothing_behind() {
    let dir = TempDir::new().unwrap();
    let (transport, _) = FnTransport::new(|req| {
        with_header(response(req, 200, "<html></html>"), "content-type", "text/html")
    });
    let (mut session, _) = session(transport);
    let mut file = file_record("https://addons.mozilla.org/firefox/downloads/file/1/addon-1.0.xpi");

    let err = file.save(&mut session, dir.path(), "1.0", 1).unwrap_err();

    assert!(matches!(err, Error::Parse { .. }));
    assert_eq!(file.saved_path, None);
    assert_eq!(fs::read_dir(dir.path().join("1.0")).unwrap().count(), 0);
}
