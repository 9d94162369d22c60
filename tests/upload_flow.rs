mod common;

use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use amo_cli::config::SiteConfig;
use amo_cli::transport::{Body, Method, PartContent, Url, WireRequest, WireResponse};
use amo_cli::upload::{upload_all, wait_for_validation, Platform, UploadRequest, ValidationOutcome};
use common::{redirect, response, session, FnTransport, RecordingSleeper};
use tempfile::TempDir;

const INTERVAL: Duration = Duration::from_secs(1);

const VERSIONS_PAGE: &str = r#"<form><input type="hidden" name="csrfmiddlewaretoken" value="tok"></form>
    <div class="item_wrapper"><a href="/en-US/developers/addon/my-addon/versions/99">Version 1.1</a></div>"#;

fn state_url() -> Url {
    Url::parse("https://addons.mozilla.org/en-US/developers/upload/abc/json").unwrap()
}

fn pending() -> String {
    r#"{"upload": "abc", "error": null, "validation": null}"#.to_string()
}

fn validated(version: &str) -> String {
    format!(
        r#"{{"upload": "abc", "error": null, "validation": {{
            "errors": 0, "warnings": 1, "notices": 0,
            "metadata": {{"name": "My Addon", "version": "{version}"}},
            "messages": [{{"type": "warning", "message": "Unsafe assignment", "description": "innerHTML"}}]
        }}}}"#
    )
}

/// A developer hub that answers `pending` for the first `pending_polls`
/// polls of the validation job, then `last`.
fn developer_hub(pending_polls: u32, last: String) -> impl Fn(&WireRequest) -> WireResponse {
    let polls = Rc::new(Cell::new(0));
    move |req| {
        let path = req.url.path();
        let get = req.method == Method::GET;
        if get && path.ends_with("/versions") {
            response(req, 200, VERSIONS_PAGE)
        } else if !get && path.ends_with("/upload-listed") {
            redirect(req, 302, "/en-US/developers/upload/abc/json")
        } else if get && path == "/en-US/developers/upload/abc/json" {
            polls.set(polls.get() + 1);
            if polls.get() <= pending_polls {
                response(req, 200, &pending())
            } else {
                response(req, 200, &last)
            }
        } else if !get && path.ends_with("/versions/submit/") {
            redirect(req, 302, "/en-US/developers/addon/my-addon/versions/submit/555/")
        } else {
            response(req, 404, "not found")
        }
    }
}

fn xpi(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, b"PK fake xpi").unwrap();
    path
}

fn text_part<'a>(req: &'a WireRequest, name: &str) -> Option<&'a str> {
    let Body::Multipart(parts) = &req.body else {
        return None;
    };
    parts.iter().find(|p| p.name == name).and_then(|p| match &p.content {
        PartContent::Text(value) => Some(value.as_str()),
        PartContent::File { .. } => None,
    })
}

#[test]
fn test_polls_until_validation_finishes() {
    let (transport, log) = FnTransport::new(developer_hub(2, validated("2.0")));
    let (mut session, _) = session(transport);
    let mut sleeper = RecordingSleeper::default();

    let outcome = wait_for_validation(&mut session, &state_url(), "my-addon", Platform::All, INTERVAL, &mut sleeper).unwrap();

    assert!(outcome.is_success());
    let job = outcome.job();
    assert!(job.terminal && job.success);
    assert_eq!(job.upload_id, "abc");
    assert_eq!(job.version(), "2.0");
    assert_eq!(job.counts.warnings, 1);
    assert_eq!(sleeper.waits, [INTERVAL, INTERVAL]);

    let log = log.borrow();
    assert_eq!(log.len(), 3);
    assert!(log.iter().all(|req| req.timeout.is_none()));
}

#[test]
fn test_upload_creates_beta_version() {
    let dir = TempDir::new().unwrap();
    let (transport, log) = FnTransport::new(developer_hub(1, validated("2.0b1")));
    let (mut session, _) = session(transport);
    let site = SiteConfig::default();
    let request = UploadRequest {
        addon_id: "my-addon".into(),
        files: vec![(Platform::Linux, xpi(&dir, "my-addon.xpi"))],
        source: None,
        beta: false,
    };

    let results = upload_all(&mut session, &site, &request, INTERVAL, &mut RecordingSleeper::default()).unwrap();

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert!(result.beta);
    assert!(matches!(result.outcome, ValidationOutcome::Succeeded(_)));
    assert_eq!(
        result.version_url.as_ref().map(Url::as_str),
        Some(format!("{}/addon/my-addon/versions/555", site.developer_base()).as_str())
    );

    let log = log.borrow();
    let submit = log.iter().find(|req| req.url.path().ends_with("/versions/submit/")).unwrap();
    assert_eq!(text_part(submit, "csrfmiddlewaretoken"), Some("tok"));
    assert_eq!(text_part(submit, "upload"), Some("abc"));
    assert_eq!(text_part(submit, "supported_platforms"), Some("2"));
    assert_eq!(text_part(submit, "beta"), Some("on"));
    assert_eq!(submit.timeout, Some(Duration::from_secs(60)));
}

#[test]
fn test_failed_validation_cancels_remaining_files() {
    let dir = TempDir::new().unwrap();
    let failure = r#"{"upload": "abc", "error": "Not a valid xpi", "validation": null}"#.to_string();
    let (transport, log) = FnTransport::new(developer_hub(0, failure));
    let (mut session, _) = session(transport);
    let request = UploadRequest {
        addon_id: "my-addon".into(),
        files: vec![
            (Platform::Linux, xpi(&dir, "linux.xpi")),
            (Platform::Windows, xpi(&dir, "win.xpi")),
        ],
        source: None,
        beta: false,
    };

    let results = upload_all(&mut session, &SiteConfig::default(), &request, INTERVAL, &mut RecordingSleeper::default()).unwrap();

    assert_eq!(results.len(), 1);
    assert!(!results[0].outcome.is_success());
    assert_eq!(results[0].outcome.job().failure.as_deref(), Some("Not a valid xpi"));
    assert_eq!(results[0].version_url, None);

    let log = log.borrow();
    let uploads = log.iter().filter(|req| req.url.path().ends_with("/upload-listed")).count();
    assert_eq!(uploads, 1);
    assert!(!log.iter().any(|req| req.url.path().ends_with("/versions/submit/")));
}

#[test]
fn test_refused_attach_keeps_going() {
    let dir = TempDir::new().unwrap();
    let hub = developer_hub(0, validated("2.0"));
    let submits = Rc::new(Cell::new(0));
    let (transport, log) = FnTransport::new(move |req| {
        if req.method == Method::POST && req.url.path().ends_with("/versions/submit/") {
            submits.set(submits.get() + 1);
            if submits.get() == 1 {
                return response(req, 400, r#"{"__all__": ["Version 2.0 already exists."]}"#);
            }
        }
        hub(req)
    });
    let (mut session, _) = session(transport);
    let request = UploadRequest {
        addon_id: "my-addon".into(),
        files: vec![
            (Platform::Linux, xpi(&dir, "linux.xpi")),
            (Platform::Windows, xpi(&dir, "win.xpi")),
        ],
        source: None,
        beta: false,
    };

    let results = upload_all(&mut session, &SiteConfig::default(), &request, INTERVAL, &mut RecordingSleeper::default()).unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.outcome.is_success()));
    assert_eq!(results[0].version_url, None);
    let refused = results[0].attach_error.as_ref().unwrap();
    assert_eq!(refused.status, 400);
    assert_eq!(refused.summary(), "Version 2.0 already exists.");
    assert!(results[1].version_url.is_some());
    assert_eq!(results[1].attach_error, None);

    let log = log.borrow();
    let uploads = log.iter().filter(|req| req.url.path().ends_with("/upload-listed")).count();
    assert_eq!(uploads, 2);
}
