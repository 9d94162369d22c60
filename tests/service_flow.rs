mod common;

use std::cell::Cell;
use std::rc::Rc;

use amo_cli::auth::LoginPrompter;
use amo_cli::config::{Config, SessionConfig};
use amo_cli::credentials::CredentialStore;
use amo_cli::service::AddonsService;
use amo_cli::session::{RequestOptions, Session};
use amo_cli::transport::{Body, Method, Url, WireRequest, WireResponse};
use common::{login_url, redirect, response, with_header, CountingAuth, FnTransport, NoPrompt};
use tempfile::TempDir;

fn review_page(id: &str) -> String {
    format!(
        r#"<html><body>
          <h2 class="addon"><span>Review Addon {id}</span></h2>
          <div id="addon" data-id="{id}"></div>
          <form method="post"><input name="csrfmiddlewaretoken" value="tok">
            <input type="radio" name="action" value="reject_multiple_versions">
            <select id="id_versions" name="versions"><option value="{id}1">1.0</option></select>
          </form>
        </body></html>"#
    )
}

/// Review pages for every add-on except `missing`, which is a 404.
fn reviewer_tools(missing: &'static str) -> impl Fn(&WireRequest) -> WireResponse {
    move |req| {
        let path = req.url.path();
        let id = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
        if req.method == Method::GET && path.contains("/review-listed/") {
            if id == missing {
                return response(req, 404, "Not found");
            }
            let res = response(req, 200, &review_page(id));
            with_header(res, "set-cookie", "sessionid=abc; Path=/")
        } else if req.method == Method::POST && path.ends_with("/disable/") {
            response(req, 202, "")
        } else if req.method == Method::POST && path.contains("/review-listed/") {
            response(req, 200, "")
        } else {
            response(req, 404, "Not found")
        }
    }
}

fn service(transport: FnTransport) -> AddonsService {
    let session = Session::new(
        SessionConfig::default(),
        Box::new(transport),
        Box::new(CountingAuth(Rc::new(Cell::new(0)))),
        Box::new(NoPrompt),
        CredentialStore::in_memory(),
    )
    .unwrap();
    AddonsService::new(Config::default(), session)
}

#[test]
fn test_disable_batch_goes_past_failures() {
    let (transport, log) = FnTransport::new(reviewer_tools("200"));
    let mut amo = service(transport);
    let mut progress = Vec::new();

    let report = amo
        .disable_addons(&["100", "200", "300"], None, |addon, ok| progress.push((addon.to_string(), ok)))
        .unwrap();

    assert_eq!(report.succeeded, ["100", "300"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "200");
    assert!(!report.is_success());
    assert_eq!(
        progress,
        [("100".to_string(), true), ("200".to_string(), false), ("300".to_string(), true)]
    );

    let log = log.borrow();
    let disabled: Vec<&str> = log
        .iter()
        .filter(|req| req.url.path().ends_with("/disable/"))
        .map(|req| req.url.path())
        .collect();
    assert_eq!(
        disabled,
        ["/api/v3/reviewers/addon/100/disable/", "/api/v3/reviewers/addon/300/disable/"]
    );
    let disable = log.iter().find(|req| req.url.path().ends_with("/disable/")).unwrap();
    assert_eq!(disable.header("Authorization"), Some("Session abc"));
}

#[test]
fn test_disable_with_message_rejects_versions_first() {
    let (transport, log) = FnTransport::new(reviewer_tools("none"));
    let mut amo = service(transport);

    let report = amo.disable_addons(&["100"], Some("Malware"), |_, _| {}).unwrap();
    assert!(report.is_success());

    let log = log.borrow();
    let methods: Vec<(Method, bool)> = log
        .iter()
        .map(|req| (req.method.clone(), req.url.path().ends_with("/disable/")))
        .collect();
    assert_eq!(
        methods,
        [(Method::GET, false), (Method::POST, false), (Method::POST, true)]
    );
    let Body::Form(fields) = &log[1].body else {
        panic!("expected a form body");
    };
    assert!(fields.contains(&("action".to_string(), "reject_multiple_versions".to_string())));
    assert!(fields.contains(&("comments".to_string(), "Malware".to_string())));
    assert!(fields.contains(&("versions".to_string(), "1001".to_string())));
}

#[test]
fn test_saved_login_is_reused() {
    let dir = TempDir::new().unwrap();
    let cookie_file = dir.path().join("cookies.json");
    let url = Url::parse("https://reviewers.addons.mozilla.org/en-US/reviewers/queue/new").unwrap();
    let open = |logins: Rc<Cell<u32>>, respond: fn(&WireRequest) -> WireResponse| {
        let (transport, log) = FnTransport::new(respond);
        let prompter: Box<dyn LoginPrompter> = Box::new(NoPrompt);
        let session = Session::new(
            SessionConfig::default(),
            Box::new(transport),
            Box::new(CountingAuth(logins)),
            prompter,
            CredentialStore::new(&cookie_file),
        )
        .unwrap();
        (session, log)
    };

    // Not logged in: one wall, one login, and the login is saved.
    fn walled(req: &WireRequest) -> WireResponse {
        if req.header("Cookie").is_some() {
            response(req, 200, "queue")
        } else {
            redirect(req, 302, &login_url())
        }
    }
    let first_logins = Rc::new(Cell::new(0));
    let (mut session, _) = open(first_logins.clone(), walled);
    session.get(&url, RequestOptions::new()).unwrap();
    assert_eq!(first_logins.get(), 1);
    assert!(cookie_file.exists());

    // A new session starts with the saved cookie and needs no login.
    let second_logins = Rc::new(Cell::new(0));
    let (mut session, log) = open(second_logins.clone(), walled);
    assert_eq!(session.get(&url, RequestOptions::new()).unwrap().text(), "queue");
    assert_eq!(second_logins.get(), 0);
    assert_eq!(log.borrow()[0].header("Cookie"), Some("sessionid=session-1"));
}

#[test]
fn test_refreshed_cookie_is_saved_without_persist() {
    let dir = TempDir::new().unwrap();
    let cookie_file = dir.path().join("cookies.json");
    let store = CredentialStore::new(&cookie_file);
    let mut saved = amo_cli::credentials::TokenSet::new();
    saved.insert("sessionid", "old");
    store.persist(&saved).unwrap();

    let (transport, _) = FnTransport::new(|req| {
        let res = response(req, 200, "queue");
        with_header(res, "set-cookie", "sessionid=rotated; Path=/; HttpOnly")
    });
    let mut session = Session::new(
        SessionConfig::default(),
        Box::new(transport),
        Box::new(CountingAuth(Rc::new(Cell::new(0)))),
        Box::new(NoPrompt),
        CredentialStore::new(&cookie_file),
    )
    .unwrap();
    let url = Url::parse("https://reviewers.addons.mozilla.org/en-US/reviewers/queue/new").unwrap();
    session.get(&url, RequestOptions::new()).unwrap();

    // The session is never asked to persist; the file already has the new value.
    assert_eq!(store.load().unwrap().get("sessionid"), Some("rotated"));
}
