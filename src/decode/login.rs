// Login page: the password form and the accounts configuration the site
// embeds for browser based sign-in.

use reqwest::Url;
use serde::Deserialize;

use super::{attr, csrf_token, select_first};
use crate::error::{Error, Result};
use crate::paginate::Page;

/// The site's own username/password form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    pub token: Option<String>,
    pub action: Option<String>,
    /// The form asks for the code that was mailed after a blocked login.
    pub wants_unblock_code: bool,
}

impl LoginForm {
    pub fn decode(page: &Page) -> Result<Self> {
        let doc = page.document();
        let root = doc.root_element();
        let form = select_first(page, root, "form")?;
        Ok(LoginForm {
            token: csrf_token(page, &doc)?,
            action: form.and_then(|f| attr(f, "action")).filter(|a| !a.is_empty()),
            wants_unblock_code: select_first(page, root, r#"input[name="unblock_code"]"#)?.is_some(),
        })
    }

    /// Where the form posts to: its action, or the page itself.
    pub fn target(&self, page: &Page) -> Result<Url> {
        match &self.action {
            Some(action) => page.join(action),
            None => Ok(page.url.clone()),
        }
    }
}

/// Accounts configuration from `<body data-fxa-config="...">`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FxaConfig {
    pub oauth_host: String,
    pub client_id: String,
    pub scope: String,
    pub state: String,
    #[serde(default)]
    pub redirect_url: Option<String>,
}

impl FxaConfig {
    pub fn decode(page: &Page) -> Result<Self> {
        let doc = page.document();
        let body = select_first(page, doc.root_element(), "body[data-fxa-config]")?
            .and_then(|b| attr(b, "data-fxa-config"))
            .ok_or_else(|| Error::parse(&page.url, "login page has no data-fxa-config"))?;
        serde_json::from_str(&body)
            .map_err(|e| Error::parse(&page.url, format!("invalid data-fxa-config: {e}")))
    }

    /// The page the user has to open in a browser to sign in.
    pub fn authorization_url(&self) -> Result<Url> {
        let base = format!("{}/authorization", self.oauth_host.trim_end_matches('/'));
        let mut params = vec![
            ("client_id", self.client_id.as_str()),
            ("scope", self.scope.as_str()),
            ("state", self.state.as_str()),
            ("action", "signin"),
        ];
        if let Some(redirect) = &self.redirect_url {
            params.push(("redirect_uri", redirect.as_str()));
        }
        Url::parse_with_params(&base, &params)
            .map_err(|e| Error::Config(format!("invalid accounts host {}: {e}", self.oauth_host)))
    }
}
