use crate::error::{Error, Result};
use reqwest::Url;
use scraper::{Html, Selector};

pub const LOGIN_FORM: &str = "#loginForm";
pub const LOGIN_ERROR: &str = ".login-error";
pub const USERNAME_FIELD: &str = "j_username";
pub const PASSWORD_FIELD: &str = "j_password";

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Error::Marshal(format!("bad selector {css}: {e}")))
}

/// The login form's submit target, resolved against the page it came from.
pub fn find_login_action(html: &str, page_url: &str) -> Result<Option<String>> {
    let doc = Html::parse_document(html);
    let sel = selector(LOGIN_FORM)?;
    let Some(form) = doc.select(&sel).next() else {
        return Ok(None);
    };
    let action = form.value().attr("action").unwrap_or("").trim();
    let base = Url::parse(page_url)
        .map_err(|e| Error::Transport(format!("bad page url {page_url}: {e}")))?;
    let target = base
        .join(action)
        .map_err(|e| Error::Authentication(format!("bad login form action {action:?}: {e}")))?;
    Ok(Some(target.to_string()))
}

/// Text of the portal's login error marker, if the page carries one.
pub fn find_login_error(html: &str) -> Result<Option<String>> {
    let doc = Html::parse_document(html);
    let sel = selector(LOGIN_ERROR)?;
    Ok(doc.select(&sel).next().map(|el| {
        el.text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }))
}
