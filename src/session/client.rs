use crate::config::{user_agent, REQUEST_TIMEOUT};
use crate::error::Result;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;

/// A fully read portal response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl WebResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Media type without parameters, lowercased.
    pub fn media_type(&self) -> Option<String> {
        let ct = self.content_type.as_deref()?;
        let media = ct.split(';').next().unwrap_or("").trim();
        if media.is_empty() || !media.contains('/') {
            return None;
        }
        Some(media.to_ascii_lowercase())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// What the collection session needs from an HTTP stack: cookie-carrying
/// GET and form POST. Clones share the cookie jar.
pub trait WebClient: Clone {
    fn get(&self, url: &str) -> Result<WebResponse>;
    fn post_form(&self, url: &str, form: &[(&str, String)]) -> Result<WebResponse>;
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let inner = Client::builder()
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(user_agent())
            .build()?;
        Ok(Self { inner })
    }

    fn read(resp: reqwest::blocking::Response) -> Result<WebResponse> {
        let status = resp.status().as_u16();
        let url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.bytes()?.to_vec();
        Ok(WebResponse {
            status,
            url,
            content_type,
            body,
        })
    }
}

impl WebClient for HttpClient {
    fn get(&self, url: &str) -> Result<WebResponse> {
        let resp = self.inner.get(url).send()?;
        Self::read(resp)
    }

    fn post_form(&self, url: &str, form: &[(&str, String)]) -> Result<WebResponse> {
        let resp = self.inner.post(url).form(form).send()?;
        Self::read(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(ct: Option<&str>) -> WebResponse {
        WebResponse {
            status: 200,
            url: "https://portal.example/".into(),
            content_type: ct.map(str::to_string),
            body: Vec::new(),
        }
    }

    #[test]
    fn media_type_strips_parameters() {
        assert_eq!(
            resp(Some("Application/JSON; charset=UTF-8")).media_type().as_deref(),
            Some("application/json")
        );
        assert_eq!(resp(Some("text/html")).media_type().as_deref(), Some("text/html"));
    }

    #[test]
    fn media_type_rejects_garbage() {
        assert_eq!(resp(None).media_type(), None);
        assert_eq!(resp(Some("")).media_type(), None);
        assert_eq!(resp(Some("json")).media_type(), None);
    }

    #[test]
    fn success_range() {
        let mut r = resp(None);
        assert!(r.is_success());
        r.status = 302;
        assert!(!r.is_success());
        r.status = 500;
        assert!(!r.is_success());
    }
}
