use http::header::{CACHE_CONTROL, CONTENT_TYPE, LOCATION, SET_COOKIE};
use http::StatusCode;
use spin_sdk::http::Response;
use std::borrow::Cow;

/// Response under construction. Handlers return these; the host converts
/// the finished reply into its own response type.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn html(status: StatusCode, html: String) -> Self {
        Self::new(status)
            .with_header(CONTENT_TYPE.as_str(), "text/html; charset=utf-8")
            .with_body(html.into_bytes())
    }

    pub fn redirect(location: &str) -> Self {
        Self::new(StatusCode::FOUND).with_header(LOCATION.as_str(), location)
    }

    pub fn png(bytes: Vec<u8>) -> Self {
        Self::new(StatusCode::OK)
            .with_header(CONTENT_TYPE.as_str(), "image/png")
            .with_header(CACHE_CONTROL.as_str(), "no-cache")
            .with_body(bytes)
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_cookie(self, cookie: String) -> Self {
        self.with_header(SET_COOKIE.as_str(), cookie)
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn location(&self) -> Option<&str> {
        self.header(LOCATION.as_str())
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

impl From<Reply> for Response {
    fn from(reply: Reply) -> Self {
        let mut builder = Response::builder();
        builder.status(reply.status.as_u16());
        for (name, value) in reply.headers {
            builder.header(name, value);
        }
        builder.body(reply.body).build()
    }
}
