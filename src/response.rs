//! Response handle shared by the pipeline stages.
//!
//! Stages write into a [`ResponseState`]; once a stage ends it, later stages
//! must leave it alone. The server turns the final state into a hyper response.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

#[derive(Debug, Default)]
pub struct ResponseState {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    ended: bool,
}

impl ResponseState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Write the body and finish the response. A second call is ignored.
    pub fn end(&mut self, body: impl Into<Bytes>) {
        if self.ended {
            tracing::debug!("response already ended, dropping extra body");
            return;
        }
        self.body = body.into();
        self.ended = true;
    }

    /// Finish an HTML response with an exact byte-length header.
    pub fn end_html(&mut self, html: String) {
        self.set_header(CONTENT_TYPE, HeaderValue::from_static(HTML_CONTENT_TYPE));
        self.set_header(CONTENT_LENGTH, HeaderValue::from(html.len()));
        self.end(html);
    }

    pub fn into_hyper(self) -> hyper::Response<Full<Bytes>> {
        let mut response = hyper::Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_length_counts_bytes() {
        let html = "<p>héllo 日本 🎉</p>".to_string();
        let byte_len = html.len();
        assert!(byte_len > html.chars().count());

        let mut res = ResponseState::new();
        res.end_html(html);

        assert_eq!(res.headers()[CONTENT_LENGTH], byte_len.to_string().as_str());
        assert_eq!(res.headers()[CONTENT_TYPE], HTML_CONTENT_TYPE);
        assert_eq!(res.body().len(), byte_len);
    }

    #[test]
    fn test_end_is_one_shot() {
        let mut res = ResponseState::new();
        res.end("first");
        res.end("second");
        assert!(res.is_ended());
        assert_eq!(res.body().as_ref(), b"first");
    }

    #[test]
    fn test_into_hyper_keeps_status_and_headers() {
        let mut res = ResponseState::new();
        res.set_status(StatusCode::NOT_FOUND);
        res.end_html(String::new());

        let hyper_res = res.into_hyper();
        assert_eq!(hyper_res.status(), StatusCode::NOT_FOUND);
        assert_eq!(hyper_res.headers()[CONTENT_LENGTH], "0");
    }
}
