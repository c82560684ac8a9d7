//! Transport response and view output.
//!
//! Views either produce a finished [`Response`] (which dispatch passes
//! through untouched) or a bare [`serde_json::Value`] that a configured
//! renderer turns into a response. [`ViewOutput`] makes that split explicit
//! instead of sniffing return types.

use serde_json::Value;

/// A minimal transport response: status, headers, body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Header pairs in insertion order. Use [`Response::header`] /
    /// [`Response::set_header`] for case-insensitive access.
    pub headers: Vec<(String, String)>,
    /// Raw body bytes.
    pub body: Vec<u8>,
    /// When set, automatic cache-header stamping leaves this response alone.
    pub prevent_auto_cache: bool,
}

impl Response {
    /// An empty 200 response.
    pub fn ok() -> Self {
        Response::with_status(200)
    }

    /// An empty response with the given status.
    pub fn with_status(status: u16) -> Self {
        Response {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            prevent_auto_cache: false,
        }
    }

    /// A 200 text/plain response.
    pub fn text(body: impl Into<String>) -> Self {
        let mut response = Response::ok();
        response.body = body.into().into_bytes();
        response.set_header("Content-Type", "text/plain; charset=utf-8");
        response
    }

    /// The first header with this name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Sets a header, replacing any existing values for the name.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers
            .retain(|(header, _)| !header.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// Removes all values for a header name.
    pub fn remove_header(&mut self, name: &str) {
        self.headers
            .retain(|(header, _)| !header.eq_ignore_ascii_case(name));
    }

    /// The body decoded as UTF-8, lossily.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// What a view produces.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewOutput {
    /// A finished response; dispatch passes it through untouched.
    Response(Response),
    /// A bare value for the configured renderer.
    Value(Value),
}

impl ViewOutput {
    /// Returns true for the response variant.
    pub fn is_response(&self) -> bool {
        matches!(self, ViewOutput::Response(_))
    }

    /// The response, if this is one.
    pub fn as_response(&self) -> Option<&Response> {
        match self {
            ViewOutput::Response(response) => Some(response),
            ViewOutput::Value(_) => None,
        }
    }

    /// The bare value, if this is one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            ViewOutput::Value(value) => Some(value),
            ViewOutput::Response(_) => None,
        }
    }

    /// Consumes into the response, if this is one.
    pub fn into_response(self) -> Option<Response> {
        match self {
            ViewOutput::Response(response) => Some(response),
            ViewOutput::Value(_) => None,
        }
    }
}

impl From<Response> for ViewOutput {
    fn from(response: Response) -> Self {
        ViewOutput::Response(response)
    }
}

impl From<Value> for ViewOutput {
    fn from(value: Value) -> Self {
        ViewOutput::Value(value)
    }
}
