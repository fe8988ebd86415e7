use crate::buffer::ResponseBuffer;
use bytes::{Buf, Bytes};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::net::IpAddr;

/// HTTP Status Codes used by [`Response`]. Canned replies live in
/// [`crate::templates`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 200,
    InternalServerError = 500,
}

impl Status {
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Get the text description for this status code
    pub fn as_str(&self) -> &'static str {
        match *self {
            Status::Ok => "OK",
            Status::InternalServerError => "Internal Server Error",
        }
    }
}

/// HTTP Methods understood by the server and client. Anything else is
/// rejected where it is first seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
}

impl Method {
    /// Parse a method token, `None` for anything unsupported
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::Get),
            "HEAD" => Some(Method::Head),
            "POST" => Some(Method::Post),
            _ => None,
        }
    }

    /// Convert the method to a string
    pub fn as_str(&self) -> &'static str {
        match *self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of capture slots a route match can fill
pub const CAPTURE_SLOTS: usize = 3;

/// HTTP Request
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// `None` when the request line was malformed or named an unsupported method
    pub method: Option<Method>,
    /// Method token exactly as received
    pub raw_method: String,
    pub path: String,
    /// Version without the `HTTP/` prefix, e.g. `"1.1"`
    pub version: String,
    /// Header names are stored lowercased; the last duplicate wins
    pub headers: HashMap<String, String>,
    /// Peer address, filled in once the request is routed
    pub address: Option<IpAddr>,
    captures: [String; CAPTURE_SLOTS],
    body: Bytes,
}

impl Request {
    /// Create a new request
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method: Some(method),
            raw_method: method.as_str().to_string(),
            path: path.to_string(),
            version: "1.1".to_string(),
            ..Self::default()
        }
    }

    /// Set a header
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
    }

    /// Get a header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Whether the request line parsed into method, path and version
    pub fn is_well_formed(&self) -> bool {
        !self.raw_method.is_empty() || !self.path.is_empty()
    }

    /// HTTP/1.0 closes after one exchange, everything else stays open
    pub fn keep_alive(&self) -> bool {
        self.version != "1.0"
    }

    /// Value of capture group `index + 1` from the route pattern, empty when
    /// the group did not participate in the match.
    pub fn capture(&self, index: usize) -> &str {
        self.captures.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn set_captures(&mut self, captures: [String; CAPTURE_SLOTS]) {
        self.captures = captures;
    }

    pub fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    /// The request body bytes
    pub fn content(&self) -> &[u8] {
        &self.body
    }

    /// Streaming view over the body
    pub fn body_reader(&self) -> impl Read {
        self.body.clone().reader()
    }
}

static REQUEST_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^ ]*) ([^ ]*) HTTP/([^ ]*)$").expect("request line pattern"));
static HEADER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^:]*): ?(.*)$").expect("header line pattern"));

/// Turns a header block into a [`Request`].
///
/// A request line that does not look like `METHOD SP PATH SP HTTP/VERSION`
/// leaves method, path and version empty and the headers unread; such a
/// request can never match a route. Header parsing stops at the first line
/// that is not `NAME ':' SP? VALUE`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestParser;

impl RequestParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, head: &[u8]) -> Request {
        let text = String::from_utf8_lossy(head);
        let mut lines = text.split('\n').map(|line| line.trim_end_matches('\r'));
        let mut request = Request::default();

        let first = lines.next().unwrap_or("");
        let Some(caps) = REQUEST_LINE.captures(first) else {
            return request;
        };
        request.raw_method = caps[1].to_string();
        request.method = Method::parse(&caps[1]);
        request.path = caps[2].to_string();
        request.version = caps[3].to_string();

        for line in lines {
            match HEADER_LINE.captures(line) {
                Some(caps) => request.set_header(&caps[1], &caps[2]),
                None => break,
            }
        }

        request
    }
}

/// HTTP Response
#[derive(Debug, Clone)]
pub struct Response {
    pub status: Status,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    /// Create a new response
    pub fn new(status: Status) -> Self {
        Self {
            status,
            headers: vec![("Connection".to_string(), "Keep-Alive".to_string())],
            body: Vec::new(),
        }
    }

    /// Set a header, replacing an existing one with the same name
    pub fn set_header(&mut self, name: &str, value: &str) {
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    /// Set the body and update content-length
    pub fn set_body(&mut self, body: &[u8]) {
        self.body = body.to_vec();
        self.set_header("Content-Length", &body.len().to_string());
    }

    /// Serialize the response into a handler's buffer
    pub fn write_to(&self, out: &mut ResponseBuffer) {
        out.put_str(&format!(
            "HTTP/1.1 {} {}\r\n",
            self.status.code(),
            self.status.as_str()
        ));
        for (name, value) in &self.headers {
            out.put_str(&format!("{}: {}\r\n", name, value));
        }
        out.put_str("\r\n");
        out.put(&self.body);
    }
}
