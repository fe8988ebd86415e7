//! Single-shot HTTP/1.0 fetch: resolve, connect, send, then read the status
//! line, headers and body until the peer closes. No redirects, no retries
//! and no connection reuse.

use crate::error::{ServerError, ServerResult};
use crate::http::Method;
use crate::templates;
use crate::timeout::{Phase, TimeoutSupervisor};
use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

static URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(http://)?(\w+\.\w.*?)(/.*)?$").expect("url pattern"));

const DEFAULT_PORT: u16 = 80;

/// What a successful fetch hands to its caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResponse {
    /// Status line and headers, CRLF-terminated, without the blank line
    pub head: String,
    pub content: Bytes,
}

impl FetchedResponse {
    /// Status code from the head
    pub fn status(&self) -> Option<u16> {
        self.head.split_whitespace().nth(1)?.parse().ok()
    }
}

enum FetchState {
    Resolving,
    Connecting(Vec<SocketAddr>),
    WritingRequest(TcpStream),
    ReadingStatus { stream: TcpStream, buffer: BytesMut },
    ReadingHeaders { stream: TcpStream, buffer: BytesMut },
    ReadingBody { stream: TcpStream, head: String, buffer: BytesMut },
    Done(FetchedResponse),
}

/// One outbound request, built from a URL of the form
/// `[http://]host[:port][/path]`.
#[derive(Debug, Clone)]
pub struct Fetch {
    url: String,
    host: String,
    port: u16,
    path: String,
    method: Method,
    request: String,
    timeouts: TimeoutSupervisor,
}

impl Fetch {
    /// Only GET and HEAD are supported
    pub fn new(url: &str, method: &str) -> ServerResult<Self> {
        let method = match Method::parse(method) {
            Some(m @ (Method::Get | Method::Head)) => m,
            _ => return Err(ServerError::UnsupportedMethod(method.to_string())),
        };

        let caps = URL
            .captures(url)
            .ok_or_else(|| ServerError::Client(format!("cannot parse url {:?}", url)))?;
        let authority = &caps[2];
        let path = caps.get(3).map_or("/", |m| m.as_str()).to_string();

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| ServerError::Client(format!("bad port in url {:?}", url)))?;
                (host.to_string(), port)
            }
            None => (authority.to_string(), DEFAULT_PORT),
        };

        let template = match method {
            Method::Head => templates::HEAD,
            _ => templates::GET,
        };
        let request = templates::fill(template, &[("$path", &path), ("$host", &host)]);

        Ok(Self {
            url: url.to_string(),
            host,
            port,
            path,
            method,
            request,
            timeouts: TimeoutSupervisor::new(0, 0),
        })
    }

    /// Bound every I/O step by `seconds`; zero means unbounded
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeouts = TimeoutSupervisor::new(seconds, seconds);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// The request bytes that will be written
    pub fn request(&self) -> &str {
        &self.request
    }

    /// Run the fetch to completion. A non-200 status or a status line that
    /// does not start with `HTTP/` is an error.
    pub async fn fetch(&self) -> ServerResult<FetchedResponse> {
        let mut state = FetchState::Resolving;
        loop {
            state = match state {
                FetchState::Resolving => self.resolve().await?,
                FetchState::Connecting(addrs) => self.connect(addrs).await?,
                FetchState::WritingRequest(stream) => self.write_request(stream).await?,
                FetchState::ReadingStatus { stream, buffer } => self.read_status(stream, buffer).await?,
                FetchState::ReadingHeaders { stream, buffer } => self.read_headers(stream, buffer).await?,
                FetchState::ReadingBody { stream, head, buffer } => {
                    self.read_body(stream, head, buffer).await?
                }
                FetchState::Done(response) => return Ok(response),
            };
        }
    }

    /// Fetch and hand the result to `on_complete`. Failures are logged and
    /// the callback is not invoked.
    pub async fn run<F>(self, on_complete: F) -> bool
    where
        F: FnOnce(&str, FetchedResponse),
    {
        match self.fetch().await {
            Ok(response) => {
                on_complete(&self.url, response);
                true
            }
            Err(e) => {
                warn!("fetch {} failed: {}", self.url, e);
                false
            }
        }
    }

    async fn resolve(&self) -> ServerResult<FetchState> {
        let mut deadline = self.timeouts.arm(Phase::Request);
        let addrs: Vec<SocketAddr> = deadline
            .guard(tokio::net::lookup_host((self.host.as_str(), self.port)))
            .await??
            .collect();
        if addrs.is_empty() {
            return Err(ServerError::Client(format!("{} did not resolve", self.host)));
        }
        Ok(FetchState::Connecting(addrs))
    }

    async fn connect(&self, addrs: Vec<SocketAddr>) -> ServerResult<FetchState> {
        let mut last_error = None;
        for addr in addrs {
            let mut deadline = self.timeouts.arm(Phase::Request);
            match deadline.guard(TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    debug!("fetch {}: connected to {}", self.url, addr);
                    return Ok(FetchState::WritingRequest(stream));
                }
                Ok(Err(e)) => last_error = Some(ServerError::from(e)),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| ServerError::Client("no address to connect to".to_string())))
    }

    async fn write_request(&self, mut stream: TcpStream) -> ServerResult<FetchState> {
        let mut deadline = self.timeouts.arm(Phase::Request);
        deadline.guard(stream.write_all(self.request.as_bytes())).await??;
        Ok(FetchState::ReadingStatus {
            stream,
            buffer: BytesMut::with_capacity(4096),
        })
    }

    async fn read_status(&self, mut stream: TcpStream, mut buffer: BytesMut) -> ServerResult<FetchState> {
        let mut deadline = self.timeouts.arm(Phase::Request);
        let end = loop {
            if let Some(pos) = find(&buffer, b"\r\n") {
                break pos;
            }
            if deadline.guard(stream.read_buf(&mut buffer)).await?? == 0 {
                return Err(ServerError::Client("connection closed before status line".to_string()));
            }
        };

        let line = String::from_utf8_lossy(&buffer[..end]).to_string();
        let mut parts = line.split_whitespace();
        let version = parts.next().unwrap_or("");
        if !version.starts_with("HTTP/") {
            return Err(ServerError::Client(format!("invalid status line {:?}", line)));
        }
        match parts.next().and_then(|code| code.parse::<u16>().ok()) {
            Some(200) => {}
            Some(code) => return Err(ServerError::Client(format!("response returned status {}", code))),
            None => return Err(ServerError::Client(format!("invalid status line {:?}", line))),
        }

        Ok(FetchState::ReadingHeaders { stream, buffer })
    }

    async fn read_headers(&self, mut stream: TcpStream, mut buffer: BytesMut) -> ServerResult<FetchState> {
        let mut deadline = self.timeouts.arm(Phase::Request);
        loop {
            // a status line followed directly by the blank line has no headers
            if let Some(pos) = find(&buffer, b"\r\n\r\n") {
                let head = buffer.split_to(pos + 4);
                let head = String::from_utf8_lossy(&head[..pos + 2]).to_string();
                return Ok(FetchState::ReadingBody { stream, head, buffer });
            }
            if deadline.guard(stream.read_buf(&mut buffer)).await?? == 0 {
                return Err(ServerError::Client("connection closed inside headers".to_string()));
            }
        }
    }

    async fn read_body(&self, mut stream: TcpStream, head: String, mut buffer: BytesMut) -> ServerResult<FetchState> {
        let mut deadline = self.timeouts.arm(Phase::Content);
        while deadline.guard(stream.read_buf(&mut buffer)).await?? > 0 {}
        info!("fetched {} ({} content bytes)", self.url, buffer.len());

        Ok(FetchState::Done(FetchedResponse {
            head,
            content: buffer.freeze(),
        }))
    }
}

/// Build a fetch for `url`
pub fn create_client(url: &str, method: &str) -> ServerResult<Fetch> {
    Fetch::new(url, method)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_forms() {
        let fetch = Fetch::new("http://www.example.com/a/b?c=d", "GET").unwrap();
        assert_eq!(fetch.host(), "www.example.com");
        assert_eq!(fetch.port(), 80);
        assert_eq!(fetch.path(), "/a/b?c=d");

        let fetch = Fetch::new("example.org", "HEAD").unwrap();
        assert_eq!(fetch.path(), "/");
        assert_eq!(fetch.method(), Method::Head);

        let fetch = Fetch::new("127.0.0.1:8080/status", "GET").unwrap();
        assert_eq!(fetch.host(), "127.0.0.1");
        assert_eq!(fetch.port(), 8080);
        assert_eq!(fetch.path(), "/status");
    }

    #[test]
    fn test_host_without_dot_rejected() {
        assert!(matches!(Fetch::new("localhost/", "GET"), Err(ServerError::Client(_))));
        assert!(matches!(Fetch::new("example.com:http/", "GET"), Err(ServerError::Client(_))));
    }

    #[test]
    fn test_only_get_and_head() {
        assert!(matches!(
            Fetch::new("www.example.com", "POST"),
            Err(ServerError::UnsupportedMethod(m)) if m == "POST"
        ));
        assert!(matches!(
            Fetch::new("www.example.com", "DELETE"),
            Err(ServerError::UnsupportedMethod(_))
        ));
    }

    #[test]
    fn test_request_text() {
        let fetch = Fetch::new("www.example.com/x", "GET").unwrap();
        assert!(fetch.request().starts_with("GET /x HTTP/1.0\r\nHost: www.example.com\r\n"));
        assert!(fetch.request().ends_with("\r\n\r\n"));

        let fetch = Fetch::new("www.example.com", "HEAD").unwrap();
        assert!(fetch.request().starts_with("HEAD / HTTP/1.0\r\n"));
    }

    #[test]
    fn test_fetched_status() {
        let response = FetchedResponse {
            head: "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n".to_string(),
            content: Bytes::new(),
        };
        assert_eq!(response.status(), Some(200));
    }
}
