//! Canned responses and outbound request templates.
//!
//! Placeholders are `$name` tokens replaced verbatim; `$length` and
//! `$content` are filled by [`render`] from the payload bytes.

/// 200 with a keep-alive connection
pub const OK: &str = "HTTP/1.1 200 OK\r\n\
                      Connection: Keep-Alive\r\n\
                      Content-Type: $type\r\n\
                      Content-Length: $length\r\n\
                      \r\n\
                      $content";

pub const NOT_FOUND: &str = "HTTP/1.0 404 Not Found\r\n\
                             Connection: Close\r\n\
                             Content-Length: $length\r\n\
                             \r\n\
                             $content";

pub const BAD_REQUEST: &str = "HTTP/1.0 400 Bad Request\r\n\
                               Connection: Close\r\n\
                               Content-Length: 24\r\n\
                               \r\n\
                               <html>Bad Request</html>";

pub const GET: &str = "GET $path HTTP/1.0\r\n\
                       Host: $host\r\n\
                       Accept: text/html,application/xhtml+xml\r\n\
                       User-Agent: async-http-server/0.1\r\n\
                       Connection: close\r\n\
                       \r\n";

pub const HEAD: &str = "HEAD $path HTTP/1.0\r\n\
                        Host: $host\r\n\
                        User-Agent: async-http-server/0.1\r\n\
                        Connection: close\r\n\
                        \r\n";

pub const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Replace every occurrence of each placeholder, in order
pub fn fill(template: &str, pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .fold(template.to_string(), |text, (placeholder, value)| {
            text.replace(placeholder, value)
        })
}

/// Fill `template` and splice `content` in place of `$content`, setting
/// `$length` to the payload size. Binary payloads pass through untouched.
pub fn render(template: &str, pairs: &[(&str, &str)], content: &[u8]) -> Vec<u8> {
    let length = content.len().to_string();
    let mut all: Vec<(&str, &str)> = pairs.to_vec();
    all.push(("$length", &length));
    let text = fill(template, &all);

    let mut out = Vec::with_capacity(text.len() + content.len());
    match text.split_once("$content") {
        Some((before, after)) => {
            out.extend_from_slice(before.as_bytes());
            out.extend_from_slice(content);
            out.extend_from_slice(after.as_bytes());
        }
        None => out.extend_from_slice(text.as_bytes()),
    }
    out
}
