use async_http_server::buffer::ResponseBuffer;
use async_http_server::client::{Fetch, FetchedResponse};
use async_http_server::http::{Method, Request};
use async_http_server::server::Server;
use async_http_server::{ServerConfig, ServerError};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Accept one connection, wait for the request head and reply with `reply`
async fn one_shot_server(reply: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut chunk = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&chunk[..n]);
        }
        stream.write_all(reply).await.unwrap();
        stream.shutdown().await.unwrap();
    });

    addr
}

#[tokio::test]
async fn test_fetch_hands_head_and_content_to_callback() {
    let addr = one_shot_server(b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\nhello world").await;
    let url = format!("127.0.0.1:{}/greeting", addr.port());

    let mut received: Option<(String, FetchedResponse)> = None;
    let ok = Fetch::new(&url, "GET")
        .unwrap()
        .with_timeout(5)
        .run(|url, response| received = Some((url.to_string(), response)))
        .await;

    assert!(ok);
    let (called_with, response) = received.expect("callback not invoked");
    assert_eq!(called_with, url);
    assert_eq!(response.head, "HTTP/1.1 200 OK\r\nContent-Length: 11\r\n");
    assert_eq!(&response.content[..], b"hello world");
    assert_eq!(response.status(), Some(200));
}

#[tokio::test]
async fn test_non_200_skips_callback() {
    let addr = one_shot_server(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n").await;
    let fetch = Fetch::new(&format!("127.0.0.1:{}", addr.port()), "GET").unwrap();

    let mut called = false;
    assert!(!fetch.run(|_, _| called = true).await);
    assert!(!called);
}

#[tokio::test]
async fn test_malformed_status_line_is_an_error() {
    let addr = one_shot_server(b"SPDY/9 200 OK\r\n\r\n").await;
    let fetch = Fetch::new(&format!("127.0.0.1:{}", addr.port()), "HEAD").unwrap();

    assert!(matches!(fetch.fetch().await, Err(ServerError::Client(_))));
}

#[test]
fn test_post_rejected_at_construction() {
    assert!(matches!(
        Fetch::new("www.example.com/form", "POST"),
        Err(ServerError::UnsupportedMethod(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fetch_from_own_server() {
    let mut server = Server::new(ServerConfig::new().with_address("127.0.0.1", 0)).unwrap();
    server
        .set_default_logical("^/?(.*)$", Method::Get, |out: &mut ResponseBuffer, request: &Request| {
            let body = format!("path={}", request.capture(0));
            out.put_str(&format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            ));
        })
        .unwrap();
    let running = server.spawn().await.unwrap();

    let url = format!("http://127.0.0.1:{}/some/page", running.local_addr().port());
    let response = Fetch::new(&url, "GET").unwrap().with_timeout(5).fetch().await.unwrap();
    assert_eq!(&response.content[..], b"path=some/page");

    running.shutdown().await.unwrap();
}
