use async_http_server::buffer::ResponseBuffer;
use async_http_server::cache::{CachedResponse, ResponseCache};
use async_http_server::fileio::FileStamp;
use async_http_server::http::{Method, Request, RequestParser, Response, Status};
use async_http_server::router::Router;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

fn benchmark_http_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("http_parser");
    let parser = RequestParser::new();

    group.bench_function("parse_simple_request", |b| {
        let data = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n";
        b.iter(|| {
            let request = parser.parse(black_box(data));
            assert_eq!(request.method, Some(Method::Get));
        })
    });

    group.bench_function("parse_complex_request", |b| {
        let data = b"POST /api/users HTTP/1.1\r\n\
                     Host: example.com\r\n\
                     User-Agent: Mozilla/5.0\r\n\
                     Accept: text/html,application/xhtml+xml\r\n\
                     Accept-Language: en-US,en;q=0.5\r\n\
                     Content-Type: application/json\r\n\
                     Content-Length: 52\r\n\
                     Connection: keep-alive\r\n\r\n";
        b.iter(|| {
            let request = parser.parse(black_box(data));
            assert_eq!(request.header("content-length"), Some("52"));
        })
    });

    group.finish();
}

fn benchmark_routing(c: &mut Criterion) {
    let mut group = c.benchmark_group("router");

    let mut router = Router::new();
    for i in 0..20 {
        router
            .specific(&format!("^/api/v{}/(\\w+)/(\\d+)$", i), Method::Get, |_: &mut ResponseBuffer, _: &Request| {})
            .unwrap();
    }
    router
        .default_route("^/?123(.*)$", Method::Get, |_: &mut ResponseBuffer, _: &Request| {})
        .unwrap();

    group.bench_function("resolve_specific", |b| {
        b.iter(|| router.resolve(black_box("/api/v7/users/42"), Some(Method::Get)).is_some())
    });

    group.bench_function("resolve_default", |b| {
        b.iter(|| router.resolve(black_box("/123/static/app.js"), Some(Method::Get)).is_some())
    });

    group.bench_function("resolve_miss", |b| {
        b.iter(|| router.resolve(black_box("/nowhere"), Some(Method::Get)).is_none())
    });

    group.finish();
}

fn benchmark_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");

    let cache = ResponseCache::new();
    let stamp = FileStamp {
        len: 4096,
        modified: Some(std::time::UNIX_EPOCH),
    };
    for i in 0..256 {
        let content = vec![b'x'; 4096];
        let entry = CachedResponse::new("HTTP/1.1 200 OK\r\nContent-Length: 4096\r\n", content);
        cache.set(&format!("web/page{}.html", i), Arc::new(entry.with_source(stamp)));
    }

    group.bench_function("get_hit", |b| {
        b.iter(|| cache.get(black_box("web/page128.html")).is_some())
    });

    group.bench_function("get_check_write", |b| {
        let mut out = ResponseBuffer::new(8192);
        b.iter(|| {
            out.clear();
            let entry = cache.get(black_box("web/page7.html")).unwrap();
            assert!(entry.is_current(&stamp));
            entry.write_to(&mut out);
        })
    });

    group.finish();
}

fn benchmark_response_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("response");

    group.bench_function("simple_response", |b| {
        b.iter(|| {
            let mut response = Response::new(Status::Ok);
            response.set_header("Content-Type", "text/plain");
            response.set_body(b"Hello, World!");
            let mut out = ResponseBuffer::new(256);
            response.write_to(&mut out);
            black_box(out.len())
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_http_parsing,
    benchmark_routing,
    benchmark_cache,
    benchmark_response_serialization
);
criterion_main!(benches);
