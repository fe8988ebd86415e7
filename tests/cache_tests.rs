use async_http_server::cache::{CachedResponse, ResponseCache};
use async_http_server::fileio::FileStamp;
use rand::Rng;
use std::sync::Arc;
use std::thread;

fn uniform(fill: u8, len: usize) -> Arc<CachedResponse> {
    let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n", len);
    Arc::new(CachedResponse::new(head.into_bytes(), vec![fill; len]).with_source(stamp(len)))
}

fn stamp(len: usize) -> FileStamp {
    FileStamp {
        len: len as u64,
        modified: None,
    }
}

#[test]
fn test_concurrent_readers_never_see_a_mixture() {
    let cache = Arc::new(ResponseCache::new());
    cache.set("/index.html", uniform(b'a', 64));

    let writer = {
        let cache = cache.clone();
        thread::spawn(move || {
            let mut rng = rand::thread_rng();
            for _ in 0..500 {
                let fill = rng.gen_range(b'a'..=b'z');
                let len = rng.gen_range(1..4096);
                cache.set("/index.html", uniform(fill, len));
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            thread::spawn(move || {
                for _ in 0..2000 {
                    let entry = cache.get("/index.html").expect("entry present");
                    let content = entry.content();
                    assert!(entry.is_current(&stamp(content.len())));
                    assert!(content.iter().all(|&b| b == content[0]));

                    let head = String::from_utf8_lossy(entry.head()).to_string();
                    assert!(head.contains(&format!("Content-Length: {}\r\n", content.len())));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_held_entry_survives_replacement() {
    let cache = ResponseCache::new();
    cache.set("k", uniform(b'x', 8));
    let held = cache.get("k").unwrap();
    cache.set("k", uniform(b'y', 2));

    assert_eq!(held.content(), b"xxxxxxxx");
    assert!(held.is_current(&stamp(8)));
    assert!(!cache.get("k").unwrap().is_current(&stamp(8)));
}
