//! Response cache shared by all worker threads.
//!
//! One table-wide reader/writer lock: concurrent `get`s proceed in parallel,
//! a `set` excludes everything else. Values are handed out as `Arc`s so a
//! later `set` never mutates bytes a reader still holds.

use crate::buffer::ResponseBuffer;
use crate::fileio::FileStamp;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A rendered response split into head and payload.
///
/// `head` is the status line plus headers, each CRLF-terminated, without
/// the blank line that ends the header block. `source` records the file the
/// payload was read from, so a hit can be checked against the file on disk
/// without reading it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    head: Bytes,
    content: Bytes,
    source: Option<FileStamp>,
}

impl CachedResponse {
    pub fn new(head: impl Into<Bytes>, content: impl Into<Bytes>) -> Self {
        Self {
            head: head.into(),
            content: content.into(),
            source: None,
        }
    }

    /// Split a full response at its header terminator. Bytes without a
    /// terminator are treated as a head with no content.
    pub fn from_rendered(rendered: &[u8]) -> Self {
        match rendered.windows(4).position(|w| w == b"\r\n\r\n") {
            Some(pos) => Self::new(
                Bytes::copy_from_slice(&rendered[..pos + 2]),
                Bytes::copy_from_slice(&rendered[pos + 4..]),
            ),
            None => Self::new(Bytes::copy_from_slice(rendered), Bytes::new()),
        }
    }

    pub fn with_source(mut self, stamp: FileStamp) -> Self {
        self.source = Some(stamp);
        self
    }

    pub fn head(&self) -> &[u8] {
        &self.head
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn source(&self) -> Option<FileStamp> {
        self.source
    }

    /// False once the source file no longer carries the recorded stamp.
    /// Entries without a source are always current.
    pub fn is_current(&self, stamp: &FileStamp) -> bool {
        self.source.map_or(true, |source| source == *stamp)
    }

    /// Write head, blank line and content back out
    pub fn write_to(&self, out: &mut ResponseBuffer) {
        out.put(&self.head);
        out.put(b"\r\n");
        out.put(&self.content);
    }
}

/// Concurrent key to response map without eviction
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: RwLock<HashMap<String, Arc<CachedResponse>>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<CachedResponse>> {
        self.entries.read().get(key).cloned()
    }

    /// Insert or replace. Returns `true` when an existing entry was replaced.
    pub fn set(&self, key: &str, value: Arc<CachedResponse>) -> bool {
        self.entries.write().insert(key.to_string(), value).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
