//! Bounded, mutex-guarded log buffer.
//!
//! Lines are queued in memory and written to the sink in batches: whenever
//! the queue is full it is drained before the next line is queued, and
//! [`BufferedLogger::flush`] drains it on demand. The logger doubles as the
//! `log` facade backend so every `info!`/`warn!` in the crate ends up here.

use crate::error::{ServerError, ServerResult};
use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

pub const MAX_QUEUE_SIZE: usize = 512;
pub const MIN_QUEUE_SIZE: usize = 128;

struct Inner {
    queue: VecDeque<String>,
    sink: Box<dyn Write + Send>,
}

impl Inner {
    fn drain(&mut self) {
        for line in self.queue.drain(..) {
            // A failing sink has nowhere to report to.
            let _ = self.sink.write_all(line.as_bytes());
        }
        let _ = self.sink.flush();
    }
}

pub struct BufferedLogger {
    inner: Mutex<Inner>,
    capacity: usize,
    level: LevelFilter,
}

impl BufferedLogger {
    /// Create a logger over an arbitrary sink. The queue capacity is clamped
    /// to `[MIN_QUEUE_SIZE, MAX_QUEUE_SIZE]`.
    pub fn new<W: Write + Send + 'static>(sink: W, capacity: usize, level: LevelFilter) -> Self {
        let capacity = capacity.clamp(MIN_QUEUE_SIZE, MAX_QUEUE_SIZE);
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                sink: Box::new(sink),
            }),
            capacity,
            level,
        }
    }

    /// Open `path` in append mode and log into it
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize, level: LevelFilter) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(file, capacity, level))
    }

    /// Open the log file and register the logger as the global `log` backend.
    pub fn install<P: AsRef<Path>>(
        path: P,
        capacity: usize,
        level: LevelFilter,
    ) -> ServerResult<&'static BufferedLogger> {
        let logger: &'static BufferedLogger = Box::leak(Box::new(Self::open(path, capacity, level)?));
        log::set_logger(logger)
            .map_err(|e| ServerError::Config(format!("logger already installed: {}", e)))?;
        log::set_max_level(level);
        Ok(logger)
    }

    /// Queue one line, draining the queue to the sink first if it is full.
    pub fn commit(&self, location: &str, message: &str, level: Level) {
        let line = format!(
            "{} {} {} {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            level,
            location,
            message
        );

        let mut inner = self.inner.lock();
        if inner.queue.len() >= self.capacity {
            inner.drain();
        }
        inner.queue.push_back(line);
    }

    /// Write every queued line to the sink
    pub fn flush(&self) {
        self.inner.lock().drain();
    }

    /// Number of lines waiting to be written
    pub fn pending(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Log for BufferedLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let location = match (record.module_path(), record.line()) {
            (Some(module), Some(line)) => format!("{}:{}", module, line),
            _ => record.target().to_string(),
        };
        self.commit(&location, &record.args().to_string(), record.level());
    }

    fn flush(&self) {
        BufferedLogger::flush(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedSink {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    #[test]
    fn test_capacity_is_clamped() {
        let logger = BufferedLogger::new(io::sink(), 1, LevelFilter::Info);
        assert_eq!(logger.capacity(), MIN_QUEUE_SIZE);

        let logger = BufferedLogger::new(io::sink(), 100_000, LevelFilter::Info);
        assert_eq!(logger.capacity(), MAX_QUEUE_SIZE);
    }

    #[test]
    fn test_lines_are_buffered_until_flush() {
        let sink = SharedSink::default();
        let logger = BufferedLogger::new(sink.clone(), MIN_QUEUE_SIZE, LevelFilter::Info);

        logger.commit("accept", "connection from 127.0.0.1", Level::Info);
        assert_eq!(logger.pending(), 1);
        assert!(sink.contents().is_empty());

        logger.flush();
        assert_eq!(logger.pending(), 0);
        let text = sink.contents();
        assert!(text.ends_with(" INFO accept connection from 127.0.0.1\n"));
    }

    #[test]
    fn test_full_queue_is_drained_before_insert() {
        let sink = SharedSink::default();
        let logger = BufferedLogger::new(sink.clone(), MIN_QUEUE_SIZE, LevelFilter::Info);

        for i in 0..MIN_QUEUE_SIZE {
            logger.commit("loop", &i.to_string(), Level::Warn);
        }
        assert!(sink.contents().is_empty());

        logger.commit("loop", "overflow", Level::Warn);
        assert_eq!(logger.pending(), 1);
        assert_eq!(sink.contents().lines().count(), MIN_QUEUE_SIZE);
    }

    #[test]
    fn test_records_below_level_are_dropped() {
        let sink = SharedSink::default();
        let logger = BufferedLogger::new(sink.clone(), MIN_QUEUE_SIZE, LevelFilter::Warn);

        logger.log(&Record::builder().level(Level::Info).args(format_args!("quiet")).build());
        logger.log(
            &Record::builder()
                .level(Level::Error)
                .target("router")
                .args(format_args!("loud"))
                .build(),
        );
        Log::flush(&logger);

        let text = sink.contents();
        assert!(!text.contains("quiet"));
        assert!(text.contains("ERROR router loud"));
    }
}
