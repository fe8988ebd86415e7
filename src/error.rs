use std::io;
use thiserror::Error;

/// Main error type for the server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid route pattern {pattern:?}: {source}")]
    RoutePattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Route error: {0}")]
    Route(String),

    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Timed out after {seconds}s while {phase}")]
    Timeout { phase: &'static str, seconds: u64 },

    #[error("Client error: {0}")]
    Client(String),

    #[error("Event loop error: {0}")]
    EventLoop(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rustls::Error> for ServerError {
    fn from(err: rustls::Error) -> Self {
        ServerError::Tls(err.to_string())
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
