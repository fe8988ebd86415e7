use crate::error::{ServerError, ServerResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};

/// Hard upper bound on the worker pool size
pub const MAX_THREADS: usize = 64;

/// Certificate material for the encrypted transport
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM file holding the certificate chain, leaf first
    pub cert_chain: PathBuf,
    /// PEM file holding the private key
    pub private_key: PathBuf,
    /// Optional PEM bundle used to verify client certificates
    #[serde(default)]
    pub verify_ca: Option<PathBuf>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    // Network configuration
    pub listen_address: String,
    pub port: u16,
    pub backlog_size: u32,

    // Thread configuration
    pub worker_threads: usize,

    // Timeouts in seconds, zero disables the deadline for that phase
    pub request_timeout: u64,
    pub content_timeout: u64,

    // HTTP configuration
    pub initial_buffer_size: usize,
    pub max_header_size: usize,
    pub max_request_size: usize,

    // Logging
    pub log_file: PathBuf,
    pub log_queue_size: usize,
    pub log_level: String,

    // Encrypted transport, plain TCP when absent
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            port: 8888,
            backlog_size: 1024,

            worker_threads: num_cpus::get().min(MAX_THREADS),

            request_timeout: 5,
            content_timeout: 300,

            initial_buffer_size: 4 * 1024, // 4 KB
            max_header_size: 16 * 1024,    // 16 KB
            max_request_size: 1024 * 1024, // 1 MB

            log_file: PathBuf::from("server.log"),
            log_queue_size: 512,
            log_level: "info".to_string(),

            tls: None,
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the address and port to listen on
    pub fn with_address(mut self, address: &str, port: u16) -> Self {
        self.listen_address = address.to_string();
        self.port = port;
        self
    }

    /// Set the number of worker threads
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set the request-header and content timeouts, in seconds
    pub fn with_timeouts(mut self, request_timeout: u64, content_timeout: u64) -> Self {
        self.request_timeout = request_timeout;
        self.content_timeout = content_timeout;
        self
    }

    pub fn with_max_header_size(mut self, size: usize) -> Self {
        self.max_header_size = size;
        self
    }

    /// Largest accepted Content-Length
    pub fn with_max_request_size(mut self, size: usize) -> Self {
        self.max_request_size = size;
        self
    }

    pub fn with_log_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.log_file = path.into();
        self
    }

    /// Serve over TLS with the given certificate material
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Worker count after clamping to `1..=MAX_THREADS`
    pub fn effective_worker_threads(&self) -> usize {
        self.worker_threads.clamp(1, MAX_THREADS)
    }

    /// Get the socket address to bind; only IPv4 is accepted
    pub fn socket_address(&self) -> ServerResult<SocketAddr> {
        let ip: Ipv4Addr = self.listen_address.parse().map_err(|_| {
            ServerError::Config(format!(
                "listen address {:?} is not an IPv4 address",
                self.listen_address
            ))
        })?;
        Ok(SocketAddr::V4(SocketAddrV4::new(ip, self.port)))
    }

    /// Check the values that cannot be clamped into range
    pub fn validate(&self) -> ServerResult<()> {
        self.socket_address()?;
        if self.max_header_size == 0 {
            return Err(ServerError::Config("max_header_size must be positive".to_string()));
        }
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ServerResult<Self> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_json_file<P: AsRef<Path>>(&self, path: P) -> ServerResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
