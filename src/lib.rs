pub mod acceptor;
pub mod buffer;
pub mod cache;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod fileio;
pub mod http;
pub mod logger;
pub mod router;
pub mod server;
pub mod static_files;
pub mod templates;
pub mod timeout;
pub mod tls;

/// Re-exports of common components for easier access
pub use acceptor::ConnectionAcceptor;
pub use buffer::ResponseBuffer;
pub use cache::{CachedResponse, ResponseCache};
pub use client::{create_client, Fetch, FetchedResponse};
pub use config::{ServerConfig, TlsConfig};
pub use connection::{Connection, ConnectionState, ServerContext, Transport};
pub use error::{ServerError, ServerResult};
pub use fileio::{FileStamp, MappedFile};
pub use http::{Method, Request, RequestParser, Response, Status};
pub use logger::BufferedLogger;
pub use router::{HandlerFn, RouteMatch, Router, Tier};
pub use server::{RunningServer, Server, ServerHandle};
pub use static_files::{add_static_file_routes, echo_handler, static_file_handler, StaticFileConfig};
pub use timeout::{Deadline, Phase, TimeoutSupervisor};
