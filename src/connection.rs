use crate::buffer::ResponseBuffer;
use crate::cache::ResponseCache;
use crate::error::ServerError;
use crate::http::{Request, RequestParser};
use crate::router::{RouteMatch, Router};
use crate::templates;
use crate::timeout::{Phase, TimeoutSupervisor};
use bytes::{Bytes, BytesMut};
use log::{debug, error, info, warn};
use socket2::SockRef;
use std::any::Any;
use std::net::{Shutdown, SocketAddr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// A byte stream a connection can run over
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Shut the underlying socket down in both directions right away
    fn shutdown_both(&self);
}

impl Transport for TcpStream {
    fn shutdown_both(&self) {
        let _ = SockRef::from(self).shutdown(Shutdown::Both);
    }
}

impl Transport for TlsStream<TcpStream> {
    fn shutdown_both(&self) {
        self.get_ref().0.shutdown_both();
    }
}

/// Everything a connection needs that is shared across the server
pub struct ServerContext {
    pub router: Router,
    pub cache: Arc<ResponseCache>,
    pub timeouts: TimeoutSupervisor,
    pub parser: RequestParser,
    pub max_header_size: usize,
    pub max_request_size: usize,
    pub initial_buffer_size: usize,
}

/// Where a connection is in its current exchange. Each state carries the
/// data its next step needs.
#[derive(Debug)]
pub enum ConnectionState {
    AwaitHeaders,
    /// The header block ends at `head_end` in the read buffer
    ParsingHeaders { head_end: usize },
    AwaitBody { request: Request, content_length: usize },
    Routing(Request),
    HandlerRunning { request: Request, route: RouteMatch },
    Writing { response: Bytes, keep_alive: bool },
    Closed,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::AwaitHeaders => "AwaitHeaders",
            ConnectionState::ParsingHeaders { .. } => "ParsingHeaders",
            ConnectionState::AwaitBody { .. } => "AwaitBody",
            ConnectionState::Routing(_) => "Routing",
            ConnectionState::HandlerRunning { .. } => "HandlerRunning",
            ConnectionState::Writing { .. } => "Writing",
            ConnectionState::Closed => "Closed",
        }
    }
}

/// Outcome of reading more bytes into the buffer
enum ReadOutcome {
    Data,
    Eof,
    Failed,
}

/// One live transport and the exchange in flight on it
pub struct Connection<S: Transport> {
    stream: S,
    peer_addr: SocketAddr,
    id: usize,
    state: ConnectionState,
    buffer: BytesMut,
    context: Arc<ServerContext>,
    exchanges: usize,
}

impl<S: Transport> Connection<S> {
    pub fn new(stream: S, peer_addr: SocketAddr, id: usize, context: Arc<ServerContext>) -> Self {
        Self {
            stream,
            peer_addr,
            id,
            state: ConnectionState::AwaitHeaders,
            buffer: BytesMut::with_capacity(context.initial_buffer_size),
            context,
            exchanges: 0,
        }
    }

    /// Get the connection's peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Get the connection's unique ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Drive the connection until it closes
    pub async fn run(mut self) {
        loop {
            let state = std::mem::replace(&mut self.state, ConnectionState::Closed);
            self.state = match state {
                ConnectionState::AwaitHeaders => self.await_headers().await,
                ConnectionState::ParsingHeaders { head_end } => self.parse_headers(head_end),
                ConnectionState::AwaitBody {
                    request,
                    content_length,
                } => self.await_body(request, content_length).await,
                ConnectionState::Routing(request) => self.route(request),
                ConnectionState::HandlerRunning { request, route } => self.run_handler(request, route),
                ConnectionState::Writing {
                    response,
                    keep_alive,
                } => self.write_response(response, keep_alive).await,
                ConnectionState::Closed => break,
            };
        }
        debug!(
            "connection {} from {} closed after {} exchange(s)",
            self.id, self.peer_addr, self.exchanges
        );
    }

    fn read_more(&self, result: Result<std::io::Result<usize>, ServerError>) -> ReadOutcome {
        match result {
            Ok(Ok(0)) => ReadOutcome::Eof,
            Ok(Ok(_)) => ReadOutcome::Data,
            Ok(Err(e)) => {
                warn!("connection {}: read failed: {}", self.id, e);
                ReadOutcome::Failed
            }
            Err(e) => {
                self.abort(&e);
                ReadOutcome::Failed
            }
        }
    }

    async fn await_headers(&mut self) -> ConnectionState {
        let mut deadline = self.context.timeouts.arm(Phase::Request);
        loop {
            if let Some(pos) = find(&self.buffer, HEADER_TERMINATOR) {
                deadline.cancel();
                return ConnectionState::ParsingHeaders {
                    head_end: pos + HEADER_TERMINATOR.len(),
                };
            }
            if self.buffer.len() > self.context.max_header_size {
                warn!(
                    "connection {}: header block exceeds {} bytes",
                    self.id, self.context.max_header_size
                );
                return ConnectionState::Closed;
            }

            let result = deadline.guard(self.stream.read_buf(&mut self.buffer)).await;
            match self.read_more(result) {
                ReadOutcome::Data => {}
                ReadOutcome::Eof => {
                    if !self.buffer.is_empty() {
                        debug!("connection {}: peer closed mid-request", self.id);
                    }
                    return ConnectionState::Closed;
                }
                ReadOutcome::Failed => return ConnectionState::Closed,
            }
        }
    }

    fn parse_headers(&mut self, head_end: usize) -> ConnectionState {
        let head = self.buffer.split_to(head_end);
        let request = self.context.parser.parse(&head);

        let Some(declared) = request.header("content-length") else {
            return ConnectionState::Routing(request);
        };
        let buffered = self.buffer.len();
        let content_length = match declared.trim().parse::<i64>() {
            Ok(length) if length >= 0 && length as u64 > self.context.max_request_size as u64 => {
                warn!(
                    "connection {}: Content-Length {} exceeds the {} byte limit",
                    self.id, length, self.context.max_request_size
                );
                return ConnectionState::Closed;
            }
            Ok(length) if length >= 0 => {
                if (length as u64) < buffered as u64 {
                    warn!(
                        "connection {}: Content-Length {} is smaller than the {} bytes already buffered",
                        self.id, length, buffered
                    );
                }
                length as usize
            }
            _ => {
                warn!(
                    "connection {}: unusable Content-Length {:?}, treating the body as empty",
                    self.id, declared
                );
                0
            }
        };

        ConnectionState::AwaitBody {
            request,
            content_length,
        }
    }

    async fn await_body(&mut self, mut request: Request, content_length: usize) -> ConnectionState {
        if self.buffer.len() < content_length {
            let mut deadline = self.context.timeouts.arm(Phase::Content);

            while self.buffer.len() < content_length {
                let result = deadline.guard(self.stream.read_buf(&mut self.buffer)).await;
                match self.read_more(result) {
                    ReadOutcome::Data => {}
                    ReadOutcome::Eof => {
                        debug!(
                            "connection {}: peer closed with {} of {} body bytes",
                            self.id,
                            self.buffer.len(),
                            content_length
                        );
                        return ConnectionState::Closed;
                    }
                    ReadOutcome::Failed => return ConnectionState::Closed,
                }
            }
            deadline.cancel();
        }

        request.set_body(self.buffer.split_to(content_length).freeze());
        ConnectionState::Routing(request)
    }

    fn route(&mut self, mut request: Request) -> ConnectionState {
        request.address = Some(self.peer_addr.ip());

        match self.context.router.resolve(&request.path, request.method) {
            Some(route) => {
                info!("{} {} from {}", request.raw_method, request.path, self.peer_addr.ip());
                ConnectionState::HandlerRunning { request, route }
            }
            None => {
                info!(
                    "no route for {:?} {:?} from {}",
                    request.raw_method,
                    request.path,
                    self.peer_addr.ip()
                );
                ConnectionState::Writing {
                    response: Bytes::from_static(templates::BAD_REQUEST.as_bytes()),
                    keep_alive: request.keep_alive(),
                }
            }
        }
    }

    fn run_handler(&mut self, mut request: Request, route: RouteMatch) -> ConnectionState {
        request.set_captures(route.captures);
        let mut out = ResponseBuffer::new(self.context.initial_buffer_size);

        let handler = route.handler;
        let outcome = catch_unwind(AssertUnwindSafe(|| handler(&mut out, &request)));
        if let Err(panic) = outcome {
            error!(
                "connection {}: handler for {} {} panicked: {}",
                self.id,
                request.raw_method,
                request.path,
                panic_message(panic.as_ref())
            );
            return ConnectionState::Closed;
        }

        ConnectionState::Writing {
            response: out.freeze(),
            keep_alive: request.keep_alive(),
        }
    }

    async fn write_response(&mut self, response: Bytes, keep_alive: bool) -> ConnectionState {
        let mut deadline = self.context.timeouts.arm(Phase::Content);
        let stream = &mut self.stream;
        let result = deadline
            .guard(async {
                stream.write_all(&response).await?;
                stream.flush().await?;
                if !keep_alive {
                    stream.shutdown().await?;
                }
                Ok::<(), std::io::Error>(())
            })
            .await;
        deadline.cancel();

        match result {
            Ok(Ok(())) => {
                self.exchanges += 1;
                if keep_alive {
                    ConnectionState::AwaitHeaders
                } else {
                    ConnectionState::Closed
                }
            }
            Ok(Err(e)) => {
                warn!("connection {}: write failed: {}", self.id, e);
                ConnectionState::Closed
            }
            Err(e) => {
                self.abort(&e);
                ConnectionState::Closed
            }
        }
    }

    /// Timeout expiry: no drain, the socket is shut in both directions
    fn abort(&self, reason: &ServerError) {
        info!("connection {} from {}: {}", self.id, self.peer_addr, reason);
        self.stream.shutdown_both();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
