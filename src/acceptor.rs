use crate::connection::{Connection, ServerContext};
use crate::timeout::Phase;
use log::{debug, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;

/// The ConnectionAcceptor owns the listening socket and starts one
/// connection task per accepted stream on the shared runtime.
pub struct ConnectionAcceptor {
    listener: TcpListener,
    connection_count: AtomicUsize,
    tls: Option<TlsAcceptor>,
    context: Arc<ServerContext>,
}

impl ConnectionAcceptor {
    /// Create a listening socket with the configured backlog. This does not
    /// need a runtime; [`ConnectionAcceptor::new`] does.
    pub fn bind(addr: SocketAddr, backlog: u32) -> io::Result<std::net::TcpListener> {
        let socket = Self::create_socket(&addr, backlog)?;
        Ok(socket.into())
    }

    /// Wrap a bound listener. Must be called from within a tokio runtime.
    pub fn new(
        listener: std::net::TcpListener,
        tls: Option<TlsAcceptor>,
        context: Arc<ServerContext>,
    ) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener: TcpListener::from_std(listener)?,
            connection_count: AtomicUsize::new(0),
            tls,
            context,
        })
    }

    /// Get the local address this acceptor is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Accept until `shutdown` holds true. Each accepted stream gets its
    /// own task, so the next accept is issued immediately. A receiver that
    /// already reads true stops the acceptor before the first accept.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow_and_update() {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.dispatch(stream, peer),
                    Err(e) => warn!("accept failed: {}", e),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(
            "acceptor on {:?} stopped after {} connection(s)",
            self.listener.local_addr().ok(),
            self.connection_count.load(Ordering::Relaxed)
        );
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        let id = self.connection_count.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = stream.set_nodelay(true) {
            debug!("connection {}: TCP_NODELAY not set: {}", id, e);
        }
        let context = self.context.clone();

        match self.tls.clone() {
            None => {
                tokio::spawn(Connection::new(stream, peer, id, context).run());
            }
            Some(tls) => {
                tokio::spawn(async move {
                    let mut deadline = context.timeouts.arm(Phase::Request);
                    match deadline.guard(tls.accept(stream)).await {
                        Ok(Ok(tls_stream)) => {
                            deadline.cancel();
                            Connection::new(tls_stream, peer, id, context).run().await;
                        }
                        Ok(Err(e)) => warn!("connection {} from {}: handshake failed: {}", id, peer, e),
                        // the half-finished handshake owned the socket and has been dropped
                        Err(e) => info!("connection {} from {}: {}", id, peer, e),
                    }
                });
            }
        }
    }

    /// Create a properly configured socket
    fn create_socket(addr: &SocketAddr, backlog: u32) -> io::Result<Socket> {
        let domain = if addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

        socket.set_nonblocking(true)?;
        socket.set_reuse_address(true)?;

        #[cfg(unix)]
        socket.set_reuse_port(true)?;

        socket.bind(&(*addr).into())?;
        socket.listen(backlog.min(i32::MAX as u32) as i32)?;

        Ok(socket)
    }
}
