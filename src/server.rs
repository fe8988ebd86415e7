//! Server facade: route registration, the shared cache, signal handlers and
//! the worker runtime's lifecycle.

use crate::acceptor::ConnectionAcceptor;
use crate::buffer::ResponseBuffer;
use crate::cache::ResponseCache;
use crate::config::ServerConfig;
use crate::connection::ServerContext;
use crate::error::{ServerError, ServerResult};
use crate::http::{Method, Request, RequestParser};
use crate::router::{Router, Tier};
use crate::timeout::TimeoutSupervisor;
use crate::tls;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

/// Called with the signal number when a registered signal is delivered
pub type SignalHandler = Arc<dyn Fn(i32) + Send + Sync>;

/// Signals a process cannot (or must not) install handlers for
#[cfg(unix)]
const FORBIDDEN_SIGNALS: [i32; 5] = [
    libc::SIGKILL,
    libc::SIGSTOP,
    libc::SIGILL,
    libc::SIGFPE,
    libc::SIGSEGV,
];

fn logged<T>(result: ServerResult<T>, what: &str) -> ServerResult<T> {
    if let Err(e) = &result {
        error!("{}: {}", what, e);
    }
    result
}

pub struct Server {
    config: ServerConfig,
    router: Router,
    cache: Arc<ResponseCache>,
    tls: Option<TlsAcceptor>,
    signals: Vec<(i32, SignalHandler)>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Server {
    /// Validate the configuration and load TLS material if configured.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        logged(config.validate(), "invalid configuration")?;
        let tls = match &config.tls {
            Some(tls_config) => Some(logged(tls::acceptor(tls_config), "TLS setup failed")?),
            None => None,
        };
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            router: Router::new(),
            cache: Arc::new(ResponseCache::new()),
            tls,
            signals: Vec::new(),
            shutdown: Arc::new(shutdown),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Register a handler in the high-priority tier
    pub fn set_specific_logical<F>(&mut self, pattern: &str, method: Method, handler: F) -> ServerResult<()>
    where
        F: Fn(&mut ResponseBuffer, &Request) + Send + Sync + 'static,
    {
        self.router.register(pattern, method, handler, Tier::Specific)
    }

    /// Register a handler consulted only when no specific route applies
    pub fn set_default_logical<F>(&mut self, pattern: &str, method: Method, handler: F) -> ServerResult<()>
    where
        F: Fn(&mut ResponseBuffer, &Request) + Send + Sync + 'static,
    {
        self.router.register(pattern, method, handler, Tier::Default)
    }

    /// The response cache shared by every handler
    pub fn cache(&self) -> Arc<ResponseCache> {
        self.cache.clone()
    }

    /// Run `handler` whenever signal `signum` is delivered while serving.
    /// A second registration for the same signal replaces the first.
    #[cfg(unix)]
    pub fn set_signal_handler<F>(&mut self, signum: i32, handler: F) -> ServerResult<()>
    where
        F: Fn(i32) + Send + Sync + 'static,
    {
        if signum <= 0 || FORBIDDEN_SIGNALS.contains(&signum) {
            return logged(
                Err(ServerError::Config(format!("cannot handle signal {}", signum))),
                "signal registration",
            );
        }
        self.signals.retain(|(registered, _)| *registered != signum);
        self.signals.push((signum, Arc::new(handler)));
        info!("signal {} registered", signum);
        Ok(())
    }

    /// A handle that can stop the server from another thread or a handler
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Bind and start accepting on the current tokio runtime.
    pub async fn spawn(self) -> ServerResult<RunningServer> {
        let addr = self.config.socket_address()?;
        let listener = logged(
            ConnectionAcceptor::bind(addr, self.config.backlog_size).map_err(ServerError::from),
            "bind failed",
        )?;

        let context = Arc::new(ServerContext {
            router: self.router,
            cache: self.cache.clone(),
            timeouts: TimeoutSupervisor::new(self.config.request_timeout, self.config.content_timeout),
            parser: RequestParser::new(),
            max_header_size: self.config.max_header_size,
            max_request_size: self.config.max_request_size,
            initial_buffer_size: self.config.initial_buffer_size,
        });
        let acceptor = ConnectionAcceptor::new(listener, self.tls, context)?;
        let local_addr = acceptor.local_addr()?;

        #[cfg(unix)]
        arm_signals(&self.signals)?;

        info!(
            "serving {} on {}, {} worker thread(s), timeouts {}s/{}s",
            if acceptor.is_tls() { "https" } else { "http" },
            local_addr,
            self.config.effective_worker_threads(),
            self.config.request_timeout,
            self.config.content_timeout
        );

        let handle = ServerHandle {
            shutdown: self.shutdown.clone(),
        };
        let task = tokio::spawn(acceptor.run(self.shutdown.subscribe()));

        Ok(RunningServer {
            local_addr,
            handle,
            task,
        })
    }

    /// Serve on a dedicated pool of `worker_threads` threads until stopped.
    /// The worker threads are joined before this returns.
    pub fn start(self) -> ServerResult<()> {
        let threads = self.config.effective_worker_threads();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name("http-worker")
            .enable_all()
            .build()?;

        let result = runtime.block_on(async move {
            let running = self.spawn().await?;
            running.wait().await
        });

        drop(runtime);
        log::logger().flush();
        result
    }
}

#[cfg(unix)]
fn arm_signals(signals: &[(i32, SignalHandler)]) -> ServerResult<()> {
    use tokio::signal::unix::{signal, SignalKind};

    for (signum, handler) in signals {
        let signum = *signum;
        let mut stream = logged(
            signal(SignalKind::from_raw(signum)).map_err(ServerError::from),
            "signal setup failed",
        )?;
        let handler = handler.clone();
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                warn!("caught signal {}", signum);
                handler(signum);
            }
        });
    }
    Ok(())
}

/// Stops a running server
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: Arc<watch::Sender<bool>>,
}

impl ServerHandle {
    /// Stop accepting connections and flush the log
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
        info!("server stopping");
        log::logger().flush();
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// A server accepting on the current runtime
pub struct RunningServer {
    local_addr: SocketAddr,
    handle: ServerHandle,
    task: JoinHandle<()>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Wait for the accept loop to finish
    pub async fn wait(self) -> ServerResult<()> {
        self.task
            .await
            .map_err(|e| ServerError::EventLoop(format!("acceptor task failed: {}", e)))
    }

    /// Stop accepting and wait for the accept loop to exit
    pub async fn shutdown(self) -> ServerResult<()> {
        self.handle.stop();
        self.wait().await
    }
}
