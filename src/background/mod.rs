//! Background server — a [`Router`] served from its own thread and runtime.
//!
//! [`BackgroundServer::start`] and [`BackgroundServer::stop`] are synchronous
//! from the caller's point of view. `start` spawns a dedicated OS thread that
//! owns a multi-threaded Tokio runtime, binds the listener there, and reports
//! the bind result back over a channel; the caller blocks on that report.
//! `stop` sends a one-shot shutdown signal and joins the thread, so once it
//! returns the port is released and a later `start` may bind a different one.

use std::net::SocketAddr;
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::router::Router;
use crate::server::{Server, ServerError};

/// Default idle-connection and body-read timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Start-up options for a [`BackgroundServer`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rttp_provide::background::ServerConfig;
///
/// let config = ServerConfig::default()
///     .port(8765)
///     .timeout(Duration::from_millis(500))
///     .daemon(false);
/// assert_eq!(config.port, Some(8765));
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind on all interfaces. `None` asks the OS for an unused port.
    pub port: Option<u16>,
    /// Idle-connection and body-read timeout. Also bounds how long `stop`
    /// waits for in-flight resource reads.
    pub timeout: Duration,
    /// When `true`, dropping a running server only signals shutdown; when
    /// `false`, dropping also waits for the serving thread to exit.
    pub daemon: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: None,
            timeout: DEFAULT_TIMEOUT,
            daemon: true,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }
}

// State that only exists while the server is running.
struct Running {
    port: u16,
    daemon: bool,
    shutdown: oneshot::Sender<()>,
    thread: JoinHandle<()>,
}

/// An HTTP listener on a single port, served from its own thread.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rttp_provide::background::{BackgroundServer, ServerConfig};
/// use rttp_provide::{Context, Response, Router, StatusCode};
///
/// let mut router = Router::new();
/// router.get("/", |_ctx: Context| async { Response::new(StatusCode::Ok).body("up") });
///
/// let mut server = BackgroundServer::new(Arc::new(router));
/// server.start(&ServerConfig::default())?;
/// println!("serving on port {}", server.port()?);
/// server.stop();
/// # Ok::<(), rttp_provide::ServerError>(())
/// ```
pub struct BackgroundServer {
    router: Arc<Router>,
    running: Option<Running>,
}

impl BackgroundServer {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            running: None,
        }
    }

    /// The dispatch table this server answers from.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Returns the bound port.
    ///
    /// # Errors
    ///
    /// [`ServerError::NotRunning`] if the server has not been started or has
    /// been stopped.
    pub fn port(&self) -> Result<u16, ServerError> {
        self.running
            .as_ref()
            .map(|running| running.port)
            .ok_or(ServerError::NotRunning)
    }

    /// Starts serving, blocking until the listener is bound.
    ///
    /// Does nothing if the server is already running, even when `config`
    /// names a different port.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Bind`] if the port cannot be bound; nothing is left running.
    /// - [`ServerError::Runtime`] if the serving thread or its runtime cannot be created.
    pub fn start(&mut self, config: &ServerConfig) -> Result<&mut Self, ServerError> {
        if self.running.is_some() {
            return Ok(self);
        }

        let addr = format!("0.0.0.0:{}", config.port.unwrap_or(0));
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<SocketAddr, ServerError>>(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let router = Arc::clone(&self.router);
        let timeout = config.timeout;

        let thread = thread::Builder::new()
            .name("resource-server".into())
            .spawn(move || serve(addr, router, timeout, ready_tx, shutdown_rx))
            .map_err(ServerError::Runtime)?;

        let bound = match ready_rx.recv() {
            Ok(result) => result,
            // The thread died before reporting; surface whatever it left behind.
            Err(_) => Err(ServerError::Runtime(std::io::Error::other(
                "server thread exited before binding",
            ))),
        };

        match bound {
            Ok(local_addr) => {
                info!(port = local_addr.port(), "background server started");
                self.running = Some(Running {
                    port: local_addr.port(),
                    daemon: config.daemon,
                    shutdown: shutdown_tx,
                    thread,
                });
                Ok(self)
            }
            Err(e) => {
                if thread.join().is_err() {
                    error!("server thread panicked during start-up");
                }
                Err(e)
            }
        }
    }

    /// Stops serving and waits for the serving thread to exit.
    ///
    /// Does nothing if the server is not running.
    pub fn stop(&mut self) -> &mut Self {
        let Some(running) = self.running.take() else {
            return self;
        };

        // The receiver is gone only if the serving thread already exited.
        let _ = running.shutdown.send(());
        if running.thread.join().is_err() {
            error!(port = running.port, "server thread panicked");
        }
        info!(port = running.port, "background server stopped");
        self
    }
}

impl Drop for BackgroundServer {
    fn drop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.shutdown.send(());
        if running.daemon {
            debug!(port = running.port, "detaching background server thread");
        } else if running.thread.join().is_err() {
            error!(port = running.port, "server thread panicked");
        }
    }
}

// Body of the serving thread: build a runtime, bind, report, serve until told to stop.
fn serve(
    addr: String,
    router: Arc<Router>,
    timeout: Duration,
    ready: mpsc::SyncSender<Result<SocketAddr, ServerError>>,
    shutdown: oneshot::Receiver<()>,
) {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("resource-server-worker")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(ServerError::Runtime(e)));
            return;
        }
    };

    runtime.block_on(async move {
        let server = match Server::bind(&addr).await {
            Ok(server) => server,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        if ready.send(Ok(server.local_addr())).is_err() {
            return;
        }

        let handler = move |request| {
            let router = Arc::clone(&router);
            async move { router.route(request).await }
        };
        server
            .run_until(handler, timeout, async {
                let _ = shutdown.await;
            })
            .await;
    });

    // Bound the wait for resource reads still running on blocking threads.
    runtime.shutdown_timeout(timeout);
    debug!("server runtime shut down");
}
