//! Fast server over TCP.

use crate::connection::Connection;
use dashmap::DashMap;
use proven_fast_rpc::{ApiDispatcher, BinarySession, MAX_FRAME_SIZE, Result, SessionConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

/// Configuration for the TCP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum frame size.
    pub max_frame_size: usize,
    /// Settings for every accepted session.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_frame_size: MAX_FRAME_SIZE,
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Set the maximum number of concurrent connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the maximum frame size.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the session settings.
    #[must_use]
    pub const fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }
}

/// Accepts TCP connections and runs one Fast session per connection.
///
/// Every accepted session answers requests through the server's dispatcher
/// and stays reachable through [`TcpServer::session`], so the server can call
/// APIs on connected peers as well.
pub struct TcpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    dispatcher: Arc<dyn ApiDispatcher>,
    config: ServerConfig,
    sessions: Arc<DashMap<SocketAddr, Arc<BinarySession>>>,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl TcpServer {
    /// Bind a server to `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        dispatcher: Arc<dyn ApiDispatcher>,
        config: ServerConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            dispatcher,
            config,
            sessions: Arc::new(DashMap::new()),
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        })
    }

    /// The address the server is listening on.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Session of the peer connected from `peer`, if any.
    #[must_use]
    pub fn session(&self, peer: &SocketAddr) -> Option<Arc<BinarySession>> {
        self.sessions.get(peer).map(|entry| Arc::clone(entry.value()))
    }

    /// Addresses of all connected peers.
    #[must_use]
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    /// Accept connections until [`TcpServer::shutdown`] is called.
    ///
    /// # Errors
    ///
    /// Currently never fails; accept errors are logged and skipped.
    #[instrument(skip(self), fields(addr = %self.local_addr))]
    pub async fn serve(&self) -> Result<()> {
        info!("Fast server listening on {}", self.local_addr);

        let semaphore = Arc::new(Semaphore::new(self.config.max_connections));

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                                warn!("Max connections reached, rejecting connection from {}", addr);
                                continue;
                            };

                            debug!("Accepted connection from {}", addr);
                            let connection = Connection::new(
                                stream,
                                addr,
                                self.config.max_frame_size,
                                self.config.session.clone(),
                                Some(Arc::clone(&self.dispatcher)),
                            );
                            self.sessions.insert(addr, Arc::clone(connection.session()));

                            let sessions = Arc::clone(&self.sessions);
                            let shutdown_token = self.shutdown_token.clone();
                            self.task_tracker.spawn(async move {
                                connection.run(shutdown_token).await;
                                sessions.remove(&addr);
                                debug!("Connection from {} finished", addr);
                                drop(permit);
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                () = self.shutdown_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Stop accepting, close every connection and wait for them to finish.
    ///
    /// Calls still pending on any session fail with a connection-closed error.
    pub async fn shutdown(&self) {
        info!("Fast server shutting down...");

        self.shutdown_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("Fast server shutdown");
    }
}

impl std::fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("local_addr", &self.local_addr)
            .field("connections", &self.sessions.len())
            .finish_non_exhaustive()
    }
}
