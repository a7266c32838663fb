//! Fast server over WebSocket.

use crate::connection::Connection;
use crate::error::Result;
use dashmap::DashMap;
use proven_fast_rpc::{ApiDispatcher, SessionConfig, TextSession};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

/// Configuration for the WebSocket server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Settings for every accepted session.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
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

    /// Set the session settings.
    #[must_use]
    pub const fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }
}

/// Accepts WebSocket connections and runs one Fast session per connection.
pub struct WsServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    dispatcher: Arc<dyn ApiDispatcher>,
    config: ServerConfig,
    sessions: Arc<DashMap<SocketAddr, Arc<TextSession>>>,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl WsServer {
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

    /// The `ws://` URL clients connect to.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Session of the peer connected from `peer`, if any.
    #[must_use]
    pub fn session(&self, peer: &SocketAddr) -> Option<Arc<TextSession>> {
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

    /// Accept connections until [`WsServer::shutdown`] is called.
    ///
    /// # Errors
    ///
    /// Currently never fails; accept and handshake errors are logged and skipped.
    #[instrument(skip(self), fields(addr = %self.local_addr))]
    pub async fn serve(&self) -> Result<()> {
        info!("Fast WebSocket server listening on {}", self.local_addr);

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

                            let dispatcher = Arc::clone(&self.dispatcher);
                            let config = self.config.session.clone();
                            let sessions = Arc::clone(&self.sessions);
                            let shutdown_token = self.shutdown_token.clone();
                            self.task_tracker.spawn(async move {
                                Self::handle_connection(stream, addr, dispatcher, config, &sessions, shutdown_token).await;
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

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        dispatcher: Arc<dyn ApiDispatcher>,
        config: SessionConfig,
        sessions: &DashMap<SocketAddr, Arc<TextSession>>,
        shutdown_token: CancellationToken,
    ) {
        let ws_stream = tokio::select! {
            handshake = tokio_tungstenite::accept_async(stream) => match handshake {
                Ok(ws_stream) => ws_stream,
                Err(e) => {
                    warn!("WebSocket handshake with {} failed: {}", addr, e);
                    return;
                }
            },
            () = shutdown_token.cancelled() => return,
        };

        debug!("Accepted WebSocket connection from {}", addr);
        let connection = Connection::new(ws_stream, addr.to_string(), config, Some(dispatcher));
        sessions.insert(addr, Arc::clone(connection.session()));

        connection.run(shutdown_token).await;

        sessions.remove(&addr);
        debug!("Connection from {} finished", addr);
    }

    /// Stop accepting, close every connection and wait for them to finish.
    ///
    /// Calls still pending on any session fail with a connection-closed error.
    pub async fn shutdown(&self) {
        info!("Fast WebSocket server shutting down...");

        self.shutdown_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("Fast WebSocket server shutdown");
    }
}

impl std::fmt::Debug for WsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsServer")
            .field("local_addr", &self.local_addr)
            .field("connections", &self.sessions.len())
            .finish_non_exhaustive()
    }
}
