//! Fast client over TCP.

use crate::connection::Connection;
use proven_fast_rpc::{ApiDispatcher, BinarySession, MAX_FRAME_SIZE, Result, SessionConfig};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Builder for creating TCP clients.
pub struct ClientBuilder {
    addr: Option<SocketAddr>,
    max_frame_size: usize,
    session: SessionConfig,
    dispatcher: Option<Arc<dyn ApiDispatcher>>,
}

impl ClientBuilder {
    /// Create a new client builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            addr: None,
            max_frame_size: MAX_FRAME_SIZE,
            session: SessionConfig::default(),
            dispatcher: None,
        }
    }

    /// Set the server address to connect to.
    #[must_use]
    pub const fn addr(mut self, addr: SocketAddr) -> Self {
        self.addr = Some(addr);
        self
    }

    /// Fault typed calls that see no response within `timeout`.
    #[must_use]
    pub const fn call_timeout(mut self, timeout: Duration) -> Self {
        self.session.call_timeout = Some(timeout);
        self
    }

    /// Set the maximum frame size.
    #[must_use]
    pub const fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Answer requests from the server with `dispatcher`.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Arc<dyn ApiDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Connect to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if no address was set or the connection fails.
    #[instrument(skip(self), fields(addr = ?self.addr))]
    pub async fn connect(self) -> Result<TcpClient> {
        let addr = self.addr.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "Server address not specified")
        })?;

        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let local_addr = stream.local_addr()?;
        debug!("Connected to {} from {}", addr, local_addr);

        let connection = Connection::new(
            stream,
            addr,
            self.max_frame_size,
            self.session,
            self.dispatcher,
        );
        let session = Arc::clone(connection.session());

        let shutdown_token = CancellationToken::new();
        let driver = tokio::spawn(connection.run(shutdown_token.clone()));

        Ok(TcpClient {
            session,
            local_addr,
            shutdown_token,
            driver: Some(driver),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected TCP client.
///
/// The connection closes when [`TcpClient::close`] is called or the client
/// is dropped.
pub struct TcpClient {
    session: Arc<BinarySession>,
    local_addr: SocketAddr,
    shutdown_token: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl TcpClient {
    /// Create a new client builder.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The session used to call server APIs.
    #[must_use]
    pub const fn session(&self) -> &Arc<BinarySession> {
        &self.session
    }

    /// Local address of the connection, as the server sees this client.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Close the connection and wait for it to shut down.
    ///
    /// Calls still pending fail with a connection-closed error.
    pub async fn close(mut self) {
        self.shutdown_token.cancel();
        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

impl std::fmt::Debug for TcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpClient")
            .field("local_addr", &self.local_addr)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
