//! Fast client over WebSocket.

use crate::connection::Connection;
use crate::error::{Error, Result};
use proven_fast_rpc::{ApiDispatcher, SessionConfig, TextSession};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

/// Builder for creating WebSocket clients.
#[derive(Default)]
pub struct ClientBuilder {
    url: Option<String>,
    session: SessionConfig,
    dispatcher: Option<Arc<dyn ApiDispatcher>>,
}

impl ClientBuilder {
    /// Create a new client builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `ws://` or `wss://` URL to connect to.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Fault typed calls that see no response within `timeout`.
    #[must_use]
    pub const fn call_timeout(mut self, timeout: Duration) -> Self {
        self.session.call_timeout = Some(timeout);
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
    /// Returns an error if the URL is missing or invalid, or the handshake fails.
    #[instrument(skip(self), fields(url = ?self.url))]
    pub async fn connect(self) -> Result<WsClient> {
        let url = Url::parse(self.url.as_deref().ok_or(Error::MissingUrl)?)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::UnsupportedScheme(url.scheme().to_string()));
        }

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        debug!("Connected to {}", url);

        let connection = Connection::new(ws_stream, url.to_string(), self.session, self.dispatcher);
        let session = Arc::clone(connection.session());

        let shutdown_token = CancellationToken::new();
        let driver = tokio::spawn(connection.run(shutdown_token.clone()));

        Ok(WsClient {
            session,
            url,
            shutdown_token,
            driver: Some(driver),
        })
    }
}

/// A connected WebSocket client.
///
/// The connection closes when [`WsClient::close`] is called or the client
/// is dropped.
pub struct WsClient {
    session: Arc<TextSession>,
    url: Url,
    shutdown_token: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl WsClient {
    /// Create a new client builder.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The session used to call server APIs.
    #[must_use]
    pub const fn session(&self) -> &Arc<TextSession> {
        &self.session
    }

    /// URL this client is connected to.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
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

impl Drop for WsClient {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

impl std::fmt::Debug for WsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsClient")
            .field("url", &self.url.as_str())
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
