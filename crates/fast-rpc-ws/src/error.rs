//! Error types for the WebSocket transport.

use thiserror::Error;

/// Result type alias for WebSocket transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while setting up WebSocket connections.
///
/// Once a connection is up, calls report [`proven_fast_rpc::Error`].
#[derive(Debug, Error)]
pub enum Error {
    /// No URL was given to the client builder.
    #[error("WebSocket URL not specified")]
    MissingUrl,

    /// The URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The URL scheme is not `ws` or `wss`.
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// The WebSocket handshake or stream failed.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
