//! WebSocket transport for the Fast protocol.
//!
//! Each packet is a single JSON text message and bodies are JSON values, so
//! browser peers can speak the protocol without a binary codec. Malformed
//! messages are dropped without closing the connection.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod client;
mod connection;
mod error;
mod server;

pub use client::{ClientBuilder, WsClient};
pub use error::{Error, Result};
pub use server::{ServerConfig, WsServer};

pub use proven_fast_rpc::TextSession;
