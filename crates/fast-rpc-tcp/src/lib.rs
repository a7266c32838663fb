//! TCP transport for the Fast protocol.
//!
//! Packets travel as length-prefixed binary frames with bincode bodies. Each
//! connection gets a [`BinarySession`] whose outgoing frames are written by a
//! dedicated task, so any number of callers can share one connection.
//!
//! # Example
//!
//! ```no_run
//! use proven_fast_rpc::{ApiTable, BincodeSerializer, DispatchError};
//! use proven_fast_rpc_tcp::{ServerConfig, TcpClient, TcpServer};
//! use std::sync::Arc;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let apis = ApiTable::new(BincodeSerializer);
//!     apis.register("add", |(a, b): (i32, i32)| async move {
//!         Ok::<_, DispatchError>(a + b)
//!     })?;
//!
//!     let server = Arc::new(TcpServer::bind("127.0.0.1:0", Arc::new(apis), ServerConfig::default()).await?);
//!     let addr = server.local_addr();
//!     tokio::spawn({
//!         let server = Arc::clone(&server);
//!         async move { server.serve().await }
//!     });
//!
//!     let client = TcpClient::builder().addr(addr).connect().await?;
//!     let sum: i32 = client.session().call_api("add", &(2, 3))?.await?;
//!     assert_eq!(sum, 5);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod client;
mod connection;
mod server;

pub use client::{ClientBuilder, TcpClient};
pub use server::{ServerConfig, TcpServer};

pub use proven_fast_rpc::BinarySession;
