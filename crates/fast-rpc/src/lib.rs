//! Bidirectional RPC correlation for the Fast protocol.
//!
//! Both ends of a Fast connection are symmetric: either side may invoke APIs
//! on the other, with or without waiting for a result. This crate provides the
//! transport-independent pieces:
//!
//! - **Packets**: the logical [`Packet`] and its binary and JSON text encodings
//! - **Correlation**: unique packet ids and a registry of pending calls that
//!   resolves every call exactly once
//! - **Sessions**: a [`Session`] per connection that issues calls, answers
//!   incoming requests through an [`ApiDispatcher`] and fails everything
//!   outstanding when the connection goes away
//!
//! Transports feed received frames into [`Session::receive_frame`] and give
//! the session a [`FrameSink`] to write frames with.
//!
//! # Example
//!
//! ```no_run
//! use proven_fast_rpc::{
//!     ApiTable, BinaryCodec, BincodeSerializer, DispatchError, Session, SessionConfig,
//! };
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let apis = ApiTable::new(BincodeSerializer);
//!     apis.register("add", |(a, b): (i32, i32)| async move {
//!         Ok::<_, DispatchError>(a + b)
//!     })?;
//!
//!     let (tx, _rx) = mpsc::unbounded_channel();
//!     let session = Session::new(BinaryCodec::new(), BincodeSerializer, tx, SessionConfig::default())
//!         .with_dispatcher(Arc::new(apis));
//!
//!     let sum: i32 = session.call_api("add", &(2, 3))?.await?;
//!     assert_eq!(sum, 5);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod codec;
pub mod dispatch;
pub mod error;
pub mod id;
pub mod packet;
pub mod pending;
pub mod serializer;
pub mod session;

// Re-export commonly used types
pub use codec::{BinaryCodec, MAX_API_NAME_LEN, MAX_FRAME_SIZE, PacketCodec, TextCodec};
pub use dispatch::{ApiDispatcher, ApiTable};
pub use error::{CodecError, ConnectionError, DispatchError, Error, ProtocolError, Result};
pub use id::PacketIdAllocator;
pub use packet::{NO_REPLY_ID, Packet, PacketId};
pub use pending::{PendingCalls, PendingResult};
pub use serializer::{BincodeSerializer, JsonSerializer, Serializer};
pub use session::{BinarySession, FrameSink, Session, SessionConfig, TextSession};

// Re-export dependencies that are part of our public API
pub use async_trait::async_trait;
pub use bytes::Bytes;
