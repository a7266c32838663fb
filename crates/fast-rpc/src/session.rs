//! Per-connection RPC session.
//!
//! A [`Session`] ties together the id allocator, the pending-call registry, a
//! body serializer and the transport's send primitive. It is generic over the
//! wire encoding, so the same correlation logic backs the binary TCP encoding
//! ([`BinarySession`]) and the JSON WebSocket encoding ([`TextSession`]).

use crate::codec::{BinaryCodec, PacketCodec, TextCodec};
use crate::dispatch::ApiDispatcher;
use crate::error::{ConnectionError, DispatchError, Error, Result};
use crate::id::PacketIdAllocator;
use crate::packet::{NO_REPLY_ID, Packet};
use crate::pending::{PendingCalls, PendingResult};
use crate::serializer::{BincodeSerializer, JsonSerializer, Serializer};
use parking_lot::RwLock;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Session over the binary encoding with bincode bodies.
pub type BinarySession = Session<BinaryCodec, BincodeSerializer>;

/// Session over the JSON text encoding with JSON bodies.
pub type TextSession = Session<TextCodec, JsonSerializer>;

/// The transport's send primitive.
///
/// Implementations must accept frames from any thread and serialize writes
/// themselves, so a session never needs external locking.
pub trait FrameSink<F>: Send + Sync + 'static {
    /// Hand one encoded frame to the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection can no longer accept frames.
    fn send_frame(&self, frame: F) -> std::result::Result<(), ConnectionError>;
}

impl<F: Send + 'static> FrameSink<F> for mpsc::UnboundedSender<F> {
    fn send_frame(&self, frame: F) -> std::result::Result<(), ConnectionError> {
        self.send(frame).map_err(|_| ConnectionError::Closed)
    }
}

/// Configuration for a session.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Fault typed calls that see no response within this time.
    ///
    /// `None` waits until a response arrives or the session is disposed.
    pub call_timeout: Option<Duration>,
}

impl SessionConfig {
    /// Set the per-call timeout.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }
}

/// One endpoint of a Fast connection.
pub struct Session<C: PacketCodec, Z: Serializer> {
    codec: C,
    serializer: Arc<Z>,
    sink: RwLock<Option<Box<dyn FrameSink<C::Frame>>>>,
    ids: PacketIdAllocator,
    pending: Arc<PendingCalls>,
    dispatcher: Option<Arc<dyn ApiDispatcher>>,
    config: SessionConfig,
    disposed: AtomicBool,
}

impl<C: PacketCodec, Z: Serializer> Session<C, Z> {
    /// Create a session that sends frames through `sink`.
    pub fn new(codec: C, serializer: Z, sink: impl FrameSink<C::Frame>, config: SessionConfig) -> Self {
        Self {
            codec,
            serializer: Arc::new(serializer),
            sink: RwLock::new(Some(Box::new(sink))),
            ids: PacketIdAllocator::new(),
            pending: Arc::new(PendingCalls::new()),
            dispatcher: None,
            config,
            disposed: AtomicBool::new(false),
        }
    }

    /// Route incoming requests to `dispatcher`.
    ///
    /// Without a dispatcher every incoming request is answered with
    /// [`DispatchError::NotFound`].
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn ApiDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Invoke a remote API without waiting for a result.
    ///
    /// The request carries [`NO_REPLY_ID`], so the peer never answers it.
    ///
    /// # Errors
    ///
    /// Returns an error if `args` cannot be serialized, the packet cannot be
    /// encoded or the connection is closed.
    pub fn invoke_api<A>(&self, api: &str, args: &A) -> Result<()>
    where
        A: Serialize + ?Sized,
    {
        let body = self.serializer.serialize(args)?;
        debug!("Invoking {} without reply", api);
        self.send_packet(&Packet::request(api, NO_REPLY_ID, body))
    }

    /// Invoke a remote API and get a handle to its typed result.
    ///
    /// The request is sent before this returns; the handle resolves when the
    /// matching response arrives, the call times out or the session is disposed.
    ///
    /// # Errors
    ///
    /// Returns an error if `args` cannot be serialized, the packet cannot be
    /// encoded or the connection is closed. No call stays registered in that case.
    pub fn call_api<T, A>(&self, api: &str, args: &A) -> Result<PendingResult<T>>
    where
        T: DeserializeOwned + Send + 'static,
        A: Serialize + ?Sized,
    {
        if self.is_disposed() {
            return Err(ConnectionError::Closed.into());
        }

        let body = self.serializer.serialize(args)?;
        let id = self.ids.next_id();
        let frame = self.codec.encode_packet(&Packet::request(api, id, body))?;

        // Register before sending so an immediate response finds its waiter
        let serializer = Arc::clone(&self.serializer);
        let result = self.pending.add(
            id,
            api,
            move |body| serializer.deserialize::<T>(body),
            self.config.call_timeout,
        )?;

        // A dispose that raced the registration has already drained
        if self.is_disposed() {
            self.pending.cancel(id);
            return Err(ConnectionError::Closed.into());
        }

        if let Err(e) = self.send_frame(frame) {
            self.pending.cancel(id);
            return Err(e);
        }

        debug!("Invoked {} as call {}", api, id);
        Ok(result)
    }

    /// Decode one frame received from the transport.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the frame is malformed.
    pub fn decode_frame(&self, frame: C::Frame) -> Result<Packet> {
        self.codec.decode_packet(frame)
    }

    /// Decode and handle one frame received from the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed or a reply cannot be sent.
    pub async fn receive_frame(&self, frame: C::Frame) -> Result<()> {
        let packet = self.decode_frame(frame)?;
        self.handle_packet(packet).await
    }

    /// Handle one decoded packet: resolve a response or dispatch a request.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply to a request cannot be sent.
    pub async fn handle_packet(&self, packet: Packet) -> Result<()> {
        if packet.is_request {
            self.dispatch_request(packet).await
        } else {
            self.complete_response(&packet);
            Ok(())
        }
    }

    /// Resolve the pending call a response packet belongs to.
    ///
    /// Returns `false` if the response matched no pending call, which is not
    /// an error: the caller may have timed out or given up.
    pub fn complete_response(&self, packet: &Packet) -> bool {
        if !packet.expects_reply() {
            debug!("Ignoring response to {} without correlation id", packet.api);
            return false;
        }

        let resolved = if packet.success {
            self.pending.complete(packet.id, packet.body.clone())
        } else {
            let description = self.fault_description(&packet.body);
            self.pending.fault(packet.id, Error::Remote(description))
        };

        if !resolved {
            debug!("Dropping unmatched response {} for {}", packet.id, packet.api);
        }
        resolved
    }

    /// Run a request through the dispatcher and send back its outcome.
    ///
    /// Requests carrying [`NO_REPLY_ID`] are dispatched but never answered.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply cannot be sent.
    pub async fn dispatch_request(&self, request: Packet) -> Result<()> {
        let outcome = match &self.dispatcher {
            Some(dispatcher) => dispatcher.dispatch(&request.api, request.body.clone()).await,
            None => Err(DispatchError::NotFound(request.api.clone())),
        };

        if !request.expects_reply() {
            if let Err(e) = outcome {
                warn!("Request to {} without reply failed: {}", request.api, e);
            }
            return Ok(());
        }

        let reply = match outcome {
            Ok(body) => request.reply(true, body),
            Err(e) => {
                debug!("Call {} to {} failed: {}", request.id, request.api, e);
                request.reply(false, self.serializer.serialize(&e.to_string())?)
            }
        };

        match self.send_packet(&reply) {
            // The result itself could not be framed; report that instead
            Err(e @ (Error::Protocol(_) | Error::Codec(_))) if reply.success => {
                warn!("Failed to encode result of {}: {}", request.api, e);
                let body = self.serializer.serialize(&e.to_string())?;
                self.send_packet(&request.reply(false, body))
            }
            other => other,
        }
    }

    /// Tear the session down.
    ///
    /// Every pending call is faulted with [`ConnectionError::Closed`] and the
    /// send primitive is released. Returns `false` if the session was already
    /// disposed, in which case nothing happens.
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }

        let drained = self.pending.drain_all_failed(&ConnectionError::Closed);
        self.sink.write().take();

        debug!("Session disposed, {} pending calls failed", drained);
        true
    }

    /// Whether [`Session::dispose`] has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Number of calls waiting for a response.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// The body serializer used by this session.
    #[must_use]
    pub fn serializer(&self) -> &Z {
        &self.serializer
    }

    fn send_packet(&self, packet: &Packet) -> Result<()> {
        let frame = self.codec.encode_packet(packet)?;
        self.send_frame(frame)
    }

    fn send_frame(&self, frame: C::Frame) -> Result<()> {
        let sink = self.sink.read();
        let sink = sink.as_ref().ok_or(ConnectionError::Closed)?;
        sink.send_frame(frame).map_err(Error::from)
    }

    fn fault_description(&self, body: &[u8]) -> String {
        self.serializer
            .deserialize::<String>(body)
            .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned())
    }
}

impl<C: PacketCodec, Z: Serializer> Drop for Session<C, Z> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<C: PacketCodec, Z: Serializer> std::fmt::Debug for Session<C, Z> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("pending_calls", &self.pending.len())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ApiTable;
    use crate::error::CodecError;
    use bytes::Bytes;

    fn binary_session() -> (BinarySession, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(
            BinaryCodec::new(),
            BincodeSerializer,
            tx,
            SessionConfig::default(),
        );
        (session, rx)
    }

    #[tokio::test]
    async fn test_call_registers_before_send() {
        let (session, mut rx) = binary_session();
        let result = session.call_api::<i32, _>("add", &(2, 3)).unwrap();

        let frame = rx.recv().await.unwrap();
        let request = session.decode_frame(frame).unwrap();
        assert!(request.is_request);
        assert_eq!(request.id, result.id());
        assert_eq!(session.pending_calls(), 1);
    }

    #[tokio::test]
    async fn test_serialization_failure_leaves_no_entry() {
        struct Unserializable;
        impl Serialize for Unserializable {
            fn serialize<S: serde::Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("refused"))
            }
        }

        let (session, mut rx) = binary_session();
        let result = session.call_api::<i32, _>("add", &Unserializable);

        assert!(matches!(
            result,
            Err(Error::Codec(CodecError::SerializationFailed(_)))
        ));
        assert_eq!(session.pending_calls(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_failure_leaves_no_entry() {
        let (session, rx) = binary_session();
        drop(rx);

        let result = session.call_api::<i32, _>("add", &(2, 3));
        assert!(result.unwrap_err().is_connection_closed());
        assert_eq!(session.pending_calls(), 0);

        assert!(session.invoke_api("log", &("hello",)).is_err());
    }

    #[tokio::test]
    async fn test_call_after_dispose_fails() {
        let (session, _rx) = binary_session();
        assert!(session.dispose());

        assert!(session.call_api::<i32, _>("add", &(2, 3)).unwrap_err().is_connection_closed());
        assert!(session.invoke_api("log", &("hello",)).unwrap_err().is_connection_closed());
    }

    #[tokio::test]
    async fn test_request_without_dispatcher_answers_not_found() {
        let (session, mut rx) = binary_session();
        let request = Packet::request("missing", 12, BincodeSerializer.serialize(&()).unwrap());

        session.handle_packet(request).await.unwrap();

        let reply = session.decode_frame(rx.recv().await.unwrap()).unwrap();
        assert_eq!(reply.id, 12);
        assert!(!reply.is_request);
        assert!(!reply.success);
        let description: String = BincodeSerializer.deserialize(&reply.body).unwrap();
        assert!(description.contains("missing"));
    }

    #[tokio::test]
    async fn test_oversized_result_reported_as_fault() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let table = ApiTable::new(BincodeSerializer);
        table
            .register("blob", |(): ()| async { Ok::<_, DispatchError>(vec![0u8; 256]) })
            .unwrap();
        let session = Session::new(
            BinaryCodec::new().with_max_frame_size(128),
            BincodeSerializer,
            tx,
            SessionConfig::default(),
        )
        .with_dispatcher(Arc::new(table));

        let request = Packet::request("blob", 3, BincodeSerializer.serialize(&()).unwrap());
        session.dispatch_request(request).await.unwrap();

        let reply = session.decode_frame(rx.recv().await.unwrap()).unwrap();
        assert_eq!(reply.id, 3);
        assert!(!reply.success);
    }
}
