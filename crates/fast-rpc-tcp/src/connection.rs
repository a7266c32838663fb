//! Drives one TCP connection: a read loop feeding the session and a writer
//! task draining its outgoing frames.

use bytes::Bytes;
use futures::StreamExt;
use proven_fast_rpc::{
    ApiDispatcher, BinaryCodec, BinarySession, BincodeSerializer, Session, SessionConfig,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct Connection<R = OwnedReadHalf, W = OwnedWriteHalf> {
    peer: SocketAddr,
    session: Arc<BinarySession>,
    reader: FramedRead<R, BinaryCodec>,
    writer: W,
    outgoing: mpsc::UnboundedReceiver<Bytes>,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        max_frame_size: usize,
        config: SessionConfig,
        dispatcher: Option<Arc<dyn ApiDispatcher>>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self::from_parts(read_half, write_half, peer, max_frame_size, config, dispatcher)
    }
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn from_parts(
        read_half: R,
        writer: W,
        peer: SocketAddr,
        max_frame_size: usize,
        config: SessionConfig,
        dispatcher: Option<Arc<dyn ApiDispatcher>>,
    ) -> Self {
        let codec = BinaryCodec::new().with_max_frame_size(max_frame_size);
        let (tx, outgoing) = mpsc::unbounded_channel();

        let mut session = Session::new(codec.clone(), BincodeSerializer, tx, config);
        if let Some(dispatcher) = dispatcher {
            session = session.with_dispatcher(dispatcher);
        }

        Self {
            peer,
            session: Arc::new(session),
            reader: FramedRead::new(read_half, codec),
            writer,
            outgoing,
        }
    }

    pub const fn session(&self) -> &Arc<BinarySession> {
        &self.session
    }

    /// Run until the peer hangs up, the stream turns bad, a write fails or
    /// `shutdown` fires. The session is disposed on the way out.
    pub async fn run(self, shutdown: CancellationToken) {
        let Self {
            peer,
            session,
            mut reader,
            mut writer,
            mut outgoing,
        } = self;

        // Cancelled by the writer when the socket stops accepting frames
        let closed = shutdown.child_token();
        let write_failed = closed.clone();

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outgoing.recv().await {
                if let Err(e) = writer.write_all(&frame).await {
                    warn!("Failed to write to {}: {}", peer, e);
                    write_failed.cancel();
                    return;
                }
            }
            let _ = writer.shutdown().await;
        });

        loop {
            tokio::select! {
                next = reader.next() => match next {
                    Some(Ok(packet)) if packet.is_request => {
                        // The handler may call back over this same connection
                        let session = Arc::clone(&session);
                        tokio::spawn(async move {
                            if let Err(e) = session.dispatch_request(packet).await {
                                debug!("Failed to answer request from {}: {}", peer, e);
                            }
                        });
                    }
                    Some(Ok(packet)) => {
                        session.complete_response(&packet);
                    }
                    Some(Err(e)) => {
                        warn!("Closing connection to {}: {}", peer, e);
                        break;
                    }
                    None => {
                        debug!("Connection to {} closed by peer", peer);
                        break;
                    }
                },
                () = closed.cancelled() => {
                    if shutdown.is_cancelled() {
                        debug!("Closing connection to {} on shutdown", peer);
                    } else {
                        debug!("Closing connection to {} after a failed write", peer);
                    }
                    break;
                }
            }
        }

        // Releasing the sink lets the writer flush what is queued and exit
        session.dispose();
        let _ = writer_task.await;
    }
}
