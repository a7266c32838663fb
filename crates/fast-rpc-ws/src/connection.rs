//! Drives one WebSocket connection carrying JSON text packets.

use futures_util::{SinkExt, StreamExt};
use proven_fast_rpc::{
    ApiDispatcher, JsonSerializer, Session, SessionConfig, TextCodec, TextSession,
};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct Connection<S> {
    peer: String,
    session: Arc<TextSession>,
    ws_stream: WebSocketStream<S>,
    outgoing: mpsc::UnboundedReceiver<String>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        ws_stream: WebSocketStream<S>,
        peer: String,
        config: SessionConfig,
        dispatcher: Option<Arc<dyn ApiDispatcher>>,
    ) -> Self {
        let (tx, outgoing) = mpsc::unbounded_channel();

        let mut session = Session::new(TextCodec::new(), JsonSerializer, tx, config);
        if let Some(dispatcher) = dispatcher {
            session = session.with_dispatcher(dispatcher);
        }

        Self {
            peer,
            session: Arc::new(session),
            ws_stream,
            outgoing,
        }
    }

    pub const fn session(&self) -> &Arc<TextSession> {
        &self.session
    }

    /// Run until the peer closes, the socket fails, a send fails or
    /// `shutdown` fires. The session is disposed on the way out.
    pub async fn run(self, shutdown: CancellationToken) {
        let Self {
            peer,
            session,
            ws_stream,
            mut outgoing,
        } = self;
        let (mut sink, mut stream) = ws_stream.split();

        // Cancelled by the writer when the socket stops accepting messages
        let closed = shutdown.child_token();
        let send_failed = closed.clone();

        let writer_peer = peer.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outgoing.recv().await {
                if let Err(e) = sink.send(Message::text(frame)).await {
                    warn!("Failed to send to {}: {}", writer_peer, e);
                    send_failed.cancel();
                    return;
                }
            }
            let _ = sink.close().await;
        });

        loop {
            tokio::select! {
                next = stream.next() => match next {
                    Some(Ok(Message::Text(text))) => {
                        let packet = match session.decode_frame(text.as_str().to_owned()) {
                            Ok(packet) => packet,
                            Err(e) => {
                                // One bad message does not poison the connection
                                warn!("Dropping malformed message from {}: {}", peer, e);
                                continue;
                            }
                        };

                        if packet.is_request {
                            let session = Arc::clone(&session);
                            let peer = peer.clone();
                            tokio::spawn(async move {
                                if let Err(e) = session.dispatch_request(packet).await {
                                    debug!("Failed to answer request from {}: {}", peer, e);
                                }
                            });
                        } else {
                            session.complete_response(&packet);
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!("Ignoring binary message from {}", peer);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Connection to {} closed by peer", peer);
                        break;
                    }
                    // Ping and pong are answered by tungstenite itself
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Closing connection to {}: {}", peer, e);
                        break;
                    }
                },
                () = closed.cancelled() => {
                    if shutdown.is_cancelled() {
                        debug!("Closing connection to {} on shutdown", peer);
                    } else {
                        debug!("Closing connection to {} after a failed send", peer);
                    }
                    break;
                }
            }
        }

        // Releasing the sink lets the writer flush what is queued and close
        session.dispose();
        let _ = writer_task.await;
    }
}
