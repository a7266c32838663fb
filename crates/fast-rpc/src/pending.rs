//! Registry of calls waiting for a response.
//!
//! Every typed call registers a one-shot completer under its packet id. The
//! completer is removed from the map before it runs, so whichever of
//! [`PendingCalls::complete`], [`PendingCalls::fault`] or
//! [`PendingCalls::drain_all_failed`] removes the entry first is the only one
//! that resolves the caller. Later attempts find nothing and return `false`.

use crate::error::{CodecError, ConnectionError, Error, ProtocolError, Result};
use crate::packet::PacketId;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, Sleep};
use tracing::debug;

enum Reply {
    Body(Bytes),
    Fault(Error),
}

type Completer = Box<dyn FnOnce(Reply) + Send + Sync>;

struct PendingCall {
    api: String,
    completer: Completer,
}

/// Concurrency-safe map from packet id to the caller waiting on it.
#[derive(Default)]
pub struct PendingCalls {
    calls: DashMap<PacketId, PendingCall>,
}

impl PendingCalls {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending call.
    ///
    /// `decode` converts the response body into the caller's expected type and
    /// runs on whichever thread delivers the response. When `timeout` is set the
    /// returned handle faults the call with [`Error::Timeout`] once it elapses.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::DuplicateId`] if `id` is already pending.
    pub fn add<T, D>(
        self: &Arc<Self>,
        id: PacketId,
        api: &str,
        decode: D,
        timeout: Option<Duration>,
    ) -> Result<PendingResult<T>>
    where
        T: Send + 'static,
        D: FnOnce(&[u8]) -> std::result::Result<T, CodecError> + Send + Sync + 'static,
    {
        let slot = match self.calls.entry(id) {
            Entry::Occupied(_) => return Err(ProtocolError::DuplicateId(id).into()),
            Entry::Vacant(slot) => slot,
        };

        let (tx, rx) = oneshot::channel();
        let completer: Completer = Box::new(move |reply| {
            let result = match reply {
                Reply::Body(body) => decode(&body).map_err(Error::from),
                Reply::Fault(error) => Err(error),
            };
            // The caller may have stopped waiting
            let _ = tx.send(result);
        });

        slot.insert(PendingCall {
            api: api.to_string(),
            completer,
        });

        Ok(PendingResult {
            id,
            rx,
            calls: Arc::clone(self),
            timeout: timeout.map(|after| (after, Instant::now() + after)),
            timer: None,
            settled: false,
        })
    }

    /// Resolve a pending call with a response body.
    ///
    /// Returns `false` if no call is pending under `id`.
    pub fn complete(&self, id: PacketId, body: Bytes) -> bool {
        self.resolve(id, Reply::Body(body))
    }

    /// Resolve a pending call with an error.
    ///
    /// Returns `false` if no call is pending under `id`.
    pub fn fault(&self, id: PacketId, error: Error) -> bool {
        self.resolve(id, Reply::Fault(error))
    }

    /// Remove a pending call without resolving it.
    pub fn cancel(&self, id: PacketId) -> bool {
        self.calls.remove(&id).is_some()
    }

    /// Fault every pending call with `error`, returning how many were resolved.
    pub fn drain_all_failed(&self, error: &ConnectionError) -> usize {
        let ids: Vec<PacketId> = self.calls.iter().map(|entry| *entry.key()).collect();

        ids.into_iter()
            .filter(|id| self.fault(*id, error.clone().into()))
            .count()
    }

    /// Whether a call is pending under `id`.
    #[must_use]
    pub fn contains(&self, id: PacketId) -> bool {
        self.calls.contains_key(&id)
    }

    /// Number of pending calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether no calls are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    fn resolve(&self, id: PacketId, reply: Reply) -> bool {
        // Removal is the claim; the completer runs outside the map's lock
        let Some((_, call)) = self.calls.remove(&id) else {
            return false;
        };

        debug!("Resolving call {} to {}", id, call.api);
        (call.completer)(reply);
        true
    }
}

/// Handle to the eventual result of a typed call.
///
/// Resolves exactly once: with the decoded response, with the remote fault,
/// with [`Error::Timeout`] or with a connection error when the session goes
/// away. Dropping an unresolved handle cancels the call.
#[must_use = "dropping a pending result cancels the call"]
pub struct PendingResult<T> {
    id: PacketId,
    rx: oneshot::Receiver<Result<T>>,
    calls: Arc<PendingCalls>,
    timeout: Option<(Duration, Instant)>,
    timer: Option<Pin<Box<Sleep>>>,
    settled: bool,
}

impl<T> PendingResult<T> {
    /// Packet id of the call.
    #[must_use]
    pub const fn id(&self) -> PacketId {
        self.id
    }

    fn poll_outcome(&mut self, cx: &mut Context<'_>) -> Poll<Result<T>> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(outcome) => {
                self.settled = true;
                // A dropped completer means the registry itself went away
                Poll::Ready(outcome.unwrap_or_else(|_| Err(ConnectionError::Closed.into())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Future for PendingResult<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        if let Poll::Ready(result) = this.poll_outcome(cx) {
            return Poll::Ready(result);
        }

        if let Some((after, deadline)) = this.timeout {
            let timer = this
                .timer
                .get_or_insert_with(|| Box::pin(tokio::time::sleep_until(deadline)));

            if timer.as_mut().poll(cx).is_ready() {
                this.timeout = None;
                if this.calls.fault(this.id, Error::Timeout(after)) {
                    debug!("Call {} timed out after {:?}", this.id, after);
                }
                // Either the timeout or a racing response now owns the outcome
                return this.poll_outcome(cx);
            }
        }

        Poll::Pending
    }
}

impl<T> Drop for PendingResult<T> {
    fn drop(&mut self) {
        if !self.settled {
            self.calls.cancel(self.id);
        }
    }
}

impl<T> std::fmt::Debug for PendingResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResult")
            .field("id", &self.id)
            .field("settled", &self.settled)
            .finish_non_exhaustive()
    }
}
