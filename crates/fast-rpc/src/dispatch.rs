//! Routing of incoming requests to local APIs.

use crate::error::DispatchError;
use crate::serializer::Serializer;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Serialize, de::DeserializeOwned};
use std::future::Future;
use std::sync::Arc;

/// Resolves an API name to local code and runs it.
///
/// The session hands over the raw argument body; the dispatcher returns the
/// serialized return value, or a [`DispatchError`] whose text is sent back to
/// the caller as the fault description.
#[async_trait]
pub trait ApiDispatcher: Send + Sync + 'static {
    /// Invoke `api` with the serialized argument list `args`.
    async fn dispatch(&self, api: &str, args: Bytes) -> Result<Bytes, DispatchError>;
}

type BoxedApi = Arc<dyn Fn(Bytes) -> BoxFuture<'static, Result<Bytes, DispatchError>> + Send + Sync>;

/// Dispatcher backed by a table of typed async closures.
///
/// Arguments arrive as a tuple matching the caller's argument list, so an API
/// invoked with `(2, 3)` registers a closure taking `(i32, i32)`.
pub struct ApiTable<Z: Serializer> {
    serializer: Arc<Z>,
    apis: DashMap<String, BoxedApi>,
}

impl<Z: Serializer> ApiTable<Z> {
    /// Create an empty table converting values with `serializer`.
    pub fn new(serializer: Z) -> Self {
        Self {
            serializer: Arc::new(serializer),
            apis: DashMap::new(),
        }
    }

    /// Register an API under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyRegistered`] if `name` is taken.
    pub fn register<A, R, F, Fut>(&self, name: impl Into<String>, api: F) -> Result<(), DispatchError>
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, DispatchError>> + Send + 'static,
    {
        let name = name.into();
        let slot = match self.apis.entry(name) {
            Entry::Occupied(entry) => {
                return Err(DispatchError::AlreadyRegistered(entry.key().clone()));
            }
            Entry::Vacant(slot) => slot,
        };

        let serializer = Arc::clone(&self.serializer);
        let api = Arc::new(api);
        let boxed: BoxedApi = Arc::new(move |args: Bytes| {
            let serializer = Arc::clone(&serializer);
            let api = Arc::clone(&api);
            async move {
                let args: A = serializer.deserialize(&args)?;
                let value = api(args).await?;
                Ok(serializer.serialize(&value)?)
            }
            .boxed()
        });

        slot.insert(boxed);
        Ok(())
    }

    /// Whether an API is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.apis.contains_key(name)
    }

    /// Number of registered APIs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.apis.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.apis.is_empty()
    }
}

impl<Z: Serializer + Default> Default for ApiTable<Z> {
    fn default() -> Self {
        Self::new(Z::default())
    }
}

#[async_trait]
impl<Z: Serializer> ApiDispatcher for ApiTable<Z> {
    async fn dispatch(&self, api: &str, args: Bytes) -> Result<Bytes, DispatchError> {
        // Clone out of the map so no shard lock is held across the await
        let handler = self
            .apis
            .get(api)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DispatchError::NotFound(api.to_string()))?;

        handler(args).await
    }
}
