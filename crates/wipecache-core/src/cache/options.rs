use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;

use crate::api::{ApiError, RemoteFetch, Request};
use crate::models::Collection;

/// Default number of retries for a failed read.
pub const DEFAULT_READ_RETRIES: u32 = 1;

pub type FetchResult = Result<Value, ApiError>;

/// Produces a fresh fetch of one cache slot's value each time it is called.
pub type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, FetchResult> + Send + Sync>;

/// Wrap an async closure as a [`Fetcher`].
pub fn fetcher<F, Fut>(f: F) -> Fetcher
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FetchResult> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Fetcher that issues `request` against the remote adapter.
pub fn remote_fetcher(remote: Arc<dyn RemoteFetch>, request: Request) -> Fetcher {
    fetcher(move || {
        let remote = Arc::clone(&remote);
        let request = request.clone();
        async move { remote.call(request).await.into_result() }
    })
}

/// Per-read cache policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOptions {
    /// Age after which data is served stale and refetched in the background.
    pub stale_after: Duration,
    /// Idle time after which an entry may be evicted from memory.
    pub retain_for: Duration,
    /// Extra attempts after a failed fetch.
    pub retries: u32,
    /// Served when a fetch failed and nothing was cached anywhere.
    pub fallback: Value,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(5 * 60),
            retain_for: Duration::from_secs(15 * 60),
            retries: DEFAULT_READ_RETRIES,
            fallback: Value::Array(Vec::new()),
        }
    }
}

impl ReadOptions {
    pub fn for_collection(collection: Collection) -> Self {
        Self {
            stale_after: collection.default_stale_after(),
            retain_for: collection.default_retain_for(),
            retries: DEFAULT_READ_RETRIES,
            fallback: collection.default_value(),
        }
    }

    pub fn stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn retain_for(mut self, retain_for: Duration) -> Self {
        self.retain_for = retain_for;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn fallback(mut self, fallback: Value) -> Self {
        self.fallback = fallback;
        self
    }
}
