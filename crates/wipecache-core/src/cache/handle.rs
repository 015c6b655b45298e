use std::fmt;

use serde::de::DeserializeOwned;

use super::{CacheKey, Fetcher, QueryCache, QueryState, ReadOptions};

#[derive(Clone)]
pub(crate) struct QuerySource {
    pub cache: QueryCache,
    pub key: CacheKey,
    pub fetcher: Fetcher,
    pub options: ReadOptions,
}

/// Result of a read, plus a way to ask for fresh data.
///
/// `data` is always present: the cached value, the persisted value, or the
/// collection's default when nothing could be loaded.
pub struct Query<T> {
    pub data: T,
    pub is_loading: bool,
    pub is_error: bool,
    pub error: Option<String>,
    source: QuerySource,
}

impl<T: DeserializeOwned + Default> Query<T> {
    pub(crate) fn new(state: QueryState<T>, source: QuerySource) -> Self {
        Self {
            data: state.data,
            is_loading: state.is_loading,
            is_error: state.is_error,
            error: state.error,
            source,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.source.key
    }

    /// Fetch the key again, ignoring staleness.
    pub async fn refetch(&self) -> Query<T> {
        let source = &self.source;
        let state = source
            .cache
            .fetch(&source.key, &source.fetcher, &source.options)
            .await
            .decode();
        Query::new(state, source.clone())
    }

    pub fn into_state(self) -> QueryState<T> {
        QueryState {
            data: self.data,
            is_loading: self.is_loading,
            is_error: self.is_error,
            error: self.error,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("key", &self.source.key)
            .field("data", &self.data)
            .field("is_loading", &self.is_loading)
            .field("is_error", &self.is_error)
            .field("error", &self.error)
            .finish()
    }
}
