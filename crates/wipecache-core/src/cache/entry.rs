use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::warn;

use super::{CacheKey, ReadOptions};

/// Lifecycle of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Idle,
    Loading,
    Success,
    Error,
}

/// What a consumer sees: data (never absent, falling back to the
/// collection default) plus loading/error flags.
///
/// `is_error` is only set when no data could be served at all; when stale,
/// persisted or last-known data masks a failed fetch, `error` still carries
/// the message but `is_error` stays false.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub data: T,
    pub is_loading: bool,
    pub is_error: bool,
    pub error: Option<String>,
}

impl QueryState<Value> {
    pub(crate) fn ready(data: Value) -> Self {
        Self {
            data,
            is_loading: false,
            is_error: false,
            error: None,
        }
    }

    /// Decode into a typed view. Undecodable data degrades to `T::default()`
    /// with the error surfaced.
    pub fn decode<T: DeserializeOwned + Default>(self) -> QueryState<T> {
        match serde_json::from_value(self.data) {
            Ok(data) => QueryState {
                data,
                is_loading: self.is_loading,
                is_error: self.is_error,
                error: self.error,
            },
            Err(e) => {
                warn!(error = %e, "Cached data does not match the expected shape");
                QueryState {
                    data: T::default(),
                    is_loading: self.is_loading,
                    is_error: true,
                    error: Some(format!("Failed to decode cached data: {}", e)),
                }
            }
        }
    }
}

/// Result handed to every reader attached to one fetch.
#[derive(Debug, Clone)]
pub(crate) struct FetchOutcome {
    pub state: QueryState<Value>,
    /// The fetch was superseded (invalidate, evict, patch) and its result
    /// was thrown away.
    pub discarded: bool,
}

pub(crate) type FetchFuture = Shared<BoxFuture<'static, FetchOutcome>>;

pub(crate) struct InFlight {
    pub generation: u64,
    pub future: FetchFuture,
}

pub(crate) struct CacheEntry {
    pub key: CacheKey,
    pub data: Option<Value>,
    pub status: Status,
    pub fetched_at: Option<Instant>,
    pub stale_after: Duration,
    pub retain_for: Duration,
    pub error: Option<String>,
    pub in_flight: Option<InFlight>,
    /// Epoch of the entry. Bumped by invalidate and patch; a fetch whose
    /// generation no longer matches is discarded on completion.
    pub generation: u64,
    /// Stamp of the current `data`, globally unique across entries.
    pub version: u64,
    pub invalidated: bool,
    pub last_access: Instant,
}

impl CacheEntry {
    pub fn new(key: CacheKey, options: &ReadOptions, generation: u64, now: Instant) -> Self {
        Self {
            key,
            data: None,
            status: Status::Idle,
            fetched_at: None,
            stale_after: options.stale_after,
            retain_for: options.retain_for,
            error: None,
            in_flight: None,
            generation,
            version: 0,
            invalidated: false,
            last_access: now,
        }
    }

    /// Exactly at the boundary counts as stale.
    pub fn is_stale(&self, now: Instant) -> bool {
        if self.invalidated {
            return true;
        }
        match self.fetched_at {
            Some(at) => now.saturating_duration_since(at) >= self.stale_after,
            None => true,
        }
    }

    /// Idle past its retention window and not being fetched.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.in_flight.is_none() && now.saturating_duration_since(self.last_access) >= self.retain_for
    }

    /// Record an access, adopting the reader's policy.
    pub fn touch(&mut self, now: Instant, options: &ReadOptions) {
        self.last_access = now;
        self.stale_after = options.stale_after;
        self.retain_for = options.retain_for;
    }

    pub fn state(&self, fallback: &Value) -> QueryState<Value> {
        QueryState {
            data: self.data.clone().unwrap_or_else(|| fallback.clone()),
            is_loading: self.in_flight.is_some(),
            is_error: self.status == Status::Error && self.data.is_none(),
            error: self.error.clone(),
        }
    }

    pub fn info(&self, now: Instant) -> EntryInfo {
        EntryInfo {
            key: self.key.clone(),
            status: self.status,
            has_data: self.data.is_some(),
            is_stale: self.is_stale(now),
            is_fetching: self.in_flight.is_some(),
            version: self.version,
            error: self.error.clone(),
        }
    }
}

/// Read-only summary of an entry for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub key: CacheKey,
    pub status: Status,
    pub has_data: bool,
    pub is_stale: bool,
    pub is_fetching: bool,
    pub version: u64,
    pub error: Option<String>,
}
