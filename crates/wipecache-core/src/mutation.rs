//! Mutations of cached collections.
//!
//! A mutation is sent to the remote exactly once. Only after the service
//! accepts it are the persisted list and the in-memory base entry edited in
//! place, so the change is visible without a refetch. Derived views of the
//! collection are invalidated (create/update) or evicted (delete).

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::api::{ApiError, Envelope, RemoteFetch, Request};
use crate::cache::{CacheKey, KeyPattern, QueryCache};
use crate::models::{Collection, Entity};

/// A change to one entity of a collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation<T> {
    Create(T),
    Update(T),
    /// Natural key of the entity to remove.
    Delete(String),
}

impl<T: Entity> Mutation<T> {
    pub fn key(&self) -> &str {
        match self {
            Mutation::Create(entity) | Mutation::Update(entity) => entity.natural_key(),
            Mutation::Delete(key) => key,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Mutation::Create(_) => "create",
            Mutation::Update(_) => "update",
            Mutation::Delete(_) => "delete",
        }
    }
}

/// What the service accepted. Create and update carry the entity as
/// returned by the service, or as submitted when it returned none.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<T> {
    Created(T),
    Updated(T),
    Deleted(String),
}

impl<T> MutationOutcome<T> {
    pub fn entity(&self) -> Option<&T> {
        match self {
            MutationOutcome::Created(entity) | MutationOutcome::Updated(entity) => Some(entity),
            MutationOutcome::Deleted(_) => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// The service refused or could not be reached. Carries its message.
    #[error("Mutation rejected: {0}")]
    Rejected(String),

    #[error("Mutations are disabled in demo mode")]
    DemoMode,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// In-place edit of a persisted or cached list, keyed by natural key.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ListEdit {
    /// Replace the item with the same key, or append it.
    Upsert {
        key_field: &'static str,
        key: String,
        item: Value,
    },
    Remove {
        key_field: &'static str,
        key: String,
    },
}

impl ListEdit {
    fn matches(item: &Value, key_field: &str, key: &str) -> bool {
        item.get(key_field).and_then(Value::as_str) == Some(key)
    }

    /// Apply to a JSON list. Returns whether the list changed; anything that
    /// is not a list is left alone.
    pub fn apply(&self, list: &mut Value) -> bool {
        let Some(items) = list.as_array_mut() else {
            return false;
        };
        match self {
            ListEdit::Upsert {
                key_field,
                key,
                item,
            } => match items.iter_mut().find(|i| Self::matches(i, key_field, key)) {
                Some(existing) if existing == item => false,
                Some(existing) => {
                    *existing = item.clone();
                    true
                }
                None => {
                    items.push(item.clone());
                    true
                }
            },
            ListEdit::Remove { key_field, key } => {
                let before = items.len();
                items.retain(|i| !Self::matches(i, key_field, key));
                items.len() != before
            }
        }
    }
}

/// Sends mutations and reconciles local state with the result.
#[derive(Clone)]
pub struct MutationCoordinator {
    remote: Arc<dyn RemoteFetch>,
    cache: QueryCache,
}

impl MutationCoordinator {
    pub fn new(remote: Arc<dyn RemoteFetch>, cache: QueryCache) -> Self {
        Self { remote, cache }
    }

    pub async fn mutate<T: Entity>(
        &self,
        scope: &str,
        mutation: Mutation<T>,
    ) -> Result<MutationOutcome<T>, MutationError> {
        let collection = T::COLLECTION;
        if self.cache.demo_gate().is_demo_mode() {
            warn!(%collection, scope, "Refusing mutation in demo mode");
            return Err(MutationError::DemoMode);
        }

        let key = mutation.key().to_string();
        let label = mutation.label();
        let request = match &mutation {
            Mutation::Create(entity) => Request::create(collection, scope, to_payload(entity)?),
            Mutation::Update(entity) => Request::update(collection, scope, to_payload(entity)?),
            Mutation::Delete(key) => Request::delete(collection, scope, key),
        };

        let response = self.remote.call(request).await;
        if !response.success {
            let message = rejection_message(response);
            warn!(%collection, scope, key = %key, operation = label, error = %message, "Mutation rejected");
            return Err(MutationError::Rejected(message));
        }

        let outcome = match mutation {
            Mutation::Create(submitted) => MutationOutcome::Created(accepted(response, submitted)),
            Mutation::Update(submitted) => MutationOutcome::Updated(accepted(response, submitted)),
            Mutation::Delete(key) => MutationOutcome::Deleted(key),
        };
        self.reconcile(collection, scope, &key, &outcome).await;
        info!(%collection, scope, key = %key, operation = label, "Mutation applied");
        Ok(outcome)
    }

    async fn reconcile<T: Entity>(
        &self,
        collection: Collection,
        scope: &str,
        key: &str,
        outcome: &MutationOutcome<T>,
    ) {
        let key_field = collection.key_field();
        let edit = match outcome.entity() {
            Some(entity) => match serde_json::to_value(entity) {
                Ok(item) => ListEdit::Upsert {
                    key_field,
                    key: key.to_string(),
                    item,
                },
                Err(e) => {
                    // Fall back to refetching
                    warn!(%collection, scope, error = %e, "Could not encode accepted entity");
                    self.cache
                        .invalidate(&KeyPattern::collection(collection).scope(scope));
                    return;
                }
            },
            None => ListEdit::Remove {
                key_field,
                key: key.to_string(),
            },
        };

        let base = CacheKey::new(collection, scope);
        self.cache.apply_edit(&base, |list| edit.apply(list)).await;

        let derived = KeyPattern::collection(collection).scope(scope).derived();
        match outcome {
            MutationOutcome::Deleted(_) => {
                self.cache.evict_matching(&derived);
            }
            _ => {
                self.cache.invalidate(&derived);
            }
        }
    }
}

fn to_payload<T: Entity>(entity: &T) -> Result<Value, MutationError> {
    serde_json::to_value(entity).map_err(|e| MutationError::InvalidPayload(e.to_string()))
}

fn rejection_message(response: Envelope) -> String {
    match response.into_result() {
        Err(ApiError::Rejected(message)) => message,
        Err(e) => e.to_string(),
        Ok(_) => "request failed".to_string(),
    }
}

/// The service's version of the entity if it sent a decodable one.
fn accepted<T: Entity>(response: Envelope, submitted: T) -> T {
    response
        .data
        .and_then(|data| serde_json::from_value(data).ok())
        .unwrap_or(submitted)
}
