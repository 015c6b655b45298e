//! The uniform request/response shapes exchanged with the remote service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ApiError;
use crate::models::Collection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    List,
    Create,
    Update,
    Delete,
}

/// A call against one collection of one scope.
///
/// For `Delete` the payload is the natural key as a JSON string; for
/// `Create`/`Update` it is the entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub collection: Collection,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub operation: Operation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Request {
    pub fn list(collection: Collection, scope: impl Into<String>) -> Self {
        Self {
            collection,
            scope: scope.into(),
            variant: None,
            operation: Operation::List,
            payload: None,
        }
    }

    pub fn create(collection: Collection, scope: impl Into<String>, entity: Value) -> Self {
        Self {
            operation: Operation::Create,
            payload: Some(entity),
            ..Self::list(collection, scope)
        }
    }

    pub fn update(collection: Collection, scope: impl Into<String>, entity: Value) -> Self {
        Self {
            operation: Operation::Update,
            payload: Some(entity),
            ..Self::list(collection, scope)
        }
    }

    pub fn delete(collection: Collection, scope: impl Into<String>, key: &str) -> Self {
        Self {
            operation: Operation::Delete,
            payload: Some(Value::String(key.to_string())),
            ..Self::list(collection, scope)
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// Natural key of the entity the request targets, if any.
    pub fn target_key(&self) -> Option<String> {
        match self.payload.as_ref()? {
            Value::String(key) => Some(key.clone()),
            Value::Object(map) => map
                .get(self.collection.key_field())
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        }
    }
}

/// `{success, data?, message?}`: the only response shape the caches accept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T = Value> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    /// Success without payload, as returned by deletes.
    pub fn ok_empty() -> Self {
        Self {
            success: true,
            data: None,
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }

    pub fn into_result(self) -> Result<T, ApiError> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(ApiError::MalformedResponse),
            (false, _) => Err(ApiError::Rejected(
                self.message
                    .unwrap_or_else(|| "request failed".to_string()),
            )),
        }
    }
}

/// The remote service as seen by the caches.
///
/// Implementations never fail across this boundary: transport and parse
/// errors come back as `Envelope::failure`.
#[async_trait]
pub trait RemoteFetch: Send + Sync {
    async fn call(&self, request: Request) -> Envelope;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_into_result() {
        assert_eq!(Envelope::ok(json!([1])).into_result(), Ok(json!([1])));
        assert_eq!(
            Envelope::<Value>::ok_empty().into_result(),
            Err(ApiError::MalformedResponse)
        );
        assert_eq!(
            Envelope::<Value>::failure("quota exceeded").into_result(),
            Err(ApiError::Rejected("quota exceeded".to_string()))
        );
        let bare: Envelope = serde_json::from_value(json!({"success": false})).unwrap();
        assert_eq!(
            bare.into_result(),
            Err(ApiError::Rejected("request failed".to_string()))
        );
    }

    #[test]
    fn test_target_key() {
        let delete = Request::delete(Collection::Subusers, "a@x.com", "b@x.com");
        assert_eq!(delete.target_key().as_deref(), Some("b@x.com"));

        let update = Request::update(
            Collection::AuditReports,
            "a@x.com",
            json!({"reportId": "r-9", "status": "Completed"}),
        );
        assert_eq!(update.target_key().as_deref(), Some("r-9"));

        assert!(Request::list(Collection::Machines, "a@x.com")
            .target_key()
            .is_none());
    }

    #[test]
    fn test_request_wire_shape() {
        let request = Request::list(Collection::Machines, "a@x.com").with_variant("enhanced");
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "collection": "machines",
                "scope": "a@x.com",
                "variant": "enhanced",
                "operation": "list"
            })
        );
    }
}
