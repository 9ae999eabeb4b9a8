use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BaremetalError {
    #[error("{resource} {ident} could not be found")]
    NotFound { resource: &'static str, ident: String },
    #[error("node {node} failed to transition{}: {message}", state.as_deref().map(|s| format!(" (state {s})")).unwrap_or_default())]
    Transition {
        node: String,
        state: Option<String>,
        message: String,
    },
    #[error("timed out after {}s waiting for node {node} to {operation}", waited.as_secs())]
    Timeout {
        node: String,
        operation: String,
        waited: Duration,
    },
    #[error("bare metal API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid response from bare metal API: {0}")]
    InvalidResponse(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BaremetalError {
    pub fn node_not_found(ident: impl Into<String>) -> Self {
        BaremetalError::NotFound {
            resource: "node",
            ident: ident.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BaremetalError::NotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BaremetalError::Timeout { .. })
    }

    pub fn is_transition(&self) -> bool {
        matches!(self, BaremetalError::Transition { .. })
    }

    /// HTTP status the error originated from, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            BaremetalError::Api { status, .. } => Some(*status),
            BaremetalError::NotFound { .. } => Some(404),
            BaremetalError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Extract the human readable message from an error body.
///
/// The service wraps errors as `{"error_message": "<json>"}` where the inner
/// JSON document carries a `faultstring`. Some deployments return the inner
/// document as an object instead of a string; anything unparseable is
/// returned as-is.
pub fn service_message(body: &str) -> String {
    let trimmed = body.trim();
    let Ok(outer) = serde_json::from_str::<Value>(trimmed) else {
        return trimmed.to_string();
    };

    let inner = match outer.get("error_message") {
        Some(Value::String(text)) => {
            serde_json::from_str::<Value>(text).unwrap_or_else(|_| Value::String(text.clone()))
        }
        Some(other) => other.clone(),
        None => outer,
    };

    match inner {
        Value::String(text) => text,
        Value::Object(ref object) => object
            .get("faultstring")
            .or_else(|| object.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| inner.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_message_unwraps_nested_json() {
        let body = r#"{"error_message": "{\"faultstring\": \"Node 5c9d could not be found.\", \"faultcode\": \"Client\", \"debuginfo\": null}"}"#;
        assert_eq!(service_message(body), "Node 5c9d could not be found.");
    }

    #[test]
    fn test_service_message_accepts_object_payload() {
        let body = r#"{"error_message": {"faultstring": "Node is locked by host conductor-1", "faultcode": "Client"}}"#;
        assert_eq!(service_message(body), "Node is locked by host conductor-1");
    }

    #[test]
    fn test_service_message_falls_back_to_raw_text() {
        assert_eq!(service_message("  Bad Gateway \n"), "Bad Gateway");
        assert_eq!(
            service_message(r#"{"error_message": "plain text"}"#),
            "plain text"
        );
    }

    #[test]
    fn test_error_kinds() {
        let err = BaremetalError::node_not_found("node-name");
        assert!(err.is_not_found());
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "node node-name could not be found");

        let err = BaremetalError::Transition {
            node: "n1".to_string(),
            state: Some("clean failed".to_string()),
            message: "disk erase failed".to_string(),
        };
        assert!(err.is_transition());
        assert_eq!(
            err.to_string(),
            "node n1 failed to transition (state clean failed): disk erase failed"
        );

        let err = BaremetalError::Timeout {
            node: "n1".to_string(),
            operation: "reach provision state available".to_string(),
            waited: Duration::from_secs(30),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("30s"));
    }
}
