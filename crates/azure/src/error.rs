//! Error type shared by every Azure Resource Manager operation.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur during Azure operations.
#[derive(Error, Debug)]
pub enum AzureError {
    /// HTTP request failed before a response was received.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// ARM returned an error response.
    #[error("API error: {status} {code} - {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Authentication or authorization failure.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Conflicting operation already in progress or resource state mismatch.
    #[error("Conflict: {code} - {message}")]
    Conflict { code: String, message: String },

    /// Request was throttled by ARM.
    #[error("Rate limited by Azure, retry after {retry_after:?}")]
    Throttled { retry_after: Option<Duration> },

    /// Waiting for a resource exceeded its deadline.
    #[error("Timed out after {secs} seconds waiting for {resource}")]
    Timeout { resource: String, secs: u64 },

    /// Resource reached a terminal, unsuccessful provisioning state.
    #[error("Provisioning of {resource} ended in state {state}")]
    ProvisioningFailed { resource: String, state: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration or ambiguous lookup.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Token could not be obtained.
    #[error("Credential error: {0}")]
    Credential(String),
}

impl AzureError {
    /// Whether retrying the same request later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            // New identities take a while to replicate to the directory.
            Self::Api { status, code, .. } => {
                matches!(status, 500 | 502 | 503 | 504) || code == "PrincipalNotFound"
            }
            Self::Throttled { .. } | Self::Timeout { .. } => true,
            // `OperationNotAllowed` covers quota and SKU limits, which do not clear.
            Self::Conflict { code, .. } => code.ends_with("InProgress"),
            _ => false,
        }
    }
}

/// ARM error envelope: `{"error": {"code": "...", "message": "..."}}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ArmErrorEnvelope {
    pub error: ArmErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ArmErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Split an ARM error body into `(code, message)`, falling back to the raw text.
pub(crate) fn parse_error_body(text: &str) -> (String, String) {
    match serde_json::from_str::<ArmErrorEnvelope>(text) {
        Ok(envelope) => (envelope.error.code, envelope.error.message),
        Err(_) => (String::new(), text.trim().to_string()),
    }
}
