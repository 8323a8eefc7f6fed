//! Error classification for RPC calls.

use thiserror::Error;

/// Result type for RPC client operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors returned by [`CircuitClient`](crate::CircuitClient).
///
/// `Network` and `Timeout` are transient: the request may succeed if repeated.
/// `Protocol` and `Decode` mean the service answered and the answer is final.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error calling {endpoint}: {message}")]
    Network { endpoint: String, message: String },

    #[error("request to {endpoint} timed out after {secs}s")]
    Timeout { endpoint: String, secs: u64 },

    #[error("RPC service rejected {endpoint} (HTTP {status}): {message}")]
    Protocol {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("failed to decode {endpoint} response: {message}")]
    Decode { endpoint: String, message: String },
}

impl ApiError {
    /// Whether repeating the request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network { .. } | ApiError::Timeout { .. })
    }

    /// Endpoint the failed request was sent to.
    pub fn endpoint(&self) -> &str {
        match self {
            ApiError::Network { endpoint, .. }
            | ApiError::Timeout { endpoint, .. }
            | ApiError::Protocol { endpoint, .. }
            | ApiError::Decode { endpoint, .. } => endpoint,
        }
    }

    /// Classify a non-success HTTP status.
    ///
    /// Gateway-style statuses (502/503/504) come from proxies in front of the
    /// service and are retried; everything else is the service's own verdict.
    pub(crate) fn from_status(endpoint: &str, status: u16, body: String) -> Self {
        match status {
            502..=504 => ApiError::Network {
                endpoint: endpoint.to_string(),
                message: format!("HTTP {status}: {body}"),
            },
            _ => ApiError::Protocol {
                endpoint: endpoint.to_string(),
                status,
                message: body,
            },
        }
    }

    pub(crate) fn from_reqwest(endpoint: &str, err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        } else {
            ApiError::Network {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        }
    }
}
