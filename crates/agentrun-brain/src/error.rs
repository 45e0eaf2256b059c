//! Brain errors and their health classification.

use agentrun_core::CapabilitySet;
use thiserror::Error;

/// How a failure should be treated by the endpoint health tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad or missing credentials. The endpoint is useless until an
    /// operator intervenes.
    Auth,
    /// Rate limit or quota pressure. The endpoint recovers on its own.
    RateLimit,
    /// The request itself is malformed. Not the endpoint's fault.
    Structural,
    /// Network trouble or a server-side error. Worth retrying.
    Transient,
}

/// Errors surfaced by the endpoint pool and provider adapters.
#[derive(Debug, Error)]
pub enum BrainError {
    #[error("api key env var {env} is not set for endpoint {endpoint}")]
    MissingApiKey { endpoint: String, env: String },

    #[error("authentication rejected by {endpoint}: {message}")]
    Auth { endpoint: String, message: String },

    #[error("rate limited by {endpoint}: {message}")]
    RateLimited { endpoint: String, message: String },

    #[error("request rejected by {endpoint}: {message}")]
    InvalidRequest { endpoint: String, message: String },

    #[error("provider error from {endpoint}: {message}")]
    Provider { endpoint: String, message: String },

    #[error("network error talking to {endpoint}: {source}")]
    Network {
        endpoint: String,
        source: reqwest::Error,
    },

    #[error("malformed response from {endpoint}: {message}")]
    MalformedResponse { endpoint: String, message: String },

    #[error("no configured endpoint covers capabilities {required}")]
    NoCapableEndpoint { required: CapabilitySet },

    #[error("all eligible endpoints failed after {attempts} attempts, last: {last}")]
    AllEndpointsFailed { attempts: u32, last: String },
}

impl BrainError {
    /// Classify the error for health tracking.
    pub fn class(&self) -> ErrorClass {
        match self {
            BrainError::MissingApiKey { .. } | BrainError::Auth { .. } => ErrorClass::Auth,
            BrainError::RateLimited { .. } => ErrorClass::RateLimit,
            BrainError::InvalidRequest { .. } => ErrorClass::Structural,
            BrainError::Provider { .. }
            | BrainError::Network { .. }
            | BrainError::MalformedResponse { .. } => ErrorClass::Transient,
            BrainError::NoCapableEndpoint { .. } | BrainError::AllEndpointsFailed { .. } => {
                ErrorClass::Structural
            }
        }
    }

    /// Map a provider HTTP status to the right error variant.
    pub fn from_status(endpoint: &str, status: u16, message: String) -> Self {
        match status {
            401 | 403 => BrainError::Auth {
                endpoint: endpoint.to_owned(),
                message,
            },
            429 => BrainError::RateLimited {
                endpoint: endpoint.to_owned(),
                message,
            },
            400 | 404 | 413 | 422 => BrainError::InvalidRequest {
                endpoint: endpoint.to_owned(),
                message,
            },
            _ => BrainError::Provider {
                endpoint: endpoint.to_owned(),
                message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            BrainError::from_status("ep", 401, String::new()).class(),
            ErrorClass::Auth
        );
        assert_eq!(
            BrainError::from_status("ep", 429, String::new()).class(),
            ErrorClass::RateLimit
        );
        assert_eq!(
            BrainError::from_status("ep", 400, String::new()).class(),
            ErrorClass::Structural
        );
        assert_eq!(
            BrainError::from_status("ep", 500, String::new()).class(),
            ErrorClass::Transient
        );
    }
}
