//! Error types for the AirDash backend.

use std::time::Duration;

/// User-facing remediation for a pairing attempt that found no counterpart.
pub const PAIRING_TIMEOUT_HINT: &str =
    "Pairing timed out. Verify you entered the correct pairing codes on both devices.";

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("ICE provisioning error: {0}")]
    Ice(#[from] IceError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors reported by a document store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Permission denied on {path}")]
    PermissionDenied { path: String },

    #[error("Subscription on {collection} closed by the store")]
    SubscriptionClosed { collection: String },

    #[error("Document not found: {path}")]
    NotFound { path: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// HTTP status the store attached to this failure, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            StoreError::Unavailable { .. } => Some(503),
            StoreError::PermissionDenied { .. } => Some(403),
            StoreError::NotFound { .. } => Some(404),
            StoreError::SubscriptionClosed { .. } | StoreError::Serialization(_) => None,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Errors that end a pairing attempt.
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("Invalid pairing parameters: missing {field}")]
    InvalidParams { field: &'static str },

    #[error("{hint} (waited {after:?})")]
    Timeout { after: Duration, hint: &'static str },

    #[error("Pairing attempt cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PairingError {
    pub fn timeout(after: Duration) -> Self {
        PairingError::Timeout {
            after,
            hint: PAIRING_TIMEOUT_HINT,
        }
    }
}

/// ICE server provisioning errors.
#[derive(Debug, thiserror::Error)]
pub enum IceError {
    #[error("ICE provider environment incomplete, missing: {}", missing.join(", "))]
    InvalidEnvironment { missing: Vec<&'static str> },

    #[error("Provider {provider} request failed: {reason}")]
    Upstream { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// HTTP server lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to start server on {addr}: {reason}")]
    StartupFailed { addr: String, reason: String },
}

/// Machine-readable error kind sent to clients as `{"error": kind}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidParams,
    Timeout,
    Cancelled,
    StoreError,
    InvalidEnvironment,
    UpstreamCredentialError,
    ConfigError,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidParams => "invalidParams",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::StoreError => "storeError",
            ErrorKind::InvalidEnvironment => "invalidEnvironment",
            ErrorKind::UpstreamCredentialError => "upstreamCredentialError",
            ErrorKind::ConfigError => "configError",
            ErrorKind::Internal => "internal",
        }
    }

    /// Default HTTP status for this kind.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::InvalidParams | ErrorKind::Timeout => 400,
            ErrorKind::Cancelled => 503,
            ErrorKind::UpstreamCredentialError => 502,
            ErrorKind::StoreError
            | ErrorKind::InvalidEnvironment
            | ErrorKind::ConfigError
            | ErrorKind::Internal => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::ConfigError,
            Error::Store(_) => ErrorKind::StoreError,
            Error::Pairing(e) => e.kind(),
            Error::Ice(e) => e.kind(),
            Error::Server(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status for this error. Store failures keep the status the store
    /// reported; everything else uses the kind's default.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Store(e)
            | Error::Pairing(PairingError::Store(e))
            | Error::Ice(IceError::Store(e)) => {
                e.status_code().unwrap_or(ErrorKind::StoreError.status_code())
            }
            other => other.kind().status_code(),
        }
    }
}

impl PairingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PairingError::InvalidParams { .. } => ErrorKind::InvalidParams,
            PairingError::Timeout { .. } => ErrorKind::Timeout,
            PairingError::Cancelled => ErrorKind::Cancelled,
            PairingError::Store(_) => ErrorKind::StoreError,
        }
    }
}

impl IceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IceError::InvalidEnvironment { .. } => ErrorKind::InvalidEnvironment,
            IceError::Upstream { .. } | IceError::InvalidResponse { .. } => {
                ErrorKind::UpstreamCredentialError
            }
            IceError::Store(_) => ErrorKind::StoreError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_match_wire_format() {
        assert_eq!(ErrorKind::InvalidParams.as_str(), "invalidParams");
        assert_eq!(ErrorKind::Timeout.as_str(), "timeout");
        assert_eq!(ErrorKind::InvalidEnvironment.as_str(), "invalidEnvironment");
    }

    #[test]
    fn test_pairing_status_codes() {
        let invalid: Error = PairingError::InvalidParams { field: "localCode" }.into();
        assert_eq!(invalid.status_code(), 400);

        let timeout: Error = PairingError::timeout(Duration::from_secs(60)).into();
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert_eq!(timeout.status_code(), 400);
        assert!(timeout.to_string().contains("Verify you entered"));
    }

    #[test]
    fn test_store_status_is_propagated() {
        let denied: Error = PairingError::Store(StoreError::PermissionDenied {
            path: "connections".to_string(),
        })
        .into();
        assert_eq!(denied.kind(), ErrorKind::StoreError);
        assert_eq!(denied.status_code(), 403);

        let closed: Error = StoreError::SubscriptionClosed {
            collection: "connections".to_string(),
        }
        .into();
        assert_eq!(closed.status_code(), 500);
    }

    #[test]
    fn test_ice_error_kinds() {
        let env = IceError::InvalidEnvironment {
            missing: vec!["TWILIO_ACCOUNT_SID"],
        };
        assert_eq!(env.kind(), ErrorKind::InvalidEnvironment);
        assert!(env.to_string().contains("TWILIO_ACCOUNT_SID"));

        let upstream: Error = IceError::Upstream {
            provider: "twilio".to_string(),
            reason: "HTTP 401".to_string(),
        }
        .into();
        assert_eq!(upstream.status_code(), 502);
    }
}
