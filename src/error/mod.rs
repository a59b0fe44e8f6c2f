//! Error types for registry synchronization
//!
//! Every stage of a sync reports through [`SyncError`]. The taxonomy variants
//! (`InvalidAddress`, `PolicyInit`, `Bind`, `Discovery`, `InvalidReference`,
//! `Transfer`, `Login`) are what callers match on; the remaining variants are
//! the causes those wrap.

pub mod handlers;

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Host/port splitting failed
    #[error("invalid registry address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Signature policy could not be constructed
    #[error("failed to initialize signature policy: {0}")]
    PolicyInit(String),

    /// Ephemeral registry could not bind its listener or use its root
    #[error("failed to start registry for bundle '{bundle}': {reason}")]
    Bind { bundle: String, reason: String },

    /// Ephemeral registry failed after it started serving
    #[error("registry for bundle '{bundle}' stopped serving: {reason}")]
    Serve { bundle: String, reason: String },

    /// Repository or tag listing failed on the source registry
    #[error("discovery failed on {registry}: {source}")]
    Discovery {
        registry: String,
        #[source]
        source: Box<SyncError>,
    },

    /// A reference string did not have the expected shape
    #[error("invalid reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    /// A single image copy failed
    #[error("failed to copy {source_ref} to {destination_ref}: {source}")]
    Transfer {
        source_ref: String,
        destination_ref: String,
        #[source]
        source: Box<SyncError>,
    },

    /// Authentication against a destination host failed
    #[error("login to {registry} failed: {source}")]
    Login {
        registry: String,
        #[source]
        source: Box<SyncError>,
    },

    /// The signature policy rejected an image
    #[error("policy rejected {0}")]
    PolicyDenied(String),

    /// Transport level failure (connect, TLS, body read)
    #[error("network error: {0}")]
    Network(String),

    /// The registry answered with an unexpected status
    #[error("registry returned {status}: {message}")]
    Registry { status: u16, message: String },

    /// Content did not match its advertised digest
    #[error("digest mismatch: expected {expected}, got {actual}")]
    Digest { expected: String, actual: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::InvalidReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            SyncError::Cancelled => true,
            SyncError::Discovery { source, .. }
            | SyncError::Transfer { source, .. }
            | SyncError::Login { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Config(format!("JSON error: {}", err))
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::Network(format!("invalid URL: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_cancellation_is_detected() {
        let err = SyncError::Transfer {
            source_ref: "127.0.0.1:5000/app:v1".to_string(),
            destination_ref: "r1.example.com:5000/app:v1".to_string(),
            source: Box::new(SyncError::Cancelled),
        };
        assert!(err.is_cancelled());
        assert!(!SyncError::PolicyInit("bad".to_string()).is_cancelled());
    }

    #[test]
    fn test_display_includes_cause() {
        let err = SyncError::Discovery {
            registry: "127.0.0.1:40000".to_string(),
            source: Box::new(SyncError::Registry {
                status: 500,
                message: "boom".to_string(),
            }),
        };
        let text = err.to_string();
        assert!(text.contains("127.0.0.1:40000"));
        assert!(text.contains("500"));
    }
}
