//! Standardized mapping from HTTP responses and transport failures to [`SyncError`]

use crate::error::SyncError;
use reqwest::StatusCode;

/// Standard error handler for registry HTTP responses
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Handle registry-related HTTP errors
    pub fn handle_registry_error(status: StatusCode, error_text: &str, operation: &str) -> SyncError {
        let message = match status.as_u16() {
            401 => format!("unauthorized to perform {}: {}", operation, error_text),
            403 => format!("forbidden: insufficient permissions for {}: {}", operation, error_text),
            404 => format!("resource not found for {}: {}", operation, error_text),
            405 => format!("{} not supported by registry: {}", operation, error_text),
            429 => format!("rate limited during {}: {}", operation, error_text),
            500 => format!("registry server error during {}: {}", operation, error_text),
            502 | 503 => format!("registry unavailable for {}: {}", operation, error_text),
            _ => format!("{} failed: {}", operation, error_text),
        };

        SyncError::Registry {
            status: status.as_u16(),
            message,
        }
    }

    /// Handle authentication-related HTTP errors
    pub fn handle_auth_error(status: StatusCode, error_text: &str) -> SyncError {
        let message = match status.as_u16() {
            400 => "invalid token request parameters".to_string(),
            401 => "invalid credentials provided".to_string(),
            403 => "access denied - insufficient permissions".to_string(),
            404 => "authentication endpoint not found".to_string(),
            _ => format!("authentication failed: {}", error_text),
        };

        SyncError::Registry {
            status: status.as_u16(),
            message,
        }
    }

    /// Handle blob upload errors, keeping the digest hint registries send back
    pub fn handle_upload_error(status: StatusCode, error_text: &str, context: &str) -> SyncError {
        let message = match status.as_u16() {
            400 if error_text.contains("DIGEST_INVALID") => {
                format!("registry rejected digest for {}: {}", context, error_text)
            }
            400 => format!("bad request during {}: {}", context, error_text),
            413 => format!("content too large for {}: {}", context, error_text),
            507 => format!("registry out of storage during {}: {}", context, error_text),
            _ => return Self::handle_registry_error(status, error_text, context),
        };

        SyncError::Registry {
            status: status.as_u16(),
            message,
        }
    }
}

/// Network error categorization
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    /// Categorize and format network errors with context
    pub fn handle_network_error(error: &reqwest::Error, context: &str) -> SyncError {
        let message = if error.is_timeout() {
            format!("{} timed out: {}", context, error)
        } else if error.is_connect() {
            format!("connection error during {}: {}", context, error)
        } else if error.to_string().contains("certificate") {
            format!("TLS certificate error during {}: {}", context, error)
        } else {
            format!("{}: {}", context, error)
        };

        SyncError::Network(message)
    }
}
