//! SHA256 digest utilities
//!
//! Manifest and blob digests are always `sha256:<64 lowercase hex>` here;
//! the storage layout and the copy path both rely on that.

use crate::error::{Result, SyncError};
use sha2::Digest;

/// Utilities for working with SHA256 content digests
pub struct DigestUtils;

impl DigestUtils {
    /// Compute SHA256 hex from byte data
    pub fn compute_sha256(data: &[u8]) -> String {
        let mut hasher = sha2::Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Compute full digest (with sha256: prefix) from byte data
    pub fn compute_docker_digest(data: &[u8]) -> String {
        format!("sha256:{}", Self::compute_sha256(data))
    }

    /// Validate SHA256 hex string (64 lowercase hex characters)
    pub fn is_valid_sha256_hex(digest: &str) -> bool {
        digest.len() == 64 && digest.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
    }

    /// Validate full digest format (sha256:xxxxx)
    pub fn is_valid_docker_digest(digest: &str) -> bool {
        digest
            .strip_prefix("sha256:")
            .is_some_and(Self::is_valid_sha256_hex)
    }

    /// Extract the hex part of a full digest
    pub fn extract_hex_part(digest: &str) -> Result<&str> {
        match digest.strip_prefix("sha256:") {
            Some(hex_part) if Self::is_valid_sha256_hex(hex_part) => Ok(hex_part),
            _ => Err(SyncError::invalid_reference(digest, "not a sha256 digest")),
        }
    }

    /// Verify data matches expected digest
    pub fn verify_data_integrity(data: &[u8], expected_digest: &str) -> Result<()> {
        let actual = Self::compute_docker_digest(data);
        if actual != expected_digest {
            return Err(SyncError::Digest {
                expected: expected_digest.to_string(),
                actual,
            });
        }
        Ok(())
    }
}
