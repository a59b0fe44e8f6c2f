//! Copying discovered images from a source registry to one destination.

use crate::config::SystemContext;
use crate::error::{Result, SyncError};
use crate::policy::PolicyContext;
use crate::registry::transport::{CopyOptions, ImageCopier};
use crate::registry::{RegistryAddress, TaggedImageRef};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Re-home `source` from `source_registry` under `destination_registry`.
///
/// `127.0.0.1:41000/library/nginx:1.25` with destination `r1.example.com:5000`
/// becomes `r1.example.com:5000/library/nginx:1.25`.
pub fn destination_reference(
    source: &TaggedImageRef,
    source_registry: &RegistryAddress,
    destination_registry: &RegistryAddress,
) -> Result<TaggedImageRef> {
    let full = source.to_string();
    let suffix = full
        .strip_prefix(source_registry.as_str())
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| {
            SyncError::invalid_reference(
                full.as_str(),
                format!("reference is not under source registry {}", source_registry),
            )
        })?;
    TaggedImageRef::parse(&format!("{}/{}", destination_registry, suffix))
}

/// Copy `images` one at a time; the first failure stops the rest.
///
/// Returns the number of images copied.
pub async fn transfer_images(
    copier: &dyn ImageCopier,
    policy: &PolicyContext,
    sys: Arc<SystemContext>,
    images: &[TaggedImageRef],
    source_registry: &RegistryAddress,
    destination_registry: &RegistryAddress,
    cancel: &CancellationToken,
) -> Result<usize> {
    let options = CopyOptions::system_image(sys);
    let mut copied = 0;

    for source in images {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let destination = destination_reference(source, source_registry, destination_registry)?;
        tracing::debug!(source = %source, destination = %destination, "copying image");

        let report = copier
            .copy_image(policy, &destination, source, &options)
            .await
            .map_err(|e| SyncError::Transfer {
                source_ref: source.to_string(),
                destination_ref: destination.to_string(),
                source: Box::new(e),
            })?;

        tracing::info!(
            image = %destination,
            digest = %report.manifest_digest,
            blobs_copied = report.blobs_copied,
            blobs_skipped = report.blobs_skipped,
            "image synced"
        );
        copied += 1;
    }

    Ok(copied)
}
