//! Repository and tag discovery on a source registry.

use crate::config::{SystemContext, SEARCH_LIMIT};
use crate::error::{Result, SyncError};
use crate::registry::transport::RegistryTransport;
use crate::registry::{RegistryAddress, RepositoryRef, TaggedImageRef};
use tokio_util::sync::CancellationToken;

/// Every tagged image on `source`.
///
/// A tag that does not form a valid reference is skipped; any listing failure
/// aborts discovery for this registry. Zero repositories is not an error.
pub async fn discover(
    transport: &dyn RegistryTransport,
    sys: &SystemContext,
    source: &RegistryAddress,
    cancel: &CancellationToken,
) -> Result<Vec<TaggedImageRef>> {
    let wrap = |e: SyncError| SyncError::Discovery {
        registry: source.to_string(),
        source: Box::new(e),
    };

    let repositories = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(SyncError::Cancelled),
        result = transport.search(sys, source, SEARCH_LIMIT) => result.map_err(wrap)?,
    };

    if repositories.is_empty() {
        tracing::info!(registry = %source, "no repositories found");
        return Ok(Vec::new());
    }
    tracing::debug!(registry = %source, count = repositories.len(), "repositories found");

    let mut images = Vec::new();
    for name in repositories {
        let repository = RepositoryRef::parse(&format!("{}/{}", source, name))?;

        let tags = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            result = transport.list_tags(sys, &repository) => result.map_err(wrap)?,
        };

        for tag in tags {
            match repository.with_tag(&tag) {
                Ok(image) => images.push(image),
                Err(e) => {
                    tracing::warn!(repository = %repository, tag = %tag, error = %e, "skipping tag");
                }
            }
        }
    }

    Ok(images)
}
