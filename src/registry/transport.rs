//! Transport seams used by the sync pipeline.
//!
//! [`RegistryTransport`] covers login and discovery, [`ImageCopier`] covers a
//! single image copy. [`HttpTransport`] implements both over
//! [`RegistryClient`]; tests substitute in-memory doubles.

use crate::config::SystemContext;
use crate::credentials::Credentials;
use crate::error::{Result, SyncError};
use crate::image::{parse_manifest, Descriptor, ParsedManifest};
use crate::policy::PolicyContext;
use crate::registry::client::{RegistryClient, RegistryClientBuilder};
use crate::registry::{resolve_registry_address, RegistryAddress, RepositoryRef, TaggedImageRef};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Authenticate and remember the credentials for later requests.
    async fn login(&self, sys: &SystemContext, registry: &RegistryAddress, credentials: &Credentials) -> Result<()>;

    /// Repository names (without the registry prefix), at most `limit`.
    async fn search(&self, sys: &SystemContext, registry: &RegistryAddress, limit: usize) -> Result<Vec<String>>;

    async fn list_tags(&self, sys: &SystemContext, repository: &RepositoryRef) -> Result<Vec<String>>;
}

/// Which images of a manifest list to copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImageListSelection {
    /// Only the entry matching the system platform
    #[default]
    CopySystemImage,
    /// Every entry plus the list itself
    CopyAllImages,
}

#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub source_ctx: Arc<SystemContext>,
    pub destination_ctx: Arc<SystemContext>,
    pub image_list_selection: ImageListSelection,
}

impl CopyOptions {
    /// Same context on both sides, current platform only.
    pub fn system_image(sys: Arc<SystemContext>) -> Self {
        Self {
            source_ctx: sys.clone(),
            destination_ctx: sys,
            image_list_selection: ImageListSelection::CopySystemImage,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyReport {
    pub manifest_digest: String,
    pub blobs_copied: usize,
    pub blobs_skipped: usize,
}

#[async_trait]
pub trait ImageCopier: Send + Sync {
    async fn copy_image(
        &self,
        policy: &PolicyContext,
        destination: &TaggedImageRef,
        source: &TaggedImageRef,
        options: &CopyOptions,
    ) -> Result<CopyReport>;
}

/// Registry transport over HTTP.
pub struct HttpTransport {
    client: RegistryClient,
}

impl HttpTransport {
    pub fn new(sys: &SystemContext) -> Result<Self> {
        Ok(Self {
            client: RegistryClientBuilder::from_system_context(sys).build()?,
        })
    }

    pub fn with_client(client: RegistryClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &RegistryClient {
        &self.client
    }

    /// Copy config and layers the destination does not have yet.
    async fn copy_blobs<'a>(
        &self,
        blobs: impl Iterator<Item = &'a Descriptor>,
        src: (&RegistryAddress, &str),
        dst: (&RegistryAddress, &str),
        report: &mut CopyReport,
    ) -> Result<()> {
        for blob in blobs {
            if self.client.blob_exists(dst.0, dst.1, &blob.digest).await? {
                tracing::debug!(digest = %blob.digest, "blob already present");
                report.blobs_skipped += 1;
                continue;
            }
            let data = self.client.get_blob(src.0, src.1, &blob.digest).await?;
            if data.len() as u64 != blob.size {
                tracing::warn!(
                    digest = %blob.digest,
                    expected = blob.size,
                    actual = data.len(),
                    "blob size differs from descriptor"
                );
            }
            self.client.upload_blob(dst.0, dst.1, &blob.digest, &data).await?;
            report.blobs_copied += 1;
        }
        Ok(())
    }

    /// Copy one image manifest's blobs, then the manifest itself under `reference`.
    async fn copy_single(
        &self,
        src: (&RegistryAddress, &str),
        dst: (&RegistryAddress, &str),
        reference: &str,
        digest: &str,
        report: &mut CopyReport,
    ) -> Result<String> {
        let manifest = self.client.get_manifest(src.0, src.1, digest).await?;
        let ParsedManifest::Image(image) = parse_manifest(&manifest.data, &manifest.media_type)? else {
            return Err(SyncError::Registry {
                status: 415,
                message: format!("nested manifest list at {}", digest),
            });
        };
        self.copy_blobs(image.blobs(), src, dst, report).await?;
        self.client
            .put_manifest(dst.0, dst.1, reference, &manifest.media_type, &manifest.data)
            .await?;
        Ok(manifest.digest)
    }
}

fn registry_of(reference: &RepositoryRef) -> Result<RegistryAddress> {
    resolve_registry_address(reference.domain(), None)
}

#[async_trait]
impl RegistryTransport for HttpTransport {
    async fn login(&self, _sys: &SystemContext, registry: &RegistryAddress, credentials: &Credentials) -> Result<()> {
        self.client.login(registry, credentials).await
    }

    async fn search(&self, _sys: &SystemContext, registry: &RegistryAddress, limit: usize) -> Result<Vec<String>> {
        self.client.catalog(registry, limit).await
    }

    async fn list_tags(&self, _sys: &SystemContext, repository: &RepositoryRef) -> Result<Vec<String>> {
        let registry = registry_of(repository)?;
        self.client.list_tags(&registry, repository.path()).await
    }
}

#[async_trait]
impl ImageCopier for HttpTransport {
    async fn copy_image(
        &self,
        policy: &PolicyContext,
        destination: &TaggedImageRef,
        source: &TaggedImageRef,
        options: &CopyOptions,
    ) -> Result<CopyReport> {
        policy.check(source)?;

        let src_registry = registry_of(source.repository())?;
        let dst_registry = registry_of(destination.repository())?;
        let src = (&src_registry, source.repository().path());
        let dst = (&dst_registry, destination.repository().path());
        let mut report = CopyReport::default();

        let top = self.client.get_manifest(src.0, src.1, source.tag()).await?;
        match parse_manifest(&top.data, &top.media_type)? {
            ParsedManifest::Image(image) => {
                self.copy_blobs(image.blobs(), src, dst, &mut report).await?;
                self.client
                    .put_manifest(dst.0, dst.1, destination.tag(), &top.media_type, &top.data)
                    .await?;
                report.manifest_digest = top.digest;
            }
            ParsedManifest::Index(index) => match options.image_list_selection {
                ImageListSelection::CopySystemImage => {
                    let (os, arch) = options.source_ctx.platform();
                    let entry = index.select_platform(&os, &arch).ok_or_else(|| SyncError::Registry {
                        status: 404,
                        message: format!("{} has no image for {}/{}", source, os, arch),
                    })?;
                    tracing::debug!(image = %source, os, arch, digest = %entry.digest, "selected platform image");
                    report.manifest_digest = self
                        .copy_single(src, dst, destination.tag(), &entry.digest, &mut report)
                        .await?;
                }
                ImageListSelection::CopyAllImages => {
                    for entry in &index.manifests {
                        self.copy_single(src, dst, &entry.digest, &entry.digest, &mut report)
                            .await?;
                    }
                    self.client
                        .put_manifest(dst.0, dst.1, destination.tag(), &top.media_type, &top.data)
                        .await?;
                    report.manifest_digest = top.digest;
                }
            },
        }

        tracing::debug!(
            source = %source,
            destination = %destination,
            copied = report.blobs_copied,
            skipped = report.blobs_skipped,
            "image copied"
        );
        Ok(report)
    }
}
