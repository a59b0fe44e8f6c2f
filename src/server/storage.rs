//! Read-only view of a `distribution` filesystem storage root.
//!
//! Layout under `<root>/docker/registry/v2`:
//!
//! ```text
//! blobs/sha256/<hex[..2]>/<hex>/data
//! repositories/<name>/_manifests/tags/<tag>/current/link
//! repositories/<name>/_manifests/revisions/sha256/<hex>/link
//! repositories/<name>/_layers/sha256/<hex>/link
//! ```

use crate::digest::DigestUtils;
use crate::error::{Result, SyncError};
use crate::image::detect_media_type;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const V2_PREFIX: [&str; 3] = ["docker", "registry", "v2"];

/// A manifest read from storage.
#[derive(Debug, Clone)]
pub struct StoredManifest {
    pub digest: String,
    pub media_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RegistryStorage {
    base: PathBuf,
}

impl RegistryStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let mut base = root.as_ref().to_path_buf();
        base.extend(V2_PREFIX);
        Self { base }
    }

    fn repositories_dir(&self) -> PathBuf {
        self.base.join("repositories")
    }

    fn repository_dir(&self, name: &str) -> Option<PathBuf> {
        // Names come straight from request paths.
        if name.is_empty()
            || name
                .split('/')
                .any(|c| c.is_empty() || c == "." || c == ".." || c.starts_with('_'))
        {
            return None;
        }
        Some(self.repositories_dir().join(name))
    }

    pub fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        let hex = DigestUtils::extract_hex_part(digest)?;
        Ok(self
            .base
            .join("blobs")
            .join("sha256")
            .join(&hex[..2])
            .join(hex)
            .join("data"))
    }

    /// All repository names, sorted.
    pub async fn catalog(&self) -> Result<Vec<String>> {
        let root = self.repositories_dir();
        let mut names = Vec::new();
        let mut pending = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(SyncError::io(&dir, e)),
            };
            while let Some(entry) = entries.next_entry().await.map_err(|e| SyncError::io(&dir, e))? {
                let file_type = entry.file_type().await.map_err(|e| SyncError::io(entry.path(), e))?;
                if !file_type.is_dir() {
                    continue;
                }
                let file_name = entry.file_name();
                let file_name = file_name.to_string_lossy();
                if file_name == "_manifests" {
                    if let Ok(relative) = dir.strip_prefix(&root) {
                        let name = relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy())
                            .collect::<Vec<_>>()
                            .join("/");
                        if !name.is_empty() {
                            names.push(name);
                        }
                    }
                } else if !file_name.starts_with('_') {
                    pending.push(entry.path());
                }
            }
        }

        names.sort();
        Ok(names)
    }

    /// Tags of `name`, sorted; `None` when the repository does not exist.
    pub async fn tags(&self, name: &str) -> Result<Option<Vec<String>>> {
        let Some(repo) = self.repository_dir(name) else {
            return Ok(None);
        };
        let manifests = repo.join("_manifests");
        if !is_dir(&manifests).await {
            return Ok(None);
        }

        let tags_dir = manifests.join("tags");
        let mut tags = Vec::new();
        let mut entries = match tokio::fs::read_dir(&tags_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Some(tags)),
            Err(e) => return Err(SyncError::io(&tags_dir, e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| SyncError::io(&tags_dir, e))? {
            if is_file(&entry.path().join("current").join("link")).await {
                tags.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        tags.sort();
        Ok(Some(tags))
    }

    /// Manifest by tag or digest; `None` when unknown in this repository.
    pub async fn manifest(&self, name: &str, reference: &str) -> Result<Option<StoredManifest>> {
        let Some(repo) = self.repository_dir(name) else {
            return Ok(None);
        };
        let manifests = repo.join("_manifests");

        let digest = if DigestUtils::is_valid_docker_digest(reference) {
            let hex = DigestUtils::extract_hex_part(reference)?;
            let revision = manifests.join("revisions").join("sha256").join(hex).join("link");
            if !is_file(&revision).await {
                return Ok(None);
            }
            reference.to_string()
        } else {
            if reference.contains('/') || reference.starts_with('.') {
                return Ok(None);
            }
            let link = manifests.join("tags").join(reference).join("current").join("link");
            match read_link(&link).await? {
                Some(digest) => digest,
                None => return Ok(None),
            }
        };

        let path = self.blob_path(&digest)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SyncError::io(&path, e)),
        };

        Ok(Some(StoredManifest {
            media_type: detect_media_type(&data),
            digest,
            data,
        }))
    }

    /// Path of a blob linked into `name`; `None` when not linked or missing.
    pub async fn linked_blob(&self, name: &str, digest: &str) -> Result<Option<PathBuf>> {
        if !DigestUtils::is_valid_docker_digest(digest) {
            return Ok(None);
        }
        let Some(repo) = self.repository_dir(name) else {
            return Ok(None);
        };
        let hex = DigestUtils::extract_hex_part(digest)?;
        let layer_link = repo.join("_layers").join("sha256").join(hex).join("link");
        let revision_link = repo
            .join("_manifests")
            .join("revisions")
            .join("sha256")
            .join(hex)
            .join("link");
        if !is_file(&layer_link).await && !is_file(&revision_link).await {
            return Ok(None);
        }

        let path = self.blob_path(digest)?;
        Ok(is_file(&path).await.then_some(path))
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

async fn read_link(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => {
            let digest = content.trim().to_string();
            if DigestUtils::is_valid_docker_digest(&digest) {
                Ok(Some(digest))
            } else {
                tracing::warn!(link = %path.display(), "ignoring malformed link file");
                Ok(None)
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SyncError::io(path, e)),
    }
}

/// Helpers to lay out a storage root, used by tests across the crate.
#[cfg(test)]
pub(crate) mod fixture {
    use super::*;

    pub fn write_blob(root: &Path, data: &[u8]) -> String {
        let digest = DigestUtils::compute_docker_digest(data);
        let storage = RegistryStorage::new(root);
        let path = storage.blob_path(&digest).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
        digest
    }

    fn repo_dir(root: &Path, name: &str) -> PathBuf {
        RegistryStorage::new(root).repositories_dir().join(name)
    }

    fn write_link(path: PathBuf, digest: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, digest).unwrap();
    }

    pub fn link_layer(root: &Path, name: &str, digest: &str) {
        let hex = &digest[7..];
        write_link(repo_dir(root, name).join("_layers/sha256").join(hex).join("link"), digest);
    }

    /// Store a single-layer image under `name:tag`; returns the manifest digest.
    pub fn add_image(root: &Path, name: &str, tag: &str, layer: &[u8]) -> String {
        let config = format!(r#"{{"architecture":"amd64","os":"linux","layer":"{}"}}"#, layer.len());
        let config_digest = write_blob(root, config.as_bytes());
        let layer_digest = write_blob(root, layer);
        link_layer(root, name, &config_digest);
        link_layer(root, name, &layer_digest);

        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": crate::image::manifest::OCI_MANIFEST,
            "config": {"mediaType": "application/vnd.oci.image.config.v1+json", "digest": config_digest, "size": config.len()},
            "layers": [{"mediaType": "application/vnd.oci.image.layer.v1.tar+gzip", "digest": layer_digest, "size": layer.len()}]
        });
        let manifest = serde_json::to_vec(&manifest).unwrap();
        let manifest_digest = write_blob(root, &manifest);
        let repo = repo_dir(root, name);
        write_link(
            repo.join("_manifests/revisions/sha256").join(&manifest_digest[7..]).join("link"),
            &manifest_digest,
        );
        write_link(repo.join("_manifests/tags").join(tag).join("current/link"), &manifest_digest);
        manifest_digest
    }
}
