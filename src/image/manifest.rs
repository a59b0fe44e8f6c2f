use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};

pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_MANIFEST_V1_SIGNED: &str = "application/vnd.docker.distribution.manifest.v1+prettyjws";
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// `Accept` list used when fetching manifests.
pub const ACCEPTED_MANIFEST_TYPES: [&str; 4] =
    [OCI_INDEX, DOCKER_MANIFEST_LIST, OCI_MANIFEST, DOCKER_MANIFEST_V2];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: Option<String>,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

impl ImageManifest {
    /// Config first, then layers, in manifest order.
    pub fn blobs(&self) -> impl Iterator<Item = &Descriptor> {
        std::iter::once(&self.config).chain(self.layers.iter())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestIndex {
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    pub manifests: Vec<Descriptor>,
}

impl ManifestIndex {
    /// The entry for `os`/`arch`; an exact variant-less match wins over variants.
    pub fn select_platform(&self, os: &str, arch: &str) -> Option<&Descriptor> {
        let mut matching = self.manifests.iter().filter(|d| {
            d.platform
                .as_ref()
                .is_some_and(|p| p.os == os && p.architecture == arch)
        });
        let first = matching.next()?;
        if first.platform.as_ref().is_some_and(|p| p.variant.is_none()) {
            return Some(first);
        }
        matching
            .find(|d| d.platform.as_ref().is_some_and(|p| p.variant.is_none()))
            .or(Some(first))
    }
}

#[derive(Debug, Clone)]
pub enum ParsedManifest {
    Image(ImageManifest),
    Index(ManifestIndex),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestProbe {
    #[serde(default)]
    schema_version: Option<u32>,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Option<serde_json::Value>,
}

/// Media type of a stored manifest: its `mediaType` field, else inferred from shape.
pub fn detect_media_type(data: &[u8]) -> String {
    let probe: ManifestProbe = match serde_json::from_slice(data) {
        Ok(probe) => probe,
        Err(_) => return OCI_MANIFEST.to_string(),
    };
    if let Some(media_type) = probe.media_type {
        return media_type;
    }
    match (probe.schema_version, probe.manifests) {
        (Some(1), _) => DOCKER_MANIFEST_V1_SIGNED.to_string(),
        (_, Some(_)) => OCI_INDEX.to_string(),
        _ => OCI_MANIFEST.to_string(),
    }
}

pub fn is_index(media_type: &str) -> bool {
    media_type == OCI_INDEX || media_type == DOCKER_MANIFEST_LIST
}

pub fn parse_manifest(data: &[u8], media_type: &str) -> Result<ParsedManifest> {
    let media_type = media_type.split(';').next().unwrap_or_default().trim();
    match media_type {
        OCI_INDEX | DOCKER_MANIFEST_LIST => Ok(ParsedManifest::Index(serde_json::from_slice(data)?)),
        OCI_MANIFEST | DOCKER_MANIFEST_V2 => Ok(ParsedManifest::Image(serde_json::from_slice(data)?)),
        other => Err(SyncError::Registry {
            status: 415,
            message: format!("unsupported manifest media type '{}'", other),
        }),
    }
}
