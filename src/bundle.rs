//! Locally mounted image bundles

use crate::config::REGISTRY_DIR_NAME;
use crate::error::{Result, SyncError};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A mounted image store, served as one ephemeral registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBundle {
    name: String,
    mount_point: PathBuf,
}

impl ImageBundle {
    pub fn new(name: impl Into<String>, mount_point: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            mount_point: mount_point.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// `<mount_point>/registry`
    pub fn registry_root(&self) -> PathBuf {
        self.mount_point.join(REGISTRY_DIR_NAME)
    }
}

impl FromStr for ImageBundle {
    type Err = SyncError;

    /// `NAME=PATH`, or a bare `PATH` named after its last component.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some((name, path)) = s.split_once('=') {
            if name.is_empty() || path.is_empty() {
                return Err(SyncError::Config(format!(
                    "bundle '{}' must be NAME=PATH with both parts set",
                    s
                )));
            }
            return Ok(Self::new(name, path));
        }

        if s.is_empty() {
            return Err(SyncError::Config("empty bundle path".to_string()));
        }
        let path = PathBuf::from(s);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| s.to_string());
        Ok(Self::new(name, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_root() {
        let bundle = ImageBundle::new("a", "/var/lib/bundles/a");
        assert_eq!(bundle.registry_root(), PathBuf::from("/var/lib/bundles/a/registry"));
    }

    #[test]
    fn test_parse_named_and_bare() {
        let named: ImageBundle = "base=/mnt/base".parse().unwrap();
        assert_eq!(named.name(), "base");
        assert_eq!(named.mount_point(), Path::new("/mnt/base"));

        let bare: ImageBundle = "/mnt/apps/".parse().unwrap();
        assert_eq!(bare.name(), "apps");
    }

    #[test]
    fn test_parse_rejects_empty_parts() {
        assert!("=/mnt".parse::<ImageBundle>().is_err());
        assert!("a=".parse::<ImageBundle>().is_err());
        assert!("".parse::<ImageBundle>().is_err());
    }
}
