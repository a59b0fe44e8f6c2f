//! Configuration for a sync run
//!
//! Everything here is built once per invocation and then shared read-only.

use crate::credentials::CredentialResolver;
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Address every ephemeral registry is reached on.
pub const LOCALHOST: &str = "127.0.0.1";

/// Port used when neither the host nor a fallback supplies one.
pub const DEFAULT_PORT: &str = "5000";

/// Subdirectory of a bundle mount point holding its registry storage.
pub const REGISTRY_DIR_NAME: &str = "registry";

/// Upper bound on repositories returned by a single catalog search.
pub const SEARCH_LIMIT: usize = 1 << 10;

pub const DEFAULT_REGISTRY_USERNAME: &str = "admin";
pub const DEFAULT_REGISTRY_PASSWORD: &str = "passw0rd";

/// Bind address for ephemeral registries; port 0 gives each bundle its own port.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:0";

const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Transfer-wide settings shared by every concurrent transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemContext {
    /// Skip TLS certificate verification (and allow plain HTTP fallback)
    pub insecure_skip_tls_verify: bool,
    /// Signature policy file; `None` accepts everything
    pub signature_policy_path: Option<PathBuf>,
    /// Override the OS used to pick an image out of a manifest list
    pub os_choice: Option<String>,
    /// Override the architecture used to pick an image out of a manifest list
    pub architecture_choice: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for SystemContext {
    fn default() -> Self {
        Self {
            insecure_skip_tls_verify: true,
            signature_policy_path: None,
            os_choice: None,
            architecture_choice: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl SystemContext {
    /// The `(os, architecture)` pair in OCI platform vocabulary.
    pub fn platform(&self) -> (String, String) {
        let os = self
            .os_choice
            .clone()
            .unwrap_or_else(|| oci_os(std::env::consts::OS).to_string());
        let arch = self
            .architecture_choice
            .clone()
            .unwrap_or_else(|| oci_arch(std::env::consts::ARCH).to_string());
        (os, arch)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn oci_os(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

fn oci_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64le",
        other => other,
    }
}

/// Configuration of one ephemeral registry server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Storage root (the bundle's `registry` directory)
    pub root: PathBuf,
    /// Listen address, `host:port`
    pub http_addr: String,
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            http_addr: DEFAULT_LISTEN_ADDR.to_string(),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }

    pub fn with_http_addr(mut self, addr: impl Into<String>) -> Self {
        self.http_addr = addr.into();
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Top-level settings for a sync invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub system: SystemContext,
    pub credentials: CredentialResolver,
    /// Listen address template for ephemeral registries
    pub listen_addr: String,
    pub shutdown_timeout_secs: u64,
    /// Deadline for the whole sync; `None` waits indefinitely
    pub timeout_secs: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            system: SystemContext::default(),
            credentials: CredentialResolver::default(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            timeout_secs: None,
        }
    }
}

impl SyncConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
        serde_json::from_str(&data).map_err(|e| {
            SyncError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Server configuration for a bundle registry rooted at `root`.
    pub fn server_config(&self, root: impl Into<PathBuf>) -> ServerConfig {
        ServerConfig::with_root(root)
            .with_http_addr(self.listen_addr.clone())
            .with_shutdown_timeout(Duration::from_secs(self.shutdown_timeout_secs))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}
