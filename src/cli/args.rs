//! Command-line argument parsing

use crate::bundle::ImageBundle;
use crate::config::SyncConfig;
use crate::credentials::CredentialResolver;
use crate::error::{Result, SyncError};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "registry-sync")]
#[command(about = "Mirror locally mounted image bundles to one or more container registries")]
#[command(version, author)]
pub struct Args {
    /// Destination registry hosts
    #[arg(
        required = true,
        value_name = "HOST[:PORT]",
        help = "Destination registries; a host without a port uses 5000"
    )]
    pub hosts: Vec<String>,

    /// Bundles to serve
    #[arg(
        long = "bundle",
        short = 'b',
        required = true,
        value_name = "NAME=PATH|PATH",
        help = "Mounted bundle whose registry/ directory is mirrored (repeatable)"
    )]
    pub bundles: Vec<ImageBundle>,

    /// Registry username
    #[arg(
        long = "username",
        short = 'u',
        help = "Username for every destination (default: $DEFAULT_REGISTRY_USERNAME, then admin)"
    )]
    pub username: Option<String>,

    /// Registry password
    #[arg(
        long = "password",
        short = 'p',
        help = "Password for every destination (default: $DEFAULT_REGISTRY_PASSWORD, then the built-in one)"
    )]
    pub password: Option<String>,

    /// Verify TLS certificates
    #[arg(
        long = "tls-verify",
        help = "Verify destination TLS certificates and never fall back to plain HTTP"
    )]
    pub tls_verify: bool,

    /// Signature policy file
    #[arg(
        long = "policy",
        value_name = "FILE",
        help = "containers-policy.json governing which images may be copied"
    )]
    pub policy: Option<PathBuf>,

    /// Listen address for bundle registries
    #[arg(
        long = "listen-addr",
        value_name = "ADDR",
        help = "Listen address for the per-bundle registries (default 127.0.0.1:0)"
    )]
    pub listen_addr: Option<String>,

    /// Overall deadline
    #[arg(
        long = "timeout",
        short = 't',
        env = "REGISTRY_SYNC_TIMEOUT",
        value_name = "SECONDS",
        help = "Cancel the sync after this many seconds"
    )]
    pub timeout: Option<u64>,

    /// Per-request timeout
    #[arg(
        long = "request-timeout",
        value_name = "SECONDS",
        help = "Timeout for a single registry request in seconds"
    )]
    pub request_timeout: Option<u64>,

    #[arg(long = "override-os", value_name = "OS", help = "Use OS instead of the running one when picking images from a list")]
    pub override_os: Option<String>,

    #[arg(long = "override-arch", value_name = "ARCH", help = "Use ARCH instead of the running one when picking images from a list")]
    pub override_arch: Option<String>,

    /// Configuration file path
    #[arg(
        long = "config",
        short = 'c',
        env = "REGISTRY_SYNC_CONFIG",
        value_name = "FILE",
        help = "JSON configuration file; command-line flags take precedence"
    )]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(long = "verbose", short = 'v', help = "Enable verbose output")]
    pub verbose: bool,

    /// Quiet mode
    #[arg(
        long = "quiet",
        short = 'q',
        conflicts_with = "verbose",
        help = "Only print warnings and errors"
    )]
    pub quiet: bool,
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    /// Validate arguments
    pub fn validate(&self) -> Result<()> {
        if self.hosts.iter().any(|h| h.trim().is_empty()) {
            return Err(SyncError::Config("destination host must not be empty".to_string()));
        }

        let mut names: Vec<&str> = self.bundles.iter().map(|b| b.name()).collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(SyncError::Config(format!("bundle name '{}' used twice", pair[0])));
        }

        if self.timeout == Some(0) {
            return Err(SyncError::Config("timeout must be greater than 0".to_string()));
        }
        if self.request_timeout == Some(0) {
            return Err(SyncError::Config("request timeout must be greater than 0".to_string()));
        }

        Ok(())
    }

    /// The effective configuration: config file (if any), then environment,
    /// then command-line flags.
    pub fn to_config(&self) -> Result<SyncConfig> {
        let mut config = match &self.config {
            Some(path) => SyncConfig::from_file(path)?,
            None => SyncConfig::default(),
        };

        config.credentials = CredentialResolver::new(self.username.clone(), self.password.clone())
            .or(CredentialResolver::from_env())
            .or(config.credentials);

        if self.tls_verify {
            config.system.insecure_skip_tls_verify = false;
        }
        if let Some(policy) = &self.policy {
            config.system.signature_policy_path = Some(policy.clone());
        }
        if let Some(addr) = &self.listen_addr {
            config.listen_addr = addr.clone();
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = Some(timeout);
        }
        if let Some(timeout) = self.request_timeout {
            config.system.request_timeout_secs = timeout;
        }
        if let Some(os) = &self.override_os {
            config.system.os_choice = Some(os.clone());
        }
        if let Some(arch) = &self.override_arch {
            config.system.architecture_choice = Some(arch.clone());
        }

        Ok(config)
    }
}
