//! Registry Sync Library
//!
//! Mirrors locally mounted image bundles to a set of destination registries.
//! Each bundle is served by a short-lived local registry; images are
//! discovered there and copied to every destination concurrently.

pub mod bundle;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod digest;
pub mod error;
pub mod image;
pub mod logging;
pub mod policy;
pub mod registry;
pub mod server;
pub mod sync;

pub use bundle::ImageBundle;
pub use config::{ServerConfig, SyncConfig, SystemContext};
pub use credentials::{CredentialResolver, Credentials};
pub use error::{Result, SyncError};
pub use registry::{resolve_registry_address, RegistryAddress, RepositoryRef, TaggedImageRef};
pub use sync::{SyncReport, Syncer};
