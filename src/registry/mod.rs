//! Registry addressing, references and the HTTP side of a sync
//!
//! Source and destination registries are both reached through the
//! [`transport`] traits; [`discovery`] and [`transfer`] are written against
//! those traits only.

pub mod address;
pub mod auth;
pub mod client;
pub mod discovery;
pub mod reference;
pub mod transfer;
pub mod transport;

pub use address::{resolve_registry_address, RegistryAddress};
pub use auth::{AuthChallenge, AuthStore};
pub use client::{RegistryClient, RegistryClientBuilder};
pub use discovery::discover;
pub use reference::{RepositoryRef, TaggedImageRef};
pub use transfer::{destination_reference, transfer_images};
pub use transport::{
    CopyOptions, CopyReport, HttpTransport, ImageCopier, ImageListSelection, RegistryTransport,
};
