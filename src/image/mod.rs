//! Image manifest handling
//!
//! Types for the manifest formats the copy path understands (Docker schema 2,
//! OCI image manifests, and their list/index forms) and the current-platform
//! selection used when copying a single image out of an index.

pub mod manifest;

pub use manifest::{
    detect_media_type, is_index, parse_manifest, Descriptor, ImageManifest, ManifestIndex,
    ParsedManifest, Platform, ACCEPTED_MANIFEST_TYPES,
};
