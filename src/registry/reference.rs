//! Repository and tagged image references.
//!
//! Parses references like `127.0.0.1:40321/library/nginx` into structured
//! components. A [`RepositoryRef`] is name-only; a [`TaggedImageRef`] is
//! always a repository plus a validated tag.

use crate::error::{Result, SyncError};
use std::fmt;

/// Registry used when a name carries no domain component.
const DEFAULT_DOMAIN: &str = "docker.io";

/// Namespace prepended to single-component Docker Hub names.
const OFFICIAL_NAMESPACE: &str = "library";

const MAX_NAME_LEN: usize = 255;
const MAX_TAG_LEN: usize = 128;

/// A repository reference with no tag and no digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryRef {
    /// Registry host, with port when present (e.g. "127.0.0.1:5000")
    domain: String,
    /// Repository path (e.g. "library/nginx")
    path: String,
}

impl RepositoryRef {
    /// Parse a normalized, name-only repository reference.
    ///
    /// - `127.0.0.1:5000/app` → domain `127.0.0.1:5000`, path `app`
    /// - `nginx` → `docker.io/library/nginx`
    /// - `app:v1`, `app@sha256:...` → `InvalidReference`
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SyncError::invalid_reference(input, "empty reference"));
        }
        if input.contains('@') {
            return Err(SyncError::invalid_reference(
                input,
                "input names a reference, not a repository",
            ));
        }

        let (domain, path) = split_domain(input);
        if last_component(&path).contains(':') {
            return Err(SyncError::invalid_reference(
                input,
                "input names a reference, not a repository",
            ));
        }

        Self::from_parts(input, domain, path)
    }

    fn from_parts(input: &str, domain: String, path: String) -> Result<Self> {
        if !valid_domain(&domain) {
            return Err(SyncError::invalid_reference(
                input,
                format!("invalid registry domain '{}'", domain),
            ));
        }
        if path.is_empty() || !path.split('/').all(valid_path_component) {
            return Err(SyncError::invalid_reference(
                input,
                "repository name must be lowercase components separated by '/'",
            ));
        }
        if domain.len() + 1 + path.len() > MAX_NAME_LEN {
            return Err(SyncError::invalid_reference(
                input,
                format!("repository name longer than {} characters", MAX_NAME_LEN),
            ));
        }
        Ok(Self { domain, path })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Fully qualified name, `domain/path`.
    pub fn name(&self) -> String {
        format!("{}/{}", self.domain, self.path)
    }

    /// Combine with a tag; fails when the tag is not a valid tag string.
    pub fn with_tag(&self, tag: &str) -> Result<TaggedImageRef> {
        if !valid_tag(tag) {
            return Err(SyncError::invalid_reference(
                format!("{}:{}", self.name(), tag),
                "invalid tag format",
            ));
        }
        Ok(TaggedImageRef {
            repository: self.clone(),
            tag: tag.to_string(),
        })
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.path)
    }
}

/// A repository plus a tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaggedImageRef {
    repository: RepositoryRef,
    tag: String,
}

impl TaggedImageRef {
    /// Parse `domain/path:tag`. Digests are rejected.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.contains('@') {
            return Err(SyncError::invalid_reference(input, "digest references are not supported"));
        }
        let (domain, path) = split_domain(input);
        let last = last_component(&path);
        let colon = last
            .rfind(':')
            .ok_or_else(|| SyncError::invalid_reference(input, "missing tag"))?;
        let tag_start = path.len() - last.len() + colon;
        let (repo_path, tag) = (&path[..tag_start], &path[tag_start + 1..]);

        let repository = RepositoryRef::from_parts(input, domain, repo_path.to_string())?;
        repository.with_tag(tag)
    }

    pub fn repository(&self) -> &RepositoryRef {
        &self.repository
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl fmt::Display for TaggedImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Split off the registry domain. The first component is a domain when it
/// contains a dot or colon or is "localhost".
fn split_domain(name: &str) -> (String, String) {
    if let Some(slash) = name.find('/') {
        let first = &name[..slash];
        if first.contains('.') || first.contains(':') || first == "localhost" {
            return (first.to_string(), name[slash + 1..].to_string());
        }
        return (DEFAULT_DOMAIN.to_string(), name.to_string());
    }
    (
        DEFAULT_DOMAIN.to_string(),
        format!("{}/{}", OFFICIAL_NAMESPACE, name),
    )
}

fn last_component(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

fn valid_domain(domain: &str) -> bool {
    !domain.is_empty()
        && domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'))
}

/// `[a-z0-9]+((\.|_|__|-+)[a-z0-9]+)*`
fn valid_path_component(component: &str) -> bool {
    let b = component.as_bytes();
    let alnum = |x: u8| x.is_ascii_lowercase() || x.is_ascii_digit();
    let mut i = 0;
    loop {
        let start = i;
        while i < b.len() && alnum(b[i]) {
            i += 1;
        }
        if i == start {
            return false;
        }
        if i == b.len() {
            return true;
        }
        match b[i] {
            b'.' => i += 1,
            b'_' => {
                i += 1;
                if i < b.len() && b[i] == b'_' {
                    i += 1;
                }
            }
            b'-' => {
                while i < b.len() && b[i] == b'-' {
                    i += 1;
                }
            }
            _ => return false,
        }
        if i == b.len() {
            return false;
        }
    }
}

/// `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`
fn valid_tag(tag: &str) -> bool {
    let word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let mut chars = tag.chars();
    match chars.next() {
        Some(c) if word(c) => {}
        _ => return false,
    }
    tag.len() <= MAX_TAG_LEN && chars.all(|c| word(c) || c == '.' || c == '-')
}
