//! Credential resolution for destination registries

use crate::config::{DEFAULT_REGISTRY_PASSWORD, DEFAULT_REGISTRY_USERNAME};
use crate::registry::RegistryAddress;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;

pub const USERNAME_ENV: &str = "DEFAULT_REGISTRY_USERNAME";
pub const PASSWORD_ENV: &str = "DEFAULT_REGISTRY_PASSWORD";

/// Username/password pair for one registry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Resolves credentials per destination: override if set, else the built-in default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialResolver {
    pub username_override: Option<String>,
    pub password_override: Option<String>,
}

impl CredentialResolver {
    pub fn new(username_override: Option<String>, password_override: Option<String>) -> Self {
        Self {
            username_override,
            password_override,
        }
    }

    /// Read the overrides from `DEFAULT_REGISTRY_USERNAME` / `DEFAULT_REGISTRY_PASSWORD`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var_os(key))
    }

    /// Overrides from an environment-like lookup. A set variable is used even
    /// when it is not valid UTF-8, converted lossily.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        let read = |key: &str| lookup(key).map(|v| v.to_string_lossy().into_owned());
        Self::new(read(USERNAME_ENV), read(PASSWORD_ENV))
    }

    /// Fill unset fields from `other`.
    pub fn or(self, other: CredentialResolver) -> Self {
        Self {
            username_override: self.username_override.or(other.username_override),
            password_override: self.password_override.or(other.password_override),
        }
    }

    // The same pair is used for every destination today; the address is part
    // of the contract so per-host resolution can slot in.
    pub fn resolve(&self, _registry: &RegistryAddress) -> Credentials {
        let username = self
            .username_override
            .clone()
            .unwrap_or_else(|| DEFAULT_REGISTRY_USERNAME.to_string());
        let password = self
            .password_override
            .clone()
            .unwrap_or_else(|| DEFAULT_REGISTRY_PASSWORD.to_string());
        Credentials { username, password }
    }
}
