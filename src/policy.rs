//! Signature-verification policy consulted before every copy.
//!
//! Understands the subset of `containers-policy.json` that does not need
//! signature material: `insecureAcceptAnything` and `reject`, a `default`
//! list, and per-scope lists under `transports.docker`.

use crate::config::SystemContext;
use crate::error::{Result, SyncError};
use crate::registry::TaggedImageRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const DOCKER_TRANSPORT: &str = "docker";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PolicyRequirement {
    #[serde(rename = "insecureAcceptAnything")]
    InsecureAcceptAnything,
    #[serde(rename = "reject")]
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub default: Vec<PolicyRequirement>,
    #[serde(default)]
    pub transports: HashMap<String, HashMap<String, Vec<PolicyRequirement>>>,
}

impl Policy {
    /// Accept all content.
    pub fn accept_anything() -> Self {
        Self {
            default: vec![PolicyRequirement::InsecureAcceptAnything],
            transports: HashMap::new(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            SyncError::PolicyInit(format!("failed to read {}: {}", path.display(), e))
        })?;
        let policy: Policy = serde_json::from_str(&data).map_err(|e| {
            SyncError::PolicyInit(format!("failed to parse {}: {}", path.display(), e))
        })?;
        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> Result<()> {
        if self.default.is_empty() {
            return Err(SyncError::PolicyInit(
                "default policy is empty".to_string(),
            ));
        }
        for (transport, scopes) in &self.transports {
            for (scope, requirements) in scopes {
                if requirements.is_empty() {
                    return Err(SyncError::PolicyInit(format!(
                        "policy for {} scope '{}' is empty",
                        transport, scope
                    )));
                }
            }
        }
        Ok(())
    }
}

/// The policy `sys` asks for: its policy file when set, otherwise accept-anything.
pub fn default_policy(sys: &SystemContext) -> Result<Policy> {
    match &sys.signature_policy_path {
        Some(path) => Policy::from_file(path),
        None => Ok(Policy::accept_anything()),
    }
}

/// Build the shared policy context for one sync invocation.
pub fn default_policy_context(sys: &SystemContext) -> Result<PolicyContext> {
    PolicyContext::new(default_policy(sys)?)
}

/// A validated policy ready to evaluate images. Release with [`PolicyContext::destroy`].
#[derive(Debug)]
pub struct PolicyContext {
    policy: Policy,
}

impl PolicyContext {
    pub fn new(policy: Policy) -> Result<Self> {
        policy.validate()?;
        Ok(Self { policy })
    }

    /// Requirements for `image`, most specific docker scope first.
    fn requirements_for(&self, image: &TaggedImageRef) -> &[PolicyRequirement] {
        if let Some(scopes) = self.policy.transports.get(DOCKER_TRANSPORT) {
            let repo = image.repository();
            let mut candidates = vec![image.to_string(), repo.name()];
            let mut prefix = repo.name();
            while let Some(idx) = prefix.rfind('/') {
                prefix.truncate(idx);
                candidates.push(prefix.clone());
            }
            candidates.push(String::new());

            for scope in candidates {
                if let Some(requirements) = scopes.get(&scope) {
                    return requirements;
                }
            }
        }
        &self.policy.default
    }

    pub fn is_image_allowed(&self, image: &TaggedImageRef) -> bool {
        self.requirements_for(image)
            .iter()
            .all(|r| *r == PolicyRequirement::InsecureAcceptAnything)
    }

    pub fn check(&self, image: &TaggedImageRef) -> Result<()> {
        if self.is_image_allowed(image) {
            Ok(())
        } else {
            Err(SyncError::PolicyDenied(image.to_string()))
        }
    }

    pub fn destroy(self) {
        tracing::debug!("policy context released");
    }
}
