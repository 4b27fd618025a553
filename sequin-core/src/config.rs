use serde::{Deserialize, Serialize};

use crate::error::RecipeError;
use crate::types::{validate_path, Acl};

pub const DEFAULT_LOCK_PREFIX: &str = "lock-";
pub const DEFAULT_QUEUE_PREFIX: &str = "qn-";

/// Where a recipe keeps its nodes and how it creates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeConfig {
    /// Directory node shared by every participant of one lock or queue
    pub dir: String,
    /// Name prefix for the sequential children created under `dir`
    pub prefix: String,
    /// ACL applied to every node the recipe creates
    #[serde(default = "Acl::open_unsafe")]
    pub acl: Vec<Acl>,
}

impl RecipeConfig {
    pub fn new(dir: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            acl: Acl::open_unsafe(),
        }
    }

    pub fn lock(dir: impl Into<String>) -> Self {
        Self::new(dir, DEFAULT_LOCK_PREFIX)
    }

    pub fn queue(dir: impl Into<String>) -> Self {
        Self::new(dir, DEFAULT_QUEUE_PREFIX)
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_acl(mut self, acl: Vec<Acl>) -> Self {
        self.acl = acl;
        self
    }

    /// Path handed to sequential creates: `<dir>/<prefix>`
    pub fn node_base(&self) -> String {
        crate::types::join(&self.dir, &self.prefix)
    }

    pub fn validate(&self) -> Result<(), RecipeError> {
        validate_path(&self.dir).map_err(|e| RecipeError::InvalidConfig(e.to_string()))?;
        if self.dir == "/" {
            return Err(RecipeError::InvalidConfig(
                "dir must not be the root node".to_string(),
            ));
        }
        if self.prefix.is_empty() {
            return Err(RecipeError::InvalidConfig("prefix is required".to_string()));
        }
        if self.prefix.contains('/') {
            return Err(RecipeError::InvalidConfig(format!(
                "prefix '{}' must not contain '/'",
                self.prefix
            )));
        }
        if self.acl.is_empty() {
            return Err(RecipeError::InvalidConfig("acl must not be empty".to_string()));
        }
        Ok(())
    }
}
