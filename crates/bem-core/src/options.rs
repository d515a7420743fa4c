//! Model configuration.

use bem_error::{BemError, Result};
use bem_types::{DEFAULT_USER_NAMESPACE, PropertyKind, SNAPSHOT_SEPARATOR};
use serde::{Deserialize, Serialize};

/// Options controlling how a [`crate::DatasetModel`] is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelOptions {
    /// Prefix of every custom user property (`<namespace>:bootfs`, ...).
    pub user_namespace: String,
    /// Silently skip volumes and bookmarks. When false, meeting one fails
    /// the scan.
    pub skip_ineligible: bool,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            user_namespace: DEFAULT_USER_NAMESPACE.to_owned(),
            skip_ineligible: true,
        }
    }
}

impl ModelOptions {
    pub fn validate(&self) -> Result<()> {
        if self.user_namespace.is_empty() {
            return Err(BemError::Config("user_namespace must not be empty".into()));
        }
        if let Some(bad) = self
            .user_namespace
            .chars()
            .find(|c| matches!(*c, ':' | '/') || *c == SNAPSHOT_SEPARATOR)
        {
            return Err(BemError::Config(format!(
                "user_namespace {:?} must not contain {bad:?}",
                self.user_namespace
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn user_property_names(&self) -> UserPropertyNames {
        UserPropertyNames::new(&self.user_namespace)
    }
}

/// Fully-qualified user property names for one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPropertyNames {
    namespace: String,
}

impl UserPropertyNames {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// User property holding `kind`.
    ///
    /// For the mount properties this is the frozen copy stored on snapshots;
    /// filesystems keep them as native properties.
    #[must_use]
    pub fn for_kind(&self, kind: PropertyKind) -> String {
        format!("{}:{}", self.namespace, kind.name())
    }
}

impl Default for UserPropertyNames {
    fn default() -> Self {
        ModelOptions::default().user_property_names()
    }
}
