//! Object metadata shared by every resource kind.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of an object: the workspace it lives in plus its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub path: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.path, self.name)
    }
}

/// Metadata carried by every object in the resource store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    /// Logical workspace path, e.g. `root:orgs:acme:team-a`.
    pub workspace_path: String,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub generation: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn new(workspace_path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workspace_path: workspace_path.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.workspace_path.clone(), self.name.clone())
    }

    /// Whether deletion was requested and the object only waits on finalizers.
    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Returns `true` if the finalizer was not present yet.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Returns `true` if the finalizer was present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        before != self.finalizers.len()
    }
}

/// A typed object kind stored in the resource store.
pub trait Resource: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Kind name, unique across the scheme.
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalizer_bookkeeping() {
        let mut meta = ObjectMeta::new("root:orgs", "acme");
        assert!(meta.add_finalizer("fgasync.io/store"));
        assert!(!meta.add_finalizer("fgasync.io/store"));
        assert!(meta.has_finalizer("fgasync.io/store"));
        assert!(meta.remove_finalizer("fgasync.io/store"));
        assert!(!meta.remove_finalizer("fgasync.io/store"));
        assert!(meta.finalizers.is_empty());
    }

    #[test]
    fn test_key_display() {
        let meta = ObjectMeta::new("root:orgs:acme", "store");
        assert_eq!(meta.key().to_string(), "root:orgs:acme/store");
    }
}
