use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::AtjobError;

/// Namespace used when a key is given as a bare name.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Identity of a stored object: unique per kind.
///
/// Format: `{namespace}/{name}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse `namespace/name`, or a bare `name` in the default namespace.
    pub fn parse(s: &str) -> crate::error::Result<Self> {
        let (namespace, name) = match s.split_once('/') {
            Some((ns, name)) => (ns, name),
            None => (DEFAULT_NAMESPACE, s),
        };
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return Err(AtjobError::InvalidKey(s.to_string()));
        }
        Ok(Self::new(namespace, name))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Back-link from a dependent object to the object that owns it.
///
/// The garbage collector deletes a dependent once its controller owner
/// (matched by key *and* uid) is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub uid: String,
    /// Exactly one owner reference per object may be the controller.
    #[serde(default)]
    pub controller: bool,
}

impl OwnerReference {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

/// Metadata common to every stored object.
///
/// `uid` and `resource_version` are owned by the store: callers leave them
/// empty / zero on create and must echo back the last-read version on update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    /// The owner reference flagged as controller, if any.
    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }
}

/// A kind of object that can live in an object store.
pub trait Resource: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Stable kind name, used as a discriminator by persistent stores.
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
    fn parse_namespaced_key() {
        let key = ObjectKey::parse("batch/nightly").expect("parse failed");
        assert_eq!(key, ObjectKey::new("batch", "nightly"));
        assert_eq!(key.to_string(), "batch/nightly");
    }

    #[test]
    fn bare_name_uses_default_namespace() {
        let key = ObjectKey::parse("nightly").expect("parse failed");
        assert_eq!(key.namespace, DEFAULT_NAMESPACE);
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        assert!(ObjectKey::parse("").is_err());
        assert!(ObjectKey::parse("/name").is_err());
        assert!(ObjectKey::parse("ns/").is_err());
        assert!(ObjectKey::parse("a/b/c").is_err());
    }
}
