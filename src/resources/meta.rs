use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::fmt;

/// Metadata for a new object. An empty namespace is left unset.
pub fn object_meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: (!namespace.is_empty()).then(|| namespace.to_string()),
        ..ObjectMeta::default()
    }
}

/// Finalizer, label and ownership helpers over the optional metadata fields.
pub trait ObjectMetaExt {
    fn with_label(self, key: &str, value: &str) -> Self;
    fn label(&self, key: &str) -> Option<&str>;
    fn labels_mut(&mut self) -> &mut BTreeMap<String, String>;
    fn has_finalizer(&self, finalizer: &str) -> bool;
    /// Returns `true` when the finalizer was newly added.
    fn add_finalizer(&mut self, finalizer: &str) -> bool;
    /// Returns `true` when the finalizer was present.
    fn remove_finalizer(&mut self, finalizer: &str) -> bool;
    fn is_deleting(&self) -> bool;
    fn owners(&self) -> &[OwnerReference];
    /// The owner reference flagged as the managing controller, if any.
    fn controller_owner(&self) -> Option<&OwnerReference>;
}

impl ObjectMetaExt for ObjectMeta {
    fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels_mut().insert(key.to_string(), value.to_string());
        self
    }

    fn label(&self, key: &str) -> Option<&str> {
        self.labels.as_ref()?.get(key).map(String::as_str)
    }

    fn labels_mut(&mut self) -> &mut BTreeMap<String, String> {
        self.labels.get_or_insert_with(BTreeMap::new)
    }

    fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers
            .as_ref()
            .is_some_and(|all| all.iter().any(|f| f == finalizer))
    }

    fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers
            .get_or_insert_with(Vec::new)
            .push(finalizer.to_string());
        true
    }

    fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let Some(all) = self.finalizers.as_mut() else {
            return false;
        };
        let before = all.len();
        all.retain(|f| f != finalizer);
        let removed = before != all.len();
        if all.is_empty() {
            self.finalizers = None;
        }
        removed
    }

    fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    fn owners(&self) -> &[OwnerReference] {
        self.owner_references.as_deref().unwrap_or_default()
    }

    fn controller_owner(&self) -> Option<&OwnerReference> {
        self.owners()
            .iter()
            .find(|owner| owner.controller.unwrap_or(false))
    }
}

/// Identity of a stored object: kind plus namespaced name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn of<K: Object>(obj: &K) -> Self {
        Self::new(K::KIND, obj.namespace(), obj.name())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// A kind that can live in the resource store: the built-in workload types
/// and the `agentplane.dev` kinds alike.
pub trait Object:
    k8s_openapi::Resource
    + k8s_openapi::Metadata<Ty = ObjectMeta>
    + Serialize
    + DeserializeOwned
    + Clone
    + Send
    + Sync
    + 'static
{
    fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    /// Owner reference marking `self` as the managing controller of a dependent.
    ///
    /// Objects that have not been persisted yet carry no uid; the empty uid is
    /// never matched by cascade deletion.
    fn controller_owner_ref(&self) -> OwnerReference {
        OwnerReference {
            api_version: Self::API_VERSION.to_string(),
            kind: Self::KIND.to_string(),
            name: self.name().to_string(),
            uid: self.metadata().uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

impl<K> Object for K where
    K: k8s_openapi::Resource
        + k8s_openapi::Metadata<Ty = ObjectMeta>
        + Serialize
        + DeserializeOwned
        + Clone
        + Send
        + Sync
        + 'static
{
}

/// Declares a namespaced `agentplane.dev/v1alpha1` kind for a struct with a
/// `metadata: ObjectMeta` field.
macro_rules! custom_resource {
    ($ty:ty, $kind:literal, $plural:literal) => {
        impl k8s_openapi::Resource for $ty {
            const API_VERSION: &'static str = $crate::resources::API_VERSION;
            const GROUP: &'static str = $crate::resources::GROUP;
            const KIND: &'static str = $kind;
            const VERSION: &'static str = $crate::resources::VERSION;
            const URL_PATH_SEGMENT: &'static str = $plural;
            type Scope = k8s_openapi::NamespaceResourceScope;
        }

        impl k8s_openapi::Metadata for $ty {
            type Ty = k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

            fn metadata(&self) -> &Self::Ty {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut Self::Ty {
                &mut self.metadata
            }
        }
    };
}

pub(crate) use custom_resource;

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;

    #[test]
    fn finalizer_add_remove_is_idempotent() {
        let mut meta = object_meta("ns", "a");
        assert!(meta.add_finalizer("x/cleanup"));
        assert!(!meta.add_finalizer("x/cleanup"));
        assert_eq!(meta.finalizers.as_ref().map(Vec::len), Some(1));
        assert!(meta.remove_finalizer("x/cleanup"));
        assert!(!meta.remove_finalizer("x/cleanup"));
        assert!(meta.finalizers.is_none());
    }

    #[test]
    fn empty_namespace_is_left_unset() {
        let meta = object_meta("", "a").with_label("app", "demo");
        assert!(meta.namespace.is_none());
        assert_eq!(meta.label("app"), Some("demo"));
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("ownerReferences").is_none());
        assert!(json.get("resourceVersion").is_none());
    }

    #[test]
    fn controller_owner_picks_flagged_reference() {
        let mut meta = object_meta("ns", "child");
        meta.owner_references = Some(vec![
            OwnerReference {
                api_version: "v1".into(),
                kind: "Other".into(),
                name: "o".into(),
                uid: "1".into(),
                ..OwnerReference::default()
            },
            OwnerReference {
                api_version: "v1".into(),
                kind: "Boss".into(),
                name: "b".into(),
                uid: "2".into(),
                controller: Some(true),
                block_owner_deletion: Some(true),
            },
        ]);
        assert_eq!(meta.controller_owner().unwrap().kind, "Boss");
    }

    #[test]
    fn built_in_kinds_report_their_identity() {
        let cm = ConfigMap {
            metadata: object_meta("ns", "settings"),
            ..ConfigMap::default()
        };
        assert_eq!(ObjectKey::of(&cm).to_string(), "ConfigMap ns/settings");
        let owner = cm.controller_owner_ref();
        assert_eq!(owner.api_version, "v1");
        assert!(owner.uid.is_empty());
    }
}
