use super::namespace_set::NAMESPACE_ALL;
use kube::{Resource, ResourceExt};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Label equality selector; every pair must match, empty selects everything
pub type LabelSelector = BTreeMap<String, String>;

/// Cache key of an object: `namespace/name`, or just `name` when cluster-scoped
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    #[must_use]
    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()).filter(|ns| ns != NAMESPACE_ALL),
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn cluster(name: &str) -> Self {
        Self {
            namespace: None,
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn of<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace().filter(|ns| ns != NAMESPACE_ALL),
            name: obj.name_any(),
        }
    }

    /// Namespace of the object, `""` for cluster-scoped objects
    #[must_use]
    pub fn namespace_or_all(&self) -> &str {
        self.namespace.as_deref().unwrap_or(NAMESPACE_ALL)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[must_use]
pub fn matches_labels<K: Resource>(obj: &K, selector: &LabelSelector) -> bool {
    let labels = obj.labels();
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

/// Thread-safe object index owned by one watch source.
///
/// Cloning shares the underlying map.
pub struct Store<K> {
    objects: Arc<RwLock<HashMap<ObjectKey, Arc<K>>>>,
}

impl<K> Clone for Store<K> {
    fn clone(&self) -> Self {
        Self {
            objects: self.objects.clone(),
        }
    }
}

impl<K> Default for Store<K> {
    fn default() -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<K> fmt::Debug for Store<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("objects", &self.objects.read().len())
            .finish()
    }
}

impl<K: Resource> Store<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an object
    pub fn apply(&self, obj: K) -> ObjectKey {
        let key = ObjectKey::of(&obj);
        self.objects.write().insert(key.clone(), Arc::new(obj));
        key
    }

    pub fn delete(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.objects.write().remove(key)
    }

    /// Swap the whole content for a fresh listing
    pub fn replace(&self, objects: impl IntoIterator<Item = K>) {
        let fresh: HashMap<_, _> = objects
            .into_iter()
            .map(|obj| (ObjectKey::of(&obj), Arc::new(obj)))
            .collect();
        *self.objects.write() = fresh;
    }

    #[must_use]
    pub fn get(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.objects.read().get(key).cloned()
    }

    #[must_use]
    pub fn list(&self, selector: &LabelSelector) -> Vec<Arc<K>> {
        self.objects
            .read()
            .values()
            .filter(|obj| matches_labels(obj.as_ref(), selector))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn list_namespace(&self, namespace: &str, selector: &LabelSelector) -> Vec<Arc<K>> {
        self.objects
            .read()
            .iter()
            .filter(|(key, obj)| {
                key.namespace_or_all() == namespace && matches_labels(obj.as_ref(), selector)
            })
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<ObjectKey> {
        let mut keys: Vec<_> = self.objects.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    pub fn clear(&self) {
        self.objects.write().clear();
    }
}
