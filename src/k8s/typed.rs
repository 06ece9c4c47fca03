/**
 * Typed views over merged caches
 *
 * Thin adapters mapping one untyped merged cache onto a concrete
 * `k8s_openapi` resource type. All state stays in the registry's cache; an
 * adapter only converts on the way out.
 */
use super::cache::convert::from_dynamic;
use super::cache::store::LabelSelector;
use super::cache::{CacheRegistry, MergedResourceCache, ResourceId};
use crate::error::Result;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{LimitRange, Service};
use kube::Resource;
use kube::api::DynamicObject;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;

pub struct TypedCache<K> {
    cache: Arc<MergedResourceCache<DynamicObject>>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for TypedCache<K> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K> TypedCache<K>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    #[must_use]
    pub const fn new(cache: Arc<MergedResourceCache<DynamicObject>>) -> Self {
        Self {
            cache,
            _kind: PhantomData,
        }
    }

    /// The untyped cache behind this view
    #[must_use]
    pub const fn cache(&self) -> &Arc<MergedResourceCache<DynamicObject>> {
        &self.cache
    }

    #[must_use]
    pub fn has_synced(&self) -> bool {
        self.cache.has_synced()
    }

    /// # Errors
    ///
    /// Returns an error when any cached object fails to convert
    pub fn list(&self, selector: &LabelSelector) -> Result<Vec<K>> {
        convert_all(self.cache.list(selector))
    }

    /// # Errors
    ///
    /// Returns `NotFound` for a missing object or a conversion error
    pub fn get(&self, namespace: &str, name: &str) -> Result<K> {
        let obj = self.cache.get(namespace, name)?;
        from_dynamic(&obj)
    }

    #[must_use]
    pub const fn by_namespace<'a>(&'a self, namespace: &'a str) -> TypedNamespaceLister<'a, K> {
        TypedNamespaceLister {
            typed: self,
            namespace,
        }
    }
}

pub struct TypedNamespaceLister<'a, K> {
    typed: &'a TypedCache<K>,
    namespace: &'a str,
}

impl<K> TypedNamespaceLister<'_, K>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    /// # Errors
    ///
    /// Returns an error when any cached object fails to convert
    pub fn list(&self, selector: &LabelSelector) -> Result<Vec<K>> {
        convert_all(self.typed.cache.by_namespace(self.namespace).list(selector))
    }

    /// # Errors
    ///
    /// Returns `NotFound` for a missing object or a conversion error
    pub fn get(&self, name: &str) -> Result<K> {
        self.typed.get(self.namespace, name)
    }
}

fn convert_all<K>(objects: Vec<Arc<DynamicObject>>) -> Result<Vec<K>>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    objects.iter().map(|obj| from_dynamic(obj)).collect()
}

impl CacheRegistry {
    /// Typed view of the cache for `K`, creating the cache on first use
    pub fn typed<K>(&self, namespaced: bool) -> TypedCache<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        TypedCache::new(self.for_resource(&ResourceId::of::<K>(), namespaced))
    }

    pub fn services(&self) -> TypedCache<Service> {
        self.typed(true)
    }

    pub fn limit_ranges(&self) -> TypedCache<LimitRange> {
        self.typed(true)
    }

    pub fn horizontal_pod_autoscalers(&self) -> TypedCache<HorizontalPodAutoscaler> {
        self.typed(true)
    }
}
