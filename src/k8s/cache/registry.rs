/**
Resource cache registry

Owns the shared namespace set and one merged cache per resource type. Every
cache it creates follows the namespace set: caches are seeded with the current
namespaces and receive every later change.
*/
use super::config::CacheConfig;
use super::errors::no_namespaces_error;
use super::merged_cache::{CacheStats, MergedResourceCache};
use super::namespace_set::{NAMESPACE_ALL, NamespaceSet};
use super::sets::to_set;
use super::watch_source::{SourceFactory, SourceProvider};
use crate::error::Result;
use kube::Resource;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Identifies a resource type by group, version and plural resource name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl ResourceId {
    pub fn new(group: impl Into<String>, version: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }

    /// Id of a statically typed resource such as `k8s_openapi`'s `Service`
    #[must_use]
    pub fn of<K: Resource<DynamicType = ()>>() -> Self {
        Self {
            group: K::group(&()).into_owned(),
            version: K::version(&()).into_owned(),
            resource: K::plural(&()).into_owned(),
        }
    }

    #[must_use]
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Kind is not needed to list or watch, so it is left empty
    #[must_use]
    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: String::new(),
            plural: self.resource.clone(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}.{}", self.resource, self.version)
        } else {
            write!(f, "{}.{}.{}", self.resource, self.version, self.group)
        }
    }
}

type DynamicCache = Arc<MergedResourceCache<DynamicObject>>;

/// Get-or-create map from resource type to merged cache, plus the namespace
/// set all of those caches follow.
pub struct CacheRegistry {
    provider: Arc<dyn SourceProvider>,
    config: CacheConfig,
    namespaces: NamespaceSet,
    caches: Mutex<HashMap<ResourceId, DynamicCache>>,
}

impl fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("config", &self.config)
            .field("namespaces", &self.namespaces)
            .field("resources", &self.resources())
            .finish_non_exhaustive()
    }
}

impl CacheRegistry {
    /// Build a registry tracking `namespaces`.
    ///
    /// # Errors
    ///
    /// Returns an error when `namespaces` is empty
    pub fn new<I, S>(provider: Arc<dyn SourceProvider>, config: CacheConfig, namespaces: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let initial = to_set(namespaces);
        if initial.is_empty() {
            return Err(no_namespaces_error());
        }

        let set = NamespaceSet::uninitialized();
        set.set_namespaces(initial);
        info!("Cache registry created for namespaces {:?}", set.list());

        Ok(Self {
            provider,
            config,
            namespaces: set,
            caches: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The shared namespace set; subscribe here for namespace add/remove events
    #[must_use]
    pub const fn namespaces(&self) -> &NamespaceSet {
        &self.namespaces
    }

    /// Return the cache for `resource`, creating it on first request.
    ///
    /// A new cache is seeded with the current namespaces and subscribed to
    /// later changes in one step, so a concurrent `set_namespaces` is never
    /// lost. Seeding runs after the cache map is unlocked, which lets a
    /// namespace handler request caches while a change is being delivered.
    /// When the cache already exists `namespaced` is ignored.
    pub fn for_resource(&self, resource: &ResourceId, namespaced: bool) -> DynamicCache {
        let mut caches = self.caches.lock();
        if let Some(cache) = caches.get(resource) {
            if cache.is_namespaced() != namespaced {
                warn!(
                    "⚠️  {} requested as namespaced={} but exists as namespaced={}",
                    resource,
                    namespaced,
                    cache.is_namespaced()
                );
            }
            return cache.clone();
        }

        let cache = Arc::new(MergedResourceCache::new(
            resource.clone(),
            namespaced,
            self.config.resync_period,
            self.source_factory(resource, namespaced),
        ));
        caches.insert(resource.clone(), cache.clone());
        drop(caches);
        self.namespaces.add_handler_with_replay(cache.clone());

        info!("📦 Created cache for {} (namespaced: {})", resource, namespaced);
        cache
    }

    /// Cache for a cluster-scoped resource; namespace changes do not affect it
    pub fn cluster_resource(&self, resource: &ResourceId) -> DynamicCache {
        self.for_resource(resource, false)
    }

    /// Cache for a namespaced resource. Requesting a cluster-scoped resource
    /// this way produces watch errors and an empty cache.
    pub fn namespaced_resource(&self, resource: &ResourceId) -> DynamicCache {
        self.for_resource(resource, true)
    }

    /// Replace the tracked namespaces. Every cache created so far gains and
    /// loses sources accordingly; call `start` afterwards if the registry was
    /// not running yet.
    pub fn set_namespaces<I, S>(&self, namespaces: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.namespaces.set_namespaces(namespaces);
    }

    /// Drop every namespace and mark the namespace set uninitialized
    pub fn reset_namespaces(&self) {
        self.namespaces.reset();
    }

    /// Start every cache created so far without waiting for any of them.
    /// Safe to call repeatedly; running sources are left alone.
    ///
    /// # Errors
    ///
    /// Returns an error when called outside a tokio runtime
    pub fn start(&self, stop: &CancellationToken) -> Result<()> {
        for cache in self.snapshot() {
            cache.non_blocking_run(stop)?;
        }
        Ok(())
    }

    /// Poll until every cache created so far has synced or `stop` fires.
    /// Returns the sync state of each of those caches.
    pub async fn wait_for_cache_sync(&self, stop: &CancellationToken) -> BTreeMap<ResourceId, bool> {
        let caches = self.snapshot();
        let mut ticker = tokio::time::interval(self.config.sync_poll());

        loop {
            if caches.iter().all(|cache| cache.has_synced()) {
                info!("✅ {} caches synced", caches.len());
                break;
            }
            tokio::select! {
                () = stop.cancelled() => {
                    warn!("🛑 Stopped waiting for cache sync");
                    break;
                }
                _ = ticker.tick() => {}
            }
        }

        caches
            .iter()
            .map(|cache| (cache.resource().clone(), cache.has_synced()))
            .collect()
    }

    /// Resource types with a cache, sorted
    #[must_use]
    pub fn resources(&self) -> Vec<ResourceId> {
        let mut resources: Vec<_> = self.caches.lock().keys().cloned().collect();
        resources.sort();
        resources
    }

    #[must_use]
    pub fn stats(&self) -> Vec<CacheStats> {
        let mut stats: Vec<_> = self.snapshot().iter().map(|cache| cache.stats()).collect();
        stats.sort_by(|a, b| a.resource.cmp(&b.resource));
        stats
    }

    fn snapshot(&self) -> Vec<DynamicCache> {
        self.caches.lock().values().cloned().collect()
    }

    fn source_factory(&self, resource: &ResourceId, namespaced: bool) -> SourceFactory<DynamicObject> {
        let provider = self.provider.clone();
        let resource = resource.clone();
        let config = self.config.clone();
        Arc::new(move |namespace: &str| {
            let namespace = if namespaced { namespace } else { NAMESPACE_ALL };
            provider.source_for(&resource, namespace, &config)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::Service;

    #[test]
    fn test_resource_id_of_typed_resources() {
        let services = ResourceId::of::<Service>();
        assert_eq!(services, ResourceId::new("", "v1", "services"));
        assert_eq!(services.api_version(), "v1");
        assert_eq!(services.to_string(), "services.v1");

        let deployments = ResourceId::of::<Deployment>();
        assert_eq!(deployments.api_version(), "apps/v1");
        assert_eq!(deployments.to_string(), "deployments.v1.apps");
        assert_eq!(deployments.api_resource().plural, "deployments");
    }
}
