/**
 * Merged resource cache
 *
 * Presents the watch sources of one resource type, one per tracked namespace,
 * as a single queryable cache. Sources are created and torn down as
 * namespaces come and go.
 */
use super::errors::not_found_error;
use super::namespace_set::{NAMESPACE_ALL, NamespaceSetHandler};
use super::registry::ResourceId;
use super::store::{LabelSelector, ObjectKey};
use super::watch_source::{SourceFactory, WatchSource};
use crate::error::Result;
use kube::Resource;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Lifecycle of a tracked watch source. `Stopped` is terminal: re-adding a
/// namespace creates a fresh source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Created,
    Running,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub resource: ResourceId,
    pub namespaced: bool,
    pub tracked_namespaces: usize,
    pub synced_sources: usize,
    pub objects: usize,
}

struct RunContext {
    stop: CancellationToken,
    runtime: Handle,
}

struct TrackedSource<K> {
    source: Arc<dyn WatchSource<K>>,
    token: Option<CancellationToken>,
}

impl<K: 'static> TrackedSource<K> {
    fn new(source: Arc<dyn WatchSource<K>>) -> Self {
        Self {
            source,
            token: None,
        }
    }

    fn state(&self) -> SourceState {
        match &self.token {
            None => SourceState::Created,
            Some(token) if token.is_cancelled() => SourceState::Stopped,
            Some(_) => SourceState::Running,
        }
    }

    fn start(&mut self, run: &RunContext) {
        let token = run.stop.child_token();
        let source = self.source.clone();
        let task_token = token.clone();
        run.runtime.spawn(async move {
            source.run(task_token).await;
        });
        self.token = Some(token);
    }
}

struct CacheState<K> {
    sources: BTreeMap<String, TrackedSource<K>>,
    run: Option<RunContext>,
}

/// One logical cache over every tracked namespace of a resource type.
///
/// Reads hold the source map's read lock for their whole duration and
/// namespace removal holds its write lock, so a query never observes a
/// namespace that is half purged.
pub struct MergedResourceCache<K> {
    resource: ResourceId,
    namespaced: bool,
    resync_period: Duration,
    factory: SourceFactory<K>,
    state: RwLock<CacheState<K>>,
}

impl<K> fmt::Debug for MergedResourceCache<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("MergedResourceCache")
            .field("resource", &self.resource)
            .field("namespaced", &self.namespaced)
            .field("namespaces", &state.sources.keys().collect::<Vec<_>>())
            .field("started", &state.run.is_some())
            .finish_non_exhaustive()
    }
}

impl<K> MergedResourceCache<K>
where
    K: Resource + Send + Sync + 'static,
{
    /// A cluster-scoped cache (`namespaced == false`) gets its single
    /// all-namespaces source here and ignores namespace changes afterwards.
    #[must_use]
    pub fn new(
        resource: ResourceId,
        namespaced: bool,
        resync_period: Duration,
        factory: SourceFactory<K>,
    ) -> Self {
        let mut sources = BTreeMap::new();
        if !namespaced {
            sources.insert(
                NAMESPACE_ALL.to_string(),
                TrackedSource::new(factory(NAMESPACE_ALL)),
            );
        }

        Self {
            resource,
            namespaced,
            resync_period,
            factory,
            state: RwLock::new(CacheState { sources, run: None }),
        }
    }

    #[must_use]
    pub const fn resource(&self) -> &ResourceId {
        &self.resource
    }

    #[must_use]
    pub const fn is_namespaced(&self) -> bool {
        self.namespaced
    }

    #[must_use]
    pub const fn resync_period(&self) -> Duration {
        self.resync_period
    }

    /// Start tracking `namespace`. The new source starts right away when the
    /// cache is already running, otherwise on the next `non_blocking_run`.
    pub fn add_namespace(&self, namespace: &str) {
        if !self.namespaced {
            return;
        }

        let mut state = self.state.write();
        if state.sources.contains_key(namespace) {
            return;
        }

        let mut tracked = TrackedSource::new((self.factory)(namespace));
        if let Some(run) = state.run.as_ref().filter(|run| !run.stop.is_cancelled()) {
            tracked.start(run);
        }
        state.sources.insert(namespace.to_string(), tracked);
        drop(state);

        info!("➕ {} tracking namespace {:?}", self.resource, namespace);
    }

    /// Stop tracking `namespace`: cancel its source and drop its objects
    pub fn remove_namespace(&self, namespace: &str) {
        if !self.namespaced {
            return;
        }

        let mut state = self.state.write();
        let Some(tracked) = state.sources.remove(namespace) else {
            return;
        };
        if let Some(token) = &tracked.token {
            token.cancel();
        }
        tracked.source.index().clear();
        drop(state);

        info!("➖ {} stopped tracking namespace {:?}", self.resource, namespace);
    }

    /// Spawn the loop of every source not started yet and return immediately.
    /// Sources stop when `stop` is cancelled. Running or stopped sources are
    /// never restarted, and nothing starts when `stop` is already cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error when called outside a tokio runtime
    pub fn non_blocking_run(&self, stop: &CancellationToken) -> Result<()> {
        let run = RunContext {
            stop: stop.clone(),
            runtime: Handle::try_current()?,
        };

        let mut state = self.state.write();
        let mut started = 0;
        for tracked in state.sources.values_mut() {
            if tracked.token.is_none() && !run.stop.is_cancelled() {
                tracked.start(&run);
                started += 1;
            }
        }
        state.run = Some(run);
        drop(state);

        if started > 0 {
            debug!("🚀 {} started {} watch sources", self.resource, started);
        }
        Ok(())
    }

    /// True when every tracked source has synced; true when none are tracked
    #[must_use]
    pub fn has_synced(&self) -> bool {
        self.state
            .read()
            .sources
            .values()
            .all(|tracked| tracked.source.has_synced())
    }

    /// Every cached object matching `selector`, across all tracked namespaces
    #[must_use]
    pub fn list(&self, selector: &LabelSelector) -> Vec<Arc<K>> {
        self.state
            .read()
            .sources
            .values()
            .flat_map(|tracked| tracked.source.index().list(selector))
            .collect()
    }

    /// Look up one object; use `""` as namespace for cluster-scoped objects
    ///
    /// # Errors
    ///
    /// Returns a `NotFound` API error when no tracked source holds the object
    pub fn get(&self, namespace: &str, name: &str) -> Result<Arc<K>> {
        self.get_by_key(&ObjectKey::namespaced(namespace, name))
    }

    /// # Errors
    ///
    /// Returns a `NotFound` API error when no tracked source holds the object
    pub fn get_by_key(&self, key: &ObjectKey) -> Result<Arc<K>> {
        self.state
            .read()
            .sources
            .values()
            .find_map(|tracked| tracked.source.index().get(key))
            .ok_or_else(|| not_found_error(&self.resource.resource, &key.name))
    }

    #[must_use]
    pub const fn by_namespace<'a>(&'a self, namespace: &'a str) -> NamespaceLister<'a, K> {
        NamespaceLister {
            cache: self,
            namespace,
        }
    }

    /// Tracked namespaces, sorted
    #[must_use]
    pub fn namespaces(&self) -> Vec<String> {
        self.state.read().sources.keys().cloned().collect()
    }

    #[must_use]
    pub fn source_states(&self) -> BTreeMap<String, SourceState> {
        self.state
            .read()
            .sources
            .iter()
            .map(|(namespace, tracked)| (namespace.clone(), tracked.state()))
            .collect()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state.read();
        CacheStats {
            resource: self.resource.clone(),
            namespaced: self.namespaced,
            tracked_namespaces: state.sources.len(),
            synced_sources: state
                .sources
                .values()
                .filter(|tracked| tracked.source.has_synced())
                .count(),
            objects: state
                .sources
                .values()
                .map(|tracked| tracked.source.index().len())
                .sum(),
        }
    }
}

impl<K> NamespaceSetHandler for MergedResourceCache<K>
where
    K: Resource + Send + Sync + 'static,
{
    fn on_add(&self, namespace: &str) {
        self.add_namespace(namespace);
    }

    fn on_remove(&self, namespace: &str) {
        self.remove_namespace(namespace);
    }
}

/// Queries restricted to one namespace of a merged cache
pub struct NamespaceLister<'a, K> {
    cache: &'a MergedResourceCache<K>,
    namespace: &'a str,
}

impl<K> NamespaceLister<'_, K>
where
    K: Resource + Send + Sync + 'static,
{
    #[must_use]
    pub fn list(&self, selector: &LabelSelector) -> Vec<Arc<K>> {
        self.cache
            .state
            .read()
            .sources
            .values()
            .flat_map(|tracked| tracked.source.index().list_namespace(self.namespace, selector))
            .collect()
    }

    /// # Errors
    ///
    /// Returns a `NotFound` API error when the object is not cached
    pub fn get(&self, name: &str) -> Result<Arc<K>> {
        self.cache.get(self.namespace, name)
    }
}
