/**
 * Watch sources
 *
 * A watch source is one namespace's live replica of one resource type: a
 * list-then-watch loop feeding its own index. Merged caches only see the
 * `WatchSource` trait; `KubeWatchSource` is the implementation backed by the
 * Kubernetes API.
 */
use super::config::CacheConfig;
use super::namespace_set::NAMESPACE_ALL;
use super::registry::ResourceId;
use super::store::{ObjectKey, Store};
use crate::error::Result;
use async_trait::async_trait;
use kube::api::{Api, DynamicObject, ListParams, WatchEvent, WatchParams};
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// One namespace-scoped list-watch loop with its own index and synced flag
#[async_trait]
pub trait WatchSource<K>: Send + Sync {
    /// Namespace this source watches, `""` for all namespaces
    fn namespace(&self) -> &str;

    fn index(&self) -> &Store<K>;

    /// True once the initial listing has landed in the index
    fn has_synced(&self) -> bool;

    /// Run the loop until `stop` is cancelled
    async fn run(&self, stop: CancellationToken);
}

/// Builds the watch source for a namespace
pub type SourceFactory<K> = Arc<dyn Fn(&str) -> Arc<dyn WatchSource<K>> + Send + Sync>;

/// Creates untyped watch sources for a registry
pub trait SourceProvider: Send + Sync {
    fn source_for(
        &self,
        resource: &ResourceId,
        namespace: &str,
        config: &CacheConfig,
    ) -> Arc<dyn WatchSource<DynamicObject>>;
}

/// Provider of [`KubeWatchSource`]s sharing one client
#[derive(Clone)]
pub struct KubeSourceProvider {
    client: Client,
}

impl KubeSourceProvider {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }
}

impl SourceProvider for KubeSourceProvider {
    fn source_for(
        &self,
        resource: &ResourceId,
        namespace: &str,
        config: &CacheConfig,
    ) -> Arc<dyn WatchSource<DynamicObject>> {
        Arc::new(KubeWatchSource::new(
            self.client.clone(),
            resource,
            namespace,
            config.clone(),
        ))
    }
}

/// List-then-watch loop over the Kubernetes API for one resource in one namespace.
///
/// A full list replaces the index and marks the source synced; watch events
/// then keep it current. An expired resource version (`410 Gone`) or the
/// resync interval triggers a relist. Any other failure restarts the loop with
/// capped exponential backoff. The loop only ends when its token is cancelled.
pub struct KubeWatchSource {
    api: Api<DynamicObject>,
    resource: ResourceId,
    namespace: String,
    config: CacheConfig,
    store: Store<DynamicObject>,
    synced: AtomicBool,
}

impl KubeWatchSource {
    #[must_use]
    pub fn new(client: Client, resource: &ResourceId, namespace: &str, config: CacheConfig) -> Self {
        let api_resource = resource.api_resource();
        let api = if namespace == NAMESPACE_ALL {
            Api::all_with(client, &api_resource)
        } else {
            Api::namespaced_with(client, namespace, &api_resource)
        };

        Self {
            api,
            resource: resource.clone(),
            namespace: namespace.to_string(),
            config,
            store: Store::new(),
            synced: AtomicBool::new(false),
        }
    }

    fn label(&self) -> String {
        if self.namespace == NAMESPACE_ALL {
            format!("{} (all namespaces)", self.resource)
        } else {
            format!("{} in {}", self.resource, self.namespace)
        }
    }

    /// Seconds the next watch call may stay open before the resync deadline
    fn watch_timeout(&self, deadline: Option<Instant>) -> u32 {
        let max = self.config.watch_timeout_secs;
        deadline.map_or(max, |deadline| {
            let remaining = deadline.saturating_duration_since(Instant::now()).as_secs();
            u32::try_from(remaining).unwrap_or(max).clamp(1, max)
        })
    }

    /// One list followed by watches until a relist is needed.
    /// Returns `Ok` when the caller should relist straight away.
    async fn list_and_watch(&self) -> Result<()> {
        use futures::{TryStreamExt, pin_mut};

        let list = self.api.list(&ListParams::default()).await?;
        let mut resource_version = list.metadata.resource_version.clone().unwrap_or_default();
        let count = list.items.len();
        self.store.replace(list.items);

        if self.synced.swap(true, Ordering::SeqCst) {
            debug!("🔄 Relisted {}: {} objects", self.label(), count);
        } else {
            info!("✅ {} synced with {} objects", self.label(), count);
        }

        let resync = self.config.resync_period;
        let deadline = (!resync.is_zero()).then(|| Instant::now() + resync);

        loop {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                debug!("⏰ Resync period elapsed for {}", self.label());
                return Ok(());
            }

            let wp = WatchParams::default().timeout(self.watch_timeout(deadline));
            let stream = self.api.watch(&wp, &resource_version).await?;
            pin_mut!(stream);

            while let Some(event) = stream.try_next().await? {
                match event {
                    WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                        if let Some(rv) = obj.resource_version() {
                            resource_version = rv;
                        }
                        let key = self.store.apply(obj);
                        debug!("📝 {} applied {}", self.resource, key);
                    }
                    WatchEvent::Deleted(obj) => {
                        if let Some(rv) = obj.resource_version() {
                            resource_version = rv;
                        }
                        let key = ObjectKey::of(&obj);
                        self.store.delete(&key);
                        debug!("🗑️  {} deleted {}", self.resource, key);
                    }
                    WatchEvent::Bookmark(bookmark) => {
                        resource_version = bookmark.metadata.resource_version;
                    }
                    WatchEvent::Error(e) if e.code == 410 => {
                        info!("♻️  Resource version expired for {}, relisting", self.label());
                        return Ok(());
                    }
                    WatchEvent::Error(e) => return Err(kube::Error::Api(e).into()),
                }
            }
        }
    }
}

#[async_trait]
impl WatchSource<DynamicObject> for KubeWatchSource {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn index(&self) -> &Store<DynamicObject> {
        &self.store
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    async fn run(&self, stop: CancellationToken) {
        info!("🔍 Starting watch source for {}", self.label());
        let (initial_backoff, max_backoff) = self.config.retry_backoff();
        let mut backoff: Duration = initial_backoff;

        loop {
            let outcome = tokio::select! {
                () = stop.cancelled() => break,
                outcome = self.list_and_watch() => outcome,
            };

            match outcome {
                Ok(()) => backoff = initial_backoff,
                Err(e) => {
                    error!(
                        "❌ Watch source for {} failed: {}, restarting in {}s",
                        self.label(),
                        e,
                        backoff.as_secs_f64()
                    );
                    tokio::select! {
                        () = stop.cancelled() => break,
                        () = sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(max_backoff);
                }
            }
        }

        info!("🛑 Watch source for {} stopped", self.label());
    }
}
