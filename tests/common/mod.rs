#![allow(dead_code)]
/// In-memory watch sources for exercising merged caches and registries
/// without a cluster.
use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use xns_cache::k8s::cache::{
    CacheConfig, ResourceId, SourceFactory, SourceProvider, Store, WatchSource,
};

pub fn object(namespace: &str, name: &str, labels: &[(&str, &str)]) -> DynamicObject {
    let resource = ApiResource {
        group: String::new(),
        version: "v1".to_string(),
        api_version: "v1".to_string(),
        kind: "ConfigMap".to_string(),
        plural: "configmaps".to_string(),
    };
    let mut obj = DynamicObject::new(name, &resource);
    if !namespace.is_empty() {
        obj = obj.within(namespace);
    }
    obj.metadata.labels = Some(
        labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect::<BTreeMap<_, _>>(),
    );
    obj
}

/// Fills its index with fixed objects when run, then waits for cancellation
pub struct FakeSource {
    namespace: String,
    objects: Vec<DynamicObject>,
    sync_on_run: bool,
    store: Store<DynamicObject>,
    synced: AtomicBool,
    runs: AtomicUsize,
    stopped: AtomicBool,
}

impl FakeSource {
    pub fn new(namespace: &str, objects: Vec<DynamicObject>, sync_on_run: bool) -> Self {
        Self {
            namespace: namespace.to_string(),
            objects,
            sync_on_run,
            store: Store::new(),
            synced: AtomicBool::new(false),
            runs: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl WatchSource<DynamicObject> for FakeSource {
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
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.store.replace(self.objects.clone());
        if self.sync_on_run {
            self.mark_synced();
        }
        stop.cancelled().await;
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Objects each namespace starts with, and which namespaces never sync
#[derive(Default, Clone)]
pub struct Fixture {
    pub objects: HashMap<String, Vec<DynamicObject>>,
    pub never_sync: Vec<String>,
}

impl Fixture {
    pub fn with(mut self, namespace: &str, names: &[&str]) -> Self {
        self.objects.insert(
            namespace.to_string(),
            names.iter().map(|name| object(namespace, name, &[])).collect(),
        );
        self
    }

    pub fn never_syncing(mut self, namespace: &str) -> Self {
        self.never_sync.push(namespace.to_string());
        self
    }

    fn build(&self, namespace: &str) -> Arc<FakeSource> {
        Arc::new(FakeSource::new(
            namespace,
            self.objects.get(namespace).cloned().unwrap_or_default(),
            !self.never_sync.iter().any(|ns| ns == namespace),
        ))
    }
}

pub type Created = Arc<Mutex<Vec<Arc<FakeSource>>>>;

/// Factory for a single merged cache, recording every source it builds
pub fn factory(fixture: Fixture) -> (SourceFactory<DynamicObject>, Created) {
    let created: Created = Arc::new(Mutex::new(Vec::new()));
    let log = created.clone();
    let factory: SourceFactory<DynamicObject> =
        Arc::new(move |namespace: &str| -> Arc<dyn WatchSource<DynamicObject>> {
            let source = fixture.build(namespace);
            log.lock().push(source.clone());
            source
        });
    (factory, created)
}

/// Provider for registries, recording every source per resource
#[derive(Default)]
pub struct FakeProvider {
    pub fixture: Fixture,
    pub created: Mutex<Vec<(ResourceId, Arc<FakeSource>)>>,
}

impl FakeProvider {
    pub fn new(fixture: Fixture) -> Arc<Self> {
        Arc::new(Self {
            fixture,
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn created_for(&self, resource: &ResourceId) -> Vec<Arc<FakeSource>> {
        self.created
            .lock()
            .iter()
            .filter(|(id, _)| id == resource)
            .map(|(_, source)| source.clone())
            .collect()
    }
}

impl SourceProvider for FakeProvider {
    fn source_for(
        &self,
        resource: &ResourceId,
        namespace: &str,
        _config: &CacheConfig,
    ) -> Arc<dyn WatchSource<DynamicObject>> {
        let source = self.fixture.build(namespace);
        self.created.lock().push((resource.clone(), source.clone()));
        source
    }
}

/// Poll `check` until it holds or roughly a second has passed
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
