pub mod config;
pub mod convert;
pub mod errors;
pub mod merged_cache;
pub mod namespace_set;
pub mod registry;
pub mod sets;
pub mod store;
pub mod watch_source;

pub use config::CacheConfig;
pub use merged_cache::{CacheStats, MergedResourceCache, NamespaceLister, SourceState};
pub use namespace_set::{HandlerId, NamespaceSet, NamespaceSetHandler, NamespaceSetHandlerFuncs, NAMESPACE_ALL};
pub use registry::{CacheRegistry, ResourceId};
pub use store::{LabelSelector, ObjectKey, Store};
pub use watch_source::{KubeSourceProvider, KubeWatchSource, SourceFactory, SourceProvider, WatchSource};
