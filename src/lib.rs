//! Cross-namespace Kubernetes resource caches.
//!
//! A [`CacheRegistry`](k8s::cache::CacheRegistry) keeps one merged cache per
//! resource type over a namespace set that can change at runtime.

pub mod error;
pub mod k8s;

pub use error::{Error, Result};
