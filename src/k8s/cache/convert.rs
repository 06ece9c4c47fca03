//! Conversion from untyped cached objects to concrete resource types.

use crate::error::Result;
use k8s_openapi::serde_json;
use kube::Resource;
use kube::api::DynamicObject;
use serde::de::DeserializeOwned;

/// Convert an untyped object into `K`.
///
/// List responses carry no `apiVersion`/`kind` on their items, so the type
/// metadata of `K` is filled in before deserializing.
///
/// # Errors
///
/// Returns a JSON error when the object does not have the shape of `K`
pub fn from_dynamic<K>(obj: &DynamicObject) -> Result<K>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let mut value = serde_json::to_value(obj)?;
    if let Some(map) = value.as_object_mut() {
        map.insert("apiVersion".to_string(), K::api_version(&()).into_owned().into());
        map.insert("kind".to_string(), K::kind(&()).into_owned().into());
    }
    Ok(serde_json::from_value(value)?)
}
