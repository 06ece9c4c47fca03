/**
 * Helper functions for creating Kubernetes-shaped cache errors
 */
use crate::error::Error;
use kube::error::ErrorResponse;

/// Create a `NotFound` error for an object missing from a cache, worded the
/// way the API server words it (`services "web" not found`)
#[must_use]
pub fn not_found_error(resource: &str, name: &str) -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{resource} \"{name}\" not found"),
        reason: "NotFound".to_string(),
        code: 404,
    }))
}

/// Create the error returned when a registry is built without any namespace
#[must_use]
pub fn no_namespaces_error() -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: "must provide at least one namespace".to_string(),
        reason: "BadRequest".to_string(),
        code: 400,
    }))
}
