use hyper::http::{Request, Response, StatusCode};
use k8s_openapi::serde_json::{self, Value, json};
use kube::Client;
use kube::client::Body;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_test::mock::{self, Handle, SendResponse};
use xns_cache::k8s::cache::{CacheConfig, KubeWatchSource, ObjectKey, ResourceId, WatchSource};

type ApiHandle = Handle<Request<Body>, Response<Body>>;

fn setup(config: CacheConfig) -> (Arc<KubeWatchSource>, ApiHandle) {
    let (service, handle) = mock::pair::<Request<Body>, Response<Body>>();
    let client = Client::new(service, "default");
    let source = KubeWatchSource::new(client, &ResourceId::new("", "v1", "configmaps"), "shop", config);
    (Arc::new(source), handle)
}

fn run(source: &Arc<KubeWatchSource>, stop: &CancellationToken) {
    let source = source.clone();
    let stop = stop.clone();
    tokio::spawn(async move { source.run(stop).await });
}

async fn next_request(handle: &mut ApiHandle) -> (Request<Body>, SendResponse<Response<Body>>) {
    tokio::time::timeout(Duration::from_secs(5), handle.next_request())
        .await
        .unwrap()
        .unwrap()
}

fn is_watch(request: &Request<Body>) -> bool {
    request.uri().to_string().contains("watch=true")
}

fn config_map(name: &str, resource_version: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": name, "namespace": "shop", "resourceVersion": resource_version },
    })
}

fn list_body(resource_version: &str, items: Vec<Value>) -> Response<Body> {
    let list = json!({
        "apiVersion": "v1",
        "kind": "ConfigMapList",
        "metadata": { "resourceVersion": resource_version },
        "items": items,
    });
    Response::builder()
        .body(Body::from(serde_json::to_vec(&list).unwrap()))
        .unwrap()
}

fn watch_body(events: &[Value]) -> Response<Body> {
    let mut body = String::new();
    for event in events {
        body.push_str(&event.to_string());
        body.push('\n');
    }
    Response::builder().body(Body::from(body.into_bytes())).unwrap()
}

#[tokio::test]
async fn test_list_then_watch_keeps_index_current() {
    let (source, mut handle) = setup(CacheConfig::default());
    let stop = CancellationToken::new();
    run(&source, &stop);

    let (request, send) = next_request(&mut handle).await;
    assert!(!is_watch(&request));
    assert!(request.uri().path().ends_with("/api/v1/namespaces/shop/configmaps"));
    send.send_response(list_body("10", vec![config_map("a", "5")]));

    let (request, send) = next_request(&mut handle).await;
    assert!(is_watch(&request));
    assert!(request.uri().to_string().contains("resourceVersion=10"));
    assert!(request.uri().to_string().contains("timeoutSeconds=294"));
    assert!(source.has_synced());
    assert_eq!(source.index().keys(), vec![ObjectKey::namespaced("shop", "a")]);

    send.send_response(watch_body(&[
        json!({ "type": "ADDED", "object": config_map("b", "11") }),
        json!({ "type": "DELETED", "object": config_map("a", "12") }),
    ]));

    // The stream ended, so the source resumes from the last seen version
    let (request, _pending) = next_request(&mut handle).await;
    assert!(is_watch(&request));
    assert!(request.uri().to_string().contains("resourceVersion=12"));
    assert_eq!(source.index().keys(), vec![ObjectKey::namespaced("shop", "b")]);

    stop.cancel();
}

#[tokio::test]
async fn test_expired_resource_version_relists() {
    let (source, mut handle) = setup(CacheConfig::default());
    let stop = CancellationToken::new();
    run(&source, &stop);

    let (_, send) = next_request(&mut handle).await;
    send.send_response(list_body("10", vec![config_map("a", "5")]));

    let (request, send) = next_request(&mut handle).await;
    assert!(is_watch(&request));
    send.send_response(watch_body(&[json!({
        "type": "ERROR",
        "object": {
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": "too old resource version: 10 (20)",
            "reason": "Expired",
            "code": 410,
        },
    })]));

    let (request, send) = next_request(&mut handle).await;
    assert!(!is_watch(&request), "expected a relist after 410");
    send.send_response(list_body("20", vec![config_map("c", "19")]));

    let (request, _pending) = next_request(&mut handle).await;
    assert!(request.uri().to_string().contains("resourceVersion=20"));
    assert_eq!(source.index().keys(), vec![ObjectKey::namespaced("shop", "c")]);

    stop.cancel();
}

#[tokio::test]
async fn test_failed_list_is_retried() {
    let config = CacheConfig::default().with_backoff(Duration::from_millis(10), Duration::from_millis(20));
    let (source, mut handle) = setup(config);
    let stop = CancellationToken::new();
    run(&source, &stop);

    let (_, send) = next_request(&mut handle).await;
    let status = json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": "etcdserver: request timed out",
        "reason": "InternalError",
        "code": 500,
    });
    send.send_response(
        Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::from(serde_json::to_vec(&status).unwrap()))
            .unwrap(),
    );

    let (request, send) = next_request(&mut handle).await;
    assert!(!is_watch(&request));
    assert!(!source.has_synced());
    send.send_response(list_body("7", Vec::new()));

    let (request, _pending) = next_request(&mut handle).await;
    assert!(is_watch(&request));
    assert!(source.has_synced());
    assert!(source.index().is_empty());

    stop.cancel();
}

#[tokio::test]
async fn test_resync_period_forces_relist() {
    let config = CacheConfig::default().with_resync_period(Duration::from_millis(200));
    let (source, mut handle) = setup(config);
    let stop = CancellationToken::new();
    run(&source, &stop);

    let (_, send) = next_request(&mut handle).await;
    send.send_response(list_body("10", vec![config_map("a", "5")]));

    // The watch may not outlive the resync deadline
    let (request, send) = next_request(&mut handle).await;
    assert!(is_watch(&request));
    assert!(request.uri().to_string().contains("timeoutSeconds=1"));

    tokio::time::sleep(Duration::from_millis(250)).await;
    send.send_response(watch_body(&[json!({ "type": "ADDED", "object": config_map("b", "11") })]));

    let (request, send) = next_request(&mut handle).await;
    assert!(!is_watch(&request), "expected a relist once the resync period elapsed");
    assert_eq!(
        source.index().keys(),
        vec![ObjectKey::namespaced("shop", "a"), ObjectKey::namespaced("shop", "b")]
    );
    send.send_response(list_body("30", vec![config_map("c", "29")]));

    let (request, _pending) = next_request(&mut handle).await;
    assert!(is_watch(&request));
    assert!(request.uri().to_string().contains("resourceVersion=30"));
    assert_eq!(source.index().keys(), vec![ObjectKey::namespaced("shop", "c")]);

    stop.cancel();
}
