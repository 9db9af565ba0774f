//! Cross-module flows: HTTP writes feeding the manifest watcher, layer
//! divergence, and event classification end to end.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use tower::ServiceExt;

use widgetd::api::{router, AppState};
use widgetd::audio::{AudioService, NullAudioSource};
use widgetd::clock::TimeService;
use widgetd::config::EngineConfig;
use widgetd::hub::handler;
use widgetd::layer::{Layer, LayerResolver, LAYER_HEADER};
use widgetd::manifest::WidgetManifest;
use widgetd::store::ManifestStore;
use widgetd::watcher::{ChangeKind, ChangeWatcher, ManifestChange};

struct Engine {
    router: axum::Router,
    store: ManifestStore,
    resolver: Arc<LayerResolver>,
    watcher: ChangeWatcher,
    _dir: tempfile::TempDir,
}

fn engine() -> Engine {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::default().rooted(dir.path());
    let store = ManifestStore::new(&config.widgets_root);
    let resolver = Arc::new(LayerResolver::from_config(&config));
    let watcher = ChangeWatcher::new(store.clone(), (*resolver).clone());
    let state = AppState {
        store: store.clone(),
        resolver: resolver.clone(),
        clock: Arc::new(TimeService::new()),
        audio: Arc::new(AudioService::new(Arc::new(NullAudioSource))),
        listen_port: None,
    };
    Engine {
        router: router(state),
        store,
        resolver,
        watcher,
        _dir: dir,
    }
}

fn record_changes(watcher: &ChangeWatcher) -> Arc<Mutex<Vec<(Layer, String, ChangeKind)>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    watcher.subscribe(
        "*",
        handler(move |change: ManifestChange| {
            let sink = sink.clone();
            async move {
                sink.lock().push((change.layer, change.widget, change.kind));
                Ok(())
            }
        }),
    );
    log
}

async fn send_json(
    router: &axum::Router,
    method: Method,
    uri: &str,
    layer_header: Option<&str>,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(layer) = layer_header {
        builder = builder.header(LAYER_HEADER, layer);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn http_writes_drive_watcher_events() {
    let engine = engine();
    let log = record_changes(&engine.watcher);

    // Create the widget canonically. The watcher only watches layers, so no
    // event yet.
    let manifest = serde_json::to_value(WidgetManifest::named("clock")).unwrap();
    let (status, _) = send_json(
        &engine.router,
        Method::POST,
        "/api/widgets/clock",
        None,
        manifest,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    engine.watcher.poll_once().await;
    assert!(log.lock().is_empty());

    // A layer-scoped patch materializes the overlay copy: Created.
    let (status, _) = send_json(
        &engine.router,
        Method::PATCH,
        "/api/widgets/clock",
        Some("overlay"),
        serde_json::json!({"path": "widget_features.display.position.x", "value": 10}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    engine.watcher.poll_once().await;

    // Disable on the overlay: Disabled.
    let (status, _) = send_json(
        &engine.router,
        Method::POST,
        "/api/layer/overlay/widgets/clock/enable",
        None,
        serde_json::json!({"enabled": false}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    engine.watcher.poll_once().await;

    // Remove the overlay copy from disk: Deleted.
    let overlay_widget = engine.resolver.layer_root(Layer::Overlay).join("clock");
    std::fs::remove_dir_all(&overlay_widget).unwrap();
    engine.watcher.poll_once().await;

    let events: Vec<ChangeKind> = log.lock().iter().map(|(_, _, kind)| *kind).collect();
    assert_eq!(
        events,
        vec![ChangeKind::Created, ChangeKind::Disabled, ChangeKind::Deleted]
    );
    assert!(log.lock().iter().all(|(layer, _, _)| *layer == Layer::Overlay));
}

#[tokio::test]
async fn layer_patch_leaves_canonical_untouched() {
    let engine = engine();
    let manifest = serde_json::to_value(WidgetManifest::named("weather")).unwrap();
    send_json(
        &engine.router,
        Method::POST,
        "/api/widgets/weather",
        None,
        manifest,
    )
    .await;

    let canonical_path = engine
        .resolver
        .canonical_root()
        .join("weather")
        .join("Manifest.json");
    let before = std::fs::read_to_string(&canonical_path).unwrap();

    send_json(
        &engine.router,
        Method::PATCH,
        "/api/widgets/weather",
        Some("background"),
        serde_json::json!({"path": "unique_config.city", "value": "Berlin"}),
    )
    .await;

    assert_eq!(before, std::fs::read_to_string(&canonical_path).unwrap());

    let background = engine
        .store
        .load(
            "weather",
            Some(engine.resolver.layer_root(Layer::Background)),
        )
        .unwrap();
    assert_eq!(
        background.unique_config.get("city"),
        Some(&serde_json::json!("Berlin"))
    );

    // The other layer never materialized at all.
    assert!(!engine
        .resolver
        .layer_root(Layer::Overlay)
        .join("weather")
        .exists());
}

#[tokio::test]
async fn rewriting_equal_manifest_emits_no_watcher_event() {
    let engine = engine();
    let log = record_changes(&engine.watcher);

    let overlay_root = engine.resolver.layer_root(Layer::Overlay).to_path_buf();
    let manifest = WidgetManifest::named("clock");
    engine
        .store
        .save("clock", &manifest, Some(&overlay_root))
        .unwrap();
    engine.watcher.poll_once().await;
    assert_eq!(log.lock().len(), 1);

    // POST the identical manifest through the API: content-equality makes
    // the save a no-op and the watcher stays quiet.
    let (status, _) = send_json(
        &engine.router,
        Method::POST,
        "/api/widgets/clock",
        Some("overlay"),
        serde_json::to_value(&manifest).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    engine.watcher.poll_once().await;
    assert_eq!(log.lock().len(), 1);
}

#[tokio::test]
async fn layer_manifest_endpoint_reflects_enable_state() {
    let engine = engine();
    send_json(
        &engine.router,
        Method::POST,
        "/api/widgets/clock",
        None,
        serde_json::to_value(WidgetManifest::named("clock")).unwrap(),
    )
    .await;
    send_json(
        &engine.router,
        Method::POST,
        "/api/layer/background/widgets/clock/enable",
        None,
        serde_json::json!({"enabled": false}),
    )
    .await;

    let request = Request::builder()
        .uri("/background/clock/manifest.json")
        .body(Body::empty())
        .unwrap();
    let response = engine.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["widget_features"]["behavior"]["enabled"], false);

    // The overlay never got a copy; its manifest endpoint 404s.
    let request = Request::builder()
        .uri("/overlay/clock/manifest.json")
        .body(Body::empty())
        .unwrap();
    let response = engine.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn patched_integer_survives_reload_as_integer() {
    let engine = engine();
    send_json(
        &engine.router,
        Method::POST,
        "/api/widgets/clock",
        None,
        serde_json::to_value(WidgetManifest::named("clock")).unwrap(),
    )
    .await;

    send_json(
        &engine.router,
        Method::PATCH,
        "/api/widgets/clock",
        None,
        serde_json::json!({"path": "widget_features.display.position.x", "value": "150"}),
    )
    .await;

    // Raw file check: the value must be a bare integer, not a string.
    let raw = std::fs::read_to_string(
        engine
            .resolver
            .canonical_root()
            .join("clock")
            .join("Manifest.json"),
    )
    .unwrap();
    assert!(raw.contains("\"x\": 150"));

    let reloaded = engine.store.load("clock", None).unwrap();
    assert_eq!(reloaded.widget_features.display.position.x, 150);
}
