pub mod error;
mod handlers;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::audio::AudioService;
use crate::clock::TimeService;
use crate::layer::LayerResolver;
use crate::store::ManifestStore;

/// Shared state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: ManifestStore,
    pub resolver: Arc<LayerResolver>,
    pub clock: Arc<TimeService>,
    pub audio: Arc<AudioService>,
    /// Port of the listener this router instance is bound to; `None` for
    /// routers not tied to a socket (tests). Drives preview-port layer
    /// inference.
    pub listen_port: Option<u16>,
}

/// Build the engine router. Each listener gets its own instance whose state
/// carries the bound port; handlers recover the layer from the
/// `X-Widget-Layer` header or from that port.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api", get(handlers::service_info))
        .route("/api/widgets", get(handlers::list_widgets))
        .route(
            "/api/widgets/{name}",
            get(handlers::get_widget)
                .post(handlers::replace_widget)
                .patch(handlers::patch_widget),
        )
        .route("/api/widgets/{name}/{*asset}", get(handlers::widget_asset))
        .route(
            "/api/layer/{layer}/widgets/{name}/enable",
            post(handlers::toggle_enable),
        )
        .route("/api/time", get(handlers::time_snapshot))
        .route("/api/audio", get(handlers::audio_snapshot))
        .route("/{layer}/{name}/manifest.json", get(handlers::layer_manifest))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NullAudioSource;
    use crate::config::EngineConfig;
    use crate::layer::{Layer, LAYER_HEADER};
    use crate::manifest::WidgetManifest;
    use crate::store::MANIFEST_FILE;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct Fixture {
        router: Router,
        state: AppState,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::default().rooted(dir.path());
        let store = ManifestStore::new(&config.widgets_root);
        let state = AppState {
            store,
            resolver: Arc::new(LayerResolver::from_config(&config)),
            clock: Arc::new(TimeService::new()),
            audio: Arc::new(AudioService::new(Arc::new(NullAudioSource))),
            listen_port: None,
        };
        Fixture {
            router: router(state.clone()),
            state,
            _dir: dir,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_req(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let fx = fixture();
        let (status, json) = send(&fx.router, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn service_info_reports_version() {
        let fx = fixture();
        let (status, json) = send(&fx.router, get_req("/api")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["service"], "widgetd");
        assert!(json["version"].is_string());
    }

    #[tokio::test]
    async fn list_widgets_from_canonical_root() {
        let fx = fixture();
        fx.state
            .store
            .save("clock", &WidgetManifest::named("clock"), None)
            .unwrap();
        fx.state
            .store
            .save("weather", &WidgetManifest::named("weather"), None)
            .unwrap();

        let (status, json) = send(&fx.router, get_req("/api/widgets")).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["clock", "weather"]);
    }

    #[tokio::test]
    async fn list_widgets_honors_layer_header() {
        let fx = fixture();
        fx.state
            .store
            .save("canonical-only", &WidgetManifest::named("canonical-only"), None)
            .unwrap();
        let overlay_root = fx.state.resolver.layer_root(Layer::Overlay).to_path_buf();
        fx.state
            .store
            .save(
                "overlay-only",
                &WidgetManifest::named("overlay-only"),
                Some(&overlay_root),
            )
            .unwrap();

        let request = Request::builder()
            .uri("/api/widgets")
            .header(LAYER_HEADER, "overlay")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&fx.router, request).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["overlay-only"]);
    }

    #[tokio::test]
    async fn listener_port_implies_layer() {
        let fx = fixture();
        let background_root = fx
            .state
            .resolver
            .layer_root(Layer::Background)
            .to_path_buf();
        fx.state
            .store
            .save("bg", &WidgetManifest::named("bg"), Some(&background_root))
            .unwrap();

        // Router instance bound to the background preview port.
        let preview = router(AppState {
            listen_port: Some(7000),
            ..fx.state.clone()
        });
        let (status, json) = send(&preview, get_req("/api/widgets")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["name"], "bg");

        // The header still wins over the port.
        let request = Request::builder()
            .uri("/api/widgets")
            .header(LAYER_HEADER, "overlay")
            .body(Body::empty())
            .unwrap();
        let (_, json) = send(&preview, request).await;
        assert!(json.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_unknown_widget_is_404() {
        let fx = fixture();
        let (status, json) = send(&fx.router, get_req("/api/widgets/ghost")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "widget_not_found");
    }

    #[tokio::test]
    async fn replace_widget_persists_and_keeps_url_name() {
        let fx = fixture();
        let mut body = WidgetManifest::named("imposter");
        body.description = "replaced".to_string();
        let request = json_req(
            Method::POST,
            "/api/widgets/clock",
            serde_json::to_value(&body).unwrap(),
        );
        let (status, json) = send(&fx.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["name"], "clock");

        let saved = fx.state.store.load("clock", None).unwrap();
        assert_eq!(saved.name, "clock");
        assert_eq!(saved.description, "replaced");
    }

    #[tokio::test]
    async fn patch_coerces_and_persists() {
        let fx = fixture();
        fx.state
            .store
            .save("clock", &WidgetManifest::named("clock"), None)
            .unwrap();

        let request = json_req(
            Method::PATCH,
            "/api/widgets/clock",
            serde_json::json!({"path": "widget_features.display.position.x", "value": "150"}),
        );
        let (status, json) = send(&fx.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["updated"]["path"], "widget_features.display.position.x");

        let saved = fx.state.store.load("clock", None).unwrap();
        assert_eq!(saved.widget_features.display.position.x, 150);
    }

    #[tokio::test]
    async fn patch_without_path_is_400() {
        let fx = fixture();
        fx.state
            .store
            .save("clock", &WidgetManifest::named("clock"), None)
            .unwrap();

        let request = json_req(
            Method::PATCH,
            "/api/widgets/clock",
            serde_json::json!({"value": 5}),
        );
        let (status, json) = send(&fx.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "invalid_request");
    }

    #[tokio::test]
    async fn patch_unknown_property_is_400() {
        let fx = fixture();
        fx.state
            .store
            .save("clock", &WidgetManifest::named("clock"), None)
            .unwrap();

        let request = json_req(
            Method::PATCH,
            "/api/widgets/clock",
            serde_json::json!({"path": "widget_features.bogus", "value": 5}),
        );
        let (status, json) = send(&fx.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "invalid_path");
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("bogus"));
    }

    #[tokio::test]
    async fn patch_on_layer_materializes_copy_and_leaves_canonical_alone() {
        let fx = fixture();
        let manifest = WidgetManifest::named("clock");
        fx.state.store.save("clock", &manifest, None).unwrap();
        let canonical_path = fx
            .state
            .resolver
            .canonical_root()
            .join("clock")
            .join(MANIFEST_FILE);
        let canonical_before = std::fs::read_to_string(&canonical_path).unwrap();

        let request = Request::builder()
            .method(Method::PATCH)
            .uri("/api/widgets/clock")
            .header(header::CONTENT_TYPE, "application/json")
            .header(LAYER_HEADER, "overlay")
            .body(Body::from(
                serde_json::json!({"path": "widget_features.display.position.x", "value": 42})
                    .to_string(),
            ))
            .unwrap();
        let (status, _) = send(&fx.router, request).await;
        assert_eq!(status, StatusCode::OK);

        // Canonical file is byte-identical; the overlay copy diverged.
        let canonical_after = std::fs::read_to_string(&canonical_path).unwrap();
        assert_eq!(canonical_before, canonical_after);

        let overlay_root = fx.state.resolver.layer_root(Layer::Overlay).to_path_buf();
        let overlay = fx.state.store.load("clock", Some(&overlay_root)).unwrap();
        assert_eq!(overlay.widget_features.display.position.x, 42);
    }

    #[tokio::test]
    async fn enable_toggle_works_per_layer() {
        let fx = fixture();
        fx.state
            .store
            .save("clock", &WidgetManifest::named("clock"), None)
            .unwrap();

        let request = json_req(
            Method::POST,
            "/api/layer/overlay/widgets/clock/enable",
            serde_json::json!({"enabled": false}),
        );
        let (status, json) = send(&fx.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["widget_features"]["behavior"]["enabled"], false);

        // Canonical stays enabled.
        let canonical = fx.state.store.load("clock", None).unwrap();
        assert!(canonical.widget_features.behavior.enabled);
    }

    #[tokio::test]
    async fn enable_toggle_rejects_unknown_layer() {
        let fx = fixture();
        let request = json_req(
            Method::POST,
            "/api/layer/sideways/widgets/clock/enable",
            serde_json::json!({"enabled": true}),
        );
        let (status, json) = send(&fx.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "unknown_layer");
    }

    #[tokio::test]
    async fn layer_manifest_served_raw() {
        let fx = fixture();
        fx.state
            .store
            .save("clock", &WidgetManifest::named("clock"), None)
            .unwrap();
        let enable = json_req(
            Method::POST,
            "/api/layer/overlay/widgets/clock/enable",
            serde_json::json!({"enabled": false}),
        );
        send(&fx.router, enable).await;

        let (status, json) = send(&fx.router, get_req("/overlay/clock/manifest.json")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["name"], "clock");
        assert_eq!(json["widget_features"]["behavior"]["enabled"], false);
    }

    #[tokio::test]
    async fn layer_manifest_missing_is_404() {
        let fx = fixture();
        let (status, json) = send(&fx.router, get_req("/overlay/ghost/manifest.json")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "layer_manifest_not_found");
    }

    #[tokio::test]
    async fn asset_served_with_content_type() {
        let fx = fixture();
        let folder = fx.state.resolver.canonical_root().join("clock");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("style.css"), "body { margin: 0; }").unwrap();

        let response = fx
            .router
            .clone()
            .oneshot(get_req("/api/widgets/clock/style.css"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let ct = response.headers().get(header::CONTENT_TYPE).unwrap();
        assert!(ct.to_str().unwrap().contains("text/css"));
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"body { margin: 0; }");
    }

    #[tokio::test]
    async fn asset_falls_back_to_canonical_for_layer_requests() {
        let fx = fixture();
        let folder = fx.state.resolver.canonical_root().join("clock");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("main.js"), "console.log('hi')").unwrap();

        let request = Request::builder()
            .uri("/api/widgets/clock/main.js")
            .header(LAYER_HEADER, "overlay")
            .body(Body::empty())
            .unwrap();
        let response = fx.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn asset_traversal_is_forbidden() {
        let fx = fixture();
        let (status, json) = send(
            &fx.router,
            get_req("/api/widgets/clock/..%2F..%2Fsecret.txt"),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"]["code"], "traversal_denied");
    }

    #[tokio::test]
    async fn widget_name_cannot_read_outside_the_root() {
        let fx = fixture();
        // A file one level above the widgets root must stay invisible.
        let outside = fx.state.resolver.canonical_root().parent().unwrap();
        std::fs::write(outside.join("secret.txt"), "top secret").unwrap();

        let (status, json) = send(&fx.router, get_req("/api/widgets/../secret.txt")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"]["code"], "traversal_denied");

        let (status, _) = send(&fx.router, get_req("/api/widgets/..")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn widget_name_cannot_write_outside_the_root() {
        let fx = fixture();
        let request = json_req(
            Method::POST,
            "/api/widgets/..%2Fescaped",
            serde_json::to_value(WidgetManifest::named("escaped")).unwrap(),
        );
        let (status, json) = send(&fx.router, request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"]["code"], "traversal_denied");

        // Nothing materialized beside the widgets root.
        let outside = fx.state.resolver.canonical_root().parent().unwrap();
        assert!(!outside.join("escaped").exists());

        let patch = json_req(
            Method::PATCH,
            "/api/widgets/..%2Fescaped",
            serde_json::json!({"path": "name", "value": "x"}),
        );
        let (status, _) = send(&fx.router, patch).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn wrong_shaped_body_is_structured_400() {
        let fx = fixture();
        let request = json_req(
            Method::POST,
            "/api/widgets/clock",
            serde_json::json!({"name": 5}),
        );
        let (status, json) = send(&fx.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "invalid_request");
        assert!(json["error"]["message"].is_string());
    }

    #[tokio::test]
    async fn non_json_body_is_structured_400() {
        let fx = fixture();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/widgets/clock")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, json) = send(&fx.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "invalid_request");
    }

    #[tokio::test]
    async fn missing_asset_is_404() {
        let fx = fixture();
        let (status, json) = send(&fx.router, get_req("/api/widgets/clock/nope.css")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "asset_not_found");
    }

    #[tokio::test]
    async fn time_snapshot_has_clock_fields() {
        let fx = fixture();
        let (status, json) = send(&fx.router, get_req("/api/time")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["unix"].is_i64());
        assert!(json["formatted_24h"].is_string());
    }

    #[tokio::test]
    async fn audio_snapshot_has_mixer_fields() {
        let fx = fixture();
        let (status, json) = send(&fx.router, get_req("/api/audio")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["volume"], 0.5);
        assert_eq!(json["muted"], false);
    }
}
