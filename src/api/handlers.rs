use std::path::{Component, Path, PathBuf};

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Path as UrlPath, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::error::ApiError;
use super::AppState;
use crate::layer::{Layer, LAYER_HEADER};
use crate::manifest::WidgetManifest;
use crate::patch;
use crate::store::{ManifestStore, SaveOutcome, MANIFEST_FILE};

/// `axum::Json` with its rejection mapped into the structured error body, so
/// malformed or wrong-shaped request bodies come back as a 400 with the same
/// `{"error":{code,message}}` envelope as every other failure.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    axum::Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::Json(value) = axum::Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::InvalidRequest(rejection.body_text()))?;
        Ok(Self(value))
    }
}

/// Layer selection for a request: explicit `X-Widget-Layer` header first,
/// then the port of the listener the request arrived on (each listener gets
/// a router whose state carries its port).
fn request_layer(state: &AppState, headers: &HeaderMap) -> Option<Layer> {
    let header = headers.get(LAYER_HEADER).and_then(|v| v.to_str().ok());
    state.resolver.resolve_layer(header, state.listen_port)
}

fn request_root(state: &AppState, headers: &HeaderMap) -> PathBuf {
    match request_layer(state, headers) {
        Some(layer) => state.resolver.layer_root(layer).to_path_buf(),
        None => state.resolver.canonical_root().to_path_buf(),
    }
}

/// Widget names come straight from the URL and are joined into filesystem
/// paths everywhere, so they must be exactly one normal path component.
/// `..`, separators (including percent-encoded ones), and empty names are
/// rejected before any disk access.
fn validate_widget_name(name: &str) -> Result<(), ApiError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(ApiError::TraversalDenied),
    }
}

/// Run the store's retrying save off the async runtime; the backoff ladder
/// sleeps the calling thread.
async fn save_blocking(
    store: &ManifestStore,
    widget: &str,
    manifest: &WidgetManifest,
    root: PathBuf,
) -> Result<SaveOutcome, ApiError> {
    let store = store.clone();
    let widget = widget.to_string();
    let manifest = manifest.clone();
    let outcome = tokio::task::spawn_blocking(move || store.save(&widget, &manifest, Some(&root)))
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))??;
    Ok(outcome)
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn service_info() -> Json<serde_json::Value> {
    Json(json!({
        "service": "widgetd",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /api/widgets
pub async fn list_widgets(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<Vec<WidgetManifest>> {
    let root = request_root(&state, &headers);
    Json(state.store.discover(Some(&root)))
}

/// GET /api/widgets/{name}
pub async fn get_widget(
    State(state): State<AppState>,
    UrlPath(name): UrlPath<String>,
    headers: HeaderMap,
) -> Result<Json<WidgetManifest>, ApiError> {
    validate_widget_name(&name)?;
    let root = request_root(&state, &headers);
    let manifest = state.store.load(&name, Some(&root))?;
    Ok(Json(manifest))
}

/// POST /api/widgets/{name} -- full manifest replacement.
pub async fn replace_widget(
    State(state): State<AppState>,
    UrlPath(name): UrlPath<String>,
    headers: HeaderMap,
    ApiJson(mut manifest): ApiJson<WidgetManifest>,
) -> Result<Json<WidgetManifest>, ApiError> {
    validate_widget_name(&name)?;
    let root = request_root(&state, &headers);
    // The URL names the widget; the body cannot rename it.
    manifest.name = name.clone();
    save_blocking(&state.store, &name, &manifest, root).await?;
    Ok(Json(manifest))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub path: Option<String>,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// PATCH /api/widgets/{name} -- dot-path property update.
///
/// When the request targets a layer, the layer manifest is materialized from
/// the canonical one first, so the patch lands on the layer's copy and the
/// canonical file stays untouched.
pub async fn patch_widget(
    State(state): State<AppState>,
    UrlPath(name): UrlPath<String>,
    headers: HeaderMap,
    ApiJson(update): ApiJson<UpdateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_widget_name(&name)?;
    let path = update
        .path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("missing 'path'".into()))?;

    if let Some(layer) = request_layer(&state, &headers) {
        state
            .resolver
            .ensure_layer_copy(&name, layer)
            .map_err(|e| ApiError::InternalError(e.to_string()))?;
    }
    let root = request_root(&state, &headers);

    let mut manifest = state.store.load(&name, Some(&root))?;
    patch::patch_manifest(&mut manifest, &path, &update.value)?;
    save_blocking(&state.store, &name, &manifest, root).await?;

    info!(widget = %name, %path, "manifest property updated");
    Ok(Json(json!({
        "status": "ok",
        "updated": { "path": path, "value": update.value },
    })))
}

#[derive(Debug, Deserialize)]
pub struct EnableRequest {
    pub enabled: bool,
}

/// POST /api/layer/{layer}/widgets/{name}/enable
pub async fn toggle_enable(
    State(state): State<AppState>,
    UrlPath((layer, name)): UrlPath<(String, String)>,
    ApiJson(request): ApiJson<EnableRequest>,
) -> Result<Json<WidgetManifest>, ApiError> {
    validate_widget_name(&name)?;
    let layer = Layer::parse(&layer).ok_or(ApiError::UnknownLayer(layer))?;
    state
        .resolver
        .ensure_layer_copy(&name, layer)
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    let root = state.resolver.layer_root(layer).to_path_buf();
    let mut manifest = state.store.load(&name, Some(&root))?;
    manifest.widget_features.behavior.enabled = request.enabled;
    save_blocking(&state.store, &name, &manifest, root).await?;

    info!(widget = %name, %layer, enabled = request.enabled, "widget toggled");
    Ok(Json(manifest))
}

/// GET /{layer}/{name}/manifest.json -- the layer's manifest file as-is.
pub async fn layer_manifest(
    State(state): State<AppState>,
    UrlPath((layer, name)): UrlPath<(String, String)>,
) -> Result<Response, ApiError> {
    validate_widget_name(&name)?;
    let layer = Layer::parse(&layer).ok_or(ApiError::UnknownLayer(layer))?;
    let path = state
        .resolver
        .layer_root(layer)
        .join(&name)
        .join(MANIFEST_FILE);
    let contents = tokio::fs::read_to_string(&path)
        .await
        .map_err(|_| ApiError::LayerManifestNotFound(name))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        contents,
    )
        .into_response())
}

/// GET /api/widgets/{name}/{*asset}
///
/// Serves from the request's layer root, falling back to the canonical root
/// so a layer only needs to carry files it actually overrides. Paths that
/// try to climb out of the widget directory are rejected before any disk
/// access.
pub async fn widget_asset(
    State(state): State<AppState>,
    UrlPath((name, asset)): UrlPath<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    validate_widget_name(&name)?;
    let resolved = request_root(&state, &headers);
    let canonical = state.resolver.canonical_root().to_path_buf();
    let mut roots = vec![resolved];
    if roots[0] != canonical {
        roots.push(canonical);
    }

    for root in roots {
        let full = sanitize_asset_path(&root.join(&name), &asset)?;
        if let Ok(bytes) = tokio::fs::read(&full).await {
            let mime = mime_guess::from_path(&full).first_or_octet_stream();
            return Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, mime.as_ref().to_string())],
                bytes,
            )
                .into_response());
        }
    }
    Err(ApiError::AssetNotFound(asset))
}

/// Join `asset` under `base`, rejecting parent-directory and absolute
/// components outright.
fn sanitize_asset_path(base: &Path, asset: &str) -> Result<PathBuf, ApiError> {
    let mut clean = PathBuf::new();
    for component in Path::new(asset).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return Err(ApiError::TraversalDenied),
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(ApiError::AssetNotFound(asset.to_string()));
    }
    Ok(base.join(clean))
}

/// GET /api/time
pub async fn time_snapshot(State(state): State<AppState>) -> Response {
    Json(state.clock.current()).into_response()
}

/// GET /api/audio
pub async fn audio_snapshot(State(state): State<AppState>) -> Response {
    Json(state.audio.current()).into_response()
}
