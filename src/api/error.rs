use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::patch::PatchError;
use crate::store::StoreError;

/// Structured error type for all API handlers.
///
/// Each variant maps to an HTTP status code, a machine-readable code string,
/// and a human-readable message. Implements [`IntoResponse`] so handlers can
/// return `Result<T, ApiError>` directly.
#[derive(Debug)]
pub enum ApiError {
    /// 404 - A specific widget name was not found.
    WidgetNotFound(String),
    /// 404 - A widget asset file was not found on any root.
    AssetNotFound(String),
    /// 404 - No layer manifest for this widget.
    LayerManifestNotFound(String),
    /// 400 - Layer name is not `background` or `overlay`.
    UnknownLayer(String),
    /// 400 - Malformed or invalid request.
    InvalidRequest(String),
    /// 400 - Property path could not be applied to the manifest.
    InvalidPath(String),
    /// 403 - Asset path escapes the widget directory.
    TraversalDenied,
    /// 500 - Manifest could not be persisted.
    SaveFailed(String),
    /// 500 - Catch-all internal error.
    InternalError(String),
}

impl ApiError {
    /// Returns the HTTP status code for this error variant.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::WidgetNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::AssetNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::LayerManifestNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::UnknownLayer(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            ApiError::TraversalDenied => StatusCode::FORBIDDEN,
            ApiError::SaveFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a machine-readable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::WidgetNotFound(_) => "widget_not_found",
            ApiError::AssetNotFound(_) => "asset_not_found",
            ApiError::LayerManifestNotFound(_) => "layer_manifest_not_found",
            ApiError::UnknownLayer(_) => "unknown_layer",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::InvalidPath(_) => "invalid_path",
            ApiError::TraversalDenied => "traversal_denied",
            ApiError::SaveFailed(_) => "save_failed",
            ApiError::InternalError(_) => "internal_error",
        }
    }

    /// Returns a human-readable error message.
    pub fn message(&self) -> String {
        match self {
            ApiError::WidgetNotFound(name) => format!("No widget exists named '{}'.", name),
            ApiError::AssetNotFound(asset) => format!("Asset not found: {}.", asset),
            ApiError::LayerManifestNotFound(name) => {
                format!("No layer manifest for widget '{}'.", name)
            }
            ApiError::UnknownLayer(layer) => {
                format!("Unknown layer '{}': expected 'background' or 'overlay'.", layer)
            }
            ApiError::InvalidRequest(detail) => format!("Invalid request: {}.", detail),
            ApiError::InvalidPath(detail) => format!("Invalid property path: {}.", detail),
            ApiError::TraversalDenied => "Asset path escapes the widget directory.".to_string(),
            ApiError::SaveFailed(detail) => format!("Failed to save manifest: {}.", detail),
            ApiError::InternalError(detail) => format!("Internal error: {}.", detail),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { widget } => ApiError::WidgetNotFound(widget),
            StoreError::SaveFailed { .. } => ApiError::SaveFailed(err.to_string()),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<PatchError> for ApiError {
    fn from(err: PatchError) -> Self {
        match err {
            PatchError::EmptyPath => ApiError::InvalidRequest("property path is empty".into()),
            PatchError::Rebuild(e) => ApiError::InternalError(e.to_string()),
            other => ApiError::InvalidPath(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}
