//! Presentation layers and request-to-root resolution.
//!
//! Two layers render widgets: the desktop background and the always-on-top
//! overlay. Each keeps its own widgets directory so a widget's manifest can
//! diverge per layer. Requests pick their layer with the `X-Widget-Layer`
//! header, or implicitly by arriving on a layer's preview port; everything
//! else operates on the canonical root.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::store::MANIFEST_FILE;

pub const LAYER_HEADER: &str = "X-Widget-Layer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Background,
    Overlay,
}

impl Layer {
    pub const ALL: [Layer; 2] = [Layer::Background, Layer::Overlay];

    pub fn name(&self) -> &'static str {
        match self {
            Layer::Background => "background",
            Layer::Overlay => "overlay",
        }
    }

    /// Case-insensitive parse of a layer name.
    pub fn parse(s: &str) -> Option<Layer> {
        match s.to_ascii_lowercase().as_str() {
            "background" => Some(Layer::Background),
            "overlay" => Some(Layer::Overlay),
            _ => None,
        }
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Maps requests to the widgets root they should operate on.
#[derive(Debug, Clone)]
pub struct LayerResolver {
    canonical_root: PathBuf,
    background_root: PathBuf,
    overlay_root: PathBuf,
    background_port: u16,
    overlay_port: u16,
}

impl LayerResolver {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            canonical_root: config.widgets_root.clone(),
            background_root: config.background_root.clone(),
            overlay_root: config.overlay_root.clone(),
            background_port: config.background_port,
            overlay_port: config.overlay_port,
        }
    }

    pub fn canonical_root(&self) -> &Path {
        &self.canonical_root
    }

    pub fn layer_root(&self, layer: Layer) -> &Path {
        match layer {
            Layer::Background => &self.background_root,
            Layer::Overlay => &self.overlay_root,
        }
    }

    /// Classify a request: explicit header wins, then preview-port
    /// inference. `None` means canonical.
    pub fn resolve_layer(&self, header: Option<&str>, port: Option<u16>) -> Option<Layer> {
        if let Some(value) = header {
            if let Some(layer) = Layer::parse(value) {
                return Some(layer);
            }
        }
        match port {
            Some(p) if p == self.background_port => Some(Layer::Background),
            Some(p) if p == self.overlay_port => Some(Layer::Overlay),
            _ => None,
        }
    }

    /// The widgets root a request should read and write.
    pub fn resolve_root(&self, header: Option<&str>, port: Option<u16>) -> &Path {
        match self.resolve_layer(header, port) {
            Some(layer) => self.layer_root(layer),
            None => &self.canonical_root,
        }
    }

    /// Materialize a widget's layer manifest from the canonical one if the
    /// layer copy does not exist yet. Never overwrites: an existing layer
    /// manifest is the layer's own divergent state. Returns whether a copy
    /// was made.
    pub fn ensure_layer_copy(&self, widget: &str, layer: Layer) -> io::Result<bool> {
        let layer_manifest = self.layer_root(layer).join(widget).join(MANIFEST_FILE);
        if layer_manifest.exists() {
            return Ok(false);
        }
        let canonical_manifest = self.canonical_root.join(widget).join(MANIFEST_FILE);
        if !canonical_manifest.exists() {
            debug!(widget, %layer, "no canonical manifest to copy");
            return Ok(false);
        }

        if let Some(parent) = layer_manifest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = std::fs::read(&canonical_manifest)?;
        // create_new keeps this non-destructive if another writer got there
        // first.
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&layer_manifest)
        {
            Ok(mut file) => {
                use std::io::Write;
                file.write_all(&contents)?;
                info!(widget, %layer, "materialized layer manifest from canonical");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e),
        }
    }
}
