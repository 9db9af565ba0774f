use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Engine configuration, loaded from `widgetd.toml`.
///
/// Paths are interpreted relative to the working directory unless absolute;
/// [`EngineConfig::rooted`] rebases them for embedded setups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Canonical widgets root: the source of truth each layer copies from.
    pub widgets_root: PathBuf,
    /// Background layer's own widgets directory.
    pub background_root: PathBuf,
    /// Overlay layer's own widgets directory.
    pub overlay_root: PathBuf,
    /// Main API port.
    pub api_port: u16,
    /// Background preview port; requests here imply the background layer.
    pub background_port: u16,
    /// Overlay preview port; requests here imply the overlay layer.
    pub overlay_port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            widgets_root: PathBuf::from("Widgets"),
            background_root: PathBuf::from("Background/widgets"),
            overlay_root: PathBuf::from("Overlay/widgets"),
            api_port: 7070,
            background_port: 7000,
            overlay_port: 7001,
        }
    }
}

impl EngineConfig {
    /// Load config from a TOML file path. Returns None if the file doesn't
    /// exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }

    /// Save config to a TOML file path.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, contents)
            .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Rebase all relative roots onto `base`. Absolute roots are kept.
    pub fn rooted(mut self, base: &Path) -> Self {
        for root in [
            &mut self.widgets_root,
            &mut self.background_root,
            &mut self.overlay_root,
        ] {
            if root.is_relative() {
                *root = base.join(&root);
            }
        }
        self
    }

    pub fn ports(&self) -> [u16; 3] {
        [self.api_port, self.background_port, self.overlay_port]
    }
}

/// Errors that can occur when loading or saving config.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(PathBuf, std::io::Error),
    ParseFailed(PathBuf, toml::de::Error),
    WriteFailed(PathBuf, std::io::Error),
    SerializeFailed(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read config {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse config {}: {}", path.display(), e)
            }
            Self::WriteFailed(path, e) => {
                write!(f, "Failed to write config {}: {}", path.display(), e)
            }
            Self::SerializeFailed(e) => write!(f, "Failed to serialize config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}
