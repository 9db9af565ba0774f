use serde::{Deserialize, Serialize};
use serde_json::Map;

/// On-disk widget manifest (`Manifest.json`).
///
/// Field names follow the wire format widgets ship with: identity fields are
/// snake_case, nested feature fields are camelCase. Serialization order is
/// declaration order, which makes the pretty-printed form a stable snapshot
/// for change detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetManifest {
    pub name: String,
    pub id: String,
    pub description: String,
    pub original_author: Option<String>,
    pub contributor: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    pub required_settings: RequiredSettings,
    pub widget_features: WidgetFeatures,
    pub unique_config: Map<String, serde_json::Value>,
    pub states: States,
    pub extra: Extra,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

// Hand-written so in-process manifests carry the same version a parsed
// partial manifest gets; the serde attribute only covers deserialization.
impl Default for WidgetManifest {
    fn default() -> Self {
        Self {
            name: String::new(),
            id: String::new(),
            description: String::new(),
            original_author: None,
            contributor: None,
            version: default_version(),
            required_settings: RequiredSettings::default(),
            widget_features: WidgetFeatures::default(),
            unique_config: Map::new(),
            states: States::default(),
            extra: Extra::default(),
        }
    }
}

impl WidgetManifest {
    /// Minimal manifest carrying only a name. Used when synthesizing events
    /// for widgets whose files are already gone.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Canonical pretty-printed form, used both as the saved file content and
    /// as the change-detection snapshot.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("manifest serializes to JSON")
    }

    pub fn enabled(&self) -> bool {
        self.widget_features.behavior.enabled
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RequiredSettings {
    pub permissions: Permissions,
    pub files: Files,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Permissions {
    pub keyboard: bool,
    pub filesystem: bool,
    pub network: bool,
    pub overlay: bool,
    #[serde(rename = "exclusiveHotkeys")]
    pub exclusive_hotkeys: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Files {
    pub html: String,
    pub css: String,
    pub js: JsEntry,
    pub settings: Option<String>,
}

/// The `js` entry accepts either a single source file or an ordered list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsEntry {
    Single(String),
    Many(Vec<String>),
}

impl Default for JsEntry {
    fn default() -> Self {
        JsEntry::Single(String::new())
    }
}

impl JsEntry {
    /// Script sources in load order; an empty single entry yields none.
    pub fn sources(&self) -> Vec<String> {
        match self {
            JsEntry::Single(s) if s.is_empty() => Vec::new(),
            JsEntry::Single(s) => vec![s.clone()],
            JsEntry::Many(list) => list.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WidgetFeatures {
    pub behavior: Behavior,
    pub display: Display,
    pub styling: Styling,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Behavior {
    pub enabled: bool,
    pub draggable: bool,
    #[serde(rename = "clickThrough")]
    pub click_through: bool,
    pub lifecycle: Lifecycle,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            enabled: true,
            draggable: false,
            click_through: false,
            lifecycle: Lifecycle::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Lifecycle {
    #[serde(rename = "onInit")]
    pub on_init: bool,
    #[serde(rename = "onDestroy")]
    pub on_destroy: bool,
    #[serde(rename = "onSettingsUpdate")]
    pub on_settings_update: bool,
    #[serde(rename = "onFocus")]
    pub on_focus: bool,
    #[serde(rename = "onBlur")]
    pub on_blur: bool,
    #[serde(rename = "onResize")]
    pub on_resize: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Display {
    pub position: Position,
    pub size: Size,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Position {
    pub x: i64,
    pub y: i64,
    #[serde(rename = "zIndex")]
    pub z_index: i64,
}

impl Default for Position {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            z_index: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Size {
    pub width: i64,
    pub height: i64,
    pub scale: f64,
    pub resizable: bool,
}

impl Default for Size {
    fn default() -> Self {
        Self {
            width: 200,
            height: 100,
            scale: 1.0,
            resizable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Styling {
    #[serde(rename = "useRootVariables")]
    pub use_root_variables: bool,
    pub font: Font,
    pub border: Border,
    pub background: Background,
    pub animation: Animation,
}

impl Default for Styling {
    fn default() -> Self {
        Self {
            use_root_variables: true,
            font: Font::default(),
            border: Border::default(),
            background: Background::default(),
            animation: Animation::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Font {
    pub family: String,
    pub size: String,
    pub color: String,
    #[serde(rename = "widgetScaling")]
    pub widget_scaling: bool,
}

impl Default for Font {
    fn default() -> Self {
        Self {
            family: "Arial".to_string(),
            size: "24px".to_string(),
            color: "#FFFFFF".to_string(),
            widget_scaling: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Border {
    pub style: String,
    pub width: String,
    pub color: String,
    pub radius: Option<String>,
}

impl Default for Border {
    fn default() -> Self {
        Self {
            style: "solid".to_string(),
            width: "2px".to_string(),
            color: "#FFFFFF".to_string(),
            radius: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Background {
    pub color: String,
    pub alpha: f64,
}

impl Default for Background {
    fn default() -> Self {
        Self {
            color: "#000000".to_string(),
            alpha: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Animation {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub kind: String,
    pub duration: i64,
}

impl Default for Animation {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: "fade-in".to_string(),
            duration: 200,
        }
    }
}

/// Free-form per-widget state buckets. Keys and values are widget-defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct States {
    pub default: Map<String, serde_json::Value>,
    pub recent: Map<String, serde_json::Value>,
    pub saved: Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Extra {
    pub debug: DebugSettings,
    pub subscriptions: Subscriptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    pub enabled: bool,
    pub log_level: i64,
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            log_level: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Subscriptions {
    pub on_time_tick: bool,
    pub on_app_change: bool,
    pub on_audio_update: bool,
    pub on_keybind: bool,
}
