//! Dot-path manifest patching.
//!
//! Property paths like `widget_features.display.position.x` are resolved
//! against a static field registry rather than runtime reflection: every
//! struct node in the manifest tree has a table of its fields, each with a
//! canonical wire name and a value kind. Lookup tolerates casing differences
//! (`zindex`, `ZIndex`, `z_index` all land on `zIndex`), and incoming values
//! are coerced to the field's kind so a client sending `"150"` for an integer
//! field still produces an integer on disk.
//!
//! `unique_config` and the `states.*` buckets are free-form: past those
//! boundaries any path segment is accepted and intermediate objects are
//! created on demand.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::manifest::WidgetManifest;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("empty property path")]
    EmptyPath,
    #[error("property not found: {segment}")]
    PropertyNotFound { segment: String },
    #[error("cannot traverse through {segment}: not an object")]
    NotAnObject { segment: String },
    #[error("invalid value for {segment}: expected {expected}")]
    InvalidValue {
        segment: String,
        expected: &'static str,
    },
    #[error("manifest rebuild failed: {0}")]
    Rebuild(#[from] serde_json::Error),
}

/// Identifies a struct node in the manifest tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Node {
    Manifest,
    RequiredSettings,
    Permissions,
    Files,
    WidgetFeatures,
    Behavior,
    Lifecycle,
    Display,
    Position,
    Size,
    Styling,
    Font,
    Border,
    Background,
    Animation,
    States,
    Extra,
    DebugSettings,
    Subscriptions,
}

/// What a field holds, which drives both coercion and traversal.
#[derive(Clone, Copy, Debug)]
pub enum Kind {
    Bool,
    Int,
    Float,
    Str,
    OptStr,
    StrOrList,
    /// Nested typed struct.
    Object(Node),
    /// Free-form JSON container; traversal past it is unchecked.
    Free,
}

pub struct Field {
    pub name: &'static str,
    pub kind: Kind,
}

const fn f(name: &'static str, kind: Kind) -> Field {
    Field { name, kind }
}

pub fn fields(node: Node) -> &'static [Field] {
    use Kind::*;
    use Node as N;

    static MANIFEST: &[Field] = &[
        f("name", Str),
        f("id", Str),
        f("description", Str),
        f("original_author", OptStr),
        f("contributor", OptStr),
        f("version", Str),
        f("required_settings", Object(N::RequiredSettings)),
        f("widget_features", Object(N::WidgetFeatures)),
        f("unique_config", Free),
        f("states", Object(N::States)),
        f("extra", Object(N::Extra)),
    ];
    static REQUIRED_SETTINGS: &[Field] = &[
        f("permissions", Object(N::Permissions)),
        f("files", Object(N::Files)),
    ];
    static PERMISSIONS: &[Field] = &[
        f("keyboard", Bool),
        f("filesystem", Bool),
        f("network", Bool),
        f("overlay", Bool),
        f("exclusiveHotkeys", Bool),
    ];
    static FILES: &[Field] = &[
        f("html", Str),
        f("css", Str),
        f("js", StrOrList),
        f("settings", OptStr),
    ];
    static WIDGET_FEATURES: &[Field] = &[
        f("behavior", Object(N::Behavior)),
        f("display", Object(N::Display)),
        f("styling", Object(N::Styling)),
    ];
    static BEHAVIOR: &[Field] = &[
        f("enabled", Bool),
        f("draggable", Bool),
        f("clickThrough", Bool),
        f("lifecycle", Object(N::Lifecycle)),
    ];
    static LIFECYCLE: &[Field] = &[
        f("onInit", Bool),
        f("onDestroy", Bool),
        f("onSettingsUpdate", Bool),
        f("onFocus", Bool),
        f("onBlur", Bool),
        f("onResize", Bool),
    ];
    static DISPLAY: &[Field] = &[
        f("position", Object(N::Position)),
        f("size", Object(N::Size)),
    ];
    static POSITION: &[Field] = &[f("x", Int), f("y", Int), f("zIndex", Int)];
    static SIZE: &[Field] = &[
        f("width", Int),
        f("height", Int),
        f("scale", Float),
        f("resizable", Bool),
    ];
    static STYLING: &[Field] = &[
        f("useRootVariables", Bool),
        f("font", Object(N::Font)),
        f("border", Object(N::Border)),
        f("background", Object(N::Background)),
        f("animation", Object(N::Animation)),
    ];
    static FONT: &[Field] = &[
        f("family", Str),
        f("size", Str),
        f("color", Str),
        f("widgetScaling", Bool),
    ];
    static BORDER: &[Field] = &[
        f("style", Str),
        f("width", Str),
        f("color", Str),
        f("radius", OptStr),
    ];
    static BACKGROUND: &[Field] = &[f("color", Str), f("alpha", Float)];
    static ANIMATION: &[Field] = &[f("enabled", Bool), f("type", Str), f("duration", Int)];
    static STATES: &[Field] = &[f("default", Free), f("recent", Free), f("saved", Free)];
    static EXTRA: &[Field] = &[
        f("debug", Object(N::DebugSettings)),
        f("subscriptions", Object(N::Subscriptions)),
    ];
    static DEBUG_SETTINGS: &[Field] = &[f("enabled", Bool), f("log_level", Int)];
    static SUBSCRIPTIONS: &[Field] = &[
        f("on_time_tick", Bool),
        f("on_app_change", Bool),
        f("on_audio_update", Bool),
        f("on_keybind", Bool),
    ];

    match node {
        N::Manifest => MANIFEST,
        N::RequiredSettings => REQUIRED_SETTINGS,
        N::Permissions => PERMISSIONS,
        N::Files => FILES,
        N::WidgetFeatures => WIDGET_FEATURES,
        N::Behavior => BEHAVIOR,
        N::Lifecycle => LIFECYCLE,
        N::Display => DISPLAY,
        N::Position => POSITION,
        N::Size => SIZE,
        N::Styling => STYLING,
        N::Font => FONT,
        N::Border => BORDER,
        N::Background => BACKGROUND,
        N::Animation => ANIMATION,
        N::States => STATES,
        N::Extra => EXTRA,
        N::DebugSettings => DEBUG_SETTINGS,
        N::Subscriptions => SUBSCRIPTIONS,
    }
}

/// Casing-insensitive comparison key: lowercased with `_` and `-` stripped,
/// so `z_index`, `zIndex` and `ZINDEX` all collapse to `zindex`.
fn fold(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Resolve a path segment against a node's field table: exact wire name
/// first, then the folded form.
pub fn resolve(node: Node, key: &str) -> Option<&'static Field> {
    let table = fields(node);
    if let Some(field) = table.iter().find(|f| f.name == key) {
        return Some(field);
    }
    let folded = fold(key);
    table.iter().find(|f| fold(f.name) == folded)
}

/// Rewrite object keys in `value` to their canonical wire names, recursively
/// through typed nodes. Unknown keys and free-form containers are left
/// untouched. This is what makes manifest parsing casing-tolerant.
pub fn normalize_keys(value: &mut Value, node: Node) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    let keys: Vec<String> = obj.keys().cloned().collect();
    for key in keys {
        let Some(field) = resolve(node, &key) else {
            continue;
        };
        let Some(mut v) = obj.remove(&key) else {
            continue;
        };
        if let Kind::Object(next) = field.kind {
            normalize_keys(&mut v, next);
        }
        obj.insert(field.name.to_string(), v);
    }
}

/// Apply a dot-path update to a manifest. The manifest is serialized to a
/// JSON tree, patched, and rebuilt, so serde defaults fill anything a
/// replaced sub-object leaves out.
pub fn patch_manifest(
    manifest: &mut WidgetManifest,
    path: &str,
    value: &Value,
) -> Result<(), PatchError> {
    let mut root = serde_json::to_value(&*manifest)?;
    patch_value(&mut root, path, value)?;
    *manifest = serde_json::from_value(root)?;
    Ok(())
}

/// Apply a dot-path update to a manifest JSON tree rooted at the manifest
/// node.
pub fn patch_value(root: &mut Value, path: &str, new_value: &Value) -> Result<(), PatchError> {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(PatchError::EmptyPath);
    }

    let mut node = Some(Node::Manifest);
    let mut current = root;

    for (i, seg) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        let obj = current
            .as_object_mut()
            .ok_or_else(|| PatchError::NotAnObject {
                segment: seg.to_string(),
            })?;

        match node {
            Some(n) => {
                let field = resolve(n, seg).ok_or_else(|| PatchError::PropertyNotFound {
                    segment: seg.to_string(),
                })?;
                if last {
                    let coerced = coerce(field, new_value)?;
                    obj.insert(field.name.to_string(), coerced);
                    return Ok(());
                }
                match field.kind {
                    Kind::Object(next) => {
                        let entry = obj
                            .entry(field.name.to_string())
                            .or_insert_with(|| Value::Object(Map::new()));
                        if !entry.is_object() {
                            *entry = Value::Object(Map::new());
                        }
                        current = entry;
                        node = Some(next);
                    }
                    Kind::Free => {
                        let entry = obj
                            .entry(field.name.to_string())
                            .or_insert_with(|| Value::Object(Map::new()));
                        if !entry.is_object() {
                            *entry = Value::Object(Map::new());
                        }
                        current = entry;
                        node = None;
                    }
                    // Scalar field with path segments left over.
                    _ => {
                        return Err(PatchError::PropertyNotFound {
                            segment: segments[i + 1].to_string(),
                        });
                    }
                }
            }
            // Inside a free-form container: accept any key, create
            // intermediate objects on demand.
            None => {
                if last {
                    obj.insert(seg.to_string(), new_value.clone());
                    return Ok(());
                }
                let entry = obj
                    .entry(seg.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !entry.is_object() {
                    return Err(PatchError::NotAnObject {
                        segment: seg.to_string(),
                    });
                }
                current = entry;
            }
        }
    }

    unreachable!("loop returns on the last segment")
}

fn coerce(field: &Field, value: &Value) -> Result<Value, PatchError> {
    let invalid = |expected: &'static str| PatchError::InvalidValue {
        segment: field.name.to_string(),
        expected,
    };

    match field.kind {
        Kind::Bool => coerce_bool(value).ok_or_else(|| invalid("boolean")),
        Kind::Int => coerce_int(value).ok_or_else(|| invalid("integer")),
        Kind::Float => coerce_float(value).ok_or_else(|| invalid("number")),
        Kind::Str => coerce_string(value).ok_or_else(|| invalid("string")),
        Kind::OptStr => {
            if value.is_null() {
                Ok(Value::Null)
            } else {
                coerce_string(value).ok_or_else(|| invalid("string or null"))
            }
        }
        Kind::StrOrList => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Array(items) if items.iter().all(Value::is_string) => Ok(value.clone()),
            _ => Err(invalid("string or list of strings")),
        },
        Kind::Object(n) => match value {
            Value::Object(_) => {
                let mut v = value.clone();
                normalize_keys(&mut v, n);
                Ok(v)
            }
            _ => Err(invalid("object")),
        },
        Kind::Free => Ok(value.clone()),
    }
}

fn coerce_bool(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(b) => Some(Value::Bool(*b)),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" => Some(Value::Bool(true)),
            "false" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        Value::Number(n) => n.as_f64().map(|f| Value::Bool(f != 0.0)),
        _ => None,
    }
}

fn coerce_int(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Value::from(i))
            } else {
                n.as_f64().map(|f| Value::from(f.round() as i64))
            }
        }
        Value::String(s) => {
            if let Ok(i) = s.trim().parse::<i64>() {
                Some(Value::from(i))
            } else if let Ok(f) = s.trim().parse::<f64>() {
                Some(Value::from(f.round() as i64))
            } else {
                None
            }
        }
        Value::Bool(b) => Some(Value::from(*b as i64)),
        _ => None,
    }
}

fn coerce_float(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) => n.as_f64().map(Value::from),
        Value::String(s) => s.trim().parse::<f64>().ok().map(Value::from),
        _ => None,
    }
}

fn coerce_string(value: &Value) -> Option<Value> {
    match value {
        Value::String(s) => Some(Value::String(s.clone())),
        Value::Number(n) => Some(Value::String(n.to_string())),
        Value::Bool(b) => Some(Value::String(b.to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn patch_integer_from_string_stays_integer() {
        let mut m = WidgetManifest::named("clock");
        patch_manifest(&mut m, "widget_features.display.position.x", &json!("150")).unwrap();
        assert_eq!(m.widget_features.display.position.x, 150);

        let json = m.canonical_json();
        assert!(json.contains("\"x\": 150"));
        assert!(!json.contains("\"x\": \"150\""));
    }

    #[test]
    fn patch_resolves_casing_variants() {
        let mut m = WidgetManifest::named("clock");
        patch_manifest(&mut m, "WIDGET_FEATURES.Display.Position.z_index", &json!(5)).unwrap();
        assert_eq!(m.widget_features.display.position.z_index, 5);

        patch_manifest(&mut m, "widgetFeatures.display.position.zindex", &json!(7)).unwrap();
        assert_eq!(m.widget_features.display.position.z_index, 7);
    }

    #[test]
    fn patch_bool_from_string() {
        let mut m = WidgetManifest::named("clock");
        patch_manifest(&mut m, "widget_features.behavior.enabled", &json!("false")).unwrap();
        assert!(!m.widget_features.behavior.enabled);
    }

    #[test]
    fn patch_float_coercion() {
        let mut m = WidgetManifest::named("clock");
        patch_manifest(&mut m, "widget_features.display.size.scale", &json!("1.5")).unwrap();
        assert_eq!(m.widget_features.display.size.scale, 1.5);
    }

    #[test]
    fn unknown_segment_is_named_in_the_error() {
        let mut m = WidgetManifest::named("clock");
        let err = patch_manifest(&mut m, "widget_features.nonsense.x", &json!(1)).unwrap_err();
        match err {
            PatchError::PropertyNotFound { segment } => assert_eq!(segment, "nonsense"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn traversing_through_a_scalar_fails() {
        let mut m = WidgetManifest::named("clock");
        let err = patch_manifest(&mut m, "name.deeper", &json!(1)).unwrap_err();
        match err {
            PatchError::PropertyNotFound { segment } => assert_eq!(segment, "deeper"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn free_form_path_creates_intermediates() {
        let mut m = WidgetManifest::named("weather");
        patch_manifest(&mut m, "unique_config.city.name", &json!("Berlin")).unwrap();
        patch_manifest(&mut m, "unique_config.city.lat", &json!(52.52)).unwrap();

        let city = m.unique_config.get("city").unwrap();
        assert_eq!(city["name"], json!("Berlin"));
        assert_eq!(city["lat"], json!(52.52));
    }

    #[test]
    fn states_buckets_are_free_form() {
        let mut m = WidgetManifest::named("notes");
        patch_manifest(&mut m, "states.recent.lastOpened", &json!("today")).unwrap();
        assert_eq!(m.states.recent.get("lastOpened"), Some(&json!("today")));
    }

    #[test]
    fn replacing_a_sub_object_fills_defaults() {
        let mut m = WidgetManifest::named("clock");
        patch_manifest(
            &mut m,
            "widget_features.display.position",
            &json!({"x": 10, "y": 20}),
        )
        .unwrap();
        assert_eq!(m.widget_features.display.position.x, 10);
        assert_eq!(m.widget_features.display.position.y, 20);
        // zIndex was not in the replacement object, so the default applies.
        assert_eq!(m.widget_features.display.position.z_index, 100);
    }

    #[test]
    fn empty_path_rejected() {
        let mut m = WidgetManifest::named("clock");
        assert!(matches!(
            patch_manifest(&mut m, "", &json!(1)),
            Err(PatchError::EmptyPath)
        ));
    }

    #[test]
    fn normalize_keys_makes_parsing_casing_tolerant() {
        let mut v: Value = serde_json::from_str(
            r#"{"Name": "clock", "widgetFeatures": {"Behavior": {"Enabled": false}}}"#,
        )
        .unwrap();
        normalize_keys(&mut v, Node::Manifest);
        let m: WidgetManifest = serde_json::from_value(v).unwrap();
        assert_eq!(m.name, "clock");
        assert!(!m.widget_features.behavior.enabled);
    }
}
