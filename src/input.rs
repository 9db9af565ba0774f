//! Keybind registration and dispatch.
//!
//! Widgets register normalized key combos; the OS-level hook lives outside
//! this crate and feeds pressed combos into [`KeybindService::dispatch`].
//! Combo-to-widget ownership is persisted to `keybinds.json` so bindings
//! survive restarts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::hub::{Handler, SubscriptionHub};

const KEYBINDS_FILE: &str = "keybinds.json";

/// Modifier order used by the canonical combo form.
const MODIFIERS: [&str; 4] = ["ctrl", "shift", "alt", "win"];

#[derive(Debug, Clone, Serialize)]
pub struct KeybindEvent {
    pub combo: String,
    pub timestamp_ms: i64,
}

pub struct KeybindService {
    subs: SubscriptionHub<KeybindEvent>,
    /// Normalized combo -> owning widget, persisted across restarts.
    owners: RwLock<HashMap<String, String>>,
    state_dir: Option<PathBuf>,
}

impl KeybindService {
    /// `state_dir` is where `keybinds.json` lives; `None` disables
    /// persistence (useful for tests and preview hosts).
    pub fn new(state_dir: Option<PathBuf>) -> Self {
        let service = Self {
            subs: SubscriptionHub::new("keybinds"),
            owners: RwLock::new(HashMap::new()),
            state_dir,
        };
        service.load_saved();
        service
    }

    /// Canonical combo form: lowercase, modifiers in a fixed order, the key
    /// last. `"Shift + Ctrl+P"` becomes `"ctrl+shift+p"`.
    pub fn normalize_combo(combo: &str) -> String {
        let parts: Vec<String> = combo
            .split('+')
            .map(|p| p.trim().to_ascii_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        let mut ordered = Vec::with_capacity(parts.len());
        for modifier in MODIFIERS {
            if parts.iter().any(|p| p == modifier) {
                ordered.push(modifier.to_string());
            }
        }
        for part in parts {
            if !MODIFIERS.contains(&part.as_str()) && !ordered.contains(&part) {
                ordered.push(part);
            }
        }
        ordered.join("+")
    }

    /// Bind a combo to a widget's handler. Rebinding an existing combo
    /// replaces the previous owner. Returns the normalized combo.
    pub fn register(
        &self,
        combo: &str,
        widget: impl Into<String>,
        handler: Handler<KeybindEvent>,
    ) -> String {
        let normalized = Self::normalize_combo(combo);
        let widget = widget.into();
        self.subs.subscribe(normalized.clone(), handler);
        self.owners
            .write()
            .insert(normalized.clone(), widget.clone());
        self.persist();
        info!(combo = %normalized, %widget, "registered keybind");
        normalized
    }

    /// Remove a binding. Returns whether it existed.
    pub fn unregister(&self, combo: &str) -> bool {
        let normalized = Self::normalize_combo(combo);
        let existed = self.subs.unsubscribe(&normalized);
        self.owners.write().remove(&normalized);
        if existed {
            self.persist();
            info!(combo = %normalized, "unregistered keybind");
        }
        existed
    }

    /// All bindings as normalized-combo -> widget.
    pub fn bindings(&self) -> HashMap<String, String> {
        self.owners.read().clone()
    }

    pub fn clear(&self) {
        let combos: Vec<String> = self.owners.read().keys().cloned().collect();
        for combo in combos {
            self.subs.unsubscribe(&combo);
        }
        self.owners.write().clear();
        self.persist();
        info!("cleared all keybinds");
    }

    /// Feed one pressed combo from the host hook. Returns per-handler
    /// results, empty when nothing is bound.
    pub async fn dispatch(&self, combo: &str) -> Vec<(String, anyhow::Result<()>)> {
        let normalized = Self::normalize_combo(combo);
        let event = KeybindEvent {
            combo: normalized.clone(),
            timestamp_ms: chrono::Local::now().timestamp_millis(),
        };
        self.subs.notify(&[normalized.as_str()], event).await
    }

    fn keybinds_path(&self) -> Option<PathBuf> {
        self.state_dir.as_ref().map(|d| d.join(KEYBINDS_FILE))
    }

    fn load_saved(&self) {
        let Some(path) = self.keybinds_path() else {
            return;
        };
        if !path.exists() {
            return;
        }
        match std::fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|s| Ok(serde_json::from_str::<HashMap<String, String>>(&s)?))
        {
            Ok(saved) => {
                let count = saved.len();
                *self.owners.write() = saved;
                info!(count, "loaded saved keybinds");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to load saved keybinds"),
        }
    }

    fn persist(&self) {
        let Some(path) = self.keybinds_path() else {
            return;
        };
        let owners = self.owners.read().clone();
        let json = match serde_json::to_string_pretty(&owners) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize keybinds");
                return;
            }
        };
        if let Err(e) = std::fs::write(&path, json) {
            warn!(path = %path.display(), error = %e, "failed to save keybinds");
        }
    }
}
