//! Layer manifest polling.
//!
//! Every second the watcher rescans the two layer widget directories (never
//! the canonical root) and diffs each manifest's canonical JSON against the
//! previous cycle. Snapshots are keyed `layer:name`, so the same widget name
//! on both layers tracks independently. Cycles are strictly sequential: a
//! slow batch of subscribers delays the next scan rather than overlapping it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::hub::{Handler, SubscriptionHub};
use crate::layer::{Layer, LayerResolver};
use crate::manifest::WidgetManifest;
use crate::store::ManifestStore;

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
    Enabled,
    Disabled,
}

#[derive(Clone, Debug)]
pub struct ManifestChange {
    pub layer: Layer,
    pub widget: String,
    pub kind: ChangeKind,
    /// For `Deleted`, a name-only stub since the file is gone.
    pub manifest: WidgetManifest,
}

pub struct ChangeWatcher {
    store: ManifestStore,
    resolver: LayerResolver,
    snapshots: Mutex<HashMap<String, String>>,
    subs: SubscriptionHub<ManifestChange>,
}

impl ChangeWatcher {
    pub fn new(store: ManifestStore, resolver: LayerResolver) -> Self {
        Self {
            store,
            resolver,
            snapshots: Mutex::new(HashMap::new()),
            subs: SubscriptionHub::new("watcher"),
        }
    }

    /// Subscribe under a widget name, or `"*"` to receive every change.
    pub fn subscribe(&self, owner: impl Into<String>, handler: Handler<ManifestChange>) {
        self.subs.subscribe(owner, handler);
    }

    pub fn unsubscribe(&self, owner: &str) -> bool {
        self.subs.unsubscribe(owner)
    }

    pub fn set_enabled(&self, owner: &str, enabled: bool) -> bool {
        self.subs.set_enabled(owner, enabled)
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("manifest watcher started");
            loop {
                ticker.tick().await;
                self.poll_once().await;
            }
        })
    }

    /// One full scan-diff-dispatch cycle. Public so callers (and tests) can
    /// drive the watcher without the timer.
    pub async fn poll_once(&self) {
        let events = self.collect_changes();
        for change in events {
            debug!(
                layer = %change.layer,
                widget = %change.widget,
                kind = ?change.kind,
                "manifest change"
            );
            self.subs
                .notify(&[change.widget.as_str(), "*"], change.clone())
                .await;
        }
    }

    fn collect_changes(&self) -> Vec<ManifestChange> {
        let mut events = Vec::new();
        let mut seen = Vec::new();

        for layer in Layer::ALL {
            let root = self.resolver.layer_root(layer);
            if !root.exists() {
                continue;
            }
            for manifest in self.store.discover(Some(root)) {
                let key = format!("{}:{}", layer.name(), manifest.name);
                let snapshot = manifest.canonical_json();
                seen.push(key.clone());

                let previous = self.snapshots.lock().insert(key, snapshot.clone());
                match previous {
                    None => events.push(ManifestChange {
                        layer,
                        widget: manifest.name.clone(),
                        kind: ChangeKind::Created,
                        manifest,
                    }),
                    Some(prev) if prev == snapshot => {}
                    Some(prev) => {
                        let kind = classify_update(&prev, &manifest);
                        events.push(ManifestChange {
                            layer,
                            widget: manifest.name.clone(),
                            kind,
                            manifest,
                        });
                    }
                }
            }
        }

        // Anything snapshotted but no longer on disk was deleted.
        let mut snapshots = self.snapshots.lock();
        let gone: Vec<String> = snapshots
            .keys()
            .filter(|key| !seen.contains(key))
            .cloned()
            .collect();
        for key in gone {
            snapshots.remove(&key);
            let Some((layer_name, widget)) = key.split_once(':') else {
                continue;
            };
            let Some(layer) = Layer::parse(layer_name) else {
                warn!(%key, "dropping snapshot with unknown layer");
                continue;
            };
            events.push(ManifestChange {
                layer,
                widget: widget.to_string(),
                kind: ChangeKind::Deleted,
                manifest: WidgetManifest::named(widget),
            });
        }

        events
    }
}

/// An update that flips the enabled bit reports as Enabled/Disabled; any
/// other content change is a plain Updated.
fn classify_update(previous_snapshot: &str, current: &WidgetManifest) -> ChangeKind {
    let was_enabled = serde_json::from_str::<WidgetManifest>(previous_snapshot)
        .map(|m| m.enabled())
        .unwrap_or(false);
    let is_enabled = current.enabled();
    if was_enabled != is_enabled {
        if is_enabled {
            ChangeKind::Enabled
        } else {
            ChangeKind::Disabled
        }
    } else {
        ChangeKind::Updated
    }
}
