//! Display reconciliation.
//!
//! A display host (the embedded browser shell on each layer) runs this loop
//! to mirror server-side manifest state into mounted DOM: enabled widgets get
//! their style, root element, and scripts mounted; disabled ones get torn
//! down. Every operation is idempotent so a cycle can always run from
//! scratch, and per-widget failures never stop the rest of the batch.
//!
//! The DOM itself sits behind [`DisplaySink`]; manifests come from a
//! [`ManifestFeed`], usually [`HttpFeed`] pointed at the engine.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::layer::{Layer, LAYER_HEADER};
use crate::manifest::WidgetManifest;

pub const CYCLE_INTERVAL: Duration = Duration::from_secs(1);

/// Source of manifest state to reconcile against.
pub trait ManifestFeed: Send {
    /// All widgets visible to this display.
    fn list(&self) -> BoxFuture<'_, anyhow::Result<Vec<WidgetManifest>>>;
    /// The layer's own manifest for one widget, `None` when the layer has no
    /// divergent copy.
    fn layer_manifest<'a>(
        &'a self,
        widget: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<WidgetManifest>>>;
}

/// The mounted-widget surface. Mount calls may be repeated; the `*_mounted`
/// queries let the reconciler skip work that is already done.
pub trait DisplaySink: Send {
    fn style_mounted(&self, widget: &str) -> bool;
    fn mount_style(&mut self, widget: &str) -> anyhow::Result<()>;

    /// Root element exists and is populated.
    fn root_present(&self, widget: &str) -> bool;
    fn mount_root(&mut self, widget: &str, manifest: &WidgetManifest) -> anyhow::Result<()>;

    fn scripts_mounted(&self, widget: &str) -> bool;
    fn mount_scripts(&mut self, widget: &str, sources: &[String]) -> anyhow::Result<()>;

    /// Widget init hook; called at most once per mount.
    fn invoke_init(&mut self, manifest: &WidgetManifest) -> anyhow::Result<()>;

    /// Remove root, scripts, and styles. Must tolerate nothing being
    /// mounted.
    fn unmount(&mut self, widget: &str) -> anyhow::Result<()>;
}

pub struct Reconciler<F, S> {
    feed: F,
    sink: S,
    /// Last manifest applied per widget; deep equality gates re-application.
    last_seen: HashMap<String, WidgetManifest>,
    /// Widgets already torn down, so repeated disable cycles are no-ops.
    removed: HashSet<String>,
    /// Widgets whose init hook already ran for the current mount.
    initialized: HashSet<String>,
}

impl<F: ManifestFeed, S: DisplaySink> Reconciler<F, S> {
    pub fn new(feed: F, sink: S) -> Self {
        Self {
            feed,
            sink,
            last_seen: HashMap::new(),
            removed: HashSet::new(),
            initialized: HashSet::new(),
        }
    }

    /// One reconciliation pass. Never panics, never aborts early: a widget
    /// that fails to apply is logged and retried next cycle because its
    /// `last_seen` entry is not advanced.
    pub async fn run_cycle(&mut self) {
        let listed = match self.feed.list().await {
            Ok(listed) => listed,
            Err(e) => {
                warn!(error = %e, "widget list fetch failed");
                return;
            }
        };

        for entry in listed {
            let name = entry.name.clone();
            let manifest = match self.feed.layer_manifest(&name).await {
                Ok(Some(layer_copy)) => layer_copy,
                Ok(None) => entry,
                Err(e) => {
                    warn!(widget = %name, error = %e, "layer manifest fetch failed");
                    continue;
                }
            };

            if self.last_seen.get(&name) == Some(&manifest) {
                continue;
            }
            match self.apply(&name, &manifest) {
                Ok(()) => {
                    self.last_seen.insert(name, manifest);
                }
                Err(e) => warn!(widget = %name, error = %e, "reconcile failed"),
            }
        }
    }

    fn apply(&mut self, name: &str, manifest: &WidgetManifest) -> anyhow::Result<()> {
        if manifest.enabled() {
            self.load(name, manifest)
        } else {
            self.unload(name)
        }
    }

    /// Mount whatever is missing for an enabled widget. Safe to call for an
    /// already-mounted widget.
    pub fn load(&mut self, name: &str, manifest: &WidgetManifest) -> anyhow::Result<()> {
        self.removed.remove(name);

        if !self.sink.style_mounted(name) {
            self.sink.mount_style(name)?;
        }
        if !self.sink.root_present(name) {
            self.sink.mount_root(name, manifest)?;
            // Fresh root means the widget must init again.
            self.initialized.remove(name);
        }
        let sources = manifest.required_settings.files.js.sources();
        if !sources.is_empty() && !self.sink.scripts_mounted(name) {
            self.sink.mount_scripts(name, &sources)?;
        }
        if !self.initialized.contains(name) {
            // Mark before invoking so a re-entrant cycle can't double-init;
            // roll back on failure so the hook is retried.
            self.initialized.insert(name.to_string());
            if let Err(e) = self.sink.invoke_init(manifest) {
                self.initialized.remove(name);
                return Err(e);
            }
            info!(widget = %name, "widget mounted");
        }
        Ok(())
    }

    /// Tear a widget down. Calling again for an already-removed widget does
    /// nothing.
    pub fn unload(&mut self, name: &str) -> anyhow::Result<()> {
        if self.removed.contains(name) {
            debug!(widget = %name, "already unloaded");
            return Ok(());
        }
        self.removed.insert(name.to_string());
        self.initialized.remove(name);
        self.sink.unmount(name)?;
        info!(widget = %name, "widget unmounted");
        Ok(())
    }

    pub fn spawn(mut self) -> tokio::task::JoinHandle<()>
    where
        F: 'static,
        S: 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CYCLE_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("reconciler started");
            loop {
                ticker.tick().await;
                // Cycles are sequential: the next tick waits for this whole
                // pass, slow DOM work included.
                self.run_cycle().await;
            }
        })
    }
}

/// Feed backed by the engine's HTTP API, pinned to one layer.
pub struct HttpFeed {
    client: reqwest::Client,
    base_url: String,
    layer: Layer,
}

impl HttpFeed {
    pub fn new(base_url: impl Into<String>, layer: Layer) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            layer,
        }
    }
}

impl ManifestFeed for HttpFeed {
    fn list(&self) -> BoxFuture<'_, anyhow::Result<Vec<WidgetManifest>>> {
        Box::pin(async move {
            let url = format!("{}/api/widgets", self.base_url);
            let response = self
                .client
                .get(&url)
                .header(LAYER_HEADER, self.layer.name())
                .send()
                .await?
                .error_for_status()?;
            Ok(response.json().await?)
        })
    }

    fn layer_manifest<'a>(
        &'a self,
        widget: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<WidgetManifest>>> {
        Box::pin(async move {
            let url = format!("{}/{}/{}/manifest.json", self.base_url, self.layer, widget);
            let response = self.client.get(&url).send().await?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let text = response.error_for_status()?.text().await?;
            Ok(Some(crate::store::parse_lenient(&text)?))
        })
    }
}
