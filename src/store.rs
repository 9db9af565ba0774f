//! Manifest persistence.
//!
//! Widgets live as directories under a root; each carries a `Manifest.json`.
//! Loads are lenient (comments and trailing commas tolerated, keys matched
//! case-insensitively); saves are atomic (temp file + rename, with a
//! copy-and-delete fallback for cross-device renames) and retried on IO
//! failure. A save whose content already matches what is on disk is a no-op.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::manifest::WidgetManifest;
use crate::patch;

pub const MANIFEST_FILE: &str = "Manifest.json";

const SAVE_ATTEMPTS: u32 = 8;
const SAVE_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("widget not found: {widget}")]
    NotFound { widget: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid manifest at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to save manifest for {widget}: {source}")]
    SaveFailed {
        widget: String,
        #[source]
        source: io::Error,
    },
}

/// Whether a save touched the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Written,
    Unchanged,
}

/// Thread-safe manifest store rooted at the canonical widgets directory.
///
/// Handles to the store are cheap clones; the per-path lock map serializes
/// readers and writers of the same file while leaving distinct widgets
/// independent.
#[derive(Clone)]
pub struct ManifestStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    canonical_root: PathBuf,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    cache: RwLock<HashMap<String, WidgetManifest>>,
}

impl ManifestStore {
    pub fn new(canonical_root: impl Into<PathBuf>) -> Self {
        let canonical_root = canonical_root.into();
        if let Err(e) = std::fs::create_dir_all(&canonical_root) {
            warn!(
                root = %canonical_root.display(),
                error = %e,
                "could not create widgets root"
            );
        }
        Self {
            inner: Arc::new(StoreInner {
                canonical_root,
                locks: Mutex::new(HashMap::new()),
                cache: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn canonical_root(&self) -> &Path {
        &self.inner.canonical_root
    }

    /// Scan a root for widget directories carrying a manifest. Unreadable
    /// manifests are logged and skipped, never fatal. Results are sorted by
    /// name for a stable listing.
    pub fn discover(&self, root: Option<&Path>) -> Vec<WidgetManifest> {
        let root = root.unwrap_or(&self.inner.canonical_root);
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "cannot read widgets root");
                return Vec::new();
            }
        };

        let mut widgets = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() || !path.join(MANIFEST_FILE).exists() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
                continue;
            };
            match self.load(&name, Some(root)) {
                Ok(manifest) => widgets.push(manifest),
                Err(e) => {
                    warn!(widget = %name, error = %e, "skipping widget with unreadable manifest")
                }
            }
        }
        widgets.sort_by(|a, b| a.name.cmp(&b.name));
        widgets
    }

    /// Load one widget's manifest from `root` (canonical when `None`). The
    /// directory name is authoritative for the widget's identity, so the
    /// loaded manifest's `name` is forced to it.
    pub fn load(&self, widget: &str, root: Option<&Path>) -> Result<WidgetManifest, StoreError> {
        let root = root.unwrap_or(&self.inner.canonical_root);
        let path = root.join(widget).join(MANIFEST_FILE);
        if !path.exists() {
            return Err(StoreError::NotFound {
                widget: widget.to_string(),
            });
        }

        let lock = self.path_lock(&path);
        let contents = {
            let _guard = lock.lock();
            std::fs::read_to_string(&path).map_err(|e| StoreError::Io {
                path: path.clone(),
                source: e,
            })?
        };

        let mut manifest = parse_lenient(&contents).map_err(|e| StoreError::Parse {
            path: path.clone(),
            source: e,
        })?;
        manifest.name = widget.to_string();

        self.inner
            .cache
            .write()
            .insert(widget.to_string(), manifest.clone());
        Ok(manifest)
    }

    /// Persist a manifest under `root` (canonical when `None`).
    ///
    /// If the file already holds content that parses to an equal canonical
    /// form, nothing is written and `Unchanged` is returned, so watcher
    /// snapshots don't churn. The existence check and the write are two
    /// separate critical sections; an external editor racing between them
    /// can still win, which is accepted (an ETag layer would lose to plain
    /// file replacement just the same).
    pub fn save(
        &self,
        widget: &str,
        manifest: &WidgetManifest,
        root: Option<&Path>,
    ) -> Result<SaveOutcome, StoreError> {
        let root = root.unwrap_or(&self.inner.canonical_root);
        let folder = root.join(widget);
        std::fs::create_dir_all(&folder).map_err(|e| StoreError::Io {
            path: folder.clone(),
            source: e,
        })?;
        let target = folder.join(MANIFEST_FILE);
        let json = manifest.canonical_json();
        let lock = self.path_lock(&target);

        {
            let _guard = lock.lock();
            if target.exists() {
                if let Ok(existing) = std::fs::read_to_string(&target) {
                    if let Ok(current) = parse_lenient(&existing) {
                        if current.canonical_json() == json {
                            debug!(widget, "manifest unchanged, skipping write");
                            self.inner
                                .cache
                                .write()
                                .insert(widget.to_string(), manifest.clone());
                            return Ok(SaveOutcome::Unchanged);
                        }
                    }
                }
            }
        }

        let mut last_err = io::Error::other("no write attempted");
        for attempt in 1..=SAVE_ATTEMPTS {
            let result = {
                let _guard = lock.lock();
                write_atomic(&target, &json)
            };
            match result {
                Ok(()) => {
                    self.inner
                        .cache
                        .write()
                        .insert(widget.to_string(), manifest.clone());
                    info!(widget, path = %target.display(), "manifest saved");
                    return Ok(SaveOutcome::Written);
                }
                Err(e) => {
                    warn!(widget, attempt, error = %e, "manifest write failed");
                    last_err = e;
                    if attempt < SAVE_ATTEMPTS {
                        std::thread::sleep(SAVE_BACKOFF * attempt);
                    }
                }
            }
        }

        Err(StoreError::SaveFailed {
            widget: widget.to_string(),
            source: last_err,
        })
    }

    /// Last successfully loaded or saved manifest for a widget, if any.
    pub fn cached(&self, widget: &str) -> Option<WidgetManifest> {
        self.inner.cache.read().get(widget).cloned()
    }

    fn path_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.inner.locks.lock();
        locks.entry(path.to_path_buf()).or_default().clone()
    }
}

/// Parse manifest text with JSONC leniency and casing-tolerant keys.
pub fn parse_lenient(contents: &str) -> Result<WidgetManifest, serde_json::Error> {
    let cleaned = strip_jsonc(contents);
    let mut value: serde_json::Value = serde_json::from_str(&cleaned)?;
    patch::normalize_keys(&mut value, patch::Node::Manifest);
    serde_json::from_value(value)
}

/// Temp-file write followed by rename. Rename can fail across filesystems,
/// in which case the temp file is copied over the target and removed.
fn write_atomic(target: &Path, contents: &str) -> io::Result<()> {
    let tmp = target.with_extension("json.tmp");
    std::fs::write(&tmp, contents)?;
    match std::fs::rename(&tmp, target) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(&tmp, target)?;
            let _ = std::fs::remove_file(&tmp);
            Ok(())
        }
    }
}

/// Remove `//` and `/* */` comments plus trailing commas, leaving string
/// literals untouched.
pub fn strip_jsonc(input: &str) -> String {
    let without_comments = strip_comments(input);
    strip_trailing_commas(&without_comments)
}

fn strip_comments(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    let mut in_string = false;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            out.push(b);
            if b == b'\\' && i + 1 < bytes.len() {
                out.push(bytes[i + 1]);
                i += 2;
                continue;
            }
            if b == b'"' {
                in_string = false;
            }
            i += 1;
        } else if b == b'"' {
            in_string = true;
            out.push(b);
            i += 1;
        } else if b == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'/' {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
        } else if b == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'*' {
            i += 2;
            while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                i += 1;
            }
            i = (i + 2).min(bytes.len());
        } else {
            out.push(b);
            i += 1;
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn strip_trailing_commas(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    let mut in_string = false;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            out.push(b);
            if b == b'\\' && i + 1 < bytes.len() {
                out.push(bytes[i + 1]);
                i += 2;
                continue;
            }
            if b == b'"' {
                in_string = false;
            }
            i += 1;
        } else if b == b'"' {
            in_string = true;
            out.push(b);
            i += 1;
        } else if b == b',' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            if j < bytes.len() && (bytes[j] == b'}' || bytes[j] == b']') {
                // Drop the comma, keep the whitespace.
                i += 1;
            } else {
                out.push(b);
                i += 1;
            }
        } else {
            out.push(b);
            i += 1;
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}
