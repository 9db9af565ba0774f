//! widgetd - desktop widget engine.
//!
//! Hosts HTML/CSS/JS widgets for two presentation layers (desktop background
//! and always-on-top overlay). The canonical widgets directory is the source
//! of truth; each layer lazily materializes its own manifest copy the first
//! time it diverges. An HTTP API serves manifests and assets, a polling
//! watcher turns file changes into typed events, and small broadcast
//! services push time and audio state to subscribed widgets.

pub mod api;
pub mod audio;
pub mod clock;
pub mod config;
pub mod hub;
pub mod input;
pub mod layer;
pub mod manifest;
pub mod patch;
pub mod reconcile;
pub mod store;
pub mod watcher;
