//! System audio broadcasting.
//!
//! The actual endpoint query lives behind [`AudioSource`] so the service can
//! run (and be tested) without a sound stack. The poll loop broadcasts only
//! on meaningful movement: volume drift beyond a small epsilon, or a mute
//! flip. Volume and mute changes fan out on separate hubs.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::hub::{Handler, SubscriptionHub};

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
const VOLUME_EPSILON: f32 = 0.01;

/// Raw reading from the audio endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioSample {
    /// Master volume in `0.0..=1.0`.
    pub volume: f32,
    pub muted: bool,
}

/// Where audio state comes from. Implementations wrap the platform mixer.
pub trait AudioSource: Send + Sync {
    fn sample(&self) -> AudioSample;
}

/// Source for hosts without a queryable mixer: half volume, never muted.
pub struct NullAudioSource;

impl AudioSource for NullAudioSource {
    fn sample(&self) -> AudioSample {
        AudioSample {
            volume: 0.5,
            muted: false,
        }
    }
}

/// Broadcast payload.
#[derive(Debug, Clone, Serialize)]
pub struct AudioInfo {
    pub volume: f32,
    pub muted: bool,
    pub timestamp_ms: i64,
}

impl AudioInfo {
    fn from_sample(sample: AudioSample) -> Self {
        Self {
            volume: sample.volume,
            muted: sample.muted,
            timestamp_ms: chrono::Local::now().timestamp_millis(),
        }
    }
}

pub struct AudioService {
    source: Arc<dyn AudioSource>,
    volume_subs: SubscriptionHub<AudioInfo>,
    mute_subs: SubscriptionHub<AudioInfo>,
    // Last broadcast state; volume starts out-of-range so the first poll
    // always reports.
    last: Mutex<AudioSample>,
}

impl AudioService {
    pub fn new(source: Arc<dyn AudioSource>) -> Self {
        Self {
            source,
            volume_subs: SubscriptionHub::new("audio.volume"),
            mute_subs: SubscriptionHub::new("audio.mute"),
            last: Mutex::new(AudioSample {
                volume: -1.0,
                muted: false,
            }),
        }
    }

    pub fn current(&self) -> AudioInfo {
        AudioInfo::from_sample(self.source.sample())
    }

    pub fn subscribe_volume(&self, owner: impl Into<String>, handler: Handler<AudioInfo>) {
        self.volume_subs.subscribe(owner, handler);
    }

    pub fn subscribe_mute(&self, owner: impl Into<String>, handler: Handler<AudioInfo>) {
        self.mute_subs.subscribe(owner, handler);
    }

    pub fn unsubscribe(&self, owner: &str) -> bool {
        let a = self.volume_subs.unsubscribe(owner);
        let b = self.mute_subs.unsubscribe(owner);
        a || b
    }

    pub fn set_enabled(&self, owner: &str, enabled: bool) -> bool {
        let a = self.volume_subs.set_enabled(owner, enabled);
        let b = self.mute_subs.set_enabled(owner, enabled);
        a || b
    }

    /// Compare one fresh sample against the last broadcast state and fan out
    /// whatever moved. Returns (volume_changed, mute_changed).
    pub async fn poll_once(&self) -> (bool, bool) {
        let sample = self.source.sample();
        let (volume_changed, mute_changed) = {
            let mut last = self.last.lock();
            let volume_changed = (sample.volume - last.volume).abs() > VOLUME_EPSILON;
            let mute_changed = sample.muted != last.muted;
            if volume_changed {
                last.volume = sample.volume;
            }
            if mute_changed {
                last.muted = sample.muted;
            }
            (volume_changed, mute_changed)
        };

        if volume_changed {
            self.volume_subs
                .broadcast(AudioInfo::from_sample(sample))
                .await;
        }
        if mute_changed {
            self.mute_subs
                .broadcast(AudioInfo::from_sample(sample))
                .await;
        }
        (volume_changed, mute_changed)
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("audio service started");
            loop {
                ticker.tick().await;
                self.poll_once().await;
            }
        })
    }
}
