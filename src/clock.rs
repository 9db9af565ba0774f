//! Time broadcasting.
//!
//! Three cadences, each with its own hub: a 100ms tick for smooth clock
//! widgets, a 1s beat, and a 1m beat for calendar-style widgets that don't
//! want to wake up every second.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Local, Timelike};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::hub::{Handler, SubscriptionHub};

pub const TICK_INTERVAL: Duration = Duration::from_millis(100);
pub const SECOND_INTERVAL: Duration = Duration::from_secs(1);
pub const MINUTE_INTERVAL: Duration = Duration::from_secs(60);

/// Snapshot of the local wall clock.
#[derive(Debug, Clone, Serialize)]
pub struct TimeInfo {
    pub unix: i64,
    pub unix_ms: i64,
    pub formatted_24h: String,
    pub formatted_12h: String,
    pub date: String,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub millisecond: u32,
    pub day: u32,
    pub month: u32,
    pub year: i32,
}

impl TimeInfo {
    pub fn now() -> Self {
        let now = Local::now();
        Self {
            unix: now.timestamp(),
            unix_ms: now.timestamp_millis(),
            formatted_24h: now.format("%H:%M:%S").to_string(),
            formatted_12h: now.format("%I:%M:%S %p").to_string(),
            date: now.format("%Y-%m-%d").to_string(),
            hour: now.hour(),
            minute: now.minute(),
            second: now.second(),
            millisecond: now.timestamp_subsec_millis(),
            day: now.day(),
            month: now.month(),
            year: now.year(),
        }
    }
}

pub struct TimeService {
    tick: SubscriptionHub<TimeInfo>,
    second: SubscriptionHub<TimeInfo>,
    minute: SubscriptionHub<TimeInfo>,
}

impl TimeService {
    pub fn new() -> Self {
        Self {
            tick: SubscriptionHub::new("time.tick"),
            second: SubscriptionHub::new("time.second"),
            minute: SubscriptionHub::new("time.minute"),
        }
    }

    pub fn current(&self) -> TimeInfo {
        TimeInfo::now()
    }

    pub fn subscribe_tick(&self, owner: impl Into<String>, handler: Handler<TimeInfo>) {
        self.tick.subscribe(owner, handler);
    }

    pub fn subscribe_second(&self, owner: impl Into<String>, handler: Handler<TimeInfo>) {
        self.second.subscribe(owner, handler);
    }

    pub fn subscribe_minute(&self, owner: impl Into<String>, handler: Handler<TimeInfo>) {
        self.minute.subscribe(owner, handler);
    }

    /// Drop a subscriber from every cadence. Returns whether any existed.
    pub fn unsubscribe(&self, owner: &str) -> bool {
        let a = self.tick.unsubscribe(owner);
        let b = self.second.unsubscribe(owner);
        let c = self.minute.unsubscribe(owner);
        a || b || c
    }

    pub fn set_enabled(&self, owner: &str, enabled: bool) -> bool {
        let a = self.tick.set_enabled(owner, enabled);
        let b = self.second.set_enabled(owner, enabled);
        let c = self.minute.set_enabled(owner, enabled);
        a || b || c
    }

    pub fn spawn(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        info!("time service started");
        vec![
            Self::cadence(self.clone(), TICK_INTERVAL, |s| &s.tick),
            Self::cadence(self.clone(), SECOND_INTERVAL, |s| &s.second),
            Self::cadence(self, MINUTE_INTERVAL, |s| &s.minute),
        ]
    }

    fn cadence(
        service: Arc<Self>,
        interval: Duration,
        hub: fn(&TimeService) -> &SubscriptionHub<TimeInfo>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                hub(&service).broadcast(TimeInfo::now()).await;
            }
        })
    }
}

impl Default for TimeService {
    fn default() -> Self {
        Self::new()
    }
}
