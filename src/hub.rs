//! Generic subscription fan-out.
//!
//! A hub holds named subscriptions to one event type. Dispatch runs every
//! enabled handler concurrently, waits for all of them, and returns the
//! per-handler results so callers can see which subscriber failed instead of
//! one panicking handler poisoning the rest.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use parking_lot::RwLock;
use tracing::{debug, warn};

/// Boxed async event handler. Errors are collected, never fatal to the hub.
pub type Handler<E> = Arc<dyn Fn(E) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure into a [`Handler`].
pub fn handler<E, F, Fut>(f: F) -> Handler<E>
where
    F: Fn(E) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

struct Subscription<E> {
    handler: Handler<E>,
    enabled: bool,
}

/// Keyed subscription hub for one event type.
pub struct SubscriptionHub<E> {
    name: &'static str,
    subs: RwLock<HashMap<String, Subscription<E>>>,
}

impl<E: Clone + Send + 'static> SubscriptionHub<E> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            subs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler under `owner`. A second registration with the same
    /// owner replaces the first.
    pub fn subscribe(&self, owner: impl Into<String>, handler: Handler<E>) {
        let owner = owner.into();
        debug!(hub = self.name, %owner, "subscribed");
        self.subs.write().insert(
            owner,
            Subscription {
                handler,
                enabled: true,
            },
        );
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, owner: &str) -> bool {
        let removed = self.subs.write().remove(owner).is_some();
        if removed {
            debug!(hub = self.name, owner, "unsubscribed");
        }
        removed
    }

    /// Pause or resume a subscription without dropping it. Returns whether
    /// the owner was known.
    pub fn set_enabled(&self, owner: &str, enabled: bool) -> bool {
        let mut subs = self.subs.write();
        match subs.get_mut(owner) {
            Some(sub) => {
                sub.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.subs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.read().is_empty()
    }

    /// Dispatch to every enabled subscription.
    pub async fn broadcast(&self, event: E) -> Vec<(String, anyhow::Result<()>)> {
        self.dispatch(event, None).await
    }

    /// Dispatch only to subscriptions whose owner key is in `keys`.
    pub async fn notify(&self, keys: &[&str], event: E) -> Vec<(String, anyhow::Result<()>)> {
        self.dispatch(event, Some(keys)).await
    }

    async fn dispatch(
        &self,
        event: E,
        keys: Option<&[&str]>,
    ) -> Vec<(String, anyhow::Result<()>)> {
        // Snapshot under the lock; handlers run without holding it so they
        // may themselves (un)subscribe.
        let targets: Vec<(String, Handler<E>)> = {
            let subs = self.subs.read();
            subs.iter()
                .filter(|(owner, sub)| {
                    sub.enabled && keys.map_or(true, |ks| ks.contains(&owner.as_str()))
                })
                .map(|(owner, sub)| (owner.clone(), sub.handler.clone()))
                .collect()
        };

        let tasks = targets.into_iter().map(|(owner, handler)| {
            let event = event.clone();
            let task = tokio::spawn(async move { handler(event).await });
            async move {
                let result = match task.await {
                    Ok(r) => r,
                    Err(e) => Err(anyhow::anyhow!("handler panicked: {e}")),
                };
                (owner, result)
            }
        });

        let results = join_all(tasks).await;
        for (owner, result) in &results {
            if let Err(e) = result {
                warn!(hub = self.name, %owner, error = %e, "subscriber failed");
            }
        }
        results
    }
}
