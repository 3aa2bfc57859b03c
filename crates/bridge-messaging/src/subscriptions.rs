//! Subscription bookkeeping.

use std::{collections::HashMap, fmt, sync::Arc};

use bridge_core::{Response, TaskId};

use crate::SessionKey;

/// Caller callback receiving every message of a subscription.
///
/// Clones share identity; two callbacks built separately are distinct even
/// if they run the same code.
#[derive(Clone)]
pub struct MessageCallback(Arc<dyn Fn(Response) + Send + Sync>);

impl MessageCallback {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(Response) + Send + Sync + 'static,
    {
        Self(Arc::new(callback))
    }

    pub fn call(&self, response: Response) {
        (self.0)(response);
    }

    /// Identity of the shared callback allocation.
    ///
    /// Stable while any clone is alive; a registered subscription keeps one.
    #[must_use]
    pub fn id(&self) -> CallbackId {
        CallbackId(Arc::as_ptr(&self.0).cast::<()>().addr())
    }
}

impl fmt::Debug for MessageCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageCallback").field(&self.id()).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(usize);

/// `(url, session, callback)`: what an unsubscribe must name to match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub url: String,
    pub session: SessionKey,
    pub callback: CallbackId,
}

impl SubscriptionKey {
    #[must_use]
    pub fn new(url: impl Into<String>, session: SessionKey, callback: CallbackId) -> Self {
        Self {
            url: url.into(),
            session,
            callback,
        }
    }
}

/// Active subscriptions, mapped to the task id that serves as their
/// subscription id on the native side.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<SubscriptionKey, TaskId>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription, returning the id it replaced, if any.
    pub fn insert(&mut self, key: SubscriptionKey, subscription_id: TaskId) -> Option<TaskId> {
        self.entries.insert(key, subscription_id)
    }

    #[must_use]
    pub fn get(&self, key: &SubscriptionKey) -> Option<&TaskId> {
        self.entries.get(key)
    }

    /// Remove `key` only if it still maps to `subscription_id`.
    pub fn remove_if(&mut self, key: &SubscriptionKey, subscription_id: &TaskId) -> bool {
        if self.entries.get(key) == Some(subscription_id) {
            self.entries.remove(key);
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Brokers that still have at least one subscription.
    #[must_use]
    pub fn urls(&self) -> Vec<&str> {
        let mut urls: Vec<&str> = self.entries.keys().map(|key| key.url.as_str()).collect();
        urls.sort_unstable();
        urls.dedup();
        urls
    }
}
