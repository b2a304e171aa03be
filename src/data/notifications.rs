use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tokio::sync::mpsc;

use crate::data::{NotificationId, SubscriptionToken};

/// Callback invoked on every notification for the key it was registered on.
/// Listeners re-read whatever state they care about; nothing is passed in.
pub type Listener = Rc<dyn Fn()>;

/// Receives every [`ListenerFailure`] raised during delivery.
pub type ErrorReporter = Rc<dyn Fn(&ListenerFailure)>;

/// Receiver side of a channel subscription
pub type NotificationReceiver = mpsc::UnboundedReceiver<NotificationId>;

/// A listener panicked while being notified. Delivery to the remaining
/// listeners continued; this record is the only trace of the failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerFailure {
    pub key: NotificationId,
    pub token: SubscriptionToken,
    pub message: String,
}

#[derive(Default)]
struct Registry {
    listeners: FxHashMap<NotificationId, Vec<(SubscriptionToken, Listener)>>,
    next_token: u64,
    failures: u64,
    reporter: Option<ErrorReporter>,
}

impl Registry {
    fn remove(&mut self, key: &NotificationId, token: SubscriptionToken) -> Option<Listener> {
        let entries = self.listeners.get_mut(key)?;
        let position = entries.iter().position(|(t, _)| *t == token)?;
        let (_, listener) = entries.remove(position);

        // Drop the key once its last subscriber is gone
        if entries.is_empty() {
            self.listeners.remove(key);
        }

        Some(listener)
    }
}

/// Registry of listeners keyed by [`NotificationId`].
///
/// This is a cheap, cloneable handle: clones share the same registry. It is
/// constructed explicitly and handed to every model that needs it, so two
/// managers never see each other's keys.
///
/// Delivery is synchronous and in registration order. `notify` captures the
/// listener list when it starts, so listeners added or removed during
/// delivery do not affect the cycle in progress. A panicking listener is
/// isolated, reported, and does not stop delivery to the others.
#[derive(Clone, Default)]
pub struct NotificationManager {
    inner: Rc<RefCell<Registry>>,
}

impl std::fmt::Debug for NotificationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.inner.borrow();
        f.debug_struct("NotificationManager")
            .field("keys", &registry.listeners.len())
            .field("failures", &registry.failures)
            .finish()
    }
}

impl NotificationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `key`. The returned [`Subscription`] removes
    /// exactly this registration when unsubscribed or dropped.
    pub fn subscribe(&self, key: NotificationId, callback: impl Fn() + 'static) -> Subscription {
        let token = {
            let mut registry = self.inner.borrow_mut();
            let token = SubscriptionToken(registry.next_token);
            registry.next_token += 1;
            registry
                .listeners
                .entry(key)
                .or_default()
                .push((token, Rc::new(callback)));
            token
        };

        log::debug!("Subscribed {} to {}", token, key);

        Subscription {
            registry: Rc::downgrade(&self.inner),
            key,
            token,
        }
    }

    /// Subscribe through an unbounded channel instead of a callback. Each
    /// notification for `key` sends the key on the channel.
    pub fn subscribe_channel(&self, key: NotificationId) -> (Subscription, NotificationReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription = self.subscribe(key, move || {
            let _ = sender.send(key);
        });
        (subscription, receiver)
    }

    /// Remove a single registration. Returns false if it was already gone.
    pub fn unsubscribe(&self, key: &NotificationId, token: SubscriptionToken) -> bool {
        let removed = self.inner.borrow_mut().remove(key, token);
        let found = removed.is_some();
        // The listener may own subscriptions of its own; drop it unborrowed
        drop(removed);

        if found {
            log::debug!("Unsubscribed {} from {}", token, key);
        }
        found
    }

    /// Deliver a notification to every listener registered for `key`.
    /// Returns the number of listeners invoked.
    pub fn notify(&self, key: &NotificationId) -> usize {
        let snapshot: SmallVec<[(SubscriptionToken, Listener); 4]> = {
            let registry = self.inner.borrow();
            match registry.listeners.get(key) {
                Some(entries) => entries.iter().cloned().collect(),
                None => return 0,
            }
        };

        for (token, listener) in snapshot.iter() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener()));
            if let Err(payload) = result {
                self.report_failure(ListenerFailure {
                    key: *key,
                    token: *token,
                    message: panic_message(payload.as_ref()),
                });
            }
        }

        snapshot.len()
    }

    /// Drop every registration for `key`. Used when a model is destroyed.
    /// Returns the number of registrations removed.
    pub fn release(&self, key: &NotificationId) -> usize {
        let removed = self.inner.borrow_mut().listeners.remove(key);
        let count = removed.as_ref().map_or(0, Vec::len);
        drop(removed);

        if count > 0 {
            log::debug!("Released {} subscription(s) for {}", count, key);
        }
        count
    }

    pub fn subscriber_count(&self, key: &NotificationId) -> usize {
        self.inner
            .borrow()
            .listeners
            .get(key)
            .map_or(0, Vec::len)
    }

    /// Number of keys that currently have at least one subscriber
    pub fn key_count(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    /// Total listener failures observed by this manager
    pub fn failure_count(&self) -> u64 {
        self.inner.borrow().failures
    }

    /// Install the side channel that receives listener failures.
    pub fn set_error_reporter(&self, reporter: impl Fn(&ListenerFailure) + 'static) {
        self.inner.borrow_mut().reporter = Some(Rc::new(reporter));
    }

    fn report_failure(&self, failure: ListenerFailure) {
        let reporter = {
            let mut registry = self.inner.borrow_mut();
            registry.failures += 1;
            registry.reporter.clone()
        };

        log::error!(
            "Listener {} failed during notify of {}: {}",
            failure.token,
            failure.key,
            failure.message
        );

        if let Some(reporter) = reporter {
            reporter(&failure);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "listener panicked".to_string()
    }
}

/// Disposer for one registration. Unsubscribes on [`Subscription::unsubscribe`]
/// or when dropped; a subscription whose key was already released is a no-op.
#[must_use = "dropping a Subscription unsubscribes it immediately"]
pub struct Subscription {
    registry: Weak<RefCell<Registry>>,
    key: NotificationId,
    token: SubscriptionToken,
}

impl Subscription {
    pub fn key(&self) -> NotificationId {
        self.key
    }

    pub fn token(&self) -> SubscriptionToken {
        self.token
    }

    /// Whether this registration is still present in its manager
    pub fn is_active(&self) -> bool {
        self.registry.upgrade().is_some_and(|registry| {
            registry
                .borrow()
                .listeners
                .get(&self.key)
                .is_some_and(|entries| entries.iter().any(|(t, _)| *t == self.token))
        })
    }

    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("token", &self.token)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };

        let removed = match registry.try_borrow_mut() {
            Ok(mut registry) => registry.remove(&self.key, self.token),
            Err(_) => {
                log::warn!("Registry busy, could not drop {} for {}", self.token, self.key);
                None
            }
        };
        drop(removed);
    }
}
