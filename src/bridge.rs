//! Adapters between the notification layer and a host render loop that
//! consumes external stores through a `subscribe` / `get_snapshot` pair.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::Value;

use crate::app::{Orchestrator, SessionStatus};
use crate::data::{Entity, EntityDescriptor, FieldDescriptor, NotificationId, NotificationManager, Subscription};
use crate::Result;

/// A source of snapshots that announces changes.
///
/// `get_snapshot` must be cheap and side-effect free; a host may call it on
/// every render.
pub trait ExternalStore {
    type Snapshot;

    fn subscribe(&self, on_change: impl Fn() + 'static) -> Subscription;

    fn get_snapshot(&self) -> Self::Snapshot;
}

/// Current value of one field path of a model
#[derive(Debug, Clone)]
pub struct FieldValueStore {
    model: Rc<EntityDescriptor>,
    path: String,
}

impl FieldValueStore {
    pub fn new(model: Rc<EntityDescriptor>, path: &str) -> Result<Self> {
        model.value(path)?;
        Ok(FieldValueStore {
            model,
            path: path.to_string(),
        })
    }
}

impl ExternalStore for FieldValueStore {
    type Snapshot = Value;

    fn subscribe(&self, on_change: impl Fn() + 'static) -> Subscription {
        self.model.subscribe(on_change)
    }

    fn get_snapshot(&self) -> Value {
        self.model.value(&self.path).unwrap_or(Value::Null)
    }
}

/// Validation results and behavior flags of one declared field
#[derive(Debug, Clone)]
pub struct FieldValidationStore {
    model: Rc<EntityDescriptor>,
    name: String,
}

impl FieldValidationStore {
    pub fn new(model: Rc<EntityDescriptor>, name: &str) -> Result<Self> {
        model.get_field(name)?;
        Ok(FieldValidationStore {
            model,
            name: name.to_string(),
        })
    }
}

impl ExternalStore for FieldValidationStore {
    type Snapshot = Option<FieldDescriptor>;

    fn subscribe(&self, on_change: impl Fn() + 'static) -> Subscription {
        self.model.subscribe(on_change)
    }

    fn get_snapshot(&self) -> Option<FieldDescriptor> {
        self.model.get_field(&self.name).ok()
    }
}

/// Session flags (phase, dirty, saving, error) of an orchestrator
pub struct StatusStore<T: Entity> {
    orchestrator: Rc<Orchestrator<T>>,
}

impl<T: Entity> StatusStore<T> {
    pub fn new(orchestrator: Rc<Orchestrator<T>>) -> Self {
        StatusStore { orchestrator }
    }
}

impl<T: Entity> ExternalStore for StatusStore<T> {
    type Snapshot = SessionStatus;

    fn subscribe(&self, on_change: impl Fn() + 'static) -> Subscription {
        self.orchestrator.subscribe_status(on_change)
    }

    fn get_snapshot(&self) -> SessionStatus {
        self.orchestrator.status()
    }
}

/// Fans one upstream subscription out to any number of consumers.
///
/// The upstream subscription is created on the first `subscribe` and shared
/// by every later one, so a host that re-subscribes on each render still
/// costs a single registration on the source. [`Bridge::teardown`], or
/// dropping the bridge, removes it along with all downstream listeners.
pub struct Bridge<S: ExternalStore> {
    source: S,
    fanout: NotificationManager,
    key: NotificationId,
    upstream: RefCell<Option<Subscription>>,
    upstream_created: Cell<u32>,
    deliveries: Rc<Cell<u64>>,
    torn_down: Cell<bool>,
}

impl<S: ExternalStore> std::fmt::Debug for Bridge<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("key", &self.key)
            .field("connected", &self.is_connected())
            .field("deliveries", &self.deliveries.get())
            .finish()
    }
}

impl<S: ExternalStore> Bridge<S> {
    pub fn new(source: S) -> Self {
        Bridge {
            source,
            fanout: NotificationManager::new(),
            key: NotificationId::new(),
            upstream: RefCell::new(None),
            upstream_created: Cell::new(0),
            deliveries: Rc::new(Cell::new(0)),
            torn_down: Cell::new(false),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn connect(&self) {
        if self.torn_down.get() || self.upstream.borrow().is_some() {
            return;
        }

        let fanout = self.fanout.clone();
        let key = self.key;
        let deliveries = self.deliveries.clone();
        let subscription = self.source.subscribe(move || {
            deliveries.set(deliveries.get() + 1);
            fanout.notify(&key);
        });

        *self.upstream.borrow_mut() = Some(subscription);
        self.upstream_created.set(self.upstream_created.get() + 1);
    }

    /// Whether the upstream subscription is live
    pub fn is_connected(&self) -> bool {
        self.upstream.borrow().is_some()
    }

    /// Upstream subscriptions created over the bridge's lifetime
    pub fn upstream_subscriptions(&self) -> u32 {
        self.upstream_created.get()
    }

    /// Upstream notifications received
    pub fn deliveries(&self) -> u64 {
        self.deliveries.get()
    }

    pub fn subscriber_count(&self) -> usize {
        self.fanout.subscriber_count(&self.key)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.get()
    }

    /// Drop the upstream subscription and every downstream listener.
    pub fn teardown(&self) {
        if self.torn_down.replace(true) {
            return;
        }

        let upstream = self.upstream.borrow_mut().take();
        drop(upstream);
        let released = self.fanout.release(&self.key);
        log::debug!("Bridge {} torn down ({} listener(s) released)", self.key, released);
    }

    /// A snapshot getter detached from the bridge's lifetime
    pub fn accessor(self: &Rc<Self>) -> impl Fn() -> S::Snapshot
    where
        S: 'static,
    {
        let bridge = Rc::clone(self);
        move || bridge.get_snapshot()
    }
}

impl<S: ExternalStore> ExternalStore for Bridge<S> {
    type Snapshot = S::Snapshot;

    fn subscribe(&self, on_change: impl Fn() + 'static) -> Subscription {
        if self.torn_down.get() {
            log::warn!("Subscribing to torn down bridge {}", self.key);
        }
        self.connect();
        self.fanout.subscribe(self.key, on_change)
    }

    fn get_snapshot(&self) -> S::Snapshot {
        self.source.get_snapshot()
    }
}

impl<S: ExternalStore> Drop for Bridge<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}
