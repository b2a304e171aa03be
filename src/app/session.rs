use std::cell::Cell;
use std::rc::Rc;

use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::app::{LoadOutcome, Orchestrator, SaveOutcome, SaveTicket, SaveTrigger};
use crate::data::{Entity, Subscription};
use crate::persistence::Persistence;
use crate::Result;

/// Drives an [`Orchestrator`] against a [`Persistence`] backend.
///
/// Cloneable handle; clones share the orchestrator and the backend. The
/// orchestrator is never borrowed across an `.await`, so edits keep flowing
/// while requests are in flight and responses are checked against the
/// state current when they land.
///
/// Auto-save runs as a local task, see [`Session::spawn_auto_save`]. Must be
/// used from within a [`tokio::task::LocalSet`].
pub struct Session<T: Entity, P: Persistence> {
    orchestrator: Rc<Orchestrator<T>>,
    persistence: Rc<P>,
    wake: Rc<Notify>,
    closed: Rc<Cell<bool>>,
    _status: Rc<Subscription>,
}

impl<T: Entity, P: Persistence> Clone for Session<T, P> {
    fn clone(&self) -> Self {
        Session {
            orchestrator: self.orchestrator.clone(),
            persistence: self.persistence.clone(),
            wake: self.wake.clone(),
            closed: self.closed.clone(),
            _status: self._status.clone(),
        }
    }
}

impl<T: Entity, P: Persistence> std::fmt::Debug for Session<T, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("orchestrator", &self.orchestrator)
            .field("closed", &self.closed.get())
            .finish()
    }
}

impl<T: Entity, P: Persistence + 'static> Session<T, P> {
    pub fn new(orchestrator: Orchestrator<T>, persistence: P) -> Self {
        let wake = Rc::new(Notify::new());

        // Any session mutation may move the debounce deadline
        let status = orchestrator.subscribe_status({
            let wake = wake.clone();
            move || wake.notify_one()
        });

        Session {
            orchestrator: Rc::new(orchestrator),
            persistence: Rc::new(persistence),
            wake,
            closed: Rc::new(Cell::new(false)),
            _status: Rc::new(status),
        }
    }

    pub fn orchestrator(&self) -> &Rc<Orchestrator<T>> {
        &self.orchestrator
    }

    pub fn persistence(&self) -> &Rc<P> {
        &self.persistence
    }

    pub fn update_field(&self, path: &str, value: Value) -> Result<()> {
        self.orchestrator.update_field(path, value)
    }

    pub fn update_field_silent(&self, path: &str, value: Value) -> Result<()> {
        self.orchestrator.update_field_silent(path, value)
    }

    pub fn focus_field(&self, name: &str) -> Result<()> {
        self.orchestrator.focus_field(name)
    }

    /// Blur, validate and run the pending auto-save right away, if any.
    pub async fn blur_field(&self, name: &str) -> Result<Option<SaveOutcome>> {
        if self.orchestrator.blur_field(name)? {
            return Ok(self.auto_save().await);
        }
        Ok(None)
    }

    /// Save the working instance if it has changes.
    pub async fn auto_save(&self) -> Option<SaveOutcome> {
        let ticket = self.orchestrator.begin_auto_save()?;
        Some(self.send_save(ticket).await)
    }

    pub async fn save(&self) -> SaveOutcome {
        match self.orchestrator.begin_save(SaveTrigger::Explicit) {
            Ok(ticket) => self.send_save(ticket).await,
            Err(e) => SaveOutcome::Failed {
                message: e.to_string(),
            },
        }
    }

    async fn send_save(&self, ticket: SaveTicket) -> SaveOutcome {
        let response = self
            .persistence
            .send(&ticket.request.operation, ticket.request.payload.clone())
            .await;
        self.orchestrator.complete_save(ticket, response)
    }

    // Saves pending edits before the selection moves away from them
    async fn flush_pending(&self) {
        if self.orchestrator.flush_auto_save() {
            self.auto_save().await;
        }
    }

    pub async fn load_all(&self) -> Result<usize> {
        let ticket = self.orchestrator.begin_load_all();
        let response = self
            .persistence
            .send(&ticket.request.operation, ticket.request.payload.clone())
            .await;
        self.orchestrator.complete_load_all(ticket, response)
    }

    pub async fn load_by_id(&self, id: &str) -> Result<LoadOutcome> {
        self.flush_pending().await;

        let ticket = self.orchestrator.begin_load(id);
        let response = self
            .persistence
            .send(&ticket.request.operation, ticket.request.payload.clone())
            .await;
        self.orchestrator.complete_load(ticket, response)
    }

    /// Open a cached entity for editing without a backend round-trip
    pub async fn select(&self, id: Option<&str>) -> Result<bool> {
        self.flush_pending().await;
        self.orchestrator.select(id)
    }

    pub async fn create_new(&self, template: T) -> Result<T> {
        self.flush_pending().await;

        let ticket = self.orchestrator.begin_create(&template)?;
        let response = self
            .persistence
            .send(&ticket.request.operation, ticket.request.payload.clone())
            .await;
        self.orchestrator.complete_create(ticket, response)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let ticket = self.orchestrator.begin_delete(id);
        let response = self
            .persistence
            .send(&ticket.request.operation, ticket.request.payload.clone())
            .await;
        self.orchestrator.complete_delete(ticket, response)
    }

    pub fn discard(&self) -> Result<()> {
        self.orchestrator.discard()
    }

    /// The auto-save loop. Sleeps until the debounce deadline, re-arming on
    /// every edit, and saves once it passes. A failed save is recorded on
    /// the orchestrator and the loop keeps going. Returns after
    /// [`Session::shutdown`].
    pub async fn run_auto_save(self) {
        log::debug!("Auto-save loop started");

        while !self.closed.get() {
            match self.orchestrator.debounce_deadline() {
                None => self.wake.notified().await,
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {
                            if self.orchestrator.poll_auto_save(Instant::now()) {
                                if let Some(SaveOutcome::Failed { message }) = self.auto_save().await {
                                    log::warn!("Auto-save failed: {}", message);
                                }
                            }
                        }
                        _ = self.wake.notified() => {}
                    }
                }
            }
        }

        log::debug!("Auto-save loop stopped");
    }

    pub fn spawn_auto_save(&self) -> JoinHandle<()> {
        tokio::task::spawn_local(self.clone().run_auto_save())
    }

    /// Stop the auto-save loop. Pending edits are not saved.
    pub fn shutdown(&self) {
        self.closed.set(true);
        self.wake.notify_one();
    }
}
