use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use itertools::Itertools;
use serde_json::{json, Value};
use smallvec::SmallVec;
use tokio::time::Instant;

use crate::app::{Cascade, Debouncer};
use crate::data::{
    now, BehaviorPatch, Entity, EntityDescriptor, EntitySchema, FieldDescriptor,
    FieldPath, NormalizedStore, NotificationId, NotificationManager, Subscription, Timestamp,
    ValidationOutcome,
};
use crate::persistence::Response;
use crate::{Error, Result, SessionConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    Idle,
    Loading,
    Ready,
    Editing,
    Validating,
    Saving,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Arms auto-save and runs cascades
    Normal,
    /// Writes store and model only
    Silent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTrigger {
    Explicit,
    Auto,
}

/// One call across the persistence boundary
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub operation: String,
    pub payload: Option<Value>,
}

impl Request {
    pub fn new(operation: String, payload: Option<Value>) -> Self {
        Request { operation, payload }
    }
}

/// A save in flight. Issued by [`Orchestrator::begin_save`], redeemed by
/// [`Orchestrator::complete_save`].
#[derive(Debug, Clone)]
pub struct SaveTicket {
    pub request: Request,
    pub generation: u64,
    pub entity_id: String,
    /// Selection when the save started
    pub selected_id: Option<String>,
    pub trigger: SaveTrigger,
    // Edit sequence when the snapshot was taken
    edit_seq: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// The response became the new baseline. `rebased` is set when edits
    /// made while saving were kept on top of it.
    Applied { id: String, rebased: bool },
    /// The selection moved while saving; only the cache was updated
    StaleResponseDiscarded {
        id: String,
        selected_id: Option<String>,
    },
    /// A newer save of the same entity was already applied; nothing was
    /// applied from this one
    Superseded { generation: u64 },
    Failed { message: String },
}

impl SaveOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, SaveOutcome::Applied { .. })
    }
}

#[derive(Debug, Clone)]
pub struct LoadTicket {
    pub request: Request,
    pub generation: u64,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { id: String },
    /// Another load or selection happened since; only the cache was updated
    Stale { id: String },
}

#[derive(Debug, Clone)]
pub struct CreateTicket {
    pub request: Request,
    pub generation: u64,
}

#[derive(Debug, Clone)]
pub struct DeleteTicket {
    pub request: Request,
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct ListTicket {
    pub request: Request,
}

/// Point-in-time view of the session flags
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub selected_id: Option<String>,
    pub is_dirty: bool,
    pub loading: bool,
    pub saving: bool,
    pub deleting: usize,
    pub error: Option<String>,
    pub last_saved_at: Option<Timestamp>,
}

impl SessionStatus {
    /// Unsaved changes exist and no save is running
    pub fn can_save(&self) -> bool {
        self.is_dirty && !self.saving && self.selected_id.is_some()
    }
}

// Side effects collected while the state is borrowed, run after release
#[derive(Default)]
struct Effects {
    notify: SmallVec<[NotificationId; 4]>,
    retired: Vec<Rc<EntityDescriptor>>,
}

impl Effects {
    fn touch(&mut self, key: NotificationId) {
        if !self.notify.contains(&key) {
            self.notify.push(key);
        }
    }

    fn retire(&mut self, model: Option<Rc<EntityDescriptor>>) {
        self.retired.extend(model);
    }
}

/// Owns the editing session of one entity type: the normalized cache, the
/// form model of the selected entity, auto-save and cascades.
///
/// Every mutation runs with the state borrowed and queues its
/// notifications; they are delivered once the borrow is released, so
/// listeners may read from (or write to) the orchestrator.
///
/// Persistence is split in two halves. `begin_*` records intent and returns
/// a ticket carrying the [`Request`]; `complete_*` takes the ticket back
/// with the [`Response`] and decides whether the result still applies.
/// [`Session`](crate::Session) drives both halves against a backend.
pub struct Orchestrator<T: Entity> {
    notifier: NotificationManager,
    status_id: NotificationId,
    state: RefCell<State<T>>,
}

struct State<T: Entity> {
    config: SessionConfig,
    schema: Rc<EntitySchema>,
    notifier: NotificationManager,
    store: NormalizedStore<T>,
    model: Option<Rc<EntityDescriptor>>,
    debouncer: Debouncer,
    cascades: Vec<Box<dyn Cascade>>,
    cascading: bool,
    phase: SessionPhase,
    loading: bool,
    saving: usize,
    deleting: usize,
    error: Option<String>,
    save_generation: u64,
    load_generation: u64,
    // Latest applied save generation per entity id
    applied: AHashMap<String, u64>,
    edit_seq: u64,
    // Top-level fields of the working instance written since it was opened
    edited: AHashMap<String, u64>,
    last_saved_at: Option<Timestamp>,
}

impl<T: Entity> std::fmt::Debug for Orchestrator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("status_id", &self.status_id)
            .field("status", &self.status())
            .finish()
    }
}

impl<T: Entity> Orchestrator<T> {
    pub fn new(config: SessionConfig, schema: EntitySchema, notifier: NotificationManager) -> Result<Self> {
        schema.validate()?;

        let state = State {
            debouncer: Debouncer::new(config.debounce_window),
            config,
            schema: Rc::new(schema),
            notifier: notifier.clone(),
            store: NormalizedStore::new(),
            model: None,
            cascades: Vec::new(),
            cascading: false,
            phase: SessionPhase::Idle,
            loading: false,
            saving: 0,
            deleting: 0,
            error: None,
            save_generation: 0,
            load_generation: 0,
            applied: AHashMap::new(),
            edit_seq: 0,
            edited: AHashMap::new(),
            last_saved_at: None,
        };

        Ok(Orchestrator {
            notifier,
            status_id: NotificationId::new(),
            state: RefCell::new(state),
        })
    }

    pub fn with_cascade(self, cascade: impl Cascade + 'static) -> Self {
        self.add_cascade(cascade);
        self
    }

    pub fn add_cascade(&self, cascade: impl Cascade + 'static) {
        self.state.borrow_mut().cascades.push(Box::new(cascade));
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State<T>, &mut Effects) -> R) -> R {
        let mut effects = Effects::default();
        let result = {
            let mut state = self.state.borrow_mut();
            f(&mut state, &mut effects)
        };
        effects.touch(self.status_id);
        self.deliver(effects);
        result
    }

    fn deliver(&self, effects: Effects) {
        for model in effects.retired {
            model.dispose();
        }
        for key in effects.notify {
            self.notifier.notify(&key);
        }
    }

    // Readers

    pub fn notifier(&self) -> &NotificationManager {
        &self.notifier
    }

    /// Key notified after every session mutation
    pub fn status_id(&self) -> NotificationId {
        self.status_id
    }

    pub fn subscribe_status(&self, callback: impl Fn() + 'static) -> Subscription {
        self.notifier.subscribe(self.status_id, callback)
    }

    pub fn config(&self) -> SessionConfig {
        self.state.borrow().config.clone()
    }

    pub fn schema(&self) -> Rc<EntitySchema> {
        self.state.borrow().schema.clone()
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.state.borrow();
        SessionStatus {
            phase: state.phase,
            selected_id: state.store.selected_id().map(str::to_string),
            is_dirty: state.store.is_dirty(),
            loading: state.loading,
            saving: state.saving > 0,
            deleting: state.deleting,
            error: state.error.clone(),
            last_saved_at: state.last_saved_at,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.borrow().phase
    }

    pub fn is_dirty(&self) -> bool {
        self.state.borrow().store.is_dirty()
    }

    /// Whether a save or create is in flight
    pub fn is_saving(&self) -> bool {
        self.state.borrow().saving > 0
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    pub fn can_save(&self) -> bool {
        let state = self.state.borrow();
        state.store.is_dirty() && state.saving == 0 && state.store.working_instance().is_some()
    }

    pub fn selected_id(&self) -> Option<String> {
        self.state.borrow().store.selected_id().map(str::to_string)
    }

    pub fn working_instance(&self) -> Option<T> {
        self.state.borrow().store.working_instance().cloned()
    }

    pub fn original_instance(&self) -> Option<T> {
        self.state.borrow().store.original_instance().cloned()
    }

    pub fn dirty_fields(&self) -> Vec<String> {
        self.state.borrow().store.dirty_fields()
    }

    /// Run `f` against the cache
    pub fn read_store<R>(&self, f: impl FnOnce(&NormalizedStore<T>) -> R) -> R {
        f(&self.state.borrow().store)
    }

    /// The form model of the selected entity
    pub fn model(&self) -> Option<Rc<EntityDescriptor>> {
        self.state.borrow().model.clone()
    }

    pub fn get_field(&self, name: &str) -> Result<FieldDescriptor> {
        self.state.borrow().model()?.get_field(name)
    }

    pub fn value(&self, path: &str) -> Result<Value> {
        self.state.borrow().model()?.value(path)
    }

    pub fn pre_validate_field(&self, name: &str, candidate: &Value) -> Result<ValidationOutcome> {
        self.state.borrow().model()?.pre_validate_field(name, candidate)
    }

    pub fn debounce_deadline(&self) -> Option<Instant> {
        self.state.borrow().debouncer.deadline()
    }

    // Editing

    /// Write a field of the working instance, run cascades and arm auto-save.
    pub fn update_field(&self, path: &str, value: Value) -> Result<()> {
        self.with_state(|state, fx| state.update(path, value, UpdateMode::Normal, fx))
    }

    /// Write a field without cascades or auto-save
    pub fn update_field_silent(&self, path: &str, value: Value) -> Result<()> {
        self.with_state(|state, fx| state.update(path, value, UpdateMode::Silent, fx))
    }

    pub fn focus_field(&self, name: &str) -> Result<()> {
        self.with_state(|state, fx| state.behavior(name, BehaviorPatch::focus(), fx))
    }

    /// Mark the field touched, validate it and flush the auto-save debounce.
    /// Returns true when an auto-save was pending and must run now.
    pub fn blur_field(&self, name: &str) -> Result<bool> {
        self.with_state(|state, fx| {
            state.behavior(name, BehaviorPatch::blur(), fx)?;
            state.validate(name, fx)?;
            Ok(state.debouncer.flush())
        })
    }

    pub fn set_field_behavior(&self, name: &str, patch: BehaviorPatch) -> Result<()> {
        self.with_state(|state, fx| state.behavior(name, patch, fx))
    }

    pub fn validate_field(&self, name: &str) -> Result<ValidationOutcome> {
        self.with_state(|state, fx| state.validate(name, fx))
    }

    pub fn validate_all(&self) -> Result<bool> {
        self.with_state(|state, fx| {
            let model = state.model()?;
            let resume = state.phase;
            state.set_phase(SessionPhase::Validating);
            let names = model.field_names();
            let results = names
                .iter()
                .map(|name| model.apply_validate(name).map(|outcome| outcome.is_valid))
                .collect::<Result<Vec<bool>>>();
            state.set_phase(resume);
            fx.touch(model.notification_id());

            let results = results?;
            let invalid = names
                .iter()
                .zip(&results)
                .filter(|(_, valid)| !**valid)
                .map(|(name, _)| name)
                .join(", ");
            if !invalid.is_empty() {
                log::debug!("{} has invalid fields: {}", state.config.feature, invalid);
            }
            Ok(invalid.is_empty())
        })
    }

    // Selection

    /// Add `entity` to the cache and open it for editing
    pub fn open(&self, entity: T) -> Result<()> {
        self.with_state(|state, fx| {
            let id = entity.id().to_string();
            state.store.upsert(entity);
            state.select(Some(&id), fx).map(|_| ())
        })
    }

    /// Open a cached entity for editing, or close the current one with
    /// `None`. Returns whether an entity is now open.
    pub fn select(&self, id: Option<&str>) -> Result<bool> {
        self.with_state(|state, fx| state.select(id, fx))
    }

    /// Drop edits and return to the last saved state
    pub fn discard(&self) -> Result<()> {
        self.with_state(|state, fx| {
            if state.store.working_instance().is_none() {
                return Err(Error::NoWorkingInstance);
            }
            state.store.discard();
            state.edited.clear();
            state.debouncer.cancel();
            state.refresh_model(fx)?;
            state.set_phase(SessionPhase::Ready);
            Ok(())
        })
    }

    pub fn clear_error(&self) {
        self.with_state(|state, _| {
            state.error = None;
            if state.phase == SessionPhase::Error {
                let phase = if state.model.is_some() {
                    SessionPhase::Ready
                } else {
                    SessionPhase::Idle
                };
                state.set_phase(phase);
            }
        })
    }

    // Auto-save

    /// Whether the debounce deadline has passed. Disarms it when it has.
    pub fn poll_auto_save(&self, now: Instant) -> bool {
        self.state.borrow_mut().debouncer.take_due(now)
    }

    /// Disarm the debounce; true if an auto-save was pending
    pub fn flush_auto_save(&self) -> bool {
        self.state.borrow_mut().debouncer.flush()
    }

    /// Start an auto-save, or `None` when there is nothing to save.
    pub fn begin_auto_save(&self) -> Option<SaveTicket> {
        self.with_state(|state, _| state.begin_auto_save())
    }

    // Persistence

    pub fn begin_save(&self, trigger: SaveTrigger) -> Result<SaveTicket> {
        self.with_state(|state, _| state.begin_save(trigger))
    }

    pub fn complete_save(&self, ticket: SaveTicket, response: Response) -> SaveOutcome {
        self.with_state(|state, fx| state.complete_save(ticket, response, fx))
    }

    pub fn begin_load(&self, id: &str) -> LoadTicket {
        self.with_state(|state, fx| state.begin_load(id, fx))
    }

    pub fn complete_load(&self, ticket: LoadTicket, response: Response) -> Result<LoadOutcome> {
        self.with_state(|state, fx| state.complete_load(ticket, response, fx))
    }

    pub fn begin_load_all(&self) -> ListTicket {
        self.with_state(|state, _| state.begin_load_all())
    }

    pub fn complete_load_all(&self, ticket: ListTicket, response: Response) -> Result<usize> {
        self.with_state(|state, _| state.complete_load_all(ticket, response))
    }

    pub fn begin_create(&self, template: &T) -> Result<CreateTicket> {
        self.with_state(|state, _| state.begin_create(template))
    }

    pub fn complete_create(&self, ticket: CreateTicket, response: Response) -> Result<T> {
        self.with_state(|state, fx| state.complete_create(ticket, response, fx))
    }

    pub fn begin_delete(&self, id: &str) -> DeleteTicket {
        self.with_state(|state, _| state.begin_delete(id))
    }

    pub fn complete_delete(&self, ticket: DeleteTicket, response: Response) -> Result<()> {
        self.with_state(|state, fx| state.complete_delete(ticket, response, fx))
    }
}

impl<T: Entity> Drop for Orchestrator<T> {
    fn drop(&mut self) {
        self.notifier.release(&self.status_id);
        if let Some(model) = self.state.get_mut().model.take() {
            model.dispose();
        }
    }
}

// Persistence failures are reported by their message alone
fn failure_message(error: &Error) -> String {
    match error {
        Error::Persistence(message) => message.clone(),
        other => other.to_string(),
    }
}

impl<T: Entity> State<T> {
    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            log::trace!("{} session: {:?} -> {:?}", self.config.feature, self.phase, phase);
            self.phase = phase;
        }
    }

    fn model(&self) -> Result<Rc<EntityDescriptor>> {
        self.model.clone().ok_or(Error::NoWorkingInstance)
    }

    fn fail(&mut self, error: &Error, enter_error_phase: bool) {
        self.error = Some(failure_message(error));
        if enter_error_phase {
            self.set_phase(SessionPhase::Error);
        }
    }

    // Leave Saving once the last save or create has landed
    fn settle_phase(&mut self) {
        if self.phase != SessionPhase::Saving || self.saving > 0 {
            return;
        }
        let phase = if self.store.is_dirty() {
            SessionPhase::Editing
        } else if self.model.is_some() {
            SessionPhase::Ready
        } else {
            SessionPhase::Idle
        };
        self.set_phase(phase);
    }

    fn mark_applied(&mut self, id: &str, generation: u64) {
        let latest = self.applied.entry(id.to_string()).or_default();
        *latest = (*latest).max(generation);
    }

    fn edited_since(&self, seq: u64) -> Vec<String> {
        self.edited
            .iter()
            .filter(|(_, edited)| **edited > seq)
            .map(|(field, _)| field.clone())
            .sorted()
            .collect()
    }

    // Replace the model with a fresh one over the working instance
    fn open_model(&mut self, fx: &mut Effects) -> Result<()> {
        fx.retire(self.model.take());
        if self.store.working_instance().is_some() {
            let document = self.store.working_document()?;
            let model = EntityDescriptor::new(self.schema.clone(), self.notifier.clone(), &document)?;
            self.model = Some(Rc::new(model));
        }
        Ok(())
    }

    // Keep the model (and its subscribers) but reload its values
    fn refresh_model(&mut self, fx: &mut Effects) -> Result<()> {
        match self.model.clone() {
            Some(model) => {
                model.apply_document(&self.store.working_document()?);
                fx.touch(model.notification_id());
                Ok(())
            }
            None => self.open_model(fx),
        }
    }

    fn close(&mut self, fx: &mut Effects) {
        fx.retire(self.model.take());
        self.debouncer.cancel();
        self.edited.clear();
    }

    fn update(&mut self, path: &str, value: Value, mode: UpdateMode, fx: &mut Effects) -> Result<()> {
        let path = FieldPath::parse(path)?;
        if self.schema.owner_of(&path).is_none() {
            return Err(Error::field_not_found(&self.schema.entity_type, path.as_str()));
        }
        let model = self.model()?;

        self.store.set_working_field(&path, value.clone())?;
        model.apply_update(path.as_str(), value)?;
        self.edit_seq += 1;
        if let Some(field) = path.segments().first() {
            self.edited.insert(field.clone(), self.edit_seq);
        }
        fx.touch(model.notification_id());

        if mode == UpdateMode::Silent {
            log::trace!("Silent update of {}", path);
            return Ok(());
        }

        self.set_phase(SessionPhase::Editing);
        self.debouncer.schedule(Instant::now());
        self.run_cascades(path.as_str(), fx)
    }

    fn run_cascades(&mut self, field: &str, fx: &mut Effects) -> Result<()> {
        if self.cascading || self.cascades.is_empty() {
            return Ok(());
        }

        let document = self.store.working_document()?;
        let writes = self
            .cascades
            .iter()
            .filter(|cascade| cascade.triggers_on(field))
            .flat_map(|cascade| {
                let writes = cascade.resolve(field, &document, &self.schema);
                if !writes.is_empty() {
                    log::debug!("Cascade {} on {}: {} write(s)", cascade.name(), field, writes.len());
                }
                writes
            })
            .collect::<Vec<_>>();

        self.cascading = true;
        let result = writes
            .into_iter()
            .try_for_each(|write| self.update(&write.field, write.value, UpdateMode::Silent, fx));
        self.cascading = false;
        result
    }

    fn behavior(&mut self, name: &str, patch: BehaviorPatch, fx: &mut Effects) -> Result<()> {
        let model = self.model()?;
        model.apply_behavior(name, patch)?;
        fx.touch(model.notification_id());
        Ok(())
    }

    fn validate(&mut self, name: &str, fx: &mut Effects) -> Result<ValidationOutcome> {
        let model = self.model()?;
        let resume = self.phase;
        self.set_phase(SessionPhase::Validating);
        let outcome = model.apply_validate(name);
        self.set_phase(resume);
        fx.touch(model.notification_id());
        outcome
    }

    fn select(&mut self, id: Option<&str>, fx: &mut Effects) -> Result<bool> {
        self.load_generation += 1;
        self.close(fx);
        self.store.select(id);
        self.open_model(fx)?;

        let found = self.model.is_some();
        self.set_phase(if found { SessionPhase::Ready } else { SessionPhase::Idle });
        Ok(found)
    }

    fn begin_auto_save(&mut self) -> Option<SaveTicket> {
        if self.store.working_instance().is_none() {
            log::debug!("No {} open, skipping auto-save", self.config.feature);
            return None;
        }
        if !self.store.is_dirty() {
            log::debug!("No changes to save, skipping auto-save");
            return None;
        }

        match self.begin_save(SaveTrigger::Auto) {
            Ok(ticket) => Some(ticket),
            Err(e) => {
                log::error!("Failed to start auto-save: {}", e);
                None
            }
        }
    }

    fn begin_save(&mut self, trigger: SaveTrigger) -> Result<SaveTicket> {
        let Some(working) = self.store.working_instance() else {
            self.error = Some(format!("No {} to save", self.config.feature));
            return Err(Error::NoWorkingInstance);
        };

        let payload = json!({ "data": serde_json::to_value(working)? });
        let entity_id = working.id().to_string();
        let action = if self.config.is_unsaved_id(&entity_id) {
            "create"
        } else {
            "update"
        };

        self.save_generation += 1;
        self.saving += 1;
        self.error = None;
        self.debouncer.cancel();
        self.set_phase(SessionPhase::Saving);

        log::info!(
            "Saving {} {} ({:?}, generation {})",
            self.config.feature,
            entity_id,
            trigger,
            self.save_generation
        );

        Ok(SaveTicket {
            request: Request::new(self.config.operation(action), Some(payload)),
            generation: self.save_generation,
            entity_id,
            selected_id: self.store.selected_id().map(str::to_string),
            trigger,
            edit_seq: self.edit_seq,
        })
    }

    fn complete_save(&mut self, ticket: SaveTicket, response: Response, fx: &mut Effects) -> SaveOutcome {
        self.saving = self.saving.saturating_sub(1);

        let latest = self.applied.get(&ticket.entity_id).copied().unwrap_or(0);
        if latest > ticket.generation {
            log::debug!(
                "Dropping superseded save of {} (generation {}, applied {})",
                ticket.entity_id,
                ticket.generation,
                latest
            );
            self.settle_phase();
            return SaveOutcome::Superseded {
                generation: ticket.generation,
            };
        }

        let still_selected = self.store.selected_id() == ticket.selected_id.as_deref()
            && self.store.working_instance().is_some();

        match self.apply_save(&ticket, response, still_selected, fx) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("Failed to save {} {}: {}", self.config.feature, ticket.entity_id, e);
                self.settle_phase();
                self.fail(&e, still_selected);
                SaveOutcome::Failed {
                    message: failure_message(&e),
                }
            }
        }
    }

    fn apply_save(
        &mut self,
        ticket: &SaveTicket,
        response: Response,
        still_selected: bool,
        fx: &mut Effects,
    ) -> Result<SaveOutcome> {
        let data = response
            .into_result(&format!("Failed to save {}", self.config.feature))?
            .ok_or_else(|| Error::Persistence("Save response carried no data".to_string()))?;
        let saved = serde_json::from_value::<T>(data)?;
        let id = saved.id().to_string();

        if id != ticket.entity_id {
            self.store.evict(&ticket.entity_id);
            self.mark_applied(&ticket.entity_id, ticket.generation);
        }
        self.store.upsert(saved.clone());
        self.mark_applied(&id, ticket.generation);
        self.last_saved_at = Some(now());

        if !still_selected {
            self.settle_phase();
            let selected_id = self.store.selected_id().map(str::to_string);
            log::info!(
                "Discarding stale save response for {} {}: selection is now {:?}",
                self.config.feature,
                id,
                selected_id
            );
            return Ok(SaveOutcome::StaleResponseDiscarded { id, selected_id });
        }

        // Fields written after the snapshot stay on top of the saved baseline
        let baseline = serde_json::to_value(&saved)?;
        let current = self.store.working_document()?;
        let mut merged = baseline.clone();
        if let Some(object) = merged.as_object_mut() {
            for key in self.edited_since(ticket.edit_seq) {
                match current.get(&key) {
                    Some(value) => {
                        object.insert(key, value.clone());
                    }
                    None => {
                        object.remove(&key);
                    }
                }
            }
        }

        let rebased = merged != baseline;
        if rebased {
            let merged = serde_json::from_value::<T>(merged)?;
            self.store.rebase(&saved, merged);
            log::info!("Saved {} {}, keeping edits made while saving", self.config.feature, id);
        } else {
            self.store.load_working(&saved);
            log::info!("Saved {} {}", self.config.feature, id);
        }
        self.set_phase(if self.saving > 0 {
            SessionPhase::Saving
        } else if rebased {
            SessionPhase::Editing
        } else {
            SessionPhase::Ready
        });

        self.store.set_selected_id(Some(id.clone()));
        self.refresh_model(fx)?;
        Ok(SaveOutcome::Applied { id, rebased })
    }

    fn begin_load(&mut self, id: &str, fx: &mut Effects) -> LoadTicket {
        self.load_generation += 1;
        self.close(fx);
        self.store.clear_working();
        self.store.set_selected_id(Some(id.to_string()));
        self.loading = true;
        self.error = None;
        self.set_phase(SessionPhase::Loading);

        log::debug!("Loading {} {}", self.config.feature, id);
        LoadTicket {
            request: Request::new(self.config.operation("read"), Some(json!({ "id": id }))),
            generation: self.load_generation,
            id: id.to_string(),
        }
    }

    fn complete_load(&mut self, ticket: LoadTicket, response: Response, fx: &mut Effects) -> Result<LoadOutcome> {
        let current = ticket.generation == self.load_generation;
        if current {
            self.loading = false;
        }

        let fallback = format!("Failed to load {}", self.config.feature);
        let loaded = response.into_result(&fallback).and_then(|data| {
            let data = data.ok_or_else(|| Error::EntityNotFound(ticket.id.clone()))?;
            Ok(serde_json::from_value::<T>(data)?)
        });
        let entity = match loaded {
            Ok(entity) => entity,
            Err(e) => {
                log::warn!("Failed to load {} {}: {}", self.config.feature, ticket.id, e);
                if current {
                    self.fail(&e, true);
                }
                return Err(e);
            }
        };

        self.store.upsert(entity.clone());
        if !current {
            log::debug!("Discarding stale load of {} {}", self.config.feature, ticket.id);
            return Ok(LoadOutcome::Stale { id: ticket.id });
        }

        self.store.load_working(&entity);
        self.store.set_selected_id(Some(entity.id().to_string()));
        self.open_model(fx)?;
        self.set_phase(SessionPhase::Ready);
        Ok(LoadOutcome::Loaded { id: ticket.id })
    }

    fn begin_load_all(&mut self) -> ListTicket {
        self.loading = true;
        self.error = None;
        ListTicket {
            request: Request::new(self.config.operation("list"), None),
        }
    }

    fn complete_load_all(&mut self, _ticket: ListTicket, response: Response) -> Result<usize> {
        self.loading = false;

        let fallback = format!("Failed to load {} list", self.config.feature);
        let loaded = response.into_result(&fallback).and_then(|data| {
            let data = data.unwrap_or_else(|| Value::Array(Vec::new()));
            Ok(serde_json::from_value::<Vec<T>>(data)?)
        });

        match loaded {
            Ok(entities) => {
                let count = entities.len();
                self.store.replace_all(entities);
                log::info!("Loaded {} {} record(s)", count, self.config.feature);
                Ok(count)
            }
            Err(e) => {
                log::warn!("{}: {}", fallback, e);
                self.fail(&e, false);
                Err(e)
            }
        }
    }

    fn begin_create(&mut self, template: &T) -> Result<CreateTicket> {
        let data = serde_json::to_value(template)?;
        self.load_generation += 1;
        self.saving += 1;
        self.error = None;

        Ok(CreateTicket {
            request: Request::new(self.config.operation("create"), Some(json!({ "data": data }))),
            generation: self.load_generation,
        })
    }

    fn complete_create(&mut self, ticket: CreateTicket, response: Response, fx: &mut Effects) -> Result<T> {
        let current = ticket.generation == self.load_generation;
        self.saving = self.saving.saturating_sub(1);

        let fallback = format!("Failed to create {}", self.config.feature);
        let created = response.into_result(&fallback).and_then(|data| {
            let data = data.ok_or_else(|| Error::Persistence("Create response carried no data".to_string()))?;
            Ok(serde_json::from_value::<T>(data)?)
        });
        let created = match created {
            Ok(created) => created,
            Err(e) => {
                log::warn!("{}: {}", fallback, e);
                self.fail(&e, current);
                return Err(e);
            }
        };

        self.store.upsert(created.clone());
        if current {
            self.close(fx);
            self.store.load_working(&created);
            self.store.set_selected_id(Some(created.id().to_string()));
            self.open_model(fx)?;
            self.set_phase(SessionPhase::Ready);
        }
        log::info!("Created {} {}", self.config.feature, created.id());
        Ok(created)
    }

    fn begin_delete(&mut self, id: &str) -> DeleteTicket {
        self.deleting += 1;
        self.error = None;
        DeleteTicket {
            request: Request::new(self.config.operation("delete"), Some(json!({ "id": id }))),
            id: id.to_string(),
        }
    }

    fn complete_delete(&mut self, ticket: DeleteTicket, response: Response, fx: &mut Effects) -> Result<()> {
        self.deleting = self.deleting.saturating_sub(1);

        let fallback = format!("Failed to delete {}", self.config.feature);
        if let Err(e) = response.into_result(&fallback) {
            log::warn!("{} {}: {}", fallback, ticket.id, e);
            self.fail(&e, false);
            return Err(e);
        }

        let was_selected = self.store.selected_id() == Some(ticket.id.as_str());
        self.store.remove(&ticket.id);
        if was_selected {
            self.close(fx);
            self.set_phase(SessionPhase::Idle);
        }

        log::info!("Deleted {} {}", self.config.feature, ticket.id);
        Ok(())
    }
}
