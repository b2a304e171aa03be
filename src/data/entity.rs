use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::data::{
    get_path, set_path, set_segments, BehaviorPatch, EntitySchema, FieldDescriptor, FieldPath,
    NotificationId, NotificationManager, Subscription, ValidationOutcome,
};
use crate::{Error, Result};

/// The form model of one entity instance.
///
/// Holds a [`FieldDescriptor`] per declared field, in schema order, and
/// notifies its [`NotificationId`] after every mutation. State lives behind
/// interior mutability so listeners can read the model while being notified;
/// no borrow is held while listeners run.
///
/// Dropping or disposing the model releases every subscription keyed to its
/// notification id.
pub struct EntityDescriptor {
    schema: Rc<EntitySchema>,
    notification_id: NotificationId,
    notifier: NotificationManager,
    fields: RefCell<Vec<FieldDescriptor>>,
    disposed: Cell<bool>,
}

impl std::fmt::Debug for EntityDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("entity_type", &self.schema.entity_type)
            .field("notification_id", &self.notification_id)
            .field("fields", &self.fields.borrow())
            .finish()
    }
}

impl EntityDescriptor {
    /// Build a model from `document`; fields missing from it take their
    /// schema default.
    pub fn new(
        schema: Rc<EntitySchema>,
        notifier: NotificationManager,
        document: &Value,
    ) -> Result<Self> {
        schema.validate()?;

        let fields = schema
            .fields
            .iter()
            .map(|f| {
                let value = get_path(document, f.name.segments())
                    .cloned()
                    .unwrap_or_else(|| f.default_value.clone());
                FieldDescriptor::new(f.name.as_str(), value)
            })
            .collect();

        Ok(EntityDescriptor {
            schema,
            notification_id: NotificationId::new(),
            notifier,
            fields: RefCell::new(fields),
            disposed: Cell::new(false),
        })
    }

    pub fn notification_id(&self) -> NotificationId {
        self.notification_id
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    pub fn notifier(&self) -> &NotificationManager {
        &self.notifier
    }

    /// Subscribe to every mutation of this model
    pub fn subscribe(&self, callback: impl Fn() + 'static) -> Subscription {
        self.notifier.subscribe(self.notification_id, callback)
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.schema
            .position(name)
            .ok_or_else(|| Error::field_not_found(&self.schema.entity_type, name))
    }

    fn owner_of(&self, path: &str) -> Result<(usize, FieldPath)> {
        let path = FieldPath::parse(path)?;
        let index = self
            .schema
            .owner_of(&path)
            .map(|(index, _)| index)
            .ok_or_else(|| Error::field_not_found(&self.schema.entity_type, path.as_str()))?;
        Ok((index, path))
    }

    pub fn get_field(&self, name: &str) -> Result<FieldDescriptor> {
        let index = self.index_of(name)?;
        Ok(self.fields.borrow()[index].clone())
    }

    /// Read a value by dotted path, which may point inside a declared field.
    /// Missing nested values read as `Null`.
    pub fn value(&self, path: &str) -> Result<Value> {
        let (index, path) = self.owner_of(path)?;
        let fields = self.fields.borrow();
        let rest = path
            .strip_prefix(&self.schema.fields[index].name)
            .unwrap_or_default();
        Ok(get_path(&fields[index].value, rest).cloned().unwrap_or(Value::Null))
    }

    /// Write `value` at a dotted path and notify. Does not validate.
    pub fn update_field(&self, path: &str, value: Value) -> Result<()> {
        self.apply_update(path, value)?;
        self.notifier.notify(&self.notification_id);
        Ok(())
    }

    pub(crate) fn apply_update(&self, path: &str, value: Value) -> Result<()> {
        let (index, path) = self.owner_of(path)?;
        let mut fields = self.fields.borrow_mut();
        let rest = path
            .strip_prefix(&self.schema.fields[index].name)
            .unwrap_or_default();
        set_segments(&mut fields[index].value, rest, &path, value)
    }

    /// Validate a candidate value without touching stored state. No
    /// notification is sent, so this is safe to call on every keystroke.
    pub fn pre_validate_field(&self, name: &str, candidate: &Value) -> Result<ValidationOutcome> {
        let index = self.index_of(name)?;
        Ok(self.schema.fields[index].validate(candidate))
    }

    /// Validate the stored value, replace the field's results and notify.
    pub fn validate_field(&self, name: &str) -> Result<ValidationOutcome> {
        let outcome = self.apply_validate(name)?;
        self.notifier.notify(&self.notification_id);
        Ok(outcome)
    }

    pub(crate) fn apply_validate(&self, name: &str) -> Result<ValidationOutcome> {
        let index = self.index_of(name)?;
        let mut fields = self.fields.borrow_mut();
        let field = &mut fields[index];
        let outcome = self.schema.fields[index].validate(&field.value);
        field.validation_results = outcome.results.clone();
        Ok(outcome)
    }

    /// Validate every field and notify once.
    pub fn validate_all(&self) -> bool {
        let valid = {
            let mut fields = self.fields.borrow_mut();
            fields
                .iter_mut()
                .zip(&self.schema.fields)
                .map(|(field, schema)| {
                    let outcome = schema.validate(&field.value);
                    field.validation_results = outcome.results;
                    outcome.is_valid
                })
                .fold(true, |all, valid| all && valid)
        };

        self.notifier.notify(&self.notification_id);
        valid
    }

    /// Stored validation state of one field, or of every field in order.
    pub fn get_validations(&self, name: Option<&str>) -> Result<Vec<ValidationOutcome>> {
        let fields = self.fields.borrow();
        let outcome = |f: &FieldDescriptor| ValidationOutcome::from_results(f.validation_results.clone());

        match name {
            Some(name) => {
                let index = self.index_of(name)?;
                Ok(vec![outcome(&fields[index])])
            }
            None => Ok(fields.iter().map(outcome).collect()),
        }
    }

    pub fn set_field_behavior(&self, name: &str, patch: BehaviorPatch) -> Result<()> {
        self.apply_behavior(name, patch)?;
        self.notifier.notify(&self.notification_id);
        Ok(())
    }

    pub(crate) fn apply_behavior(&self, name: &str, patch: BehaviorPatch) -> Result<()> {
        let index = self.index_of(name)?;
        self.fields.borrow_mut()[index].behavior.merge(patch);
        Ok(())
    }

    /// True when no field's last validation failed
    pub fn is_valid(&self) -> bool {
        self.fields.borrow().iter().all(FieldDescriptor::is_valid)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.schema
            .fields
            .iter()
            .map(|f| f.name.to_string())
            .collect()
    }

    /// Assemble the nested document described by the current field values.
    pub fn to_document(&self) -> Result<Value> {
        let mut document = Value::Object(Map::new());
        let fields = self.fields.borrow();
        for (field, schema) in fields.iter().zip(&self.schema.fields) {
            set_path(&mut document, &schema.name, field.value.clone())?;
        }
        Ok(document)
    }

    /// Replace every field value from `document` and notify once. Behavior
    /// flags and validation results are kept.
    pub fn load_document(&self, document: &Value) {
        self.apply_document(document);
        self.notifier.notify(&self.notification_id);
    }

    pub(crate) fn apply_document(&self, document: &Value) {
        let mut fields = self.fields.borrow_mut();
        for (field, schema) in fields.iter_mut().zip(&self.schema.fields) {
            field.value = get_path(document, schema.name.segments())
                .cloned()
                .unwrap_or_else(|| schema.default_value.clone());
        }
    }

    /// Release all subscriptions keyed to this model.
    pub fn dispose(&self) {
        if !self.disposed.replace(true) {
            let released = self.notifier.release(&self.notification_id);
            log::debug!(
                "Disposed {} model {} ({} subscription(s) released)",
                self.schema.entity_type,
                self.notification_id,
                released
            );
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }
}

impl Drop for EntityDescriptor {
    fn drop(&mut self) {
        self.dispose();
    }
}
