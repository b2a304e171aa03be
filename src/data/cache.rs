use std::fmt::Debug;

use ahash::AHashMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::data::{changed_fields, set_path, FieldPath};
use crate::{Error, Result};

/// A record with a stable string id that can be cached and edited.
pub trait Entity: Clone + Debug + Serialize + DeserializeOwned + 'static {
    fn id(&self) -> &str;
}

/// A schemaless JSON object entity. Its id is the `"id"` string member.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub Map<String, Value>);

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert("id".to_string(), Value::String(id.into()));
        Record(map)
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Wrap a JSON object; anything else gives an empty record.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Record(map),
            _ => Record::default(),
        }
    }
}

impl Entity for Record {
    fn id(&self) -> &str {
        self.0.get("id").and_then(Value::as_str).unwrap_or_default()
    }
}

/// Normalized cache of one entity type plus the instance open for editing.
///
/// `all_ids` always holds exactly the keys of `by_id`, in load/creation
/// order. `original_instance` is only replaced by a load or a successful
/// save; edits go to `working_instance` alone.
#[derive(Debug, Clone)]
pub struct NormalizedStore<T: Entity> {
    by_id: AHashMap<String, T>,
    all_ids: Vec<String>,
    selected_id: Option<String>,
    working_instance: Option<T>,
    original_instance: Option<T>,
    is_dirty: bool,
}

impl<T: Entity> Default for NormalizedStore<T> {
    fn default() -> Self {
        NormalizedStore {
            by_id: AHashMap::new(),
            all_ids: Vec::new(),
            selected_id: None,
            working_instance: None,
            original_instance: None,
            is_dirty: false,
        }
    }
}

impl<T: Entity> NormalizedStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; the id is appended to `all_ids` only once.
    pub fn upsert(&mut self, entity: T) {
        let id = entity.id().to_string();
        if self.by_id.insert(id.clone(), entity).is_none() {
            self.all_ids.push(id);
        }
    }

    /// Replace the whole cache, keeping the order of `entities`.
    pub fn replace_all(&mut self, entities: Vec<T>) {
        self.by_id.clear();
        self.all_ids.clear();
        for entity in entities {
            self.upsert(entity);
        }
    }

    /// Remove an entity. Removing the selected entity also clears the
    /// working pair.
    pub fn remove(&mut self, id: &str) -> Option<T> {
        let removed = self.by_id.remove(id);
        self.all_ids.retain(|existing| existing != id);

        if self.selected_id.as_deref() == Some(id) {
            self.clear_working();
        }
        removed
    }

    /// Drop a cache entry without touching the working pair
    pub fn evict(&mut self, id: &str) -> Option<T> {
        let removed = self.by_id.remove(id);
        self.all_ids.retain(|existing| existing != id);
        removed
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.by_id.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn all_ids(&self) -> &[String] {
        &self.all_ids
    }

    /// Cached entities in `all_ids` order
    pub fn all(&self) -> Vec<&T> {
        self.all_ids
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.all_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all_ids.is_empty()
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected_id.as_deref()
    }

    pub fn set_selected_id(&mut self, id: Option<String>) {
        self.selected_id = id;
    }

    pub fn working_instance(&self) -> Option<&T> {
        self.working_instance.as_ref()
    }

    pub fn original_instance(&self) -> Option<&T> {
        self.original_instance.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    /// Open `entity` for editing. Working and original are independent
    /// deep copies.
    pub fn load_working(&mut self, entity: &T) {
        self.working_instance = Some(entity.clone());
        self.original_instance = Some(entity.clone());
        self.is_dirty = false;
    }

    /// Load the cached entity `id` for editing, or clear the working pair
    /// when `id` is `None` or not cached.
    pub fn select(&mut self, id: Option<&str>) {
        self.selected_id = id.map(str::to_string);
        match id.and_then(|id| self.by_id.get(id)).cloned() {
            Some(entity) => self.load_working(&entity),
            None => {
                self.working_instance = None;
                self.original_instance = None;
                self.is_dirty = false;
            }
        }
    }

    /// Move the baseline to `original` while keeping `working`, then
    /// recompute dirtiness.
    pub fn rebase(&mut self, original: &T, working: T) -> bool {
        self.original_instance = Some(original.clone());
        self.working_instance = Some(working);
        self.check_dirty()
    }

    pub fn clear_working(&mut self) {
        self.selected_id = None;
        self.working_instance = None;
        self.original_instance = None;
        self.is_dirty = false;
    }

    /// Deep-compare working against original and store the result.
    pub fn check_dirty(&mut self) -> bool {
        self.is_dirty = match (&self.working_instance, &self.original_instance) {
            (Some(working), Some(original)) => documents_differ(working, original),
            (None, None) => false,
            _ => true,
        };
        self.is_dirty
    }

    /// Top-level fields that differ between working and original
    pub fn dirty_fields(&self) -> Vec<String> {
        match (&self.working_instance, &self.original_instance) {
            (Some(working), Some(original)) => {
                match (serde_json::to_value(original), serde_json::to_value(working)) {
                    (Ok(original), Ok(working)) => changed_fields(&original, &working),
                    _ => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }

    /// Throw away edits: working becomes a fresh copy of original.
    pub fn discard(&mut self) {
        if let Some(original) = &self.original_instance {
            self.working_instance = Some(original.clone());
        }
        self.is_dirty = false;
    }

    /// Write `value` at a dotted path of the working instance, then
    /// recompute dirtiness. If the result no longer deserializes as `T` the
    /// working instance is left as it was.
    pub fn set_working_field(&mut self, path: &FieldPath, value: Value) -> Result<bool> {
        let working = self.working_instance.as_ref().ok_or(Error::NoWorkingInstance)?;

        let mut document = serde_json::to_value(working)?;
        set_path(&mut document, path, value)?;
        let updated = serde_json::from_value::<T>(document)?;

        self.working_instance = Some(updated);
        Ok(self.check_dirty())
    }

    /// The working instance as a JSON document
    pub fn working_document(&self) -> Result<Value> {
        let working = self.working_instance.as_ref().ok_or(Error::NoWorkingInstance)?;
        Ok(serde_json::to_value(working)?)
    }
}

// Compare through the JSON form so that every serialized member counts
fn documents_differ<T: Entity>(a: &T, b: &T) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => a != b,
        _ => true,
    }
}
