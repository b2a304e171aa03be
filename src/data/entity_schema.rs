use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::data::{set_path, FieldPath, FieldSchema};
use crate::{Error, Result};

/// The declared fields of one entity type, in declaration order.
///
/// Field names are dotted paths. No declared field may be a path-prefix of
/// another, so every path written by a form resolves to exactly one owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySchema {
    pub entity_type: String,
    pub fields: Vec<FieldSchema>,
}

impl EntitySchema {
    pub fn new(entity_type: impl Into<String>) -> Self {
        EntitySchema {
            entity_type: entity_type.into(),
            fields: Vec::new(),
        }
    }

    /// Register a field, rejecting duplicates and overlapping paths.
    pub fn with_field(mut self, field: FieldSchema) -> Result<Self> {
        if let Some(existing) = self.conflicting_field(&field.name) {
            return Err(Error::InvalidSchema(format!(
                "field {} conflicts with {} on {}",
                field.name, existing.name, self.entity_type
            )));
        }
        self.fields.push(field);
        Ok(self)
    }

    pub fn from_fields(entity_type: impl Into<String>, fields: Vec<FieldSchema>) -> Result<Self> {
        fields
            .into_iter()
            .try_fold(EntitySchema::new(entity_type), EntitySchema::with_field)
    }

    /// Re-check the registration invariants, e.g. after deserializing.
    pub fn validate(&self) -> Result<()> {
        for (i, field) in self.fields.iter().enumerate() {
            if let Some(other) = self.fields[..i]
                .iter()
                .find(|other| other.name.is_prefix_of(&field.name) || field.name.is_prefix_of(&other.name))
            {
                return Err(Error::InvalidSchema(format!(
                    "field {} conflicts with {} on {}",
                    field.name, other.name, self.entity_type
                )));
            }
        }
        Ok(())
    }

    fn conflicting_field(&self, name: &FieldPath) -> Option<&FieldSchema> {
        self.fields
            .iter()
            .find(|f| f.name.is_prefix_of(name) || name.is_prefix_of(&f.name))
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name.as_str() == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name.as_str() == name)
    }

    /// The declared field owning `path`, with the remaining nested segments.
    pub fn owner_of<'a>(&'a self, path: &'a FieldPath) -> Option<(usize, &'a [String])> {
        self.fields
            .iter()
            .enumerate()
            .find_map(|(i, f)| path.strip_prefix(&f.name).map(|rest| (i, rest)))
    }

    /// Fields sorted by rank, ties kept in declaration order
    pub fn ranked(&self) -> Vec<&FieldSchema> {
        let mut fields = self.fields.iter().collect::<Vec<&FieldSchema>>();
        fields.sort_by_key(|f| f.rank);
        fields
    }

    /// A document with every declared field set to its default value.
    pub fn default_document(&self) -> Result<Value> {
        let mut document = Value::Object(Map::new());
        for field in &self.fields {
            set_path(&mut document, &field.name, field.default_value.clone())?;
        }
        Ok(document)
    }
}
