use std::rc::Rc;

use serde_json::Value;

use crate::data::{get_path, is_blank, EntitySchema, FieldPath};
use crate::Result;

/// One write produced by a cascade
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeWrite {
    pub field: String,
    pub value: Value,
}

impl CascadeWrite {
    pub fn new(field: impl Into<String>, value: Value) -> Self {
        CascadeWrite {
            field: field.into(),
            value,
        }
    }
}

/// A dependency rule between fields.
///
/// Writes returned by [`resolve`](Cascade::resolve) are applied silently:
/// they update the store and the model but never run cascades themselves.
pub trait Cascade {
    fn name(&self) -> &str;

    /// Whether an edit of `field` must run this cascade
    fn triggers_on(&self, field: &str) -> bool;

    /// Writes to apply, given the working document after the edit of `field`.
    fn resolve(&self, field: &str, document: &Value, schema: &EntitySchema) -> Vec<CascadeWrite>;
}

/// Domain knowledge behind a [`DependentFieldCascade`].
pub trait DependencyResolver {
    /// Whether `dependent` is still allowed under `source`
    fn is_valid(&self, source: &Value, dependent: &Value) -> bool;

    /// Replacement for an invalid dependent, or `None` for the schema default
    fn default_for(&self, source: &Value) -> Option<Value>;

    /// The derived value for a valid `(source, dependent)` pair
    fn derive(&self, source: &Value, dependent: &Value) -> Option<Value>;
}

/// A `source -> dependent -> derived` chain, e.g. a tier constraining a
/// quality which together select a model.
///
/// Editing `source` first resets `dependent` when it is no longer valid, then
/// recomputes `derived` from the corrected pair. Editing `dependent`
/// recomputes `derived`. Editing `derived` triggers nothing.
pub struct DependentFieldCascade {
    name: String,
    source: FieldPath,
    dependent: FieldPath,
    derived: Option<FieldPath>,
    resolver: Rc<dyn DependencyResolver>,
}

impl std::fmt::Debug for DependentFieldCascade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependentFieldCascade")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("dependent", &self.dependent)
            .field("derived", &self.derived)
            .finish()
    }
}

impl DependentFieldCascade {
    pub fn new(
        source: &str,
        dependent: &str,
        resolver: impl DependencyResolver + 'static,
    ) -> Result<Self> {
        Ok(DependentFieldCascade {
            name: format!("{} -> {}", source, dependent),
            source: FieldPath::parse(source)?,
            dependent: FieldPath::parse(dependent)?,
            derived: None,
            resolver: Rc::new(resolver),
        })
    }

    pub fn with_derived(mut self, derived: &str) -> Result<Self> {
        let derived = FieldPath::parse(derived)?;
        self.name = format!("{} -> {}", self.name, derived);
        self.derived = Some(derived);
        Ok(self)
    }

    fn read<'a>(document: &'a Value, path: &FieldPath) -> &'a Value {
        get_path(document, path.segments()).unwrap_or(&Value::Null)
    }

    fn schema_default(&self, schema: &EntitySchema) -> Value {
        schema
            .field(self.dependent.as_str())
            .map(|f| f.default_value.clone())
            .unwrap_or(Value::Null)
    }

    fn derive_write(&self, source: &Value, dependent: &Value) -> Option<CascadeWrite> {
        let derived = self.derived.as_ref()?;
        if is_blank(dependent) {
            return None;
        }
        self.resolver
            .derive(source, dependent)
            .map(|value| CascadeWrite::new(derived.as_str(), value))
    }
}

impl Cascade for DependentFieldCascade {
    fn name(&self) -> &str {
        &self.name
    }

    fn triggers_on(&self, field: &str) -> bool {
        field == self.source.as_str() || field == self.dependent.as_str()
    }

    fn resolve(&self, field: &str, document: &Value, schema: &EntitySchema) -> Vec<CascadeWrite> {
        let source = Self::read(document, &self.source);
        if is_blank(source) {
            return Vec::new();
        }

        let mut dependent = Self::read(document, &self.dependent).clone();
        let mut writes = Vec::new();

        if field == self.source.as_str()
            && !is_blank(&dependent)
            && !self.resolver.is_valid(source, &dependent)
        {
            let replacement = self
                .resolver
                .default_for(source)
                .unwrap_or_else(|| self.schema_default(schema));
            log::debug!(
                "{}: {} no longer valid, resetting to {}",
                self.name,
                dependent,
                replacement
            );
            writes.push(CascadeWrite::new(self.dependent.as_str(), replacement.clone()));
            dependent = replacement;
        }

        writes.extend(self.derive_write(source, &dependent));
        writes
    }
}
