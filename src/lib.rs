extern crate self as formsync_rs;

pub mod app;
pub mod bridge;
pub mod config;
pub mod data;
mod error;
pub mod persistence;

pub use app::{
    Cascade, CascadeWrite, DependencyResolver, DependentFieldCascade, Debouncer, LoadOutcome, Orchestrator,
    Request, SaveOutcome, SaveTicket, SaveTrigger, Session, SessionPhase, SessionStatus, UpdateMode,
};
pub use bridge::{Bridge, ExternalStore, FieldValidationStore, FieldValueStore, StatusStore};
pub use config::SessionConfig;
pub use data::{
    BehaviorPatch, Entity, EntityDescriptor, EntitySchema, FieldBehavior, FieldDescriptor, FieldPath,
    FieldSchema, ListenerFailure, NormalizedStore, NotificationId, NotificationManager, Record, RuleKind,
    Subscription, SubscriptionToken, ValidationOutcome, ValidationResult, ValidationRule,
};
pub use error::{Error, Result};
pub use persistence::{MemoryBackend, Persistence, Response, ResponseError};

#[cfg(feature = "derive")]
pub use formsync_rs_derive::Entity;

#[doc(hidden)]
pub use serde_json::json as __json;

/// Build a [`Record`] from JSON object syntax
///
/// # Example
///
/// ```
/// use formsync_rs::{record, Entity};
///
/// let agent = record!({ "id": "a1", "name": "Scout", "tier": "basic" });
/// assert_eq!(agent.id(), "a1");
/// ```
#[macro_export]
macro_rules! record {
    ({ $($body:tt)* }) => {
        $crate::Record::from_value($crate::__json!({ $($body)* }))
    };
}

/// Build an [`EntitySchema`] from field declarations, propagating
/// [`Error`] from invalid paths or overlapping fields
///
/// # Example
///
/// ```
/// use formsync_rs::{schema, FieldSchema};
///
/// # fn main() -> formsync_rs::Result<()> {
/// let schema = schema!("agent", [
///     FieldSchema::new("name")?.required("Name is required"),
///     FieldSchema::new("tier")?,
/// ])?;
/// assert_eq!(schema.fields.len(), 2);
/// # Ok(())
/// # }
/// ```
#[macro_export]
macro_rules! schema {
    ($entity_type:expr, [ $($field:expr),* $(,)? ]) => {
        $crate::EntitySchema::from_fields($entity_type, vec![ $($field),* ])
    };
}

#[cfg(test)]
mod test;
