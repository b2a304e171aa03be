mod cache;
mod entity;
mod entity_schema;
mod field;
mod field_schema;
mod notifications;
mod notify_token;
mod validation;
mod value;

pub use cache::{Entity, NormalizedStore, Record};
pub use entity::EntityDescriptor;
pub use entity_schema::EntitySchema;
pub use field::{BehaviorPatch, FieldBehavior, FieldDescriptor, ValidationOutcome, ValidationResult};
pub use field_schema::{FieldSchema, RuleKind, ValidationRule};
pub use notifications::{
    ErrorReporter, Listener, ListenerFailure, NotificationManager, NotificationReceiver, Subscription,
};
pub use notify_token::{NotificationId, SubscriptionToken};
pub use value::{changed_fields, get_path, is_blank, set_path, FieldPath, PATH_DELIMITER};
pub(crate) use value::set_segments;

pub type Timestamp = time::OffsetDateTime;

pub fn now() -> Timestamp {
    time::OffsetDateTime::now_utc()
}
