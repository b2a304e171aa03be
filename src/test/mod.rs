mod bridge;
mod entity;
mod notifications;
mod schema;

use serde_json::json;

use crate::*;

pub(crate) fn agent_schema() -> Result<EntitySchema> {
    schema!("agent", [
        FieldSchema::new("id")?,
        FieldSchema::new("name")?
            .required("Name is required")
            .with_rule(ValidationRule::min_length(3, "Name is too short"))
            .with_rule(ValidationRule::guide("Pick a name your team will recognize")),
        FieldSchema::new("description")?.with_default(json!("")),
        FieldSchema::new("tier")?
            .with_default(json!("basic"))
            .with_choices(vec![json!("basic"), json!("pro")]),
        FieldSchema::new("quality")?.with_default(json!("standard")),
        FieldSchema::new("model_used")?,
        FieldSchema::new("settings.temperature")?
            .with_default(json!(0.7))
            .with_rule(ValidationRule::range(Some(0.0), Some(2.0), "Temperature must be between 0 and 2")),
    ])
}

pub(crate) fn agent(id: &str, name: &str) -> Record {
    record!({
        "id": id,
        "name": name,
        "description": "",
        "tier": "basic",
        "quality": "standard",
        "model_used": "basic-standard",
        "settings": { "temperature": 0.7 }
    })
}

pub(crate) fn orchestrator() -> Result<Orchestrator<Record>> {
    Orchestrator::new(SessionConfig::new("agent"), agent_schema()?, NotificationManager::new())
}

/// Tiers constrain qualities; the pair selects the model.
pub(crate) struct TierResolver;

impl TierResolver {
    fn qualities(tier: &str) -> &'static [&'static str] {
        match tier {
            "pro" => &["standard", "high"],
            _ => &["standard", "fast"],
        }
    }
}

impl DependencyResolver for TierResolver {
    fn is_valid(&self, source: &serde_json::Value, dependent: &serde_json::Value) -> bool {
        match (source.as_str(), dependent.as_str()) {
            (Some(tier), Some(quality)) => Self::qualities(tier).contains(&quality),
            _ => false,
        }
    }

    fn default_for(&self, source: &serde_json::Value) -> Option<serde_json::Value> {
        match source.as_str() {
            Some("pro") => Some(json!("high")),
            _ => None,
        }
    }

    fn derive(&self, source: &serde_json::Value, dependent: &serde_json::Value) -> Option<serde_json::Value> {
        Some(json!(format!("{}-{}", source.as_str()?, dependent.as_str()?)))
    }
}

pub(crate) fn tier_cascade() -> Result<DependentFieldCascade> {
    DependentFieldCascade::new("tier", "quality", TierResolver)?.with_derived("model_used")
}
