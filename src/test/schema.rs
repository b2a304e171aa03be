use serde_json::json;

use crate::data::{changed_fields, get_path, is_blank, set_path};
use crate::test::agent_schema;
use crate::*;

#[test]
fn test_field_path_parse() -> Result<()> {
    let path = FieldPath::parse("designTimeModel.quality.maxTokens")?;
    assert_eq!(path.len(), 3);
    assert_eq!(path.as_str(), "designTimeModel.quality.maxTokens");

    assert!(FieldPath::parse("").is_err());
    assert!(FieldPath::parse("a..b").is_err());
    assert!(FieldPath::parse(".a").is_err());
    Ok(())
}

#[test]
fn test_field_path_prefix() -> Result<()> {
    let settings = FieldPath::parse("settings")?;
    let temperature = FieldPath::parse("settings.temperature")?;
    let other = FieldPath::parse("settingsx")?;

    assert!(settings.is_prefix_of(&temperature));
    assert!(!temperature.is_prefix_of(&settings));
    assert!(!settings.is_prefix_of(&other));
    assert_eq!(
        temperature.strip_prefix(&settings),
        Some(&["temperature".to_string()][..])
    );
    Ok(())
}

#[test]
fn test_set_path_creates_intermediate_objects() -> Result<()> {
    let mut document = json!({ "name": "Scout" });
    set_path(&mut document, &FieldPath::parse("settings.limits.tokens")?, json!(512))?;
    assert_eq!(document["settings"]["limits"]["tokens"], json!(512));

    // Scalars in the way are replaced by objects
    let mut document = json!({ "settings": 3 });
    set_path(&mut document, &FieldPath::parse("settings.temperature")?, json!(0.2))?;
    assert_eq!(document, json!({ "settings": { "temperature": 0.2 } }));
    Ok(())
}

#[test]
fn test_set_path_indexes_arrays() -> Result<()> {
    let mut document = json!({ "tags": ["a", "b"] });
    set_path(&mut document, &FieldPath::parse("tags.1")?, json!("z"))?;
    assert_eq!(document["tags"], json!(["a", "z"]));

    let error = set_path(&mut document, &FieldPath::parse("tags.5")?, json!("x"));
    assert!(matches!(error, Err(Error::InvalidFieldPath(_))));

    let error = set_path(&mut document, &FieldPath::parse("tags.first")?, json!("x"));
    assert!(matches!(error, Err(Error::InvalidFieldPath(_))));
    Ok(())
}

#[test]
fn test_get_path() {
    let document = json!({ "a": { "b": [10, { "c": true }] } });
    assert_eq!(get_path(&document, &["a", "b", "1", "c"]), Some(&json!(true)));
    assert_eq!(get_path(&document, &["a", "x"]), None);
    assert_eq!(get_path(&document, &["a", "b", "9"]), None);
}

#[test]
fn test_blank_values() {
    assert!(is_blank(&json!(null)));
    assert!(is_blank(&json!("   ")));
    assert!(is_blank(&json!([])));
    assert!(!is_blank(&json!(0)));
    assert!(!is_blank(&json!(false)));
}

#[test]
fn test_changed_fields() {
    let original = json!({ "name": "a", "tier": "basic", "gone": 1 });
    let working = json!({ "name": "b", "tier": "basic", "new": 2 });
    assert_eq!(changed_fields(&original, &working), vec!["gone", "name", "new"]);
}

#[test]
fn test_schema_rejects_overlapping_fields() -> Result<()> {
    let schema = EntitySchema::new("agent").with_field(FieldSchema::new("settings")?)?;

    let nested = schema.clone().with_field(FieldSchema::new("settings.temperature")?);
    assert!(matches!(nested, Err(Error::InvalidSchema(_))));

    let duplicate = schema.with_field(FieldSchema::new("settings")?);
    assert!(matches!(duplicate, Err(Error::InvalidSchema(_))));
    Ok(())
}

#[test]
fn test_schema_owner_of_nested_path() -> Result<()> {
    let schema = agent_schema()?;
    let path = FieldPath::parse("settings.temperature")?;
    let (index, rest) = schema.owner_of(&path).ok_or(Error::InvalidSchema("no owner".into()))?;
    assert_eq!(schema.fields[index].name.as_str(), "settings.temperature");
    assert!(rest.is_empty());

    assert!(schema.owner_of(&FieldPath::parse("settings")?).is_none());
    Ok(())
}

#[test]
fn test_schema_default_document() -> Result<()> {
    let document = agent_schema()?.default_document()?;
    assert_eq!(document["tier"], json!("basic"));
    assert_eq!(document["settings"]["temperature"], json!(0.7));
    assert_eq!(document["model_used"], json!(null));
    Ok(())
}

#[test]
fn test_schema_ranked_keeps_declaration_order_on_ties() -> Result<()> {
    let schema = schema!("agent", [
        FieldSchema::new("c")?.with_rank(2),
        FieldSchema::new("a")?,
        FieldSchema::new("b")?,
    ])?;
    let names = schema.ranked().iter().map(|f| f.name.to_string()).collect::<Vec<_>>();
    assert_eq!(names, vec!["a", "b", "c"]);
    Ok(())
}

#[test]
fn test_schema_serde() -> Result<()> {
    let schema = agent_schema()?;
    let text = serde_json::to_string(&schema)?;
    let restored: EntitySchema = serde_json::from_str(&text)?;
    assert_eq!(restored, schema);
    Ok(())
}

#[test]
fn test_field_validation_results_in_rule_order() -> Result<()> {
    let schema = agent_schema()?;
    let name = schema.field("name").ok_or(Error::InvalidSchema("name".into()))?;

    let outcome = name.validate(&json!(""));
    assert!(!outcome.is_valid);
    assert_eq!(outcome.errors(), vec!["Name is required"]);
    assert_eq!(outcome.guides(), vec!["Pick a name your team will recognize"]);

    let outcome = name.validate(&json!("Al"));
    assert_eq!(outcome.errors(), vec!["Name is too short"]);

    assert!(name.validate(&json!("Alice")).is_valid);
    Ok(())
}

#[test]
fn test_field_choices() -> Result<()> {
    let schema = agent_schema()?;
    let tier = schema.field("tier").ok_or(Error::InvalidSchema("tier".into()))?;

    assert!(tier.validate(&json!("pro")).is_valid);
    let outcome = tier.validate(&json!("enterprise"));
    assert!(!outcome.is_valid);
    assert_eq!(outcome.errors(), vec!["tier must be one of the available choices"]);
    Ok(())
}

#[test]
fn test_display_policy() {
    let mut field = FieldDescriptor::new("name", json!(""));
    field.validation_results = vec![
        ValidationRule::required("Name is required").check(&json!("")),
        ValidationRule::guide("Be descriptive").check(&json!("")),
    ];

    // Untouched: nothing shown
    assert!(field.visible_errors().is_empty());
    assert!(field.visible_guides().is_empty());

    field.behavior.merge(BehaviorPatch::focus());
    assert!(field.visible_errors().is_empty());
    assert_eq!(field.visible_guides(), vec!["Be descriptive"]);

    field.behavior.merge(BehaviorPatch::blur());
    assert_eq!(field.visible_errors(), vec!["Name is required"]);
    assert!(field.visible_guides().is_empty());
}

#[test]
fn test_config_operation_names() {
    let config = SessionConfig::new("agent");
    assert_eq!(config.operation("update"), "agent/update");
    assert!(config.is_unsaved_id("temp-1"));
    assert!(config.is_unsaved_id(""));
    assert!(!config.is_unsaved_id("42"));
    assert_eq!(config.debounce_window, crate::config::DEFAULT_DEBOUNCE);
}

#[test]
fn test_config_serde_uses_millis() -> Result<()> {
    let config: SessionConfig = serde_json::from_value(json!({ "feature": "agent", "debounceWindow": 50 }))?;
    assert_eq!(config.debounce_window, std::time::Duration::from_millis(50));
    assert_eq!(config.temp_id_prefix, "temp-");
    Ok(())
}
