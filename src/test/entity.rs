use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::json;

use crate::test::{agent, agent_schema};
use crate::*;

fn model() -> Result<(NotificationManager, EntityDescriptor)> {
    let notifier = NotificationManager::new();
    let document = serde_json::to_value(agent("a1", "Scout"))?;
    let model = EntityDescriptor::new(Rc::new(agent_schema()?), notifier.clone(), &document)?;
    Ok((notifier, model))
}

fn counting(model: &EntityDescriptor) -> (Rc<Cell<u32>>, Subscription) {
    let count = Rc::new(Cell::new(0));
    let subscription = model.subscribe({
        let count = count.clone();
        move || count.set(count.get() + 1)
    });
    (count, subscription)
}

#[test]
fn test_model_reads_document_and_defaults() -> Result<()> {
    let notifier = NotificationManager::new();
    let model = EntityDescriptor::new(
        Rc::new(agent_schema()?),
        notifier,
        &json!({ "id": "a1", "name": "Scout" }),
    )?;

    assert_eq!(model.get_field("name")?.value, json!("Scout"));
    assert_eq!(model.get_field("tier")?.value, json!("basic"));
    assert_eq!(model.value("settings.temperature")?, json!(0.7));
    assert_eq!(model.field_names().len(), 7);
    Ok(())
}

#[test]
fn test_get_field_unknown_is_field_not_found() -> Result<()> {
    let (_, model) = model()?;
    let error = model.get_field("nope").err();
    assert!(error.is_some_and(|e| e.is_field_not_found()));
    assert!(model.update_field("nope", json!(1)).is_err_and(|e| e.is_field_not_found()));
    Ok(())
}

#[test]
fn test_update_field_notifies_with_state_already_applied() -> Result<()> {
    let (_, model) = model()?;
    let model = Rc::new(model);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let _sub = model.subscribe({
        let model = Rc::downgrade(&model);
        let seen = seen.clone();
        move || {
            if let Some(model) = model.upgrade() {
                seen.borrow_mut().push(model.value("name").unwrap_or_default());
            }
        }
    });

    model.update_field("name", json!("Ranger"))?;
    assert_eq!(*seen.borrow(), vec![json!("Ranger")]);
    Ok(())
}

#[test]
fn test_update_nested_path() -> Result<()> {
    let (_, model) = model()?;
    let (count, _sub) = counting(&model);

    model.update_field("settings.temperature", json!(1.1))?;
    assert_eq!(model.value("settings.temperature")?, json!(1.1));
    assert_eq!(model.to_document()?["settings"]["temperature"], json!(1.1));
    assert_eq!(count.get(), 1);
    Ok(())
}

#[test]
fn test_update_does_not_validate() -> Result<()> {
    let (_, model) = model()?;
    model.update_field("name", json!(""))?;
    assert!(model.get_field("name")?.validation_results.is_empty());
    assert!(model.is_valid());
    Ok(())
}

#[test]
fn test_pre_validate_is_pure() -> Result<()> {
    let (_, model) = model()?;
    let (count, _sub) = counting(&model);

    let outcome = model.pre_validate_field("name", &json!(""))?;
    assert!(!outcome.is_valid);
    assert_eq!(count.get(), 0);
    assert!(model.get_field("name")?.validation_results.is_empty());
    assert_eq!(model.get_field("name")?.value, json!("Scout"));
    Ok(())
}

#[test]
fn test_validate_field_stores_results() -> Result<()> {
    let (_, model) = model()?;
    let (count, _sub) = counting(&model);

    model.update_field("name", json!("Al"))?;
    let outcome = model.validate_field("name")?;
    assert!(!outcome.is_valid);
    assert_eq!(count.get(), 2);

    let stored = model.get_validations(Some("name"))?;
    assert_eq!(stored, vec![outcome]);
    assert!(!model.is_valid());
    Ok(())
}

#[test]
fn test_validate_all_notifies_once() -> Result<()> {
    let (_, model) = model()?;
    let (count, _sub) = counting(&model);

    model.update_field("settings.temperature", json!(3))?;
    assert!(!model.validate_all());
    assert_eq!(count.get(), 2);
    assert_eq!(model.get_validations(None)?.len(), 7);
    Ok(())
}

#[test]
fn test_behavior_merge() -> Result<()> {
    let (_, model) = model()?;
    model.set_field_behavior("name", BehaviorPatch::focus())?;
    assert!(model.get_field("name")?.behavior.is_focus);
    assert!(!model.get_field("name")?.behavior.has_been_touched);

    model.set_field_behavior("name", BehaviorPatch::blur())?;
    let behavior = model.get_field("name")?.behavior;
    assert!(!behavior.is_focus);
    assert!(behavior.has_been_touched);
    Ok(())
}

#[test]
fn test_load_document_keeps_behavior() -> Result<()> {
    let (_, model) = model()?;
    model.set_field_behavior("name", BehaviorPatch::blur())?;
    model.load_document(&json!({ "id": "a1", "name": "Other" }));

    let name = model.get_field("name")?;
    assert_eq!(name.value, json!("Other"));
    assert!(name.behavior.has_been_touched);
    assert_eq!(model.get_field("tier")?.value, json!("basic"));
    Ok(())
}

#[test]
fn test_dispose_releases_subscriptions() -> Result<()> {
    let (notifier, model) = model()?;
    let (count, subscription) = counting(&model);
    let key = model.notification_id();

    model.dispose();
    model.dispose();
    assert!(model.is_disposed());
    assert!(!subscription.is_active());
    assert_eq!(notifier.subscriber_count(&key), 0);

    notifier.notify(&key);
    assert_eq!(count.get(), 0);
    Ok(())
}

#[test]
fn test_drop_disposes() -> Result<()> {
    let (notifier, model) = model()?;
    let (_, subscription) = counting(&model);
    drop(model);
    assert!(!subscription.is_active());
    assert_eq!(notifier.key_count(), 0);
    Ok(())
}

#[test]
fn test_two_models_have_distinct_keys() -> Result<()> {
    let notifier = NotificationManager::new();
    let schema = Rc::new(agent_schema()?);
    let a = EntityDescriptor::new(schema.clone(), notifier.clone(), &json!({}))?;
    let b = EntityDescriptor::new(schema, notifier, &json!({}))?;
    let (count_a, _sa) = counting(&a);
    let (count_b, _sb) = counting(&b);

    b.update_field("name", json!("B"))?;
    assert_ne!(a.notification_id(), b.notification_id());
    assert_eq!(count_a.get(), 0);
    assert_eq!(count_b.get(), 1);
    Ok(())
}
