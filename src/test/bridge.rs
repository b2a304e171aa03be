use std::cell::Cell;
use std::rc::Rc;

use serde_json::json;

use crate::test::{agent, orchestrator};
use crate::*;

fn open() -> Result<Rc<Orchestrator<Record>>> {
    let orchestrator = Rc::new(orchestrator()?);
    orchestrator.open(agent("a", "Alpha"))?;
    Ok(orchestrator)
}

fn model_of(orchestrator: &Orchestrator<Record>) -> Result<Rc<EntityDescriptor>> {
    orchestrator.model().ok_or(Error::NoWorkingInstance)
}

#[test]
fn test_single_upstream_subscription() -> Result<()> {
    let orchestrator = open()?;
    let model = model_of(&orchestrator)?;
    let bridge = Bridge::new(FieldValueStore::new(model.clone(), "name")?);
    assert!(!bridge.is_connected());

    let count = Rc::new(Cell::new(0));
    let subscriptions = (0..5)
        .map(|_| {
            let count = count.clone();
            bridge.subscribe(move || count.set(count.get() + 1))
        })
        .collect::<Vec<Subscription>>();

    assert_eq!(bridge.upstream_subscriptions(), 1);
    assert_eq!(bridge.subscriber_count(), 5);
    assert_eq!(orchestrator.notifier().subscriber_count(&model.notification_id()), 1);

    orchestrator.update_field("name", json!("Alpha 2"))?;
    assert_eq!(bridge.deliveries(), 1);
    assert_eq!(count.get(), 5);
    assert_eq!(bridge.get_snapshot(), json!("Alpha 2"));

    drop(subscriptions);
    assert_eq!(bridge.subscriber_count(), 0);
    Ok(())
}

#[test]
fn test_teardown_removes_upstream_subscription() -> Result<()> {
    let orchestrator = open()?;
    let model = model_of(&orchestrator)?;
    let bridge = Bridge::new(FieldValueStore::new(model.clone(), "name")?);

    let count = Rc::new(Cell::new(0));
    let _sub = bridge.subscribe({
        let count = count.clone();
        move || count.set(count.get() + 1)
    });

    bridge.teardown();
    bridge.teardown();
    assert!(bridge.is_torn_down());
    assert!(!bridge.is_connected());
    assert_eq!(orchestrator.notifier().subscriber_count(&model.notification_id()), 0);

    orchestrator.update_field("name", json!("Alpha 2"))?;
    assert_eq!(count.get(), 0);
    assert_eq!(bridge.deliveries(), 0);

    // A late subscriber does not reconnect
    let _late = bridge.subscribe(|| {});
    assert_eq!(bridge.upstream_subscriptions(), 1);
    Ok(())
}

#[test]
fn test_drop_tears_down() -> Result<()> {
    let orchestrator = open()?;
    let model = model_of(&orchestrator)?;
    let bridge = Bridge::new(FieldValueStore::new(model.clone(), "name")?);
    let _sub = bridge.subscribe(|| {});

    drop(bridge);
    assert_eq!(orchestrator.notifier().subscriber_count(&model.notification_id()), 0);
    Ok(())
}

#[test]
fn test_field_value_store_nested_path() -> Result<()> {
    let orchestrator = open()?;
    let store = FieldValueStore::new(model_of(&orchestrator)?, "settings.temperature")?;
    assert_eq!(store.get_snapshot(), json!(0.7));

    orchestrator.update_field("settings.temperature", json!(1.2))?;
    assert_eq!(store.get_snapshot(), json!(1.2));

    assert!(FieldValueStore::new(model_of(&orchestrator)?, "nope").is_err());
    Ok(())
}

#[test]
fn test_field_validation_store() -> Result<()> {
    let orchestrator = open()?;
    let bridge = Bridge::new(FieldValidationStore::new(model_of(&orchestrator)?, "name")?);
    let count = Rc::new(Cell::new(0));
    let _sub = bridge.subscribe({
        let count = count.clone();
        move || count.set(count.get() + 1)
    });

    orchestrator.update_field("name", json!(""))?;
    orchestrator.blur_field("name")?;

    let field = bridge.get_snapshot().ok_or(Error::NoWorkingInstance)?;
    assert_eq!(field.visible_errors(), vec!["Name is required"]);
    assert_eq!(count.get(), 2);
    Ok(())
}

#[test]
fn test_status_store_tracks_dirty() -> Result<()> {
    let orchestrator = open()?;
    let bridge = Rc::new(Bridge::new(StatusStore::new(orchestrator.clone())));
    let status = bridge.accessor();

    let dirty = Rc::new(Cell::new(false));
    let _sub = bridge.subscribe({
        let dirty = dirty.clone();
        let bridge = Rc::downgrade(&bridge);
        move || {
            if let Some(bridge) = bridge.upgrade() {
                dirty.set(bridge.get_snapshot().is_dirty);
            }
        }
    });

    orchestrator.update_field("name", json!("Alpha 2"))?;
    assert!(dirty.get());
    assert!(status().can_save());

    orchestrator.discard()?;
    assert!(!dirty.get());
    assert_eq!(status().phase, SessionPhase::Ready);
    Ok(())
}

#[test]
fn test_disposed_model_stops_delivering() -> Result<()> {
    let orchestrator = open()?;
    let bridge = Bridge::new(FieldValueStore::new(model_of(&orchestrator)?, "name")?);
    let _sub = bridge.subscribe(|| {});
    assert!(bridge.is_connected());

    // Loading another entity disposes the model the bridge points at
    let ticket = orchestrator.begin_load("b");
    orchestrator.complete_load(ticket, Response::ok(serde_json::to_value(agent("b", "Bravo"))?))?;

    assert_eq!(bridge.source().get_snapshot(), json!("Alpha"));
    orchestrator.update_field("name", json!("Bravo 2"))?;
    assert_eq!(bridge.deliveries(), 0);
    Ok(())
}
