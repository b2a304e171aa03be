use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::*;

fn counter() -> (Rc<Cell<u32>>, impl Fn() + 'static) {
    let count = Rc::new(Cell::new(0));
    let clone = count.clone();
    (count, move || clone.set(clone.get() + 1))
}

#[test]
fn test_notify_invokes_listeners_in_registration_order() {
    let manager = NotificationManager::new();
    let key = NotificationId::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    let _subs = (0..3)
        .map(|i| {
            let order = order.clone();
            manager.subscribe(key, move || order.borrow_mut().push(i))
        })
        .collect::<Vec<Subscription>>();

    assert_eq!(manager.notify(&key), 3);
    assert_eq!(*order.borrow(), vec![0, 1, 2]);
}

#[test]
fn test_notify_unknown_key_is_noop() {
    let manager = NotificationManager::new();
    assert_eq!(manager.notify(&NotificationId::new()), 0);
}

#[test]
fn test_keys_are_isolated() {
    let manager = NotificationManager::new();
    let a = NotificationId::new();
    let b = NotificationId::new();
    let (count_a, listener_a) = counter();
    let (count_b, listener_b) = counter();

    let _sa = manager.subscribe(a, listener_a);
    let _sb = manager.subscribe(b, listener_b);

    manager.notify(&a);
    manager.notify(&a);
    assert_eq!(count_a.get(), 2);
    assert_eq!(count_b.get(), 0);
}

#[test]
fn test_drop_unsubscribes_exactly_one_registration() {
    let manager = NotificationManager::new();
    let key = NotificationId::new();
    let (count, listener) = counter();
    let listener = Rc::new(listener);

    let first = manager.subscribe(key, {
        let listener = listener.clone();
        move || listener()
    });
    let second = manager.subscribe(key, {
        let listener = listener.clone();
        move || listener()
    });
    assert_eq!(manager.subscriber_count(&key), 2);

    drop(first);
    assert_eq!(manager.subscriber_count(&key), 1);
    assert!(second.is_active());

    manager.notify(&key);
    assert_eq!(count.get(), 1);

    second.unsubscribe();
    assert_eq!(manager.key_count(), 0);
}

#[test]
fn test_unsubscribe_twice_returns_false() {
    let manager = NotificationManager::new();
    let key = NotificationId::new();
    let subscription = manager.subscribe(key, || {});
    let token = subscription.token();

    assert!(manager.unsubscribe(&key, token));
    assert!(!manager.unsubscribe(&key, token));
    assert!(!subscription.is_active());
}

#[test]
fn test_release_removes_every_listener_for_key() {
    let manager = NotificationManager::new();
    let key = NotificationId::new();
    let (count, listener) = counter();

    let subscription = manager.subscribe(key, listener);
    let _other = manager.subscribe(key, || {});
    assert_eq!(manager.release(&key), 2);

    assert_eq!(manager.notify(&key), 0);
    assert_eq!(count.get(), 0);
    // Dropping a released subscription is harmless
    drop(subscription);
    assert_eq!(manager.key_count(), 0);
}

#[test]
fn test_panicking_listener_does_not_stop_delivery() {
    let manager = NotificationManager::new();
    let key = NotificationId::new();
    let (count, listener) = counter();
    let reported = Rc::new(RefCell::new(Vec::new()));

    manager.set_error_reporter({
        let reported = reported.clone();
        move |failure: &ListenerFailure| reported.borrow_mut().push(failure.message.clone())
    });

    let _bad = manager.subscribe(key, || panic!("listener exploded"));
    let _good = manager.subscribe(key, listener);

    assert_eq!(manager.notify(&key), 2);
    assert_eq!(count.get(), 1);
    assert_eq!(manager.failure_count(), 1);
    assert_eq!(*reported.borrow(), vec!["listener exploded".to_string()]);
}

#[test]
fn test_subscribe_during_notify_waits_for_next_cycle() {
    let manager = NotificationManager::new();
    let key = NotificationId::new();
    let (count, listener) = counter();
    let listener = Rc::new(listener);
    let late = Rc::new(RefCell::new(Vec::new()));

    let _sub = manager.subscribe(key, {
        let manager = manager.clone();
        let late = late.clone();
        let listener = listener.clone();
        move || {
            if late.borrow().is_empty() {
                let listener = listener.clone();
                let subscription = manager.subscribe(key, move || listener());
                late.borrow_mut().push(subscription);
            }
        }
    });

    manager.notify(&key);
    assert_eq!(count.get(), 0);

    manager.notify(&key);
    assert_eq!(count.get(), 1);
}

#[test]
fn test_unsubscribe_during_notify_still_delivers_current_cycle() {
    let manager = NotificationManager::new();
    let key = NotificationId::new();
    let (count, listener) = counter();
    let victim: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

    let _first = manager.subscribe(key, {
        let victim = victim.clone();
        move || {
            victim.borrow_mut().take();
        }
    });
    *victim.borrow_mut() = Some(manager.subscribe(key, listener));

    manager.notify(&key);
    assert_eq!(count.get(), 1);

    manager.notify(&key);
    assert_eq!(count.get(), 1);
    assert_eq!(manager.subscriber_count(&key), 1);
}

#[test]
fn test_listener_may_notify_other_key() {
    let manager = NotificationManager::new();
    let outer = NotificationId::new();
    let inner = NotificationId::new();
    let (count, listener) = counter();

    let _inner = manager.subscribe(inner, listener);
    let _outer = manager.subscribe(outer, {
        let manager = manager.clone();
        move || {
            manager.notify(&inner);
        }
    });

    manager.notify(&outer);
    assert_eq!(count.get(), 1);
    assert_eq!(manager.failure_count(), 0);
}

#[tokio::test]
async fn test_subscribe_channel() {
    let manager = NotificationManager::new();
    let key = NotificationId::new();
    let (subscription, mut receiver) = manager.subscribe_channel(key);

    manager.notify(&key);
    manager.notify(&key);
    assert_eq!(receiver.recv().await, Some(key));
    assert_eq!(receiver.recv().await, Some(key));

    drop(subscription);
    assert_eq!(receiver.recv().await, None);
}

#[test]
fn test_separate_managers_do_not_share_keys() {
    let first = NotificationManager::new();
    let second = NotificationManager::new();
    let key = NotificationId::new();
    let (count, listener) = counter();

    let _sub = first.subscribe(key, listener);
    assert_eq!(second.notify(&key), 0);
    assert_eq!(count.get(), 0);
}
