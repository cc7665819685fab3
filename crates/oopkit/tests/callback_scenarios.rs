//! End-to-end registry scenarios.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use oopkit::{
    Callable, Callback, CallbackConfig, CallbackError, DispatchFailure, Invoke, PriorityCallback,
    SingleCallCallback, WeakList, WeakRef,
};
use tracing::Level;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(Level::TRACE)
        .try_init();
}

struct Listener {
    calls: Cell<u32>,
    last: Cell<i32>,
}

impl Listener {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            calls: Cell::new(0),
            last: Cell::new(0),
        })
    }

    fn on_event(&self, value: &i32) {
        self.calls.set(self.calls.get() + 1);
        self.last.set(*value);
    }

    fn on_replay(&self, value: &i32) {
        self.calls.set(self.calls.get() + 1);
        self.last.set(*value);
    }
}

#[test]
fn bound_method_registered_twice_is_called_once() {
    let listener = Listener::new();
    let event = Callback::new();
    event
        .register(Callable::method(&listener, Listener::on_event))
        .unwrap();
    event
        .register(Callable::method(&listener, Listener::on_event))
        .unwrap();

    event.call(&3).unwrap();
    assert_eq!(listener.calls.get(), 1);
    assert_eq!(listener.last.get(), 3);
}

#[test]
fn methods_with_identical_bodies_are_separate_entries() {
    let listener = Listener::new();
    let event = Callback::new();
    let replay = Callable::method(&listener, Listener::on_replay);
    event
        .register(Callable::method(&listener, Listener::on_event))
        .unwrap();
    event.register(replay.clone()).unwrap();
    assert_eq!(event.len(), 2);

    event.call(&4).unwrap();
    assert_eq!(listener.calls.get(), 2);

    assert!(event.unregister(&replay));
    assert_eq!(event.len(), 1);
    event.call(&5).unwrap();
    assert_eq!(listener.calls.get(), 3);
}

#[test]
fn dead_listener_is_pruned_after_one_call() {
    init_tracing();
    let listener = Listener::new();
    let event = Callback::new();
    event
        .register(Callable::method(&listener, Listener::on_event))
        .unwrap();
    assert_eq!(event.len(), 1);

    drop(listener);
    event.call(&1).unwrap();
    assert_eq!(event.len(), 0);
}

#[test]
fn dead_listener_is_pruned_after_one_contains() {
    init_tracing();
    let listener = Listener::new();
    let callable = Callable::method(&listener, Listener::on_event);
    let event = Callback::new();
    event.register(callable.clone()).unwrap();

    drop(listener);
    assert!(!event.contains(&callable));
    assert_eq!(event.len(), 0);
}

#[test]
fn registry_does_not_keep_listener_alive() {
    let listener = Listener::new();
    let handle = WeakRef::new(&listener);
    let event = Callback::new();
    event
        .register(Callable::method(&listener, Listener::on_event))
        .unwrap();
    drop(listener);
    assert!(handle.upgrade().is_none());
    event.call(&0).unwrap();
}

#[test]
fn failing_callable_stops_the_round() {
    init_tracing();
    let second = Listener::new();
    let event = Callback::new();
    event
        .register(Callable::new(|_: &i32| -> Result<(), String> {
            Err("disk full".to_owned())
        }))
        .unwrap();
    event
        .register(Callable::method(&second, Listener::on_event))
        .unwrap();

    let err = event.call(&1).unwrap_err();
    assert!(matches!(err, CallbackError::Failed(_)));
    assert_eq!(second.calls.get(), 0);
}

#[test]
fn reporter_is_told_before_error_returns() {
    let reported = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&reported);
    let event = Callback::with_config(CallbackConfig::default().with_reporter(
        move |failure: &DispatchFailure<'_>| sink.borrow_mut().push(failure.to_string()),
    ));
    event
        .register(Callable::new(|_: &()| -> Result<(), &'static str> { Err("boom") }).named("saver"))
        .unwrap();

    assert!(event.call(&()).is_err());
    assert_eq!(
        reported.borrow().as_slice(),
        ["error while trying to call saver: callable failed: boom"]
    );
}

#[test]
fn token_and_unregister_are_equivalent() {
    let listener = Listener::new();
    let callable = Callable::method(&listener, Listener::on_event);
    let event = Callback::new();

    let token = event.register(callable.clone()).unwrap();
    token.unregister();
    token.unregister();
    assert!(!event.contains(&callable));

    event.register(callable.clone()).unwrap();
    assert!(event.unregister(&callable));
    assert!(!event.unregister(&callable));

    event.call(&9).unwrap();
    assert_eq!(listener.calls.get(), 0);
}

#[test]
fn priority_registry_orders_dispatch() {
    let order = Rc::new(RefCell::new(Vec::new()));
    let event = PriorityCallback::new();
    for (id, priority) in [(1, 2), (2, 2), (3, 1), (4, 3), (5, 2)] {
        let sink = Rc::clone(&order);
        event
            .register_with_priority(
                Callable::new(move |_: &()| sink.borrow_mut().push(id)),
                priority,
            )
            .unwrap();
    }
    event.call(&()).unwrap();
    assert_eq!(order.borrow().as_slice(), [3, 1, 2, 5, 4]);
}

#[test]
fn one_shot_replays_and_refuses_second_fire() {
    let loaded = SingleCallCallback::new();
    let early = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&early);
    loaded
        .register(Callable::new(move |args: &(u32,)| sink.borrow_mut().push(*args)))
        .unwrap();

    loaded.call((10,)).unwrap();
    assert!(matches!(loaded.call((11,)), Err(CallbackError::AlreadyFired)));

    let late = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&late);
    loaded
        .register(Callable::new(move |args: &(u32,)| sink.borrow_mut().push(*args)))
        .unwrap();

    assert_eq!(early.borrow().as_slice(), [(10,)]);
    assert_eq!(late.borrow().as_slice(), [(10,)]);

    loaded.allow_calling_again();
    loaded.call((12,)).unwrap();
    assert_eq!(early.borrow().as_slice(), [(10,), (12,)]);
}

struct Relay {
    forwarded: Cell<u32>,
}

impl Invoke<i32> for Relay {
    fn invoke(&self, _: &i32) -> oopkit::CallResult {
        self.forwarded.set(self.forwarded.get() + 1);
        Ok(())
    }
}

#[test]
fn callable_objects_and_nested_registries() {
    let relay = Rc::new(Relay {
        forwarded: Cell::new(0),
    });
    let inner = Rc::new(Callback::new());
    inner.register(Callable::object(&relay)).unwrap();

    let outer: Callback<i32> = Callback::new();
    outer.register(Callable::object(&inner)).unwrap();
    outer.call(&1).unwrap();
    assert_eq!(relay.forwarded.get(), 1);

    drop(relay);
    outer.call(&1).unwrap();
    assert!(inner.is_empty());
    assert_eq!(outer.len(), 1);
}

#[test]
fn weak_list_of_listeners() {
    let a = Listener::new();
    let b = Listener::new();
    let mut listeners = WeakList::new();
    listeners.push(&a);
    listeners.push(&b);

    drop(a);
    for listener in listeners.iter() {
        listener.on_event(&5);
    }
    assert_eq!(b.calls.get(), 1);
    assert_eq!(listeners.len(), 1);
}
