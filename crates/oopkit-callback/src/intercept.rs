//! Before/after hooks around method slots.
//!
//! # Design
//!
//! Wrapped slots live in a thread-local side table keyed by
//! `(owner, method name)`, where the owner is either one receiver (instance
//! level) or a receiver type (class level). [`BoundMethod::call`] consults
//! the table before running the undecorated function:
//!
//! 1. an instance-level wrapper for this receiver, else
//! 2. a class-level wrapper for the receiver type, else
//! 3. the function itself.
//!
//! A [`MethodWrapper`] owns two lazily created [`Callback`] registries.
//! Invocation runs the before hooks, the original, then the after hooks,
//! and returns the original's value.
//!
//! Hook registries are invoked with `(receiver, args)`, at class level as
//! well as instance level. [`before`] and [`after`] adapt a hook that only
//! wants the arguments; [`before_with_receiver`] and [`after_with_receiver`]
//! register one that sees the receiver too. The receiver is held strongly
//! for the duration of a call only.
//!
//! # Stacking
//!
//! An instance wrapper created while a class wrapper exists delegates to
//! the class wrapper, so class hooks still fire for that receiver, nested
//! inside its own hooks. An instance wrapper created first calls the
//! function directly and never sees class hooks added later.
//!
//! # Failure Modes
//!
//! | Situation | Behavior |
//! |-----------|----------|
//! | wrapping an already wrapped slot | existing wrapper returned |
//! | same slot name, different signature | `SignatureMismatch` |
//! | a hook fails | rest of the invocation skipped, error returned |
//! | instance wrapper called after its receiver dropped | `DeadReference` |
//! | receiver dropped | its wrappers, and the receiver's allocation, are kept until the next [`wrap`], [`remove`] or [`prune_dead_wrappers`] |

use std::any::{Any, TypeId, type_name};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

#[cfg(feature = "tracing")]
use tracing::trace;

use crate::callable::{Callable, CallableKey};
use crate::error::CallbackError;
use crate::method::{BoundMethod, Method};
use crate::registry::Callback;

// ---------------------------------------------------------------------------
// Side table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Owner {
    Instance(usize),
    Class(TypeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SlotKey {
    owner: Owner,
    name: &'static str,
}

impl SlotKey {
    fn instance<R>(receiver: &R, name: &'static str) -> Self {
        Self {
            owner: Owner::Instance(std::ptr::from_ref(receiver).cast::<()>() as usize),
            name,
        }
    }

    fn class<R: 'static>(name: &'static str) -> Self {
        Self {
            owner: Owner::Class(TypeId::of::<R>()),
            name,
        }
    }
}

struct SlotEntry {
    wrapper: Rc<dyn Any>,
    /// Set for instance wrappers. Keeps the receiver address reserved.
    receiver: Option<Weak<dyn Any>>,
}

impl SlotEntry {
    fn is_alive(&self) -> bool {
        self.receiver
            .as_ref()
            .is_none_or(|receiver| receiver.strong_count() > 0)
    }
}

thread_local! {
    static SLOTS: RefCell<HashMap<SlotKey, SlotEntry>> = RefCell::new(HashMap::new());
}

fn lookup<R: 'static, A: 'static, O: 'static>(
    key: SlotKey,
) -> Result<Option<Rc<MethodWrapper<R, A, O>>>, CallbackError> {
    let Some(wrapper) = SLOTS.with(|slots| {
        slots
            .borrow()
            .get(&key)
            .map(|entry| Rc::clone(&entry.wrapper))
    }) else {
        return Ok(None);
    };
    wrapper
        .downcast::<MethodWrapper<R, A, O>>()
        .map(Some)
        .map_err(|_| CallbackError::SignatureMismatch { method: key.name })
}

fn install(key: SlotKey, wrapper: Rc<dyn Any>, receiver: Option<Weak<dyn Any>>) {
    prune_dead_wrappers();
    SLOTS.with(|slots| {
        slots
            .borrow_mut()
            .insert(key, SlotEntry { wrapper, receiver });
    });
    #[cfg(feature = "tracing")]
    trace!(?key, "installed method wrapper");
}

/// Drop instance wrappers whose receiver is gone. Returns how many were
/// removed. Runs automatically whenever a wrapper is installed or a hook is
/// removed.
pub fn prune_dead_wrappers() -> usize {
    SLOTS.with(|slots| {
        let mut slots = slots.borrow_mut();
        let before = slots.len();
        slots.retain(|_, entry| entry.is_alive());
        let pruned = before - slots.len();
        #[cfg(feature = "tracing")]
        if pruned > 0 {
            trace!(pruned, "pruned dead instance wrappers");
        }
        pruned
    })
}

/// Run a call through the side table.
pub(crate) fn dispatch<R: 'static, A: Clone + 'static, O: 'static>(
    receiver: &Rc<R>,
    method: &Method<R, A, O>,
    args: &A,
) -> Result<O, CallbackError> {
    if let Some(wrapper) = lookup(SlotKey::instance(&**receiver, method.name()))? {
        return wrapper.call_on(receiver, args);
    }
    if let Some(wrapper) = lookup(SlotKey::class::<R>(method.name()))? {
        return wrapper.call_on(receiver, args);
    }
    Ok((method.func())(receiver, args))
}

// ---------------------------------------------------------------------------
// MethodWrapper
// ---------------------------------------------------------------------------

enum Original<R, A, O> {
    Direct,
    Class(Rc<MethodWrapper<R, A, O>>),
}

type Hooks<R, A> = RefCell<Option<Callback<(Rc<R>, A)>>>;

/// A method slot decorated with before and after hooks.
pub struct MethodWrapper<R, A, O> {
    method: Method<R, A, O>,
    /// Set for instance-level wrappers.
    receiver: Option<Weak<R>>,
    original: Original<R, A, O>,
    before: Hooks<R, A>,
    after: Hooks<R, A>,
}

impl<R, A, O> MethodWrapper<R, A, O> {
    fn new(method: Method<R, A, O>, receiver: Option<Weak<R>>, original: Original<R, A, O>) -> Self {
        Self {
            method,
            receiver,
            original,
            before: RefCell::new(None),
            after: RefCell::new(None),
        }
    }

    /// The wrapped slot.
    #[must_use]
    pub fn method(&self) -> Method<R, A, O> {
        self.method
    }

    /// Whether this wrapper belongs to a single receiver.
    #[must_use]
    pub fn is_instance_level(&self) -> bool {
        self.receiver.is_some()
    }

    /// Whether this instance wrapper delegates to a class wrapper.
    #[must_use]
    pub fn delegates_to_class(&self) -> bool {
        matches!(self.original, Original::Class(_))
    }

    /// Registry run before the original, with `(receiver, args)`. Created
    /// on first use.
    pub fn before_hooks(&self) -> Callback<(Rc<R>, A)> {
        Self::hooks(&self.before)
    }

    /// Registry run after the original, with `(receiver, args)`. Created on
    /// first use.
    pub fn after_hooks(&self) -> Callback<(Rc<R>, A)> {
        Self::hooks(&self.after)
    }

    /// Remove `callable` from whichever hook registry holds it.
    pub fn remove<X>(&self, callable: &Callable<X>) -> bool {
        self.remove_key(callable.key())
    }

    /// Remove the hook stored under `key` from both registries.
    pub fn remove_key(&self, key: CallableKey) -> bool {
        let before = Self::existing(&self.before).is_some_and(|hooks| hooks.unregister_key(key));
        let after = Self::existing(&self.after).is_some_and(|hooks| hooks.unregister_key(key));
        before || after
    }

    fn hooks(slot: &Hooks<R, A>) -> Callback<(Rc<R>, A)> {
        slot.borrow_mut().get_or_insert_with(Callback::new).clone()
    }

    fn existing(slot: &Hooks<R, A>) -> Option<Callback<(Rc<R>, A)>> {
        slot.borrow().clone()
    }
}

impl<R: 'static, A: Clone + 'static, O: 'static> MethodWrapper<R, A, O> {
    /// Invoke an instance-level wrapper on its own receiver.
    ///
    /// # Errors
    ///
    /// [`CallbackError::DeadReference`] if the receiver was dropped,
    /// [`CallbackError::MalformedCallable`] for a class-level wrapper (use
    /// [`call_on`](Self::call_on)), or the first hook error.
    pub fn call(&self, args: &A) -> Result<O, CallbackError> {
        let Some(receiver) = &self.receiver else {
            return Err(CallbackError::MalformedCallable {
                reason: format!(
                    "class-level wrapper of '{}' needs a receiver",
                    self.method.name()
                ),
            });
        };
        let receiver = receiver.upgrade().ok_or(CallbackError::DeadReference {
            type_name: type_name::<R>(),
        })?;
        self.call_on(&receiver, args)
    }

    /// Invoke the wrapper on `receiver`: before hooks, original, after
    /// hooks. Returns the original's value.
    ///
    /// # Errors
    ///
    /// The first hook error. Nothing after it runs.
    pub fn call_on(&self, receiver: &Rc<R>, args: &A) -> Result<O, CallbackError> {
        let before = Self::existing(&self.before);
        let after = Self::existing(&self.after);
        let hook_args = (before.is_some() || after.is_some())
            .then(|| (Rc::clone(receiver), args.clone()));
        if let (Some(before), Some(hook_args)) = (&before, &hook_args) {
            before.call(hook_args)?;
        }
        let result = match &self.original {
            Original::Direct => (self.method.func())(receiver, args),
            Original::Class(class) => class.call_on(receiver, args)?,
        };
        if let (Some(after), Some(hook_args)) = (&after, &hook_args) {
            after.call(hook_args)?;
        }
        Ok(result)
    }
}

impl<R, A, O> fmt::Debug for MethodWrapper<R, A, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = |slot: &Hooks<R, A>| {
            slot.borrow().as_ref().map_or(0, Callback::len)
        };
        f.debug_struct("MethodWrapper")
            .field("method", &self.method)
            .field("instance_level", &self.is_instance_level())
            .field("delegates_to_class", &self.delegates_to_class())
            .field("before", &count(&self.before))
            .field("after", &count(&self.after))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Interceptable
// ---------------------------------------------------------------------------

/// A method slot that can be wrapped: a [`Method`] (class level) or a
/// [`BoundMethod`] (instance level).
pub trait Interceptable {
    /// Receiver type.
    type Receiver: 'static;
    /// Argument type.
    type Args: Clone + 'static;
    /// Return type of the original.
    type Output: 'static;

    /// The slot.
    fn method(&self) -> Method<Self::Receiver, Self::Args, Self::Output>;

    /// The receiver, for instance-level slots.
    fn receiver(&self) -> Option<&Rc<Self::Receiver>>;
}

impl<R: 'static, A: Clone + 'static, O: 'static> Interceptable for Method<R, A, O> {
    type Receiver = R;
    type Args = A;
    type Output = O;

    fn method(&self) -> Method<R, A, O> {
        *self
    }

    fn receiver(&self) -> Option<&Rc<R>> {
        None
    }
}

impl<R: 'static, A: Clone + 'static, O: 'static> Interceptable for BoundMethod<R, A, O> {
    type Receiver = R;
    type Args = A;
    type Output = O;

    fn method(&self) -> Method<R, A, O> {
        BoundMethod::method(self)
    }

    fn receiver(&self) -> Option<&Rc<R>> {
        Some(BoundMethod::receiver(self))
    }
}

/// Wrapper type installed for an [`Interceptable`] target.
pub type WrapperOf<T> = Rc<
    MethodWrapper<
        <T as Interceptable>::Receiver,
        <T as Interceptable>::Args,
        <T as Interceptable>::Output,
    >,
>;

fn slot_key<T: Interceptable>(target: &T) -> SlotKey {
    let name = target.method().name();
    match target.receiver() {
        Some(receiver) => SlotKey::instance(&**receiver, name),
        None => SlotKey::class::<T::Receiver>(name),
    }
}

/// The wrapper installed on `target`'s own slot, if any.
///
/// # Errors
///
/// [`CallbackError::SignatureMismatch`] if the slot holds a wrapper with a
/// different signature.
pub fn wrapper_of<T: Interceptable>(target: &T) -> Result<Option<WrapperOf<T>>, CallbackError> {
    lookup(slot_key(target))
}

/// Wrap `target`'s slot. Idempotent: an existing wrapper is returned.
///
/// Wrapping a bound method whose class is already wrapped installs a fresh
/// instance wrapper that delegates to the class wrapper.
///
/// # Errors
///
/// [`CallbackError::SignatureMismatch`] if the slot name is already wrapped
/// with a different signature.
pub fn wrap<T: Interceptable>(target: &T) -> Result<WrapperOf<T>, CallbackError> {
    let method = target.method();
    let key = slot_key(target);
    if let Some(existing) = lookup(key)? {
        return Ok(existing);
    }

    let wrapper = match target.receiver() {
        None => Rc::new(MethodWrapper::new(method, None, Original::Direct)),
        Some(receiver) => {
            let original =
                match lookup(SlotKey::class::<T::Receiver>(method.name()))? {
                    Some(class) => Original::Class(class),
                    None => Original::Direct,
                };
            Rc::new(MethodWrapper::new(
                method,
                Some(Rc::downgrade(receiver)),
                original,
            ))
        }
    };
    let liveness = target
        .receiver()
        .map(|receiver| Rc::downgrade(receiver) as Weak<dyn Any>);
    let erased = Rc::clone(&wrapper) as Rc<dyn Any>;
    install(key, erased, liveness);
    Ok(wrapper)
}

/// Register `callable` to run before `target`.
///
/// # Errors
///
/// Same as [`wrap`] and [`Callback::register`].
pub fn before<T: Interceptable>(
    target: &T,
    callable: Callable<T::Args>,
) -> Result<WrapperOf<T>, CallbackError> {
    before_with_receiver(target, callable.ignore_receiver())
}

/// Register `callable` to run after `target`.
///
/// # Errors
///
/// Same as [`wrap`] and [`Callback::register`].
pub fn after<T: Interceptable>(
    target: &T,
    callable: Callable<T::Args>,
) -> Result<WrapperOf<T>, CallbackError> {
    after_with_receiver(target, callable.ignore_receiver())
}

/// Like [`before`], with the receiver the slot was called on prepended to
/// the hook's arguments. On a class-level target the hook sees every
/// receiver of the class.
///
/// # Errors
///
/// Same as [`before`].
pub fn before_with_receiver<T: Interceptable>(
    target: &T,
    callable: Callable<(Rc<T::Receiver>, T::Args)>,
) -> Result<WrapperOf<T>, CallbackError> {
    let wrapper = wrap(target)?;
    wrapper.before_hooks().register(callable)?;
    Ok(wrapper)
}

/// Like [`after`], with the receiver the slot was called on prepended to
/// the hook's arguments.
///
/// # Errors
///
/// Same as [`after`].
pub fn after_with_receiver<T: Interceptable>(
    target: &T,
    callable: Callable<(Rc<T::Receiver>, T::Args)>,
) -> Result<WrapperOf<T>, CallbackError> {
    let wrapper = wrap(target)?;
    wrapper.after_hooks().register(callable)?;
    Ok(wrapper)
}

/// Remove `callable` from `target`'s hooks. Returns `false` if nothing was
/// removed or the slot was never wrapped.
pub fn remove<T: Interceptable, X>(target: &T, callable: &Callable<X>) -> bool {
    prune_dead_wrappers();
    match wrapper_of(target) {
        Ok(Some(wrapper)) => wrapper.remove(callable),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    type Log = Rc<RefCell<Vec<String>>>;

    fn hook<A: 'static>(log: &Log, tag: &'static str) -> Callable<A> {
        let log = Rc::clone(log);
        Callable::new(move |_: &A| log.borrow_mut().push(tag.to_owned()))
    }

    struct Shape {
        log: Log,
        area: Cell<u32>,
    }

    impl Shape {
        fn new(log: &Log) -> Rc<Self> {
            Rc::new(Self {
                log: Rc::clone(log),
                area: Cell::new(0),
            })
        }

        fn scale(&self, by: &u32) -> u32 {
            self.log.borrow_mut().push(format!("scale({by})"));
            self.area.set(self.area.get() + by);
            self.area.get()
        }
    }

    const SCALE: Method<Shape, u32, u32> = Method::new("scale", Shape::scale);

    fn new_log() -> Log {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn before_and_after_run_around_original() {
        let log = new_log();
        let shape = Shape::new(&log);
        let bound = SCALE.bind(&shape);
        before(&bound, hook(&log, "f")).unwrap();
        after(&bound, hook(&log, "g")).unwrap();

        assert_eq!(bound.call(&2).unwrap(), 2);
        assert_eq!(log.borrow().as_slice(), ["f", "scale(2)", "g"]);
    }

    #[test]
    fn wrap_is_idempotent() {
        let log = new_log();
        let shape = Shape::new(&log);
        let bound = SCALE.bind(&shape);
        let first = wrap(&bound).unwrap();
        let second = wrap(&bound).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert!(first.is_instance_level());
        assert!(Rc::ptr_eq(&wrapper_of(&bound).unwrap().unwrap(), &first));
    }

    #[test]
    fn instance_hooks_only_affect_that_instance() {
        let log = new_log();
        let hooked = Shape::new(&log);
        let plain = Shape::new(&log);
        before(&SCALE.bind(&hooked), hook(&log, "hook")).unwrap();

        SCALE.bind(&plain).call(&1).unwrap();
        SCALE.bind(&hooked).call(&1).unwrap();
        assert_eq!(log.borrow().as_slice(), ["scale(1)", "hook", "scale(1)"]);
    }

    #[test]
    fn remove_reports_whether_anything_was_removed() {
        let log = new_log();
        let shape = Shape::new(&log);
        let bound = SCALE.bind(&shape);
        let f = hook::<u32>(&log, "f");

        assert!(!remove(&bound, &f));
        after(&bound, f.clone()).unwrap();
        assert!(remove(&bound, &f));
        assert!(!remove(&bound, &f));

        bound.call(&3).unwrap();
        assert_eq!(log.borrow().as_slice(), ["scale(3)"]);
    }

    #[test]
    fn failing_before_hook_skips_original() {
        let log = new_log();
        let shape = Shape::new(&log);
        let bound = SCALE.bind(&shape);
        before(
            &bound,
            Callable::new(|_: &u32| -> Result<(), &'static str> { Err("veto") }),
        )
        .unwrap();

        assert!(bound.call(&1).is_err());
        assert!(log.borrow().is_empty());
        assert_eq!(shape.area.get(), 0);
    }

    #[test]
    fn receiver_is_passed_to_hook() {
        let log = new_log();
        let shape = Shape::new(&log);
        let bound = SCALE.bind(&shape);
        let seen = Rc::new(Cell::new(0));
        let sink = Rc::clone(&seen);
        after_with_receiver(
            &bound,
            Callable::new(move |(shape, _): &(Rc<Shape>, u32)| sink.set(shape.area.get())),
        )
        .unwrap();

        bound.call(&4).unwrap();
        assert_eq!(seen.get(), 4);
        // The hook does not keep the receiver alive.
        assert_eq!(Rc::strong_count(&shape), 2);
    }

    #[test]
    fn instance_wrapper_fails_after_receiver_drop() {
        let log = new_log();
        let shape = Shape::new(&log);
        let wrapper = wrap(&SCALE.bind(&shape)).unwrap();
        assert_eq!(wrapper.call(&1).unwrap(), 1);
        drop(shape);
        assert!(wrapper.call(&1).unwrap_err().is_dead_reference());
    }

    #[test]
    fn dead_instance_wrappers_are_pruned() {
        let log = new_log();
        let shape = Shape::new(&log);
        wrap(&SCALE.bind(&shape)).unwrap();
        drop(shape);
        assert!(prune_dead_wrappers() >= 1);
        assert_eq!(prune_dead_wrappers(), 0);
    }

    #[test]
    fn remove_prunes_dead_instance_wrappers() {
        let log = new_log();
        let shape = Shape::new(&log);
        wrap(&SCALE.bind(&shape)).unwrap();
        drop(shape);
        assert!(!remove(&SCALE, &hook::<u32>(&log, "unused")));
        assert_eq!(prune_dead_wrappers(), 0);
    }

    struct Meter;

    impl Meter {
        fn read(&self, _: &u32) -> u32 {
            7
        }

        fn read_text(&self, _: &String) -> u32 {
            8
        }
    }

    #[test]
    fn same_name_different_signature_is_rejected() {
        let meter = Rc::new(Meter);
        let read = Method::new("read", Meter::read);
        let text = Method::new("read", Meter::read_text);
        wrap(&read.bind(&meter)).unwrap();
        assert!(matches!(
            wrap(&text.bind(&meter)),
            Err(CallbackError::SignatureMismatch { method: "read" })
        ));
        assert!(matches!(
            text.bind(&meter).call(&String::new()),
            Err(CallbackError::SignatureMismatch { method: "read" })
        ));
    }

    #[test]
    fn class_wrapper_needs_receiver_for_call() {
        struct Beacon;
        fn ping(_: &Beacon, _: &()) {}
        let wrapper = wrap(&Method::new("ping", ping)).unwrap();
        assert!(!wrapper.is_instance_level());
        assert!(matches!(
            wrapper.call(&()),
            Err(CallbackError::MalformedCallable { .. })
        ));
        wrapper.call_on(&Rc::new(Beacon), &()).unwrap();
    }

    struct Dial {
        id: u32,
    }

    impl Dial {
        fn turn(&self, _: &i32) {}
    }

    const TURN: Method<Dial, i32, ()> = Method::new("turn", Dial::turn);

    #[test]
    fn class_hooks_see_each_receiver() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        before_with_receiver(
            &TURN,
            Callable::new(move |(dial, by): &(Rc<Dial>, i32)| {
                sink.borrow_mut().push((dial.id, *by));
            }),
        )
        .unwrap();

        let first = Rc::new(Dial { id: 1 });
        let second = Rc::new(Dial { id: 2 });
        TURN.bind(&first).call(&1).unwrap();
        TURN.bind(&second).call(&1).unwrap();
        assert_eq!(seen.borrow().as_slice(), [(1, 1), (2, 1)]);
        assert_eq!(Rc::strong_count(&first), 1);
    }

    struct Knob {
        turns: Cell<u32>,
    }

    impl Knob {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                turns: Cell::new(0),
            })
        }

        fn twist(&self, _: &()) {
            self.turns.set(self.turns.get() + 1);
        }
    }

    const TWIST: Method<Knob, (), ()> = Method::new("twist", Knob::twist);

    #[test]
    fn removing_class_hook_stops_it_for_every_receiver() {
        let log = new_log();
        let first = Knob::new();
        let second = Knob::new();
        let class_hook = hook::<()>(&log, "class");
        before(&TWIST, class_hook.clone()).unwrap();
        before(&TWIST.bind(&second), hook(&log, "own")).unwrap();

        TWIST.bind(&first).call(&()).unwrap();
        TWIST.bind(&second).call(&()).unwrap();
        assert_eq!(log.borrow().as_slice(), ["class", "own", "class"]);

        assert!(remove(&TWIST, &class_hook));
        assert!(!remove(&TWIST, &class_hook));
        log.borrow_mut().clear();
        TWIST.bind(&first).call(&()).unwrap();
        TWIST.bind(&second).call(&()).unwrap();
        assert_eq!(log.borrow().as_slice(), ["own"]);
        assert_eq!(first.turns.get() + second.turns.get(), 4);
    }
}
