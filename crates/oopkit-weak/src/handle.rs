//! Weak handles and weak proxies.
//!
//! # Design
//!
//! A [`WeakRef`] is a resolver: [`WeakRef::upgrade`] yields the live object
//! or `None`. A [`WeakProxy`] stands in for the object itself: access through
//! [`WeakProxy::get`] or [`WeakProxy::with`] fails with
//! [`WeakRefError::DeadReference`] once the object is gone.
//!
//! [`Ref`] lets an API accept "an object, a handle or a proxy" and decide at
//! run time, which is what [`weak_ref`], [`weak_proxy`] and [`is_same`] do.
//!
//! # Failure Modes
//!
//! | Operation | Input | Behavior |
//! |-----------|-------|----------|
//! | `weak_ref` | `None` | shared null handle |
//! | `weak_ref` | proxy | `Err(ProxyHandle)` |
//! | `weak_proxy` | null handle | proxy that is always dead |
//! | `is_same` | two proxies, same allocation | `Err(AmbiguousProxies)` |
//! | `WeakProxy::get` | dead referent | `Err(DeadReference)` |

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use crate::error::WeakRefError;
use crate::{rc_addr, weak_addr};

// ---------------------------------------------------------------------------
// WeakRef
// ---------------------------------------------------------------------------

/// Weak handle to a shared object.
///
/// Equality and hashing use allocation identity, so both stay stable after
/// the referent is dropped and a handle can be used as a map key for its
/// whole lifetime.
pub struct WeakRef<T: ?Sized> {
    /// `None` is the null handle.
    inner: Option<Weak<T>>,
}

impl<T: ?Sized> WeakRef<T> {
    /// The null handle. Always resolves to `None`; never allocates.
    #[must_use]
    pub const fn null() -> Self {
        Self { inner: None }
    }

    /// Create a handle to `target` without keeping it alive.
    #[must_use]
    pub fn new(target: &Rc<T>) -> Self {
        Self {
            inner: Some(Rc::downgrade(target)),
        }
    }

    /// Wrap an existing `std::rc::Weak`.
    #[must_use]
    pub fn from_weak(weak: Weak<T>) -> Self {
        Self { inner: Some(weak) }
    }

    /// Resolve the handle.
    #[must_use]
    pub fn upgrade(&self) -> Option<Rc<T>> {
        self.inner.as_ref().and_then(Weak::upgrade)
    }

    /// Whether this is the null handle.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.inner.is_none()
    }

    /// Whether the referent is still alive. The null handle is never alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.as_ref().is_some_and(|w| w.strong_count() > 0)
    }

    /// Whether this handle was created from `target`.
    #[must_use]
    pub fn points_to(&self, target: &Rc<T>) -> bool {
        self.addr() == Some(rc_addr(target))
    }

    /// Borrow the underlying `std::rc::Weak`, if any.
    #[must_use]
    pub fn as_weak(&self) -> Option<&Weak<T>> {
        self.inner.as_ref()
    }

    pub(crate) fn addr(&self) -> Option<usize> {
        self.inner.as_ref().map(weak_addr)
    }
}

impl<T: ?Sized> Clone for WeakRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: ?Sized> Default for WeakRef<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized> PartialEq for WeakRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl<T: ?Sized> Eq for WeakRef<T> {}

impl<T: ?Sized> Hash for WeakRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl<T: ?Sized> fmt::Debug for WeakRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            None => write!(f, "WeakRef(null)"),
            Some(w) if w.strong_count() > 0 => {
                write!(f, "WeakRef<{}>({:#x})", std::any::type_name::<T>(), weak_addr(w))
            }
            Some(_) => write!(f, "WeakRef<{}>(<dead>)", std::any::type_name::<T>()),
        }
    }
}

// ---------------------------------------------------------------------------
// WeakProxy
// ---------------------------------------------------------------------------

/// Weak stand-in for a shared object that fails loudly once it is dead.
pub struct WeakProxy<T: ?Sized> {
    /// `None` for a proxy built from the null handle.
    inner: Option<Weak<T>>,
}

impl<T: ?Sized> WeakProxy<T> {
    /// Create a proxy to `target` without keeping it alive.
    #[must_use]
    pub fn new(target: &Rc<T>) -> Self {
        Self {
            inner: Some(Rc::downgrade(target)),
        }
    }

    /// Access the referent.
    ///
    /// # Errors
    ///
    /// [`WeakRefError::DeadReference`] if the referent was dropped.
    pub fn get(&self) -> Result<Rc<T>, WeakRefError> {
        self.inner
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(WeakRefError::DeadReference {
                type_name: std::any::type_name::<T>(),
            })
    }

    /// Run `f` against the referent.
    ///
    /// # Errors
    ///
    /// [`WeakRefError::DeadReference`] if the referent was dropped.
    pub fn with<U>(&self, f: impl FnOnce(&T) -> U) -> Result<U, WeakRefError> {
        let target = self.get()?;
        Ok(f(&target))
    }

    /// Whether the referent was dropped.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.inner.as_ref().is_none_or(|w| w.strong_count() == 0)
    }

    pub(crate) fn addr(&self) -> Option<usize> {
        self.inner.as_ref().map(weak_addr)
    }
}

impl<T: ?Sized> Clone for WeakProxy<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: ?Sized> PartialEq for WeakProxy<T> {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl<T: ?Sized> Eq for WeakProxy<T> {}

impl<T: ?Sized> fmt::Debug for WeakProxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_dead() { "dead" } else { "alive" };
        write!(f, "WeakProxy<{}>({state})", std::any::type_name::<T>())
    }
}

// ---------------------------------------------------------------------------
// Ref
// ---------------------------------------------------------------------------

/// An object reference that may be strong, a weak handle, or a weak proxy.
pub enum Ref<T: ?Sized> {
    /// A strong reference to a live object.
    Strong(Rc<T>),
    /// A weak handle.
    Handle(WeakRef<T>),
    /// A weak proxy.
    Proxy(WeakProxy<T>),
}

impl<T: ?Sized> Ref<T> {
    /// Whether this is a weak handle.
    #[must_use]
    pub fn is_handle(&self) -> bool {
        matches!(self, Self::Handle(_))
    }

    /// Whether this is a weak proxy.
    #[must_use]
    pub fn is_proxy(&self) -> bool {
        matches!(self, Self::Proxy(_))
    }

    /// Whether this is weak at all (handle or proxy).
    #[must_use]
    pub fn is_weak(&self) -> bool {
        self.is_handle() || self.is_proxy()
    }

    /// The real object behind this reference, if it is still alive.
    #[must_use]
    pub fn resolve(&self) -> Option<Rc<T>> {
        match self {
            Self::Strong(rc) => Some(Rc::clone(rc)),
            Self::Handle(handle) => handle.upgrade(),
            Self::Proxy(proxy) => proxy.get().ok(),
        }
    }

    fn addr(&self) -> Option<usize> {
        match self {
            Self::Strong(rc) => Some(rc_addr(rc)),
            Self::Handle(handle) => handle.addr(),
            Self::Proxy(proxy) => proxy.addr(),
        }
    }
}

impl<T: ?Sized> Clone for Ref<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Strong(rc) => Self::Strong(Rc::clone(rc)),
            Self::Handle(handle) => Self::Handle(handle.clone()),
            Self::Proxy(proxy) => Self::Proxy(proxy.clone()),
        }
    }
}

impl<T: ?Sized> From<Rc<T>> for Ref<T> {
    fn from(rc: Rc<T>) -> Self {
        Self::Strong(rc)
    }
}

impl<T: ?Sized> From<WeakRef<T>> for Ref<T> {
    fn from(handle: WeakRef<T>) -> Self {
        Self::Handle(handle)
    }
}

impl<T: ?Sized> From<WeakProxy<T>> for Ref<T> {
    fn from(proxy: WeakProxy<T>) -> Self {
        Self::Proxy(proxy)
    }
}

impl<T: ?Sized> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strong(_) => write!(f, "Ref::Strong<{}>", std::any::type_name::<T>()),
            Self::Handle(handle) => write!(f, "Ref::Handle({handle:?})"),
            Self::Proxy(proxy) => write!(f, "Ref::Proxy({proxy:?})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Get a weak handle for `target`.
///
/// `None` yields the null handle and an existing handle is returned as is.
///
/// # Errors
///
/// [`WeakRefError::ProxyHandle`] if `target` is a proxy.
pub fn weak_ref<T: ?Sized>(target: Option<&Ref<T>>) -> Result<WeakRef<T>, WeakRefError> {
    match target {
        None => Ok(WeakRef::null()),
        Some(Ref::Strong(rc)) => Ok(WeakRef::new(rc)),
        Some(Ref::Handle(handle)) => Ok(handle.clone()),
        Some(Ref::Proxy(_)) => Err(WeakRefError::ProxyHandle),
    }
}

/// Get a weak proxy for `target`.
///
/// A handle keeps pointing at the same allocation; a proxy is returned as is.
#[must_use]
pub fn weak_proxy<T: ?Sized>(target: &Ref<T>) -> WeakProxy<T> {
    match target {
        Ref::Strong(rc) => WeakProxy::new(rc),
        Ref::Handle(handle) => WeakProxy {
            inner: handle.inner.clone(),
        },
        Ref::Proxy(proxy) => proxy.clone(),
    }
}

/// Whether `a` and `b` refer to the same object.
///
/// Two null handles are the same ("no object" is "no object").
///
/// # Errors
///
/// [`WeakRefError::AmbiguousProxies`] if both are proxies to the same
/// allocation.
pub fn is_same<T: ?Sized>(a: &Ref<T>, b: &Ref<T>) -> Result<bool, WeakRefError> {
    let same = a.addr() == b.addr();
    if a.is_proxy() && b.is_proxy() && same {
        return Err(WeakRefError::AmbiguousProxies);
    }
    Ok(same)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Debug)]
    struct Stub(&'static str);

    #[test]
    fn null_handle_resolves_to_nothing() {
        let null: WeakRef<Stub> = WeakRef::null();
        assert!(null.is_null());
        assert!(null.upgrade().is_none());
        assert!(!null.is_alive());
        assert_eq!(null, WeakRef::null());
    }

    #[test]
    fn handle_does_not_keep_object_alive() {
        let obj = Rc::new(Stub("a"));
        let handle = WeakRef::new(&obj);
        assert_eq!(handle.upgrade().map(|o| o.0), Some("a"));
        drop(obj);
        assert!(handle.upgrade().is_none());
        assert!(!handle.is_alive());
    }

    #[test]
    fn hash_is_stable_across_death() {
        let obj = Rc::new(Stub("a"));
        let handle = WeakRef::new(&obj);
        let mut set = HashSet::new();
        set.insert(handle.clone());
        drop(obj);
        assert!(set.contains(&handle));
    }

    #[test]
    fn handles_to_distinct_objects_differ() {
        let a = Rc::new(Stub("a"));
        let b = Rc::new(Stub("a"));
        assert_ne!(WeakRef::new(&a), WeakRef::new(&b));
        assert_eq!(WeakRef::new(&a), WeakRef::new(&a));
    }

    #[test]
    fn proxy_fails_after_death() {
        let obj = Rc::new(Stub("a"));
        let proxy = WeakProxy::new(&obj);
        assert_eq!(proxy.with(|s| s.0), Ok("a"));
        drop(obj);
        assert!(proxy.is_dead());
        assert!(matches!(
            proxy.get(),
            Err(WeakRefError::DeadReference { .. })
        ));
    }

    #[test]
    fn weak_ref_of_none_is_null() {
        let handle = weak_ref::<Stub>(None).unwrap();
        assert!(handle.is_null());
    }

    #[test]
    fn weak_ref_of_handle_is_unchanged() {
        let obj = Rc::new(Stub("a"));
        let handle = WeakRef::new(&obj);
        let again = weak_ref(Some(&Ref::Handle(handle.clone()))).unwrap();
        assert_eq!(again, handle);
    }

    #[test]
    fn weak_ref_of_proxy_is_rejected() {
        let obj = Rc::new(Stub("a"));
        let proxy = Ref::Proxy(WeakProxy::new(&obj));
        assert_eq!(weak_ref(Some(&proxy)), Err(WeakRefError::ProxyHandle));
    }

    #[test]
    fn weak_proxy_from_handle() {
        let obj = Rc::new(Stub("a"));
        let proxy = weak_proxy(&Ref::Handle(WeakRef::new(&obj)));
        assert_eq!(proxy.with(|s| s.0), Ok("a"));
        let null_proxy = weak_proxy::<Stub>(&Ref::Handle(WeakRef::null()));
        assert!(null_proxy.is_dead());
    }

    #[test]
    fn predicates() {
        let obj = Rc::new(Stub("a"));
        let strong = Ref::Strong(Rc::clone(&obj));
        let handle = Ref::Handle(WeakRef::new(&obj));
        let proxy = Ref::Proxy(WeakProxy::new(&obj));
        assert!(!strong.is_weak());
        assert!(handle.is_handle() && handle.is_weak() && !handle.is_proxy());
        assert!(proxy.is_proxy() && proxy.is_weak() && !proxy.is_handle());
    }

    #[test]
    fn is_same_across_representations() {
        let s1 = Rc::new(Stub("1"));
        let s2 = Rc::new(Stub("2"));
        let o1 = Ref::Strong(Rc::clone(&s1));
        let o2 = Ref::Strong(Rc::clone(&s2));
        let r1 = Ref::Handle(WeakRef::new(&s1));
        let r2 = Ref::Handle(WeakRef::new(&s2));
        let p1 = Ref::Proxy(WeakProxy::new(&s1));
        let p2 = Ref::Proxy(WeakProxy::new(&s2));

        assert_eq!(is_same(&o1, &o1), Ok(true));
        assert_eq!(is_same(&o1, &o2), Ok(false));
        assert_eq!(is_same(&o1, &r1), Ok(true));
        assert_eq!(is_same(&o1, &p1), Ok(true));
        assert_eq!(is_same(&o1, &r2), Ok(false));
        assert_eq!(is_same(&o1, &p2), Ok(false));
        assert_eq!(is_same(&p2, &r2), Ok(true));
        assert_eq!(is_same(&r1, &p1), Ok(true));
        assert_eq!(is_same(&r1, &p2), Ok(false));
        assert_eq!(is_same(&p1, &p2), Ok(false));
        assert_eq!(is_same(&p1, &p1), Err(WeakRefError::AmbiguousProxies));
    }

    #[test]
    fn resolve_real_object() {
        let obj = Rc::new(Stub("a"));
        let handle = Ref::Handle(WeakRef::new(&obj));
        assert!(Rc::ptr_eq(&handle.resolve().unwrap(), &obj));
        assert!(Ref::<Stub>::Handle(WeakRef::null()).resolve().is_none());
    }

    #[test]
    fn works_with_trait_objects() {
        let obj: Rc<dyn std::fmt::Debug> = Rc::new(Stub("dyn"));
        let handle = WeakRef::new(&obj);
        assert!(handle.points_to(&obj));
        assert!(format!("{:?}", handle.upgrade().unwrap()).contains("dyn"));
    }

    #[test]
    fn debug_format() {
        let obj = Rc::new(Stub("a"));
        let handle = WeakRef::new(&obj);
        assert!(format!("{handle:?}").contains("Stub"));
        drop(obj);
        assert!(format!("{handle:?}").contains("<dead>"));
    }
}
