#![forbid(unsafe_code)]

//! Aggregates and the observed-object wrapper.
//!
//! # Design
//!
//! An [`Aggregate`] is a shared handle to structured storage. It comes in
//! three shapes, and holders must accept all of them:
//!
//! - [`RawObject`]: plain members. Mutation is not observed.
//! - [`ObservedObject`]: a wrapper around a `RawObject` that forwards every
//!   member mutation to its *owning properties* (holders registered by id).
//! - [`SelfTracking`]: a user type that keeps its own owner list.
//!
//! Wrapping does not copy: an `ObservedObject` and the `RawObject` it wraps
//! share storage, but only writes through the wrapper notify.
//!
//! # Deep copies
//!
//! [`Aggregate::deep_copy`] preserves each handle's shape, preserves shared
//! sub-structure and cycles inside the copied graph, and hands out wrappers
//! with an empty owner list. The copy never aliases the original.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::registry::{Capabilities, SubscriberId, SubscriberRegistry};
use crate::value::Value;

type Members = BTreeMap<String, Value>;

/// Debug output stops descending after this many aggregate levels.
const DEBUG_DEPTH: usize = 4;

/// Plain, unobserved aggregate storage.
#[derive(Clone, Default)]
pub struct RawObject(Rc<RefCell<Members>>);

impl RawObject {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(member, value)` pairs.
    #[must_use]
    pub fn from_members<K, V, I>(members: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let members = members
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self(Rc::new(RefCell::new(members)))
    }

    #[must_use]
    pub fn get(&self, member: &str) -> Option<Value> {
        self.0.borrow().get(member).cloned()
    }

    /// Store `value` under `member`. Nobody is notified. Returns `true` if the
    /// stored value changed.
    pub fn set(&self, member: &str, value: impl Into<Value>) -> bool {
        self.replace(member, value.into())
    }

    pub fn remove(&self, member: &str) -> Option<Value> {
        self.0.borrow_mut().remove(member)
    }

    /// Snapshot of all members in key order.
    #[must_use]
    pub fn members(&self) -> Vec<(String, Value)> {
        self.0
            .borrow()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &RawObject) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn replace(&self, member: &str, value: Value) -> bool {
        let mut members = self.0.borrow_mut();
        if members.get(member) == Some(&value) {
            return false;
        }
        members.insert(member.to_owned(), value);
        true
    }

    fn addr(&self) -> *const () {
        Rc::as_ptr(&self.0).cast()
    }
}

impl fmt::Debug for RawObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Aggregate::Raw(self.clone()), f)
    }
}

struct ObservedInner {
    target: RawObject,
    owners: RefCell<BTreeSet<SubscriberId>>,
}

/// Wrapper making member mutation of a [`RawObject`] observable.
///
/// Cloning shares the wrapper: clones have the same identity and owners.
#[derive(Clone)]
pub struct ObservedObject(Rc<ObservedInner>);

impl ObservedObject {
    /// Wrap `target` with an empty owner list.
    #[must_use]
    pub fn wrap(target: RawObject) -> Self {
        Self(Rc::new(ObservedInner {
            target,
            owners: RefCell::new(BTreeSet::new()),
        }))
    }

    /// Wrap `target` and register `owner` as its first owning property.
    #[must_use]
    pub fn create_new(target: RawObject, owner: SubscriberId) -> Self {
        let observed = Self::wrap(target);
        observed.add_owning_property(owner);
        observed
    }

    /// Whether `value` already is an observed wrapper.
    #[must_use]
    pub fn is_observed(value: &Value) -> bool {
        value.as_aggregate().is_some_and(Aggregate::is_observed)
    }

    /// The wrapped storage. Writes through it bypass notification.
    #[must_use]
    pub fn target(&self) -> &RawObject {
        &self.0.target
    }

    #[must_use]
    pub fn get(&self, member: &str) -> Option<Value> {
        self.0.target.get(member)
    }

    /// Store `value` under `member` and, if it changed, notify every owning
    /// property. Returns whether the member changed.
    pub fn set(&self, member: &str, value: impl Into<Value>) -> bool {
        if !self.0.target.replace(member, value.into()) {
            return false;
        }
        self.notify_owners(member);
        true
    }

    /// Remove `member`, notifying owners if it existed.
    pub fn remove(&self, member: &str) -> Option<Value> {
        let removed = self.0.target.remove(member)?;
        self.notify_owners(member);
        Some(removed)
    }

    /// Register `owner`. Returns `false` if it was already registered.
    pub fn add_owning_property(&self, owner: SubscriberId) -> bool {
        self.0.owners.borrow_mut().insert(owner)
    }

    /// Unregister `owner`. Returns `false` if it was not registered.
    pub fn remove_owning_property(&self, owner: SubscriberId) -> bool {
        self.0.owners.borrow_mut().remove(&owner)
    }

    #[must_use]
    pub fn owners(&self) -> Vec<SubscriberId> {
        self.0.owners.borrow().iter().copied().collect()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &ObservedObject) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn notify_owners(&self, member: &str) {
        // Snapshot: an owner may unregister itself while being notified.
        let owners = self.owners();
        let handle = Aggregate::Observed(self.clone());
        for owner in owners {
            notify_member_change(owner, &handle, member);
        }
    }

    fn addr(&self) -> *const () {
        Rc::as_ptr(&self.0).cast()
    }
}

impl fmt::Debug for ObservedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Aggregate::Observed(self.clone()), f)
    }
}

/// Deliver a member-change callback to `owner` through the registry.
pub(crate) fn notify_member_change(owner: SubscriberId, object: &Aggregate, member: &str) {
    match SubscriberRegistry::lookup(owner) {
        Some(resolved) if resolved.capabilities.contains(Capabilities::MEMBER_CHANGE) => {
            debug!(owner = %owner, member, "member change forwarded to owning property");
            resolved.subscriber.member_has_changed(object, member);
        }
        Some(_) => {
            debug!(owner = %owner, member, "owning property does not accept member changes");
        }
        None => {
            warn!(owner = %owner, member, "member change: unknown owning property id, skipping");
        }
    }
}

/// An aggregate that manages its own owning-property list.
pub trait SelfTracking {
    fn get(&self, member: &str) -> Option<Value>;

    /// Store `value` under `member`, notifying owners on change. Returns
    /// whether the member changed.
    fn set(&self, member: &str, value: Value) -> bool;

    fn members(&self) -> Vec<(String, Value)>;

    fn add_owning_property(&self, owner: SubscriberId) -> bool;

    fn remove_owning_property(&self, owner: SubscriberId) -> bool;

    /// Fresh aggregate of the same kind with no members and no owners.
    /// Deep copies start here and are filled by [`SelfTracking::replace_members`].
    fn empty_copy(&self) -> Rc<dyn SelfTracking>;

    /// Overwrite every member without notifying owners.
    fn replace_members(&self, members: Vec<(String, Value)>);

    fn kind_name(&self) -> &'static str {
        "tracked object"
    }
}

/// Reference [`SelfTracking`] aggregate.
pub struct TrackedObject {
    this: Weak<TrackedObject>,
    members: RefCell<Members>,
    owners: RefCell<BTreeSet<SubscriberId>>,
}

impl TrackedObject {
    #[must_use]
    pub fn new() -> Rc<Self> {
        Self::from_members(std::iter::empty::<(String, Value)>())
    }

    #[must_use]
    pub fn from_members<K, V, I>(members: I) -> Rc<Self>
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let members = members
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            members: RefCell::new(members),
            owners: RefCell::new(BTreeSet::new()),
        })
    }

    #[must_use]
    pub fn owner_count(&self) -> usize {
        self.owners.borrow().len()
    }
}

impl SelfTracking for TrackedObject {
    fn get(&self, member: &str) -> Option<Value> {
        self.members.borrow().get(member).cloned()
    }

    fn set(&self, member: &str, value: Value) -> bool {
        {
            let mut members = self.members.borrow_mut();
            if members.get(member) == Some(&value) {
                return false;
            }
            members.insert(member.to_owned(), value);
        }
        if let Some(this) = self.this.upgrade() {
            let handle = Aggregate::Tracked(this);
            let owners: Vec<SubscriberId> = self.owners.borrow().iter().copied().collect();
            for owner in owners {
                notify_member_change(owner, &handle, member);
            }
        }
        true
    }

    fn members(&self) -> Vec<(String, Value)> {
        self.members
            .borrow()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn add_owning_property(&self, owner: SubscriberId) -> bool {
        self.owners.borrow_mut().insert(owner)
    }

    fn remove_owning_property(&self, owner: SubscriberId) -> bool {
        self.owners.borrow_mut().remove(&owner)
    }

    fn empty_copy(&self) -> Rc<dyn SelfTracking> {
        Self::new()
    }

    fn replace_members(&self, members: Vec<(String, Value)>) {
        *self.members.borrow_mut() = members.into_iter().collect();
    }
}

/// How an aggregate became owned by a holder. See [`Aggregate::adopt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipPath {
    /// Already an observed wrapper; the holder was added to its owners.
    AlreadyObserved,
    /// Self-tracking aggregate; registered through its own API.
    SelfTracking,
    /// Raw aggregate; a fresh wrapper was created with the holder as owner.
    Wrapped,
}

/// Shared handle to structured storage.
#[derive(Clone)]
pub enum Aggregate {
    Raw(RawObject),
    Observed(ObservedObject),
    Tracked(Rc<dyn SelfTracking>),
}

impl Aggregate {
    /// Identity comparison. A wrapper and the raw storage it wraps are
    /// distinct identities.
    #[must_use]
    pub fn ptr_eq(&self, other: &Aggregate) -> bool {
        match (self, other) {
            (Self::Raw(a), Self::Raw(b)) => a.ptr_eq(b),
            (Self::Observed(a), Self::Observed(b)) => a.ptr_eq(b),
            (Self::Tracked(a), Self::Tracked(b)) => {
                Rc::as_ptr(a).cast::<()>() == Rc::as_ptr(b).cast::<()>()
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn is_observed(&self) -> bool {
        matches!(self, Self::Observed(_))
    }

    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Raw(_) => "raw object",
            Self::Observed(_) => "observed object",
            Self::Tracked(tracked) => tracked.kind_name(),
        }
    }

    #[must_use]
    pub fn get(&self, member: &str) -> Option<Value> {
        match self {
            Self::Raw(raw) => raw.get(member),
            Self::Observed(observed) => observed.get(member),
            Self::Tracked(tracked) => tracked.get(member),
        }
    }

    /// Store a member. Observed and self-tracking aggregates notify their
    /// owners; raw storage does not. Returns whether the member changed.
    pub fn set(&self, member: &str, value: impl Into<Value>) -> bool {
        match self {
            Self::Raw(raw) => raw.set(member, value),
            Self::Observed(observed) => observed.set(member, value),
            Self::Tracked(tracked) => tracked.set(member, value.into()),
        }
    }

    #[must_use]
    pub fn members(&self) -> Vec<(String, Value)> {
        match self {
            Self::Raw(raw) => raw.members(),
            Self::Observed(observed) => observed.target().members(),
            Self::Tracked(tracked) => tracked.members(),
        }
    }

    /// Structural equality, ignoring identity and wrapping state.
    #[must_use]
    pub fn deep_eq(&self, other: &Aggregate) -> bool {
        deep_eq_inner(self, other, &mut HashSet::new())
    }

    /// Independent copy of the whole aggregate graph.
    #[must_use]
    pub fn deep_copy(&self) -> Aggregate {
        DeepCopier::default().copy_aggregate(self)
    }

    /// Register `owner` as an owning property, wrapping raw storage first.
    /// Exactly one [`OwnershipPath`] is taken per call.
    #[must_use]
    pub fn adopt(self, owner: SubscriberId) -> (Aggregate, OwnershipPath) {
        match self {
            Self::Observed(observed) => {
                observed.add_owning_property(owner);
                (Self::Observed(observed), OwnershipPath::AlreadyObserved)
            }
            Self::Tracked(tracked) => {
                tracked.add_owning_property(owner);
                (Self::Tracked(tracked), OwnershipPath::SelfTracking)
            }
            Self::Raw(raw) => (
                Self::Observed(ObservedObject::create_new(raw, owner)),
                OwnershipPath::Wrapped,
            ),
        }
    }

    /// Undo [`Aggregate::adopt`]. Returns `false` if `owner` was not
    /// registered (raw storage never has owners).
    pub fn release(&self, owner: SubscriberId) -> bool {
        match self {
            Self::Raw(_) => false,
            Self::Observed(observed) => observed.remove_owning_property(owner),
            Self::Tracked(tracked) => tracked.remove_owning_property(owner),
        }
    }

    /// Whether `owner` is currently registered on this aggregate. Only
    /// observed wrappers expose their owner list.
    #[must_use]
    pub fn is_owned_by(&self, owner: SubscriberId) -> bool {
        match self {
            Self::Observed(observed) => observed.0.owners.borrow().contains(&owner),
            _ => false,
        }
    }

    fn storage_addr(&self) -> *const () {
        match self {
            Self::Raw(raw) => raw.addr(),
            Self::Observed(observed) => observed.target().addr(),
            Self::Tracked(tracked) => Rc::as_ptr(tracked).cast(),
        }
    }
}

impl fmt::Debug for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(
            &Bounded {
                aggregate: self,
                depth: 0,
            },
            f,
        )
    }
}

struct Bounded<'a> {
    aggregate: &'a Aggregate,
    depth: usize,
}

impl fmt::Debug for Bounded<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.depth >= DEBUG_DEPTH {
            return f.write_str("{..}");
        }
        let members = self.aggregate.members();
        let mut map = f.debug_map();
        for (key, value) in &members {
            match value {
                Value::Object(nested) => map.entry(
                    key,
                    &Bounded {
                        aggregate: nested,
                        depth: self.depth + 1,
                    },
                ),
                other => map.entry(key, other),
            };
        }
        map.finish()
    }
}

fn deep_eq_inner(a: &Aggregate, b: &Aggregate, seen: &mut HashSet<(*const (), *const ())>) -> bool {
    if a.storage_addr() == b.storage_addr() {
        return true;
    }
    // A pair already under comparison is assumed equal (cycles).
    if !seen.insert((a.storage_addr(), b.storage_addr())) {
        return true;
    }
    let left = a.members();
    let right = b.members();
    if left.len() != right.len() {
        return false;
    }
    left.iter()
        .zip(right.iter())
        .all(|((ka, va), (kb, vb))| {
            ka == kb
                && match (va, vb) {
                    (Value::Object(na), Value::Object(nb)) => deep_eq_inner(na, nb, seen),
                    _ => va == vb,
                }
        })
}

/// Memoized graph copier. Keys are storage/wrapper addresses of the
/// original graph, which stays alive for the duration of the copy.
#[derive(Default)]
struct DeepCopier {
    raws: HashMap<*const (), RawObject>,
    observed: HashMap<*const (), ObservedObject>,
    tracked: HashMap<*const (), Rc<dyn SelfTracking>>,
}

impl DeepCopier {
    fn copy_value(&mut self, value: &Value) -> Value {
        match value {
            Value::Object(aggregate) => Value::Object(self.copy_aggregate(aggregate)),
            other => other.clone(),
        }
    }

    fn copy_aggregate(&mut self, aggregate: &Aggregate) -> Aggregate {
        match aggregate {
            Aggregate::Raw(raw) => Aggregate::Raw(self.copy_raw(raw)),
            Aggregate::Observed(observed) => Aggregate::Observed(self.copy_observed(observed)),
            Aggregate::Tracked(tracked) => Aggregate::Tracked(self.copy_tracked(tracked)),
        }
    }

    fn copy_tracked(&mut self, tracked: &Rc<dyn SelfTracking>) -> Rc<dyn SelfTracking> {
        let addr: *const () = Rc::as_ptr(tracked).cast();
        if let Some(copy) = self.tracked.get(&addr) {
            return Rc::clone(copy);
        }
        let copy = tracked.empty_copy();
        // Registered before filling so cycles through the aggregate terminate.
        self.tracked.insert(addr, Rc::clone(&copy));
        let members: Vec<(String, Value)> = tracked
            .members()
            .into_iter()
            .map(|(key, value)| {
                let copied = self.copy_value(&value);
                (key, copied)
            })
            .collect();
        copy.replace_members(members);
        copy
    }

    fn copy_raw(&mut self, raw: &RawObject) -> RawObject {
        if let Some(copy) = self.raws.get(&raw.addr()) {
            return copy.clone();
        }
        let copy = RawObject::new();
        self.raws.insert(raw.addr(), copy.clone());
        self.fill(raw, &copy);
        copy
    }

    fn copy_observed(&mut self, observed: &ObservedObject) -> ObservedObject {
        if let Some(copy) = self.observed.get(&observed.addr()) {
            return copy.clone();
        }
        let source = observed.target();
        let (target, needs_fill) = match self.raws.get(&source.addr()) {
            Some(existing) => (existing.clone(), false),
            None => {
                let fresh = RawObject::new();
                self.raws.insert(source.addr(), fresh.clone());
                (fresh, true)
            }
        };
        let copy = ObservedObject::wrap(target.clone());
        // Registered before filling so cycles through the wrapper terminate.
        self.observed.insert(observed.addr(), copy.clone());
        if needs_fill {
            self.fill(source, &target);
        }
        copy
    }

    fn fill(&mut self, source: &RawObject, copy: &RawObject) {
        let members: Members = source
            .members()
            .into_iter()
            .map(|(key, value)| {
                let copied = self.copy_value(&value);
                (key, copied)
            })
            .collect();
        *copy.0.borrow_mut() = members;
    }
}
