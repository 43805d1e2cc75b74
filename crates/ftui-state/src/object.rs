#![forbid(unsafe_code)]

//! Holder for aggregate values.
//!
//! # Design
//!
//! Aggregates are compared by identity, never by value: assigning the same
//! handle is a no-op, assigning a different handle always notifies, whatever
//! its contents.
//!
//! The holder registers itself as an *owning property* of the aggregate it
//! stores. Member mutation through the wrapper then comes back as
//! [`Subscriber::member_has_changed`], which the holder turns into a
//! holder-level change: its subscribers only care that their dependency is
//! stale, not whether it was replaced or mutated in place.
//!
//! A non-aggregate write is rejected and logged, but still notifies: the
//! holder keeps its previous aggregate and subscribers re-read it.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::holder::{Holder, HolderCore};
use crate::observed::{Aggregate, OwnershipPath};
use crate::registry::{Capabilities, Subscriber, SubscriberId};
use crate::value::Value;

/// Holder for structured values.
#[derive(Debug)]
pub struct ObjectHolder {
    core: HolderCore,
    wrapped: RefCell<Option<Aggregate>>,
}

impl ObjectHolder {
    const CAPABILITIES: Capabilities = Capabilities::SYNC_PEER.union(Capabilities::MEMBER_CHANGE);

    /// Create and register a holder; `owner` is subscribed immediately.
    ///
    /// A non-aggregate `value` is rejected (logged) and leaves the holder
    /// empty.
    #[must_use]
    pub fn new(
        value: impl Into<Value>,
        owner: Option<SubscriberId>,
        label: Option<&str>,
    ) -> Rc<Self> {
        let holder = Rc::new_cyclic(|this: &Weak<Self>| Self {
            core: HolderCore::new(this.clone(), Self::CAPABILITIES, owner, label),
            wrapped: RefCell::new(None),
        });
        holder.reassign(value.into());
        holder
    }

    /// Replace the stored aggregate without notifying, reporting which
    /// ownership path was taken. Returns `None` (and changes nothing) if
    /// `new_value` is not an aggregate.
    pub fn reassign(&self, new_value: Value) -> Option<OwnershipPath> {
        let Value::Object(aggregate) = new_value else {
            warn!(
                id = %self.core.id(),
                label = %self.core.display_label(),
                value_type = new_value.type_name(),
                "new value is not an aggregate, ignoring set"
            );
            return None;
        };

        self.release_wrapped();

        let (stored, path) = aggregate.adopt(self.core.id());
        debug!(
            id = %self.core.id(),
            label = %self.core.display_label(),
            path = ?path,
            "aggregate stored"
        );
        self.wrapped.replace(Some(stored));
        Some(path)
    }

    fn release_wrapped(&self) {
        let previous = self.wrapped.borrow_mut().take();
        if let Some(previous) = previous {
            previous.release(self.core.id());
        }
    }

    fn notify_current(&self) {
        let current = self.get_unmonitored();
        self.core.notify_changed(&current);
    }
}

impl Subscriber for ObjectHolder {
    fn subscriber_id(&self) -> SubscriberId {
        self.core.id()
    }

    fn capabilities(&self) -> Capabilities {
        Self::CAPABILITIES
    }

    fn sync_peer_has_changed(&self, origin: SubscriberId) {
        debug!(id = %self.core.id(), origin = %origin, "peer changed, forwarding");
        self.notify_current();
    }

    fn member_has_changed(&self, _object: &Aggregate, member: &str) {
        debug!(
            id = %self.core.id(),
            label = %self.core.display_label(),
            member,
            "member of held aggregate changed"
        );
        self.notify_current();
    }
}

impl Holder for ObjectHolder {
    fn core(&self) -> &HolderCore {
        &self.core
    }

    fn get(&self) -> Value {
        self.core.notify_read();
        self.get_unmonitored()
    }

    fn get_unmonitored(&self) -> Value {
        self.wrapped
            .borrow()
            .clone()
            .map_or(Value::Undefined, Value::Object)
    }

    fn set(&self, new_value: Value) {
        let unchanged = match (&*self.wrapped.borrow(), &new_value) {
            (Some(current), Value::Object(incoming)) => current.ptr_eq(incoming),
            (None, Value::Undefined) => true,
            _ => false,
        };
        if unchanged {
            debug!(id = %self.core.id(), label = %self.core.display_label(), "set with unchanged value, ignoring");
            return;
        }
        debug!(id = %self.core.id(), label = %self.core.display_label(), "set, changed");
        // A rejected value still notifies; subscribers re-read the kept value.
        self.reassign(new_value);
        self.notify_current();
    }

    fn dispose(&self) {
        if self.core.is_disposed() {
            return;
        }
        self.release_wrapped();
        self.core.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observed::{ObservedObject, RawObject, TrackedObject};
    use crate::recorder::{Recorded, RecordingSubscriber};
    use crate::registry::SubscriberRegistry;

    fn record(a: i32) -> RawObject {
        RawObject::from_members([("a", a)])
    }

    #[test]
    fn raw_value_is_wrapped_on_construction() {
        let raw = record(1);
        let holder = ObjectHolder::new(raw.clone(), None, Some("p"));
        let stored = holder.get_unmonitored();
        assert!(ObservedObject::is_observed(&stored));
        // Wrapping shares storage with the raw value.
        assert_eq!(stored.member("a"), Some(Value::from(1)));
        let stored = stored.as_aggregate().cloned().expect("aggregate");
        assert!(stored.is_owned_by(holder.id()));
    }

    #[test]
    fn identical_reference_is_a_no_op() {
        let view = RecordingSubscriber::new(Capabilities::VALUE_CHANGE);
        let holder = ObjectHolder::new(record(1), Some(view.subscriber_id()), Some("p"));
        let current = holder.get_unmonitored();
        holder.set(current);
        assert_eq!(view.change_count(), 0);
    }

    #[test]
    fn distinct_reference_notifies_once_regardless_of_wrapping() {
        let view = RecordingSubscriber::new(Capabilities::VALUE_CHANGE);
        let holder = ObjectHolder::new(record(1), Some(view.subscriber_id()), Some("p"));

        holder.set(Value::from(record(1)));
        assert_eq!(view.change_count(), 1);

        holder.set(Value::from(ObservedObject::wrap(record(1))));
        assert_eq!(view.change_count(), 2);

        holder.set(Value::Object(Aggregate::Tracked(TrackedObject::new())));
        assert_eq!(view.change_count(), 3);
    }

    #[test]
    fn non_aggregate_is_rejected() {
        let view = RecordingSubscriber::new(Capabilities::VALUE_CHANGE);
        let holder = ObjectHolder::new(record(1), Some(view.subscriber_id()), Some("p"));
        let before = holder.get_unmonitored();

        holder.set(Value::from(5));
        assert_eq!(holder.get_unmonitored(), before);
        assert_eq!(view.events(), vec![Recorded::ValueChanged(before.clone())]);
        assert_eq!(holder.reassign(Value::from("nope")), None);
    }

    #[test]
    fn reassign_reports_path() {
        let holder = ObjectHolder::new(record(1), None, None);
        assert_eq!(
            holder.reassign(Value::from(record(2))),
            Some(OwnershipPath::Wrapped)
        );
        assert_eq!(
            holder.reassign(Value::from(ObservedObject::wrap(record(3)))),
            Some(OwnershipPath::AlreadyObserved)
        );
        assert_eq!(
            holder.reassign(Value::Object(Aggregate::Tracked(TrackedObject::new()))),
            Some(OwnershipPath::SelfTracking)
        );
    }

    #[test]
    fn reassign_releases_previous_value() {
        let holder = ObjectHolder::new(record(1), None, None);
        let old = holder.get_unmonitored().as_aggregate().cloned().expect("aggregate");
        holder.set(Value::from(record(2)));
        assert!(!old.is_owned_by(holder.id()));
    }

    #[test]
    fn member_change_bubbles_as_holder_change() {
        let view = RecordingSubscriber::new(Capabilities::VALUE_CHANGE);
        let holder = ObjectHolder::new(record(1), Some(view.subscriber_id()), Some("p"));
        let stored = holder.get_unmonitored().as_aggregate().cloned().expect("aggregate");

        stored.set("a", 2);
        assert_eq!(view.change_count(), 1);
        assert_eq!(holder.get_unmonitored().member("a"), Some(Value::from(2)));
    }

    #[test]
    fn old_value_mutation_is_not_observed_after_replacement() {
        let view = RecordingSubscriber::new(Capabilities::VALUE_CHANGE);
        let holder = ObjectHolder::new(record(1), Some(view.subscriber_id()), Some("p"));
        let old = holder.get_unmonitored().as_aggregate().cloned().expect("aggregate");
        holder.set(Value::from(record(2)));
        view.clear();

        old.set("a", 100);
        assert_eq!(view.change_count(), 0);
    }

    #[test]
    fn tracked_member_change_bubbles() {
        let view = RecordingSubscriber::new(Capabilities::VALUE_CHANGE);
        let tracked = TrackedObject::from_members([("n", 1)]);
        let holder = ObjectHolder::new(
            Value::Object(Aggregate::Tracked(tracked.clone())),
            Some(view.subscriber_id()),
            None,
        );
        assert_eq!(tracked.owner_count(), 1);

        Aggregate::Tracked(tracked.clone()).set("n", 2);
        assert_eq!(view.change_count(), 1);

        holder.dispose();
        assert_eq!(tracked.owner_count(), 0);
    }

    #[test]
    fn dispose_releases_ownership_then_deregisters() {
        let holder = ObjectHolder::new(record(1), None, Some("p"));
        let id = holder.id();
        let stored = holder.get_unmonitored().as_aggregate().cloned().expect("aggregate");

        holder.dispose();
        assert!(!stored.is_owned_by(id));
        assert!(!SubscriberRegistry::contains(id));
    }
}
