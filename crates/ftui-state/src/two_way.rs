#![forbid(unsafe_code)]

//! Two-way binding: a write-through mirror sharing its source's value.
//!
//! The source holder is the single source of truth. A local `set` writes to
//! the source first; the source's peer-changed notification then refreshes
//! the local value and notifies this binding's subscribers, so a write costs
//! exactly one notification per level. No deep copy is made: aggregates are
//! shared with the source.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::holder::{Holder, HolderCore};
use crate::registry::{Capabilities, Subscriber, SubscriberId};
use crate::value::Value;

/// Two-way synchronized binding over any holder kind.
pub struct TwoWaySyncHolder {
    core: HolderCore,
    source: RefCell<Option<Rc<dyn Holder>>>,
    local: RefCell<Value>,
}

impl std::fmt::Debug for TwoWaySyncHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoWaySyncHolder")
            .field("core", &self.core)
            .field("source", &self.source.borrow().as_ref().map(|source| source.id()))
            .field("local", &self.local.borrow())
            .finish()
    }
}

impl TwoWaySyncHolder {
    const CAPABILITIES: Capabilities = Capabilities::SYNC_PEER;

    /// Bind to `source`; `owner` is subscribed immediately.
    #[must_use]
    pub fn new(
        source: Rc<dyn Holder>,
        owner: Option<SubscriberId>,
        label: Option<&str>,
    ) -> Rc<Self> {
        let initial = source.get_unmonitored();
        let holder = Rc::new_cyclic(|this: &Weak<Self>| Self {
            core: HolderCore::new(this.clone(), Self::CAPABILITIES, owner, label),
            source: RefCell::new(None),
            local: RefCell::new(initial),
        });
        source.subscribe(holder.core.id());
        debug!(
            id = %holder.core.id(),
            label = %holder.core.display_label(),
            source = %source.id(),
            "bound to source"
        );
        *holder.source.borrow_mut() = Some(source);
        holder
    }

    /// The holder this binding writes through to; `None` once disposed.
    #[must_use]
    pub fn source(&self) -> Option<Rc<dyn Holder>> {
        self.source.borrow().clone()
    }
}

impl Subscriber for TwoWaySyncHolder {
    fn subscriber_id(&self) -> SubscriberId {
        self.core.id()
    }

    fn capabilities(&self) -> Capabilities {
        Self::CAPABILITIES
    }

    fn sync_peer_has_changed(&self, origin: SubscriberId) {
        let Some(source) = self.source() else {
            warn!(id = %self.core.id(), origin = %origin, "peer changed but source is unset, ignoring");
            return;
        };
        if source.id() != origin {
            warn!(
                id = %self.core.id(),
                label = %self.core.display_label(),
                origin = %origin,
                source = %source.id(),
                "peer changed from unexpected origin, ignoring"
            );
            return;
        }
        let value = source.get_unmonitored();
        self.local.replace(value.clone());
        debug!(id = %self.core.id(), label = %self.core.display_label(), "source changed");
        self.core.notify_changed(&value);
    }
}

impl Holder for TwoWaySyncHolder {
    fn core(&self) -> &HolderCore {
        &self.core
    }

    fn get(&self) -> Value {
        self.core.notify_read();
        self.get_unmonitored()
    }

    fn get_unmonitored(&self) -> Value {
        self.local.borrow().clone()
    }

    fn set(&self, new_value: Value) {
        if *self.local.borrow() == new_value {
            debug!(id = %self.core.id(), label = %self.core.display_label(), "set with unchanged value, ignoring");
            return;
        }
        match self.source() {
            Some(source) => {
                debug!(id = %self.core.id(), label = %self.core.display_label(), "set, writing through");
                source.set(new_value);
            }
            None => {
                warn!(
                    id = %self.core.id(),
                    label = %self.core.display_label(),
                    "set after dispose, source is gone; ignoring"
                );
            }
        }
    }

    fn dispose(&self) {
        if self.core.is_disposed() {
            return;
        }
        let source = self.source.borrow_mut().take();
        if let Some(source) = source {
            source.unsubscribe(self.core.id());
        }
        self.core.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectHolder;
    use crate::observed::RawObject;
    use crate::recorder::{Recorded, RecordingSubscriber};
    use crate::registry::SubscriberRegistry;
    use crate::simple::SimpleHolder;

    #[test]
    fn starts_with_source_value() {
        let source = SimpleHolder::new(3, None, Some("n"));
        let link = TwoWaySyncHolder::new(source.clone(), None, Some("link"));
        assert_eq!(link.get(), Value::from(3));
        assert!(source.core().is_subscribed(link.id()));
    }

    #[test]
    fn local_set_writes_source_first() {
        let upstream = RecordingSubscriber::new(Capabilities::VALUE_CHANGE);
        let downstream = RecordingSubscriber::new(Capabilities::VALUE_CHANGE);
        let source = SimpleHolder::new(0, Some(upstream.subscriber_id()), Some("n"));
        let link = TwoWaySyncHolder::new(source.clone(), Some(downstream.subscriber_id()), None);

        link.set(Value::from(5));
        assert_eq!(source.get_unmonitored(), Value::from(5));
        assert_eq!(link.get_unmonitored(), Value::from(5));
        assert_eq!(upstream.events(), vec![Recorded::ValueChanged(Value::from(5))]);
        assert_eq!(downstream.events(), vec![Recorded::ValueChanged(Value::from(5))]);
    }

    #[test]
    fn equal_set_is_a_no_op() {
        let view = RecordingSubscriber::new(Capabilities::VALUE_CHANGE);
        let source = SimpleHolder::new("x", None, None);
        let link = TwoWaySyncHolder::new(source, Some(view.subscriber_id()), None);
        link.set(Value::from("x"));
        assert_eq!(view.change_count(), 0);
    }

    #[test]
    fn source_change_flows_down() {
        let view = RecordingSubscriber::new(Capabilities::VALUE_CHANGE);
        let source = SimpleHolder::new(1, None, None);
        let link = TwoWaySyncHolder::new(source.clone(), Some(view.subscriber_id()), None);
        source.set(Value::from(2));
        assert_eq!(link.get_unmonitored(), Value::from(2));
        assert_eq!(view.change_count(), 1);
    }

    #[test]
    fn aggregates_are_shared_not_copied() {
        let view = RecordingSubscriber::new(Capabilities::VALUE_CHANGE);
        let source = ObjectHolder::new(RawObject::from_members([("a", 1)]), None, Some("p"));
        let link = TwoWaySyncHolder::new(source.clone(), Some(view.subscriber_id()), None);
        assert_eq!(link.get_unmonitored(), source.get_unmonitored());

        let shared = link.get_unmonitored().as_aggregate().cloned().expect("aggregate");
        shared.set("a", 2);
        assert_eq!(source.get_unmonitored().member("a"), Some(Value::from(2)));
        assert_eq!(view.change_count(), 1);
    }

    #[test]
    fn rejected_write_leaves_local_value() {
        let source = ObjectHolder::new(RawObject::from_members([("a", 1)]), None, None);
        let link = TwoWaySyncHolder::new(source.clone(), None, None);
        let before = link.get_unmonitored();
        link.set(Value::from(9));
        assert_eq!(link.get_unmonitored(), before);
    }

    #[test]
    fn nested_links_propagate_both_ways() {
        let source = SimpleHolder::new(0, None, Some("root"));
        let middle = TwoWaySyncHolder::new(source.clone(), None, Some("middle"));
        let leaf = TwoWaySyncHolder::new(middle.clone(), None, Some("leaf"));

        leaf.set(Value::from(7));
        assert_eq!(source.get_unmonitored(), Value::from(7));
        assert_eq!(middle.get_unmonitored(), Value::from(7));
        assert_eq!(leaf.get_unmonitored(), Value::from(7));

        source.set(Value::from(8));
        assert_eq!(leaf.get_unmonitored(), Value::from(8));
    }

    #[test]
    fn foreign_origin_is_ignored() {
        let view = RecordingSubscriber::new(Capabilities::VALUE_CHANGE);
        let source = SimpleHolder::new(1, None, None);
        let link = TwoWaySyncHolder::new(source, Some(view.subscriber_id()), None);
        link.sync_peer_has_changed(SubscriberRegistry::issue_id());
        assert_eq!(view.change_count(), 0);
    }

    #[test]
    fn dispose_unsubscribes_and_keeps_source_alive() {
        let source = SimpleHolder::new(1, None, None);
        let link = TwoWaySyncHolder::new(source.clone(), None, None);
        let id = link.id();
        link.dispose();
        assert!(!source.core().is_subscribed(id));
        assert!(!SubscriberRegistry::contains(id));
        assert!(SubscriberRegistry::contains(source.id()));
        assert!(link.source().is_none());

        link.set(Value::from(2));
        assert_eq!(source.get_unmonitored(), Value::from(1));
    }
}
