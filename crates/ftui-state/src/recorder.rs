#![forbid(unsafe_code)]

//! Recording subscriber for tests and diagnostics.
//!
//! [`RecordingSubscriber`] registers itself with the capabilities it is given
//! and appends every callback it receives to an in-memory log. Useful to
//! assert how many notifications a write produced, and of which shape.

use std::cell::RefCell;
use std::rc::Rc;

use crate::observed::Aggregate;
use crate::registry::{Capabilities, Subscriber, SubscriberId, SubscriberRegistry};
use crate::value::Value;

/// One callback received by a [`RecordingSubscriber`].
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    ValueChanged(Value),
    PropertyChanged(Option<String>),
    PropertyRead(Option<String>),
    PeerChanged(SubscriberId),
    MemberChanged(String),
}

impl Recorded {
    /// Whether this entry is a change notification (as opposed to a read).
    #[must_use]
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::PropertyRead(_))
    }
}

/// Subscriber that logs what it is told.
#[derive(Debug)]
pub struct RecordingSubscriber {
    id: SubscriberId,
    capabilities: Capabilities,
    events: RefCell<Vec<Recorded>>,
}

impl RecordingSubscriber {
    /// Create and register a recorder accepting `capabilities`.
    #[must_use]
    pub fn new(capabilities: Capabilities) -> Rc<Self> {
        let recorder = Rc::new(Self {
            id: SubscriberRegistry::issue_id(),
            capabilities,
            events: RefCell::new(Vec::new()),
        });
        SubscriberRegistry::attach(&recorder);
        recorder
    }

    #[must_use]
    pub fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    /// Snapshot of everything received so far, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<Recorded> {
        self.events.borrow().clone()
    }

    /// Number of change notifications of any shape.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.events.borrow().iter().filter(|e| e.is_change()).count()
    }

    #[must_use]
    pub fn read_count(&self) -> usize {
        self.events.borrow().len() - self.change_count()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    /// Deregister. Later notifications addressed to this id are dangling.
    pub fn dispose(&self) {
        SubscriberRegistry::unregister(self.id);
    }

    fn push(&self, event: Recorded) {
        self.events.borrow_mut().push(event);
    }
}

impl Drop for RecordingSubscriber {
    fn drop(&mut self) {
        SubscriberRegistry::unregister(self.id);
    }
}

impl Subscriber for RecordingSubscriber {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn has_changed(&self, new_value: &Value) {
        self.push(Recorded::ValueChanged(new_value.clone()));
    }

    fn property_has_changed(&self, label: Option<&str>) {
        self.push(Recorded::PropertyChanged(label.map(str::to_owned)));
    }

    fn property_read(&self, label: Option<&str>) {
        self.push(Recorded::PropertyRead(label.map(str::to_owned)));
    }

    fn sync_peer_has_changed(&self, origin: SubscriberId) {
        self.push(Recorded::PeerChanged(origin));
    }

    fn member_has_changed(&self, _object: &Aggregate, member: &str) {
        self.push(Recorded::MemberChanged(member.to_owned()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_with_given_capabilities() {
        let recorder = RecordingSubscriber::new(Capabilities::VALUE_CHANGE | Capabilities::PROPERTY_READ);
        let resolved = SubscriberRegistry::lookup(recorder.subscriber_id()).expect("registered");
        assert_eq!(
            resolved.capabilities,
            Capabilities::VALUE_CHANGE | Capabilities::PROPERTY_READ
        );
    }

    #[test]
    fn counts_changes_and_reads_separately() {
        let recorder = RecordingSubscriber::new(Capabilities::all());
        recorder.has_changed(&Value::from(1));
        recorder.property_read(Some("x"));
        recorder.property_has_changed(None);
        assert_eq!(recorder.change_count(), 2);
        assert_eq!(recorder.read_count(), 1);
        recorder.clear();
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn dispose_and_drop_deregister() {
        let recorder = RecordingSubscriber::new(Capabilities::VALUE_CHANGE);
        let id = recorder.subscriber_id();
        recorder.dispose();
        assert!(!SubscriberRegistry::contains(id));

        let recorder = RecordingSubscriber::new(Capabilities::VALUE_CHANGE);
        let id = recorder.subscriber_id();
        drop(recorder);
        assert!(!SubscriberRegistry::contains(id));
    }
}
