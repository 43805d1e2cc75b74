#![forbid(unsafe_code)]

//! Process-wide subscriber registry.
//!
//! Every entity that can receive a notification (holders and non-holder
//! consumers such as widgets) leases a [`SubscriberId`] and registers a
//! `Weak` reference under it. Holders store subscriber *ids*, never direct
//! references, so a subscriber may be torn down independently of the holders
//! that still list it.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Unknown id | Never registered, or already unregistered | `lookup` returns `None` |
//! | Dropped entity | `Rc` dropped without `dispose()` | `lookup` returns `None` |
//! | Double unregister | Disposal called twice | Second call returns `false` |
//!
//! Ids are issued from a process-wide atomic counter. The table itself is
//! thread-local: holders are `Rc`-based and never cross threads.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use crate::observed::Aggregate;
use crate::value::Value;

/// Opaque handle addressing a notification target through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Raw numeric value, for diagnostics.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

bitflags! {
    /// Notification shapes a subscriber accepts.
    ///
    /// Resolved once at registration; fan-out consults the stored flags and
    /// never queries the subscriber again.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u8 {
        /// Single-value change callback: [`Subscriber::has_changed`].
        const VALUE_CHANGE = 1 << 0;
        /// Multi-property change callback keyed by label:
        /// [`Subscriber::property_has_changed`].
        const PROPERTY_CHANGE = 1 << 1;
        /// Read-interest callback: [`Subscriber::property_read`].
        const PROPERTY_READ = 1 << 2;
        /// Peer-changed notification between holders:
        /// [`Subscriber::sync_peer_has_changed`].
        const SYNC_PEER = 1 << 3;
        /// Member-change callback from an observed aggregate:
        /// [`Subscriber::member_has_changed`].
        const MEMBER_CHANGE = 1 << 4;
    }
}

/// Anything that can be addressed by a [`SubscriberId`].
///
/// All callbacks default to no-ops; an implementation overrides the ones
/// matching the [`Capabilities`] it registers with.
pub trait Subscriber {
    /// The id this entity is registered under.
    fn subscriber_id(&self) -> SubscriberId;

    /// Capabilities used by [`SubscriberRegistry::attach`].
    fn capabilities(&self) -> Capabilities {
        Capabilities::empty()
    }

    /// A holder this entity depends on now holds `new_value`.
    fn has_changed(&self, _new_value: &Value) {}

    /// The holder labelled `label` changed.
    fn property_has_changed(&self, _label: Option<&str>) {}

    /// The holder labelled `label` was read.
    fn property_read(&self, _label: Option<&str>) {}

    /// The holder `origin` this entity is subscribed to changed.
    fn sync_peer_has_changed(&self, _origin: SubscriberId) {}

    /// Member `member` of an aggregate this entity owns was mutated.
    fn member_has_changed(&self, _object: &Aggregate, _member: &str) {}
}

/// A registry hit: a live subscriber plus the capabilities it registered with.
#[derive(Clone)]
pub struct Resolved {
    pub capabilities: Capabilities,
    pub subscriber: Rc<dyn Subscriber>,
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolved")
            .field("id", &self.subscriber.subscriber_id())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

struct Entry {
    capabilities: Capabilities,
    subscriber: Weak<dyn Subscriber>,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ENTRIES: RefCell<HashMap<SubscriberId, Entry>> = RefCell::new(HashMap::new());
}

/// Facade over the per-thread registry table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscriberRegistry;

impl SubscriberRegistry {
    /// Lease a fresh id. Ids are unique for the lifetime of the process.
    #[must_use]
    pub fn issue_id() -> SubscriberId {
        SubscriberId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Register `subscriber` under `id`. Re-registering an id replaces the
    /// previous entry.
    pub fn register(id: SubscriberId, capabilities: Capabilities, subscriber: Weak<dyn Subscriber>) {
        let replaced = ENTRIES.with(|entries| {
            entries.borrow_mut().insert(
                id,
                Entry {
                    capabilities,
                    subscriber,
                },
            )
        });
        if replaced.is_some() {
            tracing::warn!(subscriber = %id, "registry: id registered twice, replacing entry");
        }
    }

    /// Register an already-constructed consumer under its own id, using the
    /// capabilities it reports.
    pub fn attach<S: Subscriber + 'static>(subscriber: &Rc<S>) {
        let id = subscriber.subscriber_id();
        let capabilities = subscriber.capabilities();
        let weak: Weak<S> = Rc::downgrade(subscriber);
        Self::register(id, capabilities, weak);
    }

    /// Resolve `id`. Returns `None` for unknown ids and for entities that are
    /// not alive (dropped, or still under construction).
    #[must_use]
    pub fn lookup(id: SubscriberId) -> Option<Resolved> {
        ENTRIES.with(|entries| {
            let entries = entries.borrow();
            let entry = entries.get(&id)?;
            let subscriber = entry.subscriber.upgrade()?;
            Some(Resolved {
                capabilities: entry.capabilities,
                subscriber,
            })
        })
    }

    /// Release `id`. Returns `false` if it was not registered.
    ///
    /// Safe to call from `Drop` during thread teardown, where it reports
    /// `false`.
    pub fn unregister(id: SubscriberId) -> bool {
        ENTRIES
            .try_with(|entries| entries.borrow_mut().remove(&id).is_some())
            .unwrap_or(false)
    }

    /// Whether `id` currently resolves to a live entity.
    #[must_use]
    pub fn contains(id: SubscriberId) -> bool {
        Self::lookup(id).is_some()
    }

    /// Number of entries on this thread, including entities dropped without
    /// being unregistered.
    #[must_use]
    pub fn len() -> usize {
        ENTRIES.with(|entries| entries.borrow().len())
    }

    /// Whether this thread's table is empty.
    #[must_use]
    pub fn is_empty() -> bool {
        Self::len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Counter {
        id: SubscriberId,
        hits: Cell<u32>,
    }

    impl Subscriber for Counter {
        fn subscriber_id(&self) -> SubscriberId {
            self.id
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::VALUE_CHANGE
        }

        fn has_changed(&self, _new_value: &Value) {
            self.hits.set(self.hits.get() + 1);
        }
    }

    fn counter() -> Rc<Counter> {
        Rc::new(Counter {
            id: SubscriberRegistry::issue_id(),
            hits: Cell::new(0),
        })
    }

    #[test]
    fn ids_are_unique_and_monotonic() {
        let a = SubscriberRegistry::issue_id();
        let b = SubscriberRegistry::issue_id();
        let c = SubscriberRegistry::issue_id();
        assert!(a < b && b < c);
    }

    #[test]
    fn attach_then_lookup() {
        let c = counter();
        SubscriberRegistry::attach(&c);

        let resolved = SubscriberRegistry::lookup(c.id).expect("registered");
        assert_eq!(resolved.capabilities, Capabilities::VALUE_CHANGE);
        resolved.subscriber.has_changed(&Value::Null);
        assert_eq!(c.hits.get(), 1);

        assert!(SubscriberRegistry::unregister(c.id));
    }

    #[test]
    fn lookup_unknown_is_none() {
        let id = SubscriberRegistry::issue_id();
        assert!(SubscriberRegistry::lookup(id).is_none());
        assert!(!SubscriberRegistry::contains(id));
    }

    #[test]
    fn unregister_twice_reports_false() {
        let c = counter();
        SubscriberRegistry::attach(&c);
        assert!(SubscriberRegistry::unregister(c.id));
        assert!(!SubscriberRegistry::unregister(c.id));
        assert!(SubscriberRegistry::lookup(c.id).is_none());
    }

    #[test]
    fn registry_does_not_keep_entities_alive() {
        let c = counter();
        let id = c.id;
        SubscriberRegistry::attach(&c);
        let before = SubscriberRegistry::len();

        drop(c);
        assert!(SubscriberRegistry::lookup(id).is_none());
        // The stale entry stays until it is released explicitly.
        assert_eq!(SubscriberRegistry::len(), before);
        assert!(SubscriberRegistry::unregister(id));
    }

    #[test]
    fn display_format() {
        let id = SubscriberRegistry::issue_id();
        assert_eq!(id.to_string(), format!("#{}", id.get()));
    }
}
