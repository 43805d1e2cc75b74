#![forbid(unsafe_code)]

//! The holder abstraction: tracked state plus subscriber bookkeeping.
//!
//! # Design
//!
//! Every concrete holder embeds a [`HolderCore`], which owns the holder's
//! registry id, its label and the set of subscriber ids. The core implements
//! the two notification channels:
//!
//! - **change** ([`HolderCore::notify_changed`]): push-based invalidation.
//!   Each subscriber receives every callback its capabilities ask for:
//!   the new value, the holder's label, and/or a peer-changed notification
//!   carrying this holder's id.
//! - **read** ([`HolderCore::notify_read`]): pull-based dependency discovery.
//!   Subscribers learn *that* the holder was read, not what it holds.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Dangling subscriber id | Subscriber dropped/disposed first | `warn`, skipped, fan-out continues |
//! | Re-entrant change | Holder changes again while notifying | `error`, nested fan-out skipped; panics if [`StateConfig::panic_on_cycle`] |
//! | Chain too deep | More than `max_propagation_depth` holders in flight | `error`, fan-out skipped |
//! | Use after dispose | Caller kept an `Rc` past disposal | Works locally, never notified through the registry |

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};

use tracing::{debug, error, warn};

use crate::config::StateConfig;
use crate::object::ObjectHolder;
use crate::registry::{Capabilities, Subscriber, SubscriberId, SubscriberRegistry};
use crate::simple::SimpleHolder;
use crate::value::Value;

thread_local! {
    /// Holders currently fanning out a change, outermost first.
    static PROPAGATING: RefCell<Vec<SubscriberId>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refusal {
    Cycle,
    TooDeep(usize),
}

/// Marks a holder as "notifying" for the duration of its fan-out.
struct PropagationGuard;

impl PropagationGuard {
    fn enter(id: SubscriberId) -> Result<Self, Refusal> {
        let limit = StateConfig::read(|config| config.max_propagation_depth);
        PROPAGATING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&id) {
                return Err(Refusal::Cycle);
            }
            if stack.len() >= limit {
                return Err(Refusal::TooDeep(stack.len()));
            }
            stack.push(id);
            Ok(Self)
        })
    }
}

impl Drop for PropagationGuard {
    fn drop(&mut self) {
        let _ = PROPAGATING.try_with(|stack| stack.borrow_mut().pop());
    }
}

/// State shared by every holder kind.
pub struct HolderCore {
    id: SubscriberId,
    label: RefCell<Option<String>>,
    subscribers: RefCell<BTreeSet<SubscriberId>>,
    disposed: Cell<bool>,
}

impl std::fmt::Debug for HolderCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HolderCore")
            .field("id", &self.id)
            .field("label", &self.label.borrow())
            .field("subscriber_count", &self.subscribers.borrow().len())
            .field("disposed", &self.disposed.get())
            .finish()
    }
}

impl HolderCore {
    /// Lease an id, register `this` under it, and subscribe `owner` (the
    /// owning element) if given.
    ///
    /// Call from inside `Rc::new_cyclic`; `this` becomes resolvable once the
    /// holder is fully constructed.
    #[must_use]
    pub fn new(
        this: Weak<dyn Subscriber>,
        capabilities: Capabilities,
        owner: Option<SubscriberId>,
        label: Option<&str>,
    ) -> Self {
        let id = SubscriberRegistry::issue_id();
        SubscriberRegistry::register(id, capabilities, this);
        let subscribers = owner.into_iter().collect();
        Self {
            id,
            label: RefCell::new(label.filter(|l| !l.is_empty()).map(str::to_owned)),
            subscribers: RefCell::new(subscribers),
            disposed: Cell::new(false),
        }
    }

    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    #[must_use]
    pub fn label(&self) -> Option<String> {
        self.label.borrow().clone()
    }

    /// Label for log lines.
    #[must_use]
    pub fn display_label(&self) -> String {
        self.label().unwrap_or_else(|| "unknown".to_owned())
    }

    /// Replace the label. Empty labels are ignored.
    pub fn set_label(&self, label: &str) {
        if !label.is_empty() {
            *self.label.borrow_mut() = Some(label.to_owned());
        }
    }

    /// Add `subscriber`. Returns `false` if it was already subscribed.
    pub fn subscribe(&self, subscriber: SubscriberId) -> bool {
        let added = self.subscribers.borrow_mut().insert(subscriber);
        if added {
            debug!(id = %self.id, label = %self.display_label(), subscriber = %subscriber, "new subscriber");
        }
        added
    }

    /// Remove `subscriber`. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, subscriber: SubscriberId) -> bool {
        self.subscribers.borrow_mut().remove(&subscriber)
    }

    #[must_use]
    pub fn is_subscribed(&self, subscriber: SubscriberId) -> bool {
        self.subscribers.borrow().contains(&subscriber)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// Snapshot of subscriber ids in ascending order.
    #[must_use]
    pub fn subscribers(&self) -> Vec<SubscriberId> {
        self.subscribers.borrow().iter().copied().collect()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Tell every subscriber that this holder now holds `new_value`.
    pub fn notify_changed(&self, new_value: &Value) {
        let _guard = match PropagationGuard::enter(self.id) {
            Ok(guard) => guard,
            Err(refusal) => {
                self.refuse(refusal);
                return;
            }
        };

        let label = self.label();
        debug!(id = %self.id, label = %self.display_label(), "notify changed");
        // Iterate a snapshot: subscribers may unsubscribe during the fan-out.
        for subscriber in self.subscribers() {
            let Some(resolved) = SubscriberRegistry::lookup(subscriber) else {
                warn!(
                    id = %self.id,
                    label = %self.display_label(),
                    subscriber = %subscriber,
                    "notify changed: unknown subscriber id, skipping"
                );
                continue;
            };
            let capabilities = resolved.capabilities;
            if capabilities.contains(Capabilities::VALUE_CHANGE) {
                resolved.subscriber.has_changed(new_value);
            }
            if capabilities.contains(Capabilities::PROPERTY_CHANGE) {
                resolved.subscriber.property_has_changed(label.as_deref());
            }
            if capabilities.contains(Capabilities::SYNC_PEER) {
                resolved.subscriber.sync_peer_has_changed(self.id);
            }
        }
    }

    /// Tell read-interested subscribers that this holder was read.
    pub fn notify_read(&self) {
        let label = self.label();
        for subscriber in self.subscribers() {
            match SubscriberRegistry::lookup(subscriber) {
                Some(resolved) if resolved.capabilities.contains(Capabilities::PROPERTY_READ) => {
                    resolved.subscriber.property_read(label.as_deref());
                }
                Some(_) => {}
                None => {
                    debug!(id = %self.id, subscriber = %subscriber, "notify read: unknown subscriber id");
                }
            }
        }
    }

    /// Base disposal: deregister. Concrete holders unlink first, then call
    /// this. Returns `false` if the holder was already disposed.
    pub fn release(&self) -> bool {
        if self.disposed.replace(true) {
            return false;
        }
        debug!(id = %self.id, label = %self.display_label(), "about to be deleted");
        SubscriberRegistry::unregister(self.id);
        true
    }

    fn refuse(&self, refusal: Refusal) {
        match refusal {
            Refusal::Cycle => {
                error!(
                    id = %self.id,
                    label = %self.display_label(),
                    "change re-entered a holder that is still notifying; holders form a set-triggers-set cycle"
                );
                if StateConfig::read(|config| config.panic_on_cycle) {
                    panic!(
                        "ftui-state: change cycle through holder {} ('{}')",
                        self.id,
                        self.display_label()
                    );
                }
            }
            Refusal::TooDeep(depth) => {
                error!(
                    id = %self.id,
                    label = %self.display_label(),
                    depth,
                    "change propagation chain exceeds the configured depth, not notifying"
                );
            }
        }
    }
}

impl Drop for HolderCore {
    fn drop(&mut self) {
        if !self.disposed.get() {
            SubscriberRegistry::unregister(self.id);
        }
    }
}

/// A unit of tracked state.
///
/// `get` is the monitored read used by consumers; `get_unmonitored` is for
/// ferrying values between holders without registering a dependency.
pub trait Holder: Subscriber {
    fn core(&self) -> &HolderCore;

    /// Current value, firing a read notification.
    fn get(&self) -> Value;

    /// Current value, without read notification.
    fn get_unmonitored(&self) -> Value;

    /// Store `new_value`; each kind decides what counts as a change.
    fn set(&self, new_value: Value);

    /// Unlink from sources and wrappers, then deregister. Idempotent.
    fn dispose(&self);

    fn id(&self) -> SubscriberId {
        self.core().id()
    }

    fn label(&self) -> Option<String> {
        self.core().label()
    }

    fn set_label(&self, label: &str) {
        self.core().set_label(label);
    }

    fn subscribe(&self, subscriber: SubscriberId) -> bool {
        self.core().subscribe(subscriber)
    }

    fn unsubscribe(&self, subscriber: SubscriberId) -> bool {
        self.core().unsubscribe(subscriber)
    }

    fn subscriber_count(&self) -> usize {
        self.core().subscriber_count()
    }
}

/// Create the holder kind matching the shape of `value`: an
/// [`ObjectHolder`] for aggregates, a [`SimpleHolder`] otherwise.
pub fn create_holder(
    value: impl Into<Value>,
    owner: Option<SubscriberId>,
    label: &str,
) -> Rc<dyn Holder> {
    let value = value.into();
    if value.is_aggregate() {
        return ObjectHolder::new(value, owner, Some(label));
    }
    SimpleHolder::new(value, owner, Some(label))
}
