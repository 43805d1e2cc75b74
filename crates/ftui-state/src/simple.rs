#![forbid(unsafe_code)]

//! Holder for primitive values.
//!
//! Writes are dirty-checked by value equality; an equal write is a no-op and
//! notifies nobody.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::holder::{Holder, HolderCore};
use crate::registry::{Capabilities, Subscriber, SubscriberId};
use crate::value::Value;

/// Holder for booleans, numbers and strings.
#[derive(Debug)]
pub struct SimpleHolder {
    core: HolderCore,
    value: RefCell<Value>,
}

impl SimpleHolder {
    const CAPABILITIES: Capabilities = Capabilities::SYNC_PEER;

    /// Create and register a holder; `owner` is subscribed immediately.
    #[must_use]
    pub fn new(
        value: impl Into<Value>,
        owner: Option<SubscriberId>,
        label: Option<&str>,
    ) -> Rc<Self> {
        let value = value.into();
        let holder = Rc::new_cyclic(|this: &Weak<Self>| Self {
            core: HolderCore::new(this.clone(), Self::CAPABILITIES, owner, label),
            value: RefCell::new(value),
        });
        if holder.value.borrow().is_aggregate() {
            warn!(
                id = %holder.core.id(),
                label = %holder.core.display_label(),
                "simple holder given an aggregate; member changes will not be observed"
            );
        }
        holder
    }
}

impl Subscriber for SimpleHolder {
    fn subscriber_id(&self) -> SubscriberId {
        self.core.id()
    }

    fn capabilities(&self) -> Capabilities {
        Self::CAPABILITIES
    }

    /// A holder this one subscribes to changed: forward to our subscribers.
    fn sync_peer_has_changed(&self, origin: SubscriberId) {
        debug!(id = %self.core.id(), origin = %origin, "peer changed, forwarding");
        let value = self.get_unmonitored();
        self.core.notify_changed(&value);
    }
}

impl Holder for SimpleHolder {
    fn core(&self) -> &HolderCore {
        &self.core
    }

    fn get(&self) -> Value {
        self.core.notify_read();
        self.get_unmonitored()
    }

    fn get_unmonitored(&self) -> Value {
        self.value.borrow().clone()
    }

    fn set(&self, new_value: Value) {
        if *self.value.borrow() == new_value {
            debug!(id = %self.core.id(), label = %self.core.display_label(), "set with unchanged value, ignoring");
            return;
        }
        debug!(id = %self.core.id(), label = %self.core.display_label(), "set, changed");
        self.value.replace(new_value.clone());
        self.core.notify_changed(&new_value);
    }

    fn dispose(&self) {
        self.core.release();
    }
}
