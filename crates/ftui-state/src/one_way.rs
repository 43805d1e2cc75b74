#![forbid(unsafe_code)]

//! One-way binding: an isolated, deep-copied mirror of a source holder.
//!
//! # Design
//!
//! [`OneWaySyncHolder`] keeps a private *local copy* of its source's
//! aggregate. Changes flow source → local only: the local copy is replaced by
//! a fresh deep copy whenever the source changes, while local writes and
//! local member mutations never reach the source.
//!
//! Initialization:
//!
//! | Source | Behavior |
//! |--------|----------|
//! | [`SyncSource::Unset`] / `Value::Undefined` | no source; empty until the first local `set` |
//! | [`SyncSource::Holder`] | subscribe to the given holder |
//! | [`SyncSource::Value`] | wrap in an internal [`ObjectHolder`] labelled `<label>_source`, owned by this binding |
//!
//! With a source, the local copy starts as a deep copy of `source.get()`.
//!
//! Updates:
//!
//! 1. **Peer changed** (source notified): deep-copy resync, notify. Events
//!    from any other origin are logged and ignored.
//! 2. **Member changed** on the source's aggregate: deep-copy resync, always
//!    notify. On the local copy: notify only.
//! 3. **Local `set`**: identity no-op check, then resync *without* copying
//!    (the caller hands over ownership), notify.
//! 4. **[`OneWaySyncHolder::reset`]**: upstream re-evaluation writes to the
//!    source, which comes back as (1). Without a source this is an
//!    internal-consistency error returned to the caller.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::{debug, error, warn};

use crate::config::StateConfig;
use crate::error::StateError;
use crate::holder::{Holder, HolderCore};
use crate::object::ObjectHolder;
use crate::observed::{Aggregate, ObservedObject, OwnershipPath};
use crate::registry::{Capabilities, Subscriber, SubscriberId};
use crate::value::Value;

/// What a sync binding is created from.
#[derive(Clone, Default)]
pub enum SyncSource {
    /// No upstream; the binding is initialized locally.
    #[default]
    Unset,
    /// An existing holder, e.g. shared app storage.
    Holder(Rc<dyn Holder>),
    /// A plain value handed down by the parent element.
    Value(Value),
}

impl std::fmt::Debug for SyncSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unset => f.write_str("Unset"),
            Self::Holder(holder) => f.debug_tuple("Holder").field(&holder.id()).finish(),
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
        }
    }
}

impl From<Rc<dyn Holder>> for SyncSource {
    fn from(holder: Rc<dyn Holder>) -> Self {
        Self::Holder(holder)
    }
}

impl<H: Holder + 'static> From<Rc<H>> for SyncSource {
    fn from(holder: Rc<H>) -> Self {
        Self::Holder(holder)
    }
}

impl From<Value> for SyncSource {
    fn from(value: Value) -> Self {
        if value.is_undefined() {
            Self::Unset
        } else {
            Self::Value(value)
        }
    }
}

/// One-way synchronized aggregate binding.
pub struct OneWaySyncHolder {
    core: HolderCore,
    source: RefCell<Option<Rc<dyn Holder>>>,
    /// Set when `source` is the internal holder created from a plain value.
    owns_source: Cell<bool>,
    local_copy: RefCell<Option<Aggregate>>,
}

impl std::fmt::Debug for OneWaySyncHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneWaySyncHolder")
            .field("core", &self.core)
            .field("source", &self.source.borrow().as_ref().map(|source| source.id()))
            .field("owns_source", &self.owns_source.get())
            .field("local_copy", &self.local_copy.borrow())
            .finish()
    }
}

impl OneWaySyncHolder {
    const CAPABILITIES: Capabilities = Capabilities::SYNC_PEER.union(Capabilities::MEMBER_CHANGE);

    /// Create and register a binding; `owner` is subscribed immediately.
    #[must_use]
    pub fn new(
        source: impl Into<SyncSource>,
        owner: Option<SubscriberId>,
        label: Option<&str>,
    ) -> Rc<Self> {
        let holder = Rc::new_cyclic(|this: &Weak<Self>| Self {
            core: HolderCore::new(this.clone(), Self::CAPABILITIES, owner, label),
            source: RefCell::new(None),
            owns_source: Cell::new(false),
            local_copy: RefCell::new(None),
        });

        match source.into() {
            SyncSource::Unset => {
                debug!(id = %holder.core.id(), label = %holder.core.display_label(), "constructed without source");
            }
            SyncSource::Value(value) if value.is_undefined() => {
                debug!(id = %holder.core.id(), label = %holder.core.display_label(), "constructed without source");
            }
            SyncSource::Holder(source) => {
                source.subscribe(holder.core.id());
                holder.source.replace(Some(source));
            }
            SyncSource::Value(value) => {
                if !ObservedObject::is_observed(&value)
                    && StateConfig::read(|config| config.warn_unobserved_source)
                {
                    warn!(
                        id = %holder.core.id(),
                        label = %holder.core.display_label(),
                        value_type = value.type_name(),
                        "source value is not observed; member changes made outside this binding will not be seen"
                    );
                }
                let source_label = format!("{}_source", holder.core.display_label());
                let source: Rc<dyn Holder> =
                    ObjectHolder::new(value, Some(holder.core.id()), Some(&source_label));
                holder.source.replace(Some(source));
                holder.owns_source.set(true);
            }
        }

        if let Some(source) = holder.source() {
            holder.resync(source.get(), true);
            debug!(id = %holder.core.id(), label = %holder.core.display_label(), "initial resync done");
        }
        holder
    }

    /// The holder this binding mirrors, if any.
    #[must_use]
    pub fn source(&self) -> Option<Rc<dyn Holder>> {
        self.source.borrow().clone()
    }

    /// Push a re-evaluated upstream value into the source. The change comes
    /// back as a peer-changed notification.
    pub fn reset(&self, value: impl Into<Value>) -> Result<(), StateError> {
        let Some(source) = self.source() else {
            error!(
                id = %self.core.id(),
                label = %self.core.display_label(),
                "reset without source, internal error"
            );
            return Err(StateError::MissingSource {
                holder: self.core.id(),
                label: self.core.label(),
            });
        };
        debug!(id = %self.core.id(), label = %self.core.display_label(), "reset, writing to source");
        source.set(value.into());
        Ok(())
    }

    /// Replace the local copy. `need_deep_copy` must be set whenever
    /// `new_value` may still be mutated by someone else (i.e. it comes from
    /// the source).
    ///
    /// Returns `false`, changing nothing, if `new_value` is neither an
    /// aggregate nor undefined; `true` otherwise.
    pub fn resync(&self, new_value: Value, need_deep_copy: bool) -> bool {
        if !new_value.is_aggregate() && !new_value.is_undefined() {
            error!(
                id = %self.core.id(),
                label = %self.core.display_label(),
                value_type = new_value.type_name(),
                "new value must be an aggregate, not setting"
            );
            return false;
        }

        let previous = self.local_copy.borrow_mut().take();
        if let Some(previous) = previous {
            previous.release(self.core.id());
        }

        let Value::Object(aggregate) = new_value else {
            debug!(id = %self.core.id(), "local copy cleared");
            return true;
        };

        let copy = if need_deep_copy {
            aggregate.deep_copy()
        } else {
            aggregate
        };
        let (stored, path) = copy.adopt(self.core.id());
        if path == OwnershipPath::Wrapped {
            debug!(id = %self.core.id(), label = %self.core.display_label(), "local value wrapped in an observed object");
        }
        self.local_copy.replace(Some(stored));
        true
    }

    fn holds_source_value(&self, object: &Aggregate) -> bool {
        self.source().is_some_and(|source| {
            source
                .get_unmonitored()
                .as_aggregate()
                .is_some_and(|held| held.ptr_eq(object))
        })
    }

    fn notify_current(&self) {
        let current = self.get_unmonitored();
        self.core.notify_changed(&current);
    }
}

impl Subscriber for OneWaySyncHolder {
    fn subscriber_id(&self) -> SubscriberId {
        self.core.id()
    }

    fn capabilities(&self) -> Capabilities {
        Self::CAPABILITIES
    }

    fn sync_peer_has_changed(&self, origin: SubscriberId) {
        let Some(source) = self.source() else {
            warn!(
                id = %self.core.id(),
                label = %self.core.display_label(),
                origin = %origin,
                "peer changed but source is unset, internal error"
            );
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
        debug!(id = %self.core.id(), label = %self.core.display_label(), "source changed");
        self.resync(source.get_unmonitored(), true);
        self.notify_current();
    }

    fn member_has_changed(&self, object: &Aggregate, member: &str) {
        if self.holds_source_value(object) {
            debug!(id = %self.core.id(), member, "member of source aggregate changed");
            self.resync(Value::Object(object.clone()), true);
        } else {
            debug!(id = %self.core.id(), member, "member of local copy changed");
        }
        self.notify_current();
    }
}

impl Holder for OneWaySyncHolder {
    fn core(&self) -> &HolderCore {
        &self.core
    }

    fn get(&self) -> Value {
        self.core.notify_read();
        self.get_unmonitored()
    }

    fn get_unmonitored(&self) -> Value {
        self.local_copy
            .borrow()
            .clone()
            .map_or(Value::Undefined, Value::Object)
    }

    fn set(&self, new_value: Value) {
        let unchanged = match (&*self.local_copy.borrow(), &new_value) {
            (Some(current), Value::Object(incoming)) => current.ptr_eq(incoming),
            (None, Value::Undefined) => true,
            _ => false,
        };
        if unchanged {
            debug!(id = %self.core.id(), label = %self.core.display_label(), "set with unchanged value, ignoring");
            return;
        }
        debug!(id = %self.core.id(), label = %self.core.display_label(), "local set");
        self.resync(new_value, false);
        self.notify_current();
    }

    fn dispose(&self) {
        if self.core.is_disposed() {
            return;
        }
        let source = self.source.borrow_mut().take();
        if let Some(source) = source {
            source.unsubscribe(self.core.id());
            if self.owns_source.replace(false) {
                source.dispose();
            }
        }
        if let Some(local) = self.local_copy.borrow().as_ref() {
            local.release(self.core.id());
        }
        self.core.release();
    }
}
