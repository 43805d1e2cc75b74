#![forbid(unsafe_code)]

//! Reactive property holders for FrankenTUI.
//!
//! # Role in FrankenTUI
//! `ftui-state` tracks the mutable state fields declared by widgets, records
//! which consumers depend on each field, and keeps derived bindings in sync
//! with the field they mirror. The render scheduler consumes its change and
//! read notifications; the engine itself knows nothing about rendering.
//!
//! # Primary responsibilities
//! - **[`SubscriberRegistry`]**: id-keyed, non-owning table of everything that
//!   can receive a notification.
//! - **[`Holder`]**: the unit of tracked state. Concrete kinds:
//!   [`SimpleHolder`] (primitives), [`ObjectHolder`] (aggregates),
//!   [`OneWaySyncHolder`] (isolated deep-copied mirror) and
//!   [`TwoWaySyncHolder`] (write-through mirror).
//! - **[`ObservedObject`]**: wrapper that turns member mutation of an
//!   aggregate into a holder-level change.
//!
//! # Architecture
//!
//! Everything is single-threaded and synchronous: a `set` runs its whole
//! notification fan-out before returning. Holders live in `Rc`s; the registry
//! only keeps `Weak` references, so subscribers address each other by
//! [`SubscriberId`] and a lookup miss is an ordinary, logged event.
//!
//! # Invariants
//!
//! 1. A no-op write (equal primitive, identical aggregate) never notifies.
//! 2. A one-way mirror never shares mutable state with its source.
//! 3. Disposal unlinks from sources and wrappers before deregistering.
//! 4. No `RefCell` borrow is held while a subscriber callback runs.

pub mod config;
pub mod error;
pub mod holder;
pub mod object;
pub mod observed;
pub mod one_way;
pub mod recorder;
pub mod registry;
pub mod simple;
pub mod two_way;
pub mod value;

pub use config::StateConfig;
pub use error::StateError;
pub use holder::{Holder, HolderCore, create_holder};
pub use object::ObjectHolder;
pub use observed::{
    Aggregate, ObservedObject, OwnershipPath, RawObject, SelfTracking, TrackedObject,
};
pub use one_way::{OneWaySyncHolder, SyncSource};
pub use recorder::{Recorded, RecordingSubscriber};
pub use registry::{Capabilities, Resolved, Subscriber, SubscriberId, SubscriberRegistry};
pub use simple::SimpleHolder;
pub use two_way::TwoWaySyncHolder;
pub use value::Value;
