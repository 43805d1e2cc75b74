#![forbid(unsafe_code)]

//! Log-level contract for recoverable anomalies.
//!
//! Anomalies never panic or fail the caller; they are reported through
//! `tracing` at `warn` (recoverable) or `error` (internal inconsistency).
//! A counting layer installed per test captures what was emitted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ftui_state::{
    Capabilities, Holder, ObjectHolder, OneWaySyncHolder, RawObject, RecordingSubscriber,
    SimpleHolder, StateConfig, Subscriber, SubscriberRegistry, SyncSource, TwoWaySyncHolder,
    Value,
};
use tracing::Level;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

#[derive(Clone, Default)]
struct LevelCounter {
    warnings: Arc<AtomicUsize>,
    errors: Arc<AtomicUsize>,
}

impl LevelCounter {
    fn warnings(&self) -> usize {
        self.warnings.load(Ordering::SeqCst)
    }

    fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }
}

impl<S: tracing::Subscriber> Layer<S> for LevelCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        match *event.metadata().level() {
            Level::WARN => {
                self.warnings.fetch_add(1, Ordering::SeqCst);
            }
            Level::ERROR => {
                self.errors.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}

/// Run `f` with a fresh counter installed as this thread's dispatcher.
fn capture(f: impl FnOnce()) -> LevelCounter {
    let counter = LevelCounter::default();
    let subscriber = tracing_subscriber::registry().with(counter.clone());
    tracing::subscriber::with_default(subscriber, f);
    counter
}

fn record(a: i32) -> Value {
    Value::from(RawObject::from_members([("a", a)]))
}

#[test]
fn dangling_subscriber_warns_once_per_fan_out() {
    let holder = SimpleHolder::new(0, None, Some("n"));
    let ghost = RecordingSubscriber::new(Capabilities::VALUE_CHANGE);
    holder.subscribe(ghost.subscriber_id());
    ghost.dispose();

    let counter = capture(|| holder.set(Value::from(1)));
    assert_eq!(counter.warnings(), 1);
    assert_eq!(counter.errors(), 0);
}

#[test]
fn stale_origin_warns_and_is_ignored() {
    let source = SimpleHolder::new(0, None, None);
    let link = TwoWaySyncHolder::new(source, None, None);
    let stranger = SubscriberRegistry::issue_id();

    let counter = capture(|| link.sync_peer_has_changed(stranger));
    assert_eq!(counter.warnings(), 1);
    assert_eq!(link.get_unmonitored(), Value::from(0));
}

#[test]
fn object_holder_rejects_primitive_with_warning() {
    let view = RecordingSubscriber::new(Capabilities::VALUE_CHANGE);
    let holder = ObjectHolder::new(record(1), Some(view.subscriber_id()), Some("p"));
    let before = holder.get_unmonitored();
    let counter = capture(|| holder.set(Value::from("text")));
    assert_eq!(counter.warnings(), 1);
    assert_eq!(holder.get_unmonitored(), before);
    // Subscribers are still told to re-read the kept value.
    assert_eq!(view.change_count(), 1);
}

#[test]
fn resync_with_primitive_is_an_error() {
    let mirror = OneWaySyncHolder::new(record(1), None, None);
    let counter = capture(|| {
        assert!(!mirror.resync(Value::from(1), true));
    });
    assert_eq!(counter.errors(), 1);
}

#[test]
fn reset_without_source_logs_and_returns_error() {
    let mirror = OneWaySyncHolder::new(SyncSource::Unset, None, Some("orphan"));
    let counter = capture(|| {
        let err = mirror.reset(record(2)).expect_err("no source");
        assert!(err.to_string().contains("orphan"));
    });
    assert_eq!(counter.errors(), 1);
}

#[test]
fn unobserved_source_value_warning_follows_config() {
    let counter = capture(|| {
        let _mirror = OneWaySyncHolder::new(record(1), None, None);
    });
    assert_eq!(counter.warnings(), 1);

    let previous = StateConfig::new().with_warn_unobserved_source(false).install();
    let counter = capture(|| {
        let _mirror = OneWaySyncHolder::new(record(1), None, None);
    });
    assert_eq!(counter.warnings(), 0);
    previous.install();
}

#[test]
fn normal_traffic_is_quiet() {
    let view = RecordingSubscriber::new(Capabilities::VALUE_CHANGE | Capabilities::PROPERTY_READ);
    let counter = capture(|| {
        let parent = ObjectHolder::new(record(1), Some(view.subscriber_id()), Some("p"));
        let mirror = OneWaySyncHolder::new(parent.clone(), None, None);
        let link = TwoWaySyncHolder::new(parent.clone(), None, None);
        parent.set(record(2));
        link.set(record(3));
        let _ = mirror.get();
        mirror.dispose();
        link.dispose();
        parent.dispose();
    });
    assert_eq!(counter.warnings(), 0);
    assert_eq!(counter.errors(), 0);
}
