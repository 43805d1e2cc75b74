#![forbid(unsafe_code)]

//! Engine-wide policy knobs.
//!
//! Holders are created all over a widget tree, so the policy is installed
//! once per UI thread rather than passed to each constructor:
//!
//! ```
//! use ftui_state::StateConfig;
//!
//! StateConfig::default()
//!     .with_max_propagation_depth(32)
//!     .with_panic_on_cycle(false)
//!     .install();
//! assert_eq!(StateConfig::current().max_propagation_depth, 32);
//! ```

use std::cell::RefCell;

/// Smallest accepted propagation depth limit.
const MIN_PROPAGATION_DEPTH: usize = 1;

/// Policy for change propagation and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateConfig {
    /// Longest chain of holders a single change may travel through before
    /// the fan-out is refused and logged. Default: 64.
    pub max_propagation_depth: usize,

    /// Panic when a holder re-enters its own change fan-out (a
    /// `set`-triggers-`set` cycle). When off the nested fan-out is skipped
    /// and logged at `error`. Default: on in debug builds.
    pub panic_on_cycle: bool,

    /// Warn when a one-way binding is created from an aggregate that is not
    /// already observed. Default: true.
    pub warn_unobserved_source: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            max_propagation_depth: 64,
            panic_on_cycle: cfg!(debug_assertions),
            warn_unobserved_source: true,
        }
    }
}

thread_local! {
    static CURRENT: RefCell<StateConfig> = RefCell::new(StateConfig::default());
}

impl StateConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the propagation depth limit (clamped to at least 1).
    #[must_use]
    pub fn with_max_propagation_depth(mut self, depth: usize) -> Self {
        self.max_propagation_depth = depth.max(MIN_PROPAGATION_DEPTH);
        self
    }

    #[must_use]
    pub fn with_panic_on_cycle(mut self, panic_on_cycle: bool) -> Self {
        self.panic_on_cycle = panic_on_cycle;
        self
    }

    #[must_use]
    pub fn with_warn_unobserved_source(mut self, warn: bool) -> Self {
        self.warn_unobserved_source = warn;
        self
    }

    /// Make this the policy for the current thread. Returns the previous one.
    pub fn install(self) -> StateConfig {
        CURRENT.with(|current| current.replace(self))
    }

    /// The policy in effect on the current thread.
    #[must_use]
    pub fn current() -> StateConfig {
        Self::read(Clone::clone)
    }

    pub(crate) fn read<R>(f: impl FnOnce(&StateConfig) -> R) -> R {
        CURRENT.with(|current| f(&current.borrow()))
    }
}
