#![forbid(unsafe_code)]

//! Errors surfaced to callers.
//!
//! Most anomalies (type mismatches, stale event origins, dangling subscriber
//! ids) are recoverable and handled where they are detected: they are logged
//! and the operation becomes a no-op. Only internal-consistency failures
//! reach the caller as a [`StateError`].

use std::fmt;

use crate::registry::SubscriberId;

/// Internal-consistency failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// A binding was reset from upstream but has no source to write to.
    MissingSource {
        holder: SubscriberId,
        label: Option<String>,
    },
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSource { holder, label } => write!(
                f,
                "binding {holder} ('{}') was reset but has no source",
                label.as_deref().unwrap_or("unknown")
            ),
        }
    }
}

impl std::error::Error for StateError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SubscriberRegistry;

    #[test]
    fn display_names_holder_and_label() {
        let holder = SubscriberRegistry::issue_id();
        let err = StateError::MissingSource {
            holder,
            label: Some("title".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains(&holder.to_string()));
        assert!(msg.contains("title"));
    }

    #[test]
    fn display_without_label() {
        let err = StateError::MissingSource {
            holder: SubscriberRegistry::issue_id(),
            label: None,
        };
        assert!(err.to_string().contains("unknown"));
    }
}
