//! Typed identifiers and injectable id generation.
//!
//! IDs are opaque String wrappers (serde-transparent) so the wire format stays
//! a plain string. Generation is behind [`IdGenerator`] so callers can pick a
//! deterministic counter (tests, replay) or random UUIDs (production).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from any string value.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// View as string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

typed_id!(
    /// Identifier of an audit record (router, bridge, or kill-switch event).
    AuditEventId
);
typed_id!(
    /// Identifier of an execution contract.
    ContractId
);
typed_id!(
    /// Identifier of an agent acting as delegator or delegate.
    AgentId
);
typed_id!(
    /// Identifier of a recorded policy or controller decision.
    DecisionId
);
typed_id!(
    /// Identifier of an interactive session.
    SessionId
);

/// Source of unique identifiers.
///
/// Every id in the gateway is `"{prefix}-{suffix}"`; the suffix strategy is
/// the implementor's choice.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self, prefix: &str) -> String;
}

/// Monotonic counter ids (`exec-000001`, `exec-000002`, ...).
///
/// The counter is shared across prefixes, so ids also encode global
/// creation order.
#[derive(Debug, Default)]
pub struct SequentialIds {
    counter: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}-{n:06}")
    }
}

/// Random UUID v4 ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", uuid::Uuid::new_v4())
    }
}
