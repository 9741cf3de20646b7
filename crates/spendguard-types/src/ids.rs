//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Alerts, cache entries, metrics records, workflows, and workflow steps
//! each get their own strongly-typed ID so they cannot be mixed up at
//! compile time. All IDs use UUID v7 (time-ordered), which keeps `SQLite`
//! primary keys roughly insertion-ordered.
//!
//! Owner identifiers are plain strings supplied by the front end and are
//! not wrapped here.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl core::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for a cost alert.
    AlertId
}

define_id! {
    /// Unique identifier for a cache entry (distinct from its content key).
    CacheEntryId
}

define_id! {
    /// Unique identifier for a request metrics record.
    MetricsId
}

define_id! {
    /// Unique identifier for a checkpointed workflow.
    WorkflowId
}

define_id! {
    /// Unique identifier for a single step inside a workflow.
    StepId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let alert = AlertId::new();
        let workflow = WorkflowId::new();
        // These are different types -- the compiler enforces no mixing.
        assert_ne!(alert.into_inner(), Uuid::nil());
        assert_ne!(workflow.into_inner(), Uuid::nil());
    }

    #[test]
    fn id_parses_from_display() {
        let id = WorkflowId::new();
        let parsed: Result<WorkflowId, _> = id.to_string().parse();
        assert_eq!(parsed.ok(), Some(id));
    }

    #[test]
    fn id_rejects_garbage() {
        assert!("not-a-uuid".parse::<AlertId>().is_err());
    }

    #[test]
    fn id_serializes_as_bare_uuid() {
        let id = MetricsId::new();
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, format!("\"{}\"", id.into_inner()));
    }
}
