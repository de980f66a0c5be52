//! Branded ID newtypes for type safety.
//!
//! Every persisted entity has a distinct ID type wrapping a `String`, so a
//! session ID cannot be passed where an agent ID is expected. Entity ids
//! are 26-character ULIDs (lexicographically sortable); session trace ids
//! are UUIDv4.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Generate a new ULID string (26 chars, time-ordered).
fn new_ulid() -> String {
    ulid::Ulid::new().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (ULID, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_ulid())
            }

            /// Create from an existing string value.
            #[must_use]
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Unique identifier for a governed session.
    SessionId
}

branded_id! {
    /// Unique identifier for an agent within a session.
    AgentId
}

branded_id! {
    /// Unique identifier for an audit event.
    EventId
}

branded_id! {
    /// Unique identifier for a boundary violation record.
    ViolationId
}

/// Session-scoped correlation identifier propagated into event details.
///
/// Unlike the entity ids this is a UUIDv4, matching what the host runtime
/// and downstream trace consumers expect.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    /// Create a new random trace id (UUIDv4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TraceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TraceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_ulid_shaped() {
        let id = SessionId::new();
        assert_eq!(id.as_str().len(), 26);
        assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn ids_are_unique() {
        let a = EventId::new();
        let b = EventId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn ulids_sort_by_creation_order() {
        let a = EventId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = EventId::new();
        assert!(a.as_str() < b.as_str());
    }

    #[test]
    fn trace_id_is_uuid_v4() {
        let id = TraceId::new();
        let parsed = uuid::Uuid::parse_str(id.as_str()).expect("valid uuid");
        assert_eq!(parsed.get_version(), Some(uuid::Version::Random));
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = SessionId::from_raw("01ARZ3NDEKTSV4RRFFQ69G5FAV");
        assert_eq!(id.as_str(), "01ARZ3NDEKTSV4RRFFQ69G5FAV");
    }

    #[test]
    fn serde_is_transparent() {
        let id = AgentId::from_raw("agent-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"agent-1\"");
        let back: AgentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn display_and_into_string() {
        let id = EventId::from_raw("evt-1");
        assert_eq!(format!("{id}"), "evt-1");
        let s: String = id.into();
        assert_eq!(s, "evt-1");
    }
}
