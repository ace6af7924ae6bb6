//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Agents, sessions, and LLM requests each get a strongly-typed ID to
//! prevent accidental mixing of identifiers at compile time. All IDs use
//! UUID v7 (time-ordered) so database indexes and log output stay roughly
//! chronological.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
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

            /// Parse an identifier from its string form.
            pub fn parse(s: &str) -> Option<Self> {
                Uuid::parse_str(s).ok().map(Self)
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
    /// Unique identifier for a simulated agent.
    AgentId
}

define_id! {
    /// Unique identifier for a protocol session on the server side.
    SessionId
}

define_id! {
    /// Unique identifier for a request submitted to the LLM dispatcher.
    LlmRequestId
}

/// Identifier of a game-server shard.
///
/// Shards are external game servers the core does not own; their ids come
/// from configuration and are small integers (1..=4 in production).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ShardId(pub u16);

impl ShardId {
    /// Return the raw shard number.
    pub const fn into_inner(self) -> u16 {
        self.0
    }
}

impl core::fmt::Display for ShardId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for ShardId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let agent = AgentId::new();
        let session = SessionId::new();
        // Different types -- the compiler enforces no mixing.
        assert_ne!(agent.into_inner(), Uuid::nil());
        assert_ne!(session.into_inner(), Uuid::nil());
    }

    #[test]
    fn id_roundtrip_serde() {
        let original = AgentId::new();
        let json = serde_json::to_string(&original).ok();
        assert!(json.is_some());
        let restored: Result<AgentId, _> = serde_json::from_str(json.as_deref().unwrap_or(""));
        assert_eq!(restored.ok(), Some(original));
    }

    #[test]
    fn agent_id_parse_matches_display() {
        let id = AgentId::new();
        assert_eq!(AgentId::parse(&id.to_string()), Some(id));
        assert_eq!(AgentId::parse("not-a-uuid"), None);
    }

    #[test]
    fn shard_id_displays_raw_number() {
        assert_eq!(ShardId(3).to_string(), "3");
        assert_eq!(ShardId::from(2).into_inner(), 2);
    }
}
