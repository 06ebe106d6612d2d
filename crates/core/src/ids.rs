//! Newtype identifiers used across crates.
//!
//! Each id wraps a `String` (tenant/shard/session ids are caller- or
//! config-supplied) or a `Uuid` (transaction/request/plan ids are
//! generated). Wrapping rather than passing bare `String`/`Uuid` keeps
//! e.g. a `TenantId` from being passed where a `ShardId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Borrow the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }
    };
}

string_id!(TenantId);
string_id!(ShardId);
string_id!(SessionId);

macro_rules! uuid_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random id.
            pub fn new() -> Self {
                $name(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }
    };
}

uuid_id!(TransactionId, "tx");
uuid_id!(RequestId, "req");
uuid_id!(PlanId, "plan");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_id_roundtrips() {
        let t: TenantId = "alpha".into();
        assert_eq!(t.as_str(), "alpha");
        assert_eq!(t.to_string(), "alpha");
    }

    #[test]
    fn uuid_id_unique() {
        assert_ne!(TransactionId::new(), TransactionId::new());
    }
}
