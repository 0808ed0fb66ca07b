//! Identifier types for plansync.
//!
//! Store-generated identifiers are UUID newtypes produced by the
//! `uuid_id_type!` macro. The identity-provider subject is kept as an opaque
//! string because the provider controls its format.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error type for identifier parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// Invalid UUID format.
    #[error("invalid UUID format")]
    InvalidUuid,

    /// Empty user identifier.
    #[error("user identifier must not be empty")]
    EmptyUserId,
}

/// Macro to define a UUID-based identifier type with standard trait implementations.
///
/// Generates a newtype around `uuid::Uuid` with `Serialize`/`Deserialize` (as string),
/// `FromStr`, `Display`, `Debug` and conversions to and from `String`.
macro_rules! uuid_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Create a new identifier from a UUID.
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Generate a new random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Return the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
                Ok(Self(uuid))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }
    };
}

uuid_id_type!(SubscriptionId, "A subscription record identifier (generated by the store).");
uuid_id_type!(UserRecordId, "An internal user record identifier (generated by the store).");

/// The identity-provider subject a subscription belongs to.
///
/// Subscription records are keyed by this value rather than by a foreign key
/// to the user table, because billing events can arrive before the identity
/// provider has told us about the user.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Create a user identifier, rejecting blank values.
    ///
    /// # Errors
    ///
    /// Returns `IdError::EmptyUserId` when the value is empty or whitespace.
    pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(IdError::EmptyUserId);
        }
        if trimmed.len() == value.len() {
            Ok(Self(value))
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }

    /// Borrow the raw subject string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for UserId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_id_roundtrip() {
        let id = SubscriptionId::generate();
        let parsed: SubscriptionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn subscription_id_rejects_garbage() {
        assert_eq!(
            "not-a-uuid".parse::<SubscriptionId>(),
            Err(IdError::InvalidUuid)
        );
    }

    #[test]
    fn user_id_trims_whitespace() {
        let id = UserId::new("  user_2abc ").unwrap();
        assert_eq!(id.as_str(), "user_2abc");
    }

    #[test]
    fn user_id_rejects_blank() {
        assert_eq!(UserId::new("   "), Err(IdError::EmptyUserId));
        assert_eq!("".parse::<UserId>(), Err(IdError::EmptyUserId));
    }

    #[test]
    fn user_id_serde_as_string() {
        let id = UserId::new("user_2abc").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"user_2abc\"");
        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<UserId>("\"\"").is_err());
    }
}
