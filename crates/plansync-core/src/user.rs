//! Identity-provider user mirror.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{UserId, UserRecordId};

/// Profile fields mirrored from the identity provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Primary email address.
    pub email: Option<String>,
    /// Given name.
    pub first_name: Option<String>,
    /// Family name.
    pub last_name: Option<String>,
}

impl UserProfile {
    /// Display name built from the name parts, if any are present.
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// A user record mirrored from the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Internal identifier.
    pub id: UserRecordId,
    /// Identity-provider subject.
    pub external_id: UserId,
    /// Email is required on creation.
    pub email: String,
    /// Given name.
    pub first_name: Option<String>,
    /// Family name.
    pub last_name: Option<String>,
    /// When the record was inserted.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    /// Display name built from the stored name parts.
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        UserProfile {
            email: None,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        }
        .display_name()
    }
}

/// Values for a user record about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    /// Identity-provider subject.
    pub external_id: UserId,
    /// Primary email.
    pub email: String,
    /// Given name.
    pub first_name: Option<String>,
    /// Family name.
    pub last_name: Option<String>,
}
