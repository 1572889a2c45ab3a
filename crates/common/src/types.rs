//! Common data types for the meeting mesh.
//!
//! Identifiers are opaque strings as handed out by the collaboration backend
//! (user ids are UUIDs, team and meeting ids are integers rendered as text).

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an identifier from any string-like value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Unique identifier for a user account
    UserId
);

string_id!(
    /// Unique identifier for a team
    TeamId
);

string_id!(
    /// Unique identifier for a scheduled meeting
    MeetingId
);

/// Role of a roster member within the team.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The team leader (may cancel meetings).
    Leader,
    /// A regular member, with the free-form role label from the team
    /// membership (e.g. "Developer", "QA").
    Member(Option<String>),
}

impl Role {
    /// Returns true for the team leader.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader)
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Member(None)
    }
}

/// One member of the team roster, essentially static for a meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub role: Role,
}

impl RosterEntry {
    /// Create a member entry with no avatar.
    #[must_use]
    pub fn member(user_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            avatar_url: None,
            role: Role::default(),
        }
    }

    /// Set the avatar URL.
    #[must_use]
    pub fn with_avatar(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }

    /// Set the role.
    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }
}
