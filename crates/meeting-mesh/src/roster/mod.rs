//! Team roster: provider capability, address ownership and the projector.
//!
//! The roster is fetched once per join and is static for the meeting.
//! Connected sessions are matched to roster entries by address: `42`, `42-2`
//! and `42-3` all belong to user `42`.

pub mod http;
pub mod projector;

pub use http::HttpRosterProvider;
pub use projector::{ActiveParticipantView, RosterProjector};

use crate::errors::RosterError;
use crate::identity::PeerAddress;

use async_trait::async_trait;
use common::types::{RosterEntry, TeamId};

/// Source of team membership.
#[async_trait]
pub trait RosterProvider: Send + Sync {
    /// Fetch every member of `team_id`.
    async fn get_members(&self, team_id: &TeamId) -> Result<Vec<RosterEntry>, RosterError>;
}

/// Fixed roster, for the simulator and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticRoster {
    entries: Vec<RosterEntry>,
}

impl StaticRoster {
    #[must_use]
    pub fn new(entries: Vec<RosterEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl RosterProvider for StaticRoster {
    async fn get_members(&self, _team_id: &TeamId) -> Result<Vec<RosterEntry>, RosterError> {
        Ok(self.entries.clone())
    }
}

/// Roster entry that owns `address`.
///
/// An exact id match wins, so `a-2` goes to user `a-2` rather than to the
/// second session of `a`. Otherwise the address belongs to at most one
/// user id.
#[must_use]
pub fn owner_of<'a>(address: &PeerAddress, roster: &'a [RosterEntry]) -> Option<&'a RosterEntry> {
    roster
        .iter()
        .find(|entry| entry.user_id.as_str() == address.as_str())
        .or_else(|| {
            roster
                .iter()
                .find(|entry| address.belongs_to(&entry.user_id))
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn roster() -> Vec<RosterEntry> {
        vec![
            RosterEntry::member("a", "Ann"),
            RosterEntry::member("a-2", "Second Ann"),
            RosterEntry::member("ab", "Abe"),
        ]
    }

    #[test]
    fn test_owner_exact_match_wins() {
        let roster = roster();
        let owner = owner_of(&PeerAddress::from("a-2"), &roster).unwrap();
        assert_eq!(owner.display_name, "Second Ann");
    }

    #[test]
    fn test_owner_by_session_suffix() {
        let roster = roster();
        assert_eq!(
            owner_of(&PeerAddress::from("a-3"), &roster).unwrap().display_name,
            "Ann"
        );
        assert_eq!(
            owner_of(&PeerAddress::from("ab-2"), &roster).unwrap().display_name,
            "Abe"
        );
        assert!(owner_of(&PeerAddress::from("abc"), &roster).is_none());
    }

    #[tokio::test]
    async fn test_static_roster() {
        let provider = StaticRoster::new(roster());
        let members = provider.get_members(&TeamId::new("7")).await.unwrap();
        assert_eq!(members.len(), 3);
    }
}
