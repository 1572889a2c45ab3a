//! Roster provider doubles.

use async_trait::async_trait;
use common::types::{RosterEntry, TeamId};
use meeting_mesh::errors::RosterError;
use meeting_mesh::roster::RosterProvider;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Provider whose every fetch fails with the configured error.
#[derive(Debug)]
pub struct FailingRoster {
    error: RosterError,
}

impl FailingRoster {
    #[must_use]
    pub fn new(error: RosterError) -> Self {
        Self { error }
    }

    /// Fails like an unreachable roster service.
    #[must_use]
    pub fn unavailable() -> Self {
        Self::new(RosterError::Status(503))
    }
}

#[async_trait]
impl RosterProvider for FailingRoster {
    async fn get_members(&self, _team_id: &TeamId) -> Result<Vec<RosterEntry>, RosterError> {
        Err(self.error.clone())
    }
}

/// Fixed roster that records which teams were requested.
#[derive(Debug, Default)]
pub struct CountingRoster {
    entries: Vec<RosterEntry>,
    calls: AtomicUsize,
    teams: Mutex<Vec<TeamId>>,
}

impl CountingRoster {
    #[must_use]
    pub fn new(entries: Vec<RosterEntry>) -> Self {
        Self {
            entries,
            calls: AtomicUsize::new(0),
            teams: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn requested_teams(&self) -> Vec<TeamId> {
        self.teams.lock().unwrap().clone()
    }
}

#[async_trait]
impl RosterProvider for CountingRoster {
    async fn get_members(&self, team_id: &TeamId) -> Result<Vec<RosterEntry>, RosterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.teams.lock().unwrap().push(team_id.clone());
        Ok(self.entries.clone())
    }
}
