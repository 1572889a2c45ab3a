//! REST roster provider.
//!
//! Fetches `GET {base}/api/v1/teams/{team_id}` and maps the team payload to
//! roster entries. The team's `leader_id` marks the leader; members are
//! identified by the first present of `student_id`, `user_id` or `id`.

use super::RosterProvider;
use crate::errors::RosterError;

use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use common::types::{Role, RosterEntry, TeamId, UserId};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Default request timeout.
pub const DEFAULT_ROSTER_HTTP_TIMEOUT: Duration = Duration::from_millis(10_000);

const API_PREFIX: &str = "/api/v1";

/// Id that may be sent as a JSON string (UUID) or number.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl RawId {
    fn into_user_id(self) -> Option<UserId> {
        match self {
            RawId::Text(text) if text.trim().is_empty() => None,
            RawId::Text(text) => Some(UserId::new(text.trim())),
            RawId::Number(number) => Some(UserId::new(number.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TeamPayload {
    leader_id: Option<RawId>,
    #[serde(default)]
    members: Vec<MemberPayload>,
}

#[derive(Debug, Deserialize)]
struct MemberPayload {
    student_id: Option<RawId>,
    user_id: Option<RawId>,
    id: Option<RawId>,
    full_name: Option<String>,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
    role: Option<String>,
}

/// Map a team payload to roster entries, dropping members without an id.
fn entries_from_payload(payload: TeamPayload) -> Vec<RosterEntry> {
    let leader = payload.leader_id.and_then(RawId::into_user_id);
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(payload.members.len());

    for member in payload.members {
        let Some(user_id) = member
            .student_id
            .or(member.user_id)
            .or(member.id)
            .and_then(RawId::into_user_id)
        else {
            warn!(target: "mesh.roster", "Dropping roster member without an id");
            continue;
        };

        if !seen.insert(user_id.clone()) {
            debug!(target: "mesh.roster", user_id = %user_id, "Duplicate roster member ignored");
            continue;
        }

        let display_name = member
            .full_name
            .or(member.name)
            .or(member.email)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| user_id.to_string());

        let role = if leader.as_ref() == Some(&user_id) {
            Role::Leader
        } else {
            Role::Member(member.role)
        };

        entries.push(RosterEntry {
            user_id,
            display_name,
            avatar_url: member.avatar_url,
            role,
        });
    }

    entries
}

/// Normalize a base URL so it ends with exactly one `/api/v1`.
fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.ends_with(API_PREFIX) {
        trimmed.to_string()
    } else {
        format!("{trimmed}{API_PREFIX}")
    }
}

/// HTTP client for the team membership API.
pub struct HttpRosterProvider {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
}

impl HttpRosterProvider {
    /// Create a provider for `base_url` (with or without the `/api/v1`
    /// suffix).
    ///
    /// # Errors
    ///
    /// Returns `RosterError::Http` if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, RosterError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| {
                error!(target: "mesh.roster", error = %e, "Failed to build HTTP client");
                RosterError::Http(e.to_string())
            })?;

        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
            token,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl fmt::Debug for HttpRosterProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRosterProvider")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RosterProvider for HttpRosterProvider {
    #[instrument(skip_all, name = "mesh.roster.fetch", fields(team_id = %team_id))]
    async fn get_members(&self, team_id: &TeamId) -> Result<Vec<RosterEntry>, RosterError> {
        let url = format!("{}/teams/{}", self.base_url, team_id);

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            warn!(target: "mesh.roster", error = %e, "Roster request failed");
            RosterError::Http(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(target: "mesh.roster", status = %status, "Roster API returned error status");
            return Err(RosterError::Status(status.as_u16()));
        }

        let payload: TeamPayload = response.json().await.map_err(|e| {
            error!(target: "mesh.roster", error = %e, "Failed to parse roster response");
            RosterError::InvalidResponse(e.to_string())
        })?;

        let entries = entries_from_payload(payload);
        debug!(target: "mesh.roster", members = entries.len(), "Roster fetched");
        Ok(entries)
    }
}
