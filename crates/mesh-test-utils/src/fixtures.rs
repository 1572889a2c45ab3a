//! Pre-built roster entries, streams and configs.

use common::types::{Role, RosterEntry};
use meeting_mesh::media::{MediaStream, MediaTrack, TrackKind};
use meeting_mesh::MeshConfig;
use std::time::Duration;

/// Roster with one member per id, named `User {id}`. The first id leads.
#[must_use]
pub fn roster_of(ids: &[&str]) -> Vec<RosterEntry> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| {
            let entry = RosterEntry::member(*id, format!("User {id}"));
            if i == 0 {
                entry.with_role(Role::Leader)
            } else {
                entry
            }
        })
        .collect()
}

/// Audio + video stream with tracks labelled after `label`.
#[must_use]
pub fn test_stream(label: &str) -> MediaStream {
    MediaStream::new(vec![
        MediaTrack::new(TrackKind::Audio, format!("{label}-mic")),
        MediaTrack::new(TrackKind::Video, format!("{label}-cam")),
    ])
}

/// Default config with the given discovery interval.
#[must_use]
pub fn config_with_interval(interval: Duration) -> MeshConfig {
    MeshConfig {
        discovery_interval: interval,
        ..MeshConfig::default()
    }
}
