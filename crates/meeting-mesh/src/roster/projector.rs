//! `RosterProjector` - the "who is in the room" read model.
//!
//! Folds mesh events into an ordered list of live remote streams and derives
//! the view from it together with the static roster and the local media
//! state:
//!
//! 1. The local participant first.
//! 2. Then every connected remote session owned by a roster member, in the
//!    order its `StreamReceived` arrived.
//!
//! Members with no connected session are omitted. The view is derived and
//! never a source of truth; when the projector falls behind the event
//! channel it rebuilds from the peer manager's link snapshot.

use super::owner_of;
use crate::actors::{LinkSnapshot, LinkState, PeerManagerHandle};
use crate::events::MeshEvent;
use crate::identity::{ParticipantIdentity, PeerAddress};
use crate::media::{LocalMediaState, MediaStream};

use common::types::{RosterEntry, UserId};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// One tile of the meeting grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveParticipantView {
    /// Stable key for the UI (`me-<address>` for the local tile).
    pub view_id: String,
    pub address: PeerAddress,
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_local: bool,
    pub is_leader: bool,
    #[serde(skip)]
    pub stream: Option<MediaStream>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

/// Event-folding state behind the active participant view.
#[derive(Debug, Clone)]
pub struct RosterProjector {
    local: ParticipantIdentity,
    roster: Arc<[RosterEntry]>,
    local_media: LocalMediaState,
    /// Connected remote sessions in arrival order.
    live: Vec<(PeerAddress, MediaStream)>,
}

impl RosterProjector {
    #[must_use]
    pub fn new(
        local: ParticipantIdentity,
        roster: Arc<[RosterEntry]>,
        local_media: LocalMediaState,
    ) -> Self {
        Self {
            local,
            roster,
            local_media,
            live: Vec::new(),
        }
    }

    /// Fold one event. Returns true when the view may have changed.
    pub fn apply(&mut self, event: &MeshEvent) -> bool {
        match event {
            MeshEvent::StreamReceived { address, stream } => {
                match self.live.iter_mut().find(|(a, _)| a == address) {
                    // Replaced connection keeps its grid position
                    Some((_, existing)) => *existing = stream.clone(),
                    None => self.live.push((address.clone(), stream.clone())),
                }
                true
            }
            MeshEvent::PeerDisconnected { address } => {
                let before = self.live.len();
                self.live.retain(|(a, _)| a != address);
                self.live.len() != before
            }
            MeshEvent::LocalMediaChanged(state) => {
                self.local_media = state.clone();
                true
            }
        }
    }

    /// Rebuild the live list from a link snapshot, ordered by connect time.
    pub fn resync(&mut self, links: &[LinkSnapshot]) {
        let mut connected: Vec<&LinkSnapshot> = links
            .iter()
            .filter(|link| link.state == LinkState::Connected)
            .collect();
        connected.sort_by_key(|link| link.connected_seq);

        self.live = connected
            .into_iter()
            .map(|link| {
                (
                    link.address.clone(),
                    link.remote_stream.clone().unwrap_or_else(MediaStream::empty),
                )
            })
            .collect();
    }

    /// Derive the current view.
    #[must_use]
    pub fn project(&self) -> Vec<ActiveParticipantView> {
        let mut views = Vec::with_capacity(self.live.len() + 1);
        views.push(self.local_view());

        for (address, stream) in &self.live {
            let Some(owner) = owner_of(address, &self.roster) else {
                continue;
            };
            views.push(ActiveParticipantView {
                view_id: address.to_string(),
                address: address.clone(),
                user_id: owner.user_id.clone(),
                display_name: owner.display_name.clone(),
                avatar_url: owner.avatar_url.clone(),
                is_local: false,
                is_leader: owner.role.is_leader(),
                stream: Some(stream.clone()),
                audio_enabled: stream.audio_track().is_some_and(|t| t.is_enabled()),
                video_enabled: stream.has_enabled_video(),
            });
        }

        views
    }

    fn local_view(&self) -> ActiveParticipantView {
        let address = self.local.address();
        let entry = self
            .roster
            .iter()
            .find(|entry| entry.user_id == self.local.user_id);

        ActiveParticipantView {
            view_id: format!("me-{address}"),
            user_id: self.local.user_id.clone(),
            display_name: entry
                .map_or_else(|| self.local.user_id.to_string(), |e| e.display_name.clone()),
            avatar_url: entry.and_then(|e| e.avatar_url.clone()),
            is_local: true,
            is_leader: entry.is_some_and(|e| e.role.is_leader()),
            stream: self.local_media.stream.clone(),
            audio_enabled: self.local_media.audio_enabled,
            video_enabled: self.local_media.video_enabled,
            address,
        }
    }

    /// Run the projection on a background task.
    ///
    /// `events` must be subscribed before the peer manager starts so no
    /// `StreamReceived` is missed. Returns the receiver for the latest view.
    #[must_use]
    pub fn spawn(
        self,
        events: broadcast::Receiver<MeshEvent>,
        peers: PeerManagerHandle,
        cancel_token: CancellationToken,
    ) -> (watch::Receiver<Vec<ActiveParticipantView>>, JoinHandle<()>) {
        let (view_tx, view_rx) = watch::channel(self.project());
        let task = tokio::spawn(run_projection(self, events, peers, view_tx, cancel_token));
        (view_rx, task)
    }
}

#[instrument(skip_all, name = "mesh.roster.projection", fields(address = %peers.local_address()))]
async fn run_projection(
    mut projector: RosterProjector,
    mut events: broadcast::Receiver<MeshEvent>,
    peers: PeerManagerHandle,
    view_tx: watch::Sender<Vec<ActiveParticipantView>>,
    cancel_token: CancellationToken,
) {
    debug!(target: "mesh.roster", "Projection started");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if projector.apply(&event) {
                            view_tx.send_replace(projector.project());
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(target: "mesh.roster", missed, "Projection lagged, resyncing");
                        match peers.links().await {
                            Ok(links) => {
                                projector.resync(&links);
                                view_tx.send_replace(projector.project());
                            }
                            Err(_) => break,
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    info!(target: "mesh.roster", "Projection stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::actors::{Initiator, PeerManagerActor};
    use crate::media::{MediaTrack, TrackKind};
    use crate::transport::{LoopbackDirectory, SignalingTransport};
    use common::types::Role;
    use std::time::Duration;

    fn stream(label: &str) -> MediaStream {
        MediaStream::new(vec![
            MediaTrack::new(TrackKind::Audio, format!("{label}-mic")),
            MediaTrack::new(TrackKind::Video, format!("{label}-cam")),
        ])
    }

    fn projector() -> RosterProjector {
        let roster: Arc<[RosterEntry]> = vec![
            RosterEntry::member("A", "Ann").with_role(Role::Leader),
            RosterEntry::member("B", "Ben"),
            RosterEntry::member("C", "Cat"),
        ]
        .into();
        RosterProjector::new(
            ParticipantIdentity {
                user_id: UserId::new("A"),
                session_suffix: 1,
            },
            roster,
            LocalMediaState {
                stream: Some(stream("A")),
                audio_enabled: true,
                video_enabled: true,
            },
        )
    }

    fn received(address: &str) -> MeshEvent {
        MeshEvent::StreamReceived {
            address: PeerAddress::from(address),
            stream: stream(address),
        }
    }

    fn ids(views: &[ActiveParticipantView]) -> Vec<&str> {
        views.iter().map(|v| v.view_id.as_str()).collect()
    }

    #[test]
    fn test_self_only_before_connections() {
        let views = projector().project();
        assert_eq!(ids(&views), vec!["me-A"]);
        assert!(views[0].is_local);
        assert!(views[0].is_leader);
        assert_eq!(views[0].display_name, "Ann");
    }

    #[test]
    fn test_arrival_order_and_sessions() {
        let mut projector = projector();
        projector.apply(&received("C"));
        projector.apply(&received("B-2"));
        projector.apply(&received("B"));

        let views = projector.project();
        assert_eq!(ids(&views), vec!["me-A", "C", "B-2", "B"]);
        assert_eq!(views[2].user_id.as_str(), "B");
        assert_eq!(views[2].display_name, "Ben");
        assert!(!views[2].is_leader);
    }

    #[test]
    fn test_disconnect_removes_only_that_entry() {
        let mut projector = projector();
        projector.apply(&received("B"));
        projector.apply(&received("C"));
        let before = projector.project();

        assert!(projector.apply(&MeshEvent::PeerDisconnected {
            address: PeerAddress::from("B"),
        }));

        let after = projector.project();
        assert_eq!(ids(&after), vec!["me-A", "C"]);
        assert_eq!(after[1], before[2]);

        // Unknown address is a no-op
        assert!(!projector.apply(&MeshEvent::PeerDisconnected {
            address: PeerAddress::from("B"),
        }));
    }

    #[test]
    fn test_reconnect_keeps_position() {
        let mut projector = projector();
        projector.apply(&received("B"));
        projector.apply(&received("C"));
        projector.apply(&received("B"));

        assert_eq!(ids(&projector.project()), vec!["me-A", "B", "C"]);
    }

    #[test]
    fn test_unknown_sessions_hidden() {
        let mut projector = projector();
        projector.apply(&received("stranger"));
        assert_eq!(ids(&projector.project()), vec!["me-A"]);
    }

    #[test]
    fn test_local_media_and_remote_mute() {
        let mut projector = projector();
        let remote = stream("B");
        projector.apply(&MeshEvent::StreamReceived {
            address: PeerAddress::from("B"),
            stream: remote.clone(),
        });

        projector.apply(&MeshEvent::LocalMediaChanged(LocalMediaState {
            stream: None,
            audio_enabled: false,
            video_enabled: false,
        }));
        remote.audio_track().unwrap().set_enabled(false);

        let views = projector.project();
        assert!(!views[0].audio_enabled);
        assert!(!views[0].video_enabled);
        assert!(!views[1].audio_enabled);
        assert!(views[1].video_enabled);
    }

    #[test]
    fn test_display_name_falls_back_to_user_id() {
        let projector = RosterProjector::new(
            ParticipantIdentity {
                user_id: UserId::new("Z"),
                session_suffix: 2,
            },
            Arc::from(Vec::new()),
            LocalMediaState::default(),
        );
        let views = projector.project();
        assert_eq!(views[0].view_id, "me-Z-2");
        assert_eq!(views[0].display_name, "Z");
    }

    #[test]
    fn test_resync_orders_by_connect_sequence() {
        let mut projector = projector();
        projector.apply(&received("B"));

        let snapshot = |address: &str, state, seq| LinkSnapshot {
            address: PeerAddress::from(address),
            state,
            initiator: Initiator::Local,
            remote_stream: Some(stream(address)),
            connected_seq: seq,
            connected_at: None,
        };
        projector.resync(&[
            snapshot("B", LinkState::Failed, None),
            snapshot("C", LinkState::Connected, Some(4)),
            snapshot("C-2", LinkState::Connected, Some(2)),
            snapshot("B-2", LinkState::Connecting, None),
        ]);

        assert_eq!(ids(&projector.project()), vec!["me-A", "C-2", "C"]);
    }

    #[tokio::test]
    async fn test_projection_task_publishes_updates() {
        let directory = LoopbackDirectory::new();
        let registration = directory.register(&PeerAddress::from("A")).await.unwrap();
        let events = crate::events::channel(16);
        let rx = events.subscribe();
        let (peers, _task) = PeerManagerActor::spawn(
            registration,
            MediaStream::empty(),
            events.clone(),
            CancellationToken::new(),
        );

        let cancel = CancellationToken::new();
        let (mut view, task) = projector().spawn(rx, peers, cancel.clone());
        assert_eq!(view.borrow().len(), 1);

        events.send(received("B")).unwrap();
        tokio::time::timeout(Duration::from_secs(5), view.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ids(&view.borrow()), vec!["me-A", "B"]);

        cancel.cancel();
        task.await.unwrap();
    }
}
