//! `MeetingLifecycleController` - starts and stops the mesh for one meeting.
//!
//! Join order: acquire media, claim an address and start the peer manager,
//! fetch the roster, start the projection and discovery. A failure at any
//! step unwinds what was already acquired before the error is returned.
//!
//! Leave order: stop discovery (so no call races the teardown), tear down
//! the peer manager, stop the projection, release media.

use crate::actors::{LinkSnapshot, PeerManagerActor, PeerManagerHandle};
use crate::config::MeshConfig;
use crate::errors::MeshError;
use crate::events::{self, MeshEvent};
use crate::identity::{IdentityResolver, ParticipantIdentity};
use crate::media::{
    LocalMediaState, MediaConstraints, MediaDeviceController, MediaDevices, TrackKind,
};
use crate::roster::{ActiveParticipantView, RosterProjector, RosterProvider};
use crate::tasks::{DiscoveryOptions, DiscoveryScheduler};
use crate::transport::SignalingTransport;

use common::types::{MeetingId, RosterEntry, TeamId, UserId};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Parameters of a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub meeting_id: MeetingId,
    pub team_id: TeamId,
    pub user_id: UserId,
    /// Microphone state chosen on the pre-join preview.
    pub audio_enabled: bool,
    /// Camera state chosen on the pre-join preview.
    pub video_enabled: bool,
    pub constraints: MediaConstraints,
}

impl JoinRequest {
    /// Join with microphone and camera on.
    #[must_use]
    pub fn new(
        meeting_id: impl Into<MeetingId>,
        team_id: impl Into<TeamId>,
        user_id: impl Into<UserId>,
    ) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            team_id: team_id.into(),
            user_id: user_id.into(),
            audio_enabled: true,
            video_enabled: true,
            constraints: MediaConstraints::default(),
        }
    }

    /// Start with the given microphone/camera state.
    #[must_use]
    pub fn with_initial_media(mut self, audio_enabled: bool, video_enabled: bool) -> Self {
        self.audio_enabled = audio_enabled;
        self.video_enabled = video_enabled;
        self
    }
}

/// Everything that lives only while a meeting is joined.
struct ActiveMeeting {
    meeting_id: MeetingId,
    identity: ParticipantIdentity,
    roster: Arc<[RosterEntry]>,
    peers: PeerManagerHandle,
    peer_task: JoinHandle<()>,
    discovery: DiscoveryScheduler,
    projection_task: JoinHandle<()>,
    view: watch::Receiver<Vec<ActiveParticipantView>>,
    cancel_token: CancellationToken,
}

/// Glue between the UI commands and the mesh components.
pub struct MeetingLifecycleController {
    transport: Arc<dyn SignalingTransport>,
    roster_provider: Arc<dyn RosterProvider>,
    media: MediaDeviceController,
    resolver: IdentityResolver,
    discovery_options: DiscoveryOptions,
    events: broadcast::Sender<MeshEvent>,
    cancel_token: CancellationToken,
    active: Option<ActiveMeeting>,
}

impl MeetingLifecycleController {
    #[must_use]
    pub fn new(
        transport: Arc<dyn SignalingTransport>,
        devices: Arc<dyn MediaDevices>,
        roster_provider: Arc<dyn RosterProvider>,
        config: &MeshConfig,
    ) -> Self {
        Self {
            transport,
            roster_provider,
            media: MediaDeviceController::new(devices),
            resolver: IdentityResolver::new(config.max_claim_attempts),
            discovery_options: config.discovery_options(),
            events: events::channel(config.event_channel_capacity),
            cancel_token: CancellationToken::new(),
            active: None,
        }
    }

    /// Join a meeting.
    ///
    /// # Errors
    ///
    /// - `AlreadyJoined` while a meeting is active
    /// - `DeviceUnavailable` when camera/microphone cannot be acquired
    /// - `AddressCollisionExhausted` / `TransportInit` from the address claim
    /// - `RosterUnavailable` when the team roster cannot be fetched
    #[instrument(
        skip_all,
        name = "mesh.meeting.join",
        fields(meeting_id = %request.meeting_id, user_id = %request.user_id)
    )]
    pub async fn join(&mut self, request: JoinRequest) -> Result<ParticipantIdentity, MeshError> {
        if self.active.is_some() {
            return Err(MeshError::AlreadyJoined);
        }

        // 1. Local media
        self.media.acquire(&request.constraints).await?;
        if !request.audio_enabled {
            self.media.set_audio_enabled(false);
        }
        if !request.video_enabled {
            self.media.set_video_enabled(false).await;
        }

        // 2. Address claim and peer manager. Subscribed first so the
        // projection cannot miss an early StreamReceived.
        let meeting_token = self.cancel_token.child_token();
        let projection_events = self.events.subscribe();
        let (peers, peer_task, identity) = match PeerManagerActor::initialize(
            self.transport.as_ref(),
            &self.resolver,
            &request.user_id,
            self.media.stream_or_empty(),
            self.events.clone(),
            meeting_token.child_token(),
        )
        .await
        {
            Ok(started) => started,
            Err(e) => {
                warn!(target: "mesh.meeting", error = %e, "Join failed at address claim");
                self.media.release();
                return Err(e);
            }
        };

        // 3. Roster
        let roster: Arc<[RosterEntry]> =
            match self.roster_provider.get_members(&request.team_id).await {
                Ok(members) => members.into(),
                Err(e) => {
                    warn!(target: "mesh.meeting", error = %e, "Join failed at roster fetch");
                    peers.teardown().await;
                    let _ = peer_task.await;
                    meeting_token.cancel();
                    self.media.release();
                    return Err(e.into());
                }
            };

        // 4. Projection and discovery
        let projector =
            RosterProjector::new(identity.clone(), Arc::clone(&roster), self.media.state().clone());
        let (view, projection_task) = projector.spawn(
            projection_events,
            peers.clone(),
            meeting_token.child_token(),
        );
        let discovery = DiscoveryScheduler::start(
            peers.clone(),
            request.user_id.clone(),
            Arc::clone(&roster),
            self.discovery_options,
            meeting_token.child_token(),
        );

        info!(
            target: "mesh.meeting",
            meeting_id = %request.meeting_id,
            address = %identity.address(),
            members = roster.len(),
            "Joined meeting"
        );

        self.active = Some(ActiveMeeting {
            meeting_id: request.meeting_id,
            identity: identity.clone(),
            roster,
            peers,
            peer_task,
            discovery,
            projection_task,
            view,
            cancel_token: meeting_token,
        });

        Ok(identity)
    }

    /// Leave the current meeting. Idempotent.
    #[instrument(skip_all, name = "mesh.meeting.leave")]
    pub async fn leave(&mut self) {
        let Some(mut active) = self.active.take() else {
            self.media.release();
            return;
        };

        active.discovery.stop().await;
        active.peers.teardown().await;
        let _ = active.peer_task.await;
        active.cancel_token.cancel();
        let _ = active.projection_task.await;
        self.media.release();
        self.emit_local_media();

        info!(
            target: "mesh.meeting",
            meeting_id = %active.meeting_id,
            address = %active.identity.address(),
            "Left meeting"
        );
    }

    /// Flip the microphone in place. Returns the new state.
    pub fn toggle_audio(&mut self) -> bool {
        let enabled = self.media.toggle_audio();
        self.emit_local_media();
        enabled
    }

    /// Flip the camera and push the new video track to every link.
    /// Returns the new state; a failed re-acquisition leaves video off.
    pub async fn toggle_video(&mut self) -> bool {
        let before = self.media.state().video_enabled;
        let enabled = self.media.toggle_video().await;

        if enabled != before {
            if let Some(active) = &self.active {
                let track = self.media.state().video_track().cloned();
                match active.peers.replace_local_track(TrackKind::Video, track).await {
                    Ok(links) => debug!(
                        target: "mesh.meeting",
                        video = enabled,
                        links,
                        "Video track pushed to peers"
                    ),
                    Err(e) => warn!(
                        target: "mesh.meeting",
                        error = %e,
                        "Failed to push video track to peers"
                    ),
                }
            }
            self.emit_local_media();
        }

        enabled
    }

    /// Current "in the room" view: self first, then connected sessions.
    #[must_use]
    pub fn get_active_participants(&self) -> Vec<ActiveParticipantView> {
        self.active
            .as_ref()
            .map(|active| active.view.borrow().clone())
            .unwrap_or_default()
    }

    /// Receiver that is notified whenever the participant view changes.
    #[must_use]
    pub fn watch_participants(&self) -> Option<watch::Receiver<Vec<ActiveParticipantView>>> {
        self.active.as_ref().map(|active| active.view.clone())
    }

    /// Subscribe to stream, disconnect and local media events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.events.subscribe()
    }

    /// Whether the local signaling registration is alive.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.peers.is_signaling_open())
    }

    #[must_use]
    pub fn is_joined(&self) -> bool {
        self.active.is_some()
    }

    #[must_use]
    pub fn local_identity(&self) -> Option<&ParticipantIdentity> {
        self.active.as_ref().map(|active| &active.identity)
    }

    #[must_use]
    pub fn meeting_id(&self) -> Option<&MeetingId> {
        self.active.as_ref().map(|active| &active.meeting_id)
    }

    /// Roster fetched for the current meeting.
    #[must_use]
    pub fn roster(&self) -> Option<&[RosterEntry]> {
        self.active.as_ref().map(|active| &*active.roster)
    }

    #[must_use]
    pub fn local_media(&self) -> &LocalMediaState {
        self.media.state()
    }

    /// Snapshot of the peer links of the current meeting.
    ///
    /// # Errors
    ///
    /// `NotJoined` without an active meeting; `Internal` if the peer manager
    /// is gone.
    pub async fn peer_links(&self) -> Result<Vec<LinkSnapshot>, MeshError> {
        match &self.active {
            Some(active) => active.peers.links().await,
            None => Err(MeshError::NotJoined),
        }
    }

    fn emit_local_media(&self) {
        let _ = self
            .events
            .send(MeshEvent::LocalMediaChanged(self.media.state().clone()));
    }
}

impl Drop for MeetingLifecycleController {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
