//! `PeerManagerActor` - owns every direct connection of the local session.
//!
//! Responsibilities:
//!
//! - Claim the local address and hold the signaling registration
//! - Start outbound attempts (`call`), idempotent per address
//! - Answer or reject inbound calls
//! - Track per-link state and emit `StreamReceived` / `PeerDisconnected`
//! - Push replaced local tracks to every connected link
//!
//! # Simultaneous calls
//!
//! When two peers call each other at the same time, the connection opened by
//! the peer with the lexicographically smaller address is kept. An inbound
//! call from a larger address is rejected while our own outbound attempt to
//! it is pending; an inbound call from a smaller address always replaces our
//! attempt. Both sides apply the same rule, so they converge on one
//! connection.
//!
//! An inbound call over a link that is already connected replaces it: the
//! remote only calls again after losing its side of the connection.

use super::messages::{Initiator, LinkSnapshot, LinkState, PeerManagerMessage};
use crate::errors::{MeshError, TransportError};
use crate::events::MeshEvent;
use crate::identity::{IdentityResolver, ParticipantIdentity, PeerAddress};
use crate::media::{MediaStream, MediaTrack, TrackKind};
use crate::observability::metrics;
use crate::transport::{
    ConnectionId, IncomingCall, PeerConnection, Registration, SignalingSession,
    SignalingTransport, TransportEvent,
};

use chrono::{DateTime, Utc};
use common::types::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Mailbox size for the peer manager.
const PEER_MANAGER_CHANNEL_BUFFER: usize = 256;

/// Handle to the `PeerManagerActor`.
#[derive(Clone)]
pub struct PeerManagerHandle {
    sender: mpsc::Sender<PeerManagerMessage>,
    cancel_token: CancellationToken,
    local_address: PeerAddress,
    session: Arc<dyn SignalingSession>,
}

impl PeerManagerHandle {
    /// Address the local session is registered under.
    #[must_use]
    pub fn local_address(&self) -> &PeerAddress {
        &self.local_address
    }

    /// Fire-and-forget outbound attempt.
    ///
    /// A no-op when a link to `address` is already `Connecting` or
    /// `Connected`. Connection failures are absorbed by the actor.
    ///
    /// # Errors
    ///
    /// `MeshError::Internal` once the actor has been torn down.
    pub async fn call(&self, address: PeerAddress) -> Result<(), MeshError> {
        self.sender
            .send(PeerManagerMessage::Call { address })
            .await
            .map_err(|e| MeshError::Internal(format!("channel send failed: {e}")))
    }

    /// Push `track` (or its removal) to every connected link and use it for
    /// links established later. Returns how many links accepted it.
    ///
    /// # Errors
    ///
    /// `MeshError::Internal` once the actor has been torn down.
    pub async fn replace_local_track(
        &self,
        kind: TrackKind,
        track: Option<MediaTrack>,
    ) -> Result<usize, MeshError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PeerManagerMessage::ReplaceLocalTrack {
                kind,
                track,
                respond_to: tx,
            })
            .await
            .map_err(|e| MeshError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MeshError::Internal(format!("response receive failed: {e}")))
    }

    /// Snapshot of every link, sorted by address.
    ///
    /// # Errors
    ///
    /// `MeshError::Internal` once the actor has been torn down.
    pub async fn links(&self) -> Result<Vec<LinkSnapshot>, MeshError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PeerManagerMessage::GetLinks { respond_to: tx })
            .await
            .map_err(|e| MeshError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MeshError::Internal(format!("response receive failed: {e}")))
    }

    /// Close every link and release the registration. Idempotent.
    pub async fn teardown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(PeerManagerMessage::Teardown { respond_to: tx })
            .await
            .is_err()
        {
            return;
        }
        let _ = rx.await;
    }

    /// Liveness guard: true once the actor stopped accepting messages.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.cancel_token.is_cancelled() || self.sender.is_closed()
    }

    /// Whether the signaling registration is still alive.
    #[must_use]
    pub fn is_signaling_open(&self) -> bool {
        !self.is_destroyed() && self.session.is_open()
    }
}

/// One managed connection to a remote address.
#[derive(Debug)]
struct PeerLink {
    state: LinkState,
    generation: u64,
    initiator: Initiator,
    connection: Option<Box<dyn PeerConnection>>,
    remote_stream: Option<MediaStream>,
    connected_seq: Option<u64>,
    connected_at: Option<DateTime<Utc>>,
    /// `StreamReceived` was emitted and not yet matched by `PeerDisconnected`.
    announced: bool,
}

impl PeerLink {
    fn connecting(generation: u64, initiator: Initiator, announced: bool) -> Self {
        Self {
            state: LinkState::Connecting,
            generation,
            initiator,
            connection: None,
            remote_stream: None,
            connected_seq: None,
            connected_at: None,
            announced,
        }
    }

    fn connection_id(&self) -> Option<ConnectionId> {
        self.connection.as_ref().map(|c| c.id())
    }

    fn snapshot(&self, address: &PeerAddress) -> LinkSnapshot {
        LinkSnapshot {
            address: address.clone(),
            state: self.state,
            initiator: self.initiator,
            remote_stream: self
                .connection
                .as_ref()
                .map(|c| c.remote_stream())
                .or_else(|| self.remote_stream.clone()),
            connected_seq: self.connected_seq,
            connected_at: self.connected_at,
        }
    }
}

/// The `PeerManagerActor` implementation.
pub struct PeerManagerActor {
    local_address: PeerAddress,
    session: Arc<dyn SignalingSession>,
    transport_events: mpsc::Receiver<TransportEvent>,
    transport_open: bool,
    receiver: mpsc::Receiver<PeerManagerMessage>,
    /// Handed to connect/answer tasks; does not keep the mailbox open.
    reporter: mpsc::WeakSender<PeerManagerMessage>,
    cancel_token: CancellationToken,
    links: HashMap<PeerAddress, PeerLink>,
    local_stream: MediaStream,
    events: broadcast::Sender<MeshEvent>,
    next_generation: u64,
    next_connected_seq: u64,
    torn_down: bool,
}

impl PeerManagerActor {
    /// Claim an address for `user_id` and start the actor on it.
    ///
    /// # Errors
    ///
    /// `AddressCollisionExhausted` or `TransportInit` from the claim.
    pub async fn initialize(
        transport: &dyn SignalingTransport,
        resolver: &IdentityResolver,
        user_id: &UserId,
        local_stream: MediaStream,
        events: broadcast::Sender<MeshEvent>,
        cancel_token: CancellationToken,
    ) -> Result<(PeerManagerHandle, JoinHandle<()>, ParticipantIdentity), MeshError> {
        let (identity, registration) = resolver.claim(transport, user_id).await?;
        let (handle, task) = Self::spawn(registration, local_stream, events, cancel_token);
        Ok((handle, task, identity))
    }

    /// Start the actor on an existing registration.
    #[must_use]
    pub fn spawn(
        registration: Registration,
        local_stream: MediaStream,
        events: broadcast::Sender<MeshEvent>,
        cancel_token: CancellationToken,
    ) -> (PeerManagerHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(PEER_MANAGER_CHANNEL_BUFFER);
        let Registration {
            session,
            events: transport_events,
        } = registration;
        let local_address = session.local_address().clone();

        let actor = Self {
            local_address: local_address.clone(),
            session: Arc::clone(&session),
            transport_events,
            transport_open: true,
            receiver,
            reporter: sender.downgrade(),
            cancel_token: cancel_token.clone(),
            links: HashMap::new(),
            local_stream,
            events,
            next_generation: 0,
            next_connected_seq: 0,
            torn_down: false,
        };

        let task = tokio::spawn(actor.run());

        let handle = PeerManagerHandle {
            sender,
            cancel_token,
            local_address,
            session,
        };

        (handle, task)
    }

    #[instrument(skip_all, name = "mesh.actor.peer_manager", fields(address = %self.local_address))]
    async fn run(mut self) {
        info!(
            target: "mesh.actor.peer_manager",
            address = %self.local_address,
            "PeerManagerActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "mesh.actor.peer_manager", "Cancellation received");
                    self.shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(PeerManagerMessage::Teardown { respond_to }) => {
                            self.shutdown().await;
                            let _ = respond_to.send(());
                            break;
                        }
                        Some(message) => self.handle_message(message),
                        None => {
                            debug!(target: "mesh.actor.peer_manager", "All handles dropped");
                            self.shutdown().await;
                            break;
                        }
                    }
                }

                event = self.transport_events.recv(), if self.transport_open => {
                    match event {
                        Some(event) => self.handle_transport_event(event),
                        None => {
                            warn!(
                                target: "mesh.actor.peer_manager",
                                "Signaling event stream closed"
                            );
                            self.transport_open = false;
                        }
                    }
                }
            }
        }

        info!(
            target: "mesh.actor.peer_manager",
            address = %self.local_address,
            "PeerManagerActor stopped"
        );
    }

    fn handle_message(&mut self, message: PeerManagerMessage) {
        match message {
            PeerManagerMessage::Call { address } => self.handle_call(address),

            PeerManagerMessage::ReplaceLocalTrack {
                kind,
                track,
                respond_to,
            } => {
                let updated = self.replace_local_track(kind, track);
                let _ = respond_to.send(updated);
            }

            PeerManagerMessage::GetLinks { respond_to } => {
                let _ = respond_to.send(self.snapshots());
            }

            PeerManagerMessage::AttemptCompleted {
                address,
                generation,
                initiator,
                started,
                result,
            } => self.handle_attempt_completed(address, generation, initiator, started, result),

            // Handled in `run`, which has to stop the loop.
            PeerManagerMessage::Teardown { respond_to } => {
                let _ = respond_to.send(());
            }
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn handle_call(&mut self, address: PeerAddress) {
        if address == self.local_address {
            debug!(target: "mesh.actor.peer_manager", "Ignoring call to self");
            return;
        }

        let announced = match self.links.get(&address) {
            Some(link) if link.state.is_active() => {
                metrics::record_call_attempt("duplicate");
                debug!(
                    target: "mesh.actor.peer_manager",
                    remote = %address,
                    state = link.state.as_str(),
                    "Call skipped, link already active"
                );
                return;
            }
            Some(link) => link.announced,
            None => false,
        };

        let generation = self.next_generation();
        self.links.insert(
            address.clone(),
            PeerLink::connecting(generation, Initiator::Local, announced),
        );

        debug!(
            target: "mesh.actor.peer_manager",
            remote = %address,
            generation,
            "Calling peer"
        );

        let session = Arc::clone(&self.session);
        let local_stream = self.local_stream.clone();
        let reporter = self.reporter.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = session.connect(&address, local_stream).await;
            report(
                &reporter,
                PeerManagerMessage::AttemptCompleted {
                    address,
                    generation,
                    initiator: Initiator::Local,
                    started,
                    result,
                },
            )
            .await;
        });
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Incoming(call) => self.handle_incoming(call),
            TransportEvent::Closed {
                address,
                connection_id,
            } => self.handle_remote_closed(&address, connection_id),
        }
    }

    /// Whether an inbound call from `remote` should win over the current link.
    ///
    /// Only a pending outbound attempt can collide with an inbound call. A
    /// call arriving over a connected link means the remote no longer holds
    /// its side, so it always replaces ours.
    fn accepts_incoming_from(&self, remote: &PeerAddress) -> bool {
        match self.links.get(remote) {
            Some(link)
                if link.state == LinkState::Connecting && link.initiator == Initiator::Local =>
            {
                remote < &self.local_address
            }
            _ => true,
        }
    }

    fn handle_incoming(&mut self, call: Box<dyn IncomingCall>) {
        let remote = call.remote_address().clone();

        if remote == self.local_address || !self.accepts_incoming_from(&remote) {
            metrics::record_incoming_call("rejected");
            debug!(
                target: "mesh.actor.peer_manager",
                remote = %remote,
                "Incoming call rejected, keeping own attempt"
            );
            call.reject();
            return;
        }

        let generation = self.next_generation();
        let announced = self.links.get(&remote).is_some_and(|l| l.announced);
        let replaced = self.links.insert(
            remote.clone(),
            PeerLink::connecting(generation, Initiator::Remote, announced),
        );
        if let Some(connection) = replaced.and_then(|link| link.connection) {
            debug!(
                target: "mesh.actor.peer_manager",
                remote = %remote,
                connection_id = %connection.id(),
                "Replacing existing connection"
            );
            connection.close();
            self.update_links_gauge();
        }

        debug!(
            target: "mesh.actor.peer_manager",
            remote = %remote,
            generation,
            "Answering incoming call"
        );

        let local_stream = self.local_stream.clone();
        let reporter = self.reporter.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = call.answer(local_stream).await;
            report(
                &reporter,
                PeerManagerMessage::AttemptCompleted {
                    address: remote,
                    generation,
                    initiator: Initiator::Remote,
                    started,
                    result,
                },
            )
            .await;
        });
    }

    fn handle_attempt_completed(
        &mut self,
        address: PeerAddress,
        generation: u64,
        initiator: Initiator,
        started: Instant,
        result: Result<Box<dyn PeerConnection>, TransportError>,
    ) {
        let outcome = match &result {
            Ok(_) => "connected",
            Err(e) if e.is_peer_unreachable() => "unreachable",
            Err(_) => "error",
        };
        match initiator {
            Initiator::Local => metrics::record_call_duration(outcome, started.elapsed()),
            Initiator::Remote => {
                metrics::record_incoming_call(if result.is_ok() { "answered" } else { "error" });
            }
        }

        let link = self.links.get_mut(&address).filter(|link| {
            link.generation == generation && link.state == LinkState::Connecting
        });

        let Some(link) = link else {
            if initiator == Initiator::Local {
                metrics::record_call_attempt(outcome);
            }
            debug!(
                target: "mesh.actor.peer_manager",
                remote = %address,
                generation,
                "Discarding superseded attempt"
            );
            if let Ok(connection) = result {
                connection.close();
            }
            return;
        };

        if initiator == Initiator::Local {
            metrics::record_call_attempt(outcome);
        }

        match result {
            Ok(connection) => {
                self.next_connected_seq += 1;
                let stream = connection.remote_stream();
                link.state = LinkState::Connected;
                link.remote_stream = Some(stream.clone());
                link.connected_seq = Some(self.next_connected_seq);
                link.connected_at = Some(Utc::now());
                link.announced = true;

                info!(
                    target: "mesh.actor.peer_manager",
                    remote = %address,
                    connection_id = %connection.id(),
                    initiator = ?initiator,
                    "Peer connected"
                );
                link.connection = Some(connection);

                self.update_links_gauge();
                let _ = self.events.send(MeshEvent::StreamReceived { address, stream });
            }
            Err(e) => {
                link.state = LinkState::Failed;
                let was_announced = std::mem::take(&mut link.announced);

                debug!(
                    target: "mesh.actor.peer_manager",
                    remote = %address,
                    error = %e,
                    initiator = ?initiator,
                    "Connection attempt failed"
                );

                if was_announced {
                    metrics::record_peer_disconnect();
                    let _ = self.events.send(MeshEvent::PeerDisconnected { address });
                }
            }
        }
    }

    fn handle_remote_closed(&mut self, address: &PeerAddress, connection_id: ConnectionId) {
        let current = self
            .links
            .get(address)
            .is_some_and(|link| link.connection_id() == Some(connection_id));
        if !current {
            debug!(
                target: "mesh.actor.peer_manager",
                remote = %address,
                connection_id = %connection_id,
                "Ignoring close of a superseded connection"
            );
            return;
        }

        let Some(link) = self.links.remove(address) else {
            return;
        };

        info!(
            target: "mesh.actor.peer_manager",
            remote = %address,
            connection_id = %connection_id,
            "Peer disconnected"
        );

        self.update_links_gauge();
        if link.announced {
            metrics::record_peer_disconnect();
            let _ = self.events.send(MeshEvent::PeerDisconnected {
                address: address.clone(),
            });
        }
    }

    fn replace_local_track(&mut self, kind: TrackKind, track: Option<MediaTrack>) -> usize {
        self.local_stream.set_track(kind, track.clone());

        let mut updated = 0;
        for (address, link) in &self.links {
            let Some(connection) = link.connection.as_ref() else {
                continue;
            };
            match connection.replace_track(kind, track.clone()) {
                Ok(()) => updated += 1,
                Err(e) => debug!(
                    target: "mesh.actor.peer_manager",
                    remote = %address,
                    error = %e,
                    "Track replacement failed"
                ),
            }
        }

        debug!(
            target: "mesh.actor.peer_manager",
            kind = %kind,
            links = updated,
            "Local track replaced"
        );
        updated
    }

    fn snapshots(&self) -> Vec<LinkSnapshot> {
        let mut snapshots: Vec<LinkSnapshot> = self
            .links
            .iter()
            .map(|(address, link)| link.snapshot(address))
            .collect();
        snapshots.sort_by(|a, b| a.address.cmp(&b.address));
        snapshots
    }

    fn update_links_gauge(&self) {
        let connected = self
            .links
            .values()
            .filter(|link| link.state == LinkState::Connected && link.connection.is_some())
            .count();
        metrics::set_peer_links_active(connected);
    }

    /// Close everything and stop accepting messages. Idempotent.
    async fn shutdown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.receiver.close();
        self.cancel_token.cancel();

        let closed = self.links.len();
        for (_, link) in self.links.drain() {
            if let Some(connection) = link.connection {
                connection.close();
            }
        }

        // Messages that were queued before the mailbox closed.
        while let Ok(message) = self.receiver.try_recv() {
            match message {
                PeerManagerMessage::AttemptCompleted {
                    result: Ok(connection),
                    ..
                } => connection.close(),
                PeerManagerMessage::ReplaceLocalTrack { respond_to, .. } => {
                    let _ = respond_to.send(0);
                }
                PeerManagerMessage::GetLinks { respond_to } => {
                    let _ = respond_to.send(Vec::new());
                }
                PeerManagerMessage::Teardown { respond_to } => {
                    let _ = respond_to.send(());
                }
                PeerManagerMessage::Call { .. }
                | PeerManagerMessage::AttemptCompleted { .. } => {}
            }
        }

        self.session.unregister().await;
        metrics::set_peer_links_active(0);

        info!(
            target: "mesh.actor.peer_manager",
            address = %self.local_address,
            links_closed = closed,
            "Peer links torn down"
        );
    }
}

/// Deliver a task result to the actor, or clean up if the actor is gone.
async fn report(reporter: &mpsc::WeakSender<PeerManagerMessage>, message: PeerManagerMessage) {
    let undelivered = match reporter.upgrade() {
        Some(sender) => match sender.send(message).await {
            Ok(()) => return,
            Err(mpsc::error::SendError(message)) => message,
        },
        None => message,
    };

    if let PeerManagerMessage::AttemptCompleted {
        address,
        result: Ok(connection),
        ..
    } = undelivered
    {
        debug!(
            target: "mesh.actor.peer_manager",
            remote = %address,
            "Attempt finished after teardown, closing connection"
        );
        connection.close();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::transport::LoopbackDirectory;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn stream(label: &str) -> MediaStream {
        MediaStream::new(vec![
            MediaTrack::new(TrackKind::Audio, format!("{label}-mic")),
            MediaTrack::new(TrackKind::Video, format!("{label}-cam")),
        ])
    }

    async fn start(
        directory: &LoopbackDirectory,
        address: &str,
    ) -> (PeerManagerHandle, broadcast::Receiver<MeshEvent>) {
        let registration = directory
            .register(&PeerAddress::from(address))
            .await
            .unwrap();
        let events = crate::events::channel(64);
        let rx = events.subscribe();
        let (handle, _task) =
            PeerManagerActor::spawn(registration, stream(address), events, CancellationToken::new());
        (handle, rx)
    }

    async fn next_event(rx: &mut broadcast::Receiver<MeshEvent>) -> MeshEvent {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for mesh event")
            .unwrap()
    }

    async fn wait_for_state(handle: &PeerManagerHandle, remote: &str, state: LinkState) {
        let remote = PeerAddress::from(remote);
        let deadline = Instant::now() + WAIT;
        loop {
            let links = handle.links().await.unwrap();
            if links.iter().any(|l| l.address == remote && l.state == state) {
                return;
            }
            assert!(Instant::now() < deadline, "{remote} never reached {state:?}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_call_connects_both_sides() {
        let directory = LoopbackDirectory::new();
        let (a, mut a_events) = start(&directory, "a").await;
        let (b, mut b_events) = start(&directory, "b").await;

        a.call(PeerAddress::from("b")).await.unwrap();

        match next_event(&mut a_events).await {
            MeshEvent::StreamReceived { address, stream } => {
                assert_eq!(address.as_str(), "b");
                assert_eq!(stream.audio_track().unwrap().label(), "b-mic");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match next_event(&mut b_events).await {
            MeshEvent::StreamReceived { address, .. } => assert_eq!(address.as_str(), "a"),
            other => panic!("unexpected event: {other:?}"),
        }

        // Event is only emitted after the link is Connected
        let links = a.links().await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].state, LinkState::Connected);
        assert_eq!(links[0].initiator, Initiator::Local);
        assert_eq!(links[0].connected_seq, Some(1));

        let links = b.links().await.unwrap();
        assert_eq!(links[0].initiator, Initiator::Remote);
    }

    #[tokio::test]
    async fn test_repeated_call_while_connecting_is_noop() {
        let directory = LoopbackDirectory::new();
        let (a, _events) = start(&directory, "a").await;
        // Raw registration: calls stay pending until answered here
        let mut b = directory.register(&PeerAddress::from("b")).await.unwrap();

        a.call(PeerAddress::from("b")).await.unwrap();
        a.call(PeerAddress::from("b")).await.unwrap();
        wait_for_state(&a, "b", LinkState::Connecting).await;

        let first = tokio::time::timeout(WAIT, b.events.recv()).await.unwrap();
        assert!(matches!(first, Some(TransportEvent::Incoming(_))));
        assert!(b.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unreachable_peer_fails_then_retries() {
        let directory = LoopbackDirectory::new();
        let (a, _events) = start(&directory, "a").await;

        a.call(PeerAddress::from("ghost")).await.unwrap();
        wait_for_state(&a, "ghost", LinkState::Failed).await;

        // Peer comes online; the next call is a fresh attempt
        let (_ghost, _ghost_events) = start(&directory, "ghost").await;
        a.call(PeerAddress::from("ghost")).await.unwrap();
        wait_for_state(&a, "ghost", LinkState::Connected).await;
    }

    #[tokio::test]
    async fn test_call_to_self_is_ignored() {
        let directory = LoopbackDirectory::new();
        let (a, _events) = start(&directory, "a").await;

        a.call(PeerAddress::from("a")).await.unwrap();

        assert!(a.links().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_simultaneous_calls_converge_on_one_connection() {
        let directory = LoopbackDirectory::new();
        let (a, _a_events) = start(&directory, "a").await;
        let (b, _b_events) = start(&directory, "b").await;

        let (ra, rb) = tokio::join!(
            a.call(PeerAddress::from("b")),
            b.call(PeerAddress::from("a"))
        );
        ra.unwrap();
        rb.unwrap();

        wait_for_state(&a, "b", LinkState::Connected).await;
        wait_for_state(&b, "a", LinkState::Connected).await;

        // Superseded connections are closed asynchronously
        let deadline = Instant::now() + WAIT;
        while directory.connection_count(&PeerAddress::from("a")) != 1 {
            assert!(Instant::now() < deadline, "duplicate connections remain");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        wait_for_state(&a, "b", LinkState::Connected).await;
        wait_for_state(&b, "a", LinkState::Connected).await;
    }

    #[tokio::test]
    async fn test_remote_close_emits_single_disconnect() {
        let directory = LoopbackDirectory::new();
        let (a, mut a_events) = start(&directory, "a").await;
        let (b, _b_events) = start(&directory, "b").await;

        a.call(PeerAddress::from("b")).await.unwrap();
        assert!(matches!(
            next_event(&mut a_events).await,
            MeshEvent::StreamReceived { .. }
        ));

        b.teardown().await;

        match next_event(&mut a_events).await {
            MeshEvent::PeerDisconnected { address } => assert_eq!(address.as_str(), "b"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(a.links().await.unwrap().is_empty());
        assert!(a_events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_replace_local_track_reaches_remote() {
        let directory = LoopbackDirectory::new();
        let (a, mut a_events) = start(&directory, "a").await;
        let (b, _b_events) = start(&directory, "b").await;

        a.call(PeerAddress::from("b")).await.unwrap();
        next_event(&mut a_events).await;
        wait_for_state(&b, "a", LinkState::Connected).await;

        let fresh = MediaTrack::new(TrackKind::Video, "a-cam-2");
        let updated = a
            .replace_local_track(TrackKind::Video, Some(fresh.clone()))
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let links = b.links().await.unwrap();
        let remote = links[0].remote_stream.as_ref().unwrap();
        assert_eq!(remote.video_track(), Some(&fresh));
        assert_eq!(remote.audio_track().unwrap().label(), "a-mic");
    }

    #[tokio::test]
    async fn test_replaced_track_used_for_new_links() {
        let directory = LoopbackDirectory::new();
        let (a, _a_events) = start(&directory, "a").await;
        let (c, _c_events) = start(&directory, "c").await;

        let updated = a.replace_local_track(TrackKind::Video, None).await.unwrap();
        assert_eq!(updated, 0);

        a.call(PeerAddress::from("c")).await.unwrap();
        wait_for_state(&c, "a", LinkState::Connected).await;

        let links = c.links().await.unwrap();
        assert!(links[0].remote_stream.as_ref().unwrap().video_track().is_none());
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let directory = LoopbackDirectory::new();
        let (a, _events) = start(&directory, "a").await;

        assert!(!a.is_destroyed());
        assert!(a.is_signaling_open());

        a.teardown().await;
        a.teardown().await;

        assert!(a.is_destroyed());
        assert!(!a.is_signaling_open());
        assert!(!directory.is_registered(&PeerAddress::from("a")));
        assert!(a.call(PeerAddress::from("b")).await.is_err());
        assert!(a.links().await.is_err());
    }

    #[tokio::test]
    async fn test_attempt_finishing_after_teardown_is_discarded() {
        let directory = LoopbackDirectory::new();
        let (a, _events) = start(&directory, "a").await;
        let mut b = directory.register(&PeerAddress::from("b")).await.unwrap();

        a.call(PeerAddress::from("b")).await.unwrap();
        let call = match tokio::time::timeout(WAIT, b.events.recv()).await.unwrap() {
            Some(TransportEvent::Incoming(call)) => call,
            other => panic!("unexpected event: {other:?}"),
        };

        a.teardown().await;

        // The caller is gone, so answering fails and nothing panics
        assert!(call.answer(stream("b")).await.is_err());
        assert_eq!(directory.connection_count(&PeerAddress::from("b")), 0);
        assert!(a.is_destroyed());
    }

    #[tokio::test]
    async fn test_cancellation_tears_down() {
        let directory = LoopbackDirectory::new();
        let registration = directory.register(&PeerAddress::from("a")).await.unwrap();
        let token = CancellationToken::new();
        let (handle, task) = PeerManagerActor::spawn(
            registration,
            MediaStream::empty(),
            crate::events::channel(8),
            token.child_token(),
        );

        token.cancel();
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();

        assert!(handle.is_destroyed());
        assert!(!directory.is_registered(&PeerAddress::from("a")));
    }

    #[tokio::test]
    async fn test_initialize_claims_identity() {
        let directory = LoopbackDirectory::new();
        let _held = directory.register(&PeerAddress::from("42")).await.unwrap();

        let (handle, _task, identity) = PeerManagerActor::initialize(
            &directory,
            &IdentityResolver::default(),
            &UserId::new("42"),
            MediaStream::empty(),
            crate::events::channel(8),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(identity.session_suffix, 2);
        assert_eq!(handle.local_address().as_str(), "42-2");
    }
}
