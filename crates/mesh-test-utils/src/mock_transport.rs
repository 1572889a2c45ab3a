//! Scripted signaling transport.
//!
//! Registration and connect outcomes are configured up front; every call is
//! recorded so tests can assert on exact call sequences:
//!
//! - `take_address` makes `register` fail with `AddressInUse`
//! - `fail_registration` makes every `register` fail with the given error
//! - `set_reachable` makes `connect` to an address succeed; all other
//!   addresses fail with `NotFound`
//! - `hold_connects` parks every `connect` until `release_connects`
//! - `inject_incoming` / `close_remote` drive the inbound side
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = ScriptedTransport::new();
//! transport.set_reachable("B");
//! // ... join and tick discovery ...
//! assert_eq!(transport.connect_count("B"), 1);
//! ```

use async_trait::async_trait;
use meeting_mesh::errors::TransportError;
use meeting_mesh::identity::PeerAddress;
use meeting_mesh::media::{MediaStream, MediaTrack, TrackKind};
use meeting_mesh::transport::{
    ConnectionId, IncomingCall, PeerConnection, Registration, SignalingSession,
    SignalingTransport, TransportEvent,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::fixtures::test_stream;

const EVENT_BUFFER: usize = 64;

#[derive(Default)]
struct State {
    taken: HashSet<PeerAddress>,
    register_error: Option<TransportError>,
    reachable: HashSet<PeerAddress>,
    register_calls: Vec<PeerAddress>,
    connect_calls: Vec<(PeerAddress, PeerAddress)>,
    sessions: HashMap<PeerAddress, mpsc::Sender<TransportEvent>>,
    connections: Vec<MockConnection>,
}

struct Inner {
    state: Mutex<State>,
    held: watch::Sender<bool>,
}

/// Transport double with scripted outcomes and call recording.
#[derive(Clone)]
pub struct ScriptedTransport {
    inner: Arc<Inner>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock().unwrap();
        f.debug_struct("ScriptedTransport")
            .field("sessions", &state.sessions.keys().collect::<Vec<_>>())
            .field("register_calls", &state.register_calls.len())
            .field("connect_calls", &state.connect_calls.len())
            .finish_non_exhaustive()
    }
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                held: watch::channel(false).0,
            }),
        }
    }

    /// Mark `address` as registered by someone else.
    pub fn take_address(&self, address: impl Into<PeerAddress>) {
        self.lock().taken.insert(address.into());
    }

    /// Make every registration fail with `error`.
    pub fn fail_registration(&self, error: TransportError) {
        self.lock().register_error = Some(error);
    }

    /// Let `connect` to `address` succeed.
    pub fn set_reachable(&self, address: impl Into<PeerAddress>) {
        self.lock().reachable.insert(address.into());
    }

    /// Make `connect` to `address` fail again.
    pub fn set_unreachable(&self, address: impl Into<PeerAddress>) {
        self.lock().reachable.remove(&address.into());
    }

    /// Park every `connect` until [`release_connects`](Self::release_connects).
    pub fn hold_connects(&self) {
        self.inner.held.send_replace(true);
    }

    pub fn release_connects(&self) {
        self.inner.held.send_replace(false);
    }

    /// Every address passed to `register`, in order.
    #[must_use]
    pub fn register_calls(&self) -> Vec<PeerAddress> {
        self.lock().register_calls.clone()
    }

    /// Every remote address passed to `connect`, in order.
    #[must_use]
    pub fn connect_calls(&self) -> Vec<PeerAddress> {
        self.lock()
            .connect_calls
            .iter()
            .map(|(_, remote)| remote.clone())
            .collect()
    }

    /// Number of `connect` calls to `address`.
    #[must_use]
    pub fn connect_count(&self, address: impl Into<PeerAddress>) -> usize {
        let address = address.into();
        self.lock()
            .connect_calls
            .iter()
            .filter(|(_, remote)| *remote == address)
            .count()
    }

    /// Whether a session is registered under `address`.
    #[must_use]
    pub fn is_registered(&self, address: impl Into<PeerAddress>) -> bool {
        self.lock().sessions.contains_key(&address.into())
    }

    /// Every connection produced so far (outbound and answered).
    #[must_use]
    pub fn connections(&self) -> Vec<MockConnection> {
        self.lock().connections.clone()
    }

    /// Connections to `remote` that are still open.
    #[must_use]
    pub fn open_connections_to(&self, remote: impl Into<PeerAddress>) -> Vec<MockConnection> {
        let remote = remote.into();
        self.lock()
            .connections
            .iter()
            .filter(|c| c.remote_address() == &remote && !c.is_closed())
            .cloned()
            .collect()
    }

    /// Deliver an unsolicited call from `remote` to the session at `local`.
    ///
    /// The returned receiver yields the answered connection, or `None` if
    /// the call was rejected or dropped.
    pub async fn inject_incoming(
        &self,
        local: impl Into<PeerAddress>,
        remote: impl Into<PeerAddress>,
    ) -> oneshot::Receiver<Option<MockConnection>> {
        let local = local.into();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let call = MockIncomingCall {
            transport: self.clone(),
            local: local.clone(),
            remote: remote.into(),
            outcome: Some(outcome_tx),
        };

        let sender = self.lock().sessions.get(&local).cloned();
        if let Some(sender) = sender {
            let _ = sender.send(TransportEvent::Incoming(Box::new(call))).await;
        }
        outcome_rx
    }

    /// Close the newest open connection between `local` and `remote` from
    /// the remote side and notify `local`.
    pub async fn close_remote(
        &self,
        local: impl Into<PeerAddress>,
        remote: impl Into<PeerAddress>,
    ) -> Option<ConnectionId> {
        let local = local.into();
        let remote = remote.into();

        let (connection, sender) = {
            let state = self.lock();
            let connection = state
                .connections
                .iter()
                .rev()
                .find(|c| c.local == local && c.remote_address() == &remote && !c.is_closed())
                .cloned()?;
            (connection, state.sessions.get(&local).cloned())
        };

        connection.inner.closed.store(true, Ordering::SeqCst);
        if let Some(sender) = sender {
            let _ = sender
                .send(TransportEvent::Closed {
                    address: remote,
                    connection_id: connection.id(),
                })
                .await;
        }
        Some(connection.id())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.state.lock().unwrap()
    }

    fn new_connection(&self, local: &PeerAddress, remote: &PeerAddress) -> MockConnection {
        let connection = MockConnection::new(local.clone(), remote.clone());
        self.lock().connections.push(connection.clone());
        connection
    }
}

#[async_trait]
impl SignalingTransport for ScriptedTransport {
    async fn register(&self, address: &PeerAddress) -> Result<Registration, TransportError> {
        let mut state = self.lock();
        state.register_calls.push(address.clone());

        if let Some(error) = &state.register_error {
            return Err(error.clone());
        }
        if state.taken.contains(address) || state.sessions.contains_key(address) {
            return Err(TransportError::AddressInUse);
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        state.sessions.insert(address.clone(), events_tx);

        Ok(Registration {
            session: Arc::new(ScriptedSession {
                transport: self.clone(),
                address: address.clone(),
                open: AtomicBool::new(true),
            }),
            events: events_rx,
        })
    }
}

struct ScriptedSession {
    transport: ScriptedTransport,
    address: PeerAddress,
    open: AtomicBool,
}

#[async_trait]
impl SignalingSession for ScriptedSession {
    fn local_address(&self) -> &PeerAddress {
        &self.address
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn connect(
        &self,
        remote: &PeerAddress,
        _local_stream: MediaStream,
    ) -> Result<Box<dyn PeerConnection>, TransportError> {
        self.transport
            .lock()
            .connect_calls
            .push((self.address.clone(), remote.clone()));

        let mut held = self.transport.inner.held.subscribe();
        let _ = held.wait_for(|held| !*held).await;

        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        if !self.transport.lock().reachable.contains(remote) {
            return Err(TransportError::NotFound);
        }

        let connection = self.transport.new_connection(&self.address, remote);
        Ok(Box::new(connection))
    }

    async fn unregister(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut state = self.transport.lock();
        state.sessions.remove(&self.address);
        for connection in &state.connections {
            if connection.local == self.address {
                connection.inner.closed.store(true, Ordering::SeqCst);
            }
        }
    }
}

struct ConnectionInner {
    id: ConnectionId,
    remote: PeerAddress,
    remote_stream: MediaStream,
    replaced: Mutex<Vec<(TrackKind, Option<MediaTrack>)>>,
    closed: AtomicBool,
}

/// Connection double that records `replace_track` calls.
#[derive(Clone)]
pub struct MockConnection {
    local: PeerAddress,
    inner: Arc<ConnectionInner>,
}

impl MockConnection {
    fn new(local: PeerAddress, remote: PeerAddress) -> Self {
        let remote_stream = test_stream(remote.as_str());
        Self {
            local,
            inner: Arc::new(ConnectionInner {
                id: Uuid::new_v4(),
                remote,
                remote_stream,
                replaced: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Address of the session that owns this connection.
    #[must_use]
    pub fn local_address(&self) -> &PeerAddress {
        &self.local
    }

    /// Every `replace_track` call, in order.
    #[must_use]
    pub fn replaced_tracks(&self) -> Vec<(TrackKind, Option<MediaTrack>)> {
        self.inner.replaced.lock().unwrap().clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConnection")
            .field("id", &self.inner.id)
            .field("local", &self.local)
            .field("remote", &self.inner.remote)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl PeerConnection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.inner.id
    }

    fn remote_address(&self) -> &PeerAddress {
        &self.inner.remote
    }

    fn remote_stream(&self) -> MediaStream {
        self.inner.remote_stream.clone()
    }

    fn replace_track(
        &self,
        kind: TrackKind,
        track: Option<MediaTrack>,
    ) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.inner.replaced.lock().unwrap().push((kind, track));
        Ok(())
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }
}

/// Inbound offer created by [`ScriptedTransport::inject_incoming`].
pub struct MockIncomingCall {
    transport: ScriptedTransport,
    local: PeerAddress,
    remote: PeerAddress,
    outcome: Option<oneshot::Sender<Option<MockConnection>>>,
}

impl fmt::Debug for MockIncomingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockIncomingCall")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IncomingCall for MockIncomingCall {
    fn remote_address(&self) -> &PeerAddress {
        &self.remote
    }

    async fn answer(
        mut self: Box<Self>,
        _local_stream: MediaStream,
    ) -> Result<Box<dyn PeerConnection>, TransportError> {
        let connection = self.transport.new_connection(&self.local, &self.remote);
        if let Some(outcome) = self.outcome.take() {
            let _ = outcome.send(Some(connection.clone()));
        }
        Ok(Box::new(connection))
    }

    fn reject(self: Box<Self>) {}
}

impl Drop for MockIncomingCall {
    fn drop(&mut self) {
        if let Some(outcome) = self.outcome.take() {
            let _ = outcome.send(None);
        }
    }
}
