//! In-process signaling directory.
//!
//! Every client of one [`LoopbackDirectory`] shares a namespace of
//! addresses. Connections are pairs of media slots: each side publishes its
//! outgoing stream into a `watch` slot and reads the other side's slot as
//! its remote stream, so `replace_track` is visible to the remote peer
//! without renegotiation.

use super::{
    ConnectionId, IncomingCall, PeerConnection, Registration, SignalingSession,
    SignalingTransport, TransportEvent,
};
use crate::errors::TransportError;
use crate::identity::PeerAddress;
use crate::media::{MediaStream, MediaTrack, TrackKind};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};
use uuid::Uuid;

/// How long a caller waits for the callee to answer.
pub const DEFAULT_ANSWER_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffer for each session's event channel.
const EVENT_CHANNEL_BUFFER: usize = 64;

type PeerTable = HashMap<PeerAddress, PeerEntry>;

#[derive(Debug)]
struct DirectoryInner {
    peers: Mutex<PeerTable>,
    answer_timeout: Duration,
}

impl DirectoryInner {
    fn peers(&self) -> Result<MutexGuard<'_, PeerTable>, TransportError> {
        self.peers
            .lock()
            .map_err(|_| TransportError::Other("loopback directory lock poisoned".to_string()))
    }
}

#[derive(Debug)]
struct PeerEntry {
    session_id: Uuid,
    events: mpsc::Sender<TransportEvent>,
    links: HashMap<ConnectionId, Arc<LoopbackLink>>,
}

/// Shared in-process address directory.
#[derive(Debug, Clone)]
pub struct LoopbackDirectory {
    inner: Arc<DirectoryInner>,
}

impl LoopbackDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::with_answer_timeout(DEFAULT_ANSWER_TIMEOUT)
    }

    #[must_use]
    pub fn with_answer_timeout(answer_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(DirectoryInner {
                peers: Mutex::new(HashMap::new()),
                answer_timeout,
            }),
        }
    }

    /// Currently registered addresses, sorted.
    #[must_use]
    pub fn registered_addresses(&self) -> Vec<PeerAddress> {
        let mut addresses: Vec<PeerAddress> = self
            .inner
            .peers()
            .map(|peers| peers.keys().cloned().collect())
            .unwrap_or_default();
        addresses.sort();
        addresses
    }

    #[must_use]
    pub fn is_registered(&self, address: &PeerAddress) -> bool {
        self.inner
            .peers()
            .map(|peers| peers.contains_key(address))
            .unwrap_or(false)
    }

    /// Number of open connections held by `address`.
    #[must_use]
    pub fn connection_count(&self, address: &PeerAddress) -> usize {
        self.inner
            .peers()
            .ok()
            .and_then(|peers| peers.get(address).map(|entry| entry.links.len()))
            .unwrap_or(0)
    }
}

impl Default for LoopbackDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalingTransport for LoopbackDirectory {
    async fn register(&self, address: &PeerAddress) -> Result<Registration, TransportError> {
        let (sender, events) = mpsc::channel(EVENT_CHANNEL_BUFFER);
        let session_id = Uuid::new_v4();

        {
            let mut peers = self.inner.peers()?;
            if peers.contains_key(address) {
                return Err(TransportError::AddressInUse);
            }
            peers.insert(
                address.clone(),
                PeerEntry {
                    session_id,
                    events: sender,
                    links: HashMap::new(),
                },
            );
        }

        debug!(target: "mesh.transport.loopback", address = %address, "Address registered");

        Ok(Registration {
            session: Arc::new(LoopbackSession {
                address: address.clone(),
                session_id,
                open: AtomicBool::new(true),
                directory: Arc::clone(&self.inner),
            }),
            events,
        })
    }
}

#[derive(Debug)]
struct LoopbackSession {
    address: PeerAddress,
    session_id: Uuid,
    open: AtomicBool,
    directory: Arc<DirectoryInner>,
}

impl LoopbackSession {
    fn shutdown(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }

        let links: Vec<Arc<LoopbackLink>> = match self.directory.peers() {
            Ok(mut peers) => {
                let owned = peers
                    .get(&self.address)
                    .is_some_and(|entry| entry.session_id == self.session_id);
                if owned {
                    peers
                        .remove(&self.address)
                        .map(|entry| entry.links.into_values().collect())
                        .unwrap_or_default()
                } else {
                    Vec::new()
                }
            }
            Err(_) => Vec::new(),
        };

        for link in links {
            link.close_from(&self.address);
        }

        info!(target: "mesh.transport.loopback", address = %self.address, "Address released");
    }
}

#[async_trait]
impl SignalingSession for LoopbackSession {
    fn local_address(&self) -> &PeerAddress {
        &self.address
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn connect(
        &self,
        remote: &PeerAddress,
        local_stream: MediaStream,
    ) -> Result<Box<dyn PeerConnection>, TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }

        let events = {
            let peers = self.directory.peers()?;
            peers
                .get(remote)
                .map(|entry| entry.events.clone())
                .ok_or(TransportError::NotFound)?
        };

        let (answer_tx, answer_rx) = oneshot::channel();
        let call = LoopbackIncomingCall {
            caller: self.address.clone(),
            callee: remote.clone(),
            caller_stream: local_stream,
            answer_tx,
            directory: Arc::downgrade(&self.directory),
        };

        events
            .send(TransportEvent::Incoming(Box::new(call)))
            .await
            .map_err(|_| TransportError::Unavailable)?;

        match tokio::time::timeout(self.directory.answer_timeout, answer_rx).await {
            Err(_) => Err(TransportError::Timeout),
            Ok(Err(_)) => Err(TransportError::Unavailable),
            Ok(Ok(link)) => Ok(Box::new(LoopbackConnection {
                link,
                local: self.address.clone(),
            })),
        }
    }

    async fn unregister(&self) {
        self.shutdown();
    }
}

impl Drop for LoopbackSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Debug)]
struct LoopbackIncomingCall {
    caller: PeerAddress,
    callee: PeerAddress,
    caller_stream: MediaStream,
    answer_tx: oneshot::Sender<Arc<LoopbackLink>>,
    directory: Weak<DirectoryInner>,
}

#[async_trait]
impl IncomingCall for LoopbackIncomingCall {
    fn remote_address(&self) -> &PeerAddress {
        &self.caller
    }

    async fn answer(
        self: Box<Self>,
        local_stream: MediaStream,
    ) -> Result<Box<dyn PeerConnection>, TransportError> {
        let call = *self;
        let directory = call.directory.upgrade().ok_or(TransportError::Closed)?;

        let link = Arc::new(LoopbackLink {
            id: Uuid::new_v4(),
            caller: call.caller,
            callee: call.callee,
            caller_media: watch::channel(call.caller_stream).0,
            callee_media: watch::channel(local_stream).0,
            closed: AtomicBool::new(false),
            directory: Arc::downgrade(&directory),
        });

        {
            let mut peers = directory.peers()?;
            if !peers.contains_key(&link.caller) {
                return Err(TransportError::Closed);
            }
            for address in [&link.caller, &link.callee] {
                if let Some(entry) = peers.get_mut(address) {
                    entry.links.insert(link.id, Arc::clone(&link));
                }
            }
        }

        if call.answer_tx.send(Arc::clone(&link)).is_err() {
            // Caller stopped waiting.
            link.close_from(&link.callee);
            return Err(TransportError::Closed);
        }

        Ok(Box::new(LoopbackConnection {
            local: link.callee.clone(),
            link,
        }))
    }

    fn reject(self: Box<Self>) {
        debug!(
            target: "mesh.transport.loopback",
            caller = %self.caller,
            callee = %self.callee,
            "Incoming call rejected"
        );
    }
}

#[derive(Debug)]
struct LoopbackLink {
    id: ConnectionId,
    caller: PeerAddress,
    callee: PeerAddress,
    caller_media: watch::Sender<MediaStream>,
    callee_media: watch::Sender<MediaStream>,
    closed: AtomicBool,
    directory: Weak<DirectoryInner>,
}

impl LoopbackLink {
    fn is_caller(&self, address: &PeerAddress) -> bool {
        &self.caller == address
    }

    fn close_from(&self, closer: &PeerAddress) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let other = if self.is_caller(closer) {
            &self.callee
        } else {
            &self.caller
        };

        let Some(directory) = self.directory.upgrade() else {
            return;
        };

        let notify = match directory.peers() {
            Ok(mut peers) => {
                for address in [closer, other] {
                    if let Some(entry) = peers.get_mut(address) {
                        entry.links.remove(&self.id);
                    }
                }
                peers.get(other).map(|entry| entry.events.clone())
            }
            Err(_) => None,
        };

        let Some(events) = notify else {
            return;
        };

        let event = TransportEvent::Closed {
            address: closer.clone(),
            connection_id: self.id,
        };
        match events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    runtime.spawn(async move {
                        let _ = events.send(event).await;
                    });
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }

        debug!(
            target: "mesh.transport.loopback",
            connection_id = %self.id,
            closer = %closer,
            "Connection closed"
        );
    }
}

#[derive(Debug)]
struct LoopbackConnection {
    link: Arc<LoopbackLink>,
    local: PeerAddress,
}

impl LoopbackConnection {
    fn outgoing(&self) -> &watch::Sender<MediaStream> {
        if self.link.is_caller(&self.local) {
            &self.link.caller_media
        } else {
            &self.link.callee_media
        }
    }

    fn incoming(&self) -> &watch::Sender<MediaStream> {
        if self.link.is_caller(&self.local) {
            &self.link.callee_media
        } else {
            &self.link.caller_media
        }
    }
}

impl PeerConnection for LoopbackConnection {
    fn id(&self) -> ConnectionId {
        self.link.id
    }

    fn remote_address(&self) -> &PeerAddress {
        if self.link.is_caller(&self.local) {
            &self.link.callee
        } else {
            &self.link.caller
        }
    }

    fn remote_stream(&self) -> MediaStream {
        self.incoming().borrow().clone()
    }

    fn replace_track(
        &self,
        kind: TrackKind,
        track: Option<MediaTrack>,
    ) -> Result<(), TransportError> {
        if self.link.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.outgoing()
            .send_modify(|stream| stream.set_track(kind, track));
        Ok(())
    }

    fn close(&self) {
        self.link.close_from(&self.local);
    }
}
