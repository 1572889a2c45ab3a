//! Signaling/transport capability.
//!
//! The mesh core does not define a signaling protocol. It consumes a
//! directory service that maps a [`PeerAddress`] to a reachable endpoint:
//!
//! - [`SignalingTransport::register`] claims an address and yields a
//!   [`Registration`] (the live session plus its event stream).
//! - [`SignalingSession::connect`] negotiates an outbound [`PeerConnection`].
//! - Unsolicited calls arrive as [`TransportEvent::Incoming`] and are
//!   accepted with [`IncomingCall::answer`].
//! - A connection closed by the remote side arrives as
//!   [`TransportEvent::Closed`], tagged with the connection id so a stale
//!   close never tears down a newer connection to the same address.
//!
//! [`loopback::LoopbackDirectory`] is an in-process implementation.

pub mod loopback;

pub use loopback::LoopbackDirectory;

use crate::errors::TransportError;
use crate::identity::PeerAddress;
use crate::media::{MediaStream, MediaTrack, TrackKind};

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifier of one negotiated connection.
pub type ConnectionId = Uuid;

/// Directory service entry point.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Register `address` for this client.
    ///
    /// # Errors
    ///
    /// `TransportError::AddressInUse` when another live session holds the
    /// address; anything else is a startup failure.
    async fn register(&self, address: &PeerAddress) -> Result<Registration, TransportError>;
}

/// A registered signaling session.
#[async_trait]
pub trait SignalingSession: Send + Sync {
    /// The address this session is registered under.
    fn local_address(&self) -> &PeerAddress;

    /// Whether the registration is still alive.
    fn is_open(&self) -> bool;

    /// Negotiate a connection to `remote`, offering `local_stream`.
    async fn connect(
        &self,
        remote: &PeerAddress,
        local_stream: MediaStream,
    ) -> Result<Box<dyn PeerConnection>, TransportError>;

    /// Release the address and close every connection of this session.
    /// Safe to call repeatedly.
    async fn unregister(&self);
}

/// One negotiated media connection to a remote peer.
pub trait PeerConnection: Send + Sync + fmt::Debug {
    fn id(&self) -> ConnectionId;

    fn remote_address(&self) -> &PeerAddress;

    /// The media the remote side is sending.
    fn remote_stream(&self) -> MediaStream;

    /// Swap the outgoing track of `kind` without renegotiating.
    /// `None` detaches the track.
    fn replace_track(&self, kind: TrackKind, track: Option<MediaTrack>)
        -> Result<(), TransportError>;

    /// Close the connection. The remote side is notified.
    fn close(&self);
}

/// An unsolicited connection offer from a remote peer.
#[async_trait]
pub trait IncomingCall: Send + fmt::Debug {
    fn remote_address(&self) -> &PeerAddress;

    /// Accept the offer, sending `local_stream` back.
    async fn answer(
        self: Box<Self>,
        local_stream: MediaStream,
    ) -> Result<Box<dyn PeerConnection>, TransportError>;

    /// Decline the offer. The caller's `connect` fails with `Unavailable`.
    fn reject(self: Box<Self>);
}

/// Notifications delivered to a registered session.
#[derive(Debug)]
pub enum TransportEvent {
    /// A remote peer is calling.
    Incoming(Box<dyn IncomingCall>),

    /// A connection was closed by the remote side.
    Closed {
        address: PeerAddress,
        connection_id: ConnectionId,
    },
}

/// Result of a successful address registration.
pub struct Registration {
    pub session: Arc<dyn SignalingSession>,
    pub events: mpsc::Receiver<TransportEvent>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("address", self.session.local_address())
            .field("open", &self.session.is_open())
            .finish_non_exhaustive()
    }
}
