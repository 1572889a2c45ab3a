//! Message types for the peer manager actor.
//!
//! Commands carry a `oneshot` reply channel when the caller needs an answer.
//! `Call` is fire-and-forget.

use crate::errors::TransportError;
use crate::identity::PeerAddress;
use crate::media::{MediaStream, MediaTrack, TrackKind};
use crate::transport::PeerConnection;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Messages sent to `PeerManagerActor`.
#[derive(Debug)]
pub enum PeerManagerMessage {
    /// Start an outbound attempt unless one is already pending or connected.
    Call { address: PeerAddress },

    /// Push a new local track to every connected link.
    ReplaceLocalTrack {
        kind: TrackKind,
        track: Option<MediaTrack>,
        /// Number of links that accepted the new track.
        respond_to: oneshot::Sender<usize>,
    },

    /// Snapshot of every link.
    GetLinks {
        respond_to: oneshot::Sender<Vec<LinkSnapshot>>,
    },

    /// Close every link and release the registration.
    Teardown { respond_to: oneshot::Sender<()> },

    /// A connect or answer task finished.
    AttemptCompleted {
        address: PeerAddress,
        generation: u64,
        initiator: Initiator,
        started: Instant,
        result: Result<Box<dyn PeerConnection>, TransportError>,
    },
}

/// Per-link state machine.
///
/// `Idle -> Connecting -> Connected -> Disconnected`, with
/// `Connecting -> Failed` on error. `Failed` links accept a fresh `call()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Idle,
    Connecting,
    Connected,
    Failed,
    Disconnected,
}

impl LinkState {
    /// `Connecting` or `Connected`: a new call would be a duplicate.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, LinkState::Connecting | LinkState::Connected)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            LinkState::Idle => "idle",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Failed => "failed",
            LinkState::Disconnected => "disconnected",
        }
    }
}

/// Which side opened the current connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Initiator {
    Local,
    Remote,
}

/// Read-only view of one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub address: PeerAddress,
    pub state: LinkState,
    pub initiator: Initiator,
    /// Present once `Connected`.
    pub remote_stream: Option<MediaStream>,
    /// Order in which links reached `Connected`.
    pub connected_seq: Option<u64>,
    pub connected_at: Option<DateTime<Utc>>,
}
