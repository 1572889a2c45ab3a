//! Observable mesh events.
//!
//! Published on a `tokio::sync::broadcast` channel. The peer manager emits
//! stream/disconnect events; the lifecycle controller emits local media
//! changes. Slow subscribers lag rather than block the publisher.

use crate::identity::PeerAddress;
use crate::media::{LocalMediaState, MediaStream};

use tokio::sync::broadcast;

/// Default broadcast capacity.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Topology and local media notifications.
#[derive(Debug, Clone)]
pub enum MeshEvent {
    /// A link reached `Connected`. Emitted again with the new stream when a
    /// connection to the same address is replaced.
    StreamReceived {
        address: PeerAddress,
        stream: MediaStream,
    },

    /// A connected link went away. At most once per connection lifetime.
    PeerDisconnected { address: PeerAddress },

    /// Local mute/camera state changed.
    LocalMediaChanged(LocalMediaState),
}

impl MeshEvent {
    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            MeshEvent::StreamReceived { .. } => "stream_received",
            MeshEvent::PeerDisconnected { .. } => "peer_disconnected",
            MeshEvent::LocalMediaChanged(_) => "local_media_changed",
        }
    }
}

/// Create the event channel. Capacity is clamped to at least 1.
#[must_use]
pub fn channel(capacity: usize) -> broadcast::Sender<MeshEvent> {
    broadcast::channel(capacity.max(1)).0
}
