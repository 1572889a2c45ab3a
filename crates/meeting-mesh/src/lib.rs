//! Meeting Mesh Library
//!
//! Client-side core of a peer-mesh video meeting. Every participant of a
//! team meeting registers a signaling address derived from its user id and
//! keeps one direct media link to every other live session:
//!
//! - Identity claim with bounded collision suffixes (`42`, `42-2`, `42-3`)
//! - Peer link management with glare resolution and stale-completion fencing
//! - Periodic roster-driven discovery (no backoff, retries every tick)
//! - Local media acquisition and in-place camera/microphone toggles
//! - Roster projection into the "in the room" participant view
//!
//! # Architecture
//!
//! ```text
//! MeetingLifecycleController (one per client)
//! ├── MediaDeviceController (owns local capture)
//! ├── PeerManagerActor (owns all PeerLinks, one per remote address)
//! │   └── connect / answer tasks (report back by generation)
//! ├── DiscoveryScheduler (calls every roster session each tick)
//! └── RosterProjector (events -> Vec<ActiveParticipantView>)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Peer manager actor and its messages
//! - [`config`] - Configuration from environment
//! - [`errors`] - Error types surfaced to the UI
//! - [`events`] - Observable mesh events
//! - [`identity`] - Peer addresses and the identity claim
//! - [`media`] - Local media model and device controller
//! - [`meeting`] - Join/leave lifecycle
//! - [`observability`] - Prometheus metrics
//! - [`roster`] - Roster providers and the participant projection
//! - [`tasks`] - Discovery scheduler
//! - [`transport`] - Signaling transport abstraction and loopback backend

pub mod actors;
pub mod config;
pub mod errors;
pub mod events;
pub mod identity;
pub mod media;
pub mod meeting;
pub mod observability;
pub mod roster;
pub mod tasks;
pub mod transport;

pub use config::MeshConfig;
pub use errors::MeshError;
pub use events::MeshEvent;
pub use identity::{ParticipantIdentity, PeerAddress};
pub use meeting::{JoinRequest, MeetingLifecycleController};
