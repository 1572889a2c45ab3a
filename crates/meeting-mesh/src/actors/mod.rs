//! Actor model for the peer mesh.
//!
//! # Ownership
//!
//! ```text
//! MeetingLifecycleController
//!     └── PeerManagerActor (one per joined meeting)
//!             ├── connect tasks (one per outbound attempt)
//!             └── answer tasks (one per accepted inbound call)
//! ```
//!
//! The actor exclusively owns the `address -> PeerLink` map. Every mutation
//! arrives as a message on its mailbox, so link state changes are serialized
//! without locks. Connect and answer tasks report back with the attempt's
//! generation; completions for superseded attempts are discarded.
//!
//! # Cancellation
//!
//! The actor holds a child of the meeting's `CancellationToken`. Cancelling
//! the token or calling `teardown()` closes every connection, releases the
//! signaling registration and closes the mailbox. Tasks still in flight then
//! fail to report and close whatever connection they produced.

pub mod messages;
pub mod peer_manager;

pub use messages::{Initiator, LinkSnapshot, LinkState, PeerManagerMessage};
pub use peer_manager::{PeerManagerActor, PeerManagerHandle};
