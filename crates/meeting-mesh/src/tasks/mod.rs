//! Background tasks for the meeting mesh.
//!
//! # Tasks
//!
//! - `discovery` - Periodically calls roster members that have no live link

pub mod discovery;

pub use discovery::{plan_discovery_targets, DiscoveryOptions, DiscoveryScheduler};
