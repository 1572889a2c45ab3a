//! # Mesh Test Utilities
//!
//! Test doubles and fixtures for exercising the meeting mesh without the
//! loopback directory's real negotiation.
//!
//! ## Modules
//!
//! - `mock_transport` - Scripted signaling transport that records every call
//! - `mock_roster` - Failing and counting roster providers
//! - `fixtures` - Roster entries, streams and fast configs
//! - `eventual` - Polling assertion for asynchronous convergence
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mesh_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let transport = ScriptedTransport::new();
//!     transport.take_address("42");
//!     transport.set_reachable("7");
//!
//!     // join as "42" -> claims "42-2", calls to "7" connect
//!     // assert on transport.register_calls() / transport.connect_calls()
//! }
//! ```

pub mod eventual;
pub mod fixtures;
pub mod mock_roster;
pub mod mock_transport;

pub use eventual::assert_eventually;
pub use fixtures::*;
pub use mock_roster::*;
pub use mock_transport::*;
