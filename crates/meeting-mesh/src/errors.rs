//! Meeting mesh error types.
//!
//! Only join-chain failures reach the UI. Per-peer connection failures are
//! absorbed by the peer manager and retried by the next discovery tick.
//! Internal details are logged but never part of `user_message()`.

use crate::media::TrackKind;
use thiserror::Error;

/// Errors surfaced by the meeting lifecycle commands.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Camera or microphone denied or absent.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(#[from] DeviceError),

    /// Every address variant for the local user is already registered.
    #[error("Address collision: {attempts} variants of {base} already in use")]
    AddressCollisionExhausted { base: String, attempts: u32 },

    /// Signaling registration or transport startup failed.
    #[error("Transport initialization failed: {0}")]
    TransportInit(String),

    /// The team roster could not be fetched.
    #[error("Roster unavailable: {0}")]
    RosterUnavailable(#[from] RosterError),

    /// `join` called while a meeting is active.
    #[error("Already joined a meeting")]
    AlreadyJoined,

    /// Command requires an active meeting.
    #[error("Not joined to a meeting")]
    NotJoined,

    /// Actor channel failure (the peer manager is gone).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MeshError {
    /// Returns true for failures that abort the join flow.
    #[must_use]
    pub fn is_fatal_to_join(&self) -> bool {
        matches!(
            self,
            MeshError::DeviceUnavailable(_)
                | MeshError::AddressCollisionExhausted { .. }
                | MeshError::TransportInit(_)
                | MeshError::RosterUnavailable(_)
        )
    }

    /// Returns a user-facing message (no internal details).
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            MeshError::DeviceUnavailable(_) => "Cannot access camera/microphone".to_string(),
            MeshError::AddressCollisionExhausted { .. } => {
                "Cannot join: this account is already in the meeting from too many sessions. \
                 Close other open sessions and retry."
                    .to_string()
            }
            MeshError::TransportInit(_) => {
                "Cannot join: unable to reach the meeting service".to_string()
            }
            MeshError::RosterUnavailable(_) => "Failed to load participants".to_string(),
            MeshError::AlreadyJoined => "Already in a meeting".to_string(),
            MeshError::NotJoined => "Not in a meeting".to_string(),
            MeshError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

/// Local media acquisition failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The user (or platform policy) denied camera/microphone access.
    #[error("Permission denied")]
    PermissionDenied,

    /// No device of the requested kind exists.
    #[error("No {0} device found")]
    NotFound(TrackKind),

    /// Any other backend failure.
    #[error("{0}")]
    Other(String),
}

/// Signaling/transport layer failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The address is registered by another live session.
    #[error("Address already in use")]
    AddressInUse,

    /// The remote peer exists but did not accept the connection.
    #[error("Peer unavailable")]
    Unavailable,

    /// No peer is registered under the address.
    #[error("Peer not found")]
    NotFound,

    /// The transport gave up waiting for the remote side.
    #[error("Timed out")]
    Timeout,

    /// The local session or connection is already closed.
    #[error("Closed")]
    Closed,

    /// Any other transport failure.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns true for the expected "peer is not there" outcomes of a call.
    #[must_use]
    pub fn is_peer_unreachable(&self) -> bool {
        matches!(
            self,
            TransportError::Unavailable | TransportError::NotFound | TransportError::Timeout
        )
    }
}

/// Roster provider failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RosterError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unexpected status: {0}")]
    Status(u16),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_join_chain_errors_are_fatal() {
        assert!(MeshError::DeviceUnavailable(DeviceError::PermissionDenied).is_fatal_to_join());
        assert!(MeshError::AddressCollisionExhausted {
            base: "42".to_string(),
            attempts: 5
        }
        .is_fatal_to_join());
        assert!(MeshError::TransportInit("refused".to_string()).is_fatal_to_join());
        assert!(MeshError::RosterUnavailable(RosterError::Status(503)).is_fatal_to_join());

        assert!(!MeshError::NotJoined.is_fatal_to_join());
        assert!(!MeshError::Internal("channel closed".to_string()).is_fatal_to_join());
    }

    #[test]
    fn test_user_messages_hide_internal_details() {
        let err = MeshError::TransportInit("dial tcp 10.0.0.7:9000: refused".to_string());
        assert!(!err.user_message().contains("10.0.0.7"));

        let err = MeshError::Internal("mailbox closed".to_string());
        assert_eq!(err.user_message(), "An internal error occurred");

        let err = MeshError::AddressCollisionExhausted {
            base: "42".to_string(),
            attempts: 5,
        };
        assert!(err.user_message().contains("Close other open sessions"));
    }

    #[test]
    fn test_peer_unreachable_classification() {
        assert!(TransportError::Unavailable.is_peer_unreachable());
        assert!(TransportError::NotFound.is_peer_unreachable());
        assert!(TransportError::Timeout.is_peer_unreachable());
        assert!(!TransportError::AddressInUse.is_peer_unreachable());
        assert!(!TransportError::Other("boom".to_string()).is_peer_unreachable());
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!(
                "{}",
                MeshError::AddressCollisionExhausted {
                    base: "42".to_string(),
                    attempts: 5
                }
            ),
            "Address collision: 5 variants of 42 already in use"
        );
        assert_eq!(
            format!("{}", DeviceError::NotFound(TrackKind::Video)),
            "No video device found"
        );
        assert_eq!(
            format!("{}", MeshError::from(RosterError::Status(404))),
            "Roster unavailable: Unexpected status: 404"
        );
    }
}
