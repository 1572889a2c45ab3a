//! Participant addressing and collision-safe address claims.
//!
//! A user may be in the meeting from several devices or tabs. The first
//! session registers as `userId`; later sessions register as `userId-2`,
//! `userId-3`, ... The resolver walks that sequence on "address in use" until
//! a registration succeeds or the attempt bound is reached.

use crate::errors::{MeshError, TransportError};
use crate::observability::metrics;
use crate::transport::{Registration, SignalingTransport};

use common::types::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, instrument, warn};

/// Default bound on claim attempts (`id`, `id-2` .. `id-5`).
pub const DEFAULT_MAX_CLAIM_ATTEMPTS: u32 = 5;

/// Network address of one session in the signaling namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddress(String);

impl PeerAddress {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Address of the `session`-th session of `user_id` (1-based).
    #[must_use]
    pub fn for_session(user_id: &UserId, session: u32) -> Self {
        if session <= 1 {
            Self(user_id.as_str().to_string())
        } else {
            Self(format!("{user_id}-{session}"))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Session number of this address if it belongs to `user_id`.
    ///
    /// `42` is session 1 of `42`, `42-3` is session 3. `421` and `42-x`
    /// do not belong to `42`.
    #[must_use]
    pub fn session_of(&self, user_id: &UserId) -> Option<u32> {
        let rest = self.0.strip_prefix(user_id.as_str())?;
        if rest.is_empty() {
            return Some(1);
        }
        let suffix: u32 = rest.strip_prefix('-')?.parse().ok()?;
        (suffix >= 2).then_some(suffix)
    }

    /// Whether this address is one of `user_id`'s sessions.
    #[must_use]
    pub fn belongs_to(&self, user_id: &UserId) -> bool {
        self.session_of(user_id).is_some()
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identity of the local session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantIdentity {
    pub user_id: UserId,
    /// 1 for the first session, N for `userId-N`.
    pub session_suffix: u32,
}

impl ParticipantIdentity {
    #[must_use]
    pub fn address(&self) -> PeerAddress {
        PeerAddress::for_session(&self.user_id, self.session_suffix)
    }
}

/// Claims a free address for the local user.
///
/// Holds no state between claims; every join asks for a fresh claim.
#[derive(Debug, Clone, Copy)]
pub struct IdentityResolver {
    max_attempts: u32,
}

impl IdentityResolver {
    /// `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Register the first free address among `base`, `base-2`, ...
    ///
    /// # Errors
    ///
    /// - `MeshError::AddressCollisionExhausted` when every variant is taken.
    /// - `MeshError::TransportInit` on any other registration failure.
    #[instrument(skip_all, name = "mesh.identity.claim", fields(base = %base))]
    pub async fn claim(
        &self,
        transport: &dyn SignalingTransport,
        base: &UserId,
    ) -> Result<(ParticipantIdentity, Registration), MeshError> {
        for session_suffix in 1..=self.max_attempts {
            let identity = ParticipantIdentity {
                user_id: base.clone(),
                session_suffix,
            };
            let address = identity.address();

            match transport.register(&address).await {
                Ok(registration) => {
                    metrics::record_identity_claim("claimed");
                    info!(
                        target: "mesh.identity",
                        address = %address,
                        attempt = session_suffix,
                        "Address claimed"
                    );
                    return Ok((identity, registration));
                }
                Err(TransportError::AddressInUse) => {
                    metrics::record_identity_claim("collision");
                    debug!(
                        target: "mesh.identity",
                        address = %address,
                        attempt = session_suffix,
                        "Address in use, trying next variant"
                    );
                }
                Err(e) => {
                    metrics::record_identity_claim("error");
                    warn!(
                        target: "mesh.identity",
                        address = %address,
                        error = %e,
                        "Address registration failed"
                    );
                    return Err(MeshError::TransportInit(e.to_string()));
                }
            }
        }

        metrics::record_identity_claim("exhausted");
        warn!(
            target: "mesh.identity",
            attempts = self.max_attempts,
            "All address variants in use"
        );
        Err(MeshError::AddressCollisionExhausted {
            base: base.to_string(),
            attempts: self.max_attempts,
        })
    }
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CLAIM_ATTEMPTS)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::transport::LoopbackDirectory;

    #[test]
    fn test_address_for_session() {
        let user = UserId::new("42");
        assert_eq!(PeerAddress::for_session(&user, 1).as_str(), "42");
        assert_eq!(PeerAddress::for_session(&user, 3).as_str(), "42-3");
    }

    #[test]
    fn test_session_of() {
        let user = UserId::new("42");
        assert_eq!(PeerAddress::from("42").session_of(&user), Some(1));
        assert_eq!(PeerAddress::from("42-2").session_of(&user), Some(2));
        assert_eq!(PeerAddress::from("421").session_of(&user), None);
        assert_eq!(PeerAddress::from("42-x").session_of(&user), None);
        assert_eq!(PeerAddress::from("42-1").session_of(&user), None);
        assert_eq!(PeerAddress::from("4").session_of(&user), None);
    }

    #[test]
    fn test_identity_address() {
        let identity = ParticipantIdentity {
            user_id: UserId::new("alice"),
            session_suffix: 2,
        };
        assert_eq!(identity.address().as_str(), "alice-2");
        assert!(identity.address().belongs_to(&UserId::new("alice")));
    }

    #[tokio::test]
    async fn test_claim_first_free_variant() {
        let directory = LoopbackDirectory::new();
        let user = UserId::new("42");
        let _first = directory.register(&PeerAddress::from("42")).await.unwrap();

        let (identity, registration) = IdentityResolver::default()
            .claim(&directory, &user)
            .await
            .unwrap();

        assert_eq!(identity.session_suffix, 2);
        assert_eq!(registration.session.local_address().as_str(), "42-2");
    }

    #[tokio::test]
    async fn test_claim_exhausted() {
        let directory = LoopbackDirectory::new();
        let user = UserId::new("bob");
        let mut held = Vec::new();
        for n in 1..=2 {
            held.push(
                directory
                    .register(&PeerAddress::for_session(&user, n))
                    .await
                    .unwrap(),
            );
        }

        let err = IdentityResolver::new(2)
            .claim(&directory, &user)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MeshError::AddressCollisionExhausted { attempts: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_claim_is_not_cached() {
        let directory = LoopbackDirectory::new();
        let user = UserId::new("carol");
        let resolver = IdentityResolver::default();

        let (first, registration) = resolver.claim(&directory, &user).await.unwrap();
        assert_eq!(first.session_suffix, 1);

        // Releasing the address makes the base id claimable again
        registration.session.unregister().await;
        let (again, _registration) = resolver.claim(&directory, &user).await.unwrap();
        assert_eq!(again.session_suffix, 1);
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(IdentityResolver::new(0).max_attempts(), 1);
    }
}
