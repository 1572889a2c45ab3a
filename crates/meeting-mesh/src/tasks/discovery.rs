//! Discovery background task.
//!
//! Closes the gap between the roster (who should be in the meeting) and the
//! peer manager's links (who we are actually connected to). Every tick:
//!
//! 1. Snapshot the links.
//! 2. For each roster member other than the local user with no `Connecting`
//!    or `Connected` link, plan calls to `id`, `id-2`, ... `id-N`.
//! 3. Enqueue the calls without waiting for their outcome.
//!
//! There is no backoff: a failed link is simply called again next tick.
//! At most `max_members` members are probed per tick; when the roster is
//! larger the starting member rotates so everyone is reached in turn.
//!
//! # Graceful Shutdown
//!
//! `stop()` cancels the schedule and waits for the task, so no call can race
//! the peer manager's teardown.

use crate::actors::{LinkSnapshot, PeerManagerHandle};
use crate::identity::PeerAddress;
use crate::observability::metrics;
use crate::roster::owner_of;

use common::types::{RosterEntry, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Default tick cadence.
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_millis(5000);

/// Default addresses probed per member (`id`, `id-2`, `id-3`).
pub const DEFAULT_SESSION_VARIANTS: u32 = 3;

/// Default cap on members probed per tick.
pub const DEFAULT_MAX_DISCOVERY_MEMBERS: usize = 64;

/// Discovery tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryOptions {
    pub interval: Duration,
    pub session_variants: u32,
    /// 0 disables the cap.
    pub max_members: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_DISCOVERY_INTERVAL,
            session_variants: DEFAULT_SESSION_VARIANTS,
            max_members: DEFAULT_MAX_DISCOVERY_MEMBERS,
        }
    }
}

/// Addresses to call on tick number `tick` (0-based).
#[must_use]
pub fn plan_discovery_targets(
    local_user: &UserId,
    local_address: &PeerAddress,
    roster: &[RosterEntry],
    links: &[LinkSnapshot],
    options: &DiscoveryOptions,
    tick: u64,
) -> Vec<PeerAddress> {
    let pending: Vec<&RosterEntry> = roster
        .iter()
        .filter(|entry| &entry.user_id != local_user)
        .filter(|entry| {
            !links.iter().any(|link| {
                link.state.is_active()
                    && owner_of(&link.address, roster)
                        .is_some_and(|owner| owner.user_id == entry.user_id)
            })
        })
        .collect();

    if pending.is_empty() {
        return Vec::new();
    }

    let take = if options.max_members == 0 {
        pending.len()
    } else {
        options.max_members.min(pending.len())
    };
    let start = if take < pending.len() {
        usize::try_from(tick)
            .unwrap_or(usize::MAX)
            .wrapping_mul(take)
            % pending.len()
    } else {
        0
    };

    pending
        .iter()
        .cycle()
        .skip(start)
        .take(take)
        .flat_map(|entry| {
            (1..=options.session_variants.max(1))
                .map(|session| PeerAddress::for_session(&entry.user_id, session))
        })
        .filter(|address| address != local_address)
        .collect()
}

/// Handle to the running discovery task.
#[derive(Debug)]
pub struct DiscoveryScheduler {
    cancel_token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DiscoveryScheduler {
    /// Start ticking immediately, then every `options.interval`.
    #[must_use]
    pub fn start(
        peers: PeerManagerHandle,
        local_user: UserId,
        roster: Arc<[RosterEntry]>,
        options: DiscoveryOptions,
        cancel_token: CancellationToken,
    ) -> Self {
        let task = tokio::spawn(run_discovery(
            peers,
            local_user,
            roster,
            options,
            cancel_token.clone(),
        ));
        Self {
            cancel_token,
            task: Some(task),
        }
    }

    /// Cancel the schedule and wait for the task to exit. Idempotent.
    pub async fn stop(&mut self) {
        self.cancel_token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for DiscoveryScheduler {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[instrument(skip_all, name = "mesh.task.discovery", fields(address = %peers.local_address()))]
async fn run_discovery(
    peers: PeerManagerHandle,
    local_user: UserId,
    roster: Arc<[RosterEntry]>,
    options: DiscoveryOptions,
    cancel_token: CancellationToken,
) {
    info!(
        target: "mesh.task.discovery",
        interval_ms = u64::try_from(options.interval.as_millis()).unwrap_or(u64::MAX),
        members = roster.len(),
        session_variants = options.session_variants,
        "Starting discovery task"
    );

    let mut interval = tokio::time::interval(options.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            biased;

            () = cancel_token.cancelled() => {
                info!(
                    target: "mesh.task.discovery",
                    "Discovery task received shutdown signal, exiting"
                );
                break;
            }

            _ = interval.tick() => {
                if !run_tick(&peers, &local_user, &roster, &options, tick, &cancel_token).await {
                    break;
                }
                tick = tick.wrapping_add(1);
            }
        }
    }

    info!(target: "mesh.task.discovery", ticks = tick, "Discovery task stopped");
}

/// One reconciliation pass. Returns false once the peer manager is gone.
async fn run_tick(
    peers: &PeerManagerHandle,
    local_user: &UserId,
    roster: &[RosterEntry],
    options: &DiscoveryOptions,
    tick: u64,
    cancel_token: &CancellationToken,
) -> bool {
    let Ok(links) = peers.links().await else {
        debug!(target: "mesh.task.discovery", "Peer manager gone, stopping");
        return false;
    };

    let targets = plan_discovery_targets(
        local_user,
        peers.local_address(),
        roster,
        &links,
        options,
        tick,
    );

    let mut issued = 0;
    for address in targets {
        if cancel_token.is_cancelled() {
            break;
        }
        if peers.call(address).await.is_err() {
            debug!(target: "mesh.task.discovery", "Peer manager gone, stopping");
            metrics::record_discovery_tick(issued);
            return false;
        }
        issued += 1;
    }

    metrics::record_discovery_tick(issued);
    debug!(target: "mesh.task.discovery", tick, calls = issued, "Discovery tick");
    true
}
