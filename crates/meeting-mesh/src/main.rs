//! Mesh simulator
//!
//! Runs N participants of one team meeting in a single process over the
//! loopback transport with synthetic capture devices, lets discovery
//! converge and prints what every participant sees.
//!
//! # Flow
//!
//! 1. Load `MeshConfig` and `MESH_SIM_*` settings from environment
//! 2. Initialize tracing and the Prometheus metrics recorder
//! 3. Resolve the roster (static `1..=N`, or the roster API when
//!    `MESH_ROSTER_API_URL` is set)
//! 4. Join every participant, wait for discovery to settle, print views
//! 5. Optionally toggle the first camera and drop the last participant
//! 6. Leave everyone and optionally render metrics
//!
//! # Settings
//!
//! | Variable | Default |
//! |----------|---------|
//! | `MESH_SIM_PARTICIPANTS` | 3 |
//! | `MESH_SIM_TEAM_ID` | `sim-team` |
//! | `MESH_SIM_EXTRA_SESSION` | false (second tab of the first user) |
//! | `MESH_SIM_TOGGLE_CAMERA` | false |
//! | `MESH_SIM_DROP_LAST` | false |
//! | `MESH_SIM_PRINT_METRICS` | false |
//! | `MESH_SIM_SETTLE_MS` | two discovery intervals |

#![warn(clippy::pedantic)]

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use common::config::ObservabilityConfig;
use common::types::{Role, RosterEntry, TeamId};
use meeting_mesh::media::SyntheticDevices;
use meeting_mesh::observability::init_metrics_recorder;
use meeting_mesh::roster::{HttpRosterProvider, RosterProvider, StaticRoster};
use meeting_mesh::transport::LoopbackDirectory;
use meeting_mesh::{JoinRequest, MeetingLifecycleController, MeshConfig};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_PARTICIPANTS: usize = 3;
const DEFAULT_TEAM_ID: &str = "sim-team";
const MEETING_ID: &str = "sim-meeting";

/// Time for events to reach every projection after a local action.
const EVENT_SETTLE: Duration = Duration::from_millis(200);

#[derive(Debug)]
struct SimOptions {
    participants: usize,
    team_id: TeamId,
    extra_session: bool,
    toggle_camera: bool,
    drop_last: bool,
    print_metrics: bool,
    settle: Option<Duration>,
}

impl SimOptions {
    fn from_vars(vars: &HashMap<String, String>) -> anyhow::Result<Self> {
        let participants = match vars.get("MESH_SIM_PARTICIPANTS") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("MESH_SIM_PARTICIPANTS must be a number, got {raw:?}"))?,
            None => DEFAULT_PARTICIPANTS,
        };
        if participants == 0 {
            bail!("MESH_SIM_PARTICIPANTS must be at least 1");
        }

        let settle = vars
            .get("MESH_SIM_SETTLE_MS")
            .map(|raw| {
                raw.trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .with_context(|| format!("MESH_SIM_SETTLE_MS must be a number, got {raw:?}"))
            })
            .transpose()?;

        Ok(Self {
            participants,
            team_id: TeamId::new(
                vars.get("MESH_SIM_TEAM_ID")
                    .map_or(DEFAULT_TEAM_ID, String::as_str),
            ),
            extra_session: flag(vars, "MESH_SIM_EXTRA_SESSION")?,
            toggle_camera: flag(vars, "MESH_SIM_TOGGLE_CAMERA")?,
            drop_last: flag(vars, "MESH_SIM_DROP_LAST")?,
            print_metrics: flag(vars, "MESH_SIM_PRINT_METRICS")?,
            settle,
        })
    }
}

fn flag(vars: &HashMap<String, String>, name: &str) -> anyhow::Result<bool> {
    match vars.get(name).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("" | "0" | "false" | "no") => Ok(false),
        Some("1" | "true" | "yes") => Ok(true),
        Some(other) => bail!("{name} must be a boolean, got {other:?}"),
    }
}

fn init_tracing(observability: &ObservabilityConfig) {
    let level = &observability.log_level;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("meeting_mesh={level},mesh_sim={level}").into());
    let registry = tracing_subscriber::registry().with(filter);

    if observability.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Roster of `1..=n`, participant 1 leading.
fn static_roster(n: usize) -> Vec<RosterEntry> {
    (1..=n)
        .map(|i| {
            let entry = RosterEntry::member(i.to_string(), format!("Participant {i}"));
            if i == 1 {
                entry.with_role(Role::Leader)
            } else {
                entry
            }
        })
        .collect()
}

fn print_views(stage: &str, clients: &[MeetingLifecycleController]) -> anyhow::Result<()> {
    println!("=== {stage} ===");
    for client in clients {
        let Some(identity) = client.local_identity() else {
            continue;
        };
        let views = client.get_active_participants();
        println!("{} sees {} participant(s):", identity.address(), views.len());
        println!("{}", serde_json::to_string_pretty(&views)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let vars: HashMap<String, String> = env::vars().collect();
    let config = MeshConfig::from_vars(&vars).context("Failed to load configuration")?;
    init_tracing(&config.observability);
    let options = SimOptions::from_vars(&vars)?;

    info!(
        participants = options.participants,
        team_id = %options.team_id,
        discovery_interval_ms = config.discovery_interval.as_millis(),
        max_claim_attempts = config.max_claim_attempts,
        session_variants = config.session_variants,
        "Starting mesh simulator"
    );

    let prometheus = init_metrics_recorder().map_err(anyhow::Error::msg)?;

    let roster_provider: Arc<dyn RosterProvider> = match &config.roster_api_url {
        Some(url) => Arc::new(
            HttpRosterProvider::new(
                url,
                config.roster_api_token.clone(),
                config.roster_http_timeout,
            )
            .context("Failed to create roster client")?,
        ),
        None => Arc::new(StaticRoster::new(static_roster(options.participants))),
    };

    let members = roster_provider
        .get_members(&options.team_id)
        .await
        .context("Failed to fetch roster")?;
    let mut users: Vec<_> = members
        .iter()
        .take(options.participants)
        .map(|member| member.user_id.clone())
        .collect();
    if users.len() < options.participants {
        warn!(
            requested = options.participants,
            available = users.len(),
            "Roster has fewer members than requested participants"
        );
    }
    if options.extra_session {
        if let Some(first) = users.first().cloned() {
            users.push(first);
        }
    }

    let directory = LoopbackDirectory::new();
    let mut clients = Vec::with_capacity(users.len());
    for user_id in users {
        let devices = Arc::new(SyntheticDevices::with_label(format!("user-{user_id}")));
        let mut client = MeetingLifecycleController::new(
            Arc::new(directory.clone()),
            devices,
            Arc::clone(&roster_provider),
            &config,
        );
        let identity = client
            .join(JoinRequest::new(
                MEETING_ID,
                options.team_id.clone(),
                user_id.clone(),
            ))
            .await
            .with_context(|| format!("{user_id} failed to join"))?;
        info!(address = %identity.address(), "Participant joined");
        clients.push(client);
    }

    let settle = options
        .settle
        .unwrap_or(config.discovery_interval * 2 + EVENT_SETTLE);
    info!(settle_ms = settle.as_millis(), "Waiting for discovery to converge");
    tokio::time::sleep(settle).await;
    print_views("after join", &clients)?;

    if options.toggle_camera {
        if let Some(first) = clients.first_mut() {
            let video_enabled = first.toggle_video().await;
            info!(video_enabled, "First participant toggled camera");
        }
        tokio::time::sleep(EVENT_SETTLE).await;
        print_views("after camera toggle", &clients)?;
    }

    if options.drop_last {
        if let Some(mut last) = clients.pop() {
            if let Some(identity) = last.local_identity() {
                info!(address = %identity.address(), "Dropping participant");
            }
            last.leave().await;
        }
        tokio::time::sleep(EVENT_SETTLE).await;
        print_views("after disconnect", &clients)?;
    }

    for client in &mut clients {
        client.leave().await;
    }
    info!(
        registered = directory.registered_addresses().len(),
        "All participants left"
    );

    if options.print_metrics {
        println!("{}", prometheus.render());
    }

    Ok(())
}
