//! Observability for the meeting mesh.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! Log targets are `mesh.<component>` so one `EnvFilter` directive can
//! silence or raise a single component.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `mesh_call_attempts_total` | Counter | `outcome` | Outbound call results |
//! | `mesh_call_duration_seconds` | Histogram | `outcome` | Call negotiation time |
//! | `mesh_incoming_calls_total` | Counter | `outcome` | Answered/rejected calls |
//! | `mesh_identity_claims_total` | Counter | `outcome` | Address claim steps |
//! | `mesh_peer_links_active` | Gauge | none | Connected links |
//! | `mesh_peer_disconnects_total` | Counter | none | Remote disconnects |
//! | `mesh_discovery_ticks_total` | Counter | none | Discovery passes |
//! | `mesh_discovery_calls_issued_total` | Counter | none | Calls issued by discovery |

pub mod metrics;

pub use metrics::init_metrics_recorder;
