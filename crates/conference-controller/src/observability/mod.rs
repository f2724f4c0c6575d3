//! Observability for the Conference Controller.
//!
//! # Privacy by Default
//!
//! Actor run loops use `#[instrument(skip_all)]` with explicit safe fields
//! (room name, call id, connection id). Chat content is never logged, only
//! its length. Metric labels are bounded:
//! - `actor_type`: 5 values (controller, focus, room, leg, dialog)
//! - `outcome`: bounded by code (see [`metrics`])
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `cc_rooms_active` | Gauge | none | Current rooms |
//! | `cc_legs_active` | Gauge | none | Current linked legs |
//! | `cc_chat_messages_total` | Counter | none | Chat messages relayed by rooms |
//! | `cc_join_requests_total` | Counter | `outcome` | Join attempts by result |
//! | `cc_nickname_requests_total` | Counter | `outcome` | Nickname claims by result |
//! | `cc_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator |
//! | `cc_actor_panics_total` | Counter | `actor_type` | Supervised task panics |
//! | `cc_messages_dropped_total` | Counter | `actor_type` | Fan-out drops |

pub mod metrics;

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a global `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(default_filter: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}
