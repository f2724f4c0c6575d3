//! Actor hierarchy for the Conference Controller.
//!
//! ```text
//! ConferenceControllerActor (singleton per instance)
//! └── supervises N FocusActors (one per room name)
//!     ├── RoomActor (mixer, room role: roster, nicknames, chat fan-out)
//!     └── supervises N DialogActors (one per call)
//!         └── LegActor (mixer, leg role: one media session)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Registry by name**: focus, room and dialog handles are found through
//!   the shared [`crate::registry::RoomRegistry`], never by raw reference
//! - **Room never waits on a leg**: fan-out uses `try_send`; legs and dialogs
//!   await the room, so no request cycle can form
//! - **CancellationToken propagation**: each parent passes child tokens down
//! - **Timers as messages**: timer expiries re-enter the owning mailbox and are
//!   discarded when stale (see [`timer`])
//!
//! # Modules
//!
//! - [`controller`] - Entry point; focus selection and in-dialog routing
//! - [`focus`] - Per-room coordinator that owns the dialogs
//! - [`dialog`] - Per-call signaling state and conference subscriptions
//! - [`room`] - Room mixer: roster, nicknames, chat relay, recordings
//! - [`leg`] - Leg mixer: media session, keepalive, composing state
//! - [`mixer`] - Shared mixer contracts (control and feedback)
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics
//! - [`shared`] - Services handed to every actor
//! - [`timer`] - Cancellable, stale-safe one-shot timers

pub mod controller;
pub mod dialog;
pub mod focus;
pub mod leg;
pub mod messages;
pub mod metrics;
pub mod mixer;
pub mod room;
pub mod shared;
pub mod timer;

// Re-export primary types
pub use controller::{ConferenceControllerActor, ConferenceControllerHandle};
pub use dialog::{DialogActor, DialogActorHandle};
pub use focus::{select_room_name, FocusActor, FocusActorHandle};
pub use leg::{LegActor, LegActorHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use mixer::{MixerControl, MixerFeedback, MixerRole};
pub use room::{RoomActor, RoomActorHandle};
pub use shared::SharedServices;
