//! Conference Controller (CC) Library
//!
//! This library provides the core of the Dark Tower Conference Controller -
//! a text chat conferencing service where every room is reached through a
//! signaling address and every participant through one media session:
//!
//! - Focus selection: join requests are routed to the room's single focus,
//!   which is created on first use
//! - Per-call dialogs with conference-state subscriptions
//! - Room mixers that relay chat, enforce unique nicknames and publish the
//!   roster as a conference-info document
//! - Leg mixers that keep media sessions alive and track composing state
//! - Graceful shutdown through cancellation token propagation
//!
//! # Architecture
//!
//! ```text
//! ConferenceControllerActor (singleton per instance)
//! └── supervises N FocusActors (one per room name)
//!     ├── RoomActor (owns the roster)
//!     └── supervises N DialogActors (one per call)
//!         └── LegActor (owns one media session)
//! ```
//!
//! Signaling and media transports are supplied by the embedding process
//! through the [`collaborators`] traits.
//!
//! # Modules
//!
//! - [`actors`] - Actor model implementation
//! - [`collaborators`] - Signaling and media transport contracts (plus mocks)
//! - [`composing`] - Composing indication state machine
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types mapped to signaling status codes
//! - [`observability`] - Tracing setup and metric recorders
//! - [`presence`] - Conference-info document rendering
//! - [`registry`] - Shared naming registry for rooms, focuses and dialogs
//! - [`sdp`] - Session description helpers

pub mod actors;
pub mod collaborators;
pub mod composing;
pub mod config;
pub mod errors;
pub mod observability;
pub mod presence;
pub mod registry;
pub mod sdp;

pub use actors::ConferenceControllerHandle;
pub use config::Config;
pub use errors::CcError;
