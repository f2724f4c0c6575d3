//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via
//! `tokio::sync::mpsc`. Request/reply uses `tokio::sync::oneshot`, and only
//! from outside the actor cycle or from a child towards the room; the room
//! never waits on a leg.

use crate::collaborators::{EntityAddress, InviteRequest, SubscribeRequest, TransactionRef};
use crate::composing::ComposeState;
use crate::errors::CcError;

use super::leg::LegActorHandle;

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// One roster entry. Replaced, never mutated, on every update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub entity: String,
    pub display_name: Option<String>,
    pub nickname: String,
    pub compose_state: ComposeState,
}

impl Participant {
    #[must_use]
    pub fn new(entity: &EntityAddress) -> Self {
        Self {
            entity: entity.uri.clone(),
            display_name: entity.display_name.clone(),
            nickname: String::new(),
            compose_state: ComposeState::Idle,
        }
    }
}

/// Point-in-time copy of a room's presence state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub conference_name: String,
    pub subject: String,
    /// Incremented on every roster change.
    pub version: u64,
    /// Ordered by connection id.
    pub participants: Vec<Participant>,
}

/// A chat message relayed through a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender_connection_id: String,
    pub sender_entity: String,
    pub sender_nickname: String,
    pub content_type: String,
    pub content: Bytes,
}

// ----------------------------------------------------------------------------
// Controller
// ----------------------------------------------------------------------------

/// Messages sent to `ConferenceControllerActor`.
#[derive(Debug)]
pub enum ControllerMessage {
    /// An inbound signaling request or event.
    Inbound {
        request: crate::collaborators::InboundRequest,
    },

    /// A join request handed back by a focus that was tearing down.
    Reroute {
        invite: InviteRequest,
        transaction: TransactionRef,
    },

    /// Get information about a room by name.
    GetRoom {
        room_name: String,
        respond_to: oneshot::Sender<Result<RoomInfo, CcError>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<ControllerStatus>,
    },

    /// Stop accepting joins and cancel all children.
    Shutdown {
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), CcError>>,
    },
}

/// Controller status (for health checks).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerStatus {
    pub focus_count: usize,
    pub room_count: usize,
    pub leg_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}

/// Information about a room, as seen from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub room_name: String,
    pub participant_count: usize,
    pub dialog_count: usize,
    pub created_at: i64,
}

// ----------------------------------------------------------------------------
// Focus
// ----------------------------------------------------------------------------

/// Messages sent to `FocusActor`.
#[derive(Debug)]
pub enum FocusMessage {
    /// A qualifying join request for this room (new or forwarded).
    Invite {
        invite: InviteRequest,
        transaction: TransactionRef,
    },

    /// The room finished `create_room`.
    RoomCreated,

    /// The room could not be created.
    RoomCreateFailed { reason: String },

    /// A dialog has fully released.
    LegDisconnected { call_id: String },

    GetStatus {
        respond_to: oneshot::Sender<FocusStatus>,
    },
}

/// Focus lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusState {
    /// Claiming the room name.
    Binding,
    /// Waiting for the room to report creation.
    CreatingRoom,
    /// Room exists; dialogs are added directly.
    Ready,
    /// Last dialog left; tearing down.
    Closing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusStatus {
    pub room_name: String,
    pub state: FocusState,
    pub dialog_count: usize,
    pub pending_invites: usize,
    pub created_at: i64,
}

// ----------------------------------------------------------------------------
// Room (mixer, room role)
// ----------------------------------------------------------------------------

/// Messages sent to `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// Bind the room under `seed` (or a generated id).
    CreateRoom {
        seed: Option<String>,
        respond_to: oneshot::Sender<Result<String, CcError>>,
    },

    SetConferenceName {
        name: String,
        respond_to: oneshot::Sender<Result<(), CcError>>,
    },

    SetSubject {
        subject: String,
        respond_to: oneshot::Sender<Result<(), CcError>>,
    },

    /// Fan prompt lines out to every linked leg.
    SendPrompts {
        lines: Vec<String>,
        respond_to: oneshot::Sender<Result<(), CcError>>,
    },

    /// A leg linked its media and wants fan-out.
    AttachLeg {
        connection_id: String,
        leg: LegActorHandle,
        respond_to: oneshot::Sender<Result<RoomSnapshot, CcError>>,
    },

    /// A leg is gone; drop its roster entry and sender.
    DetachLeg { connection_id: String },

    /// Upsert a roster entry and broadcast the roster.
    UpdateRoster {
        connection_id: String,
        participant: Participant,
    },

    /// Check nickname uniqueness and update the roster in one step.
    ClaimNickname {
        connection_id: String,
        nickname: String,
        respond_to: oneshot::Sender<Result<(), CcError>>,
    },

    /// Record and re-deliver a chat message to every attached leg.
    BroadcastChat(ChatMessage),

    GetSnapshot {
        respond_to: oneshot::Sender<Result<RoomSnapshot, CcError>>,
    },

    StartRecording {
        name: String,
        respond_to: oneshot::Sender<Result<(), CcError>>,
    },

    /// Stop a recording; replies with the bytes written (0 if unknown).
    StopRecording {
        name: String,
        respond_to: oneshot::Sender<u64>,
    },

    /// Unbind, detach all legs and stop.
    Disconnect { respond_to: oneshot::Sender<()> },
}

// ----------------------------------------------------------------------------
// Leg (mixer, leg role)
// ----------------------------------------------------------------------------

/// Leg timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegTimer {
    Keepalive,
    Composing,
}

/// Leg link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegState {
    /// Created, not yet linked.
    Start,
    Linked,
    /// Transport lost; the dialog decides teardown.
    Unlinked,
    /// Terminal.
    Stop,
}

/// Messages sent to `LegActor`.
#[derive(Debug)]
pub enum LegMessage {
    /// Open media against `remote_description` and attach to `room_id`.
    /// The outcome is reported to the dialog.
    CreateLeg {
        room_id: String,
        remote_description: Option<String>,
    },

    /// Record the member entity and upsert the roster.
    SetParticipant { entity: EntityAddress },

    SendPrompts {
        lines: Vec<String>,
        respond_to: oneshot::Sender<Result<(), CcError>>,
    },

    SetNickname {
        nickname: String,
        respond_to: oneshot::Sender<Result<(), CcError>>,
    },

    /// Render the room state and reply with the document.
    TriggerInfoNotification {
        respond_to: oneshot::Sender<Result<String, CcError>>,
    },

    /// Chat relayed by the room (includes this leg's own messages).
    Chat(Arc<ChatMessage>),

    /// Roster changed in the room.
    Roster(Arc<RoomSnapshot>),

    /// Prompt text fanned out by the room.
    Prompt(Arc<str>),

    TimerExpired { kind: LegTimer, seq: u64 },

    GetStatus {
        respond_to: oneshot::Sender<LegStatus>,
    },

    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegStatus {
    pub connection_id: String,
    pub state: LegState,
    pub compose_state: ComposeState,
    pub nickname: String,
    pub probe_outstanding: bool,
    pub keepalive_armed: bool,
    pub composing_armed: bool,
}

// ----------------------------------------------------------------------------
// Dialog
// ----------------------------------------------------------------------------

/// Dialog timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialogTimer {
    /// Forced release after a hangup.
    Grace,
    SubscriptionExpiry,
}

/// Call state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    /// Request accepted, ringing sent, media leg requested.
    Start,
    /// Media ready; answering.
    Early,
    Chatting,
    /// Teardown initiated.
    Stop,
    // Reserved; never entered.
    ConnModify,
    EarlyPrompt,
    Wait4Answer,
    HangupDelay,
}

impl DialogState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DialogState::Start => "start",
            DialogState::Early => "early",
            DialogState::Chatting => "chatting",
            DialogState::Stop => "stop",
            DialogState::ConnModify => "conn_modify",
            DialogState::EarlyPrompt => "early_prompt",
            DialogState::Wait4Answer => "wait4answer",
            DialogState::HangupDelay => "hangup_delay",
        }
    }
}

/// Messages sent to `DialogActor`.
#[derive(Debug)]
pub enum DialogMessage {
    /// Set up the call for a new participant of `room_id`.
    Setup {
        invite: InviteRequest,
        transaction: TransactionRef,
        room_id: String,
        respond_to: oneshot::Sender<Result<(), CcError>>,
    },

    Bye { transaction: TransactionRef },

    Cancel { transaction: TransactionRef },

    Subscribe {
        request: SubscribeRequest,
        transaction: TransactionRef,
    },

    /// The peer never confirmed the answer.
    DialogTimeout,

    MediaCreated { local_description: Option<String> },

    MediaCreateFailed { reason: String },

    MediaReleased,

    /// Rendered conference-info document from the leg.
    ConferenceNotification { document: String },

    TimerExpired { kind: DialogTimer, seq: u64 },

    /// Hang up and release (timed).
    Disconnect,

    GetStatus {
        respond_to: oneshot::Sender<DialogStatus>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogStatus {
    pub call_id: String,
    pub state: DialogState,
    pub subscribed: bool,
    pub answered: bool,
    pub grace_armed: bool,
}
