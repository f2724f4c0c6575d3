//! Conference Controller error types.
//!
//! Error types map to the signaling status codes sent back to the peer.
//! Internal details are logged server-side but not exposed to clients.

use thiserror::Error;

/// Signaling status codes used by the controller.
pub mod status {
    /// Provisional response sent while the media leg is being created.
    pub const RINGING: u16 = 180;
    /// Success.
    pub const OK: u16 = 200;
    /// Malformed or unsupported request.
    pub const BAD_REQUEST: u16 = 400;
    /// Unknown room or participant.
    pub const NOT_FOUND: u16 = 404;
    /// No confirmation within the expected window.
    pub const REQUEST_TIMEOUT: u16 = 408;
    /// Duplicate room bind, duplicate recording.
    pub const CONFLICT: u16 = 409;
    /// Nickname already taken in the room.
    pub const NICKNAME_IN_USE: u16 = 425;
    /// In-dialog request for a dialog that no longer exists.
    pub const CALL_DOES_NOT_EXIST: u16 = 481;
    /// Pending invite terminated by a hangup or cancel.
    pub const REQUEST_TERMINATED: u16 = 487;
    /// Offer without a chat-capable media line.
    pub const NOT_ACCEPTABLE_HERE: u16 = 488;
    /// Subscription to an unsupported event package.
    pub const BAD_EVENT: u16 = 489;
    /// Unexpected failure.
    pub const SERVER_INTERNAL_ERROR: u16 = 500;
    /// Room or media could not be created.
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}

/// Conference Controller error type.
///
/// Maps to signaling status codes:
/// - `InvalidRequest`, `WrongRole`, `NotAttached`: `400`
/// - `NotFound`: `404`
/// - `ProtocolTimeout`: `408`
/// - `Conflict`, `AlreadyBound`, `AlreadyRecording`: `409`
/// - `NicknameConflict`: `425`
/// - `NotChatCapable`: `488`
/// - `BadEvent`: `489`
/// - `Internal`, `Recording`: `500`
/// - `MissingRoomName`, `Collaborator`, `Draining`: `503`
#[derive(Debug, Error)]
pub enum CcError {
    /// Malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The join offer carries no chat media line.
    #[error("Offer is not chat capable")]
    NotChatCapable,

    /// The destination address has no room name.
    #[error("Missing room name")]
    MissingRoomName,

    /// Subscription for an event package other than `conference`.
    #[error("Unsupported event package: {0}")]
    BadEvent(String),

    /// Generic conflict (e.g., room created twice).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A registry key is already bound.
    #[error("Already bound: {0}")]
    AlreadyBound(String),

    /// Nickname already held by another participant in the room.
    #[error("Nickname in use: {0}")]
    NicknameConflict(String),

    /// A recording with this name is already running.
    #[error("Already recording: {0}")]
    AlreadyRecording(String),

    /// Operation not valid for this mixer role.
    #[error("Operation not supported on {0} mixer")]
    WrongRole(&'static str),

    /// The mixer is not linked to a room yet.
    #[error("Mixer not attached to a room")]
    NotAttached,

    /// Room, dialog or leg not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Signaling or media collaborator failed.
    #[error("Collaborator failure: {0}")]
    Collaborator(String),

    /// The peer did not confirm within the expected window.
    #[error("Protocol timeout: {0}")]
    ProtocolTimeout(String),

    /// Recording sink I/O failed.
    #[error("Recording error: {0}")]
    Recording(String),

    /// Controller is shutting down.
    #[error("Controller is draining")]
    Draining,

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CcError {
    /// Returns the signaling status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            CcError::InvalidRequest(_) | CcError::WrongRole(_) | CcError::NotAttached => {
                status::BAD_REQUEST
            }
            CcError::NotFound(_) => status::NOT_FOUND,
            CcError::ProtocolTimeout(_) => status::REQUEST_TIMEOUT,
            CcError::Conflict(_) | CcError::AlreadyBound(_) | CcError::AlreadyRecording(_) => {
                status::CONFLICT
            }
            CcError::NicknameConflict(_) => status::NICKNAME_IN_USE,
            CcError::NotChatCapable => status::NOT_ACCEPTABLE_HERE,
            CcError::BadEvent(_) => status::BAD_EVENT,
            CcError::Internal(_) | CcError::Recording(_) => status::SERVER_INTERNAL_ERROR,
            CcError::MissingRoomName | CcError::Collaborator(_) | CcError::Draining => {
                status::SERVICE_UNAVAILABLE
            }
        }
    }

    /// Returns a bounded label for metrics.
    #[must_use]
    pub fn error_type_label(&self) -> &'static str {
        match self {
            CcError::InvalidRequest(_) => "invalid_request",
            CcError::NotChatCapable => "not_chat_capable",
            CcError::MissingRoomName => "missing_room_name",
            CcError::BadEvent(_) => "bad_event",
            CcError::Conflict(_) => "conflict",
            CcError::AlreadyBound(_) => "already_bound",
            CcError::NicknameConflict(_) => "nickname_conflict",
            CcError::AlreadyRecording(_) => "already_recording",
            CcError::WrongRole(_) => "wrong_role",
            CcError::NotAttached => "not_attached",
            CcError::NotFound(_) => "not_found",
            CcError::Collaborator(_) => "collaborator",
            CcError::ProtocolTimeout(_) => "protocol_timeout",
            CcError::Recording(_) => "recording",
            CcError::Draining => "draining",
            CcError::Internal(_) => "internal",
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            CcError::Internal(_) | CcError::Recording(_) => "An internal error occurred".to_string(),
            CcError::Collaborator(_) => "Could not create media stream".to_string(),
            CcError::NotChatCapable => "Only chat sessions are supported".to_string(),
            CcError::MissingRoomName => "No room name in request".to_string(),
            CcError::Draining => "Server is shutting down, please retry".to_string(),
            CcError::NicknameConflict(_) => "Nickname already in use".to_string(),
            CcError::NotFound(_) => "Not found".to_string(),
            CcError::ProtocolTimeout(_) => "Request timed out".to_string(),
            CcError::BadEvent(_) => "Unsupported event package".to_string(),
            CcError::InvalidRequest(msg) | CcError::Conflict(msg) => msg.clone(),
            CcError::AlreadyBound(_) | CcError::AlreadyRecording(_) => "Already exists".to_string(),
            CcError::WrongRole(_) | CcError::NotAttached => "Operation not allowed".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(CcError::InvalidRequest("x".into()).status_code(), 400);
        assert_eq!(CcError::NotAttached.status_code(), 400);
        assert_eq!(CcError::WrongRole("leg").status_code(), 400);
        assert_eq!(CcError::NotFound("alpha".into()).status_code(), 404);
        assert_eq!(CcError::ProtocolTimeout("ack".into()).status_code(), 408);
        assert_eq!(CcError::AlreadyBound("room:alpha".into()).status_code(), 409);
        assert_eq!(CcError::NicknameConflict("bob".into()).status_code(), 425);
        assert_eq!(CcError::NotChatCapable.status_code(), 488);
        assert_eq!(CcError::BadEvent("presence".into()).status_code(), 489);
        assert_eq!(CcError::Internal("boom".into()).status_code(), 500);
        assert_eq!(CcError::MissingRoomName.status_code(), 503);
        assert_eq!(CcError::Collaborator("open".into()).status_code(), 503);
        assert_eq!(CcError::Draining.status_code(), 503);
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = CcError::Internal("channel send failed: closed".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = CcError::Collaborator("tcp reset by 10.0.0.7".to_string());
        assert!(!err.client_message().contains("10.0.0.7"));

        let err = CcError::Recording("/var/chat/alpha.log: permission denied".to_string());
        assert!(!err.client_message().contains("/var/chat"));
    }

    #[test]
    fn test_client_message_passes_through_request_errors() {
        let err = CcError::InvalidRequest("re-invite not supported".to_string());
        assert_eq!(err.client_message(), "re-invite not supported");
    }

    #[test]
    fn test_error_type_labels_are_distinct() {
        let errors = [
            CcError::InvalidRequest(String::new()),
            CcError::NotChatCapable,
            CcError::MissingRoomName,
            CcError::BadEvent(String::new()),
            CcError::Conflict(String::new()),
            CcError::AlreadyBound(String::new()),
            CcError::NicknameConflict(String::new()),
            CcError::AlreadyRecording(String::new()),
            CcError::WrongRole("room"),
            CcError::NotAttached,
            CcError::NotFound(String::new()),
            CcError::Collaborator(String::new()),
            CcError::ProtocolTimeout(String::new()),
            CcError::Recording(String::new()),
            CcError::Draining,
            CcError::Internal(String::new()),
        ];
        let labels: std::collections::HashSet<_> =
            errors.iter().map(CcError::error_type_label).collect();
        assert_eq!(labels.len(), errors.len());
    }

    #[test]
    fn test_display() {
        let err = CcError::NicknameConflict("Bob".to_string());
        assert_eq!(format!("{err}"), "Nickname in use: Bob");

        let err = CcError::WrongRole("leg");
        assert_eq!(format!("{err}"), "Operation not supported on leg mixer");
    }
}
