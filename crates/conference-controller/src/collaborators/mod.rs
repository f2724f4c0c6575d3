//! External collaborator contracts.
//!
//! The controller never frames protocol messages itself. It drives a
//! [`SignalingEndpoint`] (accept, reply, answer, hang up, notify) and a
//! [`MediaTransport`] that opens one [`MediaSession`] per leg. Inbound
//! signaling arrives as [`InboundRequest`] values handed to the controller;
//! inbound media events arrive on the channel given to
//! [`MediaTransport::open`].
//!
//! Mock implementations live in `mock`, compiled for unit tests and behind
//! the `test-utils` feature for other crates.

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

use crate::composing::ComposeState;
use crate::errors::CcError;

use bytes::Bytes;
use std::fmt;
use tokio::sync::mpsc;

/// Event package accepted for conference state subscriptions.
pub const CONFERENCE_EVENT_PACKAGE: &str = "conference";

/// Content type of conference-info notification bodies.
pub const CONFERENCE_INFO_CONTENT_TYPE: &str = "application/conference-info+xml";

/// Content type of session descriptions.
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Wrapper type used for prompts sent to a participant.
pub const CPIM_WRAP_TYPE: &str = "message/cpim";

/// Opaque reference to a server transaction owned by the signaling endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionRef(pub String);

/// Opaque reference to a confirmed dialog owned by the signaling endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DialogRef(pub String);

impl fmt::Display for TransactionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for DialogRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A signaling identity such as `sip:alice@example.com`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityAddress {
    pub uri: String,
    pub display_name: Option<String>,
}

impl EntityAddress {
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            display_name: None,
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// User part of the URI: `sip:alpha@chat.example.com` → `alpha`.
    #[must_use]
    pub fn user_part(&self) -> &str {
        let uri = self.uri.trim().trim_start_matches('<').trim_end_matches('>');
        let without_scheme = match uri.split_once(':') {
            Some((scheme, rest)) if !scheme.contains('@') => rest,
            _ => uri,
        };
        let user = without_scheme
            .split_once('@')
            .map_or(without_scheme, |(user, _)| user);
        user.split(';').next().unwrap_or_default().trim()
    }
}

impl fmt::Display for EntityAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// Typed message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body {
    pub content_type: String,
    pub content: String,
}

impl Body {
    #[must_use]
    pub fn sdp(content: impl Into<String>) -> Self {
        Self {
            content_type: SDP_CONTENT_TYPE.to_string(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn conference_info(content: impl Into<String>) -> Self {
        Self {
            content_type: CONFERENCE_INFO_CONTENT_TYPE.to_string(),
            content: content.into(),
        }
    }
}

/// A response sent on a server transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: Option<Body>,
    /// Effective subscription lifetime, for subscribe responses.
    pub expires: Option<u32>,
}

impl Reply {
    #[must_use]
    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: None,
            expires: None,
        }
    }

    #[must_use]
    pub fn with_expires(mut self, expires: u32) -> Self {
        self.expires = Some(expires);
        self
    }
}

/// A conference state notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notify {
    pub event_package: String,
    pub event_id: Option<String>,
    /// `active;expires=N` or `terminated;reason=timeout`.
    pub subscription_state: String,
    pub body: Body,
}

/// Initial or re-delivered join request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteRequest {
    pub call_id: String,
    pub from: EntityAddress,
    pub to: EntityAddress,
    /// Session description offer.
    pub body: Option<String>,
    /// True when the request belongs to an already established dialog.
    pub in_dialog: bool,
}

/// Subscription to room state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub call_id: String,
    pub event_package: String,
    pub event_id: Option<String>,
    /// Requested lifetime in seconds; `None` means server default.
    pub expires: Option<u32>,
}

/// Inbound signaling events delivered to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundRequest {
    Invite(InviteRequest),
    Bye { call_id: String },
    Cancel { call_id: String },
    Subscribe(SubscribeRequest),
    /// The peer never confirmed the answer. Not a request: no transaction.
    DialogTimeout { call_id: String },
}

impl InboundRequest {
    #[must_use]
    pub fn call_id(&self) -> &str {
        match self {
            InboundRequest::Invite(invite) => &invite.call_id,
            InboundRequest::Subscribe(subscribe) => &subscribe.call_id,
            InboundRequest::Bye { call_id }
            | InboundRequest::Cancel { call_id }
            | InboundRequest::DialogTimeout { call_id } => call_id,
        }
    }

    /// Bounded label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            InboundRequest::Invite(_) => "invite",
            InboundRequest::Bye { .. } => "bye",
            InboundRequest::Cancel { .. } => "cancel",
            InboundRequest::Subscribe(_) => "subscribe",
            InboundRequest::DialogTimeout { .. } => "dialog_timeout",
        }
    }
}

/// Call-signaling transport.
#[async_trait::async_trait]
pub trait SignalingEndpoint: Send + Sync {
    /// Take ownership of an inbound request as a server transaction.
    async fn accept_request(&self, request: &InboundRequest) -> Result<TransactionRef, CcError>;

    /// Send a provisional or final response.
    async fn reply(&self, transaction: &TransactionRef, reply: Reply) -> Result<(), CcError>;

    /// Answer an invite with a success response and confirm the dialog.
    async fn answer(&self, transaction: &TransactionRef, body: Body) -> Result<DialogRef, CcError>;

    /// Hang up a confirmed dialog.
    async fn send_bye(&self, dialog: &DialogRef) -> Result<(), CcError>;

    /// Send a notification inside a dialog.
    async fn send_notify(&self, dialog: &DialogRef, notify: Notify) -> Result<(), CcError>;
}

/// Events raised by a media session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// Content arrived. Only `complete` units are relayed.
    ContentReceived {
        complete: bool,
        size: u64,
        content_type: String,
        content: Bytes,
    },
    /// Delivery report (also acknowledges keepalive probes).
    ReportReceived,
    /// Peer asked to use a nickname in the room.
    NicknameRequest { request_id: String, nickname: String },
    /// `isComposing` status from the peer.
    StatusUpdate {
        state: ComposeState,
        refresh_seconds: Option<u64>,
    },
    /// The underlying connection is gone.
    ConnectionLost,
}

/// Factory for relay sessions.
#[async_trait::async_trait]
pub trait MediaTransport: Send + Sync {
    /// Open a session for `connection_id`, negotiating against the remote
    /// description. Inbound events are delivered on `events`.
    async fn open(
        &self,
        connection_id: &str,
        remote_description: Option<&str>,
        events: mpsc::Sender<MediaEvent>,
    ) -> Result<Box<dyn MediaSession>, CcError>;
}

/// One open relay session.
#[async_trait::async_trait]
pub trait MediaSession: Send + Sync {
    /// Negotiated local description, if any.
    fn local_description(&self) -> Option<String>;

    async fn send(&self, content_type: &str, content: Bytes) -> Result<(), CcError>;

    async fn send_wrapped(
        &self,
        wrap_type: &str,
        from: &str,
        to: &str,
        content: Bytes,
    ) -> Result<(), CcError>;

    async fn send_nickname_result(&self, request_id: &str, status: u16) -> Result<(), CcError>;

    async fn close(&self) -> Result<(), CcError>;
}
