//! Pre-configured test data fixtures for conference testing.
//!
//! Provides builders for:
//! - Join requests (chat, non-chat and in-dialog offers)
//! - Conference subscriptions
//! - Session descriptions tagged with a marker so the media session opened
//!   for a given call can be found again

use conference_controller::collaborators::{
    EntityAddress, InboundRequest, InviteRequest, SubscribeRequest, CONFERENCE_EVENT_PACKAGE,
};
use uuid::Uuid;

/// Domain used for room and participant addresses.
pub const TEST_DOMAIN: &str = "chat.example.com";

/// Chat offer whose path carries `marker`.
#[must_use]
pub fn chat_offer(marker: &str) -> String {
    format!(
        "v=0\r\no=- 1 1 IN IP4 10.0.0.1\r\ns=-\r\nc=IN IP4 10.0.0.1\r\nt=0 0\r\nm=message 7394 TCP/MSRP *\r\na=accept-types:text/plain\r\na=path:msrp://10.0.0.1:7394/{marker};tcp\r\n"
    )
}

/// Audio-only offer, refused by the focus selector.
#[must_use]
pub fn audio_offer() -> String {
    "v=0\r\no=- 1 1 IN IP4 10.0.0.1\r\ns=-\r\nc=IN IP4 10.0.0.1\r\nt=0 0\r\nm=audio 49170 RTP/AVP 0\r\n"
        .to_string()
}

/// Address of room `name`.
#[must_use]
pub fn room_uri(name: &str) -> String {
    format!("sip:{name}@{TEST_DOMAIN}")
}

/// Join request builder.
///
/// Defaults to a chat offer tagged with the call id, from
/// `sip:<call_id>@example.com`.
#[derive(Debug, Clone)]
pub struct TestInvite {
    call_id: String,
    from: EntityAddress,
    to: String,
    body: Option<String>,
    in_dialog: bool,
}

impl TestInvite {
    /// Join request for `call_id` to room `room`.
    #[must_use]
    pub fn new(call_id: impl Into<String>, room: &str) -> Self {
        let call_id = call_id.into();
        Self {
            from: EntityAddress::new(format!("sip:{call_id}@example.com")),
            to: room_uri(room),
            body: Some(chat_offer(&call_id)),
            call_id,
            in_dialog: false,
        }
    }

    /// Join request with a random call id.
    #[must_use]
    pub fn random(room: &str) -> Self {
        Self::new(format!("call-{}", Uuid::new_v4()), room)
    }

    #[must_use]
    pub fn from(mut self, uri: impl Into<String>) -> Self {
        self.from = EntityAddress::new(uri);
        self
    }

    #[must_use]
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.from = self.from.with_display_name(name);
        self
    }

    /// Replace the destination URI verbatim.
    #[must_use]
    pub fn to_uri(mut self, uri: impl Into<String>) -> Self {
        self.to = uri.into();
        self
    }

    #[must_use]
    pub fn audio_only(mut self) -> Self {
        self.body = Some(audio_offer());
        self
    }

    #[must_use]
    pub fn without_offer(mut self) -> Self {
        self.body = None;
        self
    }

    #[must_use]
    pub fn in_dialog(mut self) -> Self {
        self.in_dialog = true;
        self
    }

    #[must_use]
    pub fn build(self) -> InviteRequest {
        InviteRequest {
            call_id: self.call_id,
            from: self.from,
            to: EntityAddress::new(self.to),
            body: self.body,
            in_dialog: self.in_dialog,
        }
    }

    #[must_use]
    pub fn into_request(self) -> InboundRequest {
        InboundRequest::Invite(self.build())
    }
}

/// Conference subscription builder.
#[derive(Debug, Clone)]
pub struct TestSubscribe {
    call_id: String,
    event_package: String,
    event_id: Option<String>,
    expires: Option<u32>,
}

impl TestSubscribe {
    /// Subscription to the conference package on `call_id`'s dialog.
    #[must_use]
    pub fn new(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            event_package: CONFERENCE_EVENT_PACKAGE.to_string(),
            event_id: None,
            expires: None,
        }
    }

    #[must_use]
    pub fn expires(mut self, seconds: u32) -> Self {
        self.expires = Some(seconds);
        self
    }

    #[must_use]
    pub fn event_id(mut self, id: impl Into<String>) -> Self {
        self.event_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn event_package(mut self, package: impl Into<String>) -> Self {
        self.event_package = package.into();
        self
    }

    #[must_use]
    pub fn into_request(self) -> InboundRequest {
        InboundRequest::Subscribe(SubscribeRequest {
            call_id: self.call_id,
            event_package: self.event_package,
            event_id: self.event_id,
            expires: self.expires,
        })
    }
}
