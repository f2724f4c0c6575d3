//! The dual-role mixer.
//!
//! A mixer is either a *room* ([`super::room::RoomActor`]: roster, fan-out,
//! recordings) or a *leg* ([`super::leg::LegActor`]: one participant's relay
//! session). Both are driven through [`MixerControl`] and report back to
//! their control agent through [`MixerFeedback`]. The control agent is a
//! required constructor argument of both actors.

use crate::collaborators::EntityAddress;
use crate::errors::CcError;

use super::metrics::MailboxMonitor;
use super::shared::SharedServices;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Which side of the conference a mixer serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerRole {
    Room,
    Leg,
}

impl MixerRole {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MixerRole::Room => "room",
            MixerRole::Leg => "leg",
        }
    }
}

/// Events a mixer reports to its control agent (focus for a room, dialog for
/// a leg). Delivery is a message send; implementations never block on the
/// agent's processing.
#[async_trait::async_trait]
pub trait MixerFeedback: Send + Sync {
    /// Creation finished. Legs pass their decorated local description.
    async fn create_complete(&self, local_description: Option<String>);

    async fn create_failed(&self, reason: String);

    /// The relay session is gone.
    async fn media_released(&self);

    /// A rendered conference-info document.
    async fn conference_notification(&self, document: String);
}

/// Operations common to both mixer roles.
#[async_trait::async_trait]
pub trait MixerControl: Send + Sync {
    fn role(&self) -> MixerRole;

    /// Send prompt lines as one message (room: to every linked leg).
    async fn send_prompts(&self, lines: Vec<String>) -> Result<(), CcError>;

    async fn set_conference_name(&self, name: String) -> Result<(), CcError>;

    async fn set_subject(&self, subject: String) -> Result<(), CcError>;

    /// Record the member entity of a leg. No-op on a room.
    async fn set_participant(&self, entity: EntityAddress) -> Result<(), CcError>;

    /// Render the current conference-info document for the caller.
    async fn trigger_info_notification(&self) -> Result<String, CcError>;

    /// Idempotent.
    async fn disconnect(&self) -> Result<(), CcError>;
}

/// Fields shared by both mixer actors.
pub struct MixerCore {
    /// Room id or connection id.
    pub id: String,
    pub role: MixerRole,
    pub conference_name: String,
    pub services: SharedServices,
    pub feedback: Arc<dyn MixerFeedback>,
    pub cancel_token: CancellationToken,
    pub mailbox: MailboxMonitor,
}

impl MixerCore {
    #[must_use]
    pub fn new(
        id: String,
        role: MixerRole,
        services: SharedServices,
        feedback: Arc<dyn MixerFeedback>,
        cancel_token: CancellationToken,
    ) -> Self {
        let actor_type = match role {
            MixerRole::Room => super::metrics::ActorType::Room,
            MixerRole::Leg => super::metrics::ActorType::Leg,
        };
        Self {
            mailbox: MailboxMonitor::new(actor_type, &id),
            id,
            role,
            conference_name: String::new(),
            services,
            feedback,
            cancel_token,
        }
    }
}

/// Join prompt lines into one message body, each line CRLF-terminated.
/// `None` for empty input.
#[must_use]
pub fn join_prompt_lines(lines: &[String]) -> Option<String> {
    if lines.is_empty() {
        return None;
    }
    let mut text = String::with_capacity(lines.iter().map(|line| line.len() + 2).sum());
    for line in lines {
        text.push_str(line);
        text.push_str("\r\n");
    }
    Some(text)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Control agent double for mixer unit tests.

    use super::MixerFeedback;
    use std::sync::{Mutex, PoisonError};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum FeedbackEvent {
        CreateComplete(Option<String>),
        CreateFailed(String),
        MediaReleased,
        Notification(String),
    }

    #[derive(Debug, Default)]
    pub struct RecordingFeedback {
        events: Mutex<Vec<FeedbackEvent>>,
    }

    impl RecordingFeedback {
        pub fn events(&self) -> Vec<FeedbackEvent> {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub fn count(&self, matches: impl Fn(&FeedbackEvent) -> bool) -> usize {
            self.events().iter().filter(|e| matches(e)).count()
        }

        fn push(&self, event: FeedbackEvent) {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event);
        }
    }

    #[async_trait::async_trait]
    impl MixerFeedback for RecordingFeedback {
        async fn create_complete(&self, local_description: Option<String>) {
            self.push(FeedbackEvent::CreateComplete(local_description));
        }

        async fn create_failed(&self, reason: String) {
            self.push(FeedbackEvent::CreateFailed(reason));
        }

        async fn media_released(&self) {
            self.push(FeedbackEvent::MediaReleased);
        }

        async fn conference_notification(&self, document: String) {
            self.push(FeedbackEvent::Notification(document));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_join_prompt_lines() {
        assert_eq!(join_prompt_lines(&[]), None);
        assert_eq!(
            join_prompt_lines(&["one".to_string(), "two".to_string()]),
            Some("one\r\ntwo\r\n".to_string())
        );
        assert_eq!(
            join_prompt_lines(&["only".to_string()]),
            Some("only\r\n".to_string())
        );
    }

    #[test]
    fn test_wrong_role_error_names_role() {
        assert_eq!(MixerRole::Leg.as_str(), "leg");
        assert_eq!(MixerRole::Room.as_str(), "room");
        let err = CcError::WrongRole(MixerRole::Leg.as_str());
        assert_eq!(err.status_code(), 400);
    }
}
