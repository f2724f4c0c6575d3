//! `LegActor` - the mixer in its leg role.
//!
//! Each `LegActor` owns one participant's relay session:
//!
//! ```text
//!   Start ──create_leg──▶ Linked ──connection lost──▶ Unlinked
//!     │                     │                            │
//!     └── create failed ────┴──────── disconnect ────────┴──▶ Stop
//! ```
//!
//! - Opens the session through the media transport and attaches to the room
//! - Relays complete inbound content to the room and room chat to the peer
//! - Runs the keepalive probe cycle and the composing refresh timer
//! - Reports `media created`, `media create failed`, `media released` and
//!   conference-info documents to its dialog

use crate::collaborators::{EntityAddress, MediaEvent, MediaSession, CPIM_WRAP_TYPE};
use crate::composing::{ComposingStateMachine, ComposingTransition, RefreshPolicy};
use crate::errors::{status, CcError};
use crate::observability::metrics::{self as prom, outcome};
use crate::presence::render_conference_info;
use crate::sdp;

use super::messages::{ChatMessage, LegMessage, LegState, LegStatus, LegTimer, Participant};
use super::mixer::{join_prompt_lines, MixerControl, MixerCore, MixerFeedback, MixerRole};
use super::room::RoomActorHandle;
use super::shared::SharedServices;
use super::timer::TimerSet;

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the leg mailbox.
const LEG_CHANNEL_BUFFER: usize = 200;

/// Buffer for inbound media events.
const MEDIA_EVENT_BUFFER: usize = 100;

/// Reason reported to the dialog for any creation failure.
pub const CREATE_FAILED_REASON: &str = "Could not create media stream";

/// Handle to a `LegActor`.
#[derive(Clone, Debug)]
pub struct LegActorHandle {
    connection_id: String,
    sender: mpsc::Sender<LegMessage>,
    cancel_token: CancellationToken,
}

impl LegActorHandle {
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> LegMessage,
    ) -> Result<T, CcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make(tx))
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    async fn notify(&self, message: LegMessage) -> Result<(), CcError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))
    }

    /// Open media and attach to `room_id`. The outcome is reported to the
    /// dialog as `create_complete` or `create_failed`.
    pub async fn create_leg(
        &self,
        room_id: String,
        remote_description: Option<String>,
    ) -> Result<(), CcError> {
        self.notify(LegMessage::CreateLeg {
            room_id,
            remote_description,
        })
        .await
    }

    /// Claim a nickname in the room.
    pub async fn set_nickname(&self, nickname: String) -> Result<(), CcError> {
        self.request(|respond_to| LegMessage::SetNickname {
            nickname,
            respond_to,
        })
        .await?
    }

    pub async fn get_status(&self) -> Result<LegStatus, CcError> {
        self.request(|respond_to| LegMessage::GetStatus { respond_to })
            .await
    }

    /// Non-blocking delivery used by the room for fan-out.
    pub(crate) fn try_deliver(
        &self,
        message: LegMessage,
    ) -> Result<(), mpsc::error::TrySendError<LegMessage>> {
        self.sender.try_send(message)
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    #[cfg(test)]
    pub(crate) fn from_channel(connection_id: &str, sender: mpsc::Sender<LegMessage>) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            sender,
            cancel_token: CancellationToken::new(),
        }
    }
}

#[async_trait::async_trait]
impl MixerControl for LegActorHandle {
    fn role(&self) -> MixerRole {
        MixerRole::Leg
    }

    async fn send_prompts(&self, lines: Vec<String>) -> Result<(), CcError> {
        self.request(|respond_to| LegMessage::SendPrompts { lines, respond_to })
            .await?
    }

    async fn set_conference_name(&self, _name: String) -> Result<(), CcError> {
        Err(CcError::WrongRole(MixerRole::Leg.as_str()))
    }

    async fn set_subject(&self, _subject: String) -> Result<(), CcError> {
        Err(CcError::WrongRole(MixerRole::Leg.as_str()))
    }

    async fn set_participant(&self, entity: EntityAddress) -> Result<(), CcError> {
        self.notify(LegMessage::SetParticipant { entity }).await
    }

    async fn trigger_info_notification(&self) -> Result<String, CcError> {
        self.request(|respond_to| LegMessage::TriggerInfoNotification { respond_to })
            .await?
    }

    async fn disconnect(&self) -> Result<(), CcError> {
        // A stopped leg is already disconnected.
        let _ = self.sender.send(LegMessage::Disconnect).await;
        Ok(())
    }
}

/// The `LegActor` implementation.
pub struct LegActor {
    core: MixerCore,
    receiver: mpsc::Receiver<LegMessage>,
    /// Own handle, given to the room on attach.
    handle: LegActorHandle,
    media_events: mpsc::Receiver<MediaEvent>,
    /// Handed to the transport on open.
    media_events_tx: Option<mpsc::Sender<MediaEvent>>,
    session: Option<Box<dyn MediaSession>>,
    room: Option<RoomActorHandle>,
    state: LegState,
    member: Option<EntityAddress>,
    nickname: String,
    composing: ComposingStateMachine,
    timers: TimerSet<LegTimer>,
    probe_outstanding: bool,
    /// Whether this leg is counted in the active legs gauge.
    counted: bool,
}

impl LegActor {
    /// Spawn a new leg reporting to `feedback` (its dialog).
    pub fn spawn(
        connection_id: String,
        feedback: Arc<dyn MixerFeedback>,
        services: SharedServices,
        cancel_token: CancellationToken,
    ) -> (LegActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(LEG_CHANNEL_BUFFER);
        let (media_tx, media_rx) = mpsc::channel(MEDIA_EVENT_BUFFER);

        let handle = LegActorHandle {
            connection_id: connection_id.clone(),
            sender,
            cancel_token: cancel_token.clone(),
        };
        let policy = RefreshPolicy::from_config(&services.config);

        let actor = Self {
            core: MixerCore::new(
                connection_id,
                MixerRole::Leg,
                services,
                feedback,
                cancel_token,
            ),
            receiver,
            handle: handle.clone(),
            media_events: media_rx,
            media_events_tx: Some(media_tx),
            session: None,
            room: None,
            state: LegState::Start,
            member: None,
            nickname: String::new(),
            composing: ComposingStateMachine::new(policy),
            timers: TimerSet::new(),
            probe_outstanding: false,
            counted: false,
        };

        let task_handle = tokio::spawn(actor.run());
        (handle, task_handle)
    }

    #[instrument(skip_all, name = "cc.actor.leg", fields(connection_id = %self.core.id))]
    async fn run(mut self) {
        debug!(target: "cc.actor.leg", connection_id = %self.core.id, "LegActor started");

        loop {
            tokio::select! {
                () = self.core.cancel_token.cancelled() => {
                    debug!(target: "cc.actor.leg", connection_id = %self.core.id, "LegActor cancelled");
                    self.disconnect().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    let Some(message) = msg else { break };
                    self.core.mailbox.record_enqueue();
                    let exit = self.handle_message(message).await;
                    self.core.mailbox.record_dequeue();
                    self.core.services.metrics.record_message_processed();
                    if exit {
                        break;
                    }
                }

                Some(event) = self.media_events.recv() => {
                    self.core.mailbox.record_enqueue();
                    self.handle_media_event(event).await;
                    self.core.mailbox.record_dequeue();
                    self.core.services.metrics.record_message_processed();
                }
            }
        }

        debug!(
            target: "cc.actor.leg",
            connection_id = %self.core.id,
            messages_processed = self.core.mailbox.messages_processed(),
            "LegActor stopped"
        );
    }

    /// Returns true when the actor must stop.
    async fn handle_message(&mut self, message: LegMessage) -> bool {
        match message {
            LegMessage::CreateLeg {
                room_id,
                remote_description,
            } => return self.create_leg(&room_id, remote_description).await,

            LegMessage::SetParticipant { entity } => {
                self.member = Some(entity);
                self.push_roster().await;
            }

            LegMessage::SendPrompts { lines, respond_to } => {
                let result = match join_prompt_lines(&lines) {
                    _ if self.state != LegState::Linked => Err(CcError::NotAttached),
                    Some(text) => self.send_prompt(text).await,
                    None => Ok(()),
                };
                let _ = respond_to.send(result);
            }

            LegMessage::SetNickname {
                nickname,
                respond_to,
            } => {
                let result = self.claim_nickname(&nickname).await;
                let _ = respond_to.send(result);
            }

            LegMessage::TriggerInfoNotification { respond_to } => {
                let result = self.render_info_document().await;
                let _ = respond_to.send(result);
            }

            LegMessage::Chat(message) => self.deliver_chat(&message).await,

            LegMessage::Roster(snapshot) => {
                if self.state == LegState::Linked {
                    match render_conference_info(&snapshot) {
                        Ok(document) => self.core.feedback.conference_notification(document).await,
                        Err(e) => warn!(
                            target: "cc.actor.leg",
                            connection_id = %self.core.id,
                            error = %e,
                            "Failed to render roster"
                        ),
                    }
                }
            }

            LegMessage::Prompt(text) => {
                if self.state == LegState::Linked {
                    if let Err(e) = self.send_prompt(text.to_string()).await {
                        warn!(
                            target: "cc.actor.leg",
                            connection_id = %self.core.id,
                            error = %e,
                            "Failed to deliver room prompt"
                        );
                    }
                }
            }

            LegMessage::TimerExpired { kind, seq } => {
                if self.timers.fire(kind, seq) {
                    return self.on_timer(kind).await;
                }
            }

            LegMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }

            LegMessage::Disconnect => {
                self.disconnect().await;
                return true;
            }
        }

        false
    }

    async fn create_leg(&mut self, room_id: &str, remote_description: Option<String>) -> bool {
        if self.state != LegState::Start {
            warn!(
                target: "cc.actor.leg",
                connection_id = %self.core.id,
                state = ?self.state,
                "Ignoring create_leg on an existing leg"
            );
            return false;
        }

        match self.link(room_id, remote_description).await {
            Ok(local_description) => {
                info!(
                    target: "cc.actor.leg",
                    connection_id = %self.core.id,
                    room = %room_id,
                    "Leg linked"
                );
                self.core
                    .feedback
                    .create_complete(Some(local_description))
                    .await;
                false
            }
            Err(e) => {
                warn!(
                    target: "cc.actor.leg",
                    connection_id = %self.core.id,
                    room = %room_id,
                    error = %e,
                    "Leg creation failed"
                );
                self.state = LegState::Stop;
                if let Some(session) = self.session.take() {
                    let _ = session.close().await;
                }
                self.core
                    .feedback
                    .create_failed(CREATE_FAILED_REASON.to_string())
                    .await;
                true
            }
        }
    }

    async fn link(
        &mut self,
        room_id: &str,
        remote_description: Option<String>,
    ) -> Result<String, CcError> {
        let room = self
            .core
            .services
            .registry
            .lookup_room(room_id)
            .ok_or_else(|| CcError::NotFound(format!("room {room_id}")))?;

        let events = self
            .media_events_tx
            .take()
            .ok_or_else(|| CcError::Internal("media already opened".to_string()))?;

        let session = self
            .core
            .services
            .transport
            .open(&self.core.id, remote_description.as_deref(), events)
            .await?;

        let local = session.local_description();
        self.session = Some(session);
        let local = local.ok_or_else(|| CcError::Collaborator("no local description".to_string()))?;
        let local_description = sdp::indicate_chatroom(&local)?;

        let snapshot = room
            .attach_leg(self.core.id.clone(), self.handle.clone())
            .await?;
        self.core.conference_name = snapshot.conference_name;
        self.room = Some(room);

        self.state = LegState::Linked;
        self.counted = true;
        self.core.services.metrics.leg_linked();
        let tick = self.core.services.config.keepalive_tick();
        self.arm(LegTimer::Keepalive, tick);

        Ok(local_description)
    }

    fn arm(&mut self, kind: LegTimer, after: Duration) {
        let mailbox = self.handle.sender.downgrade();
        self.timers
            .arm(kind, after, &mailbox, |kind, seq| LegMessage::TimerExpired {
                kind,
                seq,
            });
    }

    /// Returns true when the actor must stop.
    async fn on_timer(&mut self, kind: LegTimer) -> bool {
        match kind {
            LegTimer::Keepalive => {
                if self.state != LegState::Linked {
                    return false;
                }
                if self.probe_outstanding {
                    warn!(
                        target: "cc.actor.leg",
                        connection_id = %self.core.id,
                        "Keepalive probe unanswered, disconnecting"
                    );
                    self.disconnect().await;
                    return true;
                }

                if let Some(session) = &self.session {
                    if let Err(e) = session.send("text/plain", Bytes::new()).await {
                        warn!(
                            target: "cc.actor.leg",
                            connection_id = %self.core.id,
                            error = %e,
                            "Keepalive probe send failed"
                        );
                    }
                }
                self.probe_outstanding = true;
                let window = self.core.services.config.keepalive_probe_window();
                self.arm(LegTimer::Keepalive, window);
            }
            LegTimer::Composing => {
                if self.composing.on_refresh_expired() {
                    debug!(
                        target: "cc.actor.leg",
                        connection_id = %self.core.id,
                        "Composing refresh expired"
                    );
                    self.push_roster().await;
                }
            }
        }
        false
    }

    async fn handle_media_event(&mut self, event: MediaEvent) {
        if self.state == LegState::Stop {
            return;
        }
        self.probe_outstanding = false;

        match event {
            MediaEvent::ContentReceived {
                complete,
                size,
                content_type,
                content,
            } => {
                if !complete || content.is_empty() {
                    return;
                }
                debug!(
                    target: "cc.actor.leg",
                    connection_id = %self.core.id,
                    size,
                    "Content received"
                );
                if self.composing.end_active() {
                    self.timers.cancel(LegTimer::Composing);
                    self.push_roster().await;
                }
                if let Some(room) = &self.room {
                    let message = ChatMessage {
                        sender_connection_id: self.core.id.clone(),
                        sender_entity: self
                            .member
                            .as_ref()
                            .map(|m| m.uri.clone())
                            .unwrap_or_default(),
                        sender_nickname: self.nickname.clone(),
                        content_type,
                        content,
                    };
                    if let Err(e) = room.broadcast_chat(message).await {
                        warn!(
                            target: "cc.actor.leg",
                            connection_id = %self.core.id,
                            error = %e,
                            "Failed to relay chat to room"
                        );
                    }
                }
            }

            MediaEvent::ReportReceived => {}

            MediaEvent::NicknameRequest {
                request_id,
                nickname,
            } => {
                let status = match self.claim_nickname(&nickname).await {
                    Ok(()) => status::OK,
                    Err(e) => e.status_code(),
                };
                if let Some(session) = &self.session {
                    if let Err(e) = session.send_nickname_result(&request_id, status).await {
                        warn!(
                            target: "cc.actor.leg",
                            connection_id = %self.core.id,
                            error = %e,
                            "Failed to send nickname result"
                        );
                    }
                }
            }

            MediaEvent::StatusUpdate {
                state,
                refresh_seconds,
            } => match self.composing.on_status_update(state, refresh_seconds) {
                ComposingTransition::Unchanged => {}
                ComposingTransition::Rearm(refresh) => self.arm(LegTimer::Composing, refresh),
                ComposingTransition::Changed { refresh, .. } => {
                    match refresh {
                        Some(refresh) => self.arm(LegTimer::Composing, refresh),
                        None => {
                            self.timers.cancel(LegTimer::Composing);
                        }
                    }
                    self.push_roster().await;
                }
            },

            MediaEvent::ConnectionLost => {
                if self.state == LegState::Linked {
                    info!(
                        target: "cc.actor.leg",
                        connection_id = %self.core.id,
                        "Connection lost"
                    );
                    self.state = LegState::Unlinked;
                    self.timers.cancel_all();
                    self.core.feedback.media_released().await;
                }
            }
        }
    }

    async fn claim_nickname(&mut self, nickname: &str) -> Result<(), CcError> {
        if self.member.is_none() {
            prom::record_nickname_request(outcome::REJECTED);
            return Err(CcError::InvalidRequest(
                "No member identity for nickname".to_string(),
            ));
        }
        let room = self.room.as_ref().ok_or(CcError::NotAttached)?;
        room.claim_nickname(self.core.id.clone(), nickname.to_string())
            .await?;
        nickname.trim().clone_into(&mut self.nickname);
        Ok(())
    }

    /// Rendered for the requesting dialog; the reply carries the document
    /// so the dialog never waits on its own mailbox.
    async fn render_info_document(&self) -> Result<String, CcError> {
        let room = self.room.as_ref().ok_or(CcError::NotAttached)?;
        let snapshot = room.get_snapshot().await?;
        render_conference_info(&snapshot)
    }

    async fn send_prompt(&self, text: String) -> Result<(), CcError> {
        let session = self.session.as_ref().ok_or(CcError::NotAttached)?;
        let to = self
            .member
            .as_ref()
            .map(|m| m.uri.as_str())
            .unwrap_or_default();
        session
            .send_wrapped(
                CPIM_WRAP_TYPE,
                &self.core.conference_name,
                to,
                Bytes::from(text),
            )
            .await
    }

    async fn deliver_chat(&self, message: &ChatMessage) {
        if self.state != LegState::Linked || message.sender_connection_id == self.core.id {
            return;
        }
        if let Some(session) = &self.session {
            if let Err(e) = session
                .send(&message.content_type, message.content.clone())
                .await
            {
                warn!(
                    target: "cc.actor.leg",
                    connection_id = %self.core.id,
                    error = %e,
                    "Failed to deliver chat"
                );
            }
        }
    }

    async fn push_roster(&self) {
        let (Some(room), Some(member)) = (&self.room, &self.member) else {
            return;
        };
        let participant = Participant {
            entity: member.uri.clone(),
            display_name: member.display_name.clone(),
            nickname: self.nickname.clone(),
            compose_state: self.composing.state(),
        };
        if let Err(e) = room.update_roster(self.core.id.clone(), participant).await {
            warn!(
                target: "cc.actor.leg",
                connection_id = %self.core.id,
                error = %e,
                "Failed to update roster"
            );
        }
    }

    fn status(&self) -> LegStatus {
        LegStatus {
            connection_id: self.core.id.clone(),
            state: self.state,
            compose_state: self.composing.state(),
            nickname: self.nickname.clone(),
            probe_outstanding: self.probe_outstanding,
            keepalive_armed: self.timers.is_armed(LegTimer::Keepalive),
            composing_armed: self.timers.is_armed(LegTimer::Composing),
        }
    }

    /// Close the session, leave the room and report `media released`.
    /// Idempotent.
    async fn disconnect(&mut self) {
        if self.state == LegState::Stop {
            return;
        }
        self.state = LegState::Stop;
        self.timers.cancel_all();

        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!(
                    target: "cc.actor.leg",
                    connection_id = %self.core.id,
                    error = %e,
                    "Failed to close media session"
                );
            }
        }

        if let Some(room) = self.room.take() {
            if let Err(e) = room.detach_leg(self.core.id.clone()).await {
                debug!(
                    target: "cc.actor.leg",
                    connection_id = %self.core.id,
                    error = %e,
                    "Room already gone on detach"
                );
            }
        }

        if self.counted {
            self.counted = false;
            self.core.services.metrics.leg_closed();
        }

        self.core.feedback.media_released().await;
        info!(target: "cc.actor.leg", connection_id = %self.core.id, "Leg disconnected");
    }
}
