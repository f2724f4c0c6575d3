//! `RoomActor` - the mixer in its room role.
//!
//! Each `RoomActor`:
//! - Is bound in the registry as `room:{id}` for its whole active life
//! - Owns the roster (connection id → [`Participant`]) and the set of attached
//!   legs used for fan-out
//! - Relays chat to every attached leg and appends it to open recordings
//! - Never waits on a leg: fan-out uses `try_send` and counts drops
//!
//! Creation is reported twice: synchronously to the caller of
//! [`RoomActorHandle::create_room`] and asynchronously to the focus through
//! [`MixerFeedback`].

use crate::collaborators::EntityAddress;
use crate::errors::CcError;
use crate::observability::metrics::{self as prom, outcome};

use super::leg::LegActorHandle;
use super::messages::{ChatMessage, LegMessage, Participant, RoomMessage, RoomSnapshot};
use super::mixer::{join_prompt_lines, MixerControl, MixerCore, MixerFeedback, MixerRole};
use super::shared::SharedServices;

use quick_xml::escape::escape;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
}

impl RoomActorHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RoomMessage,
    ) -> Result<T, CcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make(tx))
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    async fn notify(&self, message: RoomMessage) -> Result<(), CcError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))
    }

    /// Bind the room and make it active. Returns the room id.
    ///
    /// Fails with `Conflict` if this room was already created.
    pub async fn create_room(&self, seed: Option<String>) -> Result<String, CcError> {
        self.request(|respond_to| RoomMessage::CreateRoom { seed, respond_to })
            .await?
    }

    /// Attach a linked leg for fan-out. Returns the current snapshot.
    pub async fn attach_leg(
        &self,
        connection_id: String,
        leg: LegActorHandle,
    ) -> Result<RoomSnapshot, CcError> {
        self.request(|respond_to| RoomMessage::AttachLeg {
            connection_id,
            leg,
            respond_to,
        })
        .await?
    }

    pub async fn detach_leg(&self, connection_id: String) -> Result<(), CcError> {
        self.notify(RoomMessage::DetachLeg { connection_id }).await
    }

    pub async fn update_roster(
        &self,
        connection_id: String,
        participant: Participant,
    ) -> Result<(), CcError> {
        self.notify(RoomMessage::UpdateRoster {
            connection_id,
            participant,
        })
        .await
    }

    /// Take `nickname` for `connection_id`, unless another participant holds
    /// it (case-insensitive).
    pub async fn claim_nickname(
        &self,
        connection_id: String,
        nickname: String,
    ) -> Result<(), CcError> {
        self.request(|respond_to| RoomMessage::ClaimNickname {
            connection_id,
            nickname,
            respond_to,
        })
        .await?
    }

    pub async fn broadcast_chat(&self, message: ChatMessage) -> Result<(), CcError> {
        self.notify(RoomMessage::BroadcastChat(message)).await
    }

    pub async fn get_snapshot(&self) -> Result<RoomSnapshot, CcError> {
        self.request(|respond_to| RoomMessage::GetSnapshot { respond_to })
            .await?
    }

    /// Start appending chat to the recording sink `name`.
    pub async fn start_recording(&self, name: String) -> Result<(), CcError> {
        self.request(|respond_to| RoomMessage::StartRecording { name, respond_to })
            .await?
    }

    /// Stop the recording `name`. Returns bytes written, 0 if unknown.
    pub async fn stop_recording(&self, name: String) -> Result<u64, CcError> {
        self.request(|respond_to| RoomMessage::StopRecording { name, respond_to })
            .await
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[async_trait::async_trait]
impl MixerControl for RoomActorHandle {
    fn role(&self) -> MixerRole {
        MixerRole::Room
    }

    async fn send_prompts(&self, lines: Vec<String>) -> Result<(), CcError> {
        self.request(|respond_to| RoomMessage::SendPrompts { lines, respond_to })
            .await?
    }

    async fn set_conference_name(&self, name: String) -> Result<(), CcError> {
        self.request(|respond_to| RoomMessage::SetConferenceName { name, respond_to })
            .await?
    }

    async fn set_subject(&self, subject: String) -> Result<(), CcError> {
        self.request(|respond_to| RoomMessage::SetSubject {
            subject,
            respond_to,
        })
        .await?
    }

    async fn set_participant(&self, _entity: EntityAddress) -> Result<(), CcError> {
        Ok(())
    }

    async fn trigger_info_notification(&self) -> Result<String, CcError> {
        Err(CcError::WrongRole(MixerRole::Room.as_str()))
    }

    async fn disconnect(&self) -> Result<(), CcError> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(RoomMessage::Disconnect { respond_to: tx })
            .await
            .is_err()
        {
            // Already stopped.
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoomState {
    /// Spawned, not bound.
    Idle,
    Active,
    Closed,
}

struct RecordingSink {
    file: File,
    path: PathBuf,
    bytes_written: u64,
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    core: MixerCore,
    receiver: mpsc::Receiver<RoomMessage>,
    /// Own handle, bound in the registry on creation.
    handle: RoomActorHandle,
    state: RoomState,
    subject: String,
    roster: BTreeMap<String, Participant>,
    legs: HashMap<String, LegActorHandle>,
    recordings: HashMap<String, RecordingSink>,
    version: u64,
}

impl RoomActor {
    /// Spawn a new, unbound room. `label` names it in logs until bound.
    pub fn spawn(
        label: String,
        feedback: Arc<dyn MixerFeedback>,
        services: SharedServices,
        cancel_token: CancellationToken,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let handle = RoomActorHandle {
            sender,
            cancel_token: cancel_token.clone(),
        };

        let actor = Self {
            core: MixerCore::new(label, MixerRole::Room, services, feedback, cancel_token),
            receiver,
            handle: handle.clone(),
            state: RoomState::Idle,
            subject: String::new(),
            roster: BTreeMap::new(),
            legs: HashMap::new(),
            recordings: HashMap::new(),
            version: 0,
        };

        let task_handle = tokio::spawn(actor.run());
        (handle, task_handle)
    }

    #[instrument(skip_all, name = "cc.actor.room", fields(room = %self.core.id))]
    async fn run(mut self) {
        debug!(target: "cc.actor.room", room = %self.core.id, "RoomActor started");

        loop {
            tokio::select! {
                () = self.core.cancel_token.cancelled() => {
                    debug!(target: "cc.actor.room", room = %self.core.id, "RoomActor cancelled");
                    self.teardown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.core.mailbox.record_enqueue();
                            let exit = self.handle_message(message).await;
                            self.core.mailbox.record_dequeue();
                            self.core.services.metrics.record_message_processed();
                            if exit {
                                break;
                            }
                        }
                        None => {
                            self.teardown().await;
                            break;
                        }
                    }
                }
            }
        }

        debug!(
            target: "cc.actor.room",
            room = %self.core.id,
            messages_processed = self.core.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    /// Returns true when the actor must stop.
    async fn handle_message(&mut self, message: RoomMessage) -> bool {
        match message {
            RoomMessage::CreateRoom { seed, respond_to } => {
                let result = self.create_room(seed);
                let report = result
                    .as_ref()
                    .map(|_| ())
                    .map_err(ToString::to_string);
                let _ = respond_to.send(result);
                match report {
                    Ok(()) => self.core.feedback.create_complete(None).await,
                    Err(reason) => self.core.feedback.create_failed(reason).await,
                }
            }

            RoomMessage::SetConferenceName { name, respond_to } => {
                self.core.conference_name = name;
                self.broadcast_roster();
                let _ = respond_to.send(Ok(()));
            }

            RoomMessage::SetSubject {
                subject,
                respond_to,
            } => {
                self.subject = subject;
                self.broadcast_roster();
                let _ = respond_to.send(Ok(()));
            }

            RoomMessage::SendPrompts { lines, respond_to } => {
                let _ = respond_to.send(self.send_prompts(&lines));
            }

            RoomMessage::AttachLeg {
                connection_id,
                leg,
                respond_to,
            } => {
                let result = if self.state == RoomState::Active {
                    self.legs.insert(connection_id.clone(), leg);
                    debug!(
                        target: "cc.actor.room",
                        room = %self.core.id,
                        connection_id = %connection_id,
                        legs = self.legs.len(),
                        "Leg attached"
                    );
                    Ok(self.snapshot())
                } else {
                    Err(CcError::NotAttached)
                };
                let _ = respond_to.send(result);
            }

            RoomMessage::DetachLeg { connection_id } => {
                self.legs.remove(&connection_id);
                if self.roster.remove(&connection_id).is_some() {
                    self.broadcast_roster();
                }
                debug!(
                    target: "cc.actor.room",
                    room = %self.core.id,
                    connection_id = %connection_id,
                    legs = self.legs.len(),
                    "Leg detached"
                );
            }

            RoomMessage::UpdateRoster {
                connection_id,
                participant,
            } => {
                self.update_roster(connection_id, participant);
            }

            RoomMessage::ClaimNickname {
                connection_id,
                nickname,
                respond_to,
            } => {
                let result = self.claim_nickname(&connection_id, &nickname);
                let _ = respond_to.send(result);
            }

            RoomMessage::BroadcastChat(message) => {
                self.broadcast_chat(message).await;
            }

            RoomMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(Ok(self.snapshot()));
            }

            RoomMessage::StartRecording { name, respond_to } => {
                let result = self.start_recording(name).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::StopRecording { name, respond_to } => {
                let bytes = self.stop_recording(&name).await;
                let _ = respond_to.send(bytes);
            }

            RoomMessage::Disconnect { respond_to } => {
                self.teardown().await;
                let _ = respond_to.send(());
                return true;
            }
        }

        false
    }

    fn create_room(&mut self, seed: Option<String>) -> Result<String, CcError> {
        if self.state != RoomState::Idle {
            return Err(CcError::Conflict("Room already created".to_string()));
        }

        let room_id = seed
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        self.core
            .services
            .registry
            .bind_room(&room_id, self.handle.clone())?;

        self.core.id.clone_from(&room_id);
        self.state = RoomState::Active;
        self.core.services.metrics.room_created();

        info!(target: "cc.actor.room", room = %room_id, "Room created");
        Ok(room_id)
    }

    fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.core.id.clone(),
            conference_name: self.core.conference_name.clone(),
            subject: self.subject.clone(),
            version: self.version,
            participants: self.roster.values().cloned().collect(),
        }
    }

    fn fan_out(&self, make: impl Fn() -> LegMessage) {
        for (connection_id, leg) in &self.legs {
            if leg.try_deliver(make()).is_err() {
                debug!(
                    target: "cc.actor.room",
                    room = %self.core.id,
                    connection_id = %connection_id,
                    "Fan-out to leg failed"
                );
                self.core.mailbox.record_drop();
            }
        }
    }

    fn broadcast_roster(&mut self) {
        self.version = self.version.wrapping_add(1);
        if self.legs.is_empty() {
            return;
        }
        let snapshot = Arc::new(self.snapshot());
        self.fan_out(|| LegMessage::Roster(Arc::clone(&snapshot)));
    }

    fn update_roster(&mut self, connection_id: String, participant: Participant) {
        if !self.legs.contains_key(&connection_id) {
            debug!(
                target: "cc.actor.room",
                room = %self.core.id,
                connection_id = %connection_id,
                "Ignoring roster update from detached leg"
            );
            return;
        }
        if self.roster.get(&connection_id) == Some(&participant) {
            return;
        }
        self.roster.insert(connection_id, participant);
        self.broadcast_roster();
    }

    fn claim_nickname(&mut self, connection_id: &str, nickname: &str) -> Result<(), CcError> {
        let nickname = nickname.trim();
        if nickname.is_empty() {
            prom::record_nickname_request(outcome::REJECTED);
            return Err(CcError::InvalidRequest("Empty nickname".to_string()));
        }

        let wanted = nickname.to_lowercase();
        let taken = self
            .roster
            .iter()
            .any(|(id, p)| id != connection_id && p.nickname.to_lowercase() == wanted);
        if taken {
            prom::record_nickname_request(outcome::CONFLICT);
            return Err(CcError::NicknameConflict(nickname.to_string()));
        }

        let Some(current) = self.roster.get(connection_id) else {
            prom::record_nickname_request(outcome::REJECTED);
            return Err(CcError::NotFound("participant".to_string()));
        };

        let updated = Participant {
            nickname: nickname.to_string(),
            ..current.clone()
        };
        self.roster.insert(connection_id.to_string(), updated);
        self.broadcast_roster();
        prom::record_nickname_request(outcome::ACCEPTED);
        Ok(())
    }

    fn send_prompts(&self, lines: &[String]) -> Result<(), CcError> {
        if self.state != RoomState::Active {
            return Err(CcError::NotAttached);
        }
        let Some(text) = join_prompt_lines(lines) else {
            return Ok(());
        };
        let text: Arc<str> = Arc::from(text);
        self.fan_out(|| LegMessage::Prompt(Arc::clone(&text)));
        Ok(())
    }

    async fn broadcast_chat(&mut self, message: ChatMessage) {
        if self.state != RoomState::Active {
            return;
        }

        if !self.recordings.is_empty() {
            let line = recording_line(&message);
            let mut failed = Vec::new();
            for (name, sink) in &mut self.recordings {
                let written = async {
                    sink.file.write_all(line.as_bytes()).await?;
                    sink.file.flush().await
                }
                .await;
                match written {
                    Ok(()) => sink.bytes_written += line.len() as u64,
                    Err(e) => {
                        warn!(
                            target: "cc.actor.room",
                            room = %self.core.id,
                            recording = %name,
                            error = %e,
                            "Recording write failed, closing sink"
                        );
                        failed.push(name.clone());
                    }
                }
            }
            for name in failed {
                self.recordings.remove(&name);
            }
        }

        debug!(
            target: "cc.actor.room",
            room = %self.core.id,
            connection_id = %message.sender_connection_id,
            size = message.content.len(),
            "Relaying chat"
        );
        prom::record_chat_message();

        let message = Arc::new(message);
        self.fan_out(|| LegMessage::Chat(Arc::clone(&message)));
    }

    async fn start_recording(&mut self, name: String) -> Result<(), CcError> {
        if self.recordings.contains_key(&name) {
            return Err(CcError::AlreadyRecording(name));
        }

        let path = match &self.core.services.config.recording_dir {
            Some(dir) => dir.join(&name),
            None => PathBuf::from(&name),
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| CcError::Recording(format!("{}: {e}", path.display())))?;

        info!(
            target: "cc.actor.room",
            room = %self.core.id,
            recording = %name,
            "Recording started"
        );
        self.recordings.insert(
            name,
            RecordingSink {
                file,
                path,
                bytes_written: 0,
            },
        );
        Ok(())
    }

    async fn stop_recording(&mut self, name: &str) -> u64 {
        let Some(mut sink) = self.recordings.remove(name) else {
            return 0;
        };
        if let Err(e) = sink.file.flush().await {
            warn!(
                target: "cc.actor.room",
                room = %self.core.id,
                path = %sink.path.display(),
                error = %e,
                "Recording flush failed"
            );
        }
        sink.bytes_written
    }

    async fn teardown(&mut self) {
        if self.state == RoomState::Closed {
            return;
        }
        let was_active = self.state == RoomState::Active;
        self.state = RoomState::Closed;

        if was_active {
            self.core.services.registry.unbind_room(&self.core.id);
            self.core.services.metrics.room_removed();
        }

        self.legs.clear();
        self.roster.clear();
        for (_, mut sink) in self.recordings.drain() {
            let _ = sink.file.flush().await;
        }

        info!(target: "cc.actor.room", room = %self.core.id, "Room closed");
    }
}

/// Tagged recording line for one chat message.
fn recording_line(message: &ChatMessage) -> String {
    let content = String::from_utf8_lossy(&message.content);
    format!(
        "<message entity=\"{}\" nickname=\"{}\">{}</message>\n",
        escape(&message.sender_entity),
        escape(&message.sender_nickname),
        escape(&*content)
    )
}
