//! `FocusActor` - per-room signaling coordinator.
//!
//! The focus claims the room name, creates the room mixer and adds one
//! `DialogActor` per joining participant:
//!
//! ```text
//!   Binding ──bound──▶ CreatingRoom ──room created──▶ Ready ──last dialog gone──▶ Closing
//!      │                    │
//!      │ name taken         │ room create failed
//!      ▼                    ▼
//!   forward to winner    503 to queued invites, unbind
//! ```
//!
//! Invites received while the room is being created are queued. Invites that
//! reach a closing focus are handed back to the controller.

use crate::collaborators::{EntityAddress, InviteRequest, Reply, TransactionRef};
use crate::errors::{status, CcError};
use crate::sdp;

use super::dialog::{DialogActor, DialogActorHandle};
use super::messages::{ControllerMessage, FocusMessage, FocusState, FocusStatus};
use super::metrics::{ActorType, MailboxMonitor};
use super::mixer::{MixerControl, MixerFeedback};
use super::room::{RoomActor, RoomActorHandle};
use super::shared::SharedServices;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the focus mailbox.
const FOCUS_CHANNEL_BUFFER: usize = 500;

/// Pick the room name for a join request.
///
/// # Errors
///
/// - `CcError::InvalidRequest` for a request inside an existing dialog
/// - `CcError::NotChatCapable` when the offer has no `m=message` section
/// - `CcError::MissingRoomName` when the destination has no user part
pub fn select_room_name(invite: &InviteRequest) -> Result<String, CcError> {
    if invite.in_dialog {
        return Err(CcError::InvalidRequest(
            "Request belongs to an existing dialog".to_string(),
        ));
    }
    if !invite.body.as_deref().is_some_and(sdp::is_chat_offer) {
        return Err(CcError::NotChatCapable);
    }

    let name = invite.to.user_part();
    if name.is_empty() {
        return Err(CcError::MissingRoomName);
    }
    Ok(name.to_string())
}

/// Handle to a `FocusActor`.
#[derive(Clone, Debug)]
pub struct FocusActorHandle {
    room_name: String,
    sender: mpsc::Sender<FocusMessage>,
    cancel_token: CancellationToken,
}

impl FocusActorHandle {
    #[must_use]
    pub fn room_name(&self) -> &str {
        &self.room_name
    }

    async fn notify(&self, message: FocusMessage) -> Result<(), CcError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))
    }

    /// Hand a qualifying join request to this focus.
    pub async fn invite(
        &self,
        invite: InviteRequest,
        transaction: TransactionRef,
    ) -> Result<(), CcError> {
        self.notify(FocusMessage::Invite {
            invite,
            transaction,
        })
        .await
    }

    /// Like [`Self::invite`], but gives the request back if this focus has
    /// stopped accepting messages.
    pub(crate) async fn try_invite(
        &self,
        invite: InviteRequest,
        transaction: TransactionRef,
    ) -> Result<(), (InviteRequest, TransactionRef)> {
        let message = FocusMessage::Invite {
            invite,
            transaction,
        };
        if let Err(mpsc::error::SendError(FocusMessage::Invite {
            invite,
            transaction,
        })) = self.sender.send(message).await
        {
            return Err((invite, transaction));
        }
        Ok(())
    }

    /// A dialog has fully released.
    pub async fn leg_disconnected(&self, call_id: String) -> Result<(), CcError> {
        self.notify(FocusMessage::LegDisconnected { call_id }).await
    }

    pub async fn get_status(&self) -> Result<FocusStatus, CcError> {
        let (tx, rx) = oneshot::channel();
        self.notify(FocusMessage::GetStatus { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    /// True when both handles address the same actor.
    #[must_use]
    pub fn same_actor(&self, other: &FocusActorHandle) -> bool {
        self.sender.same_channel(&other.sender)
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    #[cfg(test)]
    pub(crate) fn from_channel(room_name: &str, sender: mpsc::Sender<FocusMessage>) -> Self {
        Self {
            room_name: room_name.to_string(),
            sender,
            cancel_token: CancellationToken::new(),
        }
    }
}

/// The room reports creation to its focus.
#[async_trait::async_trait]
impl MixerFeedback for FocusActorHandle {
    async fn create_complete(&self, _local_description: Option<String>) {
        let _ = self.notify(FocusMessage::RoomCreated).await;
    }

    async fn create_failed(&self, reason: String) {
        let _ = self.notify(FocusMessage::RoomCreateFailed { reason }).await;
    }

    async fn media_released(&self) {}

    async fn conference_notification(&self, _document: String) {}
}

/// Internal state for a managed dialog.
struct ManagedDialog {
    handle: DialogActorHandle,
    task_handle: JoinHandle<()>,
}

/// The `FocusActor` implementation.
pub struct FocusActor {
    room_name: String,
    services: SharedServices,
    receiver: mpsc::Receiver<FocusMessage>,
    /// Own handle, bound in the registry and given to the room and dialogs.
    handle: FocusActorHandle,
    controller: mpsc::WeakSender<ControllerMessage>,
    cancel_token: CancellationToken,
    mailbox: MailboxMonitor,
    state: FocusState,
    /// Destination of the first join request.
    conference_uri: EntityAddress,
    room: Option<RoomActorHandle>,
    room_task: Option<JoinHandle<()>>,
    dialogs: HashMap<String, ManagedDialog>,
    pending: Vec<(InviteRequest, TransactionRef)>,
    created_at: i64,
}

impl FocusActor {
    /// Spawn a focus for `room_name`, seeded with the first join request.
    pub fn spawn(
        room_name: String,
        invite: InviteRequest,
        transaction: TransactionRef,
        controller: mpsc::WeakSender<ControllerMessage>,
        services: SharedServices,
        cancel_token: CancellationToken,
    ) -> (FocusActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(FOCUS_CHANNEL_BUFFER);
        let handle = FocusActorHandle {
            room_name: room_name.clone(),
            sender,
            cancel_token: cancel_token.clone(),
        };

        let actor = Self {
            mailbox: MailboxMonitor::new(ActorType::Focus, &room_name),
            room_name,
            services,
            receiver,
            handle: handle.clone(),
            controller,
            cancel_token,
            state: FocusState::Binding,
            conference_uri: invite.to.clone(),
            room: None,
            room_task: None,
            dialogs: HashMap::new(),
            pending: vec![(invite, transaction)],
            created_at: chrono::Utc::now().timestamp(),
        };

        let task_handle = tokio::spawn(actor.run());
        (handle, task_handle)
    }

    #[instrument(skip_all, name = "cc.actor.focus", fields(room = %self.room_name))]
    async fn run(mut self) {
        debug!(target: "cc.actor.focus", room = %self.room_name, "FocusActor started");

        if !self.start().await {
            return;
        }

        loop {
            self.check_dialog_health().await;
            if self.should_close() {
                self.close().await;
                break;
            }

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "cc.actor.focus", room = %self.room_name, "FocusActor cancelled");
                    self.shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    let Some(message) = msg else { break };
                    self.mailbox.record_enqueue();
                    let exit = self.handle_message(message).await;
                    self.mailbox.record_dequeue();
                    self.services.metrics.record_message_processed();
                    if exit {
                        break;
                    }
                }
            }
        }

        debug!(
            target: "cc.actor.focus",
            room = %self.room_name,
            messages_processed = self.mailbox.messages_processed(),
            "FocusActor stopped"
        );
    }

    /// Claim the name and start creating the room. Returns false when this
    /// focus lost the name and handed its invites to the winner.
    async fn start(&mut self) -> bool {
        if let Err(e) = self
            .services
            .registry
            .bind_focus(&self.room_name, self.handle.clone())
        {
            debug!(
                target: "cc.actor.focus",
                room = %self.room_name,
                error = %e,
                "Focus name taken, forwarding to existing focus"
            );
            let pending = std::mem::take(&mut self.pending);
            match self.services.registry.lookup_focus(&self.room_name) {
                Some(winner) => {
                    for (invite, transaction) in pending {
                        if let Err((invite, transaction)) =
                            winner.try_invite(invite, transaction).await
                        {
                            self.reroute(invite, transaction).await;
                        }
                    }
                }
                None => {
                    for (invite, transaction) in pending {
                        self.reroute(invite, transaction).await;
                    }
                }
            }
            return false;
        }

        self.state = FocusState::CreatingRoom;
        let (room, room_task) = RoomActor::spawn(
            self.room_name.clone(),
            Arc::new(self.handle.clone()),
            self.services.clone(),
            self.cancel_token.child_token(),
        );
        self.room = Some(room.clone());
        self.room_task = Some(room_task);

        // The outcome also arrives as RoomCreated / RoomCreateFailed.
        if let Err(e) = room.create_room(Some(self.room_name.clone())).await {
            debug!(
                target: "cc.actor.focus",
                room = %self.room_name,
                error = %e,
                "create_room returned an error"
            );
        }
        true
    }

    /// Returns true when the actor must stop.
    async fn handle_message(&mut self, message: FocusMessage) -> bool {
        match message {
            FocusMessage::Invite {
                invite,
                transaction,
            } => match self.state {
                FocusState::Binding | FocusState::CreatingRoom => {
                    self.pending.push((invite, transaction));
                }
                FocusState::Ready => self.add_member(invite, transaction).await,
                FocusState::Closing => self.reroute(invite, transaction).await,
            },

            FocusMessage::RoomCreated => self.on_room_created().await,

            FocusMessage::RoomCreateFailed { reason } => {
                warn!(
                    target: "cc.actor.focus",
                    room = %self.room_name,
                    reason = %reason,
                    "Room creation failed"
                );
                for (invite, transaction) in std::mem::take(&mut self.pending) {
                    self.reply(&invite, &transaction, status::SERVICE_UNAVAILABLE)
                        .await;
                }
                self.close().await;
                return true;
            }

            FocusMessage::LegDisconnected { call_id } => {
                if self.dialogs.remove(&call_id).is_some() {
                    self.services.registry.unbind_dialog(&call_id);
                    debug!(
                        target: "cc.actor.focus",
                        room = %self.room_name,
                        call_id = %call_id,
                        dialogs_remaining = self.dialogs.len(),
                        "Dialog departed"
                    );
                }
            }

            FocusMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(FocusStatus {
                    room_name: self.room_name.clone(),
                    state: self.state,
                    dialog_count: self.dialogs.len(),
                    pending_invites: self.pending.len(),
                    created_at: self.created_at,
                });
            }
        }

        false
    }

    async fn on_room_created(&mut self) {
        if self.state != FocusState::CreatingRoom {
            return;
        }
        let Some(room) = self.room.clone() else {
            return;
        };

        if let Err(e) = room
            .set_conference_name(self.conference_uri.uri.clone())
            .await
        {
            warn!(target: "cc.actor.focus", room = %self.room_name, error = %e, "Failed to set conference name");
        }
        if let Err(e) = room
            .set_subject(self.services.config.room_subject.clone())
            .await
        {
            warn!(target: "cc.actor.focus", room = %self.room_name, error = %e, "Failed to set subject");
        }

        self.state = FocusState::Ready;
        info!(target: "cc.actor.focus", room = %self.room_name, "Room ready");

        for (invite, transaction) in std::mem::take(&mut self.pending) {
            self.add_member(invite, transaction).await;
        }
    }

    /// Spawn and set up a dialog for a joining participant.
    async fn add_member(&mut self, invite: InviteRequest, transaction: TransactionRef) {
        let call_id = invite.call_id.clone();
        if self.dialogs.contains_key(&call_id) {
            self.reply(&invite, &transaction, status::BAD_REQUEST).await;
            return;
        }

        let (dialog, task_handle) = DialogActor::spawn(
            call_id.clone(),
            self.handle.clone(),
            self.services.clone(),
            self.cancel_token.child_token(),
        );

        let result = match self
            .services
            .registry
            .bind_dialog(&call_id, dialog.clone())
        {
            Ok(()) => {
                let setup = dialog
                    .setup(invite.clone(), transaction.clone(), self.room_name.clone())
                    .await;
                if setup.is_err() {
                    self.services.registry.unbind_dialog(&call_id);
                }
                setup
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!(
                    target: "cc.actor.focus",
                    room = %self.room_name,
                    call_id = %call_id,
                    "Member added"
                );
                self.dialogs.insert(
                    call_id,
                    ManagedDialog {
                        handle: dialog,
                        task_handle,
                    },
                );
            }
            Err(e) => {
                warn!(
                    target: "cc.actor.focus",
                    room = %self.room_name,
                    call_id = %call_id,
                    error = %e,
                    "Failed to add member"
                );
                dialog.cancel();
                self.reply(&invite, &transaction, status::SERVER_INTERNAL_ERROR)
                    .await;
            }
        }
    }

    /// Last member left the ready room.
    fn should_close(&self) -> bool {
        self.state == FocusState::Ready && self.dialogs.is_empty() && self.pending.is_empty()
    }

    /// Disconnect the room, give up the name and hand back anything queued.
    async fn close(&mut self) {
        self.state = FocusState::Closing;

        // The room name must be free before a new focus can win the name.
        if let Some(room) = self.room.take() {
            if let Err(e) = room.disconnect().await {
                warn!(target: "cc.actor.focus", room = %self.room_name, error = %e, "Room disconnect failed");
            }
        }
        self.services
            .registry
            .unbind_focus(&self.room_name, &self.handle);

        self.receiver.close();
        while let Ok(message) = self.receiver.try_recv() {
            match message {
                FocusMessage::Invite {
                    invite,
                    transaction,
                } => self.reroute(invite, transaction).await,
                FocusMessage::GetStatus { respond_to } => {
                    let _ = respond_to.send(FocusStatus {
                        room_name: self.room_name.clone(),
                        state: self.state,
                        dialog_count: 0,
                        pending_invites: 0,
                        created_at: self.created_at,
                    });
                }
                _ => {}
            }
        }

        info!(target: "cc.actor.focus", room = %self.room_name, "Focus closed");
    }

    async fn shutdown(&mut self) {
        self.state = FocusState::Closing;
        for managed in self.dialogs.values() {
            managed.handle.cancel();
        }
        for (_, managed) in self.dialogs.drain() {
            let _ = managed.task_handle.await;
        }
        if let Some(task) = self.room_task.take() {
            let _ = task.await;
        }
        self.services
            .registry
            .unbind_focus(&self.room_name, &self.handle);
    }

    /// Hand a join request back to the controller for routing.
    async fn reroute(&self, invite: InviteRequest, transaction: TransactionRef) {
        let Some(controller) = self.controller.upgrade() else {
            self.reply(&invite, &transaction, status::SERVICE_UNAVAILABLE)
                .await;
            return;
        };

        let message = ControllerMessage::Reroute {
            invite,
            transaction,
        };
        if let Err(mpsc::error::SendError(ControllerMessage::Reroute {
            invite,
            transaction,
        })) = controller.send(message).await
        {
            self.reply(&invite, &transaction, status::SERVICE_UNAVAILABLE)
                .await;
        }
    }

    async fn reply(&self, invite: &InviteRequest, transaction: &TransactionRef, status: u16) {
        if let Err(e) = self
            .services
            .signaling
            .reply(transaction, Reply::status(status))
            .await
        {
            warn!(
                target: "cc.actor.focus",
                room = %self.room_name,
                call_id = %invite.call_id,
                status,
                error = %e,
                "Failed to send reply"
            );
        }
    }

    /// Check health of managed dialog actors.
    async fn check_dialog_health(&mut self) {
        let finished: Vec<String> = self
            .dialogs
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(call_id, _)| call_id.clone())
            .collect();

        for call_id in finished {
            let Some(managed) = self.dialogs.remove(&call_id) else {
                continue;
            };
            self.services.registry.unbind_dialog(&call_id);
            match managed.task_handle.await {
                Ok(()) => {
                    debug!(
                        target: "cc.actor.focus",
                        room = %self.room_name,
                        call_id = %call_id,
                        "Dialog actor exited"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "cc.actor.focus",
                            room = %self.room_name,
                            call_id = %call_id,
                            error = ?join_error,
                            "Dialog actor panicked"
                        );
                        self.services.metrics.record_panic(ActorType::Dialog);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::messages::DialogState;
    use crate::collaborators::mock::{wait_until, MockMediaTransport, MockSignaling};
    use crate::collaborators::{InboundRequest, MediaTransport, SignalingEndpoint};
    use crate::config::Config;

    const OFFER: &str = "v=0\r\no=- 1 1 IN IP4 10.0.0.1\r\ns=-\r\nc=IN IP4 10.0.0.1\r\nt=0 0\r\nm=message 7394 TCP/MSRP *\r\na=path:msrp://10.0.0.1:7394/abc;tcp\r\n";

    fn invite(call_id: &str, to: &str) -> InviteRequest {
        InviteRequest {
            call_id: call_id.to_string(),
            from: EntityAddress::new(format!("sip:{call_id}@example.com")),
            to: EntityAddress::new(to),
            body: Some(OFFER.to_string()),
            in_dialog: false,
        }
    }

    struct Fixture {
        services: SharedServices,
        signaling: Arc<MockSignaling>,
        controller_tx: mpsc::Sender<ControllerMessage>,
    }

    fn fixture() -> Fixture {
        let signaling = Arc::new(MockSignaling::new());
        let services = SharedServices::new(
            Config::default(),
            Arc::clone(&signaling) as Arc<dyn SignalingEndpoint>,
            Arc::new(MockMediaTransport::new()) as Arc<dyn MediaTransport>,
        );
        let (controller_tx, _controller_rx) = mpsc::channel(16);
        Fixture {
            services,
            signaling,
            controller_tx,
        }
    }

    async fn spawn_focus(f: &Fixture, call_id: &str) -> (FocusActorHandle, JoinHandle<()>) {
        let request = invite(call_id, "sip:alpha@chat.example.com");
        let tx = f
            .signaling
            .accept_request(&InboundRequest::Invite(request.clone()))
            .await
            .unwrap();
        FocusActor::spawn(
            "alpha".to_string(),
            request,
            tx,
            f.controller_tx.downgrade(),
            f.services.clone(),
            CancellationToken::new(),
        )
    }

    async fn join(f: &Fixture, focus: &FocusActorHandle, call_id: &str) {
        let request = invite(call_id, "sip:alpha@chat.example.com");
        let tx = f
            .signaling
            .accept_request(&InboundRequest::Invite(request.clone()))
            .await
            .unwrap();
        focus.invite(request, tx).await.unwrap();
    }

    #[test]
    fn test_select_room_name() {
        let request = invite("c1", "sip:alpha@chat.example.com");
        assert_eq!(select_room_name(&request).unwrap(), "alpha");

        let mut in_dialog = request.clone();
        in_dialog.in_dialog = true;
        assert!(matches!(
            select_room_name(&in_dialog),
            Err(CcError::InvalidRequest(_))
        ));

        let mut audio = request.clone();
        audio.body = Some("v=0\r\nm=audio 49170 RTP/AVP 0\r\n".to_string());
        assert!(matches!(
            select_room_name(&audio),
            Err(CcError::NotChatCapable)
        ));

        let mut no_body = request.clone();
        no_body.body = None;
        assert!(matches!(
            select_room_name(&no_body),
            Err(CcError::NotChatCapable)
        ));

        let nameless = invite("c1", "sip:@chat.example.com");
        let err = select_room_name(&nameless).unwrap_err();
        assert!(matches!(err, CcError::MissingRoomName));
        assert_eq!(err.status_code(), status::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_first_invite_creates_room() {
        let f = fixture();
        let (focus, _task) = spawn_focus(&f, "call-a").await;

        assert!(wait_until(|| f.signaling.answers_for("call-a").len() == 1).await);

        let status = focus.get_status().await.unwrap();
        assert_eq!(status.state, FocusState::Ready);
        assert_eq!(status.dialog_count, 1);
        assert!(f.services.registry.lookup_focus("alpha").is_some());
        assert!(f.services.registry.lookup_dialog("call-a").is_some());

        let room = f.services.registry.lookup_room("alpha").unwrap();
        let snapshot = room.get_snapshot().await.unwrap();
        assert_eq!(snapshot.conference_name, "sip:alpha@chat.example.com");
        assert_eq!(snapshot.subject, "MSRP chat");
    }

    #[tokio::test]
    async fn test_second_invite_joins_existing_room() {
        let f = fixture();
        let (focus, _task) = spawn_focus(&f, "call-a").await;
        join(&f, &focus, "call-b").await;

        assert!(wait_until(|| f.signaling.answers_for("call-b").len() == 1).await);
        assert_eq!(focus.get_status().await.unwrap().dialog_count, 2);
        assert_eq!(f.services.registry.room_count(), 1);
    }

    #[tokio::test]
    async fn test_losing_focus_forwards_to_winner() {
        let f = fixture();
        let (winner, _task) = spawn_focus(&f, "call-a").await;
        assert!(wait_until(|| f.signaling.answers_for("call-a").len() == 1).await);

        let (loser, loser_task) = spawn_focus(&f, "call-b").await;
        loser_task.await.unwrap();
        assert!(loser.is_closed());

        assert!(wait_until(|| f.signaling.answers_for("call-b").len() == 1).await);
        assert_eq!(winner.get_status().await.unwrap().dialog_count, 2);
        assert!(f
            .services
            .registry
            .lookup_focus("alpha")
            .unwrap()
            .same_actor(&winner));
    }

    #[tokio::test]
    async fn test_room_create_failure_replies_503_and_unbinds() {
        let f = fixture();
        // A stale room still holds the name.
        let (stale, _stale_task) = RoomActor::spawn(
            "alpha".to_string(),
            Arc::new(FocusActorHandle::from_channel("alpha", mpsc::channel(4).0)),
            f.services.clone(),
            CancellationToken::new(),
        );
        stale.create_room(Some("alpha".to_string())).await.unwrap();

        let (_focus, task) = spawn_focus(&f, "call-a").await;
        task.await.unwrap();

        assert_eq!(
            f.signaling.replies_for("call-a"),
            vec![status::SERVICE_UNAVAILABLE]
        );
        assert!(f.services.registry.lookup_focus("alpha").is_none());
        assert!(f.services.registry.lookup_room("alpha").is_some());
    }

    #[tokio::test]
    async fn test_last_departure_tears_down() {
        let f = fixture();
        let (focus, task) = spawn_focus(&f, "call-a").await;
        assert!(wait_until(|| f.signaling.answers_for("call-a").len() == 1).await);

        let dialog = f.services.registry.lookup_dialog("call-a").unwrap();
        dialog.disconnect().await.unwrap();
        task.await.unwrap();

        assert!(focus.is_closed());
        assert!(f.services.registry.lookup_focus("alpha").is_none());
        assert!(f.services.registry.lookup_room("alpha").is_none());
        assert!(f.services.registry.lookup_dialog("call-a").is_none());
        assert_eq!(f.services.metrics.room_count(), 0);
    }

    #[tokio::test]
    async fn test_room_released_before_focus_unbinds() {
        let f = fixture();
        let (_focus, task) = spawn_focus(&f, "call-a").await;
        assert!(wait_until(|| f.signaling.answers_for("call-a").len() == 1).await);

        let dialog = f.services.registry.lookup_dialog("call-a").unwrap();
        dialog.disconnect().await.unwrap();

        // Whenever the focus name is free, the room name must be free too.
        let registry = Arc::clone(&f.services.registry);
        let watcher = tokio::spawn(async move {
            loop {
                if registry.lookup_focus("alpha").is_none() {
                    return registry.lookup_room("alpha").is_none();
                }
                tokio::task::yield_now().await;
            }
        });

        task.await.unwrap();
        assert!(watcher.await.unwrap());
    }

    #[tokio::test]
    async fn test_departed_focus_gives_invite_back() {
        let f = fixture();
        let (focus, task) = spawn_focus(&f, "call-a").await;
        assert!(wait_until(|| f.signaling.answers_for("call-a").len() == 1).await);

        let dialog = f.services.registry.lookup_dialog("call-a").unwrap();
        let status = dialog.get_status().await.unwrap();
        assert_eq!(status.state, DialogState::Chatting);
        dialog.disconnect().await.unwrap();
        task.await.unwrap();

        let request = invite("call-b", "sip:alpha@chat.example.com");
        let tx = f
            .signaling
            .accept_request(&InboundRequest::Invite(request.clone()))
            .await
            .unwrap();
        let (request, _tx) = focus.try_invite(request, tx).await.unwrap_err();
        assert_eq!(request.call_id, "call-b");
        assert!(f.signaling.replies_for("call-b").is_empty());
    }
}
