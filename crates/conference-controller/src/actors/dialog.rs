//! `DialogActor` - one participant's call.
//!
//! ```text
//!   Start ──media created──▶ Early ──answered──▶ Chatting
//!     │                        │                    │
//!     └──── bye / cancel / timeout / media released ┴──▶ Stop ──grace──▶ released
//! ```
//!
//! The dialog owns its `LegActor`. Hangups are timed: the dialog stops, hangs
//! up toward the peer, tells the leg to disconnect and arms a grace timer. It
//! releases on `media released` from the leg or when the grace timer fires,
//! whichever comes first, and then reports `leg disconnected` to its focus.
//!
//! Conference subscriptions are served from documents rendered by the leg.

use crate::collaborators::{
    Body, DialogRef, EntityAddress, InviteRequest, Notify, Reply, SubscribeRequest,
    TransactionRef, CONFERENCE_EVENT_PACKAGE,
};
use crate::errors::{status, CcError};

use super::focus::FocusActorHandle;
use super::leg::{LegActor, LegActorHandle};
use super::messages::{DialogMessage, DialogState, DialogStatus, DialogTimer};
use super::metrics::{ActorType, MailboxMonitor};
use super::mixer::{MixerControl, MixerFeedback};
use super::shared::SharedServices;
use super::timer::TimerSet;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Default channel buffer size for the dialog mailbox.
const DIALOG_CHANNEL_BUFFER: usize = 100;

/// Subscription state of a dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subscription {
    NotSubscribed,
    /// Subscribed with a zero lifetime.
    Expired,
    ActiveUntil(Instant),
}

impl Subscription {
    /// Whole seconds left, rounded up. `None` when not subscribed.
    fn remaining_seconds(&self, now: Instant) -> Option<u64> {
        match self {
            Subscription::NotSubscribed => None,
            Subscription::Expired => Some(0),
            Subscription::ActiveUntil(until) => {
                let left = until.saturating_duration_since(now);
                Some(left.as_secs() + u64::from(left.subsec_nanos() > 0))
            }
        }
    }
}

/// Handle to a `DialogActor`.
#[derive(Clone, Debug)]
pub struct DialogActorHandle {
    call_id: String,
    sender: mpsc::Sender<DialogMessage>,
    cancel_token: CancellationToken,
}

impl DialogActorHandle {
    #[must_use]
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    async fn notify(&self, message: DialogMessage) -> Result<(), CcError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))
    }

    /// Start the call: ring, spawn the leg and request media in `room_id`.
    pub async fn setup(
        &self,
        invite: InviteRequest,
        transaction: TransactionRef,
        room_id: String,
    ) -> Result<(), CcError> {
        let (tx, rx) = oneshot::channel();
        self.notify(DialogMessage::Setup {
            invite,
            transaction,
            room_id,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))?
    }

    pub async fn bye(&self, transaction: TransactionRef) -> Result<(), CcError> {
        self.notify(DialogMessage::Bye { transaction }).await
    }

    pub async fn cancel_invite(&self, transaction: TransactionRef) -> Result<(), CcError> {
        self.notify(DialogMessage::Cancel { transaction }).await
    }

    pub async fn subscribe(
        &self,
        request: SubscribeRequest,
        transaction: TransactionRef,
    ) -> Result<(), CcError> {
        self.notify(DialogMessage::Subscribe {
            request,
            transaction,
        })
        .await
    }

    pub async fn dialog_timeout(&self) -> Result<(), CcError> {
        self.notify(DialogMessage::DialogTimeout).await
    }

    /// Timed hangup.
    pub async fn disconnect(&self) -> Result<(), CcError> {
        self.notify(DialogMessage::Disconnect).await
    }

    pub async fn get_status(&self) -> Result<DialogStatus, CcError> {
        let (tx, rx) = oneshot::channel();
        self.notify(DialogMessage::GetStatus { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// The leg reports to its dialog through the handle. A dialog that already
/// stopped has nothing left to do with the event.
#[async_trait::async_trait]
impl MixerFeedback for DialogActorHandle {
    async fn create_complete(&self, local_description: Option<String>) {
        let _ = self
            .notify(DialogMessage::MediaCreated { local_description })
            .await;
    }

    async fn create_failed(&self, reason: String) {
        let _ = self
            .notify(DialogMessage::MediaCreateFailed { reason })
            .await;
    }

    async fn media_released(&self) {
        let _ = self.notify(DialogMessage::MediaReleased).await;
    }

    /// Never waits: the dialog may itself be waiting on the sending leg.
    /// A dropped document is superseded by the next roster change.
    async fn conference_notification(&self, document: String) {
        if let Err(e) = self
            .sender
            .try_send(DialogMessage::ConferenceNotification { document })
        {
            debug!(
                target: "cc.actor.dialog",
                call_id = %self.call_id,
                error = %e,
                "Conference notification dropped"
            );
        }
    }
}

/// The `DialogActor` implementation.
pub struct DialogActor {
    call_id: String,
    services: SharedServices,
    focus: FocusActorHandle,
    receiver: mpsc::Receiver<DialogMessage>,
    /// Own handle, given to the leg as its feedback target.
    handle: DialogActorHandle,
    cancel_token: CancellationToken,
    mailbox: MailboxMonitor,
    state: DialogState,
    caller: Option<EntityAddress>,
    /// Invite transaction still waiting for a final response.
    pending_invite: Option<TransactionRef>,
    dialog: Option<DialogRef>,
    leg: Option<LegActorHandle>,
    leg_task: Option<JoinHandle<()>>,
    subscription: Subscription,
    subscription_id: Option<String>,
    last_document: Option<String>,
    timers: TimerSet<DialogTimer>,
}

impl DialogActor {
    /// Spawn a dialog for `call_id` owned by `focus`.
    pub fn spawn(
        call_id: String,
        focus: FocusActorHandle,
        services: SharedServices,
        cancel_token: CancellationToken,
    ) -> (DialogActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(DIALOG_CHANNEL_BUFFER);
        let handle = DialogActorHandle {
            call_id: call_id.clone(),
            sender,
            cancel_token: cancel_token.clone(),
        };

        let actor = Self {
            mailbox: MailboxMonitor::new(ActorType::Dialog, &call_id),
            call_id,
            services,
            focus,
            receiver,
            handle: handle.clone(),
            cancel_token,
            state: DialogState::Start,
            caller: None,
            pending_invite: None,
            dialog: None,
            leg: None,
            leg_task: None,
            subscription: Subscription::NotSubscribed,
            subscription_id: None,
            last_document: None,
            timers: TimerSet::new(),
        };

        let task_handle = tokio::spawn(actor.run());
        (handle, task_handle)
    }

    #[instrument(skip_all, name = "cc.actor.dialog", fields(call_id = %self.call_id))]
    async fn run(mut self) {
        debug!(target: "cc.actor.dialog", call_id = %self.call_id, "DialogActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "cc.actor.dialog", call_id = %self.call_id, "DialogActor cancelled");
                    self.disconnect().await;
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
            target: "cc.actor.dialog",
            call_id = %self.call_id,
            messages_processed = self.mailbox.messages_processed(),
            "DialogActor stopped"
        );
    }

    /// Returns true when the dialog is released.
    async fn handle_message(&mut self, message: DialogMessage) -> bool {
        match message {
            DialogMessage::Setup {
                invite,
                transaction,
                room_id,
                respond_to,
            } => {
                let result = self.setup(invite, transaction, room_id).await;
                let _ = respond_to.send(result);
            }

            DialogMessage::MediaCreated { local_description } => {
                self.on_media_created(local_description).await;
            }

            DialogMessage::MediaCreateFailed { reason } => {
                warn!(
                    target: "cc.actor.dialog",
                    call_id = %self.call_id,
                    reason = %reason,
                    "Media creation failed"
                );
                self.timers.cancel_all();
                self.state = DialogState::Stop;
                self.leg = None;
                if let Some(transaction) = self.pending_invite.take() {
                    self.reply(&transaction, status::SERVICE_UNAVAILABLE).await;
                }
                return self.release().await;
            }

            DialogMessage::Bye { transaction } => {
                self.reply(&transaction, status::OK).await;
                self.timed_disconnect().await;
            }

            DialogMessage::Cancel { transaction } => {
                self.reply(&transaction, status::OK).await;
                if matches!(self.state, DialogState::Start | DialogState::Early) {
                    self.timed_disconnect().await;
                }
            }

            DialogMessage::DialogTimeout => {
                if self.state != DialogState::Stop {
                    let err = CcError::ProtocolTimeout("dialog never confirmed".to_string());
                    warn!(
                        target: "cc.actor.dialog",
                        call_id = %self.call_id,
                        error = %err,
                        "Dialog timed out"
                    );
                    self.timed_disconnect().await;
                }
            }

            DialogMessage::MediaReleased => {
                if self.state == DialogState::Stop {
                    return self.release().await;
                }
                self.timed_disconnect().await;
            }

            DialogMessage::Subscribe {
                request,
                transaction,
            } => self.subscribe(request, &transaction).await,

            DialogMessage::ConferenceNotification { document } => {
                self.send_notification(&document).await;
                self.last_document = Some(document);
            }

            DialogMessage::TimerExpired { kind, seq } => {
                if !self.timers.fire(kind, seq) {
                    return false;
                }
                match kind {
                    DialogTimer::Grace => {
                        if self.state == DialogState::Stop {
                            debug!(
                                target: "cc.actor.dialog",
                                call_id = %self.call_id,
                                "Grace period elapsed, forcing release"
                            );
                            return self.release().await;
                        }
                    }
                    DialogTimer::SubscriptionExpiry => self.request_notification().await,
                }
            }

            DialogMessage::Disconnect => self.timed_disconnect().await,

            DialogMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(DialogStatus {
                    call_id: self.call_id.clone(),
                    state: self.state,
                    subscribed: self.subscription != Subscription::NotSubscribed,
                    answered: self.dialog.is_some(),
                    grace_armed: self.timers.is_armed(DialogTimer::Grace),
                });
            }
        }

        false
    }

    async fn setup(
        &mut self,
        invite: InviteRequest,
        transaction: TransactionRef,
        room_id: String,
    ) -> Result<(), CcError> {
        if self.caller.is_some() {
            return Err(CcError::Conflict(format!(
                "dialog {} already set up",
                self.call_id
            )));
        }

        self.caller = Some(invite.from.clone());
        self.state = DialogState::Start;
        self.reply(&transaction, status::RINGING).await;
        self.pending_invite = Some(transaction);

        let connection_id = Uuid::new_v4().to_string();
        let (leg, leg_task) = LegActor::spawn(
            connection_id.clone(),
            Arc::new(self.handle.clone()),
            self.services.clone(),
            self.cancel_token.child_token(),
        );
        leg.create_leg(room_id.clone(), invite.body).await?;
        self.leg = Some(leg);
        self.leg_task = Some(leg_task);

        info!(
            target: "cc.actor.dialog",
            call_id = %self.call_id,
            room = %room_id,
            connection_id = %connection_id,
            "Dialog set up"
        );
        Ok(())
    }

    async fn on_media_created(&mut self, local_description: Option<String>) {
        if self.state != DialogState::Start {
            warn!(
                target: "cc.actor.dialog",
                call_id = %self.call_id,
                state = self.state.as_str(),
                "Ignoring media created outside start"
            );
            return;
        }
        self.state = DialogState::Early;

        let (Some(leg), Some(caller)) = (&self.leg, &self.caller) else {
            return;
        };
        if let Err(e) = leg.set_participant(caller.clone()).await {
            warn!(
                target: "cc.actor.dialog",
                call_id = %self.call_id,
                error = %e,
                "Failed to set participant"
            );
        }

        let Some(transaction) = self.pending_invite.take() else {
            return;
        };
        let body = Body::sdp(local_description.unwrap_or_default());
        match self.services.signaling.answer(&transaction, body).await {
            Ok(dialog) => {
                self.dialog = Some(dialog);
                self.state = DialogState::Chatting;
                info!(target: "cc.actor.dialog", call_id = %self.call_id, "Call answered");

                let prompts = self.services.config.welcome_prompts.clone();
                if let Some(leg) = &self.leg {
                    if let Err(e) = leg.send_prompts(prompts).await {
                        warn!(
                            target: "cc.actor.dialog",
                            call_id = %self.call_id,
                            error = %e,
                            "Failed to send welcome prompts"
                        );
                    }
                }
            }
            Err(e) => {
                warn!(
                    target: "cc.actor.dialog",
                    call_id = %self.call_id,
                    error = %e,
                    "Answer failed"
                );
                self.reply(&transaction, status::SERVER_INTERNAL_ERROR).await;
                self.timed_disconnect().await;
            }
        }
    }

    async fn subscribe(&mut self, request: SubscribeRequest, transaction: &TransactionRef) {
        if request.event_package != CONFERENCE_EVENT_PACKAGE {
            let err = CcError::BadEvent(request.event_package);
            debug!(
                target: "cc.actor.dialog",
                call_id = %self.call_id,
                error = %err,
                "Rejecting subscription"
            );
            self.reply(transaction, err.status_code()).await;
            return;
        }

        let max = self.services.config.subscription_max_expiry_seconds;
        let expires = request.expires.unwrap_or(max).min(max);
        self.subscription_id = request.event_id;

        if expires == 0 {
            self.subscription = Subscription::Expired;
            self.timers.cancel(DialogTimer::SubscriptionExpiry);
        } else {
            let lifetime = Duration::from_secs(u64::from(expires));
            self.subscription = Subscription::ActiveUntil(Instant::now() + lifetime);
            let mailbox = self.handle.sender.downgrade();
            self.timers.arm(
                DialogTimer::SubscriptionExpiry,
                lifetime,
                &mailbox,
                |kind, seq| DialogMessage::TimerExpired { kind, seq },
            );
        }

        if let Err(e) = self
            .services
            .signaling
            .reply(transaction, Reply::status(status::OK).with_expires(expires))
            .await
        {
            warn!(
                target: "cc.actor.dialog",
                call_id = %self.call_id,
                error = %e,
                "Failed to reply to subscription"
            );
        }

        debug!(
            target: "cc.actor.dialog",
            call_id = %self.call_id,
            expires,
            "Subscription accepted"
        );
        self.request_notification().await;
    }

    /// Ask the leg for a fresh document, falling back to the last one seen.
    async fn request_notification(&mut self) {
        let requested = match &self.leg {
            Some(leg) => leg.trigger_info_notification().await,
            None => Err(CcError::NotAttached),
        };
        match requested {
            Ok(document) => {
                self.send_notification(&document).await;
                self.last_document = Some(document);
            }
            Err(e) => {
                debug!(
                    target: "cc.actor.dialog",
                    call_id = %self.call_id,
                    error = %e,
                    "Leg cannot render conference state"
                );
                if let Some(document) = self.last_document.clone() {
                    self.send_notification(&document).await;
                }
            }
        }
    }

    async fn send_notification(&mut self, document: &str) {
        let Some(remaining) = self.subscription.remaining_seconds(Instant::now()) else {
            return;
        };

        let subscription_state = if remaining == 0 {
            self.subscription = Subscription::NotSubscribed;
            self.timers.cancel(DialogTimer::SubscriptionExpiry);
            "terminated;reason=timeout".to_string()
        } else {
            format!("active;expires={remaining}")
        };

        let Some(dialog) = &self.dialog else {
            debug!(
                target: "cc.actor.dialog",
                call_id = %self.call_id,
                "No confirmed dialog for notification"
            );
            return;
        };

        let notify = Notify {
            event_package: CONFERENCE_EVENT_PACKAGE.to_string(),
            event_id: self.subscription_id.clone(),
            subscription_state,
            body: Body::conference_info(document),
        };
        if let Err(e) = self.services.signaling.send_notify(dialog, notify).await {
            warn!(
                target: "cc.actor.dialog",
                call_id = %self.call_id,
                error = %e,
                "Failed to send notification"
            );
        }
    }

    async fn reply(&self, transaction: &TransactionRef, status: u16) {
        if let Err(e) = self
            .services
            .signaling
            .reply(transaction, Reply::status(status))
            .await
        {
            warn!(
                target: "cc.actor.dialog",
                call_id = %self.call_id,
                status,
                error = %e,
                "Failed to send reply"
            );
        }
    }

    /// Stop, hang up and disconnect the leg. Idempotent.
    async fn disconnect(&mut self) {
        if self.state == DialogState::Stop {
            return;
        }
        self.timers.cancel_all();
        self.state = DialogState::Stop;

        if let Some(dialog) = &self.dialog {
            if let Err(e) = self.services.signaling.send_bye(dialog).await {
                warn!(
                    target: "cc.actor.dialog",
                    call_id = %self.call_id,
                    error = %e,
                    "Failed to hang up"
                );
            }
        } else if let Some(transaction) = self.pending_invite.take() {
            self.reply(&transaction, status::REQUEST_TERMINATED).await;
        }

        if let Some(leg) = &self.leg {
            if let Err(e) = leg.disconnect().await {
                warn!(
                    target: "cc.actor.dialog",
                    call_id = %self.call_id,
                    error = %e,
                    "Failed to disconnect leg"
                );
            }
        }
        info!(target: "cc.actor.dialog", call_id = %self.call_id, "Dialog stopped");
    }

    /// Disconnect, then release after the grace period at the latest.
    async fn timed_disconnect(&mut self) {
        if self.state == DialogState::Stop {
            return;
        }
        self.disconnect().await;

        let grace = self.services.config.dialog_grace_period();
        let mailbox = self.handle.sender.downgrade();
        self.timers
            .arm(DialogTimer::Grace, grace, &mailbox, |kind, seq| {
                DialogMessage::TimerExpired { kind, seq }
            });
    }

    /// Report departure to the focus. The caller stops the actor.
    async fn release(&mut self) -> bool {
        self.timers.cancel_all();
        if let Some(task) = self.leg_task.take() {
            if !task.is_finished() {
                // The leg was told to disconnect; stop waiting for it.
                if let Some(leg) = &self.leg {
                    leg.cancel();
                }
            }
        }

        if let Err(e) = self.focus.leg_disconnected(self.call_id.clone()).await {
            debug!(
                target: "cc.actor.dialog",
                call_id = %self.call_id,
                error = %e,
                "Focus already gone on release"
            );
        }
        info!(target: "cc.actor.dialog", call_id = %self.call_id, "Dialog released");
        true
    }
}
