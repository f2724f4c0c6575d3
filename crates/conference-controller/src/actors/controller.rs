//! `ConferenceControllerActor` - singleton supervisor and entry point.
//!
//! The controller is the top-level actor in the hierarchy:
//!
//! - Receives every inbound signaling request
//! - Runs the focus selector and hands join requests to the room's focus,
//!   spawning one when the room does not exist yet
//! - Routes in-dialog requests (bye, cancel, subscribe) to the owning dialog
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors focus health (panic detection via `JoinHandle`)
//!
//! # Graceful Shutdown
//!
//! On shutdown the controller stops accepting joins (`503`), cancels the root
//! token (propagating to every focus, room, dialog and leg) and waits for
//! focus tasks with a timeout.

use crate::collaborators::{InboundRequest, InviteRequest, Reply, TransactionRef};
use crate::errors::{status, CcError};
use crate::observability::metrics::{self as prom, outcome};

use super::focus::{select_room_name, FocusActor, FocusActorHandle};
use super::messages::{ControllerMessage, ControllerStatus, RoomInfo};
use super::metrics::{ActorType, MailboxMonitor};
use super::shared::SharedServices;

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the controller mailbox.
const CONTROLLER_CHANNEL_BUFFER: usize = 1000;

/// Handle to the `ConferenceControllerActor`.
///
/// This is the public interface of the crate. Dropping every handle stops
/// the controller.
#[derive(Clone, Debug)]
pub struct ConferenceControllerHandle {
    sender: mpsc::Sender<ControllerMessage>,
    cancel_token: CancellationToken,
}

impl ConferenceControllerHandle {
    /// Create a new controller and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(services: SharedServices) -> Self {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = ConferenceControllerActor::new(
            receiver,
            sender.downgrade(),
            cancel_token.clone(),
            services,
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Deliver an inbound signaling request or event.
    pub async fn handle_request(&self, request: InboundRequest) -> Result<(), CcError> {
        self.sender
            .send(ControllerMessage::Inbound { request })
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))
    }

    /// Get information about a room.
    pub async fn get_room(&self, room_name: String) -> Result<RoomInfo, CcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::GetRoom {
                room_name,
                respond_to: tx,
            })
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get the current controller status.
    pub async fn get_status(&self) -> Result<ControllerStatus, CcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), CcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::Shutdown {
                deadline,
                respond_to: tx,
            })
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for spawning child actors.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a managed focus.
struct ManagedFocus {
    handle: FocusActorHandle,
    task_handle: JoinHandle<()>,
    created_at: i64,
}

/// The `ConferenceControllerActor` implementation.
pub struct ConferenceControllerActor {
    instance_id: String,
    receiver: mpsc::Receiver<ControllerMessage>,
    /// Given to each focus for handing back requests.
    own_sender: mpsc::WeakSender<ControllerMessage>,
    cancel_token: CancellationToken,
    services: SharedServices,
    /// A name may briefly have two focuses while one of them loses the bind.
    focuses: Vec<ManagedFocus>,
    accepting_new: bool,
    shutdown_timeout: Duration,
    mailbox: MailboxMonitor,
}

impl ConferenceControllerActor {
    fn new(
        receiver: mpsc::Receiver<ControllerMessage>,
        own_sender: mpsc::WeakSender<ControllerMessage>,
        cancel_token: CancellationToken,
        services: SharedServices,
    ) -> Self {
        let instance_id = services.config.instance_id.clone();
        let shutdown_timeout = services.config.shutdown_timeout();

        Self {
            mailbox: MailboxMonitor::new(ActorType::Controller, &instance_id),
            instance_id,
            receiver,
            own_sender,
            cancel_token,
            services,
            focuses: Vec::new(),
            accepting_new: true,
            shutdown_timeout,
        }
    }

    #[instrument(skip_all, name = "cc.actor.controller", fields(instance_id = %self.instance_id))]
    async fn run(mut self) {
        info!(
            target: "cc.actor.controller",
            instance_id = %self.instance_id,
            "ConferenceControllerActor started"
        );

        loop {
            self.check_focus_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "cc.actor.controller",
                        instance_id = %self.instance_id,
                        "ConferenceControllerActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.services.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "cc.actor.controller",
                                instance_id = %self.instance_id,
                                "ConferenceControllerActor channel closed, exiting"
                            );
                            self.cancel_token.cancel();
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "cc.actor.controller",
            instance_id = %self.instance_id,
            focuses_remaining = self.focuses.len(),
            messages_processed = self.mailbox.messages_processed(),
            "ConferenceControllerActor stopped"
        );
    }

    async fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::Inbound { request } => self.handle_request(request).await,

            ControllerMessage::Reroute {
                invite,
                transaction,
            } => {
                if self.accepting_new {
                    self.route_invite(invite, transaction).await;
                } else {
                    self.reply(&transaction, CcError::Draining.status_code())
                        .await;
                }
            }

            ControllerMessage::GetRoom {
                room_name,
                respond_to,
            } => {
                let result = self.get_room(&room_name).await;
                let _ = respond_to.send(result);
            }

            ControllerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            ControllerMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                let result = self.initiate_shutdown(deadline);
                let _ = respond_to.send(result);
            }
        }
    }

    async fn handle_request(&mut self, request: InboundRequest) {
        debug!(
            target: "cc.actor.controller",
            kind = request.kind(),
            call_id = %request.call_id(),
            "Inbound request"
        );

        // Not a request: nothing to accept or answer.
        if let InboundRequest::DialogTimeout { call_id } = &request {
            match self.services.registry.lookup_dialog(call_id) {
                Some(dialog) => {
                    if let Err(e) = dialog.dialog_timeout().await {
                        debug!(target: "cc.actor.controller", call_id = %call_id, error = %e, "Dialog gone on timeout");
                    }
                }
                None => {
                    debug!(target: "cc.actor.controller", call_id = %call_id, "Timeout for unknown dialog");
                }
            }
            return;
        }

        let transaction = match self.services.signaling.accept_request(&request).await {
            Ok(transaction) => transaction,
            Err(e) => {
                warn!(
                    target: "cc.actor.controller",
                    call_id = %request.call_id(),
                    error = %e,
                    "Failed to accept request"
                );
                return;
            }
        };

        match request {
            InboundRequest::Invite(invite) => {
                if !self.accepting_new {
                    prom::record_join_request(outcome::REJECTED);
                    self.reply(&transaction, CcError::Draining.status_code())
                        .await;
                    return;
                }
                self.route_invite(invite, transaction).await;
            }

            InboundRequest::Bye { call_id } => {
                let routed = match self.services.registry.lookup_dialog(&call_id) {
                    Some(dialog) => dialog.bye(transaction.clone()).await.is_ok(),
                    None => false,
                };
                if !routed {
                    self.reply(&transaction, status::CALL_DOES_NOT_EXIST).await;
                }
            }

            InboundRequest::Cancel { call_id } => {
                let routed = match self.services.registry.lookup_dialog(&call_id) {
                    Some(dialog) => dialog.cancel_invite(transaction.clone()).await.is_ok(),
                    None => false,
                };
                if !routed {
                    self.reply(&transaction, status::CALL_DOES_NOT_EXIST).await;
                }
            }

            InboundRequest::Subscribe(subscribe) => {
                let routed = match self.services.registry.lookup_dialog(&subscribe.call_id) {
                    Some(dialog) => dialog
                        .subscribe(subscribe, transaction.clone())
                        .await
                        .is_ok(),
                    None => false,
                };
                if !routed {
                    self.reply(&transaction, status::CALL_DOES_NOT_EXIST).await;
                }
            }

            InboundRequest::DialogTimeout { .. } => {}
        }
    }

    /// Focus selector: reject, forward to the existing focus or create one.
    async fn route_invite(&mut self, invite: InviteRequest, transaction: TransactionRef) {
        let selected = if self.services.registry.lookup_dialog(&invite.call_id).is_some() {
            Err(CcError::InvalidRequest(format!(
                "call {} already has a dialog",
                invite.call_id
            )))
        } else {
            select_room_name(&invite)
        };

        let room_name = match selected {
            Ok(name) => name,
            Err(e) => {
                debug!(
                    target: "cc.actor.controller",
                    call_id = %invite.call_id,
                    error = %e,
                    "Join request rejected"
                );
                prom::record_join_request(outcome::REJECTED);
                self.reply(&transaction, e.status_code()).await;
                return;
            }
        };

        let (invite, transaction) = match self.services.registry.lookup_focus(&room_name) {
            Some(focus) => match focus.try_invite(invite, transaction).await {
                Ok(()) => {
                    debug!(
                        target: "cc.actor.controller",
                        room = %room_name,
                        "Join request forwarded to existing focus"
                    );
                    prom::record_join_request(outcome::FORWARDED);
                    return;
                }
                // The focus is closing; start over with a new one.
                Err(returned) => returned,
            },
            None => (invite, transaction),
        };

        let (handle, task_handle) = FocusActor::spawn(
            room_name.clone(),
            invite,
            transaction,
            self.own_sender.clone(),
            self.services.clone(),
            self.cancel_token.child_token(),
        );
        self.focuses.push(ManagedFocus {
            handle,
            task_handle,
            created_at: chrono::Utc::now().timestamp(),
        });
        prom::record_join_request(outcome::CREATED);

        info!(
            target: "cc.actor.controller",
            instance_id = %self.instance_id,
            room = %room_name,
            total_focuses = self.focuses.len(),
            "Focus spawned"
        );
    }

    async fn get_room(&self, room_name: &str) -> Result<RoomInfo, CcError> {
        let focus = self
            .services
            .registry
            .lookup_focus(room_name)
            .ok_or_else(|| CcError::NotFound(format!("room {room_name}")))?;
        let focus_status = focus.get_status().await?;

        let participant_count = match self.services.registry.lookup_room(room_name) {
            Some(room) => room.get_snapshot().await?.participants.len(),
            None => 0,
        };

        Ok(RoomInfo {
            room_name: room_name.to_string(),
            participant_count,
            dialog_count: focus_status.dialog_count,
            created_at: focus_status.created_at,
        })
    }

    fn get_status(&self) -> ControllerStatus {
        ControllerStatus {
            focus_count: self.focuses.len(),
            room_count: self.services.metrics.room_count(),
            leg_count: self.services.metrics.leg_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    fn initiate_shutdown(&mut self, deadline: Duration) -> Result<(), CcError> {
        info!(
            target: "cc.actor.controller",
            instance_id = %self.instance_id,
            focus_count = self.focuses.len(),
            "Initiating graceful shutdown"
        );

        self.accepting_new = false;
        self.shutdown_timeout = deadline;
        self.cancel_token.cancel();

        Ok(())
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "cc.actor.controller",
            instance_id = %self.instance_id,
            focus_count = self.focuses.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        for managed in &self.focuses {
            managed.handle.cancel();
        }

        for managed in self.focuses.drain(..) {
            let room = managed.handle.room_name().to_string();
            match tokio::time::timeout(self.shutdown_timeout, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "cc.actor.controller",
                        room = %room,
                        "Focus actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "cc.actor.controller",
                        room = %room,
                        error = ?e,
                        "Focus actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "cc.actor.controller",
                        room = %room,
                        "Focus actor shutdown timed out"
                    );
                }
            }
        }

        info!(
            target: "cc.actor.controller",
            instance_id = %self.instance_id,
            "Graceful shutdown complete"
        );
    }

    async fn reply(&self, transaction: &TransactionRef, status: u16) {
        if let Err(e) = self
            .services
            .signaling
            .reply(transaction, Reply::status(status))
            .await
        {
            warn!(
                target: "cc.actor.controller",
                status,
                error = %e,
                "Failed to send reply"
            );
        }
    }

    /// Check health of managed focus actors.
    async fn check_focus_health(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) = self
            .focuses
            .drain(..)
            .partition(|managed| managed.task_handle.is_finished());
        self.focuses = running;

        for managed in finished {
            let room = managed.handle.room_name().to_string();
            let lifetime = chrono::Utc::now().timestamp() - managed.created_at;
            match managed.task_handle.await {
                Ok(()) => {
                    debug!(
                        target: "cc.actor.controller",
                        room = %room,
                        lifetime_seconds = lifetime,
                        "Focus actor exited"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "cc.actor.controller",
                            room = %room,
                            error = ?join_error,
                            "Focus actor panicked"
                        );
                        self.services.metrics.record_panic(ActorType::Focus);
                    }
                }
            }
        }
    }
}
