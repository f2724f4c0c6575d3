//! A controller wired to mock collaborators.

use std::sync::Arc;
use std::time::Duration;

use conference_controller::actors::{ConferenceControllerHandle, SharedServices};
use conference_controller::collaborators::{InboundRequest, MediaTransport, SignalingEndpoint};
use conference_controller::config::Config;
use conference_controller::registry::RoomRegistry;

use crate::fixtures::{TestInvite, TestSubscribe};
use crate::mocks::{wait_until, MockMediaTransport, MockSessionRecord, MockSignaling};

/// Controller plus the mocks it talks to.
pub struct TestConference {
    pub controller: ConferenceControllerHandle,
    pub signaling: Arc<MockSignaling>,
    pub transport: Arc<MockMediaTransport>,
    pub registry: Arc<RoomRegistry>,
    services: SharedServices,
}

impl TestConference {
    /// Controller with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self::with_transport(config, Arc::new(MockMediaTransport::new()))
    }

    #[must_use]
    pub fn with_transport(config: Config, transport: Arc<MockMediaTransport>) -> Self {
        let signaling = Arc::new(MockSignaling::new());
        let services = SharedServices::new(
            config,
            Arc::clone(&signaling) as Arc<dyn SignalingEndpoint>,
            Arc::clone(&transport) as Arc<dyn MediaTransport>,
        );

        Self {
            controller: ConferenceControllerHandle::new(services.clone()),
            registry: Arc::clone(&services.registry),
            signaling,
            transport,
            services,
        }
    }

    /// Start another controller instance over the same registry and mocks.
    #[must_use]
    pub fn spawn_peer(&self) -> ConferenceControllerHandle {
        ConferenceControllerHandle::new(self.services.clone())
    }

    /// Deliver a request to the controller.
    pub async fn send(&self, request: InboundRequest) {
        self.controller
            .handle_request(request)
            .await
            .expect("controller accepts requests");
    }

    /// Join `room` as `call_id` and wait for the answer.
    ///
    /// Returns the media session opened for the call.
    pub async fn join(&self, call_id: &str, room: &str) -> Arc<MockSessionRecord> {
        self.join_with(TestInvite::new(call_id, room)).await
    }

    /// Send a custom join request (tagged with its call id) and wait for the answer.
    pub async fn join_with(&self, invite: TestInvite) -> Arc<MockSessionRecord> {
        let request = invite.build();
        let call_id = request.call_id.clone();
        self.send(InboundRequest::Invite(request)).await;

        assert!(
            wait_until(|| self.signaling.answers_for(&call_id).len() == 1).await,
            "call {call_id} was not answered"
        );
        self.transport
            .session_for_offer(&call_id)
            .expect("answered call has a media session")
    }

    /// Send a join request without waiting for any outcome.
    pub async fn invite(&self, call_id: &str, room: &str) {
        self.send(TestInvite::new(call_id, room).into_request()).await;
    }

    pub async fn hang_up(&self, call_id: &str) {
        self.send(InboundRequest::Bye {
            call_id: call_id.to_string(),
        })
        .await;
    }

    pub async fn subscribe(&self, subscribe: TestSubscribe) {
        self.send(subscribe.into_request()).await;
    }

    /// Wait until `call_id` has received a final reply with `status`.
    pub async fn wait_for_reply(&self, call_id: &str, status: u16) -> bool {
        wait_until(|| self.signaling.replies_for(call_id).contains(&status)).await
    }

    /// Wait until the room exists and lists `count` participants.
    pub async fn wait_for_participants(&self, room: &str, count: usize) -> bool {
        for _ in 0..200 {
            if let Ok(info) = self.controller.get_room(room.to_string()).await {
                if info.participant_count == count {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        false
    }
}

impl Default for TestConference {
    fn default() -> Self {
        Self::new()
    }
}
