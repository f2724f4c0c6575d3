//! Focus selection integration tests.
//!
//! Join requests enter through `ConferenceControllerHandle` and are routed to
//! the single focus of their room, using the `TestConference` harness.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use conference_test_utils::mocks::wait_until;
use conference_controller::errors::status;
use conference_test_utils::{init_test_tracing, TestConference, TestInvite};

/// Test that two instances racing for the same name end up sharing one room.
#[tokio::test]
async fn test_concurrent_creates_yield_one_room() -> Result<(), anyhow::Error> {
    init_test_tracing();
    let conference = TestConference::new();
    let peer = conference.spawn_peer();

    conference.invite("alice", "alpha").await;
    peer.handle_request(TestInvite::new("bob", "alpha").into_request())
        .await?;

    assert!(wait_until(|| conference.signaling.answers_for("alice").len() == 1).await);
    assert!(wait_until(|| conference.signaling.answers_for("bob").len() == 1).await);

    assert_eq!(conference.registry.focus_count(), 1);
    assert_eq!(conference.registry.room_count(), 1);
    assert_eq!(conference.transport.open_count(), 2);
    assert!(conference.wait_for_participants("alpha", 2).await);

    let info = peer.get_room("alpha".to_string()).await?;
    assert_eq!(info.dialog_count, 2);

    Ok(())
}

/// Test that a second caller is forwarded to the existing focus.
#[tokio::test]
async fn test_second_caller_joins_existing_room() -> Result<(), anyhow::Error> {
    let conference = TestConference::new();

    conference.join("alice", "alpha").await;
    conference.join("bob", "alpha").await;

    let status = conference.controller.get_status().await?;
    assert_eq!(status.focus_count, 1);
    assert_eq!(status.room_count, 1);
    assert!(conference.wait_for_participants("alpha", 2).await);

    Ok(())
}

/// Test that different rooms get different focuses.
#[tokio::test]
async fn test_rooms_are_independent() -> Result<(), anyhow::Error> {
    let conference = TestConference::new();

    conference.join("alice", "alpha").await;
    conference.join("bob", "beta").await;

    assert_eq!(conference.registry.focus_count(), 2);
    assert!(conference.wait_for_participants("alpha", 1).await);
    assert!(conference.wait_for_participants("beta", 1).await);

    Ok(())
}

/// Test that join requests the selector cannot place are refused.
#[tokio::test]
async fn test_unroutable_joins_are_refused() -> Result<(), anyhow::Error> {
    let conference = TestConference::new();

    conference
        .send(TestInvite::new("audio", "alpha").audio_only().into_request())
        .await;
    conference
        .send(TestInvite::new("bare", "alpha").without_offer().into_request())
        .await;
    conference
        .send(
            TestInvite::new("noname", "alpha")
                .to_uri("sip:@chat.example.com")
                .into_request(),
        )
        .await;
    conference
        .send(TestInvite::new("redo", "alpha").in_dialog().into_request())
        .await;

    assert!(conference.wait_for_reply("audio", status::NOT_ACCEPTABLE_HERE).await);
    assert!(conference.wait_for_reply("bare", status::NOT_ACCEPTABLE_HERE).await);
    assert!(conference.wait_for_reply("noname", status::SERVICE_UNAVAILABLE).await);
    assert!(conference.wait_for_reply("redo", status::BAD_REQUEST).await);

    assert_eq!(conference.registry.focus_count(), 0);
    assert_eq!(conference.transport.open_count(), 0);

    Ok(())
}

/// Test that a repeated join for a live call is not treated as new.
#[tokio::test]
async fn test_duplicate_call_is_rejected() -> Result<(), anyhow::Error> {
    let conference = TestConference::new();
    conference.join("alice", "alpha").await;

    conference.invite("alice", "alpha").await;

    assert!(conference.wait_for_reply("alice", status::BAD_REQUEST).await);
    assert_eq!(conference.signaling.answers_for("alice").len(), 1);
    assert_eq!(conference.transport.open_count(), 1);

    Ok(())
}

/// Test that the room name is reusable once the last caller leaves.
#[tokio::test]
async fn test_room_recreated_after_teardown() -> Result<(), anyhow::Error> {
    let conference = TestConference::new();
    conference.join("alice", "alpha").await;

    conference.hang_up("alice").await;
    assert!(wait_until(|| conference.registry.focus_count() == 0).await);
    assert!(wait_until(|| conference.registry.room_count() == 0).await);

    let session = conference.join("bob", "alpha").await;
    assert!(session.local_description.contains("m=message"));
    assert_eq!(conference.registry.room_count(), 1);

    let answer = conference.signaling.answers_for("bob").pop().unwrap();
    assert!(answer.content.contains("m=message"));
    assert!(conference.wait_for_participants("alpha", 1).await);

    let info = conference.controller.get_room("alpha".to_string()).await?;
    assert_eq!(info.room_name, "alpha");

    Ok(())
}
