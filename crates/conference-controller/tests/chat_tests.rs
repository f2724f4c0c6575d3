//! Chat relay, recording, nickname and composing integration tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use conference_test_utils::mocks::wait_until;
use conference_controller::collaborators::MediaEvent;
use conference_controller::composing::ComposeState;
use conference_controller::config::Config;
use conference_controller::errors::status;
use conference_test_utils::{init_test_tracing, TestConference, TestSubscribe};

/// Test the A/B chat scenario with a recording opened before the send.
#[tokio::test]
async fn test_chat_is_relayed_and_recorded() -> Result<(), anyhow::Error> {
    init_test_tracing();
    let dir = tempfile::tempdir()?;
    let conference = TestConference::with_config(Config {
        recording_dir: Some(dir.path().to_path_buf()),
        ..Config::default()
    });

    let alice = conference.join("alice", "alpha").await;
    let bob = conference.join("bob", "alpha").await;
    assert!(conference.wait_for_participants("alpha", 2).await);

    let room = conference.registry.lookup_room("alpha").unwrap();
    room.start_recording("alpha.log".to_string()).await?;

    alice.inject_chat("hi").await?;

    assert!(wait_until(|| bob.chat_deliveries().len() == 1).await);
    assert_eq!(bob.chat_deliveries(), vec!["hi".to_string()]);
    assert!(alice.chat_deliveries().is_empty());

    let bytes = room.stop_recording("alpha.log".to_string()).await?;
    let written = std::fs::read_to_string(dir.path().join("alpha.log"))?;
    assert_eq!(
        written,
        "<message entity=\"sip:alice@example.com\" nickname=\"\">hi</message>\n"
    );
    assert_eq!(bytes, written.len() as u64);

    Ok(())
}

/// Test that every joining caller is greeted before chatting.
#[tokio::test]
async fn test_callers_receive_welcome_prompts() -> Result<(), anyhow::Error> {
    let conference = TestConference::new();

    let alice = conference.join("alice", "alpha").await;

    assert!(wait_until(|| alice.prompts().len() == 1).await);
    let prompt = alice.prompts().pop().unwrap();
    let config = Config::default();
    let expected: String = config
        .welcome_prompts
        .iter()
        .map(|line| format!("{line}\r\n"))
        .collect();
    assert_eq!(prompt, expected);
    assert!(prompt.ends_with("\r\n"));

    Ok(())
}

/// Test that nicknames are unique per room, ignoring case.
#[tokio::test]
async fn test_nickname_uniqueness() -> Result<(), anyhow::Error> {
    let conference = TestConference::new();
    let alice = conference.join("alice", "alpha").await;
    let bob = conference.join("bob", "alpha").await;
    let carol = conference.join("carol", "beta").await;
    assert!(conference.wait_for_participants("alpha", 2).await);
    assert!(conference.wait_for_participants("beta", 1).await);

    alice
        .inject(MediaEvent::NicknameRequest {
            request_id: "n1".to_string(),
            nickname: "Neo".to_string(),
        })
        .await?;
    assert!(wait_until(|| alice.nickname_results().len() == 1).await);

    bob.inject(MediaEvent::NicknameRequest {
        request_id: "n2".to_string(),
        nickname: "neo".to_string(),
    })
    .await?;
    // Another room does not conflict.
    carol
        .inject(MediaEvent::NicknameRequest {
            request_id: "n3".to_string(),
            nickname: "NEO".to_string(),
        })
        .await?;
    // Renaming to a different case of one's own name is allowed.
    alice
        .inject(MediaEvent::NicknameRequest {
            request_id: "n4".to_string(),
            nickname: "NEO".to_string(),
        })
        .await?;

    assert!(wait_until(|| bob.nickname_results().len() == 1).await);
    assert!(wait_until(|| carol.nickname_results().len() == 1).await);
    assert!(wait_until(|| alice.nickname_results().len() == 2).await);

    assert_eq!(
        alice.nickname_results(),
        vec![("n1".to_string(), status::OK), ("n4".to_string(), status::OK)]
    );
    assert_eq!(
        bob.nickname_results(),
        vec![("n2".to_string(), status::NICKNAME_IN_USE)]
    );
    assert_eq!(carol.nickname_results(), vec![("n3".to_string(), status::OK)]);

    Ok(())
}

/// Test that composing indications reach other participants' subscriptions.
#[tokio::test]
async fn test_composing_is_published_and_ended_by_chat() -> Result<(), anyhow::Error> {
    let conference = TestConference::new();
    let alice = conference.join("alice", "alpha").await;
    conference.join("bob", "alpha").await;
    assert!(conference.wait_for_participants("alpha", 2).await);

    conference.subscribe(TestSubscribe::new("bob")).await;
    assert!(wait_until(|| !conference.signaling.notifies_for("bob").is_empty()).await);

    alice
        .inject(MediaEvent::StatusUpdate {
            state: ComposeState::Active,
            refresh_seconds: Some(90),
        })
        .await?;
    assert!(wait_until(|| conference
        .signaling
        .notifies_for("bob")
        .iter()
        .any(|n| n.body.content.contains("<isComposing state=\"active\"/>")))
    .await);

    let before_chat = conference.signaling.notifies_for("bob").len();
    alice.inject_chat("done typing").await?;
    assert!(wait_until(|| conference.signaling.notifies_for("bob").len() > before_chat).await);

    let latest = conference.signaling.notifies_for("bob").pop().unwrap();
    assert!(!latest.body.content.contains("state=\"active\""));
    assert!(latest.subscription_state.starts_with("active;expires="));

    Ok(())
}
