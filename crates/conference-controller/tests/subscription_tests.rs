//! Conference subscription integration tests.
//!
//! Timer-driven tests run with a paused clock; keepalive probing is pushed out
//! of the way so legs stay up for the whole simulated hour.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use conference_test_utils::mocks::wait_until;
use conference_controller::config::Config;
use conference_controller::errors::status;
use conference_test_utils::{TestConference, TestSubscribe};

fn quiet_config() -> Config {
    Config {
        keepalive_tick_seconds: 86_400,
        ..Config::default()
    }
}

/// Count `<user ` elements in a conference-info document.
fn user_elements(document: &str) -> usize {
    document.matches("<user ").count()
}

/// Test that a long subscription is capped, notified, then expires.
#[tokio::test(start_paused = true)]
async fn test_subscription_capped_then_terminated() -> Result<(), anyhow::Error> {
    let conference = TestConference::with_config(quiet_config());
    conference.join("alice", "alpha").await;
    assert!(conference.wait_for_participants("alpha", 1).await);

    conference
        .subscribe(TestSubscribe::new("alice").expires(7200).event_id("conf"))
        .await;

    assert!(wait_until(|| !conference.signaling.notifies_for("alice").is_empty()).await);
    assert!(conference
        .signaling
        .replies_with_expiry("alice")
        .contains(&(status::OK, Some(3600))));

    let first = conference.signaling.notifies_for("alice").remove(0);
    assert_eq!(first.subscription_state, "active;expires=3600");
    assert_eq!(first.event_package, "conference");
    assert_eq!(first.event_id.as_deref(), Some("conf"));
    assert!(first.body.content.contains("<user-count>1</user-count>"));
    assert_eq!(user_elements(&first.body.content), 1);

    tokio::time::sleep(Duration::from_secs(3601)).await;
    assert!(wait_until(|| conference
        .signaling
        .notifies_for("alice")
        .iter()
        .any(|n| n.subscription_state == "terminated;reason=timeout"))
    .await);
    let sent = conference.signaling.notifies_for("alice").len();

    // Roster changes after expiry are not notified.
    conference.join("bob", "alpha").await;
    assert!(conference.wait_for_participants("alpha", 2).await);
    assert_eq!(conference.signaling.notifies_for("alice").len(), sent);

    Ok(())
}

/// Test that roster size matches the user count in every document.
#[tokio::test]
async fn test_documents_count_every_user() -> Result<(), anyhow::Error> {
    let conference = TestConference::new();
    conference.join("alice", "alpha").await;
    conference.subscribe(TestSubscribe::new("alice")).await;
    assert!(wait_until(|| !conference.signaling.notifies_for("alice").is_empty()).await);

    conference.join("bob", "alpha").await;
    conference.join("carol", "alpha").await;
    assert!(wait_until(|| conference
        .signaling
        .notifies_for("alice")
        .iter()
        .any(|n| n.body.content.contains("<user-count>3</user-count>")))
    .await);

    for notify in conference.signaling.notifies_for("alice") {
        let document = &notify.body.content;
        let users = user_elements(document);
        assert!(document.contains(&format!("<user-count>{users}</user-count>")));
    }

    let replies = conference.signaling.replies_with_expiry("alice");
    assert!(replies.contains(&(status::OK, Some(3600))));

    Ok(())
}

/// Test that a subscription with zero expiry is answered and terminated.
#[tokio::test]
async fn test_unsubscribe_terminates() -> Result<(), anyhow::Error> {
    let conference = TestConference::new();
    conference.join("alice", "alpha").await;

    conference
        .subscribe(TestSubscribe::new("alice").expires(0))
        .await;

    assert!(wait_until(|| conference.signaling.notifies_for("alice").len() == 1).await);
    let notify = conference.signaling.notifies_for("alice").pop().unwrap();
    assert_eq!(notify.subscription_state, "terminated;reason=timeout");

    Ok(())
}

/// Test that other event packages and unknown calls are refused.
#[tokio::test]
async fn test_subscription_refusals() -> Result<(), anyhow::Error> {
    let conference = TestConference::new();
    conference.join("alice", "alpha").await;

    conference
        .subscribe(TestSubscribe::new("alice").event_package("presence"))
        .await;
    conference.subscribe(TestSubscribe::new("nobody")).await;

    assert!(conference.wait_for_reply("alice", status::BAD_EVENT).await);
    assert!(conference.wait_for_reply("nobody", status::CALL_DOES_NOT_EXIST).await);
    assert!(conference.signaling.notifies_for("alice").is_empty());

    Ok(())
}
