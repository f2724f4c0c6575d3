//! Mock collaborators for unit and integration testing.
//!
//! Both mocks record every call so tests can assert on the exact protocol
//! traffic the controller produced, and both can be switched into failure
//! modes to exercise the error paths.

use super::{
    Body, DialogRef, InboundRequest, MediaEvent, MediaSession, MediaTransport, Notify, Reply,
    SignalingEndpoint, TransactionRef,
};
use crate::errors::CcError;

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Poll `condition` until it holds, yielding to other tasks in between.
///
/// Mostly yields, with an occasional 1ms sleep, so it stays well below the
/// controller's own timers even under a paused clock.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for attempt in 0..2000u32 {
        if condition() {
            return true;
        }
        if attempt % 10 == 9 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        } else {
            tokio::task::yield_now().await;
        }
    }
    condition()
}

/// One call made on [`MockSignaling`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingCall {
    Accept {
        kind: &'static str,
        call_id: String,
        transaction: TransactionRef,
    },
    Reply {
        call_id: String,
        transaction: TransactionRef,
        reply: Reply,
    },
    Answer {
        call_id: String,
        body: Body,
    },
    Bye {
        call_id: String,
    },
    Notify {
        call_id: String,
        notify: Notify,
    },
}

/// Mock signaling endpoint.
#[derive(Default)]
pub struct MockSignaling {
    calls: Mutex<Vec<SignalingCall>>,
    transactions: Mutex<HashMap<TransactionRef, String>>,
    next_transaction: AtomicUsize,
    fail_accept: AtomicBool,
    fail_answer: AtomicBool,
}

impl MockSignaling {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `answer` call fail.
    pub fn set_fail_answer(&self, fail: bool) {
        self.fail_answer.store(fail, Ordering::SeqCst);
    }

    /// Make every `accept_request` call fail.
    pub fn set_fail_accept(&self, fail: bool) {
        self.fail_accept.store(fail, Ordering::SeqCst);
    }

    /// All calls in order.
    #[must_use]
    pub fn calls(&self) -> Vec<SignalingCall> {
        lock(&self.calls).clone()
    }

    /// Status codes replied on transactions belonging to `call_id`, in order.
    #[must_use]
    pub fn replies_for(&self, call_id: &str) -> Vec<u16> {
        self.replies_with_expiry(call_id)
            .into_iter()
            .map(|(status, _)| status)
            .collect()
    }

    /// Status codes plus expiry for replies belonging to `call_id`.
    #[must_use]
    pub fn replies_with_expiry(&self, call_id: &str) -> Vec<(u16, Option<u32>)> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                SignalingCall::Reply { call_id: c, reply, .. } if c == call_id => {
                    Some((reply.status, reply.expires))
                }
                _ => None,
            })
            .collect()
    }

    /// Answer bodies sent for `call_id`.
    #[must_use]
    pub fn answers_for(&self, call_id: &str) -> Vec<Body> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                SignalingCall::Answer { call_id: c, body } if c == call_id => Some(body.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of hangups sent on the dialog of `call_id`.
    #[must_use]
    pub fn byes_for(&self, call_id: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| matches!(call, SignalingCall::Bye { call_id: c } if c == call_id))
            .count()
    }

    /// Notifications sent on the dialog of `call_id`.
    #[must_use]
    pub fn notifies_for(&self, call_id: &str) -> Vec<Notify> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                SignalingCall::Notify { call_id: c, notify } if c == call_id => {
                    Some(notify.clone())
                }
                _ => None,
            })
            .collect()
    }

    fn call_id_for(&self, transaction: &TransactionRef) -> String {
        lock(&self.transactions)
            .get(transaction)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, call: SignalingCall) {
        lock(&self.calls).push(call);
    }
}

fn dialog_call_id(dialog: &DialogRef) -> String {
    dialog
        .0
        .strip_prefix("dialog:")
        .unwrap_or(&dialog.0)
        .to_string()
}

#[async_trait::async_trait]
impl SignalingEndpoint for MockSignaling {
    async fn accept_request(&self, request: &InboundRequest) -> Result<TransactionRef, CcError> {
        if self.fail_accept.load(Ordering::SeqCst) {
            return Err(CcError::Collaborator("Mock accept failure".to_string()));
        }

        let n = self.next_transaction.fetch_add(1, Ordering::SeqCst);
        let transaction = TransactionRef(format!("{}-{}-{n}", request.kind(), request.call_id()));
        lock(&self.transactions).insert(transaction.clone(), request.call_id().to_string());
        self.record(SignalingCall::Accept {
            kind: request.kind(),
            call_id: request.call_id().to_string(),
            transaction: transaction.clone(),
        });
        Ok(transaction)
    }

    async fn reply(&self, transaction: &TransactionRef, reply: Reply) -> Result<(), CcError> {
        let call_id = self.call_id_for(transaction);
        self.record(SignalingCall::Reply {
            call_id,
            transaction: transaction.clone(),
            reply,
        });
        Ok(())
    }

    async fn answer(&self, transaction: &TransactionRef, body: Body) -> Result<DialogRef, CcError> {
        if self.fail_answer.load(Ordering::SeqCst) {
            return Err(CcError::Collaborator("Mock answer failure".to_string()));
        }

        let call_id = self.call_id_for(transaction);
        let dialog = DialogRef(format!("dialog:{call_id}"));
        self.record(SignalingCall::Answer { call_id, body });
        Ok(dialog)
    }

    async fn send_bye(&self, dialog: &DialogRef) -> Result<(), CcError> {
        self.record(SignalingCall::Bye {
            call_id: dialog_call_id(dialog),
        });
        Ok(())
    }

    async fn send_notify(&self, dialog: &DialogRef, notify: Notify) -> Result<(), CcError> {
        self.record(SignalingCall::Notify {
            call_id: dialog_call_id(dialog),
            notify,
        });
        Ok(())
    }
}

/// One message sent through a [`MockSessionRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMedia {
    Content {
        content_type: String,
        content: Bytes,
    },
    Wrapped {
        wrap_type: String,
        from: String,
        to: String,
        content: Bytes,
    },
    NicknameResult {
        request_id: String,
        status: u16,
    },
}

/// State of one session opened through [`MockMediaTransport`].
#[derive(Debug)]
pub struct MockSessionRecord {
    pub connection_id: String,
    pub remote_description: Option<String>,
    pub local_description: String,
    events: mpsc::Sender<MediaEvent>,
    sent: Mutex<Vec<SentMedia>>,
    closed: AtomicBool,
    close_count: AtomicUsize,
}

impl MockSessionRecord {
    /// Deliver an inbound media event to the leg.
    pub async fn inject(&self, event: MediaEvent) -> Result<(), CcError> {
        self.events
            .send(event)
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))
    }

    /// Deliver a complete text chat message to the leg.
    pub async fn inject_chat(&self, text: &str) -> Result<(), CcError> {
        self.inject(MediaEvent::ContentReceived {
            complete: true,
            size: text.len() as u64,
            content_type: "text/plain".to_string(),
            content: Bytes::copy_from_slice(text.as_bytes()),
        })
        .await
    }

    #[must_use]
    pub fn sent(&self) -> Vec<SentMedia> {
        lock(&self.sent).clone()
    }

    /// Non-empty plain content delivered to this participant, as text.
    #[must_use]
    pub fn chat_deliveries(&self) -> Vec<String> {
        lock(&self.sent)
            .iter()
            .filter_map(|m| match m {
                SentMedia::Content { content, .. } if !content.is_empty() => {
                    Some(String::from_utf8_lossy(content).into_owned())
                }
                _ => None,
            })
            .collect()
    }

    /// Empty sends (keepalive probes).
    #[must_use]
    pub fn probe_count(&self) -> usize {
        lock(&self.sent)
            .iter()
            .filter(|m| matches!(m, SentMedia::Content { content, .. } if content.is_empty()))
            .count()
    }

    /// Wrapped prompt texts delivered to this participant.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.sent)
            .iter()
            .filter_map(|m| match m {
                SentMedia::Wrapped { content, .. } => {
                    Some(String::from_utf8_lossy(content).into_owned())
                }
                _ => None,
            })
            .collect()
    }

    /// Nickname result statuses keyed by request id, in order.
    #[must_use]
    pub fn nickname_results(&self) -> Vec<(String, u16)> {
        lock(&self.sent)
            .iter()
            .filter_map(|m| match m {
                SentMedia::NicknameResult { request_id, status } => {
                    Some((request_id.clone(), *status))
                }
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

struct MockSession(Arc<MockSessionRecord>);

#[async_trait::async_trait]
impl MediaSession for MockSession {
    fn local_description(&self) -> Option<String> {
        Some(self.0.local_description.clone())
    }

    async fn send(&self, content_type: &str, content: Bytes) -> Result<(), CcError> {
        if self.0.is_closed() {
            return Err(CcError::Collaborator("session closed".to_string()));
        }
        lock(&self.0.sent).push(SentMedia::Content {
            content_type: content_type.to_string(),
            content,
        });
        Ok(())
    }

    async fn send_wrapped(
        &self,
        wrap_type: &str,
        from: &str,
        to: &str,
        content: Bytes,
    ) -> Result<(), CcError> {
        if self.0.is_closed() {
            return Err(CcError::Collaborator("session closed".to_string()));
        }
        lock(&self.0.sent).push(SentMedia::Wrapped {
            wrap_type: wrap_type.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            content,
        });
        Ok(())
    }

    async fn send_nickname_result(&self, request_id: &str, status: u16) -> Result<(), CcError> {
        lock(&self.0.sent).push(SentMedia::NicknameResult {
            request_id: request_id.to_string(),
            status,
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), CcError> {
        self.0.closed.store(true, Ordering::SeqCst);
        self.0.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Mock media transport.
#[derive(Default)]
pub struct MockMediaTransport {
    sessions: Mutex<Vec<Arc<MockSessionRecord>>>,
    fail_open: AtomicBool,
    open_count: AtomicUsize,
}

impl MockMediaTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport whose `open` always fails.
    #[must_use]
    pub fn failing() -> Self {
        let transport = Self::default();
        transport.set_fail_open(true);
        transport
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Number of `open` calls, failed ones included.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<MockSessionRecord>> {
        lock(&self.sessions).clone()
    }

    #[must_use]
    pub fn session(&self, connection_id: &str) -> Option<Arc<MockSessionRecord>> {
        lock(&self.sessions)
            .iter()
            .find(|s| s.connection_id == connection_id)
            .cloned()
    }

    /// First session whose remote description contains `marker`.
    #[must_use]
    pub fn session_for_offer(&self, marker: &str) -> Option<Arc<MockSessionRecord>> {
        lock(&self.sessions)
            .iter()
            .find(|s| {
                s.remote_description
                    .as_deref()
                    .is_some_and(|sdp| sdp.contains(marker))
            })
            .cloned()
    }
}

#[async_trait::async_trait]
impl MediaTransport for MockMediaTransport {
    async fn open(
        &self,
        connection_id: &str,
        remote_description: Option<&str>,
        events: mpsc::Sender<MediaEvent>,
    ) -> Result<Box<dyn MediaSession>, CcError> {
        self.open_count.fetch_add(1, Ordering::SeqCst);

        if self.fail_open.load(Ordering::SeqCst) {
            return Err(CcError::Collaborator("Mock media open failure".to_string()));
        }

        let record = Arc::new(MockSessionRecord {
            connection_id: connection_id.to_string(),
            remote_description: remote_description.map(ToString::to_string),
            local_description: format!(
                "v=0\r\no=focus 1 1 IN IP4 127.0.0.1\r\ns=-\r\nc=IN IP4 127.0.0.1\r\nt=0 0\r\nm=message 2855 TCP/MSRP *\r\na=path:msrp://127.0.0.1:2855/{connection_id};tcp\r\n"
            ),
            events,
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            close_count: AtomicUsize::new(0),
        });
        lock(&self.sessions).push(Arc::clone(&record));
        Ok(Box::new(MockSession(record)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::collaborators::EntityAddress;
    use crate::collaborators::InviteRequest;

    fn invite(call_id: &str) -> InboundRequest {
        InboundRequest::Invite(InviteRequest {
            call_id: call_id.to_string(),
            from: EntityAddress::new("sip:alice@example.com"),
            to: EntityAddress::new("sip:alpha@chat.example.com"),
            body: None,
            in_dialog: false,
        })
    }

    #[tokio::test]
    async fn test_mock_signaling_tracks_replies_by_call() {
        let signaling = MockSignaling::new();

        let tx1 = signaling.accept_request(&invite("call-1")).await.unwrap();
        let tx2 = signaling.accept_request(&invite("call-2")).await.unwrap();
        signaling.reply(&tx1, Reply::status(180)).await.unwrap();
        signaling.reply(&tx2, Reply::status(503)).await.unwrap();
        let dialog = signaling.answer(&tx1, Body::sdp("v=0")).await.unwrap();
        signaling.send_bye(&dialog).await.unwrap();

        assert_eq!(signaling.replies_for("call-1"), vec![180]);
        assert_eq!(signaling.replies_for("call-2"), vec![503]);
        assert_eq!(signaling.answers_for("call-1").len(), 1);
        assert_eq!(signaling.byes_for("call-1"), 1);
        assert_eq!(signaling.byes_for("call-2"), 0);
    }

    #[tokio::test]
    async fn test_mock_signaling_failures() {
        let signaling = MockSignaling::new();
        signaling.set_fail_accept(true);
        assert!(signaling.accept_request(&invite("call-1")).await.is_err());

        signaling.set_fail_accept(false);
        signaling.set_fail_answer(true);
        let tx = signaling.accept_request(&invite("call-1")).await.unwrap();
        assert!(signaling.answer(&tx, Body::sdp("v=0")).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_transport_records_sessions() {
        let transport = MockMediaTransport::new();
        let (tx, mut rx) = mpsc::channel(4);

        let session = transport
            .open("conn-1", Some("m=message 1 TCP/MSRP *\r\na=path:alice"), tx)
            .await
            .unwrap();
        assert!(session
            .local_description()
            .unwrap()
            .contains("msrp://127.0.0.1:2855/conn-1"));

        session.send("text/plain", Bytes::from_static(b"hi")).await.unwrap();
        session.send("text/plain", Bytes::new()).await.unwrap();
        session.close().await.unwrap();

        let record = transport.session_for_offer("alice").unwrap();
        assert_eq!(record.chat_deliveries(), vec!["hi".to_string()]);
        assert_eq!(record.probe_count(), 1);
        assert!(record.is_closed());
        assert!(session.send("text/plain", Bytes::from_static(b"late")).await.is_err());

        record.inject(MediaEvent::ReportReceived).await.unwrap();
        assert_eq!(rx.recv().await, Some(MediaEvent::ReportReceived));
    }

    #[tokio::test]
    async fn test_mock_transport_failing() {
        let transport = MockMediaTransport::failing();
        let (tx, _rx) = mpsc::channel(1);
        assert!(transport.open("conn-1", None, tx).await.is_err());
        assert_eq!(transport.open_count(), 1);
        assert!(transport.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_wait_until() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = Arc::clone(&flag);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            setter.store(true, Ordering::SeqCst);
        });
        assert!(wait_until(|| flag.load(Ordering::SeqCst)).await);
    }
}
