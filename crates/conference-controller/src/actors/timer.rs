//! Owner-scoped timers delivered as mailbox messages.
//!
//! Each actor keeps one [`TimerSet`] keyed by its own timer-kind enum. Arming
//! a kind replaces (and aborts) any previous timer of that kind. Expiry is a
//! message built by the caller-supplied constructor and sent to the owner's
//! mailbox, carrying the sequence id it was armed with. The owner passes that
//! id to [`TimerSet::fire`]; a mismatch means the timer was cancelled or
//! re-armed after the message was queued and the event must be ignored.
//!
//! Timer tasks hold only a weak sender, so pending timers never keep an
//! actor's mailbox open.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct Slot {
    seq: u64,
    task: JoinHandle<()>,
}

/// Set of named one-shot timers owned by a single actor.
pub struct TimerSet<K> {
    slots: HashMap<K, Slot>,
    next_seq: u64,
}

impl<K> Default for TimerSet<K> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<K> std::fmt::Debug for TimerSet<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerSet")
            .field("armed", &self.slots.len())
            .field("next_seq", &self.next_seq)
            .finish()
    }
}

impl<K> TimerSet<K>
where
    K: Copy + Eq + Hash + Send + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind` to fire after `after`, replacing any armed timer of the
    /// same kind. Returns the sequence id of the new timer.
    pub fn arm<M, F>(
        &mut self,
        kind: K,
        after: Duration,
        mailbox: &mpsc::WeakSender<M>,
        make: F,
    ) -> u64
    where
        M: Send + 'static,
        F: FnOnce(K, u64) -> M + Send + 'static,
    {
        self.cancel(kind);

        self.next_seq = self.next_seq.wrapping_add(1);
        let seq = self.next_seq;
        let mailbox = mailbox.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(sender) = mailbox.upgrade() {
                let _ = sender.send(make(kind, seq)).await;
            }
        });

        self.slots.insert(kind, Slot { seq, task });
        seq
    }

    /// Cancel `kind`. Returns true if a timer was armed.
    pub fn cancel(&mut self, kind: K) -> bool {
        match self.slots.remove(&kind) {
            Some(slot) => {
                slot.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, slot) in self.slots.drain() {
            slot.task.abort();
        }
    }

    #[must_use]
    pub fn is_armed(&self, kind: K) -> bool {
        self.slots.contains_key(&kind)
    }

    /// Consume an expiry event. Returns true if it belongs to the currently
    /// armed timer of `kind`; stale events return false and change nothing.
    pub fn fire(&mut self, kind: K, seq: u64) -> bool {
        match self.slots.get(&kind) {
            Some(slot) if slot.seq == seq => {
                self.slots.remove(&kind);
                true
            }
            _ => false,
        }
    }
}

impl<K> Drop for TimerSet<K> {
    fn drop(&mut self) {
        for (_, slot) in self.slots.drain() {
            slot.task.abort();
        }
    }
}
