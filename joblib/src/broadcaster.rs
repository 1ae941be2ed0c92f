use crate::config::{BroadcastConfig, OverflowPolicy};
use crate::error::{JobError, Result};
use crate::output::OutputLog;
use crate::types::{OutputBlob, SubscriberId};

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::select;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

/// Why a subscription stopped receiving chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// The broadcaster was closed because the job finished or was deleted.
    Closed,
    /// The subscriber removed itself.
    Unsubscribed,
    /// The subscriber fell behind and was disconnected.
    Evicted,
}

/// Fans one job's output out to a dynamic set of subscribers.
///
/// The subscriber set, the accumulated output and the closed flag live behind a
/// single lock. A `write` appends and picks its recipients atomically with
/// respect to `subscribe`/`unsubscribe`/`close_all`. Each job owns its own broadcaster and
/// two jobs never contend on the same lock.
#[derive(Clone)]
pub struct Broadcaster {
    shared: Arc<Shared>,
}

struct Shared {
    job: String,
    config: BroadcastConfig,
    state: Mutex<State>,
    delivery: Mutex<()>,
}

#[derive(Default)]
struct State {
    subscribers: HashMap<SubscriberId, Entry>,
    log: OutputLog,
    closed: bool,
}

struct Entry {
    sender: mpsc::Sender<OutputBlob>,
    end: Arc<OnceLock<EndReason>>,
    cancel: Arc<Notify>,
}

impl Entry {
    // dropping the sender is what the receiver observes as end-of-stream
    fn close(self, reason: EndReason) {
        let _ = self.end.set(reason);
        // a writer blocked on this subscriber holds a sender clone; let it go
        self.cancel.notify_one();
    }
}

impl Broadcaster {
    pub fn new(job: impl Into<String>, config: BroadcastConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                job: job.into(),
                config,
                state: Mutex::new(State::default()),
                delivery: Mutex::new(()),
            }),
        }
    }

    /// Register a live-only subscription: it sees every chunk written after this call.
    pub async fn subscribe(&self, id: impl Into<SubscriberId>) -> Result<Subscription> {
        self.register(id.into(), false).await
    }

    /// Register a subscription that first yields everything written so far, then live chunks.
    ///
    /// History and registration are taken under the same lock as `write`, so the
    /// subscriber sees each byte exactly once.
    pub async fn subscribe_from_start(&self, id: impl Into<SubscriberId>) -> Result<Subscription> {
        self.register(id.into(), true).await
    }

    async fn register(&self, id: SubscriberId, with_history: bool) -> Result<Subscription> {
        let mut state = self.shared.state.lock().await;

        if let Some(existing) = state.subscribers.get(&id) {
            if !existing.sender.is_closed() {
                return Err(JobError::SubscriberExists(id));
            }
            // the previous holder of this id went away without unsubscribing
            state.subscribers.remove(&id);
        }

        let history = with_history.then(|| state.log.to_bytes());
        let (sender, receiver) = mpsc::channel(self.shared.config.subscriber_capacity.max(1));
        let end = Arc::new(OnceLock::new());

        if state.closed {
            // late subscriber: hand back a stream that ends right away
            let _ = end.set(EndReason::Closed);
            drop(sender);
        } else {
            debug!(job = %self.shared.job, subscriber = %id, "subscribed");
            state.subscribers.insert(
                id.clone(),
                Entry {
                    sender,
                    end: end.clone(),
                    cancel: Arc::new(Notify::new()),
                },
            );
        }

        Ok(Subscription {
            id,
            history,
            receiver,
            end,
        })
    }

    /// Remove and close a subscription. Unknown ids are ignored.
    pub async fn unsubscribe(&self, id: &str) -> bool {
        let removed = self.shared.state.lock().await.subscribers.remove(id);
        match removed {
            Some(entry) => {
                debug!(job = %self.shared.job, subscriber = %id, "unsubscribed");
                entry.close(EndReason::Unsubscribed);
                true
            }
            None => false,
        }
    }

    /// Append `chunk` to the output log and deliver it to every current subscriber.
    ///
    /// Subscribers whose receiver has been dropped are pruned here. Once the
    /// broadcaster is closed chunks are still recorded but nobody is left to
    /// receive them.
    ///
    /// Writes are serialized so every subscriber sees chunks in log order. Under
    /// `OverflowPolicy::Block` the state lock is released while waiting on a full
    /// subscriber, so snapshots, subscribes and unsubscribes keep working.
    pub async fn write(&self, chunk: OutputBlob) {
        if chunk.is_empty() {
            return;
        }
        let _delivery = self.shared.delivery.lock().await;

        let targets: Vec<_> = {
            let mut state = self.shared.state.lock().await;
            state.log.append(chunk.clone());
            if state.closed {
                return;
            }
            match self.shared.config.overflow {
                OverflowPolicy::Disconnect => {
                    self.offer(&mut state, &chunk);
                    return;
                }
                OverflowPolicy::Block => state
                    .subscribers
                    .iter()
                    .map(|(id, entry)| (id.clone(), entry.sender.clone(), entry.cancel.clone()))
                    .collect(),
            }
        };

        let mut gone = Vec::new();
        for (id, sender, cancel) in targets {
            select! {
                // waits for buffer space; a dropped receiver fails the send
                sent = sender.send(chunk.clone()) => {
                    if sent.is_err() {
                        gone.push(id);
                    }
                }
                // unsubscribed or closed while we were waiting
                _ = cancel.notified() => {}
            }
        }
        if gone.is_empty() {
            return;
        }

        let mut state = self.shared.state.lock().await;
        for id in gone {
            // the id may have been taken again by a fresh subscriber meanwhile
            let stale = state
                .subscribers
                .get(&id)
                .map_or(false, |entry| entry.sender.is_closed());
            if stale {
                debug!(job = %self.shared.job, subscriber = %id, "subscriber went away");
                state.subscribers.remove(&id);
            }
        }
    }

    fn offer(&self, state: &mut State, chunk: &OutputBlob) {
        let job = &self.shared.job;
        state.subscribers.retain(|id, entry| {
            match entry.sender.try_send(chunk.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(job = %job, subscriber = %id, "subscriber fell behind, disconnecting");
                    let _ = entry.end.set(EndReason::Evicted);
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(job = %job, subscriber = %id, "subscriber went away");
                    false
                }
            }
        });
    }

    /// Close every subscription. Safe to call more than once.
    pub async fn close_all(&self) {
        let mut state = self.shared.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        let count = state.subscribers.len();
        for (_, entry) in state.subscribers.drain() {
            entry.close(EndReason::Closed);
        }
        debug!(job = %self.shared.job, subscribers = count, "broadcaster closed");
    }

    /// Consistent snapshot of all output written so far.
    pub async fn output(&self) -> OutputBlob {
        self.shared.state.lock().await.log.to_bytes()
    }

    pub async fn output_len(&self) -> usize {
        self.shared.state.lock().await.log.len()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.shared.state.lock().await.subscribers.len()
    }

    pub async fn is_closed(&self) -> bool {
        self.shared.state.lock().await.closed
    }
}

/// Receive side of a registration with a [`Broadcaster`].
///
/// Dropping it is enough to leave: the broadcaster prunes the entry on its next write.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    history: Option<OutputBlob>,
    receiver: mpsc::Receiver<OutputBlob>,
    end: Arc<OnceLock<EndReason>>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next chunk in production order, or `None` at end-of-stream.
    pub async fn recv(&mut self) -> Option<OutputBlob> {
        if let Some(history) = self.history.take() {
            if !history.is_empty() {
                return Some(history);
            }
        }
        self.receiver.recv().await
    }

    /// Set once the broadcaster has let go of this subscription.
    pub fn end_reason(&self) -> Option<EndReason> {
        self.end.get().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn blob(s: &'static str) -> OutputBlob {
        OutputBlob::from_static(s.as_bytes())
    }

    fn broadcaster(capacity: usize, overflow: OverflowPolicy) -> Broadcaster {
        Broadcaster::new(
            "test",
            BroadcastConfig {
                subscriber_capacity: capacity,
                overflow,
            },
        )
    }

    async fn drain(sub: &mut Subscription) -> Vec<u8> {
        let mut out = vec![];
        while let Some(chunk) = sub.recv().await {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn every_subscriber_sees_the_same_sequence() {
        let b = Broadcaster::new("test", BroadcastConfig::default());
        let mut first = b.subscribe("a").await.unwrap();
        let mut second = b.subscribe("b").await.unwrap();

        for s in ["one ", "two ", "three"] {
            b.write(blob(s)).await;
        }
        b.close_all().await;

        assert_eq!(drain(&mut first).await, b"one two three");
        assert_eq!(drain(&mut second).await, b"one two three");
        assert_eq!(first.end_reason(), Some(EndReason::Closed));
        assert_eq!(&b.output().await[..], b"one two three");
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery_and_tolerates_unknown_ids() {
        let b = Broadcaster::new("test", BroadcastConfig::default());
        let mut sub = b.subscribe("a").await.unwrap();
        b.write(blob("kept")).await;

        assert!(b.unsubscribe("a").await);
        assert!(!b.unsubscribe("a").await);
        assert!(!b.unsubscribe("never-registered").await);

        b.write(blob("dropped")).await;
        assert_eq!(drain(&mut sub).await, b"kept");
        assert_eq!(sub.end_reason(), Some(EndReason::Unsubscribed));
        assert_eq!(&b.output().await[..], b"keptdropped");
    }

    #[tokio::test]
    async fn close_all_is_idempotent_and_late_subscribers_see_end() {
        let b = Broadcaster::new("test", BroadcastConfig::default());
        b.write(blob("early")).await;
        b.close_all().await;
        b.close_all().await;
        assert!(b.is_closed().await);

        let mut late = b.subscribe("late").await.unwrap();
        assert_eq!(late.recv().await, None);
        assert_eq!(late.end_reason(), Some(EndReason::Closed));

        let mut replay = b.subscribe_from_start("replay").await.unwrap();
        assert_eq!(drain(&mut replay).await, b"early");
        assert!(!b.unsubscribe("late").await);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected_until_the_first_goes_away() {
        let b = Broadcaster::new("test", BroadcastConfig::default());
        let first = b.subscribe("dup").await.unwrap();
        assert_eq!(
            b.subscribe("dup").await.unwrap_err(),
            JobError::SubscriberExists("dup".into())
        );

        drop(first);
        let mut second = b.subscribe("dup").await.unwrap();
        b.write(blob("x")).await;
        assert_eq!(second.recv().await, Some(blob("x")));
    }

    #[tokio::test]
    async fn history_and_live_chunks_do_not_overlap() {
        let b = Broadcaster::new("test", BroadcastConfig::default());
        b.write(blob("abc")).await;
        b.write(blob("def")).await;
        let mut sub = b.subscribe_from_start("s").await.unwrap();
        b.write(blob("ghi")).await;
        b.close_all().await;

        assert_eq!(sub.recv().await, Some(blob("abcdef")));
        assert_eq!(sub.recv().await, Some(blob("ghi")));
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned_on_write() {
        let b = Broadcaster::new("test", BroadcastConfig::default());
        let gone = b.subscribe("gone").await.unwrap();
        let _kept = b.subscribe("kept").await.unwrap();
        drop(gone);

        b.write(blob("x")).await;
        assert_eq!(b.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn slow_subscriber_is_evicted_without_stalling_others() {
        let b = broadcaster(2, OverflowPolicy::Disconnect);
        let mut slow = b.subscribe("slow").await.unwrap();
        let mut fast = b.subscribe("fast").await.unwrap();

        for s in ["1", "2", "3", "4"] {
            b.write(blob(s)).await;
            assert_eq!(fast.recv().await, Some(blob(s)));
        }

        // the two buffered chunks are still delivered before the stream ends
        assert_eq!(drain(&mut slow).await, b"12");
        assert_eq!(slow.end_reason(), Some(EndReason::Evicted));
        assert_eq!(b.subscriber_count().await, 1);
        assert_eq!(&b.output().await[..], b"1234");
    }

    #[tokio::test]
    async fn block_policy_waits_for_the_subscriber() {
        let b = broadcaster(1, OverflowPolicy::Block);
        let mut sub = b.subscribe("s").await.unwrap();
        b.write(blob("1")).await;

        let writer = {
            let b = b.clone();
            tokio::spawn(async move { b.write(blob("2")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!writer.is_finished());

        assert_eq!(sub.recv().await, Some(blob("1")));
        timeout(Duration::from_secs(1), writer)
            .await
            .expect("writer still blocked")
            .unwrap();
        assert_eq!(sub.recv().await, Some(blob("2")));
    }

    #[tokio::test]
    async fn block_policy_is_released_by_a_dropped_receiver() {
        let b = broadcaster(1, OverflowPolicy::Block);
        let sub = b.subscribe("s").await.unwrap();
        b.write(blob("1")).await;

        let writer = {
            let b = b.clone();
            tokio::spawn(async move { b.write(blob("2")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(sub);

        timeout(Duration::from_secs(1), writer)
            .await
            .expect("writer still blocked")
            .unwrap();
        assert_eq!(b.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn blocked_writer_does_not_lock_out_readers_or_unsubscribe() {
        let b = broadcaster(1, OverflowPolicy::Block);
        let mut stalled = b.subscribe("s").await.unwrap();
        b.write(blob("1")).await;

        let writer = {
            let b = b.clone();
            tokio::spawn(async move { b.write(blob("2")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!writer.is_finished());

        let output = timeout(Duration::from_secs(1), b.output())
            .await
            .expect("output blocked behind the writer");
        assert_eq!(&output[..], b"12");

        // a late subscriber replays the stalled chunk from the log, once
        let mut late = timeout(Duration::from_secs(1), b.subscribe_from_start("late"))
            .await
            .expect("subscribe blocked behind the writer")
            .unwrap();
        assert_eq!(late.recv().await, Some(blob("12")));

        let removed = timeout(Duration::from_secs(1), b.unsubscribe("s"))
            .await
            .expect("unsubscribe blocked behind the writer");
        assert!(removed);
        timeout(Duration::from_secs(1), writer)
            .await
            .expect("writer still blocked")
            .unwrap();

        assert_eq!(stalled.recv().await, Some(blob("1")));
        assert_eq!(stalled.recv().await, None);
        assert_eq!(stalled.end_reason(), Some(EndReason::Unsubscribed));
        assert_eq!(b.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn close_all_releases_a_blocked_writer() {
        let b = broadcaster(1, OverflowPolicy::Block);
        let mut sub = b.subscribe("s").await.unwrap();
        b.write(blob("1")).await;

        let writer = {
            let b = b.clone();
            tokio::spawn(async move { b.write(blob("2")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        timeout(Duration::from_secs(1), b.close_all())
            .await
            .expect("close_all blocked behind the writer");
        timeout(Duration::from_secs(1), writer)
            .await
            .expect("writer still blocked")
            .unwrap();
        assert_eq!(drain(&mut sub).await, b"1");
        assert_eq!(sub.end_reason(), Some(EndReason::Closed));
    }
}
