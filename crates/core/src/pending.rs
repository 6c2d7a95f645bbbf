//! Pending-request table: correlates outbound requests with their replies.
//!
//! Every entry maps a correlation [`Id`] to a capacity-one delivery slot.
//! A single mutex guards the map, so `register`, `deliver`, timeouts and
//! `close` cannot interleave into a lost or duplicated entry, and at most one
//! delivery ever succeeds per registration.

use crate::error::CorrelationError;
use crate::frame::Frame;
use crate::jsonrpc::Id;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Registry of in-flight requests. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct PendingTable {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    closed: bool,
    next_seq: u64,
    entries: HashMap<Id, Slot>,
}

struct Slot {
    seq: u64,
    tx: oneshot::Sender<Frame>,
    registered_at: Instant,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove the entry for `id` only if it still belongs to registration `seq`.
    fn withdraw(&self, id: &Id, seq: u64) -> bool {
        let mut state = self.lock();
        match state.entries.get(id) {
            Some(slot) if slot.seq == seq => {
                state.entries.remove(id);
                true
            }
            _ => false,
        }
    }
}

impl PendingTable {
    /// Create a new, open table with no entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return the single-use handle that will receive its reply.
    pub fn register(&self, id: &Id) -> Result<Waiter, CorrelationError> {
        if id.is_nil() {
            return Err(CorrelationError::NilId);
        }

        let mut state = self.shared.lock();
        if state.closed {
            return Err(CorrelationError::Closed);
        }
        if state.entries.contains_key(id) {
            return Err(CorrelationError::Duplicate(id.clone()));
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        let (tx, rx) = oneshot::channel();
        state.entries.insert(
            id.clone(),
            Slot {
                seq,
                tx,
                registered_at: Instant::now(),
            },
        );

        Ok(Waiter {
            id: id.clone(),
            seq,
            rx: Some(rx),
            shared: self.shared.clone(),
            settled: false,
        })
    }

    /// Hand a reply to the waiter registered under its ID.
    ///
    /// The entry is removed before the hand-off, so a second reply for the
    /// same ID fails with [`CorrelationError::UnknownId`].
    pub fn deliver(&self, frame: Frame) -> Result<(), CorrelationError> {
        let id = match frame.id() {
            Some(id) if !id.is_nil() => id.clone(),
            _ => return Err(CorrelationError::NilId),
        };

        let slot = {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(CorrelationError::Closed);
            }
            state
                .entries
                .remove(&id)
                .ok_or_else(|| CorrelationError::UnknownId(id.clone()))?
        };

        debug!(
            id = %id,
            latency_us = slot.registered_at.elapsed().as_micros() as u64,
            "reply matched pending request"
        );

        slot.tx
            .send(frame)
            .map_err(|_| CorrelationError::WaiterGone(id))
    }

    /// Close the table. Idempotent.
    ///
    /// Every outstanding wait returns [`CorrelationError::Closed`] and later
    /// registrations and deliveries are refused.
    pub fn close(&self) {
        let drained: Vec<Slot> = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.entries.drain().map(|(_, slot)| slot).collect()
        };

        if !drained.is_empty() {
            debug!(count = drained.len(), "closing pending table with in-flight requests");
        }
        // Dropping the senders wakes every receiver with a closed-channel error.
        drop(drained);
    }

    /// Whether [`PendingTable::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Number of requests still awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.shared.lock().entries.len()
    }
}

/// Receive side of one registration.
///
/// Dropping a waiter before it settles withdraws its table entry, so a late
/// reply is reported as unknown instead of being delivered into the void.
pub struct Waiter {
    id: Id,
    seq: u64,
    rx: Option<oneshot::Receiver<Frame>>,
    shared: Arc<Shared>,
    settled: bool,
}

impl Waiter {
    /// The correlation ID this waiter was registered under.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Wait for the reply, at most `timeout`.
    pub async fn wait(self, timeout: Duration) -> Result<Frame, CorrelationError> {
        self.wait_cancellable(timeout, &CancellationToken::new()).await
    }

    /// Wait for the reply until `timeout` elapses or `cancel` fires.
    ///
    /// Both deadline and cancellation yield [`CorrelationError::Timeout`] and
    /// remove the entry from the table, unless the table was closed first, in
    /// which case the result is [`CorrelationError::Closed`].
    pub async fn wait_cancellable(
        mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Frame, CorrelationError> {
        let Some(mut rx) = self.rx.take() else {
            return Err(CorrelationError::Closed);
        };

        let received = tokio::select! {
            result = &mut rx => Some(result),
            _ = tokio::time::sleep(timeout) => None,
            _ = cancel.cancelled() => None,
        };
        self.settled = true;

        match received {
            Some(Ok(frame)) => Ok(frame),
            // Only close() drops a sender without sending.
            Some(Err(_)) => Err(CorrelationError::Closed),
            None => {
                if self.shared.withdraw(&self.id, self.seq) {
                    return Err(CorrelationError::Timeout(self.id.clone()));
                }
                // deliver() or close() removed the entry first.
                match rx.try_recv() {
                    Ok(frame) => Ok(frame),
                    Err(TryRecvError::Closed) => Err(CorrelationError::Closed),
                    Err(TryRecvError::Empty) => Err(CorrelationError::Timeout(self.id.clone())),
                }
            }
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if !self.settled {
            self.shared.withdraw(&self.id, self.seq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(id: i64) -> Frame {
        let line = format!(r#"{{"jsonrpc":"2.0","id":{},"result":{{}}}}"#, id);
        Frame::parse(line.as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn test_register_deliver_wait() {
        let table = PendingTable::new();
        let waiter = table.register(&Id::from(1)).unwrap();
        assert_eq!(table.pending_count(), 1);

        table.deliver(response(1)).unwrap();
        let reply = waiter.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply.id(), Some(&Id::from(1)));
        assert_eq!(table.pending_count(), 0);

        let err = table.deliver(response(1)).unwrap_err();
        assert_eq!(err, CorrelationError::UnknownId(Id::from(1)));
    }

    #[tokio::test]
    async fn test_register_rejections() {
        let table = PendingTable::new();
        assert_eq!(table.register(&Id::Null).err(), Some(CorrelationError::NilId));
        assert_eq!(
            table.register(&Id::String(String::new())).err(),
            Some(CorrelationError::NilId)
        );

        let _first = table.register(&Id::from("a")).unwrap();
        assert_eq!(
            table.register(&Id::from("a")).err(),
            Some(CorrelationError::Duplicate(Id::from("a")))
        );

        table.close();
        assert_eq!(table.register(&Id::from("b")).err(), Some(CorrelationError::Closed));
    }

    #[tokio::test]
    async fn test_deliver_requires_id() {
        let table = PendingTable::new();
        let note =
            Frame::parse(br#"{"jsonrpc":"2.0","method":"notifications/progress"}"#).unwrap();
        assert_eq!(table.deliver(note).unwrap_err(), CorrelationError::NilId);
    }

    #[tokio::test]
    async fn test_timeout_removes_entry() {
        let table = PendingTable::new();
        let waiter = table.register(&Id::from(7)).unwrap();

        let err = waiter.wait(Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err, CorrelationError::Timeout(Id::from(7)));
        assert_eq!(table.pending_count(), 0);

        // A late reply must not resurrect the finished wait.
        assert_eq!(
            table.deliver(response(7)).unwrap_err(),
            CorrelationError::UnknownId(Id::from(7))
        );

        // The ID can be reused afterwards.
        assert!(table.register(&Id::from(7)).is_ok());
    }

    #[tokio::test]
    async fn test_cancellation_removes_entry() {
        let table = PendingTable::new();
        let waiter = table.register(&Id::from("c")).unwrap();
        let cancel = CancellationToken::new();

        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                waiter
                    .wait_cancellable(Duration::from_secs(60), &cancel)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err, CorrelationError::Timeout(Id::from("c")));
        assert_eq!(table.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_close_unblocks_all_waiters() {
        let table = PendingTable::new();
        let mut handles = Vec::new();
        for i in 0..10i64 {
            let waiter = table.register(&Id::from(i)).unwrap();
            handles.push(tokio::spawn(waiter.wait(Duration::from_secs(60))));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        table.close();
        table.close();
        assert!(table.is_closed());
        assert_eq!(table.pending_count(), 0);

        for handle in handles {
            let result = tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("waiter should be released promptly")
                .unwrap();
            assert_eq!(result.unwrap_err(), CorrelationError::Closed);
        }

        assert_eq!(table.deliver(response(1)).unwrap_err(), CorrelationError::Closed);
    }

    #[tokio::test]
    async fn test_deadline_racing_close_reports_closed() {
        let table = PendingTable::new();
        let waiter = table.register(&Id::from(12)).unwrap();
        let cancel = CancellationToken::new();

        // Both the cancellation and the close are ready by the time the
        // waiter is first polled.
        cancel.cancel();
        table.close();

        let err = waiter
            .wait_cancellable(Duration::from_secs(60), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, CorrelationError::Closed);
    }

    #[tokio::test]
    async fn test_reply_racing_deadline_is_kept() {
        let table = PendingTable::new();
        let waiter = table.register(&Id::from(13)).unwrap();
        let cancel = CancellationToken::new();

        cancel.cancel();
        table.deliver(response(13)).unwrap();

        let reply = waiter
            .wait_cancellable(Duration::from_secs(60), &cancel)
            .await
            .unwrap();
        assert_eq!(reply.id(), Some(&Id::from(13)));
    }

    #[tokio::test]
    async fn test_dropped_waiter_withdraws_entry() {
        let table = PendingTable::new();
        let waiter = table.register(&Id::from(3)).unwrap();
        drop(waiter);

        assert_eq!(table.pending_count(), 0);
        assert_eq!(
            table.deliver(response(3)).unwrap_err(),
            CorrelationError::UnknownId(Id::from(3))
        );
    }

    #[tokio::test]
    async fn test_stale_waiter_does_not_remove_new_registration() {
        let table = PendingTable::new();
        let stale = table.register(&Id::from(5)).unwrap();
        table.deliver(response(5)).unwrap();

        let _fresh = table.register(&Id::from(5)).unwrap();
        drop(stale);
        assert_eq!(table.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_slot_reports_waiter_gone() {
        let table = PendingTable::new();
        let mut waiter = table.register(&Id::from(11)).unwrap();
        drop(waiter.rx.take());

        assert_eq!(
            table.deliver(response(11)).unwrap_err(),
            CorrelationError::WaiterGone(Id::from(11))
        );
    }

    #[tokio::test]
    async fn test_out_of_order_delivery() {
        let table = PendingTable::new();
        let mut handles = Vec::new();
        for i in 0..100i64 {
            let waiter = table.register(&Id::from(i)).unwrap();
            handles.push(tokio::spawn(waiter.wait(Duration::from_secs(5))));
        }

        let deliverer = {
            let table = table.clone();
            tokio::spawn(async move {
                for i in (0..100).rev() {
                    table.deliver(response(i)).unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        for (i, handle) in handles.into_iter().enumerate() {
            let reply = handle.await.unwrap().unwrap();
            assert_eq!(reply.id(), Some(&Id::from(i as i64)));
        }
        deliverer.await.unwrap();
        assert_eq!(table.pending_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_and_deliver() {
        let table = PendingTable::new();
        let mut handles = Vec::new();
        for i in 0..200i64 {
            let table = table.clone();
            handles.push(tokio::spawn(async move {
                let waiter = table.register(&Id::from(i)).unwrap();
                let deliver_table = table.clone();
                tokio::spawn(async move { deliver_table.deliver(response(i)) });
                waiter.wait(Duration::from_secs(5)).await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(table.pending_count(), 0);
    }
}
