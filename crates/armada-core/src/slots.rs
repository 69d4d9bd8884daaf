//! Per-target execution slots.
//!
//! A [`TargetSlots`] map hands out [`SlotTicket`]s that serialize work per
//! key while leaving different keys fully independent. Order is fixed at
//! [`enqueue`](TargetSlots::enqueue) time: tickets for the same key run in
//! exactly the order they were taken, regardless of when their holders get
//! polled. Both the command dispatcher and the simulator pool draw tickets
//! from one shared map, so destructive lifecycle work can never interleave
//! with in-flight commands on the same target.
//!
//! A ticket holds the slot from the moment [`acquired`](SlotTicket::acquired)
//! returns until the ticket is dropped. A ticket dropped before acquiring
//! (a cancelled waiter) forwards its place in the chain instead of releasing
//! it, so later tickets still wait for every live predecessor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

/// What a dropped ticket leaves behind for its successor.
enum SlotRelease {
    /// The predecessor chain fully drained; the slot is free.
    Done,
    /// The ticket never acquired; the successor inherits its wait.
    Forward(oneshot::Receiver<SlotRelease>),
}

struct TailEntry {
    serial: u64,
    waiter: oneshot::Receiver<SlotRelease>,
}

#[derive(Default)]
struct SlotMap {
    tails: HashMap<String, TailEntry>,
    next_serial: u64,
}

/// Keyed FIFO slot map.
#[derive(Clone, Default)]
pub struct TargetSlots {
    inner: Arc<Mutex<SlotMap>>,
}

impl TargetSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the next position in `key`'s queue.
    ///
    /// The returned ticket's position is fixed now; await
    /// [`acquired`](SlotTicket::acquired) before touching the target.
    pub fn enqueue(&self, key: &str) -> SlotTicket {
        let (release, waiter) = oneshot::channel();
        let mut map = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        map.next_serial += 1;
        let serial = map.next_serial;
        let predecessor = map
            .tails
            .insert(key.to_string(), TailEntry { serial, waiter })
            .map(|t| t.waiter);
        drop(map);

        SlotTicket {
            key: key.to_string(),
            serial,
            predecessor,
            release: Some(release),
            slots: Arc::clone(&self.inner),
        }
    }

    /// Number of keys with a live queue entry. A chain whose last ticket
    /// was dropped before acquiring keeps its entry until the next enqueue
    /// inherits the wait.
    pub fn active_keys(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tails
            .len()
    }
}

/// One position in a per-key queue. See [`TargetSlots`].
pub struct SlotTicket {
    key: String,
    serial: u64,
    predecessor: Option<oneshot::Receiver<SlotRelease>>,
    release: Option<oneshot::Sender<SlotRelease>>,
    slots: Arc<Mutex<SlotMap>>,
}

impl SlotTicket {
    /// Waits until every earlier ticket for the same key has released.
    ///
    /// Cancel-safe: dropping the future mid-wait keeps the ticket's place,
    /// and dropping the ticket afterwards hands that place to the successor.
    pub async fn acquired(&mut self) {
        loop {
            let Some(rx) = self.predecessor.as_mut() else {
                return;
            };
            match rx.await {
                Ok(SlotRelease::Forward(earlier)) => self.predecessor = Some(earlier),
                // A closed channel means the predecessor was leaked without
                // running its drop; treat the slot as released.
                Ok(SlotRelease::Done) | Err(_) => self.predecessor = None,
            }
        }
    }

    /// The key this ticket queues on.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for SlotTicket {
    fn drop(&mut self) {
        let drained = self.predecessor.is_none();
        let message = match self.predecessor.take() {
            Some(earlier) => SlotRelease::Forward(earlier),
            None => SlotRelease::Done,
        };
        if let Some(release) = self.release.take() {
            let _ = release.send(message);
        }
        // Only the tail of a fully drained chain clears the map entry;
        // anything else still has waiters behind or ahead of it.
        if drained {
            let mut map = self
                .slots
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if map
                .tails
                .get(&self.key)
                .is_some_and(|t| t.serial == self.serial)
            {
                map.tails.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::mpsc;

    #[tokio::test]
    async fn tickets_run_in_enqueue_order() {
        let slots = TargetSlots::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut tasks = Vec::new();
        for i in 0..5 {
            let mut ticket = slots.enqueue("sim-a");
            let tx = tx.clone();
            tasks.push(tokio::spawn(async move {
                // Stagger polling so later tickets often get polled first.
                tokio::time::sleep(Duration::from_millis(5 * (5 - i) as u64)).await;
                ticket.acquired().await;
                tx.send(i).unwrap();
            }));
        }
        drop(tx);

        for task in tasks {
            task.await.unwrap();
        }
        let mut order = Vec::new();
        while let Some(i) = rx.recv().await {
            order.push(i);
        }
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn different_keys_do_not_block_each_other() {
        let slots = TargetSlots::new();

        let mut blocker = slots.enqueue("sim-a");
        blocker.acquired().await;

        let mut other = slots.enqueue("sim-b");
        tokio::time::timeout(Duration::from_secs(1), other.acquired())
            .await
            .expect("sim-b must not wait on sim-a's slot");
    }

    #[tokio::test]
    async fn second_ticket_waits_for_first_release() {
        let slots = TargetSlots::new();

        let mut first = slots.enqueue("sim-a");
        first.acquired().await;

        let mut second = slots.enqueue("sim-a");
        let second_acquired = tokio::time::timeout(
            Duration::from_millis(50),
            second.acquired(),
        )
        .await;
        assert!(second_acquired.is_err(), "slot must still be held");

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), second.acquired())
            .await
            .expect("slot must release when the holder drops");
    }

    #[tokio::test]
    async fn cancelled_waiter_forwards_its_place() {
        let slots = TargetSlots::new();

        let mut first = slots.enqueue("sim-a");
        first.acquired().await;

        // Second never acquires; dropping it must not let third jump first.
        let second = slots.enqueue("sim-a");
        let mut third = slots.enqueue("sim-a");
        drop(second);

        let third_acquired =
            tokio::time::timeout(Duration::from_millis(50), third.acquired()).await;
        assert!(
            third_acquired.is_err(),
            "third must keep waiting for first even after second cancelled"
        );

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), third.acquired())
            .await
            .expect("third runs once first releases");
    }

    #[tokio::test]
    async fn map_entry_is_cleared_after_chain_drains() {
        let slots = TargetSlots::new();
        {
            let mut ticket = slots.enqueue("sim-a");
            ticket.acquired().await;
            assert_eq!(slots.active_keys(), 1);
        }
        assert_eq!(slots.active_keys(), 0);

        // A drained chain with a cancelled middle ticket also clears.
        {
            let mut first = slots.enqueue("sim-a");
            first.acquired().await;
            let second = slots.enqueue("sim-a");
            let mut third = slots.enqueue("sim-a");
            drop(second);
            drop(first);
            third.acquired().await;
            drop(third);
        }
        assert_eq!(slots.active_keys(), 0);
    }

    #[tokio::test]
    async fn dropping_unacquired_sole_ticket_clears_entry() {
        let slots = TargetSlots::new();
        let ticket = slots.enqueue("sim-a");
        drop(ticket);
        assert_eq!(slots.active_keys(), 0);
        // The slot is immediately reusable.
        let mut next = slots.enqueue("sim-a");
        tokio::time::timeout(Duration::from_secs(1), next.acquired())
            .await
            .expect("fresh chain must acquire immediately");
    }
}
