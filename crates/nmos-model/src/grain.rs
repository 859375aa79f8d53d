//! The pending-event buffer drained by the node behaviour agent.
//!
//! ## Drain Protocol
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        EventGrain Drain                                 │
//! │                                                                         │
//! │  producer                      grain                      consumer      │
//! │  ────────                      ─────                      ────────      │
//! │  push(e4) ──────────▶  [e1 e2 e3 e4]                                    │
//! │                                      ◀────────── take()  [e1 e2 e3 e4]  │
//! │  push(e5) ──────────▶  [e5]                                             │
//! │                                          (consumer sends e1, e2;        │
//! │                                           e3 fails, e4 unprocessed)     │
//! │                        [e3 e4 e5]  ◀───── restore([e3 e4])              │
//! │                                                                         │
//! │  Survivors are restored AHEAD of later arrivals, so an aborted          │
//! │  drain never loses events and never reorders them.                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutation bumps a monotonic watermark published through a watch
//! channel; the agent waits on the watch receiver instead of re-polling.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::event::ResourceEvent;

/// Shared handle to the pending-event buffer.
#[derive(Clone)]
pub struct EventGrain {
    events: Arc<Mutex<VecDeque<ResourceEvent>>>,
    updated_tx: Arc<watch::Sender<u64>>,
}

impl EventGrain {
    pub fn new() -> Self {
        let (updated_tx, _) = watch::channel(0);
        EventGrain {
            events: Arc::new(Mutex::new(VecDeque::new())),
            updated_tx: Arc::new(updated_tx),
        }
    }

    /// Appends an event and bumps the watermark.
    ///
    /// The bump happens while the buffer lock is held, so an event present
    /// in the buffer always has a watermark above any earlier `take`.
    pub async fn push(&self, event: ResourceEvent) {
        let mut events = self.events.lock().await;
        events.push_back(event);
        self.bump();
    }

    /// Atomically swaps the buffer out for draining.
    ///
    /// Returns the pending events and the watermark at the moment of the
    /// swap; events pushed after this point raise the watermark above the
    /// returned value, so a waiting consumer comparing against it wakes.
    pub async fn take(&self) -> (VecDeque<ResourceEvent>, u64) {
        let mut events = self.events.lock().await;
        let taken = std::mem::take(&mut *events);
        let watermark = self.bump();
        (taken, watermark)
    }

    /// Restores unprocessed events ahead of any that arrived meanwhile.
    pub async fn restore(&self, mut remaining: VecDeque<ResourceEvent>) {
        if remaining.is_empty() {
            return;
        }

        let mut events = self.events.lock().await;
        remaining.append(&mut events);
        *events = remaining;
        self.bump();
    }

    /// Replaces the buffer wholesale, discarding pending events.
    ///
    /// Used when the agent re-synchronises with a registry: the snapshot of
    /// `sync` events supersedes anything still queued.
    pub async fn replace(&self, snapshot: Vec<ResourceEvent>) {
        let mut events = self.events.lock().await;
        *events = snapshot.into();
        self.bump();
    }

    /// The current watermark value.
    pub fn updated(&self) -> u64 {
        *self.updated_tx.borrow()
    }

    /// A receiver that resolves whenever the watermark changes.
    pub fn watermark(&self) -> watch::Receiver<u64> {
        self.updated_tx.subscribe()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }

    fn bump(&self) -> u64 {
        let mut bumped = 0;
        self.updated_tx.send_modify(|updated| {
            *updated += 1;
            bumped = *updated;
        });
        bumped
    }
}

impl Default for EventGrain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn event(path: &str) -> ResourceEvent {
        ResourceEvent {
            path: path.into(),
            kind: EventKind::Added,
            pre: None,
            post: None,
        }
    }

    #[tokio::test]
    async fn test_take_empties_and_bumps() {
        let grain = EventGrain::new();
        grain.push(event("nodes/a")).await;
        grain.push(event("devices/b")).await;

        let before = grain.updated();
        let (events, watermark) = grain.take().await;

        assert_eq!(events.len(), 2);
        assert!(watermark > before);
        assert!(grain.is_empty().await);
    }

    #[tokio::test]
    async fn test_restore_preserves_fifo_order() {
        let grain = EventGrain::new();
        grain.push(event("nodes/a")).await;
        grain.push(event("devices/b")).await;

        let (mut events, _) = grain.take().await;
        // first event consumed, second survives
        events.pop_front();

        // a new event arrives while the drain is in progress
        grain.push(event("senders/c")).await;

        grain.restore(events).await;

        let (events, _) = grain.take().await;
        let paths: Vec<_> = events.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["devices/b", "senders/c"]);
    }

    #[tokio::test]
    async fn test_restore_empty_does_not_bump() {
        let grain = EventGrain::new();
        let before = grain.updated();
        grain.restore(VecDeque::new()).await;
        assert_eq!(grain.updated(), before);
    }

    #[tokio::test]
    async fn test_arrival_during_drain_raises_watermark_above_take() {
        let grain = EventGrain::new();
        grain.push(event("nodes/a")).await;

        let (_, watermark) = grain.take().await;
        grain.push(event("devices/b")).await;

        assert!(grain.updated() > watermark);
    }

    #[tokio::test]
    async fn test_replace_discards_pending() {
        let grain = EventGrain::new();
        grain.push(event("senders/stale")).await;

        grain.replace(vec![event("nodes/a"), event("devices/b")]).await;

        let (events, _) = grain.take().await;
        let paths: Vec<_> = events.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["nodes/a", "devices/b"]);
    }

    #[tokio::test]
    async fn test_watch_receiver_sees_push() {
        let grain = EventGrain::new();
        let mut rx = grain.watermark();
        let seen = *rx.borrow_and_update();

        grain.push(event("nodes/a")).await;

        rx.changed().await.unwrap();
        assert!(*rx.borrow() > seen);
    }
}
