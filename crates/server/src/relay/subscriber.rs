//! Viewer subscriber channel.
//!
//! Unbounded so a replay of any length fits, with a shared backlog counter so
//! the relay can evict a viewer that stops draining. Eviction drops the
//! sender, which ends the viewer's socket; the viewer then resumes with
//! `from_index` instead of silently missing frames.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sessionlink_protocol::ServerMessage;
use tokio::sync::mpsc;

/// Live frames a viewer may have queued before it is evicted.
pub const MAX_SUBSCRIBER_BACKLOG: usize = 4096;

pub fn subscriber_channel() -> (SubscriberTx, SubscriberRx) {
    let (tx, rx) = mpsc::unbounded_channel();
    let backlog = Arc::new(AtomicUsize::new(0));
    (
        SubscriberTx {
            tx,
            backlog: backlog.clone(),
        },
        SubscriberRx { rx, backlog },
    )
}

pub struct SubscriberTx {
    tx: mpsc::UnboundedSender<ServerMessage>,
    backlog: Arc<AtomicUsize>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The viewer is gone or too far behind; drop this subscriber.
    Drop,
}

impl SubscriberTx {
    /// Queue a frame regardless of backlog (used for snapshots and replay).
    pub fn push(&self, msg: ServerMessage) -> Delivery {
        // Count first so the receiver never decrements below zero.
        self.backlog.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(msg).is_err() {
            self.backlog.fetch_sub(1, Ordering::Relaxed);
            return Delivery::Drop;
        }
        Delivery::Sent
    }

    /// Queue a live frame, refusing when the viewer has fallen behind.
    pub fn push_live(&self, msg: ServerMessage) -> Delivery {
        if self.backlog() >= MAX_SUBSCRIBER_BACKLOG {
            return Delivery::Drop;
        }
        self.push(msg)
    }

    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Relaxed)
    }
}

pub struct SubscriberRx {
    rx: mpsc::UnboundedReceiver<ServerMessage>,
    backlog: Arc<AtomicUsize>,
}

impl SubscriberRx {
    /// `None` once the relay has dropped this subscriber.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        let msg = self.rx.recv().await?;
        self.backlog.fetch_sub(1, Ordering::Relaxed);
        Some(msg)
    }
}
