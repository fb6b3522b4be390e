use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

use crate::message::Delivery;

/// Create a bounded task queue holding up to `capacity` deliveries.
pub fn mailbox(capacity: usize) -> (MailboxTx, Mailbox) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    (MailboxTx { tx }, Mailbox { rx })
}

/// Posting side of a task queue, registered with the bus on subscribe.
#[derive(Debug, Clone)]
pub struct MailboxTx {
    tx: SyncSender<Delivery>,
}

impl MailboxTx {
    /// Queue a delivery without blocking. A full or closed queue hands the
    /// delivery back.
    pub fn post(&self, delivery: Delivery) -> Result<(), Delivery> {
        self.tx.try_send(delivery).map_err(|e| match e {
            TrySendError::Full(d) | TrySendError::Disconnected(d) => d,
        })
    }
}

/// Receiving side of a task queue. Owned by exactly one task.
#[derive(Debug)]
pub struct Mailbox {
    rx: Receiver<Delivery>,
}

/// Why a timed receive returned empty-handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecvError {
    #[error("mailbox receive timed out")]
    Timeout,
    #[error("every sender is gone")]
    Disconnected,
}

impl Mailbox {
    /// Block until a delivery arrives. `None` once every sender is gone.
    pub fn recv(&self) -> Option<Delivery> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Delivery, RecvError> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => RecvError::Timeout,
            RecvTimeoutError::Disconnected => RecvError::Disconnected,
        })
    }

    pub fn try_recv(&self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }

    /// Take everything currently queued.
    pub fn drain(&self) -> Vec<Delivery> {
        self.rx.try_iter().collect()
    }
}
