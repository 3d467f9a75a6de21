//! Channel that lets other tasks interrupt the dispatcher's wait
//!
//! The receiving end is always part of the dispatcher's selection set. A
//! worker that needs the dispatcher to act (register a freshly admitted
//! connection, publish a notice) sends an event; the dispatcher wakes, drains
//! everything pending without blocking, and resumes waiting on its updated
//! watch-set.

use tokio::sync::mpsc;

use crate::error::{ChatError, Result};

/// Create a connected waker/receiver pair
pub fn channel<T>() -> (Waker<T>, WakeupReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Waker { tx }, WakeupReceiver { rx })
}

/// Sending half, cloned into every worker
#[derive(Debug)]
pub struct Waker<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for Waker<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Waker<T> {
    /// Queue an event and wake the dispatcher
    pub fn wake(&self, event: T) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| ChatError::fatal_reactor("dispatcher is no longer running"))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half, owned by the dispatcher
#[derive(Debug)]
pub struct WakeupReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> WakeupReceiver<T> {
    /// Wait for the next event; `None` once every waker is gone
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take everything already queued without waiting
    pub fn drain(&mut self) -> Vec<T> {
        let mut pending = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            pending.push(event);
        }
        pending
    }
}
