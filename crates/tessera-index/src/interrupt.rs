//! Cooperative cancellation for long-running index work.
//!
//! Startup scans and index drops poll an [`Interrupt`] between probes and
//! batches. The owner of the matching [`InterruptHandle`] (usually the
//! node's shutdown path) flips it once; every clone observes the change.

use tokio::sync::watch;

use crate::error::IndexError;

/// Read side of a cancellation signal. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    rx: Option<watch::Receiver<bool>>,
}

/// Write side of a cancellation signal.
#[derive(Debug)]
pub struct InterruptHandle {
    tx: watch::Sender<bool>,
}

/// Create a connected handle/signal pair.
pub fn interrupt_channel() -> (InterruptHandle, Interrupt) {
    let (tx, rx) = watch::channel(false);
    (InterruptHandle { tx }, Interrupt { rx: Some(rx) })
}

impl Interrupt {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Whether cancellation has been requested.
    pub fn is_interrupted(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// `Err(IndexError::Interrupted)` once cancellation has been requested.
    pub fn check(&self) -> Result<(), IndexError> {
        if self.is_interrupted() {
            return Err(IndexError::Interrupted);
        }
        Ok(())
    }
}

impl InterruptHandle {
    /// Request cancellation. Idempotent.
    pub fn interrupt(&self) {
        self.tx.send_replace(true);
    }

    /// A new signal observing this handle.
    pub fn subscribe(&self) -> Interrupt {
        Interrupt {
            rx: Some(self.tx.subscribe()),
        }
    }
}
