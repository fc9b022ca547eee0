//! Pending-signal indicator for interruptible lock waits.
//!
//! A blocked `F_SETLKW` polls [`Signals::is_pending`] while it waits. When a
//! signal is pending the wait ends, the installed handler runs, and the
//! handler's restart flag decides whether the lock request is retried or
//! fails with `EINTR`.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

type Handler = Box<dyn Fn() + Send + Sync>;

/// What to do with an interrupted wait once the signal has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handler asked for restartable system calls; retry the lock.
    Restart,
    /// Fail the call with `EINTR`.
    Interrupt,
}

/// Signal state of one process.
#[derive(Default)]
pub struct Signals {
    pending: AtomicBool,
    restart: AtomicBool,
    delivered: AtomicU64,
    handler: Mutex<Option<Handler>>,
}

impl fmt::Debug for Signals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signals")
            .field("pending", &self.is_pending())
            .field("restart", &self.restart.load(Ordering::Acquire))
            .field("delivered", &self.delivered())
            .finish()
    }
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a handler; `restart` mirrors `SA_RESTART`.
    pub fn set_handler<F>(&self, restart: bool, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.handler.lock().unwrap_or_else(|p| p.into_inner()) = Some(Box::new(handler));
        self.restart.store(restart, Ordering::Release);
    }

    /// Mark a signal as pending. Blocked waits notice it on their next poll.
    pub fn raise(&self) {
        self.pending.store(true, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Number of signals handled so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Acquire)
    }

    /// Consume the pending signal and run the handler.
    pub(crate) fn deliver(&self) -> Disposition {
        self.pending.store(false, Ordering::Release);
        self.delivered.fetch_add(1, Ordering::AcqRel);
        if let Some(handler) = self
            .handler
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
        {
            handler();
        }
        if self.restart.load(Ordering::Acquire) {
            Disposition::Restart
        } else {
            Disposition::Interrupt
        }
    }
}
