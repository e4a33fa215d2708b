//! Pause and cancellation signalling between the controller and the worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct ControlFlags {
    paused: bool,
    quit: bool,
}

/// Pause flag with blocking wait, plus a quit flag readable without locking.
#[derive(Debug, Default)]
pub struct ControlSignal {
    flags: Mutex<ControlFlags>,
    cond: Condvar,
    quit: AtomicBool,
}

impl ControlSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn flags(&self) -> MutexGuard<'_, ControlFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the pause flag, returning its previous value.
    pub fn set_paused(&self, paused: bool) -> bool {
        let mut flags = self.flags();
        let previous = flags.paused;
        flags.paused = paused;
        drop(flags);
        self.cond.notify_all();
        previous
    }

    pub fn is_paused(&self) -> bool {
        self.flags().paused
    }

    /// Request the worker to stop and wake it if parked.
    pub fn request_quit(&self) {
        let mut flags = self.flags();
        flags.quit = true;
        self.quit.store(true, Ordering::SeqCst);
        drop(flags);
        self.cond.notify_all();
    }

    /// Clear both flags before a new run.
    pub fn reset(&self) {
        let mut flags = self.flags();
        flags.quit = false;
        flags.paused = false;
        self.quit.store(false, Ordering::SeqCst);
    }

    /// Lock-free quit check for use inside parallel work.
    #[inline]
    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::Relaxed)
    }

    /// Quit flag for passing into the evaluation step.
    pub fn quit_flag(&self) -> &AtomicBool {
        &self.quit
    }

    /// Block while paused. Returns `false` when quit was requested.
    pub fn wait_while_paused(&self) -> bool {
        let guard = self.flags();
        let flags = self
            .cond
            .wait_while(guard, |flags| flags.paused && !flags.quit)
            .unwrap_or_else(PoisonError::into_inner);
        !flags.quit
    }
}
