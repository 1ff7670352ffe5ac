use std::sync::{Arc, Condvar, Mutex};

use crate::error::{Error, Result};

/// Resource caps independent of, and composable with, `break_()`. Both
/// default to unlimited, matching the embedder's expectation that it,
/// not the interpreter, owns cancellation policy by default.
#[derive(Debug, Clone, Copy, Default)]
pub struct Limits {
    pub max_steps: Option<u64>,
    pub max_call_depth: Option<usize>,
}

#[derive(Debug, Default)]
struct ControlFlags {
    running: bool,
    paused: bool,
    break_requested: bool,
}

/// Shared pause/break state behind a condvar so a cloned handle can signal
/// the executing thread from elsewhere.
pub struct ControlState {
    flags: Mutex<ControlFlags>,
    condvar: Condvar,
}

impl ControlState {
    pub fn new() -> Arc<ControlState> {
        Arc::new(ControlState {
            flags: Mutex::new(ControlFlags::default()),
            condvar: Condvar::new(),
        })
    }

    pub fn begin_run(&self) -> Result<()> {
        let mut flags = self.flags.lock().unwrap();
        if flags.running {
            return Err(Error::AlreadyRunning);
        }
        flags.running = true;
        flags.break_requested = false;
        flags.paused = false;
        Ok(())
    }

    /// Clears `running`, `paused`, and `break_requested` unconditionally.
    /// Called from a scope guard so every exit path of `execute` —
    /// success, error, or (in principle) unwind — leaves the interpreter
    /// ready for its next call.
    pub fn end_run(&self) {
        let mut flags = self.flags.lock().unwrap();
        flags.running = false;
        flags.paused = false;
        flags.break_requested = false;
        self.condvar.notify_all();
    }

    pub fn request_pause(&self) {
        let mut flags = self.flags.lock().unwrap();
        flags.paused = true;
    }

    pub fn request_continue(&self) {
        let mut flags = self.flags.lock().unwrap();
        flags.paused = false;
        self.condvar.notify_all();
    }

    pub fn request_break(&self) {
        let mut flags = self.flags.lock().unwrap();
        flags.break_requested = true;
        self.condvar.notify_all();
    }

    pub fn break_requested(&self) -> bool {
        self.flags.lock().unwrap().break_requested
    }

    /// Called at every suspension point. Parks the calling thread while
    /// paused (clearing up only on `continue_()` or `break_()`), then
    /// fails the computation if a break is pending.
    pub fn check_break(&self) -> Result<()> {
        let mut flags = self.flags.lock().unwrap();
        while flags.paused && !flags.break_requested {
            flags = self.condvar.wait(flags).unwrap();
        }
        if flags.break_requested {
            return Err(Error::BreakRequested);
        }
        Ok(())
    }
}

/// A cloneable, `Send`-able handle an embedder keeps on a separate thread
/// to drive pause/continue/break while `execute` runs elsewhere.
#[derive(Clone)]
pub struct InterpreterHandle {
    state: Arc<ControlState>,
}

impl InterpreterHandle {
    pub fn new(state: Arc<ControlState>) -> Self {
        Self { state }
    }

    pub fn pause(&self) {
        self.state.request_pause();
    }

    pub fn continue_(&self) {
        self.state.request_continue();
    }

    pub fn break_(&self) {
        self.state.request_break();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn begin_run_rejects_reentry() {
        let state = ControlState::new();
        state.begin_run().unwrap();
        assert!(matches!(state.begin_run(), Err(Error::AlreadyRunning)));
        state.end_run();
        assert!(state.begin_run().is_ok());
    }

    #[test]
    fn break_wakes_a_paused_thread() {
        let state = ControlState::new();
        state.begin_run().unwrap();
        state.request_pause();
        let handle = InterpreterHandle::new(state.clone());
        let waiter = thread::spawn(move || state.check_break());
        thread::sleep(Duration::from_millis(20));
        handle.break_();
        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(Error::BreakRequested)));
    }
}
