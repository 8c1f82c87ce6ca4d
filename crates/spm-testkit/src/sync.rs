//! Thread coordination helpers for tests.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct GateState {
    closed: bool,
    waiting: usize,
    passed: usize,
}

/// A barrier that test code opens and closes to pause handler threads.
///
/// Handlers call [`Gate::pass`]; while the gate is closed they block there.
#[derive(Default)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Gate {
    /// An open gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Block future and current callers of `pass`
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    /// Release everyone waiting
    pub fn open(&self) {
        self.state.lock().closed = false;
        self.changed.notify_all();
    }

    /// Wait while the gate is closed
    pub fn pass(&self) {
        let mut state = self.state.lock();
        state.waiting += 1;
        self.changed.notify_all();
        while state.closed {
            self.changed.wait(&mut state);
        }
        state.waiting -= 1;
        state.passed += 1;
        self.changed.notify_all();
    }

    /// Wait until at least `count` callers are blocked in `pass`
    pub fn wait_for_waiters(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.waiting < count {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.waiting >= count;
            }
        }
        true
    }

    /// Number of completed `pass` calls
    pub fn passed(&self) -> usize {
        self.state.lock().passed
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_closed_gate_blocks_until_opened() {
        let gate = Arc::new(Gate::new());
        gate.close();
        let worker = {
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || gate.pass())
        };
        assert!(gate.wait_for_waiters(1, Duration::from_secs(5)));
        assert_eq!(gate.passed(), 0);
        gate.open();
        worker.join().unwrap();
        assert_eq!(gate.passed(), 1);
    }
}
