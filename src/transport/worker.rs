use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, warn};

/// A cooperative background loop with explicit termination.
///
/// The worker runs `step` repeatedly on a dedicated named thread until the
/// step returns `false` or the shared terminated flag is set. The flag is
/// checked before every step and again when the step returns, so a signal
/// raised mid-step takes effect at the next boundary.
///
/// Termination alone does not unblock a step stuck in blocking I/O; the
/// owner must also force-close the underlying resource (socket shutdown, a
/// loopback poke of a listening port) so the blocked call returns with an
/// error. A terminated worker is never restarted; a restart creates a new
/// worker.
pub struct TerminatableWorker {
    name: String,
    terminated: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TerminatableWorker {
    /// Spawn the loop on a named thread. The step receives the terminated
    /// flag so it can both observe and raise termination.
    pub fn spawn<F>(name: &str, mut step: F) -> Self
    where
        F: FnMut(&AtomicBool) -> bool + Send + 'static,
    {
        let terminated = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&terminated);
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                while !flag.load(Ordering::SeqCst) {
                    if !step(&flag) {
                        break;
                    }
                }
                debug!("worker {thread_name} exited");
            })
            .expect("failed to spawn worker thread");

        Self {
            name: name.to_string(),
            terminated,
            handle: Some(handle),
        }
    }

    /// Signal the loop to exit at the next step boundary.
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Wait for the thread to exit, up to `timeout`. Returns `false` (with a
    /// warning logged) if the thread is still running when the bound
    /// elapses; the worker keeps its handle so a later join can retry.
    ///
    /// Called from the worker's own thread (a step callback stopping its
    /// owner), this returns immediately: the loop exits as soon as the
    /// current step returns, and waiting on it here could never finish.
    pub fn join_within(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };

        if handle.thread().id() == thread::current().id() {
            debug!("worker {} joined from its own thread, skipping", self.name);
            return true;
        }

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    "worker {} did not exit within {:?}, proceeding",
                    self.name, timeout
                );
                self.handle = Some(handle);
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }

        if handle.join().is_err() {
            warn!("worker {} thread panicked", self.name);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn step_returning_false_ends_the_loop() {
        let (tx, rx) = mpsc::channel();
        let mut remaining = 3;
        let mut worker = TerminatableWorker::spawn("test-counted", move |_| {
            tx.send(()).unwrap();
            remaining -= 1;
            remaining > 0
        });

        assert_eq!(rx.iter().count(), 3);
        assert!(worker.join_within(Duration::from_secs(1)));
    }

    #[test]
    fn terminate_stops_the_loop() {
        let (tx, rx) = mpsc::channel();
        let mut worker = TerminatableWorker::spawn("test-terminated", move |_| {
            tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(5));
            true
        });

        rx.recv().unwrap();
        worker.terminate();
        assert!(worker.is_terminated());
        assert!(worker.join_within(Duration::from_secs(1)));
    }

    #[test]
    fn step_can_raise_termination_itself() {
        let mut worker = TerminatableWorker::spawn("test-self", |flag| {
            flag.store(true, Ordering::SeqCst);
            true
        });

        assert!(worker.join_within(Duration::from_secs(1)));
        assert!(worker.is_terminated());
    }

    #[test]
    fn join_from_the_worker_thread_returns_immediately() {
        use std::sync::Mutex;

        let slot: Arc<Mutex<Option<TerminatableWorker>>> = Arc::new(Mutex::new(None));
        let step_slot = Arc::clone(&slot);
        let (tx, rx) = mpsc::channel();

        let worker = TerminatableWorker::spawn("test-self-join", move |flag| {
            let mut guard = step_slot.lock().unwrap();
            if let Some(worker) = guard.as_mut() {
                flag.store(true, Ordering::SeqCst);
                let started = Instant::now();
                let joined = worker.join_within(Duration::from_secs(5));
                tx.send((joined, started.elapsed())).unwrap();
            }
            true
        });
        *slot.lock().unwrap() = Some(worker);

        let (joined, elapsed) = rx.recv().unwrap();
        assert!(joined);
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn join_within_bounds_a_stuck_worker() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let mut worker = TerminatableWorker::spawn("test-stuck", move |_| {
            release_rx.recv().ok();
            false
        });

        worker.terminate();
        assert!(!worker.join_within(Duration::from_millis(50)));

        release_tx.send(()).unwrap();
        assert!(worker.join_within(Duration::from_secs(1)));
    }
}
