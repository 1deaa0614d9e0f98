use std::{
    sync::{Arc, Mutex, mpsc},
    thread,
};

use log::{debug, warn};

pub type DispatchJob = Box<dyn FnOnce() + Send + 'static>;

/// Bounded pool of dispatch threads for inbound message delivery.
///
/// Used when a connection is configured to run its receiver callback off
/// the reader thread. Workers drain a shared channel; dropping the pool
/// closes the channel and joins every worker.
#[derive(Debug)]
pub struct DispatchPool {
    workers: Vec<DispatchWorker>,
    sender: Option<mpsc::Sender<DispatchJob>>,
}

impl DispatchPool {
    pub fn new(size: usize) -> Self {
        assert!(size > 0);

        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..size)
            .map(|id| DispatchWorker::new(id, Arc::clone(&receiver)))
            .collect();

        Self {
            workers,
            sender: Some(sender),
        }
    }

    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let job: DispatchJob = Box::new(f);
        if self.sender.as_ref().is_none_or(|s| s.send(job).is_err()) {
            warn!("dispatch pool is shut down, dropping job");
        }
    }
}

impl Drop for DispatchPool {
    fn drop(&mut self) {
        drop(self.sender.take());

        for worker in self.workers.drain(..) {
            debug!("joining dispatch worker {}", worker.id);
            if worker.thread.join().is_err() {
                warn!("dispatch worker {} panicked", worker.id);
            }
        }
    }
}

#[derive(Debug)]
struct DispatchWorker {
    id: usize,
    thread: thread::JoinHandle<()>,
}

impl DispatchWorker {
    fn new(id: usize, receiver: Arc<Mutex<mpsc::Receiver<DispatchJob>>>) -> Self {
        let thread = thread::Builder::new()
            .name(format!("conduit-dispatch-{id}"))
            .spawn(move || {
                loop {
                    let job = receiver.lock().unwrap().recv();
                    match job {
                        Ok(job) => job(),
                        Err(_) => {
                            debug!("dispatch worker {id} channel closed, exiting");
                            break;
                        }
                    }
                }
            })
            .expect("failed to spawn dispatch worker");

        Self { id, thread }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn executes_every_job() {
        let pool = DispatchPool::new(3);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        // Drop joins the workers after the channel drains.
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }
}
