//! Notification dispatch for `Scheduler`-mode input ports.
//!
//! Ports post their `packet_received` callbacks here instead of running them
//! on the sender's thread. Jobs posted with the same key run in posting order;
//! jobs with different keys may run concurrently.

use crossbeam_channel::{unbounded, Sender};
use std::thread::JoinHandle;

/// A unit of work posted by an input port.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fire-and-forget executor.
#[cfg_attr(test, mockall::automock)]
pub trait Scheduler: Send + Sync {
    /// Run `job` asynchronously. Jobs sharing a `key` must run sequentially
    /// in the order they were posted.
    fn post(&self, key: u64, job: Job);
}

enum WorkerMessage {
    Run(Job),
    Shutdown,
}

/// Fixed pool of worker threads, one FIFO channel per worker.
///
/// A key is always routed to the same worker, which gives per-key ordering.
pub struct WorkerScheduler {
    senders: Vec<Sender<WorkerMessage>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerScheduler {
    /// Spawn `workers` threads (at least one).
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for index in 0..workers {
            let (tx, rx) = unbounded::<WorkerMessage>();
            let handle = std::thread::Builder::new()
                .name(format!("daqflow-worker-{}", index))
                .spawn(move || {
                    while let Ok(WorkerMessage::Run(job)) = rx.recv() {
                        job();
                    }
                    tracing::trace!("Worker {} stopped", index);
                });

            match handle {
                Ok(handle) => {
                    senders.push(tx);
                    handles.push(handle);
                }
                Err(e) => tracing::error!("Failed to spawn worker {}: {}", index, e),
            }
        }

        tracing::debug!("Worker scheduler started with {} threads", handles.len());
        Self { senders, handles }
    }

    /// One worker per available CPU
    pub fn with_available_parallelism() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(workers)
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }
}

impl Scheduler for WorkerScheduler {
    fn post(&self, key: u64, job: Job) {
        if self.senders.is_empty() {
            // No threads could be spawned; run inline so notifications still happen.
            job();
            return;
        }
        let index = (key % self.senders.len() as u64) as usize;
        if self.senders[index].send(WorkerMessage::Run(job)).is_err() {
            tracing::warn!("Dropping job for key {}: worker gone", key);
        }
    }
}

impl Drop for WorkerScheduler {
    fn drop(&mut self) {
        for sender in &self.senders {
            let _ = sender.send(WorkerMessage::Shutdown);
        }
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for WorkerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerScheduler")
            .field("workers", &self.worker_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_jobs_with_same_key_run_in_order() {
        let scheduler = WorkerScheduler::new(4);
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let seen = Arc::clone(&seen);
            scheduler.post(7, Box::new(move || seen.lock().push(i)));
        }
        drop(scheduler);

        assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_jobs_run_off_caller_thread() {
        let scheduler = WorkerScheduler::new(1);
        let (tx, rx) = bounded(1);
        let caller = std::thread::current().id();

        scheduler.post(
            0,
            Box::new(move || {
                let _ = tx.send(std::thread::current().id());
            }),
        );

        let worker = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(worker, caller);
    }

    #[test]
    fn test_zero_workers_clamped() {
        assert_eq!(WorkerScheduler::new(0).worker_count(), 1);
    }

    #[test]
    fn test_mock_scheduler_receives_key() {
        let mut mock = MockScheduler::new();
        mock.expect_post()
            .withf(|key, _| *key == 42)
            .times(1)
            .returning(|_, job| job());

        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        mock.post(42, Box::new(move || *flag.lock() = true));
        assert!(*ran.lock());
    }
}
