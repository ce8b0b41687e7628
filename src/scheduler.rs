use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

/// A queued unit of work for one thread — a boxed future produced by the
/// message handler for a single incoming message.
pub type ThreadJob = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Per-chat-thread FIFO scheduler. For any single `thread_id`, submitted jobs
/// execute in submission order and never overlap; across distinct
/// `thread_id`s, jobs run concurrently with no ordering relation.
///
/// Each thread gets its own driver task reading from an unbounded channel;
/// the driver exits (and its map entry is pruned) once the channel is empty
/// and its sender side has been dropped.
pub struct ThreadScheduler {
    drivers: DashMap<i64, mpsc::UnboundedSender<ThreadJob>>,
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            drivers: DashMap::new(),
        })
    }

    /// Enqueue `job` on `thread_id`'s FIFO queue, spawning a driver task if
    /// none exists yet.
    pub fn submit(self: &Arc<Self>, thread_id: i64, job: ThreadJob) {
        let sender = self.ensure_driver(thread_id);
        if sender.send(job).is_err() {
            // Driver raced to exit between ensure_driver and send; retry once.
            let sender = self.ensure_driver(thread_id);
            let _ = sender.send(job);
        }
    }

    /// Mark a thread as active (spin up its driver) without enqueueing work.
    /// Used when a runner reveals a thread's resume token mid-stream so later
    /// messages on the same thread queue correctly.
    pub fn note_thread_known(self: &Arc<Self>, thread_id: i64) {
        self.ensure_driver(thread_id);
    }

    fn ensure_driver(self: &Arc<Self>, thread_id: i64) -> mpsc::UnboundedSender<ThreadJob> {
        if let Some(sender) = self.drivers.get(&thread_id) {
            return sender.clone();
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<ThreadJob>();
        let scheduler = self.clone();
        let mut own_sender = Some(tx.clone());
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Some(job) => job.await,
                    None => break,
                }
                if rx.is_empty() {
                    // Retire only if the map still points at our own channel — a
                    // submit may already hold a clone of our sender and be mid-send,
                    // in which case we keep looping until it shows up on `rx`.
                    if let Some(sender) = own_sender.take() {
                        scheduler
                            .drivers
                            .remove_if(&thread_id, |_, current| current.same_channel(&sender));
                    }
                }
            }
        });

        self.drivers.entry(thread_id).or_insert(tx).clone()
    }

    #[cfg(test)]
    pub fn active_thread_count(&self) -> usize {
        self.drivers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[tokio::test]
    async fn jobs_on_same_thread_run_in_order() {
        let scheduler = ThreadScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let log = log.clone();
            scheduler.submit(
                1,
                Box::pin(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    log.lock().unwrap().push(i);
                }),
            );
        }

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn jobs_on_different_threads_run_concurrently() {
        let scheduler = ThreadScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        for thread_id in 0..4 {
            let counter = counter.clone();
            let max_concurrent = max_concurrent.clone();
            scheduler.submit(
                thread_id,
                Box::pin(async move {
                    let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    max_concurrent.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
                    counter.fetch_sub(1, Ordering::SeqCst);
                }),
            );
        }

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(max_concurrent.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn driver_pruned_after_queue_drains() {
        let scheduler = ThreadScheduler::new();
        scheduler.submit(9, Box::pin(async {}));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(scheduler.active_thread_count(), 0);
    }
}
