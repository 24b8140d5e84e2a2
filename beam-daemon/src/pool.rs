//! Worker pool: a fixed set of workers draining a shared FIFO task queue.
//! Bounds how many connection sessions run at once.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Submission failed because the pool has been stopped.
#[derive(Debug, thiserror::Error)]
#[error("worker pool is stopped")]
pub struct SubmitError;

/// Cloneable submission handle onto the pool's queue.
#[derive(Clone)]
pub struct PoolHandle {
    queue_tx: mpsc::UnboundedSender<Task>,
}

impl PoolHandle {
    /// Enqueue a task; one idle worker wakes to run it. Queue order is FIFO.
    pub fn submit<F>(&self, task: F) -> Result<(), SubmitError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.queue_tx.send(Box::pin(task)).map_err(|_| SubmitError)
    }
}

/// Fixed-size worker pool. At most `count` tasks execute concurrently;
/// workers block (not spin) on the empty queue.
pub struct WorkerPool {
    handle: PoolHandle,
    stop_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers draining a shared queue.
    pub fn start(count: usize) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<Task>();
        let (stop_tx, stop_rx) = watch::channel(false);
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let mut workers = Vec::with_capacity(count);
        for id in 0..count {
            let queue = queue_rx.clone();
            let mut stop = stop_rx.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    if *stop.borrow() {
                        break;
                    }
                    let next = {
                        let mut queue = queue.lock().await;
                        tokio::select! {
                            task = queue.recv() => task,
                            _ = stop.changed() => None,
                        }
                    };
                    let Some(task) = next else { break };
                    tracing::trace!(worker = id, "task picked up");
                    task.await;
                }
                tracing::trace!(worker = id, "worker exit");
            }));
        }
        Self {
            handle: PoolHandle { queue_tx },
            stop_tx,
            workers,
        }
    }

    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    /// Enqueue a task on the pool's own handle.
    pub fn submit<F>(&self, task: F) -> Result<(), SubmitError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.submit(task)
    }

    /// Mark every worker to exit, interrupting blocked queue waits, then
    /// join them. A task already picked up runs to completion; tasks still
    /// queued are abandoned.
    pub async fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn bounded_concurrency_all_tasks_complete_once() {
        let mut pool = WorkerPool::start(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let running = running.clone();
            let peak = peak.clone();
            let completed = completed.clone();
            pool.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                completed.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while completed.load(Ordering::SeqCst) < 5 {
            assert!(tokio::time::Instant::now() < deadline, "tasks did not finish");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(completed.load(Ordering::SeqCst), 5);
        assert!(peak.load(Ordering::SeqCst) <= 2, "more than 2 tasks ran at once");
        pool.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn single_worker_preserves_fifo_order() {
        let mut pool = WorkerPool::start(1);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let completed = Arc::new(AtomicUsize::new(0));
        for i in 0..4u32 {
            let order = order.clone();
            let completed = completed.clone();
            pool.submit(async move {
                order.lock().unwrap().push(i);
                completed.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while completed.load(Ordering::SeqCst) < 4 {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
        pool.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_joins_idle_workers() {
        let mut pool = WorkerPool::start(3);
        // Workers are blocked on the empty queue; stop must not hang.
        tokio::time::timeout(Duration::from_secs(2), pool.stop())
            .await
            .expect("stop timed out");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_waits_for_dequeued_task() {
        let mut pool = WorkerPool::start(1);
        let finished = Arc::new(AtomicUsize::new(0));
        let flag = finished.clone();
        pool.submit(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        // Give the worker time to pick the task up, then stop mid-task.
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.stop().await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
