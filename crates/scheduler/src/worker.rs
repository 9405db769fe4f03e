//! Prefetch worker pool.
//!
//! This module provides a fixed-size pool of worker threads that pull frame
//! jobs from a [`JobQueue`], run them through an executor callback, and mark
//! them complete. Workers run until the pool is shut down.

use crate::queue::JobQueue;
use annotator_cache::FrameId;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Callback function for job execution.
///
/// Workers invoke this callback for each frame they pull from the queue.
/// Failures are the callback's business; a panic is caught and logged so
/// the worker keeps running.
pub type JobExecutor = Arc<dyn Fn(FrameId) + Send + Sync>;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn.
    pub num_workers: usize,

    /// Maximum time a worker will wait for a job before checking shutdown.
    /// Default: 100ms.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a new worker pool configuration.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Set the poll interval for workers.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Pool of worker threads executing queued frame jobs
pub struct WorkerPool {
    workers: Vec<Worker>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Create and start a new worker pool.
    ///
    /// # Errors
    ///
    /// Returns an error if a thread cannot be spawned; workers already
    /// started are stopped and joined first.
    pub fn new(
        queue: Arc<JobQueue>,
        executor: JobExecutor,
        config: WorkerPoolConfig,
    ) -> io::Result<Self> {
        let mut pool = Self {
            workers: Vec::with_capacity(config.num_workers),
            shutdown: Arc::new(AtomicBool::new(false)),
        };

        for id in 0..config.num_workers {
            let worker = Worker::spawn(
                id,
                Arc::clone(&queue),
                Arc::clone(&executor),
                Arc::clone(&pool.shutdown),
                config.poll_interval,
            );
            match worker {
                Ok(worker) => pool.workers.push(worker),
                Err(error) => {
                    pool.stop();
                    return Err(error);
                }
            }
        }

        Ok(pool)
    }

    /// Get the number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Check if the worker pool is shutting down.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Shutdown the worker pool gracefully.
    ///
    /// Signals all workers to stop and waits for them to finish their
    /// current job and exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for worker in self.workers.drain(..) {
            worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A single worker thread in the worker pool.
struct Worker {
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(
        id: usize,
        queue: Arc<JobQueue>,
        executor: JobExecutor,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> io::Result<Self> {
        let thread = thread::Builder::new()
            .name(format!("frame-prefetch-{}", id))
            .spawn(move || {
                Self::run(queue, executor, shutdown, poll_interval);
            })?;

        Ok(Self {
            thread: Some(thread),
        })
    }

    /// Main worker loop.
    fn run(
        queue: Arc<JobQueue>,
        executor: JobExecutor,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) {
        loop {
            if shutdown.load(Ordering::Acquire) {
                break;
            }

            let Some(frame_id) = queue.next_job(poll_interval) else {
                if queue.is_closed() {
                    break;
                }
                continue;
            };

            let result = panic::catch_unwind(AssertUnwindSafe(|| executor(frame_id)));
            if result.is_err() {
                tracing::error!("prefetch job for frame {frame_id} panicked");
            }

            queue.complete(frame_id);
        }
    }

    /// Wait for the worker thread to finish.
    fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("prefetch worker panicked");
            }
        }
    }
}
