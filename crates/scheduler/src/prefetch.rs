//! Directional prefetching around the current frame
//!
//! [`PrefetchScheduler::preload`] queues every frame within `radius` of the
//! center that is not already cached or in flight. Workers decode the frames
//! through the [`FrameLoader`] and store them in the shared [`FrameCache`].
//! Jobs are fire-and-forget: failures are logged and counted, never returned.

use crate::queue::JobQueue;
use crate::worker::{JobExecutor, WorkerPool, WorkerPoolConfig};
use annotator_cache::{CacheConfig, FrameCache, FrameId, FrameLoader};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Prefetch settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchConfig {
    /// Frames loaded on each side of the center
    pub radius: u64,
    pub worker_count: usize,
    /// How long an idle worker sleeps before rechecking for shutdown
    pub poll_interval: Duration,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            radius: 100,
            worker_count: 4,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl PrefetchConfig {
    pub fn with_radius(mut self, radius: u64) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl From<&CacheConfig> for PrefetchConfig {
    fn from(config: &CacheConfig) -> Self {
        Self::default()
            .with_radius(config.preload_radius)
            .with_worker_count(config.worker_count)
    }
}

/// Prefetch counters since construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchStats {
    /// Jobs accepted into the queue
    pub submitted: u64,
    /// Ids skipped because the frame was resident, at submission or when the job ran
    pub skipped_cached: u64,
    /// Ids skipped because a job for them was already queued or running
    pub skipped_in_flight: u64,
    /// Jobs that stored their frame
    pub completed: u64,
    /// Jobs whose decode or store failed
    pub failed: u64,
    /// Jobs queued or running right now
    pub pending: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    skipped_cached: AtomicU64,
    skipped_in_flight: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Frame ids within `radius` of `center`, nearest first
///
/// The window is clamped at frame 0 and, when `frame_count` is known, at the
/// last frame. Ties go to the frame after the center: `c, c+1, c-1, c+2, ...`
pub fn prefetch_window(center: FrameId, radius: u64, frame_count: Option<u64>) -> Vec<FrameId> {
    let last = match frame_count {
        Some(0) => return Vec::new(),
        Some(count) => count - 1,
        None => u64::MAX,
    };

    let c = center.0;
    let mut window = Vec::new();
    if c <= last {
        window.push(center);
    }
    for distance in 1..=radius {
        let ahead = c.checked_add(distance).filter(|&id| id <= last);
        let behind = c.checked_sub(distance).filter(|&id| id <= last);
        if ahead.is_none() && distance > c {
            break;
        }
        window.extend(ahead.map(FrameId));
        window.extend(behind.map(FrameId));
    }
    window
}

/// Background loader keeping frames around the current position resident
pub struct PrefetchScheduler {
    cache: Arc<FrameCache>,
    loader: Arc<dyn FrameLoader>,
    queue: Arc<JobQueue>,
    counters: Arc<Counters>,
    radius: u64,
    workers: Option<WorkerPool>,
}

impl PrefetchScheduler {
    /// Start the worker threads
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn new(
        cache: Arc<FrameCache>,
        loader: Arc<dyn FrameLoader>,
        config: PrefetchConfig,
    ) -> io::Result<Self> {
        let queue = Arc::new(JobQueue::new());
        let counters = Arc::new(Counters::default());

        let executor: JobExecutor = {
            let cache = Arc::clone(&cache);
            let loader = Arc::clone(&loader);
            let counters = Arc::clone(&counters);
            Arc::new(move |frame_id: FrameId| {
                load_into_cache(&cache, loader.as_ref(), &counters, frame_id)
            })
        };

        let pool_config =
            WorkerPoolConfig::new(config.worker_count).with_poll_interval(config.poll_interval);
        let workers = WorkerPool::new(Arc::clone(&queue), executor, pool_config)?;

        tracing::debug!(
            "prefetch scheduler started with {} workers, radius {}",
            workers.num_workers(),
            config.radius
        );

        Ok(Self {
            cache,
            loader,
            queue,
            counters,
            radius: config.radius,
            workers: Some(workers),
        })
    }

    pub fn radius(&self) -> u64 {
        self.radius
    }

    /// Queue loads for the window around `center`
    ///
    /// Returns the number of jobs submitted. Never blocks on decoding.
    pub fn preload(&self, center: FrameId) -> usize {
        if self.queue.is_closed() {
            return 0;
        }

        let window = prefetch_window(center, self.radius, self.loader.frame_count());
        let mut submitted = 0;
        for frame_id in window {
            if self.cache.contains(frame_id) {
                Counters::bump(&self.counters.skipped_cached);
            } else if self.queue.submit(frame_id) {
                Counters::bump(&self.counters.submitted);
                submitted += 1;
            } else {
                Counters::bump(&self.counters.skipped_in_flight);
            }
        }

        tracing::trace!("preload around frame {center}: {submitted} jobs submitted");
        submitted
    }

    /// Block until no prefetch job is queued or running
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.queue.wait_idle(timeout)
    }

    pub fn stats(&self) -> PrefetchStats {
        let counters = &self.counters;
        PrefetchStats {
            submitted: counters.submitted.load(Ordering::Relaxed),
            skipped_cached: counters.skipped_cached.load(Ordering::Relaxed),
            skipped_in_flight: counters.skipped_in_flight.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            pending: self.queue.pending() as u64,
        }
    }

    /// Stop accepting work, drop queued jobs, and join the workers
    ///
    /// Jobs already running finish first.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(workers) = self.workers.take() else {
            return;
        };
        let discarded = self.queue.close();
        if discarded > 0 {
            tracing::debug!("prefetch shutdown discarded {discarded} queued jobs");
        }
        workers.shutdown();
    }
}

impl Drop for PrefetchScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn load_into_cache(
    cache: &FrameCache,
    loader: &dyn FrameLoader,
    counters: &Counters,
    frame_id: FrameId,
) {
    // Another path may have stored it since submission
    if cache.contains(frame_id) {
        Counters::bump(&counters.skipped_cached);
        return;
    }

    let start = Instant::now();
    let frame = match loader.load(frame_id) {
        Ok(frame) => frame,
        Err(error) => {
            tracing::warn!("prefetch failed: {error}");
            Counters::bump(&counters.failed);
            return;
        }
    };

    match cache.put(frame_id, &frame.data, frame.shape, frame.element_type) {
        Ok(outcome) => {
            tracing::trace!(
                "prefetched frame {frame_id} ({outcome:?}) in {:?}",
                start.elapsed()
            );
            Counters::bump(&counters.completed);
        }
        Err(error) => {
            tracing::warn!("prefetch of frame {frame_id} not cached: {error}");
            Counters::bump(&counters.failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(window: &[FrameId]) -> Vec<u64> {
        window.iter().map(|id| id.0).collect()
    }

    #[test]
    fn test_window_is_nearest_first() {
        let window = prefetch_window(FrameId(10), 2, None);
        assert_eq!(ids(&window), vec![10, 11, 9, 12, 8]);
    }

    #[test]
    fn test_window_clamped_at_zero() {
        let window = prefetch_window(FrameId(1), 3, None);
        assert_eq!(ids(&window), vec![1, 2, 0, 3, 4]);
    }

    #[test]
    fn test_window_clamped_at_frame_count() {
        let window = prefetch_window(FrameId(8), 3, Some(10));
        assert_eq!(ids(&window), vec![8, 9, 7, 6, 5]);
    }

    #[test]
    fn test_window_center_past_end() {
        let window = prefetch_window(FrameId(12), 3, Some(10));
        assert_eq!(ids(&window), vec![9]);
    }

    #[test]
    fn test_window_empty_source() {
        assert!(prefetch_window(FrameId(0), 5, Some(0)).is_empty());
    }

    #[test]
    fn test_window_zero_radius() {
        assert_eq!(ids(&prefetch_window(FrameId(4), 0, None)), vec![4]);
    }

    #[test]
    fn test_window_tiny_source_large_radius() {
        let window = prefetch_window(FrameId(0), 1_000_000, Some(3));
        assert_eq!(ids(&window), vec![0, 1, 2]);
    }

    #[test]
    fn test_window_reaches_frame_zero_from_the_end() {
        let window = prefetch_window(FrameId(9), 100, Some(10));
        assert_eq!(window.len(), 10);
        assert!(window.contains(&FrameId(0)));
        assert_eq!(ids(&prefetch_window(FrameId(2), 5, Some(3))), vec![2, 1, 0]);
    }

    #[test]
    fn test_config_from_cache_config() {
        let cache_config = CacheConfig::default()
            .with_preload_radius(7)
            .with_worker_count(3);
        let config = PrefetchConfig::from(&cache_config);
        assert_eq!(config.radius, 7);
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
    }
}
