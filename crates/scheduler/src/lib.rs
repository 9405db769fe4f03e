//! Annotator Prefetch Scheduler
//!
//! Loads frames around the current position on background workers so that
//! stepping forward or backward hits the frame cache.
//!
//! # Example
//!
//! ```
//! use annotator_cache::{
//!     DecodeError, ElementType, FrameCache, FrameId, FrameLoader, FrameShape, LoadedFrame,
//! };
//! use annotator_scheduler::{PrefetchConfig, PrefetchScheduler};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Gray;
//!
//! impl FrameLoader for Gray {
//!     fn load(&self, _frame_id: FrameId) -> Result<LoadedFrame, DecodeError> {
//!         let shape = FrameShape::new(4, 4, 1);
//!         Ok(LoadedFrame::new(vec![128; 16], shape, ElementType::U8))
//!     }
//!
//!     fn frame_count(&self) -> Option<u64> {
//!         Some(10)
//!     }
//! }
//!
//! let cache = Arc::new(FrameCache::new(1024, 64).unwrap());
//! let config = PrefetchConfig::default().with_radius(2).with_worker_count(2);
//! let prefetch = PrefetchScheduler::new(Arc::clone(&cache), Arc::new(Gray), config).unwrap();
//!
//! prefetch.preload(FrameId(5));
//! assert!(prefetch.wait_idle(Duration::from_secs(5)));
//! assert!(cache.contains(FrameId(7)));
//! prefetch.shutdown();
//! ```

pub mod prefetch;
pub mod queue;
pub mod worker;

pub use prefetch::{prefetch_window, PrefetchConfig, PrefetchScheduler, PrefetchStats};
pub use queue::JobQueue;
pub use worker::{JobExecutor, WorkerPool, WorkerPoolConfig};
