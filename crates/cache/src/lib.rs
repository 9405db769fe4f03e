//! Annotator Frame Cache Library
//!
//! Bounded in-memory cache of decoded video/image frames for frame-by-frame
//! annotation. Frames are stored in a pool of fixed-size memory blocks and
//! evicted least-recently-used first when the pool runs out.

pub mod config;
pub mod entry;
pub mod error;
pub mod frame;
pub mod loader;
pub mod pool;
pub mod recency;
pub mod stats;
pub mod timing;
pub mod types;

pub use config::{CacheConfig, ConfigError};
pub use entry::{CacheEntry, FrameView};
pub use error::{CacheError, CacheResult, InvariantViolation, PoolError};
pub use frame::{Evicted, Fetched, FrameCache, PutOutcome};
pub use loader::{DecodeError, FrameLoader, LoadedFrame};
pub use pool::{Allocation, AllocationHandle, BlockPool, BlockView};
pub use recency::RecencyIndex;
pub use stats::CacheStats;
pub use timing::{CacheOp, OpTiming, SlowOpLogger, TimingHook, FRAME_SWITCH_BUDGET};
pub use types::{ElementType, FrameId, FrameShape};
