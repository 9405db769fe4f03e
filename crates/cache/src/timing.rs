//! Per-operation timing reports
//!
//! The cache reports how long each public operation took through an optional
//! hook. It never acts on the numbers; callers decide what counts as slow.

use crate::types::FrameId;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Time budget for switching the displayed frame
pub const FRAME_SWITCH_BUDGET: Duration = Duration::from_millis(50);

/// Cache operation being timed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOp {
    Get,
    Put,
    Evict,
    Remove,
    Clear,
}

impl fmt::Display for CacheOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheOp::Get => "get",
            CacheOp::Put => "put",
            CacheOp::Evict => "evict",
            CacheOp::Remove => "remove",
            CacheOp::Clear => "clear",
        };
        f.write_str(name)
    }
}

/// Timing of one completed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpTiming {
    pub op: CacheOp,
    /// Frame the operation targeted, if any
    pub frame_id: Option<FrameId>,
    /// Wall time including lock wait
    pub elapsed: Duration,
}

/// Callback invoked after every timed operation, outside the cache lock
pub type TimingHook = Arc<dyn Fn(&OpTiming) + Send + Sync>;

/// Hook that logs operations slower than a threshold
///
/// # Example
///
/// ```
/// use annotator_cache::{FrameCache, SlowOpLogger};
/// use std::time::Duration;
///
/// let cache = FrameCache::new(4 * 1024, 1024)
///     .unwrap()
///     .with_timing_hook(SlowOpLogger::new(Duration::from_millis(5)).into_hook());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct SlowOpLogger {
    threshold: Duration,
}

impl SlowOpLogger {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    /// Logger using the frame switch budget as threshold
    pub fn frame_switch() -> Self {
        Self::new(FRAME_SWITCH_BUDGET)
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Log `timing` if it exceeds the threshold. Returns whether it did.
    pub fn observe(&self, timing: &OpTiming) -> bool {
        if timing.elapsed <= self.threshold {
            return false;
        }
        match timing.frame_id {
            Some(frame_id) => tracing::warn!(
                "slow cache {} for frame {}: {:?} (threshold {:?})",
                timing.op,
                frame_id,
                timing.elapsed,
                self.threshold
            ),
            None => tracing::warn!(
                "slow cache {}: {:?} (threshold {:?})",
                timing.op,
                timing.elapsed,
                self.threshold
            ),
        }
        true
    }

    pub fn into_hook(self) -> TimingHook {
        Arc::new(move |timing: &OpTiming| {
            self.observe(timing);
        })
    }
}

impl Default for SlowOpLogger {
    fn default() -> Self {
        Self::frame_switch()
    }
}
