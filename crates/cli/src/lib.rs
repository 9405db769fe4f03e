use anyhow::{Context, Result};
use annotator_cache::{
    CacheConfig, CacheStats, DecodeError, ElementType, Fetched, FrameCache, FrameId, FrameLoader,
    FrameShape, LoadedFrame, SlowOpLogger, FRAME_SWITCH_BUDGET,
};
use annotator_scheduler::{PrefetchConfig, PrefetchScheduler, PrefetchStats};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "annotator")]
#[command(about = "Frame cache tools for the annotator")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Play back synthetic frames through the cache and report statistics.
    Simulate(SimulateArgs),
    /// Print the effective cache configuration.
    Config {
        /// Config file to read instead of the default location.
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,
        /// Also write the effective configuration to this file.
        #[arg(long, value_name = "PATH")]
        save: Option<PathBuf>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Args)]
struct SimulateArgs {
    /// Number of frames in the synthetic source.
    #[arg(long, default_value_t = 500)]
    frames: u64,
    #[arg(long, default_value_t = 640)]
    width: u32,
    #[arg(long, default_value_t = 480)]
    height: u32,
    #[arg(long, default_value_t = 3)]
    channels: u32,
    /// Cache settings file; flags below override it.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long)]
    capacity_mb: Option<usize>,
    #[arg(long)]
    block_mb: Option<usize>,
    /// Frames prefetched on each side of the current one.
    #[arg(long)]
    radius: Option<u64>,
    #[arg(long)]
    workers: Option<usize>,
    /// Frame switches to perform.
    #[arg(long, default_value_t = 200)]
    steps: u64,
    /// Frames moved per switch; negative plays backwards.
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    stride: i64,
    /// Simulated decode time per frame.
    #[arg(long, default_value_t = 0)]
    decode_delay_ms: u64,
    /// Pause between switches, as a user would.
    #[arg(long, default_value_t = 0)]
    step_delay_ms: u64,
}

impl SimulateArgs {
    /// Cache settings for the run
    ///
    /// Without `--config` the base is sized for synthetic frames rather than
    /// the full default pool.
    fn cache_config(&self) -> Result<CacheConfig> {
        let mut config = match &self.config {
            Some(path) => CacheConfig::from_file(path)
                .with_context(|| format!("failed to read config {}", path.display()))?,
            None => CacheConfig::default()
                .with_capacity_mb(256)
                .with_block_size_mb(1)
                .with_preload_radius(10)
                .with_worker_count(2),
        };

        if let Some(mb) = self.capacity_mb {
            config = config.with_capacity_mb(mb);
        }
        if let Some(mb) = self.block_mb {
            config = config.with_block_size_mb(mb);
        }
        if let Some(radius) = self.radius {
            config = config.with_preload_radius(radius);
        }
        if let Some(workers) = self.workers {
            config = config.with_worker_count(workers);
        }

        config.validate().context("invalid cache configuration")?;
        Ok(config)
    }
}

/// Loader producing a deterministic byte pattern per frame
#[derive(Debug, Clone)]
pub struct SyntheticLoader {
    frames: u64,
    shape: FrameShape,
    delay: Duration,
}

impl SyntheticLoader {
    pub fn new(frames: u64, shape: FrameShape) -> Self {
        Self {
            frames,
            shape,
            delay: Duration::ZERO,
        }
    }

    /// Sleep this long in every load to stand in for decoding
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Byte `index` of frame `frame_id`
    pub fn pattern_byte(frame_id: FrameId, index: usize) -> u8 {
        (frame_id.0 as usize)
            .wrapping_mul(31)
            .wrapping_add(index) as u8
    }
}

impl FrameLoader for SyntheticLoader {
    fn load(&self, frame_id: FrameId) -> Result<LoadedFrame, DecodeError> {
        if frame_id.0 >= self.frames {
            return Err(DecodeError::NotFound(frame_id));
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let len = self
            .shape
            .checked_byte_len(ElementType::U8)
            .ok_or_else(|| DecodeError::Corrupt {
                frame_id,
                reason: format!("shape {} is too large", self.shape),
            })?;
        let data = (0..len)
            .map(|index| Self::pattern_byte(frame_id, index))
            .collect();
        Ok(LoadedFrame::new(data, self.shape, ElementType::U8))
    }

    fn frame_count(&self) -> Option<u64> {
        Some(self.frames)
    }
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    frames: u64,
    frame_bytes: usize,
    steps: u64,
    stride: i64,
    switches: SwitchReport,
    cache: CacheStats,
    prefetch: PrefetchReport,
}

#[derive(Debug, Default, Serialize)]
struct SwitchReport {
    /// Served from the cache
    hits: u64,
    /// Decoded on demand and cached
    loaded: u64,
    /// Decoded on demand but not cacheable
    uncached: u64,
    failed: u64,
    /// Switches slower than the frame-switch budget
    slow: u64,
    max_ms: f64,
    mean_ms: f64,
}

#[derive(Debug, Serialize)]
struct PrefetchReport {
    radius: u64,
    workers: usize,
    submitted: u64,
    skipped_cached: u64,
    skipped_in_flight: u64,
    completed: u64,
    failed: u64,
    pending: u64,
}

impl PrefetchReport {
    fn new(stats: PrefetchStats, config: &PrefetchConfig) -> Self {
        Self {
            radius: config.radius,
            workers: config.worker_count,
            submitted: stats.submitted,
            skipped_cached: stats.skipped_cached,
            skipped_in_flight: stats.skipped_in_flight,
            completed: stats.completed,
            failed: stats.failed,
            pending: stats.pending,
        }
    }
}

#[derive(Debug, Serialize)]
struct ConfigOutput {
    path: Option<String>,
    #[serde(flatten)]
    config: CacheConfig,
    capacity_mb: usize,
    block_size_mb: usize,
}

/// Install the stderr log subscriber (`RUST_LOG` overrides the `warn` default)
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    match cli.command {
        Commands::Simulate(args) => run_simulate(&args),
        Commands::Config { file, save } => run_config(file.as_deref(), save.as_deref()),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn run_simulate(args: &SimulateArgs) -> Result<()> {
    if args.frames == 0 {
        anyhow::bail!("--frames must be >= 1");
    }

    let config = args.cache_config()?;
    let shape = FrameShape::new(args.width, args.height, args.channels);
    let Some(frame_bytes) = shape.checked_byte_len(ElementType::U8) else {
        anyhow::bail!("frame dimensions {shape} are too large");
    };
    if frame_bytes == 0 {
        anyhow::bail!("frame dimensions must be non-zero");
    }

    let cache = Arc::new(
        FrameCache::from_config(&config)
            .context("failed to create frame cache")?
            .with_timing_hook(SlowOpLogger::frame_switch().into_hook()),
    );
    let loader = Arc::new(
        SyntheticLoader::new(args.frames, shape)
            .with_delay(Duration::from_millis(args.decode_delay_ms)),
    );
    let prefetch_config = PrefetchConfig::from(&config);
    let prefetch =
        PrefetchScheduler::new(Arc::clone(&cache), loader.clone(), prefetch_config.clone())
            .context("failed to start prefetch workers")?;

    tracing::info!(
        "simulating {} switches over {} frames of {shape} ({frame_bytes} bytes)",
        args.steps,
        args.frames
    );

    let mut switches = SwitchReport::default();
    let mut total = Duration::ZERO;
    let mut position = FrameId(0);

    for _ in 0..args.steps {
        let start = Instant::now();
        match cache.get_or_load(position, loader.as_ref()) {
            Some(Fetched::Hit(_)) => switches.hits += 1,
            Some(Fetched::Loaded(_)) => switches.loaded += 1,
            Some(Fetched::Uncached(_)) => switches.uncached += 1,
            None => switches.failed += 1,
        }
        let elapsed = start.elapsed();

        if elapsed > FRAME_SWITCH_BUDGET {
            switches.slow += 1;
            tracing::warn!("switch to frame {position} took {elapsed:?}");
        }
        total += elapsed;
        switches.max_ms = switches.max_ms.max(millis(elapsed));

        prefetch.preload(position);
        position = advance(position, args.stride, args.frames);

        if args.step_delay_ms > 0 {
            thread::sleep(Duration::from_millis(args.step_delay_ms));
        }
    }

    if args.steps > 0 {
        switches.mean_ms = millis(total) / args.steps as f64;
    }

    let prefetch_stats = prefetch.stats();
    prefetch.shutdown();
    cache
        .check_invariants()
        .context("cache invariants violated after simulation")?;

    let report = SimulationReport {
        frames: args.frames,
        frame_bytes,
        steps: args.steps,
        stride: args.stride,
        switches,
        cache: cache.statistics(),
        prefetch: PrefetchReport::new(prefetch_stats, &prefetch_config),
    };

    let json = serde_json::to_string_pretty(&report)?;
    println!("{json}");

    Ok(())
}

fn run_config(file: Option<&Path>, save: Option<&Path>) -> Result<()> {
    let path = file.map(Path::to_path_buf).or_else(CacheConfig::default_path);
    if let Some(file) = file {
        if !file.is_file() {
            anyhow::bail!("config file does not exist: {}", file.display());
        }
    }

    let config = CacheConfig::load_from(path.as_deref()).context("failed to load config")?;

    if let Some(save) = save {
        config
            .save_to_file(save)
            .with_context(|| format!("failed to write config to {}", save.display()))?;
    }

    let payload = ConfigOutput {
        path: path
            .filter(|path| path.exists())
            .map(|path| path.display().to_string()),
        capacity_mb: config.capacity_mb(),
        block_size_mb: config.block_size_mb(),
        config,
    };

    let json = serde_json::to_string_pretty(&payload)?;
    println!("{json}");

    Ok(())
}

/// Move `stride` frames, wrapping around the ends of the source
fn advance(position: FrameId, stride: i64, frames: u64) -> FrameId {
    let frames = i128::from(frames);
    let next = (i128::from(position.0) + i128::from(stride)).rem_euclid(frames);
    FrameId(next as u64)
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_wraps_both_ways() {
        assert_eq!(advance(FrameId(3), 1, 10), FrameId(4));
        assert_eq!(advance(FrameId(9), 1, 10), FrameId(0));
        assert_eq!(advance(FrameId(0), -1, 10), FrameId(9));
        assert_eq!(advance(FrameId(2), -25, 10), FrameId(7));
    }

    #[test]
    fn test_synthetic_loader_is_deterministic() {
        let loader = SyntheticLoader::new(10, FrameShape::new(4, 4, 3));
        let a = loader.load(FrameId(5)).unwrap();
        let b = loader.load(FrameId(5)).unwrap();
        let c = loader.load(FrameId(6)).unwrap();

        assert_eq!(a.len(), 48);
        assert_eq!(a.data, b.data);
        assert_ne!(a.data, c.data);
        assert_eq!(a.data[7], SyntheticLoader::pattern_byte(FrameId(5), 7));
    }

    #[test]
    fn test_synthetic_loader_bounds() {
        let loader = SyntheticLoader::new(10, FrameShape::new(2, 2, 1));
        assert_eq!(loader.frame_count(), Some(10));
        assert!(matches!(
            loader.load(FrameId(10)),
            Err(DecodeError::NotFound(FrameId(10)))
        ));
    }

    #[test]
    fn test_synthetic_loader_rejects_unaddressable_shape() {
        let loader = SyntheticLoader::new(10, FrameShape::new(u32::MAX, u32::MAX, 4));
        assert!(matches!(
            loader.load(FrameId(0)),
            Err(DecodeError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_simulation_defaults_fit_synthetic_frames() {
        let cli = Cli::parse_from(["annotator", "simulate"]);
        let Commands::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        let config = args.cache_config().unwrap();
        assert_eq!(config.capacity_mb(), 256);
        assert_eq!(config.block_size_mb(), 1);
        assert_eq!(config.preload_radius, 10);
        assert_eq!(config.worker_count, 2);
    }

    #[test]
    fn test_simulation_flags_override() {
        let cli = Cli::parse_from([
            "annotator",
            "simulate",
            "--capacity-mb",
            "64",
            "--block-mb",
            "2",
            "--radius",
            "3",
            "--workers",
            "1",
            "--stride",
            "-2",
        ]);
        let Commands::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.stride, -2);
        let config = args.cache_config().unwrap();
        assert_eq!(config.capacity_mb(), 64);
        assert_eq!(config.block_size_mb(), 2);
        assert_eq!(config.preload_radius, 3);
        assert_eq!(config.worker_count, 1);
    }

    #[test]
    fn test_simulation_rejects_zero_workers() {
        let cli = Cli::parse_from(["annotator", "simulate", "--workers", "0"]);
        let Commands::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert!(args.cache_config().is_err());
    }
}
