//! Cache configuration
//!
//! Settings are fixed once the cache is built. They can come from defaults, a
//! TOML file, environment variables, or be set programmatically.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const MB: usize = 1024 * 1024;

pub const ENV_CAPACITY_MB: &str = "ANNOTATOR_CACHE_CAPACITY_MB";
pub const ENV_BLOCK_MB: &str = "ANNOTATOR_CACHE_BLOCK_MB";
pub const ENV_PRELOAD_RADIUS: &str = "ANNOTATOR_PRELOAD_RADIUS";
pub const ENV_PREFETCH_WORKERS: &str = "ANNOTATOR_PREFETCH_WORKERS";

/// Configuration for the frame cache and its prefetcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheConfig {
    /// Total pool memory in bytes
    pub capacity_bytes: usize,
    /// Size of one pool block in bytes
    pub block_size_bytes: usize,
    /// Frames preloaded on each side of the current frame
    pub preload_radius: u64,
    /// Prefetch worker threads
    pub worker_count: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 20 * 1024 * MB, // 20 GiB
            block_size_bytes: 50 * MB,
            preload_radius: 100,
            worker_count: 4,
        }
    }
}

/// On-disk form; missing keys keep their defaults
///
/// Sizes are written in megabytes, or in bytes when they are not a whole
/// number of megabytes. A `_bytes` key wins over its `_mb` counterpart.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    capacity_mb: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    capacity_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    block_size_mb: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    block_size_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preload_radius: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    worker_count: Option<usize>,
}

/// Split a byte size into the keys it is saved under
fn size_keys(bytes: usize) -> (Option<usize>, Option<usize>) {
    if bytes % MB == 0 {
        (Some(bytes / MB), None)
    } else {
        (None, Some(bytes))
    }
}

fn mb_to_bytes(key: &'static str, mb: usize) -> Result<usize, ConfigError> {
    mb.checked_mul(MB).ok_or_else(|| ConfigError::InvalidValue {
        key,
        value: mb.to_string(),
    })
}

impl CacheConfig {
    /// Sets the pool capacity in megabytes, saturating at `usize::MAX` bytes.
    pub fn with_capacity_mb(mut self, mb: usize) -> Self {
        self.capacity_bytes = mb.saturating_mul(MB);
        self
    }

    /// Sets the block size in megabytes, saturating at `usize::MAX` bytes.
    pub fn with_block_size_mb(mut self, mb: usize) -> Self {
        self.block_size_bytes = mb.saturating_mul(MB);
        self
    }

    pub fn with_preload_radius(mut self, radius: u64) -> Self {
        self.preload_radius = radius;
        self
    }

    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    /// Capacity in whole megabytes, rounded down
    pub fn capacity_mb(&self) -> usize {
        self.capacity_bytes / MB
    }

    /// Block size in whole megabytes, rounded down
    pub fn block_size_mb(&self) -> usize {
        self.block_size_bytes / MB
    }

    /// Default config file location.
    ///
    /// - Linux: ~/.config/annotator/cache.toml
    /// - macOS: ~/Library/Application Support/annotator/cache.toml
    /// - Windows: %APPDATA%\annotator\cache.toml
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("annotator").join("cache.toml"))
    }

    /// Load the effective configuration.
    ///
    /// Starts from the default config file if one exists, applies environment
    /// overrides, then validates.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::default_path().as_deref())
    }

    /// Like [`load`](Self::load) with an explicit file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from environment variables over the defaults.
    ///
    /// - `ANNOTATOR_CACHE_CAPACITY_MB`: pool capacity in MB (default: 20480)
    /// - `ANNOTATOR_CACHE_BLOCK_MB`: block size in MB (default: 50)
    /// - `ANNOTATOR_PRELOAD_RADIUS`: frames on each side (default: 100)
    /// - `ANNOTATOR_PREFETCH_WORKERS`: worker threads (default: 4)
    ///
    /// # Errors
    /// Returns an error if any variable holds an unparsable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(mb) = env_value(ENV_CAPACITY_MB)? {
            self.capacity_bytes = mb_to_bytes(ENV_CAPACITY_MB, mb)?;
        }
        if let Some(mb) = env_value(ENV_BLOCK_MB)? {
            self.block_size_bytes = mb_to_bytes(ENV_BLOCK_MB, mb)?;
        }
        if let Some(radius) = env_value(ENV_PRELOAD_RADIUS)? {
            self.preload_radius = radius;
        }
        if let Some(workers) = env_value(ENV_PREFETCH_WORKERS)? {
            self.worker_count = workers;
        }
        Ok(())
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format:
    /// ```toml
    /// capacity_mb = 20480
    /// block_size_mb = 50
    /// preload_radius = 100
    /// worker_count = 4
    /// ```
    ///
    /// `capacity_bytes` and `block_size_bytes` give exact sizes instead.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(toml_str)?;
        let mut config = Self::default();
        if let Some(mb) = file.capacity_mb {
            config.capacity_bytes = mb_to_bytes("capacity_mb", mb)?;
        }
        if let Some(bytes) = file.capacity_bytes {
            config.capacity_bytes = bytes;
        }
        if let Some(mb) = file.block_size_mb {
            config.block_size_bytes = mb_to_bytes("block_size_mb", mb)?;
        }
        if let Some(bytes) = file.block_size_bytes {
            config.block_size_bytes = bytes;
        }
        if let Some(radius) = file.preload_radius {
            config.preload_radius = radius;
        }
        if let Some(workers) = file.worker_count {
            config.worker_count = workers;
        }
        Ok(config)
    }

    /// Saves configuration to a TOML file, creating parent directories.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    fn to_toml(&self) -> Result<String, ConfigError> {
        let (capacity_mb, capacity_bytes) = size_keys(self.capacity_bytes);
        let (block_size_mb, block_size_bytes) = size_keys(self.block_size_bytes);
        let file = ConfigFile {
            capacity_mb,
            capacity_bytes,
            block_size_mb,
            block_size_bytes,
            preload_radius: Some(self.preload_radius),
            worker_count: Some(self.worker_count),
        };
        Ok(toml::to_string_pretty(&file)?)
    }

    /// Reject settings no cache can be built from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size_bytes == 0 {
            return Err(ConfigError::Invalid("block size must be non-zero".to_string()));
        }
        if self.capacity_bytes < self.block_size_bytes {
            return Err(ConfigError::Invalid(format!(
                "capacity ({} bytes) is smaller than one block ({} bytes)",
                self.capacity_bytes, self.block_size_bytes
            )));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid(
                "at least one prefetch worker is required".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_value<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        Err(_) => Ok(None),
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Unparsable environment variable
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    /// Settings that cannot form a cache
    #[error("invalid cache configuration: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const ALL_VARS: [&str; 4] = [
        ENV_CAPACITY_MB,
        ENV_BLOCK_MB,
        ENV_PRELOAD_RADIUS,
        ENV_PREFETCH_WORKERS,
    ];

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.capacity_bytes, 20 * 1024 * 1024 * 1024);
        assert_eq!(config.block_size_bytes, 50 * 1024 * 1024);
        assert_eq!(config.preload_radius, 100);
        assert_eq!(config.worker_count, 4);
        config.validate().unwrap();
    }

    #[test]
    fn test_builder_methods() {
        let config = CacheConfig::default()
            .with_capacity_mb(150)
            .with_block_size_mb(50)
            .with_preload_radius(3)
            .with_worker_count(2);

        assert_eq!(config.capacity_bytes, 150 * 1024 * 1024);
        assert_eq!(config.block_size_mb(), 50);
        assert_eq!(config.capacity_mb(), 150);
        assert_eq!(config.preload_radius, 3);
        assert_eq!(config.worker_count, 2);
    }

    #[test]
    fn test_validate_rejects_bad_geometry() {
        assert!(CacheConfig::default().with_block_size_mb(0).validate().is_err());
        assert!(CacheConfig::default()
            .with_capacity_mb(10)
            .with_block_size_mb(50)
            .validate()
            .is_err());
        assert!(CacheConfig::default().with_worker_count(0).validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(&ALL_VARS);

        env::set_var(ENV_CAPACITY_MB, "1024");
        env::set_var(ENV_BLOCK_MB, "8");
        env::set_var(ENV_PRELOAD_RADIUS, "25");
        env::set_var(ENV_PREFETCH_WORKERS, "2");

        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config.capacity_bytes, 1024 * 1024 * 1024);
        assert_eq!(config.block_size_bytes, 8 * 1024 * 1024);
        assert_eq!(config.preload_radius, 25);
        assert_eq!(config.worker_count, 2);
    }

    #[test]
    #[serial]
    fn test_from_env_partial() {
        let _guard = EnvGuard::new(&ALL_VARS);

        for name in ALL_VARS {
            env::remove_var(name);
        }
        env::set_var(ENV_PRELOAD_RADIUS, "7");

        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config.preload_radius, 7);
        assert_eq!(config.block_size_bytes, 50 * 1024 * 1024); // default
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(&[ENV_BLOCK_MB]);

        env::set_var(ENV_BLOCK_MB, "fifty");
        let result = CacheConfig::from_env();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { key: ENV_BLOCK_MB, .. })
        ));
    }

    #[test]
    #[serial]
    fn test_from_env_overflowing_size() {
        let _guard = EnvGuard::new(&[ENV_CAPACITY_MB]);

        env::set_var(ENV_CAPACITY_MB, usize::MAX.to_string());
        let result = CacheConfig::from_env();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { key: ENV_CAPACITY_MB, .. })
        ));
    }

    #[test]
    #[serial]
    fn test_load_from_file_then_env() {
        let _guard = EnvGuard::new(&ALL_VARS);
        for name in ALL_VARS {
            env::remove_var(name);
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.toml");
        fs::write(&path, "capacity_mb = 300\nblock_size_mb = 10\n").unwrap();
        env::set_var(ENV_PREFETCH_WORKERS, "3");

        let config = CacheConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.capacity_mb(), 300);
        assert_eq!(config.block_size_mb(), 10);
        assert_eq!(config.worker_count, 3);
    }

    #[test]
    #[serial]
    fn test_load_from_missing_file_uses_defaults() {
        let _guard = EnvGuard::new(&ALL_VARS);
        for name in ALL_VARS {
            env::remove_var(name);
        }

        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::load_from(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, CacheConfig::default());
    }

    #[test]
    #[serial]
    fn test_load_rejects_invalid_result() {
        let _guard = EnvGuard::new(&ALL_VARS);
        for name in ALL_VARS {
            env::remove_var(name);
        }
        env::set_var(ENV_PREFETCH_WORKERS, "0");

        assert!(matches!(
            CacheConfig::load_from(None),
            Err(ConfigError::Invalid(_))
        ));
    }

    // Helper to save and restore environment variables
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), env::var(name).ok()))
                .collect();
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    #[test]
    fn test_from_toml_partial() {
        let config = CacheConfig::from_toml("preload_radius = 12\n").unwrap();
        assert_eq!(config.preload_radius, 12);
        assert_eq!(config.capacity_bytes, CacheConfig::default().capacity_bytes);
    }

    #[test]
    fn test_from_toml_byte_sizes() {
        let config = CacheConfig::from_toml(
            "capacity_mb = 64\ncapacity_bytes = 5000\nblock_size_bytes = 1000\n",
        )
        .unwrap();
        assert_eq!(config.capacity_bytes, 5000);
        assert_eq!(config.block_size_bytes, 1000);
    }

    #[test]
    fn test_from_toml_overflowing_size() {
        let toml = format!("capacity_mb = {}\n", i64::MAX);
        assert!(matches!(
            CacheConfig::from_toml(&toml),
            Err(ConfigError::InvalidValue {
                key: "capacity_mb",
                ..
            })
        ));
    }

    #[test]
    fn test_builder_saturates() {
        let config = CacheConfig::default().with_capacity_mb(usize::MAX);
        assert_eq!(config.capacity_bytes, usize::MAX);
    }

    #[test]
    fn test_save_keeps_sizes_that_are_not_whole_megabytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.toml");

        let config = CacheConfig {
            capacity_bytes: 3 * MB + 17,
            block_size_bytes: MB,
            ..CacheConfig::default()
        };
        config.save_to_file(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("capacity_bytes = 3145745"));
        assert!(contents.contains("block_size_mb = 1"));
        assert!(!contents.contains("capacity_mb"));
        assert_eq!(CacheConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_from_toml_malformed() {
        assert!(matches!(
            CacheConfig::from_toml("capacity_mb = \"lots\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_file_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.toml");

        let config = CacheConfig::default()
            .with_capacity_mb(512)
            .with_block_size_mb(16)
            .with_preload_radius(30)
            .with_worker_count(6);
        config.save_to_file(&path).unwrap();

        let loaded = CacheConfig::from_file(&path).unwrap();
        assert_eq!(config, loaded);
    }
}
