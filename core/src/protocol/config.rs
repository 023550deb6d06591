//! Protocol configuration

use std::fmt;
use std::path::{Path, PathBuf};

use crate::network::share::download::{
    DownloadSettings, DownloadStrategy, DEFAULT_BLOCK_SIZE, DEFAULT_RANGE_COUNT,
};
use crate::network::share::DEFAULT_MAX_UPLOADS;

/// File name of the database when no path is configured
pub const DEFAULT_DB_FILE: &str = "shoal.db";

/// Configuration for a Shoal node
#[derive(Clone)]
pub struct ProtocolConfig {
    /// Folder whose files are offered to peers; downloads land here too
    /// Default: `shared`
    pub shared_folder: PathBuf,

    /// Path to the database file
    /// If None, uses `shoal.db` next to the shared folder
    pub db_path: Option<PathBuf>,

    /// Maximum concurrently running uploads
    /// Default: 5
    pub max_uploads: usize,

    /// How often running uploads are probed for liveness (seconds)
    /// Default: 60
    pub liveness_interval_secs: u64,

    /// Times a search is replayed to newly identified providers
    /// Default: 0
    pub max_retries: u32,

    /// Bytes requested per read from a source
    /// Default: 32 KB
    pub block_size: usize,

    /// Number of ranges a parallel download is split into
    /// Default: 4
    pub download_ranges: usize,

    /// Strategy for new downloads
    /// Default: parallel
    pub strategy: DownloadStrategy,

    /// Start a download as soon as its first handle arrives
    /// Default: true
    pub auto_resume: bool,
}

impl fmt::Debug for ProtocolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolConfig")
            .field("shared_folder", &self.shared_folder)
            .field("db_path", &self.db_path)
            .field("max_uploads", &self.max_uploads)
            .field("liveness_interval_secs", &self.liveness_interval_secs)
            .field("max_retries", &self.max_retries)
            .field("block_size", &self.block_size)
            .field("download_ranges", &self.download_ranges)
            .field("strategy", &self.strategy.as_str())
            .field("auto_resume", &self.auto_resume)
            .finish()
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            shared_folder: PathBuf::from("shared"),
            db_path: None,
            max_uploads: DEFAULT_MAX_UPLOADS,
            liveness_interval_secs: 60,
            max_retries: 0,
            block_size: DEFAULT_BLOCK_SIZE,
            download_ranges: DEFAULT_RANGE_COUNT,
            strategy: DownloadStrategy::Parallel,
            auto_resume: true,
        }
    }
}

impl ProtocolConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for testing (small blocks, fast sweeps, one replay)
    pub fn for_testing(shared_folder: impl Into<PathBuf>) -> Self {
        Self {
            shared_folder: shared_folder.into(),
            db_path: None,
            max_uploads: DEFAULT_MAX_UPLOADS,
            liveness_interval_secs: 1,
            max_retries: 1,
            block_size: 1024,
            download_ranges: DEFAULT_RANGE_COUNT,
            strategy: DownloadStrategy::Parallel,
            auto_resume: true,
        }
    }

    pub fn with_shared_folder(mut self, path: PathBuf) -> Self {
        self.shared_folder = path;
        self
    }

    /// Set the database path
    pub fn with_db_path(mut self, path: PathBuf) -> Self {
        self.db_path = Some(path);
        self
    }

    pub fn with_max_uploads(mut self, max: usize) -> Self {
        self.max_uploads = max;
        self
    }

    pub fn with_liveness_interval(mut self, secs: u64) -> Self {
        self.liveness_interval_secs = secs;
        self
    }

    /// Set the replay budget of new searches
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    pub fn with_download_ranges(mut self, ranges: usize) -> Self {
        self.download_ranges = ranges;
        self
    }

    pub fn with_strategy(mut self, strategy: DownloadStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Leave new downloads paused until resumed explicitly
    pub fn without_auto_resume(mut self) -> Self {
        self.auto_resume = false;
        self
    }

    /// The configured database path, or `shoal.db` beside the shared folder
    pub fn resolved_db_path(&self) -> PathBuf {
        match &self.db_path {
            Some(path) => path.clone(),
            None => self
                .shared_folder
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."))
                .join(DEFAULT_DB_FILE),
        }
    }

    /// Settings handed to the download manager
    pub fn download_settings(&self) -> DownloadSettings {
        DownloadSettings::new(self.shared_folder.clone())
            .with_strategy(self.strategy)
            .with_block_size(self.block_size)
            .with_ranges(self.download_ranges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProtocolConfig::default();
        assert_eq!(config.shared_folder, PathBuf::from("shared"));
        assert_eq!(config.max_uploads, 5);
        assert_eq!(config.liveness_interval_secs, 60);
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.block_size, 32 * 1024);
        assert_eq!(config.download_ranges, 4);
        assert_eq!(config.strategy, DownloadStrategy::Parallel);
        assert!(config.auto_resume);
    }

    #[test]
    fn test_builder_chain() {
        let config = ProtocolConfig::new()
            .with_shared_folder(PathBuf::from("/data/shared"))
            .with_db_path(PathBuf::from("/data/peer.db"))
            .with_max_uploads(2)
            .with_liveness_interval(5)
            .with_max_retries(3)
            .with_block_size(4096)
            .with_download_ranges(8)
            .with_strategy(DownloadStrategy::Sequential)
            .without_auto_resume();

        assert_eq!(config.shared_folder, PathBuf::from("/data/shared"));
        assert_eq!(config.db_path, Some(PathBuf::from("/data/peer.db")));
        assert_eq!(config.max_uploads, 2);
        assert_eq!(config.liveness_interval_secs, 5);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.download_ranges, 8);
        assert_eq!(config.strategy, DownloadStrategy::Sequential);
        assert!(!config.auto_resume);
    }

    #[test]
    fn test_db_path_defaults_beside_shared_folder() {
        let config = ProtocolConfig::new().with_shared_folder(PathBuf::from("/home/me/shared"));
        assert_eq!(config.resolved_db_path(), PathBuf::from("/home/me/shoal.db"));

        let relative = ProtocolConfig::default();
        assert_eq!(relative.resolved_db_path(), PathBuf::from("./shoal.db"));

        let explicit = relative.with_db_path(PathBuf::from("/tmp/x.db"));
        assert_eq!(explicit.resolved_db_path(), PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn test_download_settings_follow_config() {
        let config = ProtocolConfig::for_testing("/tmp/shared")
            .with_strategy(DownloadStrategy::Sequential)
            .with_download_ranges(2);
        let settings = config.download_settings();

        assert_eq!(settings.directory, PathBuf::from("/tmp/shared"));
        assert_eq!(settings.strategy, DownloadStrategy::Sequential);
        assert_eq!(settings.block_size, 1024);
        assert_eq!(settings.ranges, 2);
    }

    #[test]
    fn test_debug_lists_fields() {
        let debug_output = format!("{:?}", ProtocolConfig::default());
        assert!(debug_output.contains("max_uploads: 5"));
        assert!(debug_output.contains("\"parallel\""));
    }
}
