//! Settings structs, one per `[section]` of the config file.

use std::path::PathBuf;
use std::time::Duration;

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub store: StoreSettings,
    pub agent: AgentSettings,
    pub render: RenderSettings,
    pub logging: LoggingSettings,
}

/// Store settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// Root of the tile store
    pub directory: PathBuf,
}

/// Queue agent settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    /// Base URL of the job queue, without the `/api/jobs` path
    pub queue_url: String,
    /// Identifier sent with every claim request
    pub worker_id: String,
    pub poll_interval_ms: u64,
    pub progress_interval_secs: u64,
    /// Worker processes, capped by available CPUs
    pub concurrency: usize,
    /// Tiles in flight inside one job
    pub tile_concurrency: usize,
    pub ratio: u32,
}

impl AgentSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }
}

/// Renderer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSettings {
    /// Command line of the external renderer
    pub renderer: String,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Directory for file logs; `None` means `{store}/log`
    pub directory: Option<PathBuf>,
}
