//! Default values for all configuration settings.

use super::settings::*;
use std::path::PathBuf;

pub const DEFAULT_QUEUE_URL: &str = "http://localhost:7081";
pub const DEFAULT_WORKER_ID: &str = "tileseed";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_PROGRESS_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_AGENT_CONCURRENCY: usize = 1;
pub const DEFAULT_TILE_CONCURRENCY: usize = 1;
pub const DEFAULT_RATIO: u32 = 1;
pub const DEFAULT_RENDERER: &str = "tileseed-render";

/// Accepted agent concurrency values.
pub const AGENT_CONCURRENCY_CHOICES: [usize; 6] = [1, 2, 4, 8, 16, 32];

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            store: StoreSettings {
                directory: PathBuf::from("./"),
            },
            agent: AgentSettings {
                queue_url: DEFAULT_QUEUE_URL.to_string(),
                worker_id: DEFAULT_WORKER_ID.to_string(),
                poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
                progress_interval_secs: DEFAULT_PROGRESS_INTERVAL_SECS,
                concurrency: DEFAULT_AGENT_CONCURRENCY,
                tile_concurrency: DEFAULT_TILE_CONCURRENCY,
                ratio: DEFAULT_RATIO,
            },
            render: RenderSettings {
                renderer: DEFAULT_RENDERER.to_string(),
            },
            logging: LoggingSettings { directory: None },
        }
    }
}
