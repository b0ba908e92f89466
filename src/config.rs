use clap::Args;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

use crate::error::{Result, WatchError};
use crate::models::SeriesList;

pub const DEFAULT_BATCH_SIZE: usize = 6;

/// Settings shared by every subcommand that touches the indexer or the
/// series list.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// JSON file mapping each root folder to the series stored under it
    #[arg(short, long, env = "TORRENTWATCH_LIST", default_value = "list.json")]
    pub list: PathBuf,

    /// Base URL of the search listing
    #[arg(long, env = "TORRENTWATCH_BASE_URL", default_value = "https://nyaa.si")]
    pub base_url: String,

    /// Transfers started together in one batch
    #[arg(long, env = "TORRENTWATCH_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Seconds a transfer may take to start before it is abandoned
    #[arg(long, env = "TORRENTWATCH_START_TIMEOUT", default_value_t = 60)]
    pub start_timeout_secs: u64,
}

impl Settings {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

pub fn parse_series_list(json: &str) -> Result<SeriesList> {
    serde_json::from_str(json).map_err(|e| WatchError::Config(e.to_string()))
}

pub fn try_load_series_list(path: &Path) -> Result<SeriesList> {
    let content = std::fs::read_to_string(path).map_err(|e| WatchError::io(path, e))?;
    parse_series_list(&content)
}

/// Loads the series list; anything unreadable becomes an empty list.
pub fn load_series_list(path: &Path) -> SeriesList {
    match try_load_series_list(path) {
        Ok(list) => {
            let count: usize = list.values().map(Vec::len).sum();
            info!("Loaded {} series from {}", count, path.display());
            list
        }
        Err(e) => {
            error!("Failed to load series list {}: {}", path.display(), e);
            SeriesList::new()
        }
    }
}
