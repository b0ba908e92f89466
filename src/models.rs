use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// A single row scraped from the search listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    pub title: String,
    pub magnet_link: String,
    pub size: String,
    /// Publish time, seconds since the epoch.
    pub timestamp: i64,
}

/// One tracked series as stored in the series list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesEntry {
    pub folder: String,
    pub uploader: String,
    pub query: String,
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub pattern: Option<String>,
}

/// Root folder -> ordered series entries.
pub type SeriesList = BTreeMap<String, Vec<SeriesEntry>>;

/// Season folder name -> file names inside it.
pub type EntryFileList = HashMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpisodeIdentity {
    pub season_number: u32,
    pub episode_number: String,
    pub episode_key: Option<String>,
    pub is_valid: bool,
}

impl EpisodeIdentity {
    pub fn invalid() -> Self {
        Self {
            season_number: 1,
            episode_number: String::new(),
            episode_key: None,
            is_valid: false,
        }
    }
}

/// A scraped result together with the identity resolved from its title.
#[derive(Debug, Clone, Serialize)]
pub struct Episode {
    pub result: RawResult,
    pub identity: EpisodeIdentity,
    pub path: Option<PathBuf>,
}

impl Episode {
    pub fn title(&self) -> &str {
        &self.result.title
    }

    /// The key used to group releases, present only for valid episodes.
    pub fn key(&self) -> Option<&str> {
        if self.identity.is_valid {
            self.identity.episode_key.as_deref()
        } else {
            None
        }
    }

    pub fn season_folder(&self) -> String {
        season_folder_name(self.identity.season_number)
    }
}

pub fn season_folder_name(season: u32) -> String {
    format!("Season {}", season)
}

/// Winning quality values for one episode key. Only dimensions that differed
/// between duplicates are set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupAttributes {
    pub season: u32,
    pub version: Option<u32>,
    pub resolution: Option<u32>,
    pub encoding: Option<String>,
    pub timestamp: Option<i64>,
}

/// Accumulated while filtering a single series, drained by the reconciler.
pub type CleanupMap = BTreeMap<String, CleanupAttributes>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub title: String,
    pub new_episodes: usize,
}
