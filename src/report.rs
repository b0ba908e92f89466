use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::error::{Result, WatchError};
use crate::models::ReportEntry;

/// What a run queued, grouped by root folder.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated_at: String,
    pub total_new_episodes: usize,
    pub roots: BTreeMap<String, Vec<ReportEntry>>,
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

impl Report {
    pub fn new() -> Self {
        Self {
            generated_at: Utc::now().to_rfc3339(),
            total_new_episodes: 0,
            roots: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, root: &str, title: &str, new_episodes: usize) {
        self.total_new_episodes += new_episodes;
        self.roots.entry(root.to_string()).or_default().push(ReportEntry {
            title: title.to_string(),
            new_episodes,
        });
    }

    /// Entries that actually brought something new.
    pub fn with_news(&self) -> impl Iterator<Item = (&str, &ReportEntry)> {
        self.roots
            .iter()
            .flat_map(|(root, entries)| entries.iter().map(move |e| (root.as_str(), e)))
            .filter(|(_, e)| e.new_episodes > 0)
    }

    pub fn log(&self) {
        for (root, entry) in self.with_news() {
            info!(root, series = %entry.title, "{} new episode(s)", entry.new_episodes);
        }
        info!("Queued {} new episode(s) in total", self.total_new_episodes);
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| WatchError::io(path, e))
    }
}
