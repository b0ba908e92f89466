//! Drives one pass over the series list.
//!
//! Series are handled one after another. Anything that goes wrong inside a
//! series is logged and the loop moves on to the next one.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, error, info};

use crate::config::Settings;
use crate::dedup::resolve_duplicates;
use crate::downloader::Downloader;
use crate::episode::extract_all;
use crate::library::{assign_episode_paths, filter_existing_episodes, list_entry_files, reconcile, set_episode_path};
use crate::models::{CleanupMap, EntryFileList, Episode, RawResult, SeriesEntry, SeriesList};
use crate::pattern::{resolve_pattern, ResolvedPattern};
use crate::report::Report;
use crate::search_scraper::SearchScraper;

/// Outcome of pattern resolution and deduplication for one series.
#[derive(Debug)]
pub struct SeriesPlan {
    pub pattern: Option<ResolvedPattern>,
    pub winners: Vec<Episode>,
    pub cleanup: CleanupMap,
}

/// Resolves the pattern against the first scraped title, tags every result and
/// keeps the best release of each episode.
pub fn plan_series(entry: &SeriesEntry, results: Vec<RawResult>) -> SeriesPlan {
    let sample = results.first().map(|r| r.title.as_str());
    let pattern = resolve_pattern(entry, sample);
    match &pattern {
        Some(p) => debug!(series = %entry.folder, source = ?p.source, "Using pattern {}", p.as_str()),
        None => debug!(series = %entry.folder, "No pattern matches {:?}", sample),
    }

    let episodes = extract_all(pattern.as_ref(), results);
    let outcome = resolve_duplicates(episodes);
    SeriesPlan {
        pattern,
        winners: outcome.winners,
        cleanup: outcome.cleanup,
    }
}

pub struct Processor {
    settings: Settings,
    scraper: SearchScraper,
    dry_run: bool,
}

impl Processor {
    pub fn new(settings: Settings, dry_run: bool) -> Result<Self> {
        let scraper = SearchScraper::new(&settings.base_url)?;
        Ok(Self {
            settings,
            scraper,
            dry_run,
        })
    }

    pub async fn run(&self, list: &SeriesList) -> Report {
        let mut report = Report::new();

        for (root, entries) in list {
            for entry in entries {
                if entry.complete {
                    debug!(series = %entry.folder, "Marked complete, skipping");
                    continue;
                }

                match self.process_series(Path::new(root), entry).await {
                    Ok(count) => {
                        info!(series = %entry.folder, "{} new episode(s)", count);
                        report.add(root, &entry.folder, count);
                    }
                    Err(e) => error!(series = %entry.folder, "Failed to process series: {:#}", e),
                }
            }
        }

        report.log();
        report
    }

    async fn process_series(&self, root: &Path, entry: &SeriesEntry) -> Result<usize> {
        let results = self.scraper.search(&entry.uploader, &entry.query).await;
        if results.is_empty() {
            debug!(series = %entry.folder, "No search results");
            return Ok(0);
        }
        self.process_results(root, entry, results).await
    }

    /// Everything after the scrape: dedup, skip what is on disk, download the
    /// rest, then remove the releases that lost.
    pub async fn process_results(&self, root: &Path, entry: &SeriesEntry, results: Vec<RawResult>) -> Result<usize> {
        let mut plan = plan_series(entry, results);

        let series_dir = root.join(&entry.folder);
        let files = if self.dry_run && !series_dir.exists() {
            EntryFileList::new()
        } else {
            list_entry_files(&series_dir).with_context(|| format!("Failed to list {}", series_dir.display()))?
        };

        let mut fresh = filter_existing_episodes(&files, plan.pattern.as_ref(), plan.winners);

        if self.dry_run {
            assign_episode_paths(root, entry, &mut fresh);
            for episode in &fresh {
                let dest = episode.path.as_deref().unwrap_or(series_dir.as_path());
                info!(series = %entry.folder, "Would download {} into {}", episode.title(), dest.display());
            }
            return Ok(fresh.len());
        }

        set_episode_path(root, entry, &mut fresh).context("Failed to prepare season folders")?;
        info!(series = %entry.folder, "Queued {} episode(s)", fresh.len());

        let mut downloaded = 0;
        if !fresh.is_empty() {
            let downloader = Downloader::new(
                series_dir.clone(),
                self.settings.start_timeout(),
                self.settings.batch_size(),
            )
            .await
            .context("Failed to start torrent session")?;
            downloaded = downloader.download_all(&fresh).await;
            downloader.shutdown().await;
        }

        let removed = reconcile(root, &files, entry, &mut plan.cleanup);
        if removed > 0 {
            info!(series = %entry.folder, "Removed {} superseded file(s)", removed);
        }

        Ok(downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn settings() -> Settings {
        Settings {
            list: PathBuf::from("list.json"),
            base_url: "http://127.0.0.1:9".to_string(),
            batch_size: 6,
            start_timeout_secs: 1,
        }
    }

    fn entry(folder: &str, complete: bool) -> SeriesEntry {
        SeriesEntry {
            folder: folder.to_string(),
            uploader: "u".to_string(),
            query: "q".to_string(),
            complete,
            pattern: None,
        }
    }

    fn raw(title: &str, timestamp: i64) -> RawResult {
        RawResult {
            title: title.to_string(),
            magnet_link: format!("magnet:?dn={}", title),
            size: "1 GiB".to_string(),
            timestamp,
        }
    }

    #[test]
    fn test_plan_series() {
        let plan = plan_series(
            &entry("Show", false),
            vec![
                raw("Show S01E01 [720p]", 1),
                raw("Show S01E01 [1080p]", 2),
                raw("Show S01E02 [1080p]", 3),
                raw("Show Behind the Scenes", 4),
            ],
        );
        let titles: Vec<_> = plan.winners.iter().map(|e| e.title()).collect();
        assert_eq!(titles, vec!["Show S01E01 [1080p]", "Show S01E02 [1080p]"]);
        assert_eq!(plan.cleanup["S01E01"].resolution, Some(1080));
    }

    #[test]
    fn test_plan_without_matching_pattern() {
        let plan = plan_series(&entry("Show", false), vec![raw("Show Movie", 1)]);
        assert!(plan.pattern.is_none());
        assert!(plan.winners.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_skips_episodes_on_disk() {
        let tmp = TempDir::new().unwrap();
        let season = tmp.path().join("Show").join("Season 1");
        fs::create_dir_all(&season).unwrap();
        File::create(season.join("Show S01E01 [1080p].mkv")).unwrap();

        let processor = Processor::new(settings(), true).unwrap();
        let queued = processor
            .process_results(
                tmp.path(),
                &entry("Show", false),
                vec![raw("Show S01E01 [1080p]", 1), raw("Show S01E02 [1080p]", 2), raw("Show S02E01", 3)],
            )
            .await
            .unwrap();

        assert_eq!(queued, 2);
        assert!(!tmp.path().join("Show").join("Season 2").exists());
        assert!(season.join("Show S01E01 [1080p].mkv").exists());
    }

    #[tokio::test]
    async fn test_dry_run_leaves_new_series_untouched() {
        let tmp = TempDir::new().unwrap();
        let processor = Processor::new(settings(), true).unwrap();
        let queued = processor
            .process_results(tmp.path(), &entry("Fresh", false), vec![raw("Fresh S01E01 [1080p]", 1)])
            .await
            .unwrap();

        assert_eq!(queued, 1);
        assert!(!tmp.path().join("Fresh").exists());
    }

    #[tokio::test]
    async fn test_run_skips_complete_series() {
        let tmp = TempDir::new().unwrap();
        let mut list = SeriesList::new();
        list.insert(
            tmp.path().to_string_lossy().into_owned(),
            vec![entry("Finished", true)],
        );

        let processor = Processor::new(settings(), true).unwrap();
        let report = processor.run(&list).await;

        assert_eq!(report.total_new_episodes, 0);
        assert!(report.roots.is_empty());
        assert!(!tmp.path().join("Finished").exists());
    }

    #[tokio::test]
    async fn test_run_with_empty_list() {
        let processor = Processor::new(settings(), true).unwrap();
        let report = processor.run(&SeriesList::new()).await;
        assert_eq!(report.total_new_episodes, 0);
    }
}
