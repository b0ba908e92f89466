//! On-disk side of a series: folder snapshots, destination paths, and removal
//! of files superseded by a better release.

use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};

use crate::error::{Result, WatchError};
use crate::models::{season_folder_name, CleanupAttributes, CleanupMap, Episode, EntryFileList, SeriesEntry};
use crate::pattern::ResolvedPattern;

/// Lists every immediate subfolder of `series_dir` with the files it holds.
/// The series folder is created when missing.
pub fn list_entry_files(series_dir: &Path) -> Result<EntryFileList> {
    if !series_dir.exists() {
        fs::create_dir_all(series_dir).map_err(|e| WatchError::io(series_dir, e))?;
    }

    let mut listing = EntryFileList::new();
    for dir in fs::read_dir(series_dir).map_err(|e| WatchError::io(series_dir, e))? {
        let dir = dir.map_err(|e| WatchError::io(series_dir, e))?;
        if !dir.path().is_dir() {
            continue;
        }

        let mut files = Vec::new();
        for file in fs::read_dir(dir.path()).map_err(|e| WatchError::io(dir.path(), e))? {
            let file = file.map_err(|e| WatchError::io(dir.path(), e))?;
            if file.path().is_file() {
                files.push(file.file_name().to_string_lossy().into_owned());
            }
        }
        files.sort();
        listing.insert(dir.file_name().to_string_lossy().into_owned(), files);
    }
    Ok(listing)
}

/// Whether `file_name` already holds `episode`. The loose form catches
/// renamed files that no longer carry the full pattern, at the cost of
/// matching any other number that follows a dash.
fn file_holds_episode(file_name: &str, pattern: Option<&ResolvedPattern>, episode_number: &str) -> bool {
    let exact = pattern
        .and_then(|p| p.apply(file_name))
        .is_some_and(|m| m.episode == episode_number);
    if exact {
        return true;
    }

    Regex::new(&format!(r"-\s*{}\b", regex::escape(episode_number)))
        .map(|loose| loose.is_match(file_name))
        .unwrap_or(false)
}

pub fn keep_new_episode(files: &EntryFileList, pattern: Option<&ResolvedPattern>, episode: &Episode) -> bool {
    if !episode.identity.is_valid {
        return false;
    }

    let Some(existing) = files.get(&episode.season_folder()) else {
        return true;
    };

    let present = existing
        .iter()
        .any(|name| file_holds_episode(name, pattern, &episode.identity.episode_number));
    if present {
        debug!(title = episode.title(), "Already on disk");
    }
    !present
}

pub fn filter_existing_episodes(
    files: &EntryFileList,
    pattern: Option<&ResolvedPattern>,
    episodes: Vec<Episode>,
) -> Vec<Episode> {
    episodes
        .into_iter()
        .filter(|episode| keep_new_episode(files, pattern, episode))
        .collect()
}

/// Gives each valid episode its season folder under the series folder.
/// Invalid episodes keep `path == None`. Nothing is created on disk.
pub fn assign_episode_paths(root: &Path, entry: &SeriesEntry, episodes: &mut [Episode]) {
    let series_dir = root.join(&entry.folder);
    for episode in episodes.iter_mut().filter(|e| e.identity.is_valid) {
        episode.path = Some(series_dir.join(episode.season_folder()));
    }
}

/// Like [`assign_episode_paths`], then creates each season folder.
pub fn set_episode_path(root: &Path, entry: &SeriesEntry, episodes: &mut [Episode]) -> Result<()> {
    assign_episode_paths(root, entry, episodes);
    for path in episodes.iter().filter_map(|e| e.path.as_deref()) {
        fs::create_dir_all(path).map_err(|e| WatchError::io(path, e))?;
    }
    Ok(())
}

/// Deletes `path`. Returns `false` when it was already gone.
pub fn remove_file(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(WatchError::io(path, e)),
    }
}

pub fn modified_millis(path: &Path) -> Result<i64> {
    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| WatchError::io(path, e))?;
    let millis = match modified.duration_since(UNIX_EPOCH) {
        Ok(since) => since.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    };
    Ok(millis)
}

/// Replaces characters that cannot appear in a file name.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Renames `file` to `new_stem` in the same folder, keeping its extension.
pub fn rename_preserving_extension(file: &Path, new_stem: &str) -> Result<PathBuf> {
    let mut name = sanitize_file_name(new_stem);
    if let Some(ext) = file.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    let target = file.with_file_name(name);
    fs::rename(file, &target).map_err(|e| WatchError::io(file, e))?;
    Ok(target)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    Version(u32),
    Resolution(u32),
    Encoding(String),
    Older(i64),
}

/// First attribute the file fails to carry, checked in a fixed order.
/// `modified` is only consulted for the timestamp check.
pub fn stale_reason(
    file_name: &str,
    attrs: &CleanupAttributes,
    modified: impl FnOnce() -> Option<i64>,
) -> Option<StaleReason> {
    if let Some(version) = attrs.version {
        if !file_name.contains(&format!("v{}", version)) {
            return Some(StaleReason::Version(version));
        }
    }
    if let Some(resolution) = attrs.resolution {
        if !file_name.contains(&format!("{}p", resolution)) {
            return Some(StaleReason::Resolution(resolution));
        }
    }
    if let Some(encoding) = &attrs.encoding {
        if !file_name.contains(encoding.as_str()) {
            return Some(StaleReason::Encoding(encoding.clone()));
        }
    }
    if let Some(timestamp) = attrs.timestamp {
        let winning = timestamp.saturating_mul(1000);
        if modified().is_some_and(|mtime| mtime < winning) {
            return Some(StaleReason::Older(timestamp));
        }
    }
    None
}

/// Removes files left behind by releases that lost to a better one, then
/// drains `cleanup`. Returns how many files were deleted.
pub fn reconcile(root: &Path, files: &EntryFileList, entry: &SeriesEntry, cleanup: &mut CleanupMap) -> usize {
    let flagged = std::mem::take(cleanup);
    if files.is_empty() {
        return 0;
    }

    let series_dir = root.join(&entry.folder);
    let mut removed = 0;

    for (key, attrs) in &flagged {
        let season = season_folder_name(attrs.season);
        let Some(existing) = files.get(&season) else {
            continue;
        };
        let season_dir = series_dir.join(&season);

        for name in existing.iter().filter(|name| name.contains(key.as_str())) {
            let path = season_dir.join(name);
            let reason = stale_reason(name, attrs, || match modified_millis(&path) {
                Ok(ms) => Some(ms),
                Err(e) => {
                    warn!("Could not read modification time: {}", e);
                    None
                }
            });
            let Some(reason) = reason else {
                continue;
            };

            match remove_file(&path) {
                Ok(true) => {
                    info!(series = %entry.folder, path = %path.display(), ?reason, "Removed superseded file");
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) => warn!(series = %entry.folder, "Failed to remove stale file: {}", e),
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::extract;
    use crate::models::RawResult;
    use crate::pattern::resolve_pattern;
    use std::fs::File;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn entry(folder: &str) -> SeriesEntry {
        SeriesEntry {
            folder: folder.to_string(),
            uploader: "u".to_string(),
            query: "q".to_string(),
            complete: false,
            pattern: None,
        }
    }

    fn episode(title: &str) -> (Option<ResolvedPattern>, Episode) {
        let pattern = resolve_pattern(&entry("Show"), Some(title));
        let raw = RawResult {
            title: title.to_string(),
            magnet_link: String::new(),
            size: String::new(),
            timestamp: 0,
        };
        let episode = extract(pattern.as_ref(), raw);
        (pattern, episode)
    }

    fn listing(season: &str, names: &[&str]) -> EntryFileList {
        let mut files = EntryFileList::new();
        files.insert(season.to_string(), names.iter().map(|n| n.to_string()).collect());
        files
    }

    fn touch(dir: &Path, name: &str, modified: SystemTime) {
        let file = File::create(dir.join(name)).unwrap();
        file.set_modified(modified).unwrap();
    }

    #[test]
    fn test_existing_file_excludes_episode() {
        let (pattern, ep) = episode("Show S01E01 [1080p]");
        let files = listing("Season 1", &["Show S01E01 720p.mkv"]);
        assert!(!keep_new_episode(&files, pattern.as_ref(), &ep));
    }

    #[test]
    fn test_loose_match_excludes_renamed_file() {
        let (pattern, ep) = episode("[Group] Show - 05 (1080p)");
        let files = listing("Season 1", &["Show -05.mkv"]);
        assert!(!keep_new_episode(&files, pattern.as_ref(), &ep));
    }

    #[test]
    fn test_other_episode_is_kept() {
        let (pattern, ep) = episode("Show S01E02 [1080p]");
        let files = listing("Season 1", &["Show S01E01 [1080p].mkv", "Show S01E12.mkv"]);
        assert!(keep_new_episode(&files, pattern.as_ref(), &ep));
    }

    #[test]
    fn test_missing_season_folder_keeps_episode() {
        let (pattern, ep) = episode("Show S02E01");
        let files = listing("Season 1", &["Show S01E01.mkv"]);
        assert!(keep_new_episode(&files, pattern.as_ref(), &ep));
    }

    #[test]
    fn test_invalid_episode_is_rejected() {
        let (pattern, ep) = episode("Show S01E01");
        let (_, invalid) = episode("Nothing here");
        assert!(keep_new_episode(&EntryFileList::new(), pattern.as_ref(), &ep));
        assert!(!keep_new_episode(&EntryFileList::new(), pattern.as_ref(), &invalid));
    }

    #[test]
    fn test_set_episode_path() {
        let tmp = TempDir::new().unwrap();
        let (_, valid) = episode("Show S01E01");
        let (_, invalid) = episode("Nothing here");
        let mut episodes = vec![valid, invalid];

        set_episode_path(tmp.path(), &entry("Anime"), &mut episodes).unwrap();

        let expected = tmp.path().join("Anime").join("Season 1");
        assert_eq!(episodes[0].path.as_deref(), Some(expected.as_path()));
        assert!(expected.is_dir());
        assert!(episodes[1].path.is_none());
    }

    #[test]
    fn test_assign_paths_under_downloads_root() {
        let (_, valid) = episode("Show S01E01");
        let (_, invalid) = episode("Nothing here");
        let mut episodes = vec![valid, invalid];

        assign_episode_paths(Path::new("/downloads"), &entry("Anime"), &mut episodes);

        assert_eq!(episodes[0].path, Some(PathBuf::from("/downloads/Anime/Season 1")));
        assert!(episodes[1].path.is_none());
    }

    #[test]
    fn test_list_entry_files_creates_series_folder() {
        let tmp = TempDir::new().unwrap();
        let series = tmp.path().join("Show");
        assert!(list_entry_files(&series).unwrap().is_empty());
        assert!(series.is_dir());

        fs::create_dir(series.join("Season 1")).unwrap();
        File::create(series.join("Season 1").join("b.mkv")).unwrap();
        File::create(series.join("Season 1").join("a.mkv")).unwrap();
        File::create(series.join("stray.txt")).unwrap();

        let files = list_entry_files(&series).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files["Season 1"], vec!["a.mkv", "b.mkv"]);
    }

    #[test]
    fn test_stale_reason_order() {
        let attrs = CleanupAttributes {
            season: 1,
            version: Some(2),
            resolution: Some(1080),
            encoding: Some("HEVC".to_string()),
            timestamp: None,
        };
        assert_eq!(stale_reason("S01E01 720p.mkv", &attrs, || None), Some(StaleReason::Version(2)));
        assert_eq!(
            stale_reason("S01E01v2 720p.mkv", &attrs, || None),
            Some(StaleReason::Resolution(1080))
        );
        assert_eq!(
            stale_reason("S01E01v2 1080p.mkv", &attrs, || None),
            Some(StaleReason::Encoding("HEVC".to_string()))
        );
        assert_eq!(stale_reason("S01E01v2 1080p HEVC.mkv", &attrs, || None), None);
    }

    #[test]
    fn test_stale_reason_timestamp() {
        let attrs = CleanupAttributes {
            season: 1,
            timestamp: Some(1_710_000_000),
            ..Default::default()
        };
        assert_eq!(
            stale_reason("S01E01.mkv", &attrs, || Some(1_700_000_000_000)),
            Some(StaleReason::Older(1_710_000_000))
        );
        assert_eq!(stale_reason("S01E01.mkv", &attrs, || Some(1_720_000_000_000)), None);
    }

    #[test]
    fn test_stale_reason_huge_timestamp_saturates() {
        let attrs = CleanupAttributes {
            season: 1,
            timestamp: Some(i64::MAX / 10),
            ..Default::default()
        };
        assert_eq!(
            stale_reason("S01E01.mkv", &attrs, || Some(0)),
            Some(StaleReason::Older(i64::MAX / 10))
        );
    }

    #[test]
    fn test_reconcile_removes_superseded_files() {
        let tmp = TempDir::new().unwrap();
        let season_dir = tmp.path().join("Show").join("Season 1");
        fs::create_dir_all(&season_dir).unwrap();
        let now = SystemTime::now();
        touch(&season_dir, "Show S01E01 [720p].mkv", now);
        touch(&season_dir, "Show S01E01 [1080p].mkv", now);
        touch(&season_dir, "Show S01E02 [720p].mkv", now);

        let files = list_entry_files(&tmp.path().join("Show")).unwrap();
        let mut cleanup = CleanupMap::new();
        cleanup.insert(
            "S01E01".to_string(),
            CleanupAttributes {
                season: 1,
                resolution: Some(1080),
                ..Default::default()
            },
        );

        let removed = reconcile(tmp.path(), &files, &entry("Show"), &mut cleanup);

        assert_eq!(removed, 1);
        assert!(!season_dir.join("Show S01E01 [720p].mkv").exists());
        assert!(season_dir.join("Show S01E01 [1080p].mkv").exists());
        assert!(season_dir.join("Show S01E02 [720p].mkv").exists());
        assert!(cleanup.is_empty());
    }

    #[test]
    fn test_reconcile_removes_older_files() {
        let tmp = TempDir::new().unwrap();
        let season_dir = tmp.path().join("Show").join("Season 1");
        fs::create_dir_all(&season_dir).unwrap();
        let winning = 1_710_000_000;
        touch(&season_dir, "Show S01E01 old.mkv", UNIX_EPOCH + Duration::from_secs(winning - 60));
        touch(&season_dir, "Show S01E01 new.mkv", UNIX_EPOCH + Duration::from_secs(winning + 60));

        let files = list_entry_files(&tmp.path().join("Show")).unwrap();
        let mut cleanup = CleanupMap::new();
        cleanup.insert(
            "S01E01".to_string(),
            CleanupAttributes {
                season: 1,
                timestamp: Some(winning as i64),
                ..Default::default()
            },
        );

        assert_eq!(reconcile(tmp.path(), &files, &entry("Show"), &mut cleanup), 1);
        assert!(!season_dir.join("Show S01E01 old.mkv").exists());
        assert!(season_dir.join("Show S01E01 new.mkv").exists());
    }

    #[test]
    fn test_reconcile_second_pass_is_noop() {
        let tmp = TempDir::new().unwrap();
        let season_dir = tmp.path().join("Show").join("Season 1");
        fs::create_dir_all(&season_dir).unwrap();
        touch(&season_dir, "Show S01E01v1.mkv", SystemTime::now());
        touch(&season_dir, "Show S01E01v2.mkv", SystemTime::now());

        let files = list_entry_files(&tmp.path().join("Show")).unwrap();
        let mut cleanup = CleanupMap::new();
        cleanup.insert(
            "S01E01".to_string(),
            CleanupAttributes {
                season: 1,
                version: Some(2),
                ..Default::default()
            },
        );

        assert_eq!(reconcile(tmp.path(), &files, &entry("Show"), &mut cleanup), 1);
        assert!(cleanup.is_empty());
        assert_eq!(reconcile(tmp.path(), &files, &entry("Show"), &mut cleanup), 0);
        assert!(season_dir.join("Show S01E01v2.mkv").exists());
    }

    #[test]
    fn test_reconcile_empty_snapshot() {
        let tmp = TempDir::new().unwrap();
        let mut cleanup = CleanupMap::new();
        cleanup.insert("S01E01".to_string(), CleanupAttributes::default());
        assert_eq!(reconcile(tmp.path(), &EntryFileList::new(), &entry("Show"), &mut cleanup), 0);
        assert!(cleanup.is_empty());
    }

    #[test]
    fn test_remove_missing_file_is_noop() {
        let tmp = TempDir::new().unwrap();
        assert!(!remove_file(&tmp.path().join("gone.mkv")).unwrap());
    }

    #[test]
    fn test_rename_preserving_extension() {
        let tmp = TempDir::new().unwrap();
        let original = tmp.path().join("[abc123] random.mkv");
        File::create(&original).unwrap();

        let renamed = rename_preserving_extension(&original, "Show S01E01 [1080p HEVC]").unwrap();

        assert_eq!(renamed, tmp.path().join("Show S01E01 [1080p HEVC].mkv"));
        assert!(renamed.exists());
        assert!(!original.exists());
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("Show: Part 1/2 "), "Show_ Part 1_2");
    }
}
