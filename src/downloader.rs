use futures::future::join_all;
use librqbit::{AddTorrent, AddTorrentOptions, AddTorrentResponse, ManagedTorrent, Session, TorrentStatsState};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{Result, WatchError};
use crate::library::rename_preserving_extension;
use crate::models::Episode;

pub struct Downloader {
    session: Arc<Session>,
    start_timeout: Duration,
    batch_size: usize,
}

fn add_source(torrent: &str) -> anyhow::Result<AddTorrent<'_>> {
    if torrent.starts_with("magnet:") || torrent.starts_with("http://") || torrent.starts_with("https://") {
        Ok(AddTorrent::from_url(torrent))
    } else {
        // Assume it's a local file path
        AddTorrent::from_local_filename(torrent)
    }
}

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Where a running transfer stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    Running,
    Finished,
    Failed(String),
}

pub fn transfer_status(state: &TorrentStatsState, finished: bool, error: Option<String>) -> TransferStatus {
    match state {
        TorrentStatsState::Error => {
            TransferStatus::Failed(error.unwrap_or_else(|| "torrent entered error state".to_string()))
        }
        _ if finished => TransferStatus::Finished,
        _ => TransferStatus::Running,
    }
}

/// Polls `status` until the transfer finishes or fails.
pub async fn wait_for_completion<F>(mut status: F, interval: Duration) -> std::result::Result<(), String>
where
    F: FnMut() -> TransferStatus,
{
    loop {
        match status() {
            TransferStatus::Finished => return Ok(()),
            TransferStatus::Failed(reason) => return Err(reason),
            TransferStatus::Running => tokio::time::sleep(interval).await,
        }
    }
}

/// The file a transfer produced, when it produced exactly one.
pub fn single_produced_file(output_folder: &Path, files: &[PathBuf]) -> Option<PathBuf> {
    match files {
        [single] => Some(output_folder.join(single)),
        _ => None,
    }
}

impl Downloader {
    pub async fn new(output_dir: PathBuf, start_timeout: Duration, batch_size: usize) -> anyhow::Result<Self> {
        let session = Session::new(output_dir).await?;
        Ok(Self {
            session,
            start_timeout,
            batch_size: batch_size.max(1),
        })
    }

    /// Adds the torrent and waits for its metadata, bounded by the start timeout.
    async fn start(&self, torrent: &str, output_folder: Option<&Path>) -> Result<Arc<ManagedTorrent>> {
        let options = AddTorrentOptions {
            output_folder: output_folder.map(|p| p.to_string_lossy().into_owned()),
            ..Default::default()
        };

        let started = tokio::time::timeout(self.start_timeout, async {
            let response = self.session.add_torrent(add_source(torrent)?, Some(options)).await?;
            let handle = match response {
                AddTorrentResponse::Added(id, handle) => {
                    debug!("Torrent added with ID: {}", id);
                    handle
                }
                AddTorrentResponse::AlreadyManaged(id, handle) => {
                    info!("Torrent already exists with ID: {}", id);
                    handle
                }
                AddTorrentResponse::ListOnly(_) => {
                    return Err(anyhow::anyhow!(
                        "Torrent was added in list-only mode. Session might be read-only."
                    ));
                }
            };
            handle
                .wait_until_initialized()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to get metadata: {}", e))?;
            Ok::<_, anyhow::Error>(handle)
        })
        .await;

        match started {
            Ok(result) => result.map_err(|e| WatchError::Transfer {
                title: torrent.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(WatchError::StartTimeout {
                title: torrent.to_string(),
                secs: self.start_timeout.as_secs(),
            }),
        }
    }

    /// Downloads `torrent` and returns the paths of its files, relative to
    /// the output folder.
    pub async fn download(&self, torrent: &str, output_folder: Option<&Path>) -> Result<Vec<PathBuf>> {
        info!("Starting download: {}", torrent);
        let handle = self.start(torrent, output_folder).await?;

        let (name, files) = handle
            .with_metadata(|meta| {
                let name = meta
                    .info
                    .name
                    .as_ref()
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "Unknown".to_string());
                let files: Vec<PathBuf> = meta
                    .file_infos
                    .iter()
                    .map(|fi| fi.relative_filename.clone())
                    .collect();
                (name, files)
            })
            .map_err(|e| WatchError::Transfer {
                title: torrent.to_string(),
                reason: e.to_string(),
            })?;
        info!("Downloading {}", name);

        wait_for_completion(
            || {
                let stats = handle.stats();
                debug!("{}", stats);
                transfer_status(&stats.state, stats.finished, stats.error.clone())
            },
            POLL_INTERVAL,
        )
        .await
        .map_err(|reason| WatchError::Transfer {
            title: torrent.to_string(),
            reason,
        })?;

        info!("Download completed: {}", name);
        Ok(files)
    }

    /// Downloads one episode into its assigned path. When the torrent holds a
    /// single file, it is renamed after the scraped title.
    pub async fn download_episode(&self, episode: &Episode) -> Result<PathBuf> {
        let path = episode.path.as_deref().ok_or_else(|| WatchError::MissingPath {
            title: episode.title().to_string(),
        })?;
        if episode.result.magnet_link.is_empty() {
            return Err(WatchError::Transfer {
                title: episode.title().to_string(),
                reason: "no magnet link".to_string(),
            });
        }

        let files = self.download(&episode.result.magnet_link, Some(path))
            .await
            .map_err(|e| match e {
                WatchError::StartTimeout { secs, .. } => WatchError::StartTimeout {
                    title: episode.title().to_string(),
                    secs,
                },
                other => WatchError::Transfer {
                    title: episode.title().to_string(),
                    reason: other.to_string(),
                },
            })?;

        match single_produced_file(path, &files) {
            Some(file) if file.is_file() => rename_preserving_extension(&file, episode.title()),
            _ => Ok(path.to_path_buf()),
        }
    }

    /// Downloads every episode, a batch at a time. Returns how many succeeded.
    pub async fn download_all(&self, episodes: &[Episode]) -> usize {
        run_batches(episodes, self.batch_size, |episode| self.download_episode(episode)).await
    }

    pub async fn shutdown(self) {
        self.session.stop().await;
    }
}

/// Runs `transfer` over `episodes` in batches of `batch_size`. Every item of a
/// batch runs to completion regardless of its siblings; failures are logged
/// and not retried.
pub async fn run_batches<'a, F, Fut>(episodes: &'a [Episode], batch_size: usize, transfer: F) -> usize
where
    F: Fn(&'a Episode) -> Fut,
    Fut: Future<Output = Result<PathBuf>>,
{
    let mut succeeded = 0;
    for batch in episodes.chunks(batch_size.max(1)) {
        let outcomes = join_all(batch.iter().map(&transfer)).await;
        for (episode, outcome) in batch.iter().zip(outcomes) {
            match outcome {
                Ok(saved) => {
                    info!(path = %saved.display(), "Downloaded {}", episode.title());
                    succeeded += 1;
                }
                Err(WatchError::StartTimeout { .. }) => {
                    warn!("Gave up on {}: transfer never started", episode.title())
                }
                Err(e) => error!("Download failed: {}", e),
            }
        }
    }
    succeeded
}

/// One-off download used by the `download` command.
pub async fn download_torrent(torrent: &str, output_dir: PathBuf, start_timeout: Duration) -> anyhow::Result<()> {
    std::fs::create_dir_all(&output_dir)?;
    let downloader = Downloader::new(output_dir, start_timeout, 1).await?;
    let result = downloader.download(torrent, None).await;
    downloader.shutdown().await;
    result?;
    Ok(())
}
