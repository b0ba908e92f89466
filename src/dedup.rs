//! Collapses releases of the same episode down to a single winner.
//!
//! Each stage narrows the pool produced by the stage before it, so an earlier
//! dimension always takes precedence over a later one.

use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::models::{CleanupAttributes, CleanupMap, Episode};

pub const HEVC: &str = "HEVC";

const DEFAULT_RESOLUTION: i64 = 1080;
const DEFAULT_VERSION: i64 = 1;

lazy_static! {
    static ref RESOLUTION_TAG: Regex = RegexBuilder::new(r"[\[(][^\[\]()]*?\b(\d+)p\b[^\[\]()]*[\])]")
        .case_insensitive(true)
        .build()
        .unwrap();
    static ref HEVC_TAG: Regex = RegexBuilder::new(r"\bHEVC\b")
        .case_insensitive(true)
        .build()
        .unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityStage {
    Resolution,
    Encoding,
    Version,
    Recency,
}

/// Stage order, highest precedence first.
pub const QUALITY_PIPELINE: [QualityStage; 4] = [
    QualityStage::Resolution,
    QualityStage::Encoding,
    QualityStage::Version,
    QualityStage::Recency,
];

#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub winners: Vec<Episode>,
    pub cleanup: CleanupMap,
}

impl QualityStage {
    fn signal(self, episode: &Episode, key: &str) -> Option<i64> {
        let title = episode.title();
        match self {
            Self::Resolution => RESOLUTION_TAG
                .captures(title)
                .and_then(|caps| caps[1].parse().ok()),
            Self::Encoding => HEVC_TAG.is_match(title).then_some(1),
            Self::Version => RegexBuilder::new(&format!(r"{}v(\d+)", regex::escape(key)))
                .case_insensitive(true)
                .build()
                .ok()?
                .captures(title)
                .and_then(|caps| caps[1].parse().ok()),
            Self::Recency => Some(episode.result.timestamp),
        }
    }

    fn implicit_value(self) -> i64 {
        match self {
            Self::Resolution => DEFAULT_RESOLUTION,
            Self::Encoding => 0,
            Self::Version => DEFAULT_VERSION,
            Self::Recency => 0,
        }
    }

    fn record(self, attrs: &mut CleanupAttributes, best: i64) {
        match self {
            Self::Resolution => attrs.resolution = u32::try_from(best).ok(),
            Self::Encoding => attrs.encoding = Some(HEVC.to_string()),
            Self::Version => attrs.version = u32::try_from(best).ok(),
            Self::Recency => attrs.timestamp = Some(best),
        }
    }

    /// Decides whether `pool[index]` survives this stage.
    fn keep(self, pool: &[Episode], index: usize, cleanup: &mut CleanupMap) -> bool {
        let candidate = &pool[index];
        let Some(key) = candidate.key() else {
            return false;
        };

        let duplicates: Vec<(usize, &Episode)> = pool
            .iter()
            .enumerate()
            .filter(|(_, other)| other.key() == Some(key))
            .collect();
        if duplicates.len() <= 1 {
            return true;
        }

        let signals: Vec<Option<i64>> = duplicates
            .iter()
            .map(|(_, other)| self.signal(other, key))
            .collect();
        if signals.iter().all(Option::is_none) {
            return true;
        }

        let implicit = self.implicit_value();
        let values: Vec<i64> = signals.iter().map(|s| s.unwrap_or(implicit)).collect();
        let best = values.iter().copied().max().unwrap_or(implicit);

        if values.iter().any(|v| *v != best) {
            let attrs = cleanup.entry(key.to_string()).or_default();
            attrs.season = candidate.identity.season_number;
            self.record(attrs, best);
        }

        let own = self.signal(candidate, key).unwrap_or(implicit);
        if own != best {
            debug!(stage = ?self, episode_key = key, title = candidate.title(), "Dropping duplicate");
            return false;
        }

        // Equal timestamps would leave two winners; the first one in the pool stays.
        if self == Self::Recency {
            let first = duplicates
                .iter()
                .zip(&values)
                .find(|(_, v)| **v == best)
                .map(|((i, _), _)| *i);
            return first == Some(index);
        }

        true
    }

    pub fn apply(self, pool: Vec<Episode>, cleanup: &mut CleanupMap) -> Vec<Episode> {
        let verdicts: Vec<bool> = (0..pool.len())
            .map(|i| self.keep(&pool, i, cleanup))
            .collect();
        pool.into_iter()
            .zip(verdicts)
            .filter_map(|(episode, keep)| keep.then_some(episode))
            .collect()
    }
}

/// Runs every stage of [`QUALITY_PIPELINE`] and returns the winners together
/// with the attributes stale files will be checked against.
pub fn resolve_duplicates(episodes: Vec<Episode>) -> DedupOutcome {
    let mut cleanup = CleanupMap::new();
    let winners = QUALITY_PIPELINE
        .iter()
        .fold(episodes, |pool, stage| stage.apply(pool, &mut cleanup));
    DedupOutcome { winners, cleanup }
}
