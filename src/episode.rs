use crate::models::{Episode, EpisodeIdentity, RawResult};
use crate::pattern::ResolvedPattern;

/// Marker captured by the dash pattern in place of a season number.
const DASH_SEASON: &str = "-";

pub fn resolve_episode_info(pattern: Option<&ResolvedPattern>, title: &str) -> EpisodeIdentity {
    let Some(found) = pattern.and_then(|p| p.apply(title)) else {
        return EpisodeIdentity::invalid();
    };

    let season_number = if found.season == DASH_SEASON {
        1
    } else {
        found.season.parse().unwrap_or(1)
    };

    EpisodeIdentity {
        season_number,
        episode_number: found.episode.to_string(),
        episode_key: Some(found.whole.to_string()),
        is_valid: true,
    }
}

pub fn extract(pattern: Option<&ResolvedPattern>, result: RawResult) -> Episode {
    let identity = resolve_episode_info(pattern, &result.title);
    Episode {
        result,
        identity,
        path: None,
    }
}

/// Tags every scraped result, keeping the scrape order.
pub fn extract_all(pattern: Option<&ResolvedPattern>, results: Vec<RawResult>) -> Vec<Episode> {
    results
        .into_iter()
        .map(|result| extract(pattern, result))
        .collect()
}
