//! Season/episode pattern selection.
//!
//! A series may carry its own extraction pattern. When it is missing, broken,
//! or does not fit the titles actually being scraped, one of the built-in
//! patterns is used instead.

use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, WatchError};
use crate::models::SeriesEntry;

/// Capture slots a usable pattern produces: the whole match plus two groups.
pub const CAPTURE_SLOTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSource {
    Custom,
    /// `S01E02`
    SeasonEpisode,
    /// `S01 - 02`
    SeasonDash,
    /// ` - 02`, season implied
    Dash,
}

lazy_static! {
    static ref DEFAULT_PATTERNS: Vec<(PatternSource, Regex)> = vec![
        (
            PatternSource::SeasonEpisode,
            RegexBuilder::new(r"S(\d+)E(\d+)")
                .case_insensitive(true)
                .build()
                .unwrap(),
        ),
        (PatternSource::SeasonDash, Regex::new(r"S(\d+) - (\d+)").unwrap()),
        (PatternSource::Dash, Regex::new(r" (-) (\d+)").unwrap()),
    ];
}

/// An extraction expression whose capture layout is known.
#[derive(Debug, Clone)]
pub struct ResolvedPattern {
    pub expression: Regex,
    pub season_group: usize,
    pub episode_group: usize,
    pub source: PatternSource,
}

/// Raw pieces of a successful match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch<'t> {
    pub whole: &'t str,
    pub season: &'t str,
    pub episode: &'t str,
}

impl ResolvedPattern {
    fn new(expression: Regex, source: PatternSource) -> Self {
        Self {
            expression,
            season_group: 1,
            episode_group: 2,
            source,
        }
    }

    pub fn as_str(&self) -> &str {
        self.expression.as_str()
    }

    /// Applies the pattern, returning `None` unless all three slots captured.
    pub fn apply<'t>(&self, text: &'t str) -> Option<PatternMatch<'t>> {
        let caps = self.expression.captures(text)?;
        if caps.len() != CAPTURE_SLOTS {
            return None;
        }
        Some(PatternMatch {
            whole: caps.get(0)?.as_str(),
            season: caps.get(self.season_group)?.as_str(),
            episode: caps.get(self.episode_group)?.as_str(),
        })
    }
}

/// Compiles a user supplied pattern and checks that it has exactly two
/// capturing groups.
pub fn validate_pattern(pattern: Option<&str>) -> Result<Regex> {
    let pattern = pattern.ok_or_else(|| WatchError::InvalidPattern {
        pattern: String::new(),
        reason: "no pattern given".to_string(),
    })?;

    let regex = Regex::new(pattern).map_err(|e| WatchError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;

    if regex.captures_len() != CAPTURE_SLOTS {
        return Err(WatchError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: format!(
                "expected 2 capture groups, found {}",
                regex.captures_len() - 1
            ),
        });
    }

    Ok(regex)
}

/// Picks the pattern for a series.
///
/// The custom pattern comes first, then the defaults in order. With a sample
/// title only a pattern that matches it qualifies; without one the first
/// valid pattern wins.
pub fn resolve_pattern(entry: &SeriesEntry, sample_title: Option<&str>) -> Option<ResolvedPattern> {
    let custom = match entry.pattern.as_deref() {
        Some(raw) => match validate_pattern(Some(raw)) {
            Ok(regex) => Some((PatternSource::Custom, regex)),
            Err(e) => {
                debug!(series = %entry.folder, "Ignoring custom pattern: {}", e);
                None
            }
        },
        None => None,
    };

    custom
        .into_iter()
        .chain(DEFAULT_PATTERNS.iter().cloned())
        .find(|(_, regex)| sample_title.map_or(true, |title| regex.is_match(title)))
        .map(|(source, regex)| ResolvedPattern::new(regex, source))
}
