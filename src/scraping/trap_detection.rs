//! Crawl trap detection
//!
//! Discovered links that look like crawl traps are not enqueued:
//! - Excessive path depth (`/a/b/c/d/e/f/g/h/...`)
//! - Repetitive path patterns (`/a/b/a/b/a/b`)
//! - Extremely long URLs
//! - Calendar pagination (`/2024/01/15`, `?date=2024-01-15`)

use std::fmt;
use url::Url;

/// Query parameters that drive calendar-style infinite pagination
const CALENDAR_PARAMS: &[&str] = &["date", "day", "month", "year", "week", "calendar"];

/// Configuration for crawl trap detection
#[derive(Debug, Clone)]
pub struct TrapDetectorConfig {
    /// Maximum URL path depth (number of segments)
    pub max_path_depth: usize,
    /// Maximum URL length in characters
    pub max_url_length: usize,
    /// Maximum number of repeated path segments
    pub max_repeated_segments: usize,
}

impl Default for TrapDetectorConfig {
    fn default() -> Self {
        Self {
            max_path_depth: 15,
            max_url_length: 2048,
            max_repeated_segments: 3,
        }
    }
}

/// Why a URL was classified as a trap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapReason {
    TooLong,
    TooDeep,
    RepeatedSegments,
    Calendar,
}

impl fmt::Display for TrapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TooLong => "url too long",
            Self::TooDeep => "path too deep",
            Self::RepeatedSegments => "repeated path segments",
            Self::Calendar => "calendar pagination",
        };
        f.write_str(s)
    }
}

/// Classify `url`, returning the first trap pattern it matches
pub fn detect_trap(url: &Url, config: &TrapDetectorConfig) -> Option<TrapReason> {
    if url.as_str().len() > config.max_url_length {
        return Some(TrapReason::TooLong);
    }

    let segments: Vec<&str> = url.path().split('/').filter(|s| !s.is_empty()).collect();

    if segments.len() > config.max_path_depth {
        return Some(TrapReason::TooDeep);
    }
    if has_repetitive_pattern(&segments, config.max_repeated_segments) {
        return Some(TrapReason::RepeatedSegments);
    }
    if is_calendar_path(&segments) || has_calendar_query(url) {
        return Some(TrapReason::Calendar);
    }
    None
}

/// Detect if a URL is likely a crawl trap
pub fn is_crawl_trap(url: &Url, config: &TrapDetectorConfig) -> bool {
    detect_trap(url, config).is_some()
}

fn has_repetitive_pattern(segments: &[&str], max_repeats: usize) -> bool {
    if segments.len() < 4 || max_repeats == 0 {
        return false;
    }

    for window in 1..=segments.len() / 2 {
        let repeats = (0..segments.len() - window)
            .filter(|&i| segments[i] == segments[i + window])
            .count();
        if repeats >= max_repeats {
            return true;
        }
    }
    false
}

/// A year segment followed by month and day segments
fn is_calendar_path(segments: &[&str]) -> bool {
    segments.windows(3).any(|w| {
        is_numeric(w[0], 4, 4) && is_numeric(w[1], 1, 2) && is_numeric(w[2], 1, 2)
    })
}

fn has_calendar_query(url: &Url) -> bool {
    url.query_pairs().any(|(k, v)| {
        CALENDAR_PARAMS.contains(&k.to_lowercase().as_str())
            && v.chars().any(|c| c.is_ascii_digit())
    })
}

fn is_numeric(s: &str, min_len: usize, max_len: usize) -> bool {
    (min_len..=max_len).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trap(raw: &str) -> Option<TrapReason> {
        detect_trap(&Url::parse(raw).unwrap(), &TrapDetectorConfig::default())
    }

    #[test]
    fn test_normal_url_is_not_trap() {
        assert_eq!(trap("https://example.com/blog/my-post"), None);
        assert_eq!(trap("https://example.com/a/b/c"), None);
    }

    #[test]
    fn test_deep_path_is_trap() {
        assert_eq!(
            trap("https://example.com/a/b/c/d/e/f/g/h/i/j/k/l/m/n/o/p"),
            Some(TrapReason::TooDeep)
        );
    }

    #[test]
    fn test_long_url_is_trap() {
        let long_path = "a/".repeat(1025);
        assert_eq!(
            trap(&format!("https://example.com/{}", long_path)),
            Some(TrapReason::TooLong)
        );
    }

    #[test]
    fn test_repetitive_pattern_is_trap() {
        assert_eq!(
            trap("https://example.com/forum/thread/forum/thread/forum/thread/page"),
            Some(TrapReason::RepeatedSegments)
        );
    }

    #[test]
    fn test_calendar_trap() {
        assert_eq!(trap("https://example.com/calendar/2024/01/15"), Some(TrapReason::Calendar));
        assert_eq!(trap("https://example.com/events?date=2024-01-15"), Some(TrapReason::Calendar));
        assert_eq!(trap("https://example.com/blog/2024/01"), None);
        assert_eq!(trap("https://example.com/products/12345/99/7"), None);
    }

    #[test]
    fn test_custom_config() {
        let url = Url::parse("https://example.com/a/b/c/d/e").unwrap();
        let config = TrapDetectorConfig {
            max_path_depth: 3,
            ..Default::default()
        };
        assert!(is_crawl_trap(&url, &config));
    }
}
