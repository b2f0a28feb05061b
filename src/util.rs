//! Shared utility functions

/// Truncate a string to a maximum length, appending "..." if truncated.
/// Handles multi-byte characters by finding a valid char boundary.
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let suffix = "...";
    let target = max_len.saturating_sub(suffix.len());
    // Find a valid char boundary at or before target
    let mut end = target;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &s[..end], suffix)
}

/// Fast non-cryptographic 64-bit hash
pub fn fast_hash(s: &str) -> u64 {
    xxhash_rust::xxh3::xxh3_64(s.as_bytes())
}

/// Compute a 64-bit SimHash over a stream of features.
///
/// Each feature votes +1/-1 on every bit position according to its own hash;
/// positions with a positive total are set. Returns 0 for an empty stream.
pub fn compute_simhash<'a>(features: impl IntoIterator<Item = &'a str>) -> u64 {
    let mut weights = [0i64; 64];
    let mut any = false;

    for feature in features {
        any = true;
        let h = fast_hash(feature);
        for (bit, weight) in weights.iter_mut().enumerate() {
            if (h >> bit) & 1 == 1 {
                *weight += 1;
            } else {
                *weight -= 1;
            }
        }
    }

    if !any {
        return 0;
    }

    weights
        .iter()
        .enumerate()
        .filter(|(_, w)| **w > 0)
        .fold(0u64, |acc, (bit, _)| acc | (1u64 << bit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_multibyte() {
        let s = "héllo wörld";
        let t = truncate_str(s, 8);
        assert!(t.ends_with("..."));
        assert!(t.len() <= 8);
        assert_eq!(truncate_str("short", 10), "short");
    }

    #[test]
    fn test_simhash_empty() {
        assert_eq!(compute_simhash(std::iter::empty()), 0);
    }

    #[test]
    fn test_simhash_single_feature_is_its_hash() {
        assert_eq!(compute_simhash(["alpha"]), fast_hash("alpha"));
    }
}
