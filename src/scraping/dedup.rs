//! Duplicate content detection
//!
//! Two levels, both over normalized page text:
//! - Exact duplicates: identical SHA256 content hash
//! - Near duplicates: SimHash fingerprints within a Hamming distance
//!
//! Near-duplicate clustering avoids all-pairs comparison with the pigeonhole
//! banding trick: split the 64 bits into `k + 1` bands; two fingerprints at
//! distance `<= k` must agree exactly on at least one band, so only pages
//! sharing a band value are compared. Matches are merged with union-find.

use dashmap::{DashMap, DashSet};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use crate::config::MAX_DEDUP_THRESHOLD;
use crate::types::{ContentHash, UrlKey};

static RE_BOILERPLATE: OnceLock<Regex> = OnceLock::new();

/// Lower-case, collapse whitespace and strip footer boilerplate
pub fn normalize_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let re = RE_BOILERPLATE.get_or_init(|| {
        Regex::new(r"copyright \d{4}|all rights reserved|privacy policy|terms of service|cookie policy")
            .unwrap()
    });
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    re.replace_all(&collapsed, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// SimHash for content similarity detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimHash(pub u64);

impl SimHash {
    /// Compute SimHash for already-normalized text.
    ///
    /// Every word occurrence is one feature, so frequent words carry more
    /// weight and a handful of edited words moves few bits.
    pub fn compute(text: &str) -> Self {
        SimHash(crate::util::compute_simhash(Self::extract_features(text)))
    }

    /// Word tokens, punctuation stripped
    fn extract_features(text: &str) -> Vec<&str> {
        text.split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|w| !w.is_empty())
            .collect()
    }

    /// Calculate Hamming distance between two SimHashes
    pub fn hamming_distance(&self, other: &SimHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// Check if two hashes are similar (within threshold)
    pub fn is_similar(&self, other: &SimHash, max_distance: u32) -> bool {
        self.hamming_distance(other) <= max_distance
    }
}

/// Fingerprints of one page's text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFingerprint {
    pub simhash: SimHash,
    pub content_hash: ContentHash,
    /// Words in the normalized text
    pub word_count: usize,
}

impl ContentFingerprint {
    pub fn compute(text: &str) -> Self {
        let normalized = normalize_text(text);
        Self {
            simhash: SimHash::compute(&normalized),
            content_hash: ContentHash::compute(&normalized),
            word_count: normalized.split_whitespace().count(),
        }
    }
}

/// Result of [`DuplicateDetector::register`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Registered,
    /// The page was already registered; the call was a no-op
    AlreadyRegistered,
    /// Too little text to compare; excluded from analysis
    InsufficientContent,
}

/// A group of pages sharing identical content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExactDuplicateGroup {
    pub content_hash: ContentHash,
    /// Sorted
    pub url_keys: Vec<UrlKey>,
}

/// A connected group of near-duplicate pages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearDuplicateGroup {
    /// Smallest key in the group
    pub group_id: UrlKey,
    /// Sorted
    pub url_keys: Vec<UrlKey>,
    /// Largest distance between a member and the group's first member
    pub max_distance: u32,
}

/// Clustering output for one job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub threshold: u32,
    pub pages_analyzed: usize,
    pub exact_groups: Vec<ExactDuplicateGroup>,
    pub near_groups: Vec<NearDuplicateGroup>,
    /// Sorted keys of pages excluded for having too little text
    pub insufficient_content: Vec<UrlKey>,
}

/// Pairwise similarity of two registered pages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageComparison {
    pub hamming_distance: u32,
    /// `(64 - distance) / 64 * 100`
    pub similarity_percentage: f64,
    pub is_exact_duplicate: bool,
    pub is_near_duplicate: bool,
}

/// Job-scoped duplicate detector.
///
/// Accepts concurrent registrations; a second registration of the same
/// URL key is a silent no-op.
pub struct DuplicateDetector {
    pages: DashMap<UrlKey, ContentFingerprint>,
    insufficient: DashSet<UrlKey>,
    min_words: usize,
}

impl DuplicateDetector {
    pub fn new(min_words: usize) -> Self {
        Self {
            pages: DashMap::new(),
            insufficient: DashSet::new(),
            min_words,
        }
    }

    /// Register a page's fingerprint
    pub fn register(&self, url_key: UrlKey, fingerprint: ContentFingerprint) -> Registration {
        if self.pages.contains_key(&url_key) || self.insufficient.contains(&url_key) {
            return Registration::AlreadyRegistered;
        }
        if fingerprint.word_count == 0 || fingerprint.word_count < self.min_words {
            return if self.insufficient.insert(url_key) {
                Registration::InsufficientContent
            } else {
                Registration::AlreadyRegistered
            };
        }

        match self.pages.entry(url_key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Registration::AlreadyRegistered,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(fingerprint);
                Registration::Registered
            }
        }
    }

    /// Register page text
    pub fn register_text(&self, url_key: UrlKey, text: &str) -> Registration {
        self.register(url_key, ContentFingerprint::compute(text))
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Compare two registered pages
    pub fn compare(&self, a: &UrlKey, b: &UrlKey, threshold: u32) -> Option<PageComparison> {
        let fa = self.pages.get(a)?.clone();
        let fb = self.pages.get(b)?.clone();
        let distance = fa.simhash.hamming_distance(&fb.simhash);

        Some(PageComparison {
            hamming_distance: distance,
            similarity_percentage: ((64 - distance) as f64 / 64.0 * 100.0 * 100.0).round() / 100.0,
            is_exact_duplicate: fa.content_hash == fb.content_hash,
            is_near_duplicate: distance <= threshold,
        })
    }

    /// Group registered pages into exact and near-duplicate clusters.
    ///
    /// A near-duplicate group made up only of pages that share one content
    /// hash is left out, since it is already reported as an exact group.
    pub fn cluster(&self, threshold: u32) -> DuplicateReport {
        let threshold = threshold.min(MAX_DEDUP_THRESHOLD);

        // Deterministic order for stable group ids and output
        let mut pages: Vec<(UrlKey, ContentFingerprint)> = self
            .pages
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        pages.sort_by(|a, b| a.0.cmp(&b.0));

        let mut insufficient: Vec<UrlKey> = self.insufficient.iter().map(|k| k.key().clone()).collect();
        insufficient.sort();

        DuplicateReport {
            threshold,
            pages_analyzed: pages.len(),
            exact_groups: Self::exact_groups(&pages),
            near_groups: Self::near_groups(&pages, threshold),
            insufficient_content: insufficient,
        }
    }

    fn exact_groups(pages: &[(UrlKey, ContentFingerprint)]) -> Vec<ExactDuplicateGroup> {
        let mut by_hash: BTreeMap<&ContentHash, Vec<UrlKey>> = BTreeMap::new();
        for (key, fp) in pages {
            by_hash.entry(&fp.content_hash).or_default().push(key.clone());
        }

        let mut groups: Vec<ExactDuplicateGroup> = by_hash
            .into_iter()
            .filter(|(_, keys)| keys.len() > 1)
            .map(|(hash, url_keys)| ExactDuplicateGroup {
                content_hash: hash.clone(),
                url_keys,
            })
            .collect();
        groups.sort_by(|a, b| a.url_keys[0].cmp(&b.url_keys[0]));
        groups
    }

    fn near_groups(pages: &[(UrlKey, ContentFingerprint)], threshold: u32) -> Vec<NearDuplicateGroup> {
        let n = pages.len();
        let mut sets = UnionFind::new(n);

        if threshold >= MAX_DEDUP_THRESHOLD {
            // Every pair is within 64 bits
            for i in 1..n {
                sets.union(0, i);
            }
        } else {
            // Identical fingerprints are merged up front so buckets only hold
            // distinct values
            let mut by_value: HashMap<u64, usize> = HashMap::new();
            let mut distinct: Vec<usize> = Vec::new();
            for (i, (_, fp)) in pages.iter().enumerate() {
                match by_value.get(&fp.simhash.0) {
                    Some(&first) => sets.union(first, i),
                    None => {
                        by_value.insert(fp.simhash.0, i);
                        distinct.push(i);
                    }
                }
            }

            let bands = band_masks(threshold as usize + 1);
            for (band, mask) in bands.iter().enumerate() {
                let mut buckets: HashMap<(usize, u64), Vec<usize>> = HashMap::new();
                for &i in &distinct {
                    buckets
                        .entry((band, pages[i].1.simhash.0 & mask))
                        .or_default()
                        .push(i);
                }
                for members in buckets.values().filter(|m| m.len() > 1) {
                    for (pos, &a) in members.iter().enumerate() {
                        for &b in &members[pos + 1..] {
                            if pages[a].1.simhash.is_similar(&pages[b].1.simhash, threshold) {
                                sets.union(a, b);
                            }
                        }
                    }
                }
            }
        }

        let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..n {
            components.entry(sets.find(i)).or_default().push(i);
        }

        let mut groups: Vec<NearDuplicateGroup> = components
            .into_values()
            .filter(|members| members.len() > 1)
            .filter(|members| {
                let first = &pages[members[0]].1.content_hash;
                members.iter().any(|&m| &pages[m].1.content_hash != first)
            })
            .map(|members| {
                let anchor = pages[members[0]].1.simhash;
                NearDuplicateGroup {
                    group_id: pages[members[0]].0.clone(),
                    max_distance: members
                        .iter()
                        .map(|&m| anchor.hamming_distance(&pages[m].1.simhash))
                        .max()
                        .unwrap_or(0),
                    url_keys: members.iter().map(|&m| pages[m].0.clone()).collect(),
                }
            })
            .collect();
        groups.sort_by(|a, b| a.group_id.cmp(&b.group_id));
        groups
    }
}

/// Split 64 bits into `count` contiguous masks of near-equal width
fn band_masks(count: usize) -> Vec<u64> {
    let count = count.clamp(1, 64);
    let base = 64 / count;
    let extra = 64 % count;

    let mut masks = Vec::with_capacity(count);
    let mut start = 0;
    for band in 0..count {
        let width = base + usize::from(band < extra);
        let mask = if width == 64 { u64::MAX } else { ((1u64 << width) - 1) << start };
        masks.push(mask);
        start += width;
    }
    masks
}

/// Disjoint-set forest with path halving and union by size
struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] { (ra, rb) } else { (rb, ra) };
        self.parent[small] = big;
        self.size[big] += self.size[small];
    }
}
