//! Similarity matching against the vocabulary

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::vocabulary::Vocabulary;

/// String similarity metric used for fuzzy matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Gestalt pattern matching: 2·M / (|a| + |b|)
    #[default]
    RatcliffObershelp,
    /// 1 - levenshtein / max length
    NormalizedLevenshtein,
}

impl SimilarityMetric {
    pub fn ratio(&self, a: &str, b: &str) -> f64 {
        match self {
            SimilarityMetric::RatcliffObershelp => ratcliff_obershelp(a, b),
            SimilarityMetric::NormalizedLevenshtein => strsim::normalized_levenshtein(a, b),
        }
    }
}

/// Closest vocabulary entry and its similarity
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyMatch {
    pub code: String,
    pub ratio: f64,
}

/// Best-scoring vocabulary entry if it reaches `cutoff`.
///
/// Ties keep the earliest entry in vocabulary order.
pub fn best_match(
    text: &str,
    vocabulary: &Vocabulary,
    metric: SimilarityMetric,
    cutoff: f64,
) -> Option<FuzzyMatch> {
    let mut best: Option<FuzzyMatch> = None;
    for code in vocabulary.iter() {
        let ratio = metric.ratio(text, code);
        if best.as_ref().map_or(true, |b| ratio > b.ratio) {
            best = Some(FuzzyMatch {
                code: code.to_string(),
                ratio,
            });
        }
    }
    best.filter(|m| m.ratio >= cutoff)
}

/// Ratcliff/Obershelp similarity in [0, 1].
///
/// Counts characters in the longest common substring, then recursively in the
/// unmatched pieces on either side. Two empty strings are identical.
pub fn ratcliff_obershelp(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_characters(&a, &b) as f64 / total as f64
}

fn matching_characters(a: &[char], b: &[char]) -> usize {
    let mut b2j: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, &c) in b.iter().enumerate() {
        b2j.entry(c).or_default().push(j);
    }

    let mut matched = 0;
    let mut queue = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, k) = longest_match(a, &b2j, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            queue.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            queue.push((i + k, ahi, j + k, bhi));
        }
    }
    matched
}

/// Longest common block of `a[alo..ahi]` and `b[blo..bhi]` as (i, j, size).
/// Among equally long blocks the one starting earliest in `a`, then `b`, wins.
fn longest_match(
    a: &[char],
    b2j: &HashMap<char, Vec<usize>>,
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_k) = (alo, blo, 0);
    // run length of the match ending at b[j], for the previous row of a
    let mut j2len: HashMap<usize, usize> = HashMap::new();

    for (i, c) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut next: HashMap<usize, usize> = HashMap::new();
        if let Some(positions) = b2j.get(c) {
            for &j in positions {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let k = j
                    .checked_sub(1)
                    .and_then(|prev| j2len.get(&prev))
                    .copied()
                    .unwrap_or(0)
                    + 1;
                next.insert(j, k);
                if k > best_k {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_k = k;
                }
            }
        }
        j2len = next;
    }

    (best_i, best_j, best_k)
}
