// 🔎 String Similarity - scorers for the fuzzy-match fallback
//
// All scorers return a percentage in [0, 100]. An empty input scores 0.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const SCORE_EPSILON: f64 = 1e-9;

// ============================================================================
// SCORERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scorer {
    /// Indel edit-distance ratio over the whole string
    Ratio,

    /// Ratio after sorting tokens alphabetically
    TokenSortRatio,

    /// Token-set comparison, ignores word order and repeated words
    TokenSetRatio,
}

impl Scorer {
    pub const ALL: [Scorer; 3] = [Scorer::Ratio, Scorer::TokenSortRatio, Scorer::TokenSetRatio];

    pub fn score(&self, a: &str, b: &str) -> f64 {
        match self {
            Scorer::Ratio => ratio(a, b),
            Scorer::TokenSortRatio => token_sort_ratio(a, b),
            Scorer::TokenSetRatio => token_set_ratio(a, b),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scorer::Ratio => "ratio",
            Scorer::TokenSortRatio => "token_sort_ratio",
            Scorer::TokenSetRatio => "token_set_ratio",
        }
    }
}

/// Length of the longest common subsequence of two char slices.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];

    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            current[j + 1] = if ca == cb {
                previous[j] + 1
            } else {
                current[j].max(previous[j + 1])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

/// Minimum number of single-character insertions and deletions turning `a` into `b`.
pub fn indel_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    a.len() + b.len() - 2 * lcs_len(&a, &b)
}

/// Normalized indel similarity: `(|a| + |b| - indel) / (|a| + |b|) * 100`
///
/// Example:
/// - ratio("coffe shp", "coffee shop") = 90.0
pub fn ratio(a: &str, b: &str) -> f64 {
    let (len_a, len_b) = (a.chars().count(), b.chars().count());
    if len_a == 0 || len_b == 0 {
        return 0.0;
    }

    let total = (len_a + len_b) as f64;
    100.0 * (total - indel_distance(a, b) as f64) / total
}

fn sorted_tokens(s: &str) -> Vec<&str> {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens
}

/// Ratio of the alphabetically re-ordered token lists.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a).join(" "), &sorted_tokens(b).join(" "))
}

/// Compare the shared tokens against each side's shared+remaining tokens.
///
/// With `t0 = sorted(a ∩ b)`, `t1 = t0 + sorted(a - b)`, `t2 = t0 + sorted(b - a)`,
/// the score is `max(ratio(t0, t1), ratio(t0, t2), ratio(t1, t2))`.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();

    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let join = |tokens: Vec<&str>| tokens.join(" ");
    let intersection = join(tokens_a.intersection(&tokens_b).copied().collect());
    let only_a = join(tokens_a.difference(&tokens_b).copied().collect());
    let only_b = join(tokens_b.difference(&tokens_a).copied().collect());

    let combine = |rest: &str| -> String {
        match (intersection.is_empty(), rest.is_empty()) {
            (true, _) => rest.to_string(),
            (false, true) => intersection.clone(),
            (false, false) => format!("{} {}", intersection, rest),
        }
    };
    let t1 = combine(&only_a);
    let t2 = combine(&only_b);

    ratio(&intersection, &t1)
        .max(ratio(&intersection, &t2))
        .max(ratio(&t1, &t2))
}

// ============================================================================
// BEST MATCH
// ============================================================================

/// Lowercase, turn every non-alphanumeric char into a space, collapse runs.
///
/// "Tesco.Store " → "tesco store"
pub fn full_process(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzyMatch {
    pub candidate: String,
    pub score: f64,
    pub scorer: Scorer,

    /// Other candidates that reached exactly the same best score
    pub ties: Vec<String>,
}

impl FuzzyMatch {
    pub fn is_ambiguous(&self) -> bool {
        !self.ties.is_empty()
    }
}

/// Best (candidate, score) pair across every scorer.
///
/// Query and candidates are compared after `full_process`; the returned
/// candidate is the original text. Higher score wins; on equal scores the
/// earlier candidate (and the earlier scorer in `Scorer::ALL`) is kept.
/// Returns `None` when there are no candidates.
pub fn best_match<'a, I>(query: &str, candidates: I) -> Option<FuzzyMatch>
where
    I: IntoIterator<Item = &'a str>,
{
    let query = full_process(query);
    let mut scored: Vec<(&str, f64, Scorer)> = Vec::new();

    for candidate in candidates {
        let processed = full_process(candidate);
        let mut best: Option<(f64, Scorer)> = None;
        for scorer in Scorer::ALL {
            let score = scorer.score(&query, &processed);
            if best.map_or(true, |(s, _)| score > s + SCORE_EPSILON) {
                best = Some((score, scorer));
            }
        }
        if let Some((score, scorer)) = best {
            scored.push((candidate, score, scorer));
        }
    }

    let (winner, score, scorer) = scored.iter().copied().fold(None, |acc: Option<(&str, f64, Scorer)>, item| {
        match acc {
            Some(current) if item.1 <= current.1 + SCORE_EPSILON => Some(current),
            _ => Some(item),
        }
    })?;

    let ties = scored
        .iter()
        .filter(|(candidate, s, _)| *candidate != winner && (s - score).abs() <= SCORE_EPSILON)
        .map(|(candidate, _, _)| candidate.to_string())
        .collect();

    Some(FuzzyMatch {
        candidate: winner.to_string(),
        score,
        scorer,
        ties,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_indel_distance() {
        assert_eq!(indel_distance("", ""), 0);
        assert_eq!(indel_distance("abc", "abc"), 0);
        assert_eq!(indel_distance("abc", "ab"), 1);
        assert_eq!(indel_distance("kitten", "sitting"), 5);
    }

    #[test]
    fn test_ratio() {
        assert!(approx(ratio("coffee shop", "coffee shop"), 100.0));
        assert!(approx(ratio("coffe shp", "coffee shop"), 90.0));
        assert!(approx(ratio("abc", "xyz"), 0.0));
        assert!(approx(ratio("", "abc"), 0.0));
    }

    #[test]
    fn test_token_sort_ignores_order() {
        assert!(approx(token_sort_ratio("shop coffee", "coffee shop"), 100.0));
        assert!(ratio("shop coffee", "coffee shop") < 100.0);
    }

    #[test]
    fn test_token_set_ignores_duplicates_and_extras() {
        assert!(approx(token_set_ratio("uber uber trip", "trip uber"), 100.0));
        assert!(approx(token_set_ratio("amazon", "amazon marketplace"), 100.0));
        assert!(token_set_ratio("netflix", "spotify") < 50.0);
        assert!(approx(token_set_ratio("", "spotify"), 0.0));
    }

    #[test]
    fn test_best_match_picks_highest_score() {
        let candidates = ["rent", "coffee shop", "grocery store"];
        let hit = best_match("coffe shp", candidates.iter().copied()).unwrap();
        assert_eq!(hit.candidate, "coffee shop");
        assert!(approx(hit.score, 90.0));
        assert!(!hit.is_ambiguous());
    }

    #[test]
    fn test_best_match_reports_ties_and_keeps_first() {
        let candidates = ["cafe one", "cafe two"];
        let hit = best_match("cafe", candidates.iter().copied()).unwrap();
        assert_eq!(hit.candidate, "cafe one");
        assert_eq!(hit.scorer, Scorer::TokenSetRatio);
        assert_eq!(hit.ties, vec!["cafe two".to_string()]);
    }

    #[test]
    fn test_punctuation_does_not_lower_the_score() {
        assert_eq!(full_process(" Tesco.Store*UK "), "tesco store uk");
        assert!(ratio("tesco.store", "tesco store") < 100.0);

        let candidates = ["tesco store", "tesco express"];
        let hit = best_match("tesco.store", candidates.iter().copied()).unwrap();
        assert_eq!(hit.candidate, "tesco store");
        assert!(approx(hit.score, 100.0));
        assert_eq!(hit.scorer.as_str(), "ratio");
    }

    #[test]
    fn test_best_match_empty_candidates() {
        assert!(best_match("anything", std::iter::empty()).is_none());
    }
}
