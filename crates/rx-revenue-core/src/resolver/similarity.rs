//! String similarity scores on a 0..=100 scale.
//!
//! Built on `strsim::normalized_levenshtein`:
//! - `ratio`: whole-string similarity
//! - `partial_ratio`: best alignment of the shorter string inside the longer
//! - `token_sort_ratio`: word-order independent
//! - `weighted_ratio`: length-aware blend used for fuzzy ranking

use strsim::normalized_levenshtein;

/// Whole-string similarity.
pub fn ratio(a: &str, b: &str) -> u8 {
    if a.is_empty() && b.is_empty() {
        return 100;
    }
    to_score(normalized_levenshtein(a, b))
}

/// Best similarity of the shorter string against every same-length window of the longer.
pub fn partial_ratio(a: &str, b: &str) -> u8 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let (shorter, longer) = if a_chars.len() <= b_chars.len() {
        (a_chars, b_chars)
    } else {
        (b_chars, a_chars)
    };

    if shorter.is_empty() {
        return 0;
    }
    if shorter.len() == longer.len() {
        return ratio(a, b);
    }

    let needle: String = shorter.iter().collect();
    let mut best = 0;
    for window in longer.windows(shorter.len()) {
        let candidate: String = window.iter().collect();
        let score = ratio(&needle, &candidate);
        if score > best {
            best = score;
            if best == 100 {
                break;
            }
        }
    }
    best
}

/// Similarity after sorting whitespace-separated tokens.
pub fn token_sort_ratio(a: &str, b: &str) -> u8 {
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

/// Length-aware blend of the measures above.
///
/// Similar lengths lean on `ratio` and `token_sort_ratio`; very different
/// lengths lean on a scaled `partial_ratio`.
pub fn weighted_ratio(a: &str, b: &str) -> u8 {
    let len_a = a.chars().count();
    let len_b = b.chars().count();
    if len_a == 0 || len_b == 0 {
        return 0;
    }

    let base = ratio(a, b) as f64;
    let length_ratio = len_a.max(len_b) as f64 / len_a.min(len_b) as f64;

    let best = if length_ratio < 1.5 {
        base.max(token_sort_ratio(a, b) as f64 * 0.95)
    } else {
        let scale = if length_ratio < 8.0 { 0.9 } else { 0.6 };
        base.max(partial_ratio(a, b) as f64 * scale)
    };

    best.round().clamp(0.0, 100.0) as u8
}

/// Maximum of the three character-level measures.
pub fn best_of_measures(a: &str, b: &str) -> u8 {
    ratio(a, b).max(partial_ratio(a, b)).max(token_sort_ratio(a, b))
}

fn sorted_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn to_score(similarity: f64) -> u8 {
    (similarity * 100.0).round().clamp(0.0, 100.0) as u8
}
