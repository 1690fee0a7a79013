//! Guess scoring primitives.
//!
//! Every peer scores guesses with the same pure functions so that
//! independent verifiers converge on the same numbers when they hold the
//! same secret word. The heuristic here is also the fallback when the
//! external semantic-similarity service is unreachable.

use std::collections::BTreeSet;

/// A similarity score paired with the points it maps to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub similarity: f64,
    pub points: u32,
}

/// Maps a similarity in [0,1] to points. Boundary values land in the
/// higher tier.
pub fn calculate_points(similarity: f64) -> u32 {
    if similarity >= 0.95 {
        3
    } else if similarity >= 0.85 {
        2
    } else if similarity >= 0.65 {
        1
    } else {
        0
    }
}

/// Local similarity heuristic: exact match scores 1.0, substring
/// containment 0.8, anything else the Jaccard overlap of the two
/// character sets. Deterministic and case-insensitive.
pub fn local_similarity(word: &str, guess: &str) -> f64 {
    let word = word.to_lowercase();
    let guess = guess.to_lowercase();

    if word == guess {
        return 1.0;
    }
    if word.contains(&guess) || guess.contains(&word) {
        return 0.8;
    }

    let word_chars: BTreeSet<char> = word.chars().collect();
    let guess_chars: BTreeSet<char> = guess.chars().collect();
    let intersection = word_chars.intersection(&guess_chars).count();
    let union = word_chars.len() + guess_chars.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Scores a guess with the local heuristic.
pub fn evaluate_locally(word: &str, guess: &str) -> Verdict {
    let similarity = local_similarity(word, guess);
    Verdict {
        similarity,
        points: calculate_points(similarity),
    }
}
