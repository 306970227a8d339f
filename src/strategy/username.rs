//! Candidate username generation for the rename workflow.

use rand::seq::SliceRandom;

const MIN_LEN: usize = 6;
const MAX_LEN: usize = 20;

/// Casual prefixes occasionally prepended to a recombined name.
const PREFIXES: [&str; 5] = ["its", "iam", "the", "real", "just"];

fn sanitize_tokens(display_name: &str) -> Vec<String> {
    display_name
        .split_whitespace()
        .map(|t| {
            t.chars()
                .filter(|c| c.is_ascii_alphabetic())
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

fn compliant(candidate: &str) -> bool {
    (MIN_LEN..=MAX_LEN).contains(&candidate.len())
        && candidate.chars().all(|c| c.is_ascii_lowercase())
}

/// Generate a shuffled list of compliant candidate usernames from a display
/// name: recombined name tokens, optionally prefixed, optionally with the
/// trailing character repeated 1-3 times. All candidates are lowercase
/// letters only, 6-20 characters, and unique within one call.
pub fn generate_candidates(display_name: &str) -> Vec<String> {
    let tokens = sanitize_tokens(display_name);
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut bases: Vec<String> = Vec::new();
    bases.push(tokens.concat());
    if tokens.len() >= 2 {
        let mut reversed = tokens.clone();
        reversed.reverse();
        bases.push(reversed.concat());
        bases.push(tokens[0].clone());
        bases.push(tokens[tokens.len() - 1].clone());
    }

    let mut candidates: Vec<String> = Vec::new();
    for base in &bases {
        candidates.push(base.clone());
        for prefix in PREFIXES {
            candidates.push(format!("{prefix}{base}"));
        }
        if let Some(last) = base.chars().last() {
            for repeat in 1..=3usize {
                let mut stretched = base.clone();
                stretched.extend(std::iter::repeat(last).take(repeat));
                candidates.push(stretched);
            }
        }
    }

    candidates.retain(|c| compliant(c));

    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| seen.insert(c.clone()));

    candidates.shuffle(&mut rand::thread_rng());
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_are_compliant_and_unique() {
        let candidates = generate_candidates("John Smith");
        assert!(!candidates.is_empty());

        let mut seen = std::collections::HashSet::new();
        for c in &candidates {
            assert!(c.len() >= 6 && c.len() <= 20, "bad length: {c}");
            assert!(c.chars().all(|ch| ch.is_ascii_lowercase()), "bad chars: {c}");
            assert!(seen.insert(c.clone()), "duplicate: {c}");
        }
    }

    #[test]
    fn recombines_tokens() {
        let candidates = generate_candidates("John Smith");
        assert!(candidates.iter().any(|c| c == "johnsmith"));
        assert!(candidates.iter().any(|c| c == "smithjohn"));
    }

    #[test]
    fn strips_non_alphabetic_input() {
        let candidates = generate_candidates("J0hn-Smith 3rd!");
        for c in &candidates {
            assert!(c.chars().all(|ch| ch.is_ascii_lowercase()));
        }
    }

    #[test]
    fn short_tokens_are_filtered_by_length() {
        // "al b" recombines to at most 3 letters before prefixes; only
        // prefixed or stretched forms can reach 6 characters.
        let candidates = generate_candidates("al b");
        for c in &candidates {
            assert!(c.len() >= 6);
        }
    }

    #[test]
    fn empty_display_name_yields_nothing() {
        assert!(generate_candidates("").is_empty());
        assert!(generate_candidates("123 !!").is_empty());
    }
}
