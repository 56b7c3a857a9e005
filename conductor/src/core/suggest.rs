//! Ranked suggestions for unknown prompt references.
//!
//! Three signals, best first: prefix match, edit distance ≤ 2, shared-word
//! overlap. Nothing above threshold means no suggestions at all — a wrong
//! guess is worse than none.

const MAX_SUGGESTIONS: usize = 3;
const MAX_EDIT_DISTANCE: usize = 2;

/// Rank candidates against `input`, returning at most 3.
pub fn suggest<'a>(input: &str, candidates: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let needle = input.to_lowercase();
    let needle_words = words(&needle);

    let mut scored: Vec<(u8, usize, &str)> = Vec::new();
    for candidate in candidates {
        let hay = candidate.to_lowercase();
        if hay == needle {
            continue;
        }

        if hay.starts_with(&needle) || needle.starts_with(&hay) {
            scored.push((0, hay.len().abs_diff(needle.len()), candidate));
            continue;
        }

        let distance = levenshtein(&needle, &hay);
        if distance <= MAX_EDIT_DISTANCE {
            scored.push((1, distance, candidate));
            continue;
        }

        let shared = words(&hay).iter().filter(|w| needle_words.contains(w)).count();
        if shared > 0 {
            scored.push((2, usize::MAX - shared, candidate));
        }
    }

    scored.sort_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));
    scored
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, _, candidate)| candidate.to_string())
        .collect()
}

fn words(text: &str) -> Vec<&str> {
    text.split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Classic two-row Levenshtein.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}
