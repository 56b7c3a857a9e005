//! Repetition preprocessing: rewrite `* N` into chained copies.
//!
//! Runs before every other detector. A `* N` following a prompt reference
//! expands the reference into N chain steps; argument text after the count is
//! re-attached to every expanded copy. A quoted `*` is literal, a non-numeric
//! count is literal, and `N < 1` is a hard parse error.

use crate::core::operators::RepetitionOperator;
use crate::core::quote;
use crate::error::ParseError;

/// Rewrite the first unmasked `* N` in `text`, if any.
///
/// Returns the (possibly rewritten) command text plus the detected repetition
/// operator. The repeated unit is the last chain segment before the `*`, so
/// `a --> b * 2` becomes `a --> b --> b`.
pub fn preprocess(text: &str) -> Result<(String, Option<RepetitionOperator>), ParseError> {
    let mask = quote::mask(text);

    let Some((star, count, count_end)) = find_repetition(text, &mask) else {
        return Ok((text.to_string(), None));
    };
    if count < 1 {
        return Err(ParseError::RepetitionCount { count });
    }

    let head = text[..star].trim_end();
    let tail = text[count_end..].trim();
    if head.is_empty() {
        // `* N` with nothing to repeat stays literal text.
        return Ok((text.to_string(), None));
    }

    // Only the last chain segment repeats; earlier segments pass through.
    let (prefix, unit) = match head.rfind("-->") {
        Some(pos) if !mask[pos] => (&head[..pos + 3], head[pos + 3..].trim()),
        _ => ("", head),
    };

    let mut copy = unit.to_string();
    if !tail.is_empty() {
        copy.push(' ');
        copy.push_str(tail);
    }
    let copies = vec![copy; count as usize].join(" --> ");

    let mut rewritten = String::with_capacity(prefix.len() + copies.len() + 1);
    rewritten.push_str(prefix);
    if !prefix.is_empty() {
        rewritten.push(' ');
    }
    rewritten.push_str(&copies);

    Ok((rewritten, Some(RepetitionOperator { count })))
}

/// Find the first unmasked `*` followed by a numeric count.
///
/// Returns `(star_offset, count, end_of_count_offset)`.
fn find_repetition(text: &str, mask: &[bool]) -> Option<(usize, u32, usize)> {
    for (i, ch) in text.char_indices() {
        if ch != '*' || mask[i] {
            continue;
        }
        let after = &text[i + 1..];
        let ws = after.len() - after.trim_start().len();
        let digits: String = after[ws..].chars().take_while(char::is_ascii_digit).collect();
        if digits.is_empty() {
            // Non-numeric count: leave the `*` as literal text.
            continue;
        }
        let count = digits.parse::<u32>().ok()?;
        return Some((i, count, i + 1 + ws + digits.len()));
    }
    None
}
