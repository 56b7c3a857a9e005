//! Quote masking shared by the scanners.
//!
//! Operator characters inside single- or double-quoted regions are literal
//! text and must never participate in operator matching.

/// Per-byte mask: `true` for bytes inside a quoted region (quote characters
/// included). Quotes do not nest; an unterminated quote masks to end of input.
pub fn mask(text: &str) -> Vec<bool> {
    let mut mask = vec![false; text.len()];
    let mut open: Option<char> = None;
    for (i, ch) in text.char_indices() {
        match open {
            Some(q) => {
                for flag in mask.iter_mut().skip(i).take(ch.len_utf8()) {
                    *flag = true;
                }
                if ch == q {
                    open = None;
                }
            }
            None => {
                if ch == '"' || ch == '\'' {
                    open = Some(ch);
                    mask[i] = true;
                }
            }
        }
    }
    mask
}

/// Replace `start..end` with spaces, preserving byte offsets for later scans.
pub fn blank_span(buf: &mut String, start: usize, end: usize) {
    buf.replace_range(start..end, &" ".repeat(end - start));
}
