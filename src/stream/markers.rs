//! Reasoning-span markers.
//!
//! Providers wrap model deliberation in different inline markers. Every
//! known spelling is rewritten to the canonical [`OPEN`] / [`CLOSE`] pair
//! before classification, so the scanner only ever deals with one pair.

use std::borrow::Cow;

/// Canonical opening marker.
pub const OPEN: &str = "<thinking>";

/// Canonical closing marker.
pub const CLOSE: &str = "</thinking>";

/// Whether a spelling opens or closes a reasoning span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Open,
    Close,
}

impl MarkerKind {
    pub fn canonical(self) -> &'static str {
        match self {
            MarkerKind::Open => OPEN,
            MarkerKind::Close => CLOSE,
        }
    }
}

/// Every recognised spelling, canonical pair included.
///
/// No spelling is a prefix of another, and each contains its leading
/// `<` or `[` exactly once.
pub const SPELLINGS: &[(&str, MarkerKind)] = &[
    // angle-bracket tags
    ("<thinking>", MarkerKind::Open),
    ("</thinking>", MarkerKind::Close),
    ("<think>", MarkerKind::Open),
    ("</think>", MarkerKind::Close),
    ("<reasoning>", MarkerKind::Open),
    ("</reasoning>", MarkerKind::Close),
    // bracketed tags
    ("[THINKING]", MarkerKind::Open),
    ("[/THINKING]", MarkerKind::Close),
    ("[thinking]", MarkerKind::Open),
    ("[/thinking]", MarkerKind::Close),
    // pipe-delimited tokens
    ("<|thinking|>", MarkerKind::Open),
    ("<|/thinking|>", MarkerKind::Close),
    ("<|begin_of_thought|>", MarkerKind::Open),
    ("<|end_of_thought|>", MarkerKind::Close),
];

fn may_start_marker(c: char) -> bool {
    c == '<' || c == '['
}

/// The spelling that starts at the beginning of `text`, if any.
pub fn marker_at(text: &str) -> Option<(&'static str, MarkerKind)> {
    if !text.starts_with(may_start_marker) {
        return None;
    }
    SPELLINGS
        .iter()
        .find(|(spelling, _)| text.starts_with(spelling))
        .copied()
}

/// Rewrite every known spelling to the canonical pair.
pub fn normalize_markers(text: &str) -> Cow<'_, str> {
    if !text.contains(may_start_marker) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut changed = false;
    let mut rest = text;
    while let Some(pos) = rest.find(may_start_marker) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match marker_at(tail) {
            Some((spelling, kind)) => {
                let canonical = kind.canonical();
                changed |= spelling != canonical;
                out.push_str(canonical);
                rest = &tail[spelling.len()..];
            }
            None => {
                // '<' and '[' are single-byte
                out.push_str(&tail[..1]);
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);

    if changed {
        Cow::Owned(out)
    } else {
        Cow::Borrowed(text)
    }
}

/// Byte offset of the longest suffix of `text` that is a proper prefix
/// of some marker spelling, i.e. text that may still become a marker once
/// more input arrives. `None` when the input ends cleanly.
pub fn partial_marker_start(text: &str) -> Option<usize> {
    let longest = SPELLINGS.iter().map(|(s, _)| s.len()).max().unwrap_or(0);
    let floor = text.len().saturating_sub(longest.saturating_sub(1));
    text.char_indices()
        .filter(|(i, c)| *i >= floor && may_start_marker(*c))
        .map(|(i, _)| i)
        .find(|&i| {
            let suffix = &text[i..];
            SPELLINGS
                .iter()
                .any(|(spelling, _)| spelling.len() > suffix.len() && spelling.starts_with(suffix))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_text_is_borrowed() {
        let text = "a <thinking>b</thinking> c";
        assert!(matches!(normalize_markers(text), Cow::Borrowed(_)));
        assert!(matches!(normalize_markers("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn variants_are_rewritten() {
        assert_eq!(normalize_markers("<think>x</think>"), "<thinking>x</thinking>");
        assert_eq!(
            normalize_markers("[THINKING]x[/THINKING]"),
            "<thinking>x</thinking>"
        );
        assert_eq!(
            normalize_markers("<|begin_of_thought|>x<|end_of_thought|>y"),
            "<thinking>x</thinking>y"
        );
        assert_eq!(
            normalize_markers("<|thinking|>x<|/thinking|>"),
            "<thinking>x</thinking>"
        );
    }

    #[test]
    fn unrelated_brackets_survive() {
        assert_eq!(normalize_markers("a < b [1] <p>"), "a < b [1] <p>");
        assert_eq!(normalize_markers("[x]<think>"), "[x]<thinking>");
    }

    #[test]
    fn partial_suffixes() {
        assert_eq!(partial_marker_start("hello <thi"), Some(6));
        assert_eq!(partial_marker_start("hello <"), Some(6));
        assert_eq!(partial_marker_start("x</thinking"), Some(1));
        assert_eq!(partial_marker_start("[/THINK"), Some(0));
        assert_eq!(partial_marker_start("<|begin_of"), Some(0));
        assert_eq!(partial_marker_start("a <b"), None);
        assert_eq!(partial_marker_start("done <thinking>"), None);
        assert_eq!(partial_marker_start(""), None);
    }

    #[test]
    fn partial_prefers_longest_suffix() {
        // "<thi<" cannot become a marker, but its last "<" can
        assert_eq!(partial_marker_start("<thi<"), Some(4));
    }

    #[test]
    fn partial_handles_multibyte_text() {
        assert_eq!(partial_marker_start("héllo wörld <th"), Some("héllo wörld ".len()));
        assert_eq!(partial_marker_start("日本語"), None);
    }
}
