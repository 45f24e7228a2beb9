//! Encoding-aware traversal helpers. The document core stores plain bytes
//! (UTF-8 enforced at the API edge); cursor motion and coalescing logic need
//! grapheme-cluster boundaries, which live here as pure per-line helpers.

use unicode_segmentation::UnicodeSegmentation;

/// Iterate grapheme clusters in a line.
pub fn iter(line: &str) -> impl Iterator<Item = &str> {
    line.graphemes(true)
}

/// Number of grapheme clusters in `text`.
pub fn count(text: &str) -> usize {
    text.graphemes(true).count()
}

/// True if `text` is exactly one grapheme cluster.
pub fn is_single_cluster(text: &str) -> bool {
    let mut clusters = text.graphemes(true);
    clusters.next().is_some() && clusters.next().is_none()
}

/// Previous grapheme boundary (returns 0 if already at or below 1st boundary).
pub fn prev_boundary(line: &str, byte: usize) -> usize {
    if byte == 0 || byte > line.len() {
        return 0;
    }
    let mut last = 0;
    for (idx, _) in line.grapheme_indices(true) {
        if idx >= byte {
            break;
        }
        last = idx;
    }
    last
}

/// Next grapheme boundary (returns line.len() if at or beyond end).
pub fn next_boundary(line: &str, byte: usize) -> usize {
    if byte >= line.len() {
        return line.len();
    }
    for (idx, _) in line.grapheme_indices(true) {
        if idx > byte {
            return idx;
        }
    }
    line.len()
}

/// Naive word classification: alphanumeric or underscore start.
pub fn is_word(g: &str) -> bool {
    g.chars()
        .next()
        .map(|c| c == '_' || c.is_alphanumeric())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_align() {
        let s = "a\u{1F600}b";
        let after_a = next_boundary(s, 0);
        let after_emoji = next_boundary(s, after_a);
        assert_eq!(prev_boundary(s, after_emoji), after_a);
        assert_eq!(prev_boundary(s, after_a), 0);
    }

    #[test]
    fn combining_mark_is_one_cluster() {
        let s = "e\u{0301}"; // 'e' + combining acute
        assert_eq!(next_boundary(s, 0), s.len());
        assert!(is_single_cluster(s));
    }

    #[test]
    fn multi_cluster_detected() {
        assert!(is_single_cluster("x"));
        assert!(is_single_cluster("\u{1F600}"));
        assert!(!is_single_cluster("ab"));
        assert!(!is_single_cluster(""));
    }

    #[test]
    fn word_classification() {
        assert!(is_word("a"));
        assert!(is_word("_"));
        assert!(is_word("9"));
        assert!(!is_word(" "));
        assert!(!is_word("."));
    }
}
