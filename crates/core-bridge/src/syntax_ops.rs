//! Structure-derived editor features: fold regions and selection growth.
//!
//! Brace-tracked, not parser-tracked: the fold and selection walks pair
//! `{`/`}` while skipping string literals and line comments, which is the
//! same approximation the highlight lexers make and keeps these features
//! language-agnostic.

use core_text::Snapshot;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FoldRegion {
    /// 0-based line holding the opening brace.
    pub start_line: usize,
    /// 0-based line holding the matching close.
    pub end_line: usize,
}

/// Byte ranges of matched `{ ... }` pairs, inclusive of the braces.
fn brace_pairs(text: &str) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut in_comment = false;
    let mut escaped = false;
    let mut prev = '\0';
    for (idx, c) in text.char_indices() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
            }
            prev = c;
            continue;
        }
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            prev = c;
            continue;
        }
        match c {
            '"' => in_string = true,
            '/' if prev == '/' => in_comment = true,
            '{' => stack.push(idx),
            '}' => {
                if let Some(open) = stack.pop() {
                    pairs.push((open, idx));
                }
            }
            _ => {}
        }
        prev = c;
    }
    pairs.sort();
    pairs
}

/// Multi-line brace blocks as foldable regions, ordered by start line.
pub fn fold_regions(snapshot: &Snapshot) -> Vec<FoldRegion> {
    let text = snapshot.to_text();
    let mut regions: Vec<FoldRegion> = brace_pairs(&text)
        .into_iter()
        .filter_map(|(open, close)| {
            let start_line = snapshot.line_of(open).ok()?;
            let end_line = snapshot.line_of(close).ok()?;
            (end_line > start_line).then_some(FoldRegion {
                start_line,
                end_line,
            })
        })
        .collect();
    regions.sort_by_key(|r| (r.start_line, r.end_line));
    regions.dedup();
    regions
}

/// Nested ranges containing `pos`, innermost first: word, line, each
/// enclosing brace block (content then block), whole document.
fn enclosing_chain(snapshot: &Snapshot, pos: usize) -> Vec<(usize, usize)> {
    let text = snapshot.to_text();
    let pos = pos.min(text.len());
    let mut chain = Vec::new();

    // Word around pos.
    let is_word = |c: char| c == '_' || c.is_alphanumeric();
    let mut word_start = pos;
    while word_start > 0 {
        let Some(c) = text[..word_start].chars().next_back() else {
            break;
        };
        if !is_word(c) {
            break;
        }
        word_start -= c.len_utf8();
    }
    let mut word_end = pos;
    for c in text[pos..].chars() {
        if !is_word(c) {
            break;
        }
        word_end += c.len_utf8();
    }
    if word_end > word_start {
        chain.push((word_start, word_end));
    }

    // Line around pos.
    if let Ok(line) = snapshot.line_of(pos) {
        let start = snapshot.offset_of_line(line).unwrap_or(0);
        let end = snapshot
            .offset_of_line((line + 1).min(snapshot.line_count()))
            .unwrap_or(text.len());
        if end > start {
            chain.push((start, end));
        }
    }

    // Enclosing brace blocks, innermost outward.
    let mut blocks: Vec<(usize, usize)> = brace_pairs(&text)
        .into_iter()
        .filter(|(open, close)| *open < pos && pos <= *close)
        .collect();
    blocks.sort_by_key(|(open, close)| close - open);
    for (open, close) in blocks {
        // Content without the braces, then the block including them.
        chain.push((open + 1, close));
        chain.push((open, close + 1));
    }

    chain.push((0, text.len()));

    // Keep strictly widening, properly nested steps.
    let mut filtered: Vec<(usize, usize)> = Vec::new();
    for (s, e) in chain {
        match filtered.last() {
            Some((ls, le)) if s <= *ls && e >= *le && (e - s) > (le - ls) => filtered.push((s, e)),
            Some(_) => {}
            None => filtered.push((s, e)),
        }
    }
    filtered
}

/// Next-wider syntactic range containing `[start, end)`.
pub fn expand_selection(snapshot: &Snapshot, start: usize, end: usize) -> (usize, usize) {
    let pos = start.min(snapshot.len());
    for (s, e) in enclosing_chain(snapshot, pos) {
        if s <= start && end <= e && (e - s) > end.saturating_sub(start) {
            return (s, e);
        }
    }
    (0, snapshot.len())
}

/// Inverse of `expand_selection`: the widest chain step strictly inside the
/// current selection, collapsing to an interior position when none is.
pub fn shrink_selection(snapshot: &Snapshot, start: usize, end: usize) -> (usize, usize) {
    let text = snapshot.to_text();
    let pos = interior_pos(&text, start.min(text.len()), end.min(text.len()));
    let mut best = (pos, pos);
    for (s, e) in enclosing_chain(snapshot, pos) {
        let inside = start <= s && e <= end && (e - s) < end.saturating_sub(start);
        if inside && (e - s) > (best.1 - best.0) {
            best = (s, e);
        }
    }
    best
}

/// First meaningful position inside `[start, end)`: past leading whitespace
/// and past a single opening brace, so shrinking a block lands in its body.
fn interior_pos(text: &str, start: usize, end: usize) -> usize {
    let mut pos = start;
    let mut seen_open = false;
    for c in text[start..end].chars() {
        if c.is_whitespace() {
            pos += c.len_utf8();
            continue;
        }
        if !seen_open && c == '{' {
            seen_open = true;
            pos += c.len_utf8();
            continue;
        }
        break;
    }
    pos.min(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_text::Document;

    const SRC: &str = "fn main() {\n    if ready {\n        go();\n    }\n}\n";

    #[test]
    fn fold_regions_cover_nested_blocks() {
        let doc = Document::from_str(SRC);
        let regions = fold_regions(&doc.snapshot());
        assert_eq!(
            regions,
            vec![
                FoldRegion {
                    start_line: 0,
                    end_line: 4
                },
                FoldRegion {
                    start_line: 1,
                    end_line: 3
                },
            ]
        );
    }

    #[test]
    fn braces_in_strings_and_comments_ignored() {
        let doc = Document::from_str("// { not a block\nlet s = \"{\";\nfn x() {\n}\n");
        let regions = fold_regions(&doc.snapshot());
        assert_eq!(
            regions,
            vec![FoldRegion {
                start_line: 2,
                end_line: 3
            }]
        );
    }

    #[test]
    fn expand_walks_word_line_block() {
        let doc = Document::from_str(SRC);
        let snap = doc.snapshot();
        let at = SRC.find("go").unwrap();
        let (s, e) = expand_selection(&snap, at, at);
        assert_eq!(&SRC[s..e], "go");
        let (s2, e2) = expand_selection(&snap, s, e);
        assert_eq!(&SRC[s2..e2], "        go();\n");
        let (s3, e3) = expand_selection(&snap, s2, e2);
        assert!(SRC[s3..e3].contains("go();"));
        assert!(e3 - s3 > e2 - s2);
    }

    #[test]
    fn shrink_reverses_expand() {
        let doc = Document::from_str(SRC);
        let snap = doc.snapshot();
        let at = SRC.find("go").unwrap();
        let word = expand_selection(&snap, at, at);
        let line = expand_selection(&snap, word.0, word.1);
        let back = shrink_selection(&snap, line.0, line.1);
        assert_eq!(back, word);
    }

    #[test]
    fn expand_tops_out_at_document() {
        let doc = Document::from_str(SRC);
        let snap = doc.snapshot();
        assert_eq!(expand_selection(&snap, 0, snap.len()), (0, snap.len()));
    }
}
