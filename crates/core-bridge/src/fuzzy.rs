//! File fuzzy-find: workspace walk plus subsequence scoring.

use std::path::{Path, PathBuf};

/// Directories never descended into during a workspace walk.
const SKIP_DIRS: &[&str] = &["target", "node_modules", "zig-out", "zig-cache", "build"];

/// Collect regular files under `root`, skipping hidden entries and build
/// output, sorted by path, capped at `limit`.
pub fn find_files(root: &Path, limit: usize) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut children: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        children.sort();
        for child in children {
            let name = child
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            if name.starts_with('.') {
                continue;
            }
            if child.is_dir() {
                if !SKIP_DIRS.contains(&name) {
                    stack.push(child);
                }
            } else if child.is_file() {
                out.push(child);
            }
        }
    }
    out.sort();
    out.truncate(limit);
    out
}

/// One scored match.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Match {
    pub candidate: String,
    pub score: i64,
}

/// Case-insensitive subsequence filter. Consecutive matched characters and
/// matches at path-component starts score higher; candidates that do not
/// contain the query as a subsequence are dropped. Results are ordered by
/// descending score, then name, so equal inputs produce equal output.
pub fn filter(query: &str, candidates: &[String]) -> Vec<Match> {
    let mut out: Vec<Match> = candidates
        .iter()
        .filter_map(|candidate| {
            score(query, candidate).map(|score| Match {
                candidate: candidate.clone(),
                score,
            })
        })
        .collect();
    out.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.candidate.cmp(&b.candidate)));
    out
}

fn score(query: &str, candidate: &str) -> Option<i64> {
    if query.is_empty() {
        return Some(0);
    }
    let candidate_lower: Vec<char> = candidate.to_lowercase().chars().collect();
    let mut total: i64 = 0;
    let mut pos = 0usize;
    let mut last_hit: Option<usize> = None;
    for qc in query.to_lowercase().chars() {
        let mut found = None;
        while pos < candidate_lower.len() {
            if candidate_lower[pos] == qc {
                found = Some(pos);
                break;
            }
            pos += 1;
        }
        let hit = found?;
        total += 1;
        if last_hit == Some(hit.wrapping_sub(1)) {
            total += 4; // consecutive run
        }
        if hit == 0 || matches!(candidate_lower.get(hit.wrapping_sub(1)), Some('/' | '_' | '-' | '.')) {
            total += 2; // component start
        }
        last_hit = Some(hit);
        pos = hit + 1;
    }
    // Shorter candidates win ties.
    Some(total - candidate.len() as i64 / 8)
}
