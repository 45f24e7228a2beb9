//! Git integration by shelling out to the `git` binary.
//!
//! The editor core treats git as an external tool: every operation is one
//! short-lived subprocess against the repository worktree, parsed from
//! porcelain output. No libgit linkage, no daemon.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::Serialize;
use tracing::debug;

use crate::BridgeError;

fn run_git(repo: &Path, args: &[&str], stdin: Option<&str>) -> Result<String, BridgeError> {
    debug!(target: "bridge.git", repo = %repo.display(), ?args, "git");
    let mut command = Command::new("git");
    command
        .current_dir(repo)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = command.spawn().map_err(|err| BridgeError::Git {
        detail: format!("failed to spawn git: {err}"),
    })?;
    if let Some(input) = stdin {
        use std::io::Write;
        if let Some(mut handle) = child.stdin.take() {
            handle
                .write_all(input.as_bytes())
                .map_err(|err| BridgeError::Git {
                    detail: err.to_string(),
                })?;
        }
    }
    let output = child.wait_with_output().map_err(|err| BridgeError::Git {
        detail: err.to_string(),
    })?;
    if !output.status.success() {
        return Err(BridgeError::Git {
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Walk up from `path` to the enclosing repository root, if any.
pub fn detect_repository(path: &Path) -> Result<PathBuf, BridgeError> {
    let dir = if path.is_dir() {
        path
    } else {
        path.parent().unwrap_or(path)
    };
    let out = run_git(dir, &["rev-parse", "--show-toplevel"], None).map_err(|_| {
        BridgeError::NotARepository {
            path: path.display().to_string(),
        }
    })?;
    Ok(PathBuf::from(out.trim()))
}

pub fn current_branch(repo: &Path) -> Result<String, BridgeError> {
    Ok(run_git(repo, &["rev-parse", "--abbrev-ref", "HEAD"], None)?
        .trim()
        .to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileStatus {
    Clean,
    Modified,
    Added,
    Deleted,
    Renamed,
    Untracked,
    Conflicted,
}

/// Status of one file relative to HEAD and the index.
pub fn file_status(repo: &Path, file: &Path) -> Result<FileStatus, BridgeError> {
    let rel = file.to_string_lossy();
    let out = run_git(repo, &["status", "--porcelain", "--", &rel], None)?;
    let Some(line) = out.lines().next() else {
        return Ok(FileStatus::Clean);
    };
    let code: Vec<char> = line.chars().take(2).collect();
    let (x, y) = (
        code.first().copied().unwrap_or(' '),
        code.get(1).copied().unwrap_or(' '),
    );
    Ok(match (x, y) {
        ('?', '?') => FileStatus::Untracked,
        ('U', _) | (_, 'U') => FileStatus::Conflicted,
        ('R', _) => FileStatus::Renamed,
        ('A', _) => FileStatus::Added,
        ('D', _) | (_, 'D') => FileStatus::Deleted,
        _ => FileStatus::Modified,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlameInfo {
    pub commit: String,
    pub author: String,
    pub summary: String,
}

/// Blame a single 1-based line.
pub fn blame(repo: &Path, file: &Path, line: usize) -> Result<BlameInfo, BridgeError> {
    let rel = file.to_string_lossy();
    let range = format!("{line},{line}");
    let out = run_git(
        repo,
        &["blame", "--porcelain", "-L", &range, "--", &rel],
        None,
    )?;
    let mut commit = String::new();
    let mut author = String::new();
    let mut summary = String::new();
    for (idx, text) in out.lines().enumerate() {
        if idx == 0 {
            commit = text.split_whitespace().next().unwrap_or("").to_string();
        } else if let Some(rest) = text.strip_prefix("author ") {
            author = rest.to_string();
        } else if let Some(rest) = text.strip_prefix("summary ") {
            summary = rest.to_string();
        }
    }
    if commit.is_empty() {
        return Err(BridgeError::Git {
            detail: format!("no blame output for {rel}:{line}"),
        });
    }
    Ok(BlameInfo {
        commit,
        author,
        summary,
    })
}

pub fn stage(repo: &Path, file: &Path) -> Result<(), BridgeError> {
    run_git(repo, &["add", "--", &file.to_string_lossy()], None).map(|_| ())
}

pub fn unstage(repo: &Path, file: &Path) -> Result<(), BridgeError> {
    run_git(repo, &["reset", "HEAD", "--", &file.to_string_lossy()], None).map(|_| ())
}

/// Throw away unstaged changes to one file.
pub fn discard(repo: &Path, file: &Path) -> Result<(), BridgeError> {
    run_git(repo, &["checkout", "--", &file.to_string_lossy()], None).map(|_| ())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Hunk {
    pub old_start: u32,
    pub old_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,
}

/// Unstaged hunks for one file (`git diff -U0` header parse).
pub fn hunks(repo: &Path, file: &Path) -> Result<Vec<Hunk>, BridgeError> {
    let out = run_git(
        repo,
        &["diff", "-U0", "--", &file.to_string_lossy()],
        None,
    )?;
    Ok(parse_hunk_headers(&out))
}

fn parse_hunk_headers(diff: &str) -> Vec<Hunk> {
    let mut hunks = Vec::new();
    for line in diff.lines() {
        let Some(rest) = line.strip_prefix("@@ -") else {
            continue;
        };
        let Some(header) = rest.split(" @@").next() else {
            continue;
        };
        let mut parts = header.split(" +");
        let old = parts.next().unwrap_or("");
        let new = parts.next().unwrap_or("");
        let (old_start, old_lines) = parse_range(old);
        let (new_start, new_lines) = parse_range(new);
        hunks.push(Hunk {
            old_start,
            old_lines,
            new_start,
            new_lines,
        });
    }
    hunks
}

fn parse_range(range: &str) -> (u32, u32) {
    match range.split_once(',') {
        Some((start, count)) => (
            start.parse().unwrap_or(0),
            count.parse().unwrap_or(0),
        ),
        None => (range.parse().unwrap_or(0), 1),
    }
}

/// Stage a single hunk by index: re-derive the diff, keep the file header
/// plus the selected hunk, and apply it to the index.
pub fn stage_hunk(repo: &Path, file: &Path, index: usize) -> Result<(), BridgeError> {
    let rel = file.to_string_lossy();
    let diff = run_git(repo, &["diff", "-U0", "--", &rel], None)?;
    let patch = extract_hunk(&diff, index).ok_or_else(|| BridgeError::Git {
        detail: format!("hunk {index} out of range for {rel}"),
    })?;
    run_git(
        repo,
        &["apply", "--cached", "--unidiff-zero", "-"],
        Some(&patch),
    )
    .map(|_| ())
}

fn extract_hunk(diff: &str, index: usize) -> Option<String> {
    let mut header = String::new();
    let mut hunks: Vec<String> = Vec::new();
    for line in diff.lines() {
        if line.starts_with("@@") {
            hunks.push(String::new());
        }
        match hunks.last_mut() {
            Some(current) => {
                current.push_str(line);
                current.push('\n');
            }
            None => {
                header.push_str(line);
                header.push('\n');
            }
        }
    }
    let hunk = hunks.get(index)?;
    Some(format!("{header}{hunk}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hunk_header_parse() {
        let diff = "\
diff --git a/f b/f
index 000..111 100644
--- a/f
+++ b/f
@@ -3,0 +4,2 @@ fn ctx() {
+added one
+added two
@@ -10 +12 @@
-old
+new
";
        let hunks = parse_hunk_headers(diff);
        assert_eq!(
            hunks,
            vec![
                Hunk {
                    old_start: 3,
                    old_lines: 0,
                    new_start: 4,
                    new_lines: 2
                },
                Hunk {
                    old_start: 10,
                    old_lines: 1,
                    new_start: 12,
                    new_lines: 1
                },
            ]
        );
    }

    #[test]
    fn extract_hunk_keeps_file_header() {
        let diff = "\
diff --git a/f b/f
--- a/f
+++ b/f
@@ -1 +1 @@
-a
+b
@@ -5 +5 @@
-c
+d
";
        let patch = extract_hunk(diff, 1).unwrap();
        assert!(patch.starts_with("diff --git"));
        assert!(patch.contains("@@ -5 +5 @@"));
        assert!(!patch.contains("@@ -1 +1 @@"));
        assert!(extract_hunk(diff, 2).is_none());
    }

    #[test]
    fn detect_repository_outside_repo_fails() {
        let dir = tempfile::tempdir().unwrap();
        // A bare temp dir is not a repository (unless the tmpfs itself is,
        // which no sane CI does).
        let result = detect_repository(dir.path());
        assert!(matches!(
            result,
            Err(BridgeError::NotARepository { .. }) | Err(BridgeError::Git { .. })
        ));
    }
}
