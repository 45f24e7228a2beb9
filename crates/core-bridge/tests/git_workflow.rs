//! Git capability surface against a real throwaway repository. Tests bail
//! out quietly when no git binary is on PATH.

use std::path::Path;
use std::process::Command;

use core_bridge::git::{
    self, FileStatus, blame, current_branch, detect_repository, file_status, hunks, stage,
    stage_hunk, unstage,
};

fn git(repo: &Path, args: &[&str]) {
    let status = Command::new("git")
        .current_dir(repo)
        .args(args)
        .status()
        .expect("git runs");
    assert!(status.success(), "git {args:?} failed");
}

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn setup_repo(dir: &Path) {
    git(dir, &["init", "-q", "-b", "main"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "user.name", "Test"]);
    std::fs::write(dir.join("notes.txt"), "one\ntwo\nthree\n").unwrap();
    git(dir, &["add", "."]);
    git(dir, &["commit", "-q", "-m", "initial"]);
}

#[test]
fn repository_detection_and_branch() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    setup_repo(tmp.path());
    let repo = detect_repository(&tmp.path().join("notes.txt")).unwrap();
    assert_eq!(
        repo.canonicalize().unwrap(),
        tmp.path().canonicalize().unwrap()
    );
    assert_eq!(current_branch(&repo).unwrap(), "main");
}

#[test]
fn status_stage_unstage_cycle() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    setup_repo(tmp.path());
    let file = Path::new("notes.txt");

    assert_eq!(
        file_status(tmp.path(), file).unwrap(),
        FileStatus::Clean
    );
    std::fs::write(tmp.path().join(file), "one\nTWO\nthree\n").unwrap();
    assert_eq!(
        file_status(tmp.path(), file).unwrap(),
        FileStatus::Modified
    );

    stage(tmp.path(), file).unwrap();
    // Still modified relative to HEAD, but staged.
    assert_eq!(
        file_status(tmp.path(), file).unwrap(),
        FileStatus::Modified
    );
    unstage(tmp.path(), file).unwrap();
    assert_eq!(
        file_status(tmp.path(), file).unwrap(),
        FileStatus::Modified
    );
    git::discard(tmp.path(), file).unwrap();
    assert_eq!(
        file_status(tmp.path(), file).unwrap(),
        FileStatus::Clean
    );
}

#[test]
fn hunks_and_stage_hunk() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    setup_repo(tmp.path());
    let file = Path::new("notes.txt");
    // Two separated edits -> two hunks under -U0.
    std::fs::write(tmp.path().join(file), "ONE\ntwo\nTHREE\n").unwrap();

    let found = hunks(tmp.path(), file).unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].new_start, 1);

    stage_hunk(tmp.path(), file, 0).unwrap();
    let remaining = hunks(tmp.path(), file).unwrap();
    assert_eq!(remaining.len(), 1);
}

#[test]
fn blame_reports_commit_metadata() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    setup_repo(tmp.path());
    let info = blame(tmp.path(), Path::new("notes.txt"), 2).unwrap();
    assert_eq!(info.author, "Test");
    assert_eq!(info.summary, "initial");
    assert_eq!(info.commit.len(), 40);
}

#[test]
fn untracked_file_status() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    setup_repo(tmp.path());
    std::fs::write(tmp.path().join("new.txt"), "x").unwrap();
    assert_eq!(
        file_status(tmp.path(), Path::new("new.txt")).unwrap(),
        FileStatus::Untracked
    );
}
