//! Git Adapter Integration Tests
//!
//! The real `git` binary against a throwaway origin and clone. Skipped when
//! git is not installed.

mod common;

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;

use common::manifest;
use sfmforge::adapters::{GitAdapter, Vcs};
use sfmforge::core::PinResolver;
use sfmforge::domain::{CommitId, PinDeclaration};
use sfmforge::error::ForgeError;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(repo: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args([
            "-c",
            "user.name=sfmforge",
            "-c",
            "user.email=sfmforge@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn commit_file(repo: &Path, contents: &str) -> CommitId {
    std::fs::write(repo.join("CMakeLists.txt"), contents).unwrap();
    git(repo, &["add", "-A"]);
    git(repo, &["commit", "-q", "-m", contents]);
    git(repo, &["rev-parse", "HEAD"]).parse().unwrap()
}

/// Origin with two commits, cloned into `<workspace>/upstream`
struct Repos {
    temp: TempDir,
    origin: PathBuf,
    clone: PathBuf,
    c1: CommitId,
    c2: CommitId,
}

impl Repos {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let origin = temp.path().join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        git(&origin, &["init", "-q"]);
        let c1 = commit_file(&origin, "project(upstream VERSION 1)\n");
        let c2 = commit_file(&origin, "project(upstream VERSION 2)\n");

        let clone = temp.path().join("upstream");
        git(
            temp.path(),
            &["clone", "-q", origin.to_str().unwrap(), clone.to_str().unwrap()],
        );

        Self {
            temp,
            origin,
            clone,
            c1,
            c2,
        }
    }
}

#[tokio::test]
async fn test_head_contains_and_checkout_older_commit() {
    if !git_available() {
        eprintln!("git not installed, skipping");
        return;
    }
    let repos = Repos::new();
    let git = GitAdapter::new();

    assert_eq!(git.head(&repos.clone).await.unwrap(), repos.c2);
    assert!(git.contains(&repos.clone, &repos.c1).await.unwrap());

    git.checkout(&repos.clone, &repos.c1).await.unwrap();
    assert_eq!(git.head(&repos.clone).await.unwrap(), repos.c1);
    assert_eq!(
        std::fs::read_to_string(repos.clone.join("CMakeLists.txt")).unwrap(),
        "project(upstream VERSION 1)\n"
    );
}

#[tokio::test]
async fn test_dirty_tree_checkout_is_rejected() {
    if !git_available() {
        eprintln!("git not installed, skipping");
        return;
    }
    let repos = Repos::new();
    let git = GitAdapter::new();

    std::fs::write(repos.clone.join("CMakeLists.txt"), "local edit\n").unwrap();

    assert!(git.checkout(&repos.clone, &repos.c1).await.is_err());
    assert_eq!(git.head(&repos.clone).await.unwrap(), repos.c2);
}

#[tokio::test]
async fn test_fetch_brings_in_new_commits() {
    if !git_available() {
        eprintln!("git not installed, skipping");
        return;
    }
    let repos = Repos::new();
    let git = GitAdapter::new();

    let c3 = commit_file(&repos.origin, "project(upstream VERSION 3)\n");
    assert!(!git.contains(&repos.clone, &c3).await.unwrap());

    git.fetch(&repos.clone, &c3).await.unwrap();
    assert!(git.contains(&repos.clone, &c3).await.unwrap());
}

#[tokio::test]
async fn test_fetch_of_unknown_commit_fails() {
    if !git_available() {
        eprintln!("git not installed, skipping");
        return;
    }
    let repos = Repos::new();
    let git = GitAdapter::new();
    let missing: CommitId = "0123456789abcdef".repeat(3)[..40].parse().unwrap();

    assert!(git.fetch(&repos.clone, &missing).await.is_err());
    assert!(!git.contains(&repos.clone, &missing).await.unwrap());
}

const UPSTREAM: &str = r#"
targets:
  - name: upstream
    source: upstream
"#;

fn pin(commit: &CommitId) -> PinDeclaration {
    PinDeclaration {
        downstream_target: "downstream".to_string(),
        upstream_target: "upstream".to_string(),
        expected_commit: commit.clone(),
    }
}

#[tokio::test]
async fn test_resolver_moves_real_checkout_to_pin() {
    if !git_available() {
        eprintln!("git not installed, skipping");
        return;
    }
    let repos = Repos::new();
    let m = manifest(repos.temp.path(), UPSTREAM);
    let resolver = PinResolver::new(Arc::new(GitAdapter::new()));

    let result = resolver
        .resolve(&pin(&repos.c1), m.get("upstream").unwrap())
        .await
        .unwrap();

    assert!(result.changed);
    assert_eq!(result.previous_commit, repos.c2);
    assert_eq!(result.resolved_commit, repos.c1);
}

#[tokio::test]
async fn test_resolver_reports_dirty_checkout_as_verification_failure() {
    if !git_available() {
        eprintln!("git not installed, skipping");
        return;
    }
    let repos = Repos::new();
    let m = manifest(repos.temp.path(), UPSTREAM);
    std::fs::write(repos.clone.join("CMakeLists.txt"), "local edit\n").unwrap();
    let resolver = PinResolver::new(Arc::new(GitAdapter::new()));

    let err = resolver
        .resolve(&pin(&repos.c1), m.get("upstream").unwrap())
        .await
        .unwrap_err();

    match err {
        ForgeError::Verification {
            expected,
            actual,
            detail,
            ..
        } => {
            assert_eq!(expected, repos.c1.to_string());
            assert_eq!(actual, repos.c2.to_string());
            assert!(detail.is_some());
        }
        other => panic!("unexpected error {:?}", other),
    }
}
