//! Tests for the repository snapshot pipeline.
//!
//! These run real `git` against scratch repositories: the pipeline's job is
//! to rewrite an actual checkout, so the tests validate against one.

#![cfg(unix)]

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use workcell::{Snapshot, SnapshotError};

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn git_stdout(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A committed repository with a nested file, an executable, and a tracked
/// symlink.
fn fixture_repo() -> TempDir {
    let dir = TempDir::new().expect("failed to create fixture dir");
    let path = dir.path();

    git(path, &["init"]);
    git(path, &["config", "user.name", "Fixture"]);
    git(path, &["config", "user.email", "fixture@example.com"]);

    std::fs::write(path.join("README.md"), "# fixture\n").unwrap();
    std::fs::create_dir(path.join("src")).unwrap();
    std::fs::write(path.join("src/main.rs"), "fn main() {}\n").unwrap();
    std::fs::write(path.join("run.sh"), "#!/bin/sh\nexit 0\n").unwrap();
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path.join("run.sh"), std::fs::Permissions::from_mode(0o755))
            .unwrap();
    }
    std::os::unix::fs::symlink("README.md", path.join("link")).unwrap();

    git(path, &["add", "."]);
    git(path, &["commit", "-m", "fixture"]);
    dir
}

async fn collect(source: &Path, branch: &str) -> Vec<u8> {
    let mut stream = Snapshot::create(
        source,
        "http://host.docker.internal:9999",
        branch,
        "Workcell",
        "workcell@example.com",
    )
    .await
    .expect("snapshot creation failed");
    let mut raw = Vec::new();
    stream
        .read_to_end(&mut raw)
        .await
        .expect("snapshot stream failed");
    raw
}

#[tokio::test]
async fn test_archive_layout_invariants() {
    let repo = fixture_repo();
    let raw = collect(repo.path(), "workcell/7").await;

    let mut archive = tar::Archive::new(&raw[..]);
    let mut saw_root = false;
    let mut saw_git_head = false;
    let mut saw_readme = false;
    let mut saw_nested = false;

    for entry in archive.entries().unwrap() {
        let entry = entry.unwrap();
        let path = entry.path().unwrap().to_string_lossy().into_owned();

        assert!(!path.starts_with('/'), "absolute path in archive: {path}");
        assert!(!path.contains('\\'), "backslash separator in {path}");
        assert!(
            path == "app/" || path.starts_with("app/"),
            "entry outside app/: {path}"
        );
        assert_ne!(
            entry.header().entry_type(),
            tar::EntryType::Symlink,
            "symlink leaked into archive: {path}"
        );

        match path.as_str() {
            "app/" => saw_root = true,
            "app/.git/HEAD" => saw_git_head = true,
            "app/README.md" => saw_readme = true,
            "app/src/main.rs" => saw_nested = true,
            "app/link" => panic!("tracked symlink must be omitted"),
            _ => {}
        }
    }

    assert!(saw_root, "missing app/ directory entry");
    assert!(saw_git_head, "missing control directory");
    assert!(saw_readme, "missing tracked file");
    assert!(saw_nested, "missing nested tracked file");
}

#[tokio::test]
async fn test_executable_mode_is_preserved() {
    let repo = fixture_repo();
    let raw = collect(repo.path(), "workcell/8").await;

    let mut archive = tar::Archive::new(&raw[..]);
    let entry = archive
        .entries()
        .unwrap()
        .map(|entry| entry.unwrap())
        .find(|entry| entry.path().unwrap().to_string_lossy() == "app/run.sh")
        .expect("run.sh missing from archive");
    let mode = entry.header().mode().unwrap();
    assert_ne!(mode & 0o111, 0, "execute bits lost: {mode:o}");
}

#[tokio::test]
async fn test_extracted_checkout_is_rewritten() {
    let repo = fixture_repo();
    let raw = collect(repo.path(), "workcell/42").await;

    let dest = TempDir::new().unwrap();
    tar::Archive::new(&raw[..]).unpack(dest.path()).unwrap();
    let app = dest.path().join("app");

    assert_eq!(
        git_stdout(&app, &["remote"]),
        "origin",
        "exactly one remote named origin"
    );
    assert_eq!(
        git_stdout(&app, &["remote", "get-url", "origin"]),
        "http://host.docker.internal:9999"
    );
    assert_eq!(
        git_stdout(&app, &["rev-parse", "--abbrev-ref", "HEAD"]),
        "workcell/42"
    );
    assert_eq!(git_stdout(&app, &["config", "user.name"]), "Workcell");
    assert_eq!(
        git_stdout(&app, &["config", "user.email"]),
        "workcell@example.com"
    );
    // The working tree is a clean checkout of HEAD.
    assert_eq!(git_stdout(&app, &["status", "--porcelain"]), "");
}

#[tokio::test]
async fn test_source_outside_a_repository_is_rejected() {
    let dir = TempDir::new().unwrap();
    let err = Snapshot::create(
        dir.path(),
        "http://host.docker.internal:9999",
        "workcell/1",
        "Workcell",
        "workcell@example.com",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SnapshotError::NotARepository { .. }));
}

#[tokio::test]
async fn test_existing_branch_fails_the_stream() {
    let repo = fixture_repo();
    git(repo.path(), &["branch", "workcell/9"]);

    let mut stream = Snapshot::create(
        repo.path(),
        "http://host.docker.internal:9999",
        "workcell/9",
        "Workcell",
        "workcell@example.com",
    )
    .await
    .expect("creation itself succeeds; the failure crosses the stream");

    let mut raw = Vec::new();
    let err = stream.read_to_end(&mut raw).await.unwrap_err();
    assert!(
        err.to_string().contains("already exists"),
        "unexpected stream error: {err}"
    );
}

#[tokio::test]
async fn test_early_consumer_drop_does_not_wedge() {
    let repo = fixture_repo();
    let stream = Snapshot::create(
        repo.path(),
        "http://host.docker.internal:9999",
        "workcell/11",
        "Workcell",
        "workcell@example.com",
    )
    .await
    .unwrap();

    // Dropping without reading aborts the producer; nothing to assert beyond
    // not hanging.
    drop(stream);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}
