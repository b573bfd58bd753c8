//! Tests for the loopback git HTTP server.
//!
//! The server fronts real `git http-backend` processes, so these tests drive
//! it with a real git client and raw HTTP.

#![cfg(unix)]

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use workcell::{CaptureOutput, GitServer, Output, ServerError};

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

fn fixture_repo() -> TempDir {
    let dir = TempDir::new().expect("failed to create fixture dir");
    let path = dir.path();
    git(path, &["init"]);
    git(path, &["config", "user.name", "Fixture"]);
    git(path, &["config", "user.email", "fixture@example.com"]);
    std::fs::write(path.join("README.md"), "# fixture\n").unwrap();
    git(path, &["add", "."]);
    git(path, &["commit", "-m", "fixture"]);
    dir
}

fn sink() -> Arc<dyn Output> {
    Arc::new(CaptureOutput::new())
}

#[tokio::test]
async fn test_refuses_directory_without_repository() {
    let dir = TempDir::new().unwrap();
    let err = GitServer::start(dir.path(), sink()).await.unwrap_err();
    assert!(matches!(err, ServerError::NotARepository { .. }));
}

#[tokio::test]
async fn test_serves_fetch_advertisement() {
    let repo = fixture_repo();
    let server = GitServer::start(repo.path(), sink()).await.unwrap();
    let port = server.port();
    assert_ne!(port, 0);

    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    stream
        .write_all(
            b"GET /.git/info/refs?service=git-upload-pack HTTP/1.1\r\n\
              Host: 127.0.0.1\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);

    assert!(text.starts_with("HTTP/1.1 200"), "response: {text}");
    assert!(text.contains("git-upload-pack"), "response: {text}");

    server.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fetch_and_push_roundtrip() {
    let repo = fixture_repo();
    let server = GitServer::start(repo.path(), sink()).await.unwrap();
    let url = format!("http://127.0.0.1:{}/.git", server.port());

    let work = TempDir::new().unwrap();
    let clone_path = work.path().join("clone");
    git(work.path(), &["clone", &url, clone_path.to_str().unwrap()]);

    std::fs::write(clone_path.join("pushed.txt"), "from the container\n").unwrap();
    git(&clone_path, &["config", "user.name", "Clone"]);
    git(&clone_path, &["config", "user.email", "clone@example.com"]);
    git(&clone_path, &["add", "."]);
    git(&clone_path, &["commit", "-m", "pushed"]);
    git(&clone_path, &["push", "origin", "HEAD:refs/heads/incoming"]);

    // The host working copy observes the pushed branch.
    git(repo.path(), &["rev-parse", "--verify", "refs/heads/incoming"]);

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_port_is_rebindable_after_close() {
    let repo = fixture_repo();
    let server = GitServer::start(repo.path(), sink()).await.unwrap();
    let port = server.port();
    server.close().await.unwrap();

    let rebind = tokio::net::TcpListener::bind(("127.0.0.1", port)).await;
    assert!(rebind.is_ok(), "port {port} still held after close");
}

#[tokio::test]
async fn test_unknown_path_is_a_client_error() {
    let repo = fixture_repo();
    let server = GitServer::start(repo.path(), sink()).await.unwrap();

    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", server.port()))
        .await
        .unwrap();
    stream
        .write_all(
            b"GET /definitely-not-a-repo-path HTTP/1.1\r\n\
              Host: 127.0.0.1\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);

    assert!(
        !text.starts_with("HTTP/1.1 200"),
        "bogus path must not succeed: {text}"
    );

    server.close().await.unwrap();
}
