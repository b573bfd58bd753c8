//! Loopback git HTTP server.
//!
//! Serves the host's repository over `127.0.0.1:<ephemeral>` for the lifetime
//! of one session, with push enabled, by bridging every request CGI-style
//! into `git http-backend`. The container reaches it through the gateway
//! alias, so its `origin` remote can fetch from and push to the host working
//! copy. Loopback-only and session-scoped, so no authentication is layered
//! on top.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;
use crate::output::Output;

/// Handle on the running loopback server.
///
/// The bound port is valid from construction until [`GitServer::close`].
#[derive(Debug)]
pub struct GitServer {
    port: u16,
    shutdown: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl GitServer {
    /// Binds a loopback listener and starts serving the repository at `path`.
    ///
    /// Refuses to start when `path/.git` is absent, when the listener cannot
    /// be bound, or when no `git` binary is found on `PATH`.
    pub async fn start(path: &Path, output: Arc<dyn Output>) -> Result<GitServer, ServerError> {
        let repo_root = path
            .canonicalize()
            .map_err(|_| ServerError::NotARepository {
                path: path.to_path_buf(),
            })?;
        if !repo_root.join(".git").exists() {
            return Err(ServerError::NotARepository { path: repo_root });
        }

        let git_path = find_git().ok_or(ServerError::ToolMissing)?;

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(ServerError::Listen)?;
        let port = listener
            .local_addr()
            .map_err(ServerError::Listen)?
            .port();

        let backend = Backend {
            repo_root,
            git_path,
            ssh_auth_sock: std::env::var("SSH_AUTH_SOCK").unwrap_or_default(),
            output: Arc::clone(&output),
        };
        let router = Router::new().fallback(handle).with_state(backend);

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.cancelled().await });
            if let Err(err) = serve.await {
                output.warning(&format!("git server error: {err}"));
            }
        });

        tracing::debug!(port, "git server listening");
        Ok(GitServer {
            port,
            shutdown,
            task,
        })
    }

    /// The bound loopback port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stops accepting connections and drains in-flight requests.
    pub async fn close(self) -> Result<(), ServerError> {
        self.shutdown.cancel();
        self.task.await.map_err(|err| ServerError::Close {
            reason: err.to_string(),
        })
    }
}

// =============================================================================
// CGI Bridge
// =============================================================================

#[derive(Clone)]
struct Backend {
    repo_root: PathBuf,
    git_path: PathBuf,
    ssh_auth_sock: String,
    output: Arc<dyn Output>,
}

async fn handle(State(backend): State<Backend>, request: Request) -> Response {
    match backend.dispatch(request).await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(error = %err, "git backend request failed");
            (StatusCode::BAD_GATEWAY, format!("git backend failed: {err}")).into_response()
        }
    }
}

impl Backend {
    /// Runs one request through `git http-backend` and maps the CGI reply
    /// onto an HTTP response.
    async fn dispatch(&self, request: Request) -> std::io::Result<Response> {
        let method = request.method().as_str().to_string();
        let path_info = request.uri().path().to_string();
        let query = request.uri().query().unwrap_or("").to_string();
        let headers = request.headers().clone();

        let body = to_bytes(request.into_body(), usize::MAX)
            .await
            .map_err(std::io::Error::other)?;

        let mut command = tokio::process::Command::new(&self.git_path);
        command
            .args(["-c", "http.receivepack=true", "http-backend"])
            .current_dir(&self.repo_root)
            .env_clear()
            .env("PATH", std::env::var_os("PATH").unwrap_or_default())
            .env("GIT_PROJECT_ROOT", &self.repo_root)
            .env("PATH_INFO", &path_info)
            .env("QUERY_STRING", &query)
            .env("REQUEST_METHOD", &method)
            .env("GIT_HTTP_EXPORT_ALL", "true")
            .env("GIT_HTTP_ALLOW_REPACK", "true")
            .env("GIT_HTTP_ALLOW_PUSH", "true")
            .env("GIT_HTTP_VERBOSE", "1")
            .env("SSH_AUTH_SOCK", &self.ssh_auth_sock)
            .env("GATEWAY_INTERFACE", "CGI/1.1")
            .env("SERVER_PROTOCOL", "HTTP/1.1")
            .env("REMOTE_ADDR", "127.0.0.1")
            .env("CONTENT_LENGTH", body.len().to_string());

        if let Some(content_type) = headers.get(axum::http::header::CONTENT_TYPE) {
            command.env("CONTENT_TYPE", content_type.to_str().unwrap_or(""));
        }
        for (name, value) in &headers {
            if name == &axum::http::header::CONTENT_TYPE
                || name == &axum::http::header::CONTENT_LENGTH
            {
                continue;
            }
            let key = format!("HTTP_{}", name.as_str().to_uppercase().replace('-', "_"));
            command.env(key, value.to_str().unwrap_or(""));
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                let _ = stdin.write_all(&body).await;
                let _ = stdin.shutdown().await;
            });
        }

        let cgi = child.wait_with_output().await?;
        if !cgi.stderr.is_empty() {
            let _ = self.output.writer().write_all(&cgi.stderr);
        }

        cgi_response(&cgi.stdout)
    }
}

/// Parses a CGI reply (header lines, blank line, body) into an HTTP response.
fn cgi_response(raw: &[u8]) -> std::io::Result<Response> {
    let (head, body) = split_cgi(raw).ok_or_else(|| {
        std::io::Error::other("git http-backend produced no CGI header block")
    })?;

    let mut status = StatusCode::OK;
    let mut builder = axum::http::Response::builder();
    for line in head.split(|&b| b == b'\n') {
        let line = std::str::from_utf8(line)
            .map_err(std::io::Error::other)?
            .trim_end_matches('\r');
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("status") {
            let code = value.split_whitespace().next().unwrap_or("200");
            status = code
                .parse::<u16>()
                .ok()
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or(StatusCode::OK);
        } else {
            builder = builder.header(name, value);
        }
    }

    builder
        .status(status)
        .body(Body::from(body.to_vec()))
        .map_err(std::io::Error::other)
}

fn split_cgi(raw: &[u8]) -> Option<(&[u8], &[u8])> {
    if let Some(pos) = find(raw, b"\r\n\r\n") {
        return Some((&raw[..pos], &raw[pos + 4..]));
    }
    find(raw, b"\n\n").map(|pos| (&raw[..pos], &raw[pos + 2..]))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn find_git() -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join("git");
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cgi_reply_with_status_line() {
        let raw = b"Status: 404 Not Found\r\nContent-Type: text/plain\r\n\r\nmissing";
        let response = cgi_response(raw).unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "text/plain"
        );
    }

    #[test]
    fn cgi_reply_defaults_to_ok() {
        let raw = b"Content-Type: application/x-git-upload-pack-advertisement\n\npayload";
        let response = cgi_response(raw).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn cgi_reply_without_header_block_is_rejected() {
        assert!(cgi_response(b"garbage with no separator").is_err());
    }
}
