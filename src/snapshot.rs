//! Repository snapshot pipeline.
//!
//! Produces a streaming tar archive of the repository at `HEAD`, rewritten
//! with a fresh branch, a new `origin` remote, and a configured committer
//! identity. Production runs in a blocking task that checks out `HEAD` into a
//! scratch directory, rewires the checkout with git, and writes tar entries
//! into a bounded byte pipe; the consumer reads the archive while it is still
//! being produced.
//!
//! Archive layout:
//!
//! ```text
//! app/            directory entry
//! app/.git/...    rewritten control directory
//! app/<path>      every tracked file at HEAD
//! ```
//!
//! Symbolic links are omitted, modes and mtimes are preserved, separators are
//! forward slashes, and no entry path is absolute.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Command;
use std::task::{Context, Poll};
use std::time::UNIX_EPOCH;

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::constants::{SCRATCH_PREFIX, SNAPSHOT_ROOT};
use crate::error::SnapshotError;

/// Buffered chunks in flight between producer and consumer.
const PIPE_DEPTH: usize = 16;

// =============================================================================
// SnapshotStream
// =============================================================================

/// Lazy, single-pass byte stream of the snapshot archive.
///
/// Reading drives the producer; dropping the stream (or invoking its
/// [`SnapshotCloser`]) aborts production and the scratch directory is removed
/// either way. Producer-side failures surface as `io::Error` values whose
/// inner error is a [`SnapshotError`].
pub struct SnapshotStream {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    pending: Bytes,
    cancel: CancellationToken,
}

impl SnapshotStream {
    /// Returns a handle the cleanup ledger uses to abort production.
    #[must_use]
    pub fn closer(&self) -> SnapshotCloser {
        SnapshotCloser {
            cancel: self.cancel.clone(),
        }
    }
}

impl fmt::Debug for SnapshotStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotStream").finish_non_exhaustive()
    }
}

impl AsyncRead for SnapshotStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if self.pending.has_remaining() {
                let n = self.pending.remaining().min(buf.remaining());
                buf.put_slice(&self.pending[..n]);
                self.pending.advance(n);
                return Poll::Ready(Ok(()));
            }
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(Ok(chunk))) => self.pending = chunk,
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Err(err)),
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for SnapshotStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Abort handle for a [`SnapshotStream`], held by the cleanup ledger.
pub struct SnapshotCloser {
    cancel: CancellationToken,
}

impl SnapshotCloser {
    /// Aborts production. Idempotent; a finished producer is unaffected.
    pub fn close(self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Snapshot Creation
// =============================================================================

/// Entry point for the snapshot pipeline.
pub struct Snapshot;

impl Snapshot {
    /// Starts producing a snapshot of the repository enclosing `source`.
    ///
    /// The returned stream carries a tar archive whose embedded control
    /// directory has exactly one remote `origin` pointing at `remote_url`,
    /// the checked-out branch `branch`, and the supplied committer identity.
    pub async fn create(
        source: &Path,
        remote_url: &str,
        branch: &str,
        user_name: &str,
        user_email: &str,
    ) -> Result<SnapshotStream, SnapshotError> {
        let toplevel = tokio::process::Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(source)
            .output()
            .await
            .map_err(|_| SnapshotError::NotARepository {
                path: source.to_path_buf(),
            })?;
        if !toplevel.status.success() {
            return Err(SnapshotError::NotARepository {
                path: source.to_path_buf(),
            });
        }
        let root = PathBuf::from(String::from_utf8_lossy(&toplevel.stdout).trim());

        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir()
            .map_err(|err| SnapshotError::Scratch {
                reason: err.to_string(),
            })?;

        let (tx, rx) = mpsc::channel(PIPE_DEPTH);
        let cancel = CancellationToken::new();

        let producer = Producer {
            root,
            scratch,
            remote_url: remote_url.to_string(),
            branch: branch.to_string(),
            user_name: user_name.to_string(),
            user_email: user_email.to_string(),
            tx,
            cancel: cancel.clone(),
        };
        tokio::task::spawn_blocking(move || producer.run());

        Ok(SnapshotStream {
            rx,
            pending: Bytes::new(),
            cancel,
        })
    }
}

// =============================================================================
// Producer
// =============================================================================

struct Producer {
    root: PathBuf,
    scratch: tempfile::TempDir,
    remote_url: String,
    branch: String,
    user_name: String,
    user_email: String,
    tx: mpsc::Sender<io::Result<Bytes>>,
    cancel: CancellationToken,
}

impl Producer {
    fn run(self) {
        let writer = PipeWriter {
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
        };
        let result = self.produce(writer);
        if let Err(err) = result {
            tracing::debug!(error = %err, "snapshot production aborted");
            let _ = self.tx.blocking_send(Err(io::Error::other(err)));
        }
        // TempDir removal happens on drop, success or not.
    }

    fn produce(&self, writer: PipeWriter) -> Result<(), SnapshotError> {
        let scratch = self.scratch.path();
        copy_control_dir(&self.root.join(".git"), &scratch.join(".git"))?;

        self.git(&["checkout", "HEAD", "."])?;
        self.remove_origin()?;
        self.git(&["remote", "add", "origin", &self.remote_url])?;
        self.git(&["config", "user.email", &self.user_email])?;
        self.git(&["config", "user.name", &self.user_name])?;
        self.create_branch()?;

        let mut archive = tar::Builder::new(writer);

        append_dir_entry(&mut archive, &format!("{SNAPSHOT_ROOT}/"), 0o755, 0)
            .map_err(SnapshotError::Archive)?;
        append_tree(
            &mut archive,
            &scratch.join(".git"),
            &format!("{SNAPSHOT_ROOT}/.git"),
        )
        .map_err(SnapshotError::Archive)?;
        self.append_tracked_files(&mut archive)
            .map_err(SnapshotError::Archive)?;

        archive.finish().map_err(SnapshotError::Archive)?;
        let mut writer = archive.into_inner().map_err(SnapshotError::Archive)?;
        writer.flush().map_err(SnapshotError::Archive)?;
        Ok(())
    }

    fn append_tracked_files(&self, archive: &mut tar::Builder<PipeWriter>) -> io::Result<()> {
        let listing = Command::new("git")
            .arg("ls-files")
            .current_dir(self.scratch.path())
            .output()?;
        if !listing.status.success() {
            return Err(io::Error::other(SnapshotError::ScmInvocation {
                op: "ls-files".to_string(),
                reason: String::from_utf8_lossy(&listing.stderr).trim().to_string(),
            }));
        }

        for rel in String::from_utf8_lossy(&listing.stdout).lines() {
            if rel.is_empty() {
                continue;
            }
            let full = self.scratch.path().join(rel);
            // A path listed by git may have vanished from the checkout.
            let Ok(meta) = fs::symlink_metadata(&full) else {
                continue;
            };
            if meta.file_type().is_symlink() {
                continue;
            }

            let mtime = unix_mtime(&meta);
            let mode = unix_mode(&meta);
            if meta.is_dir() {
                append_dir_entry(archive, &format!("{SNAPSHOT_ROOT}/{rel}/"), mode, mtime)?;
            } else {
                append_file_entry(
                    archive,
                    &format!("{SNAPSHOT_ROOT}/{rel}"),
                    &full,
                    mode,
                    meta.len(),
                    mtime,
                )?;
            }
        }
        Ok(())
    }

    fn git(&self, args: &[&str]) -> Result<(), SnapshotError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.scratch.path())
            .output()
            .map_err(|err| SnapshotError::ScmInvocation {
                op: args.join(" "),
                reason: err.to_string(),
            })?;
        if !output.status.success() {
            return Err(SnapshotError::ScmInvocation {
                op: args.join(" "),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    /// Removes the `origin` remote; a missing remote (git exit code 2) is
    /// not an error.
    fn remove_origin(&self) -> Result<(), SnapshotError> {
        let output = Command::new("git")
            .args(["remote", "remove", "origin"])
            .current_dir(self.scratch.path())
            .output()
            .map_err(|err| SnapshotError::ScmInvocation {
                op: "remote remove origin".to_string(),
                reason: err.to_string(),
            })?;
        if !output.status.success() && output.status.code() != Some(2) {
            return Err(SnapshotError::ScmInvocation {
                op: "remote remove origin".to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn create_branch(&self) -> Result<(), SnapshotError> {
        let output = Command::new("git")
            .args(["checkout", "-b", &self.branch])
            .current_dir(self.scratch.path())
            .output()
            .map_err(|err| SnapshotError::ScmInvocation {
                op: format!("checkout -b {}", self.branch),
                reason: err.to_string(),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("already exists") {
                return Err(SnapshotError::BranchExists {
                    branch: self.branch.clone(),
                });
            }
            return Err(SnapshotError::ScmInvocation {
                op: format!("checkout -b {}", self.branch),
                reason: stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Pipe Writer
// =============================================================================

/// `io::Write` end of the byte pipe, used by the tar builder.
///
/// Fails with `BrokenPipe` once the consumer is gone or production was
/// aborted, which unwinds the producer.
struct PipeWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    cancel: CancellationToken,
}

impl Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "snapshot stream closed",
            ));
        }
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(data)))
            .map_err(|_| {
                io::Error::new(io::ErrorKind::BrokenPipe, "snapshot consumer dropped")
            })?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// =============================================================================
// Archive Helpers
// =============================================================================

fn append_dir_entry<W: Write>(
    archive: &mut tar::Builder<W>,
    path: &str,
    mode: u32,
    mtime: u64,
) -> io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_mode(mode);
    header.set_mtime(mtime);
    header.set_size(0);
    archive.append_data(&mut header, path, io::empty())
}

fn append_file_entry<W: Write>(
    archive: &mut tar::Builder<W>,
    path: &str,
    source: &Path,
    mode: u32,
    size: u64,
    mtime: u64,
) -> io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(mode);
    header.set_mtime(mtime);
    header.set_size(size);
    let file = File::open(source)?;
    archive.append_data(&mut header, path, file.take(size))
}

/// Walks `dir` and appends every entry under `prefix`, skipping symlinks.
fn append_tree<W: Write>(
    archive: &mut tar::Builder<W>,
    dir: &Path,
    prefix: &str,
) -> io::Result<()> {
    let meta = fs::metadata(dir)?;
    append_dir_entry(
        archive,
        &format!("{prefix}/"),
        unix_mode(&meta),
        unix_mtime(&meta),
    )?;

    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<io::Result<_>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let meta = entry.metadata()?;
        if meta.file_type().is_symlink() {
            continue;
        }
        let name = entry.file_name();
        let child_prefix = format!("{prefix}/{}", name.to_string_lossy());
        if meta.is_dir() {
            append_tree(archive, &entry.path(), &child_prefix)?;
        } else {
            append_file_entry(
                archive,
                &child_prefix,
                &entry.path(),
                unix_mode(&meta),
                meta.len(),
                unix_mtime(&meta),
            )?;
        }
    }
    Ok(())
}

/// Copies the repository control directory into the scratch checkout,
/// preserving modes and skipping symlinks.
fn copy_control_dir(src: &Path, dst: &Path) -> Result<(), SnapshotError> {
    copy_tree(src, dst).map_err(|err| SnapshotError::Scratch {
        reason: format!("failed to copy {}: {err}", src.display()),
    })
}

fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    fs::set_permissions(dst, fs::metadata(src)?.permissions())?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.file_type().is_symlink() {
            continue;
        }
        let target = dst.join(entry.file_name());
        if meta.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn unix_mode(meta: &fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o7777
    }
    #[cfg(not(unix))]
    {
        if meta.is_dir() {
            0o755
        } else {
            0o644
        }
    }
}

fn unix_mtime(meta: &fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
