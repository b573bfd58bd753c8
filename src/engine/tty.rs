//! Terminal bridge.
//!
//! Plumbs the container's attached stream to the host terminal for the
//! lifetime of the session: host stdin and stdout switch to raw mode, two
//! tasks forward bytes in each direction, window-resize signals are
//! propagated, and the saved terminal modes are restored exactly once on
//! every exit path.
//!
//! Startup ordering is load-bearing: initial resize (with retry fallback),
//! resize listener, stdin raw, attach channel, stdin forwarder, stdout raw,
//! output forwarder. Cancellation and EOF end the forwarders without error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::engine::EngineApi;
use crate::error::{BridgeError, EngineError};
use crate::output::Output;

// =============================================================================
// Bridge
// =============================================================================

pub(crate) struct TtyBridge {
    api: Arc<dyn EngineApi>,
    id: String,
    name: String,
    resize_retries: u32,
    resize_delay: Duration,
    output: Arc<dyn Output>,
}

impl TtyBridge {
    pub(crate) fn new(
        api: Arc<dyn EngineApi>,
        id: String,
        name: String,
        resize_retries: u32,
        resize_delay: Duration,
        output: Arc<dyn Output>,
    ) -> Self {
        Self {
            api,
            id,
            name,
            resize_retries,
            resize_delay,
            output,
        }
    }

    pub(crate) async fn attach(self, token: &CancellationToken) -> Result<(), BridgeError> {
        let modes = Arc::new(TerminalModes::capture());

        // Initial resize; the container may not be ready yet, so failure
        // falls back to the retry schedule instead of aborting.
        if let Err(err) = self.resize().await {
            self.output.warning(&format!("failed to resize tty: {err}"));
            self.spawn_resize_retry(token.clone());
        }
        self.spawn_resize_listener(token.clone())?;

        modes.set_stdin_raw()?;

        let stream = match self.api.container_attach(&self.id).await {
            Ok(stream) => stream,
            Err(err) => {
                modes.restore();
                return Err(BridgeError::Attach(EngineError::Attach {
                    name: self.name.clone(),
                    reason: err.to_string(),
                }));
            }
        };
        let mut reader = stream.reader;
        let mut writer = stream.writer;

        {
            let modes = Arc::clone(&modes);
            let token = token.clone();
            let output = Arc::clone(&self.output);
            // Host input arrives from a detached reader thread; a raw
            // blocking read on stdin must never sit in the runtime's
            // blocking pool, where it would stall shutdown.
            let mut host_input = spawn_stdin_reader();
            tokio::spawn(async move {
                let result = loop {
                    tokio::select! {
                        chunk = host_input.recv() => match chunk {
                            Some(chunk) => {
                                if let Err(err) = writer.write_all(&chunk).await {
                                    break Err(err);
                                }
                            }
                            None => break writer.shutdown().await,
                        },
                        _ = token.cancelled() => break Ok(()),
                    }
                };
                modes.restore();
                if let Err(err) = result {
                    if !token.is_cancelled() {
                        output.warning(&format!("stdin forwarding error: {err}"));
                    }
                }
            });
        }

        if let Err(err) = modes.set_stdout_raw() {
            modes.restore();
            return Err(err);
        }

        {
            let modes = Arc::clone(&modes);
            let token = token.clone();
            let output = Arc::clone(&self.output);
            tokio::spawn(async move {
                let mut stdout = tokio::io::stdout();
                let result = tokio::select! {
                    copied = tokio::io::copy(&mut reader, &mut stdout) => copied.map(|_| ()),
                    _ = token.cancelled() => Ok(()),
                };
                let _ = stdout.flush().await;
                modes.restore();
                if let Err(err) = result {
                    if !token.is_cancelled() {
                        output.warning(&format!("output forwarding error: {err}"));
                    }
                }
            });
        }

        Ok(())
    }

    async fn resize(&self) -> Result<(), EngineError> {
        let (height, width) = terminal_size();
        if height == 0 && width == 0 {
            return Ok(());
        }
        self.api
            .container_resize(&self.id, height, width)
            .await
            .map_err(|err| EngineError::Resize {
                reason: err.to_string(),
            })
    }

    /// Retries the initial resize at delays `k * base` for `k = 1..=N`,
    /// stopping at the first success. Total failure is fatal.
    fn spawn_resize_retry(&self, token: CancellationToken) {
        let bridge = self.shallow_clone();
        tokio::spawn(async move {
            let mut last_error = None;
            for attempt in 1..=bridge.resize_retries {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(bridge.resize_delay * attempt) => {}
                }
                match bridge.resize().await {
                    Ok(()) => return,
                    Err(err) => last_error = Some(err),
                }
            }
            if let Some(err) = last_error {
                bridge
                    .output
                    .fatal(&format!("failed to resize tty: {err}"));
            }
        });
    }

    /// Re-submits the container terminal size on every window-change signal.
    fn spawn_resize_listener(&self, token: CancellationToken) -> Result<(), BridgeError> {
        let mut winch =
            signal(SignalKind::window_change()).map_err(|err| BridgeError::Resize {
                reason: err.to_string(),
            })?;
        let bridge = self.shallow_clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    changed = winch.recv() => {
                        if changed.is_none() {
                            return;
                        }
                        if let Err(err) = bridge.resize().await {
                            bridge
                                .output
                                .warning(&format!("failed to resize tty: {err}"));
                        }
                    }
                }
            }
        });
        Ok(())
    }

    fn shallow_clone(&self) -> TtyBridge {
        TtyBridge {
            api: Arc::clone(&self.api),
            id: self.id.clone(),
            name: self.name.clone(),
            resize_retries: self.resize_retries,
            resize_delay: self.resize_delay,
            output: Arc::clone(&self.output),
        }
    }
}

/// Forwards host stdin through a detached thread.
///
/// The thread blocks in `read` and dies with the process; the channel end
/// signals EOF or a dropped consumer.
fn spawn_stdin_reader() -> tokio::sync::mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = tokio::sync::mpsc::channel(16);
    std::thread::spawn(move || {
        use std::io::Read;
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 4096];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

// =============================================================================
// Terminal Modes
// =============================================================================

/// Saved termios state for host stdin and stdout with a once-guarded restore.
///
/// On a host without a controlling terminal (tests, pipes) capture yields
/// nothing and every operation is a no-op, matching how attached streams
/// behave when stdio is redirected.
struct TerminalModes {
    stdin: Option<libc::termios>,
    stdout: Option<libc::termios>,
    restored: AtomicBool,
}

impl TerminalModes {
    fn capture() -> Self {
        Self {
            stdin: get_termios(libc::STDIN_FILENO),
            stdout: get_termios(libc::STDOUT_FILENO),
            restored: AtomicBool::new(false),
        }
    }

    fn set_stdin_raw(&self) -> Result<(), BridgeError> {
        let Some(saved) = self.stdin else {
            return Ok(());
        };
        set_raw(libc::STDIN_FILENO, &saved).map_err(|reason| BridgeError::RawMode { reason })
    }

    fn set_stdout_raw(&self) -> Result<(), BridgeError> {
        let Some(saved) = self.stdout else {
            return Ok(());
        };
        set_raw(libc::STDOUT_FILENO, &saved).map_err(|reason| BridgeError::RawMode { reason })
    }

    /// Restores both saved termios structs. Runs at most once; later calls
    /// are no-ops.
    fn restore(&self) {
        if self.restored.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(saved) = self.stdin {
            let _ = set_termios(libc::STDIN_FILENO, &saved);
        }
        if let Some(saved) = self.stdout {
            let _ = set_termios(libc::STDOUT_FILENO, &saved);
        }
    }
}

fn get_termios(fd: libc::c_int) -> Option<libc::termios> {
    if unsafe { libc::isatty(fd) } != 1 {
        return None;
    }
    let mut termios = unsafe { std::mem::zeroed::<libc::termios>() };
    if unsafe { libc::tcgetattr(fd, &mut termios) } == 0 {
        Some(termios)
    } else {
        None
    }
}

fn set_termios(fd: libc::c_int, termios: &libc::termios) -> Result<(), String> {
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, termios) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error().to_string())
    }
}

fn set_raw(fd: libc::c_int, saved: &libc::termios) -> Result<(), String> {
    let mut raw = *saved;
    unsafe { libc::cfmakeraw(&mut raw) };
    set_termios(fd, &raw)
}

/// Current host terminal dimensions, `(rows, cols)`; zero when stdout is not
/// a terminal.
fn terminal_size() -> (u16, u16) {
    let mut size = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let result = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut size) };
    if result == 0 {
        (size.ws_row, size.ws_col)
    } else {
        (0, 0)
    }
}
