//! Output sink injected into every component.
//!
//! Library code never writes to process-global streams directly; it receives
//! an [`Output`] capability instead. The standard implementation wires
//! informational output to stdout and warnings/fatal messages to stderr; the
//! capture implementation buffers everything for assertions in tests.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Channel for informational, warning, and fatal messages.
///
/// Formatting happens at call sites with `format!`; the trait takes finished
/// strings. `writer()` hands out a byte-oriented sub-sink for streaming
/// subprocess output (build progress, git backend stderr).
pub trait Output: Send + Sync {
    /// Writes a message without a trailing newline.
    fn print(&self, msg: &str);

    /// Writes a message with a trailing newline.
    fn println(&self, msg: &str);

    /// Writes a warning to the error stream, prefixed with `Warning: `.
    fn warning(&self, msg: &str);

    /// Writes an error message and signals a fatal condition. The standard
    /// implementation terminates the process with a nonzero status; test
    /// implementations record the call instead.
    fn fatal(&self, msg: &str);

    /// Returns a byte-oriented writer on the output stream.
    fn writer(&self) -> Box<dyn Write + Send>;
}

// =============================================================================
// Standard Implementation
// =============================================================================

/// [`Output`] wired to the host's standard output and error streams.
#[derive(Debug, Default)]
pub struct StandardOutput;

impl StandardOutput {
    pub fn new() -> Self {
        StandardOutput
    }
}

impl Output for StandardOutput {
    fn print(&self, msg: &str) {
        let mut out = io::stdout();
        let _ = out.write_all(msg.as_bytes());
        let _ = out.flush();
    }

    fn println(&self, msg: &str) {
        let mut out = io::stdout();
        let _ = writeln!(out, "{msg}");
        let _ = out.flush();
    }

    fn warning(&self, msg: &str) {
        let _ = writeln!(io::stderr(), "Warning: {msg}");
    }

    fn fatal(&self, msg: &str) {
        let _ = writeln!(io::stderr(), "{msg}");
        std::process::exit(1);
    }

    fn writer(&self) -> Box<dyn Write + Send> {
        Box::new(io::stdout())
    }
}

// =============================================================================
// Capture Implementation
// =============================================================================

/// [`Output`] that buffers everything, for tests.
///
/// Output and error streams are captured separately; `fatal` records that it
/// was called instead of exiting the process.
#[derive(Debug, Default, Clone)]
pub struct CaptureOutput {
    out: Arc<Mutex<Vec<u8>>>,
    err: Arc<Mutex<Vec<u8>>>,
    fatal_called: Arc<AtomicBool>,
}

impl CaptureOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written to the output stream so far.
    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.out.lock().expect("capture lock poisoned")).into_owned()
    }

    /// Everything written to the error stream so far.
    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.err.lock().expect("capture lock poisoned")).into_owned()
    }

    /// True once `fatal` has been invoked.
    pub fn fatal_called(&self) -> bool {
        self.fatal_called.load(Ordering::SeqCst)
    }
}

impl Output for CaptureOutput {
    fn print(&self, msg: &str) {
        self.out
            .lock()
            .expect("capture lock poisoned")
            .extend_from_slice(msg.as_bytes());
    }

    fn println(&self, msg: &str) {
        let mut out = self.out.lock().expect("capture lock poisoned");
        out.extend_from_slice(msg.as_bytes());
        out.push(b'\n');
    }

    fn warning(&self, msg: &str) {
        let mut err = self.err.lock().expect("capture lock poisoned");
        err.extend_from_slice(b"Warning: ");
        err.extend_from_slice(msg.as_bytes());
        err.push(b'\n');
    }

    fn fatal(&self, msg: &str) {
        {
            let mut err = self.err.lock().expect("capture lock poisoned");
            err.extend_from_slice(msg.as_bytes());
            err.push(b'\n');
        }
        self.fatal_called.store(true, Ordering::SeqCst);
    }

    fn writer(&self) -> Box<dyn Write + Send> {
        Box::new(CaptureWriter {
            buf: Arc::clone(&self.out),
        })
    }
}

struct CaptureWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Write for CaptureWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf
            .lock()
            .map_err(|_| io::Error::other("capture lock poisoned"))?
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
