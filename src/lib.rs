//! # workcell
//!
//! Ephemeral containerized workspaces that mirror the caller's working copy.
//!
//! One run provisions a fresh container from a build specification, streams a
//! snapshot of the enclosing git repository into it (rewritten onto a session
//! branch whose `origin` points back at the host), bridges the host terminal
//! to the container, and tears everything down on exit. The container can
//! `git fetch` and `git push` against the host working copy through a
//! loopback HTTP endpoint reached via the engine's gateway alias.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         orchestrator                             │
//! │   identity → git server → engine → build → create → snapshot    │
//! │          → copy-in → start → attach → wait → teardown            │
//! ├──────────────┬──────────────┬───────────────┬────────────────────┤
//! │  gitserver   │   snapshot   │    engine     │      cleanup       │
//! │  loopback    │  streaming   │  build/create │  LIFO ledger of    │
//! │  http-backend│  tar of HEAD │  attach/wait  │  release actions   │
//! │  CGI bridge  │  + rewrite   │  + tty bridge │                    │
//! └──────────────┴──────────────┴───────────────┴────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! ```text
//!   ┌─────────┐  create   ┌─────────┐  start   ┌─────────┐
//!   │ (none)  │ ────────► │ Created │ ───────► │ Started │
//!   └─────────┘           └─────────┘          └────┬────┘
//!                                                   │ attach
//!                                                   ▼
//!                          exited ◄──────────── Attached ──────► interrupted
//!                            │                                        │
//!                            └────────── force-remove ◄───────────────┘
//! ```
//!
//! Every acquired resource registers its release with the cleanup ledger at
//! the moment of acquisition; the ledger runs in reverse insertion order on
//! every exit path, so a failed session leaves no container, no listener, and
//! no raw-mode terminal behind.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use workcell::{run, StandardOutput};
//!
//! #[tokio::main]
//! async fn main() -> workcell::Result<()> {
//!     let args: Vec<String> = std::env::args().skip(1).collect();
//!     let environ: Vec<String> = std::env::vars()
//!         .map(|(key, value)| format!("{key}={value}"))
//!         .collect();
//!     run(&args, &environ, Arc::new(StandardOutput::new())).await
//! }
//! ```

pub mod cleanup;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod gitserver;
pub mod orchestrator;
pub mod output;
pub mod session;
pub mod snapshot;

pub use cleanup::CleanupLedger;
pub use config::{GitUser, RunConfig};
pub use engine::{
    AttachStream, ContainerHandle, CreateOptions, Engine, EngineApi, ImageRef,
};
pub use error::{
    BridgeError, ConfigError, EngineError, Error, Result, ServerError, SnapshotError,
};
pub use gitserver::GitServer;
pub use orchestrator::{run, run_session};
pub use output::{CaptureOutput, Output, StandardOutput};
pub use session::SessionIdentity;
pub use snapshot::{Snapshot, SnapshotCloser, SnapshotStream};
