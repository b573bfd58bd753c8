//! Error types for the workspace session layer.
//!
//! Each subsystem carries its own error enum; [`Error`] wraps them at the
//! orchestration boundary and names the step that failed.

use std::io;
use std::path::PathBuf;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Top-Level Error
// =============================================================================

/// Error surfaced by the session orchestrator.
///
/// Every variant wraps a subsystem failure with enough context to tell which
/// step of the session aborted.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Command-line parsing failed.
    #[error("invalid command line: {0}")]
    Config(#[from] ConfigError),

    /// The current working directory could not be resolved.
    #[error("failed to resolve current working directory: {0}")]
    Cwd(#[source] io::Error),

    /// The loopback git server failed.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// The container engine driver failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The repository snapshot pipeline failed.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// The terminal bridge failed.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Command-line configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A recognized flag was given without its value.
    #[error("flag {flag} requires a value")]
    MissingValue { flag: String },

    /// An unrecognized flag appeared before the command vector.
    #[error("unrecognized flag {flag}")]
    UnknownFlag { flag: String },
}

// =============================================================================
// Loopback Git Server Errors
// =============================================================================

/// Errors from the loopback git HTTP server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The served path has no `.git` directory.
    #[error("not a git repository: {path}")]
    NotARepository { path: PathBuf },

    /// The loopback listener could not be bound.
    #[error("failed to bind loopback listener: {0}")]
    Listen(#[source] io::Error),

    /// No `git` binary was found on `PATH`.
    #[error("git binary not found in PATH")]
    ToolMissing,

    /// The server task could not be shut down cleanly.
    #[error("failed to close git server: {reason}")]
    Close { reason: String },
}

// =============================================================================
// Container Engine Errors
// =============================================================================

/// Errors from the container engine driver.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine control socket could not be reached.
    #[error("failed to connect to container engine at {socket}: {reason}")]
    Connect { socket: PathBuf, reason: String },

    /// The image build was rejected or reported an error record.
    #[error("failed to build image '{image}': {reason}")]
    Build { image: String, reason: String },

    /// Container creation failed.
    #[error("failed to create container '{name}': {reason}")]
    Create { name: String, reason: String },

    /// A container with the requested name already exists.
    #[error("container name '{name}' already in use: {reason}")]
    NameConflict { name: String, reason: String },

    /// Container start failed.
    #[error("failed to start container '{name}': {reason}")]
    Start { name: String, reason: String },

    /// Streaming the snapshot into the container failed.
    #[error("failed to copy archive into container '{name}' at {dest}: {reason}")]
    Copy {
        name: String,
        dest: String,
        reason: String,
    },

    /// Opening the attached stream failed.
    #[error("failed to attach to container '{name}': {reason}")]
    Attach { name: String, reason: String },

    /// Waiting for container exit failed.
    #[error("failed to wait for container '{name}': {reason}")]
    Wait { name: String, reason: String },

    /// Container removal failed.
    #[error("failed to remove container '{name}': {reason}")]
    Remove { name: String, reason: String },

    /// Resizing the container terminal failed.
    #[error("failed to resize container terminal: {reason}")]
    Resize { reason: String },

    /// A request to the engine API failed at the transport or wire level.
    ///
    /// `status` is the HTTP status reported by the engine, or 0 when the
    /// failure happened below the protocol.
    #[error("engine API request failed (status {status}): {reason}")]
    Api { status: u16, reason: String },
}

// =============================================================================
// Snapshot Errors
// =============================================================================

/// Errors from the repository snapshot pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The source directory is not inside a git repository.
    #[error("not a git repository: {path}")]
    NotARepository { path: PathBuf },

    /// The scratch checkout directory could not be prepared.
    #[error("failed to prepare scratch checkout: {reason}")]
    Scratch { reason: String },

    /// A git invocation in the scratch checkout failed.
    #[error("git {op} failed in scratch checkout: {reason}")]
    ScmInvocation { op: String, reason: String },

    /// The session branch already exists in the repository.
    #[error("branch '{branch}' already exists")]
    BranchExists { branch: String },

    /// Writing archive entries failed.
    #[error("failed to write snapshot archive: {0}")]
    Archive(#[source] io::Error),
}

// =============================================================================
// Terminal Bridge Errors
// =============================================================================

/// Errors from the terminal bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The host terminal could not be switched to raw mode.
    #[error("failed to set terminal to raw mode: {reason}")]
    RawMode { reason: String },

    /// The engine attach channel could not be opened.
    #[error(transparent)]
    Attach(EngineError),

    /// The window-resize listener could not be installed.
    #[error("failed to install resize listener: {reason}")]
    Resize { reason: String },
}
