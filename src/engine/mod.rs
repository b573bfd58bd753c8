//! Container engine driver.
//!
//! Wraps the engine's remote API behind the [`EngineApi`] capability set.
//! Exactly two implementations are expected: the real Unix-socket client in
//! [`client`] and an in-process test double. Higher layers talk to
//! [`Engine`] and [`ContainerHandle`], which map wire-level failures onto the
//! operation that was in flight.

pub mod client;
pub mod container;
pub(crate) mod transport;
pub(crate) mod tty;

pub use client::{Engine, ImageRef};
pub use container::ContainerHandle;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::EngineError;
use crate::output::Output;

// =============================================================================
// Wire-Facing Types
// =============================================================================

/// Bidirectional attached stream of a running container.
///
/// One reader, one writer; the terminal bridge owns both.
pub struct AttachStream {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
}

/// Container creation request.
///
/// Always created with a pseudo-terminal, attached stdio, and standard input
/// kept open; the gateway alias is installed so the container can reach the
/// host.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Container name.
    pub name: String,
    /// Image to instantiate.
    pub image: String,
    /// Command vector.
    pub cmd: Vec<String>,
    /// Environment bindings, `KEY=VALUE`.
    pub env: Vec<String>,
    /// Bind mounts, `HOST:CONTAINER[:OPTS]`.
    pub binds: Vec<String>,
    /// Working directory inside the container.
    pub working_dir: String,
    /// Network name.
    pub network: String,
    /// Extra host mappings, `NAME:TARGET`.
    pub extra_hosts: Vec<String>,
}

// =============================================================================
// Capability Set
// =============================================================================

/// The engine API surface the session uses.
///
/// Methods mirror single engine requests; operation-level context (which
/// container name, which step) is added by the callers. Implemented by the
/// real client and by the mock engine in tests.
#[async_trait]
pub trait EngineApi: Send + Sync {
    /// Liveness probe; returns the engine's API version.
    async fn ping(&self) -> Result<String, EngineError>;

    /// Builds an image from a build-context archive, streaming progress
    /// records through the sink. The first error record aborts.
    async fn image_build(
        &self,
        context: Bytes,
        image_name: &str,
        output: Arc<dyn Output>,
    ) -> Result<(), EngineError>;

    /// Creates a container and returns its engine-assigned id.
    async fn container_create(&self, options: CreateOptions) -> Result<String, EngineError>;

    async fn container_start(&self, id: &str) -> Result<(), EngineError>;

    /// Opens the bidirectional attached stream.
    async fn container_attach(&self, id: &str) -> Result<AttachStream, EngineError>;

    /// Blocks until the container leaves the running state; returns its exit
    /// status code.
    async fn container_wait(&self, id: &str) -> Result<i64, EngineError>;

    /// Requests a graceful stop with the given grace period.
    async fn container_stop(&self, id: &str, timeout: Duration) -> Result<(), EngineError>;

    async fn container_remove(&self, id: &str, force: bool) -> Result<(), EngineError>;

    /// Resizes the container's pseudo-terminal.
    async fn container_resize(&self, id: &str, height: u16, width: u16)
        -> Result<(), EngineError>;

    /// Lists ids of all containers known to the engine.
    async fn container_list(&self) -> Result<Vec<String>, EngineError>;

    /// Streams a tar archive into the container at `dest`.
    async fn copy_to_container(
        &self,
        id: &str,
        dest: &str,
        content: Box<dyn AsyncRead + Send + Unpin>,
    ) -> Result<(), EngineError>;

    /// Releases the client. The connection-per-request transport holds no
    /// state, but the capability stays on the seam so doubles can assert
    /// teardown ordering.
    async fn close(&self);
}
