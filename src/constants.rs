//! Constants for the workspace session layer.
//!
//! All defaults, identifier formats, and well-known paths live here so the
//! external contract is visible in one place.

use std::time::Duration;

// =============================================================================
// Session Identity
// =============================================================================

/// Prefix shared by container names (`workcell-<id>`) and branch names
/// (`workcell/<id>`).
pub const SESSION_PREFIX: &str = "workcell";

/// Exclusive upper bound of the session identifier draw.
///
/// Small enough to keep names readable; collisions across concurrent runs
/// surface as a duplicate-name error at container creation.
pub const SESSION_ID_SPACE: u32 = 10_000;

// =============================================================================
// Container Defaults
// =============================================================================

/// Tag applied to the image built for each session.
pub const DEFAULT_IMAGE_NAME: &str = "workcell:latest";

/// Working directory inside the container, matching the snapshot layout.
pub const CONTAINER_WORKDIR: &str = "/app";

/// Container network when `--network` is not given.
pub const DEFAULT_NETWORK: &str = "default";

/// Seconds granted to the container to handle SIGTERM before it is killed.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempts for the initial terminal resize. The container may not be ready
/// when the first resize is submitted.
pub const DEFAULT_RESIZE_RETRIES: u32 = 10;

/// Base delay between resize retries; attempt `k` waits `k * base`.
pub const DEFAULT_RESIZE_DELAY: Duration = Duration::from_millis(10);

// =============================================================================
// Host Gateway
// =============================================================================

/// DNS alias the container uses to reach the host.
pub const GATEWAY_HOST: &str = "host.docker.internal";

/// Extra-host mapping installed into every container.
pub const GATEWAY_HOST_MAPPING: &str = "host.docker.internal:host-gateway";

// =============================================================================
// Well-Known Sockets and Mounts
// =============================================================================

/// Default engine control socket.
pub const ENGINE_SOCKET: &str = "/var/run/docker.sock";

/// Bind mount exposing the engine control socket inside the container.
pub const ENGINE_SOCKET_MOUNT: &str = "/var/run/docker.sock:/var/run/docker.sock";

/// Agent-forwarding socket path, both on the host side of the mount and as
/// the `SSH_AUTH_SOCK` value inside the container.
pub const SSH_AGENT_SOCKET: &str = "/run/host-services/ssh-auth.sock";

/// Bind mount exposing the agent-forwarding socket inside the container.
pub const SSH_AGENT_MOUNT: &str =
    "/run/host-services/ssh-auth.sock:/run/host-services/ssh-auth.sock";

// =============================================================================
// Environment Defaults
// =============================================================================

/// `TERM` substituted when the host environment carries none.
pub const DEFAULT_TERM: &str = "xterm-256color";

/// `COLORTERM` substituted when the host environment carries none.
pub const DEFAULT_COLORTERM: &str = "truecolor";

/// Committer name configured in the rewritten snapshot.
pub const DEFAULT_GIT_USER_NAME: &str = "Workcell";

/// Committer email configured in the rewritten snapshot.
pub const DEFAULT_GIT_USER_EMAIL: &str = "workcell@example.com";

// =============================================================================
// Snapshot Layout
// =============================================================================

/// Root directory of every snapshot archive entry.
pub const SNAPSHOT_ROOT: &str = "app";

/// Prefix for the scratch checkout directory.
pub const SCRATCH_PREFIX: &str = "workcell-checkout-";

// =============================================================================
// Engine Wire Conventions
// =============================================================================

/// Entry name the engine expects for the build specification inside the
/// build-context archive.
pub const BUILD_SPEC_ENTRY: &str = "Dockerfile";

/// Chunk size for streaming bodies to and from the engine.
pub const ENGINE_COPY_CHUNK: usize = 32 * 1024;
