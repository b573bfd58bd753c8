//! Container lifecycle handle.
//!
//! A [`ContainerHandle`] is returned by [`Engine::create_container`] and owns
//! the per-container operations: start, snapshot upload, terminal attach,
//! wait, and removal. States move created → started → attached → exited or
//! interrupted; an interrupt requests a graceful stop and the cleanup ledger
//! force-removes afterwards.
//!
//! [`Engine::create_container`]: crate::engine::Engine::create_container

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::engine::tty::TtyBridge;
use crate::engine::EngineApi;
use crate::error::{BridgeError, EngineError};
use crate::output::Output;

/// Handle on one created container.
#[derive(Clone)]
pub struct ContainerHandle {
    api: Arc<dyn EngineApi>,
    /// Engine-assigned id.
    pub id: String,
    /// Human-readable name (the session's container name).
    pub name: String,
    stop_timeout: Duration,
    resize_retries: u32,
    resize_delay: Duration,
}

impl ContainerHandle {
    pub(crate) fn new(
        api: Arc<dyn EngineApi>,
        id: String,
        name: String,
        stop_timeout: Duration,
        resize_retries: u32,
        resize_delay: Duration,
    ) -> Self {
        Self {
            api,
            id,
            name,
            stop_timeout,
            resize_retries,
            resize_delay,
        }
    }

    /// Starts the container.
    pub async fn start(&self) -> Result<(), EngineError> {
        self.api
            .container_start(&self.id)
            .await
            .map_err(|err| EngineError::Start {
                name: self.name.clone(),
                reason: err.to_string(),
            })
    }

    /// Streams a tar archive into the container at `dest`.
    ///
    /// The archive is uploaded while it is still being produced; a producer
    /// failure aborts the upload and surfaces here.
    pub async fn copy_into(
        &self,
        content: impl AsyncRead + Send + Unpin + 'static,
        dest: &str,
    ) -> Result<(), EngineError> {
        self.api
            .copy_to_container(&self.id, dest, Box::new(content))
            .await
            .map_err(|err| EngineError::Copy {
                name: self.name.clone(),
                dest: dest.to_string(),
                reason: err.to_string(),
            })
    }

    /// Attaches the terminal bridge: raw mode, resize tracking, and the two
    /// forwarding tasks. Returns once the bridge is established; the bridge
    /// itself lives until the session's token is cancelled or the container
    /// exits.
    pub async fn attach(
        &self,
        token: &CancellationToken,
        output: Arc<dyn Output>,
    ) -> Result<(), BridgeError> {
        let bridge = TtyBridge::new(
            Arc::clone(&self.api),
            self.id.clone(),
            self.name.clone(),
            self.resize_retries,
            self.resize_delay,
            output,
        );
        bridge.attach(token).await
    }

    /// Waits for the container to exit or for the session to be interrupted.
    ///
    /// On exit the status code is reported through the sink. On interrupt a
    /// graceful stop with the configured grace period is requested; a stop
    /// failure is a warning, not an error.
    pub async fn wait(
        &self,
        token: &CancellationToken,
        output: Arc<dyn Output>,
    ) -> Result<(), EngineError> {
        tokio::select! {
            result = self.api.container_wait(&self.id) => {
                let status = result.map_err(|err| EngineError::Wait {
                    name: self.name.clone(),
                    reason: err.to_string(),
                })?;
                output.println(&format!("\nContainer exited with status: {status}"));
            }
            _ = token.cancelled() => {
                output.println("\nReceived signal, stopping container...");
                if let Err(err) = self.api.container_stop(&self.id, self.stop_timeout).await {
                    output.warning(&format!("failed to stop container: {err}"));
                }
            }
        }
        Ok(())
    }

    /// Removes a stopped container.
    pub async fn remove(&self) -> Result<(), EngineError> {
        self.api
            .container_remove(&self.id, false)
            .await
            .map_err(|err| EngineError::Remove {
                name: self.name.clone(),
                reason: err.to_string(),
            })
    }

    /// Removes the container even if it is still running.
    pub async fn force_remove(&self) -> Result<(), EngineError> {
        self.api
            .container_remove(&self.id, true)
            .await
            .map_err(|err| EngineError::Remove {
                name: self.name.clone(),
                reason: err.to_string(),
            })
    }
}
