//! Real engine client.
//!
//! [`Engine`] is the session-facing driver: it opens the client from the
//! ambient environment, builds the session image, and creates containers.
//! [`EngineClient`] implements the [`EngineApi`] capability set with one
//! HTTP request per call over the control socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::constants::{BUILD_SPEC_ENTRY, ENGINE_SOCKET, GATEWAY_HOST_MAPPING};
use crate::engine::transport::{query_escape, RequestBody, Transport};
use crate::engine::{AttachStream, ContainerHandle, CreateOptions, EngineApi};
use crate::error::EngineError;
use crate::output::Output;

/// Reference to a built image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub name: String,
}

// =============================================================================
// Engine Facade
// =============================================================================

/// Session-facing driver over an [`EngineApi`] implementation.
#[derive(Clone)]
pub struct Engine {
    api: Arc<dyn EngineApi>,
}

impl Engine {
    /// Constructs a client from the ambient environment and verifies the
    /// engine answers.
    ///
    /// Honors a `unix://` socket path in `DOCKER_HOST`; defaults to the
    /// well-known control socket.
    pub async fn open() -> Result<Engine, EngineError> {
        let socket = engine_socket_path()?;
        let client = EngineClient {
            transport: Transport::new(socket.clone()),
        };
        let version = client
            .ping()
            .await
            .map_err(|err| EngineError::Connect {
                socket,
                reason: err.to_string(),
            })?;
        tracing::debug!(api_version = %version, "connected to container engine");
        Ok(Engine {
            api: Arc::new(client),
        })
    }

    /// Wraps an existing capability implementation (tests inject their
    /// double here).
    pub fn with_api(api: Arc<dyn EngineApi>) -> Engine {
        Engine { api }
    }

    /// Builds an image from the build specification at `build_spec`, tagged
    /// `image_name`, streaming progress through the sink.
    pub async fn build_image(
        &self,
        build_spec: &Path,
        image_name: &str,
        output: Arc<dyn Output>,
    ) -> Result<ImageRef, EngineError> {
        let spec =
            tokio::fs::read(build_spec)
                .await
                .map_err(|err| EngineError::Build {
                    image: image_name.to_string(),
                    reason: format!(
                        "failed to read build specification at {}: {err}",
                        build_spec.display()
                    ),
                })?;
        let context = build_context(&spec).map_err(|err| EngineError::Build {
            image: image_name.to_string(),
            reason: format!("failed to assemble build context: {err}"),
        })?;

        self.api
            .image_build(context, image_name, output)
            .await?;
        Ok(ImageRef {
            name: image_name.to_string(),
        })
    }

    /// Creates a container wired for an interactive session: pseudo-terminal
    /// on, stdin kept open, stdio attached, gateway alias installed.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_container(
        &self,
        name: &str,
        image: &ImageRef,
        cmd: &[String],
        env: &[String],
        binds: &[String],
        working_dir: &str,
        network: &str,
        stop_timeout: Duration,
        resize_retries: u32,
        resize_delay: Duration,
    ) -> Result<ContainerHandle, EngineError> {
        let options = CreateOptions {
            name: name.to_string(),
            image: image.name.clone(),
            cmd: cmd.to_vec(),
            env: env.to_vec(),
            binds: binds.to_vec(),
            working_dir: working_dir.to_string(),
            network: network.to_string(),
            extra_hosts: vec![GATEWAY_HOST_MAPPING.to_string()],
        };
        let id = self
            .api
            .container_create(options)
            .await
            .map_err(|err| match err {
                EngineError::Api { status: 409, reason } => EngineError::NameConflict {
                    name: name.to_string(),
                    reason,
                },
                other => EngineError::Create {
                    name: name.to_string(),
                    reason: other.to_string(),
                },
            })?;

        Ok(ContainerHandle::new(
            Arc::clone(&self.api),
            id,
            name.to_string(),
            stop_timeout,
            resize_retries,
            resize_delay,
        ))
    }

    /// Releases the underlying client.
    pub async fn close(&self) {
        self.api.close().await;
    }
}

fn engine_socket_path() -> Result<PathBuf, EngineError> {
    match std::env::var("DOCKER_HOST") {
        Ok(host) if !host.is_empty() => match host.strip_prefix("unix://") {
            Some(path) => Ok(PathBuf::from(path)),
            None => Err(EngineError::Connect {
                socket: PathBuf::from(&host),
                reason: "only unix:// engine endpoints are supported".to_string(),
            }),
        },
        _ => Ok(PathBuf::from(ENGINE_SOCKET)),
    }
}

/// Wraps the build specification in a single-entry tar archive, named the
/// way the engine expects.
fn build_context(spec: &[u8]) -> std::io::Result<Bytes> {
    let mut archive = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(0o644);
    header.set_size(spec.len() as u64);
    archive.append_data(&mut header, BUILD_SPEC_ENTRY, spec)?;
    Ok(Bytes::from(archive.into_inner()?))
}

// =============================================================================
// Wire Client
// =============================================================================

pub(crate) struct EngineClient {
    transport: Transport,
}

/// One line of the engine's build progress stream.
#[derive(Debug, Deserialize)]
struct BuildRecord {
    #[serde(default)]
    stream: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, rename = "errorDetail")]
    error_detail: Option<BuildErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct BuildErrorDetail {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateBody<'a> {
    image: &'a str,
    cmd: &'a [String],
    tty: bool,
    open_stdin: bool,
    attach_stdin: bool,
    attach_stdout: bool,
    attach_stderr: bool,
    env: &'a [String],
    working_dir: &'a str,
    host_config: HostConfigBody<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct HostConfigBody<'a> {
    binds: &'a [String],
    network_mode: &'a str,
    extra_hosts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct CreateReply {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct WaitReply {
    #[serde(rename = "StatusCode")]
    status_code: i64,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    #[serde(rename = "Id")]
    id: String,
}

impl EngineClient {
    fn api_error(err: std::io::Error) -> EngineError {
        EngineError::Api {
            status: 0,
            reason: err.to_string(),
        }
    }

    async fn expect_success(
        mut response: crate::engine::transport::ApiResponse,
    ) -> Result<crate::engine::transport::ApiResponse, EngineError> {
        if response.status() >= 300 {
            let status = response.status();
            let reason = response.error_message().await;
            return Err(EngineError::Api { status, reason });
        }
        Ok(response)
    }
}

#[async_trait]
impl EngineApi for EngineClient {
    async fn ping(&self) -> Result<String, EngineError> {
        let response = self
            .transport
            .request("GET", "/_ping", RequestBody::Empty, false)
            .await
            .map_err(Self::api_error)?;
        let mut response = Self::expect_success(response).await?;
        let version = response
            .header("Api-Version")
            .map(str::to_string)
            .unwrap_or_default();
        let _ = response.read_to_end().await;
        Ok(version)
    }

    async fn image_build(
        &self,
        context: Bytes,
        image_name: &str,
        output: Arc<dyn Output>,
    ) -> Result<(), EngineError> {
        let target = format!(
            "/build?t={}&dockerfile={}&rm=1",
            query_escape(image_name),
            query_escape(BUILD_SPEC_ENTRY),
        );
        let response = self
            .transport
            .request("POST", &target, RequestBody::Tar(context), false)
            .await
            .map_err(|err| EngineError::Build {
                image: image_name.to_string(),
                reason: err.to_string(),
            })?;
        if response.status() >= 300 {
            let mut response = response;
            let reason = response.error_message().await;
            return Err(EngineError::Build {
                image: image_name.to_string(),
                reason,
            });
        }

        // Progress records arrive as newline-delimited JSON; the first record
        // carrying a nonzero error code is fatal and the rest of the stream
        // is dropped.
        let mut response = response;
        let mut pending = Vec::new();
        loop {
            let fragment = response.read_some().await.map_err(|err| EngineError::Build {
                image: image_name.to_string(),
                reason: format!("failed to read build output: {err}"),
            })?;
            match fragment {
                Some(bytes) => {
                    pending.extend_from_slice(&bytes);
                    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = pending.drain(..=pos).collect();
                        emit_build_record(&line, image_name, &output)?;
                    }
                }
                None => {
                    if !pending.is_empty() {
                        emit_build_record(&pending, image_name, &output)?;
                    }
                    return Ok(());
                }
            }
        }
    }

    async fn container_create(&self, options: CreateOptions) -> Result<String, EngineError> {
        let body = CreateBody {
            image: &options.image,
            cmd: &options.cmd,
            tty: true,
            open_stdin: true,
            attach_stdin: true,
            attach_stdout: true,
            attach_stderr: true,
            env: &options.env,
            working_dir: &options.working_dir,
            host_config: HostConfigBody {
                binds: &options.binds,
                network_mode: &options.network,
                extra_hosts: &options.extra_hosts,
            },
        };
        let payload = serde_json::to_vec(&body).map_err(|err| EngineError::Api {
            status: 0,
            reason: format!("failed to encode create request: {err}"),
        })?;

        let target = format!("/containers/create?name={}", query_escape(&options.name));
        let response = self
            .transport
            .request("POST", &target, RequestBody::Json(payload.into()), false)
            .await
            .map_err(Self::api_error)?;
        let mut response = Self::expect_success(response).await?;

        let body = response.read_to_end().await.map_err(Self::api_error)?;
        let reply: CreateReply = serde_json::from_slice(&body).map_err(|err| EngineError::Api {
            status: 0,
            reason: format!("failed to decode create reply: {err}"),
        })?;
        Ok(reply.id)
    }

    async fn container_start(&self, id: &str) -> Result<(), EngineError> {
        let target = format!("/containers/{id}/start");
        let response = self
            .transport
            .request("POST", &target, RequestBody::Empty, false)
            .await
            .map_err(Self::api_error)?;
        Self::expect_success(response).await.map(|_| ())
    }

    async fn container_attach(&self, id: &str) -> Result<AttachStream, EngineError> {
        let target =
            format!("/containers/{id}/attach?stream=1&stdin=1&stdout=1&stderr=1");
        let response = self
            .transport
            .request("POST", &target, RequestBody::Empty, true)
            .await
            .map_err(Self::api_error)?;
        // A hijacked attach answers 101; some engine versions answer 200
        // before handing over the stream.
        if response.status() != 101 && response.status() != 200 {
            let status = response.status();
            let mut response = response;
            let reason = response.error_message().await;
            return Err(EngineError::Api { status, reason });
        }
        Ok(response.into_attach())
    }

    async fn container_wait(&self, id: &str) -> Result<i64, EngineError> {
        let target = format!("/containers/{id}/wait?condition=not-running");
        let response = self
            .transport
            .request("POST", &target, RequestBody::Empty, false)
            .await
            .map_err(Self::api_error)?;
        let mut response = Self::expect_success(response).await?;
        let body = response.read_to_end().await.map_err(Self::api_error)?;
        let reply: WaitReply = serde_json::from_slice(&body).map_err(|err| EngineError::Api {
            status: 0,
            reason: format!("failed to decode wait reply: {err}"),
        })?;
        Ok(reply.status_code)
    }

    async fn container_stop(&self, id: &str, timeout: Duration) -> Result<(), EngineError> {
        let target = format!("/containers/{id}/stop?t={}", timeout.as_secs());
        let response = self
            .transport
            .request("POST", &target, RequestBody::Empty, false)
            .await
            .map_err(Self::api_error)?;
        Self::expect_success(response).await.map(|_| ())
    }

    async fn container_remove(&self, id: &str, force: bool) -> Result<(), EngineError> {
        let target = format!(
            "/containers/{id}?force={}",
            if force { "true" } else { "false" }
        );
        let response = self
            .transport
            .request("DELETE", &target, RequestBody::Empty, false)
            .await
            .map_err(Self::api_error)?;
        Self::expect_success(response).await.map(|_| ())
    }

    async fn container_resize(
        &self,
        id: &str,
        height: u16,
        width: u16,
    ) -> Result<(), EngineError> {
        let target = format!("/containers/{id}/resize?h={height}&w={width}");
        let response = self
            .transport
            .request("POST", &target, RequestBody::Empty, false)
            .await
            .map_err(Self::api_error)?;
        Self::expect_success(response).await.map(|_| ())
    }

    async fn container_list(&self) -> Result<Vec<String>, EngineError> {
        let response = self
            .transport
            .request("GET", "/containers/json?all=true", RequestBody::Empty, false)
            .await
            .map_err(Self::api_error)?;
        let mut response = Self::expect_success(response).await?;
        let body = response.read_to_end().await.map_err(Self::api_error)?;
        let entries: Vec<ListEntry> =
            serde_json::from_slice(&body).map_err(|err| EngineError::Api {
                status: 0,
                reason: format!("failed to decode container list: {err}"),
            })?;
        Ok(entries.into_iter().map(|entry| entry.id).collect())
    }

    async fn copy_to_container(
        &self,
        id: &str,
        dest: &str,
        content: Box<dyn AsyncRead + Send + Unpin>,
    ) -> Result<(), EngineError> {
        let target = format!("/containers/{id}/archive?path={}", query_escape(dest));
        let response = self
            .transport
            .request("PUT", &target, RequestBody::TarStream(content), false)
            .await
            .map_err(Self::api_error)?;
        Self::expect_success(response).await.map(|_| ())
    }

    async fn close(&self) {
        tracing::debug!(socket = %self.transport.socket().display(), "engine client closed");
    }
}

fn emit_build_record(
    line: &[u8],
    image_name: &str,
    output: &Arc<dyn Output>,
) -> Result<(), EngineError> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(());
    }
    let record: BuildRecord =
        serde_json::from_str(text).map_err(|err| EngineError::Build {
            image: image_name.to_string(),
            reason: format!("failed to decode build output: {err}"),
        })?;

    if let Some(detail) = &record.error_detail {
        if detail.code != 0 {
            return Err(EngineError::Build {
                image: image_name.to_string(),
                reason: detail.message.clone(),
            });
        }
    }
    if let Some(error) = &record.error {
        if !error.is_empty() {
            return Err(EngineError::Build {
                image: image_name.to_string(),
                reason: error.clone(),
            });
        }
    }
    if let Some(stream) = &record.stream {
        output.print(stream);
    }
    Ok(())
}
