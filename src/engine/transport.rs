//! HTTP/1.1 transport for the engine control socket.
//!
//! The engine speaks plain HTTP over a Unix socket. One connection serves one
//! request; the attach endpoint upgrades its connection to a raw
//! bidirectional stream, which is why the transport owns the socket rather
//! than delegating to a pooled HTTP client. Request bodies are sent with a
//! known length or chunked (to pipeline the snapshot upload); response bodies
//! are read by content length, chunk decoding, or to end of stream.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use crate::constants::ENGINE_COPY_CHUNK;
use crate::engine::AttachStream;

// =============================================================================
// Request Side
// =============================================================================

/// Body of an outgoing engine request.
pub(crate) enum RequestBody {
    Empty,
    Json(Bytes),
    Tar(Bytes),
    /// Streamed with chunked transfer encoding.
    TarStream(Box<dyn AsyncRead + Send + Unpin>),
}

/// Connection-per-request transport bound to one socket path.
#[derive(Debug, Clone)]
pub(crate) struct Transport {
    socket: PathBuf,
}

impl Transport {
    pub(crate) fn new(socket: PathBuf) -> Self {
        Self { socket }
    }

    pub(crate) fn socket(&self) -> &Path {
        &self.socket
    }

    /// Sends one request and reads the response head.
    ///
    /// With `upgrade` set the request asks the engine to hand over the raw
    /// stream; the caller takes it via [`ApiResponse::into_attach`].
    pub(crate) async fn request(
        &self,
        method: &str,
        target: &str,
        body: RequestBody,
        upgrade: bool,
    ) -> io::Result<ApiResponse> {
        let stream = UnixStream::connect(&self.socket).await?;
        let (read_half, mut write_half) = stream.into_split();

        let mut head = format!("{method} {target} HTTP/1.1\r\nHost: engine\r\n");
        if upgrade {
            head.push_str("Connection: Upgrade\r\nUpgrade: tcp\r\n");
        } else {
            head.push_str("Connection: close\r\n");
        }

        match body {
            RequestBody::Empty => {
                head.push_str("Content-Length: 0\r\n\r\n");
                write_half.write_all(head.as_bytes()).await?;
            }
            RequestBody::Json(data) => {
                head.push_str(&format!(
                    "Content-Type: application/json\r\nContent-Length: {}\r\n\r\n",
                    data.len()
                ));
                write_half.write_all(head.as_bytes()).await?;
                write_half.write_all(&data).await?;
            }
            RequestBody::Tar(data) => {
                head.push_str(&format!(
                    "Content-Type: application/x-tar\r\nContent-Length: {}\r\n\r\n",
                    data.len()
                ));
                write_half.write_all(head.as_bytes()).await?;
                write_half.write_all(&data).await?;
            }
            RequestBody::TarStream(mut content) => {
                head.push_str(
                    "Content-Type: application/x-tar\r\nTransfer-Encoding: chunked\r\n\r\n",
                );
                write_half.write_all(head.as_bytes()).await?;
                write_chunked(&mut write_half, &mut content).await?;
            }
        }
        write_half.flush().await?;

        read_response(read_half, write_half).await
    }
}

async fn write_chunked(
    writer: &mut OwnedWriteHalf,
    content: &mut (dyn AsyncRead + Send + Unpin),
) -> io::Result<()> {
    let mut buf = vec![0u8; ENGINE_COPY_CHUNK];
    loop {
        let n = content.read(&mut buf).await?;
        if n == 0 {
            writer.write_all(b"0\r\n\r\n").await?;
            return Ok(());
        }
        writer.write_all(format!("{n:x}\r\n").as_bytes()).await?;
        writer.write_all(&buf[..n]).await?;
        writer.write_all(b"\r\n").await?;
    }
}

// =============================================================================
// Response Side
// =============================================================================

enum BodyKind {
    /// `Content-Length` body with remaining byte count.
    Limited(u64),
    /// Chunked transfer encoding.
    Chunked { remaining: u64, done: bool },
    /// Read until the engine closes the connection.
    UntilClose,
    /// No body (204/304 or an upgraded connection).
    None,
}

/// A decoded response head plus the connection it arrived on.
pub(crate) struct ApiResponse {
    status: u16,
    headers: Vec<(String, String)>,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    body: BodyKind,
}

async fn read_response(
    read_half: OwnedReadHalf,
    writer: OwnedWriteHalf,
) -> io::Result<ApiResponse> {
    let mut reader = BufReader::new(read_half);

    let mut status_line = String::new();
    reader.read_line(&mut status_line).await?;
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed status line: {status_line:?}"),
            )
        })?;

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "engine closed connection inside response head",
            ));
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }

    let header = |name: &str| {
        headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    };

    let body = if status == 101 || status == 204 || status == 304 {
        BodyKind::None
    } else if header("transfer-encoding").is_some_and(|v| v.eq_ignore_ascii_case("chunked")) {
        BodyKind::Chunked {
            remaining: 0,
            done: false,
        }
    } else if let Some(length) = header("content-length").and_then(|v| v.parse::<u64>().ok()) {
        BodyKind::Limited(length)
    } else {
        BodyKind::UntilClose
    };

    Ok(ApiResponse {
        status,
        headers,
        reader,
        writer,
        body,
    })
}

impl ApiResponse {
    pub(crate) fn status(&self) -> u16 {
        self.status
    }

    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Reads the next body fragment, or `None` at end of body.
    pub(crate) async fn read_some(&mut self) -> io::Result<Option<Bytes>> {
        let mut buf = vec![0u8; ENGINE_COPY_CHUNK];
        match &mut self.body {
            BodyKind::None => Ok(None),
            BodyKind::Limited(remaining) => {
                if *remaining == 0 {
                    return Ok(None);
                }
                let want = (*remaining).min(buf.len() as u64) as usize;
                let n = self.reader.read(&mut buf[..want]).await?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "engine closed connection inside response body",
                    ));
                }
                *remaining -= n as u64;
                buf.truncate(n);
                Ok(Some(Bytes::from(buf)))
            }
            BodyKind::UntilClose => {
                let n = self.reader.read(&mut buf).await?;
                if n == 0 {
                    return Ok(None);
                }
                buf.truncate(n);
                Ok(Some(Bytes::from(buf)))
            }
            BodyKind::Chunked { remaining, done } => {
                if *done {
                    return Ok(None);
                }
                if *remaining == 0 {
                    let size = read_chunk_size(&mut self.reader).await?;
                    if size == 0 {
                        // Drain trailers up to the final blank line.
                        loop {
                            let mut line = String::new();
                            let n = self.reader.read_line(&mut line).await?;
                            if n == 0 || line.trim_end_matches(['\r', '\n']).is_empty() {
                                break;
                            }
                        }
                        *done = true;
                        return Ok(None);
                    }
                    *remaining = size;
                }
                let want = (*remaining).min(buf.len() as u64) as usize;
                let n = self.reader.read(&mut buf[..want]).await?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "engine closed connection inside chunk",
                    ));
                }
                *remaining -= n as u64;
                if *remaining == 0 {
                    let mut crlf = [0u8; 2];
                    self.reader.read_exact(&mut crlf).await?;
                }
                buf.truncate(n);
                Ok(Some(Bytes::from(buf)))
            }
        }
    }

    /// Reads and concatenates the entire body.
    pub(crate) async fn read_to_end(&mut self) -> io::Result<Bytes> {
        let mut collected = Vec::new();
        while let Some(fragment) = self.read_some().await? {
            collected.extend_from_slice(&fragment);
        }
        Ok(Bytes::from(collected))
    }

    /// Extracts the engine's error message from a failed response body.
    pub(crate) async fn error_message(&mut self) -> String {
        let body = match self.read_to_end().await {
            Ok(body) => body,
            Err(err) => return err.to_string(),
        };
        match serde_json::from_slice::<serde_json::Value>(&body) {
            Ok(value) => value
                .get("message")
                .and_then(|message| message.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| String::from_utf8_lossy(&body).trim().to_string()),
            Err(_) => String::from_utf8_lossy(&body).trim().to_string(),
        }
    }

    /// Hands over the raw connection after a successful upgrade.
    ///
    /// Bytes the engine sent after the head are still buffered in the reader
    /// and are delivered first.
    pub(crate) fn into_attach(self) -> AttachStream {
        AttachStream {
            reader: Box::new(self.reader),
            writer: Box::new(self.writer),
        }
    }
}

async fn read_chunk_size(reader: &mut BufReader<OwnedReadHalf>) -> io::Result<u64> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "engine closed connection before chunk size",
        ));
    }
    let size = line
        .trim_end_matches(['\r', '\n'])
        .split(';')
        .next()
        .unwrap_or("");
    u64::from_str_radix(size.trim(), 16).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("malformed chunk size: {line:?}"),
        )
    })
}

// =============================================================================
// Query Encoding
// =============================================================================

/// Percent-encodes a query parameter value.
pub(crate) fn query_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                escaped.push(byte as char);
            }
            _ => escaped.push_str(&format!("%{byte:02X}")),
        }
    }
    escaped
}
