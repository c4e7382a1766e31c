use presence_core::documents::HandshakeDocument;
use presence_core::ipc_frame::{
    encode_frame, encode_json_frame, FrameDecoder, FrameError, Opcode, DEFAULT_MAX_FRAME_BYTES,
};
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

pub const MAX_RECONNECT_BUDGET: u32 = 5;
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);
const ENDPOINT_PREFIX: &str = "discord-ipc-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Offline,
    Connected,
    Authenticated,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("endpoint gone: {0}")]
    EndpointGone(String),
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("timed out during {0}")]
    Timeout(&'static str),
    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),
    #[error("io error: {0}")]
    Io(String),
}

impl TransportError {
    fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => TransportError::EndpointGone(err.to_string()),
            io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => {
                TransportError::Refused(err.to_string())
            }
            io::ErrorKind::TimedOut => TransportError::Timeout("io"),
            _ => TransportError::Io(err.to_string()),
        }
    }

    /// Gone and refused endpoints have nothing to retry against.
    fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TransportError::EndpointGone(_) | TransportError::Refused(_)
        )
    }
}

pub trait IpcStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> IpcStream for T {}

type BoxedStream = Box<dyn IpcStream>;

#[cfg(unix)]
pub fn endpoint_path(runtime_dir: &Path, slot: usize) -> PathBuf {
    runtime_dir.join(format!("{ENDPOINT_PREFIX}{slot}"))
}

#[cfg(windows)]
pub fn endpoint_path(_runtime_dir: &Path, slot: usize) -> PathBuf {
    PathBuf::from(format!(r"\\?\pipe\{ENDPOINT_PREFIX}{slot}"))
}

#[cfg(unix)]
async fn open_endpoint(path: &Path) -> io::Result<BoxedStream> {
    let stream = tokio::net::UnixStream::connect(path).await?;
    Ok(Box::new(stream))
}

#[cfg(windows)]
async fn open_endpoint(path: &Path) -> io::Result<BoxedStream> {
    let pipe = tokio::net::windows::named_pipe::ClientOptions::new().open(path)?;
    Ok(Box::new(pipe))
}

pub fn handshake_frame(handshake: &HandshakeDocument) -> Result<Arc<[u8]>, FrameError> {
    encode_json_frame(Opcode::Handshake, handshake, DEFAULT_MAX_FRAME_BYTES).map(Arc::from)
}

/// One local IPC link. All transitions go through `&mut self`, so a single
/// owner drives it and no operation outlives the connection.
pub struct TransportConnection {
    endpoint: PathBuf,
    state: ConnectionState,
    stream: Option<BoxedStream>,
    handshake: Arc<[u8]>,
    reconnect_budget: u32,
    pending: Option<String>,
    decoder: FrameDecoder,
    io_timeout: Duration,
}

impl TransportConnection {
    pub fn new(endpoint: PathBuf, handshake: Arc<[u8]>, io_timeout: Duration) -> Self {
        Self {
            endpoint,
            state: ConnectionState::Offline,
            stream: None,
            handshake,
            reconnect_budget: 0,
            pending: None,
            decoder: FrameDecoder::default(),
            io_timeout,
        }
    }

    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[cfg(test)]
    pub fn reconnect_budget(&self) -> u32 {
        self.reconnect_budget
    }

    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    /// Opens the endpoint if needed and runs the handshake. Errors leave the
    /// connection offline and are not retried here.
    pub async fn connect(&mut self) -> ConnectionState {
        if let Err(err) = self.try_connect().await {
            self.go_offline(&err);
        }
        self.state
    }

    pub async fn queue(&mut self, payload: String) -> ConnectionState {
        self.reconnect_budget = (self.reconnect_budget + 1).min(MAX_RECONNECT_BUDGET);
        self.pending = Some(payload);
        self.send().await
    }

    /// Sends the cached payload, reconnecting while budget remains.
    pub async fn send(&mut self) -> ConnectionState {
        loop {
            match self.try_send().await {
                Ok(()) => return self.state,
                Err(err) => {
                    if !self.on_error(err) {
                        return self.state;
                    }
                }
            }
        }
    }

    pub fn close(&mut self) {
        if self.stream.is_some() {
            debug!(event = "ipc_close", endpoint = %self.endpoint.display());
        }
        self.stream = None;
        self.state = ConnectionState::Offline;
        self.pending = None;
        self.decoder.clear();
    }

    async fn try_connect(&mut self) -> Result<(), TransportError> {
        if self.state == ConnectionState::Offline {
            let stream = open_endpoint(&self.endpoint)
                .await
                .map_err(TransportError::from_io)?;
            self.stream = Some(stream);
            self.decoder.clear();
            self.state = ConnectionState::Connected;
            debug!(event = "ipc_open", endpoint = %self.endpoint.display());
        }
        if self.state == ConnectionState::Connected {
            let handshake = self.handshake.clone();
            self.write_all(&handshake).await?;
            let echoed = self.read_echo().await?;
            if echoed == handshake.len() {
                self.state = ConnectionState::Authenticated;
                info!(event = "ipc_authenticated", endpoint = %self.endpoint.display());
            } else {
                warn!(
                    event = "ipc_handshake_mismatch",
                    endpoint = %self.endpoint.display(),
                    sent = handshake.len(),
                    echoed
                );
            }
        }
        Ok(())
    }

    async fn try_send(&mut self) -> Result<(), TransportError> {
        if self.state != ConnectionState::Authenticated {
            self.try_connect().await?;
            if self.state != ConnectionState::Authenticated {
                debug!(event = "ipc_send_deferred", endpoint = %self.endpoint.display());
                return Ok(());
            }
        }
        let Some(payload) = self.pending.as_deref() else {
            return Ok(());
        };
        let frame = encode_frame(Opcode::Frame, payload.as_bytes(), DEFAULT_MAX_FRAME_BYTES)?;
        self.write_all(&frame).await?;
        let echoed = self.read_echo().await?;
        if echoed == frame.len() {
            self.reconnect_budget = self.reconnect_budget.saturating_sub(1);
            debug!(event = "ipc_presence_sent", endpoint = %self.endpoint.display(), bytes = echoed);
        } else {
            warn!(
                event = "ipc_echo_mismatch",
                endpoint = %self.endpoint.display(),
                sent = frame.len(),
                echoed
            );
            self.state = ConnectionState::Connected;
        }
        Ok(())
    }

    /// Returns true when the cached payload should be retried.
    fn on_error(&mut self, err: TransportError) -> bool {
        self.go_offline(&err);
        if !err.is_retryable() || self.reconnect_budget == 0 {
            return false;
        }
        self.reconnect_budget -= 1;
        info!(
            event = "ipc_reconnect",
            endpoint = %self.endpoint.display(),
            budget = self.reconnect_budget
        );
        true
    }

    fn go_offline(&mut self, err: &TransportError) {
        match err {
            TransportError::Refused(_) => {
                debug!(event = "ipc_unavailable", endpoint = %self.endpoint.display(), error = %err)
            }
            _ => warn!(event = "ipc_error", endpoint = %self.endpoint.display(), error = %err),
        }
        self.stream = None;
        self.decoder.clear();
        self.state = ConnectionState::Offline;
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TransportError::EndpointGone("no open stream".to_string()))?;
        let write = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        };
        match tokio::time::timeout(self.io_timeout, write).await {
            Ok(result) => result.map_err(TransportError::from_io),
            Err(_) => Err(TransportError::Timeout("write")),
        }
    }

    /// Reads one frame and reports its size on the wire. The content is an
    /// acknowledgement only and is discarded.
    async fn read_echo(&mut self) -> Result<usize, TransportError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TransportError::EndpointGone("no open stream".to_string()))?;
        let echoed = match tokio::time::timeout(
            self.io_timeout,
            read_frame_len(stream, &mut self.decoder),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout("echo")),
        };
        self.decoder.clear();
        Ok(echoed)
    }
}

async fn read_frame_len(
    stream: &mut BoxedStream,
    decoder: &mut FrameDecoder,
) -> Result<usize, TransportError> {
    let mut buf = [0u8; 4096];
    loop {
        if let Some(frame) = decoder.next_frame()? {
            return Ok(frame.wire_len());
        }
        let read = stream.read(&mut buf).await.map_err(TransportError::from_io)?;
        if read == 0 {
            return Err(TransportError::EndpointGone("closed by host".to_string()));
        }
        decoder.push_chunk(&buf[..read]);
    }
}
