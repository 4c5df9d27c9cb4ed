//! Single request/response exchange over a byte stream
//!
//! One outstanding request at a time. Every receive is bounded by the
//! configured timeout; the stream is released when the transport is dropped.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info};

use super::codec;

/// Large enough for every response in scope
pub const RECV_BUFFER_LEN: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to connect to {target}: {reason}")]
    ConnectFailed { target: String, reason: String },
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Empty response")]
    EmptyResponse,
}

impl TransportError {
    /// Failures that only affect the current probe
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::Timeout(_) | TransportError::EmptyResponse)
    }
}

/// Open a TCP connection to a Modbus device
pub async fn connect(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> Result<TcpStream, TransportError> {
    let target = format!("{}:{}", host, port);
    info!("Connecting to Modbus TCP: {}", target);

    let stream = match timeout(connect_timeout, TcpStream::connect(&target)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(TransportError::ConnectFailed {
                target,
                reason: e.to_string(),
            })
        }
        Err(_) => {
            return Err(TransportError::ConnectFailed {
                target,
                reason: format!("no answer within {:?}", connect_timeout),
            })
        }
    };

    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Drives raw ADU exchanges over an owned stream
#[derive(Debug)]
pub struct Transport<S = TcpStream> {
    stream: S,
    timeout: Duration,
}

impl Transport<TcpStream> {
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let stream = connect(host, port, connect_timeout).await?;
        Ok(Self::new(stream, timeout))
    }
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, timeout: Duration) -> Self {
        Self { stream, timeout }
    }

    /// Send one ADU and collect the reply carrying `transaction_id`
    ///
    /// Complete frames for other transactions (late replies to earlier
    /// requests) are discarded and reading continues until the deadline.
    /// Bytes after the matching frame are dropped. If the deadline passes, the
    /// peer closes or the buffer fills before a complete frame arrives, the
    /// partial bytes are returned as-is for the codec to judge.
    pub async fn send_recv(
        &mut self,
        adu: &[u8],
        transaction_id: u16,
    ) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + self.timeout;

        debug!("Sending {} bytes for transaction {}", adu.len(), transaction_id);
        match timeout_at(deadline, self.stream.write_all(adu)).await {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout(self.timeout)),
        }

        let mut pending = BytesMut::with_capacity(RECV_BUFFER_LEN);
        let mut chunk = [0u8; RECV_BUFFER_LEN];

        loop {
            while let Some(frame) = split_frame(&mut pending) {
                let received = u16::from_be_bytes([frame[0], frame[1]]);
                if received == transaction_id {
                    debug!("Received {} bytes", frame.len());
                    return Ok(frame.to_vec());
                }
                debug!(
                    "Discarding {} byte frame for stale transaction {}",
                    frame.len(),
                    received
                );
            }
            if pending.len() >= RECV_BUFFER_LEN {
                break;
            }

            let read = match timeout_at(deadline, self.stream.read(&mut chunk)).await {
                Ok(result) => result?,
                Err(_) if !pending.is_empty() => break,
                Err(_) => return Err(TransportError::Timeout(self.timeout)),
            };
            if read == 0 {
                break;
            }
            pending.extend_from_slice(&chunk[..read]);
        }

        if pending.is_empty() {
            return Err(TransportError::EmptyResponse);
        }

        pending.truncate(RECV_BUFFER_LEN);
        debug!("Received {} bytes without a complete frame", pending.len());
        Ok(pending.to_vec())
    }
}

/// Take the first complete MBAP frame off the front of `pending`
fn split_frame(pending: &mut BytesMut) -> Option<BytesMut> {
    let total = codec::expected_frame_len(pending)?;
    if pending.len() < total {
        return None;
    }
    Some(pending.split_to(total))
}
