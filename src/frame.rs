//! Length-prefixed frame codec for the wire protocol
//!
//! Wire unit: a 4-byte unsigned little-endian length prefix N, followed by
//! exactly N raw payload bytes. One frame in, one frame out per connection;
//! the codec carries no state between connections.

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a declared frame length (64 MiB). Anything larger is
/// treated as a protocol violation and the connection is aborted.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Chunk size for the body read loop. A single read is never assumed to
/// satisfy the declared length.
const RECV_CHUNK: usize = 8192;

/// Errors raised while decoding a frame from a peer
#[derive(Debug)]
pub enum ProtocolError {
    /// Peer closed the connection before the 4-byte length prefix arrived
    ShortHeader { received: usize },
    /// Peer closed the connection before the declared payload arrived
    ShortBody { expected: usize, received: usize },
    /// Declared length exceeds [`MAX_FRAME_LEN`]
    Oversized { declared: usize },
    /// Transport-level I/O failure
    Io(std::io::Error),
}

impl ProtocolError {
    /// Short stable label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolError::ShortHeader { .. } => "short_header",
            ProtocolError::ShortBody { .. } => "short_body",
            ProtocolError::Oversized { .. } => "oversized",
            ProtocolError::Io(_) => "io",
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::ShortHeader { received } => {
                write!(f, "connection closed after {} of 4 header bytes", received)
            }
            ProtocolError::ShortBody { expected, received } => {
                write!(
                    f,
                    "connection closed after {} of {} payload bytes",
                    received, expected
                )
            }
            ProtocolError::Oversized { declared } => {
                write!(
                    f,
                    "declared frame length {} exceeds maximum {}",
                    declared, MAX_FRAME_LEN
                )
            }
            ProtocolError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        ProtocolError::Io(e)
    }
}

/// Read one frame from the stream.
///
/// Reads exactly 4 header bytes, then the declared number of payload bytes
/// in bounded increments. A declared length of 0 is valid and yields an
/// empty payload with no body read attempted.
pub async fn read_frame<R>(stream: &mut R) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    let mut received = 0;
    while received < header.len() {
        let n = stream.read(&mut header[received..]).await?;
        if n == 0 {
            return Err(ProtocolError::ShortHeader { received });
        }
        received += n;
    }

    let declared = u32::from_le_bytes(header) as usize;
    if declared == 0 {
        return Ok(Vec::new());
    }
    if declared > MAX_FRAME_LEN {
        return Err(ProtocolError::Oversized { declared });
    }

    let mut payload = vec![0u8; declared];
    let mut received = 0;
    while received < declared {
        let end = (received + RECV_CHUNK).min(declared);
        let n = stream.read(&mut payload[received..end]).await?;
        if n == 0 {
            return Err(ProtocolError::ShortBody {
                expected: declared,
                received,
            });
        }
        received += n;
    }

    Ok(payload)
}

/// Write one frame (length prefix + payload) to the stream.
pub async fn write_frame<W>(stream: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = payload.len() as u32;
    stream.write_all(&len.to_le_bytes()).await?;
    if !payload.is_empty() {
        stream.write_all(payload).await?;
    }
    stream.flush().await
}
