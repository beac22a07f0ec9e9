//! Length-prefixed message framing over a duplex byte stream
//!
//! Every message on the worker connection is an 8-byte little-endian `u64`
//! length followed by that many payload bytes.
//!
//! ```text
//! +----------------+---------------------------+
//! | len: u64 (LE)  | payload (len bytes)       |
//! +----------------+---------------------------+
//! ```
//!
//! The write half is shared by every caller of a dispatcher, so [`FrameWriter`]
//! serializes whole frames behind an async mutex. The read half has exactly
//! one owner, so [`FrameReader`] takes `&mut self`.
//!
//! A `write_message` future dropped mid-frame leaves a partial frame on the
//! stream. Writers whose callers can be cancelled must run writes on a task
//! of their own.

use crate::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 8;

/// Maximum bytes pulled from the stream per read
pub const RECV_BUFFER_SIZE: usize = 8192;

/// Default upper bound on a single payload (64 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 64 * 1024 * 1024;

/// Encode a payload as a complete frame (prefix + payload)
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Try to decode one frame from the front of `buf`
///
/// Returns `Ok(None)` when more bytes are needed, or the payload together with
/// the number of bytes the frame occupied.
///
/// # Errors
/// `Error::Protocol` if the length prefix exceeds `max_message_size` or the
/// frame size overflows `usize`.
pub fn decode_frame(buf: &[u8], max_message_size: u64) -> Result<Option<(Vec<u8>, usize)>> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    prefix.copy_from_slice(&buf[..LENGTH_PREFIX_SIZE]);
    let len = u64::from_le_bytes(prefix);

    if len > max_message_size {
        return Err(Error::Protocol(format!(
            "frame length {} exceeds maximum message size {}",
            len, max_message_size
        )));
    }

    let total = usize::try_from(len)
        .ok()
        .and_then(|len| len.checked_add(LENGTH_PREFIX_SIZE))
        .ok_or_else(|| {
            Error::Protocol(format!("frame length {} does not fit in memory", len))
        })?;
    if buf.len() < total {
        return Ok(None);
    }

    Ok(Some((buf[LENGTH_PREFIX_SIZE..total].to_vec(), total)))
}

/// Map stream-level I/O failures that mean "peer went away" onto `ConnectionClosed`
fn map_io_error(err: std::io::Error) -> Error {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::UnexpectedEof => Error::ConnectionClosed,
        _ => Error::Io(err),
    }
}

/// Shared write half of a framed connection
///
/// Each `write_message` holds the lock for the prefix, the payload and the
/// flush, so frames from concurrent writers never interleave.
pub struct FrameWriter<W> {
    inner: Mutex<W>,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wrap a write half
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(writer),
        }
    }

    /// Write one complete frame
    pub async fn write_message(&self, payload: &[u8]) -> Result<()> {
        let prefix = (payload.len() as u64).to_le_bytes();

        let mut writer = self.inner.lock().await;
        writer.write_all(&prefix).await.map_err(map_io_error)?;
        writer.write_all(payload).await.map_err(map_io_error)?;
        writer.flush().await.map_err(map_io_error)?;

        trace!(bytes = payload.len(), "Wrote frame");
        Ok(())
    }

    /// Shut down the write direction of the stream
    pub async fn shutdown(&self) -> Result<()> {
        let mut writer = self.inner.lock().await;
        writer.shutdown().await.map_err(map_io_error)
    }
}

/// Exclusive read half of a framed connection
pub struct FrameReader<R> {
    inner: R,
    /// Bytes received but not yet returned as a frame
    pending: Vec<u8>,
    chunk: Box<[u8]>,
    max_message_size: u64,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Wrap a read half with the default maximum message size
    pub fn new(reader: R) -> Self {
        Self::with_max_message_size(reader, DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Wrap a read half with an explicit maximum message size
    pub fn with_max_message_size(reader: R, max_message_size: u64) -> Self {
        Self {
            inner: reader,
            pending: Vec::new(),
            chunk: vec![0u8; RECV_BUFFER_SIZE].into_boxed_slice(),
            max_message_size,
        }
    }

    /// Block until one full message is available and return its payload
    ///
    /// # Errors
    /// - `Error::ConnectionClosed` if the stream ends before a complete frame
    /// - `Error::Protocol` if the length prefix is over the size limit
    pub async fn read_message(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some((payload, consumed)) = decode_frame(&self.pending, self.max_message_size)? {
                self.pending.drain(..consumed);
                trace!(bytes = payload.len(), "Read frame");
                return Ok(payload);
            }

            let n = self.inner.read(&mut self.chunk).await.map_err(map_io_error)?;
            if n == 0 {
                if !self.pending.is_empty() {
                    debug!(
                        buffered = self.pending.len(),
                        "Peer closed connection mid-frame"
                    );
                }
                return Err(Error::ConnectionClosed);
            }
            self.pending.extend_from_slice(&self.chunk[..n]);
        }
    }
}
