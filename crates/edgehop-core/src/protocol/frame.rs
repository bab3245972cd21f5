//! Length-prefixed packet framing over an ordered byte stream.
//!
//! Each frame is a 4-byte big-endian payload length followed by exactly that
//! many bytes. [`FrameBuffer`] is the pure buffering core: bytes are fed in,
//! whole frames come out, and reads never cross a frame boundary.
//! [`PacketStream`] drives a `FrameBuffer` over any async byte stream and is
//! what the connection actors use.
//!
//! A length prefix above [`MAX_MESSAGE_LENGTH`] is rejected as soon as the
//! header is visible, before any of the payload arrives.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::codec::{ProtocolError, MAX_MESSAGE_LENGTH};

/// How much we pull off the underlying stream per read.
const READ_CHUNK: usize = 4096;

/// Errors surfaced by [`PacketStream`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The peer closed the stream in the middle of a frame.
    #[error("stream closed mid-frame with {buffered} byte(s) pending")]
    TruncatedFrame { buffered: usize },
}

/// Buffering state machine for length-prefixed frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: Vec<u8>,
    /// Remaining byte count of the current frame, or 0 when the next header
    /// has not been consumed yet.
    current: usize,
    input_shutdown: bool,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw stream bytes and consumes any now-visible frame header.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLong`] when a header announces a
    /// frame above [`MAX_MESSAGE_LENGTH`].
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.buffer.extend_from_slice(bytes);
        self.consume_header()
    }

    /// True when a whole frame is buffered.
    pub fn is_ready(&self) -> bool {
        self.current != 0 && self.buffer.len() >= self.current
    }

    /// Remaining bytes of the current frame, or 0 if no whole frame is
    /// buffered yet.
    pub fn size(&self) -> usize {
        if self.is_ready() {
            self.current
        } else {
            0
        }
    }

    /// Reads up to `n` bytes from the current frame only. Returns an empty
    /// vector when no whole frame is buffered; never returns bytes from two
    /// frames in one call.
    pub fn read(&mut self, n: usize) -> Vec<u8> {
        if n == 0 || !self.is_ready() {
            return Vec::new();
        }
        let n = n.min(self.current);
        let out: Vec<u8> = self.buffer.drain(..n).collect();
        self.current -= n;
        // Finished this frame: pull the next header if it is already here.
        // A too-long next frame surfaces on the following feed().
        let _ = self.consume_header();
        out
    }

    /// Removes and returns the next whole frame, if one is buffered.
    pub fn pop_frame(&mut self) -> Option<Vec<u8>> {
        if !self.is_ready() {
            return None;
        }
        let size = self.current;
        Some(self.read(size))
    }

    /// Marks the input side closed. The closure is deferred until any
    /// buffered whole frame has been consumed.
    pub fn shutdown_input(&mut self) {
        self.input_shutdown = true;
    }

    /// True once the input is shut down and no whole frame remains.
    pub fn is_drained(&self) -> bool {
        self.input_shutdown && !self.is_ready()
    }

    /// Bytes sitting in the buffer (partial frames included).
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn consume_header(&mut self) -> Result<(), ProtocolError> {
        if self.current == 0 && self.buffer.len() >= 4 {
            let length = u32::from_be_bytes([
                self.buffer[0],
                self.buffer[1],
                self.buffer[2],
                self.buffer[3],
            ]);
            if length > MAX_MESSAGE_LENGTH {
                return Err(ProtocolError::FrameTooLong {
                    length,
                    max: MAX_MESSAGE_LENGTH,
                });
            }
            self.buffer.drain(..4);
            self.current = length as usize;
        }
        Ok(())
    }
}

/// Encodes one frame: length prefix plus payload.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// A framed message stream over any async byte transport (TCP or TLS).
pub struct PacketStream<S> {
    stream: S,
    incoming: FrameBuffer,
}

impl<S: AsyncRead + AsyncWrite + Unpin> PacketStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            incoming: FrameBuffer::new(),
        }
    }

    /// Reads the next whole frame. Returns `None` on a clean close at a
    /// frame boundary.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TruncatedFrame`] when the stream ends inside a
    /// frame and [`FrameError::Protocol`] for an oversize header.
    pub async fn read_message(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        loop {
            if let Some(frame) = self.incoming.pop_frame() {
                return Ok(Some(frame));
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                if self.incoming.buffered() == 0 {
                    return Ok(None);
                }
                return Err(FrameError::TruncatedFrame {
                    buffered: self.incoming.buffered(),
                });
            }
            self.incoming.feed(&chunk[..n])?;
        }
    }

    /// Writes one frame: length prefix then payload, flushed.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Io`] when the underlying stream fails.
    pub async fn write_message(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        self.stream.write_all(&encode_frame(payload)).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Shuts the write side down, letting queued bytes drain first.
    pub async fn shutdown(&mut self) -> Result<(), FrameError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_frame(buf: &mut FrameBuffer, payload: &[u8]) {
        buf.feed(&encode_frame(payload)).expect("feed failed");
    }

    #[test]
    fn test_whole_frame_round_trips() {
        let mut buf = FrameBuffer::new();
        feed_frame(&mut buf, b"CALV");
        assert!(buf.is_ready());
        assert_eq!(buf.size(), 4);
        assert_eq!(buf.read(4), b"CALV");
        assert!(!buf.is_ready());
    }

    #[test]
    fn test_read_returns_nothing_until_whole_frame_arrives() {
        let mut buf = FrameBuffer::new();
        let wire = encode_frame(b"DMMV1234");
        // Feed all but the final byte.
        buf.feed(&wire[..wire.len() - 1]).unwrap();
        assert!(!buf.is_ready());
        assert_eq!(buf.size(), 0);
        assert!(buf.read(8).is_empty());
        // Last byte completes the frame.
        buf.feed(&wire[wire.len() - 1..]).unwrap();
        assert_eq!(buf.read(8), b"DMMV1234");
    }

    #[test]
    fn test_read_never_crosses_frame_boundary() {
        let mut buf = FrameBuffer::new();
        feed_frame(&mut buf, b"first");
        feed_frame(&mut buf, b"second");
        // Ask for far more than the first frame holds.
        assert_eq!(buf.read(1000), b"first");
        assert_eq!(buf.read(1000), b"second");
    }

    #[test]
    fn test_partial_reads_drain_one_frame() {
        let mut buf = FrameBuffer::new();
        feed_frame(&mut buf, b"abcdef");
        assert_eq!(buf.read(2), b"ab");
        assert_eq!(buf.size(), 4);
        assert_eq!(buf.read(4), b"cdef");
        assert_eq!(buf.size(), 0);
    }

    #[test]
    fn test_two_writes_produce_two_reads_never_concatenated() {
        let mut buf = FrameBuffer::new();
        let mut wire = encode_frame(b"hello");
        wire.extend_from_slice(&encode_frame(b"world"));
        buf.feed(&wire).unwrap();
        assert_eq!(buf.pop_frame().as_deref(), Some(&b"hello"[..]));
        assert_eq!(buf.pop_frame().as_deref(), Some(&b"world"[..]));
        assert_eq!(buf.pop_frame(), None);
    }

    #[test]
    fn test_empty_frame_is_valid() {
        let mut buf = FrameBuffer::new();
        buf.feed(&encode_frame(b"")).unwrap();
        // A zero-length frame never becomes "ready"; it is indistinguishable
        // from no frame, matching a size() of 0.
        assert_eq!(buf.size(), 0);
    }

    #[test]
    fn test_oversize_header_is_rejected() {
        let mut buf = FrameBuffer::new();
        let header = (MAX_MESSAGE_LENGTH + 1).to_be_bytes();
        let result = buf.feed(&header);
        assert!(matches!(result, Err(ProtocolError::FrameTooLong { .. })));
    }

    #[test]
    fn test_frame_at_exactly_max_length_is_accepted() {
        let mut buf = FrameBuffer::new();
        buf.feed(&MAX_MESSAGE_LENGTH.to_be_bytes()).unwrap();
        assert!(!buf.is_ready());
    }

    #[test]
    fn test_shutdown_deferred_while_frame_buffered() {
        let mut buf = FrameBuffer::new();
        feed_frame(&mut buf, b"tail");
        buf.shutdown_input();
        assert!(!buf.is_drained());
        buf.read(4);
        assert!(buf.is_drained());
    }

    #[tokio::test]
    async fn test_packet_stream_round_trips_over_duplex() {
        let (a, b) = tokio::io::duplex(1024);
        let mut writer = PacketStream::new(a);
        let mut reader = PacketStream::new(b);

        writer.write_message(b"CALV").await.unwrap();
        writer.write_message(b"CNOP").await.unwrap();

        assert_eq!(reader.read_message().await.unwrap().as_deref(), Some(&b"CALV"[..]));
        assert_eq!(reader.read_message().await.unwrap().as_deref(), Some(&b"CNOP"[..]));
    }

    #[tokio::test]
    async fn test_packet_stream_reports_clean_close() {
        let (a, b) = tokio::io::duplex(1024);
        let mut writer = PacketStream::new(a);
        let mut reader = PacketStream::new(b);

        writer.write_message(b"CBYE").await.unwrap();
        drop(writer);

        assert_eq!(reader.read_message().await.unwrap().as_deref(), Some(&b"CBYE"[..]));
        assert!(reader.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_packet_stream_reports_truncated_frame() {
        let (mut a, b) = tokio::io::duplex(1024);
        let mut reader = PacketStream::new(b);

        // Announce 10 bytes but deliver 3, then close.
        a.write_all(&10u32.to_be_bytes()).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);

        let result = reader.read_message().await;
        assert!(matches!(result, Err(FrameError::TruncatedFrame { .. })));
    }
}
