//! Chunked clipboard transfer.
//!
//! A transfer is a `Start` chunk whose data is the total size as an ASCII
//! decimal string, zero or more `Data` chunks carrying marshalled bytes, and
//! an `End` chunk. The assembler validates that the accumulated size matches
//! the announced total before handing the blob back.

use tracing::{debug, warn};

use crate::clipboard::ClipboardId;
use crate::protocol::codec::ProtocolError;
use crate::protocol::messages::Message;

/// Payload size carried per `Data` chunk.
pub const CHUNK_SIZE: usize = 512 * 1024;

/// Position of a chunk within a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkMark {
    Start = 1,
    Data = 2,
    End = 3,
}

impl TryFrom<u8> for ChunkMark {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ChunkMark::Start),
            2 => Ok(ChunkMark::Data),
            3 => Ok(ChunkMark::End),
            other => Err(ProtocolError::Malformed(format!(
                "invalid chunk mark {other}"
            ))),
        }
    }
}

/// Splits a marshalled clipboard into the `DCLP` message sequence.
pub fn chunk_clipboard(id: ClipboardId, sequence: u32, marshalled: &[u8]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(2 + marshalled.len() / CHUNK_SIZE);
    messages.push(Message::ClipboardData {
        id,
        sequence,
        mark: ChunkMark::Start,
        data: marshalled.len().to_string().into_bytes(),
    });
    for piece in marshalled.chunks(CHUNK_SIZE) {
        messages.push(Message::ClipboardData {
            id,
            sequence,
            mark: ChunkMark::Data,
            data: piece.to_vec(),
        });
    }
    messages.push(Message::ClipboardData {
        id,
        sequence,
        mark: ChunkMark::End,
        data: Vec::new(),
    });
    messages
}

/// Reassembles an inbound chunk sequence.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    expected: usize,
    buffer: Vec<u8>,
    in_progress: bool,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk. Returns the completed blob on `End`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] for an out-of-order chunk, an
    /// unparseable size announcement, or a size mismatch at `End`.
    pub fn accept(
        &mut self,
        mark: ChunkMark,
        data: &[u8],
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        match mark {
            ChunkMark::Start => {
                let text = std::str::from_utf8(data)
                    .map_err(|_| ProtocolError::Malformed("chunk size is not UTF-8".into()))?;
                self.expected = text
                    .parse()
                    .map_err(|_| ProtocolError::Malformed(format!("bad chunk size {text:?}")))?;
                self.buffer.clear();
                self.in_progress = true;
                debug!(expected = self.expected, "start receiving clipboard data");
                Ok(None)
            }
            ChunkMark::Data => {
                if !self.in_progress {
                    return Err(ProtocolError::Malformed(
                        "data chunk without a start chunk".into(),
                    ));
                }
                self.buffer.extend_from_slice(data);
                Ok(None)
            }
            ChunkMark::End => {
                if !self.in_progress {
                    return Err(ProtocolError::Malformed(
                        "end chunk without a start chunk".into(),
                    ));
                }
                self.in_progress = false;
                if self.buffer.len() != self.expected {
                    warn!(
                        expected = self.expected,
                        actual = self.buffer.len(),
                        "corrupted clipboard data"
                    );
                    return Err(ProtocolError::Malformed(format!(
                        "clipboard transfer expected {} byte(s), got {}",
                        self.expected,
                        self.buffer.len()
                    )));
                }
                Ok(Some(std::mem::take(&mut self.buffer)))
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn run_transfer(payload: &[u8]) -> Vec<u8> {
        let messages = chunk_clipboard(ClipboardId::General, 7, payload);
        let mut assembler = ChunkAssembler::new();
        let mut result = None;
        for msg in messages {
            let Message::ClipboardData { mark, data, .. } = msg else {
                panic!("chunker produced a non-clipboard message");
            };
            if let Some(blob) = assembler.accept(mark, &data).unwrap() {
                result = Some(blob);
            }
        }
        result.expect("transfer did not complete")
    }

    #[test]
    fn test_small_payload_round_trips_in_one_data_chunk() {
        assert_eq!(run_transfer(b"hello"), b"hello");
    }

    #[test]
    fn test_empty_payload_round_trips_with_no_data_chunks() {
        let messages = chunk_clipboard(ClipboardId::Selection, 1, b"");
        assert_eq!(messages.len(), 2);
        assert_eq!(run_transfer(b""), b"");
    }

    #[test]
    fn test_large_payload_splits_into_multiple_chunks() {
        let payload = vec![0xAB; CHUNK_SIZE * 2 + 17];
        let messages = chunk_clipboard(ClipboardId::General, 2, &payload);
        // Start + 3 data chunks + end.
        assert_eq!(messages.len(), 5);
        assert_eq!(run_transfer(&payload), payload);
    }

    #[test]
    fn test_start_chunk_announces_decimal_size() {
        let messages = chunk_clipboard(ClipboardId::General, 3, b"hello");
        let Message::ClipboardData { mark, data, .. } = &messages[0] else {
            panic!("not a clipboard message");
        };
        assert_eq!(*mark, ChunkMark::Start);
        assert_eq!(data, b"5");
    }

    #[test]
    fn test_chunks_carry_the_grab_sequence() {
        for msg in chunk_clipboard(ClipboardId::General, 42, b"x") {
            let Message::ClipboardData { sequence, .. } = msg else {
                panic!("not a clipboard message");
            };
            assert_eq!(sequence, 42);
        }
    }

    #[test]
    fn test_assembler_rejects_size_mismatch_at_end() {
        let mut assembler = ChunkAssembler::new();
        assembler.accept(ChunkMark::Start, b"10").unwrap();
        assembler.accept(ChunkMark::Data, b"abc").unwrap();
        let result = assembler.accept(ChunkMark::End, b"");
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_assembler_rejects_data_before_start() {
        let mut assembler = ChunkAssembler::new();
        let result = assembler.accept(ChunkMark::Data, b"abc");
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_assembler_rejects_garbage_size() {
        let mut assembler = ChunkAssembler::new();
        let result = assembler.accept(ChunkMark::Start, b"not-a-number");
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_restarted_transfer_discards_previous_buffer() {
        let mut assembler = ChunkAssembler::new();
        assembler.accept(ChunkMark::Start, b"3").unwrap();
        assembler.accept(ChunkMark::Data, b"ab").unwrap();
        // A new start resets the state.
        assembler.accept(ChunkMark::Start, b"2").unwrap();
        assembler.accept(ChunkMark::Data, b"xy").unwrap();
        let blob = assembler.accept(ChunkMark::End, b"").unwrap();
        assert_eq!(blob.as_deref(), Some(&b"xy"[..]));
    }
}
