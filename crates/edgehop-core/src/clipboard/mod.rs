//! Clipboard slots, the marshalled clipboard format, and ownership state.
//!
//! Two logical clipboards exist fleet-wide: the selection (0) and the
//! general clipboard (1). A marshalled clipboard is a big-endian
//! `u32 format count` followed by `{u32 format id, u32 size, bytes}` entries;
//! receivers drop entries whose format id they do not recognize.

pub mod chunk;

pub use chunk::{ChunkAssembler, ChunkMark, chunk_clipboard};

use crate::protocol::codec::ProtocolError;

/// Default ceiling on a clipboard transfer (100 MB). Larger slots are
/// skipped with a warning instead of being pushed to a newly entered screen.
pub const DEFAULT_SHARING_LIMIT: usize = 100 * 1024 * 1024;

/// The two logical clipboard slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClipboardId {
    Selection = 0,
    General = 1,
}

/// Number of clipboard slots; iterate `ClipboardId::all()` rather than
/// hardcoding either slot.
pub const CLIPBOARD_COUNT: usize = 2;

impl ClipboardId {
    pub fn all() -> [ClipboardId; CLIPBOARD_COUNT] {
        [ClipboardId::Selection, ClipboardId::General]
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for ClipboardId {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ClipboardId::Selection),
            1 => Ok(ClipboardId::General),
            other => Err(ProtocolError::Malformed(format!(
                "invalid clipboard id {other}"
            ))),
        }
    }
}

/// Well-known marshalled format ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ClipboardFormat {
    Text = 0,
    Html = 1,
    Bitmap = 2,
}

impl ClipboardFormat {
    fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(ClipboardFormat::Text),
            1 => Some(ClipboardFormat::Html),
            2 => Some(ClipboardFormat::Bitmap),
            _ => None,
        }
    }
}

/// Clipboard contents as a set of formats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClipboardData {
    formats: Vec<(ClipboardFormat, Vec<u8>)>,
}

impl ClipboardData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor for plain text.
    pub fn from_text(text: &str) -> Self {
        let mut data = Self::new();
        data.add(ClipboardFormat::Text, text.as_bytes().to_vec());
        data
    }

    /// Adds or replaces one format.
    pub fn add(&mut self, format: ClipboardFormat, bytes: Vec<u8>) {
        self.formats.retain(|(f, _)| *f != format);
        self.formats.push((format, bytes));
    }

    pub fn get(&self, format: ClipboardFormat) -> Option<&[u8]> {
        self.formats
            .iter()
            .find(|(f, _)| *f == format)
            .map(|(_, b)| b.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// Serializes to the wire representation.
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.formats.len() as u32).to_be_bytes());
        for (format, bytes) in &self.formats {
            out.extend_from_slice(&(*format as u32).to_be_bytes());
            out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(bytes);
        }
        out
    }

    /// Deserializes the wire representation, discarding unknown format ids.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] when the buffer is truncated.
    pub fn unmarshal(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut pos = 0usize;
        let count = read_u32(buf, &mut pos)? as usize;
        let mut data = Self::new();
        for _ in 0..count {
            let format_id = read_u32(buf, &mut pos)?;
            let size = read_u32(buf, &mut pos)? as usize;
            if buf.len() - pos < size {
                return Err(ProtocolError::Malformed(format!(
                    "clipboard format {format_id} declares {size} bytes, {} remain",
                    buf.len() - pos
                )));
            }
            let bytes = buf[pos..pos + size].to_vec();
            pos += size;
            if let Some(format) = ClipboardFormat::from_id(format_id) {
                data.add(format, bytes);
            }
        }
        Ok(data)
    }
}

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32, ProtocolError> {
    if buf.len() - *pos < 4 {
        return Err(ProtocolError::Malformed(
            "truncated marshalled clipboard".into(),
        ));
    }
    let v = u32::from_be_bytes([buf[*pos], buf[*pos + 1], buf[*pos + 2], buf[*pos + 3]]);
    *pos += 4;
    Ok(v)
}

/// Per-slot ownership and transfer state, tracked for each connection on the
/// server and for the local screen on clients.
#[derive(Debug, Clone, Default)]
pub struct SlotState {
    /// Whether the tracked screen currently owns this slot.
    pub own: bool,
    /// Whether the current contents have been pushed to this connection.
    pub sent: bool,
    /// Highest grab sequence observed for this slot.
    pub last_sequence: u32,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
