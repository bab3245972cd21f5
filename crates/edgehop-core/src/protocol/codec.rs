//! Format-string driven marshalling for protocol frames.
//!
//! Every wire message is described by a format string made of literal
//! characters (the 4-byte opcode, or the hello prefix) and field specifiers:
//!
//! | Specifier | Meaning |
//! |---|---|
//! | `%1i` | 1-byte integer |
//! | `%2i` | 2-byte big-endian integer |
//! | `%4i` | 4-byte big-endian integer |
//! | `%1I` | 4-byte count, then that many 1-byte integers |
//! | `%2I` | 4-byte count, then that many 2-byte big-endian integers |
//! | `%4I` | 4-byte count, then that many 4-byte big-endian integers |
//! | `%s`  | 4-byte length, then that many opaque bytes |
//! | `%S`  | identical on the wire to `%s`; used where the byte count is supplied separately from the buffer |
//! | `%%`  | literal `%` |
//!
//! Literal characters must match the input byte-for-byte, which is how the
//! opcode at the start of each frame is recognized. Decoding a frame that is
//! shorter than its format, or that leaves unconsumed bytes, is a fatal
//! [`ProtocolError::Malformed`].

use thiserror::Error;

/// Hard cap on a single frame's payload. Frames whose 4-byte length prefix
/// exceeds this are rejected before any payload is read, bounding the memory
/// a peer can force us to buffer.
pub const MAX_MESSAGE_LENGTH: u32 = 4 * 1024 * 1024;

/// Errors produced by framing and marshalling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A frame header announced a length above [`MAX_MESSAGE_LENGTH`].
    #[error("frame of {length} bytes exceeds maximum of {max} bytes")]
    FrameTooLong { length: u32, max: u32 },

    /// A frame's bytes did not match its format string.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The first four bytes of a frame are not a known opcode.
    #[error("unknown opcode: {0:?}")]
    UnknownOpcode(String),

    /// The arguments handed to the encoder did not match the format string.
    #[error("format mismatch while encoding: {0}")]
    FormatMismatch(&'static str),
}

/// One marshalled field, typed by its wire width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Int1(u8),
    Int2(u16),
    Int4(u32),
    Vec1(Vec<u8>),
    Vec2(Vec<u16>),
    Vec4(Vec<u32>),
    Bytes(Vec<u8>),
}

/// Encodes `args` against `fmt` into a complete frame payload.
///
/// # Errors
///
/// Returns [`ProtocolError::FormatMismatch`] when the argument list does not
/// line up with the format string. That indicates a caller bug, but the
/// encoder reports it rather than panicking so the reactor never unwinds.
pub fn write_frame(fmt: &str, args: &[Item]) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(fmt.len() + 16);
    let mut next = args.iter();
    let mut chars = fmt.bytes();

    while let Some(c) = chars.next() {
        if c != b'%' {
            buf.push(c);
            continue;
        }
        let width = match chars.next() {
            Some(b'%') => {
                buf.push(b'%');
                continue;
            }
            Some(w @ (b'1' | b'2' | b'4')) => w - b'0',
            Some(b's') | Some(b'S') => {
                let Some(Item::Bytes(data)) = next.next() else {
                    return Err(ProtocolError::FormatMismatch("%s expects a byte buffer"));
                };
                buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
                buf.extend_from_slice(data);
                continue;
            }
            _ => return Err(ProtocolError::FormatMismatch("unrecognized specifier")),
        };
        match chars.next() {
            Some(b'i') => write_int(&mut buf, width, next.next())?,
            Some(b'I') => write_vector(&mut buf, width, next.next())?,
            _ => return Err(ProtocolError::FormatMismatch("unrecognized specifier")),
        }
    }

    if next.next().is_some() {
        return Err(ProtocolError::FormatMismatch("too many arguments"));
    }
    Ok(buf)
}

/// Decodes a complete frame against `fmt`, returning the fields in order.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] when a literal fails to match, the
/// frame runs out of bytes mid-field, or bytes remain after the last field.
pub fn read_frame(fmt: &str, frame: &[u8]) -> Result<Vec<Item>, ProtocolError> {
    let mut items = Vec::new();
    let mut pos = 0usize;
    let mut chars = fmt.bytes();

    while let Some(c) = chars.next() {
        if c != b'%' {
            match frame.get(pos) {
                Some(&b) if b == c => pos += 1,
                Some(&b) => {
                    return Err(ProtocolError::Malformed(format!(
                        "literal mismatch at byte {pos}: expected {:?}, got {:?}",
                        c as char, b as char
                    )));
                }
                None => return Err(ProtocolError::Malformed("frame ends inside literal".into())),
            }
            continue;
        }
        let width = match chars.next() {
            Some(b'%') => {
                match frame.get(pos) {
                    Some(b'%') => pos += 1,
                    _ => return Err(ProtocolError::Malformed("expected literal '%'".into())),
                }
                continue;
            }
            Some(w @ (b'1' | b'2' | b'4')) => w - b'0',
            Some(b's') | Some(b'S') => {
                let data = take_counted_bytes(frame, &mut pos)?;
                items.push(Item::Bytes(data));
                continue;
            }
            _ => return Err(ProtocolError::Malformed("unrecognized specifier".into())),
        };
        match chars.next() {
            Some(b'i') => items.push(read_int(frame, &mut pos, width)?),
            Some(b'I') => items.push(read_vector(frame, &mut pos, width)?),
            _ => return Err(ProtocolError::Malformed("unrecognized specifier".into())),
        }
    }

    if pos != frame.len() {
        return Err(ProtocolError::Malformed(format!(
            "{} unconsumed byte(s) after last field",
            frame.len() - pos
        )));
    }
    Ok(items)
}

// ── Encode helpers ────────────────────────────────────────────────────────────

fn write_int(buf: &mut Vec<u8>, width: u8, arg: Option<&Item>) -> Result<(), ProtocolError> {
    match (width, arg) {
        (1, Some(Item::Int1(v))) => buf.push(*v),
        (2, Some(Item::Int2(v))) => buf.extend_from_slice(&v.to_be_bytes()),
        (4, Some(Item::Int4(v))) => buf.extend_from_slice(&v.to_be_bytes()),
        _ => return Err(ProtocolError::FormatMismatch("integer width mismatch")),
    }
    Ok(())
}

fn write_vector(buf: &mut Vec<u8>, width: u8, arg: Option<&Item>) -> Result<(), ProtocolError> {
    match (width, arg) {
        (1, Some(Item::Vec1(v))) => {
            buf.extend_from_slice(&(v.len() as u32).to_be_bytes());
            buf.extend_from_slice(v);
        }
        (2, Some(Item::Vec2(v))) => {
            buf.extend_from_slice(&(v.len() as u32).to_be_bytes());
            for x in v {
                buf.extend_from_slice(&x.to_be_bytes());
            }
        }
        (4, Some(Item::Vec4(v))) => {
            buf.extend_from_slice(&(v.len() as u32).to_be_bytes());
            for x in v {
                buf.extend_from_slice(&x.to_be_bytes());
            }
        }
        _ => return Err(ProtocolError::FormatMismatch("vector width mismatch")),
    }
    Ok(())
}

// ── Decode helpers ────────────────────────────────────────────────────────────

fn require(frame: &[u8], pos: usize, n: usize) -> Result<(), ProtocolError> {
    if frame.len() - pos < n {
        return Err(ProtocolError::Malformed(format!(
            "need {n} more byte(s) at offset {pos}, frame has {}",
            frame.len() - pos
        )));
    }
    Ok(())
}

fn read_int(frame: &[u8], pos: &mut usize, width: u8) -> Result<Item, ProtocolError> {
    require(frame, *pos, width as usize)?;
    let item = match width {
        1 => Item::Int1(frame[*pos]),
        2 => Item::Int2(u16::from_be_bytes([frame[*pos], frame[*pos + 1]])),
        _ => Item::Int4(u32::from_be_bytes([
            frame[*pos],
            frame[*pos + 1],
            frame[*pos + 2],
            frame[*pos + 3],
        ])),
    };
    *pos += width as usize;
    Ok(item)
}

fn read_vector(frame: &[u8], pos: &mut usize, width: u8) -> Result<Item, ProtocolError> {
    require(frame, *pos, 4)?;
    let count = u32::from_be_bytes([frame[*pos], frame[*pos + 1], frame[*pos + 2], frame[*pos + 3]])
        as usize;
    *pos += 4;

    let total = count
        .checked_mul(width as usize)
        .ok_or_else(|| ProtocolError::Malformed("vector count overflow".into()))?;
    require(frame, *pos, total)?;

    let item = match width {
        1 => Item::Vec1(frame[*pos..*pos + count].to_vec()),
        2 => {
            let mut v = Vec::with_capacity(count);
            for i in 0..count {
                let off = *pos + i * 2;
                v.push(u16::from_be_bytes([frame[off], frame[off + 1]]));
            }
            Item::Vec2(v)
        }
        _ => {
            let mut v = Vec::with_capacity(count);
            for i in 0..count {
                let off = *pos + i * 4;
                v.push(u32::from_be_bytes([
                    frame[off],
                    frame[off + 1],
                    frame[off + 2],
                    frame[off + 3],
                ]));
            }
            Item::Vec4(v)
        }
    };
    *pos += total;
    Ok(item)
}

fn take_counted_bytes(frame: &[u8], pos: &mut usize) -> Result<Vec<u8>, ProtocolError> {
    require(frame, *pos, 4)?;
    let len = u32::from_be_bytes([frame[*pos], frame[*pos + 1], frame[*pos + 2], frame[*pos + 3]])
        as usize;
    *pos += 4;
    require(frame, *pos, len)?;
    let data = frame[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(data)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
