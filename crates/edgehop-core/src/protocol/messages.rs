//! Typed wire messages and their format strings.
//!
//! Every frame is a 4-ASCII-byte opcode followed by fields marshalled per the
//! opcode's format string ([`crate::protocol::codec`]). The one exception is
//! the hello exchange, which opens with the literal protocol name
//! `"Barrier"` instead of a 4-byte opcode.
//!
//! `CINN` grew a trailing screensaver byte in protocol 1.7, so encoding and
//! parsing take the negotiated session version.

use crate::clipboard::{ChunkMark, ClipboardId};
use crate::protocol::codec::{read_frame, write_frame, Item, ProtocolError};
use crate::protocol::version::ProtocolVersion;

// ── Format strings ────────────────────────────────────────────────────────────

pub const MSG_HELLO: &str = "Barrier%2i%2i";
pub const MSG_HELLO_BACK: &str = "Barrier%2i%2i%s";
pub const MSG_NOOP: &str = "CNOP";
pub const MSG_CLOSE: &str = "CBYE";
pub const MSG_ENTER: &str = "CINN%2i%2i%4i%2i";
pub const MSG_ENTER_WITH_SAVER: &str = "CINN%2i%2i%4i%2i%1i";
pub const MSG_LEAVE: &str = "COUT";
pub const MSG_GRAB_CLIPBOARD: &str = "CCLP%1i%4i";
pub const MSG_SCREENSAVER: &str = "CSEC%1i";
pub const MSG_RESET_OPTIONS: &str = "CROP";
pub const MSG_INFO_ACK: &str = "CIAK";
pub const MSG_KEEP_ALIVE: &str = "CALV";
pub const MSG_KEY_DOWN: &str = "DKDN%2i%2i%2i";
pub const MSG_KEY_UP: &str = "DKUP%2i%2i%2i";
pub const MSG_KEY_REPEAT: &str = "DKRP%2i%2i%2i%2i";
pub const MSG_MOUSE_DOWN: &str = "DMDN%1i";
pub const MSG_MOUSE_UP: &str = "DMUP%1i";
pub const MSG_MOUSE_MOVE: &str = "DMMV%2i%2i";
pub const MSG_MOUSE_REL_MOVE: &str = "DMRM%2i%2i";
pub const MSG_MOUSE_WHEEL: &str = "DMWM%2i%2i";
pub const MSG_CLIPBOARD_DATA: &str = "DCLP%1i%4i%1i%s";
pub const MSG_INFO: &str = "DINF%2i%2i%2i%2i%2i%2i%2i";
pub const MSG_SET_OPTIONS: &str = "DSOP%4I";
pub const MSG_QUERY_INFO: &str = "QINF";
pub const MSG_FILE_TRANSFER: &str = "DFTR%1i%s";
pub const MSG_DRAG_INFO: &str = "DDRG%4i%s";
pub const MSG_ERROR_BAD: &str = "EBAD";
pub const MSG_ERROR_BUSY: &str = "EBSY";
pub const MSG_ERROR_UNKNOWN: &str = "EUNK";
pub const MSG_ERROR_INCOMPATIBLE: &str = "EICV%2i%2i";

// ── Supporting payload types ──────────────────────────────────────────────────

/// Shape and cursor position a client reports in `DINF`.
///
/// `x`/`y` are the top-left corner of the client's screen in its own
/// coordinate space, `mx`/`my` the current cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenInfo {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub cursor_x: i16,
    pub cursor_y: i16,
}

impl ScreenInfo {
    /// Clamps a point into this screen's bounds.
    pub fn clamp(&self, x: i16, y: i16) -> (i16, i16) {
        let max_x = self.x.saturating_add(self.width as i16).saturating_sub(1);
        let max_y = self.y.saturating_add(self.height as i16).saturating_sub(1);
        (x.clamp(self.x, max_x), y.clamp(self.y, max_y))
    }

    /// Whether a point lies inside this screen.
    pub fn contains(&self, x: i16, y: i16) -> bool {
        x >= self.x
            && (x as i32) < self.x as i32 + self.width as i32
            && y >= self.y
            && (y as i32) < self.y as i32 + self.height as i32
    }
}

// ── Message enum ──────────────────────────────────────────────────────────────

/// Every message either side can put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Server's opening move once the transport is ready.
    Hello { version: ProtocolVersion },
    /// Client's reply, carrying its screen name.
    HelloBack { version: ProtocolVersion, name: String },
    /// Forces a write on the peer to defeat delayed-ACK stalls.
    Noop,
    /// Graceful close.
    Close,
    /// Cursor enters the receiving screen at `(x, y)`.
    Enter {
        x: i16,
        y: i16,
        sequence: u32,
        mask: u16,
        /// Present only when the negotiated version is 1.7 or later.
        for_screensaver: Option<bool>,
    },
    /// Cursor leaves the receiving screen.
    Leave,
    /// A screen grabbed a clipboard; everyone else's copy is now stale.
    GrabClipboard { id: ClipboardId, sequence: u32 },
    /// Screensaver state changed on the primary.
    ScreenSaver { on: bool },
    /// Reset per-connection options to defaults.
    ResetOptions,
    /// Acknowledges a `DINF`.
    InfoAck,
    /// Keep-alive; receipt of any frame also resets the peer's alive timer.
    KeepAlive,
    KeyDown { key: u16, mask: u16, button: u16 },
    KeyUp { key: u16, mask: u16, button: u16 },
    KeyRepeat { key: u16, mask: u16, count: u16, button: u16 },
    MouseDown { button: u8 },
    MouseUp { button: u8 },
    /// Absolute mouse position in the receiving screen's space.
    MouseMove { x: i16, y: i16 },
    /// Relative mouse motion, used while locked to a secondary screen.
    MouseRelMove { dx: i16, dy: i16 },
    MouseWheel { dx: i16, dy: i16 },
    /// One chunk of a clipboard transfer.
    ClipboardData {
        id: ClipboardId,
        sequence: u32,
        mark: ChunkMark,
        data: Vec<u8>,
    },
    /// Client screen shape and cursor position.
    Info(ScreenInfo),
    /// Flat vector of `(option id, value)` pairs.
    SetOptions { options: Vec<(u32, u32)> },
    /// Ask the client to (re-)send `DINF`.
    QueryInfo,
    /// File-transfer chunk. Carried for framing compatibility only.
    FileTransfer { mark: u8, data: Vec<u8> },
    /// Drag metadata. Carried for framing compatibility only.
    DragInfo { count: u32, data: Vec<u8> },
    ErrorBad,
    ErrorBusy,
    ErrorUnknown,
    ErrorIncompatible { version: ProtocolVersion },
}

impl Message {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "Hello",
            Message::HelloBack { .. } => "HelloBack",
            Message::Noop => "CNOP",
            Message::Close => "CBYE",
            Message::Enter { .. } => "CINN",
            Message::Leave => "COUT",
            Message::GrabClipboard { .. } => "CCLP",
            Message::ScreenSaver { .. } => "CSEC",
            Message::ResetOptions => "CROP",
            Message::InfoAck => "CIAK",
            Message::KeepAlive => "CALV",
            Message::KeyDown { .. } => "DKDN",
            Message::KeyUp { .. } => "DKUP",
            Message::KeyRepeat { .. } => "DKRP",
            Message::MouseDown { .. } => "DMDN",
            Message::MouseUp { .. } => "DMUP",
            Message::MouseMove { .. } => "DMMV",
            Message::MouseRelMove { .. } => "DMRM",
            Message::MouseWheel { .. } => "DMWM",
            Message::ClipboardData { .. } => "DCLP",
            Message::Info(_) => "DINF",
            Message::SetOptions { .. } => "DSOP",
            Message::QueryInfo => "QINF",
            Message::FileTransfer { .. } => "DFTR",
            Message::DragInfo { .. } => "DDRG",
            Message::ErrorBad => "EBAD",
            Message::ErrorBusy => "EBSY",
            Message::ErrorUnknown => "EUNK",
            Message::ErrorIncompatible { .. } => "EICV",
        }
    }

    /// Encodes this message into a frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the message cannot be marshalled.
    pub fn encode(&self, negotiated: ProtocolVersion) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Message::Hello { version } => write_frame(
                MSG_HELLO,
                &[Item::Int2(version.major), Item::Int2(version.minor)],
            ),
            Message::HelloBack { version, name } => write_frame(
                MSG_HELLO_BACK,
                &[
                    Item::Int2(version.major),
                    Item::Int2(version.minor),
                    Item::Bytes(name.as_bytes().to_vec()),
                ],
            ),
            Message::Noop => write_frame(MSG_NOOP, &[]),
            Message::Close => write_frame(MSG_CLOSE, &[]),
            Message::Enter {
                x,
                y,
                sequence,
                mask,
                for_screensaver,
            } => {
                if negotiated.has_screensaver_byte() {
                    write_frame(
                        MSG_ENTER_WITH_SAVER,
                        &[
                            Item::Int2(*x as u16),
                            Item::Int2(*y as u16),
                            Item::Int4(*sequence),
                            Item::Int2(*mask),
                            Item::Int1(u8::from(for_screensaver.unwrap_or(false))),
                        ],
                    )
                } else {
                    write_frame(
                        MSG_ENTER,
                        &[
                            Item::Int2(*x as u16),
                            Item::Int2(*y as u16),
                            Item::Int4(*sequence),
                            Item::Int2(*mask),
                        ],
                    )
                }
            }
            Message::Leave => write_frame(MSG_LEAVE, &[]),
            Message::GrabClipboard { id, sequence } => write_frame(
                MSG_GRAB_CLIPBOARD,
                &[Item::Int1(*id as u8), Item::Int4(*sequence)],
            ),
            Message::ScreenSaver { on } => {
                write_frame(MSG_SCREENSAVER, &[Item::Int1(u8::from(*on))])
            }
            Message::ResetOptions => write_frame(MSG_RESET_OPTIONS, &[]),
            Message::InfoAck => write_frame(MSG_INFO_ACK, &[]),
            Message::KeepAlive => write_frame(MSG_KEEP_ALIVE, &[]),
            Message::KeyDown { key, mask, button } => write_frame(
                MSG_KEY_DOWN,
                &[Item::Int2(*key), Item::Int2(*mask), Item::Int2(*button)],
            ),
            Message::KeyUp { key, mask, button } => write_frame(
                MSG_KEY_UP,
                &[Item::Int2(*key), Item::Int2(*mask), Item::Int2(*button)],
            ),
            Message::KeyRepeat {
                key,
                mask,
                count,
                button,
            } => write_frame(
                MSG_KEY_REPEAT,
                &[
                    Item::Int2(*key),
                    Item::Int2(*mask),
                    Item::Int2(*count),
                    Item::Int2(*button),
                ],
            ),
            Message::MouseDown { button } => write_frame(MSG_MOUSE_DOWN, &[Item::Int1(*button)]),
            Message::MouseUp { button } => write_frame(MSG_MOUSE_UP, &[Item::Int1(*button)]),
            Message::MouseMove { x, y } => write_frame(
                MSG_MOUSE_MOVE,
                &[Item::Int2(*x as u16), Item::Int2(*y as u16)],
            ),
            Message::MouseRelMove { dx, dy } => write_frame(
                MSG_MOUSE_REL_MOVE,
                &[Item::Int2(*dx as u16), Item::Int2(*dy as u16)],
            ),
            Message::MouseWheel { dx, dy } => write_frame(
                MSG_MOUSE_WHEEL,
                &[Item::Int2(*dx as u16), Item::Int2(*dy as u16)],
            ),
            Message::ClipboardData {
                id,
                sequence,
                mark,
                data,
            } => write_frame(
                MSG_CLIPBOARD_DATA,
                &[
                    Item::Int1(*id as u8),
                    Item::Int4(*sequence),
                    Item::Int1(*mark as u8),
                    Item::Bytes(data.clone()),
                ],
            ),
            Message::Info(info) => write_frame(
                MSG_INFO,
                &[
                    Item::Int2(info.x as u16),
                    Item::Int2(info.y as u16),
                    Item::Int2(info.width),
                    Item::Int2(info.height),
                    Item::Int2(0),
                    Item::Int2(info.cursor_x as u16),
                    Item::Int2(info.cursor_y as u16),
                ],
            ),
            Message::SetOptions { options } => {
                let mut flat = Vec::with_capacity(options.len() * 2);
                for (id, value) in options {
                    flat.push(*id);
                    flat.push(*value);
                }
                write_frame(MSG_SET_OPTIONS, &[Item::Vec4(flat)])
            }
            Message::QueryInfo => write_frame(MSG_QUERY_INFO, &[]),
            Message::FileTransfer { mark, data } => write_frame(
                MSG_FILE_TRANSFER,
                &[Item::Int1(*mark), Item::Bytes(data.clone())],
            ),
            Message::DragInfo { count, data } => write_frame(
                MSG_DRAG_INFO,
                &[Item::Int4(*count), Item::Bytes(data.clone())],
            ),
            Message::ErrorBad => write_frame(MSG_ERROR_BAD, &[]),
            Message::ErrorBusy => write_frame(MSG_ERROR_BUSY, &[]),
            Message::ErrorUnknown => write_frame(MSG_ERROR_UNKNOWN, &[]),
            Message::ErrorIncompatible { version } => write_frame(
                MSG_ERROR_INCOMPATIBLE,
                &[Item::Int2(version.major), Item::Int2(version.minor)],
            ),
        }
    }

    /// Parses one complete frame into a message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownOpcode`] for an unrecognized opcode and
    /// [`ProtocolError::Malformed`] when the payload does not match the
    /// opcode's format.
    pub fn parse(frame: &[u8], negotiated: ProtocolVersion) -> Result<Message, ProtocolError> {
        if frame.starts_with(b"Barrier") {
            return parse_hello(frame);
        }
        let opcode = frame
            .get(0..4)
            .ok_or_else(|| ProtocolError::Malformed("frame shorter than an opcode".into()))?;
        match opcode {
            b"CNOP" => empty(frame, MSG_NOOP, Message::Noop),
            b"CBYE" => empty(frame, MSG_CLOSE, Message::Close),
            b"COUT" => empty(frame, MSG_LEAVE, Message::Leave),
            b"CROP" => empty(frame, MSG_RESET_OPTIONS, Message::ResetOptions),
            b"CIAK" => empty(frame, MSG_INFO_ACK, Message::InfoAck),
            b"CALV" => empty(frame, MSG_KEEP_ALIVE, Message::KeepAlive),
            b"QINF" => empty(frame, MSG_QUERY_INFO, Message::QueryInfo),
            b"EBAD" => empty(frame, MSG_ERROR_BAD, Message::ErrorBad),
            b"EBSY" => empty(frame, MSG_ERROR_BUSY, Message::ErrorBusy),
            b"EUNK" => empty(frame, MSG_ERROR_UNKNOWN, Message::ErrorUnknown),
            b"CINN" => parse_enter(frame, negotiated),
            b"CCLP" => {
                let items = read_frame(MSG_GRAB_CLIPBOARD, frame)?;
                Ok(Message::GrabClipboard {
                    id: ClipboardId::try_from(int1(&items, 0)?)?,
                    sequence: int4(&items, 1)?,
                })
            }
            b"CSEC" => {
                let items = read_frame(MSG_SCREENSAVER, frame)?;
                Ok(Message::ScreenSaver {
                    on: int1(&items, 0)? != 0,
                })
            }
            b"DKDN" => {
                let items = read_frame(MSG_KEY_DOWN, frame)?;
                Ok(Message::KeyDown {
                    key: int2(&items, 0)?,
                    mask: int2(&items, 1)?,
                    button: int2(&items, 2)?,
                })
            }
            b"DKUP" => {
                let items = read_frame(MSG_KEY_UP, frame)?;
                Ok(Message::KeyUp {
                    key: int2(&items, 0)?,
                    mask: int2(&items, 1)?,
                    button: int2(&items, 2)?,
                })
            }
            b"DKRP" => {
                let items = read_frame(MSG_KEY_REPEAT, frame)?;
                Ok(Message::KeyRepeat {
                    key: int2(&items, 0)?,
                    mask: int2(&items, 1)?,
                    count: int2(&items, 2)?,
                    button: int2(&items, 3)?,
                })
            }
            b"DMDN" => {
                let items = read_frame(MSG_MOUSE_DOWN, frame)?;
                Ok(Message::MouseDown {
                    button: int1(&items, 0)?,
                })
            }
            b"DMUP" => {
                let items = read_frame(MSG_MOUSE_UP, frame)?;
                Ok(Message::MouseUp {
                    button: int1(&items, 0)?,
                })
            }
            b"DMMV" => {
                let items = read_frame(MSG_MOUSE_MOVE, frame)?;
                Ok(Message::MouseMove {
                    x: int2(&items, 0)? as i16,
                    y: int2(&items, 1)? as i16,
                })
            }
            b"DMRM" => {
                let items = read_frame(MSG_MOUSE_REL_MOVE, frame)?;
                Ok(Message::MouseRelMove {
                    dx: int2(&items, 0)? as i16,
                    dy: int2(&items, 1)? as i16,
                })
            }
            b"DMWM" => {
                let items = read_frame(MSG_MOUSE_WHEEL, frame)?;
                Ok(Message::MouseWheel {
                    dx: int2(&items, 0)? as i16,
                    dy: int2(&items, 1)? as i16,
                })
            }
            b"DCLP" => {
                let items = read_frame(MSG_CLIPBOARD_DATA, frame)?;
                Ok(Message::ClipboardData {
                    id: ClipboardId::try_from(int1(&items, 0)?)?,
                    sequence: int4(&items, 1)?,
                    mark: ChunkMark::try_from(int1(&items, 2)?)?,
                    data: bytes(&items, 3)?,
                })
            }
            b"DINF" => {
                let items = read_frame(MSG_INFO, frame)?;
                Ok(Message::Info(ScreenInfo {
                    x: int2(&items, 0)? as i16,
                    y: int2(&items, 1)? as i16,
                    width: int2(&items, 2)?,
                    height: int2(&items, 3)?,
                    cursor_x: int2(&items, 5)? as i16,
                    cursor_y: int2(&items, 6)? as i16,
                }))
            }
            b"DSOP" => {
                let items = read_frame(MSG_SET_OPTIONS, frame)?;
                let flat = vec4(&items, 0)?;
                if flat.len() % 2 != 0 {
                    return Err(ProtocolError::Malformed(
                        "option vector has odd element count".into(),
                    ));
                }
                let options = flat.chunks_exact(2).map(|p| (p[0], p[1])).collect();
                Ok(Message::SetOptions { options })
            }
            b"DFTR" => {
                let items = read_frame(MSG_FILE_TRANSFER, frame)?;
                Ok(Message::FileTransfer {
                    mark: int1(&items, 0)?,
                    data: bytes(&items, 1)?,
                })
            }
            b"DDRG" => {
                let items = read_frame(MSG_DRAG_INFO, frame)?;
                Ok(Message::DragInfo {
                    count: int4(&items, 0)?,
                    data: bytes(&items, 1)?,
                })
            }
            b"EICV" => {
                let items = read_frame(MSG_ERROR_INCOMPATIBLE, frame)?;
                Ok(Message::ErrorIncompatible {
                    version: ProtocolVersion::new(int2(&items, 0)?, int2(&items, 1)?),
                })
            }
            other => Err(ProtocolError::UnknownOpcode(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }
}

fn parse_hello(frame: &[u8]) -> Result<Message, ProtocolError> {
    // "Barrier" + major + minor is exactly 11 bytes; anything longer carries
    // the client name and is a HelloBack.
    if frame.len() == 11 {
        let items = read_frame(MSG_HELLO, frame)?;
        Ok(Message::Hello {
            version: ProtocolVersion::new(int2(&items, 0)?, int2(&items, 1)?),
        })
    } else {
        let items = read_frame(MSG_HELLO_BACK, frame)?;
        let name = String::from_utf8(bytes(&items, 2)?)
            .map_err(|e| ProtocolError::Malformed(format!("screen name is not UTF-8: {e}")))?;
        Ok(Message::HelloBack {
            version: ProtocolVersion::new(int2(&items, 0)?, int2(&items, 1)?),
            name,
        })
    }
}

fn parse_enter(frame: &[u8], negotiated: ProtocolVersion) -> Result<Message, ProtocolError> {
    if negotiated.has_screensaver_byte() {
        let items = read_frame(MSG_ENTER_WITH_SAVER, frame)?;
        Ok(Message::Enter {
            x: int2(&items, 0)? as i16,
            y: int2(&items, 1)? as i16,
            sequence: int4(&items, 2)?,
            mask: int2(&items, 3)?,
            for_screensaver: Some(int1(&items, 4)? != 0),
        })
    } else {
        let items = read_frame(MSG_ENTER, frame)?;
        Ok(Message::Enter {
            x: int2(&items, 0)? as i16,
            y: int2(&items, 1)? as i16,
            sequence: int4(&items, 2)?,
            mask: int2(&items, 3)?,
            for_screensaver: None,
        })
    }
}

// ── Field extraction helpers ──────────────────────────────────────────────────

fn empty(frame: &[u8], fmt: &str, msg: Message) -> Result<Message, ProtocolError> {
    read_frame(fmt, frame)?;
    Ok(msg)
}

fn int1(items: &[Item], i: usize) -> Result<u8, ProtocolError> {
    match items.get(i) {
        Some(Item::Int1(v)) => Ok(*v),
        _ => Err(ProtocolError::Malformed(format!("field {i} is not a 1-byte integer"))),
    }
}

fn int2(items: &[Item], i: usize) -> Result<u16, ProtocolError> {
    match items.get(i) {
        Some(Item::Int2(v)) => Ok(*v),
        _ => Err(ProtocolError::Malformed(format!("field {i} is not a 2-byte integer"))),
    }
}

fn int4(items: &[Item], i: usize) -> Result<u32, ProtocolError> {
    match items.get(i) {
        Some(Item::Int4(v)) => Ok(*v),
        _ => Err(ProtocolError::Malformed(format!("field {i} is not a 4-byte integer"))),
    }
}

fn vec4(items: &[Item], i: usize) -> Result<Vec<u32>, ProtocolError> {
    match items.get(i) {
        Some(Item::Vec4(v)) => Ok(v.clone()),
        _ => Err(ProtocolError::Malformed(format!("field {i} is not a 4-byte vector"))),
    }
}

fn bytes(items: &[Item], i: usize) -> Result<Vec<u8>, ProtocolError> {
    match items.get(i) {
        Some(Item::Bytes(v)) => Ok(v.clone()),
        _ => Err(ProtocolError::Malformed(format!("field {i} is not a byte buffer"))),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
