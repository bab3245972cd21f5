//! Client-side dispatcher for messages from the server.
//!
//! Applies parsed messages to the local [`SecondaryScreen`], translating
//! modifier masks and modifier-key identities through the per-connection
//! [`ModifierMap`], reassembling clipboard chunks, and tracking which
//! clipboard slots this screen owns. Every handled application message is
//! answered with at least a `CNOP`, forcing a write that defeats
//! delayed-ACK stalls in the peer's kernel.

use std::time::{Duration, Instant};

use edgehop_core::clipboard::{
    chunk_clipboard, ChunkAssembler, ClipboardData, ClipboardId, CLIPBOARD_COUNT,
};
use edgehop_core::keys::{KeyModifierMask, ModifierId, ModifierMap};
use edgehop_core::protocol::options::{
    option_name, OPT_HEARTBEAT, OPT_MODIFIER_MAP_FOR_ALT, OPT_MODIFIER_MAP_FOR_ALT_GR,
    OPT_MODIFIER_MAP_FOR_CONTROL, OPT_MODIFIER_MAP_FOR_META, OPT_MODIFIER_MAP_FOR_SHIFT,
    OPT_MODIFIER_MAP_FOR_SUPER, OPT_SCREENSAVER_SYNC,
};
use edgehop_core::protocol::{KeepAliveSchedule, Message, ProtocolError, ProtocolVersion};
use thiserror::Error;
use tracing::{debug, warn};

use crate::screen::SecondaryScreen;

/// Why the session must end.
#[derive(Debug, Error)]
pub enum SessionEnd {
    /// Graceful `CBYE`.
    #[error("server closed the connection")]
    Closed,
    /// The server rejected us with a close opcode.
    #[error("server refused the connection: {0}")]
    Refused(&'static str),
    /// `EICV`: the server cannot speak our version.
    #[error("incompatible server version {0}")]
    IncompatibleVersion(ProtocolVersion),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl SessionEnd {
    /// Whether reconnecting can help. An incompatible version is worth
    /// retrying (the server may be upgraded underneath us); a refused name
    /// needs a configuration change first.
    pub fn is_restartable(&self) -> bool {
        !matches!(self, SessionEnd::Refused(_))
    }
}

/// The engine behind an established client connection.
pub struct ServerProxy<S: SecondaryScreen> {
    screen: S,
    modifiers: ModifierMap,
    assemblers: [ChunkAssembler; CLIPBOARD_COUNT],
    /// Slots this screen currently owns.
    own: [bool; CLIPBOARD_COUNT],
    /// Owned slots whose contents have not been sent since the last grab.
    dirty: [bool; CLIPBOARD_COUNT],
    /// True between `CINN` and `COUT`.
    entered: bool,
    /// Enter sequence from the most recent `CINN`; tags our grabs.
    enter_sequence: u32,
    /// Whether the server wants screensaver state mirrored here.
    screensaver_sync: bool,
    pub keepalive: KeepAliveSchedule,
}

impl<S: SecondaryScreen> ServerProxy<S> {
    pub fn new(screen: S, now: Instant) -> Self {
        Self {
            screen,
            modifiers: ModifierMap::identity(),
            assemblers: Default::default(),
            own: [false; CLIPBOARD_COUNT],
            dirty: [false; CLIPBOARD_COUNT],
            entered: false,
            enter_sequence: 0,
            screensaver_sync: true,
            keepalive: KeepAliveSchedule::with_defaults(now),
        }
    }

    pub fn screen(&self) -> &S {
        &self.screen
    }

    /// Restores per-connection state for a fresh session; the server will
    /// re-send its options after the next handshake.
    pub fn reset(&mut self, now: Instant) {
        self.modifiers.reset();
        self.assemblers = Default::default();
        self.own = [false; CLIPBOARD_COUNT];
        self.dirty = [false; CLIPBOARD_COUNT];
        self.entered = false;
        self.enter_sequence = 0;
        self.screensaver_sync = true;
        self.keepalive = KeepAliveSchedule::with_defaults(now);
    }

    pub fn is_entered(&self) -> bool {
        self.entered
    }

    pub fn enter_sequence(&self) -> u32 {
        self.enter_sequence
    }

    /// Applies one message from the server, returning the replies to queue.
    ///
    /// # Errors
    ///
    /// Returns [`SessionEnd`] when the message terminates the session.
    pub fn handle(&mut self, message: Message, now: Instant) -> Result<Vec<Message>, SessionEnd> {
        self.keepalive.record_inbound(now);
        match message {
            Message::KeepAlive => Ok(vec![Message::KeepAlive]),
            Message::Noop => Ok(Vec::new()),
            Message::Close => Err(SessionEnd::Closed),
            Message::ErrorBad => Err(SessionEnd::Refused("protocol error")),
            Message::ErrorBusy => Err(SessionEnd::Refused("name already in use")),
            Message::ErrorUnknown => Err(SessionEnd::Refused("name unknown to server")),
            Message::ErrorIncompatible { version } => {
                Err(SessionEnd::IncompatibleVersion(version))
            }
            Message::QueryInfo => Ok(vec![Message::Info(self.screen.info()), Message::Noop]),
            Message::InfoAck => Ok(Vec::new()),
            Message::Enter {
                x,
                y,
                sequence,
                mask,
                ..
            } => {
                self.entered = true;
                self.enter_sequence = sequence;
                self.screen.enter(x, y, KeyModifierMask(mask));
                Ok(vec![Message::Noop])
            }
            Message::Leave => {
                self.entered = false;
                self.screen.leave();
                // Hand owned, still-unsent clipboards to the server so it
                // can seed the next screen.
                let mut replies = self.flush_owned_clipboards();
                replies.push(Message::Noop);
                Ok(replies)
            }
            Message::GrabClipboard { id, .. } => {
                // Another screen owns this slot now.
                self.own[id.index()] = false;
                self.dirty[id.index()] = false;
                Ok(vec![Message::Noop])
            }
            Message::ClipboardData {
                id,
                sequence: _,
                mark,
                data,
            } => {
                match self.assemblers[id.index()].accept(mark, &data) {
                    Ok(Some(blob)) => match ClipboardData::unmarshal(&blob) {
                        Ok(contents) => self.screen.set_clipboard(id, &contents),
                        Err(e) => warn!(slot = ?id, "discarding bad clipboard payload: {e}"),
                    },
                    Ok(None) => {}
                    Err(e) => warn!(slot = ?id, "clipboard transfer failed: {e}"),
                }
                Ok(vec![Message::Noop])
            }
            Message::ScreenSaver { on } => {
                if self.screensaver_sync {
                    self.screen.screensaver(on);
                }
                Ok(vec![Message::Noop])
            }
            Message::ResetOptions => {
                self.modifiers.reset();
                self.keepalive = KeepAliveSchedule::with_defaults(now);
                Ok(vec![Message::Noop])
            }
            Message::SetOptions { options } => {
                self.apply_options(&options, now);
                Ok(vec![Message::Noop])
            }
            Message::KeyDown { key, mask, button } => {
                let (key, mask) = self.translate(key, mask);
                self.screen.key_down(key, mask, button);
                Ok(vec![Message::Noop])
            }
            Message::KeyUp { key, mask, button } => {
                let (key, mask) = self.translate(key, mask);
                self.screen.key_up(key, mask, button);
                Ok(vec![Message::Noop])
            }
            Message::KeyRepeat {
                key,
                mask,
                count,
                button,
            } => {
                let (key, mask) = self.translate(key, mask);
                self.screen.key_repeat(key, mask, count, button);
                Ok(vec![Message::Noop])
            }
            Message::MouseDown { button } => {
                self.screen.mouse_down(button);
                Ok(vec![Message::Noop])
            }
            Message::MouseUp { button } => {
                self.screen.mouse_up(button);
                Ok(vec![Message::Noop])
            }
            Message::MouseMove { x, y } => {
                if self.entered {
                    self.screen.mouse_move(x, y);
                }
                Ok(Vec::new())
            }
            Message::MouseRelMove { dx, dy } => {
                if self.entered {
                    self.screen.mouse_rel_move(dx, dy);
                }
                Ok(Vec::new())
            }
            Message::MouseWheel { dx, dy } => {
                self.screen.mouse_wheel(dx, dy);
                Ok(vec![Message::Noop])
            }
            Message::FileTransfer { .. } | Message::DragInfo { .. } => {
                // Framing-compatible but not implemented locally.
                debug!("ignoring file-transfer traffic");
                Ok(vec![Message::Noop])
            }
            Message::Hello { .. } | Message::HelloBack { .. } => Err(SessionEnd::Protocol(
                ProtocolError::Malformed("hello after handshake".into()),
            )),
        }
    }

    /// The local screen grabbed a clipboard: claim the slot and tell the
    /// server, tagged with the current enter sequence.
    pub fn local_clipboard_grabbed(&mut self, id: ClipboardId) -> Vec<Message> {
        self.own[id.index()] = true;
        self.dirty[id.index()] = true;
        vec![Message::GrabClipboard {
            id,
            sequence: self.enter_sequence,
        }]
    }

    /// The local screen's shape changed: report it unprompted.
    pub fn shape_changed(&mut self) -> Vec<Message> {
        vec![Message::Info(self.screen.info())]
    }

    /// Marshals and queues every owned dirty slot, exactly once per grab.
    fn flush_owned_clipboards(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        for id in ClipboardId::all() {
            if !self.own[id.index()] || !self.dirty[id.index()] {
                continue;
            }
            let Some(contents) = self.screen.clipboard(id) else {
                continue;
            };
            out.extend(chunk_clipboard(
                id,
                self.enter_sequence,
                &contents.marshal(),
            ));
            self.dirty[id.index()] = false;
        }
        out
    }

    fn translate(&self, key: u16, mask: u16) -> (u16, KeyModifierMask) {
        (
            self.modifiers.translate_key(key),
            self.modifiers.translate_mask(KeyModifierMask(mask)),
        )
    }

    fn apply_options(&mut self, options: &[(u32, u32)], now: Instant) {
        for &(id, value) in options {
            match id {
                OPT_HEARTBEAT => {
                    let rate = Duration::from_millis(value as u64);
                    debug!(?rate, "keep-alive rate changed");
                    let mut schedule = KeepAliveSchedule::with_defaults(now);
                    schedule.set_rate(rate);
                    self.keepalive = schedule;
                }
                OPT_SCREENSAVER_SYNC => self.screensaver_sync = value != 0,
                OPT_MODIFIER_MAP_FOR_SHIFT => self.remap(ModifierId::Shift, value),
                OPT_MODIFIER_MAP_FOR_CONTROL => self.remap(ModifierId::Control, value),
                OPT_MODIFIER_MAP_FOR_ALT => self.remap(ModifierId::Alt, value),
                OPT_MODIFIER_MAP_FOR_ALT_GR => self.remap(ModifierId::AltGr, value),
                OPT_MODIFIER_MAP_FOR_META => self.remap(ModifierId::Meta, value),
                OPT_MODIFIER_MAP_FOR_SUPER => self.remap(ModifierId::Super, value),
                other => {
                    // Unknown options are ignored for forward compatibility.
                    debug!(option = %option_name(other), value, "ignoring unknown option");
                }
            }
        }
    }

    fn remap(&mut self, from: ModifierId, value: u32) {
        let Some(to) = modifier_from_value(value) else {
            warn!(value, "ignoring remap to unknown modifier");
            return;
        };
        self.modifiers.set(from, to);
    }
}

fn modifier_from_value(value: u32) -> Option<ModifierId> {
    ModifierId::all().get(value as usize).copied()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::{MockSecondaryScreen, ScreenCall};
    use edgehop_core::clipboard::ChunkMark;
    use edgehop_core::keys::{KEY_ALT_L, KEY_META_L};
    use edgehop_core::protocol::PROTOCOL_VERSION;

    fn proxy() -> ServerProxy<MockSecondaryScreen> {
        ServerProxy::new(MockSecondaryScreen::new(1920, 1080), Instant::now())
    }

    fn handle(proxy: &mut ServerProxy<MockSecondaryScreen>, message: Message) -> Vec<Message> {
        proxy.handle(message, Instant::now()).expect("session ended")
    }

    #[test]
    fn test_enter_applies_position_and_sequence() {
        let mut proxy = proxy();
        handle(
            &mut proxy,
            Message::Enter {
                x: 1,
                y: 540,
                sequence: 7,
                mask: 0x1000,
                for_screensaver: None,
            },
        );
        assert!(proxy.is_entered());
        assert_eq!(proxy.enter_sequence(), 7);
        assert_eq!(
            proxy.screen().calls.lock().unwrap()[0],
            ScreenCall::Enter {
                x: 1,
                y: 540,
                toggle_mask: KeyModifierMask(0x1000)
            }
        );
    }

    #[test]
    fn test_application_messages_are_answered_with_noop() {
        let mut proxy = proxy();
        let replies = handle(
            &mut proxy,
            Message::KeyDown {
                key: 0x61,
                mask: 0,
                button: 0x1E,
            },
        );
        assert_eq!(replies, vec![Message::Noop]);
    }

    #[test]
    fn test_keepalive_is_echoed() {
        let mut proxy = proxy();
        let replies = handle(&mut proxy, Message::KeepAlive);
        assert_eq!(replies, vec![Message::KeepAlive]);
    }

    #[test]
    fn test_query_info_returns_screen_shape() {
        let mut proxy = proxy();
        let replies = handle(&mut proxy, Message::QueryInfo);
        let Message::Info(info) = &replies[0] else {
            panic!("expected DINF, got {replies:?}");
        };
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
    }

    #[test]
    fn test_modifier_remap_changes_mask_but_not_key_identity() {
        let mut proxy = proxy();
        // modifier_map_for_alt = meta
        handle(
            &mut proxy,
            Message::SetOptions {
                options: vec![(OPT_MODIFIER_MAP_FOR_ALT, ModifierId::Meta as u32)],
            },
        );
        handle(
            &mut proxy,
            Message::KeyDown {
                key: 0x61,
                mask: KeyModifierMask::ALT,
                button: 0x1E,
            },
        );
        let calls = proxy.screen().calls.lock().unwrap().clone();
        assert_eq!(
            calls[0],
            ScreenCall::KeyDown {
                key: 0x61,
                mask: KeyModifierMask(KeyModifierMask::META),
                button: 0x1E
            }
        );
    }

    #[test]
    fn test_modifier_remap_moves_physical_modifier_keys() {
        let mut proxy = proxy();
        handle(
            &mut proxy,
            Message::SetOptions {
                options: vec![(OPT_MODIFIER_MAP_FOR_ALT, ModifierId::Meta as u32)],
            },
        );
        handle(
            &mut proxy,
            Message::KeyDown {
                key: KEY_ALT_L,
                mask: KeyModifierMask::ALT,
                button: 0x38,
            },
        );
        let calls = proxy.screen().calls.lock().unwrap().clone();
        assert_eq!(
            calls[0],
            ScreenCall::KeyDown {
                key: KEY_META_L,
                mask: KeyModifierMask(KeyModifierMask::META),
                button: 0x38
            }
        );
    }

    #[test]
    fn test_reset_options_restores_identity_translation() {
        let mut proxy = proxy();
        handle(
            &mut proxy,
            Message::SetOptions {
                options: vec![(OPT_MODIFIER_MAP_FOR_ALT, ModifierId::Meta as u32)],
            },
        );
        handle(&mut proxy, Message::ResetOptions);
        handle(
            &mut proxy,
            Message::KeyDown {
                key: 0x61,
                mask: KeyModifierMask::ALT,
                button: 0x1E,
            },
        );
        let calls = proxy.screen().calls.lock().unwrap().clone();
        assert_eq!(
            calls[0],
            ScreenCall::KeyDown {
                key: 0x61,
                mask: KeyModifierMask(KeyModifierMask::ALT),
                button: 0x1E
            }
        );
    }

    #[test]
    fn test_clipboard_chunks_reassemble_onto_local_clipboard() {
        let mut proxy = proxy();
        let data = ClipboardData::from_text("hello");
        for message in chunk_clipboard(ClipboardId::General, 7, &data.marshal()) {
            handle(&mut proxy, message);
        }
        assert_eq!(
            proxy.screen().clipboard(ClipboardId::General),
            Some(ClipboardData::from_text("hello"))
        );
    }

    #[test]
    fn test_corrupt_clipboard_transfer_is_dropped() {
        let mut proxy = proxy();
        handle(
            &mut proxy,
            Message::ClipboardData {
                id: ClipboardId::General,
                sequence: 1,
                mark: ChunkMark::Start,
                data: b"10".to_vec(),
            },
        );
        handle(
            &mut proxy,
            Message::ClipboardData {
                id: ClipboardId::General,
                sequence: 1,
                mark: ChunkMark::Data,
                data: b"abc".to_vec(),
            },
        );
        handle(
            &mut proxy,
            Message::ClipboardData {
                id: ClipboardId::General,
                sequence: 1,
                mark: ChunkMark::End,
                data: Vec::new(),
            },
        );
        assert!(proxy.screen().clipboard(ClipboardId::General).is_none());
    }

    #[test]
    fn test_local_grab_claims_slot_and_notifies_server() {
        let mut proxy = proxy();
        handle(
            &mut proxy,
            Message::Enter {
                x: 0,
                y: 0,
                sequence: 9,
                mask: 0,
                for_screensaver: None,
            },
        );
        let messages = proxy.local_clipboard_grabbed(ClipboardId::General);
        assert_eq!(
            messages,
            vec![Message::GrabClipboard {
                id: ClipboardId::General,
                sequence: 9
            }]
        );
    }

    #[test]
    fn test_owned_dirty_clipboard_is_sent_on_leave_exactly_once() {
        let mut proxy = proxy();
        proxy
            .screen
            .set_clipboard(ClipboardId::General, &ClipboardData::from_text("mine"));
        proxy.screen.take_calls();
        handle(
            &mut proxy,
            Message::Enter {
                x: 0,
                y: 0,
                sequence: 3,
                mask: 0,
                for_screensaver: None,
            },
        );
        proxy.local_clipboard_grabbed(ClipboardId::General);

        let replies = handle(&mut proxy, Message::Leave);
        let chunks = replies
            .iter()
            .filter(|m| matches!(m, Message::ClipboardData { .. }))
            .count();
        assert_eq!(chunks, 3, "start, one data chunk, end");

        // A second leave without a new grab sends nothing.
        handle(
            &mut proxy,
            Message::Enter {
                x: 0,
                y: 0,
                sequence: 4,
                mask: 0,
                for_screensaver: None,
            },
        );
        let replies = handle(&mut proxy, Message::Leave);
        assert!(
            !replies
                .iter()
                .any(|m| matches!(m, Message::ClipboardData { .. })),
            "clean slot must not be re-sent"
        );
    }

    #[test]
    fn test_remote_grab_releases_local_ownership() {
        let mut proxy = proxy();
        proxy
            .screen
            .set_clipboard(ClipboardId::General, &ClipboardData::from_text("mine"));
        proxy.local_clipboard_grabbed(ClipboardId::General);
        handle(
            &mut proxy,
            Message::GrabClipboard {
                id: ClipboardId::General,
                sequence: 10,
            },
        );
        let replies = handle(&mut proxy, Message::Leave);
        assert!(
            !replies
                .iter()
                .any(|m| matches!(m, Message::ClipboardData { .. })),
            "a slot grabbed elsewhere is no longer ours to send"
        );
    }

    #[test]
    fn test_mouse_motion_is_suppressed_until_entered() {
        let mut proxy = proxy();
        handle(&mut proxy, Message::MouseMove { x: 5, y: 5 });
        assert!(proxy.screen().calls.lock().unwrap().is_empty());

        handle(
            &mut proxy,
            Message::Enter {
                x: 0,
                y: 0,
                sequence: 1,
                mask: 0,
                for_screensaver: None,
            },
        );
        handle(&mut proxy, Message::MouseMove { x: 5, y: 5 });
        let calls = proxy.screen().calls.lock().unwrap().clone();
        assert!(calls.contains(&ScreenCall::MouseMove { x: 5, y: 5 }));
    }

    #[test]
    fn test_close_and_error_opcodes_end_the_session() {
        let mut proxy = proxy();
        assert!(matches!(
            proxy.handle(Message::Close, Instant::now()),
            Err(SessionEnd::Closed)
        ));

        let mut proxy = self::proxy();
        let end = proxy
            .handle(
                Message::ErrorIncompatible {
                    version: PROTOCOL_VERSION,
                },
                Instant::now(),
            )
            .unwrap_err();
        assert!(matches!(end, SessionEnd::IncompatibleVersion(_)));
        assert!(end.is_restartable(), "an incompatible server schedules a retry");

        let mut proxy = self::proxy();
        let end = proxy.handle(Message::ErrorBusy, Instant::now()).unwrap_err();
        assert!(!end.is_restartable());
    }

    #[test]
    fn test_screensaver_reaches_the_screen() {
        let mut proxy = proxy();
        handle(&mut proxy, Message::ScreenSaver { on: true });
        assert_eq!(
            proxy.screen().calls.lock().unwrap()[0],
            ScreenCall::ScreenSaver(true)
        );
    }

    #[test]
    fn test_screensaver_option_disables_mirroring() {
        let mut proxy = proxy();
        handle(
            &mut proxy,
            Message::SetOptions {
                options: vec![(OPT_SCREENSAVER_SYNC, 0)],
            },
        );
        handle(&mut proxy, Message::ScreenSaver { on: true });
        assert!(proxy.screen().calls.lock().unwrap().is_empty());
    }
}
