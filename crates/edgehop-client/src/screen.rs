//! The secondary-screen seam.
//!
//! Platform synthesis drivers (key/mouse injection, clipboard access) sit
//! behind [`SecondaryScreen`]; the engine only ever calls this trait. Tests
//! and headless runs use [`MockSecondaryScreen`], which records every call.

use std::sync::Mutex;

use edgehop_core::clipboard::{ClipboardData, ClipboardId};
use edgehop_core::keys::{KeyButton, KeyId, KeyModifierMask};
use edgehop_core::protocol::ScreenInfo;

/// Capabilities the client engine needs from the local screen.
pub trait SecondaryScreen: Send {
    /// Shape and current cursor position, reported to the server in `DINF`.
    fn info(&self) -> ScreenInfo;

    /// The cursor entered this screen at `(x, y)` with the primary's
    /// toggle-modifier state.
    fn enter(&mut self, x: i16, y: i16, toggle_mask: KeyModifierMask);

    /// The cursor left for another screen.
    fn leave(&mut self);

    fn key_down(&mut self, key: KeyId, mask: KeyModifierMask, button: KeyButton);
    fn key_up(&mut self, key: KeyId, mask: KeyModifierMask, button: KeyButton);
    fn key_repeat(&mut self, key: KeyId, mask: KeyModifierMask, count: u16, button: KeyButton);
    fn mouse_down(&mut self, button: u8);
    fn mouse_up(&mut self, button: u8);
    fn mouse_move(&mut self, x: i16, y: i16);
    fn mouse_rel_move(&mut self, dx: i16, dy: i16);
    fn mouse_wheel(&mut self, dx: i16, dy: i16);

    fn set_clipboard(&mut self, id: ClipboardId, data: &ClipboardData);
    fn clipboard(&self, id: ClipboardId) -> Option<ClipboardData>;

    fn screensaver(&mut self, on: bool);
}

/// Everything a [`MockSecondaryScreen`] saw, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenCall {
    Enter {
        x: i16,
        y: i16,
        toggle_mask: KeyModifierMask,
    },
    Leave,
    KeyDown {
        key: KeyId,
        mask: KeyModifierMask,
        button: KeyButton,
    },
    KeyUp {
        key: KeyId,
        mask: KeyModifierMask,
        button: KeyButton,
    },
    KeyRepeat {
        key: KeyId,
        mask: KeyModifierMask,
        count: u16,
        button: KeyButton,
    },
    MouseDown(u8),
    MouseUp(u8),
    MouseMove {
        x: i16,
        y: i16,
    },
    MouseRelMove {
        dx: i16,
        dy: i16,
    },
    MouseWheel {
        dx: i16,
        dy: i16,
    },
    SetClipboard {
        id: ClipboardId,
        data: ClipboardData,
    },
    ScreenSaver(bool),
}

/// Recording test double for [`SecondaryScreen`].
#[derive(Debug)]
pub struct MockSecondaryScreen {
    pub info: ScreenInfo,
    pub calls: Mutex<Vec<ScreenCall>>,
    pub clipboards: Mutex<Vec<(ClipboardId, ClipboardData)>>,
}

impl MockSecondaryScreen {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            info: ScreenInfo {
                x: 0,
                y: 0,
                width,
                height,
                cursor_x: 0,
                cursor_y: 0,
            },
            calls: Mutex::new(Vec::new()),
            clipboards: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, call: ScreenCall) {
        self.calls.lock().expect("lock poisoned").push(call);
    }

    pub fn take_calls(&self) -> Vec<ScreenCall> {
        std::mem::take(&mut *self.calls.lock().expect("lock poisoned"))
    }
}

impl SecondaryScreen for MockSecondaryScreen {
    fn info(&self) -> ScreenInfo {
        self.info
    }

    fn enter(&mut self, x: i16, y: i16, toggle_mask: KeyModifierMask) {
        self.record(ScreenCall::Enter { x, y, toggle_mask });
    }

    fn leave(&mut self) {
        self.record(ScreenCall::Leave);
    }

    fn key_down(&mut self, key: KeyId, mask: KeyModifierMask, button: KeyButton) {
        self.record(ScreenCall::KeyDown { key, mask, button });
    }

    fn key_up(&mut self, key: KeyId, mask: KeyModifierMask, button: KeyButton) {
        self.record(ScreenCall::KeyUp { key, mask, button });
    }

    fn key_repeat(&mut self, key: KeyId, mask: KeyModifierMask, count: u16, button: KeyButton) {
        self.record(ScreenCall::KeyRepeat {
            key,
            mask,
            count,
            button,
        });
    }

    fn mouse_down(&mut self, button: u8) {
        self.record(ScreenCall::MouseDown(button));
    }

    fn mouse_up(&mut self, button: u8) {
        self.record(ScreenCall::MouseUp(button));
    }

    fn mouse_move(&mut self, x: i16, y: i16) {
        self.record(ScreenCall::MouseMove { x, y });
    }

    fn mouse_rel_move(&mut self, dx: i16, dy: i16) {
        self.record(ScreenCall::MouseRelMove { dx, dy });
    }

    fn mouse_wheel(&mut self, dx: i16, dy: i16) {
        self.record(ScreenCall::MouseWheel { dx, dy });
    }

    fn set_clipboard(&mut self, id: ClipboardId, data: &ClipboardData) {
        self.record(ScreenCall::SetClipboard {
            id,
            data: data.clone(),
        });
        self.clipboards
            .lock()
            .expect("lock poisoned")
            .push((id, data.clone()));
    }

    fn clipboard(&self, id: ClipboardId) -> Option<ClipboardData> {
        self.clipboards
            .lock()
            .expect("lock poisoned")
            .iter()
            .rev()
            .find(|(slot, _)| *slot == id)
            .map(|(_, data)| data.clone())
    }

    fn screensaver(&mut self, on: bool) {
        self.record(ScreenCall::ScreenSaver(on));
    }
}
