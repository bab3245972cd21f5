//! The primary-screen seam.
//!
//! The engine never talks to platform capture APIs directly; it sees the
//! machine that owns the keyboard and mouse through [`PrimaryScreen`].
//! Platform drivers live outside this crate; tests use
//! [`MockPrimaryScreen`], which records calls and lets tests script state.

use std::sync::Mutex;

use edgehop_core::clipboard::{ClipboardData, ClipboardId};
use edgehop_core::keys::{KeyId, KeyModifierMask};
use edgehop_core::topology::ScreenShape;

/// Opaque OS-assigned hotkey registration id.
pub type HotkeyId = u32;

/// Capabilities the engine needs from the physical screen owner.
pub trait PrimaryScreen: Send {
    /// The primary screen's shape in server pixel space.
    fn shape(&self) -> ScreenShape;

    /// Current physical cursor position.
    fn cursor_position(&self) -> (i32, i32);

    /// Teleports the physical cursor, keeping it parked while a secondary
    /// screen is active.
    fn warp_cursor(&self, x: i32, y: i32);

    /// Registers a system hotkey; the returned id keys filter-rule dispatch.
    fn register_hotkey(&self, key: KeyId, mask: KeyModifierMask) -> Option<HotkeyId>;

    fn unregister_hotkey(&self, id: HotkeyId);

    /// Current toggle-modifier state (caps/num/scroll lock), carried on
    /// `CINN` so the entered screen can mirror it.
    fn toggle_mask(&self) -> KeyModifierMask;

    /// Reads one local clipboard slot, `None` when it cannot be read.
    fn clipboard(&self, id: ClipboardId) -> Option<ClipboardData>;

    /// Replaces one local clipboard slot.
    fn set_clipboard(&self, id: ClipboardId, data: &ClipboardData);
}

/// Recording test double for [`PrimaryScreen`].
#[derive(Debug, Default)]
pub struct MockPrimaryScreen {
    pub shape: ScreenShape,
    pub cursor: Mutex<(i32, i32)>,
    pub toggle_mask: Mutex<KeyModifierMask>,
    pub warps: Mutex<Vec<(i32, i32)>>,
    pub hotkeys: Mutex<Vec<(HotkeyId, KeyId, KeyModifierMask)>>,
    pub clipboards: Mutex<Vec<(ClipboardId, ClipboardData)>>,
    next_hotkey: Mutex<HotkeyId>,
}

impl MockPrimaryScreen {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            shape: ScreenShape::new(0, 0, width, height),
            ..Default::default()
        }
    }

    /// All hotkey ids handed out so far.
    pub fn registered_hotkeys(&self) -> Vec<HotkeyId> {
        self.hotkeys
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|(id, _, _)| *id)
            .collect()
    }
}

impl PrimaryScreen for MockPrimaryScreen {
    fn shape(&self) -> ScreenShape {
        self.shape
    }

    fn cursor_position(&self) -> (i32, i32) {
        *self.cursor.lock().expect("lock poisoned")
    }

    fn warp_cursor(&self, x: i32, y: i32) {
        *self.cursor.lock().expect("lock poisoned") = (x, y);
        self.warps.lock().expect("lock poisoned").push((x, y));
    }

    fn register_hotkey(&self, key: KeyId, mask: KeyModifierMask) -> Option<HotkeyId> {
        let mut next = self.next_hotkey.lock().expect("lock poisoned");
        *next += 1;
        let id = *next;
        self.hotkeys
            .lock()
            .expect("lock poisoned")
            .push((id, key, mask));
        Some(id)
    }

    fn unregister_hotkey(&self, id: HotkeyId) {
        self.hotkeys
            .lock()
            .expect("lock poisoned")
            .retain(|(h, _, _)| *h != id);
    }

    fn toggle_mask(&self) -> KeyModifierMask {
        *self.toggle_mask.lock().expect("lock poisoned")
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

    fn set_clipboard(&self, id: ClipboardId, data: &ClipboardData) {
        self.clipboards
            .lock()
            .expect("lock poisoned")
            .push((id, data.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_records_warps() {
        let screen = MockPrimaryScreen::new(1920, 1080);
        screen.warp_cursor(10, 20);
        assert_eq!(screen.cursor_position(), (10, 20));
        assert_eq!(screen.warps.lock().unwrap().as_slice(), &[(10, 20)]);
    }

    #[test]
    fn test_mock_hands_out_distinct_hotkey_ids() {
        let screen = MockPrimaryScreen::new(1920, 1080);
        let a = screen
            .register_hotkey(0x61, KeyModifierMask::default())
            .unwrap();
        let b = screen
            .register_hotkey(0x62, KeyModifierMask::default())
            .unwrap();
        assert_ne!(a, b);
        screen.unregister_hotkey(a);
        assert_eq!(screen.registered_hotkeys(), vec![b]);
    }

    #[test]
    fn test_mock_clipboard_returns_latest_value_per_slot() {
        let screen = MockPrimaryScreen::new(800, 600);
        screen.set_clipboard(ClipboardId::General, &ClipboardData::from_text("one"));
        screen.set_clipboard(ClipboardId::General, &ClipboardData::from_text("two"));
        let data = screen.clipboard(ClipboardId::General).unwrap();
        assert_eq!(data, ClipboardData::from_text("two"));
        assert!(screen.clipboard(ClipboardId::Selection).is_none());
    }
}
