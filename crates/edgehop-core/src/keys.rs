//! Key identities, modifier masks, and per-connection modifier translation.
//!
//! Key ids travel as 16-bit values; modifier keys occupy a reserved family
//! with left/right variants. A connection starts with the identity modifier
//! map; `DSOP` remap options rewrite both the modifier *mask* on incoming
//! key events and the physical left/right key identity of remapped modifier
//! families, so e.g. a Mac-style layout can run against a Linux client
//! without swapping keys at the OS level. `CROP` restores the identity map.

/// A key identity on the wire.
pub type KeyId = u16;

/// A physical key (scan) code on the wire.
pub type KeyButton = u16;

// Modifier key ids, left/right variants.
pub const KEY_SHIFT_L: KeyId = 0xEFE1;
pub const KEY_SHIFT_R: KeyId = 0xEFE2;
pub const KEY_CONTROL_L: KeyId = 0xEFE3;
pub const KEY_CONTROL_R: KeyId = 0xEFE4;
pub const KEY_META_L: KeyId = 0xEFE7;
pub const KEY_META_R: KeyId = 0xEFE8;
pub const KEY_ALT_L: KeyId = 0xEFE9;
pub const KEY_ALT_R: KeyId = 0xEFEA;
pub const KEY_SUPER_L: KeyId = 0xEFEB;
pub const KEY_SUPER_R: KeyId = 0xEFEC;
pub const KEY_ALT_GR: KeyId = 0xEFFE;

/// Modifier state bitmask carried on key events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct KeyModifierMask(pub u16);

impl KeyModifierMask {
    pub const SHIFT: u16 = 0x0001;
    pub const CONTROL: u16 = 0x0002;
    pub const ALT: u16 = 0x0004;
    pub const META: u16 = 0x0008;
    pub const SUPER: u16 = 0x0010;
    pub const ALT_GR: u16 = 0x0020;
    pub const CAPS_LOCK: u16 = 0x1000;
    pub const NUM_LOCK: u16 = 0x2000;
    pub const SCROLL_LOCK: u16 = 0x4000;

    /// The lock/latch bits ignored when matching hotkeys and filter rules.
    pub const IGNORED_WHEN_MATCHING: u16 =
        Self::ALT_GR | Self::CAPS_LOCK | Self::NUM_LOCK | Self::SCROLL_LOCK;

    pub fn contains(self, bits: u16) -> bool {
        self.0 & bits == bits
    }

    /// Mask with the lock/latch bits stripped, for rule comparison.
    pub fn for_matching(self) -> KeyModifierMask {
        KeyModifierMask(self.0 & !Self::IGNORED_WHEN_MATCHING)
    }
}

/// The six remappable modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum ModifierId {
    Shift = 0,
    Control = 1,
    Alt = 2,
    AltGr = 3,
    Meta = 4,
    Super = 5,
}

pub const MODIFIER_COUNT: usize = 6;

impl ModifierId {
    pub fn all() -> [ModifierId; MODIFIER_COUNT] {
        [
            ModifierId::Shift,
            ModifierId::Control,
            ModifierId::Alt,
            ModifierId::AltGr,
            ModifierId::Meta,
            ModifierId::Super,
        ]
    }

    /// The mask bit this modifier contributes.
    pub fn bit(self) -> u16 {
        match self {
            ModifierId::Shift => KeyModifierMask::SHIFT,
            ModifierId::Control => KeyModifierMask::CONTROL,
            ModifierId::Alt => KeyModifierMask::ALT,
            ModifierId::AltGr => KeyModifierMask::ALT_GR,
            ModifierId::Meta => KeyModifierMask::META,
            ModifierId::Super => KeyModifierMask::SUPER,
        }
    }

    /// The left/right key ids of this modifier's family. AltGr has a single
    /// physical key.
    pub fn keys(self) -> (KeyId, KeyId) {
        match self {
            ModifierId::Shift => (KEY_SHIFT_L, KEY_SHIFT_R),
            ModifierId::Control => (KEY_CONTROL_L, KEY_CONTROL_R),
            ModifierId::Alt => (KEY_ALT_L, KEY_ALT_R),
            ModifierId::AltGr => (KEY_ALT_GR, KEY_ALT_GR),
            ModifierId::Meta => (KEY_META_L, KEY_META_R),
            ModifierId::Super => (KEY_SUPER_L, KEY_SUPER_R),
        }
    }

    /// Parses a config-file modifier name.
    pub fn parse(name: &str) -> Option<ModifierId> {
        match name.to_ascii_lowercase().as_str() {
            "shift" => Some(ModifierId::Shift),
            "ctrl" | "control" => Some(ModifierId::Control),
            "alt" => Some(ModifierId::Alt),
            "altgr" => Some(ModifierId::AltGr),
            "meta" => Some(ModifierId::Meta),
            "super" | "cmd" | "win" => Some(ModifierId::Super),
            _ => None,
        }
    }

    /// Which modifier family a key id belongs to, if any.
    pub fn of_key(key: KeyId) -> Option<ModifierId> {
        match key {
            KEY_SHIFT_L | KEY_SHIFT_R => Some(ModifierId::Shift),
            KEY_CONTROL_L | KEY_CONTROL_R => Some(ModifierId::Control),
            KEY_ALT_L | KEY_ALT_R => Some(ModifierId::Alt),
            KEY_ALT_GR => Some(ModifierId::AltGr),
            KEY_META_L | KEY_META_R => Some(ModifierId::Meta),
            KEY_SUPER_L | KEY_SUPER_R => Some(ModifierId::Super),
            _ => None,
        }
    }
}

/// Per-connection modifier remap table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifierMap {
    map: [ModifierId; MODIFIER_COUNT],
}

impl Default for ModifierMap {
    fn default() -> Self {
        Self::identity()
    }
}

impl ModifierMap {
    /// Every modifier maps to itself.
    pub fn identity() -> Self {
        Self {
            map: ModifierId::all(),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.map == ModifierId::all()
    }

    /// Remaps `from` to `to` for subsequent translations.
    pub fn set(&mut self, from: ModifierId, to: ModifierId) {
        self.map[from as usize] = to;
    }

    /// Restores the identity map (`CROP`).
    pub fn reset(&mut self) {
        self.map = ModifierId::all();
    }

    pub fn get(&self, from: ModifierId) -> ModifierId {
        self.map[from as usize]
    }

    /// Rewrites a modifier mask through the map. Non-modifier bits (the
    /// lock/latch bits) pass through untouched.
    pub fn translate_mask(&self, mask: KeyModifierMask) -> KeyModifierMask {
        let mut out = mask.0;
        for id in ModifierId::all() {
            out &= !id.bit();
        }
        for id in ModifierId::all() {
            if mask.0 & id.bit() != 0 {
                out |= self.get(id).bit();
            }
        }
        KeyModifierMask(out)
    }

    /// Rewrites a key identity: a remapped modifier family's left/right keys
    /// become the corresponding side of the target family. Other keys pass
    /// through untouched.
    pub fn translate_key(&self, key: KeyId) -> KeyId {
        let Some(family) = ModifierId::of_key(key) else {
            return key;
        };
        let target = self.get(family);
        if target == family {
            return key;
        }
        let (from_l, _) = family.keys();
        let (to_l, to_r) = target.keys();
        if key == from_l {
            to_l
        } else {
            to_r
        }
    }
}

// ── Key name table ────────────────────────────────────────────────────────────

// Function keys occupy a contiguous family starting here.
const KEY_F1: KeyId = 0xEFBE;

/// Parses a key name as written in config files: a single printable
/// character, or a named special key.
pub fn parse_key_name(name: &str) -> Option<KeyId> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_graphic() {
            return Some(c.to_ascii_lowercase() as KeyId);
        }
    }
    if let Some(number) = name
        .strip_prefix(['f', 'F'])
        .and_then(|n| n.parse::<u16>().ok())
    {
        if (1..=12).contains(&number) {
            return Some(KEY_F1 + number - 1);
        }
    }
    match name.to_ascii_lowercase().as_str() {
        "space" => Some(0x0020),
        "backspace" => Some(0xEF08),
        "tab" => Some(0xEF09),
        "return" | "enter" => Some(0xEF0D),
        "pause" => Some(0xEF13),
        "scrolllock" => Some(0xEF14),
        "escape" => Some(0xEF1B),
        "home" => Some(0xEF50),
        "left" => Some(0xEF51),
        "up" => Some(0xEF52),
        "right" => Some(0xEF53),
        "down" => Some(0xEF54),
        "pageup" => Some(0xEF55),
        "pagedown" => Some(0xEF56),
        "end" => Some(0xEF57),
        "insert" => Some(0xEF63),
        "delete" => Some(0xEFFF),
        _ => None,
    }
}

/// Parses a `modifier+key` combination such as `alt+ctrl+left`. Exactly one
/// token must be a non-modifier key.
pub fn parse_key_combo(text: &str) -> Option<(KeyId, KeyModifierMask)> {
    let mut mask = 0u16;
    let mut key = None;
    for token in text.split('+').map(str::trim) {
        if let Some(modifier) = ModifierId::parse(token) {
            mask |= modifier.bit();
            continue;
        }
        if key.replace(parse_key_name(token)?).is_some() {
            // Two non-modifier tokens cannot form one combination.
            return None;
        }
    }
    key.map(|k| (k, KeyModifierMask(mask)))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
