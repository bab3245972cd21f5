//! Option ids carried in `DSOP` messages.
//!
//! An option id is four ASCII characters packed big-endian into a `u32`,
//! paired with a `u32` value. Receivers ignore ids they do not understand,
//! which is what lets older peers survive newer servers.

/// Packs a 4-character code into an option id.
pub const fn option_code(code: [u8; 4]) -> u32 {
    (code[0] as u32) << 24 | (code[1] as u32) << 16 | (code[2] as u32) << 8 | (code[3] as u32)
}

/// Keep-alive send period, in milliseconds.
pub const OPT_HEARTBEAT: u32 = option_code(*b"HBRT");
/// Rewrite incoming Shift references to another modifier.
pub const OPT_MODIFIER_MAP_FOR_SHIFT: u32 = option_code(*b"MMFS");
/// Rewrite incoming Control references to another modifier.
pub const OPT_MODIFIER_MAP_FOR_CONTROL: u32 = option_code(*b"MMFC");
/// Rewrite incoming Alt references to another modifier.
pub const OPT_MODIFIER_MAP_FOR_ALT: u32 = option_code(*b"MMFA");
/// Rewrite incoming AltGr references to another modifier.
pub const OPT_MODIFIER_MAP_FOR_ALT_GR: u32 = option_code(*b"MMFG");
/// Rewrite incoming Meta references to another modifier.
pub const OPT_MODIFIER_MAP_FOR_META: u32 = option_code(*b"MMFM");
/// Rewrite incoming Super references to another modifier.
pub const OPT_MODIFIER_MAP_FOR_SUPER: u32 = option_code(*b"MMFR");
/// Synchronize screensaver activation with the primary.
pub const OPT_SCREENSAVER_SYNC: u32 = option_code(*b"SSVR");
/// Deliver mouse motion as relative deltas while locked to this screen.
pub const OPT_RELATIVE_MOUSE_MOVES: u32 = option_code(*b"MDLT");

/// Renders an option id back into its 4-character code for logging.
pub fn option_name(id: u32) -> String {
    let bytes = id.to_be_bytes();
    if bytes.iter().all(|b| b.is_ascii_alphanumeric()) {
        String::from_utf8_lossy(&bytes).into_owned()
    } else {
        format!("{id:#010x}")
    }
}
