//! Server configuration file parser.
//!
//! The file is a sequence of sections:
//!
//! ```text
//! section: screens
//!   desk:
//!     jumpZoneSize = 3
//!     alt = meta
//!   laptop:
//! end
//! section: links
//!   desk:
//!     right(0,50) = laptop(0,100)
//!   laptop:
//!     left = desk
//! end
//! section: aliases
//!   laptop:
//!     laptop.local
//! end
//! section: options
//!   switchDelay = 250
//!   keystroke(alt+l) = lockCursorToScreen(toggle)
//! end
//! ```
//!
//! Link ranges are percentages of the edge and default to the full edge.
//! `#` starts a comment. Passing `-` as the path reads from stdin.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::clipboard::DEFAULT_SHARING_LIMIT;
use crate::keys::{parse_key_combo, KeyId, KeyModifierMask, ModifierId};
use crate::topology::{CornerMask, Direction, Interval, Topology, TopologyError};

/// Errors raised while loading or parsing a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("config line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("config line {line}: {source}")]
    Topology {
        line: usize,
        #[source]
        source: TopologyError,
    },
    /// A reload must keep the server's own screen; reject it otherwise.
    #[error("configuration does not declare this server's screen {0:?}")]
    MissingOwnScreen(String),
}

/// Whether an action turns a state on, off, or flips it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleMode {
    On,
    Off,
    Toggle,
}

impl ToggleMode {
    fn parse(text: &str) -> Option<ToggleMode> {
        match text.to_ascii_lowercase().as_str() {
            "on" => Some(ToggleMode::On),
            "off" => Some(ToggleMode::Off),
            "toggle" => Some(ToggleMode::Toggle),
            _ => None,
        }
    }

    /// Applies this mode to a current value.
    pub fn apply(self, current: bool) -> bool {
        match self {
            ToggleMode::On => true,
            ToggleMode::Off => false,
            ToggleMode::Toggle => !current,
        }
    }
}

/// What triggers an input-filter rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterCondition {
    /// A registered hotkey press/release.
    Keystroke { key: KeyId, mask: KeyModifierMask },
    /// A primary mouse button press/release.
    MouseButton { button: u8, mask: KeyModifierMask },
    /// A screen connected; empty name matches any screen.
    ScreenConnected { screen: String },
}

/// What an input-filter rule does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterAction {
    LockCursorToScreen(ToggleMode),
    SwitchToScreen(String),
    ToggleScreen,
    SwitchInDirection(Direction),
    KeyboardBroadcast {
        mode: ToggleMode,
        screens: Vec<String>,
    },
    Keystroke {
        key: KeyId,
        mask: KeyModifierMask,
        screens: Vec<String>,
        /// `Some(true)` press only, `Some(false)` release only, `None` both.
        press: Option<bool>,
    },
    MouseButton {
        button: u8,
        press: Option<bool>,
    },
}

/// A condition with its activate/deactivate action lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    pub condition: FilterCondition,
    pub activate: Vec<FilterAction>,
    pub deactivate: Vec<FilterAction>,
}

/// Global switch and replication policies from the options block.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalOptions {
    /// Dwell time before an edge crossing switches, if set.
    pub switch_delay: Option<Duration>,
    /// Window within which two zone taps must land to switch, if set.
    pub switch_double_tap: Option<Duration>,
    pub switch_corners: CornerMask,
    pub switch_corner_size: i32,
    /// Modifiers that must be held for any switch.
    pub switch_needs_modifier: KeyModifierMask,
    pub screensaver_sync: bool,
    pub clipboard_sharing: bool,
    /// Transfers above this many bytes are skipped with a warning.
    pub clipboard_sharing_size: usize,
    /// Keep-alive period pushed to clients, if overridden.
    pub heartbeat: Option<Duration>,
    pub relative_mouse_moves: bool,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            switch_delay: None,
            switch_double_tap: None,
            switch_corners: CornerMask::default(),
            switch_corner_size: 0,
            switch_needs_modifier: KeyModifierMask::default(),
            screensaver_sync: true,
            clipboard_sharing: true,
            clipboard_sharing_size: DEFAULT_SHARING_LIMIT,
            heartbeat: None,
            relative_mouse_moves: false,
        }
    }
}

/// A parsed server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub topology: Topology,
    pub options: GlobalOptions,
    pub filter_rules: Vec<FilterRule>,
}

impl ServerConfig {
    /// Loads and parses a configuration file; `-` reads stdin.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] on read failure, otherwise any parse
    /// error from [`parse_config`].
    pub fn load(path: &Path) -> Result<ServerConfig, ConfigError> {
        let text = if path.as_os_str() == "-" {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|source| ConfigError::Io {
                    path: "-".to_string(),
                    source,
                })?;
            buf
        } else {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?
        };
        parse_config(&text)
    }

    /// Checks that this configuration still contains `screen`; used to
    /// reject a runtime reload that would orphan the server.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingOwnScreen`] when absent.
    pub fn require_screen(&self, screen: &str) -> Result<(), ConfigError> {
        if self.topology.contains(screen) {
            Ok(())
        } else {
            Err(ConfigError::MissingOwnScreen(screen.to_string()))
        }
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum Section {
    None,
    Screens,
    Links,
    Aliases,
    Options,
}

/// Parses a configuration from text.
///
/// # Errors
///
/// Returns [`ConfigError::Syntax`] with the offending line number for any
/// grammar violation and [`ConfigError::Topology`] for semantic ones.
pub fn parse_config(text: &str) -> Result<ServerConfig, ConfigError> {
    let mut config = ServerConfig::default();
    let mut section = Section::None;
    let mut current_screen: Option<String> = None;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        }
        .trim();
        if line.is_empty() {
            continue;
        }

        if let Some(name) = line.strip_prefix("section:") {
            if section != Section::None {
                return Err(syntax(line_no, "section opened inside another section"));
            }
            section = match name.trim() {
                "screens" => Section::Screens,
                "links" => Section::Links,
                "aliases" => Section::Aliases,
                "options" => Section::Options,
                other => return Err(syntax(line_no, format!("unknown section {other:?}"))),
            };
            current_screen = None;
            continue;
        }
        if line == "end" {
            if section == Section::None {
                return Err(syntax(line_no, "end outside any section"));
            }
            section = Section::None;
            current_screen = None;
            continue;
        }

        match section {
            Section::None => {
                return Err(syntax(line_no, "statement outside any section"));
            }
            Section::Screens => {
                if let Some(name) = line.strip_suffix(':') {
                    config
                        .topology
                        .add_screen(name.trim())
                        .map_err(|source| ConfigError::Topology { line: line_no, source })?;
                    current_screen = Some(name.trim().to_string());
                } else {
                    let screen = current_screen
                        .as_deref()
                        .ok_or_else(|| syntax(line_no, "screen option before any screen"))?
                        .to_string();
                    parse_screen_option(&mut config, &screen, line, line_no)?;
                }
            }
            Section::Links => {
                if let Some(name) = line.strip_suffix(':') {
                    let name = name.trim();
                    if !config.topology.contains(name) {
                        return Err(ConfigError::Topology {
                            line: line_no,
                            source: TopologyError::UnknownScreen(name.to_string()),
                        });
                    }
                    current_screen = Some(name.to_string());
                } else {
                    let screen = current_screen
                        .as_deref()
                        .ok_or_else(|| syntax(line_no, "link before any screen"))?
                        .to_string();
                    parse_link(&mut config, &screen, line, line_no)?;
                }
            }
            Section::Aliases => {
                if let Some(name) = line.strip_suffix(':') {
                    let name = name.trim();
                    if !config.topology.contains(name) {
                        return Err(ConfigError::Topology {
                            line: line_no,
                            source: TopologyError::UnknownScreen(name.to_string()),
                        });
                    }
                    current_screen = Some(name.to_string());
                } else {
                    let screen = current_screen
                        .as_deref()
                        .ok_or_else(|| syntax(line_no, "alias before any screen"))?
                        .to_string();
                    config
                        .topology
                        .add_alias(line, &screen)
                        .map_err(|source| ConfigError::Topology { line: line_no, source })?;
                }
            }
            Section::Options => {
                parse_option(&mut config, line, line_no)?;
            }
        }
    }

    if section != Section::None {
        return Err(syntax(text.lines().count(), "unterminated section"));
    }
    Ok(config)
}

fn syntax(line: usize, message: impl Into<String>) -> ConfigError {
    ConfigError::Syntax {
        line,
        message: message.into(),
    }
}

fn split_assignment(line: &str, line_no: usize) -> Result<(&str, &str), ConfigError> {
    let (key, value) = line
        .split_once('=')
        .ok_or_else(|| syntax(line_no, "expected key = value"))?;
    Ok((key.trim(), value.trim()))
}

fn parse_screen_option(
    config: &mut ServerConfig,
    screen: &str,
    line: &str,
    line_no: usize,
) -> Result<(), ConfigError> {
    let (key, value) = split_assignment(line, line_no)?;
    let options = config
        .topology
        .options_mut(screen)
        .ok_or_else(|| syntax(line_no, format!("unknown screen {screen:?}")))?;

    if let Some(from) = ModifierId::parse(key) {
        let to = ModifierId::parse(value)
            .ok_or_else(|| syntax(line_no, format!("unknown modifier {value:?}")))?;
        options.modifier_remaps.push((from, to));
        return Ok(());
    }

    match key {
        "jumpZoneSize" => {
            options.jump_zone = Some(parse_number(value, line_no)?);
        }
        "switchCorners" => {
            options.switch_corners = Some(
                CornerMask::parse(value)
                    .ok_or_else(|| syntax(line_no, format!("bad corner list {value:?}")))?,
            );
        }
        "switchCornerSize" => {
            options.switch_corner_size = Some(parse_number(value, line_no)?);
        }
        other => return Err(syntax(line_no, format!("unknown screen option {other:?}"))),
    }
    Ok(())
}

/// Parses `direction(start,end) = name(start,end)`, ranges optional.
fn parse_link(
    config: &mut ServerConfig,
    screen: &str,
    line: &str,
    line_no: usize,
) -> Result<(), ConfigError> {
    let (lhs, rhs) = split_assignment(line, line_no)?;
    let (direction_name, source_range) = parse_ranged_name(lhs, line_no)?;
    let direction = Direction::parse(direction_name)
        .ok_or_else(|| syntax(line_no, format!("unknown direction {direction_name:?}")))?;
    let (destination, destination_range) = parse_ranged_name(rhs, line_no)?;

    config
        .topology
        .connect(screen, direction, source_range, destination, destination_range)
        .map_err(|source| ConfigError::Topology { line: line_no, source })
}

/// Parses `name` or `name(start,end)` where the range is in percent.
fn parse_ranged_name<'a>(text: &'a str, line_no: usize) -> Result<(&'a str, Interval), ConfigError> {
    let Some((name, rest)) = text.split_once('(') else {
        return Ok((text.trim(), Interval::FULL));
    };
    let inner = rest
        .strip_suffix(')')
        .ok_or_else(|| syntax(line_no, "unterminated range"))?;
    let (start, end) = inner
        .split_once(',')
        .ok_or_else(|| syntax(line_no, "range needs start,end"))?;
    let start: f32 = start
        .trim()
        .parse()
        .map_err(|_| syntax(line_no, format!("bad range start {start:?}")))?;
    let end: f32 = end
        .trim()
        .parse()
        .map_err(|_| syntax(line_no, format!("bad range end {end:?}")))?;
    Ok((name.trim(), Interval::new(start / 100.0, end / 100.0)))
}

fn parse_number<T: std::str::FromStr>(value: &str, line_no: usize) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| syntax(line_no, format!("bad number {value:?}")))
}

fn parse_bool(value: &str, line_no: usize) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        other => Err(syntax(line_no, format!("bad boolean {other:?}"))),
    }
}

fn parse_option(config: &mut ServerConfig, line: &str, line_no: usize) -> Result<(), ConfigError> {
    let (key, value) = split_assignment(line, line_no)?;

    if let Some(inner) = key
        .strip_prefix("keystroke(")
        .and_then(|k| k.strip_suffix(')'))
    {
        let (k, mask) = parse_key_combo(inner)
            .ok_or_else(|| syntax(line_no, format!("bad key combination {inner:?}")))?;
        let actions = parse_actions(value, line_no)?;
        config.filter_rules.push(FilterRule {
            condition: FilterCondition::Keystroke { key: k, mask },
            activate: actions,
            deactivate: Vec::new(),
        });
        return Ok(());
    }
    if let Some(inner) = key
        .strip_prefix("mousebutton(")
        .and_then(|k| k.strip_suffix(')'))
    {
        let button: u8 = inner
            .trim()
            .parse()
            .map_err(|_| syntax(line_no, format!("bad mouse button {inner:?}")))?;
        let actions = parse_actions(value, line_no)?;
        config.filter_rules.push(FilterRule {
            condition: FilterCondition::MouseButton {
                button,
                mask: KeyModifierMask::default(),
            },
            activate: actions,
            deactivate: Vec::new(),
        });
        return Ok(());
    }

    let options = &mut config.options;
    match key {
        "switchDelay" => {
            options.switch_delay = Some(Duration::from_millis(parse_number(value, line_no)?));
        }
        "switchDoubleTap" => {
            options.switch_double_tap = Some(Duration::from_millis(parse_number(value, line_no)?));
        }
        "switchCorners" => {
            options.switch_corners = CornerMask::parse(value)
                .ok_or_else(|| syntax(line_no, format!("bad corner list {value:?}")))?;
        }
        "switchCornerSize" => {
            options.switch_corner_size = parse_number(value, line_no)?;
        }
        "switchNeedsShift" => {
            if parse_bool(value, line_no)? {
                options.switch_needs_modifier.0 |= KeyModifierMask::SHIFT;
            }
        }
        "switchNeedsControl" => {
            if parse_bool(value, line_no)? {
                options.switch_needs_modifier.0 |= KeyModifierMask::CONTROL;
            }
        }
        "switchNeedsAlt" => {
            if parse_bool(value, line_no)? {
                options.switch_needs_modifier.0 |= KeyModifierMask::ALT;
            }
        }
        "screenSaverSync" => {
            options.screensaver_sync = parse_bool(value, line_no)?;
        }
        "clipboardSharing" => {
            options.clipboard_sharing = parse_bool(value, line_no)?;
        }
        "clipboardSharingSize" => {
            options.clipboard_sharing_size = parse_number(value, line_no)?;
        }
        "heartbeat" => {
            options.heartbeat = Some(Duration::from_millis(parse_number(value, line_no)?));
        }
        "relativeMouseMoves" => {
            options.relative_mouse_moves = parse_bool(value, line_no)?;
        }
        other => return Err(syntax(line_no, format!("unknown option {other:?}"))),
    }
    Ok(())
}

/// Parses a `;`-separated list of actions.
fn parse_actions(text: &str, line_no: usize) -> Result<Vec<FilterAction>, ConfigError> {
    text.split(';')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(|a| parse_action(a, line_no))
        .collect()
}

fn parse_action(text: &str, line_no: usize) -> Result<FilterAction, ConfigError> {
    let (name, args) = match text.split_once('(') {
        Some((name, rest)) => {
            let inner = rest
                .strip_suffix(')')
                .ok_or_else(|| syntax(line_no, "unterminated action arguments"))?;
            (name.trim(), Some(inner.trim()))
        }
        None => (text.trim(), None),
    };

    match name {
        "lockCursorToScreen" => {
            let mode = match args {
                None | Some("") => ToggleMode::Toggle,
                Some(arg) => ToggleMode::parse(arg)
                    .ok_or_else(|| syntax(line_no, format!("bad toggle mode {arg:?}")))?,
            };
            Ok(FilterAction::LockCursorToScreen(mode))
        }
        "switchToScreen" => {
            let screen = args
                .filter(|a| !a.is_empty())
                .ok_or_else(|| syntax(line_no, "switchToScreen needs a screen name"))?;
            Ok(FilterAction::SwitchToScreen(screen.to_string()))
        }
        "toggleScreen" => Ok(FilterAction::ToggleScreen),
        "switchInDirection" => {
            let arg = args.ok_or_else(|| syntax(line_no, "switchInDirection needs a direction"))?;
            let direction = Direction::parse(arg)
                .ok_or_else(|| syntax(line_no, format!("unknown direction {arg:?}")))?;
            Ok(FilterAction::SwitchInDirection(direction))
        }
        "keyboardBroadcast" => {
            let (mode, screens) = match args {
                None | Some("") => (ToggleMode::Toggle, Vec::new()),
                Some(arg) => {
                    let (mode_text, screens_text) = match arg.split_once(',') {
                        Some((m, s)) => (m.trim(), Some(s.trim())),
                        None => (arg, None),
                    };
                    let mode = ToggleMode::parse(mode_text)
                        .ok_or_else(|| syntax(line_no, format!("bad toggle mode {mode_text:?}")))?;
                    let screens = screens_text
                        .map(|s| s.split(':').map(|p| p.trim().to_string()).collect())
                        .unwrap_or_default();
                    (mode, screens)
                }
            };
            Ok(FilterAction::KeyboardBroadcast { mode, screens })
        }
        "keystroke" | "keyDown" | "keyUp" => {
            let arg = args.ok_or_else(|| syntax(line_no, "keystroke needs a key"))?;
            let (combo_text, screens_text) = match arg.split_once(',') {
                Some((c, s)) => (c.trim(), Some(s.trim())),
                None => (arg, None),
            };
            let (key, mask) = parse_key_combo(combo_text)
                .ok_or_else(|| syntax(line_no, format!("bad key combination {combo_text:?}")))?;
            let screens = screens_text
                .map(|s| s.split(':').map(|p| p.trim().to_string()).collect())
                .unwrap_or_default();
            let press = match name {
                "keyDown" => Some(true),
                "keyUp" => Some(false),
                _ => None,
            };
            Ok(FilterAction::Keystroke {
                key,
                mask,
                screens,
                press,
            })
        }
        "mouseButton" | "mouseDown" | "mouseUp" => {
            let arg = args.ok_or_else(|| syntax(line_no, "mouseButton needs a button"))?;
            let button: u8 = arg
                .parse()
                .map_err(|_| syntax(line_no, format!("bad mouse button {arg:?}")))?;
            let press = match name {
                "mouseDown" => Some(true),
                "mouseUp" => Some(false),
                _ => None,
            };
            Ok(FilterAction::MouseButton { button, press })
        }
        other => Err(syntax(line_no, format!("unknown action {other:?}"))),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
