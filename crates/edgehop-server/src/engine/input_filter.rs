//! Input filter: condition/action rules evaluated on every primary event.
//!
//! Rules come from the config options block. Each rule pairs a condition
//! with an activate list (condition became true: hotkey press, button press,
//! screen connect) and a deactivate list (condition became false: release).
//! Matching actions are dispatched synchronously by the engine so their
//! effects stay ordered with respect to the triggering input.

use edgehop_core::config::{FilterCondition, FilterRule};
use edgehop_core::keys::KeyModifierMask;
use tracing::warn;

use crate::screen::{HotkeyId, PrimaryScreen};

/// The primary events rules can match against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterEvent {
    KeyDown { key: u16, mask: KeyModifierMask },
    KeyUp { key: u16, mask: KeyModifierMask },
    MouseDown { button: u8, mask: KeyModifierMask },
    MouseUp { button: u8, mask: KeyModifierMask },
    ScreenConnected { name: String },
}

#[derive(Debug)]
struct Rule {
    config: FilterRule,
    /// OS hotkey registration backing a keystroke condition, while enabled.
    hotkey: Option<HotkeyId>,
}

/// An ordered rule list with hotkey registrations.
#[derive(Debug, Default)]
pub struct InputFilter {
    rules: Vec<Rule>,
    enabled: bool,
}

/// One rule match: the rule plus whether its condition activated (true) or
/// deactivated (false).
pub struct Match<'a> {
    pub rule: &'a FilterRule,
    pub activated: bool,
}

impl InputFilter {
    pub fn new(rules: Vec<FilterRule>) -> Self {
        Self {
            rules: rules
                .into_iter()
                .map(|config| Rule {
                    config,
                    hotkey: None,
                })
                .collect(),
            enabled: false,
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Registers system hotkeys for every keystroke condition.
    pub fn enable(&mut self, primary: &dyn PrimaryScreen) {
        if self.enabled {
            return;
        }
        for rule in &mut self.rules {
            if let FilterCondition::Keystroke { key, mask } = rule.config.condition {
                rule.hotkey = primary.register_hotkey(key, mask);
                if rule.hotkey.is_none() {
                    warn!(key, "could not register hotkey; rule will not fire");
                }
            }
        }
        self.enabled = true;
    }

    /// Releases all hotkey registrations.
    pub fn disable(&mut self, primary: &dyn PrimaryScreen) {
        for rule in &mut self.rules {
            if let Some(id) = rule.hotkey.take() {
                primary.unregister_hotkey(id);
            }
        }
        self.enabled = false;
    }

    /// Returns the rules matching `event`, in configuration order.
    pub fn evaluate(&self, event: &FilterEvent) -> Vec<Match<'_>> {
        self.rules
            .iter()
            .filter_map(|rule| {
                let activated = match (&rule.config.condition, event) {
                    (
                        FilterCondition::Keystroke { key, mask },
                        FilterEvent::KeyDown {
                            key: event_key,
                            mask: event_mask,
                        },
                    ) if key == event_key && masks_match(*mask, *event_mask) => true,
                    (
                        FilterCondition::Keystroke { key, mask },
                        FilterEvent::KeyUp {
                            key: event_key,
                            mask: event_mask,
                        },
                    ) if key == event_key && masks_match(*mask, *event_mask) => false,
                    (
                        FilterCondition::MouseButton { button, mask },
                        FilterEvent::MouseDown {
                            button: event_button,
                            mask: event_mask,
                        },
                    ) if button == event_button && masks_match(*mask, *event_mask) => true,
                    (
                        FilterCondition::MouseButton { button, mask },
                        FilterEvent::MouseUp {
                            button: event_button,
                            mask: event_mask,
                        },
                    ) if button == event_button && masks_match(*mask, *event_mask) => false,
                    (
                        FilterCondition::ScreenConnected { screen },
                        FilterEvent::ScreenConnected { name },
                    ) if screen.is_empty() || screen.eq_ignore_ascii_case(name) => true,
                    _ => return None,
                };
                Some(Match {
                    rule: &rule.config,
                    activated,
                })
            })
            .collect()
    }
}

/// Mask comparison ignoring AltGr and the lock toggles.
fn masks_match(wanted: KeyModifierMask, actual: KeyModifierMask) -> bool {
    wanted.for_matching() == actual.for_matching()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
