//! The switching state machine.
//!
//! Consumes cursor positions on the active screen and decides when the
//! cursor crosses onto a neighbor. A switch is *considered* when the cursor
//! enters a jump zone whose edge has a neighbor, then filtered through the
//! configured policies: switch delay, two-tap, locked corners, scroll-lock
//! screen lock, and required modifiers. Neighbor resolution walks past
//! screens without a live connection and maps the edge fraction into the
//! destination's pixel space, nudged clear of the destination's own armed
//! jump zones so the cursor cannot immediately jump again.

use std::time::Instant;

use edgehop_core::config::GlobalOptions;
use edgehop_core::keys::KeyModifierMask;
use edgehop_core::topology::{
    CornerMask, Direction, ScreenShape, Topology, DEFAULT_JUMP_ZONE,
};
use tracing::debug;

/// Everything the switcher needs to evaluate one motion sample.
pub struct SwitchContext<'a> {
    pub topology: &'a Topology,
    pub options: &'a GlobalOptions,
    /// Canonical name of the active screen.
    pub active: &'a str,
    /// Shape of the active screen.
    pub shape: ScreenShape,
    /// Resolves a screen name to its shape, for screens with a live
    /// connection only.
    pub resolve: &'a dyn Fn(&str) -> Option<ScreenShape>,
}

/// Outcome of one motion sample.
#[derive(Debug, Clone, PartialEq)]
pub enum SwitchCheck {
    /// Stay on the active screen.
    Stay,
    /// The cursor is dwelling in a zone under a switch delay; re-check with
    /// the same position once `deadline` passes.
    Pending { deadline: Instant },
    /// Cross to a neighbor now.
    Switch(SwitchTarget),
}

/// A resolved switch destination.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchTarget {
    pub screen: String,
    /// Entry point in the destination's pixel space.
    pub x: i32,
    pub y: i32,
    pub direction: Direction,
}

#[derive(Debug, Clone)]
struct PendingSwitch {
    direction: Direction,
    deadline: Instant,
}

#[derive(Debug, Clone)]
struct TapState {
    direction: Direction,
    first_tap: Instant,
    /// Set once the cursor has left the zone since the first tap.
    armed: bool,
}

/// Policy state carried between motion samples.
#[derive(Debug, Default)]
pub struct Switcher {
    locked_to_screen: bool,
    pending: Option<PendingSwitch>,
    tap: Option<TapState>,
}

impl Switcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the cursor to the active screen (scroll-lock or a filter
    /// action). While locked every switch attempt is ignored.
    pub fn set_locked(&mut self, locked: bool) {
        self.locked_to_screen = locked;
        if locked {
            self.pending = None;
            self.tap = None;
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked_to_screen
    }

    /// Clears dwell/tap state, e.g. after a completed switch.
    pub fn reset(&mut self) {
        self.pending = None;
        self.tap = None;
    }

    /// Evaluates one cursor position on the active screen.
    ///
    /// `mask` is the current physical modifier state; `now` drives the
    /// delay and two-tap policies.
    pub fn check(
        &mut self,
        ctx: &SwitchContext<'_>,
        x: i32,
        y: i32,
        mask: KeyModifierMask,
        now: Instant,
    ) -> SwitchCheck {
        if self.locked_to_screen {
            return SwitchCheck::Stay;
        }

        let zone = jump_zone(ctx.topology, ctx.active);
        let Some(direction) = ctx.shape.jump_zone_edge(zone, x, y) else {
            // Left every zone: cancel a pending dwell, arm the second tap.
            self.pending = None;
            if let Some(tap) = self.tap.as_mut() {
                tap.armed = true;
            }
            return SwitchCheck::Stay;
        };

        if !ctx.topology.has_neighbor(ctx.active, direction) {
            return SwitchCheck::Stay;
        }

        // Locked corners mask out switching near the corners.
        let corners = corner_mask(ctx.topology, ctx.active, ctx.options);
        let corner_size = corner_size(ctx.topology, ctx.active, ctx.options);
        if corners.covers(&ctx.shape, corner_size, x, y) {
            self.pending = None;
            return SwitchCheck::Stay;
        }

        // Required modifiers must be held for any switch.
        let needed = ctx.options.switch_needs_modifier;
        if needed.0 != 0 && !mask.contains(needed.0) {
            return SwitchCheck::Stay;
        }

        // Zone direction changed underneath a pending dwell or tap: restart.
        if self.pending.as_ref().is_some_and(|p| p.direction != direction) {
            self.pending = None;
        }
        if self.tap.as_ref().is_some_and(|t| t.direction != direction) {
            self.tap = None;
        }

        // Two-tap: the first zone entry arms nothing; the cursor must leave
        // and re-enter the same zone within the window.
        if let Some(window) = ctx.options.switch_double_tap {
            match self.tap.as_ref() {
                Some(tap) if tap.armed && now.duration_since(tap.first_tap) <= window => {
                    // Second tap in time: fall through to the delay policy.
                }
                Some(tap) if now.duration_since(tap.first_tap) > window => {
                    // Window expired: this touch becomes the new first tap.
                    self.tap = Some(TapState {
                        direction,
                        first_tap: now,
                        armed: false,
                    });
                    return SwitchCheck::Stay;
                }
                Some(_) => {
                    // Still the first touch (not armed yet).
                    return SwitchCheck::Stay;
                }
                None => {
                    self.tap = Some(TapState {
                        direction,
                        first_tap: now,
                        armed: false,
                    });
                    return SwitchCheck::Stay;
                }
            }
        }

        // Switch delay: dwell in the zone until the timer fires.
        if let Some(delay) = ctx.options.switch_delay {
            match self.pending.as_ref() {
                Some(pending) if now >= pending.deadline => {}
                Some(pending) => {
                    return SwitchCheck::Pending {
                        deadline: pending.deadline,
                    };
                }
                None => {
                    let deadline = now + delay;
                    self.pending = Some(PendingSwitch {
                        direction,
                        deadline,
                    });
                    return SwitchCheck::Pending { deadline };
                }
            }
        }

        match resolve_target(ctx, direction, x, y) {
            Some(target) => {
                debug!(
                    from = ctx.active,
                    to = %target.screen,
                    ?direction,
                    "switch resolved"
                );
                self.reset();
                SwitchCheck::Switch(target)
            }
            None => SwitchCheck::Stay,
        }
    }
}

/// Looks up the live neighbor for a zone crossing, walking past screens
/// without a connection, and maps the cursor onto its entry point.
pub fn resolve_target(
    ctx: &SwitchContext<'_>,
    direction: Direction,
    x: i32,
    y: i32,
) -> Option<SwitchTarget> {
    let mut screen = ctx.active.to_string();
    let mut t = ctx.shape.edge_fraction(direction, x, y);

    // Bounded walk: a topology cannot chain more screens than it declares.
    for _ in 0..=ctx.topology.screen_count() {
        let neighbor = ctx.topology.neighbor(&screen, direction, t)?;
        if let Some(shape) = (ctx.resolve)(&neighbor.screen) {
            let zone = jump_zone(ctx.topology, &neighbor.screen);
            let (ex, ey) = entry_point(ctx.topology, &neighbor.screen, shape, direction, neighbor.fraction, zone);
            return Some(SwitchTarget {
                screen: neighbor.screen,
                x: ex,
                y: ey,
                direction,
            });
        }
        // Dead screen: keep walking in the same direction from it.
        t = neighbor.fraction;
        screen = neighbor.screen;
    }
    None
}

/// Maps an entry fraction into destination pixels, insetting the point past
/// any of the destination's jump zones whose edges have further neighbors.
fn entry_point(
    topology: &Topology,
    screen: &str,
    shape: ScreenShape,
    direction: Direction,
    t: f32,
    zone: i32,
) -> (i32, i32) {
    // Land just inside the edge the cursor enters through; step past the
    // zone when that edge links onward (otherwise it would re-trigger).
    let entering_inset = if topology.has_neighbor(screen, direction.opposite()) {
        zone
    } else {
        1
    };
    let (mut x, mut y) = shape.entry_point(direction, t, entering_inset);

    for edge in [
        Direction::Left,
        Direction::Right,
        Direction::Top,
        Direction::Bottom,
    ] {
        if !topology.has_neighbor(screen, edge) {
            continue;
        }
        match edge {
            Direction::Left => x = x.max(shape.x + zone),
            Direction::Right => x = x.min(shape.right() - 1 - zone),
            Direction::Top => y = y.max(shape.y + zone),
            Direction::Bottom => y = y.min(shape.bottom() - 1 - zone),
        }
    }
    shape.clamp(x, y)
}

fn jump_zone(topology: &Topology, screen: &str) -> i32 {
    topology
        .options(screen)
        .and_then(|o| o.jump_zone)
        .unwrap_or(DEFAULT_JUMP_ZONE)
}

fn corner_mask(topology: &Topology, screen: &str, options: &GlobalOptions) -> CornerMask {
    topology
        .options(screen)
        .and_then(|o| o.switch_corners)
        .unwrap_or(options.switch_corners)
}

fn corner_size(topology: &Topology, screen: &str, options: &GlobalOptions) -> i32 {
    topology
        .options(screen)
        .and_then(|o| o.switch_corner_size)
        .unwrap_or(options.switch_corner_size)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
