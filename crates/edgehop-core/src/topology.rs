//! Screen topology: named screens, per-edge neighbor links keyed by
//! fractional intervals, and the coordinate mapping between heterogeneous
//! screen sizes.
//!
//! A link attaches `[start, end)` of one screen's edge to `[start, end)` of a
//! neighbor's opposite edge. Multiple links may partition one edge; their
//! intervals must be disjoint and lie within `[0, 1]`. An edge fraction that
//! falls outside every interval has no neighbor there and the cursor clamps.

use std::collections::HashMap;

use thiserror::Error;

use crate::keys::ModifierId;

/// Default jump-zone width in pixels.
pub const DEFAULT_JUMP_ZONE: i32 = 1;

/// The four edges of a screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Left,
    Right,
    Top,
    Bottom,
}

impl Direction {
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
            Direction::Top => Direction::Bottom,
            Direction::Bottom => Direction::Top,
        }
    }

    /// Whether motion across this edge is horizontal.
    pub fn is_horizontal(self) -> bool {
        matches!(self, Direction::Left | Direction::Right)
    }

    /// Parses a config-file direction name.
    pub fn parse(name: &str) -> Option<Direction> {
        match name.to_ascii_lowercase().as_str() {
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            "up" | "top" => Some(Direction::Top),
            "down" | "bottom" => Some(Direction::Bottom),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Top => "up",
            Direction::Bottom => "down",
        }
    }
}

/// A screen's shape in its own pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScreenShape {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl ScreenShape {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    pub fn clamp(&self, x: i32, y: i32) -> (i32, i32) {
        (
            x.clamp(self.x, self.right() - 1),
            y.clamp(self.y, self.bottom() - 1),
        )
    }

    /// The edge whose jump zone contains `(x, y)`, if any. When the point
    /// sits in a corner both zones match; the horizontal edge wins, matching
    /// the order switches are considered.
    pub fn jump_zone_edge(&self, zone: i32, x: i32, y: i32) -> Option<Direction> {
        if !self.contains(x, y) {
            return None;
        }
        if x < self.x + zone {
            Some(Direction::Left)
        } else if x >= self.right() - zone {
            Some(Direction::Right)
        } else if y < self.y + zone {
            Some(Direction::Top)
        } else if y >= self.bottom() - zone {
            Some(Direction::Bottom)
        } else {
            None
        }
    }

    /// Fraction `t ∈ [0, 1)` along the given edge for a cursor position,
    /// measured on the axis orthogonal to the crossing direction.
    pub fn edge_fraction(&self, direction: Direction, x: i32, y: i32) -> f32 {
        let t = if direction.is_horizontal() {
            (y - self.y) as f32 / self.height as f32
        } else {
            (x - self.x) as f32 / self.width as f32
        };
        t.clamp(0.0, 0.999_999)
    }

    /// Maps an edge fraction back into this screen's pixel space at the edge
    /// the cursor enters through (the opposite of the leave direction),
    /// `inset` pixels inside the border.
    pub fn entry_point(&self, leave_direction: Direction, t: f32, inset: i32) -> (i32, i32) {
        match leave_direction {
            Direction::Left => (
                self.right() - 1 - inset,
                self.y + (t * self.height as f32) as i32,
            ),
            Direction::Right => (self.x + inset, self.y + (t * self.height as f32) as i32),
            Direction::Top => (
                self.x + (t * self.width as f32) as i32,
                self.bottom() - 1 - inset,
            ),
            Direction::Bottom => (self.x + (t * self.width as f32) as i32, self.y + inset),
        }
    }
}

/// Which corners suppress switching, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CornerMask(pub u8);

impl CornerMask {
    pub const TOP_LEFT: u8 = 1 << 0;
    pub const TOP_RIGHT: u8 = 1 << 1;
    pub const BOTTOM_LEFT: u8 = 1 << 2;
    pub const BOTTOM_RIGHT: u8 = 1 << 3;
    pub const ALL: u8 = 0x0F;

    /// Parses a config corner list such as `all` or `top-left top-right`.
    pub fn parse(text: &str) -> Option<CornerMask> {
        let mut mask = 0u8;
        for word in text.split_whitespace() {
            mask |= match word.to_ascii_lowercase().as_str() {
                "all" => Self::ALL,
                "none" => 0,
                "top-left" => Self::TOP_LEFT,
                "top-right" => Self::TOP_RIGHT,
                "bottom-left" => Self::BOTTOM_LEFT,
                "bottom-right" => Self::BOTTOM_RIGHT,
                _ => return None,
            };
        }
        Some(CornerMask(mask))
    }

    /// Whether `(x, y)` lies within a masked corner of `shape`, using a
    /// square of `size` pixels per corner.
    pub fn covers(&self, shape: &ScreenShape, size: i32, x: i32, y: i32) -> bool {
        let left = x < shape.x + size;
        let right = x >= shape.right() - size;
        let top = y < shape.y + size;
        let bottom = y >= shape.bottom() - size;
        (self.0 & Self::TOP_LEFT != 0 && top && left)
            || (self.0 & Self::TOP_RIGHT != 0 && top && right)
            || (self.0 & Self::BOTTOM_LEFT != 0 && bottom && left)
            || (self.0 & Self::BOTTOM_RIGHT != 0 && bottom && right)
    }
}

/// Per-screen options from the config screens block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScreenOptions {
    /// Jump-zone width override for this screen.
    pub jump_zone: Option<i32>,
    /// Modifier remaps to push to the client via `DSOP`.
    pub modifier_remaps: Vec<(ModifierId, ModifierId)>,
    pub switch_corners: Option<CornerMask>,
    pub switch_corner_size: Option<i32>,
}

/// A half-open fraction range along one edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub start: f32,
    pub end: f32,
}

impl Interval {
    pub const FULL: Interval = Interval {
        start: 0.0,
        end: 1.0,
    };

    pub fn new(start: f32, end: f32) -> Self {
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.start) && (0.0..=1.0).contains(&self.end) && self.start < self.end
    }

    pub fn contains(&self, t: f32) -> bool {
        t >= self.start && t < self.end
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn length(&self) -> f32 {
        self.end - self.start
    }
}

/// One neighbor link on an edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    /// Source range along the edge.
    pub source: Interval,
    /// Canonical destination screen name.
    pub destination: String,
    /// Range on the destination's opposite edge the source maps onto.
    pub destination_range: Interval,
}

/// Result of a neighbor lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub screen: String,
    /// Fraction along the destination's entry edge.
    pub fraction: f32,
}

/// Errors raised while building a topology.
#[derive(Debug, Error, PartialEq)]
pub enum TopologyError {
    #[error("screen {0:?} is declared twice")]
    DuplicateScreen(String),
    #[error("unknown screen {0:?}")]
    UnknownScreen(String),
    #[error("alias {0:?} collides with an existing screen or alias")]
    AliasConflict(String),
    #[error("interval ({0}, {1}) is not within [0, 1] or is empty")]
    InvalidInterval(f32, f32),
    #[error("link on {screen} {direction} overlaps an existing link")]
    OverlappingInterval { screen: String, direction: &'static str },
}

#[derive(Debug, Clone, Default)]
struct ScreenEntry {
    /// Name as declared, preserving case for display.
    name: String,
    options: ScreenOptions,
}

/// The neighbor graph over all declared screens.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    screens: HashMap<String, ScreenEntry>,
    aliases: HashMap<String, String>,
    links: HashMap<(String, Direction), Vec<Link>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a screen.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::DuplicateScreen`] when the name (or an alias
    /// of it) is already taken.
    pub fn add_screen(&mut self, name: &str) -> Result<(), TopologyError> {
        let key = name.to_lowercase();
        if self.screens.contains_key(&key) || self.aliases.contains_key(&key) {
            return Err(TopologyError::DuplicateScreen(name.to_string()));
        }
        self.screens.insert(
            key,
            ScreenEntry {
                name: name.to_string(),
                options: ScreenOptions::default(),
            },
        );
        Ok(())
    }

    /// Registers an alternate name for a declared screen.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::UnknownScreen`] when the canonical screen is
    /// not declared and [`TopologyError::AliasConflict`] when the alias is
    /// already in use.
    pub fn add_alias(&mut self, alias: &str, canonical: &str) -> Result<(), TopologyError> {
        let target = self
            .canonical_key(canonical)
            .ok_or_else(|| TopologyError::UnknownScreen(canonical.to_string()))?;
        let key = alias.to_lowercase();
        if self.screens.contains_key(&key) || self.aliases.contains_key(&key) {
            return Err(TopologyError::AliasConflict(alias.to_string()));
        }
        self.aliases.insert(key, target);
        Ok(())
    }

    /// Attaches `source_range` of `screen`'s `direction` edge to
    /// `destination_range` of the destination's opposite edge.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError`] when either screen is unknown, a range is
    /// invalid, or the source range overlaps an existing link on that edge.
    pub fn connect(
        &mut self,
        screen: &str,
        direction: Direction,
        source_range: Interval,
        destination: &str,
        destination_range: Interval,
    ) -> Result<(), TopologyError> {
        if !source_range.is_valid() {
            return Err(TopologyError::InvalidInterval(
                source_range.start,
                source_range.end,
            ));
        }
        if !destination_range.is_valid() {
            return Err(TopologyError::InvalidInterval(
                destination_range.start,
                destination_range.end,
            ));
        }
        let src_key = self
            .canonical_key(screen)
            .ok_or_else(|| TopologyError::UnknownScreen(screen.to_string()))?;
        let dst_key = self
            .canonical_key(destination)
            .ok_or_else(|| TopologyError::UnknownScreen(destination.to_string()))?;

        let links = self.links.entry((src_key.clone(), direction)).or_default();
        if links.iter().any(|l| l.source.overlaps(&source_range)) {
            return Err(TopologyError::OverlappingInterval {
                screen: screen.to_string(),
                direction: direction.name(),
            });
        }
        links.push(Link {
            source: source_range,
            destination: dst_key,
            destination_range,
        });
        links.sort_by(|a, b| a.source.start.total_cmp(&b.source.start));
        Ok(())
    }

    /// Resolves any name or alias to the canonical (display-case) name.
    pub fn canonical_name(&self, name: &str) -> Option<&str> {
        let key = self.canonical_key(name)?;
        self.screens.get(&key).map(|e| e.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.canonical_key(name).is_some()
    }

    pub fn screen_names(&self) -> impl Iterator<Item = &str> {
        self.screens.values().map(|e| e.name.as_str())
    }

    pub fn screen_count(&self) -> usize {
        self.screens.len()
    }

    pub fn options(&self, name: &str) -> Option<&ScreenOptions> {
        let key = self.canonical_key(name)?;
        self.screens.get(&key).map(|e| &e.options)
    }

    pub fn options_mut(&mut self, name: &str) -> Option<&mut ScreenOptions> {
        let key = self.canonical_key(name)?;
        self.screens.get_mut(&key).map(|e| &mut e.options)
    }

    /// Looks up the neighbor across `direction` at edge fraction `t`,
    /// mapping `t` into the destination's entry-edge fraction.
    pub fn neighbor(&self, screen: &str, direction: Direction, t: f32) -> Option<Neighbor> {
        let key = self.canonical_key(screen)?;
        let links = self.links.get(&(key, direction))?;
        let link = links.iter().find(|l| l.source.contains(t))?;
        let relative = (t - link.source.start) / link.source.length();
        let fraction = link.destination_range.start + relative * link.destination_range.length();
        let screen = self
            .screens
            .get(&link.destination)
            .map(|e| e.name.clone())?;
        Some(Neighbor { screen, fraction })
    }

    /// Whether the edge has any neighbor at all.
    pub fn has_neighbor(&self, screen: &str, direction: Direction) -> bool {
        self.canonical_key(screen)
            .and_then(|key| self.links.get(&(key, direction)))
            .is_some_and(|links| !links.is_empty())
    }

    fn canonical_key(&self, name: &str) -> Option<String> {
        let key = name.to_lowercase();
        if self.screens.contains_key(&key) {
            return Some(key);
        }
        self.aliases.get(&key).cloned()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn two_screen_topology() -> Topology {
        let mut topo = Topology::new();
        topo.add_screen("primary").unwrap();
        topo.add_screen("laptop").unwrap();
        topo.connect(
            "primary",
            Direction::Right,
            Interval::FULL,
            "laptop",
            Interval::FULL,
        )
        .unwrap();
        topo
    }

    // ── Screens, names, aliases ──────────────────────────────────────────────

    #[test]
    fn test_screen_names_are_case_insensitive() {
        let topo = two_screen_topology();
        assert_eq!(topo.canonical_name("PRIMARY"), Some("primary"));
        assert_eq!(topo.canonical_name("Laptop"), Some("laptop"));
        assert!(topo.contains("LAPTOP"));
    }

    #[test]
    fn test_duplicate_screen_is_rejected() {
        let mut topo = Topology::new();
        topo.add_screen("desk").unwrap();
        assert_eq!(
            topo.add_screen("DESK"),
            Err(TopologyError::DuplicateScreen("DESK".to_string()))
        );
    }

    #[test]
    fn test_alias_resolves_to_canonical_screen() {
        let mut topo = two_screen_topology();
        topo.add_alias("thinkpad", "laptop").unwrap();
        assert_eq!(topo.canonical_name("ThinkPad"), Some("laptop"));
    }

    #[test]
    fn test_alias_to_unknown_screen_is_rejected() {
        let mut topo = Topology::new();
        assert_eq!(
            topo.add_alias("x", "ghost"),
            Err(TopologyError::UnknownScreen("ghost".to_string()))
        );
    }

    #[test]
    fn test_alias_colliding_with_screen_is_rejected() {
        let mut topo = two_screen_topology();
        assert_eq!(
            topo.add_alias("primary", "laptop"),
            Err(TopologyError::AliasConflict("primary".to_string()))
        );
    }

    // ── Links and neighbor lookup ────────────────────────────────────────────

    #[test]
    fn test_full_edge_link_maps_fraction_identically() {
        let topo = two_screen_topology();
        let n = topo.neighbor("primary", Direction::Right, 0.5).unwrap();
        assert_eq!(n.screen, "laptop");
        assert!((n.fraction - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_edge_without_links_has_no_neighbor() {
        let topo = two_screen_topology();
        assert!(topo.neighbor("primary", Direction::Left, 0.5).is_none());
        assert!(!topo.has_neighbor("primary", Direction::Left));
    }

    #[test]
    fn test_partitioned_edge_routes_to_interval_owner() {
        let mut topo = Topology::new();
        topo.add_screen("mid").unwrap();
        topo.add_screen("upper").unwrap();
        topo.add_screen("lower").unwrap();
        topo.connect(
            "mid",
            Direction::Right,
            Interval::new(0.0, 0.5),
            "upper",
            Interval::FULL,
        )
        .unwrap();
        topo.connect(
            "mid",
            Direction::Right,
            Interval::new(0.5, 1.0),
            "lower",
            Interval::FULL,
        )
        .unwrap();

        assert_eq!(
            topo.neighbor("mid", Direction::Right, 0.25).unwrap().screen,
            "upper"
        );
        assert_eq!(
            topo.neighbor("mid", Direction::Right, 0.75).unwrap().screen,
            "lower"
        );
    }

    #[test]
    fn test_partial_interval_rescales_fraction_into_destination_range() {
        let mut topo = Topology::new();
        topo.add_screen("a").unwrap();
        topo.add_screen("b").unwrap();
        // Top half of a's right edge maps onto the bottom half of b's left edge.
        topo.connect(
            "a",
            Direction::Right,
            Interval::new(0.0, 0.5),
            "b",
            Interval::new(0.5, 1.0),
        )
        .unwrap();

        let n = topo.neighbor("a", Direction::Right, 0.25).unwrap();
        // 0.25 is halfway through [0, 0.5), so halfway through [0.5, 1.0) = 0.75.
        assert!((n.fraction - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_hole_in_partition_has_no_neighbor() {
        let mut topo = Topology::new();
        topo.add_screen("a").unwrap();
        topo.add_screen("b").unwrap();
        topo.connect(
            "a",
            Direction::Right,
            Interval::new(0.0, 0.3),
            "b",
            Interval::FULL,
        )
        .unwrap();
        // 0.5 falls in the unlinked remainder of the edge.
        assert!(topo.neighbor("a", Direction::Right, 0.5).is_none());
        // The edge still counts as having a neighbor for jump-zone purposes.
        assert!(topo.has_neighbor("a", Direction::Right));
    }

    #[test]
    fn test_overlapping_intervals_are_rejected() {
        let mut topo = Topology::new();
        topo.add_screen("a").unwrap();
        topo.add_screen("b").unwrap();
        topo.connect(
            "a",
            Direction::Right,
            Interval::new(0.0, 0.6),
            "b",
            Interval::FULL,
        )
        .unwrap();
        let result = topo.connect(
            "a",
            Direction::Right,
            Interval::new(0.5, 1.0),
            "b",
            Interval::FULL,
        );
        assert!(matches!(
            result,
            Err(TopologyError::OverlappingInterval { .. })
        ));
    }

    #[test]
    fn test_interval_outside_unit_range_is_rejected() {
        let mut topo = Topology::new();
        topo.add_screen("a").unwrap();
        topo.add_screen("b").unwrap();
        let result = topo.connect(
            "a",
            Direction::Right,
            Interval::new(-0.1, 0.5),
            "b",
            Interval::FULL,
        );
        assert!(matches!(result, Err(TopologyError::InvalidInterval(_, _))));
    }

    // ── Shapes, jump zones, corners ──────────────────────────────────────────

    #[test]
    fn test_jump_zone_edge_detects_each_border() {
        let shape = ScreenShape::new(0, 0, 1920, 1080);
        assert_eq!(shape.jump_zone_edge(1, 0, 540), Some(Direction::Left));
        assert_eq!(shape.jump_zone_edge(1, 1919, 540), Some(Direction::Right));
        assert_eq!(shape.jump_zone_edge(1, 960, 0), Some(Direction::Top));
        assert_eq!(shape.jump_zone_edge(1, 960, 1079), Some(Direction::Bottom));
        assert_eq!(shape.jump_zone_edge(1, 960, 540), None);
    }

    #[test]
    fn test_wider_jump_zone_extends_the_band() {
        let shape = ScreenShape::new(0, 0, 1920, 1080);
        assert_eq!(shape.jump_zone_edge(5, 1915, 540), Some(Direction::Right));
        assert_eq!(shape.jump_zone_edge(5, 1914, 540), None);
    }

    #[test]
    fn test_edge_fraction_uses_orthogonal_axis() {
        let shape = ScreenShape::new(0, 0, 1920, 1080);
        let t = shape.edge_fraction(Direction::Right, 1919, 540);
        assert!((t - 0.5).abs() < 1e-3);
        let t = shape.edge_fraction(Direction::Bottom, 480, 1079);
        assert!((t - 0.25).abs() < 1e-3);
    }

    #[test]
    fn test_entry_point_lands_inside_destination_with_inset() {
        let dest = ScreenShape::new(0, 0, 2560, 1440);
        // Leaving rightward enters the destination's left edge.
        let (x, y) = dest.entry_point(Direction::Right, 0.5, 1);
        assert_eq!(x, 1);
        assert_eq!(y, 720);
        // Leaving leftward enters the destination's right edge.
        let (x, y) = dest.entry_point(Direction::Left, 0.5, 1);
        assert_eq!(x, 2558);
    }

    #[test]
    fn test_corner_mask_covers_configured_corners_only() {
        let shape = ScreenShape::new(0, 0, 1000, 1000);
        let mask = CornerMask(CornerMask::TOP_LEFT | CornerMask::BOTTOM_RIGHT);
        assert!(mask.covers(&shape, 50, 10, 10));
        assert!(mask.covers(&shape, 50, 990, 990));
        assert!(!mask.covers(&shape, 50, 990, 10));
        assert!(!mask.covers(&shape, 50, 500, 500));
    }

    #[test]
    fn test_corner_mask_parse_accepts_lists_and_all() {
        assert_eq!(CornerMask::parse("all"), Some(CornerMask(CornerMask::ALL)));
        assert_eq!(
            CornerMask::parse("top-left bottom-right"),
            Some(CornerMask(
                CornerMask::TOP_LEFT | CornerMask::BOTTOM_RIGHT
            ))
        );
        assert_eq!(CornerMask::parse("sideways"), None);
    }
}
