//! Engine callback boundary.
//!
//! Everything the decision core needs from the game engine sits behind
//! [`GameCallback`] (world queries and fire-and-forget commands) and
//! [`ResourceLayout`] (metal-spot and cluster queries produced by the
//! terrain analysis, which itself lives outside this crate). Tests and the
//! demo binary plug in the deterministic harness from [`crate::sim`].

use crate::types::{ClusterId, Pos, SpotId, UnitId};

/// Cardinal build facing for structures that care about orientation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Facing {
    South,
    East,
    North,
    West,
}

/// Engine-side command queue priority for a unit's current orders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CommandPriority {
    Low,
    Normal,
    High,
}

/// Catalog of unit types the core reasons about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UnitKind {
    /// Mobile construction unit.
    Worker,
    /// Cheap raiding unit, the factory's default output.
    Raider,
    /// Long-range skirmish unit.
    Skirmisher,
    /// Close-range riot unit.
    Riot,
    /// Resource extractor placed on a metal spot.
    Extractor,
    /// Low-tier energy generator.
    Solar,
    /// Mid-tier energy generator.
    Fusion,
    /// Top-tier energy generator.
    Singularity,
    /// Power-distribution relay covering one cluster.
    Pylon,
    /// Stationary construction-assist turret.
    Nano,
    /// Unit production building.
    Factory,
    /// Light defense turret.
    Turret,
    /// Heavy defense emplacement.
    Fortress,
}

impl UnitKind {
    pub fn is_structure(self) -> bool {
        !matches!(
            self,
            UnitKind::Worker | UnitKind::Raider | UnitKind::Skirmisher | UnitKind::Riot
        )
    }
}

/// Static per-kind unit properties looked up through the callback layer.
#[derive(Clone, Debug)]
pub struct UnitDef {
    pub kind: UnitKind,
    /// Build power contributed while constructing or assisting.
    pub build_speed: f32,
    /// Reach of the unit's construction beam.
    pub build_distance: f32,
    /// Peak movement speed; zero for structures.
    pub max_speed: f32,
    /// Footprint on the map plane, x by z.
    pub footprint: (f32, f32),
    pub can_reclaim: bool,
    /// Power-distribution radius; nonzero only for pylons.
    pub link_range: f32,
}

/// Read-only world queries and fire-and-forget commands.
///
/// Commands have no consumed return value; the only feedback the core acts
/// on is site-resolution failure, handled by the assist fallback.
pub trait GameCallback {
    fn map_size(&self) -> (f32, f32);
    /// Home position the economy expands outward from.
    fn start_pos(&self) -> Pos;
    fn metal_income(&self) -> f32;
    fn energy_income(&self) -> f32;

    fn unit_def(&self, kind: UnitKind) -> &UnitDef;
    fn unit_kind(&self, unit: UnitId) -> Option<UnitKind>;
    fn unit_pos(&self, unit: UnitId) -> Option<Pos>;
    fn unit_facing(&self, unit: UnitId) -> Facing;
    /// Current and maximum hit points.
    fn unit_health(&self, unit: UnitId) -> Option<(f32, f32)>;
    fn is_being_built(&self, unit: UnitId) -> bool;
    fn friendly_units_in(&self, pos: Pos, radius: f32) -> Vec<UnitId>;

    fn can_build_at(&self, kind: UnitKind, pos: Pos, facing: Option<Facing>) -> bool;
    /// Search outward from `near` for a buildable site within `radius`.
    fn find_build_site(
        &self,
        kind: UnitKind,
        near: Pos,
        radius: f32,
        facing: Option<Facing>,
    ) -> Option<Pos>;

    fn order_build(&mut self, builder: UnitId, kind: UnitKind, pos: Pos, facing: Option<Facing>);
    /// Queue one unit of `kind` in a factory.
    fn order_produce(&mut self, factory: UnitId, kind: UnitKind);
    fn order_repair(&mut self, builder: UnitId, target: UnitId);
    fn order_patrol(&mut self, unit: UnitId, pos: Pos);
    fn order_move(&mut self, unit: UnitId, pos: Pos);
    fn order_stop(&mut self, unit: UnitId);
    fn order_priority(&mut self, unit: UnitId, priority: CommandPriority);
}

/// Metal-spot and cluster queries from the external terrain analysis.
pub trait ResourceLayout {
    fn spot_count(&self) -> usize;
    fn spot_pos(&self, spot: SpotId) -> Pos;
    fn cluster_count(&self) -> usize;
    fn cluster_centroid(&self, cluster: ClusterId) -> Pos;

    /// Up to `count` spots nearest to `origin` satisfying `keep`.
    fn nearest_spots(&self, origin: Pos, count: usize, keep: impl Fn(SpotId) -> bool)
    -> Vec<SpotId>;
    fn nearest_spot(&self, origin: Pos, keep: impl Fn(SpotId) -> bool) -> Option<SpotId>;
    /// Up to `count` clusters nearest to `origin` satisfying `keep`.
    fn nearest_clusters(
        &self,
        origin: Pos,
        count: usize,
        keep: impl Fn(ClusterId) -> bool,
    ) -> Vec<ClusterId>;
    fn nearest_cluster(&self, origin: Pos, keep: impl Fn(ClusterId) -> bool) -> Option<ClusterId>;
}

/// Facing that points a structure at the map center, biased along the axis
/// with more room.
pub fn facing_toward_center(map: (f32, f32), pos: Pos) -> Facing {
    let (width, height) = map;
    if (width - 2.0 * pos.x).abs() > (height - 2.0 * pos.z).abs() {
        if 2.0 * pos.x > width {
            Facing::West
        } else {
            Facing::East
        }
    } else if 2.0 * pos.z > height {
        Facing::North
    } else {
        Facing::South
    }
}

/// Shift `pos` by `amount` on both axes toward the map center.
pub fn nudge_toward_center(map: (f32, f32), pos: Pos, amount: f32) -> Pos {
    let (width, height) = map;
    Pos {
        x: pos.x + if 2.0 * pos.x > width { -amount } else { amount },
        z: pos.z + if 2.0 * pos.z > height { -amount } else { amount },
    }
}
