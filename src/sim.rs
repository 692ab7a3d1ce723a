//! Deterministic simulation harness implementing the engine boundary.
//!
//! `SimGame` is a miniature world: a rectangular map, metal spots grouped
//! into clusters, a unit table with construction progress, an income model
//! derived from standing structures and a command log. The demo binary and
//! the scenario tests drive the decision core against it; under a fixed
//! seed every run is identical.

use std::collections::{BTreeMap, VecDeque};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::game::{CommandPriority, Facing, GameCallback, ResourceLayout, UnitDef, UnitKind, facing_toward_center, nudge_toward_center};
use crate::types::{ClusterId, Frame, Pos, SpotId, UnitId};

/// Distance within which an extractor snaps onto a spot.
const SPOT_SNAP: f32 = 24.0;
/// Ring step used by the build-site search.
const SITE_STEP: f32 = 32.0;
/// Samples per search ring.
const SITE_RING_SAMPLES: usize = 16;
/// Frames a mobile unit spends on one patrol leg before reporting idle.
const PATROL_LEG_FRAMES: Frame = 120;
/// Frames a repair stint lasts before the builder reports idle.
const REPAIR_LEG_FRAMES: Frame = 90;

/// Engine event, pumped out of the sim and into the decision core.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GameEvent {
    Created {
        unit: UnitId,
        builder: Option<UnitId>,
    },
    Finished(UnitId),
    Idle(UnitId),
    Destroyed {
        unit: UnitId,
        attacker: Option<UnitId>,
    },
}

/// Counters over issued commands, for demos and assertions.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimStats {
    pub builds_ordered: usize,
    pub builds_refused: usize,
    pub produces_ordered: usize,
    pub repairs: usize,
    pub patrols: usize,
    pub moves: usize,
    pub stops: usize,
}

#[derive(Clone, Debug)]
struct SimUnit {
    kind: UnitKind,
    pos: Pos,
    facing: Facing,
    built: bool,
    remaining: Frame,
    builder: Option<UnitId>,
    health: f32,
    max_health: f32,
    /// Frame the unit's current patrol/repair leg ends in an idle report.
    idle_at: Option<Frame>,
    dead: bool,
    /// Destroyed unit whose event has already been handed out; removed at
    /// the next event pump.
    reaped: bool,
}

#[derive(Clone, Copy, Debug)]
struct SimSpot {
    pos: Pos,
    cluster: ClusterId,
}

pub struct SimGame {
    width: f32,
    height: f32,
    start: Pos,
    defs: BTreeMap<UnitKind, UnitDef>,
    spots: Vec<SimSpot>,
    centroids: Vec<Pos>,
    units: BTreeMap<UnitId, SimUnit>,
    next_unit: u32,
    events: VecDeque<GameEvent>,
    income_override: Option<(f32, f32)>,
    /// Frames a construction takes from order to finished.
    build_frames: Frame,
    frame: Frame,
    stats: SimStats,
}

fn default_defs() -> BTreeMap<UnitKind, UnitDef> {
    let def = |kind, build_speed, build_distance, max_speed, footprint: (f32, f32), can_reclaim, link_range| UnitDef {
        kind,
        build_speed,
        build_distance,
        max_speed,
        footprint,
        can_reclaim,
        link_range,
    };
    let mut defs = BTreeMap::new();
    defs.insert(UnitKind::Worker, def(UnitKind::Worker, 5.0, 128.0, 60.0, (16.0, 16.0), true, 0.0));
    defs.insert(UnitKind::Raider, def(UnitKind::Raider, 0.0, 0.0, 90.0, (16.0, 16.0), false, 0.0));
    defs.insert(UnitKind::Skirmisher, def(UnitKind::Skirmisher, 0.0, 0.0, 75.0, (16.0, 16.0), false, 0.0));
    defs.insert(UnitKind::Riot, def(UnitKind::Riot, 0.0, 0.0, 55.0, (16.0, 16.0), false, 0.0));
    defs.insert(UnitKind::Extractor, def(UnitKind::Extractor, 0.0, 0.0, 0.0, (32.0, 32.0), false, 0.0));
    defs.insert(UnitKind::Solar, def(UnitKind::Solar, 0.0, 0.0, 0.0, (48.0, 48.0), false, 0.0));
    defs.insert(UnitKind::Fusion, def(UnitKind::Fusion, 0.0, 0.0, 0.0, (64.0, 64.0), false, 0.0));
    defs.insert(UnitKind::Singularity, def(UnitKind::Singularity, 0.0, 0.0, 0.0, (80.0, 80.0), false, 0.0));
    defs.insert(UnitKind::Pylon, def(UnitKind::Pylon, 0.0, 0.0, 0.0, (24.0, 24.0), false, 400.0));
    defs.insert(UnitKind::Nano, def(UnitKind::Nano, 8.0, 160.0, 0.0, (32.0, 32.0), false, 0.0));
    defs.insert(UnitKind::Factory, def(UnitKind::Factory, 10.0, 128.0, 0.0, (96.0, 64.0), false, 0.0));
    defs.insert(UnitKind::Turret, def(UnitKind::Turret, 0.0, 0.0, 0.0, (24.0, 24.0), false, 0.0));
    defs.insert(UnitKind::Fortress, def(UnitKind::Fortress, 0.0, 0.0, 0.0, (48.0, 48.0), false, 0.0));
    defs
}

impl SimGame {
    /// Empty world with no spots; tests add layout as needed.
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            start: Pos::new(width / 8.0, height / 8.0),
            defs: default_defs(),
            spots: Vec::new(),
            centroids: Vec::new(),
            units: BTreeMap::new(),
            next_unit: 0,
            events: VecDeque::new(),
            income_override: None,
            build_frames: 90,
            frame: 0,
            stats: SimStats::default(),
        }
    }

    /// Procedural world: `clusters` groups of `spots_per_cluster` spots.
    pub fn generate(seed: u64, clusters: usize, spots_per_cluster: usize) -> Self {
        let mut game = Self::new(2048.0, 2048.0);
        let mut rng = SmallRng::seed_from_u64(seed);
        for c in 0..clusters {
            let centroid = Pos::new(
                rng.gen_range(256.0..game.width - 256.0),
                rng.gen_range(256.0..game.height - 256.0),
            );
            game.centroids.push(centroid);
            for _ in 0..spots_per_cluster {
                let pos = Pos::new(
                    centroid.x + rng.gen_range(-150.0..150.0),
                    centroid.z + rng.gen_range(-150.0..150.0),
                );
                game.spots.push(SimSpot { pos, cluster: c });
            }
        }
        if let Some(first) = game.centroids.first() {
            game.start = nudge_toward_center((game.width, game.height), *first, 100.0);
        }
        game
    }

    pub fn with_spots(mut self, spots: Vec<(Pos, ClusterId)>, centroids: Vec<Pos>) -> Self {
        self.spots = spots
            .into_iter()
            .map(|(pos, cluster)| SimSpot { pos, cluster })
            .collect();
        self.centroids = centroids;
        self
    }

    pub fn with_start(mut self, start: Pos) -> Self {
        self.start = start;
        self
    }

    /// Pin incomes for threshold scenarios; `clear_income` reverts to the
    /// structure-derived model.
    pub fn set_income(&mut self, metal: f32, energy: f32) {
        self.income_override = Some((metal, energy));
    }

    pub fn clear_income(&mut self) {
        self.income_override = None;
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    pub fn build_frames(&self) -> Frame {
        self.build_frames
    }

    /// Place a finished unit and emit its created+finished events.
    pub fn spawn_finished(&mut self, kind: UnitKind, pos: Pos) -> UnitId {
        let unit = self.insert_unit(kind, pos, true, None);
        self.events.push_back(GameEvent::Created {
            unit,
            builder: None,
        });
        self.events.push_back(GameEvent::Finished(unit));
        unit
    }

    /// Kill a unit; it stays queryable until the event pump after next so
    /// the destroyed-event handlers can still inspect it.
    pub fn destroy(&mut self, unit: UnitId, attacker: Option<UnitId>) {
        if let Some(entry) = self.units.get_mut(&unit) {
            entry.dead = true;
            self.events.push_back(GameEvent::Destroyed { unit, attacker });
        }
    }

    pub fn damage(&mut self, unit: UnitId, fraction: f32) {
        if let Some(entry) = self.units.get_mut(&unit) {
            entry.health = (entry.max_health * (1.0 - fraction)).max(0.0);
        }
    }

    pub fn teleport(&mut self, unit: UnitId, pos: Pos) {
        if let Some(entry) = self.units.get_mut(&unit) {
            entry.pos = pos;
        }
    }

    /// Everything the engine emitted since the last pump, in order.
    ///
    /// Units destroyed before the previous pump stay queryable until now so
    /// event handlers could still inspect them; this call reaps them.
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        self.units.retain(|_, unit| !unit.reaped);
        for unit in self.units.values_mut() {
            if unit.dead {
                unit.reaped = true;
            }
        }
        self.events.drain(..).collect()
    }

    /// Advance the world one frame: progress construction, end patrol and
    /// repair legs.
    pub fn advance(&mut self) {
        self.frame += 1;

        let in_progress: Vec<UnitId> = self
            .units
            .iter()
            .filter(|(_, unit)| !unit.built && !unit.dead)
            .map(|(id, _)| *id)
            .collect();
        for id in in_progress {
            let (finished, builder, kind) = {
                let unit = self.units.get_mut(&id).expect("unit exists");
                unit.remaining -= 1;
                if unit.remaining <= 0 {
                    unit.built = true;
                    unit.health = unit.max_health;
                    (true, unit.builder, unit.kind)
                } else {
                    (false, None, unit.kind)
                }
            };
            if finished {
                self.events.push_back(GameEvent::Finished(id));
                if !kind.is_structure() {
                    // Fresh mobile units report in idle.
                    self.events.push_back(GameEvent::Idle(id));
                }
                if let Some(builder) = builder {
                    if self.units.contains_key(&builder) {
                        self.events.push_back(GameEvent::Idle(builder));
                    }
                }
            }
        }

        let leg_done: Vec<UnitId> = self
            .units
            .iter()
            .filter(|(_, unit)| {
                unit.built && !unit.dead && unit.idle_at.is_some_and(|at| at <= self.frame)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in leg_done {
            if let Some(unit) = self.units.get_mut(&id) {
                unit.idle_at = None;
            }
            self.events.push_back(GameEvent::Idle(id));
        }
    }

    fn schedule_idle_leg(&mut self, unit: UnitId, delay: Frame) {
        let frame = self.frame;
        if let Some(entry) = self.units.get_mut(&unit) {
            if entry.built && !entry.dead && !entry.kind.is_structure() {
                entry.idle_at = Some(frame + delay);
            }
        }
    }

    pub fn live_units_of(&self, kind: UnitKind) -> usize {
        self.units
            .values()
            .filter(|unit| unit.kind == kind && unit.built && !unit.dead)
            .count()
    }

    fn insert_unit(&mut self, kind: UnitKind, pos: Pos, built: bool, builder: Option<UnitId>) -> UnitId {
        self.next_unit += 1;
        let id = UnitId(self.next_unit);
        let facing = facing_toward_center((self.width, self.height), pos);
        self.units.insert(
            id,
            SimUnit {
                kind,
                pos,
                facing,
                built,
                remaining: if built { 0 } else { self.build_frames },
                builder,
                // Construction starts at a sliver of health.
                health: if built { 100.0 } else { 10.0 },
                max_health: 100.0,
                idle_at: None,
                dead: false,
                reaped: false,
            },
        );
        id
    }

    fn footprint_of(&self, kind: UnitKind) -> (f32, f32) {
        self.defs
            .get(&kind)
            .map(|def| def.footprint)
            .unwrap_or((16.0, 16.0))
    }

    fn collides(&self, kind: UnitKind, pos: Pos) -> bool {
        let footprint = self.footprint_of(kind);
        self.units.values().any(|unit| {
            if unit.dead || !unit.kind.is_structure() {
                return false;
            }
            let other = self.footprint_of(unit.kind);
            (unit.pos.x - pos.x).abs() < (footprint.0 + other.0) / 2.0
                && (unit.pos.z - pos.z).abs() < (footprint.1 + other.1) / 2.0
        })
    }

    fn spot_taken(&self, spot: Pos) -> bool {
        self.units.values().any(|unit| {
            unit.kind == UnitKind::Extractor
                && !unit.dead
                && unit.pos.sq_dist(spot) <= SPOT_SNAP * SPOT_SNAP
        })
    }
}

impl GameCallback for SimGame {
    fn map_size(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    fn start_pos(&self) -> Pos {
        self.start
    }

    fn metal_income(&self) -> f32 {
        if let Some((metal, _)) = self.income_override {
            return metal;
        }
        2.0 + 2.0 * self.live_units_of(UnitKind::Extractor) as f32
    }

    fn energy_income(&self) -> f32 {
        if let Some((_, energy)) = self.income_override {
            return energy;
        }
        2.0 + 2.5 * self.live_units_of(UnitKind::Solar) as f32
            + 12.0 * self.live_units_of(UnitKind::Fusion) as f32
            + 50.0 * self.live_units_of(UnitKind::Singularity) as f32
    }

    fn unit_def(&self, kind: UnitKind) -> &UnitDef {
        self.defs.get(&kind).expect("def registered for every kind")
    }

    fn unit_kind(&self, unit: UnitId) -> Option<UnitKind> {
        self.units.get(&unit).map(|u| u.kind)
    }

    fn unit_pos(&self, unit: UnitId) -> Option<Pos> {
        self.units.get(&unit).map(|u| u.pos)
    }

    fn unit_facing(&self, unit: UnitId) -> Facing {
        self.units.get(&unit).map_or(Facing::South, |u| u.facing)
    }

    fn unit_health(&self, unit: UnitId) -> Option<(f32, f32)> {
        self.units.get(&unit).map(|u| (u.health, u.max_health))
    }

    fn is_being_built(&self, unit: UnitId) -> bool {
        self.units.get(&unit).is_some_and(|u| !u.built)
    }

    fn friendly_units_in(&self, pos: Pos, radius: f32) -> Vec<UnitId> {
        self.units
            .iter()
            .filter(|(_, unit)| !unit.dead && unit.pos.sq_dist(pos) <= radius * radius)
            .map(|(id, _)| *id)
            .collect()
    }

    fn can_build_at(&self, kind: UnitKind, pos: Pos, _facing: Option<Facing>) -> bool {
        let footprint = self.footprint_of(kind);
        let (half_x, half_z) = (footprint.0 / 2.0, footprint.1 / 2.0);
        if pos.x < half_x || pos.z < half_z || pos.x > self.width - half_x || pos.z > self.height - half_z
        {
            return false;
        }
        if kind == UnitKind::Extractor {
            // Must snap to a free spot.
            return self
                .spots
                .iter()
                .any(|spot| pos.sq_dist(spot.pos) <= SPOT_SNAP * SPOT_SNAP && !self.spot_taken(spot.pos));
        }
        // Keep spots clear for extractors.
        if self
            .spots
            .iter()
            .any(|spot| pos.sq_dist(spot.pos) <= (SPOT_SNAP * 2.0) * (SPOT_SNAP * 2.0))
        {
            return false;
        }
        !self.collides(kind, pos)
    }

    fn find_build_site(
        &self,
        kind: UnitKind,
        near: Pos,
        radius: f32,
        facing: Option<Facing>,
    ) -> Option<Pos> {
        if self.can_build_at(kind, near, facing) {
            return Some(near);
        }
        let rings = (radius / SITE_STEP).floor() as usize;
        for ring in 1..=rings {
            let r = ring as f32 * SITE_STEP;
            for sample in 0..SITE_RING_SAMPLES {
                let angle = sample as f32 * std::f32::consts::TAU / SITE_RING_SAMPLES as f32;
                let candidate = Pos::new(near.x + r * angle.cos(), near.z + r * angle.sin());
                if self.can_build_at(kind, candidate, facing) {
                    return Some(candidate);
                }
            }
        }
        None
    }

    fn order_build(&mut self, builder: UnitId, kind: UnitKind, pos: Pos, _facing: Option<Facing>) {
        if !self.can_build_at(kind, pos, None) {
            // Engine refuses silently; the builder reports idle again.
            self.stats.builds_refused += 1;
            self.events.push_back(GameEvent::Idle(builder));
            return;
        }
        self.stats.builds_ordered += 1;
        if let Some(entry) = self.units.get_mut(&builder) {
            entry.idle_at = None;
        }
        let unit = self.insert_unit(kind, pos, false, Some(builder));
        self.events.push_back(GameEvent::Created {
            unit,
            builder: Some(builder),
        });
    }

    fn order_produce(&mut self, factory: UnitId, kind: UnitKind) {
        let Some(pad) = self.unit_pos(factory) else {
            return;
        };
        self.stats.produces_ordered += 1;
        let exit = nudge_toward_center((self.width, self.height), pad, 64.0);
        let unit = self.insert_unit(kind, exit, false, Some(factory));
        self.events.push_back(GameEvent::Created {
            unit,
            builder: Some(factory),
        });
    }

    fn order_repair(&mut self, builder: UnitId, target: UnitId) {
        self.stats.repairs += 1;
        // Construction assistance shaves frames off the build.
        if let Some(unit) = self.units.get_mut(&target) {
            if !unit.built {
                unit.remaining = (unit.remaining - 10).max(1);
            } else {
                unit.health = unit.max_health;
            }
        }
        self.schedule_idle_leg(builder, REPAIR_LEG_FRAMES);
    }

    fn order_patrol(&mut self, unit: UnitId, _pos: Pos) {
        self.stats.patrols += 1;
        self.schedule_idle_leg(unit, PATROL_LEG_FRAMES);
    }

    fn order_move(&mut self, _unit: UnitId, _pos: Pos) {
        self.stats.moves += 1;
    }

    fn order_stop(&mut self, unit: UnitId) {
        self.stats.stops += 1;
        // A stopped unit's queue is empty; it reports idle right away.
        if let Some(entry) = self.units.get_mut(&unit) {
            entry.idle_at = None;
        }
        self.events.push_back(GameEvent::Idle(unit));
    }

    fn order_priority(&mut self, _unit: UnitId, _priority: CommandPriority) {}
}

impl ResourceLayout for SimGame {
    fn spot_count(&self) -> usize {
        self.spots.len()
    }

    fn spot_pos(&self, spot: SpotId) -> Pos {
        self.spots[spot].pos
    }

    fn cluster_count(&self) -> usize {
        self.centroids.len()
    }

    fn cluster_centroid(&self, cluster: ClusterId) -> Pos {
        self.centroids[cluster]
    }

    fn nearest_spots(&self, origin: Pos, count: usize, keep: impl Fn(SpotId) -> bool) -> Vec<SpotId> {
        let mut ids: Vec<SpotId> = (0..self.spots.len()).filter(|s| keep(*s)).collect();
        ids.sort_by(|a, b| {
            let da = self.spots[*a].pos.sq_dist(origin);
            let db = self.spots[*b].pos.sq_dist(origin);
            da.partial_cmp(&db)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(b))
        });
        ids.truncate(count);
        ids
    }

    fn nearest_spot(&self, origin: Pos, keep: impl Fn(SpotId) -> bool) -> Option<SpotId> {
        self.nearest_spots(origin, 1, keep).first().copied()
    }

    fn nearest_clusters(
        &self,
        origin: Pos,
        count: usize,
        keep: impl Fn(ClusterId) -> bool,
    ) -> Vec<ClusterId> {
        let mut ids: Vec<ClusterId> = (0..self.centroids.len()).filter(|c| keep(*c)).collect();
        ids.sort_by(|a, b| {
            let da = self.centroids[*a].sq_dist(origin);
            let db = self.centroids[*b].sq_dist(origin);
            da.partial_cmp(&db)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(b))
        });
        ids.truncate(count);
        ids
    }

    fn nearest_cluster(&self, origin: Pos, keep: impl Fn(ClusterId) -> bool) -> Option<ClusterId> {
        self.nearest_clusters(origin, 1, keep).first().copied()
    }
}
