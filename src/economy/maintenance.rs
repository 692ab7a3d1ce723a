//! Demand maintenance: opening new tasks when world thresholds are crossed.
//!
//! Each update runs on its own periodic slot at a multi-tick interval and
//! is gated by the open-task counter so outstanding demand never exceeds
//! twice the worker pool.

use rand::Rng;
use tracing::debug;

use crate::game::{Facing, GameCallback, ResourceLayout, UnitKind};
use crate::types::{Pos, Priority, UnitId};

use super::task::{BuildKind, FactoryKind};
use super::{EconomyManager, Env};

impl<G: GameCallback + ResourceLayout> EconomyManager<G> {
    /// Claim unowned resource spots while any remain buildable.
    pub fn update_expand_tasks(&mut self, env: &mut Env<'_, G>) {
        if self.demand_gate_closed() || !self.bucket_is_empty(BuildKind::Expand) {
            return;
        }
        let start = env.game.start_pos();
        let wanted = self.workers.len() / 4 + 1;
        let spots = env.game.nearest_spots(start, wanted, |s| {
            env.game
                .can_build_at(UnitKind::Extractor, env.game.spot_pos(s), None)
        });
        for spot in &spots {
            let pos = env.game.spot_pos(*spot);
            // The spot itself is the placement; no site search needed.
            self.open_build_task_with(Priority::Low, BuildKind::Expand, pos, Some(pos), 0);
        }
        if !spots.is_empty() {
            debug!(count = spots.len(), "expansion demand opened");
        }
    }

    /// Keep energy production tracking metal income through the generator
    /// tiers: solar first, then fusion plus grid coverage, then the
    /// singularity endgame.
    pub fn update_energy_tasks(&mut self, env: &mut Env<'_, G>) {
        if self.demand_gate_closed() {
            return;
        }
        let metal = env.game.metal_income();
        let energy = env.game.energy_income();
        let start = env.game.start_pos();

        if metal > energy * self.cfg.solar_income_ratio
            && self.solar_count < self.cfg.solar_cap
            && self.bucket_is_empty(BuildKind::Solar)
        {
            let wanted = self.workers.len() / 4 + 2;
            let spots = env.game.nearest_spots(start, wanted, |_| true);
            if spots.is_empty() {
                for _ in 0..self.cfg.fallback_solar_count {
                    let pos = random_fallback_pos(env);
                    self.open_build_task(Priority::High, BuildKind::Solar, pos);
                }
            } else {
                for spot in spots {
                    let pos = env.game.spot_pos(spot);
                    self.open_build_task(Priority::High, BuildKind::Solar, pos);
                }
            }
            debug!(metal, energy, "solar demand opened");
        } else if metal > energy * self.cfg.fusion_income_ratio
            && self.solar_count >= self.cfg.solar_cap
            && self.fusion_count < self.cfg.fusion_cap
            && self.bucket_is_empty(BuildKind::Fusion)
        {
            let pos = match env.game.nearest_spot(start, |_| true) {
                Some(spot) => env.game.spot_pos(spot),
                None => random_fallback_pos(env),
            };
            self.open_build_task(Priority::Low, BuildKind::Fusion, pos);
            self.open_pylon_task(env);
            debug!(metal, energy, "fusion demand opened");
        } else if self.fusion_count >= self.cfg.fusion_cap
            && self.bucket_is_empty(BuildKind::Singularity)
        {
            let spots = env.game.nearest_spots(start, 3, |_| true);
            if spots.is_empty() {
                // No structured siting left at all; at least add power.
                let pos = random_fallback_pos(env);
                self.open_build_task(Priority::Low, BuildKind::Fusion, pos);
            } else {
                let spot = spots[env.rng.gen_range(0..spots.len())];
                let pos = env.game.spot_pos(spot);
                self.open_build_task(Priority::Low, BuildKind::Singularity, pos);
            }
            self.open_pylon_task(env);
            debug!("singularity demand opened");
        }
    }

    /// One pylon task for the nearest cluster without grid coverage.
    ///
    /// Shared by the fusion and singularity branches; the slot and the open
    /// bucket are both re-checked so two calls in one tick cannot book the
    /// same cluster twice.
    pub(super) fn open_pylon_task(&mut self, env: &mut Env<'_, G>) {
        let start = env.game.start_pos();
        let clusters = &self.clusters;
        let Some(cluster) = env
            .game
            .nearest_cluster(start, |c| {
                clusters.get(c).is_some_and(|info| info.pylon.is_none())
            })
        else {
            return;
        };
        let centroid = env.game.cluster_centroid(cluster);
        let already_booked = self
            .bucket_ids(BuildKind::Pylon)
            .iter()
            .any(|tid| self.task(*tid).is_some_and(|t| t.pos == centroid));
        if already_booked {
            return;
        }
        self.open_build_task(Priority::Low, BuildKind::Pylon, centroid);
    }

    /// Keep stationary build power tracking metal income: staff an
    /// existing factory with assist turrets first, found a new factory on
    /// an unclaimed cluster otherwise.
    pub fn update_builder_tasks(&mut self, env: &mut Env<'_, G>) {
        if self.demand_gate_closed() {
            return;
        }
        let metal = env.game.metal_income();
        if self.factory_power >= metal
            || !self.bucket_is_empty(BuildKind::Factory)
            || !self.bucket_is_empty(BuildKind::Nano)
        {
            return;
        }

        let understaffed: Option<UnitId> = self
            .factories
            .iter()
            .find(|(_, entry)| entry.nanos.len() < self.cfg.nanos_per_factory)
            .map(|(id, _)| *id);

        if let Some(factory) = understaffed {
            let Some(factory_pos) = env.game.unit_pos(factory) else {
                return;
            };
            let footprint = env.game.unit_def(UnitKind::Factory).footprint;
            let mut pos = factory_pos;
            // Just outside the footprint, opposite the exit lane.
            match env.game.unit_facing(factory) {
                Facing::South => pos.z -= footprint.1 * 0.55,
                Facing::East => pos.x -= footprint.0 * 0.55,
                Facing::North => pos.z += footprint.1 * 0.55,
                Facing::West => pos.x += footprint.0 * 0.55,
            }
            self.open_build_task(Priority::Low, BuildKind::Nano, pos);
            debug!(factory = factory.0, "nano demand opened");
        } else {
            let start = env.game.start_pos();
            let clusters = &self.clusters;
            let unclaimed = env.game.nearest_cluster(start, |c| {
                clusters.get(c).is_some_and(|info| info.factory.is_none())
            });
            let pos = match unclaimed {
                Some(cluster) => env.game.cluster_centroid(cluster),
                None => random_fallback_pos(env),
            };
            self.open_build_task(Priority::Low, BuildKind::Factory, pos);
            debug!("factory demand opened");
        }
    }

    /// Keep mobile build power tracking metal income by producing workers
    /// out of a random factory.
    pub fn update_factory_tasks(&mut self, env: &mut Env<'_, G>) {
        if self.factory_queue.len() >= self.factories.len() * self.cfg.factory_task_multiplier {
            return;
        }
        let metal = env.game.metal_income();
        if self.builder_power >= metal * self.cfg.production_income_ratio
            || self.factories.is_empty()
        {
            return;
        }
        if self
            .factory_tasks
            .values()
            .any(|task| task.kind == FactoryKind::BuildPower)
        {
            return;
        }

        let picked = env.rng.gen_range(0..self.factories.len());
        let factory = *self
            .factories
            .keys()
            .nth(picked)
            .expect("index within factory count");
        let Some(pos) = env.game.unit_pos(factory) else {
            return;
        };
        let (width, height) = env.game.map_size();
        let radius = width.max(height) / 4.0;
        self.open_factory_task(Priority::Low, FactoryKind::BuildPower, pos, radius, 2);
        debug!(factory = factory.0, "build-power production opened");
    }
}

/// Uniform random position over the middle half of the map; the
/// last-resort siting policy when structured search has nothing left.
fn random_fallback_pos<G: GameCallback>(env: &mut Env<'_, G>) -> Pos {
    let (width, height) = env.game.map_size();
    let x = width / 4.0 + env.rng.gen_range(0.0..width / 2.0);
    let z = height / 4.0 + env.rng.gen_range(0.0..height / 2.0);
    Pos::new(x, z)
}
