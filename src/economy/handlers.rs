//! Per-kind unit lifecycle handlers.
//!
//! Registered once at construction into a lookup keyed by [`UnitKind`];
//! events dispatch by key instead of per-unit closures, so adding a kind
//! means adding one handler object here.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::game::{CommandPriority, GameCallback, ResourceLayout, UnitKind, nudge_toward_center};
use crate::types::{Priority, UnitId};

use super::task::BuildKind;
use super::{EconomyManager, Env, FactoryEntry, WorkerEntry};

/// Lifecycle hooks for one unit kind. Default bodies ignore the event.
pub(super) trait UnitHandler<G> {
    fn on_created(
        &self,
        eco: &mut EconomyManager<G>,
        env: &mut Env<'_, G>,
        unit: UnitId,
        builder: Option<UnitId>,
    ) {
        let _ = (eco, env, unit, builder);
    }

    fn on_finished(&self, eco: &mut EconomyManager<G>, env: &mut Env<'_, G>, unit: UnitId) {
        let _ = (eco, env, unit);
    }

    fn on_idle(&self, eco: &mut EconomyManager<G>, env: &mut Env<'_, G>, unit: UnitId) {
        let _ = (eco, env, unit);
    }

    fn on_destroyed(
        &self,
        eco: &mut EconomyManager<G>,
        env: &mut Env<'_, G>,
        unit: UnitId,
        attacker: Option<UnitId>,
    ) {
        let _ = (eco, env, unit, attacker);
    }
}

pub(super) fn default_handlers<G: GameCallback + ResourceLayout>()
-> HashMap<UnitKind, Rc<dyn UnitHandler<G>>> {
    let mut map: HashMap<UnitKind, Rc<dyn UnitHandler<G>>> = HashMap::new();
    map.insert(UnitKind::Factory, Rc::new(FactoryHandler));
    map.insert(UnitKind::Worker, Rc::new(WorkerHandler));
    map.insert(UnitKind::Nano, Rc::new(NanoHandler));
    map.insert(UnitKind::Solar, Rc::new(SolarHandler));
    map.insert(UnitKind::Fusion, Rc::new(FusionHandler));
    map.insert(UnitKind::Singularity, Rc::new(SingularityHandler));
    map.insert(UnitKind::Pylon, Rc::new(PylonHandler));
    map
}

struct FactoryHandler;

impl<G: GameCallback + ResourceLayout> UnitHandler<G> for FactoryHandler {
    fn on_finished(&self, eco: &mut EconomyManager<G>, env: &mut Env<'_, G>, unit: UnitId) {
        let Some(pos) = env.game.unit_pos(unit) else {
            return;
        };
        let build_speed = env.game.unit_def(UnitKind::Factory).build_speed;
        eco.total_build_power += build_speed;
        eco.factory_power += build_speed;

        // Adopt assist turrets already standing in service range.
        let reach = env.game.unit_def(UnitKind::Nano).build_distance;
        let nanos: Vec<UnitId> = env
            .game
            .friendly_units_in(pos, reach)
            .into_iter()
            .filter(|u| env.game.unit_kind(*u) == Some(UnitKind::Nano))
            .collect();
        eco.factories.insert(
            unit,
            FactoryEntry {
                nanos,
                task: None,
            },
        );

        if let Some(cluster) = env.game.nearest_cluster(pos, |_| true) {
            if let Some(info) = eco.clusters.get_mut(cluster) {
                info.factory = Some(unit);
            }
        }

        // Move the rally point clear of the exit so output does not jam.
        let footprint = env.game.unit_def(UnitKind::Factory).footprint;
        let clearance = footprint.0.max(footprint.1) * 0.75;
        let rally = nudge_toward_center(env.game.map_size(), pos, clearance);
        env.game.order_move(unit, rally);

        eco.prepare_factory(env, unit);
        eco.execute_factory(env, unit);
    }

    fn on_idle(&self, eco: &mut EconomyManager<G>, env: &mut Env<'_, G>, unit: UnitId) {
        eco.prepare_factory(env, unit);
        eco.execute_factory(env, unit);
    }

    fn on_destroyed(
        &self,
        eco: &mut EconomyManager<G>,
        env: &mut Env<'_, G>,
        unit: UnitId,
        _attacker: Option<UnitId>,
    ) {
        if env.game.is_being_built(unit) {
            return;
        }
        let build_speed = env.game.unit_def(UnitKind::Factory).build_speed;
        eco.total_build_power -= build_speed;
        eco.factory_power -= build_speed;
        if let Some(entry) = eco.factories.remove(&unit) {
            if let Some(tid) = entry.task {
                if let Some(task) = eco.factory_tasks.get_mut(&tid) {
                    task.assignees.retain(|f| *f != unit);
                }
            }
        }
        for info in &mut eco.clusters {
            if info.factory == Some(unit) {
                info.factory = None;
            }
        }
    }
}

struct WorkerHandler;

impl<G: GameCallback + ResourceLayout> UnitHandler<G> for WorkerHandler {
    fn on_finished(&self, eco: &mut EconomyManager<G>, env: &mut Env<'_, G>, unit: UnitId) {
        let build_speed = env.game.unit_def(UnitKind::Worker).build_speed;
        eco.total_build_power += build_speed;
        eco.builder_power += build_speed;
        eco.workers.insert(unit, WorkerEntry::default());
        eco.ranking.mark_dirty();
        debug!(worker = unit.0, "worker registered");
    }

    fn on_idle(&self, eco: &mut EconomyManager<G>, env: &mut Env<'_, G>, unit: UnitId) {
        let current = eco.workers.get(&unit).and_then(|w| w.task);
        let assisting = current
            .and_then(|tid| eco.tasks.get(&tid))
            .is_some_and(|task| task.kind == BuildKind::Assist);
        if assisting {
            // Assist target finished or died; keep helping something else.
            if let Some(task) = current.and_then(|tid| eco.tasks.get_mut(&tid)) {
                task.target = None;
            }
        } else {
            eco.unassign_worker(unit);
            // An abandoned synthesized task with nobody left on it would
            // win the next match by distance; it has served its purpose.
            if let Some(tid) = current {
                let orphaned_default = eco
                    .tasks
                    .get(&tid)
                    .is_some_and(|task| task.kind == BuildKind::Default && task.assignees.is_empty());
                if orphaned_default {
                    eco.close_build_task(tid);
                }
            }
            eco.prepare_builder(env, unit);
        }
        eco.execute_builder(env, unit);
    }

    fn on_destroyed(
        &self,
        eco: &mut EconomyManager<G>,
        env: &mut Env<'_, G>,
        unit: UnitId,
        _attacker: Option<UnitId>,
    ) {
        if env.game.is_being_built(unit) {
            return;
        }
        let build_speed = env.game.unit_def(UnitKind::Worker).build_speed;
        eco.total_build_power -= build_speed;
        eco.builder_power -= build_speed;
        eco.unassign_worker(unit);
        eco.workers.remove(&unit);
        eco.assists.remove(&unit);
        eco.ranking.mark_dirty();
        debug!(worker = unit.0, "worker lost");
    }
}

struct NanoHandler;

impl<G: GameCallback + ResourceLayout> UnitHandler<G> for NanoHandler {
    fn on_finished(&self, eco: &mut EconomyManager<G>, env: &mut Env<'_, G>, unit: UnitId) {
        let Some(pos) = env.game.unit_pos(unit) else {
            return;
        };
        let def = env.game.unit_def(UnitKind::Nano).clone();

        // Patrol a step inward so the turret keeps assisting the pad.
        let step = def.footprint.0.max(def.footprint.1);
        let patrol = nudge_toward_center(env.game.map_size(), pos, step);
        env.game.order_patrol(unit, patrol);
        env.game.order_priority(unit, CommandPriority::Low);

        eco.total_build_power += def.build_speed;
        eco.factory_power += def.build_speed;

        let reach = def.build_distance * def.build_distance;
        for (factory, entry) in eco.factories.iter_mut() {
            if let Some(factory_pos) = env.game.unit_pos(*factory) {
                if factory_pos.sq_dist(pos) < reach {
                    entry.nanos.push(unit);
                }
            }
        }
    }

    fn on_destroyed(
        &self,
        eco: &mut EconomyManager<G>,
        env: &mut Env<'_, G>,
        unit: UnitId,
        _attacker: Option<UnitId>,
    ) {
        if env.game.is_being_built(unit) {
            return;
        }
        let build_speed = env.game.unit_def(UnitKind::Nano).build_speed;
        eco.total_build_power -= build_speed;
        eco.factory_power -= build_speed;
        for entry in eco.factories.values_mut() {
            entry.nanos.retain(|n| *n != unit);
        }
    }
}

struct SolarHandler;

impl<G: GameCallback + ResourceLayout> UnitHandler<G> for SolarHandler {
    fn on_created(
        &self,
        eco: &mut EconomyManager<G>,
        _env: &mut Env<'_, G>,
        _unit: UnitId,
        _builder: Option<UnitId>,
    ) {
        eco.solar_count += 1;
    }

    fn on_destroyed(
        &self,
        eco: &mut EconomyManager<G>,
        _env: &mut Env<'_, G>,
        _unit: UnitId,
        _attacker: Option<UnitId>,
    ) {
        eco.solar_count = eco.solar_count.saturating_sub(1);
    }
}

struct FusionHandler;

impl<G: GameCallback + ResourceLayout> UnitHandler<G> for FusionHandler {
    fn on_created(
        &self,
        eco: &mut EconomyManager<G>,
        _env: &mut Env<'_, G>,
        _unit: UnitId,
        _builder: Option<UnitId>,
    ) {
        eco.fusion_count += 1;
    }

    fn on_finished(&self, eco: &mut EconomyManager<G>, env: &mut Env<'_, G>, unit: UnitId) {
        // A standing reactor is worth defending right away.
        if let Some(pos) = env.game.unit_pos(unit) {
            eco.open_build_task(Priority::High, BuildKind::Fortress, pos);
        }
    }

    fn on_destroyed(
        &self,
        eco: &mut EconomyManager<G>,
        _env: &mut Env<'_, G>,
        _unit: UnitId,
        _attacker: Option<UnitId>,
    ) {
        eco.fusion_count = eco.fusion_count.saturating_sub(1);
    }
}

struct SingularityHandler;

impl<G: GameCallback + ResourceLayout> UnitHandler<G> for SingularityHandler {
    fn on_finished(&self, eco: &mut EconomyManager<G>, env: &mut Env<'_, G>, unit: UnitId) {
        let Some(pos) = env.game.unit_pos(unit) else {
            return;
        };
        // The single most valuable structure on the field: ring it with
        // heavy defense and keep its pad saturated with assist turrets.
        for _ in 0..3 {
            eco.open_build_task(Priority::High, BuildKind::Fortress, pos);
        }
        for _ in 0..4 {
            eco.open_build_task(Priority::High, BuildKind::Nano, pos);
        }
    }
}

struct PylonHandler;

impl<G: GameCallback + ResourceLayout> UnitHandler<G> for PylonHandler {
    fn on_created(
        &self,
        eco: &mut EconomyManager<G>,
        env: &mut Env<'_, G>,
        unit: UnitId,
        _builder: Option<UnitId>,
    ) {
        let Some(pos) = env.game.unit_pos(unit) else {
            return;
        };
        if let Some(cluster) = env.game.nearest_cluster(pos, |_| true) {
            if let Some(info) = eco.clusters.get_mut(cluster) {
                info.pylon = Some(unit);
            }
        }
    }

    fn on_destroyed(
        &self,
        eco: &mut EconomyManager<G>,
        _env: &mut Env<'_, G>,
        unit: UnitId,
        _attacker: Option<UnitId>,
    ) {
        for info in &mut eco.clusters {
            if info.pylon == Some(unit) {
                info.pylon = None;
            }
        }
    }
}
