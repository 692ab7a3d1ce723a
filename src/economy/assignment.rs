//! Assignment engine: binding idle workers and factories to open tasks.
//!
//! Worker matching is rank-first over the cost-rank cache, tie-broken by
//! assignee count (load-balance) and then squared distance, which makes
//! the choice a total order: identical snapshots always produce identical
//! assignments.

use rand::seq::SliceRandom;
use tracing::{debug, trace};

use crate::game::{Facing, GameCallback, ResourceLayout, UnitKind, facing_toward_center, nudge_toward_center};
use crate::types::{FRAMES_PER_SEC, Pos, Priority, TaskId, UnitId};

use super::task::{BuildKind, FactoryKind};
use super::{EconomyManager, Env};

/// How far the assist fallback patrols from where the worker stands.
const ASSIST_PATROL_STEP: f32 = 80.0;

/// How many seconds of travel to allow when hunting for a repair target.
const ASSIST_SEARCH_TRAVEL_SEC: f32 = 5.0;

/// Factory output mix for firepower production; repeats weight the pick.
const FIREPOWER_ROSTER: [UnitKind; 6] = [
    UnitKind::Raider,
    UnitKind::Skirmisher,
    UnitKind::Raider,
    UnitKind::Riot,
    UnitKind::Raider,
    UnitKind::Skirmisher,
];

impl<G: GameCallback + ResourceLayout> EconomyManager<G> {
    /// Bind an idle worker to the best open task, or synthesize a default
    /// one at its feet. A worker already holding a live task is left
    /// untouched.
    pub fn prepare_builder(&mut self, env: &mut Env<'_, G>, worker: UnitId) {
        if let Some(current) = self.workers.get(&worker).and_then(|w| w.task) {
            if self.tasks.contains_key(&current) {
                return;
            }
            // The task is gone; clear the stale link and re-match.
            if let Some(entry) = self.workers.get_mut(&worker) {
                entry.task = None;
            }
        }
        if !self.workers.contains_key(&worker) {
            return;
        }

        self.refresh_rank_cache(env);

        let can_reclaim = env
            .game
            .unit_kind(worker)
            .map(|kind| env.game.unit_def(kind).can_reclaim)
            .unwrap_or(false);

        let mut best_rank = usize::MAX;
        let mut candidates: Vec<TaskId> = Vec::new();
        for bucket in self.buckets.values() {
            for tid in bucket {
                let Some(task) = self.tasks.get(tid) else {
                    continue;
                };
                if !task.can_assign(can_reclaim) {
                    continue;
                }
                let rank = self.ranking.rank_of(*tid, worker);
                if rank < best_rank {
                    best_rank = rank;
                    candidates.clear();
                    candidates.push(*tid);
                } else if rank == best_rank {
                    candidates.push(*tid);
                }
            }
        }

        let chosen = self.break_ties(env, worker, &candidates);
        match chosen {
            Some(tid) => {
                self.assign_worker(worker, tid);
                self.rotate_to_back(tid);
                trace!(worker = worker.0, task = tid.0, "worker assigned");
            }
            None => {
                let pos = env
                    .game
                    .unit_pos(worker)
                    .unwrap_or_else(|| env.game.start_pos());
                let tid = self.open_build_task(Priority::Low, BuildKind::Default, pos);
                self.assign_worker(worker, tid);
                trace!(worker = worker.0, task = tid.0, "default task synthesized");
            }
        }
    }

    /// Smallest assignee count wins, then smallest squared distance to the
    /// task anchor, measured from the cached worker snapshot.
    fn break_ties(&self, env: &mut Env<'_, G>, worker: UnitId, candidates: &[TaskId]) -> Option<TaskId> {
        let (first, rest) = candidates.split_first()?;
        let worker_pos = self
            .ranking
            .worker_pos(worker)
            .or_else(|| env.game.unit_pos(worker))
            .unwrap_or_else(|| env.game.start_pos());

        let mut best = *first;
        let mut best_quantity = self.tasks[&best].quantity();
        let mut best_dist = self.tasks[&best].pos.sq_dist(worker_pos);
        for tid in rest {
            let task = &self.tasks[tid];
            let quantity = task.quantity();
            let dist = task.pos.sq_dist(worker_pos);
            if quantity < best_quantity || (quantity == best_quantity && dist < best_dist) {
                best = *tid;
                best_quantity = quantity;
                best_dist = dist;
            }
        }
        Some(best)
    }

    fn refresh_rank_cache(&mut self, env: &mut Env<'_, G>) {
        if !self.ranking.is_stale(env.frame) {
            return;
        }
        let workers: Vec<(UnitId, Pos, f32)> = self
            .workers
            .keys()
            .filter_map(|worker| {
                let pos = env.game.unit_pos(*worker)?;
                let kind = env.game.unit_kind(*worker)?;
                Some((*worker, pos, env.game.unit_def(kind).max_speed))
            })
            .collect();
        let tasks: Vec<(TaskId, Pos)> = self
            .buckets
            .values()
            .flatten()
            .filter_map(|tid| self.tasks.get(tid).map(|task| (*tid, task.pos)))
            .collect();
        self.ranking.refresh(env.frame, &workers, &tasks);
        trace!(
            workers = workers.len(),
            slots = tasks.len(),
            "rank cache rebuilt"
        );
    }

    /// Carry out the worker's current task: resolve a build site and issue
    /// the engine commands, falling back to a bounded assist stint when no
    /// site can be found anywhere.
    pub fn execute_builder(&mut self, env: &mut Env<'_, G>, worker: UnitId) {
        let Some(tid) = self.workers.get(&worker).and_then(|w| w.task) else {
            return;
        };
        let Some(task) = self.tasks.get(&tid) else {
            return;
        };
        match task.kind {
            BuildKind::Default | BuildKind::Assist => self.execute_assist(env, worker, tid),
            BuildKind::Reclaim => {
                env.game
                    .order_priority(worker, BuildKind::Reclaim.command_priority());
                let field = task.pos;
                // Patrolling the field reclaims whatever lies in it.
                env.game.order_patrol(worker, field);
            }
            _ => self.execute_construction(env, worker, tid),
        }
    }

    fn execute_construction(&mut self, env: &mut Env<'_, G>, worker: UnitId, tid: TaskId) {
        let (kind, anchor, build_pos, target) = {
            let task = &self.tasks[&tid];
            (task.kind, task.pos, task.build_pos, task.target)
        };
        let structure = kind
            .structure()
            .expect("construction task kinds map to a structure");

        env.game.order_priority(worker, kind.command_priority());

        if let Some(target) = target {
            // Construction already stands; help finish it.
            env.game.order_repair(worker, target);
            return;
        }

        let map = env.game.map_size();
        let facing_for =
            |pos: Pos| -> Option<Facing> { kind.needs_facing().then(|| facing_toward_center(map, pos)) };

        if let Some(pos) = build_pos {
            if env.game.can_build_at(structure, pos, facing_for(pos)) {
                env.game.order_build(worker, structure, pos, facing_for(pos));
                return;
            }
            // Ground was lost or blocked since resolution; search again.
        }

        let radius = match kind {
            BuildKind::Nano => env.game.unit_def(UnitKind::Nano).build_distance,
            BuildKind::Pylon => env.game.unit_def(UnitKind::Pylon).link_range,
            _ => self.cfg.site_search_radius,
        };

        let mut site = env
            .game
            .find_build_site(structure, anchor, radius, facing_for(anchor));
        if site.is_none() {
            site = self.search_near_resources(env, kind, structure, anchor, radius);
        }

        match site {
            Some(pos) => {
                if let Some(task) = self.tasks.get_mut(&tid) {
                    task.build_pos = Some(pos);
                }
                env.game.order_build(worker, structure, pos, facing_for(pos));
            }
            None => self.assist_fallback(env, worker, tid),
        }
    }

    /// Second-chance site search around the three nearest resource
    /// locations: pylon-less clusters for pylons, plain spots otherwise.
    fn search_near_resources(
        &self,
        env: &mut Env<'_, G>,
        kind: BuildKind,
        structure: UnitKind,
        anchor: Pos,
        radius: f32,
    ) -> Option<Pos> {
        let map = env.game.map_size();
        let facing_for =
            |pos: Pos| -> Option<Facing> { kind.needs_facing().then(|| facing_toward_center(map, pos)) };

        let origins: Vec<Pos> = if kind == BuildKind::Pylon {
            let clusters = &self.clusters;
            env.game
                .nearest_clusters(anchor, 3, |c| {
                    clusters.get(c).map_or(false, |info| info.pylon.is_none())
                })
                .into_iter()
                .map(|c| env.game.cluster_centroid(c))
                .collect()
        } else {
            env.game
                .nearest_spots(anchor, 3, |_| true)
                .into_iter()
                .map(|s| env.game.spot_pos(s))
                .collect()
        };

        origins
            .into_iter()
            .find_map(|origin| env.game.find_build_site(structure, origin, radius, facing_for(origin)))
    }

    /// Site resolution failed everywhere; the worker must never idle
    /// indefinitely. Abandon the task and help out nearby under a timeout
    /// the watchdog enforces.
    fn assist_fallback(&mut self, env: &mut Env<'_, G>, worker: UnitId, tid: TaskId) {
        debug!(
            worker = worker.0,
            task = tid.0,
            "no build site anywhere; falling back to assist"
        );
        self.close_build_task(tid);

        env.game.order_priority(worker, BuildKind::Assist.command_priority());
        let pos = env
            .game
            .unit_pos(worker)
            .unwrap_or_else(|| env.game.start_pos());
        let assist = self.open_build_task_with(
            Priority::Low,
            BuildKind::Assist,
            pos,
            None,
            self.cfg.assist_timeout_frames(),
        );
        self.assign_worker(worker, assist);

        let patrol = nudge_toward_center(env.game.map_size(), pos, ASSIST_PATROL_STEP);
        env.game.order_patrol(worker, patrol);
        self.assists.insert(worker, env.frame);
    }

    fn execute_assist(&mut self, env: &mut Env<'_, G>, worker: UnitId, tid: TaskId) {
        env.game
            .order_priority(worker, BuildKind::Assist.command_priority());
        let target = self
            .tasks
            .get(&tid)
            .and_then(|task| task.target)
            .or_else(|| self.find_unit_to_assist(env, worker));
        match target {
            Some(target) => env.game.order_repair(worker, target),
            None => {
                if let Some(pos) = env.game.unit_pos(worker) {
                    env.game.order_patrol(worker, pos);
                }
            }
        }
        self.assists.entry(worker).or_insert(env.frame);
    }

    /// Nearest damaged friendly the worker can realistically keep up with.
    fn find_unit_to_assist(&self, env: &mut Env<'_, G>, worker: UnitId) -> Option<UnitId> {
        let pos = env.game.unit_pos(worker)?;
        let kind = env.game.unit_kind(worker)?;
        let def = env.game.unit_def(kind);
        let max_speed = def.max_speed;
        let radius = def.build_distance + max_speed * FRAMES_PER_SEC as f32 * ASSIST_SEARCH_TRAVEL_SEC;

        env.game
            .friendly_units_in(pos, radius)
            .into_iter()
            .filter(|candidate| *candidate != worker)
            .find(|candidate| {
                let Some((health, max_health)) = env.game.unit_health(*candidate) else {
                    return false;
                };
                let candidate_speed = env
                    .game
                    .unit_kind(*candidate)
                    .map(|k| env.game.unit_def(k).max_speed)
                    .unwrap_or(0.0);
                health < max_health && candidate_speed <= max_speed * 2.0
            })
    }

    // ------------------------------------------------------------------
    // Factory counterpart.
    // ------------------------------------------------------------------

    /// Bind an idle factory to the first open production task that still
    /// has capacity for it, or open a generic one at its own pad.
    pub fn prepare_factory(&mut self, env: &mut Env<'_, G>, factory: UnitId) {
        if let Some(current) = self.factories.get(&factory).and_then(|f| f.task) {
            if self.factory_tasks.contains_key(&current) {
                return;
            }
            if let Some(entry) = self.factories.get_mut(&factory) {
                entry.task = None;
            }
        }
        if !self.factories.contains_key(&factory) {
            return;
        }
        let Some(pos) = env.game.unit_pos(factory) else {
            return;
        };

        let picked = self
            .factory_queue
            .iter()
            .copied()
            .find(|tid| {
                self.factory_tasks
                    .get(tid)
                    .is_some_and(|task| task.can_assign_to(pos))
            });
        let tid = picked.unwrap_or_else(|| {
            let footprint = env.game.unit_def(UnitKind::Factory).footprint;
            let radius = footprint.0.max(footprint.1) * 4.0;
            self.open_factory_task(Priority::Low, FactoryKind::Default, pos, radius, 2)
        });

        if let Some(task) = self.factory_tasks.get_mut(&tid) {
            task.assignees.push(factory);
        }
        if let Some(entry) = self.factories.get_mut(&factory) {
            entry.task = Some(tid);
        }
        if let Some(at) = self.factory_queue.iter().position(|t| *t == tid) {
            self.factory_queue.remove(at);
            self.factory_queue.push_back(tid);
        }
    }

    /// Queue one unit of the type the current production task asks for.
    pub fn execute_factory(&mut self, env: &mut Env<'_, G>, factory: UnitId) {
        let Some(tid) = self.factories.get(&factory).and_then(|f| f.task) else {
            return;
        };
        let Some(task) = self.factory_tasks.get(&tid) else {
            return;
        };
        let output = match task.kind {
            FactoryKind::BuildPower => UnitKind::Worker,
            FactoryKind::FirePower | FactoryKind::Default => *FIREPOWER_ROSTER
                .choose(env.rng)
                .expect("roster is never empty"),
        };
        env.game.order_produce(factory, output);
    }
}
