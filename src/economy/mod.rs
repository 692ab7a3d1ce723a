//! Demand-driven economy: task catalog, worker registry and assignment.
//!
//! The [`EconomyManager`] owns every open task in an id-keyed registry with
//! per-kind insertion-ordered buckets, tracks live workers and factories,
//! and reacts to unit lifecycle events through a handler registry keyed by
//! [`UnitKind`]. Periodic maintenance jobs (see [`maintenance`]) open new
//! tasks when economic thresholds are crossed; the assignment engine (see
//! [`assignment`]) binds idle workers to open tasks through the throttled
//! cost-rank cache in [`ranking`]; the [`watchdog`] sweep frees workers
//! stuck in timed-out assist fallbacks.
//!
//! All of this state lives on the simulation thread; the only cross-thread
//! surface in the crate is the scheduler's background dispatch.

pub mod task;

mod assignment;
mod handlers;
mod maintenance;
mod ranking;
mod watchdog;

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

use rand::rngs::SmallRng;
use tracing::debug;

use crate::config::EconomyConfig;
use crate::game::{GameCallback, ResourceLayout, UnitKind};
use crate::types::{ClusterId, Frame, Pos, Priority, TaskId, UnitId};

use self::handlers::{UnitHandler, default_handlers};
use self::ranking::RankCache;
use self::task::{BuildKind, BuildTask, FactoryKind, FactoryTask};

/// Mutable world access handed to economy operations for one call.
pub struct Env<'a, G> {
    pub game: &'a mut G,
    pub rng: &'a mut SmallRng,
    pub frame: Frame,
}

/// Which task family an under-construction unit belongs to.
#[derive(Clone, Copy, Debug)]
enum TaskRef {
    Build(TaskId),
    Factory(TaskId),
}

#[derive(Debug, Default)]
struct WorkerEntry {
    task: Option<TaskId>,
}

#[derive(Debug, Default)]
struct FactoryEntry {
    /// Assist turrets inside this factory's service radius.
    nanos: Vec<UnitId>,
    task: Option<TaskId>,
}

/// Per-cluster occupancy used to prevent duplicate placement.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClusterInfo {
    pub factory: Option<UnitId>,
    pub pylon: Option<UnitId>,
}

/// The build-task catalog and assignment engine.
pub struct EconomyManager<G> {
    cfg: EconomyConfig,
    handlers: HashMap<UnitKind, Rc<dyn UnitHandler<G>>>,

    tasks: HashMap<TaskId, BuildTask>,
    buckets: BTreeMap<BuildKind, VecDeque<TaskId>>,
    /// Open build tasks; kept exactly in sync with bucket insert/erase and
    /// consulted by the demand gates instead of the bucket contents.
    open_tasks: usize,

    factory_tasks: HashMap<TaskId, FactoryTask>,
    factory_queue: VecDeque<TaskId>,
    next_task: u64,

    workers: BTreeMap<UnitId, WorkerEntry>,
    factories: BTreeMap<UnitId, FactoryEntry>,
    clusters: Vec<ClusterInfo>,

    /// Unit under construction -> the task erecting it.
    unfinished: HashMap<UnitId, TaskRef>,
    /// Factory task -> its in-progress production units.
    factory_task_units: HashMap<TaskId, Vec<UnitId>>,
    /// Worker -> frame its current assist stint started.
    assists: BTreeMap<UnitId, Frame>,

    total_build_power: f32,
    builder_power: f32,
    factory_power: f32,
    solar_count: u32,
    fusion_count: u32,

    ranking: RankCache,
}

impl<G: GameCallback + ResourceLayout> EconomyManager<G> {
    pub fn new(cfg: EconomyConfig) -> Self {
        Self {
            cfg,
            handlers: default_handlers(),
            tasks: HashMap::new(),
            buckets: BTreeMap::new(),
            open_tasks: 0,
            factory_tasks: HashMap::new(),
            factory_queue: VecDeque::new(),
            next_task: 0,
            workers: BTreeMap::new(),
            factories: BTreeMap::new(),
            clusters: Vec::new(),
            unfinished: HashMap::new(),
            factory_task_units: HashMap::new(),
            assists: BTreeMap::new(),
            total_build_power: 0.0,
            builder_power: 0.0,
            factory_power: 0.0,
            solar_count: 0,
            fusion_count: 0,
            ranking: RankCache::new(),
        }
    }

    /// Size the per-cluster occupancy table; run once the resource layout
    /// is known.
    pub fn init_clusters(&mut self, count: usize) {
        self.clusters = vec![ClusterInfo::default(); count];
    }

    // ------------------------------------------------------------------
    // Lifecycle events, forwarded exactly once in engine order.
    // ------------------------------------------------------------------

    pub fn unit_created(&mut self, env: &mut Env<'_, G>, unit: UnitId, builder: Option<UnitId>) {
        let Some(kind) = env.game.unit_kind(unit) else {
            return;
        };
        if env.game.is_being_built(unit) {
            if let Some(builder) = builder {
                self.link_construction(unit, builder);
            }
        }
        if let Some(handler) = self.handlers.get(&kind).cloned() {
            handler.on_created(self, env, unit, builder);
        }
    }

    pub fn unit_finished(&mut self, env: &mut Env<'_, G>, unit: UnitId) {
        if let Some(link) = self.unfinished.remove(&unit) {
            match link {
                TaskRef::Build(tid) => {
                    // The targeted construction exists now; the task is done.
                    self.close_build_task(tid);
                }
                TaskRef::Factory(tid) => {
                    let done = match self.factory_tasks.get_mut(&tid) {
                        Some(task) => {
                            task.progress();
                            task.is_done()
                        }
                        None => false,
                    };
                    if done {
                        if let Some(units) = self.factory_task_units.remove(&tid) {
                            for sibling in units {
                                self.unfinished.remove(&sibling);
                            }
                        }
                        self.close_factory_task(tid);
                    } else if let Some(units) = self.factory_task_units.get_mut(&tid) {
                        units.retain(|u| *u != unit);
                    }
                }
            }
        }

        let Some(kind) = env.game.unit_kind(unit) else {
            return;
        };
        if let Some(handler) = self.handlers.get(&kind).cloned() {
            handler.on_finished(self, env, unit);
        }
    }

    pub fn unit_idle(&mut self, env: &mut Env<'_, G>, unit: UnitId) {
        let Some(kind) = env.game.unit_kind(unit) else {
            return;
        };
        if let Some(handler) = self.handlers.get(&kind).cloned() {
            handler.on_idle(self, env, unit);
        }
    }

    pub fn unit_destroyed(
        &mut self,
        env: &mut Env<'_, G>,
        unit: UnitId,
        attacker: Option<UnitId>,
    ) {
        if env.game.is_being_built(unit) {
            if let Some(link) = self.unfinished.remove(&unit) {
                match link {
                    TaskRef::Build(tid) => {
                        // Task survives; the next executor restarts the build.
                        if let Some(task) = self.tasks.get_mut(&tid) {
                            task.target = None;
                        }
                    }
                    TaskRef::Factory(tid) => {
                        if let Some(units) = self.factory_task_units.get_mut(&tid) {
                            units.retain(|u| *u != unit);
                            if units.is_empty() {
                                self.factory_task_units.remove(&tid);
                            }
                        }
                        if let Some(task) = self.factory_tasks.get_mut(&tid) {
                            task.regress();
                        }
                    }
                }
            }
        }

        let Some(kind) = env.game.unit_kind(unit) else {
            return;
        };
        if let Some(handler) = self.handlers.get(&kind).cloned() {
            handler.on_destroyed(self, env, unit, attacker);
        }
    }

    /// A unit handed over by an ally behaves like a fresh created+finished.
    pub fn unit_given(&mut self, env: &mut Env<'_, G>, unit: UnitId) {
        self.unit_created(env, unit, None);
        self.unit_finished(env, unit);
    }

    /// A captured unit leaves the team like a destroyed one.
    pub fn unit_captured(&mut self, env: &mut Env<'_, G>, unit: UnitId) {
        self.unit_destroyed(env, unit, None);
    }

    fn link_construction(&mut self, unit: UnitId, builder: UnitId) {
        if let Some(tid) = self.workers.get(&builder).and_then(|w| w.task) {
            if let Some(task) = self.tasks.get_mut(&tid) {
                task.target = Some(unit);
                self.unfinished.insert(unit, TaskRef::Build(tid));
            }
        } else if let Some(tid) = self.factories.get(&builder).and_then(|f| f.task) {
            if self.factory_tasks.contains_key(&tid) {
                self.unfinished.insert(unit, TaskRef::Factory(tid));
                self.factory_task_units.entry(tid).or_default().push(unit);
            }
        }
    }

    // ------------------------------------------------------------------
    // Task registry mutation. Insert and erase are the only two places
    // the open-task counter moves.
    // ------------------------------------------------------------------

    fn alloc_task_id(&mut self) -> TaskId {
        self.next_task += 1;
        TaskId(self.next_task)
    }

    /// Open a build task of `kind` anchored at `pos`.
    pub fn open_build_task(&mut self, priority: Priority, kind: BuildKind, pos: Pos) -> TaskId {
        self.open_build_task_with(priority, kind, pos, None, 0)
    }

    /// Open a build task with a pre-resolved build position or a timeout.
    pub fn open_build_task_with(
        &mut self,
        priority: Priority,
        kind: BuildKind,
        pos: Pos,
        build_pos: Option<Pos>,
        timeout: Frame,
    ) -> TaskId {
        let id = self.alloc_task_id();
        let mut task = BuildTask::new(id, priority, kind, pos);
        task.build_pos = build_pos;
        task.timeout = timeout;
        self.tasks.insert(id, task);
        // Newest tasks go to the bucket front, like the catalog has always
        // scanned them; assignment rotates busy ones to the back.
        self.buckets.entry(kind).or_default().push_front(id);
        self.open_tasks += 1;
        self.ranking.mark_dirty();
        debug!(task = id.0, ?kind, ?priority, "opened build task");
        id
    }

    /// Close a build task: drop it from its bucket and unlink every
    /// assignee. Safe to call with an already-closed id.
    pub fn close_build_task(&mut self, id: TaskId) -> Option<BuildTask> {
        let task = self.tasks.remove(&id)?;
        if let Some(bucket) = self.buckets.get_mut(&task.kind) {
            bucket.retain(|tid| *tid != id);
        }
        self.open_tasks = self.open_tasks.saturating_sub(1);
        for worker in &task.assignees {
            if let Some(entry) = self.workers.get_mut(worker) {
                entry.task = None;
            }
        }
        self.ranking.mark_dirty();
        debug!(task = id.0, kind = ?task.kind, "closed build task");
        Some(task)
    }

    /// Open a factory production task.
    pub fn open_factory_task(
        &mut self,
        priority: Priority,
        kind: FactoryKind,
        pos: Pos,
        radius: f32,
        quota: u32,
    ) -> TaskId {
        let id = self.alloc_task_id();
        self.factory_tasks
            .insert(id, FactoryTask::new(id, priority, kind, pos, radius, quota));
        self.factory_queue.push_front(id);
        debug!(task = id.0, ?kind, "opened factory task");
        id
    }

    /// Close a factory task and unlink its factories.
    pub fn close_factory_task(&mut self, id: TaskId) -> Option<FactoryTask> {
        let task = self.factory_tasks.remove(&id)?;
        self.factory_queue.retain(|tid| *tid != id);
        for factory in &task.assignees {
            if let Some(entry) = self.factories.get_mut(factory) {
                entry.task = None;
            }
        }
        self.factory_task_units.remove(&id);
        self.ranking.mark_dirty();
        Some(task)
    }

    fn assign_worker(&mut self, worker: UnitId, task: TaskId) {
        if let Some(entry) = self.workers.get_mut(&worker) {
            entry.task = Some(task);
        }
        if let Some(task) = self.tasks.get_mut(&task) {
            task.assignees.push(worker);
        }
    }

    /// Two-sided unlink of a worker from its current task.
    fn unassign_worker(&mut self, worker: UnitId) {
        let Some(entry) = self.workers.get_mut(&worker) else {
            return;
        };
        let Some(tid) = entry.task.take() else {
            return;
        };
        if let Some(task) = self.tasks.get_mut(&tid) {
            task.assignees.retain(|w| *w != worker);
        }
    }

    /// Rotate a task to the back of its bucket so repeatedly-scanned
    /// entries do not dominate every scan.
    fn rotate_to_back(&mut self, id: TaskId) {
        let Some(kind) = self.tasks.get(&id).map(|t| t.kind) else {
            return;
        };
        if let Some(bucket) = self.buckets.get_mut(&kind) {
            if let Some(at) = bucket.iter().position(|tid| *tid == id) {
                bucket.remove(at);
                bucket.push_back(id);
            }
        }
    }

    fn bucket_is_empty(&self, kind: BuildKind) -> bool {
        self.buckets.get(&kind).is_none_or(|b| b.is_empty())
    }

    /// Demand gate: outstanding build tasks are capped by worker count.
    fn demand_gate_closed(&self) -> bool {
        self.open_tasks >= self.workers.len() * self.cfg.open_task_multiplier
    }

    // ------------------------------------------------------------------
    // Read accessors for sibling decision modules and tests.
    // ------------------------------------------------------------------

    pub fn config(&self) -> &EconomyConfig {
        &self.cfg
    }

    pub fn total_build_power(&self) -> f32 {
        self.total_build_power
    }

    pub fn builder_power(&self) -> f32 {
        self.builder_power
    }

    pub fn factory_power(&self) -> f32 {
        self.factory_power
    }

    pub fn solar_count(&self) -> u32 {
        self.solar_count
    }

    pub fn fusion_count(&self) -> u32 {
        self.fusion_count
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn factory_count(&self) -> usize {
        self.factories.len()
    }

    /// Open build tasks as counted by the demand gates.
    pub fn open_task_count(&self) -> usize {
        self.open_tasks
    }

    /// Total bucket population; equals [`open_task_count`] by invariant.
    ///
    /// [`open_task_count`]: Self::open_task_count
    pub fn bucket_population(&self) -> usize {
        self.buckets.values().map(VecDeque::len).sum()
    }

    pub fn open_factory_task_count(&self) -> usize {
        self.factory_queue.len()
    }

    pub fn task(&self, id: TaskId) -> Option<&BuildTask> {
        self.tasks.get(&id)
    }

    pub fn factory_task(&self, id: TaskId) -> Option<&FactoryTask> {
        self.factory_tasks.get(&id)
    }

    /// Bucket contents of one kind, front (next scanned) first.
    pub fn bucket_ids(&self, kind: BuildKind) -> Vec<TaskId> {
        self.buckets
            .get(&kind)
            .map(|b| b.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn open_tasks_of(&self, kind: BuildKind) -> usize {
        self.buckets.get(&kind).map_or(0, VecDeque::len)
    }

    pub fn worker_task(&self, worker: UnitId) -> Option<TaskId> {
        self.workers.get(&worker).and_then(|w| w.task)
    }

    pub fn factory_current_task(&self, factory: UnitId) -> Option<TaskId> {
        self.factories.get(&factory).and_then(|f| f.task)
    }

    pub fn factory_nano_count(&self, factory: UnitId) -> usize {
        self.factories.get(&factory).map_or(0, |f| f.nanos.len())
    }

    pub fn cluster(&self, cluster: ClusterId) -> Option<&ClusterInfo> {
        self.clusters.get(cluster)
    }

    /// Frame the worker's current assist stint started, if tracked.
    pub fn assist_started(&self, worker: UnitId) -> Option<Frame> {
        self.assists.get(&worker).copied()
    }
}
