//! Cost-rank cache: per-task worker orderings by estimated time-to-arrive.
//!
//! Recomputing ranks every frame would cost
//! `O(tasks * workers log workers)`; instead the cache is rebuilt at most
//! once per simulated second, or immediately after a task open/close or a
//! worker add/remove flips the dirty flag. Assignments between rebuilds may
//! read rankings up to one second stale; that staleness is the deliberate
//! trade and is bounded.

use std::collections::{BTreeMap, HashMap};

use crate::types::{FRAMES_PER_SEC, Frame, Pos, TaskId, UnitId};

#[derive(Clone, Copy, Debug)]
struct WorkerSnap {
    pos: Pos,
    sq_speed: f32,
}

pub(super) struct RankCache {
    cached_frame: Option<Frame>,
    dirty: bool,
    /// Per-task worker ids, best estimated arrival first.
    orders: HashMap<TaskId, Vec<UnitId>>,
    snapshot: BTreeMap<UnitId, WorkerSnap>,
}

impl RankCache {
    pub(super) fn new() -> Self {
        Self {
            cached_frame: None,
            dirty: true,
            orders: HashMap::new(),
            snapshot: BTreeMap::new(),
        }
    }

    pub(super) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(super) fn is_stale(&self, frame: Frame) -> bool {
        self.dirty
            || self
                .cached_frame
                .is_none_or(|cached| frame - cached >= FRAMES_PER_SEC)
    }

    /// Full rebuild: snapshot the workers, then sort the entire worker list
    /// for every open task slot by `sq_dist / sq_speed` ascending. Worker
    /// id breaks exact ties so identical snapshots rank identically.
    pub(super) fn refresh(
        &mut self,
        frame: Frame,
        workers: &[(UnitId, Pos, f32)],
        tasks: &[(TaskId, Pos)],
    ) {
        self.snapshot.clear();
        for (id, pos, max_speed) in workers {
            self.snapshot.insert(
                *id,
                WorkerSnap {
                    pos: *pos,
                    sq_speed: (max_speed * max_speed).max(f32::MIN_POSITIVE),
                },
            );
        }

        self.orders.clear();
        let ids: Vec<UnitId> = self.snapshot.keys().copied().collect();
        for (task, anchor) in tasks {
            let mut order = ids.clone();
            order.sort_by(|a, b| {
                let ta = self.arrival_estimate(*a, *anchor);
                let tb = self.arrival_estimate(*b, *anchor);
                ta.partial_cmp(&tb)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.cmp(b))
            });
            self.orders.insert(*task, order);
        }

        self.cached_frame = Some(frame);
        self.dirty = false;
    }

    fn arrival_estimate(&self, worker: UnitId, anchor: Pos) -> f32 {
        let snap = &self.snapshot[&worker];
        snap.pos.sq_dist(anchor) / snap.sq_speed
    }

    /// Rank of `worker` within a task's ordering; tasks opened since the
    /// last rebuild rank every worker equally last.
    pub(super) fn rank_of(&self, task: TaskId, worker: UnitId) -> usize {
        self.orders
            .get(&task)
            .and_then(|order| order.iter().position(|w| *w == worker))
            .unwrap_or(self.snapshot.len())
    }

    /// Snapshot position used for deterministic distance tie-breaks.
    pub(super) fn worker_pos(&self, worker: UnitId) -> Option<Pos> {
        self.snapshot.get(&worker).map(|snap| snap.pos)
    }
}
