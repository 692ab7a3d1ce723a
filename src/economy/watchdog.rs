//! Watchdog sweep over timeout-bounded assist assignments.

use tracing::debug;

use crate::game::{GameCallback, ResourceLayout};
use crate::types::{TaskId, UnitId};

use super::task::BuildKind;
use super::{EconomyManager, Env};

impl<G: GameCallback + ResourceLayout> EconomyManager<G> {
    /// Free every worker whose assist stint has outlived its timeout.
    ///
    /// Runs on a slow periodic slot; an expired assist is completed and
    /// removed, the worker's current order stopped, and its tracking entry
    /// dropped so the next idle event re-evaluates it from scratch.
    pub fn worker_watchdog(&mut self, env: &mut Env<'_, G>) {
        let expired: Vec<(UnitId, TaskId)> = self
            .assists
            .iter()
            .filter_map(|(worker, started)| {
                let tid = self.workers.get(worker).and_then(|w| w.task)?;
                let task = self.tasks.get(&tid)?;
                let overdue = task.kind == BuildKind::Assist
                    && task.timeout > 0
                    && env.frame - started > task.timeout;
                overdue.then_some((*worker, tid))
            })
            .collect();

        for (worker, tid) in expired {
            debug!(worker = worker.0, task = tid.0, "assist timed out; releasing worker");
            self.close_build_task(tid);
            env.game.order_stop(worker);
            self.assists.remove(&worker);
        }
    }
}
