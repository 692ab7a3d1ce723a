//! Build and production task model.
//!
//! Tasks are plain data owned by the economy's id-keyed registry; buckets
//! hold ids only, so a task is never referenced from more than one bucket
//! and workers point at tasks through ids rather than references.

use crate::game::{CommandPriority, UnitKind};
use crate::types::{Frame, Pos, Priority, TaskId, UnitId};

/// What an open build task wants erected (or done) at its position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BuildKind {
    /// Claim a resource spot with an extractor.
    Expand,
    Solar,
    Fusion,
    Singularity,
    Pylon,
    Nano,
    Factory,
    /// Light defense turret.
    Turret,
    /// Heavy defense emplacement.
    Fortress,
    /// Sweep debris around the anchor position.
    Reclaim,
    /// Synthesized when no open task fits an idle worker.
    Default,
    /// Timeout-bounded help-out fallback after failed site resolution.
    Assist,
}

impl BuildKind {
    /// Structure this kind erects; `None` for non-construction work.
    pub fn structure(self) -> Option<UnitKind> {
        match self {
            BuildKind::Expand => Some(UnitKind::Extractor),
            BuildKind::Solar => Some(UnitKind::Solar),
            BuildKind::Fusion => Some(UnitKind::Fusion),
            BuildKind::Singularity => Some(UnitKind::Singularity),
            BuildKind::Pylon => Some(UnitKind::Pylon),
            BuildKind::Nano => Some(UnitKind::Nano),
            BuildKind::Factory => Some(UnitKind::Factory),
            BuildKind::Turret => Some(UnitKind::Turret),
            BuildKind::Fortress => Some(UnitKind::Fortress),
            BuildKind::Reclaim | BuildKind::Default | BuildKind::Assist => None,
        }
    }

    /// Engine command-queue priority used while executing this kind.
    pub fn command_priority(self) -> CommandPriority {
        match self {
            BuildKind::Nano => CommandPriority::Low,
            BuildKind::Fusion
            | BuildKind::Singularity
            | BuildKind::Pylon
            | BuildKind::Turret
            | BuildKind::Reclaim => CommandPriority::Normal,
            BuildKind::Expand
            | BuildKind::Solar
            | BuildKind::Factory
            | BuildKind::Fortress
            | BuildKind::Default
            | BuildKind::Assist => CommandPriority::High,
        }
    }

    /// Whether site search and placement use a map-center facing.
    pub fn needs_facing(self) -> bool {
        matches!(
            self,
            BuildKind::Factory
                | BuildKind::Fusion
                | BuildKind::Nano
                | BuildKind::Turret
                | BuildKind::Fortress
        )
    }

    /// How many workers may serve this kind concurrently.
    pub fn default_capacity(self) -> usize {
        match self {
            BuildKind::Expand
            | BuildKind::Pylon
            | BuildKind::Turret
            | BuildKind::Default
            | BuildKind::Assist => 1,
            BuildKind::Solar | BuildKind::Nano | BuildKind::Fortress | BuildKind::Reclaim => 2,
            BuildKind::Fusion | BuildKind::Singularity | BuildKind::Factory => 3,
        }
    }
}

/// An open unit of construction work.
#[derive(Clone, Debug)]
pub struct BuildTask {
    pub id: TaskId,
    pub priority: Priority,
    pub kind: BuildKind,
    /// Anchor the work gravitates toward.
    pub pos: Pos,
    /// Engine-validated placement; unset until resolution succeeds.
    pub build_pos: Option<Pos>,
    pub capacity: usize,
    pub assignees: Vec<UnitId>,
    /// The in-progress structure once construction has started.
    pub target: Option<UnitId>,
    /// Frames before the watchdog may reap this task; zero means never.
    pub timeout: Frame,
}

impl BuildTask {
    pub fn new(id: TaskId, priority: Priority, kind: BuildKind, pos: Pos) -> Self {
        Self {
            id,
            priority,
            kind,
            pos,
            build_pos: None,
            capacity: kind.default_capacity(),
            assignees: Vec::new(),
            target: None,
            timeout: 0,
        }
    }

    /// Number of workers currently serving the task.
    pub fn quantity(&self) -> usize {
        self.assignees.len()
    }

    pub fn is_full(&self) -> bool {
        self.assignees.len() >= self.capacity
    }

    /// Whether a worker with the given capabilities may take the task.
    pub fn can_assign(&self, can_reclaim: bool) -> bool {
        if self.is_full() {
            return false;
        }
        match self.kind {
            BuildKind::Reclaim => can_reclaim,
            _ => true,
        }
    }
}

/// What a factory production task asks its factories to turn out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FactoryKind {
    /// Construction workers, opened when builder power lags income.
    BuildPower,
    /// Combat units from the standing roster.
    FirePower,
    /// Synthesized when an idle factory finds no open production task.
    Default,
}

/// An open unit of factory production work.
#[derive(Clone, Debug)]
pub struct FactoryTask {
    pub id: TaskId,
    pub priority: Priority,
    pub kind: FactoryKind,
    pub pos: Pos,
    /// Only factories within this radius of `pos` may serve the task.
    pub radius: f32,
    /// Units to produce before the task is done.
    pub quota: u32,
    pub produced: u32,
    pub assignees: Vec<UnitId>,
}

impl FactoryTask {
    pub fn new(
        id: TaskId,
        priority: Priority,
        kind: FactoryKind,
        pos: Pos,
        radius: f32,
        quota: u32,
    ) -> Self {
        Self {
            id,
            priority,
            kind,
            pos,
            radius,
            quota,
            produced: 0,
            assignees: Vec::new(),
        }
    }

    pub fn can_assign_to(&self, factory_pos: Pos) -> bool {
        !self.is_done()
            && self.assignees.len() < self.quota as usize
            && self.pos.sq_dist(factory_pos) <= self.radius * self.radius
    }

    /// One produced unit finished.
    pub fn progress(&mut self) {
        self.produced += 1;
    }

    /// One in-progress unit was destroyed before finishing.
    pub fn regress(&mut self) {
        self.produced = self.produced.saturating_sub(1);
    }

    pub fn is_done(&self) -> bool {
        self.produced >= self.quota
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_task_refuses_assignment() {
        let mut task = BuildTask::new(TaskId(1), Priority::Low, BuildKind::Expand, Pos::new(0.0, 0.0));
        assert!(task.can_assign(false));
        task.assignees.push(UnitId(7));
        assert!(task.is_full());
        assert!(!task.can_assign(false));
    }

    #[test]
    fn reclaim_requires_the_capability() {
        let task = BuildTask::new(TaskId(1), Priority::Low, BuildKind::Reclaim, Pos::new(0.0, 0.0));
        assert!(!task.can_assign(false));
        assert!(task.can_assign(true));
    }

    #[test]
    fn factory_task_tracks_progress_and_regress() {
        let mut task = FactoryTask::new(
            TaskId(2),
            Priority::Low,
            FactoryKind::BuildPower,
            Pos::new(10.0, 10.0),
            100.0,
            2,
        );
        assert!(task.can_assign_to(Pos::new(20.0, 10.0)));
        assert!(!task.can_assign_to(Pos::new(500.0, 10.0)));

        task.progress();
        assert!(!task.is_done());
        task.regress();
        task.progress();
        task.progress();
        assert!(task.is_done());
        assert!(!task.can_assign_to(Pos::new(20.0, 10.0)));
    }

    #[test]
    fn construction_kinds_map_to_structures() {
        assert_eq!(BuildKind::Expand.structure(), Some(UnitKind::Extractor));
        assert_eq!(BuildKind::Assist.structure(), None);
        assert_eq!(BuildKind::Default.structure(), None);
    }
}
