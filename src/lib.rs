//! Decision core for an autonomous RTS economy agent.
//!
//! Two subsystems carry the weight: a frame-driven cooperative scheduler
//! ([`scheduler`]) that multiplexes deferred, periodic and background work
//! onto the simulation clock, and a demand-driven build-task engine
//! ([`economy`]) that opens, prioritizes and assigns work to a pool of
//! interchangeable construction units through a cost-ranked matching
//! heuristic. The engine itself stays behind the traits in [`game`]; a
//! deterministic harness in [`sim`] stands in for it in the demo binary
//! and the tests.

pub mod ai;
pub mod config;
pub mod economy;
pub mod game;
pub mod queue;
pub mod scheduler;
pub mod sim;
pub mod types;

pub use ai::{Ai, AiState, ExpansionSurvey};
pub use config::{ConfigError, EconomyConfig};
pub use economy::task::{BuildKind, BuildTask, FactoryKind, FactoryTask};
pub use economy::{ClusterInfo, EconomyManager, Env};
pub use game::{CommandPriority, Facing, GameCallback, ResourceLayout, UnitDef, UnitKind};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerService};
pub use types::{FRAMES_PER_SEC, Frame, JobId, Pos, Priority, TaskId, UnitId};
