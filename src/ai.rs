//! Top-level wiring: one AI instance per player.
//!
//! [`Ai`] owns a [`Scheduler`] and the simulation-side state it drives.
//! Construction registers the economy's periodic jobs and kicks off the
//! background expansion survey; the embedding layer forwards engine frames
//! to [`Ai::update`] and unit lifecycle events to the `unit_*` methods.

use std::sync::{Arc, Mutex};

use rand::SeedableRng;
use rand::rngs::SmallRng;
use tracing::info;

use crate::config::EconomyConfig;
use crate::economy::{EconomyManager, Env};
use crate::game::{GameCallback, ResourceLayout};
use crate::scheduler::{Scheduler, SchedulerHandle, SchedulerService};
use crate::types::{Frame, Pos, UnitId};

/// Spot-layout summary precomputed off-thread at startup.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExpansionSurvey {
    pub spot_count: usize,
    /// Mean distance from each spot to its nearest neighbor.
    pub mean_spacing: f32,
}

/// Everything the scheduler's jobs operate on.
pub struct AiState<G> {
    pub game: G,
    pub economy: EconomyManager<G>,
    pub rng: SmallRng,
    pub frame: Frame,
    pub survey: Option<ExpansionSurvey>,
}

impl<G: GameCallback + ResourceLayout> AiState<G> {
    /// Split into the economy manager and the environment it operates in.
    pub fn parts(&mut self) -> (&mut EconomyManager<G>, Env<'_, G>) {
        let AiState {
            game,
            economy,
            rng,
            frame,
            ..
        } = self;
        (
            economy,
            Env {
                game,
                rng,
                frame: *frame,
            },
        )
    }
}

/// One AI player: scheduler plus state.
pub struct Ai<G> {
    scheduler: Scheduler<AiState<G>>,
    state: AiState<G>,
}

impl<G: GameCallback + ResourceLayout + 'static> Ai<G> {
    pub fn new(
        service: &Arc<SchedulerService<AiState<G>>>,
        game: G,
        config: EconomyConfig,
        seed: u64,
    ) -> Self {
        let scheduler = Scheduler::new(service);
        let economy = EconomyManager::new(config);
        let state = AiState {
            game,
            economy,
            rng: SmallRng::seed_from_u64(seed),
            frame: 0,
            survey: None,
        };
        let mut ai = Self { scheduler, state };
        ai.register_jobs();
        ai.dispatch_survey();
        ai
    }

    fn register_jobs(&mut self) {
        // The resource layout is static; size the cluster table once the
        // simulation actually starts.
        self.scheduler.schedule_at(0, |state: &mut AiState<G>| {
            let clusters = state.game.cluster_count();
            state.economy.init_clusters(clusters);
        });

        let interval = self.state.economy.config().maintenance_interval;
        self.scheduler
            .schedule_every(interval, |state: &mut AiState<G>| {
                let (economy, mut env) = state.parts();
                economy.update_expand_tasks(&mut env);
            });
        self.scheduler
            .schedule_every(interval, |state: &mut AiState<G>| {
                let (economy, mut env) = state.parts();
                economy.update_energy_tasks(&mut env);
            });
        self.scheduler
            .schedule_every(interval, |state: &mut AiState<G>| {
                let (economy, mut env) = state.parts();
                economy.update_builder_tasks(&mut env);
            });
        self.scheduler
            .schedule_every(interval, |state: &mut AiState<G>| {
                let (economy, mut env) = state.parts();
                economy.update_factory_tasks(&mut env);
            });

        let watchdog_period = self.state.economy.config().watchdog_period_frames();
        self.scheduler
            .schedule_every(watchdog_period, |state: &mut AiState<G>| {
                let (economy, mut env) = state.parts();
                economy.worker_watchdog(&mut env);
            });
    }

    /// Survey the spot layout on the worker thread; the pairwise scan is
    /// quadratic in spots and has no business on the simulation thread.
    fn dispatch_survey(&mut self) {
        let spots: Vec<Pos> = (0..self.state.game.spot_count())
            .map(|s| self.state.game.spot_pos(s))
            .collect();
        let slot: Arc<Mutex<Option<ExpansionSurvey>>> = Arc::new(Mutex::new(None));
        let payload_slot = Arc::clone(&slot);
        self.scheduler.dispatch_background_then(
            move || {
                let survey = survey_spots(&spots);
                *payload_slot.lock().expect("survey slot poisoned") = Some(survey);
            },
            move |state: &mut AiState<G>| {
                if let Some(survey) = slot.lock().expect("survey slot poisoned").take() {
                    info!(
                        spots = survey.spot_count,
                        mean_spacing = survey.mean_spacing,
                        "expansion survey complete"
                    );
                    state.survey = Some(survey);
                }
            },
        );
    }

    /// Advance the decision core by one engine frame. Non-blocking.
    pub fn update(&mut self, frame: Frame) {
        self.state.frame = frame;
        self.scheduler.tick(frame, &mut self.state);
    }

    pub fn unit_created(&mut self, unit: UnitId, builder: Option<UnitId>) {
        let (economy, mut env) = self.state.parts();
        economy.unit_created(&mut env, unit, builder);
    }

    pub fn unit_finished(&mut self, unit: UnitId) {
        let (economy, mut env) = self.state.parts();
        economy.unit_finished(&mut env, unit);
    }

    pub fn unit_idle(&mut self, unit: UnitId) {
        let (economy, mut env) = self.state.parts();
        economy.unit_idle(&mut env, unit);
    }

    pub fn unit_destroyed(&mut self, unit: UnitId, attacker: Option<UnitId>) {
        let (economy, mut env) = self.state.parts();
        economy.unit_destroyed(&mut env, unit, attacker);
    }

    pub fn unit_given(&mut self, unit: UnitId) {
        let (economy, mut env) = self.state.parts();
        economy.unit_given(&mut env, unit);
    }

    pub fn unit_captured(&mut self, unit: UnitId) {
        let (economy, mut env) = self.state.parts();
        economy.unit_captured(&mut env, unit);
    }

    pub fn game(&self) -> &G {
        &self.state.game
    }

    pub fn game_mut(&mut self) -> &mut G {
        &mut self.state.game
    }

    pub fn economy(&self) -> &EconomyManager<G> {
        &self.state.economy
    }

    pub fn survey(&self) -> Option<ExpansionSurvey> {
        self.state.survey
    }

    /// Scheduling endpoint for sibling modules composed around this AI.
    pub fn scheduler_handle(&self) -> SchedulerHandle<AiState<G>> {
        self.scheduler.handle()
    }
}

fn survey_spots(spots: &[Pos]) -> ExpansionSurvey {
    let mut total = 0.0f32;
    let mut counted = 0usize;
    for (i, a) in spots.iter().enumerate() {
        let nearest = spots
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, b)| a.sq_dist(*b))
            .fold(f32::INFINITY, f32::min);
        if nearest.is_finite() {
            total += nearest.sqrt();
            counted += 1;
        }
    }
    ExpansionSurvey {
        spot_count: spots.len(),
        mean_spacing: if counted == 0 {
            0.0
        } else {
            total / counted as f32
        },
    }
}
