use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::config::EconomyConfig;
use crate::game::{GameCallback, ResourceLayout, UnitKind};
use crate::sim::{GameEvent, SimGame};
use crate::types::{FRAMES_PER_SEC, Frame, Pos, Priority, UnitId};

use super::task::{BuildKind, FactoryKind};
use super::{EconomyManager, Env};

struct Fixture {
    game: SimGame,
    rng: SmallRng,
    eco: EconomyManager<SimGame>,
}

impl Fixture {
    fn new(game: SimGame) -> Self {
        Self::with_config(game, EconomyConfig::default())
    }

    fn with_config(game: SimGame, config: EconomyConfig) -> Self {
        let mut eco = EconomyManager::new(config);
        eco.init_clusters(game.cluster_count());
        Self {
            game,
            rng: SmallRng::seed_from_u64(1),
            eco,
        }
    }

    fn parts(&mut self, frame: Frame) -> (&mut EconomyManager<SimGame>, Env<'_, SimGame>) {
        let Fixture { game, rng, eco } = self;
        (eco, Env { game, rng, frame })
    }

    /// Forward pending sim events at `frame`, engine order preserved.
    fn pump(&mut self, frame: Frame) {
        for event in self.game.take_events() {
            let (eco, mut env) = self.parts(frame);
            match event {
                GameEvent::Created { unit, builder } => eco.unit_created(&mut env, unit, builder),
                GameEvent::Finished(unit) => eco.unit_finished(&mut env, unit),
                GameEvent::Idle(unit) => eco.unit_idle(&mut env, unit),
                GameEvent::Destroyed { unit, attacker } => {
                    eco.unit_destroyed(&mut env, unit, attacker)
                }
            }
        }
    }

    fn add_worker(&mut self, pos: Pos) -> UnitId {
        let unit = self.game.spawn_finished(UnitKind::Worker, pos);
        self.pump(0);
        unit
    }

    fn assert_counter_in_sync(&self) {
        assert_eq!(
            self.eco.open_task_count(),
            self.eco.bucket_population(),
            "open-task counter must track bucket contents exactly"
        );
    }
}

fn spotted_world() -> SimGame {
    SimGame::new(2048.0, 2048.0)
        .with_spots(
            vec![
                (Pos::new(300.0, 300.0), 0),
                (Pos::new(420.0, 300.0), 0),
                (Pos::new(300.0, 420.0), 0),
                (Pos::new(1500.0, 1500.0), 1),
                (Pos::new(1620.0, 1500.0), 1),
                (Pos::new(1500.0, 1620.0), 1),
            ],
            vec![Pos::new(340.0, 340.0), Pos::new(1540.0, 1540.0)],
        )
        .with_start(Pos::new(320.0, 320.0))
}

#[test]
fn demand_gate_refuses_at_equality() {
    let mut fx = Fixture::new(spotted_world());
    for i in 0..10 {
        fx.add_worker(Pos::new(100.0 + i as f32 * 20.0, 100.0));
    }
    for _ in 0..20 {
        let (eco, _) = fx.parts(0);
        eco.open_build_task(Priority::Low, BuildKind::Turret, Pos::new(600.0, 600.0));
    }
    assert_eq!(fx.eco.open_task_count(), 20);
    fx.game.set_income(100.0, 90.0);

    let (eco, mut env) = fx.parts(0);
    eco.update_expand_tasks(&mut env);
    eco.update_energy_tasks(&mut env);
    eco.update_builder_tasks(&mut env);
    assert_eq!(
        fx.eco.open_task_count(),
        20,
        "gate holds at workers * 2 exactly"
    );

    // One slot under the gate and demand flows again.
    let victim = fx.eco.bucket_ids(BuildKind::Turret)[0];
    let (eco, mut env) = fx.parts(0);
    eco.close_build_task(victim);
    eco.update_expand_tasks(&mut env);
    assert!(fx.eco.open_task_count() > 19);
    fx.assert_counter_in_sync();
}

#[test]
fn energy_ramp_opens_high_priority_solar_tasks() {
    let mut fx = Fixture::new(spotted_world());
    for i in 0..10 {
        fx.add_worker(Pos::new(100.0 + i as f32 * 20.0, 100.0));
    }
    for i in 0..5 {
        fx.game
            .spawn_finished(UnitKind::Solar, Pos::new(700.0 + i as f32 * 60.0, 700.0));
    }
    fx.pump(0);
    assert_eq!(fx.eco.solar_count(), 5);
    fx.game.set_income(100.0, 90.0);

    let (eco, mut env) = fx.parts(0);
    eco.update_energy_tasks(&mut env);

    let opened = fx.eco.bucket_ids(BuildKind::Solar);
    assert_eq!(opened.len(), 10 / 4 + 2);
    for tid in opened {
        assert_eq!(fx.eco.task(tid).expect("open").priority, Priority::High);
    }
    fx.assert_counter_in_sync();
}

#[test]
fn energy_ramp_stops_at_the_solar_cap() {
    let mut fx = Fixture::new(spotted_world());
    fx.add_worker(Pos::new(100.0, 100.0));
    for i in 0..16 {
        fx.game.spawn_finished(
            UnitKind::Solar,
            Pos::new(620.0 + (i % 4) as f32 * 60.0, 700.0 + (i / 4) as f32 * 60.0),
        );
    }
    fx.pump(0);
    fx.game.set_income(100.0, 90.0);

    let (eco, mut env) = fx.parts(0);
    eco.update_energy_tasks(&mut env);
    assert_eq!(fx.eco.open_tasks_of(BuildKind::Solar), 0);
}

#[test]
fn fusion_branch_opens_fusion_and_one_pylon() {
    let config = EconomyConfig {
        solar_cap: 0,
        ..EconomyConfig::default()
    };
    let mut fx = Fixture::with_config(spotted_world(), config);
    for i in 0..4 {
        fx.add_worker(Pos::new(100.0 + i as f32 * 20.0, 100.0));
    }
    fx.game.set_income(50.0, 90.0);

    let (eco, mut env) = fx.parts(0);
    eco.update_energy_tasks(&mut env);
    assert_eq!(fx.eco.open_tasks_of(BuildKind::Fusion), 1);
    assert_eq!(fx.eco.open_tasks_of(BuildKind::Pylon), 1);

    // Re-running cannot double-book the same cluster's pylon.
    let (eco, mut env) = fx.parts(4);
    eco.open_pylon_task(&mut env);
    assert_eq!(fx.eco.open_tasks_of(BuildKind::Pylon), 1);
    fx.assert_counter_in_sync();
}

#[test]
fn singularity_branch_takes_over_past_the_fusion_cap() {
    let config = EconomyConfig {
        solar_cap: 0,
        fusion_cap: 0,
        ..EconomyConfig::default()
    };
    let mut fx = Fixture::with_config(spotted_world(), config);
    fx.add_worker(Pos::new(100.0, 100.0));
    fx.game.set_income(50.0, 90.0);

    let (eco, mut env) = fx.parts(0);
    eco.update_energy_tasks(&mut env);
    assert_eq!(fx.eco.open_tasks_of(BuildKind::Singularity), 1);
}

#[test]
fn builder_maintenance_prefers_staffing_an_existing_factory() {
    let mut fx = Fixture::new(spotted_world());
    fx.add_worker(Pos::new(100.0, 100.0));
    fx.game
        .spawn_finished(UnitKind::Factory, Pos::new(800.0, 800.0));
    fx.pump(0);
    fx.game.set_income(50.0, 90.0);

    let (eco, mut env) = fx.parts(0);
    eco.update_builder_tasks(&mut env);
    assert_eq!(fx.eco.open_tasks_of(BuildKind::Nano), 1);
    assert_eq!(fx.eco.open_tasks_of(BuildKind::Factory), 0);
}

#[test]
fn builder_maintenance_founds_a_factory_on_an_unclaimed_cluster() {
    let mut fx = Fixture::new(spotted_world());
    fx.add_worker(Pos::new(100.0, 100.0));
    fx.game.set_income(50.0, 90.0);

    let (eco, mut env) = fx.parts(0);
    eco.update_builder_tasks(&mut env);
    let opened = fx.eco.bucket_ids(BuildKind::Factory);
    assert_eq!(opened.len(), 1);
    let anchor = fx.eco.task(opened[0]).expect("open").pos;
    // Nearest cluster centroid to the home position.
    assert_eq!(anchor, fx.game.cluster_centroid(0));
}

#[test]
fn factory_production_demand_is_capped_per_factory() {
    let mut fx = Fixture::new(spotted_world());
    fx.add_worker(Pos::new(100.0, 100.0));
    fx.game
        .spawn_finished(UnitKind::Factory, Pos::new(800.0, 800.0));
    fx.pump(0);
    fx.game.set_income(50.0, 90.0);

    // Factory registration already queued one default production task.
    let baseline = fx.eco.open_factory_task_count();
    let (eco, mut env) = fx.parts(0);
    eco.update_factory_tasks(&mut env);
    assert_eq!(fx.eco.open_factory_task_count(), baseline + 1);

    // Cap: one factory allows at most two open production tasks.
    let (eco, mut env) = fx.parts(4);
    eco.update_factory_tasks(&mut env);
    assert_eq!(fx.eco.open_factory_task_count(), 2);
}

#[test]
fn idle_worker_takes_the_best_ranked_task() {
    let mut fx = Fixture::new(spotted_world());
    let near = fx.add_worker(Pos::new(300.0, 290.0));
    let _far = fx.add_worker(Pos::new(1500.0, 1490.0));

    let (eco, _) = fx.parts(0);
    let close_task = eco.open_build_task(Priority::Low, BuildKind::Solar, Pos::new(340.0, 340.0));
    let _far_task = eco.open_build_task(Priority::Low, BuildKind::Solar, Pos::new(1540.0, 1540.0));

    let (eco, mut env) = fx.parts(1);
    eco.prepare_builder(&mut env, near);
    assert_eq!(fx.eco.worker_task(near), Some(close_task));
    let task = fx.eco.task(close_task).expect("open");
    assert_eq!(task.assignees, vec![near]);
}

#[test]
fn equal_rank_prefers_the_less_loaded_task() {
    let mut fx = Fixture::new(spotted_world());
    let subject = fx.add_worker(Pos::new(500.0, 500.0));
    let helper = fx.add_worker(Pos::new(1900.0, 1900.0));

    let (eco, _) = fx.parts(0);
    let loaded = eco.open_build_task(Priority::Low, BuildKind::Solar, Pos::new(400.0, 500.0));
    let empty = eco.open_build_task(Priority::Low, BuildKind::Solar, Pos::new(600.0, 500.0));
    eco.assign_worker(helper, loaded);

    let (eco, mut env) = fx.parts(1);
    eco.prepare_builder(&mut env, subject);
    assert_eq!(fx.eco.worker_task(subject), Some(empty));
}

#[test]
fn assignment_is_deterministic_across_identical_snapshots() {
    let run = || {
        let mut fx = Fixture::new(spotted_world());
        let worker = fx.add_worker(Pos::new(500.0, 500.0));
        let (eco, _) = fx.parts(0);
        eco.open_build_task(Priority::Low, BuildKind::Solar, Pos::new(400.0, 500.0));
        eco.open_build_task(Priority::Low, BuildKind::Solar, Pos::new(600.0, 500.0));
        eco.open_build_task(Priority::Low, BuildKind::Turret, Pos::new(500.0, 400.0));
        let (eco, mut env) = fx.parts(1);
        eco.prepare_builder(&mut env, worker);
        fx.eco.worker_task(worker).expect("assigned")
    };
    assert_eq!(run(), run());
}

#[test]
fn prepare_builder_is_idempotent_for_a_valid_assignment() {
    let mut fx = Fixture::new(spotted_world());
    let worker = fx.add_worker(Pos::new(300.0, 300.0));
    let (eco, _) = fx.parts(0);
    eco.open_build_task(Priority::Low, BuildKind::Solar, Pos::new(340.0, 340.0));
    eco.open_build_task(Priority::Low, BuildKind::Solar, Pos::new(360.0, 360.0));

    let (eco, mut env) = fx.parts(1);
    eco.prepare_builder(&mut env, worker);
    let assigned = fx.eco.worker_task(worker).expect("assigned");
    let order = fx.eco.bucket_ids(BuildKind::Solar);

    let (eco, mut env) = fx.parts(2);
    eco.prepare_builder(&mut env, worker);
    assert_eq!(fx.eco.worker_task(worker), Some(assigned));
    assert_eq!(
        fx.eco.bucket_ids(BuildKind::Solar),
        order,
        "no-op must not rotate the bucket again"
    );
}

#[test]
fn worker_with_no_candidates_gets_a_default_task() {
    let mut fx = Fixture::new(spotted_world());
    let worker = fx.add_worker(Pos::new(500.0, 500.0));
    let (eco, mut env) = fx.parts(1);
    eco.prepare_builder(&mut env, worker);

    let tid = fx.eco.worker_task(worker).expect("assigned");
    let task = fx.eco.task(tid).expect("open");
    assert_eq!(task.kind, BuildKind::Default);
    assert_eq!(task.pos, Pos::new(500.0, 500.0));
    fx.assert_counter_in_sync();
}

#[test]
fn destroyed_workers_leave_the_rankings() {
    let mut fx = Fixture::new(spotted_world());
    let doomed = fx.add_worker(Pos::new(300.0, 300.0));
    let survivor = fx.add_worker(Pos::new(320.0, 300.0));

    let (eco, _) = fx.parts(0);
    let task = eco.open_build_task(Priority::Low, BuildKind::Solar, Pos::new(340.0, 340.0));

    fx.game.destroy(doomed, None);
    fx.pump(1);
    assert_eq!(fx.eco.worker_count(), 1);

    let (eco, mut env) = fx.parts(1);
    eco.prepare_builder(&mut env, survivor);
    assert_eq!(fx.eco.worker_task(survivor), Some(task));
    assert_eq!(fx.eco.task(task).expect("open").assignees, vec![survivor]);
}

#[test]
fn construction_link_survives_target_destruction() {
    let mut fx = Fixture::new(spotted_world());
    let worker = fx.add_worker(Pos::new(600.0, 600.0));
    let (eco, _) = fx.parts(0);
    let tid = eco.open_build_task(Priority::Low, BuildKind::Solar, Pos::new(620.0, 600.0));
    eco.assign_worker(worker, tid);

    let (eco, mut env) = fx.parts(1);
    eco.execute_builder(&mut env, worker);
    fx.pump(1);

    let target = fx.eco.task(tid).expect("open").target.expect("linked");
    assert!(fx.game.is_being_built(target));

    fx.game.destroy(target, None);
    fx.pump(2);
    let task = fx.eco.task(tid).expect("task survives its target");
    assert_eq!(task.target, None);
    fx.assert_counter_in_sync();
}

#[test]
fn finished_construction_closes_the_task_and_frees_the_worker() {
    let mut fx = Fixture::new(spotted_world());
    let worker = fx.add_worker(Pos::new(600.0, 600.0));
    let (eco, _) = fx.parts(0);
    let tid = eco.open_build_task(Priority::Low, BuildKind::Solar, Pos::new(620.0, 600.0));
    eco.assign_worker(worker, tid);

    let (eco, mut env) = fx.parts(1);
    eco.execute_builder(&mut env, worker);
    fx.pump(1);
    for _ in 0..fx.game.build_frames() {
        fx.game.advance();
    }
    fx.pump(2);

    assert!(fx.eco.task(tid).is_none(), "finished task is closed");
    assert_eq!(fx.game.live_units_of(UnitKind::Solar), 1);
    // The idle event that followed re-tasked the worker onto fresh work.
    assert_ne!(fx.eco.worker_task(worker), Some(tid));
    fx.assert_counter_in_sync();
}

#[test]
fn impossible_site_falls_back_to_a_timed_assist() {
    // A single spot whose clearance covers the whole buildable area: no
    // solar can ever be placed.
    let game = SimGame::new(100.0, 100.0)
        .with_spots(vec![(Pos::new(50.0, 50.0), 0)], vec![Pos::new(50.0, 50.0)])
        .with_start(Pos::new(50.0, 50.0));
    let mut fx = Fixture::new(game);
    let worker = fx.add_worker(Pos::new(50.0, 50.0));

    let (eco, _) = fx.parts(0);
    let tid = eco.open_build_task(Priority::High, BuildKind::Solar, Pos::new(50.0, 50.0));
    eco.assign_worker(worker, tid);

    let (eco, mut env) = fx.parts(1000);
    eco.execute_builder(&mut env, worker);

    assert!(fx.eco.task(tid).is_none(), "failed task is abandoned");
    let assist = fx.eco.worker_task(worker).expect("fallback assigned");
    let task = fx.eco.task(assist).expect("open");
    assert_eq!(task.kind, BuildKind::Assist);
    assert_eq!(task.timeout, 20 * FRAMES_PER_SEC);
    assert_eq!(fx.eco.assist_started(worker), Some(1000));
    assert!(fx.game.stats().patrols > 0);
    fx.assert_counter_in_sync();
}

#[test]
fn watchdog_frees_workers_exactly_past_the_timeout() {
    let game = SimGame::new(100.0, 100.0)
        .with_spots(vec![(Pos::new(50.0, 50.0), 0)], vec![Pos::new(50.0, 50.0)])
        .with_start(Pos::new(50.0, 50.0));
    let mut fx = Fixture::new(game);
    let worker = fx.add_worker(Pos::new(50.0, 50.0));

    let (eco, _) = fx.parts(0);
    let tid = eco.open_build_task(Priority::High, BuildKind::Solar, Pos::new(50.0, 50.0));
    eco.assign_worker(worker, tid);
    let (eco, mut env) = fx.parts(1000);
    eco.execute_builder(&mut env, worker);
    let assist = fx.eco.worker_task(worker).expect("assist running");

    let timeout = 20 * FRAMES_PER_SEC;
    let (eco, mut env) = fx.parts(1000 + timeout - 1);
    eco.worker_watchdog(&mut env);
    assert_eq!(fx.eco.worker_task(worker), Some(assist), "not yet overdue");

    let (eco, mut env) = fx.parts(1000 + timeout + 1);
    eco.worker_watchdog(&mut env);
    assert_eq!(fx.eco.worker_task(worker), None);
    assert_eq!(fx.eco.assist_started(worker), None);
    assert_eq!(fx.eco.open_tasks_of(BuildKind::Assist), 0);
    assert_eq!(fx.game.stats().stops, 1);
    fx.assert_counter_in_sync();
}

#[test]
fn factory_produces_through_its_task_until_the_quota_is_met() {
    let mut fx = Fixture::new(spotted_world());
    let factory = fx
        .game
        .spawn_finished(UnitKind::Factory, Pos::new(800.0, 800.0));
    fx.pump(0);

    // Registration opened a default production task and queued one unit.
    let tid = fx.eco.factory_current_task(factory).expect("working");
    assert_eq!(
        fx.eco.factory_task(tid).expect("open").kind,
        FactoryKind::Default
    );
    assert_eq!(fx.game.stats().produces_ordered, 1);

    let mut frame = 1;
    while fx.eco.factory_task(tid).is_some() && frame < 1000 {
        fx.game.advance();
        fx.pump(frame);
        frame += 1;
    }
    assert!(
        fx.eco.factory_task(tid).is_none(),
        "quota of two closes the task"
    );
    assert!(fx.game.stats().produces_ordered >= 2);
}

#[test]
fn reclaim_tasks_only_accept_capable_workers() {
    let mut fx = Fixture::new(spotted_world());
    let worker = fx.add_worker(Pos::new(500.0, 500.0));
    let (eco, _) = fx.parts(0);
    let reclaim = eco.open_build_task(Priority::Normal, BuildKind::Reclaim, Pos::new(520.0, 500.0));

    let (eco, mut env) = fx.parts(1);
    eco.prepare_builder(&mut env, worker);
    // Sim workers can reclaim, so the open reclaim field wins over a
    // synthesized default task.
    assert_eq!(fx.eco.worker_task(worker), Some(reclaim));
}

#[test]
fn given_and_captured_units_enter_and_leave_the_registry() {
    let mut fx = Fixture::new(spotted_world());
    let worker = fx.game.spawn_finished(UnitKind::Worker, Pos::new(400.0, 400.0));
    fx.game.take_events();

    let (eco, mut env) = fx.parts(0);
    eco.unit_given(&mut env, worker);
    assert_eq!(fx.eco.worker_count(), 1);
    assert!(fx.eco.builder_power() > 0.0);

    let (eco, mut env) = fx.parts(1);
    eco.unit_captured(&mut env, worker);
    assert_eq!(fx.eco.worker_count(), 0);
    assert_eq!(fx.eco.builder_power(), 0.0);
}
