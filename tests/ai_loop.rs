//! End-to-end scenario: the AI grows an economy inside the sim harness.

use std::time::{Duration, Instant};

use foreman::ai::Ai;
use foreman::config::EconomyConfig;
use foreman::game::{GameCallback, UnitKind};
use foreman::scheduler::SchedulerService;
use foreman::sim::{GameEvent, SimGame};
use foreman::types::Pos;

fn pump(ai: &mut Ai<SimGame>) {
    for event in ai.game_mut().take_events() {
        match event {
            GameEvent::Created { unit, builder } => ai.unit_created(unit, builder),
            GameEvent::Finished(unit) => ai.unit_finished(unit),
            GameEvent::Idle(unit) => ai.unit_idle(unit),
            GameEvent::Destroyed { unit, attacker } => ai.unit_destroyed(unit, attacker),
        }
    }
}

#[test]
fn economy_expands_from_a_starting_base() {
    let game = SimGame::generate(21, 4, 4);
    let service = SchedulerService::new();
    let mut ai = Ai::new(&service, game, EconomyConfig::default(), 21);

    ai.update(0);
    let home = ai.game().start_pos();
    ai.game_mut().spawn_finished(UnitKind::Factory, home);
    let mut seeded = Vec::new();
    for i in 0..3 {
        seeded.push(ai.game_mut().spawn_finished(
            UnitKind::Worker,
            Pos::new(home.x + 80.0 + 20.0 * i as f32, home.z + 80.0),
        ));
    }
    pump(&mut ai);
    for worker in seeded {
        ai.unit_idle(worker);
    }

    for frame in 1..=2400 {
        pump(&mut ai);
        ai.update(frame);
        ai.game_mut().advance();
    }

    let economy = ai.economy();
    assert!(economy.worker_count() >= 3);
    assert_eq!(economy.factory_count(), 1);
    assert!(
        ai.game().live_units_of(UnitKind::Extractor) > 0,
        "expansion demand must have claimed at least one spot"
    );
    assert!(ai.game().stats().builds_ordered > 0);
    assert_eq!(
        economy.open_task_count(),
        economy.bucket_population(),
        "task ledger out of sync after a long run"
    );

    // The startup survey is tiny; it must have landed long ago, but give a
    // slow worker thread a grace period before declaring it lost.
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut frame = 2400;
    while ai.survey().is_none() && Instant::now() < deadline {
        frame += 1;
        ai.update(frame);
        std::thread::sleep(Duration::from_millis(10));
    }
    let survey = ai.survey().expect("expansion survey delivered");
    assert_eq!(survey.spot_count, 16);
}

#[test]
fn worker_losses_keep_the_ledger_consistent() {
    let game = SimGame::generate(5, 3, 3);
    let service = SchedulerService::new();
    let mut ai = Ai::new(&service, game, EconomyConfig::default(), 5);

    ai.update(0);
    let home = ai.game().start_pos();
    let mut workers = Vec::new();
    for i in 0..4 {
        workers.push(
            ai.game_mut()
                .spawn_finished(UnitKind::Worker, Pos::new(home.x + 20.0 * i as f32, home.z)),
        );
    }
    pump(&mut ai);
    for worker in &workers {
        ai.unit_idle(*worker);
    }

    for frame in 1..=600 {
        pump(&mut ai);
        ai.update(frame);
        if frame == 300 {
            // Two workers die mid-run, one of them mid-assignment.
            ai.game_mut().destroy(workers[0], None);
            ai.game_mut().destroy(workers[1], None);
        }
        ai.game_mut().advance();
    }

    let economy = ai.economy();
    assert_eq!(economy.worker_count(), 2);
    assert_eq!(economy.open_task_count(), economy.bucket_population());
    for tid in economy.bucket_ids(foreman::BuildKind::Expand) {
        let task = economy.task(tid).expect("listed task exists");
        for assignee in &task.assignees {
            assert!(
                economy.worker_task(*assignee) == Some(tid),
                "assignee back-reference broken"
            );
        }
    }
}
