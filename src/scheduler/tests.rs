use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::time::Duration;

use super::{Scheduler, SchedulerService};

type Log = Vec<String>;

fn new_scheduler() -> Scheduler<Log> {
    let service = SchedulerService::new();
    Scheduler::new(&service)
}

#[test]
fn deferred_jobs_run_once_in_insertion_order() {
    let mut scheduler = new_scheduler();
    let mut log = Log::new();

    scheduler.schedule_at(3, |log: &mut Log| log.push("a".into()));
    scheduler.schedule_at(3, |log: &mut Log| log.push("b".into()));
    scheduler.schedule_at(10, |log: &mut Log| log.push("c".into()));

    scheduler.tick(2, &mut log);
    assert!(log.is_empty());

    scheduler.tick(3, &mut log);
    assert_eq!(log, ["a", "b"]);

    // Already-run entries are gone; the late one fires when reached.
    scheduler.tick(10, &mut log);
    assert_eq!(log, ["a", "b", "c"]);

    scheduler.tick(11, &mut log);
    assert_eq!(log.len(), 3);
}

#[test]
fn periodic_job_fires_iff_interval_elapsed() {
    let mut scheduler = new_scheduler();
    let mut log = Log::new();

    scheduler.schedule_every(4, |log: &mut Log| log.push("p".into()));

    // First eligible tick fires immediately (last_run starts at -interval).
    scheduler.tick(0, &mut log);
    assert_eq!(log.len(), 1);

    scheduler.tick(2, &mut log);
    assert_eq!(log.len(), 1);

    scheduler.tick(4, &mut log);
    assert_eq!(log.len(), 2);

    // last_run updated on invocation only: skipping a tick keeps the base.
    scheduler.tick(7, &mut log);
    assert_eq!(log.len(), 2);
    scheduler.tick(9, &mut log);
    assert_eq!(log.len(), 3);
}

#[test]
fn work_scheduled_mid_run_lands_on_a_later_tick() {
    let mut scheduler = new_scheduler();
    let mut log = Log::new();
    let handle = scheduler.handle();

    scheduler.schedule_at(1, move |log: &mut Log| {
        log.push("outer".into());
        // Due immediately, but must not run inside the same traversal.
        handle.schedule_at(0, |log: &mut Log| log.push("inner".into()));
    });

    scheduler.tick(1, &mut log);
    assert_eq!(log, ["outer"]);

    scheduler.tick(2, &mut log);
    assert_eq!(log, ["outer", "inner"]);
}

#[test]
fn cancel_removes_deferred_and_periodic_entries() {
    let mut scheduler = new_scheduler();
    let mut log = Log::new();

    let once = scheduler.schedule_at(5, |log: &mut Log| log.push("once".into()));
    let every = scheduler.schedule_every(2, |log: &mut Log| log.push("every".into()));
    scheduler.cancel(once);
    scheduler.cancel(every);

    for frame in 0..10 {
        scheduler.tick(frame, &mut log);
    }
    assert!(log.is_empty());
}

#[test]
fn terminated_periodic_entry_is_removed_without_running() {
    let mut scheduler = new_scheduler();
    let mut log = Log::new();

    let id = scheduler.schedule_every(2, |log: &mut Log| log.push("p".into()));
    scheduler.tick(0, &mut log);
    assert_eq!(log.len(), 1);

    scheduler.terminate(id);
    scheduler.tick(2, &mut log);
    assert_eq!(log.len(), 1, "terminated entry must not run at its due-check");
    scheduler.tick(4, &mut log);
    assert_eq!(log.len(), 1);
}

#[test]
fn periodic_job_can_terminate_itself() {
    let mut scheduler = new_scheduler();
    let mut log = Log::new();
    let handle = scheduler.handle();

    let id_cell: Rc<Cell<Option<crate::types::JobId>>> = Rc::new(Cell::new(None));
    let id_for_job = Rc::clone(&id_cell);
    let id = scheduler.schedule_every(1, move |log: &mut Log| {
        log.push("ran".into());
        handle.terminate(id_for_job.get().expect("job id set before first tick"));
    });
    id_cell.set(Some(id));

    scheduler.tick(0, &mut log);
    scheduler.tick(1, &mut log);
    scheduler.tick(2, &mut log);
    assert_eq!(log, ["ran"]);
}

#[test]
fn completions_run_after_periodic_work_for_the_tick() {
    let service = SchedulerService::new();
    let mut scheduler = Scheduler::new(&service);
    let mut log = Log::new();

    scheduler.schedule_every(1, |log: &mut Log| log.push("periodic".into()));

    let (tx, rx) = mpsc::channel();
    scheduler.dispatch_background_then(
        move || {
            tx.send(()).expect("signal payload ran");
        },
        |log: &mut Log| log.push("completion".into()),
    );
    rx.recv_timeout(Duration::from_secs(5))
        .expect("background payload ran");

    // The completion may still be in flight right after the signal; give the
    // worker a couple of ticks to land it. Ordering within the landing tick
    // is what matters: periodic first, completion last.
    for frame in 0..50 {
        scheduler.tick(frame, &mut log);
        if log.iter().any(|entry| entry == "completion") {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    let done = log
        .iter()
        .position(|entry| entry == "completion")
        .expect("completion delivered");
    assert!(log[..done].iter().all(|entry| entry == "periodic"));
}

#[test]
fn background_panic_does_not_kill_the_worker() {
    let service = SchedulerService::new();
    let mut scheduler = Scheduler::new(&service);
    let mut log = Log::new();

    scheduler.dispatch_background(|| panic!("boom"));

    let (tx, rx) = mpsc::channel();
    scheduler.dispatch_background_then(
        move || {
            tx.send(()).expect("signal payload ran");
        },
        |log: &mut Log| log.push("survived".into()),
    );
    rx.recv_timeout(Duration::from_secs(5))
        .expect("worker survived the panicking job");

    for frame in 0..50 {
        scheduler.tick(frame, &mut log);
        if !log.is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(log, ["survived"]);
}

#[test]
fn dropping_last_instance_unblocks_and_joins_the_worker() {
    let service: Arc<SchedulerService<Log>> = SchedulerService::new();
    let scheduler = Scheduler::new(&service);

    let (tx, rx) = mpsc::channel();
    scheduler.dispatch_background(move || {
        tx.send(()).expect("signal payload ran");
    });
    rx.recv_timeout(Duration::from_secs(5))
        .expect("worker started");

    // Worker is now blocked on an empty queue; drop must not hang.
    drop(scheduler);
    assert_eq!(service.live_instances(), 0);

    // The service is reusable: a fresh instance lazily respawns the worker.
    let scheduler = Scheduler::new(&service);
    let (tx, rx) = mpsc::channel();
    scheduler.dispatch_background(move || {
        tx.send(()).expect("signal payload ran");
    });
    rx.recv_timeout(Duration::from_secs(5))
        .expect("worker respawned");
}

#[test]
fn dropping_an_instance_purges_its_queued_background_work() {
    let service: Arc<SchedulerService<Log>> = SchedulerService::new();
    let keeper = Scheduler::new(&service);
    let doomed = Scheduler::new(&service);

    // Occupy the worker so the doomed instance's item stays queued.
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let (busy_tx, busy_rx) = mpsc::channel();
    keeper.dispatch_background(move || {
        busy_tx.send(()).expect("signal busy");
        gate_rx.recv().expect("gate released");
    });
    busy_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("worker busy");

    let ran = Arc::new(AtomicBool::new(false));
    let ran_flag = Arc::clone(&ran);
    doomed.dispatch_background(move || {
        ran_flag.store(true, Ordering::SeqCst);
    });

    drop(doomed);
    gate_tx.send(()).expect("release gate");
    drop(keeper);

    assert!(
        !ran.load(Ordering::SeqCst),
        "purged background work must never run"
    );
}
