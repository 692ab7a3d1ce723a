//! Demo and benchmark driver for the decision core.
//!
//! Runs the AI against the deterministic simulation harness: a generated
//! map, a starting base, and a frame loop pumping engine events into the
//! core. `bench` prints a CSV row with wall-clock and CPU usage.

use std::time::Instant;

use foreman::ai::Ai;
use foreman::config::EconomyConfig;
use foreman::game::{GameCallback, UnitKind};
use foreman::scheduler::SchedulerService;
use foreman::sim::{GameEvent, SimGame};
use foreman::types::{Frame, Pos};

/// Best-effort CPU user/system time snapshot (seconds) on Unix platforms.
#[cfg(unix)]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    use std::mem::MaybeUninit;

    let mut usage = MaybeUninit::<libc::rusage>::uninit();
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    let usage = unsafe { usage.assume_init() };
    let user = usage.ru_utime.tv_sec as f64 + usage.ru_utime.tv_usec as f64 / 1_000_000.0;
    let sys = usage.ru_stime.tv_sec as f64 + usage.ru_stime.tv_usec as f64 / 1_000_000.0;
    Some((user, sys))
}

/// Stub on non-Unix platforms.
#[cfg(not(unix))]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    None
}

struct RunResult {
    frames: Frame,
    seed: u64,
    workers: usize,
    factories: usize,
    extractors: usize,
    solars: usize,
    open_tasks: usize,
    open_factory_tasks: usize,
    in_sync: bool,
    builds_ordered: usize,
    produces_ordered: usize,
    patrols: usize,
    survey_spots: Option<usize>,
    elapsed_ms: f64,
}

fn pump_events(ai: &mut Ai<SimGame>) {
    for event in ai.game_mut().take_events() {
        match event {
            GameEvent::Created { unit, builder } => ai.unit_created(unit, builder),
            GameEvent::Finished(unit) => ai.unit_finished(unit),
            GameEvent::Idle(unit) => ai.unit_idle(unit),
            GameEvent::Destroyed { unit, attacker } => ai.unit_destroyed(unit, attacker),
        }
    }
}

/// Drive one AI for `frames` frames against a generated world.
fn run_once(seed: u64, starting_workers: usize, frames: Frame) -> RunResult {
    let game = SimGame::generate(seed, 4, 4);
    let service = SchedulerService::new();
    let mut ai = Ai::new(&service, game, EconomyConfig::default(), seed);

    let start = Instant::now();
    // First tick sizes the cluster table before any base exists.
    ai.update(0);

    let home = ai.game().start_pos();
    ai.game_mut().spawn_finished(UnitKind::Factory, home);
    let mut seeded = Vec::new();
    for i in 0..starting_workers {
        let pos = Pos::new(home.x + 80.0 + 20.0 * i as f32, home.z + 80.0);
        seeded.push(ai.game_mut().spawn_finished(UnitKind::Worker, pos));
    }
    // Register the base, then report the fresh workers in as idle.
    pump_events(&mut ai);
    for worker in seeded {
        ai.unit_idle(worker);
    }

    for frame in 1..=frames {
        pump_events(&mut ai);
        ai.update(frame);
        ai.game_mut().advance();
    }
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    let economy = ai.economy();
    RunResult {
        frames,
        seed,
        workers: economy.worker_count(),
        factories: economy.factory_count(),
        extractors: ai.game().live_units_of(UnitKind::Extractor),
        solars: ai.game().live_units_of(UnitKind::Solar),
        open_tasks: economy.open_task_count(),
        open_factory_tasks: economy.open_factory_task_count(),
        in_sync: economy.open_task_count() == economy.bucket_population(),
        builds_ordered: ai.game().stats().builds_ordered,
        produces_ordered: ai.game().stats().produces_ordered,
        patrols: ai.game().stats().patrols,
        survey_spots: ai.survey().map(|s| s.spot_count),
        elapsed_ms,
    }
}

/// Run the default demo and print a human-readable summary.
fn run_demo(seed: u64, frames: Frame) {
    let result = run_once(seed, 3, frames);
    println!("DEMO SUMMARY");
    println!("frames={} seed={}", result.frames, result.seed);
    println!("workers={} factories={}", result.workers, result.factories);
    println!(
        "extractors_built={} solars_built={}",
        result.extractors, result.solars
    );
    println!(
        "open_tasks={} open_factory_tasks={}",
        result.open_tasks, result.open_factory_tasks
    );
    println!("open_tasks_in_sync={}", result.in_sync);
    println!(
        "builds_ordered={} produces_ordered={} patrols={}",
        result.builds_ordered, result.produces_ordered, result.patrols
    );
    match result.survey_spots {
        Some(spots) => println!("survey_spots={spots}"),
        None => println!("survey_spots=pending"),
    }
}

/// Run one benchmark configuration and print CSV output.
fn run_benchmark(workers: Option<usize>, frames: Option<Frame>, seed: Option<u64>) {
    let workers = workers.unwrap_or(6);
    let frames = frames.unwrap_or(3600);
    let seed = seed.unwrap_or(42);
    if workers == 0 {
        eprintln!("benchmark error: workers must be > 0");
        return;
    }
    if frames <= 0 {
        eprintln!("benchmark error: frames must be > 0");
        return;
    }

    let cpu_start = cpu_times_seconds();
    let result = run_once(seed, workers, frames);
    let (cpu_user, cpu_sys) = match (cpu_start, cpu_times_seconds()) {
        (Some((user_start, sys_start)), Some((user_end, sys_end))) => (
            format!("{:.4}", user_end - user_start),
            format!("{:.4}", sys_end - sys_start),
        ),
        _ => ("NA".to_string(), "NA".to_string()),
    };

    println!(
        "workers,frames,seed,elapsed_ms,frames_per_s,cpu_user_s,cpu_sys_s,builds_ordered,open_tasks,in_sync"
    );
    let frames_per_s = if result.elapsed_ms > 0.0 {
        result.frames as f64 / (result.elapsed_ms / 1000.0)
    } else {
        0.0
    };
    println!(
        "{},{},{},{:.2},{:.0},{},{},{},{},{}",
        workers,
        result.frames,
        result.seed,
        result.elapsed_ms,
        frames_per_s,
        cpu_user,
        cpu_sys,
        result.builds_ordered,
        result.open_tasks,
        result.in_sync
    );
}

fn print_usage(program: &str) {
    println!("foreman economy-core driver");
    println!("Usage:");
    println!("  {program} (run demo)");
    println!("  {program} demo [frames] [seed]");
    println!("  {program} bench [workers] [frames] [seed]");
    println!("  {program} --help");
    println!();
    println!("Defaults: demo frames=1800 seed=7, bench workers=6 frames=3600 seed=42");
    println!("Set RUST_LOG (e.g. RUST_LOG=foreman=debug) for tracing output.");
}

fn exit_with_usage(program: &str, message: &str) -> ! {
    eprintln!("{message}");
    print_usage(program);
    std::process::exit(2);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let program = std::env::args()
        .next()
        .unwrap_or_else(|| "foreman".to_string());
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("demo") => {
            let frames = args.next().and_then(|v| v.parse::<Frame>().ok());
            let seed = args.next().and_then(|v| v.parse::<u64>().ok());
            run_demo(seed.unwrap_or(7), frames.unwrap_or(1800));
        }
        Some("bench") => {
            let workers = args.next().and_then(|v| v.parse::<usize>().ok());
            let frames = args.next().and_then(|v| v.parse::<Frame>().ok());
            let seed = args.next().and_then(|v| v.parse::<u64>().ok());
            run_benchmark(workers, frames, seed);
        }
        Some("--help") | Some("-h") | Some("help") => print_usage(&program),
        None => run_demo(7, 1800),
        Some(other) => exit_with_usage(&program, &format!("unknown command: {other}")),
    }
}
