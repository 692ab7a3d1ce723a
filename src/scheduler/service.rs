//! Shared background-dispatch service for scheduler instances.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::queue::MultiQueue;

use super::{BackgroundJob, CompletionJob};

/// One background dispatch entry: a payload plus the route back to the
/// owning scheduler's completion queue.
pub(super) struct WorkItem<C> {
    /// Instance tag used to purge entries when their scheduler goes away.
    pub(super) owner: u64,
    pub(super) completions: Weak<MultiQueue<CompletionJob<C>>>,
    pub(super) payload: Option<BackgroundJob>,
    pub(super) on_complete: Option<CompletionJob<C>>,
}

impl<C> WorkItem<C> {
    /// Empty item pushed at teardown to unblock a worker stuck in pop.
    pub(super) fn sentinel() -> Self {
        Self {
            owner: 0,
            completions: Weak::new(),
            payload: None,
            on_complete: None,
        }
    }
}

/// Explicit process-wide scheduling service.
///
/// Owns the background dispatch queue, the single worker thread and the
/// live-instance count shared by every [`Scheduler`](super::Scheduler)
/// created from it. Construct it before the first scheduler instance; the
/// worker is spawned lazily on first background dispatch and joined when
/// the last instance is dropped.
pub struct SchedulerService<C> {
    dispatch: Arc<MultiQueue<WorkItem<C>>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    instances: AtomicUsize,
    next_instance: AtomicU64,
}

impl<C: 'static> SchedulerService<C> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            dispatch: Arc::new(MultiQueue::new()),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            instances: AtomicUsize::new(0),
            next_instance: AtomicU64::new(0),
        })
    }

    /// Spawn the worker thread if it is not already running.
    pub(super) fn ensure_worker(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let queue = Arc::clone(&self.dispatch);
            let running = Arc::clone(&self.running);
            let handle = thread::Builder::new()
                .name("background-worker".to_string())
                .spawn(move || worker_loop(queue, running))
                .expect("failed to spawn background worker");
            *self.worker.lock().expect("worker handle mutex poisoned") = Some(handle);
            debug!("background worker started");
        }
    }
}

impl<C> SchedulerService<C> {
    pub(super) fn dispatch(&self) -> &MultiQueue<WorkItem<C>> {
        &self.dispatch
    }

    pub(super) fn worker_running(&self) -> &AtomicBool {
        &self.running
    }

    pub(super) fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.worker
            .lock()
            .expect("worker handle mutex poisoned")
            .take()
    }

    /// Register a new instance; returns its nonzero tag.
    pub(super) fn register_instance(&self) -> u64 {
        self.instances.fetch_add(1, Ordering::AcqRel);
        self.next_instance.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Unregister an instance; returns how many remain live.
    pub(super) fn unregister_instance(&self) -> usize {
        self.instances.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Number of live scheduler instances, for diagnostics.
    pub fn live_instances(&self) -> usize {
        self.instances.load(Ordering::Acquire)
    }
}

/// Background worker loop: blocking pop, run, hand the completion back.
///
/// A panicking payload is reported and its completion dropped; the loop
/// itself must survive every job. Exits once the running flag is cleared
/// and the teardown sentinel has been drained.
fn worker_loop<C>(queue: Arc<MultiQueue<WorkItem<C>>>, running: Arc<AtomicBool>) {
    let mut item = queue.pop_blocking();
    while running.load(Ordering::Acquire) {
        if let Some(payload) = item.payload.take() {
            match panic::catch_unwind(AssertUnwindSafe(payload)) {
                Ok(()) => {
                    if let Some(on_complete) = item.on_complete.take() {
                        // Owning scheduler may have been dropped meanwhile.
                        if let Some(sink) = item.completions.upgrade() {
                            sink.push(on_complete);
                        }
                    }
                }
                Err(_) => error!("background job panicked; completion dropped"),
            }
        }
        item = queue.pop_blocking();
    }
    debug!("background worker stopped");
}
