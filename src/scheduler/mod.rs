//! Frame-driven cooperative scheduler with a shared background worker.
//!
//! A [`Scheduler`] multiplexes three kinds of work onto the discrete
//! simulation clock:
//!
//! - **deferred** jobs, run once when their activation frame is reached,
//! - **periodic** jobs, run whenever `frame - last_run >= interval`,
//! - **background** jobs, executed on a single long-lived worker thread
//!   shared by every scheduler created from the same [`SchedulerService`],
//!   with an optional completion job handed back to the owning scheduler's
//!   tick on the simulation thread.
//!
//! The service object replaces process-wide statics: it is constructed
//! before the first scheduler instance and owns the dispatch queue, the
//! worker thread handle and the live-instance count. Dropping the last
//! scheduler pushes a sentinel to unblock the worker and joins it.
//!
//! Jobs run to completion on the simulation thread and receive `&mut C`,
//! the caller-owned context. Scheduling new work from inside a running job
//! goes through a [`SchedulerHandle`], which buffers the request until the
//! in-progress traversal is over; removing someone else's entry mid-run is
//! therefore impossible, and a periodic job ends itself with
//! [`SchedulerHandle::terminate`], honored at its next due-check without
//! running it again.

mod service;

#[cfg(test)]
mod tests;

pub use self::service::SchedulerService;
use self::service::WorkItem;

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use crate::queue::MultiQueue;
use crate::types::{Frame, JobId};

/// One-shot job bound to an activation frame.
pub type OnceJob<C> = Box<dyn FnOnce(&mut C)>;
/// Recurring job bound to a frame interval.
pub type RepeatJob<C> = Box<dyn FnMut(&mut C)>;
/// Payload executed on the background worker thread.
pub type BackgroundJob = Box<dyn FnOnce() + Send>;
/// Completion handed back to the owning scheduler's simulation tick.
pub type CompletionJob<C> = Box<dyn FnOnce(&mut C) + Send>;

struct DeferredEntry<C> {
    id: JobId,
    frame: Frame,
    job: OnceJob<C>,
}

struct PeriodicEntry<C> {
    id: JobId,
    interval: Frame,
    last_run: Frame,
    terminated: bool,
    job: RepeatJob<C>,
}

enum Request<C> {
    Defer {
        id: JobId,
        frame: Frame,
        job: OnceJob<C>,
    },
    Repeat {
        id: JobId,
        interval: Frame,
        job: RepeatJob<C>,
    },
    Cancel(JobId),
    Terminate(JobId),
}

struct HandleShared<C> {
    next_job: u64,
    requests: Vec<Request<C>>,
    service: Arc<SchedulerService<C>>,
    completions: Weak<MultiQueue<CompletionJob<C>>>,
    instance: u64,
}

/// Cloneable scheduling endpoint for components owned by the context.
///
/// Requests made through a handle are absorbed by the owning scheduler at
/// tick boundaries, so they are always safe — including from inside a
/// running job or a completion.
pub struct SchedulerHandle<C> {
    shared: Rc<RefCell<HandleShared<C>>>,
}

impl<C> Clone for SchedulerHandle<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<C: 'static> SchedulerHandle<C> {
    fn next_id(&self) -> JobId {
        let mut shared = self.shared.borrow_mut();
        shared.next_job += 1;
        JobId(shared.next_job)
    }

    /// Queue a one-shot job for the given activation frame.
    pub fn schedule_at(&self, frame: Frame, job: impl FnOnce(&mut C) + 'static) -> JobId {
        let id = self.next_id();
        self.shared.borrow_mut().requests.push(Request::Defer {
            id,
            frame,
            job: Box::new(job),
        });
        id
    }

    /// Queue a recurring job. It fires on the first eligible tick and then
    /// whenever `frame - last_run >= interval`.
    pub fn schedule_every(&self, interval: Frame, job: impl FnMut(&mut C) + 'static) -> JobId {
        debug_assert!(interval > 0, "periodic interval must be positive");
        let id = self.next_id();
        self.shared.borrow_mut().requests.push(Request::Repeat {
            id,
            interval: interval.max(1),
            job: Box::new(job),
        });
        id
    }

    /// Remove a deferred or periodic entry by identity.
    pub fn cancel(&self, id: JobId) {
        self.shared.borrow_mut().requests.push(Request::Cancel(id));
    }

    /// Mark a periodic entry terminated; it is removed at its next
    /// due-check without running. This is the only safe way for a job to
    /// end itself.
    pub fn terminate(&self, id: JobId) {
        self.shared.borrow_mut().requests.push(Request::Terminate(id));
    }

    /// Run `payload` on the shared background worker thread.
    pub fn dispatch_background(&self, payload: impl FnOnce() + Send + 'static) {
        self.dispatch_inner(Box::new(payload), None);
    }

    /// Run `payload` on the worker thread, then run `on_complete` on the
    /// simulation thread during a later tick of the owning scheduler.
    pub fn dispatch_background_then(
        &self,
        payload: impl FnOnce() + Send + 'static,
        on_complete: impl FnOnce(&mut C) + Send + 'static,
    ) {
        self.dispatch_inner(Box::new(payload), Some(Box::new(on_complete)));
    }

    fn dispatch_inner(&self, payload: BackgroundJob, on_complete: Option<CompletionJob<C>>) {
        let shared = self.shared.borrow();
        shared.service.ensure_worker();
        shared.service.dispatch().push(WorkItem {
            owner: shared.instance,
            completions: shared.completions.clone(),
            payload: Some(payload),
            on_complete,
        });
    }
}

/// Per-instance frame scheduler. See the module docs for semantics.
pub struct Scheduler<C> {
    service: Arc<SchedulerService<C>>,
    instance: u64,
    completions: Arc<MultiQueue<CompletionJob<C>>>,
    handle: SchedulerHandle<C>,
    deferred: Vec<DeferredEntry<C>>,
    periodic: Vec<PeriodicEntry<C>>,
}

impl<C: 'static> Scheduler<C> {
    /// Register a new scheduler instance with the shared service.
    pub fn new(service: &Arc<SchedulerService<C>>) -> Self {
        let instance = service.register_instance();
        let completions = Arc::new(MultiQueue::new());
        let handle = SchedulerHandle {
            shared: Rc::new(RefCell::new(HandleShared {
                next_job: 0,
                requests: Vec::new(),
                service: Arc::clone(service),
                completions: Arc::downgrade(&completions),
                instance,
            })),
        };
        Self {
            service: Arc::clone(service),
            instance,
            completions,
            handle,
            deferred: Vec::new(),
            periodic: Vec::new(),
        }
    }

    /// Scheduling endpoint to hand to components living inside the context.
    pub fn handle(&self) -> SchedulerHandle<C> {
        self.handle.clone()
    }

    /// See [`SchedulerHandle::schedule_at`].
    pub fn schedule_at(&self, frame: Frame, job: impl FnOnce(&mut C) + 'static) -> JobId {
        self.handle.schedule_at(frame, job)
    }

    /// See [`SchedulerHandle::schedule_every`].
    pub fn schedule_every(&self, interval: Frame, job: impl FnMut(&mut C) + 'static) -> JobId {
        self.handle.schedule_every(interval, job)
    }

    /// See [`SchedulerHandle::cancel`].
    pub fn cancel(&self, id: JobId) {
        self.handle.cancel(id);
    }

    /// See [`SchedulerHandle::terminate`].
    pub fn terminate(&self, id: JobId) {
        self.handle.terminate(id);
    }

    /// See [`SchedulerHandle::dispatch_background`].
    pub fn dispatch_background(&self, payload: impl FnOnce() + Send + 'static) {
        self.handle.dispatch_background(payload);
    }

    /// See [`SchedulerHandle::dispatch_background_then`].
    pub fn dispatch_background_then(
        &self,
        payload: impl FnOnce() + Send + 'static,
        on_complete: impl FnOnce(&mut C) + Send + 'static,
    ) {
        self.handle.dispatch_background_then(payload, on_complete);
    }

    /// Advance the scheduler to `frame`. Never blocks.
    ///
    /// Runs due deferred jobs in insertion order, then due periodic jobs in
    /// registration order (entries marked terminated are removed at their
    /// due-check without running), then drains the completion queue. Work
    /// queued through a handle during any of these becomes visible at the
    /// next absorption point, never mid-traversal.
    pub fn tick(&mut self, frame: Frame, ctx: &mut C) {
        self.absorb_requests();

        let mut i = 0;
        while i < self.deferred.len() {
            if self.deferred[i].frame <= frame {
                let entry = self.deferred.remove(i);
                (entry.job)(ctx);
            } else {
                i += 1;
            }
        }

        self.absorb_requests();

        let mut i = 0;
        while i < self.periodic.len() {
            let entry = &mut self.periodic[i];
            if frame - entry.last_run >= entry.interval {
                if entry.terminated {
                    self.periodic.remove(i);
                    continue;
                }
                entry.last_run = frame;
                (entry.job)(ctx);
            }
            i += 1;
        }

        self.completions.drain_with(|job| {
            // One failing completion must not take down the tick.
            if panic::catch_unwind(AssertUnwindSafe(|| job(ctx))).is_err() {
                tracing::error!("completion job panicked; continuing tick");
            }
        });

        self.absorb_requests();
    }

    fn absorb_requests(&mut self) {
        let requests = std::mem::take(&mut self.handle.shared.borrow_mut().requests);
        for request in requests {
            match request {
                Request::Defer { id, frame, job } => {
                    self.deferred.push(DeferredEntry { id, frame, job });
                }
                Request::Repeat { id, interval, job } => {
                    self.periodic.push(PeriodicEntry {
                        id,
                        interval,
                        // Fires on the first eligible tick.
                        last_run: -interval,
                        terminated: false,
                        job,
                    });
                }
                Request::Cancel(id) => {
                    self.deferred.retain(|entry| entry.id != id);
                    self.periodic.retain(|entry| entry.id != id);
                }
                Request::Terminate(id) => {
                    if let Some(entry) = self.periodic.iter_mut().find(|entry| entry.id == id) {
                        entry.terminated = true;
                    }
                }
            }
        }
    }
}

impl<C> Drop for Scheduler<C> {
    fn drop(&mut self) {
        // Purge background entries tagged with this instance so a dangling
        // scheduler never receives a stale completion.
        let instance = self.instance;
        self.service.dispatch().remove_if(|item| item.owner == instance);
        if self.service.unregister_instance() == 0
            && self
                .service
                .worker_running()
                .swap(false, Ordering::AcqRel)
        {
            // Worker may be blocked on an empty queue; the sentinel wakes it
            // so the running-flag check can observe the shutdown.
            self.service.dispatch().push(WorkItem::sentinel());
            if let Some(handle) = self.service.take_worker() {
                if handle.join().is_err() {
                    tracing::error!("background worker panicked during shutdown");
                }
            }
        }
    }
}
