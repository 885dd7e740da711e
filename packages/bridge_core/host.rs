use std::cell::RefCell;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::future::poll_fn;

use crate::queue::{AsyncJobQueue, FutureJob, JobQueue, NativeJob};

/// Stands in for the isolate / execution context the adapters are bridging
/// into and out of. Owning the real thing — the managed runtime's lock, job
/// pump, and realm bookkeeping — is explicitly out of scope here; this trait
/// is the seam a concrete runtime implements.
///
/// `AsyncJobQueue` plus a `tokio::sync::Mutex` is enough to model a
/// single-threaded cooperative runtime this way: entering the managed
/// domain means acquiring `lock()`, and leaving it means dropping the guard.
#[async_trait(?Send)]
pub trait HostContext {
    /// Enqueues `future` as a fire-and-forget task: its result is dropped
    /// into the job queue but nothing awaits its completion directly. This
    /// is the `addTask` sidechannel adapters use for cleanup work that must
    /// run without blocking the caller (e.g. cancel's async teardown).
    fn add_task(&self, future: FutureJob);

    /// Enqueues `future` as a task the event loop treats as in-flight work:
    /// `idle()` will not report the queue drained until it settles. Adapters
    /// use this (rather than `add_task`) for dispatch a caller is about to
    /// `.await` a result from, e.g. `JsAdapter`'s task-queue run loop.
    fn add_blocking_task(&self, future: FutureJob);

    /// Acquires exclusive access to the managed domain. Holding the returned
    /// guard across an `.await` models "entering the isolate lock"; no
    /// adapter operation may hold two of these at once.
    async fn lock(&self) -> IsolateGuard<'_>;

    /// Number of jobs currently queued, for introspection/tests only.
    fn job_queue_len(&self) -> usize;

    /// Pumps the job queue until it drains, the same `poll`-then-`run_jobs`
    /// cycle as the teacher's `Runtime::run_event_loop`/`idle`, minus the
    /// timer wheel (this host has no timers to poll). Adapters race this
    /// against a result they're waiting on so tasks dispatched via
    /// `add_task`/`add_blocking_task` actually get driven forward instead of
    /// sitting untouched in the futures-unordered set.
    async fn idle(&self);
}

/// RAII guard representing possession of the isolate lock. Dropping it is
/// the only way to release the lock; there is no explicit `unlock`.
pub struct IsolateGuard<'a> {
    _guard: tokio::sync::MutexGuard<'a, ()>,
}

/// A minimal single-threaded host: one `AsyncJobQueue` for deferred work,
/// one mutex standing in for the isolate lock. The queue sits behind a
/// `RefCell` solely because `AsyncJobQueue::poll` needs `&mut self` to poll
/// its `FuturesUnordered`; every other access goes through `&self`.
pub struct SingleThreadedHost {
    jobs: RefCell<AsyncJobQueue>,
    isolate: tokio::sync::Mutex<()>,
}

impl Default for SingleThreadedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SingleThreadedHost {
    pub fn new() -> Self {
        Self {
            jobs: RefCell::new(AsyncJobQueue::new()),
            isolate: tokio::sync::Mutex::new(()),
        }
    }

    /// Enqueues a plain, non-future job for later draining via `run_jobs`.
    pub fn enqueue_promise_job(&self, job: NativeJob) {
        self.jobs.borrow().enqueue_promise_job(job);
    }

    pub fn run_jobs(&self) {
        self.jobs.borrow().run_jobs();
    }

    /// The teacher's `run_event_loop` in a single tick: poll in-flight
    /// futures into jobs, then run whatever jobs that produced.
    fn run_event_loop(&self, cx: &mut Context<'_>) -> Poll<()> {
        let _ = self.jobs.borrow_mut().poll(cx);
        self.jobs.borrow().run_jobs();
        if self.jobs.borrow().is_empty() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

#[async_trait(?Send)]
impl HostContext for SingleThreadedHost {
    fn add_task(&self, future: FutureJob) {
        self.jobs.borrow().spawn_non_blocking(future);
    }

    fn add_blocking_task(&self, future: FutureJob) {
        self.jobs.borrow().spawn(future);
    }

    async fn lock(&self) -> IsolateGuard<'_> {
        IsolateGuard {
            _guard: self.isolate.lock().await,
        }
    }

    fn job_queue_len(&self) -> usize {
        self.jobs.borrow().len()
    }

    async fn idle(&self) {
        poll_fn(|cx| self.run_event_loop(cx)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_serializes_managed_domain_entry() {
        let host = SingleThreadedHost::new();
        let guard = host.lock().await;
        drop(guard);
        let _guard2 = host.lock().await;
    }

    #[test]
    fn add_task_does_not_run_synchronously() {
        let host = SingleThreadedHost::new();
        let ran = std::rc::Rc::new(std::cell::RefCell::new(false));
        let ran_clone = ran.clone();
        host.add_task(Box::pin(async move {
            *ran_clone.borrow_mut() = true;
            NativeJob::new(|| Ok(()))
        }));
        assert!(!*ran.borrow());
    }

    #[tokio::test]
    async fn idle_drives_a_blocking_task_to_completion() {
        let host = SingleThreadedHost::new();
        let ran = std::rc::Rc::new(std::cell::RefCell::new(false));
        let ran_clone = ran.clone();
        host.add_blocking_task(Box::pin(async move {
            *ran_clone.borrow_mut() = true;
            NativeJob::new(|| Ok(()))
        }));
        assert!(!*ran.borrow());
        host.idle().await;
        assert!(*ran.borrow());
    }
}
