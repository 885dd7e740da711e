use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt::Debug,
    future::Future,
    pin::Pin,
    rc::{Rc, Weak},
    task::{Context, Poll, Waker},
};

use futures::{stream::FuturesUnordered, StreamExt as _};

use crate::error::AdapterError;

/// A unit of work the managed side needs to run once it reacquires its
/// execution context. Closures take no arguments: by the time a `NativeJob`
/// runs, the caller is already inside the managed domain.
#[macro_export]
macro_rules! native_job {
    ($tag:expr, $closure:expr) => {{
        let job = $crate::NativeJob::new($closure);
        #[cfg(debug_assertions)]
        let job = job.set_tag($tag);
        job
    }};
}

pub struct NativeJob {
    f: Box<dyn FnOnce() -> Result<(), AdapterError>>,
    #[cfg(debug_assertions)]
    tag: String,
}

impl Debug for NativeJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug_struct = f.debug_struct("NativeJob");
        debug_struct.field("f", &"Closure");
        #[cfg(debug_assertions)]
        debug_struct.field("tag", &self.tag);
        debug_struct.finish()
    }
}

impl NativeJob {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<(), AdapterError> + 'static,
    {
        Self {
            f: Box::new(f),
            #[cfg(debug_assertions)]
            tag: "Unnamed".to_string(),
        }
    }

    #[cfg(debug_assertions)]
    pub fn set_tag(mut self, name: &str) -> Self {
        self.tag = name.to_string();
        self
    }

    pub fn call(self) -> Result<(), AdapterError> {
        (self.f)()
    }
}

pub type FutureJob = Pin<Box<dyn Future<Output = NativeJob>>>;

/// A FIFO queue of deferred jobs, the native-side analogue of a host's
/// microtask queue. This is the seam `HostContext::add_task` enqueues onto.
pub trait JobQueue {
    fn enqueue_promise_job(&self, job: NativeJob);

    /// Runs every job currently queued, in enqueue order. Running a job may
    /// enqueue more jobs; this drains only the jobs present at call time.
    fn run_jobs(&self);

    fn enqueue_future_job(&self, future: FutureJob);

    fn len(&self) -> usize;
}

/// A simple FIFO job queue that logs and continues on job failure.
#[derive(Default)]
pub struct SimpleJobQueue {
    jobs: RefCell<VecDeque<NativeJob>>,
}

impl Debug for SimpleJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SimpleJobQueue").field(&"..").finish()
    }
}

impl SimpleJobQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobQueue for SimpleJobQueue {
    fn enqueue_promise_job(&self, job: NativeJob) {
        self.jobs.borrow_mut().push_back(job);
    }

    fn run_jobs(&self) {
        let mut next_job = self.jobs.borrow_mut().pop_front();
        while let Some(job) = next_job {
            if let Err(err) = job.call() {
                log::error!("job failed: {err}");
            }
            next_job = self.jobs.borrow_mut().pop_front();
        }
    }

    fn enqueue_future_job(&self, _: FutureJob) {
        panic!("future jobs are not supported on the simple job queue");
    }

    fn len(&self) -> usize {
        self.jobs.borrow().len()
    }
}

pub struct FutureJobWrapper {
    future: FutureJob,
    prevent_exit: bool,
    queue: Weak<RefCell<AsyncJobQueueInner>>,
}

impl Future for FutureJobWrapper {
    type Output = NativeJob;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let future = Pin::new(&mut self.future);
        let poll_result = future.poll(cx);
        if poll_result.is_ready() && self.prevent_exit {
            if let Some(queue) = self.queue.upgrade() {
                queue.borrow_mut().futures_prevent_exit_count -= 1;
            }
        }
        poll_result
    }
}

#[derive(Default)]
pub struct AsyncJobQueueInner {
    pub jobs: VecDeque<NativeJob>,
    pub futures_prevent_exit_count: usize,
}

impl AsyncJobQueueInner {
    pub fn push_job(&mut self, job: NativeJob) {
        self.jobs.push_back(job);
    }
}

/// The host's job queue: a FIFO of ready [`NativeJob`]s plus a set of
/// in-flight futures that resolve into more jobs. Adapters never own one of
/// these directly — they reach it only through [`crate::HostContext`].
pub struct AsyncJobQueue {
    inner: Rc<RefCell<AsyncJobQueueInner>>,
    futures: FuturesUnordered<FutureJobWrapper>,
    waker: RefCell<Option<Waker>>,
}

impl Debug for AsyncJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AsyncJobQueue").field(&"..").finish()
    }
}

impl Default for AsyncJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncJobQueue {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(AsyncJobQueueInner::default())),
            futures: FuturesUnordered::new(),
            waker: RefCell::new(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().jobs.is_empty()
            && self.inner.borrow().futures_prevent_exit_count == 0
    }

    pub fn leak(&self) -> Weak<RefCell<AsyncJobQueueInner>> {
        Rc::downgrade(&self.inner)
    }

    pub fn poll(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        *self.waker.borrow_mut() = Some(cx.waker().clone());
        while let Poll::Ready(Some(job)) = self.futures.poll_next_unpin(cx) {
            self.enqueue_promise_job(job);
        }

        if self.is_empty() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }

    pub fn wake(&self) {
        if let Some(waker) = self.waker.borrow().as_ref() {
            waker.wake_by_ref();
        }
    }

    /// Spawns a future job that does not keep the event loop alive by
    /// itself. This is what `HostContext::add_task` uses for fire-and-forget
    /// cleanup work (e.g. `KjAdapter::cancel`'s async teardown).
    pub fn spawn_non_blocking(&self, future: FutureJob) {
        let wrapper = FutureJobWrapper {
            future,
            prevent_exit: false,
            queue: Weak::new(),
        };
        self.futures.push(wrapper);
    }

    /// Spawns a future job that keeps the event loop alive until it settles.
    pub fn spawn(&self, future: FutureJob) {
        let wrapper = FutureJobWrapper {
            future,
            prevent_exit: true,
            queue: Rc::downgrade(&self.inner),
        };
        self.inner.borrow_mut().futures_prevent_exit_count += 1;
        self.futures.push(wrapper);
        self.wake();
    }
}

impl JobQueue for AsyncJobQueue {
    fn enqueue_promise_job(&self, job: NativeJob) {
        self.inner.borrow_mut().jobs.push_back(job);
    }

    fn run_jobs(&self) {
        let mut next_job = self.inner.borrow_mut().jobs.pop_front();
        while let Some(job) = next_job {
            #[cfg(debug_assertions)]
            let tag = job.tag.clone();

            if let Err(err) = job.call() {
                #[cfg(debug_assertions)]
                log::error!("job {tag:?} failed: {err}");
                #[cfg(not(debug_assertions))]
                log::error!("job failed: {err}");
            }
            next_job = self.inner.borrow_mut().jobs.pop_front();
        }
    }

    fn enqueue_future_job(&self, future: FutureJob) {
        self.spawn(future);
    }

    fn len(&self) -> usize {
        self.inner.borrow().jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::future::Future;
    use std::pin::Pin;
    use std::rc::{Rc, Weak};
    use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

    fn noop_waker() -> Waker {
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(std::ptr::null(), &VTABLE)
        }
        fn wake(_: *const ()) {}
        fn wake_by_ref(_: *const ()) {}
        fn drop(_: *const ()) {}
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop);
        unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
    }

    #[test]
    fn test_enqueue_promise_job() {
        let queue = AsyncJobQueue::new();
        let executed = Rc::new(RefCell::new(false));

        let job = NativeJob::new({
            let executed = executed.clone();
            move || {
                *executed.borrow_mut() = true;
                Ok(())
            }
        });

        queue.enqueue_promise_job(job);
        queue.run_jobs();

        assert!(*executed.borrow());
    }

    #[test]
    fn test_enqueue_future_job() {
        let mut queue = AsyncJobQueue::new();
        let executed = Rc::new(RefCell::new(false));

        let executed_clone = executed.clone();
        let future_job: FutureJob = Box::pin(async {
            NativeJob::new(move || {
                *executed_clone.borrow_mut() = true;
                Ok(())
            })
        });

        queue.enqueue_future_job(future_job);

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        while queue.poll(&mut cx).is_pending() {
            queue.run_jobs();
        }

        assert!(*executed.borrow());
    }

    #[test]
    fn test_multiple_jobs_execution_order() {
        let queue = AsyncJobQueue::new();
        let execution_order = Rc::new(RefCell::new(vec![]));

        for i in 0..5 {
            let order = execution_order.clone();
            let job = NativeJob::new(move || {
                order.borrow_mut().push(i);
                Ok(())
            });
            queue.enqueue_promise_job(job);
        }

        queue.run_jobs();

        assert_eq!(*execution_order.borrow(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_future_job_wrapper_poll() {
        let polled = Rc::new(RefCell::new(false));

        let future = TestFuture {
            polled: polled.clone(),
        };

        let mut wrapper = FutureJobWrapper {
            future: Box::pin(future),
            prevent_exit: false,
            queue: Weak::new(),
        };

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        let poll_result = wrapper.future.as_mut().poll(&mut cx);

        assert!(*polled.borrow());
        assert!(poll_result.is_ready());
    }

    struct TestFuture {
        polled: Rc<RefCell<bool>>,
    }

    impl Future for TestFuture {
        type Output = NativeJob;

        fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
            *self.polled.borrow_mut() = true;
            Poll::Ready(NativeJob::new(|| Ok(())))
        }
    }

    #[test]
    fn test_is_empty() {
        let queue = AsyncJobQueue::new();
        assert!(queue.is_empty());
        queue.enqueue_promise_job(NativeJob::new(|| Ok(())));
        assert!(!queue.is_empty());
    }

    #[test]
    fn test_prevent_exit() {
        let mut queue = AsyncJobQueue::new();

        let future_job: FutureJob = Box::pin(async { NativeJob::new(|| Ok(())) });
        queue.enqueue_future_job(future_job);

        assert!(!queue.is_empty());

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let _ = queue.poll(&mut cx);

        assert!(!queue.is_empty());
        queue.run_jobs();

        assert!(queue.is_empty());
    }

    #[test]
    fn test_spawn_non_blocking() {
        let queue = AsyncJobQueue::new();

        let future_job: FutureJob = Box::pin(async { NativeJob::new(|| Ok(())) });
        queue.spawn_non_blocking(future_job);

        assert!(queue.is_empty());
    }
}
