use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use bridge_core::{AdapterError, FutureJob, HostContext, NativeJob};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::traits::PullSource;
use crate::typed_buffer::{StreamEncoding, TypedBuffer};

/// The result of a single `JsAdapter::read`.
#[derive(Debug)]
pub struct JsReadResult {
    pub bytes: Vec<u8>,
    pub done: bool,
}

/// Inputs to `JsAdapter::read`.
pub struct ReadOptions {
    pub buffer: TypedBuffer,
    pub min_bytes: Option<usize>,
}

type TaskFuture = Pin<Box<dyn Future<Output = Result<usize, AdapterError>>>>;

struct Task {
    op: TaskFuture,
    fulfiller: oneshot::Sender<Result<usize, AdapterError>>,
}

/// The `Active` block of a `JsAdapter`: exclusive ownership of the pull
/// source plus the task queue that serializes reads against it.
///
/// Wrapped in `Rc<RefCell<_>>` (rather than held directly by `JsAdapter`) so
/// the detached run loop — dispatched onto the host's job queue and not
/// tied to any caller's stack — can keep it alive even if the owning
/// `JsAdapter` is dropped mid-read; the loop only ever touches this block,
/// never the outer adapter, so no separate weak self-reference is needed on
/// this side (contrast `KjAdapter`, where the managed read loop resumes
/// outer adapter state after the lock and does need one).
struct ActiveJs {
    source: Rc<dyn PullSource>,
    canceler: CancellationToken,
    queue: VecDeque<Task>,
    running: bool,
    canceled: bool,
    close_pending: bool,
    pending_cancel: Option<AdapterError>,
    /// Trailing bytes a prior `read` pulled from the source but couldn't
    /// hand back because they didn't fill a whole element — at most
    /// `element_size - 1` bytes, prepended to the destination on the next
    /// `read` before asking the source for more.
    leftover: Vec<u8>,
}

impl Drop for ActiveJs {
    fn drop(&mut self) {
        if !self.canceled {
            log::debug!("ActiveJs dropped without an explicit cancel; draining queue");
            while let Some(task) = self.queue.pop_front() {
                let _ = task
                    .fulfiller
                    .send(Err(AdapterError::disconnected("adapter dropped")));
            }
        }
        debug_assert!(self.queue.is_empty(), "task queue must be empty once canceled");
    }
}

enum JsAdapterState {
    Active(Rc<RefCell<ActiveJs>>),
    Closed,
    Errored(AdapterError),
}

/// Managed-side facade over a native pull source.
pub struct JsAdapter {
    host: Rc<dyn HostContext>,
    state: RefCell<JsAdapterState>,
}

impl JsAdapter {
    pub fn new(host: Rc<dyn HostContext>, source: Rc<dyn PullSource>) -> Rc<Self> {
        Rc::new(Self {
            host,
            state: RefCell::new(JsAdapterState::Active(Rc::new(RefCell::new(ActiveJs {
                source,
                canceler: CancellationToken::new(),
                queue: VecDeque::new(),
                running: false,
                canceled: false,
                close_pending: false,
                pending_cancel: None,
                leftover: Vec::new(),
            })))),
        })
    }

    fn active(&self) -> Option<Rc<RefCell<ActiveJs>>> {
        match &*self.state.borrow() {
            JsAdapterState::Active(active) => Some(active.clone()),
            _ => None,
        }
    }

    fn enqueue(&self, active: &Rc<RefCell<ActiveJs>>, op: TaskFuture) -> oneshot::Receiver<Result<usize, AdapterError>> {
        let (tx, rx) = oneshot::channel();
        active.borrow_mut().queue.push_back(Task { op, fulfiller: tx });

        let already_running = active.borrow().running;
        if !already_running {
            let active_clone = active.clone();
            let job: FutureJob = Box::pin(async move {
                run_loop(active_clone).await;
                NativeJob::new(|| Ok(()))
            });
            // Callers are about to `.await` a result fulfilled by this job,
            // so it must be dispatched as blocking work: `add_task` is
            // fire-and-forget and nothing would ever drive it to completion.
            self.host.add_blocking_task(job);
        }
        rx
    }

    /// Awaits `rx`, driving the host's job queue via `idle()` alongside it
    /// so the task dispatched in `enqueue` actually gets polled instead of
    /// sitting untouched in the host's futures set.
    async fn drive_task(
        &self,
        mut rx: oneshot::Receiver<Result<usize, AdapterError>>,
    ) -> Result<Result<usize, AdapterError>, oneshot::error::RecvError> {
        tokio::select! {
            biased;
            res = &mut rx => res,
            _ = self.host.idle() => rx.await,
        }
    }

    /// `read(options) -> {buffer, done}`.
    pub async fn read(&self, options: ReadOptions) -> Result<JsReadResult, AdapterError> {
        let active = match self.active() {
            Some(active) => active,
            None => {
                return match &*self.state.borrow() {
                    JsAdapterState::Closed => Ok(JsReadResult {
                        bytes: options.buffer.detach_empty(),
                        done: true,
                    }),
                    JsAdapterState::Errored(err) => Err(err.clone()),
                    JsAdapterState::Active(_) => unreachable!(),
                };
            }
        };

        if active.borrow().close_pending {
            return Ok(JsReadResult {
                bytes: options.buffer.detach_empty(),
                done: true,
            });
        }

        let min_bytes = options.buffer.normalize_min_bytes(options.min_bytes);
        let source = active.borrow().source.clone();
        let active_for_task = active.clone();
        let holder: Rc<RefCell<Option<TypedBuffer>>> = Rc::new(RefCell::new(Some(options.buffer)));
        let holder_task = holder.clone();

        let op: TaskFuture = Box::pin(async move {
            let leftover = std::mem::take(&mut active_for_task.borrow_mut().leftover);
            let leftover_len = leftover.len();

            let mut guard = holder_task.borrow_mut();
            let buffer = guard.as_mut().expect("buffer present while read is in flight");
            let dst = buffer.as_mut_slice();
            if leftover_len > 0 {
                dst[..leftover_len].copy_from_slice(&leftover);
            }

            let remaining_min = min_bytes
                .saturating_sub(leftover_len)
                .clamp(1, dst.len() - leftover_len);
            let n = source.try_read(&mut dst[leftover_len..], remaining_min).await?;

            if n == 0 {
                if leftover_len > 0 {
                    // Source hit EOF with a dangling partial element still
                    // on hand: flush it now (unaligned, but it's the last
                    // thing there is) and let the next `read` observe EOF.
                    active_for_task.borrow_mut().close_pending = true;
                    Ok(leftover_len)
                } else {
                    Ok(0)
                }
            } else {
                let total = leftover_len + n;
                let rounded = buffer.round_down_to_element(total);
                if rounded < total {
                    active_for_task.borrow_mut().leftover = dst[rounded..total].to_vec();
                }
                Ok(rounded)
            }
        });

        let rx = self.enqueue(&active, op);
        match self.drive_task(rx).await {
            Ok(Ok(bytes_read)) => {
                let buffer = holder.borrow_mut().take().expect("buffer returned after read");
                if bytes_read == 0 {
                    active.borrow_mut().close_pending = true;
                    Ok(JsReadResult {
                        bytes: buffer.detach_empty(),
                        done: true,
                    })
                } else {
                    debug_assert!(bytes_read <= buffer.len());
                    Ok(JsReadResult {
                        bytes: buffer.detach_limited(bytes_read),
                        done: false,
                    })
                }
            }
            Ok(Err(err)) => {
                self.cancel(err.clone());
                Err(err)
            }
            Err(_) => {
                let err = AdapterError::disconnected("task queue dropped without a result");
                self.cancel(err.clone());
                Err(err)
            }
        }
    }

    /// `readAllText(limit) -> string`.
    pub async fn read_all_text(&self, limit: u64) -> Result<String, AdapterError> {
        let active = self.require_active_for_drain()?;
        let Some(active) = active else {
            return Ok(String::new());
        };

        let holder: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));
        let holder_task = holder.clone();
        let source = active.borrow().source.clone();
        let leftover = std::mem::take(&mut active.borrow_mut().leftover);
        let op: TaskFuture = Box::pin(async move {
            let rest = source.read_all_text(limit).await?;
            let mut text = String::from_utf8_lossy(&leftover).into_owned();
            text.push_str(&rest);
            let amount = text.len();
            *holder_task.borrow_mut() = Some(text);
            Ok(amount)
        });

        let rx = self.enqueue(&active, op);
        match self.drive_task(rx).await {
            Ok(Ok(_amount)) => {
                *self.state.borrow_mut() = JsAdapterState::Closed;
                Ok(holder.borrow_mut().take().unwrap_or_default())
            }
            Ok(Err(err)) => {
                self.cancel(err.clone());
                Err(err)
            }
            Err(_) => {
                let err = AdapterError::disconnected("task queue dropped without a result");
                self.cancel(err.clone());
                Err(err)
            }
        }
    }

    /// `readAllBytes(limit) -> bytes`.
    pub async fn read_all_bytes(&self, limit: u64) -> Result<Vec<u8>, AdapterError> {
        let active = self.require_active_for_drain()?;
        let Some(active) = active else {
            return Ok(Vec::new());
        };

        let holder: Rc<RefCell<Option<Vec<u8>>>> = Rc::new(RefCell::new(None));
        let holder_task = holder.clone();
        let source = active.borrow().source.clone();
        let leftover = std::mem::take(&mut active.borrow_mut().leftover);
        let op: TaskFuture = Box::pin(async move {
            let mut bytes = leftover;
            bytes.extend(source.read_all_bytes(limit).await?);
            let amount = bytes.len();
            *holder_task.borrow_mut() = Some(bytes);
            Ok(amount)
        });

        let rx = self.enqueue(&active, op);
        match self.drive_task(rx).await {
            Ok(Ok(_amount)) => {
                *self.state.borrow_mut() = JsAdapterState::Closed;
                Ok(holder.borrow_mut().take().unwrap_or_default())
            }
            Ok(Err(err)) => {
                self.cancel(err.clone());
                Err(err)
            }
            Err(_) => {
                let err = AdapterError::disconnected("task queue dropped without a result");
                self.cancel(err.clone());
                Err(err)
            }
        }
    }

    /// Shared `closePending` bookkeeping for `readAllText`/`readAllBytes`.
    /// Returns `Ok(None)` when the caller should short-circuit with an
    /// empty result (already Closed), `Err` when already Errored.
    fn require_active_for_drain(&self) -> Result<Option<Rc<RefCell<ActiveJs>>>, AdapterError> {
        match &*self.state.borrow() {
            JsAdapterState::Active(active) => {
                let mut active_mut = active.borrow_mut();
                if active_mut.close_pending {
                    return Err(AdapterError::concurrency(
                        "close already pending, cannot close again",
                    ));
                }
                active_mut.close_pending = true;
                drop(active_mut);
                Ok(Some(active.clone()))
            }
            JsAdapterState::Closed => Ok(None),
            JsAdapterState::Errored(err) => Err(err.clone()),
        }
    }

    /// `close() -> void`.
    pub async fn close(&self) -> Result<(), AdapterError> {
        let active = self.require_active_for_drain()?;
        let Some(active) = active else {
            return Ok(());
        };

        let op: TaskFuture = Box::pin(async { Ok(0) });
        let rx = self.enqueue(&active, op);
        match self.drive_task(rx).await {
            Ok(Ok(_)) => {
                *self.state.borrow_mut() = JsAdapterState::Closed;
                Ok(())
            }
            Ok(Err(err)) => {
                self.cancel(err.clone());
                Err(err)
            }
            Err(_) => {
                let err = AdapterError::disconnected("task queue dropped without a result");
                self.cancel(err.clone());
                Err(err)
            }
        }
    }

    /// `cancel(reason)`. Idempotent; safe to call from `Drop`.
    pub fn cancel(&self, reason: AdapterError) {
        let Some(active) = self.active() else {
            return;
        };
        let mut active_mut = active.borrow_mut();
        if active_mut.canceled {
            return;
        }
        if active_mut.running {
            log::warn!("cancel racing with an in-flight task: {reason}");
        }
        active_mut.canceled = true;
        active_mut.pending_cancel = Some(reason.clone());
        active_mut.canceler.cancel();
        while let Some(task) = active_mut.queue.pop_front() {
            let _ = task.fulfiller.send(Err(reason.clone()));
        }
        if !reason.is_disconnect() {
            active_mut.source.cancel(reason.clone());
        }
        drop(active_mut);
        log::debug!("JsAdapter transitioning Active -> Errored: {reason}");
        *self.state.borrow_mut() = JsAdapterState::Errored(reason);
    }

    /// Forceful close: cancel in-flight work with a disconnection reason,
    /// then transition straight to Closed (not Errored).
    pub fn shutdown(&self) {
        if self.active().is_some() {
            self.cancel(AdapterError::disconnected("stream was shut down"));
            *self.state.borrow_mut() = JsAdapterState::Closed;
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(&*self.state.borrow(), JsAdapterState::Closed)
    }

    pub fn is_canceled(&self) -> Option<AdapterError> {
        match &*self.state.borrow() {
            JsAdapterState::Errored(err) => Some(err.clone()),
            _ => None,
        }
    }

    pub fn try_get_length(&self, encoding: StreamEncoding) -> Option<u64> {
        let active = self.active()?;
        let active = active.borrow();
        active.source.try_get_length(encoding)
    }

    /// `tryTee(limit) -> Option<(JsAdapter, JsAdapter)>`. Fails (returns an
    /// error, not `None`) unless the adapter is strictly idle.
    pub fn try_tee(&self, limit: u64) -> Result<Option<(Rc<JsAdapter>, Rc<JsAdapter>)>, AdapterError> {
        let active = match &*self.state.borrow() {
            JsAdapterState::Active(active) => active.clone(),
            JsAdapterState::Closed => return Ok(None),
            JsAdapterState::Errored(err) => return Err(err.clone()),
        };

        {
            let active_ref = active.borrow();
            if active_ref.close_pending || active_ref.running || !active_ref.queue.is_empty() {
                return Err(AdapterError::concurrency(
                    "cannot tee a stream that is closing or has pending reads",
                ));
            }
        }

        let tee = {
            let active_ref = active.borrow();
            active_ref.source.try_tee(limit)
        };

        match tee {
            Some((branch1, branch2)) => {
                *self.state.borrow_mut() = JsAdapterState::Closed;
                let branch1 = JsAdapter::new(self.host.clone(), branch1.into());
                let branch2 = JsAdapter::new(self.host.clone(), branch2.into());
                Ok(Some((branch1, branch2)))
            }
            None => Ok(None),
        }
    }
}

impl Drop for JsAdapter {
    fn drop(&mut self) {
        self.cancel(AdapterError::disconnected(
            "adapter is being dropped by its owner",
        ));
    }
}

async fn run_loop(active: Rc<RefCell<ActiveJs>>) {
    active.borrow_mut().running = true;
    loop {
        if active.borrow().canceled {
            break;
        }
        let task = active.borrow_mut().queue.pop_front();
        let Some(task) = task else { break };

        let Task { op, fulfiller } = task;
        let cancel_token = active.borrow().canceler.clone();
        let result = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                let reason = active.borrow().pending_cancel.clone()
                    .unwrap_or_else(|| AdapterError::disconnected("task was canceled"));
                Err(reason)
            }
            res = op => res,
        };

        let failed = result.is_err();
        let _ = fulfiller.send(result);
        if failed {
            break;
        }
    }
    active.borrow_mut().running = false;
}
