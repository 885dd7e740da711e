use std::cell::RefCell;
use std::rc::{Rc, Weak};

use bridge_core::{AdapterError, HostContext, NativeJob};
use tokio_util::sync::CancellationToken;

use crate::pump::{PumpWindow, RESIDUAL_RETURN_THRESHOLD};
use crate::residual::ResidualBuffer;
use crate::traits::{ManagedChunk, ManagedReadResult, ManagedReader, ManagedStream, WritableSink};
use crate::typed_buffer::StreamEncoding;

struct ActiveKj {
    stream: Rc<dyn ManagedStream>,
    reader: Rc<dyn ManagedReader>,
    canceler: CancellationToken,
    residual: ResidualBuffer,
    read_pending: bool,
    previous_read_was_last: bool,
    canceled: bool,
    pending_cancel: Option<AdapterError>,
}

enum KjState {
    Active(ActiveKj),
    Closed,
    Errored(AdapterError),
}

/// Native-side facade over a managed reader.
///
/// `state` is the adapter's own weak-self-reference anchor: the managed
/// read loop downgrades it before crossing the lock and only mutates
/// adapter state after the lock if the upgrade still succeeds, exactly
/// matching the "continuation holds a weak handle to its adapter" rule —
/// once `KjAdapter` is dropped, `state`'s strong count hits zero and every
/// in-flight continuation's `upgrade()` starts returning `None`.
pub struct KjAdapter {
    host: Rc<dyn HostContext>,
    state: Rc<RefCell<KjState>>,
}

impl KjAdapter {
    pub fn new(host: Rc<dyn HostContext>, stream: Rc<dyn ManagedStream>, reader: Rc<dyn ManagedReader>) -> Self {
        Self {
            host,
            state: Rc::new(RefCell::new(KjState::Active(ActiveKj {
                stream,
                reader,
                canceler: CancellationToken::new(),
                residual: ResidualBuffer::new(),
                read_pending: false,
                previous_read_was_last: false,
                canceled: false,
                pending_cancel: None,
            }))),
        }
    }

    /// Runs the three standard entry checks shared by `try_read`,
    /// `try_get_length`, and `pump_to`: already-terminal stickiness, the
    /// deferred `previous_read_was_last` transition, and a stashed
    /// `pending_cancel`. Returns `Ok(None)` when the caller should proceed
    /// normally with the still-Active adapter.
    fn resolve_entry(&self) -> Result<Option<usize>, AdapterError> {
        loop {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                KjState::Closed => return Ok(Some(0)),
                KjState::Errored(err) => return Err(err.clone()),
                KjState::Active(active) => {
                    if let Some(err) = active.pending_cancel.take() {
                        drop(state);
                        *self.state.borrow_mut() = KjState::Errored(err.clone());
                        return Err(err);
                    }
                    if active.previous_read_was_last {
                        drop(state);
                        *self.state.borrow_mut() = KjState::Closed;
                        return Ok(Some(0));
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn require_not_pending(&self) -> Result<(), AdapterError> {
        if let KjState::Active(active) = &*self.state.borrow() {
            if active.read_pending {
                return Err(AdapterError::concurrency("a read is already in flight"));
            }
        }
        Ok(())
    }

    /// `tryRead(dst, minBytes, maxBytes) -> size_t`, with `maxBytes` implied
    /// by `dst.len()`.
    pub async fn try_read(&self, dst: &mut [u8], min_bytes: usize) -> Result<usize, AdapterError> {
        if dst.is_empty() {
            return Ok(0);
        }
        let min_bytes = min_bytes.clamp(1, dst.len());

        if let Some(n) = self.resolve_entry()? {
            return Ok(n);
        }
        self.require_not_pending()?;

        let active_present = matches!(&*self.state.borrow(), KjState::Active(_));
        if !active_present {
            return Ok(0);
        }

        // Mark read_pending and serve from residual (steps 1-2 of the
        // residual algorithm) before ever touching the lock.
        let (served, active_canceled) = {
            let mut state = self.state.borrow_mut();
            let KjState::Active(active) = &mut *state else {
                unreachable!()
            };
            active.read_pending = true;
            let n = active.residual.take_into(dst);
            (n, active.canceled)
        };

        if served == dst.len() {
            if let KjState::Active(active) = &mut *self.state.borrow_mut() {
                active.read_pending = false;
            }
            return Ok(served);
        }
        if served > 0 && served >= min_bytes {
            if let KjState::Active(active) = &mut *self.state.borrow_mut() {
                active.read_pending = false;
            }
            return Ok(served);
        }
        if active_canceled {
            if let KjState::Active(active) = &mut *self.state.borrow_mut() {
                active.read_pending = false;
            }
            return Err(AdapterError::disconnected("adapter was canceled"));
        }

        // Step 3: enter the managed domain for the remainder.
        let weak_state = Rc::downgrade(&self.state);
        managed_read_loop(&self.host, weak_state, dst, served, min_bytes).await
    }

    pub fn try_get_length(&self, encoding: StreamEncoding) -> Option<u64> {
        match self.resolve_entry() {
            Ok(Some(_)) => None,
            Err(_) => None,
            Ok(None) => match &*self.state.borrow() {
                KjState::Active(active) => active.stream.try_get_length(encoding),
                _ => None,
            },
        }
    }

    /// `cancel(reason)`. Idempotent; schedules async teardown of the
    /// managed reader via `HostContext::add_task` since that requires the
    /// lock and must not block the caller.
    pub fn cancel(&self, reason: AdapterError) {
        let (reader, needs_async_cancel) = {
            let mut state = self.state.borrow_mut();
            let KjState::Active(active) = &mut *state else {
                return;
            };
            if active.canceled {
                return;
            }
            if active.read_pending {
                log::warn!("cancel racing with an in-flight try_read: {reason}");
            }
            active.canceled = true;
            active.canceler.cancel();
            let needs_async_cancel = !active.previous_read_was_last;
            (active.reader.clone(), needs_async_cancel)
        };

        log::debug!("KjAdapter transitioning Active -> Errored: {reason}");
        *self.state.borrow_mut() = KjState::Errored(reason.clone());

        if needs_async_cancel {
            let host_for_task = self.host.clone();
            let reason_for_task = reason.clone();
            self.host.add_task(Box::pin(async move {
                let _guard = host_for_task.lock().await;
                reader.cancel(reason_for_task);
                NativeJob::new(|| Ok(()))
            }));
        }
    }

    /// `pumpTo(sink, end)`. Drains the adapter into `sink` using `window`'s
    /// `[min_read, max_read]` (or [`PumpWindow::default`] if `None`); a
    /// short read below `min_read` ends the pump.
    pub async fn pump_to(
        &self,
        sink: &dyn WritableSink,
        end: bool,
        window: Option<PumpWindow>,
    ) -> Result<(), AdapterError> {
        let window = window.unwrap_or_default();
        loop {
            if let Some(_terminal) = self.resolve_entry()? {
                if end {
                    sink.end().await?;
                }
                return Ok(());
            }

            let mut buf = vec![0u8; window.max_read];
            let n = match self.try_read(&mut buf, window.min_read).await {
                Ok(n) => n,
                Err(err) => {
                    sink.abort(err.clone()).await;
                    self.cancel(err.clone());
                    return Err(err);
                }
            };

            if n > 0 {
                if let Err(err) = sink.write(&buf[..n]).await {
                    sink.abort(err.clone()).await;
                    self.cancel(err.clone());
                    return Err(err);
                }
            }

            if n < window.min_read {
                if end {
                    sink.end().await?;
                }
                *self.state.borrow_mut() = KjState::Closed;
                return Ok(());
            }
        }
    }
}

/// The `ReadContext` component: bookkeeping threaded through the managed
/// read loop for a single `try_read`'s excursion into the lock. Unlike the
/// original, there is no separate "owning" allocation here — `dst` is
/// already the caller's buffer — but the role (remaining destination,
/// running total, minimum, weak adapter handle) is the same.
struct ReadContext<'a> {
    dst: &'a mut [u8],
    written: usize,
    min_bytes: usize,
}

async fn managed_read_loop(
    host: &Rc<dyn HostContext>,
    weak_state: Weak<RefCell<KjState>>,
    dst: &mut [u8],
    already_served: usize,
    min_bytes: usize,
) -> Result<usize, AdapterError> {
    let Some(state_rc) = weak_state.upgrade() else {
        return Ok(already_served);
    };

    let reader = {
        let state = state_rc.borrow();
        let KjState::Active(active) = &*state else {
            return Ok(already_served);
        };
        active.reader.clone()
    };

    let _guard = host.lock().await;

    let mut ctx = ReadContext {
        dst: &mut dst[already_served..],
        written: 0,
        min_bytes: min_bytes.saturating_sub(already_served),
    };

    let outcome: Result<(), AdapterError> = loop {
        match reader.read().await {
            Ok(ManagedReadResult::Done) => break Ok(()),
            Ok(ManagedReadResult::Chunk(chunk)) => {
                let bytes = match chunk {
                    ManagedChunk::Unsupported(desc) => {
                        log::error!("managed reader yielded a non-byte, non-string chunk: {desc}");
                        reader.cancel(AdapterError::protocol(format!(
                            "managed reader yielded an unsupported chunk: {desc}"
                        )));
                        break Err(AdapterError::protocol(format!(
                            "expected bytes or text, got {desc}"
                        )));
                    }
                    other => other.into_bytes().expect("non-Unsupported chunk always has bytes"),
                };

                let remaining = ctx.dst.len() - ctx.written;
                if bytes.len() >= remaining {
                    ctx.dst[ctx.written..].copy_from_slice(&bytes[..remaining]);
                    ctx.written += remaining;
                    if bytes.len() > remaining {
                        if let KjState::Active(active) = &mut *state_rc.borrow_mut() {
                            active.residual.set(bytes[remaining..].to_vec());
                        }
                    }
                    break Ok(());
                }

                ctx.dst[ctx.written..ctx.written + bytes.len()].copy_from_slice(&bytes);
                ctx.written += bytes.len();

                let still_active = matches!(&*state_rc.borrow(), KjState::Active(_));
                let remaining_after = ctx.dst.len() - ctx.written;
                if ctx.written >= ctx.min_bytes && remaining_after < RESIDUAL_RETURN_THRESHOLD {
                    break Ok(());
                }
                if !still_active {
                    break Ok(());
                }
            }
            Err(e) => break Err(e),
        }
    };

    drop(_guard);

    let total_written = already_served + ctx.written;

    match outcome {
        Ok(()) => {
            // State is not transitioned to Closed here even if this read
            // came up short: a canceler wrapping this very continuation
            // would otherwise tear down the Active block we are still
            // running inside. We only flag it; the next entry point
            // observes the flag and performs the transition.
            if let KjState::Active(active) = &mut *state_rc.borrow_mut() {
                active.read_pending = false;
                if total_written < min_bytes {
                    active.previous_read_was_last = true;
                }
            }
            Ok(total_written)
        }
        Err(err) => {
            if let KjState::Active(active) = &mut *state_rc.borrow_mut() {
                active.read_pending = false;
                active.pending_cancel = Some(err.clone());
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_core::SingleThreadedHost;
    use std::cell::RefCell as StdRefCell;
    use std::collections::VecDeque;

    struct ScriptedStream;
    impl ManagedStream for ScriptedStream {
        fn try_get_length(&self, _encoding: StreamEncoding) -> Option<u64> {
            None
        }
    }

    struct ScriptedReader {
        chunks: StdRefCell<VecDeque<ManagedReadResult>>,
        canceled_with: StdRefCell<Option<AdapterError>>,
    }

    impl ScriptedReader {
        fn new(chunks: Vec<ManagedReadResult>) -> Self {
            Self {
                chunks: StdRefCell::new(chunks.into_iter().collect()),
                canceled_with: StdRefCell::new(None),
            }
        }
    }

    #[async_trait(?Send)]
    impl ManagedReader for ScriptedReader {
        async fn read(&self) -> Result<ManagedReadResult, AdapterError> {
            Ok(self
                .chunks
                .borrow_mut()
                .pop_front()
                .unwrap_or(ManagedReadResult::Done))
        }

        fn cancel(&self, reason: AdapterError) {
            *self.canceled_with.borrow_mut() = Some(reason);
        }
    }

    fn host() -> Rc<dyn HostContext> {
        Rc::new(SingleThreadedHost::new())
    }

    #[tokio::test]
    async fn chunk_larger_than_buffer_is_served_from_residual() {
        let reader = Rc::new(ScriptedReader::new(vec![ManagedReadResult::Chunk(
            ManagedChunk::Bytes(b"ABCDEFGHIJ".to_vec()),
        )]));
        let adapter = KjAdapter::new(host(), Rc::new(ScriptedStream), reader);

        let mut dst = [0u8; 4];
        let n = adapter.try_read(&mut dst, 1).await.unwrap();
        assert_eq!(n, 4);
        assert_eq!(&dst, b"ABCD");

        let n = adapter.try_read(&mut dst, 1).await.unwrap();
        assert_eq!(n, 4);
        assert_eq!(&dst, b"EFGH");

        let mut tail = [0u8; 4];
        let n = adapter.try_read(&mut tail, 1).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(&tail[..2], b"IJ");

        let n = adapter.try_read(&mut tail, 1).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn protocol_error_poisons_the_adapter() {
        let reader = Rc::new(ScriptedReader::new(vec![ManagedReadResult::Chunk(
            ManagedChunk::Unsupported("number".to_string()),
        )]));
        let adapter = KjAdapter::new(host(), Rc::new(ScriptedStream), reader);

        let mut dst = [0u8; 4];
        let result = adapter.try_read(&mut dst, 1).await;
        assert!(result.is_err());

        let result = adapter.try_read(&mut dst, 1).await;
        assert!(result.is_err());

        // cancel on an already-errored adapter is a no-op
        adapter.cancel(AdapterError::disconnected("ignored"));
    }

    #[tokio::test]
    async fn concurrent_try_read_is_rejected() {
        let reader = Rc::new(ScriptedReader::new(vec![ManagedReadResult::Chunk(
            ManagedChunk::Bytes(b"hello".to_vec()),
        )]));
        let adapter = KjAdapter::new(host(), Rc::new(ScriptedStream), reader);

        // Simulate a read already in flight by flipping the flag directly
        // through a second try_read call path is awkward without real
        // concurrency; instead assert the guard rejects re-entrancy by
        // constructing the adapter in a pending state.
        if let KjState::Active(active) = &mut *adapter.state.borrow_mut() {
            active.read_pending = true;
        }
        let mut dst = [0u8; 4];
        let result = adapter.try_read(&mut dst, 1).await;
        assert!(matches!(result, Err(AdapterError::Concurrency(_))));
    }
}
