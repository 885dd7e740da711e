//! Minimal end-to-end demo: a `PullSource` feeding a `JsAdapter`, piped
//! through a `KjAdapter`'s `pump_to` into a stdout sink. Run with
//! `RUST_LOG=debug cargo run -p bridge_streams --example pump_demo` to see
//! the state-transition and cancellation log lines the adapters emit.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use async_trait::async_trait;
use bridge_core::{AdapterError, HostContext, SingleThreadedHost};
use bridge_streams::{
    JsAdapter, KjAdapter, ManagedChunk, ManagedReadResult, ManagedReader, ManagedStream,
    PullSource, ReadOptions, StreamEncoding, TypedBuffer, WritableSink,
};

struct ChunkedSource {
    chunks: RefCell<VecDeque<Vec<u8>>>,
}

#[async_trait(?Send)]
impl PullSource for ChunkedSource {
    async fn try_read(&self, dst: &mut [u8], _min_bytes: usize) -> Result<usize, AdapterError> {
        let Some(chunk) = self.chunks.borrow_mut().pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(dst.len());
        dst[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.chunks.borrow_mut().push_front(chunk[n..].to_vec());
        }
        Ok(n)
    }

    async fn read_all_bytes(&self, _limit: u64) -> Result<Vec<u8>, AdapterError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.chunks.borrow_mut().pop_front() {
            out.extend(chunk);
        }
        Ok(out)
    }

    async fn read_all_text(&self, limit: u64) -> Result<String, AdapterError> {
        Ok(String::from_utf8_lossy(&self.read_all_bytes(limit).await?).into_owned())
    }

    fn try_get_length(&self, _encoding: StreamEncoding) -> Option<u64> {
        None
    }

    fn cancel(&self, reason: AdapterError) {
        log::warn!("pull source abandoned: {reason}");
    }

    fn try_tee(&self, _limit: u64) -> Option<(Box<dyn PullSource>, Box<dyn PullSource>)> {
        None
    }
}

/// Bridges a `JsAdapter` back into a `ManagedReader` so a `KjAdapter` can
/// consume it, the same glue the round-trip test uses.
struct JsAdapterAsManagedReader {
    adapter: Rc<JsAdapter>,
}

#[async_trait(?Send)]
impl ManagedReader for JsAdapterAsManagedReader {
    async fn read(&self) -> Result<ManagedReadResult, AdapterError> {
        let result = self
            .adapter
            .read(ReadOptions {
                buffer: TypedBuffer::with_capacity(4096, 1),
                min_bytes: Some(1),
            })
            .await?;
        if result.done {
            Ok(ManagedReadResult::Done)
        } else {
            Ok(ManagedReadResult::Chunk(ManagedChunk::Bytes(result.bytes)))
        }
    }

    fn cancel(&self, reason: AdapterError) {
        self.adapter.cancel(reason);
    }
}

struct NullStream;
impl ManagedStream for NullStream {
    fn try_get_length(&self, _encoding: StreamEncoding) -> Option<u64> {
        None
    }
}

struct StdoutSink;

#[async_trait(?Send)]
impl WritableSink for StdoutSink {
    async fn write(&self, chunk: &[u8]) -> Result<(), AdapterError> {
        print!("{}", String::from_utf8_lossy(chunk));
        Ok(())
    }

    async fn end(&self) -> Result<(), AdapterError> {
        println!();
        Ok(())
    }

    async fn abort(&self, reason: AdapterError) {
        log::error!("sink aborted: {reason}");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();

    let host: Rc<dyn HostContext> = Rc::new(SingleThreadedHost::new());
    let message = b"the quick brown fox jumps over the lazy dog\n".to_vec();
    let source = Rc::new(ChunkedSource {
        chunks: RefCell::new(message.chunks(9).map(|c| c.to_vec()).collect()),
    });

    let js_adapter = JsAdapter::new(host.clone(), source);
    log::debug!("JsAdapter constructed over an in-memory pull source");

    let reader: Rc<dyn ManagedReader> = Rc::new(JsAdapterAsManagedReader { adapter: js_adapter });
    let kj_adapter = KjAdapter::new(host.clone(), Rc::new(NullStream), reader);

    kj_adapter
        .pump_to(&StdoutSink, true, None)
        .await
        .expect("pump_to should drain the source cleanly");

    log::debug!("pending host jobs after pump: {}", host.job_queue_len());
}
