use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use async_trait::async_trait;
use bridge_core::{AdapterError, HostContext, SingleThreadedHost};
use bridge_streams::{
    JsAdapter, KjAdapter, ManagedChunk, ManagedReadResult, ManagedReader, ManagedStream,
    PullSource, ReadOptions, StreamEncoding, TypedBuffer,
};

struct ChunkedSource {
    chunks: RefCell<VecDeque<Vec<u8>>>,
}

impl ChunkedSource {
    fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: RefCell::new(chunks.into_iter().collect()),
        }
    }
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
            let mut remaining = self.chunks.borrow_mut();
            remaining.push_front(chunk[n..].to_vec());
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

    fn cancel(&self, _reason: AdapterError) {}

    fn try_tee(&self, _limit: u64) -> Option<(Box<dyn PullSource>, Box<dyn PullSource>)> {
        None
    }
}

/// Adapts a `JsAdapter` back into a `ManagedReader`, letting a `KjAdapter`
/// consume it — the glue scenario 7 ("piping a JsAdapter into a KjAdapter
/// round-trips") exercises end to end.
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

#[tokio::test]
async fn piping_js_adapter_into_kj_adapter_round_trips() {
    let host: Rc<dyn HostContext> = Rc::new(SingleThreadedHost::new());
    let input = b"the quick brown fox jumps over the lazy dog".to_vec();

    let chunks: Vec<Vec<u8>> = input.chunks(7).map(|c| c.to_vec()).collect();
    let source = Rc::new(ChunkedSource::new(chunks));
    let js_adapter = JsAdapter::new(host.clone(), source);

    let reader: Rc<dyn ManagedReader> = Rc::new(JsAdapterAsManagedReader { adapter: js_adapter });
    let kj_adapter = KjAdapter::new(host, Rc::new(NullStream), reader);

    let mut output = Vec::new();
    loop {
        let mut buf = [0u8; 16];
        let n = kj_adapter.try_read(&mut buf, 1).await.unwrap();
        if n == 0 {
            break;
        }
        output.extend_from_slice(&buf[..n]);
    }

    assert_eq!(output, input);
}
