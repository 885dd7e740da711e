use async_trait::async_trait;
use bridge_core::AdapterError;

use crate::StreamEncoding;

/// A cold, byte-oriented producer satisfied on the native scheduler. Short
/// reads (fewer bytes than requested, including zero) signal end-of-stream.
/// This is the collaborator `JsAdapter` wraps; concrete transports (files,
/// sockets, pipes) implement it.
#[async_trait(?Send)]
pub trait PullSource {
    /// Reads into `dst`, attempting at least `min_bytes` and never more than
    /// `dst.len()`. Returns the number of bytes actually written. A return
    /// of 0 means end-of-stream.
    async fn try_read(&self, dst: &mut [u8], min_bytes: usize) -> Result<usize, AdapterError>;

    /// Drains the source into a byte vector, consuming at most `limit`
    /// bytes.
    async fn read_all_bytes(&self, limit: u64) -> Result<Vec<u8>, AdapterError>;

    /// Drains the source into a string, consuming at most `limit` bytes
    /// from the underlying source (not `limit` characters).
    async fn read_all_text(&self, limit: u64) -> Result<String, AdapterError>;

    /// Best-effort remaining length, if knowable without reading.
    fn try_get_length(&self, encoding: StreamEncoding) -> Option<u64>;

    /// Aborts the source, informing it of why it is being abandoned.
    fn cancel(&self, reason: AdapterError);

    /// Attempts to split into two independent sources over the same
    /// underlying data. Returns `None` if the source cannot be teed.
    fn try_tee(&self, limit: u64) -> Option<(Box<dyn PullSource>, Box<dyn PullSource>)>;
}

/// One chunk yielded by a [`ManagedReader`]: either owned bytes or text, or
/// an unsupported shape that a conforming reader never actually produces.
#[derive(Debug, Clone)]
pub enum ManagedChunk {
    Bytes(Vec<u8>),
    Text(String),
    /// A value that is neither bytes nor text. A conforming managed reader
    /// never produces this; it exists so `KjAdapter` can detect and reject
    /// a misbehaving one with a protocol error instead of panicking.
    Unsupported(String),
}

impl ManagedChunk {
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            ManagedChunk::Bytes(b) => Some(b),
            ManagedChunk::Text(s) => Some(s.into_bytes()),
            ManagedChunk::Unsupported(_) => None,
        }
    }
}

/// One `read()` outcome from a managed reader: a chunk, or the terminal
/// `done` marker.
#[derive(Debug, Clone)]
pub enum ManagedReadResult {
    Chunk(ManagedChunk),
    Done,
}

/// A hot, chunked consumer living inside the managed execution context.
/// This is the collaborator `KjAdapter` wraps.
#[async_trait(?Send)]
pub trait ManagedReader {
    async fn read(&self) -> Result<ManagedReadResult, AdapterError>;
    fn cancel(&self, reason: AdapterError);
}

/// The managed stream a [`ManagedReader`] is acquired from, exposing the
/// length hint `KjAdapter::try_get_length` delegates to.
pub trait ManagedStream {
    fn try_get_length(&self, encoding: StreamEncoding) -> Option<u64>;
}

/// The destination `pump_to` writes into.
#[async_trait(?Send)]
pub trait WritableSink {
    async fn write(&self, chunk: &[u8]) -> Result<(), AdapterError>;
    async fn end(&self) -> Result<(), AdapterError>;
    async fn abort(&self, reason: AdapterError);
}
