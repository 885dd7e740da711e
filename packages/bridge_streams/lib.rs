//! Bidirectional stream-discipline adapters bridging a native pull source
//! and a managed, chunked reader.

mod js_adapter;
mod kj_adapter;
mod pump;
mod residual;
mod traits;
mod typed_buffer;

pub use js_adapter::{JsAdapter, JsReadResult, ReadOptions};
pub use kj_adapter::KjAdapter;
pub use pump::{PumpWindow, MAX_READ, MIN_READ, RESIDUAL_RETURN_THRESHOLD};
pub use residual::ResidualBuffer;
pub use traits::{ManagedChunk, ManagedReadResult, ManagedReader, ManagedStream, PullSource, WritableSink};
pub use typed_buffer::{StreamEncoding, TypedBuffer};
