mod error;
mod host;
mod queue;

pub use error::AdapterError;
pub use host::{HostContext, IsolateGuard, SingleThreadedHost};
pub use queue::AsyncJobQueue;
pub use queue::AsyncJobQueueInner;
pub use queue::FutureJob;
pub use queue::JobQueue;
pub use queue::NativeJob;
pub use queue::SimpleJobQueue;
