use thiserror::Error;

/// The four error kinds an adapter can surface, mirroring the kinds a
/// `kj::Exception` would carry across the isolate-lock boundary.
///
/// Cloneable so a single stashed error can be replayed to every waiter that
/// observes it (`pending_cancel` in the adapters), the same role
/// `kj::Exception::cp()` plays in the original.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("stream disconnected: {0}")]
    Disconnected(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("concurrent operation not permitted: {0}")]
    Concurrency(String),

    #[error("peer error: {0}")]
    Peer(String),
}

impl AdapterError {
    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::Disconnected(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn concurrency(msg: impl Into<String>) -> Self {
        Self::Concurrency(msg.into())
    }

    pub fn peer(msg: impl Into<String>) -> Self {
        Self::Peer(msg.into())
    }

    /// Whether this error represents a clean disconnection rather than a
    /// protocol/peer fault, used by callers deciding whether to propagate
    /// `cancel` onto an already-gone source.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, AdapterError::Disconnected(_))
    }
}
