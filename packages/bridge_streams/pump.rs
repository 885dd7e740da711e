//! Tunables for `KjAdapter::pump_to` and the managed read loop it drives.
//! Named here rather than left as literals inline so an embedder can see
//! the defaults and override them via `PumpWindow` without forking the
//! crate.

/// Below this many bytes remaining in the destination, the managed read
/// loop prefers to return early over squeezing out one more chunk — a
/// latency/throughput heuristic, not a correctness requirement.
pub const RESIDUAL_RETURN_THRESHOLD: usize = 1024;

/// `pump_to`'s default minimum read size; a read shorter than this ends
/// the pump.
pub const MIN_READ: usize = 8192;

/// `pump_to`'s default read buffer size.
pub const MAX_READ: usize = 16384;

/// `pump_to`'s read window: `[min_read, max_read]`. Defaults to
/// [`MIN_READ`]/[`MAX_READ`]; pass a custom one to `pump_to` to re-tune
/// the throughput/latency tradeoff without forking the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpWindow {
    pub min_read: usize,
    pub max_read: usize,
}

impl Default for PumpWindow {
    fn default() -> Self {
        Self {
            min_read: MIN_READ,
            max_read: MAX_READ,
        }
    }
}
