/// Which logical view of the stream's bytes a length query or `readAllText`
/// limit refers to. `Text` does not promise anything about character count
/// (see the `readAllText` bytes-vs-characters note in the design notes);
/// it exists only so callers can ask "how many bytes remain" regardless of
/// how they intend to decode them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEncoding {
    Identity,
    Text,
}

/// A detachable, element-aligned byte buffer — the Rust stand-in for a JS
/// `TypedArray` view over an `ArrayBuffer`. "Detaching" a JS ArrayBuffer is
/// modeled here as simply moving the owned `Vec<u8>` out: once moved, the
/// original `TypedBuffer` is gone, which is exactly the detach guarantee.
#[derive(Debug)]
pub struct TypedBuffer {
    bytes: Vec<u8>,
    element_size: usize,
}

impl TypedBuffer {
    pub fn new(bytes: Vec<u8>, element_size: usize) -> Self {
        assert!(element_size >= 1, "element_size must be at least 1");
        Self { bytes, element_size }
    }

    pub fn with_capacity(capacity: usize, element_size: usize) -> Self {
        Self::new(vec![0u8; capacity], element_size)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Normalizes a caller-supplied `min_bytes`: clamp into
    /// `[element_size, buffer size]`, then round up to the next multiple of
    /// `element_size`.
    pub fn normalize_min_bytes(&self, min_bytes: Option<usize>) -> usize {
        let default = self.element_size;
        let mut min_bytes = min_bytes.unwrap_or(default).max(self.element_size);
        min_bytes = min_bytes.min(self.bytes.len());
        if self.element_size > 1 {
            let rem = min_bytes % self.element_size;
            if rem != 0 {
                min_bytes += self.element_size - rem;
            }
        }
        min_bytes
    }

    /// Rounds `n` down to the nearest multiple of the element size, the
    /// alignment a `read()` result must respect.
    pub fn round_down_to_element(&self, n: usize) -> usize {
        if self.element_size <= 1 {
            n
        } else {
            n - (n % self.element_size)
        }
    }

    /// Detaches the buffer, keeping only the first `len` bytes logically
    /// valid (the rest is truncated away, mirroring `backing.limit(len)`).
    pub fn detach_limited(mut self, len: usize) -> Vec<u8> {
        debug_assert!(len <= self.bytes.len());
        self.bytes.truncate(len);
        self.bytes
    }

    /// Detaches into an empty buffer, used for EOF / already-closed results.
    pub fn detach_empty(self) -> Vec<u8> {
        Vec::new()
    }
}
