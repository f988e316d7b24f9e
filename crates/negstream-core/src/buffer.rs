//! Buffer of unsealed plaintext awaiting delivery to the reader.

/// Plaintext of the most recently unsealed frame not yet delivered.
///
/// Holds at most one frame's worth of data: the reader refills it only once it has
/// been drained completely.
#[derive(Debug, Default)]
pub struct SessionBuffer {
    data: Vec<u8>,
    offset: usize,
}

impl SessionBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes pending delivery.
    pub fn pending(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    /// Replace the contents with the plaintext of a freshly unsealed frame.
    ///
    /// # Panics
    ///
    /// Debug builds assert the previous frame was fully drained.
    pub fn fill(&mut self, plaintext: Vec<u8>) {
        debug_assert!(self.is_empty(), "refilled before previous frame drained");
        self.data = plaintext;
        self.offset = 0;
    }

    /// Copy up to `buf.len()` pending bytes into `buf`, returning the count.
    pub fn drain_into(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.pending());
        buf[..n].copy_from_slice(&self.data[self.offset..self.offset + n]);
        self.offset += n;
        if self.is_empty() {
            self.clear();
        }
        n
    }

    /// Drop any pending bytes and release the allocation.
    pub fn clear(&mut self) {
        self.data = Vec::new();
        self.offset = 0;
    }
}
