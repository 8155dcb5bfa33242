/// Pending-token buffer. Tokens accumulate here as they arrive and are
/// drained on the flush tick, so the UI update rate is bounded regardless of
/// token arrival rate. Owned by the single consumer task; all reads and
/// writes happen on that task.
#[derive(Debug, Default)]
pub struct Coalescer {
    pending: String,
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: &str) {
        self.pending.push_str(text);
    }

    /// Drain the buffer; None when there is nothing to flush.
    pub fn take(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    /// Discard buffered tokens (partial output after a stream error).
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
