/// Monotonic event-id source for self-originated frames
///
/// Starts at 0 and is pre-incremented, so the first id handed out is 1. Ids
/// are never reused for the lifetime of the engine, across reconnects and
/// forced re-initializations alike.
#[derive(Debug, Default)]
pub struct EventCounter {
    last: u64,
}

impl EventCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next id
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> u64 {
        self.last += 1;
        self.last
    }

    /// Consume an id without emitting a frame for it
    pub fn advance(&mut self) {
        self.last += 1;
    }

    /// Last id handed out or skipped
    pub fn current(&self) -> u64 {
        self.last
    }
}
