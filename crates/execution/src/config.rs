//! Scheduler configuration.

/// Default capacity of the cancellation queue.
pub const DEFAULT_CANCELLATION_CAPACITY: usize = 100;

/// Configuration for the experiment scheduler.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Max pending cancellation requests before requesters wait
    pub cancellation_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cancellation_capacity: DEFAULT_CANCELLATION_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    /// Create a new config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cancellation queue capacity. Zero is raised to one.
    pub fn with_cancellation_capacity(mut self, capacity: usize) -> Self {
        self.cancellation_capacity = capacity.max(1);
        self
    }
}
