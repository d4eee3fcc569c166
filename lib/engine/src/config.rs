/// The default number of left-hand bindings a join buffers before scanning its right-hand side.
pub const DEFAULT_JOIN_BUFFER_CAPACITY: usize = 10_000;

/// Configuration options for evaluating queries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvaluationConfig {
    join_buffer_capacity: usize,
}

impl EvaluationConfig {
    /// Creates a new [EvaluationConfig] with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the join buffer capacity.
    pub fn join_buffer_capacity(&self) -> usize {
        self.join_buffer_capacity
    }

    /// Sets how many left-hand bindings a join holds in memory at once.
    ///
    /// A capacity of zero is treated as one.
    #[must_use]
    pub fn with_join_buffer_capacity(mut self, capacity: usize) -> Self {
        self.join_buffer_capacity = capacity.max(1);
        self
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            join_buffer_capacity: DEFAULT_JOIN_BUFFER_CAPACITY,
        }
    }
}
