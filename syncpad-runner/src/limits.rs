use std::time::Duration;

/// Resource limits applied to every execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Evaluation steps (statements + expressions) before aborting
    pub max_steps: u64,
    /// Nested function calls before `Maximum call stack size exceeded`
    pub max_call_depth: usize,
    /// Wall-clock budget for one run
    pub timeout: Duration,
    /// Longest string (in bytes) a program may build
    pub max_string_length: usize,
    /// Array elements and object properties live at once
    pub max_heap_slots: usize,
    /// Arrays nested inside one another while converting to a string
    pub max_nesting_depth: usize,
    /// Native stack reserved for the interpreter thread
    pub stack_size: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_steps: 1_000_000,
            max_call_depth: 256,
            timeout: Duration::from_secs(2),
            max_string_length: 1 << 24,
            max_heap_slots: 1 << 21,
            max_nesting_depth: 1024,
            stack_size: 64 * 1024 * 1024,
        }
    }
}

impl ExecutionLimits {
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_heap_slots(mut self, slots: usize) -> Self {
        self.max_heap_slots = slots;
        self
    }

    pub fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }
}
