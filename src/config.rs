use std::cmp;
use std::time::Duration;
use tokio::sync::Semaphore;
use typed_builder::TypedBuilder;

pub const MIN_WORKERS: usize = 10;
pub const MIN_MEMORY_BUDGET: u64 = 1 << 20;
pub const DEFAULT_QUEUE_SIZE: usize = 2 * MIN_WORKERS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Upload,
    Download,
}

#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct TransportConfig {
    #[builder(default = MIN_WORKERS)]
    pub workers: usize,
    #[builder(default = MIN_MEMORY_BUDGET)]
    pub memory_budget: u64,
    /// `None` or zero waits forever.
    #[builder(default, setter(strip_option))]
    pub max_duration: Option<Duration>,
    /// Submitted but unfinished mapped parts.
    #[builder(default = DEFAULT_QUEUE_SIZE)]
    pub queue_size: usize,
    #[builder(default = Mode::Upload)]
    pub mode: Mode,
    #[builder(default = true)]
    pub verify_checksums: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl TransportConfig {
    pub fn normalized(self) -> Self {
        Self {
            workers: self.workers.clamp(MIN_WORKERS, Semaphore::MAX_PERMITS),
            memory_budget: cmp::max(self.memory_budget, MIN_MEMORY_BUDGET),
            max_duration: self.max_duration.filter(|d| !d.is_zero()),
            ..self
        }
    }
}
