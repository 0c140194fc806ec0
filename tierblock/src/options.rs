use std::time::Duration;

/// Options for the parallel tier search.
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Number of search workers. Default: available parallelism - 1 (min 1)
    pub num_workers: usize,
    /// Consecutive failed proposals before an exhaustive sweep. Default: 500
    pub sweep_interval: usize,
    /// Random seed; each worker derives its own stream. Default: 42
    pub seed: u64,
    /// Wall-clock budget for the whole run. Default: none
    pub max_duration: Option<Duration>,
    /// Random proposals allowed per worker. Default: none
    pub max_proposals: Option<usize>,
    /// Prune candidates that cannot beat the best objective. Default: true
    pub early_abort: bool,
}

impl FitOptions {
    /// Set the number of workers.
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the failures allowed before a sweep.
    pub fn with_sweep_interval(mut self, sweep_interval: usize) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    /// Set or clear the wall-clock budget.
    pub fn with_max_duration(mut self, max_duration: Option<Duration>) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// Set or clear the per-worker proposal budget.
    pub fn with_max_proposals(mut self, max_proposals: Option<usize>) -> Self {
        self.max_proposals = max_proposals;
        self
    }
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            num_workers: num_cpus::get().saturating_sub(1).max(1),
            sweep_interval: 500,
            seed: 42,
            max_duration: None,
            max_proposals: None,
            early_abort: true,
        }
    }
}
