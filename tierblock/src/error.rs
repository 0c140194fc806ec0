use thiserror::Error;

/// Errors raised while fitting a tier model.
#[derive(Error, Debug)]
pub enum FitError {
    /// Inconsistent dimensions, labels or options
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The OS refused a worker thread
    #[error("Failed to spawn search worker {worker}: {source}")]
    Spawn {
        /// Worker id
        worker: usize,
        /// Error from the thread builder
        #[source]
        source: std::io::Error,
    },

    /// A worker could not continue; only that worker stops
    #[error("Search worker {worker} failed: {message}")]
    WorkerFault {
        /// Worker id
        worker: usize,
        /// What went wrong
        message: String,
    },

    /// The coordinator lost track of its workers or state
    #[error("Coordinator fault: {0}")]
    CoordinatorFault(String),
}

/// Result with [`FitError`].
pub type Result<T> = std::result::Result<T, FitError>;
