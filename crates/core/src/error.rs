//! Error taxonomy for the job engine.
//!
//! Job-level errors are stored on the job and surfaced via
//! `Job::result`/`Job::exception`; they never unwind the scheduler task.
//! `EngineError` covers operations invalid for the engine's current
//! lifecycle state, plus the scheduler's own unrecoverable failures.

use crate::id::JobId;

/// Error captured inside a job's result slot.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
    /// The user callable returned an error.
    #[error("job callable failed: {0}")]
    UserCallable(String),

    /// A `JobFuture` argument resolved to a producer that did not finish in `Done`.
    #[error("dependency job {0} did not complete successfully")]
    DependencyFailed(JobId),

    /// `Condition::satisfy` panicked or returned an error; treated as "not satisfied".
    #[error("condition evaluation failed: {0}")]
    Condition(String),

    /// The backend failed to start, lost, or could not run the job.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The job was cancelled before or during execution.
    #[error("job was cancelled")]
    Cancelled,
}

/// Error raised by a [`Backend`](crate::backend::Backend) implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// The backend could not start the job (spawn failure, serialization error, ...).
    #[error("backend failed to start job: {0}")]
    StartFailed(String),

    /// The backend lost track of an already-started job (process died, network dropped).
    #[error("backend lost the job: {0}")]
    Lost(String),
}

/// Error returned by [`Engine`](crate::engine::Engine) operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The operation requires a running engine.
    #[error("engine is not running")]
    NotRunning,

    /// `start()` was called on an engine that is already running.
    #[error("engine is already running")]
    AlreadyRunning,

    /// A blocking wait exceeded its timeout without the awaited condition holding.
    #[error("operation timed out")]
    Timeout,

    /// No job with this id exists in any bucket.
    #[error("job {0} not found")]
    JobNotFound(JobId),

    /// The scheduler task exited because of an internal invariant violation.
    #[error("scheduler failed: {0}")]
    SchedulerFailed(String),
}
