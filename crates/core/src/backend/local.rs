//! In-process execution: blocking callables run on the blocking thread
//! pool, async callables run directly on the scheduler's own task.

use std::future::Future;
use std::pin::Pin;

use crate::backend::Backend;
use crate::error::JobError;
use crate::job::{Job, JobCallable};
use crate::value::JobValue;

/// Runs the callable directly. Sync callables go through `spawn_blocking`
/// so a CPU-bound closure can't stall the scheduler's own task; async
/// callables are polled in place.
pub(crate) struct LocalBackend;

impl Backend for LocalBackend {
    fn run<'a>(
        &'a self,
        job: &'a Job,
    ) -> Pin<Box<dyn Future<Output = Result<JobValue, JobError>> + Send + 'a>> {
        Box::pin(async move {
            let args = job.args();
            match job.callable() {
                JobCallable::Sync(f) => tokio::task::spawn_blocking(move || f(args))
                    .await
                    .map_err(|e| JobError::Backend(crate::error::BackendError::Lost(e.to_string())))?,
                JobCallable::Async(f) => f(args).await,
            }
        })
    }
}
