//! Bounded blocking worker pool: a fixed number of permits gate how many
//! callables may run concurrently on the blocking thread pool at once.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::backend::Backend;
use crate::error::{BackendError, JobError};
use crate::job::{Job, JobCallable};
use crate::value::JobValue;

pub(crate) struct ThreadBackend {
    permits: Arc<Semaphore>,
}

impl ThreadBackend {
    pub(crate) fn new(max_workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }
}

impl Backend for ThreadBackend {
    fn run<'a>(
        &'a self,
        job: &'a Job,
    ) -> Pin<Box<dyn Future<Output = Result<JobValue, JobError>> + Send + 'a>> {
        Box::pin(async move {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|e| JobError::Backend(BackendError::Lost(e.to_string())))?;

            let args = job.args();
            match job.callable() {
                JobCallable::Sync(f) => tokio::task::spawn_blocking(move || f(args))
                    .await
                    .map_err(|e| JobError::Backend(BackendError::Lost(e.to_string())))?,
                JobCallable::Async(f) => f(args).await,
            }
        })
    }
}
