//! Pluggable execution backends: one per `JobKind`, behind a uniform
//! `dispatch` contract so the scheduler never needs to know how a job
//! actually runs.

mod distributed;
mod local;
mod process;
mod thread;

pub(crate) use distributed::DistributedBackend;
pub(crate) use local::LocalBackend;
pub(crate) use process::ProcessBackend;
pub(crate) use thread::ThreadBackend;

use std::future::Future;
use std::pin::Pin;

use crate::error::JobError;
use crate::job::Job;
use crate::value::JobValue;

/// Runs a single job to completion and reports its outcome.
///
/// Object-safe by hand-rolling the future-boxing `async-fn-in-trait` would
/// otherwise generate, matching the boxed-closure style already used for
/// [`JobCallable`](crate::job::JobCallable) — the corpus doesn't pull in an
/// `async_trait`-style macro crate, so neither do we.
pub(crate) trait Backend: Send + Sync {
    fn run<'a>(
        &'a self,
        job: &'a Job,
    ) -> Pin<Box<dyn Future<Output = Result<JobValue, JobError>> + Send + 'a>>;
}
