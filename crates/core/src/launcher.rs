//! Decorator-style job registration: wrap a plain function as a
//! `Launcher`, then call `.submit(args)` on it instead of constructing a
//! `Job` by hand. Reads the engine to submit to from a scoped
//! `tokio::task_local!` value rather than a process-wide singleton, so
//! multiple engines can coexist in one process without colliding.

use std::future::Future;
use std::sync::Arc;

use tokio::task_local;

use crate::engine::Engine;
use crate::error::{EngineError, JobError};
use crate::job::{Job, JobCallable, JobKind, RetryPolicy};
use crate::value::{JobArgs, JobValue};

task_local! {
    static CURRENT_ENGINE: Engine;
}

/// Run `body` with `engine` as the "current engine" for any `Launcher::submit`
/// call made during its execution, including by tasks it spawns (task-local
/// values inherit into children spawned from within the scope).
pub async fn with_engine<F, Fut, T>(engine: Engine, body: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    CURRENT_ENGINE.scope(engine, body()).await
}

pub fn current_engine() -> Result<Engine, EngineError> {
    CURRENT_ENGINE.try_with(Clone::clone).map_err(|_| EngineError::NotRunning)
}

/// A decorated callable bound to a `JobKind`, ready to be submitted
/// against whatever engine is current when `submit` is called.
pub struct Launcher {
    kind: JobKind,
    callable: JobCallable,
    retry: RetryPolicy,
}

impl Launcher {
    pub fn new(kind: JobKind, callable: JobCallable) -> Self {
        Self {
            kind,
            callable,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Submit a job built from this launcher's callable to the current engine.
    pub fn submit(&self, args: JobArgs) -> Result<Job, EngineError> {
        let engine = current_engine()?;
        let job = Job::new(self.kind.clone(), self.callable.clone())
            .with_retry(self.retry)
            .with_args(args);
        Ok(engine.submit(job))
    }
}

/// Wraps a synchronous function as a `Local`-kind `Launcher`.
pub fn launcher<F>(f: F) -> Launcher
where
    F: Fn(JobArgs) -> Result<JobValue, JobError> + Send + Sync + 'static,
{
    Launcher::new(JobKind::Local, JobCallable::sync(f))
}

/// Wraps an async function as a `Local`-kind `Launcher`.
pub fn async_launcher<F, Fut>(f: F) -> Launcher
where
    F: Fn(JobArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JobValue, JobError>> + Send + 'static,
{
    Launcher::new(JobKind::Local, JobCallable::asynchronous(f))
}

/// Builds a `Process`-kind `Launcher` from a command-template closure,
/// for `SubprocessJob`s: `template` maps a job's arguments to the JSON
/// command descriptor the process backend expects.
pub fn subprocess_launcher<F>(template: F) -> Launcher
where
    F: Fn(&JobArgs) -> serde_json::Value + Send + Sync + 'static,
{
    let template = Arc::new(template);
    Launcher::new(
        JobKind::Process,
        JobCallable::sync(move |args| Ok(JobValue::Json(template(&args)))),
    )
}
