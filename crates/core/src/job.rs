//! The job: a stateful record of one unit of work.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::condition::Condition;
use crate::engine::EngineInner;
use crate::error::{EngineError, JobError};
use crate::id::JobId;
use crate::value::{JobArgs, JobValue};

/// Backend selector tag attached to each job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Runs inline on the scheduler task.
    Local,
    /// Runs on a bounded blocking worker pool.
    Thread,
    /// Runs in a child process.
    Process,
    /// Delegated to an external worker pool over HTTP.
    Distributed,
    /// User-defined extension kind (shell subprocess, webapp launcher, cron/sentinel, ...).
    Extension(&'static str),
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Created,
    Pending,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// `(max_attempts, retry_delay)` for a job's retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Three-state handle for a generator-producing callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorStage {
    Producing,
    Streaming,
    Exhausted,
}

/// Result of a terminated job, delivered to `JobFuture` observers.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub value: Option<JobValue>,
    pub error: Option<JobError>,
}

type ObserverFn = Box<dyn FnOnce(JobOutcome) + Send>;

/// The user callable: either a synchronous function or one returning a future.
///
/// Held behind an `Arc<dyn Fn>` rather than a boxed `FnOnce` so `rerun()` can
/// invoke it again without the engine having to reconstruct the job.
#[derive(Clone)]
pub enum JobCallable {
    Sync(Arc<dyn Fn(JobArgs) -> Result<JobValue, JobError> + Send + Sync>),
    Async(
        Arc<
            dyn Fn(JobArgs) -> Pin<Box<dyn Future<Output = Result<JobValue, JobError>> + Send>>
                + Send
                + Sync,
        >,
    ),
}

impl JobCallable {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(JobArgs) -> Result<JobValue, JobError> + Send + Sync + 'static,
    {
        JobCallable::Sync(Arc::new(f))
    }

    pub fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: Fn(JobArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JobValue, JobError>> + Send + 'static,
    {
        JobCallable::Async(Arc::new(move |args| Box::pin(f(args))))
    }
}

pub(crate) struct JobState {
    pub(crate) condition: Mutex<Condition>,
    pub(crate) retry: RetryPolicy,
    pub(crate) attempts: AtomicU32,
    pub(crate) wait_time_delta: Duration,
    pub(crate) args: Mutex<JobArgs>,
    pub(crate) callable: JobCallable,
    pub(crate) result: Mutex<Option<Result<JobValue, JobError>>>,
    pub(crate) generator: Mutex<Option<GeneratorStage>>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) started_at: Mutex<Option<DateTime<Utc>>>,
    pub(crate) stopped_at: Mutex<Option<DateTime<Utc>>>,
    pub(crate) status_tx: watch::Sender<JobStatus>,
    pub(crate) observers: Mutex<Vec<ObserverFn>>,
    pub(crate) engine: Mutex<Option<Weak<EngineInner>>>,
}

/// A stateful record of one work unit: inputs, condition, status, result, retries.
#[derive(Clone)]
pub struct Job {
    pub(crate) id: JobId,
    pub(crate) kind: JobKind,
    pub(crate) state: Arc<JobState>,
}

impl Job {
    pub fn new(kind: JobKind, callable: JobCallable) -> Self {
        let (status_tx, _) = watch::channel(JobStatus::Created);
        Self {
            id: JobId::new(),
            kind,
            state: Arc::new(JobState {
                condition: Mutex::new(Condition::always()),
                retry: RetryPolicy::default(),
                attempts: AtomicU32::new(0),
                wait_time_delta: Duration::from_millis(100),
                args: Mutex::new(JobArgs::new()),
                callable,
                result: Mutex::new(None),
                generator: Mutex::new(None),
                created_at: Utc::now(),
                started_at: Mutex::new(None),
                stopped_at: Mutex::new(None),
                status_tx,
                observers: Mutex::new(Vec::new()),
                engine: Mutex::new(None),
            }),
        }
    }

    /// Panics if called after this job has been cloned (e.g. after `submit_to`/`future`),
    /// since at that point `JobState` is shared and no longer uniquely owned.
    pub fn with_condition(mut self, condition: Condition) -> Self {
        Arc::get_mut(&mut self.state)
            .expect("with_condition must be called before the job is shared")
            .condition = Mutex::new(condition);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        Arc::get_mut(&mut self.state)
            .expect("with_retry must be called before the job is shared")
            .retry = retry;
        self
    }

    pub fn with_wait_interval(mut self, delta: Duration) -> Self {
        Arc::get_mut(&mut self.state)
            .expect("with_wait_interval must be called before the job is shared")
            .wait_time_delta = delta;
        self
    }

    pub fn with_args(self, args: JobArgs) -> Self {
        *self.state.args.lock().unwrap() = args;
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn kind(&self) -> &JobKind {
        &self.kind
    }

    pub fn status(&self) -> JobStatus {
        *self.state.status_tx.borrow()
    }

    pub fn attempts(&self) -> u32 {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.state.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.state.started_at.lock().unwrap()
    }

    pub fn stopped_at(&self) -> Option<DateTime<Utc>> {
        *self.state.stopped_at.lock().unwrap()
    }

    /// A handle to this job's eventual result, usable as an argument to other jobs.
    pub fn future(&self) -> JobFuture {
        JobFuture {
            id: self.id,
            state: self.state.clone(),
        }
    }

    /// Register this job with an engine, transitioning `created -> pending`.
    ///
    /// The actual bucket move happens on the scheduler task when it drains
    /// the submission mailbox; this call only marks the job pending and
    /// hands it to the engine's submission channel.
    pub(crate) fn submit_to(&self, engine: Weak<EngineInner>) {
        *self.state.engine.lock().unwrap() = Some(engine);
        let _ = self.state.status_tx.send(JobStatus::Pending);
    }

    /// Idempotent: transition from any non-terminal status to `cancelled`.
    pub fn cancel(&self) {
        let current = self.status();
        if current.is_terminal() {
            return;
        }
        if let Some(engine) = self.state.engine.lock().unwrap().as_ref().and_then(Weak::upgrade) {
            engine.request_cancel(self.id);
        } else {
            self.finish(JobStatus::Cancelled, None, Some(JobError::Cancelled));
        }
    }

    /// Valid from terminal states: resets the attempt counter and returns to `pending`.
    ///
    /// For an engine-bound job the reset itself is deferred to the scheduler
    /// task (driven by `EngineCommand::Rerun`, see `reset_for_rerun`): clearing
    /// the result here and posting `pending` there would leave a window where
    /// the job still reports a terminal status but its result is already
    /// gone, which `result()` would observe as a spurious `Cancelled`.
    pub fn rerun(&self) -> Result<(), EngineError> {
        if !self.status().is_terminal() {
            return Err(EngineError::SchedulerFailed(
                "rerun() called on a non-terminal job".into(),
            ));
        }
        if let Some(engine) = self.state.engine.lock().unwrap().as_ref().and_then(Weak::upgrade) {
            engine.request_rerun(self.id);
        } else {
            self.reset_for_rerun();
            let _ = self.state.status_tx.send(JobStatus::Pending);
        }
        Ok(())
    }

    /// Clear attempt/result/timing state ahead of a fresh run. Called either
    /// synchronously from `rerun()` (unbound job) or from the scheduler's
    /// `Rerun` command handler, immediately before it posts `pending`.
    pub(crate) fn reset_for_rerun(&self) {
        self.state.attempts.store(0, Ordering::SeqCst);
        *self.state.result.lock().unwrap() = None;
        *self.state.started_at.lock().unwrap() = None;
        *self.state.stopped_at.lock().unwrap() = None;
    }

    /// Block until the job reaches `status` or any terminal status.
    pub async fn wait(
        &self,
        status: JobStatus,
        timeout: Option<Duration>,
    ) -> Result<JobStatus, EngineError> {
        let mut rx = self.state.status_tx.subscribe();
        let wait_fut = async {
            loop {
                let current = *rx.borrow();
                if current == status || current.is_terminal() {
                    return current;
                }
                if rx.changed().await.is_err() {
                    return *rx.borrow();
                }
            }
        };
        match timeout {
            Some(d) => tokio::time::timeout(d, wait_fut)
                .await
                .map_err(|_| EngineError::Timeout),
            None => Ok(wait_fut.await),
        }
    }

    /// Available only after termination; raises the stored error if `status == failed`.
    pub async fn result(&self) -> Result<JobValue, JobError> {
        self.wait(JobStatus::Done, None).await.ok();
        let guard = self.state.result.lock().unwrap();
        match guard.clone() {
            Some(r) => r,
            None => Err(JobError::Cancelled),
        }
    }

    pub async fn exception(&self) -> Option<JobError> {
        self.result().await.err()
    }

    pub(crate) fn callable(&self) -> JobCallable {
        self.state.callable.clone()
    }

    pub(crate) fn args(&self) -> JobArgs {
        self.state.args.lock().unwrap().clone()
    }

    pub(crate) fn effective_condition(&self) -> Condition {
        self.state.condition.lock().unwrap().clone()
    }

    pub(crate) fn set_effective_condition(&self, condition: Condition) {
        *self.state.condition.lock().unwrap() = condition;
    }

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        self.state.retry
    }

    pub(crate) fn wait_time_delta(&self) -> Duration {
        self.state.wait_time_delta
    }

    pub(crate) fn mark_started(&self) {
        *self.state.started_at.lock().unwrap() = Some(Utc::now());
        let _ = self.state.status_tx.send(JobStatus::Running);
    }

    pub(crate) fn mark_retry_pending(&self) {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        let _ = self.state.status_tx.send(JobStatus::Pending);
    }

    pub(crate) fn mark_pending(&self) {
        let _ = self.state.status_tx.send(JobStatus::Pending);
    }

    /// Ids of every producer this job's arguments depend on, for gating its
    /// effective condition at submission time (see `Engine::submit`).
    pub(crate) fn dependency_ids(&self) -> Vec<JobId> {
        self.state.args.lock().unwrap().dependencies().map(|f| f.id()).collect()
    }

    /// Substitute each `JobValue::Future` argument with its producer's
    /// resolved value. By the time this runs the submission-time
    /// `AfterOthers` gate has already held the job `pending` until every
    /// dependency is terminal, so `resolve` below never blocks capacity.
    pub(crate) async fn resolve_args(&self) -> Result<(), JobError> {
        let futures: Vec<JobFuture> = self.state.args.lock().unwrap().dependencies().collect();
        let mut resolved = Vec::with_capacity(futures.len());
        for fut in &futures {
            match fut.resolve().await {
                Ok(v) => resolved.push((fut.id(), v)),
                Err(_) => return Err(JobError::DependencyFailed(fut.id())),
            }
        }
        let mut guard = self.state.args.lock().unwrap();
        let args = &mut *guard;
        for value in args.positional.iter_mut().chain(args.keyword.values_mut()) {
            if let JobValue::Future(f) = value {
                if let Some((_, resolved_value)) = resolved.iter().find(|(id, _)| *id == f.id()) {
                    *value = resolved_value.clone();
                }
            }
        }
        Ok(())
    }

    /// Opt this job into the generator protocol: the scheduler marks it
    /// `running` as soon as the producer returns a handle, and holds it there
    /// until the consumer calls [`mark_generator_exhausted`](Self::mark_generator_exhausted).
    pub fn with_generator(mut self) -> Self {
        Arc::get_mut(&mut self.state)
            .expect("with_generator must be called before the job is shared")
            .generator = Mutex::new(Some(GeneratorStage::Producing));
        self
    }

    pub fn is_generator(&self) -> bool {
        self.state.generator.lock().unwrap().is_some()
    }

    pub(crate) fn generator_stage(&self) -> Option<GeneratorStage> {
        *self.state.generator.lock().unwrap()
    }

    /// Stores the producer's forwarding handle without finishing the job —
    /// the job stays `running` until the consumer exhausts the stream.
    pub(crate) fn store_generator_handle(&self, value: JobValue) {
        *self.state.generator.lock().unwrap() = Some(GeneratorStage::Streaming);
        *self.state.result.lock().unwrap() = Some(Ok(value));
    }

    /// Explicit consumer-side signal that a generator job's stream is exhausted.
    pub fn mark_generator_exhausted(&self) {
        *self.state.generator.lock().unwrap() = Some(GeneratorStage::Exhausted);
        if self.status() == JobStatus::Running {
            let value = self.state.result.lock().unwrap().clone().and_then(Result::ok);
            self.finish(JobStatus::Done, value, None);
        }
    }

    /// Terminal transition: stores the result, stamps `stopped_at`, fires observers.
    pub(crate) fn finish(
        &self,
        status: JobStatus,
        value: Option<JobValue>,
        error: Option<JobError>,
    ) {
        debug_assert!(status.is_terminal());
        *self.state.stopped_at.lock().unwrap() = Some(Utc::now());
        *self.state.result.lock().unwrap() = Some(match &error {
            Some(e) => Err(e.clone()),
            None => Ok(value.clone().unwrap_or(JobValue::Null)),
        });
        let _ = self.state.status_tx.send(status);

        if let Some(engine) = self.state.engine.lock().unwrap().as_ref().and_then(Weak::upgrade) {
            engine.reconcile_finished(self.id, status);
        }

        let observers: Vec<ObserverFn> = std::mem::take(&mut self.state.observers.lock().unwrap());
        let outcome = JobOutcome { status, value, error };
        for obs in observers {
            let outcome = outcome.clone();
            obs(outcome);
        }
    }

    /// Register a one-shot callback fired when this job reaches a terminal status.
    ///
    /// If the job is already terminal, the callback fires immediately (inline).
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(JobOutcome) + Send + 'static,
    {
        if self.status().is_terminal() {
            let guard = self.state.result.lock().unwrap();
            let (value, error) = match guard.clone() {
                Some(Ok(v)) => (Some(v), None),
                Some(Err(e)) => (None, Some(e)),
                None => (None, None),
            };
            f(JobOutcome {
                status: self.status(),
                value,
                error,
            });
            return;
        }
        self.state.observers.lock().unwrap().push(Box::new(f));
    }
}

/// A reference to a job's eventual result, usable as an argument to other jobs.
#[derive(Clone)]
pub struct JobFuture {
    pub(crate) id: JobId,
    pub(crate) state: Arc<JobState>,
}

impl JobFuture {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn done(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn status(&self) -> JobStatus {
        *self.state.status_tx.borrow()
    }

    pub async fn resolve(&self) -> Result<JobValue, JobError> {
        let mut rx = self.state.status_tx.subscribe();
        loop {
            let current = *rx.borrow();
            if current.is_terminal() {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
        let guard = self.state.result.lock().unwrap();
        match guard.clone() {
            Some(r) => r,
            None => Err(JobError::Cancelled),
        }
    }

    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(JobOutcome) + Send + 'static,
    {
        let job = Job {
            id: self.id,
            kind: JobKind::Local,
            state: self.state.clone(),
        };
        job.on_complete(f);
    }
}

impl std::fmt::Debug for JobFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JobFuture({})", self.id)
    }
}
