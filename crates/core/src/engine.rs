//! The scheduler: a cooperative, single-task event loop driving every job
//! from `pending` through to a terminal status.
//!
//! Split into a small `EngineInner` reachable from anywhere (including
//! from a `Job`'s `Weak` back-reference) holding channels and a status
//! index, and an `EngineRuntime` that owns everything mutable and runs
//! exclusively on its own spawned task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::{AbortHandle, JoinSet};

use crate::backend::{Backend, DistributedBackend, LocalBackend, ProcessBackend, ThreadBackend};
use crate::condition::{Condition, EngineView, Mode};
use crate::error::{EngineError, JobError};
use crate::id::JobId;
use crate::job::{Job, JobKind, JobStatus};
use crate::store::JobStore;
use crate::value::JobValue;

/// Tuning knobs for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_jobs: usize,
    /// Per-kind dispatch ceiling, checked in addition to `max_jobs`. A kind
    /// absent from the map has no ceiling of its own.
    pub max_jobs_per_kind: HashMap<JobKind, usize>,
    pub max_thread_workers: usize,
    pub tick_interval: Duration,
    pub distributed_endpoint: Option<String>,
    pub distributed_poll_interval: Duration,
    /// Log a failed job's error via `tracing::error!` when it terminates.
    /// The error is always stored on the job regardless of this flag.
    pub print_traceback: bool,
}

impl EngineConfig {
    pub const DEFAULT_MAX_JOBS: usize = 64;
    pub const DEFAULT_MAX_THREAD_WORKERS: usize = 8;
    pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);
    pub const DEFAULT_DISTRIBUTED_POLL_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_PRINT_TRACEBACK: bool = true;
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_jobs: Self::DEFAULT_MAX_JOBS,
            max_jobs_per_kind: HashMap::new(),
            max_thread_workers: Self::DEFAULT_MAX_THREAD_WORKERS,
            tick_interval: Self::DEFAULT_TICK_INTERVAL,
            distributed_endpoint: None,
            distributed_poll_interval: Self::DEFAULT_DISTRIBUTED_POLL_INTERVAL,
            print_traceback: Self::DEFAULT_PRINT_TRACEBACK,
        }
    }
}

/// Public event stream a caller can subscribe to via [`Engine::subscribe`].
#[derive(Debug, Clone)]
pub enum EngineEvent {
    JobSubmitted(JobId),
    JobStarted(JobId),
    JobRetrying { id: JobId, attempt: u32 },
    JobFinished { id: JobId, status: JobStatus },
    Stopped,
}

enum EngineCommand {
    Submit(Job),
    Cancel(JobId),
    Rerun(JobId),
}

/// Shared handle reachable from a [`Job`] via `Weak<EngineInner>`, and from
/// the public [`Engine`] facade via `Arc`.
pub(crate) struct EngineInner {
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
    event_tx: broadcast::Sender<EngineEvent>,
    notify: Notify,
    running: AtomicBool,
    store: Mutex<JobStore>,
}

impl EngineInner {
    pub(crate) fn request_cancel(&self, id: JobId) {
        let _ = self.cmd_tx.send(EngineCommand::Cancel(id));
        self.notify.notify_one();
    }

    pub(crate) fn request_rerun(&self, id: JobId) {
        let _ = self.cmd_tx.send(EngineCommand::Rerun(id));
        self.notify.notify_one();
    }

    /// Called from `Job::finish` so the store's bucket tracking stays
    /// correct even when a job finishes outside the scheduler's own
    /// completion handler (generator exhaustion, a bound job's direct
    /// `cancel()` racing the scheduler).
    pub(crate) fn reconcile_finished(&self, id: JobId, status: JobStatus) {
        let mut store = self.store.lock().unwrap();
        if store.current_status(id) == Some(status) {
            return;
        }
        store.move_to(id, status);
        drop(store);
        let _ = self.event_tx.send(EngineEvent::JobFinished { id, status });
    }
}

impl EngineView for EngineInner {
    fn job_status(&self, id: JobId) -> Option<JobStatus> {
        self.store.lock().unwrap().current_status(id)
    }
}

struct Backends {
    local: Arc<LocalBackend>,
    thread: Arc<ThreadBackend>,
    process: Arc<ProcessBackend>,
    distributed: Option<Arc<DistributedBackend>>,
}

impl Backends {
    fn new(config: &EngineConfig) -> Self {
        Self {
            local: Arc::new(LocalBackend),
            thread: Arc::new(ThreadBackend::new(config.max_thread_workers)),
            process: Arc::new(ProcessBackend),
            distributed: config
                .distributed_endpoint
                .clone()
                .map(|endpoint| Arc::new(DistributedBackend::new(endpoint, config.distributed_poll_interval))),
        }
    }

    /// Extension kinds (`webapp`, `cron`, `sentinel`, ...) carry a tag for
    /// routing/metadata purposes only — their callables are plain in-process
    /// Rust closures, so they run on the same backend as `Local`.
    fn for_kind(&self, kind: &JobKind) -> Result<Arc<dyn Backend>, JobError> {
        match kind {
            JobKind::Local | JobKind::Extension(_) => Ok(self.local.clone() as Arc<dyn Backend>),
            JobKind::Thread => Ok(self.thread.clone() as Arc<dyn Backend>),
            JobKind::Process => Ok(self.process.clone() as Arc<dyn Backend>),
            JobKind::Distributed => self.distributed.clone().map(|b| b as Arc<dyn Backend>).ok_or_else(|| {
                JobError::Backend(crate::error::BackendError::StartFailed(
                    "no distributed backend configured".into(),
                ))
            }),
        }
    }
}

/// Owns every piece of mutable scheduling state; runs exclusively on the
/// task spawned by [`Engine::start`].
struct EngineRuntime {
    inner: Arc<EngineInner>,
    cmd_rx: mpsc::UnboundedReceiver<EngineCommand>,
    backends: Backends,
    config: EngineConfig,
    in_flight: JoinSet<(JobId, Result<JobValue, JobError>)>,
    abort_handles: HashMap<JobId, AbortHandle>,
    running_by_kind: HashMap<JobKind, usize>,
}

impl EngineRuntime {
    async fn run(mut self) {
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if !self.inner.running.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                biased;

                Some(cmd) = self.cmd_rx.recv() => self.handle_command(cmd),

                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    self.handle_completion(joined);
                }

                _ = tick.tick() => self.poll_pending(),

                _ = self.inner.notify.notified() => {}
            }
        }

        self.in_flight.shutdown().await;
        let _ = self.inner.event_tx.send(EngineEvent::Stopped);
    }

    fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Submit(job) => {
                let id = job.id();
                self.inner.store.lock().unwrap().insert_pending(job);
                let _ = self.inner.event_tx.send(EngineEvent::JobSubmitted(id));
            }
            EngineCommand::Cancel(id) => self.cancel_job(id),
            EngineCommand::Rerun(id) => {
                let status = self.inner.store.lock().unwrap().current_status(id);
                if status.is_some_and(JobStatus::is_terminal) {
                    if let Some(job) = self.job(id) {
                        job.reset_for_rerun();
                        self.inner.store.lock().unwrap().move_to(id, JobStatus::Pending);
                        job.mark_pending();
                    }
                }
            }
        }
    }

    fn job(&self, id: JobId) -> Option<Job> {
        self.inner.store.lock().unwrap().get_by_id(id).cloned()
    }

    fn decrement_running(&mut self, kind: &JobKind) {
        if let Some(count) = self.running_by_kind.get_mut(kind) {
            *count = count.saturating_sub(1);
        }
    }

    fn cancel_job(&mut self, id: JobId) {
        let status = self.inner.store.lock().unwrap().current_status(id);
        match status {
            Some(JobStatus::Pending) => {
                if let Some(job) = self.job(id) {
                    job.finish(JobStatus::Cancelled, None, Some(JobError::Cancelled));
                }
            }
            Some(JobStatus::Running) => {
                if let Some(handle) = self.abort_handles.remove(&id) {
                    handle.abort();
                }
                if let Some(job) = self.job(id) {
                    self.decrement_running(job.kind());
                    job.finish(JobStatus::Cancelled, None, Some(JobError::Cancelled));
                }
            }
            _ => {}
        }
    }

    /// Evaluate every pending job's condition and dispatch the ones that are
    /// both satisfied and within capacity.
    fn poll_pending(&mut self) {
        let pending_ids: Vec<JobId> = {
            let store = self.inner.store.lock().unwrap();
            store.iter(JobStatus::Pending).map(Job::id).collect()
        };

        for id in pending_ids {
            if self.in_flight.len() >= self.config.max_jobs {
                break;
            }
            let Some(job) = self.job(id) else { continue };
            if let Some(&limit) = self.config.max_jobs_per_kind.get(job.kind()) {
                if self.running_by_kind.get(job.kind()).copied().unwrap_or(0) >= limit {
                    continue;
                }
            }
            if !job.effective_condition().satisfy(&*self.inner) {
                continue;
            }
            self.dispatch(job);
        }
    }

    fn dispatch(&mut self, job: Job) {
        let id = job.id();
        let backend = match self.backends.for_kind(job.kind()) {
            Ok(b) => b,
            Err(e) => {
                job.finish(JobStatus::Failed, None, Some(e));
                return;
            }
        };

        self.inner.store.lock().unwrap().move_to(id, JobStatus::Running);
        job.mark_started();
        *self.running_by_kind.entry(job.kind().clone()).or_insert(0) += 1;
        let _ = self.inner.event_tx.send(EngineEvent::JobStarted(id));

        let run_job = job.clone();
        let abort = self.in_flight.spawn(async move {
            if let Err(e) = run_job.resolve_args().await {
                return (run_job.id(), Err(e));
            }
            let result = backend.run(&run_job).await;
            (run_job.id(), result)
        });
        self.abort_handles.insert(id, abort);
    }

    fn handle_completion(&mut self, joined: Result<(JobId, Result<JobValue, JobError>), tokio::task::JoinError>) {
        let (id, result) = match joined {
            Ok(pair) => pair,
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                tracing::error!(error = %e, "in-flight job task panicked");
                return;
            }
        };
        self.abort_handles.remove(&id);

        // Already moved out of `running` by a concurrent cancel.
        if self.inner.store.lock().unwrap().current_status(id) != Some(JobStatus::Running) {
            return;
        }
        let Some(job) = self.job(id) else { return };
        self.decrement_running(job.kind());

        match result {
            Ok(value) if job.is_generator() && job.generator_stage() != Some(crate::job::GeneratorStage::Exhausted) => {
                job.store_generator_handle(value);
            }
            Ok(value) => {
                job.finish(JobStatus::Done, Some(value), None);
            }
            // Dependency failures and cancellations are not retryable: retrying
            // re-reads the same stale dependency/cancel outcome, so a retry
            // budget would only delay an unavoidable failure.
            Err(err) if matches!(err, JobError::DependencyFailed(_) | JobError::Cancelled) => {
                if self.config.print_traceback {
                    tracing::error!(%id, error = %err, "job failed");
                }
                job.finish(JobStatus::Failed, None, Some(err));
            }
            Err(err) => {
                let attempts = job.attempts();
                let policy = job.retry_policy();
                if attempts < policy.max_attempts {
                    job.mark_retry_pending();
                    self.inner.store.lock().unwrap().move_to(id, JobStatus::Pending);
                    let delay = ChronoDuration::from_std(policy.retry_delay).unwrap_or_default();
                    let retry_at = chrono::Utc::now() + delay;
                    let combined = job.effective_condition() & Condition::after_timepoint(retry_at);
                    job.set_effective_condition(combined);
                    let _ = self.inner.event_tx.send(EngineEvent::JobRetrying { id, attempt: attempts + 1 });
                } else {
                    if self.config.print_traceback {
                        tracing::error!(%id, error = %err, "job failed");
                    }
                    job.finish(JobStatus::Failed, None, Some(err));
                }
            }
        }
    }
}

/// The job engine: accepts job submissions and drives them to completion.
///
/// Cloning an `Engine` is cheap and shares the same scheduler task — see
/// [`Engine::scoped`] for an RAII-guarded handle that stops the engine when
/// dropped.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
    scheduler: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl Engine {
    /// Construct and immediately start a new engine with the given config.
    pub fn start(config: EngineConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(1024);
        let inner = Arc::new(EngineInner {
            cmd_tx,
            event_tx,
            notify: Notify::new(),
            running: AtomicBool::new(true),
            store: Mutex::new(JobStore::new()),
        });

        let runtime = EngineRuntime {
            inner: inner.clone(),
            cmd_rx,
            backends: Backends::new(&config),
            config,
            in_flight: JoinSet::new(),
            abort_handles: HashMap::new(),
            running_by_kind: HashMap::new(),
        };
        let handle = tokio::spawn(runtime.run());

        Engine {
            inner,
            scheduler: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Returns a guard that stops this engine when dropped.
    pub fn scoped(config: EngineConfig) -> EngineGuard {
        EngineGuard(Self::start(config))
    }

    /// Submit a job. The job transitions `created -> pending` immediately.
    ///
    /// Any `JobFuture` found among the job's arguments adds an `AfterOthers`
    /// conjunct gating dispatch on that producer reaching a terminal status —
    /// without this, a consumer with the default `Always` condition would be
    /// dispatched (and occupy a running slot) before its producer finishes,
    /// then block inside the backend waiting on a dependency that can never
    /// make progress under a full capacity cap.
    pub fn submit(&self, job: Job) -> Job {
        let producers = job.dependency_ids();
        if !producers.is_empty() {
            let terminal = [JobStatus::Done, JobStatus::Failed, JobStatus::Cancelled];
            let gate = Condition::after_others(producers, terminal, Mode::All);
            let combined = job.effective_condition() & gate;
            job.set_effective_condition(combined);
        }
        job.submit_to(Arc::downgrade(&self.inner));
        let handle = job.clone();
        let _ = self.inner.cmd_tx.send(EngineCommand::Submit(job));
        self.inner.notify.notify_one();
        handle
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        self.inner.store.lock().unwrap().get_by_id(id).cloned()
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.inner.store.lock().unwrap().current_status(id)
    }

    pub fn job_count(&self) -> usize {
        self.inner.store.lock().unwrap().total()
    }

    /// Block until `id` reaches a terminal status.
    pub async fn wait_job(&self, id: JobId) -> Result<JobValue, JobError> {
        let job = self.job(id).ok_or(JobError::Cancelled)?;
        job.result().await
    }

    /// Request a graceful stop: in-flight jobs run to completion, pending
    /// jobs are left pending, no new submissions are scheduled.
    pub async fn stop(&self) -> Result<(), EngineError> {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return Err(EngineError::NotRunning);
        }
        self.inner.notify.notify_one();
        let handle = self.scheduler.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.await.map_err(|e| EngineError::SchedulerFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Block until every currently-known job reaches a terminal status.
    ///
    /// A generator job that has handed back its streaming handle is excluded
    /// from the `running` count once it reaches that stage: it stays
    /// logically `running` until the consumer calls
    /// `mark_generator_exhausted`, which may be long after the producer's
    /// own work is done, so counting it here would block `join` forever on
    /// an otherwise-idle engine.
    pub async fn join(&self) {
        loop {
            let pending_or_running = {
                let store = self.inner.store.lock().unwrap();
                let running = store
                    .iter(JobStatus::Running)
                    .filter(|job| job.generator_stage() != Some(crate::job::GeneratorStage::Streaming))
                    .count();
                store.len(JobStatus::Pending) + running
            };
            if pending_or_running == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Cancel every job not yet in a terminal status: pending jobs are
    /// cancelled directly, running jobs have their backend task aborted.
    pub fn cancel_all(&self) {
        let ids: Vec<JobId> = {
            let store = self.inner.store.lock().unwrap();
            store
                .iter(JobStatus::Pending)
                .chain(store.iter(JobStatus::Running))
                .map(Job::id)
                .collect()
        };
        for id in ids {
            if let Some(job) = self.job(id) {
                job.cancel();
            }
        }
    }
}

/// RAII handle returned by [`Engine::scoped`]: stops the engine on drop.
pub struct EngineGuard(Engine);

impl std::ops::Deref for EngineGuard {
    type Target = Engine;
    fn deref(&self) -> &Engine {
        &self.0
    }
}

impl Drop for EngineGuard {
    fn drop(&mut self) {
        self.0.inner.running.store(false, Ordering::SeqCst);
        self.0.inner.notify.notify_one();
    }
}
