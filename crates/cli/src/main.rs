mod cli;
mod shutdown;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use jobq_core::{
    Condition, Engine, EngineConfig, EngineEvent, JobArgs, JobCallable, JobError, JobKind, JobOutcome, JobValue,
    JobSnapshot, SnapshotStore,
};

use crate::cli::Cli;
use crate::shutdown::{spawn_ctrl_c_handler, ShutdownController, ShutdownEvent};

fn add_job(engine: &Engine, a: i64, b: i64) -> jobq_core::Job {
    let mut args = JobArgs::new();
    args.set("a", a);
    args.set("b", b);
    let job = jobq_core::Job::new(
        JobKind::Local,
        JobCallable::sync(|args| {
            let a = match args.keyword.get("a") {
                Some(JobValue::Int(n)) => *n,
                _ => return Err(JobError::UserCallable("missing argument a".into())),
            };
            let b = match args.keyword.get("b") {
                Some(JobValue::Int(n)) => *n,
                _ => return Err(JobError::UserCallable("missing argument b".into())),
            };
            Ok(JobValue::Int(a + b))
        }),
    )
    .with_args(args);
    engine.submit(job)
}

/// Submits a job that adds `dep`'s eventual result to `extra`, demonstrating
/// the `JobFuture`-as-argument dependency edge.
fn add_to_dependency(engine: &Engine, dep: &jobq_core::Job, extra: i64) -> jobq_core::Job {
    let mut args = JobArgs::new();
    args.set("dep", dep.future());
    args.set("extra", extra);
    let job = jobq_core::Job::new(
        JobKind::Local,
        JobCallable::sync(|args| {
            let extra = match args.keyword.get("extra") {
                Some(JobValue::Int(n)) => *n,
                _ => return Err(JobError::UserCallable("missing argument extra".into())),
            };
            let dep = match args.keyword.get("dep") {
                Some(JobValue::Int(n)) => *n,
                other => {
                    return Err(JobError::UserCallable(format!(
                        "dependency did not resolve to an int, got {other:?}"
                    )))
                }
            };
            Ok(JobValue::Int(dep + extra))
        }),
    )
    .with_args(args);
    engine.submit(job)
}

async fn run_demo(engine: &Engine) {
    let first = add_job(engine, 3, 4);
    let chained = add_to_dependency(engine, &first, 0);

    let gate_a = add_job(engine, 1, 1);
    let gate_b = add_job(engine, 2, 2);
    let gated = jobq_core::Job::new(JobKind::Local, JobCallable::sync(|_| Ok(JobValue::Str("gated ran".into()))))
        .with_condition(Condition::after_others([gate_a.id(), gate_b.id()], [jobq_core::JobStatus::Done], jobq_core::Mode::All));
    let gated = engine.submit(gated);

    match chained.result().await {
        Ok(JobValue::Int(n)) => tracing::info!(result = n, "dependency chain finished"),
        other => tracing::warn!(?other, "unexpected dependency chain result"),
    }
    match gated.result().await {
        Ok(_) => tracing::info!("all-satisfied gate fired"),
        Err(e) => tracing::warn!(error = %e, "gated job failed"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let engine = Engine::start(EngineConfig {
        max_jobs: cli.max_jobs,
        max_thread_workers: cli.max_thread_workers,
        distributed_endpoint: cli.distributed_endpoint.clone(),
        print_traceback: cli.print_traceback,
        ..EngineConfig::default()
    });

    let snapshots = if cli.snapshot {
        let settings = jobq_core::load_settings().unwrap_or_default();
        Some(Arc::new(SnapshotStore::new(settings.snapshot_dir()?)))
    } else {
        None
    };

    let mut events = engine.subscribe();
    let snapshot_engine = engine.clone();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::JobFinished { id, status }) => {
                    tracing::info!(%id, ?status, "job finished");
                    if let Some(store) = &snapshots {
                        if let Some(job) = snapshot_engine.job(id) {
                            let outcome = JobOutcome {
                                status,
                                value: job.result().await.ok(),
                                error: job.exception().await,
                            };
                            let snapshot = JobSnapshot::from_outcome(id, job.created_at(), job.attempts(), &outcome);
                            if let Err(err) = store.write(&snapshot).await {
                                tracing::warn!(%id, error = %err, "failed to persist job snapshot");
                            }
                        }
                    }
                }
                Ok(EngineEvent::JobRetrying { id, attempt }) => {
                    tracing::warn!(%id, attempt, "job retrying");
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let shutdown = Arc::new(ShutdownController::default());
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_ctrl_c_handler(shutdown.clone(), shutdown_tx);

    tokio::select! {
        _ = run_demo(&engine) => {}
        ev = shutdown_rx.recv() => match ev {
            Some(ShutdownEvent::Graceful) => {
                tracing::info!("graceful stop requested, draining in-flight jobs before exit");
            }
            Some(ShutdownEvent::Immediate) => {
                tracing::warn!("immediate stop requested, cancelling every outstanding job");
                engine.cancel_all();
            }
            None => {}
        },
    }

    tokio::time::timeout(Duration::from_secs(5), engine.join()).await.ok();
    engine.stop().await?;
    Ok(())
}
