//! End-to-end scheduler behavior: submit real jobs against a real `Engine`
//! and observe their outcomes, rather than unit-testing the pieces in
//! isolation.

use std::time::Duration;

use jobq_core::{
    Condition, Engine, EngineConfig, JobArgs, JobCallable, JobError, JobKind, JobStatus, JobValue, Mode,
    RetryPolicy,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn add_job(a: i64, b: i64) -> jobq_core::Job {
    let mut args = JobArgs::new();
    args.set("a", a);
    args.set("b", b);
    jobq_core::Job::new(
        JobKind::Local,
        JobCallable::sync(|args| {
            let a = match args.keyword.get("a") {
                Some(JobValue::Int(n)) => *n,
                _ => return Err(JobError::UserCallable("missing a".into())),
            };
            let b = match args.keyword.get("b") {
                Some(JobValue::Int(n)) => *n,
                _ => return Err(JobError::UserCallable("missing b".into())),
            };
            Ok(JobValue::Int(a + b))
        }),
    )
    .with_args(args)
}

#[tokio::test]
async fn submit_and_await_result() {
    init_tracing();
    let engine = Engine::start(EngineConfig::default());
    let job = engine.submit(add_job(3, 4));
    let result = job.result().await.unwrap();
    assert!(matches!(result, JobValue::Int(7)));
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn dependency_chain_resolves_producer_value() {
    init_tracing();
    let engine = Engine::start(EngineConfig::default());

    let producer = engine.submit(add_job(3, 4));

    let mut args = JobArgs::new();
    args.set("dep", producer.future());
    let consumer = jobq_core::Job::new(
        JobKind::Local,
        JobCallable::sync(|args| match args.keyword.get("dep") {
            Some(JobValue::Int(n)) => Ok(JobValue::Int(*n)),
            other => Err(JobError::UserCallable(format!("bad dependency value: {other:?}"))),
        }),
    )
    .with_args(args);
    let consumer = engine.submit(consumer);

    let result = consumer.result().await.unwrap();
    assert!(matches!(result, JobValue::Int(7)));
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn after_timepoint_delays_dispatch() {
    init_tracing();
    let engine = Engine::start(EngineConfig {
        tick_interval: Duration::from_millis(10),
        ..EngineConfig::default()
    });

    let fire_at = chrono::Utc::now() + chrono::Duration::milliseconds(150);
    let job = jobq_core::Job::new(JobKind::Local, JobCallable::sync(|_| Ok(JobValue::Bool(true))))
        .with_condition(Condition::after_timepoint(fire_at));
    let job = engine.submit(job);

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(job.status(), JobStatus::Pending);

    let result = tokio::time::timeout(Duration::from_secs(2), job.result()).await.unwrap();
    assert!(result.is_ok());
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn all_satisfied_waits_for_every_dependency() {
    init_tracing();
    let engine = Engine::start(EngineConfig::default());

    let a = engine.submit(add_job(1, 1));
    let b = engine.submit(add_job(2, 2));

    let gated = jobq_core::Job::new(JobKind::Local, JobCallable::sync(|_| Ok(JobValue::Str("ran".into()))))
        .with_condition(Condition::after_others([a.id(), b.id()], [JobStatus::Done], Mode::All));
    let gated = engine.submit(gated);

    let result = gated.result().await.unwrap();
    assert!(matches!(result, JobValue::Str(s) if s == "ran"));
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn any_satisfied_fires_on_first_match() {
    init_tracing();
    let engine = Engine::start(EngineConfig::default());

    let slow = jobq_core::Job::new(JobKind::Local, JobCallable::sync(|_| Ok(JobValue::Null)))
        .with_condition(Condition::after_timepoint(chrono::Utc::now() + chrono::Duration::seconds(30)));
    let slow = engine.submit(slow);
    let fast = engine.submit(add_job(1, 1));

    let gated = jobq_core::Job::new(JobKind::Local, JobCallable::sync(|_| Ok(JobValue::Bool(true))))
        .with_condition(Condition::after_others([slow.id(), fast.id()], [JobStatus::Done], Mode::Any));
    let gated = engine.submit(gated);

    let result = tokio::time::timeout(Duration::from_secs(2), gated.result()).await.unwrap();
    assert!(result.is_ok());
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn single_slot_engine_serializes_jobs() {
    init_tracing();
    let engine = Engine::start(EngineConfig {
        max_jobs: 1,
        ..EngineConfig::default()
    });

    let jobs: Vec<_> = (0..5).map(|i| engine.submit(add_job(i, 1))).collect();
    for (i, job) in jobs.into_iter().enumerate() {
        let result = job.result().await.unwrap();
        assert!(matches!(result, JobValue::Int(n) if n == i as i64 + 1));
    }
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn retry_policy_recovers_from_transient_failure() {
    init_tracing();
    let engine = Engine::start(EngineConfig::default());

    let attempt = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
    let flaky_attempt = attempt.clone();
    let job = jobq_core::Job::new(
        JobKind::Local,
        JobCallable::sync(move |_| {
            let n = flaky_attempt.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n == 0 {
                Err(JobError::UserCallable("transient".into()))
            } else {
                Ok(JobValue::Int(42))
            }
        }),
    )
    .with_retry(RetryPolicy {
        max_attempts: 2,
        retry_delay: Duration::from_millis(10),
    });
    let job = engine.submit(job);

    let result = tokio::time::timeout(Duration::from_secs(2), job.result()).await.unwrap();
    assert!(matches!(result, Ok(JobValue::Int(42))));
    assert_eq!(attempt.load(std::sync::atomic::Ordering::SeqCst), 2);
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn cancel_pending_job_never_runs() {
    init_tracing();
    let engine = Engine::start(EngineConfig::default());

    let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let ran_flag = ran.clone();
    let job = jobq_core::Job::new(
        JobKind::Local,
        JobCallable::sync(move |_| {
            ran_flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(JobValue::Null)
        }),
    )
    .with_condition(Condition::after_timepoint(chrono::Utc::now() + chrono::Duration::seconds(30)));
    let job = engine.submit(job);
    job.cancel();

    let status = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let s = job.status();
            if s.is_terminal() {
                return s;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(status, JobStatus::Cancelled);
    assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn dependent_does_not_starve_its_producer_under_a_single_slot() {
    init_tracing();
    let engine = Engine::start(EngineConfig {
        max_jobs: 1,
        ..EngineConfig::default()
    });

    // Submit the producer's dependent *first*: if the scheduler dispatched it
    // on its default `Always` condition it would occupy the only slot and
    // block inside the backend forever, since the producer below would never
    // get a chance to run.
    let mut args = JobArgs::new();
    let producer = jobq_core::Job::new(JobKind::Local, JobCallable::sync(|_| Ok(JobValue::Int(5))));
    args.set("dep", producer.future());
    let consumer = jobq_core::Job::new(
        JobKind::Local,
        JobCallable::sync(|args| match args.keyword.get("dep") {
            Some(JobValue::Int(n)) => Ok(JobValue::Int(*n)),
            other => Err(JobError::UserCallable(format!("bad dependency value: {other:?}"))),
        }),
    )
    .with_args(args);
    let consumer = engine.submit(consumer);
    let producer = engine.submit(producer);

    let result = tokio::time::timeout(Duration::from_secs(2), consumer.result())
        .await
        .expect("consumer should not deadlock waiting on its producer");
    assert!(matches!(result, Ok(JobValue::Int(5))));
    assert!(matches!(producer.result().await, Ok(JobValue::Int(5))));
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn rerun_executes_a_terminal_job_again() {
    init_tracing();
    let engine = Engine::start(EngineConfig::default());

    let job = engine.submit(add_job(10, 20));
    assert!(matches!(job.result().await.unwrap(), JobValue::Int(30)));

    job.rerun().unwrap();
    let second = tokio::time::timeout(Duration::from_secs(1), job.result()).await.unwrap();
    assert!(matches!(second.unwrap(), JobValue::Int(30)));
    engine.stop().await.unwrap();
}
