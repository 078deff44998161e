//! Convenience constructors for the extension job kinds:
//! `SubprocessJob`, `WebappJob`, `CronJob`, `SentinelJob`. Each is just a
//! `Job` built with a particular `JobKind::Extension` tag and a callable
//! shaped for that use case — there is no separate type per kind.

use crate::condition::Condition;
use crate::error::JobError;
use crate::job::{Job, JobCallable, JobKind};
use crate::value::JobValue;

/// A job that shells out to `program` with `args`, running under the
/// `Process` backend via a JSON command descriptor.
pub fn subprocess_job(program: impl Into<String>, args: Vec<String>) -> Job {
    let program = program.into();
    Job::new(
        JobKind::Process,
        JobCallable::sync(move |_args| {
            Ok(JobValue::Json(serde_json::json!({
                "program": program,
                "args": args,
            })))
        }),
    )
}

/// A job that issues a single HTTP GET to `url` and returns the response
/// body, for launching a webapp health probe or trigger endpoint.
pub fn webapp_job(url: impl Into<String>) -> Job {
    let url = url.into();
    Job::new(
        JobKind::Extension("webapp"),
        JobCallable::asynchronous(move |_args| {
            let url = url.clone();
            async move {
                let resp = reqwest::get(&url)
                    .await
                    .map_err(|e| JobError::UserCallable(e.to_string()))?;
                let body = resp
                    .text()
                    .await
                    .map_err(|e| JobError::UserCallable(e.to_string()))?;
                Ok(JobValue::Str(body))
            }
        }),
    )
}

/// A job gated on an `AfterTimepoint` condition, re-armed by the caller on
/// each firing via `rerun()` — the engine has no built-in recurrence timer,
/// so "cron" here means "one future firing at a time, resubmitted".
pub fn cron_job(callable: JobCallable, next_fire: chrono::DateTime<chrono::Utc>) -> Job {
    Job::new(JobKind::Extension("cron"), callable).with_condition(Condition::after_timepoint(next_fire))
}

/// A job whose callable polls an external predicate and only succeeds once
/// it returns `true`, retried under `retry` until it does or attempts run out.
pub fn sentinel_job<F>(predicate: F) -> Job
where
    F: FnMut() -> bool + Send + 'static,
{
    let predicate = std::sync::Mutex::new(predicate);
    Job::new(
        JobKind::Extension("sentinel"),
        JobCallable::sync(move |_args| {
            if (predicate.lock().unwrap())() {
                Ok(JobValue::Bool(true))
            } else {
                Err(JobError::UserCallable("sentinel condition not yet true".into()))
            }
        }),
    )
}
