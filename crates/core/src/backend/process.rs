//! Child-process execution for `Process`-kind jobs and `SubprocessJob`.
//!
//! A `Process`-kind job's callable does not do the work itself — it returns
//! a JSON descriptor of the command to run. The backend then spawns that
//! command in a real child process and captures its stdout, giving the job
//! actual OS-level isolation instead of just running in a worker thread.

use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;

use crate::backend::Backend;
use crate::error::{BackendError, JobError};
use crate::job::{Job, JobCallable};
use crate::value::JobValue;

#[derive(Debug, Deserialize)]
struct ProcessSpec {
    program: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    stdin: Option<String>,
}

pub(crate) struct ProcessBackend;

impl Backend for ProcessBackend {
    fn run<'a>(
        &'a self,
        job: &'a Job,
    ) -> Pin<Box<dyn Future<Output = Result<JobValue, JobError>> + Send + 'a>> {
        Box::pin(async move {
            let args = job.args();
            let descriptor = match job.callable() {
                JobCallable::Sync(f) => {
                    tokio::task::spawn_blocking(move || f(args))
                        .await
                        .map_err(|e| JobError::Backend(BackendError::Lost(e.to_string())))??
                }
                JobCallable::Async(f) => f(args).await?,
            };

            let spec: ProcessSpec = match &descriptor {
                JobValue::Json(v) => serde_json::from_value(v.clone())
                    .map_err(|e| JobError::Backend(BackendError::StartFailed(e.to_string())))?,
                other => {
                    return Err(JobError::Backend(BackendError::StartFailed(format!(
                        "process job callable must return a JSON command descriptor, got {other:?}"
                    ))))
                }
            };

            run_command(spec).await
        })
    }
}

async fn run_command(spec: ProcessSpec) -> Result<JobValue, JobError> {
    use std::process::Stdio;
    use tokio::io::AsyncWriteExt;

    let mut command = tokio::process::Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|e| JobError::Backend(BackendError::StartFailed(e.to_string())))?;

    if let Some(input) = spec.stdin {
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| JobError::Backend(BackendError::Lost(e.to_string())))?;
        }
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| JobError::Backend(BackendError::Lost(e.to_string())))?;

    if !output.status.success() {
        return Err(JobError::Backend(BackendError::Lost(format!(
            "{} exited with {}: {}",
            spec.program,
            output.status,
            String::from_utf8_lossy(&output.stderr)
        ))));
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok(match serde_json::from_str::<serde_json::Value>(&stdout) {
        Ok(v) => JobValue::Json(v),
        Err(_) => JobValue::Str(stdout),
    })
}
