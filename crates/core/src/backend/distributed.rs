//! Delegation to a remote worker pool over HTTP: dispatch a job, then poll
//! until it reports a terminal result.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::error::{BackendError, JobError};
use crate::job::{Job, JobCallable};
use crate::value::JobValue;

pub(crate) struct DistributedBackend {
    client: reqwest::Client,
    endpoint: String,
    poll_interval: Duration,
}

#[derive(Serialize)]
struct DispatchRequest<'a> {
    job_id: String,
    payload: &'a serde_json::Value,
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum DispatchResponse {
    Accepted { lease_id: String },
    Rejected { reason: String },
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum PollResponse {
    Running,
    Done { result: serde_json::Value },
    Failed { reason: String },
}

impl DistributedBackend {
    pub(crate) fn new(endpoint: String, poll_interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            poll_interval,
        }
    }

    async fn dispatch(&self, job_id: &str, payload: &serde_json::Value) -> Result<String, JobError> {
        let resp = self
            .client
            .post(format!("{}/jobs", self.endpoint))
            .json(&DispatchRequest { job_id: job_id.to_string(), payload })
            .send()
            .await
            .map_err(|e| JobError::Backend(BackendError::StartFailed(e.to_string())))?
            .json::<DispatchResponse>()
            .await
            .map_err(|e| JobError::Backend(BackendError::StartFailed(e.to_string())))?;

        match resp {
            DispatchResponse::Accepted { lease_id } => Ok(lease_id),
            DispatchResponse::Rejected { reason } => {
                Err(JobError::Backend(BackendError::StartFailed(reason)))
            }
        }
    }

    async fn poll_until_done(&self, lease_id: &str) -> Result<JobValue, JobError> {
        loop {
            let resp = self
                .client
                .get(format!("{}/jobs/{lease_id}", self.endpoint))
                .send()
                .await
                .map_err(|e| JobError::Backend(BackendError::Lost(e.to_string())))?
                .json::<PollResponse>()
                .await
                .map_err(|e| JobError::Backend(BackendError::Lost(e.to_string())))?;

            match resp {
                PollResponse::Running => tokio::time::sleep(self.poll_interval).await,
                PollResponse::Done { result } => return Ok(JobValue::Json(result)),
                PollResponse::Failed { reason } => {
                    return Err(JobError::Backend(BackendError::Lost(reason)))
                }
            }
        }
    }
}

impl Backend for DistributedBackend {
    fn run<'a>(
        &'a self,
        job: &'a Job,
    ) -> Pin<Box<dyn Future<Output = Result<JobValue, JobError>> + Send + 'a>> {
        Box::pin(async move {
            let args = job.args();
            let payload = match job.callable() {
                JobCallable::Sync(f) => {
                    tokio::task::spawn_blocking(move || f(args))
                        .await
                        .map_err(|e| JobError::Backend(BackendError::Lost(e.to_string())))??
                }
                JobCallable::Async(f) => f(args).await?,
            };
            let payload = serde_json::to_value(&payload)
                .map_err(|e| JobError::Backend(BackendError::StartFailed(e.to_string())))?;

            let lease_id = self.dispatch(&job.id().to_string(), &payload).await?;
            self.poll_until_done(&lease_id).await
        })
    }
}
