//! Optional per-job snapshot persistence: one JSON file per record, written
//! to a `.tmp` sibling and renamed into place so a crash mid-write never
//! leaves a corrupt snapshot behind.
//!
//! Each job gets its own file rather than one combined file — jobs
//! complete at different times and independently, so there is no single
//! "generation" to version together.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::id::JobId;
use crate::job::{JobOutcome, JobStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    pub attempts: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub stopped_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobSnapshot {
    pub fn from_outcome(id: JobId, created_at: chrono::DateTime<chrono::Utc>, attempts: u32, outcome: &JobOutcome) -> Self {
        Self {
            id,
            status: outcome.status,
            attempts,
            created_at,
            stopped_at: Some(chrono::Utc::now()),
            error: outcome.error.as_ref().map(ToString::to_string),
        }
    }
}

pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, id: JobId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub async fn write(&self, snapshot: &JobSnapshot) -> anyhow::Result<()> {
        let path = self.path_for(snapshot.id);
        let snapshot = snapshot.clone();
        tokio::task::spawn_blocking(move || write_file(&path, &snapshot))
            .await
            .map_err(|err| anyhow::anyhow!("persist job snapshot: {err:#}"))??;
        Ok(())
    }

    pub fn read(&self, id: JobId) -> anyhow::Result<Option<JobSnapshot>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub fn remove(&self, id: JobId) -> anyhow::Result<()> {
        let path = self.path_for(id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn list(&self) -> anyhow::Result<Vec<JobSnapshot>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = std::fs::read_to_string(entry.path())?;
            out.push(serde_json::from_str(&raw)?);
        }
        Ok(out)
    }
}

fn write_file(path: &Path, snapshot: &JobSnapshot) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid snapshot path: {}", path.display()))?;
    std::fs::create_dir_all(dir)?;

    let json = serde_json::to_string_pretty(snapshot)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let tmp = std::env::temp_dir().join(format!("jobq-snapshot-test-{}", uuid::Uuid::new_v4()));
        let store = SnapshotStore::new(tmp.clone());

        let outcome = JobOutcome {
            status: JobStatus::Failed,
            value: None,
            error: Some(JobError::UserCallable("boom".into())),
        };
        let id = test_job_id();
        let snapshot = JobSnapshot::from_outcome(id, chrono::Utc::now(), 2, &outcome);
        store.write(&snapshot).await.unwrap();

        let loaded = store.read(id).unwrap().expect("snapshot should exist");
        assert_eq!(loaded.status, JobStatus::Failed);
        assert_eq!(loaded.attempts, 2);

        std::fs::remove_dir_all(&tmp).ok();
    }

    fn test_job_id() -> JobId {
        JobId::new()
    }
}
