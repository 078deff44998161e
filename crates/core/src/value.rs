//! Dynamically-typed argument and result carrier.
//!
//! The source system is dynamically typed; job arguments must also survive
//! transport to the process and distributed backends. `JobValue` models
//! that as a small tagged union instead of `Box<dyn Any>`, so it stays
//! `Serialize`/`Deserialize` for the out-of-process backends.

use crate::job::JobFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single dynamically-typed job argument or result value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum JobValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    /// Not serialized across a process/distributed boundary directly; resolved
    /// to the producer's value before dispatch (see [`JobArgs::resolve`]).
    #[serde(skip)]
    Future(JobFuture),
}

impl From<i64> for JobValue {
    fn from(v: i64) -> Self {
        JobValue::Int(v)
    }
}

impl From<String> for JobValue {
    fn from(v: String) -> Self {
        JobValue::Str(v)
    }
}

impl From<&str> for JobValue {
    fn from(v: &str) -> Self {
        JobValue::Str(v.to_string())
    }
}

impl From<JobFuture> for JobValue {
    fn from(v: JobFuture) -> Self {
        JobValue::Future(v)
    }
}

/// Positional and keyword arguments passed to a job's callable.
#[derive(Debug, Clone, Default)]
pub struct JobArgs {
    pub positional: Vec<JobValue>,
    pub keyword: BTreeMap<String, JobValue>,
}

impl JobArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_positional(values: impl IntoIterator<Item = JobValue>) -> Self {
        Self {
            positional: values.into_iter().collect(),
            keyword: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<JobValue>) -> &mut Self {
        self.keyword.insert(key.into(), value.into());
        self
    }

    /// Every `JobFuture` this job's arguments depend on.
    pub(crate) fn dependencies(&self) -> impl Iterator<Item = JobFuture> + '_ {
        self.positional
            .iter()
            .chain(self.keyword.values())
            .filter_map(|v| match v {
                JobValue::Future(f) => Some(f.clone()),
                _ => None,
            })
    }
}
