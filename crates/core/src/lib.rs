//! A dependency-aware job scheduling engine: submit work as `Job`s, gate
//! them behind composable `Condition`s, and let the scheduler run them to
//! completion on whichever backend their `JobKind` selects.

#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

mod backend;
mod condition;
mod engine;
mod error;
mod id;
mod job;
mod kinds;
mod launcher;
mod settings;
mod snapshot;
mod store;
mod value;

pub use condition::{Condition, EngineView, Mode};
pub use engine::{Engine, EngineConfig, EngineEvent, EngineGuard};
pub use error::{BackendError, EngineError, JobError};
pub use id::JobId;
pub use job::{GeneratorStage, Job, JobCallable, JobKind, JobOutcome, JobStatus, RetryPolicy};
pub use kinds::{cron_job, sentinel_job, subprocess_job, webapp_job};
pub use launcher::{async_launcher, current_engine, launcher, subprocess_launcher, with_engine, Launcher};
pub use settings::{load_settings, save_settings, settings_path, Settings};
pub use snapshot::{JobSnapshot, SnapshotStore};
pub use value::{JobArgs, JobValue};

// JobFuture lives in `job` alongside `Job` since the two share a state cell.
pub use job::JobFuture;
