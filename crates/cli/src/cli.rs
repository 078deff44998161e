use clap::Parser;

use jobq_core::EngineConfig;

#[derive(Debug, Clone, Parser)]
#[command(name = "jobq", version, about = "Run a small demo pipeline against the job engine")]
pub struct Cli {
    /// Maximum number of jobs the engine will run concurrently.
    #[arg(long, env = "JOBQ_MAX_JOBS", default_value_t = EngineConfig::DEFAULT_MAX_JOBS)]
    pub max_jobs: usize,

    /// Size of the bounded thread-backend worker pool.
    #[arg(long, env = "JOBQ_MAX_THREAD_WORKERS", default_value_t = EngineConfig::DEFAULT_MAX_THREAD_WORKERS)]
    pub max_thread_workers: usize,

    /// Base URL of a distributed backend, if any `Distributed`-kind demo job should run.
    #[arg(long, env = "JOBQ_DISTRIBUTED_ENDPOINT")]
    pub distributed_endpoint: Option<String>,

    /// Persist a snapshot of each job's outcome under the XDG state dir.
    #[arg(long, env = "JOBQ_SNAPSHOT", default_value_t = false)]
    pub snapshot: bool,

    /// Log a failed job's error via tracing when it terminates.
    #[arg(long, env = "JOBQ_PRINT_TRACEBACK", default_value_t = EngineConfig::DEFAULT_PRINT_TRACEBACK)]
    pub print_traceback: bool,
}
