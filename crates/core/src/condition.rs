//! The condition algebra: side-effect-free predicates gating `pending -> running`.
//!
//! Conditions are polled at most once per pending job per scheduler tick.
//! They must stay cheap and free of side effects — the scheduler relies on
//! that to poll without fear of reentrancy.

use crate::id::JobId;
use crate::job::JobStatus;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Read-only view of engine state a [`Condition`] may query.
///
/// Kept separate from the public `Engine` facade so conditions can be
/// evaluated from inside the scheduler task without borrowing the whole
/// engine, and so a condition can never mutate scheduling state.
pub trait EngineView: Send + Sync {
    /// Current status of a job, or `None` if no job with that id exists.
    fn job_status(&self, id: JobId) -> Option<JobStatus>;
}

/// Whether `AfterOthers` requires all or any of its referenced jobs to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    All,
    Any,
}

/// A composable predicate gating a job's transition to `running`.
#[derive(Clone)]
pub enum Condition {
    /// Always satisfied — the default condition of a freshly constructed job.
    Always,
    /// Satisfied iff the referenced job's current status is in `statuses`.
    AfterAnother(JobId, HashSet<JobStatus>),
    /// Satisfied iff, per `mode`, all/any referenced jobs are in `statuses`.
    AfterOthers(HashSet<JobId>, HashSet<JobStatus>, Mode),
    /// Satisfied iff `Utc::now() >= ts`.
    AfterTimepoint(DateTime<Utc>),
    /// Short-circuiting conjunction.
    AllSatisfied(Vec<Condition>),
    /// Short-circuiting disjunction.
    AnySatisfied(Vec<Condition>),
    /// User-defined extension point.
    Custom(Arc<dyn Fn(&dyn EngineView) -> bool + Send + Sync>),
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Always => write!(f, "Always"),
            Condition::AfterAnother(id, statuses) => {
                write!(f, "AfterAnother({id}, {statuses:?})")
            }
            Condition::AfterOthers(ids, statuses, mode) => {
                write!(f, "AfterOthers({ids:?}, {statuses:?}, {mode:?})")
            }
            Condition::AfterTimepoint(ts) => write!(f, "AfterTimepoint({ts})"),
            Condition::AllSatisfied(cs) => write!(f, "AllSatisfied({cs:?})"),
            Condition::AnySatisfied(cs) => write!(f, "AnySatisfied({cs:?})"),
            Condition::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl Condition {
    pub fn always() -> Self {
        Condition::Always
    }

    pub fn after_done(job_id: JobId) -> Self {
        Condition::AfterAnother(job_id, HashSet::from([JobStatus::Done]))
    }

    pub fn after_another(job_id: JobId, statuses: impl IntoIterator<Item = JobStatus>) -> Self {
        Condition::AfterAnother(job_id, statuses.into_iter().collect())
    }

    pub fn after_others(
        job_ids: impl IntoIterator<Item = JobId>,
        statuses: impl IntoIterator<Item = JobStatus>,
        mode: Mode,
    ) -> Self {
        Condition::AfterOthers(
            job_ids.into_iter().collect(),
            statuses.into_iter().collect(),
            mode,
        )
    }

    pub fn after_timepoint(ts: DateTime<Utc>) -> Self {
        Condition::AfterTimepoint(ts)
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&dyn EngineView) -> bool + Send + Sync + 'static,
    {
        Condition::Custom(Arc::new(f))
    }

    /// Evaluate the condition against current engine state.
    ///
    /// A panicking `Custom` condition is caught and treated as "not
    /// satisfied" this tick; callers are expected to also log the
    /// occurrence as a `ConditionError` (see `engine::EngineRuntime`).
    pub fn satisfy(&self, view: &dyn EngineView) -> bool {
        match self {
            Condition::Always => true,
            Condition::AfterAnother(id, statuses) => match view.job_status(*id) {
                Some(status) => statuses.contains(&status),
                None => statuses.contains(&JobStatus::Failed),
            },
            Condition::AfterOthers(ids, statuses, mode) => {
                let mut check = ids.iter().map(|id| match view.job_status(*id) {
                    Some(status) => statuses.contains(&status),
                    None => statuses.contains(&JobStatus::Failed),
                });
                match mode {
                    Mode::All => check.all(|ok| ok),
                    Mode::Any => check.any(|ok| ok),
                }
            }
            Condition::AfterTimepoint(ts) => Utc::now() >= *ts,
            Condition::AllSatisfied(conds) => conds.iter().all(|c| c.satisfy(view)),
            Condition::AnySatisfied(conds) => conds.iter().any(|c| c.satisfy(view)),
            Condition::Custom(f) => {
                panic::catch_unwind(AssertUnwindSafe(|| f(view))).unwrap_or(false)
            }
        }
    }

    /// Conjoin with another condition, flattening nested `AllSatisfied`.
    pub fn and(self, other: Condition) -> Condition {
        let mut parts = match self {
            Condition::AllSatisfied(cs) => cs,
            Condition::Always => Vec::new(),
            other_self => vec![other_self],
        };
        match other {
            Condition::AllSatisfied(cs) => parts.extend(cs),
            Condition::Always => {}
            other => parts.push(other),
        }
        if parts.is_empty() {
            Condition::Always
        } else if parts.len() == 1 {
            parts.into_iter().next().unwrap()
        } else {
            Condition::AllSatisfied(parts)
        }
    }

    /// Disjoin with another condition, flattening nested `AnySatisfied`.
    pub fn or(self, other: Condition) -> Condition {
        let mut parts = match self {
            Condition::AnySatisfied(cs) => cs,
            other_self => vec![other_self],
        };
        match other {
            Condition::AnySatisfied(cs) => parts.extend(cs),
            other => parts.push(other),
        }
        Condition::AnySatisfied(parts)
    }
}

impl std::ops::BitAnd for Condition {
    type Output = Condition;
    fn bitand(self, rhs: Condition) -> Condition {
        self.and(rhs)
    }
}

impl std::ops::BitOr for Condition {
    type Output = Condition;
    fn bitor(self, rhs: Condition) -> Condition {
        self.or(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeView(HashMap<JobId, JobStatus>);
    impl EngineView for FakeView {
        fn job_status(&self, id: JobId) -> Option<JobStatus> {
            self.0.get(&id).copied()
        }
    }

    fn id() -> JobId {
        JobId::new()
    }

    #[test]
    fn always_is_satisfied() {
        let view = FakeView(HashMap::new());
        assert!(Condition::always().satisfy(&view));
    }

    #[test]
    fn after_another_missing_job_is_unsatisfied_unless_failure_allowed() {
        let view = FakeView(HashMap::new());
        let missing = id();
        assert!(!Condition::after_done(missing).satisfy(&view));
        assert!(Condition::after_another(missing, [JobStatus::Failed]).satisfy(&view));
    }

    #[test]
    fn after_others_any_vs_all() {
        let a = id();
        let b = id();
        let mut statuses = HashMap::new();
        statuses.insert(a, JobStatus::Done);
        statuses.insert(b, JobStatus::Pending);
        let view = FakeView(statuses);

        let all = Condition::after_others([a, b], [JobStatus::Done], Mode::All);
        assert!(!all.satisfy(&view));

        let any = Condition::after_others([a, b], [JobStatus::Done], Mode::Any);
        assert!(any.satisfy(&view));
    }

    #[test]
    fn and_flattens_nested_all_satisfied() {
        let t1 = Condition::after_timepoint(Utc::now());
        let t2 = Condition::after_timepoint(Utc::now());
        let nested = t1 & t2;
        let combined = nested & Condition::after_done(id());
        match combined {
            Condition::AllSatisfied(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected flattened AllSatisfied, got {other:?}"),
        }
    }

    #[test]
    fn and_drops_always_operands() {
        let combined = Condition::always() & Condition::after_done(id());
        assert!(matches!(combined, Condition::AfterAnother(_, _)));
    }

    #[test]
    fn or_short_circuits_true() {
        let view = FakeView(HashMap::new());
        let combined = Condition::always() | Condition::after_done(id());
        assert!(combined.satisfy(&view));
    }

    #[test]
    fn custom_panic_is_treated_as_unsatisfied() {
        let view = FakeView(HashMap::new());
        let cond = Condition::custom(|_| panic!("boom"));
        assert!(!cond.satisfy(&view));
    }
}
