use std::fmt;

use crate::domain::Ordinate;

/// Where a read wants the process advanced to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EvalTarget {
    /// The current end of the log, as the scheduler reports it.
    Latest,
    Ordinate(Ordinate),
    /// Epoch milliseconds; cron ticks up to this instant are included.
    Timestamp(i64),
}

impl EvalTarget {
    /// Whether a run to `self` also satisfies a read to `other`. Used by
    /// the single-flight table to decide between attaching and waiting.
    /// Incomparable kinds are conservatively not covered.
    pub fn covers(&self, other: &EvalTarget) -> bool {
        match (self, other) {
            (EvalTarget::Latest, _) => true,
            (EvalTarget::Ordinate(a), EvalTarget::Ordinate(b)) => a >= b,
            (EvalTarget::Timestamp(a), EvalTarget::Timestamp(b)) => a >= b,
            _ => false,
        }
    }

    pub fn ordinate(&self) -> Option<&Ordinate> {
        match self {
            EvalTarget::Ordinate(o) => Some(o),
            _ => None,
        }
    }
}

impl fmt::Display for EvalTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalTarget::Latest => f.write_str("latest"),
            EvalTarget::Ordinate(o) => write!(f, "ordinate {o}"),
            EvalTarget::Timestamp(t) => write!(f, "timestamp {t}"),
        }
    }
}
