//! Budgets for fixed-point iteration.
//!
//! The engine never suspends and has no cancellation mechanism; callers
//! bound divergent reductions by handing `apply_star`/`apply_star_memo` a
//! [`Limits`] value. Exceeding a budget is a typed [`Stage::Limit`] error,
//! not a panic, so tests can detect non-termination deterministically.

use crate::error::{EngineError, EngineResult, Stage};

/// Budgets applied while iterating a reduction relation to fixed point.
///
/// `None` means unbounded. The default is fully unbounded, matching the
/// behavior of a plain transitive closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Limits {
    /// Maximum number of `apply` steps across the whole iteration.
    pub max_steps: Option<usize>,
    /// Maximum number of distinct states held on the worklist plus the
    /// visited set. Only meaningful for the memoized closure.
    pub max_states: Option<usize>,
}

impl Limits {
    /// No budgets at all.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Bounds the number of reduction steps only.
    pub fn steps(max_steps: usize) -> Self {
        Self {
            max_steps: Some(max_steps),
            max_states: None,
        }
    }

    /// Errors if `steps` has exceeded the step budget.
    pub(crate) fn check_steps(&self, steps: usize) -> EngineResult<()> {
        match self.max_steps {
            Some(limit) if steps > limit => Err(EngineError::new(
                Stage::Limit,
                format!("step budget exceeded: {steps} > {limit}"),
            )),
            _ => Ok(()),
        }
    }

    /// Errors if `states` has exceeded the state budget.
    pub(crate) fn check_states(&self, states: usize) -> EngineResult<()> {
        match self.max_states {
            Some(limit) if states > limit => Err(EngineError::new(
                Stage::Limit,
                format!("state budget exceeded: {states} > {limit}"),
            )),
            _ => Ok(()),
        }
    }
}
