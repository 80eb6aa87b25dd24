//! The requirement transaction protocol.
//!
//! Handlers never mutate shared state while evaluating a requirement. They
//! inspect the world through an [`EvalContext`] (read-only by construction)
//! and return a [`RequirementTransaction`]: a [`StageResult`] plus deferred
//! commit and rollback actions. The executor commits every transaction of a
//! stage only when all of them succeeded, otherwise it rolls back whatever was
//! accumulated in reverse order.

use crate::handler::HandlerRegistry;
use crate::overlay::OverlayAttributeMap;
use crate::process::{Process, RequirementState};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Stage & result
// ---------------------------------------------------------------------------

/// Discrete phase of a process's per-tick evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Stage {
    Start,
    Tick,
    End,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Start => f.write_str("start"),
            Stage::Tick => f.write_str("tick"),
            Stage::End => f.write_str("end"),
        }
    }
}

/// Outcome of evaluating one requirement (or a whole stage).
///
/// `Blocked` is transient: nothing was mutated and the stage is retried next
/// tick. `Failure` is terminal: the process is abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageResult {
    Success,
    Blocked { reason: String },
    Failure { reason: String },
}

impl StageResult {
    pub fn blocked(reason: impl Into<String>) -> Self {
        StageResult::Blocked {
            reason: reason.into(),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        StageResult::Failure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageResult::Success)
    }

    /// The reason carried by a non-success result.
    pub fn reason(&self) -> Option<&str> {
        match self {
            StageResult::Success => None,
            StageResult::Blocked { reason } | StageResult::Failure { reason } => Some(reason),
        }
    }
}

/// Errors a rollback action may report. The executor logs them and carries on
/// with the remaining rollbacks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    #[error("rollback of requirement '{requirement}' failed: {reason}")]
    RollbackFailed { requirement: String, reason: String },
}

// ---------------------------------------------------------------------------
// Claim ledger
// ---------------------------------------------------------------------------

/// Scratch state shared by the requirements of one stage evaluation.
///
/// Evaluation cannot mutate the world, so two requirements drawing on the same
/// stock, or filling the same container, would both see it untouched. A
/// handler keeps a *projection* here instead: its own copy of whatever it
/// plans against, seeded from the world on first use and updated as each
/// requirement is planned. Later requirements of the stage plan against the
/// projection. Projections are keyed by type and dropped with the ledger
/// after the stage.
#[derive(Default)]
pub struct ClaimLedger {
    projections: HashMap<TypeId, Box<dyn Any>>,
}

impl ClaimLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// The projection of type `T`, created with `init` on first access.
    ///
    /// Returns `None` only if the slot for `T` holds another type, which
    /// the keying rules out.
    pub fn projection<T: Any>(&mut self, init: impl FnOnce() -> T) -> Option<&mut T> {
        self.projections
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(init()))
            .downcast_mut::<T>()
    }

    pub fn has_projection<T: Any>(&self) -> bool {
        self.projections.contains_key(&TypeId::of::<T>())
    }

    pub fn is_empty(&self) -> bool {
        self.projections.is_empty()
    }

    pub fn clear(&mut self) {
        self.projections.clear();
    }
}

impl fmt::Debug for ClaimLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimLedger")
            .field("projections", &self.projections.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Contexts
// ---------------------------------------------------------------------------

/// Read-only view handed to handlers while they evaluate a requirement.
pub struct EvalContext<'a, W> {
    pub world: &'a W,
    pub process: &'a Process,
    pub claims: &'a mut ClaimLedger,
    pub handlers: &'a HandlerRegistry<W>,
    pub stage: Stage,
}

/// Mutable state available to commit and rollback actions.
pub struct CommitContext<'a, W> {
    pub world: &'a mut W,
    pub attributes: &'a mut OverlayAttributeMap,
    /// The process's requirement state; see [`RequirementState`].
    pub state: &'a mut RequirementState,
}

// ---------------------------------------------------------------------------
// RequirementTransaction
// ---------------------------------------------------------------------------

type CommitFn<W> = Box<dyn FnOnce(&mut CommitContext<'_, W>)>;
type RollbackFn<W> = Box<dyn FnOnce(&mut CommitContext<'_, W>) -> Result<(), TransactionError>>;

/// Outcome of one acquisition attempt plus its deferred side effects.
///
/// Ephemeral: built during evaluation, consumed by exactly one of
/// [`commit`](Self::commit) or [`rollback`](Self::rollback).
pub struct RequirementTransaction<W> {
    result: StageResult,
    commit: Option<CommitFn<W>>,
    rollback: Option<RollbackFn<W>>,
}

impl<W: 'static> RequirementTransaction<W> {
    pub fn from_result(result: StageResult) -> Self {
        Self {
            result,
            commit: None,
            rollback: None,
        }
    }

    /// A successful transaction with no side effects.
    pub fn success() -> Self {
        Self::from_result(StageResult::Success)
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self::from_result(StageResult::blocked(reason))
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::from_result(StageResult::failure(reason))
    }

    /// Attach the action run when the whole stage succeeds.
    pub fn on_commit(mut self, action: impl FnOnce(&mut CommitContext<'_, W>) + 'static) -> Self {
        self.commit = Some(Box::new(action));
        self
    }

    /// Attach the action run when the stage is abandoned.
    pub fn on_rollback(
        mut self,
        action: impl FnOnce(&mut CommitContext<'_, W>) -> Result<(), TransactionError> + 'static,
    ) -> Self {
        self.rollback = Some(Box::new(action));
        self
    }

    /// Bundle several transactions behind a single result. Commits run in
    /// order; rollbacks run in reverse and every part is rolled back even if
    /// an earlier one reports an error (the first error is returned).
    pub fn composite(result: StageResult, parts: Vec<RequirementTransaction<W>>) -> Self {
        let mut commits = Vec::with_capacity(parts.len());
        let mut rollbacks = Vec::with_capacity(parts.len());
        for part in parts {
            commits.extend(part.commit);
            rollbacks.extend(part.rollback);
        }
        Self::from_result(result)
            .on_commit(move |ctx| {
                for commit in commits {
                    commit(&mut *ctx);
                }
            })
            .on_rollback(move |ctx| {
                let mut first_error = None;
                for rollback in rollbacks.into_iter().rev() {
                    if let Err(e) = rollback(&mut *ctx) {
                        first_error.get_or_insert(e);
                    }
                }
                match first_error {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            })
    }
}

impl<W> RequirementTransaction<W> {
    pub fn result(&self) -> &StageResult {
        &self.result
    }

    pub fn has_commit(&self) -> bool {
        self.commit.is_some()
    }

    pub fn has_rollback(&self) -> bool {
        self.rollback.is_some()
    }

    pub fn commit(self, ctx: &mut CommitContext<'_, W>) {
        if let Some(commit) = self.commit {
            commit(ctx);
        }
    }

    pub fn rollback(self, ctx: &mut CommitContext<'_, W>) -> Result<(), TransactionError> {
        match self.rollback {
            Some(rollback) => rollback(ctx),
            None => Ok(()),
        }
    }
}

impl<W> fmt::Debug for RequirementTransaction<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequirementTransaction")
            .field("result", &self.result)
            .field("has_commit", &self.commit.is_some())
            .field("has_rollback", &self.rollback.is_some())
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeMap;
    use std::sync::Arc;

    fn attributes() -> OverlayAttributeMap {
        OverlayAttributeMap::new(Arc::new(AttributeMap::new()), 1.0)
    }

    #[derive(Debug, Default, PartialEq)]
    struct Tally(Vec<i64>);

    #[test]
    fn result_helpers() {
        assert!(StageResult::Success.is_success());
        assert_eq!(StageResult::blocked("no power").reason(), Some("no power"));
        assert_eq!(StageResult::failure("gone").reason(), Some("gone"));
        assert_eq!(StageResult::Success.reason(), None);
    }

    #[test]
    fn commit_runs_attached_action() {
        let mut world: Vec<&'static str> = Vec::new();
        let mut attrs = attributes();
        let mut state = RequirementState::default();
        let tx = RequirementTransaction::<Vec<&'static str>>::success()
            .on_commit(|ctx| ctx.world.push("committed"));
        assert!(tx.has_commit());
        tx.commit(&mut CommitContext {
            world: &mut world,
            attributes: &mut attrs,
            state: &mut state,
        });
        assert_eq!(world, vec!["committed"]);
    }

    #[test]
    fn transaction_without_actions_is_a_no_op() {
        let mut world = 0u32;
        let mut attrs = attributes();
        let mut state = RequirementState::default();
        let mut ctx = CommitContext {
            world: &mut world,
            attributes: &mut attrs,
            state: &mut state,
        };
        RequirementTransaction::<u32>::success().commit(&mut ctx);
        assert!(RequirementTransaction::<u32>::blocked("x").rollback(&mut ctx).is_ok());
        assert_eq!(world, 0);
    }

    #[test]
    fn composite_rolls_back_in_reverse_and_keeps_going() {
        let mut world: Vec<String> = Vec::new();
        let mut attrs = attributes();
        let mut state = RequirementState::default();
        let parts = vec![
            RequirementTransaction::<Vec<String>>::success().on_rollback(|ctx| {
                ctx.world.push("undo-1".into());
                Ok(())
            }),
            RequirementTransaction::<Vec<String>>::success().on_rollback(|ctx| {
                ctx.world.push("undo-2".into());
                Err(TransactionError::RollbackFailed {
                    requirement: "two".into(),
                    reason: "boom".into(),
                })
            }),
        ];
        let tx = RequirementTransaction::composite(StageResult::blocked("later"), parts);
        assert_eq!(tx.result(), &StageResult::blocked("later"));

        let err = tx
            .rollback(&mut CommitContext {
                world: &mut world,
                attributes: &mut attrs,
                state: &mut state,
            })
            .unwrap_err();
        assert_eq!(world, vec!["undo-2".to_string(), "undo-1".to_string()]);
        assert!(err.to_string().contains("two"));
    }

    #[test]
    fn composite_commits_in_order() {
        let mut world: Vec<u8> = Vec::new();
        let mut attrs = attributes();
        let mut state = RequirementState::default();
        let parts = (1..=3u8)
            .map(|n| RequirementTransaction::<Vec<u8>>::success().on_commit(move |ctx| ctx.world.push(n)))
            .collect();
        RequirementTransaction::composite(StageResult::Success, parts).commit(&mut CommitContext {
            world: &mut world,
            attributes: &mut attrs,
            state: &mut state,
        });
        assert_eq!(world, vec![1, 2, 3]);
    }

    #[test]
    fn ledger_projections_persist_across_requirements() {
        let mut ledger = ClaimLedger::new();
        assert!(ledger.is_empty());

        ledger.projection(|| Tally(vec![10])).unwrap().0.push(-3);
        // Second access sees the first one's changes; `init` is not rerun.
        let tally = ledger.projection(|| Tally(vec![99])).unwrap();
        assert_eq!(tally, &Tally(vec![10, -3]));

        assert!(ledger.has_projection::<Tally>());
        assert!(!ledger.has_projection::<u32>());
        *ledger.projection(|| 5u32).unwrap() += 1;
        assert_eq!(ledger.projection(|| 0u32).copied(), Some(6));

        ledger.clear();
        assert!(ledger.is_empty());
        assert_eq!(ledger.projection(|| Tally(vec![1])).unwrap(), &Tally(vec![1]));
    }

    #[test]
    fn commit_context_carries_requirement_state() {
        let mut world = 0u32;
        let mut attrs = attributes();
        let mut state = RequirementState::default();
        RequirementTransaction::<u32>::success()
            .on_commit(|ctx| ctx.state.mark_fired("halfway"))
            .commit(&mut CommitContext {
                world: &mut world,
                attributes: &mut attrs,
                state: &mut state,
            });
        assert!(state.has_fired("halfway"));
    }
}
