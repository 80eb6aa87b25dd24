//! Staged, transactional evaluation of process requirements.
//!
//! [`ProcessExecutor::execute_stage`] evaluates every requirement of a stage
//! and either commits all resulting transactions or rolls all of them back.
//! [`ProcessExecutor::tick_process`] is the per-tick driver that decides which
//! stages run and what their outcomes do to the process.

use crate::config::ExecutorConfig;
use crate::handler::HandlerRegistry;
use crate::process::Process;
use crate::requirement::resolve;
use crate::transaction::{
    ClaimLedger, CommitContext, EvalContext, RequirementTransaction, Stage, StageResult,
};
use std::sync::Arc;
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Tick report
// ---------------------------------------------------------------------------

/// What happened to a process during one driver tick.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProcessOutcome {
    /// Still active; tick it again next time.
    #[default]
    Active,
    /// END committed; remove the process.
    Completed,
    /// A stage failed; remove the process.
    Failed { stage: Stage, reason: String },
}

/// Summary of one [`ProcessExecutor::tick_process`] call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TickReport {
    pub outcome: ProcessOutcome,
    /// START committed during this tick.
    pub started: bool,
    /// A TICK stage committed and progress advanced.
    pub advanced: bool,
    /// The stage that blocked, with its reason.
    pub blocked: Option<(Stage, String)>,
}

impl TickReport {
    pub fn is_terminal(&self) -> bool {
        !matches!(self.outcome, ProcessOutcome::Active)
    }
}

// ---------------------------------------------------------------------------
// ProcessExecutor
// ---------------------------------------------------------------------------

/// Evaluates process stages against a world `W` using injected handlers.
#[derive(Debug)]
pub struct ProcessExecutor<W> {
    handlers: HandlerRegistry<W>,
    config: ExecutorConfig,
}

impl<W: 'static> ProcessExecutor<W> {
    pub fn new(handlers: HandlerRegistry<W>, config: ExecutorConfig) -> Self {
        Self { handlers, config }
    }

    pub fn handlers(&self) -> &HandlerRegistry<W> {
        &self.handlers
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Evaluate one stage of `process` atomically.
    ///
    /// Requirements are visited in ascending kind order, then declaration
    /// order within a kind. Evaluation stops at the first non-success
    /// transaction. On overall success every transaction commits in
    /// acquisition order; otherwise every accumulated transaction rolls back
    /// in reverse order and rollback errors are logged and skipped.
    pub fn execute_stage(&self, stage: Stage, process: &mut Process, world: &mut W) -> StageResult {
        let recipe = Arc::clone(process.recipe());
        let mut transactions: Vec<RequirementTransaction<W>> = Vec::new();
        let mut outcome = StageResult::Success;
        let mut claims = ClaimLedger::new();

        {
            let mut ctx = EvalContext {
                world: &*world,
                process: &*process,
                claims: &mut claims,
                handlers: &self.handlers,
                stage,
            };

            'kinds: for kind in recipe.sorted_kinds() {
                for component in &recipe.requirements[kind] {
                    let transaction = self.evaluate(&mut ctx, stage, component);
                    trace!(
                        %stage,
                        recipe = %recipe.id,
                        requirement = %component.id,
                        result = ?transaction.result(),
                        "requirement evaluated"
                    );
                    let result = transaction.result().clone();
                    transactions.push(transaction);
                    if !result.is_success() {
                        outcome = result;
                        break 'kinds;
                    }
                }
            }
        }

        let mut commit_ctx = CommitContext {
            world,
            attributes: &mut process.attributes,
            state: &mut process.requirement_state,
        };
        if outcome.is_success() {
            for transaction in transactions {
                transaction.commit(&mut commit_ctx);
            }
        } else {
            for transaction in transactions.into_iter().rev() {
                if let Err(e) = transaction.rollback(&mut commit_ctx) {
                    warn!(%stage, recipe = %recipe.id, error = %e, "rollback failed");
                }
            }
        }
        outcome
    }

    fn evaluate(
        &self,
        ctx: &mut EvalContext<'_, W>,
        stage: Stage,
        component: &crate::requirement::RequirementComponent,
    ) -> RequirementTransaction<W> {
        let Some(handler) = self.handlers.get(&component.kind) else {
            return RequirementTransaction::failure(format!(
                "no handler registered for requirement kind {}",
                component.kind
            ));
        };
        let resolved = resolve(component, ctx.process);
        match stage {
            Stage::Start => handler.start(ctx, &resolved),
            Stage::Tick => handler
                .acquire_tick_transaction(ctx, &resolved)
                .unwrap_or_else(RequirementTransaction::success),
            Stage::End => handler.on_end(ctx, &resolved),
        }
    }

    /// Drive `process` through one tick.
    ///
    /// Component PRE and TICK hooks run first, then START (until it has
    /// committed once), the completion check, TICK, and the completion check
    /// again. POST hooks always run last, whatever the stages returned.
    pub fn tick_process(&self, process: &mut Process, world: &mut W) -> TickReport {
        {
            let status = process.status.clone();
            for component in process.components_mut() {
                component.on_pre_tick(&status);
                component.on_tick(&status);
            }
        }

        let report = self.drive(process, world);

        let status = process.status.clone();
        for component in process.components_mut() {
            component.on_post_tick(&status);
        }
        report
    }

    fn drive(&self, process: &mut Process, world: &mut W) -> TickReport {
        let mut report = TickReport::default();

        if !process.lifecycle.started {
            match self.execute_stage(Stage::Start, process, world) {
                StageResult::Success => {
                    process.lifecycle.started = true;
                    report.started = true;
                    debug!(recipe = %process.recipe().id, "process started");
                }
                other => return self.stop(process, Stage::Start, other, report),
            }
        }

        if process.is_complete() {
            return self.finish(process, world, report);
        }

        match self.execute_stage(Stage::Tick, process, world) {
            StageResult::Success => {
                let speed = process.speed();
                process.advance(speed, &self.config.processing_message);
                report.advanced = true;
            }
            other => return self.stop(process, Stage::Tick, other, report),
        }

        if process.is_complete() {
            return self.finish(process, world, report);
        }
        report
    }

    fn finish(&self, process: &mut Process, world: &mut W, mut report: TickReport) -> TickReport {
        match self.execute_stage(Stage::End, process, world) {
            StageResult::Success => {
                debug!(recipe = %process.recipe().id, "process completed");
                report.outcome = ProcessOutcome::Completed;
                report
            }
            other => self.stop(process, Stage::End, other, report),
        }
    }

    fn stop(
        &self,
        process: &mut Process,
        stage: Stage,
        result: StageResult,
        mut report: TickReport,
    ) -> TickReport {
        match result {
            StageResult::Success => {}
            StageResult::Blocked { reason } => {
                debug!(%stage, recipe = %process.recipe().id, %reason, "stage blocked");
                process.set_blocked(&reason);
                report.blocked = Some((stage, reason));
            }
            StageResult::Failure { reason } => {
                debug!(%stage, recipe = %process.recipe().id, %reason, "stage failed");
                process.set_error(&reason);
                report.outcome = ProcessOutcome::Failed { stage, reason };
            }
        }
        report
    }
}

// ===========================================================================
// Tests
// ===========================================================================
