//! Shared test helpers for unit tests, integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]`.

use crate::attribute::{AttributeMap, AttributeType};
use crate::config::ExecutorConfig;
use crate::executor::ProcessExecutor;
use crate::handler::{HandlerRegistry, RequirementHandler};
use crate::id::RequirementKind;
use crate::process::{Process, Recipe};
use crate::requirement::RequirementComponent;
use crate::transaction::{EvalContext, RequirementTransaction, Stage, StageResult, TransactionError};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

// ===========================================================================
// World & journal
// ===========================================================================

/// Minimal world: committed effects in order plus a free-form stock table.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TestWorld {
    pub effects: Vec<String>,
    pub stock: BTreeMap<String, i64>,
}

/// Shared, append-only log of handler activity (evaluations, commits,
/// rollbacks), in the order it happened.
#[derive(Debug, Default, Clone)]
pub struct Journal(Rc<RefCell<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    /// Entries starting with `prefix` ("eval", "commit", "rollback").
    pub fn entries_with(&self, prefix: &str) -> Vec<String> {
        self.0
            .borrow()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .cloned()
            .collect()
    }
}

// ===========================================================================
// ScriptedHandler
// ===========================================================================

type Script = Box<dyn Fn(&TestWorld, &Process) -> StageResult>;

/// A handler whose per-stage results come from closures. Every evaluation,
/// commit and rollback is written to a [`Journal`] as `"<what> <label>:<stage>"`;
/// commits also push `"<label>:<stage>"` to [`TestWorld::effects`].
pub struct ScriptedHandler {
    label: String,
    journal: Journal,
    start: Script,
    tick: Option<Script>,
    end: Script,
    failing_rollback: bool,
}

impl ScriptedHandler {
    pub fn new(label: &str, journal: &Journal) -> Self {
        Self {
            label: label.to_string(),
            journal: journal.clone(),
            start: Box::new(|_, _| StageResult::Success),
            tick: Some(Box::new(|_, _| StageResult::Success)),
            end: Box::new(|_, _| StageResult::Success),
            failing_rollback: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn start_with(mut self, f: impl Fn(&TestWorld, &Process) -> StageResult + 'static) -> Self {
        self.start = Box::new(f);
        self
    }

    pub fn tick_with(mut self, f: impl Fn(&TestWorld, &Process) -> StageResult + 'static) -> Self {
        self.tick = Some(Box::new(f));
        self
    }

    pub fn end_with(mut self, f: impl Fn(&TestWorld, &Process) -> StageResult + 'static) -> Self {
        self.end = Box::new(f);
        self
    }

    /// The handler has no per-tick work.
    pub fn without_tick(mut self) -> Self {
        self.tick = None;
        self
    }

    /// Rollback actions report an error (after journaling).
    pub fn failing_rollback(mut self) -> Self {
        self.failing_rollback = true;
        self
    }

    fn transaction(
        &self,
        ctx: &EvalContext<'_, TestWorld>,
        script: &Script,
    ) -> RequirementTransaction<TestWorld> {
        let tag = format!("{}:{}", self.label, ctx.stage);
        self.journal.record(format!("eval {tag}"));
        let result = script(ctx.world, ctx.process);

        let commit_journal = self.journal.clone();
        let commit_tag = tag.clone();
        let rollback_journal = self.journal.clone();
        let failing = self.failing_rollback;
        RequirementTransaction::<TestWorld>::from_result(result)
            .on_commit(move |ctx| {
                commit_journal.record(format!("commit {commit_tag}"));
                ctx.world.effects.push(commit_tag);
            })
            .on_rollback(move |_| {
                rollback_journal.record(format!("rollback {tag}"));
                if failing {
                    return Err(TransactionError::RollbackFailed {
                        requirement: tag,
                        reason: "scripted".to_string(),
                    });
                }
                Ok(())
            })
    }
}

impl fmt::Debug for ScriptedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedHandler")
            .field("label", &self.label)
            .field("ticks", &self.tick.is_some())
            .finish()
    }
}

impl RequirementHandler<TestWorld> for ScriptedHandler {
    fn start(
        &self,
        ctx: &mut EvalContext<'_, TestWorld>,
        _component: &RequirementComponent,
    ) -> RequirementTransaction<TestWorld> {
        self.transaction(ctx, &self.start)
    }

    fn on_end(
        &self,
        ctx: &mut EvalContext<'_, TestWorld>,
        _component: &RequirementComponent,
    ) -> RequirementTransaction<TestWorld> {
        self.transaction(ctx, &self.end)
    }

    fn acquire_tick_transaction(
        &self,
        ctx: &mut EvalContext<'_, TestWorld>,
        _component: &RequirementComponent,
    ) -> Option<RequirementTransaction<TestWorld>> {
        let script = self.tick.as_ref()?;
        Some(self.transaction(ctx, script))
    }
}

// ===========================================================================
// Builders
// ===========================================================================

/// The kind a [`ScriptedHandler`] labelled `label` is registered under.
pub fn scripted_kind(label: &str) -> RequirementKind {
    RequirementKind::new("test", label)
}

/// A requirement dispatched to the scripted handler labelled `label`.
pub fn scripted_component(label: &str) -> RequirementComponent {
    RequirementComponent::custom(label, scripted_kind(label), BTreeMap::new())
}

/// An executor with the built-in handlers plus every scripted handler under
/// its own kind.
pub fn scripted_executor(handlers: Vec<ScriptedHandler>) -> ProcessExecutor<TestWorld> {
    let mut registry = HandlerRegistry::with_builtin();
    for handler in handlers {
        let kind = scripted_kind(handler.label());
        registry
            .register(kind, handler)
            .expect("scripted handler labels must be unique");
    }
    ProcessExecutor::new(registry, ExecutorConfig::default())
}

/// A recipe with one scripted requirement per label.
pub fn scripted_recipe(id: &str, duration_ticks: i32, labels: &[&str]) -> Recipe {
    labels
        .iter()
        .fold(Recipe::new(id, duration_ticks), |recipe, label| {
            recipe.with_requirement(scripted_component(label))
        })
}

/// A baseline map with the given attribute bases.
pub fn baseline(bases: &[(AttributeType, f64)]) -> Arc<AttributeMap> {
    let map = AttributeMap::new();
    for (attribute, base) in bases {
        map.set_base(attribute, *base);
    }
    Arc::new(map)
}

/// A fresh process over `baseline` with seed 0.
pub fn process(recipe: Recipe, baseline: Arc<AttributeMap>) -> Process {
    Process::new(Arc::new(recipe), baseline, 1.0, 0)
}

/// Stage names as they appear in journal entries.
pub fn stage_tag(label: &str, stage: Stage) -> String {
    format!("{label}:{stage}")
}
