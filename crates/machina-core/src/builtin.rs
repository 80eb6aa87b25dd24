//! Requirement handlers that work for any world type.
//!
//! The attribute-level handlers never touch the world: they adjust the
//! process's own attribute overlay and requirement state, which only happens
//! in the commit action. A rolled-back stage therefore leaves the process
//! untouched and the rollback actions are empty. The checkpoint and selective
//! handlers wrap other requirements and dispatch them through the registry.

use crate::attribute::{AttributeModifier, AttributeType, AttributeView, standard};
use crate::handler::RequirementHandler;
use crate::process::Selection;
use crate::requirement::{RequirementComponent, RequirementSpec, SelectiveRequirement, resolve};
use crate::transaction::{EvalContext, RequirementTransaction, Stage, StageResult};
use tracing::{debug, trace};

fn mismatched<W: 'static>(handler: &str, component: &RequirementComponent) -> RequirementTransaction<W> {
    RequirementTransaction::failure(format!(
        "{handler} handler cannot evaluate requirement '{}' of kind {}",
        component.id, component.kind
    ))
}

// ---------------------------------------------------------------------------
// Parallelism
// ---------------------------------------------------------------------------

/// Adds an `Addition` modifier of `parallelism - 1` to the process
/// parallelism at START and removes it at END.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParallelismHandler;

impl ParallelismHandler {
    pub fn modifier_id(component_id: &str) -> String {
        format!("req:{component_id}:process_parallelism")
    }
}

impl<W: 'static> RequirementHandler<W> for ParallelismHandler {
    fn start(
        &self,
        _ctx: &mut EvalContext<'_, W>,
        component: &RequirementComponent,
    ) -> RequirementTransaction<W> {
        let RequirementSpec::Parallelism(spec) = &component.spec else {
            return mismatched("parallelism", component);
        };
        let target = spec.parallelism.max(1);
        if !spec.apply_at_start || target == 1 {
            return RequirementTransaction::success();
        }
        let id = Self::modifier_id(&component.id);
        let amount = (target - 1) as f64;
        let provenance = component.id.clone();
        RequirementTransaction::<W>::success().on_commit(move |ctx| {
            let instance = ctx
                .attributes
                .get_or_create_attribute(&standard::process_parallelism(), 1.0);
            if !instance.has_modifier(&id) {
                instance.add_modifier(
                    AttributeModifier::addition(id, amount)
                        .with_provenance(provenance),
                );
            }
        })
    }

    fn on_end(
        &self,
        _ctx: &mut EvalContext<'_, W>,
        component: &RequirementComponent,
    ) -> RequirementTransaction<W> {
        let RequirementSpec::Parallelism(spec) = &component.spec else {
            return mismatched("parallelism", component);
        };
        if !spec.remove_at_end {
            return RequirementTransaction::success();
        }
        let id = Self::modifier_id(&component.id);
        RequirementTransaction::<W>::success().on_commit(move |ctx| {
            if let Some(instance) = ctx.attributes.get_attribute(&standard::process_parallelism()) {
                instance.remove_modifier(&id);
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Attribute modifier
// ---------------------------------------------------------------------------

/// Applies a modifier to an arbitrary process attribute at START and removes
/// it at END. The applied modifier's id is
/// `req:<component id>:<attribute namespace>:<attribute path>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttributeModifierHandler;

impl AttributeModifierHandler {
    pub fn modifier_id(component_id: &str, attribute: &AttributeType) -> String {
        format!(
            "req:{component_id}:{}:{}",
            attribute.id().namespace(),
            attribute.id().path()
        )
    }
}

impl<W: 'static> RequirementHandler<W> for AttributeModifierHandler {
    fn start(
        &self,
        ctx: &mut EvalContext<'_, W>,
        component: &RequirementComponent,
    ) -> RequirementTransaction<W> {
        let RequirementSpec::AttributeModifier(spec) = &component.spec else {
            return mismatched("attribute modifier", component);
        };
        if !spec.apply_at_start {
            return RequirementTransaction::success();
        }
        let attribute = spec.attribute.clone();
        let modifier = AttributeModifier {
            id: Self::modifier_id(&component.id, &attribute),
            provenance: Some(component.id.clone()),
            ..spec.modifier.clone()
        };
        let default_base = ctx.process.attributes().default_base();
        RequirementTransaction::<W>::success().on_commit(move |ctx| {
            let instance = ctx.attributes.get_or_create_attribute(&attribute, default_base);
            if !instance.has_modifier(&modifier.id) {
                instance.add_modifier(modifier);
            }
        })
    }

    fn on_end(
        &self,
        _ctx: &mut EvalContext<'_, W>,
        component: &RequirementComponent,
    ) -> RequirementTransaction<W> {
        let RequirementSpec::AttributeModifier(spec) = &component.spec else {
            return mismatched("attribute modifier", component);
        };
        if !spec.remove_at_end {
            return RequirementTransaction::success();
        }
        let attribute = spec.attribute.clone();
        let id = Self::modifier_id(&component.id, &attribute);
        RequirementTransaction::<W>::success().on_commit(move |ctx| {
            if let Some(instance) = ctx.attributes.get_attribute(&attribute) {
                instance.remove_modifier(&id);
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Runs the wrapped requirement's START, TICK and END on the tick where
/// `floor(progress) == time`, as a single composite transaction.
///
/// Fires at most once per process: the commit marks the checkpoint in the
/// process's requirement state, so speeds below 1 that keep the floored
/// progress at `time` for several ticks do not repeat it. A speed above 1
/// can step over `time` entirely, in which case the checkpoint never fires.
#[derive(Debug, Default, Clone, Copy)]
pub struct CheckpointHandler;

impl<W: 'static> RequirementHandler<W> for CheckpointHandler {
    fn start(
        &self,
        _ctx: &mut EvalContext<'_, W>,
        _component: &RequirementComponent,
    ) -> RequirementTransaction<W> {
        RequirementTransaction::success()
    }

    fn on_end(
        &self,
        _ctx: &mut EvalContext<'_, W>,
        _component: &RequirementComponent,
    ) -> RequirementTransaction<W> {
        RequirementTransaction::success()
    }

    fn acquire_tick_transaction(
        &self,
        ctx: &mut EvalContext<'_, W>,
        component: &RequirementComponent,
    ) -> Option<RequirementTransaction<W>> {
        let RequirementSpec::Checkpoint(spec) = &component.spec else {
            return Some(mismatched("checkpoint", component));
        };
        if ctx.process.requirement_state().has_fired(&component.id) {
            return None;
        }
        let current = ctx.process.status().progress.floor();
        if current < 0.0 || current as u32 != spec.time {
            return None;
        }
        trace!(checkpoint = %component.id, time = spec.time, "checkpoint reached");
        let lifecycle = run_full_lifecycle(ctx, &spec.requirement);
        if !lifecycle.result().is_success() {
            return Some(lifecycle);
        }
        let id = component.id.clone();
        let mark = RequirementTransaction::<W>::success().on_commit(move |ctx| ctx.state.mark_fired(id));
        Some(RequirementTransaction::composite(
            StageResult::Success,
            vec![lifecycle, mark],
        ))
    }
}

fn no_handler<W: 'static>(component: &RequirementComponent) -> RequirementTransaction<W> {
    RequirementTransaction::failure(format!(
        "no handler registered for requirement kind {}",
        component.kind
    ))
}

fn run_full_lifecycle<W: 'static>(
    ctx: &mut EvalContext<'_, W>,
    inner: &RequirementComponent,
) -> RequirementTransaction<W> {
    let handlers = ctx.handlers;
    let Some(handler) = handlers.get(&inner.kind) else {
        return no_handler(inner);
    };
    let resolved = resolve(inner, ctx.process);

    let mut parts = Vec::with_capacity(3);
    let start = handler.start(ctx, &resolved);
    if !start.result().is_success() {
        let result = start.result().clone();
        parts.push(start);
        return RequirementTransaction::composite(result, parts);
    }
    parts.push(start);

    if let Some(tick) = handler.acquire_tick_transaction(ctx, &resolved) {
        if !tick.result().is_success() {
            let result = tick.result().clone();
            parts.push(tick);
            return RequirementTransaction::composite(result, parts);
        }
        parts.push(tick);
    }

    let end = handler.on_end(ctx, &resolved);
    let result = end.result().clone();
    parts.push(end);
    RequirementTransaction::composite(result, parts)
}

// ---------------------------------------------------------------------------
// Selective
// ---------------------------------------------------------------------------

/// Tries the candidates in declaration order at START and keeps the first
/// whose START succeeds. Blocked and failed candidates are skipped; their
/// transactions carry no side effects and are dropped. The choice, or
/// [`Selection::Disabled`] when nothing acquired, is written to the process's
/// requirement state by the commit action together with the wrapper's
/// modifiers. TICK and END then dispatch only to the chosen candidate, and
/// END removes the modifiers again.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelectiveHandler;

impl SelectiveHandler {
    /// Id of the `index`-th wrapper modifier once applied.
    pub fn modifier_id(component_id: &str, index: usize) -> String {
        format!("req:{component_id}:selective:{index}")
    }

    fn modifiers(component_id: &str, spec: &SelectiveRequirement) -> Vec<(AttributeType, AttributeModifier)> {
        spec.modifiers
            .iter()
            .enumerate()
            .map(|(index, m)| {
                let modifier = AttributeModifier {
                    id: Self::modifier_id(component_id, index),
                    provenance: Some(component_id.to_string()),
                    ..m.modifier.clone()
                };
                (m.attribute.clone(), modifier)
            })
            .collect()
    }

    fn chosen<'s, W>(
        ctx: &EvalContext<'_, W>,
        component: &RequirementComponent,
        spec: &'s SelectiveRequirement,
    ) -> Result<Option<&'s RequirementComponent>, String> {
        match ctx.process.requirement_state().selection(&component.id) {
            Some(Selection::Chosen(index)) => spec.candidates.get(index).map(Some).ok_or_else(|| {
                format!(
                    "selective requirement '{}' chose candidate {index}, which no longer exists",
                    component.id
                )
            }),
            Some(Selection::Disabled) | None => Ok(None),
        }
    }
}

/// Evaluate `candidate` for `stage` through the registry.
fn dispatch<W: 'static>(
    ctx: &mut EvalContext<'_, W>,
    candidate: &RequirementComponent,
    stage: Stage,
) -> Option<RequirementTransaction<W>> {
    let handlers = ctx.handlers;
    let Some(handler) = handlers.get(&candidate.kind) else {
        return Some(no_handler(candidate));
    };
    let resolved = resolve(candidate, ctx.process);
    match stage {
        Stage::Start => Some(handler.start(ctx, &resolved)),
        Stage::Tick => handler.acquire_tick_transaction(ctx, &resolved),
        Stage::End => Some(handler.on_end(ctx, &resolved)),
    }
}

impl<W: 'static> RequirementHandler<W> for SelectiveHandler {
    fn start(
        &self,
        ctx: &mut EvalContext<'_, W>,
        component: &RequirementComponent,
    ) -> RequirementTransaction<W> {
        let RequirementSpec::Selective(spec) = &component.spec else {
            return mismatched("selective", component);
        };
        for (index, candidate) in spec.candidates.iter().enumerate() {
            let Some(tx) = dispatch(ctx, candidate, Stage::Start) else {
                continue;
            };
            if !tx.result().is_success() {
                trace!(
                    requirement = %component.id,
                    candidate = %candidate.id,
                    result = ?tx.result(),
                    "selective candidate skipped"
                );
                continue;
            }
            trace!(requirement = %component.id, candidate = %candidate.id, "selective candidate chosen");
            let id = component.id.clone();
            let modifiers = Self::modifiers(&component.id, spec);
            let default_base = ctx.process.attributes().default_base();
            let record = RequirementTransaction::<W>::success().on_commit(move |ctx| {
                ctx.state.select(id, Selection::Chosen(index));
                for (attribute, modifier) in modifiers {
                    let instance = ctx.attributes.get_or_create_attribute(&attribute, default_base);
                    if !instance.has_modifier(&modifier.id) {
                        instance.add_modifier(modifier);
                    }
                }
            });
            return RequirementTransaction::composite(StageResult::Success, vec![tx, record]);
        }

        debug!(requirement = %component.id, "no selective candidate acquired, requirement disabled");
        let id = component.id.clone();
        RequirementTransaction::<W>::success().on_commit(move |ctx| ctx.state.select(id, Selection::Disabled))
    }

    fn acquire_tick_transaction(
        &self,
        ctx: &mut EvalContext<'_, W>,
        component: &RequirementComponent,
    ) -> Option<RequirementTransaction<W>> {
        let RequirementSpec::Selective(spec) = &component.spec else {
            return Some(mismatched("selective", component));
        };
        match Self::chosen(ctx, component, spec) {
            Ok(Some(candidate)) => dispatch(ctx, candidate, Stage::Tick),
            Ok(None) => None,
            Err(reason) => Some(RequirementTransaction::failure(reason)),
        }
    }

    fn on_end(
        &self,
        ctx: &mut EvalContext<'_, W>,
        component: &RequirementComponent,
    ) -> RequirementTransaction<W> {
        let RequirementSpec::Selective(spec) = &component.spec else {
            return mismatched("selective", component);
        };
        let candidate = match Self::chosen(ctx, component, spec) {
            Ok(Some(candidate)) => candidate,
            Ok(None) => return RequirementTransaction::success(),
            Err(reason) => return RequirementTransaction::failure(reason),
        };
        let end = dispatch(ctx, candidate, Stage::End).unwrap_or_else(RequirementTransaction::success);
        if !end.result().is_success() {
            return end;
        }
        let applied: Vec<(AttributeType, String)> = Self::modifiers(&component.id, spec)
            .into_iter()
            .map(|(attribute, modifier)| (attribute, modifier.id))
            .collect();
        let cleanup = RequirementTransaction::<W>::success().on_commit(move |ctx| {
            for (attribute, id) in applied {
                if let Some(instance) = ctx.attributes.get_attribute(&attribute) {
                    instance.remove_modifier(&id);
                }
            }
        });
        RequirementTransaction::composite(StageResult::Success, vec![end, cleanup])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeMap;
    use crate::handler::HandlerRegistry;
    use crate::id::RequirementKind;
    use crate::process::{Process, Recipe};
    use crate::transaction::{ClaimLedger, CommitContext};
    use std::sync::Arc;

    fn process() -> Process {
        Process::new(
            Arc::new(Recipe::new("test:r", 10)),
            Arc::new(AttributeMap::new()),
            1.0,
            0,
        )
    }

    fn evaluate<R, F>(process: &Process, registry: &HandlerRegistry<()>, f: F) -> R
    where
        F: FnOnce(&mut EvalContext<'_, ()>) -> R,
    {
        let mut claims = ClaimLedger::new();
        let mut ctx = EvalContext {
            world: &(),
            process,
            claims: &mut claims,
            handlers: registry,
            stage: Stage::Start,
        };
        f(&mut ctx)
    }

    fn commit(process: &mut Process, tx: RequirementTransaction<()>) {
        let mut world = ();
        tx.commit(&mut CommitContext {
            world: &mut world,
            attributes: &mut process.attributes,
            state: &mut process.requirement_state,
        });
    }

    #[test]
    fn parallelism_applies_only_on_commit() {
        let registry = HandlerRegistry::with_builtin();
        let mut p = process();
        let component = RequirementComponent::parallelism("boost", 4);

        let tx = evaluate(&p, &registry, |ctx| ParallelismHandler.start(ctx, &component));
        assert!(tx.result().is_success());
        assert_eq!(p.parallelism(), 1);

        commit(&mut p, tx);
        assert_eq!(p.parallelism(), 4);
        let modifier = p
            .attributes
            .get_attribute(&standard::process_parallelism())
            .and_then(|i| i.modifier("req:boost:process_parallelism"))
            .unwrap();
        assert_eq!(modifier.amount, 3.0);

        let tx = evaluate(&p, &registry, |ctx| ParallelismHandler.on_end(ctx, &component));
        commit(&mut p, tx);
        assert_eq!(p.parallelism(), 1);
    }

    #[test]
    fn parallelism_of_one_is_a_no_op() {
        let registry = HandlerRegistry::with_builtin();
        let p = process();
        let component = RequirementComponent::parallelism("one", 1);
        let tx = evaluate(&p, &registry, |ctx| ParallelismHandler.start(ctx, &component));
        assert!(!tx.has_commit());
    }

    #[test]
    fn attribute_modifier_uses_namespaced_id() {
        let registry = HandlerRegistry::with_builtin();
        let mut p = process();
        let speed = standard::process_speed();
        let component = RequirementComponent::attribute_modifier(
            "overclock",
            speed.clone(),
            AttributeModifier::multiply_total("ignored", 1.0),
        );

        let tx = evaluate(&p, &registry, |ctx| AttributeModifierHandler.start(ctx, &component));
        commit(&mut p, tx);
        assert_eq!(p.speed(), 2.0);
        let id = AttributeModifierHandler::modifier_id("overclock", &speed);
        assert_eq!(id, "req:overclock:machina:process_speed");
        assert!(p.attributes.get_attribute(&speed).unwrap().has_modifier(&id));

        let tx = evaluate(&p, &registry, |ctx| AttributeModifierHandler.on_end(ctx, &component));
        commit(&mut p, tx);
        assert_eq!(p.speed(), 1.0);
    }

    #[test]
    fn mismatched_payload_fails() {
        let registry = HandlerRegistry::with_builtin();
        let p = process();
        let component = RequirementComponent::custom(
            "x",
            crate::requirement::kinds::parallelism(),
            Default::default(),
        );
        let tx = evaluate(&p, &registry, |ctx| ParallelismHandler.start(ctx, &component));
        assert!(matches!(tx.result(), StageResult::Failure { .. }));
    }

    #[test]
    fn checkpoint_fires_only_at_its_time() {
        let registry = HandlerRegistry::with_builtin();
        let mut p = process();
        let attribute = AttributeType::new("test", "heat");
        let inner = RequirementComponent::attribute_modifier(
            "heat",
            attribute.clone(),
            AttributeModifier::addition("x", 5.0),
        );
        let checkpoint = RequirementComponent::checkpoint("cp", 3, inner);

        let tx = evaluate(&p, &registry, |ctx| {
            CheckpointHandler
                .acquire_tick_transaction(ctx, &checkpoint)
                .unwrap_or_else(RequirementTransaction::success)
        });
        assert!(!tx.has_commit());

        p.status.progress = 3.5;
        let tx = evaluate(&p, &registry, |ctx| {
            CheckpointHandler.acquire_tick_transaction(ctx, &checkpoint).unwrap()
        });
        assert!(tx.result().is_success());
        commit(&mut p, tx);
        // START added the modifier and END removed it again within one commit.
        assert_eq!(p.attribute_value(&attribute, 0.0), 1.0);
        assert!(p.requirement_state().has_fired("cp"));

        // Still floor(progress) == 3 at a fractional speed: no second run.
        p.status.progress = 3.9;
        let again = evaluate(&p, &registry, |ctx| CheckpointHandler.acquire_tick_transaction(ctx, &checkpoint));
        assert!(again.is_none());
    }

    #[test]
    fn blocked_checkpoint_is_not_marked() {
        let registry = HandlerRegistry::with_builtin()
            .with(RequirementKind::new("test", "closed"), Gate(false))
            .unwrap();
        let mut p = process();
        p.status.progress = 1.0;
        let checkpoint = RequirementComponent::checkpoint("cp", 1, gate("g", "closed"));
        let tx = evaluate(&p, &registry, |ctx| {
            CheckpointHandler.acquire_tick_transaction(ctx, &checkpoint).unwrap()
        });
        assert_eq!(tx.result(), &StageResult::blocked("gate closed"));
        assert!(!p.requirement_state().has_fired("cp"));
    }

    // -- Selective ------------------------------------------------------------

    /// Succeeds when open, blocks when closed, at every stage.
    #[derive(Debug)]
    struct Gate(bool);

    impl Gate {
        fn result(&self) -> RequirementTransaction<()> {
            if self.0 {
                RequirementTransaction::success()
            } else {
                RequirementTransaction::blocked("gate closed")
            }
        }
    }

    impl RequirementHandler<()> for Gate {
        fn start(&self, _ctx: &mut EvalContext<'_, ()>, _c: &RequirementComponent) -> RequirementTransaction<()> {
            self.result()
        }

        fn on_end(&self, _ctx: &mut EvalContext<'_, ()>, _c: &RequirementComponent) -> RequirementTransaction<()> {
            self.result()
        }

        fn acquire_tick_transaction(
            &self,
            _ctx: &mut EvalContext<'_, ()>,
            _c: &RequirementComponent,
        ) -> Option<RequirementTransaction<()>> {
            Some(self.result())
        }
    }

    fn gate(id: &str, path: &str) -> RequirementComponent {
        RequirementComponent::custom(id, RequirementKind::new("test", path), Default::default())
    }

    fn gated_registry() -> HandlerRegistry<()> {
        HandlerRegistry::with_builtin()
            .with(RequirementKind::new("test", "open"), Gate(true))
            .unwrap()
            .with(RequirementKind::new("test", "closed"), Gate(false))
            .unwrap()
    }

    fn heat() -> AttributeType {
        AttributeType::new("test", "heat")
    }

    fn fuel_selection() -> RequirementComponent {
        let mut component = RequirementComponent::selective(
            "fuel",
            vec![
                gate("coal", "closed"),
                gate("mystery", "unregistered"),
                RequirementComponent::attribute_modifier(
                    "lava",
                    heat(),
                    AttributeModifier::addition("x", 4.0),
                ),
                gate("wood", "open"),
            ],
        );
        if let RequirementSpec::Selective(spec) = &mut component.spec {
            spec.modifiers.push(crate::requirement::SelectiveModifier {
                attribute: standard::process_speed(),
                modifier: AttributeModifier::multiply_total("ignored", 0.5),
            });
        }
        component
    }

    #[test]
    fn selective_keeps_first_candidate_that_acquires() {
        let registry = gated_registry();
        let mut p = process();
        let component = fuel_selection();

        let tx = evaluate(&p, &registry, |ctx| SelectiveHandler.start(ctx, &component));
        assert!(tx.result().is_success());
        // Nothing recorded or applied before commit.
        assert_eq!(p.requirement_state().selection("fuel"), None);
        assert_eq!(p.attribute_value(&heat(), 1.0), 1.0);

        commit(&mut p, tx);
        assert_eq!(p.requirement_state().selection("fuel"), Some(Selection::Chosen(2)));
        assert_eq!(p.attribute_value(&heat(), 1.0), 5.0);
        assert_eq!(p.speed(), 1.5);
        let id = SelectiveHandler::modifier_id("fuel", 0);
        assert_eq!(id, "req:fuel:selective:0");
        assert!(p.attributes.get_attribute(&standard::process_speed()).unwrap().has_modifier(&id));

        // The attribute-modifier candidate has no per-tick work.
        let tick = evaluate(&p, &registry, |ctx| SelectiveHandler.acquire_tick_transaction(ctx, &component));
        assert!(tick.is_none());

        let tx = evaluate(&p, &registry, |ctx| SelectiveHandler.on_end(ctx, &component));
        assert!(tx.result().is_success());
        commit(&mut p, tx);
        assert_eq!(p.attribute_value(&heat(), 1.0), 1.0);
        assert_eq!(p.speed(), 1.0);
    }

    #[test]
    fn selective_without_acquirable_candidate_is_disabled() {
        let registry = gated_registry();
        let mut p = process();
        let component = RequirementComponent::selective(
            "coolant",
            vec![gate("ice", "closed"), gate("snow", "closed")],
        );

        let tx = evaluate(&p, &registry, |ctx| SelectiveHandler.start(ctx, &component));
        assert!(tx.result().is_success());
        commit(&mut p, tx);
        assert_eq!(p.requirement_state().selection("coolant"), Some(Selection::Disabled));

        let tick = evaluate(&p, &registry, |ctx| SelectiveHandler.acquire_tick_transaction(ctx, &component));
        assert!(tick.is_none());
        let end = evaluate(&p, &registry, |ctx| SelectiveHandler.on_end(ctx, &component));
        assert!(end.result().is_success());
        assert!(!end.has_commit());
    }

    #[test]
    fn selective_tick_runs_only_the_chosen_candidate() {
        let registry = gated_registry();
        let mut p = process();
        let component = RequirementComponent::selective(
            "fuel",
            vec![gate("coal", "closed"), gate("wood", "open")],
        );

        p.requirement_state.select("fuel", Selection::Chosen(1));
        let tick = evaluate(&p, &registry, |ctx| SelectiveHandler.acquire_tick_transaction(ctx, &component));
        assert_eq!(tick.unwrap().result(), &StageResult::Success);

        p.requirement_state.select("fuel", Selection::Chosen(0));
        let tick = evaluate(&p, &registry, |ctx| SelectiveHandler.acquire_tick_transaction(ctx, &component));
        assert_eq!(tick.unwrap().result(), &StageResult::blocked("gate closed"));

        p.requirement_state.select("fuel", Selection::Chosen(7));
        let end = evaluate(&p, &registry, |ctx| SelectiveHandler.on_end(ctx, &component));
        assert!(matches!(end.result(), StageResult::Failure { .. }));
    }

    #[test]
    fn checkpoint_without_inner_handler_fails() {
        let registry = HandlerRegistry::with_builtin();
        let mut p = process();
        p.status.progress = 2.0;
        let inner = RequirementComponent::custom(
            "mystery",
            crate::id::RequirementKind::new("test", "unknown"),
            Default::default(),
        );
        let checkpoint = RequirementComponent::checkpoint("cp", 2, inner);
        let tx = evaluate(&p, &registry, |ctx| {
            CheckpointHandler.acquire_tick_transaction(ctx, &checkpoint).unwrap()
        });
        assert_eq!(
            tx.result().reason(),
            Some("no handler registered for requirement kind test:unknown")
        );
    }
}
