//! Item, fluid and energy requirement handlers.
//!
//! Evaluation plans every transfer without touching the world. The first
//! requirement of a stage to need the ports seeds a projection of them in the
//! stage's [`ClaimLedger`](machina_core::transaction::ClaimLedger); each requirement then plans by extracting from
//! and inserting into that projection, so later requirements see exactly the
//! stock and capacity earlier ones left, slot by slot and tank by tank. The
//! plan is carried out in the transaction's commit action, so rollbacks have
//! nothing to undo.

use crate::port::{
    EnergyBuffer, FluidContainer, HasPorts, ItemContainer, MachinePorts, Port, PortMode,
    ResourceStore, energy_resource,
};
use machina_core::handler::{HandlerError, HandlerRegistry, RequirementHandler};
use machina_core::id::NamespacedId;
use machina_core::requirement::{
    ItemRequirement, MatcherGroup, RequirementComponent, RequirementSpec, ResourceAmount, kinds,
};
use machina_core::rng::SimRng;
use machina_core::transaction::{EvalContext, RequirementTransaction, StageResult};
use tracing::{trace, warn};

// ---------------------------------------------------------------------------
// Port families
// ---------------------------------------------------------------------------

/// Selects one group of ports out of [`MachinePorts`].
trait PortFamily: 'static {
    type Container: ResourceStore + Clone;

    const NAME: &'static str;

    fn ports(ports: &MachinePorts) -> &[Port<Self::Container>];

    fn ports_mut(ports: &mut MachinePorts) -> &mut [Port<Self::Container>];
}

struct Items;
struct Fluids;
struct Energy;

impl PortFamily for Items {
    type Container = ItemContainer;
    const NAME: &'static str = "item";

    fn ports(ports: &MachinePorts) -> &[Port<ItemContainer>] {
        &ports.items
    }

    fn ports_mut(ports: &mut MachinePorts) -> &mut [Port<ItemContainer>] {
        &mut ports.items
    }
}

impl PortFamily for Fluids {
    type Container = FluidContainer;
    const NAME: &'static str = "fluid";

    fn ports(ports: &MachinePorts) -> &[Port<FluidContainer>] {
        &ports.fluids
    }

    fn ports_mut(ports: &mut MachinePorts) -> &mut [Port<FluidContainer>] {
        &mut ports.fluids
    }
}

impl PortFamily for Energy {
    type Container = EnergyBuffer;
    const NAME: &'static str = "energy";

    fn ports(ports: &MachinePorts) -> &[Port<EnergyBuffer>] {
        &ports.energy
    }

    fn ports_mut(ports: &mut MachinePorts) -> &mut [Port<EnergyBuffer>] {
        &mut ports.energy
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Extract,
    Insert,
}

/// One planned movement of `amount` through port `port`.
#[derive(Debug, Clone)]
struct Transfer {
    direction: Direction,
    port: usize,
    resource: NamespacedId,
    amount: i64,
}

/// The stage's projected ports, copied from the world on first use.
fn projected<'c, W: HasPorts + 'static>(ctx: &'c mut EvalContext<'_, W>) -> Option<&'c mut MachinePorts> {
    let world = ctx.world;
    ctx.claims.projection(|| world.ports().clone())
}

fn lost_projection<W: 'static>(requirement: &str) -> RequirementTransaction<W> {
    RequirementTransaction::failure(format!(
        "port projection unavailable for requirement {requirement}"
    ))
}

/// Move `amount` of `resource` out of the input ports (extract) or into the
/// output ports (insert), in port order, recording each step. Returns the
/// amount left over.
fn plan<F: PortFamily>(
    ports: &mut [Port<F::Container>],
    direction: Direction,
    resource: &NamespacedId,
    amount: i64,
    transfers: &mut Vec<Transfer>,
) -> i64 {
    let mode = match direction {
        Direction::Extract => PortMode::Input,
        Direction::Insert => PortMode::Output,
    };
    let mut remaining = amount;
    for (index, port) in ports.iter_mut().enumerate() {
        if remaining <= 0 {
            break;
        }
        if port.mode != mode {
            continue;
        }
        let moved = match direction {
            Direction::Extract => port.container.extract(resource, remaining),
            Direction::Insert => port.container.insert(resource, remaining),
        };
        if moved <= 0 {
            continue;
        }
        transfers.push(Transfer {
            direction,
            port: index,
            resource: resource.clone(),
            amount: moved,
        });
        remaining -= moved;
    }
    remaining.max(0)
}

/// Plan one exchange against `projection`: extract every input, then insert
/// every output.
///
/// Missing inputs block. Outputs that do not fit block unless
/// `ignore_output_full`, in which case the excess is voided. A direction
/// with work to do but no port of the matching mode blocks as well. The
/// projection keeps the planned changes only on success.
fn plan_exchange<F: PortFamily>(
    projection: &mut MachinePorts,
    requirement: &str,
    inputs: &[ResourceAmount],
    outputs: &[ResourceAmount],
    ignore_output_full: bool,
) -> Result<Vec<Transfer>, StageResult> {
    let inputs: Vec<&ResourceAmount> = inputs.iter().filter(|a| a.amount > 0).collect();
    let outputs: Vec<&ResourceAmount> = outputs.iter().filter(|a| a.amount > 0).collect();
    if inputs.is_empty() && outputs.is_empty() {
        return Ok(Vec::new());
    }

    let has_mode = |mode: PortMode| F::ports(projection).iter().any(|p| p.mode == mode);
    if !inputs.is_empty() && !has_mode(PortMode::Input) {
        return Err(StageResult::blocked(format!(
            "no {} sources for requirement {requirement}",
            F::NAME
        )));
    }
    if !outputs.is_empty() && !has_mode(PortMode::Output) {
        return Err(StageResult::blocked(format!(
            "no {} targets for requirement {requirement}",
            F::NAME
        )));
    }

    let mut ports = F::ports(projection).to_vec();
    let mut transfers = Vec::new();
    for input in inputs {
        let missing = plan::<F>(
            &mut ports,
            Direction::Extract,
            &input.resource,
            input.amount,
            &mut transfers,
        );
        if missing > 0 {
            return Err(StageResult::blocked(format!(
                "missing {missing} {} of {} for requirement {requirement}",
                F::NAME,
                input.resource
            )));
        }
    }
    for output in outputs {
        let overflow = plan::<F>(
            &mut ports,
            Direction::Insert,
            &output.resource,
            output.amount,
            &mut transfers,
        );
        if overflow > 0 {
            if !ignore_output_full {
                return Err(StageResult::blocked(format!(
                    "no room for {overflow} {} of {} for requirement {requirement}",
                    F::NAME,
                    output.resource
                )));
            }
            trace!(requirement, resource = %output.resource, overflow, "output voided");
        }
    }

    F::ports_mut(projection).clone_from_slice(&ports);
    Ok(transfers)
}

/// A successful transaction carrying out `transfers` at commit.
fn commit_plan<F: PortFamily, W: HasPorts + 'static>(
    requirement: &str,
    transfers: Vec<Transfer>,
) -> RequirementTransaction<W> {
    if transfers.is_empty() {
        return RequirementTransaction::success();
    }
    let requirement = requirement.to_string();
    RequirementTransaction::<W>::success()
        .on_commit(move |ctx| apply::<F>(ctx.world.ports_mut(), &transfers, &requirement))
}

fn exchange<F: PortFamily, W: HasPorts + 'static>(
    ctx: &mut EvalContext<'_, W>,
    requirement: &str,
    inputs: &[ResourceAmount],
    outputs: &[ResourceAmount],
    ignore_output_full: bool,
) -> RequirementTransaction<W> {
    let Some(projection) = projected(ctx) else {
        return lost_projection(requirement);
    };
    match plan_exchange::<F>(projection, requirement, inputs, outputs, ignore_output_full) {
        Ok(transfers) => commit_plan::<F, W>(requirement, transfers),
        Err(result) => RequirementTransaction::from_result(result),
    }
}

/// Carry out a plan. Shortfalls mean the world changed between evaluation
/// and commit; they are logged and otherwise ignored.
fn apply<F: PortFamily>(ports: &mut MachinePorts, transfers: &[Transfer], requirement: &str) {
    let ports = F::ports_mut(ports);
    for transfer in transfers {
        let Some(port) = ports.get_mut(transfer.port) else {
            warn!(requirement, family = F::NAME, port = transfer.port, "port vanished before commit");
            continue;
        };
        let moved = match transfer.direction {
            Direction::Extract => port.container.extract(&transfer.resource, transfer.amount),
            Direction::Insert => port.container.insert(&transfer.resource, transfer.amount),
        };
        if moved < transfer.amount {
            warn!(
                requirement,
                family = F::NAME,
                port = %port.name,
                resource = %transfer.resource,
                planned = transfer.amount,
                moved,
                direction = ?transfer.direction,
                "commit moved less than evaluated"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Item extras
// ---------------------------------------------------------------------------

/// Requirement-state key of matcher group `index`.
pub fn group_key(requirement: &str, index: usize) -> String {
    format!("{requirement}/{index}")
}

/// The first candidate of `group` the input ports can supply on top of
/// `planned`, or the locked one if the group already settled.
fn choose_candidate(
    projection: &MachinePorts,
    planned: &[ResourceAmount],
    group: &MatcherGroup,
    locked: Option<&NamespacedId>,
) -> Option<NamespacedId> {
    if let Some(resource) = locked {
        return Some(resource.clone());
    }
    group
        .candidates
        .iter()
        .find(|candidate| {
            let available: i64 = Items::ports(projection)
                .iter()
                .filter(|p| p.mode == PortMode::Input)
                .map(|p| p.container.available(candidate))
                .sum();
            let claimed: i64 = planned
                .iter()
                .filter(|a| &a.resource == *candidate)
                .map(|a| a.amount)
                .sum();
            available - claimed >= group.amount
        })
        .cloned()
}

/// Random outputs for every parallel execution of `component`. Each round
/// draws from its own stream of the process seed, so a blocked END that is
/// retried draws the same outputs.
fn draw_random_outputs(spec: &ItemRequirement, component: &str, seed: u64, rounds: u64) -> Vec<ResourceAmount> {
    let Some(pool) = &spec.random_outputs else {
        return Vec::new();
    };
    (0..rounds)
        .flat_map(|round| {
            let mut rng = SimRng::for_stream(seed, &format!("{component}/random/{round}"));
            pool.draw(&mut rng)
        })
        .collect()
}

fn mismatched<W: 'static>(expected: &str, component: &RequirementComponent) -> RequirementTransaction<W> {
    RequirementTransaction::failure(format!(
        "requirement {} of kind {} does not carry a {expected} payload",
        component.id, component.kind
    ))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Consumes item inputs at START and produces item outputs at END.
///
/// Matcher groups are settled at START: each takes the first candidate the
/// input ports can still supply, and the choice is locked in the process's
/// requirement state under [`group_key`]. Random outputs are drawn at END
/// once per parallel execution; unless outputs may be voided, the output
/// ports must fit the pool's worst case before anything is drawn.
#[derive(Debug, Default, Clone, Copy)]
pub struct ItemHandler;

impl<W: HasPorts + 'static> RequirementHandler<W> for ItemHandler {
    fn start(
        &self,
        ctx: &mut EvalContext<'_, W>,
        component: &RequirementComponent,
    ) -> RequirementTransaction<W> {
        let RequirementSpec::Item(spec) = &component.spec else {
            return mismatched("item", component);
        };
        let process = ctx.process;
        let Some(projection) = projected(ctx) else {
            return lost_projection(&component.id);
        };

        let mut inputs = spec.inputs.clone();
        let mut locks = Vec::new();
        for (index, group) in spec.input_groups.iter().enumerate() {
            if group.amount <= 0 {
                continue;
            }
            let key = group_key(&component.id, index);
            let locked = process.requirement_state().lock(&key);
            let Some(resource) = choose_candidate(projection, &inputs, group, locked) else {
                return RequirementTransaction::blocked(format!(
                    "no candidate of item group {index} available for requirement {}",
                    component.id
                ));
            };
            inputs.push(ResourceAmount::new(resource.clone(), group.amount));
            if locked.is_none() {
                locks.push((key, resource));
            }
        }

        let transfers = match plan_exchange::<Items>(projection, &component.id, &inputs, &[], false) {
            Ok(transfers) => transfers,
            Err(result) => return RequirementTransaction::from_result(result),
        };
        let tx = commit_plan::<Items, W>(&component.id, transfers);
        if locks.is_empty() {
            return tx;
        }
        let record = RequirementTransaction::<W>::success().on_commit(move |ctx| {
            for (key, resource) in locks {
                ctx.state.set_lock(key, resource);
            }
        });
        RequirementTransaction::composite(StageResult::Success, vec![tx, record])
    }

    fn on_end(
        &self,
        ctx: &mut EvalContext<'_, W>,
        component: &RequirementComponent,
    ) -> RequirementTransaction<W> {
        let RequirementSpec::Item(spec) = &component.spec else {
            return mismatched("item", component);
        };
        let process = ctx.process;
        let Some(projection) = projected(ctx) else {
            return lost_projection(&component.id);
        };

        let rounds = process.parallelism();
        if let (Some(pool), false) = (&spec.random_outputs, spec.ignore_output_full) {
            let mut worst = spec.outputs.clone();
            worst.extend(pool.worst_case(rounds));
            let mut scratch = projection.clone();
            if let Err(result) = plan_exchange::<Items>(&mut scratch, &component.id, &[], &worst, false) {
                trace!(requirement = %component.id, "random outputs may not fit");
                return RequirementTransaction::from_result(result);
            }
        }

        let mut outputs = spec.outputs.clone();
        outputs.extend(draw_random_outputs(spec, &component.id, process.seed(), rounds));
        match plan_exchange::<Items>(projection, &component.id, &[], &outputs, spec.ignore_output_full) {
            Ok(transfers) => commit_plan::<Items, W>(&component.id, transfers),
            Err(result) => RequirementTransaction::from_result(result),
        }
    }
}

/// Like [`ItemHandler`] for fluids, plus optional per-tick streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct FluidHandler;

impl<W: HasPorts + 'static> RequirementHandler<W> for FluidHandler {
    fn start(
        &self,
        ctx: &mut EvalContext<'_, W>,
        component: &RequirementComponent,
    ) -> RequirementTransaction<W> {
        let RequirementSpec::Fluid(spec) = &component.spec else {
            return mismatched("fluid", component);
        };
        exchange::<Fluids, W>(ctx, &component.id, &spec.inputs, &[], false)
    }

    fn on_end(
        &self,
        ctx: &mut EvalContext<'_, W>,
        component: &RequirementComponent,
    ) -> RequirementTransaction<W> {
        let RequirementSpec::Fluid(spec) = &component.spec else {
            return mismatched("fluid", component);
        };
        exchange::<Fluids, W>(ctx, &component.id, &[], &spec.outputs, spec.ignore_output_full)
    }

    fn acquire_tick_transaction(
        &self,
        ctx: &mut EvalContext<'_, W>,
        component: &RequirementComponent,
    ) -> Option<RequirementTransaction<W>> {
        let RequirementSpec::Fluid(spec) = &component.spec else {
            return Some(mismatched("fluid", component));
        };
        if spec.inputs_per_tick.is_empty() && spec.outputs_per_tick.is_empty() {
            return None;
        }
        Some(exchange::<Fluids, W>(
            ctx,
            &component.id,
            &spec.inputs_per_tick,
            &spec.outputs_per_tick,
            spec.ignore_output_full,
        ))
    }
}

/// Drains or generates energy every tick.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnergyHandler;

impl<W: HasPorts + 'static> RequirementHandler<W> for EnergyHandler {
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
        let RequirementSpec::Energy(spec) = &component.spec else {
            return Some(mismatched("energy", component));
        };
        if spec.input_per_tick <= 0 && spec.output_per_tick <= 0 {
            return None;
        }
        let inputs = [ResourceAmount::new(energy_resource(), spec.input_per_tick)];
        let outputs = [ResourceAmount::new(energy_resource(), spec.output_per_tick)];
        Some(exchange::<Energy, W>(
            ctx,
            &component.id,
            &inputs,
            &outputs,
            spec.ignore_output_full,
        ))
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Register the item, fluid and energy handlers under their standard kinds.
pub fn register_resource_handlers<W: HasPorts + 'static>(
    registry: &mut HandlerRegistry<W>,
) -> Result<(), HandlerError> {
    registry.register(kinds::item(), ItemHandler)?;
    registry.register(kinds::fluid(), FluidHandler)?;
    registry.register(kinds::energy(), EnergyHandler)?;
    Ok(())
}

/// A registry with the core built-ins plus the resource handlers.
pub fn standard_handlers<W: HasPorts + 'static>() -> HandlerRegistry<W> {
    let mut registry = HandlerRegistry::with_builtin();
    // The built-ins never claim resource kinds.
    if let Err(e) = register_resource_handlers(&mut registry) {
        warn!(error = %e, "resource handler already registered");
    }
    registry
}
