//! Requirement declarations attached to recipes.
//!
//! A [`RequirementComponent`] is immutable recipe data. Before dispatch the
//! executor resolves it against the process ([`resolve`]), which substitutes a
//! copy with resource amounts multiplied by the process parallelism.

use crate::attribute::{AttributeModifier, AttributeType};
use crate::id::{NamespacedId, RequirementKind};
use crate::process::Process;
use crate::rng::SimRng;
use crate::scaling::scale_count;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Kinds of the requirements shipped with the engine.
pub mod kinds {
    use crate::id::RequirementKind;

    pub const NAMESPACE: &str = "machina";

    pub fn item() -> RequirementKind {
        RequirementKind::new(NAMESPACE, "item")
    }

    pub fn fluid() -> RequirementKind {
        RequirementKind::new(NAMESPACE, "fluid")
    }

    pub fn energy() -> RequirementKind {
        RequirementKind::new(NAMESPACE, "energy")
    }

    pub fn parallelism() -> RequirementKind {
        RequirementKind::new(NAMESPACE, "parallelism")
    }

    pub fn attribute_modifier() -> RequirementKind {
        RequirementKind::new(NAMESPACE, "attribute_modifier")
    }

    pub fn checkpoint() -> RequirementKind {
        RequirementKind::new(NAMESPACE, "checkpoint")
    }

    pub fn selective() -> RequirementKind {
        RequirementKind::new(NAMESPACE, "selective")
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A counted amount of a resource (item id, fluid id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAmount {
    pub resource: NamespacedId,
    pub amount: i64,
}

impl ResourceAmount {
    pub fn new(resource: NamespacedId, amount: i64) -> Self {
        Self { resource, amount }
    }

    fn scaled(&self, k: u64) -> Self {
        Self {
            resource: self.resource.clone(),
            amount: scale_count(self.amount, k),
        }
    }
}

fn scale_all(amounts: &[ResourceAmount], k: u64) -> Vec<ResourceAmount> {
    amounts.iter().map(|a| a.scaled(k)).collect()
}

fn yes() -> bool {
    true
}

/// An input any one of several resources can satisfy. The first candidate
/// fully available wins and stays locked for the rest of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatcherGroup {
    pub candidates: Vec<NamespacedId>,
    pub amount: i64,
}

impl MatcherGroup {
    fn scaled(&self, k: u64) -> Self {
        Self {
            candidates: self.candidates.clone(),
            amount: scale_count(self.amount, k),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedOutput {
    pub resource: NamespacedId,
    pub amount: i64,
    pub weight: u32,
}

/// Outputs drawn at END: `picks` distinct candidates, weighted, once per
/// parallel execution. The pool must have room for the worst case (the
/// `picks` largest amounts) before anything is drawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomOutputs {
    pub candidates: Vec<WeightedOutput>,
    pub picks: u32,
}

impl RandomOutputs {
    fn drawable(&self) -> impl Iterator<Item = &WeightedOutput> {
        self.candidates.iter().filter(|c| c.weight > 0 && c.amount > 0)
    }

    /// The largest output `rounds` draws could produce: the `picks` biggest
    /// amounts, each repeated `rounds` times.
    pub fn worst_case(&self, rounds: u64) -> Vec<ResourceAmount> {
        let mut largest: Vec<&WeightedOutput> = self.drawable().collect();
        largest.sort_by(|a, b| b.amount.cmp(&a.amount));
        largest
            .into_iter()
            .take(self.picks as usize)
            .map(|c| ResourceAmount::new(c.resource.clone(), scale_count(c.amount, rounds)))
            .collect()
    }

    /// One draw of `picks` distinct candidates.
    pub fn draw(&self, rng: &mut SimRng) -> Vec<ResourceAmount> {
        let weights: Vec<u32> = self
            .candidates
            .iter()
            .map(|c| if c.amount > 0 { c.weight } else { 0 })
            .collect();
        rng.weighted_distinct(&weights, self.picks as usize)
            .into_iter()
            .map(|i| ResourceAmount::new(self.candidates[i].resource.clone(), self.candidates[i].amount))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ItemRequirement {
    #[serde(default)]
    pub inputs: Vec<ResourceAmount>,
    #[serde(default)]
    pub outputs: Vec<ResourceAmount>,
    #[serde(default)]
    pub input_groups: Vec<MatcherGroup>,
    #[serde(default)]
    pub random_outputs: Option<RandomOutputs>,
    /// Complete even when the outputs do not fit; the excess is voided.
    #[serde(default)]
    pub ignore_output_full: bool,
}

/// Fluids are consumed at start / produced at end, and optionally streamed
/// every tick.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FluidRequirement {
    #[serde(default)]
    pub inputs: Vec<ResourceAmount>,
    #[serde(default)]
    pub outputs: Vec<ResourceAmount>,
    #[serde(default)]
    pub inputs_per_tick: Vec<ResourceAmount>,
    #[serde(default)]
    pub outputs_per_tick: Vec<ResourceAmount>,
    #[serde(default)]
    pub ignore_output_full: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnergyRequirement {
    #[serde(default)]
    pub input_per_tick: i64,
    #[serde(default)]
    pub output_per_tick: i64,
    #[serde(default)]
    pub ignore_output_full: bool,
}

/// Raises the process parallelism to `parallelism` while the process runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelismRequirement {
    pub parallelism: u64,
    #[serde(default = "yes")]
    pub apply_at_start: bool,
    #[serde(default = "yes")]
    pub remove_at_end: bool,
}

/// Applies `modifier` to the process's `attribute`. The modifier id is
/// replaced with one derived from the component id when applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeModifierRequirement {
    pub attribute: AttributeType,
    pub modifier: AttributeModifier,
    #[serde(default = "yes")]
    pub apply_at_start: bool,
    #[serde(default = "yes")]
    pub remove_at_end: bool,
}

/// Runs the wrapped requirement's whole lifecycle on the tick where the
/// process progress reaches `time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRequirement {
    pub time: u32,
    pub requirement: Box<RequirementComponent>,
}

/// A modifier applied to the process while a selective requirement holds a
/// candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectiveModifier {
    pub attribute: AttributeType,
    pub modifier: AttributeModifier,
}

/// Tries `candidates` in order at START and keeps the first one that
/// acquires; TICK and END then run only that candidate. When none acquires
/// the requirement is disabled rather than blocking the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectiveRequirement {
    pub candidates: Vec<RequirementComponent>,
    #[serde(default)]
    pub modifiers: Vec<SelectiveModifier>,
}

/// Kind-specific payload of a requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementSpec {
    Item(ItemRequirement),
    Fluid(FluidRequirement),
    Energy(EnergyRequirement),
    Parallelism(ParallelismRequirement),
    AttributeModifier(AttributeModifierRequirement),
    Checkpoint(CheckpointRequirement),
    Selective(SelectiveRequirement),
    /// Embedder-defined kinds carry free-form numeric properties.
    Custom(BTreeMap<String, f64>),
}

impl RequirementSpec {
    /// The kind a payload is dispatched under unless the component names one.
    pub fn default_kind(&self) -> Option<RequirementKind> {
        match self {
            RequirementSpec::Item(_) => Some(kinds::item()),
            RequirementSpec::Fluid(_) => Some(kinds::fluid()),
            RequirementSpec::Energy(_) => Some(kinds::energy()),
            RequirementSpec::Parallelism(_) => Some(kinds::parallelism()),
            RequirementSpec::AttributeModifier(_) => Some(kinds::attribute_modifier()),
            RequirementSpec::Checkpoint(_) => Some(kinds::checkpoint()),
            RequirementSpec::Selective(_) => Some(kinds::selective()),
            RequirementSpec::Custom(_) => None,
        }
    }

    /// Whether resolution multiplies this payload by the process parallelism.
    pub fn scales_with_parallelism(&self) -> bool {
        matches!(
            self,
            RequirementSpec::Item(_) | RequirementSpec::Fluid(_) | RequirementSpec::Energy(_)
        )
    }
}

// ---------------------------------------------------------------------------
// RequirementComponent
// ---------------------------------------------------------------------------

/// One declared resource need or production of a recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementComponent {
    /// Unique within the recipe; used to derive modifier ids and claim keys.
    pub id: String,
    pub kind: RequirementKind,
    pub spec: RequirementSpec,
}

impl RequirementComponent {
    /// Build a component dispatched under an explicit kind.
    pub fn new(id: impl Into<String>, kind: RequirementKind, spec: RequirementSpec) -> Self {
        Self {
            id: id.into(),
            kind,
            spec,
        }
    }

    /// Build a component for a built-in payload, using its default kind.
    /// Custom payloads go through [`new`](Self::new) or [`custom`](Self::custom).
    pub fn builtin(id: impl Into<String>, spec: RequirementSpec) -> Option<Self> {
        let kind = spec.default_kind()?;
        Some(Self::new(id, kind, spec))
    }

    pub fn item(id: impl Into<String>, spec: ItemRequirement) -> Self {
        Self::new(id, kinds::item(), RequirementSpec::Item(spec))
    }

    pub fn fluid(id: impl Into<String>, spec: FluidRequirement) -> Self {
        Self::new(id, kinds::fluid(), RequirementSpec::Fluid(spec))
    }

    pub fn energy(id: impl Into<String>, spec: EnergyRequirement) -> Self {
        Self::new(id, kinds::energy(), RequirementSpec::Energy(spec))
    }

    pub fn parallelism(id: impl Into<String>, parallelism: u64) -> Self {
        Self::new(
            id,
            kinds::parallelism(),
            RequirementSpec::Parallelism(ParallelismRequirement {
                parallelism,
                apply_at_start: true,
                remove_at_end: true,
            }),
        )
    }

    pub fn attribute_modifier(
        id: impl Into<String>,
        attribute: AttributeType,
        modifier: AttributeModifier,
    ) -> Self {
        Self::new(
            id,
            kinds::attribute_modifier(),
            RequirementSpec::AttributeModifier(AttributeModifierRequirement {
                attribute,
                modifier,
                apply_at_start: true,
                remove_at_end: true,
            }),
        )
    }

    pub fn checkpoint(id: impl Into<String>, time: u32, requirement: RequirementComponent) -> Self {
        Self::new(
            id,
            kinds::checkpoint(),
            RequirementSpec::Checkpoint(CheckpointRequirement {
                time,
                requirement: Box::new(requirement),
            }),
        )
    }

    pub fn selective(id: impl Into<String>, candidates: Vec<RequirementComponent>) -> Self {
        Self::new(
            id,
            kinds::selective(),
            RequirementSpec::Selective(SelectiveRequirement {
                candidates,
                modifiers: Vec::new(),
            }),
        )
    }

    pub fn custom(
        id: impl Into<String>,
        kind: RequirementKind,
        properties: BTreeMap<String, f64>,
    ) -> Self {
        Self::new(id, kind, RequirementSpec::Custom(properties))
    }

    /// A copy with every resource amount multiplied by `k` (saturating).
    /// Payloads that do not scale are cloned unchanged. Selective candidates
    /// are resolved on their own when dispatched.
    pub fn scaled(&self, k: u64) -> Self {
        let spec = match &self.spec {
            RequirementSpec::Item(item) => RequirementSpec::Item(ItemRequirement {
                inputs: scale_all(&item.inputs, k),
                outputs: scale_all(&item.outputs, k),
                input_groups: item.input_groups.iter().map(|g| g.scaled(k)).collect(),
                // Drawn once per parallel execution instead.
                random_outputs: item.random_outputs.clone(),
                ignore_output_full: item.ignore_output_full,
            }),
            RequirementSpec::Fluid(fluid) => RequirementSpec::Fluid(FluidRequirement {
                inputs: scale_all(&fluid.inputs, k),
                outputs: scale_all(&fluid.outputs, k),
                inputs_per_tick: scale_all(&fluid.inputs_per_tick, k),
                outputs_per_tick: scale_all(&fluid.outputs_per_tick, k),
                ignore_output_full: fluid.ignore_output_full,
            }),
            RequirementSpec::Energy(energy) => RequirementSpec::Energy(EnergyRequirement {
                input_per_tick: scale_count(energy.input_per_tick, k),
                output_per_tick: scale_count(energy.output_per_tick, k),
                ignore_output_full: energy.ignore_output_full,
            }),
            other => other.clone(),
        };
        Self {
            id: self.id.clone(),
            kind: self.kind.clone(),
            spec,
        }
    }
}

/// The process-scoped view of `component`: amounts multiplied by the
/// process parallelism when it exceeds 1, otherwise the component itself.
pub fn resolve<'a>(component: &'a RequirementComponent, process: &Process) -> Cow<'a, RequirementComponent> {
    let k = process.parallelism();
    if k <= 1 || !component.spec.scales_with_parallelism() {
        return Cow::Borrowed(component);
    }
    Cow::Owned(component.scaled(k))
}
