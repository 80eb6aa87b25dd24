//! Recipes and the in-progress work units created from them.

use crate::attribute::{AttributeType, standard};
use crate::component::ProcessComponent;
use crate::id::{NamespacedId, RequirementKind};
use crate::overlay::OverlayAttributeMap;
use crate::requirement::RequirementComponent;
use crate::scaling;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Recipe
// ---------------------------------------------------------------------------

/// Immutable recipe data: a duration plus requirements grouped by kind.
///
/// The executor never relies on the map's iteration order; it sorts the
/// kinds before every stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    /// `<= 0` completes the process on the tick it starts.
    pub duration_ticks: i32,
    pub requirements: HashMap<RequirementKind, Vec<RequirementComponent>>,
}

impl Recipe {
    pub fn new(id: impl Into<String>, duration_ticks: i32) -> Self {
        Self {
            id: id.into(),
            duration_ticks,
            requirements: HashMap::new(),
        }
    }

    /// Append `component` under its own kind.
    pub fn with_requirement(mut self, component: RequirementComponent) -> Self {
        self.add_requirement(component);
        self
    }

    pub fn add_requirement(&mut self, component: RequirementComponent) {
        self.requirements
            .entry(component.kind.clone())
            .or_default()
            .push(component);
    }

    /// Requirement kinds in the order stages evaluate them.
    pub fn sorted_kinds(&self) -> Vec<&RequirementKind> {
        let mut kinds: Vec<_> = self.requirements.keys().collect();
        kinds.sort();
        kinds
    }

    pub fn requirement_count(&self) -> usize {
        self.requirements.values().map(Vec::len).sum()
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Readback for UI and telemetry, refreshed every tick.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub progress: f32,
    pub message: String,
    pub is_error: bool,
}

/// Lifecycle flags of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Lifecycle {
    /// Set once the START stage committed.
    pub started: bool,
}

// ---------------------------------------------------------------------------
// Requirement state
// ---------------------------------------------------------------------------

/// Outcome of a selective requirement's START.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selection {
    /// Index of the candidate that acquired.
    Chosen(usize),
    /// No candidate acquired; later stages skip the requirement.
    Disabled,
}

/// Decisions handlers take at one stage and read back at later ones.
///
/// Entries are keyed by requirement id. Handlers only read this during
/// evaluation; writes happen in commit actions through
/// [`CommitContext::state`](crate::transaction::CommitContext::state), so a
/// rolled-back stage leaves no trace. Saved with the process.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequirementState {
    selections: BTreeMap<String, Selection>,
    locks: BTreeMap<String, NamespacedId>,
    fired: BTreeSet<String>,
}

impl RequirementState {
    pub fn selection(&self, requirement: &str) -> Option<Selection> {
        self.selections.get(requirement).copied()
    }

    pub fn select(&mut self, requirement: impl Into<String>, selection: Selection) {
        self.selections.insert(requirement.into(), selection);
    }

    /// Resource a matcher group settled on, keyed by `requirement/group`.
    pub fn lock(&self, key: &str) -> Option<&NamespacedId> {
        self.locks.get(key)
    }

    pub fn set_lock(&mut self, key: impl Into<String>, resource: NamespacedId) {
        self.locks.insert(key.into(), resource);
    }

    pub fn has_fired(&self, requirement: &str) -> bool {
        self.fired.contains(requirement)
    }

    pub fn mark_fired(&mut self, requirement: impl Into<String>) {
        self.fired.insert(requirement.into());
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty() && self.locks.is_empty() && self.fired.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Process
// ---------------------------------------------------------------------------

/// A unit of in-progress work. Mutated only by the executor.
#[derive(Debug)]
pub struct Process {
    recipe: Arc<Recipe>,
    pub(crate) attributes: OverlayAttributeMap,
    pub(crate) requirement_state: RequirementState,
    pub(crate) status: ProcessStatus,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) unscaled_ticks: f32,
    /// Set while the last evaluated stage was blocked.
    pub(crate) blocked: bool,
    seed: u64,
    components: Vec<Box<dyn ProcessComponent>>,
}

impl Process {
    /// Create a process whose attribute overlay reads through to `baseline`.
    /// Attributes absent from the baseline start at `default_base`.
    pub fn new(
        recipe: Arc<Recipe>,
        baseline: Arc<crate::attribute::AttributeMap>,
        default_base: f64,
        seed: u64,
    ) -> Self {
        Self {
            recipe,
            attributes: OverlayAttributeMap::new(baseline, default_base),
            requirement_state: RequirementState::default(),
            status: ProcessStatus::default(),
            lifecycle: Lifecycle::default(),
            unscaled_ticks: 0.0,
            blocked: false,
            seed,
            components: Vec::new(),
        }
    }

    pub fn with_component(mut self, component: impl ProcessComponent + 'static) -> Self {
        self.components.push(Box::new(component));
        self
    }

    pub fn add_component(&mut self, component: Box<dyn ProcessComponent>) {
        self.components.push(component);
    }

    pub fn recipe(&self) -> &Arc<Recipe> {
        &self.recipe
    }

    pub fn attributes(&self) -> &OverlayAttributeMap {
        &self.attributes
    }

    pub fn requirement_state(&self) -> &RequirementState {
        &self.requirement_state
    }

    pub fn status(&self) -> &ProcessStatus {
        &self.status
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_started(&self) -> bool {
        self.lifecycle.started
    }

    /// Ticks that advanced, regardless of speed.
    pub fn unscaled_ticks(&self) -> f32 {
        self.unscaled_ticks
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn components(&self) -> impl Iterator<Item = &dyn ProcessComponent> {
        self.components.iter().map(|c| c.as_ref())
    }

    /// Typed access to an attached component.
    pub fn component<T: 'static>(&self) -> Option<&T> {
        self.components
            .iter()
            .find_map(|c| c.as_any().downcast_ref::<T>())
    }

    pub(crate) fn components_mut(&mut self) -> &mut [Box<dyn ProcessComponent>] {
        &mut self.components
    }

    /// Effective value of `attribute` through the overlay.
    pub fn attribute_value(&self, attribute: &AttributeType, default: f64) -> f64 {
        self.attributes.value_of(attribute, default)
    }

    /// Effective parallelism: `floor(process_parallelism)`, at least 1.
    pub fn parallelism(&self) -> u64 {
        scaling::parallelism(self.attribute_value(&standard::process_parallelism(), 1.0))
    }

    /// Progress gained per successful tick.
    pub fn speed(&self) -> f64 {
        self.attribute_value(&standard::process_speed(), 1.0)
    }

    /// Whether progress reached the recipe duration (always true for
    /// durations `<= 0`).
    pub fn is_complete(&self) -> bool {
        let duration = self.recipe.duration_ticks;
        duration <= 0 || self.status.progress >= duration as f32
    }

    pub(crate) fn set_blocked(&mut self, reason: &str) {
        self.status.message = reason.to_string();
        self.status.is_error = false;
        self.blocked = true;
    }

    pub(crate) fn set_error(&mut self, reason: &str) {
        self.status.message = reason.to_string();
        self.status.is_error = true;
        self.blocked = false;
    }

    pub(crate) fn advance(&mut self, speed: f64, message: &str) {
        self.status.progress += speed.max(0.0) as f32;
        self.unscaled_ticks += 1.0;
        self.status.message = message.to_string();
        self.status.is_error = false;
        self.blocked = false;
    }

    /// Restore progress state from persisted data.
    pub(crate) fn restore_state(
        &mut self,
        status: ProcessStatus,
        lifecycle: Lifecycle,
        unscaled_ticks: f32,
    ) {
        self.status = status;
        self.lifecycle = lifecycle;
        self.unscaled_ticks = unscaled_ticks;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeMap, AttributeModifier, AttributeView};
    use crate::component::ProgressTracker;
    use crate::requirement::{ItemRequirement, kinds};

    fn process(duration: i32, baseline: Arc<AttributeMap>) -> Process {
        Process::new(Arc::new(Recipe::new("test:recipe", duration)), baseline, 1.0, 7)
    }

    #[test]
    fn recipe_groups_requirements_by_kind() {
        let recipe = Recipe::new("r", 20)
            .with_requirement(RequirementComponent::parallelism("par", 2))
            .with_requirement(RequirementComponent::item("a", ItemRequirement::default()))
            .with_requirement(RequirementComponent::item("b", ItemRequirement::default()));
        assert_eq!(recipe.requirement_count(), 3);
        assert_eq!(recipe.requirements[&kinds::item()].len(), 2);
        assert_eq!(
            recipe.sorted_kinds(),
            vec![&kinds::item(), &kinds::parallelism()]
        );
    }

    #[test]
    fn defaults_without_attributes() {
        let p = process(10, Arc::new(AttributeMap::new()));
        assert_eq!(p.parallelism(), 1);
        assert_eq!(p.speed(), 1.0);
        assert!(!p.is_started());
        assert!(!p.is_complete());
        assert_eq!(p.seed(), 7);
    }

    #[test]
    fn speed_reads_through_overlay() {
        let baseline = Arc::new(AttributeMap::new());
        baseline.set_base(&standard::process_speed(), 2.0);
        let mut p = process(10, Arc::clone(&baseline));
        assert_eq!(p.speed(), 2.0);

        p.attributes
            .get_or_create_attribute(&standard::process_speed(), 1.0)
            .add_modifier(AttributeModifier::multiply_total("boost", 0.5));
        assert_eq!(p.speed(), 3.0);
        assert_eq!(baseline.value_of(&standard::process_speed(), 0.0), 2.0);
    }

    #[test]
    fn zero_duration_is_complete_immediately() {
        assert!(process(0, Arc::new(AttributeMap::new())).is_complete());
        assert!(process(-5, Arc::new(AttributeMap::new())).is_complete());
    }

    #[test]
    fn advance_clamps_negative_speed() {
        let mut p = process(10, Arc::new(AttributeMap::new()));
        p.advance(-3.0, "Processing");
        assert_eq!(p.status().progress, 0.0);
        assert_eq!(p.unscaled_ticks(), 1.0);
        p.advance(2.5, "Processing");
        assert_eq!(p.status().progress, 2.5);
        assert_eq!(p.status().message, "Processing");
    }

    #[test]
    fn blocked_then_error_status() {
        let mut p = process(10, Arc::new(AttributeMap::new()));
        p.set_blocked("waiting for power");
        assert!(p.is_blocked());
        assert!(!p.status().is_error);
        p.set_error("machine broke");
        assert!(p.status().is_error);
        assert_eq!(p.status().message, "machine broke");
    }

    #[test]
    fn requirement_state_tracks_choices_by_id() {
        let mut state = RequirementState::default();
        assert!(state.is_empty());
        state.select("fuel", Selection::Chosen(1));
        state.select("coolant", Selection::Disabled);
        state.set_lock("ore/0", NamespacedId::new("minecraft", "raw_iron"));
        state.mark_fired("halfway");

        assert_eq!(state.selection("fuel"), Some(Selection::Chosen(1)));
        assert_eq!(state.selection("coolant"), Some(Selection::Disabled));
        assert_eq!(state.selection("other"), None);
        assert_eq!(
            state.lock("ore/0"),
            Some(&NamespacedId::new("minecraft", "raw_iron"))
        );
        assert!(state.has_fired("halfway"));
        assert!(!state.has_fired("end"));
    }

    #[test]
    fn typed_component_lookup() {
        let p = process(10, Arc::new(AttributeMap::new())).with_component(ProgressTracker::new());
        assert!(p.component::<ProgressTracker>().is_some());
        assert_eq!(p.components().count(), 1);
    }
}
