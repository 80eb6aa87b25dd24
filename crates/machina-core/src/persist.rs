//! Persisted layouts and binary machine snapshots.
//!
//! Attribute maps, processes and machines are captured into plain serde
//! records. A standalone map records every attribute; an overlay records only
//! entries carrying local changes so the shared baseline is never duplicated
//! into each process. Attribute ids are resolved against an
//! [`AttributeRegistry`] on restore and an unknown id is a hard error: there
//! is no migration path.
//!
//! Whole machines are encoded with `bitcode` behind a versioned
//! [`SnapshotHeader`].

use crate::attribute::{
    AttributeInstance, AttributeMap, AttributeModifier, AttributeView, ModifierOperation,
};
use crate::component::{ComponentError, ProcessComponent};
use crate::config::ExecutorConfig;
use crate::machine::Machine;
use crate::overlay::OverlayAttributeMap;
use crate::process::{Lifecycle, Process, ProcessStatus, Recipe, RequirementState};
use crate::registry::{AttributeRegistry, RecipeRegistry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a machine snapshot.
pub const SNAPSHOT_MAGIC: u32 = 0x4D43_4E01;

/// Current format version. Increment when breaking the layout.
pub const FORMAT_VERSION: u32 = 2;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PersistError {
    #[error("unknown attribute type '{0}'")]
    UnknownAttribute(String),
    #[error("unknown recipe '{0}'")]
    UnknownRecipe(String),
    #[error("standalone attribute '{0}' has no base value")]
    MissingBase(String),
    #[error(transparent)]
    Component(#[from] ComponentError),
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SNAPSHOT_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("snapshot from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
}

// ---------------------------------------------------------------------------
// Attribute records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifierRecord {
    pub id: String,
    pub amount: f64,
    pub operation: ModifierOperation,
    pub provenance: Option<String>,
}

impl From<&AttributeModifier> for ModifierRecord {
    fn from(modifier: &AttributeModifier) -> Self {
        Self {
            id: modifier.id.clone(),
            amount: modifier.amount,
            operation: modifier.operation,
            provenance: modifier.provenance.clone(),
        }
    }
}

impl From<ModifierRecord> for AttributeModifier {
    fn from(record: ModifierRecord) -> Self {
        AttributeModifier {
            id: record.id,
            amount: record.amount,
            operation: record.operation,
            provenance: record.provenance,
        }
    }
}

/// One attribute entry. Standalone entries always carry `base`; overlay
/// entries carry `base` only when they have no parent, and `base_override`
/// only when one is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub type_id: String,
    pub base: Option<f64>,
    pub base_override: Option<f64>,
    pub modifiers: Vec<ModifierRecord>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AttributeMapRecord {
    pub attributes: Vec<AttributeRecord>,
}

impl AttributeMapRecord {
    /// Capture every attribute of a standalone map, in id order.
    pub fn from_map(map: &AttributeMap) -> Self {
        let attributes = map
            .entries()
            .into_iter()
            .map(|(attribute, shared)| {
                let instance = shared.read();
                AttributeRecord {
                    type_id: attribute.id().to_string(),
                    base: Some(instance.base()),
                    base_override: None,
                    modifiers: instance.iter_modifiers().map(ModifierRecord::from).collect(),
                }
            })
            .collect();
        Self { attributes }
    }

    /// Capture only the overlay entries with local changes.
    pub fn from_overlay(overlay: &OverlayAttributeMap) -> Self {
        let attributes = overlay
            .local_instances()
            .filter(|(_, instance)| instance.has_local_changes())
            .map(|(attribute, instance)| AttributeRecord {
                type_id: attribute.id().to_string(),
                base: if instance.has_parent() {
                    None
                } else {
                    Some(instance.base())
                },
                base_override: instance.base_override(),
                modifiers: instance.local_modifiers().map(ModifierRecord::from).collect(),
            })
            .collect();
        Self { attributes }
    }

    /// Rebuild a standalone map.
    pub fn restore_map(&self, registry: &AttributeRegistry) -> Result<AttributeMap, PersistError> {
        let map = AttributeMap::new();
        for record in &self.attributes {
            let attribute = registry
                .get(&record.type_id)
                .cloned()
                .ok_or_else(|| PersistError::UnknownAttribute(record.type_id.clone()))?;
            let base = record
                .base
                .ok_or_else(|| PersistError::MissingBase(record.type_id.clone()))?;
            let mut instance = AttributeInstance::new(attribute, base);
            for modifier in &record.modifiers {
                instance.add_modifier(modifier.clone().into());
            }
            map.insert(instance);
        }
        Ok(map)
    }

    /// Replay local changes onto `overlay`, wiring each entry to its parent.
    pub fn restore_overlay(
        &self,
        overlay: &mut OverlayAttributeMap,
        registry: &AttributeRegistry,
    ) -> Result<(), PersistError> {
        // Resolve everything first so an unknown id leaves the overlay alone.
        let mut resolved = Vec::with_capacity(self.attributes.len());
        for record in &self.attributes {
            let attribute = registry
                .get(&record.type_id)
                .cloned()
                .ok_or_else(|| PersistError::UnknownAttribute(record.type_id.clone()))?;
            resolved.push((attribute, record));
        }

        let default_base = overlay.default_base();
        for (attribute, record) in resolved {
            let entry = overlay.get_or_create_attribute(&attribute, default_base);
            if let (false, Some(base)) = (entry.has_parent(), record.base) {
                entry.set_base(base);
            }
            if record.base_override.is_some() {
                entry.set_base_override(record.base_override);
            }
            for modifier in &record.modifiers {
                entry.add_modifier(modifier.clone().into());
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Process records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub recipe_id: String,
    pub seed: u64,
    pub status: ProcessStatus,
    pub started: bool,
    pub unscaled_ticks: f32,
    pub attributes: AttributeMapRecord,
    /// Selective choices, matcher locks and fired checkpoints.
    pub requirement_state: RequirementState,
    pub components: Vec<ComponentRecord>,
}

/// What a restore needs besides the records themselves.
#[derive(Debug, Clone, Copy)]
pub struct RestoreContext<'a> {
    pub attributes: &'a AttributeRegistry,
    pub recipes: &'a RecipeRegistry,
    pub default_base: f64,
}

impl ProcessRecord {
    pub fn capture(process: &Process) -> Self {
        Self {
            recipe_id: process.recipe().id.clone(),
            seed: process.seed(),
            status: process.status().clone(),
            started: process.is_started(),
            unscaled_ticks: process.unscaled_ticks(),
            attributes: AttributeMapRecord::from_overlay(process.attributes()),
            requirement_state: process.requirement_state().clone(),
            components: process
                .components()
                .map(|c| ComponentRecord {
                    name: c.name().to_string(),
                    data: c.save_state(),
                })
                .collect(),
        }
    }

    /// Rebuild the process over `baseline`. `components` are attached first
    /// and then receive the saved state recorded under their name; saved
    /// state without a matching component is skipped.
    pub fn restore(
        &self,
        baseline: Arc<AttributeMap>,
        ctx: &RestoreContext<'_>,
        components: Vec<Box<dyn ProcessComponent>>,
    ) -> Result<Process, PersistError> {
        let recipe = ctx
            .recipes
            .get(&self.recipe_id)
            .cloned()
            .ok_or_else(|| PersistError::UnknownRecipe(self.recipe_id.clone()))?;
        let mut process = Process::new(recipe, baseline, ctx.default_base, self.seed);
        self.attributes
            .restore_overlay(&mut process.attributes, ctx.attributes)?;
        process.restore_state(
            self.status.clone(),
            Lifecycle {
                started: self.started,
            },
            self.unscaled_ticks,
        );
        process.requirement_state = self.requirement_state.clone();

        for component in components {
            process.add_component(component);
        }
        for saved in &self.components {
            match process
                .components_mut()
                .iter_mut()
                .find(|c| c.name() == saved.name)
            {
                Some(component) => component.load_state(&saved.data)?,
                None => warn!(
                    component = %saved.name,
                    recipe = %self.recipe_id,
                    "saved component state has no matching component"
                ),
            }
        }
        Ok(process)
    }
}

// ---------------------------------------------------------------------------
// Machine snapshots
// ---------------------------------------------------------------------------

/// Header stored with every machine snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
    /// Machine tick when the snapshot was taken.
    pub tick: u64,
}

impl SnapshotHeader {
    pub fn new(tick: u64) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: FORMAT_VERSION,
            tick,
        }
    }

    pub fn validate(&self) -> Result<(), PersistError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(PersistError::InvalidMagic(self.magic));
        }
        if self.version > FORMAT_VERSION {
            return Err(PersistError::FutureVersion(self.version));
        }
        if self.version < FORMAT_VERSION {
            return Err(PersistError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineRecord {
    pub header: SnapshotHeader,
    pub seed_state: u64,
    pub baseline: AttributeMapRecord,
    /// Active processes in slot order.
    pub processes: Vec<ProcessRecord>,
}

impl MachineRecord {
    pub fn encode(&self) -> Result<Vec<u8>, PersistError> {
        bitcode::serialize(self).map_err(|e| PersistError::Encode(e.to_string()))
    }

    /// Decode and validate the header. The payload is decoded as a whole
    /// since bitcode cannot read a prefix on its own.
    pub fn decode(data: &[u8]) -> Result<Self, PersistError> {
        let record: MachineRecord =
            bitcode::deserialize(data).map_err(|e| PersistError::Decode(e.to_string()))?;
        record.header.validate()?;
        Ok(record)
    }
}

impl<W: 'static> Machine<W> {
    /// Capture the baseline and every active process. The world is owned by
    /// the embedder and is not part of the record.
    pub fn to_record(&self) -> MachineRecord {
        MachineRecord {
            header: SnapshotHeader::new(self.tick_count()),
            seed_state: self.seed_state(),
            baseline: AttributeMapRecord::from_map(self.baseline()),
            processes: self
                .processes()
                .map(|(_, process)| ProcessRecord::capture(process))
                .collect(),
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, PersistError> {
        self.to_record().encode()
    }

    /// Rebuild a machine around `world`. `components` supplies the
    /// components to attach to each restored process before its saved state
    /// is loaded.
    pub fn restore<F>(
        record: &MachineRecord,
        world: W,
        config: &ExecutorConfig,
        ctx: &RestoreContext<'_>,
        mut components: F,
    ) -> Result<Self, PersistError>
    where
        F: FnMut(&Recipe) -> Vec<Box<dyn ProcessComponent>>,
    {
        record.header.validate()?;
        let baseline = Arc::new(record.baseline.restore_map(ctx.attributes)?);
        let mut machine = Machine::new(Arc::clone(&baseline), world, config);
        for saved in &record.processes {
            let recipe = ctx
                .recipes
                .get(&saved.recipe_id)
                .ok_or_else(|| PersistError::UnknownRecipe(saved.recipe_id.clone()))?;
            let attached = components(recipe);
            let process = saved.restore(Arc::clone(&baseline), ctx, attached)?;
            machine.insert_process(process);
        }
        machine.restore_counters(record.header.tick, record.seed_state);
        Ok(machine)
    }

    pub fn deserialize<F>(
        data: &[u8],
        world: W,
        config: &ExecutorConfig,
        ctx: &RestoreContext<'_>,
        components: F,
    ) -> Result<Self, PersistError>
    where
        F: FnMut(&Recipe) -> Vec<Box<dyn ProcessComponent>>,
    {
        let record = MachineRecord::decode(data)?;
        Self::restore(&record, world, config, ctx, components)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeType, standard};
    use crate::component::ProgressTracker;
    use crate::process::Selection;
    use crate::registry::AttributeRegistryBuilder;

    fn sample_map() -> AttributeMap {
        let map = AttributeMap::new();
        map.set_base(&standard::process_speed(), 1.5);
        map.add_modifier(
            &standard::process_speed(),
            1.0,
            AttributeModifier::multiply_total("beacon", 0.25).with_provenance("beacon@0,64,0"),
        );
        map.add_modifier(
            &standard::process_parallelism(),
            1.0,
            AttributeModifier::addition("upgrade", 3.0),
        );
        map
    }

    fn modifiers_of(map: &AttributeMap, attribute: &AttributeType) -> Vec<AttributeModifier> {
        map.get(attribute)
            .map(|i| i.read().modifiers().into_values().collect())
            .unwrap_or_default()
    }

    #[test]
    fn standalone_map_round_trips() {
        let map = sample_map();
        let record = AttributeMapRecord::from_map(&map);
        assert_eq!(record.attributes.len(), 2);

        let restored = record.restore_map(&AttributeRegistry::default()).unwrap();
        assert_eq!(restored.types(), map.types());
        for attribute in map.types() {
            assert_eq!(
                restored.get(&attribute).unwrap().read().base(),
                map.get(&attribute).unwrap().read().base()
            );
            assert_eq!(modifiers_of(&restored, &attribute), modifiers_of(&map, &attribute));
        }
    }

    #[test]
    fn unknown_attribute_is_a_hard_error() {
        let record = AttributeMapRecord {
            attributes: vec![AttributeRecord {
                type_id: "othermod:mystery".into(),
                base: Some(1.0),
                base_override: None,
                modifiers: Vec::new(),
            }],
        };
        assert_eq!(
            record.restore_map(&AttributeRegistry::default()).unwrap_err(),
            PersistError::UnknownAttribute("othermod:mystery".into())
        );
    }

    #[test]
    fn overlay_records_only_local_changes() {
        let baseline = Arc::new(sample_map());
        let mut overlay = OverlayAttributeMap::new(Arc::clone(&baseline), 1.0);
        // Touched but unchanged: not recorded.
        overlay.get_or_create_attribute(&standard::process_parallelism(), 1.0);
        overlay
            .get_or_create_attribute(&standard::process_speed(), 1.0)
            .add_modifier(AttributeModifier::addition("local", 1.0));
        overlay
            .get_or_create_attribute(&standard::energy_efficiency(), 1.0)
            .set_base(0.5);

        let record = AttributeMapRecord::from_overlay(&overlay);
        let ids: Vec<_> = record.attributes.iter().map(|a| a.type_id.as_str()).collect();
        assert_eq!(ids, vec!["machina:energy_efficiency", "machina:process_speed"]);

        let speed = &record.attributes[1];
        assert_eq!(speed.base, None);
        assert_eq!(speed.modifiers.len(), 1);
        assert_eq!(speed.modifiers[0].id, "local");
        let efficiency = &record.attributes[0];
        assert_eq!(efficiency.base, Some(0.5));
    }

    #[test]
    fn overlay_restore_rewires_parent() {
        let baseline = Arc::new(sample_map());
        let mut overlay = OverlayAttributeMap::new(Arc::clone(&baseline), 1.0);
        let speed_entry = overlay.get_or_create_attribute(&standard::process_speed(), 1.0);
        speed_entry.set_base(4.0);
        speed_entry.add_modifier(AttributeModifier::addition("local", 1.0));
        let expected = overlay.value_of(&standard::process_speed(), 0.0);
        let record = AttributeMapRecord::from_overlay(&overlay);

        let mut restored = OverlayAttributeMap::new(Arc::clone(&baseline), 1.0);
        record
            .restore_overlay(&mut restored, &AttributeRegistry::default())
            .unwrap();
        assert_eq!(restored.value_of(&standard::process_speed(), 0.0), expected);
        let entry = restored.get_attribute(&standard::process_speed()).unwrap();
        assert!(entry.has_parent());
        assert_eq!(entry.base_override(), Some(4.0));
        // The baseline modifier is inherited, not copied.
        assert_eq!(entry.local_modifiers().count(), 1);
    }

    #[test]
    fn header_validation() {
        assert!(SnapshotHeader::new(3).validate().is_ok());
        let bad_magic = SnapshotHeader {
            magic: 0,
            ..SnapshotHeader::new(0)
        };
        assert_eq!(bad_magic.validate(), Err(PersistError::InvalidMagic(0)));
        let future = SnapshotHeader {
            version: FORMAT_VERSION + 1,
            ..SnapshotHeader::new(0)
        };
        assert_eq!(
            future.validate(),
            Err(PersistError::FutureVersion(FORMAT_VERSION + 1))
        );
        let old = SnapshotHeader {
            version: 0,
            ..SnapshotHeader::new(0)
        };
        assert_eq!(old.validate(), Err(PersistError::UnsupportedVersion(0)));
    }

    #[test]
    fn process_record_restores_state_and_components() {
        let mut recipes = RecipeRegistry::new();
        let recipe = recipes.register(Recipe::new("test:smelt", 40)).unwrap();
        let baseline = Arc::new(sample_map());
        let mut process = Process::new(recipe, Arc::clone(&baseline), 1.0, 99)
            .with_component(ProgressTracker::new());
        process.advance(2.0, "Processing");
        process.lifecycle.started = true;
        process.requirement_state.select("fuel", Selection::Chosen(1));
        process.requirement_state.mark_fired("halfway");
        for component in process.components_mut() {
            component.on_post_tick(&ProcessStatus::default());
        }

        let record = ProcessRecord::capture(&process);
        let attributes = AttributeRegistryBuilder::new().build();
        let ctx = RestoreContext {
            attributes: &attributes,
            recipes: &recipes,
            default_base: 1.0,
        };
        let attached: Vec<Box<dyn ProcessComponent>> = vec![Box::new(ProgressTracker::new())];
        let restored = record.restore(baseline, &ctx, attached).unwrap();
        assert_eq!(restored.seed(), 99);
        assert!(restored.is_started());
        assert_eq!(restored.status().progress, 2.0);
        assert_eq!(restored.unscaled_ticks(), 1.0);
        assert_eq!(restored.requirement_state(), process.requirement_state());
        assert_eq!(
            restored.requirement_state().selection("fuel"),
            Some(Selection::Chosen(1))
        );
        assert_eq!(
            restored.component::<ProgressTracker>().unwrap().ticks_observed(),
            1
        );
    }

    #[test]
    fn unknown_recipe_is_rejected() {
        let record = ProcessRecord {
            recipe_id: "gone".into(),
            seed: 0,
            status: ProcessStatus::default(),
            started: false,
            unscaled_ticks: 0.0,
            attributes: AttributeMapRecord::default(),
            requirement_state: RequirementState::default(),
            components: Vec::new(),
        };
        let attributes = AttributeRegistry::default();
        let recipes = RecipeRegistry::new();
        let ctx = RestoreContext {
            attributes: &attributes,
            recipes: &recipes,
            default_base: 1.0,
        };
        let err = record
            .restore(Arc::new(AttributeMap::new()), &ctx, Vec::new())
            .unwrap_err();
        assert_eq!(err, PersistError::UnknownRecipe("gone".into()));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(matches!(
            MachineRecord::decode(&[1, 2, 3]),
            Err(PersistError::Decode(_))
        ));
    }
}
