//! Machine definition directories: `machine.*` plus `recipes.*`, resolved
//! against the attribute registry and the handlers the embedder provides.

use crate::loader::{DataLoadError, deserialize_file, require_data_file};
use crate::schema::{AttributeData, MachineData};
use machina_core::attribute::{AttributeMap, AttributeType, AttributeView};
use machina_core::config::ExecutorConfig;
use machina_core::data_loader::RecipeSetData;
use machina_core::executor::ProcessExecutor;
use machina_core::handler::HandlerRegistry;
use machina_core::id::NamespacedId;
use machina_core::machine::Machine;
use machina_core::registry::{AttributeRegistry, AttributeRegistryBuilder, RecipeRegistry};
use machina_core::requirement::{RequirementComponent, RequirementSpec};
use machina_resources::handler::standard_handlers;
use machina_resources::port::MachinePorts;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// A fully resolved machine definition.
#[derive(Debug)]
pub struct MachineDefinition {
    pub name: String,
    pub attributes: AttributeRegistry,
    pub baseline: Arc<AttributeMap>,
    pub config: ExecutorConfig,
    pub ports: MachinePorts,
    pub recipes: RecipeRegistry,
}

impl MachineDefinition {
    /// A fresh machine over this definition's baseline and ports.
    pub fn build_machine(&self) -> Machine<MachinePorts> {
        Machine::new(Arc::clone(&self.baseline), self.ports.clone(), &self.config)
    }

    /// An executor using the core and resource handlers.
    pub fn build_executor(&self) -> ProcessExecutor<MachinePorts> {
        ProcessExecutor::new(standard_handlers(), self.config.clone())
    }
}

/// Load the definition in `dir`, accepting the requirement kinds of the core
/// and resource handlers.
pub fn load_machine_definition(dir: &Path) -> Result<MachineDefinition, DataLoadError> {
    load_machine_definition_with(dir, &standard_handlers::<MachinePorts>())
}

/// Load the definition in `dir`. Every requirement kind a recipe names must
/// be registered in `handlers`.
pub fn load_machine_definition_with<W>(
    dir: &Path,
    handlers: &HandlerRegistry<W>,
) -> Result<MachineDefinition, DataLoadError> {
    // -----------------------------------------------------------------------
    // Machine file
    // -----------------------------------------------------------------------
    let machine_path = require_data_file(dir, "machine")?;
    let machine: MachineData = deserialize_file(&machine_path)?;

    let attributes = build_attribute_registry(&machine.custom_attributes, &machine_path)?;
    let baseline = build_baseline(&machine.attributes, &attributes, &machine_path)?;

    // -----------------------------------------------------------------------
    // Recipes file
    // -----------------------------------------------------------------------
    let recipes_path = require_data_file(dir, "recipes")?;
    let recipe_set: RecipeSetData = deserialize_file(&recipes_path)?;

    let mut seen = HashSet::new();
    for recipe in &recipe_set.recipes {
        if !seen.insert(recipe.id.as_str()) {
            return Err(DataLoadError::DuplicateName {
                file: recipes_path.clone(),
                name: recipe.id.clone(),
            });
        }
    }

    let recipes = recipe_set
        .into_registry()
        .map_err(|source| DataLoadError::Recipe {
            file: recipes_path.clone(),
            source,
        })?;

    for id in recipes.ids() {
        let Some(recipe) = recipes.get(id) else {
            continue;
        };
        for components in recipe.requirements.values() {
            for component in components {
                check_component(component, handlers, &attributes, &recipes_path)?;
            }
        }
    }

    info!(
        machine = %machine.name,
        dir = %dir.display(),
        recipes = recipes.len(),
        attributes = baseline.len(),
        "machine definition loaded"
    );

    Ok(MachineDefinition {
        name: machine.name,
        attributes,
        baseline: Arc::new(baseline),
        config: machine.executor,
        ports: machine.ports,
        recipes,
    })
}

fn build_attribute_registry(
    custom: &[String],
    file: &Path,
) -> Result<AttributeRegistry, DataLoadError> {
    let mut builder = AttributeRegistryBuilder::new();
    for text in custom {
        let id: NamespacedId = text.parse().map_err(|e| DataLoadError::Parse {
            file: file.to_path_buf(),
            detail: format!("custom attribute: {e}"),
        })?;
        builder
            .register(AttributeType::from_id(id))
            .map_err(|_| DataLoadError::DuplicateName {
                file: file.to_path_buf(),
                name: text.clone(),
            })?;
    }
    Ok(builder.build())
}

fn build_baseline(
    entries: &[AttributeData],
    registry: &AttributeRegistry,
    file: &Path,
) -> Result<AttributeMap, DataLoadError> {
    let map = AttributeMap::new();
    for entry in entries {
        let attribute = registry
            .get(&entry.id)
            .ok_or_else(|| DataLoadError::UnresolvedRef {
                file: file.to_path_buf(),
                name: entry.id.clone(),
                expected_kind: "attribute",
            })?;
        if map.contains(attribute) {
            return Err(DataLoadError::DuplicateName {
                file: file.to_path_buf(),
                name: entry.id.clone(),
            });
        }
        let instance = map.get_or_create(attribute, entry.base);
        let mut instance = instance.write();
        for modifier in &entry.modifiers {
            if !instance.add_modifier(modifier.clone()) {
                return Err(DataLoadError::DuplicateName {
                    file: file.to_path_buf(),
                    name: format!("{}/{}", entry.id, modifier.id),
                });
            }
        }
    }
    Ok(map)
}

/// Every kind needs a handler; attribute modifiers need a known attribute.
/// Checkpoints and selective candidates are checked recursively.
fn check_component<W>(
    component: &RequirementComponent,
    handlers: &HandlerRegistry<W>,
    attributes: &AttributeRegistry,
    file: &Path,
) -> Result<(), DataLoadError> {
    if !handlers.contains(&component.kind) {
        return Err(DataLoadError::UnresolvedRef {
            file: file.to_path_buf(),
            name: component.kind.to_string(),
            expected_kind: "requirement kind",
        });
    }
    match &component.spec {
        RequirementSpec::AttributeModifier(spec) if !attributes.contains(&spec.attribute) => {
            Err(DataLoadError::UnresolvedRef {
                file: file.to_path_buf(),
                name: spec.attribute.id().to_string(),
                expected_kind: "attribute",
            })
        }
        RequirementSpec::Checkpoint(spec) => {
            check_component(&spec.requirement, handlers, attributes, file)
        }
        RequirementSpec::Selective(spec) => {
            if let Some(unknown) = spec
                .modifiers
                .iter()
                .find(|m| !attributes.contains(&m.attribute))
            {
                return Err(DataLoadError::UnresolvedRef {
                    file: file.to_path_buf(),
                    name: unknown.attribute.id().to_string(),
                    expected_kind: "attribute",
                });
            }
            spec.candidates
                .iter()
                .try_for_each(|candidate| check_component(candidate, handlers, attributes, file))
        }
        _ => Ok(()),
    }
}
