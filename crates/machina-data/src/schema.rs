//! Serde structs for machine definition files.
//!
//! `machine.{ron,toml,json}` deserializes into [`MachineData`]. The recipes
//! file reuses [`machina_core::data_loader::RecipeSetData`], so a recipe
//! looks the same in every format.

use machina_core::attribute::AttributeModifier;
use machina_core::config::ExecutorConfig;
use machina_resources::port::MachinePorts;
use serde::Deserialize;

/// Top-level machine file.
#[derive(Debug, Clone, Deserialize)]
pub struct MachineData {
    pub name: String,
    /// Attribute ids beyond the standard ones, as `namespace:path`.
    #[serde(default)]
    pub custom_attributes: Vec<String>,
    /// Baseline attribute values shared by every process of the machine.
    #[serde(default)]
    pub attributes: Vec<AttributeData>,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub ports: MachinePorts,
}

/// One baseline attribute entry.
#[derive(Debug, Clone, Deserialize)]
pub struct AttributeData {
    pub id: String,
    pub base: f64,
    #[serde(default)]
    pub modifiers: Vec<AttributeModifier>,
}
