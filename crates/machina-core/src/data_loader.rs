//! Data-driven recipe loading.
//!
//! Feature-gated behind `data-loader`. The [`RecipeSetData`] schema is plain
//! serde, so other front ends (RON, TOML) can deserialize it and call
//! [`RecipeSetData::into_registry`]; this module only adds the JSON entry
//! points.

use crate::id::{IdParseError, NamespacedId, RequirementKind};
use crate::process::Recipe;
use crate::registry::{RecipeRegistry, RegistryError};
use crate::requirement::{RequirementComponent, RequirementSpec};
use std::collections::HashSet;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("recipe '{recipe}', requirement '{requirement}': invalid kind: {source}")]
    InvalidKind {
        recipe: String,
        requirement: String,
        source: IdParseError,
    },
    #[error("recipe '{recipe}', requirement '{requirement}': custom requirements need an explicit kind")]
    MissingKind { recipe: String, requirement: String },
    #[error("recipe '{recipe}' declares requirement '{requirement}' twice")]
    DuplicateRequirement { recipe: String, requirement: String },
}

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// Top-level recipe file.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RecipeSetData {
    #[serde(default)]
    pub recipes: Vec<RecipeData>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RecipeData {
    pub id: String,
    pub duration_ticks: i32,
    #[serde(default)]
    pub requirements: Vec<RequirementData>,
}

/// A requirement as written in data files. `kind` may be omitted for the
/// built-in payloads.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RequirementData {
    pub id: String,
    #[serde(default)]
    pub kind: Option<String>,
    pub spec: RequirementSpec,
}

impl RequirementData {
    fn into_component(self, recipe: &str) -> Result<RequirementComponent, DataLoadError> {
        let kind = match &self.kind {
            Some(text) => RequirementKind(text.parse::<NamespacedId>().map_err(|source| {
                DataLoadError::InvalidKind {
                    recipe: recipe.to_string(),
                    requirement: self.id.clone(),
                    source,
                }
            })?),
            None => self
                .spec
                .default_kind()
                .ok_or_else(|| DataLoadError::MissingKind {
                    recipe: recipe.to_string(),
                    requirement: self.id.clone(),
                })?,
        };
        Ok(RequirementComponent::new(self.id, kind, self.spec))
    }
}

impl RecipeData {
    pub fn into_recipe(self) -> Result<Recipe, DataLoadError> {
        let mut recipe = Recipe::new(self.id, self.duration_ticks);
        let mut seen = HashSet::new();
        for requirement in self.requirements {
            if !seen.insert(requirement.id.clone()) {
                return Err(DataLoadError::DuplicateRequirement {
                    recipe: recipe.id.clone(),
                    requirement: requirement.id,
                });
            }
            let component = requirement.into_component(&recipe.id)?;
            recipe.add_requirement(component);
        }
        Ok(recipe)
    }
}

impl RecipeSetData {
    pub fn into_registry(self) -> Result<RecipeRegistry, DataLoadError> {
        let mut registry = RecipeRegistry::new();
        for data in self.recipes {
            registry.register(data.into_recipe()?)?;
        }
        Ok(registry)
    }
}

// ---------------------------------------------------------------------------
// Loading functions
// ---------------------------------------------------------------------------

/// Load recipes from a JSON string.
pub fn load_recipes_json(json: &str) -> Result<RecipeRegistry, DataLoadError> {
    let data: RecipeSetData = serde_json::from_str(json)?;
    data.into_registry()
}

/// Load recipes from JSON bytes.
pub fn load_recipes_json_bytes(bytes: &[u8]) -> Result<RecipeRegistry, DataLoadError> {
    let data: RecipeSetData = serde_json::from_slice(bytes)?;
    data.into_registry()
}
