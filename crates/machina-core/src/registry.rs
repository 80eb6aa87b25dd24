use crate::attribute::{AttributeType, standard};
use crate::id::NamespacedId;
use crate::process::Recipe;
use std::collections::HashMap;
use std::sync::Arc;

/// Errors from building or querying registries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("attribute '{0}' is already registered")]
    DuplicateAttribute(NamespacedId),
    #[error("recipe '{0}' is already registered")]
    DuplicateRecipe(String),
    #[error("unknown attribute '{0}'")]
    UnknownAttribute(String),
    #[error("unknown recipe '{0}'")]
    UnknownRecipe(String),
}

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// Builder for an immutable [`AttributeRegistry`]. Starts out with the
/// standard attributes already registered.
#[derive(Debug)]
pub struct AttributeRegistryBuilder {
    attributes: Vec<AttributeType>,
    by_id: HashMap<String, usize>,
}

impl Default for AttributeRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeRegistryBuilder {
    pub fn new() -> Self {
        let mut builder = Self {
            attributes: Vec::new(),
            by_id: HashMap::new(),
        };
        for attribute in standard::all() {
            builder.by_id.insert(attribute.id().to_string(), builder.attributes.len());
            builder.attributes.push(attribute);
        }
        builder
    }

    pub fn register(&mut self, attribute: AttributeType) -> Result<(), RegistryError> {
        let key = attribute.id().to_string();
        if self.by_id.contains_key(&key) {
            return Err(RegistryError::DuplicateAttribute(attribute.id().clone()));
        }
        self.by_id.insert(key, self.attributes.len());
        self.attributes.push(attribute);
        Ok(())
    }

    pub fn build(self) -> AttributeRegistry {
        AttributeRegistry {
            attributes: self.attributes,
            by_id: self.by_id,
        }
    }
}

/// Every attribute type known to the engine. Persisted data naming any other
/// attribute is rejected.
#[derive(Debug, Clone)]
pub struct AttributeRegistry {
    attributes: Vec<AttributeType>,
    by_id: HashMap<String, usize>,
}

impl Default for AttributeRegistry {
    fn default() -> Self {
        AttributeRegistryBuilder::new().build()
    }
}

impl AttributeRegistry {
    /// Look an attribute up by its textual id (`namespace:path`).
    pub fn get(&self, id: &str) -> Option<&AttributeType> {
        self.by_id.get(id).map(|&i| &self.attributes[i])
    }

    /// Like [`get`](Self::get) but an unknown id is an error.
    pub fn resolve(&self, id: &str) -> Result<AttributeType, RegistryError> {
        self.get(id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownAttribute(id.to_string()))
    }

    pub fn contains(&self, attribute: &AttributeType) -> bool {
        self.by_id.contains_key(&attribute.id().to_string())
    }

    /// Attributes in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &AttributeType> {
        self.attributes.iter()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Recipes
// ---------------------------------------------------------------------------

/// Recipes by id, shared with the processes running them.
#[derive(Debug, Clone, Default)]
pub struct RecipeRegistry {
    recipes: HashMap<String, Arc<Recipe>>,
}

impl RecipeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, recipe: Recipe) -> Result<Arc<Recipe>, RegistryError> {
        if self.recipes.contains_key(&recipe.id) {
            return Err(RegistryError::DuplicateRecipe(recipe.id));
        }
        let recipe = Arc::new(recipe);
        self.recipes.insert(recipe.id.clone(), Arc::clone(&recipe));
        Ok(recipe)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Recipe>> {
        self.recipes.get(id)
    }

    pub fn resolve(&self, id: &str) -> Result<Arc<Recipe>, RegistryError> {
        self.get(id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownRecipe(id.to_string()))
    }

    /// Recipe ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.recipes.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_attributes_are_preregistered() {
        let registry = AttributeRegistry::default();
        assert_eq!(registry.len(), standard::all().len());
        assert_eq!(
            registry.get("machina:process_speed"),
            Some(&standard::process_speed())
        );
    }

    #[test]
    fn custom_attribute_registration() {
        let mut builder = AttributeRegistryBuilder::new();
        let heat = AttributeType::new("mymod", "heat");
        builder.register(heat.clone()).unwrap();
        assert_eq!(
            builder.register(heat.clone()),
            Err(RegistryError::DuplicateAttribute(heat.id().clone()))
        );
        let registry = builder.build();
        assert!(registry.contains(&heat));
        assert_eq!(registry.resolve("mymod:heat").unwrap(), heat);
        assert_eq!(
            registry.resolve("mymod:cold"),
            Err(RegistryError::UnknownAttribute("mymod:cold".into()))
        );
    }

    #[test]
    fn recipe_registry_rejects_duplicates() {
        let mut recipes = RecipeRegistry::new();
        recipes.register(Recipe::new("b", 10)).unwrap();
        recipes.register(Recipe::new("a", 5)).unwrap();
        assert_eq!(
            recipes.register(Recipe::new("a", 1)).unwrap_err(),
            RegistryError::DuplicateRecipe("a".into())
        );
        assert_eq!(recipes.ids(), vec!["a", "b"]);
        assert_eq!(recipes.resolve("a").unwrap().duration_ticks, 5);
        assert!(recipes.resolve("zzz").is_err());
    }
}
