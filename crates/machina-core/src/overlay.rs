//! Per-owner attribute layers over a shared baseline.
//!
//! Every process gets an [`OverlayAttributeMap`] whose parent is the owning
//! machine's baseline [`AttributeMap`]. Reads fall through to the parent
//! unless the overlay has a base override or local modifiers; writes never
//! touch the parent.
//!
//! Only local changes are persisted (see [`crate::persist`]), so the shared
//! baseline is not duplicated into every process save.

use crate::attribute::{
    AttributeInstance, AttributeMap, AttributeModifier, AttributeType, AttributeView,
    SharedAttribute, compute_value,
};
use std::collections::BTreeMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// OverlayAttributeInstance
// ---------------------------------------------------------------------------

/// An attribute view layering local modifiers (and optionally a base
/// override) over a parent instance.
#[derive(Debug, Clone)]
pub struct OverlayAttributeInstance {
    local: AttributeInstance,
    parent: Option<SharedAttribute>,
    base_override: Option<f64>,
}

impl OverlayAttributeInstance {
    /// `base_when_no_parent` is only consulted when `parent` is `None`.
    pub fn new(
        attribute: AttributeType,
        parent: Option<SharedAttribute>,
        base_when_no_parent: f64,
    ) -> Self {
        Self {
            local: AttributeInstance::new(attribute, base_when_no_parent),
            parent,
            base_override: None,
        }
    }

    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    pub fn base_override(&self) -> Option<f64> {
        self.base_override
    }

    /// Set or clear the base override directly.
    pub fn set_base_override(&mut self, value: Option<f64>) {
        self.base_override = value;
    }

    pub fn local_modifiers(&self) -> impl Iterator<Item = &AttributeModifier> + Clone {
        self.local.iter_modifiers()
    }

    /// Whether this entry carries anything the parent does not provide.
    /// Without a parent the local base is the source of truth, so it always
    /// counts as changed.
    pub fn has_local_changes(&self) -> bool {
        if self.parent.is_none() {
            return true;
        }
        self.base_override.is_some() || self.local.modifier_count() > 0
    }

    pub fn clear_local_modifiers(&mut self) {
        self.local.clear_modifiers();
    }
}

impl AttributeView for OverlayAttributeInstance {
    fn attribute(&self) -> &AttributeType {
        self.local.attribute()
    }

    fn base(&self) -> f64 {
        if let Some(base) = self.base_override {
            return base;
        }
        match &self.parent {
            Some(parent) => parent.read().base(),
            None => self.local.base(),
        }
    }

    fn set_base(&mut self, base: f64) {
        if self.parent.is_some() {
            self.base_override = Some(base);
        } else {
            self.local.set_base(base);
        }
    }

    fn modifiers(&self) -> BTreeMap<String, AttributeModifier> {
        let mut merged = match &self.parent {
            Some(parent) => parent.read().modifiers(),
            None => BTreeMap::new(),
        };
        for modifier in self.local.iter_modifiers() {
            merged.insert(modifier.id.clone(), modifier.clone());
        }
        merged
    }

    fn modifier(&self, id: &str) -> Option<AttributeModifier> {
        self.local
            .modifier(id)
            .or_else(|| self.parent.as_ref().and_then(|p| p.read().modifier(id)))
    }

    /// Adds to the local layer. A parent modifier with the same id does not
    /// block the insert: the local one shadows it in the merged view.
    fn add_modifier(&mut self, modifier: AttributeModifier) -> bool {
        self.local.add_modifier(modifier)
    }

    /// Removes from the local layer only.
    fn remove_modifier(&mut self, id: &str) -> Option<AttributeModifier> {
        self.local.remove_modifier(id)
    }

    fn value(&self) -> f64 {
        let merged = self.modifiers();
        compute_value(self.base(), merged.values())
    }
}

// ---------------------------------------------------------------------------
// OverlayAttributeMap
// ---------------------------------------------------------------------------

/// Attribute map layering per-owner changes over a parent map.
#[derive(Debug, Clone)]
pub struct OverlayAttributeMap {
    parent: Arc<AttributeMap>,
    default_base: f64,
    local: BTreeMap<AttributeType, OverlayAttributeInstance>,
}

impl OverlayAttributeMap {
    pub fn new(parent: Arc<AttributeMap>, default_base: f64) -> Self {
        Self {
            parent,
            default_base,
            local: BTreeMap::new(),
        }
    }

    pub fn parent(&self) -> &Arc<AttributeMap> {
        &self.parent
    }

    pub fn default_base(&self) -> f64 {
        self.default_base
    }

    /// The overlay entry for `attribute`, created only if the overlay or the
    /// parent already knows the attribute.
    pub fn get_attribute(&mut self, attribute: &AttributeType) -> Option<&mut OverlayAttributeInstance> {
        if !self.local.contains_key(attribute) && !self.parent.contains(attribute) {
            return None;
        }
        Some(self.get_or_create_attribute(attribute, self.default_base))
    }

    /// The overlay entry for `attribute`, wired to the parent's instance of
    /// the same type when one exists. Without a parent instance the entry
    /// starts at `default_base`.
    pub fn get_or_create_attribute(
        &mut self,
        attribute: &AttributeType,
        default_base: f64,
    ) -> &mut OverlayAttributeInstance {
        let parent = &self.parent;
        self.local.entry(attribute.clone()).or_insert_with(|| {
            let parent_instance = parent.get(attribute);
            let base = parent_instance
                .as_ref()
                .map(|p| p.read().base())
                .unwrap_or(default_base);
            OverlayAttributeInstance::new(attribute.clone(), parent_instance, base)
        })
    }

    /// Effective value of `attribute` without creating an entry: the local
    /// entry if any, else the parent's value, else `default`.
    pub fn value_of(&self, attribute: &AttributeType, default: f64) -> f64 {
        if let Some(local) = self.local.get(attribute) {
            return local.value();
        }
        self.parent.value_of(attribute, default)
    }

    /// Every attribute visible through this overlay, in id order.
    pub fn types(&self) -> Vec<AttributeType> {
        let mut types = self.parent.types();
        for attribute in self.local.keys() {
            if !types.contains(attribute) {
                types.push(attribute.clone());
            }
        }
        types.sort();
        types
    }

    pub fn local_instances(&self) -> impl Iterator<Item = (&AttributeType, &OverlayAttributeInstance)> {
        self.local.iter()
    }

    pub fn clear_local(&mut self) {
        self.local.clear();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
