//! Layered numeric attributes.
//!
//! An [`AttributeInstance`] holds a base value plus a set of named
//! [`AttributeModifier`]s. Its effective value is derived on every read by
//! folding the modifiers over the base in a fixed order:
//!
//! 1. every [`ModifierOperation::Addition`]: `acc += amount`
//! 2. every [`ModifierOperation::MultiplyBase`]: `acc += base * amount`
//! 3. every [`ModifierOperation::MultiplyTotal`]: `acc *= 1 + amount`
//!
//! Modifiers are keyed by id in a `BTreeMap`, so within one bucket they are
//! always folded in id order regardless of the order they were added in.
//!
//! An [`AttributeMap`] is the standalone container (a machine's baseline).
//! Per-process layers live in [`crate::overlay`].

use crate::id::NamespacedId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Attribute types
// ---------------------------------------------------------------------------

/// Identifies an attribute (speed, parallelism, ...). Equality and ordering
/// are by id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeType(NamespacedId);

impl AttributeType {
    pub fn new(namespace: &str, path: &str) -> Self {
        Self(NamespacedId::new(namespace, path))
    }

    pub fn from_id(id: NamespacedId) -> Self {
        Self(id)
    }

    pub fn id(&self) -> &NamespacedId {
        &self.0
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Attributes understood by the built-in executor and handlers.
pub mod standard {
    use super::AttributeType;

    pub const NAMESPACE: &str = "machina";

    /// Upper bound on simultaneously active processes in one machine.
    pub fn max_concurrent_processes() -> AttributeType {
        AttributeType::new(NAMESPACE, "max_concurrent_processes")
    }

    /// Number of recipe copies a process runs at once.
    pub fn process_parallelism() -> AttributeType {
        AttributeType::new(NAMESPACE, "process_parallelism")
    }

    /// Progress added per successful tick.
    pub fn process_speed() -> AttributeType {
        AttributeType::new(NAMESPACE, "process_speed")
    }

    pub fn energy_efficiency() -> AttributeType {
        AttributeType::new(NAMESPACE, "energy_efficiency")
    }

    pub fn all() -> Vec<AttributeType> {
        vec![
            max_concurrent_processes(),
            process_parallelism(),
            process_speed(),
            energy_efficiency(),
        ]
    }
}

// ---------------------------------------------------------------------------
// Modifiers
// ---------------------------------------------------------------------------

/// How a modifier combines with the running value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModifierOperation {
    Addition,
    MultiplyBase,
    MultiplyTotal,
}

impl ModifierOperation {
    /// Fold order used by every attribute value computation.
    pub const ORDER: [ModifierOperation; 3] = [
        ModifierOperation::Addition,
        ModifierOperation::MultiplyBase,
        ModifierOperation::MultiplyTotal,
    ];
}

/// An immutable named adjustment to an attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeModifier {
    pub id: String,
    pub amount: f64,
    pub operation: ModifierOperation,
    /// Free-form tag naming whoever added the modifier. Debugging only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<String>,
}

impl AttributeModifier {
    pub fn new(id: impl Into<String>, amount: f64, operation: ModifierOperation) -> Self {
        Self {
            id: id.into(),
            amount,
            operation,
            provenance: None,
        }
    }

    pub fn addition(id: impl Into<String>, amount: f64) -> Self {
        Self::new(id, amount, ModifierOperation::Addition)
    }

    pub fn multiply_base(id: impl Into<String>, amount: f64) -> Self {
        Self::new(id, amount, ModifierOperation::MultiplyBase)
    }

    pub fn multiply_total(id: impl Into<String>, amount: f64) -> Self {
        Self::new(id, amount, ModifierOperation::MultiplyTotal)
    }

    pub fn with_provenance(mut self, provenance: impl Into<String>) -> Self {
        self.provenance = Some(provenance.into());
        self
    }

    /// Apply this modifier to `current`, where `base` is the unmodified base.
    pub fn apply(&self, base: f64, current: f64) -> f64 {
        match self.operation {
            ModifierOperation::Addition => current + self.amount,
            ModifierOperation::MultiplyBase => current + base * self.amount,
            ModifierOperation::MultiplyTotal => current * (1.0 + self.amount),
        }
    }
}

/// Fold `modifiers` over `base`, grouped by operation in [`ModifierOperation::ORDER`].
pub fn compute_value<'a, I>(base: f64, modifiers: I) -> f64
where
    I: IntoIterator<Item = &'a AttributeModifier>,
    I::IntoIter: Clone,
{
    let modifiers = modifiers.into_iter();
    let mut acc = base;
    for op in ModifierOperation::ORDER {
        for modifier in modifiers.clone().filter(|m| m.operation == op) {
            acc = modifier.apply(base, acc);
        }
    }
    acc
}

// ---------------------------------------------------------------------------
// AttributeView
// ---------------------------------------------------------------------------

/// Read/write surface shared by standalone and overlay instances.
pub trait AttributeView {
    fn attribute(&self) -> &AttributeType;

    fn base(&self) -> f64;

    fn set_base(&mut self, base: f64);

    /// Snapshot of every modifier visible through this view, keyed by id.
    fn modifiers(&self) -> BTreeMap<String, AttributeModifier>;

    fn modifier(&self, id: &str) -> Option<AttributeModifier>;

    fn has_modifier(&self, id: &str) -> bool {
        self.modifier(id).is_some()
    }

    /// Add `modifier` unless one with the same id is already present.
    /// Returns `true` if it was inserted; the first registrant wins.
    fn add_modifier(&mut self, modifier: AttributeModifier) -> bool;

    fn remove_modifier(&mut self, id: &str) -> Option<AttributeModifier>;

    /// The effective value. Recomputed on each call.
    fn value(&self) -> f64;
}

// ---------------------------------------------------------------------------
// AttributeInstance
// ---------------------------------------------------------------------------

/// Base value plus modifiers for one attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeInstance {
    attribute: AttributeType,
    base: f64,
    modifiers: BTreeMap<String, AttributeModifier>,
}

impl AttributeInstance {
    pub fn new(attribute: AttributeType, base: f64) -> Self {
        Self {
            attribute,
            base,
            modifiers: BTreeMap::new(),
        }
    }

    /// Iterate modifiers in id order without cloning.
    pub fn iter_modifiers(&self) -> impl Iterator<Item = &AttributeModifier> + Clone {
        self.modifiers.values()
    }

    pub fn modifier_count(&self) -> usize {
        self.modifiers.len()
    }

    pub fn clear_modifiers(&mut self) {
        self.modifiers.clear();
    }
}

impl AttributeView for AttributeInstance {
    fn attribute(&self) -> &AttributeType {
        &self.attribute
    }

    fn base(&self) -> f64 {
        self.base
    }

    fn set_base(&mut self, base: f64) {
        self.base = base;
    }

    fn modifiers(&self) -> BTreeMap<String, AttributeModifier> {
        self.modifiers.clone()
    }

    fn modifier(&self, id: &str) -> Option<AttributeModifier> {
        self.modifiers.get(id).cloned()
    }

    fn has_modifier(&self, id: &str) -> bool {
        self.modifiers.contains_key(id)
    }

    fn add_modifier(&mut self, modifier: AttributeModifier) -> bool {
        if self.modifiers.contains_key(&modifier.id) {
            return false;
        }
        self.modifiers.insert(modifier.id.clone(), modifier);
        true
    }

    fn remove_modifier(&mut self, id: &str) -> Option<AttributeModifier> {
        self.modifiers.remove(id)
    }

    fn value(&self) -> f64 {
        compute_value(self.base, self.modifiers.values())
    }
}

// ---------------------------------------------------------------------------
// AttributeMap (standalone)
// ---------------------------------------------------------------------------

/// A baseline instance shared between its map and any overlays wired to it.
pub type SharedAttribute = Arc<RwLock<AttributeInstance>>;

/// Standalone attribute map: owns base and modifiers for every attribute.
///
/// Instances are handed out as [`SharedAttribute`] handles so overlays built
/// on top of this map observe later changes. The container is lock-guarded so
/// lazy creation from several readers is safe; values themselves are only
/// expected to be written by the owning tick thread.
#[derive(Debug, Default)]
pub struct AttributeMap {
    attributes: RwLock<BTreeMap<AttributeType, SharedAttribute>>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, attribute: &AttributeType) -> Option<SharedAttribute> {
        self.attributes.read().get(attribute).cloned()
    }

    /// Return the instance for `attribute`, creating it with `default_base`
    /// if absent.
    pub fn get_or_create(&self, attribute: &AttributeType, default_base: f64) -> SharedAttribute {
        if let Some(existing) = self.attributes.read().get(attribute) {
            return Arc::clone(existing);
        }
        let mut attributes = self.attributes.write();
        Arc::clone(attributes.entry(attribute.clone()).or_insert_with(|| {
            Arc::new(RwLock::new(AttributeInstance::new(
                attribute.clone(),
                default_base,
            )))
        }))
    }

    /// Insert (or replace) a fully built instance.
    pub fn insert(&self, instance: AttributeInstance) -> SharedAttribute {
        let attribute = instance.attribute().clone();
        let shared = Arc::new(RwLock::new(instance));
        self.attributes.write().insert(attribute, Arc::clone(&shared));
        shared
    }

    pub fn remove(&self, attribute: &AttributeType) -> Option<SharedAttribute> {
        self.attributes.write().remove(attribute)
    }

    pub fn contains(&self, attribute: &AttributeType) -> bool {
        self.attributes.read().contains_key(attribute)
    }

    pub fn clear(&self) {
        self.attributes.write().clear();
    }

    pub fn len(&self) -> usize {
        self.attributes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.read().is_empty()
    }

    /// Attribute types present, in id order.
    pub fn types(&self) -> Vec<AttributeType> {
        self.attributes.read().keys().cloned().collect()
    }

    /// Snapshot of `(type, instance)` handles in id order.
    pub fn entries(&self) -> Vec<(AttributeType, SharedAttribute)> {
        self.attributes
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    /// Effective value of `attribute`, or `default` when absent.
    pub fn value_of(&self, attribute: &AttributeType, default: f64) -> f64 {
        self.get(attribute)
            .map(|instance| instance.read().value())
            .unwrap_or(default)
    }

    /// Set the base of `attribute`, creating it if needed.
    pub fn set_base(&self, attribute: &AttributeType, base: f64) {
        self.get_or_create(attribute, base).write().set_base(base);
    }

    /// Add a modifier to `attribute`, creating it with `default_base` if needed.
    pub fn add_modifier(
        &self,
        attribute: &AttributeType,
        default_base: f64,
        modifier: AttributeModifier,
    ) -> bool {
        self.get_or_create(attribute, default_base)
            .write()
            .add_modifier(modifier)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
