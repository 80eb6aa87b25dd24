//! Resource containers and the ports a machine exposes them through.

use machina_core::id::NamespacedId;
use serde::{Deserialize, Serialize};

/// Direction of a port from the machine's point of view: recipes extract
/// from `Input` ports and insert into `Output` ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortMode {
    Input,
    Output,
}

/// Counted storage for resources identified by [`NamespacedId`].
///
/// `available` and `space_for` are pure queries used during evaluation;
/// `extract` and `insert` move at most the requested amount and return what
/// actually moved.
pub trait ResourceStore {
    fn available(&self, resource: &NamespacedId) -> i64;

    fn space_for(&self, resource: &NamespacedId) -> i64;

    fn extract(&mut self, resource: &NamespacedId, amount: i64) -> i64;

    fn insert(&mut self, resource: &NamespacedId, amount: i64) -> i64;
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub item: NamespacedId,
    pub count: i64,
}

impl ItemStack {
    pub fn new(item: NamespacedId, count: i64) -> Self {
        Self { item, count }
    }
}

/// Fixed number of slots, each holding one item type up to `slot_limit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemContainer {
    slot_limit: i64,
    slots: Vec<Option<ItemStack>>,
}

impl ItemContainer {
    pub fn new(slots: usize, slot_limit: i64) -> Self {
        Self {
            slot_limit: slot_limit.max(0),
            slots: vec![None; slots],
        }
    }

    /// Put `stack` into `slot`, replacing whatever was there. Out-of-range
    /// slots are ignored.
    pub fn with_stack(mut self, slot: usize, stack: ItemStack) -> Self {
        self.set_slot(slot, Some(stack));
        self
    }

    pub fn set_slot(&mut self, slot: usize, stack: Option<ItemStack>) {
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = stack.filter(|s| s.count > 0);
        }
    }

    pub fn slot(&self, slot: usize) -> Option<&ItemStack> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_limit(&self) -> i64 {
        self.slot_limit
    }
}

impl ResourceStore for ItemContainer {
    fn available(&self, resource: &NamespacedId) -> i64 {
        self.slots
            .iter()
            .flatten()
            .filter(|s| &s.item == resource)
            .fold(0i64, |acc, s| acc.saturating_add(s.count))
    }

    fn space_for(&self, resource: &NamespacedId) -> i64 {
        self.slots.iter().fold(0i64, |acc, slot| {
            let room = match slot {
                Some(stack) if &stack.item == resource => self.slot_limit - stack.count,
                Some(_) => 0,
                None => self.slot_limit,
            };
            acc.saturating_add(room.max(0))
        })
    }

    fn extract(&mut self, resource: &NamespacedId, amount: i64) -> i64 {
        let mut remaining = amount.max(0);
        for slot in &mut self.slots {
            if remaining == 0 {
                break;
            }
            let Some(stack) = slot else { continue };
            if &stack.item != resource {
                continue;
            }
            let took = stack.count.min(remaining);
            stack.count -= took;
            remaining -= took;
            if stack.count == 0 {
                *slot = None;
            }
        }
        amount.max(0) - remaining
    }

    fn insert(&mut self, resource: &NamespacedId, amount: i64) -> i64 {
        let limit = self.slot_limit;
        let mut remaining = amount.max(0);
        // Top up matching stacks before opening empty slots.
        for stack in self.slots.iter_mut().flatten() {
            if remaining == 0 {
                break;
            }
            if &stack.item == resource {
                let put = (limit - stack.count).max(0).min(remaining);
                stack.count += put;
                remaining -= put;
            }
        }
        for slot in &mut self.slots {
            if remaining == 0 || limit == 0 {
                break;
            }
            if slot.is_none() {
                let put = limit.min(remaining);
                *slot = Some(ItemStack::new(resource.clone(), put));
                remaining -= put;
            }
        }
        amount.max(0) - remaining
    }
}

// ---------------------------------------------------------------------------
// Fluids
// ---------------------------------------------------------------------------

/// A single-fluid tank. An empty tank accepts any fluid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FluidTank {
    pub capacity: i64,
    #[serde(default)]
    pub fluid: Option<NamespacedId>,
    #[serde(default)]
    pub amount: i64,
}

impl FluidTank {
    pub fn empty(capacity: i64) -> Self {
        Self {
            capacity: capacity.max(0),
            fluid: None,
            amount: 0,
        }
    }

    pub fn filled(capacity: i64, fluid: NamespacedId, amount: i64) -> Self {
        let amount = amount.clamp(0, capacity.max(0));
        Self {
            capacity: capacity.max(0),
            fluid: (amount > 0).then_some(fluid),
            amount,
        }
    }

    fn holds(&self, resource: &NamespacedId) -> bool {
        self.fluid.as_ref() == Some(resource)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FluidContainer {
    tanks: Vec<FluidTank>,
}

impl FluidContainer {
    pub fn new(tanks: Vec<FluidTank>) -> Self {
        Self { tanks }
    }

    pub fn tanks(&self) -> &[FluidTank] {
        &self.tanks
    }
}

impl ResourceStore for FluidContainer {
    fn available(&self, resource: &NamespacedId) -> i64 {
        self.tanks
            .iter()
            .filter(|t| t.holds(resource))
            .fold(0i64, |acc, t| acc.saturating_add(t.amount))
    }

    fn space_for(&self, resource: &NamespacedId) -> i64 {
        self.tanks.iter().fold(0i64, |acc, t| {
            let room = if t.fluid.is_none() || t.holds(resource) {
                t.capacity - t.amount
            } else {
                0
            };
            acc.saturating_add(room.max(0))
        })
    }

    fn extract(&mut self, resource: &NamespacedId, amount: i64) -> i64 {
        let mut remaining = amount.max(0);
        for tank in self.tanks.iter_mut().filter(|t| t.holds(resource)) {
            if remaining == 0 {
                break;
            }
            let took = tank.amount.min(remaining);
            tank.amount -= took;
            remaining -= took;
            if tank.amount == 0 {
                tank.fluid = None;
            }
        }
        amount.max(0) - remaining
    }

    fn insert(&mut self, resource: &NamespacedId, amount: i64) -> i64 {
        let mut remaining = amount.max(0);
        // Tanks already holding the fluid first, then empty ones.
        for pass_empty in [false, true] {
            for tank in &mut self.tanks {
                if remaining == 0 {
                    break;
                }
                let eligible = if pass_empty {
                    tank.fluid.is_none()
                } else {
                    tank.holds(resource)
                };
                if !eligible {
                    continue;
                }
                let put = (tank.capacity - tank.amount).max(0).min(remaining);
                if put > 0 {
                    tank.fluid = Some(resource.clone());
                    tank.amount += put;
                    remaining -= put;
                }
            }
        }
        amount.max(0) - remaining
    }
}

// ---------------------------------------------------------------------------
// Energy
// ---------------------------------------------------------------------------

/// The resource id energy transfers are recorded under.
pub fn energy_resource() -> NamespacedId {
    NamespacedId::new("machina", "energy")
}

/// A plain energy buffer. The resource argument of [`ResourceStore`] is
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnergyBuffer {
    pub capacity: i64,
    #[serde(default)]
    pub stored: i64,
}

impl EnergyBuffer {
    pub fn new(capacity: i64, stored: i64) -> Self {
        let capacity = capacity.max(0);
        Self {
            capacity,
            stored: stored.clamp(0, capacity),
        }
    }
}

impl ResourceStore for EnergyBuffer {
    fn available(&self, _resource: &NamespacedId) -> i64 {
        self.stored
    }

    fn space_for(&self, _resource: &NamespacedId) -> i64 {
        (self.capacity - self.stored).max(0)
    }

    fn extract(&mut self, _resource: &NamespacedId, amount: i64) -> i64 {
        let took = self.stored.min(amount.max(0));
        self.stored -= took;
        took
    }

    fn insert(&mut self, resource: &NamespacedId, amount: i64) -> i64 {
        let put = self.space_for(resource).min(amount.max(0));
        self.stored += put;
        put
    }
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port<C> {
    pub name: String,
    pub mode: PortMode,
    pub container: C,
}

impl<C> Port<C> {
    pub fn new(name: impl Into<String>, mode: PortMode, container: C) -> Self {
        Self {
            name: name.into(),
            mode,
            container,
        }
    }
}

/// Every resource port of one machine, grouped by resource family. Port
/// order is the order handlers visit them in.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MachinePorts {
    #[serde(default)]
    pub items: Vec<Port<ItemContainer>>,
    #[serde(default)]
    pub fluids: Vec<Port<FluidContainer>>,
    #[serde(default)]
    pub energy: Vec<Port<EnergyBuffer>>,
}

impl MachinePorts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(mut self, name: &str, mode: PortMode, container: ItemContainer) -> Self {
        self.items.push(Port::new(name, mode, container));
        self
    }

    pub fn with_fluids(mut self, name: &str, mode: PortMode, container: FluidContainer) -> Self {
        self.fluids.push(Port::new(name, mode, container));
        self
    }

    pub fn with_energy(mut self, name: &str, mode: PortMode, buffer: EnergyBuffer) -> Self {
        self.energy.push(Port::new(name, mode, buffer));
        self
    }

    pub fn item_port(&self, name: &str) -> Option<&Port<ItemContainer>> {
        self.items.iter().find(|p| p.name == name)
    }

    pub fn fluid_port(&self, name: &str) -> Option<&Port<FluidContainer>> {
        self.fluids.iter().find(|p| p.name == name)
    }

    pub fn energy_port(&self, name: &str) -> Option<&Port<EnergyBuffer>> {
        self.energy.iter().find(|p| p.name == name)
    }
}

/// A world that exposes machine ports to the resource handlers.
pub trait HasPorts {
    fn ports(&self) -> &MachinePorts;

    fn ports_mut(&mut self) -> &mut MachinePorts;
}

impl HasPorts for MachinePorts {
    fn ports(&self) -> &MachinePorts {
        self
    }

    fn ports_mut(&mut self) -> &mut MachinePorts {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iron() -> NamespacedId {
        NamespacedId::new("minecraft", "iron_ingot")
    }

    fn gold() -> NamespacedId {
        NamespacedId::new("minecraft", "gold_ingot")
    }

    fn water() -> NamespacedId {
        NamespacedId::new("minecraft", "water")
    }

    #[test]
    fn item_container_counts_and_space() {
        let c = ItemContainer::new(3, 64)
            .with_stack(0, ItemStack::new(iron(), 60))
            .with_stack(1, ItemStack::new(gold(), 10));
        assert_eq!(c.available(&iron()), 60);
        // 4 left in slot 0 plus the empty slot 2.
        assert_eq!(c.space_for(&iron()), 68);
        assert_eq!(c.space_for(&gold()), 118);
    }

    #[test]
    fn item_insert_tops_up_before_using_empty_slots() {
        let mut c = ItemContainer::new(2, 64).with_stack(1, ItemStack::new(iron(), 60));
        assert_eq!(c.insert(&iron(), 10), 10);
        assert_eq!(c.slot(1).unwrap().count, 64);
        assert_eq!(c.slot(0).unwrap().count, 6);
    }

    #[test]
    fn item_extract_clears_empty_slots() {
        let mut c = ItemContainer::new(2, 64)
            .with_stack(0, ItemStack::new(iron(), 3))
            .with_stack(1, ItemStack::new(iron(), 5));
        assert_eq!(c.extract(&iron(), 4), 4);
        assert!(c.slot(0).is_none());
        assert_eq!(c.slot(1).unwrap().count, 4);
        assert_eq!(c.extract(&iron(), 100), 4);
        assert_eq!(c.extract(&gold(), 1), 0);
    }

    #[test]
    fn fluid_tanks_hold_one_fluid_each() {
        let mut c = FluidContainer::new(vec![
            FluidTank::filled(1000, water(), 400),
            FluidTank::empty(1000),
        ]);
        let lava = NamespacedId::new("minecraft", "lava");
        assert_eq!(c.space_for(&water()), 1600);
        assert_eq!(c.space_for(&lava), 1000);

        assert_eq!(c.insert(&lava, 1500), 1000);
        assert_eq!(c.space_for(&water()), 600);
        assert_eq!(c.extract(&water(), 500), 400);
        assert!(c.tanks()[0].fluid.is_none());
    }

    #[test]
    fn energy_buffer_clamps() {
        let mut e = EnergyBuffer::new(100, 250);
        assert_eq!(e.stored, 100);
        assert_eq!(e.insert(&energy_resource(), 10), 0);
        assert_eq!(e.extract(&energy_resource(), 30), 30);
        assert_eq!(e.space_for(&energy_resource()), 30);
        assert_eq!(e.extract(&energy_resource(), -5), 0);
    }

    #[test]
    fn ports_are_found_by_name() {
        let ports = MachinePorts::new()
            .with_items("in", PortMode::Input, ItemContainer::new(1, 64))
            .with_energy("battery", PortMode::Input, EnergyBuffer::new(10, 0));
        assert_eq!(ports.item_port("in").unwrap().mode, PortMode::Input);
        assert!(ports.item_port("out").is_none());
        assert!(ports.energy_port("battery").is_some());
        assert!(ports.fluid_port("battery").is_none());
    }
}
