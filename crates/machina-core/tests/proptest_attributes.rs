//! Property-based tests for attributes, overlays and scaling.

use machina_core::attribute::{
    AttributeInstance, AttributeMap, AttributeModifier, AttributeType, AttributeView,
    ModifierOperation, standard,
};
use machina_core::overlay::OverlayAttributeMap;
use machina_core::persist::AttributeMapRecord;
use machina_core::registry::AttributeRegistry;
use machina_core::scaling::{parallelism, scale_count};
use proptest::prelude::*;
use std::sync::Arc;

// ===========================================================================
// Generators
// ===========================================================================

fn arb_operation() -> impl Strategy<Value = ModifierOperation> {
    prop_oneof![
        Just(ModifierOperation::Addition),
        Just(ModifierOperation::MultiplyBase),
        Just(ModifierOperation::MultiplyTotal),
    ]
}

/// Up to `max` modifiers with distinct ids.
fn arb_modifiers(max: usize) -> impl Strategy<Value = Vec<AttributeModifier>> {
    proptest::collection::vec((-8.0f64..8.0, arb_operation()), 0..=max).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (amount, op))| AttributeModifier::new(format!("m{i}"), amount, op))
            .collect()
    })
}

fn speed() -> AttributeType {
    standard::process_speed()
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    /// The effective value does not depend on the order modifiers arrived in.
    #[test]
    fn standalone_value_ignores_insertion_order(
        base in -100.0f64..100.0,
        modifiers in arb_modifiers(8),
        seed in any::<u64>(),
    ) {
        let mut forward = AttributeInstance::new(speed(), base);
        for m in &modifiers {
            forward.add_modifier(m.clone());
        }

        let mut shuffled = modifiers.clone();
        // Deterministic rotation plus reversal from the seed.
        if !shuffled.is_empty() {
            let by = (seed as usize) % shuffled.len();
            shuffled.rotate_left(by);
        }
        if seed % 2 == 0 {
            shuffled.reverse();
        }
        let mut other = AttributeInstance::new(speed(), base);
        for m in shuffled {
            other.add_modifier(m);
        }

        prop_assert_eq!(forward.value().to_bits(), other.value().to_bits());
    }

    /// Splitting the same modifiers between baseline and overlay in any way
    /// gives the same effective value.
    #[test]
    fn overlay_value_ignores_layer_split(
        base in -50.0f64..50.0,
        modifiers in arb_modifiers(6),
        mask in any::<u8>(),
    ) {
        let mut all_local = AttributeInstance::new(speed(), base);
        for m in &modifiers {
            all_local.add_modifier(m.clone());
        }

        let baseline = Arc::new(AttributeMap::new());
        baseline.set_base(&speed(), base);
        let mut overlay = OverlayAttributeMap::new(Arc::clone(&baseline), 1.0);
        for (i, m) in modifiers.iter().enumerate() {
            if mask & (1 << i) != 0 {
                baseline.add_modifier(&speed(), 1.0, m.clone());
            } else {
                overlay
                    .get_or_create_attribute(&speed(), 1.0)
                    .add_modifier(m.clone());
            }
        }

        prop_assert_eq!(
            overlay.value_of(&speed(), 1.0).to_bits(),
            all_local.value().to_bits()
        );
    }

    /// An overlay with no local changes reads exactly what the baseline reads,
    /// including changes made to the baseline after the overlay was created.
    #[test]
    fn untouched_overlay_is_transparent(
        base in -50.0f64..50.0,
        later_base in -50.0f64..50.0,
        modifiers in arb_modifiers(5),
    ) {
        let baseline = Arc::new(AttributeMap::new());
        baseline.set_base(&speed(), base);
        let mut overlay = OverlayAttributeMap::new(Arc::clone(&baseline), 1.0);
        // Touch the entry so it is wired to the shared instance.
        overlay.get_or_create_attribute(&speed(), 1.0);

        for m in modifiers {
            baseline.add_modifier(&speed(), 1.0, m);
        }
        baseline.set_base(&speed(), later_base);

        prop_assert_eq!(
            overlay.value_of(&speed(), 1.0).to_bits(),
            baseline.value_of(&speed(), 1.0).to_bits()
        );
    }

    /// Local overlay changes never leak into the baseline.
    #[test]
    fn overlay_changes_stay_local(
        base in -50.0f64..50.0,
        override_base in -50.0f64..50.0,
        modifiers in arb_modifiers(5),
    ) {
        let baseline = Arc::new(AttributeMap::new());
        baseline.set_base(&speed(), base);
        let before = baseline.value_of(&speed(), 1.0);

        let mut overlay = OverlayAttributeMap::new(Arc::clone(&baseline), 1.0);
        let instance = overlay.get_or_create_attribute(&speed(), 1.0);
        instance.set_base(override_base);
        for m in modifiers {
            instance.add_modifier(m);
        }

        prop_assert_eq!(baseline.value_of(&speed(), 1.0).to_bits(), before.to_bits());
    }

    /// Scaling never shrinks a positive count and never overflows.
    #[test]
    fn scale_count_is_monotone_and_saturating(base in 1i64..=i64::MAX, k in 0u64..=u64::MAX) {
        let scaled = scale_count(base, k);
        prop_assert!(scaled >= base);
        if k >= 1 {
            if let Some(exact) = base.checked_mul(k as i64).filter(|_| k <= i64::MAX as u64) {
                prop_assert_eq!(scaled, exact);
            } else {
                prop_assert_eq!(scaled, i64::MAX);
            }
        }
    }

    #[test]
    fn parallelism_is_at_least_one(value in proptest::num::f64::ANY) {
        let p = parallelism(value);
        prop_assert!(p >= 1);
        if value.is_finite() && value >= 1.0 {
            prop_assert_eq!(p as f64, value.floor().min(u64::MAX as f64));
        }
    }

    /// A standalone map survives capture and restore with identical values.
    #[test]
    fn standalone_map_survives_persistence(
        speed_base in -10.0f64..10.0,
        parallel_base in 0.0f64..64.0,
        modifiers in arb_modifiers(6),
    ) {
        let map = AttributeMap::new();
        map.set_base(&speed(), speed_base);
        map.set_base(&standard::process_parallelism(), parallel_base);
        for m in modifiers {
            map.add_modifier(&speed(), 1.0, m);
        }

        let record = AttributeMapRecord::from_map(&map);
        let restored = record.restore_map(&AttributeRegistry::default()).unwrap();

        for attribute in map.types() {
            prop_assert_eq!(
                restored.value_of(&attribute, 0.0).to_bits(),
                map.value_of(&attribute, 0.0).to_bits()
            );
        }
        prop_assert_eq!(restored.types(), map.types());
    }
}
