//! Property-based tests for broad-phase pair bookkeeping.
//!
//! Run with: cargo test -p sim-core -- proptest

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use nalgebra::{Point3, Vector3};
use proptest::prelude::*;
use sim_core::{
    BroadPhaseAlgorithm, BroadPhaseConfig, CollisionShape, Pose, RigidBody, World, WorldConfig,
};

// =============================================================================
// Strategies
// =============================================================================

fn arb_position() -> impl Strategy<Value = [f64; 3]> {
    prop::array::uniform3(-4.0..4.0f64)
}

fn arb_scene() -> impl Strategy<Value = Vec<([f64; 3], bool)>> {
    prop::collection::vec((arb_position(), any::<bool>()), 2..24)
}

fn build(scene: &[([f64; 3], bool)], algorithm: BroadPhaseAlgorithm) -> World {
    let config = WorldConfig::default()
        .zero_gravity()
        .with_broad_phase(BroadPhaseConfig::default().with_algorithm(algorithm));
    let mut world = World::new(config).unwrap();
    for &([x, y, z], is_box) in scene {
        let shape = if is_box {
            CollisionShape::cuboid(Vector3::new(0.4, 0.6, 0.5))
        } else {
            CollisionShape::sphere(0.5)
        };
        world.add_body(RigidBody::dynamic(
            Arc::new(shape),
            1.0,
            Pose::from_position(Point3::new(x, y, z)),
        ));
    }
    world
}

fn pair_keys(world: &World) -> Vec<(u64, u64)> {
    world
        .broad_phase()
        .pair_cache()
        .pairs()
        .iter()
        .map(|p| (p.proxy0.0, p.proxy1.0))
        .collect()
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn proptest_pairs_are_canonical_and_sorted(scene in arb_scene()) {
        let mut world = build(&scene, BroadPhaseAlgorithm::Auto);
        world.step_simulation(1.0 / 60.0, 1, 1.0 / 60.0).unwrap();

        let keys = pair_keys(&world);
        for &(a, b) in &keys {
            prop_assert!(a < b);
        }
        for window in keys.windows(2) {
            prop_assert!(window[0] < window[1]);
        }
    }

    #[test]
    fn proptest_algorithms_find_same_pairs(scene in arb_scene()) {
        let mut brute = build(&scene, BroadPhaseAlgorithm::BruteForce);
        let mut sweep = build(&scene, BroadPhaseAlgorithm::SweepAndPrune);
        brute.step_simulation(1.0 / 60.0, 1, 1.0 / 60.0).unwrap();
        sweep.step_simulation(1.0 / 60.0, 1, 1.0 / 60.0).unwrap();

        prop_assert_eq!(pair_keys(&brute), pair_keys(&sweep));
    }

    #[test]
    fn proptest_manifolds_match_pairs(scene in arb_scene()) {
        let mut world = build(&scene, BroadPhaseAlgorithm::Auto);
        for _ in 0..3 {
            world.step_simulation(1.0 / 60.0, 1, 1.0 / 60.0).unwrap();
        }

        let with_manifold = world
            .broad_phase()
            .pair_cache()
            .pairs()
            .iter()
            .filter(|p| p.manifold.is_some())
            .count();
        prop_assert_eq!(with_manifold, world.num_manifolds());
        for (_, manifold) in world.manifolds() {
            prop_assert!(manifold.body0() != manifold.body1());
            prop_assert!(manifold.num_contacts() <= 4);
        }
    }
}
