//! Collision dispatcher: algorithm table and manifold ownership.
//!
//! The dispatch table maps a `(ShapeType, ShapeType)` pair to a narrow-phase
//! algorithm. It is built once. Only pairs with `a <= b` in ordinal order are
//! registered; the mirrored cell points at the same algorithm with
//! `swapped` set, and the narrow phase exchanges the two bodies before
//! calling it.
//!
//! Manifolds live in a slab owned by the dispatcher and are referred to by
//! [`ManifoldHandle`]. The broad phase attaches handles to its pairs and
//! tells the dispatcher (through [`DispatcherPairCallback`]) when a pair is
//! retired, which is the only way a manifold is released.

use hashbrown::HashSet;
use sim_contact::{ContactHooks, PersistentManifold};
use sim_types::BodyHandle;
use tracing::warn;

use crate::broad_phase::{BroadphaseProxy, OverlappingPair, PairCallback};
use crate::rigid_body::RigidBody;
use crate::shape::ShapeType;

/// Stable reference to a manifold in the dispatcher's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManifoldHandle(u32);

impl ManifoldHandle {
    /// Slot index in the pool.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Narrow-phase algorithm kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgorithmKind {
    /// Produces no contacts.
    Empty,
    /// Sphere against sphere.
    SphereSphere,
    /// Box against sphere.
    BoxSphere,
    /// Box against box, separating axes with face clipping.
    BoxBox,
    /// Convex shape against a static plane.
    ConvexPlane,
}

/// One cell of the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchEntry {
    /// Algorithm to run.
    pub algorithm: AlgorithmKind,
    /// The algorithm expects the pair's bodies in the opposite order.
    pub swapped: bool,
}

impl DispatchEntry {
    const EMPTY: Self = Self {
        algorithm: AlgorithmKind::Empty,
        swapped: false,
    };
}

/// Symmetric `(ShapeType, ShapeType) -> algorithm` table.
#[derive(Debug, Clone)]
pub struct DispatchTable {
    cells: [[DispatchEntry; ShapeType::COUNT]; ShapeType::COUNT],
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchTable {
    /// Table with the built-in algorithms registered.
    #[must_use]
    pub fn new() -> Self {
        let mut table = Self {
            cells: [[DispatchEntry::EMPTY; ShapeType::COUNT]; ShapeType::COUNT],
        };
        table.register(ShapeType::Box, ShapeType::Box, AlgorithmKind::BoxBox);
        table.register(ShapeType::Box, ShapeType::Sphere, AlgorithmKind::BoxSphere);
        table.register(ShapeType::Box, ShapeType::StaticPlane, AlgorithmKind::ConvexPlane);
        table.register(ShapeType::Sphere, ShapeType::Sphere, AlgorithmKind::SphereSphere);
        table.register(ShapeType::Sphere, ShapeType::StaticPlane, AlgorithmKind::ConvexPlane);
        table.register(ShapeType::StaticPlane, ShapeType::StaticPlane, AlgorithmKind::Empty);
        table
    }

    /// Register an algorithm for `a <= b`; the mirrored cell is derived.
    pub fn register(&mut self, a: ShapeType, b: ShapeType, algorithm: AlgorithmKind) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        self.cells[lo.ordinal()][hi.ordinal()] = DispatchEntry {
            algorithm,
            swapped: false,
        };
        self.cells[hi.ordinal()][lo.ordinal()] = DispatchEntry {
            algorithm,
            swapped: lo != hi,
        };
    }

    /// Look up the entry for a pair in the given order.
    #[must_use]
    pub fn find(&self, a: ShapeType, b: ShapeType) -> DispatchEntry {
        self.cells[a.ordinal()][b.ordinal()]
    }
}

/// Owns the dispatch table and every persistent manifold.
#[derive(Debug, Clone, Default)]
pub struct CollisionDispatcher {
    table: DispatchTable,
    slots: Vec<Option<PersistentManifold>>,
    free: Vec<u32>,
    live: usize,
}

impl CollisionDispatcher {
    /// Dispatcher with the built-in algorithms and an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Algorithm for a shape pair.
    #[must_use]
    pub fn find_algorithm(&self, a: ShapeType, b: ShapeType) -> DispatchEntry {
        self.table.find(a, b)
    }

    /// Allocate a manifold for two bodies.
    pub fn get_new_manifold(
        &mut self,
        body0: BodyHandle,
        body1: BodyHandle,
        contact_breaking_threshold: f64,
        contact_processing_threshold: f64,
    ) -> ManifoldHandle {
        let manifold = PersistentManifold::new(
            body0,
            body1,
            contact_breaking_threshold,
            contact_processing_threshold,
        );
        self.live += 1;
        if let Some(slot) = self.free.pop() {
            self.slots[slot as usize] = Some(manifold);
            ManifoldHandle(slot)
        } else {
            let slot = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            self.slots.push(Some(manifold));
            ManifoldHandle(slot)
        }
    }

    /// Clear a manifold (firing contact-ended if it had points) and free it.
    pub fn release_manifold(&mut self, handle: ManifoldHandle, hooks: &ContactHooks) {
        let Some(mut manifold) = self.slots.get_mut(handle.index()).and_then(Option::take) else {
            warn!(manifold = handle.index(), "released a manifold that does not exist");
            return;
        };
        manifold.clear_manifold(hooks);
        self.live -= 1;
        self.free.push(handle.0);
    }

    /// Look up a manifold.
    #[must_use]
    pub fn manifold(&self, handle: ManifoldHandle) -> Option<&PersistentManifold> {
        self.slots.get(handle.index()).and_then(Option::as_ref)
    }

    /// Look up a manifold mutably.
    pub fn manifold_mut(&mut self, handle: ManifoldHandle) -> Option<&mut PersistentManifold> {
        self.slots.get_mut(handle.index()).and_then(Option::as_mut)
    }

    /// Number of live manifolds.
    #[must_use]
    pub fn num_manifolds(&self) -> usize {
        self.live
    }

    /// Live manifolds in slot order.
    pub fn manifolds(&self) -> impl Iterator<Item = (ManifoldHandle, &PersistentManifold)> {
        self.slots.iter().enumerate().filter_map(|(i, m)| {
            m.as_ref()
                .map(|m| (ManifoldHandle(u32::try_from(i).unwrap_or(u32::MAX)), m))
        })
    }

    /// Mutable references to a set of distinct manifolds, in the given order.
    ///
    /// Unknown or repeated handles are skipped.
    pub fn manifolds_mut(&mut self, handles: &[ManifoldHandle]) -> Vec<&mut PersistentManifold> {
        let mut wanted: Vec<Option<usize>> = vec![None; self.slots.len()];
        for (order, handle) in handles.iter().enumerate() {
            if let Some(cell) = wanted.get_mut(handle.index()) {
                cell.get_or_insert(order);
            }
        }
        let mut picked: Vec<(usize, &mut PersistentManifold)> = self
            .slots
            .iter_mut()
            .zip(wanted)
            .filter_map(|(slot, order)| Some((order?, slot.as_mut()?)))
            .collect();
        picked.sort_unstable_by_key(|(order, _)| *order);
        picked.into_iter().map(|(_, m)| m).collect()
    }

    /// Whether the narrow phase should run for two bodies this step.
    ///
    /// At least one must be awake and neither may have simulation disabled.
    #[must_use]
    pub fn needs_collision(a: &RigidBody, b: &RigidBody) -> bool {
        use sim_types::ActivationState::DisableSimulation;
        if a.activation_state() == DisableSimulation || b.activation_state() == DisableSimulation {
            return false;
        }
        a.is_active() || b.is_active()
    }

    /// Whether contacts between two bodies are handed to the solver.
    #[must_use]
    pub fn needs_response(a: &RigidBody, b: &RigidBody) -> bool {
        a.has_contact_response()
            && b.has_contact_response()
            && !(a.is_static_or_kinematic() && b.is_static_or_kinematic())
    }
}

/// Keeps manifolds in lockstep with broad-phase pairs.
///
/// Attaches the dispatch entry when a pair appears, releases the pair's
/// manifold when it disappears, and vetoes pairs of bodies linked by a joint
/// that disables their collisions.
#[derive(Debug)]
pub struct DispatcherPairCallback<'a> {
    /// Dispatcher owning the manifolds.
    pub dispatcher: &'a mut CollisionDispatcher,
    /// Hooks fired when a manifold is cleared.
    pub hooks: &'a ContactHooks,
    /// Body pairs that must never collide, lower handle first.
    pub ignored: &'a HashSet<(BodyHandle, BodyHandle)>,
}

impl PairCallback for DispatcherPairCallback<'_> {
    fn needs_broadphase_collision(&self, a: &BroadphaseProxy, b: &BroadphaseProxy) -> bool {
        let key = if a.owner <= b.owner {
            (a.owner, b.owner)
        } else {
            (b.owner, a.owner)
        };
        a.filter.allows(&b.filter) && !self.ignored.contains(&key)
    }

    fn pair_added(&mut self, pair: &mut OverlappingPair, a: &BroadphaseProxy, b: &BroadphaseProxy) {
        pair.algorithm = Some(self.dispatcher.find_algorithm(a.shape_type, b.shape_type));
    }

    fn pair_removed(&mut self, pair: OverlappingPair) {
        if let Some(handle) = pair.manifold {
            self.dispatcher.release_manifold(handle, self.hooks);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use nalgebra::{Point3, Vector3};
    use sim_contact::ManifoldPoint;
    use sim_types::Pose;

    use crate::shape::CollisionShape;

    fn handle(i: u32) -> BodyHandle {
        BodyHandle::new(i, 0)
    }

    #[test]
    fn test_table_is_symmetric() {
        let table = DispatchTable::new();
        for a in ShapeType::ALL {
            for b in ShapeType::ALL {
                let ab = table.find(a, b);
                let ba = table.find(b, a);
                assert_eq!(ab.algorithm, ba.algorithm);
                assert_eq!(ab.swapped, a > b);
            }
        }
        assert_eq!(
            table.find(ShapeType::Sphere, ShapeType::Box).algorithm,
            AlgorithmKind::BoxSphere
        );
        assert_eq!(
            table.find(ShapeType::StaticPlane, ShapeType::StaticPlane).algorithm,
            AlgorithmKind::Empty
        );
    }

    #[test]
    fn test_manifold_slots_are_reused() {
        let hooks = ContactHooks::new();
        let mut dispatcher = CollisionDispatcher::new();
        let m0 = dispatcher.get_new_manifold(handle(0), handle(1), 0.02, f64::MAX);
        let m1 = dispatcher.get_new_manifold(handle(1), handle(2), 0.02, f64::MAX);
        assert_eq!(dispatcher.num_manifolds(), 2);

        dispatcher.release_manifold(m0, &hooks);
        assert!(dispatcher.manifold(m0).is_none());
        let m2 = dispatcher.get_new_manifold(handle(3), handle(4), 0.02, f64::MAX);
        assert_eq!(m2, m0);
        assert_eq!(dispatcher.manifold(m2).unwrap().body0(), handle(3));
        assert_eq!(dispatcher.manifold(m1).unwrap().body0(), handle(1));
        assert_eq!(dispatcher.manifolds().count(), 2);
    }

    #[test]
    fn test_release_fires_contact_ended() {
        let ended = Arc::new(AtomicUsize::new(0));
        let mut hooks = ContactHooks::new();
        let counter = Arc::clone(&ended);
        hooks.set_contact_ended_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut dispatcher = CollisionDispatcher::new();
        let m = dispatcher.get_new_manifold(handle(0), handle(1), 0.02, f64::MAX);
        dispatcher.manifold_mut(m).unwrap().add_manifold_point(
            ManifoldPoint::new(Point3::origin(), Point3::origin(), Vector3::y(), -0.01),
            &hooks,
        );
        dispatcher.release_manifold(m, &hooks);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.num_manifolds(), 0);
    }

    #[test]
    fn test_manifolds_mut_preserves_order() {
        let mut dispatcher = CollisionDispatcher::new();
        let handles: Vec<_> = (0..3)
            .map(|i| dispatcher.get_new_manifold(handle(i), handle(i + 10), 0.02, f64::MAX))
            .collect();
        let order = [handles[2], handles[0], handles[2]];
        let picked = dispatcher.manifolds_mut(&order);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].body0(), handle(2));
        assert_eq!(picked[1].body0(), handle(0));
    }

    #[test]
    fn test_needs_collision_requires_an_awake_body() {
        let shape = Arc::new(CollisionShape::sphere(0.5));
        let ground = RigidBody::fixed(Arc::clone(&shape), Pose::identity());
        let mut ball = RigidBody::dynamic(shape, 1.0, Pose::identity());

        assert!(CollisionDispatcher::needs_collision(&ground, &ball));
        assert!(CollisionDispatcher::needs_response(&ground, &ball));

        ball.force_activation_state(sim_types::ActivationState::IslandSleeping);
        let mut ground = ground;
        ground.force_activation_state(sim_types::ActivationState::IslandSleeping);
        assert!(!CollisionDispatcher::needs_collision(&ground, &ball));
    }
}
