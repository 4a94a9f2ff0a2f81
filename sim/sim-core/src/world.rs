//! Simulation world container and entity management.
//!
//! The [`World`] owns every body, joint, broadphase proxy and contact
//! manifold. Bodies and joints live in dense slot arrays and are handed out
//! as generational handles; a handle kept past removal is rejected instead
//! of aliasing whatever reused the slot.
//!
//! Stepping lives in [`stepper`](crate::stepper); this module covers
//! insertion, removal, reconfiguration and queries.

use std::sync::Arc;

use hashbrown::HashSet;
use sim_constraint::{ConstraintSolver, SequentialImpulseSolver, TypedConstraint};
use sim_contact::{ContactHooks, PersistentManifold};
use sim_types::{
    ActivationState, BodyHandle, Callback, CollisionFilter, CollisionFlags, ConstraintHandle,
    Result, SimError, Vector3, WorldConfig,
};
use tracing::{debug, warn};

use crate::broad_phase::{Aabb, BroadPhaseDetector};
use crate::dispatcher::{CollisionDispatcher, DispatcherPairCallback, ManifoldHandle};
use crate::rigid_body::RigidBody;
use crate::shape::CollisionShape;
use crate::stepper::{StepPhase, StepStats, TickContext};

/// Pre-/post-tick callback. Receives the sub-step context.
pub type TickCallback = Callback<dyn Fn(&mut TickContext<'_>) + Send + Sync>;

/// One body slot; `body` is `None` while the slot is free.
#[derive(Debug)]
pub(crate) struct BodySlot {
    pub(crate) generation: u32,
    pub(crate) body: Option<RigidBody>,
}

#[derive(Debug)]
pub(crate) struct ConstraintEntry {
    pub(crate) constraint: Box<dyn TypedConstraint>,
    pub(crate) disable_collisions: bool,
}

#[derive(Debug)]
pub(crate) struct ConstraintSlot {
    pub(crate) generation: u32,
    pub(crate) entry: Option<ConstraintEntry>,
}

pub(crate) fn lookup(slots: &[BodySlot], handle: BodyHandle) -> Result<&RigidBody> {
    slots
        .get(handle.index())
        .filter(|slot| slot.generation == handle.generation())
        .and_then(|slot| slot.body.as_ref())
        .ok_or(SimError::InvalidBodyHandle(handle))
}

pub(crate) fn lookup_mut(slots: &mut [BodySlot], handle: BodyHandle) -> Result<&mut RigidBody> {
    slots
        .get_mut(handle.index())
        .filter(|slot| slot.generation == handle.generation())
        .and_then(|slot| slot.body.as_mut())
        .ok_or(SimError::InvalidBodyHandle(handle))
}

pub(crate) fn handle_of(index: usize, slot: &BodySlot) -> BodyHandle {
    BodyHandle::new(u32::try_from(index).unwrap_or(u32::MAX), slot.generation)
}

/// Rigid-body dynamics world.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use sim_core::{CollisionShape, RigidBody, World};
/// use sim_types::{Pose, WorldConfig};
/// use nalgebra::{Point3, Vector3};
///
/// let mut world = World::new(WorldConfig::default()).unwrap();
/// let ground = world.add_body(RigidBody::fixed(
///     Arc::new(CollisionShape::ground(0.0)),
///     Pose::identity(),
/// ));
/// let ball = world.add_body(RigidBody::dynamic(
///     Arc::new(CollisionShape::sphere(0.5)),
///     1.0,
///     Pose::from_position(Point3::new(0.0, 3.0, 0.0)),
/// ));
///
/// assert_eq!(world.num_bodies(), 2);
/// assert_eq!(world.body(ball).unwrap().gravity(), Vector3::new(0.0, -10.0, 0.0));
/// assert!(world.body(ground).unwrap().is_static());
/// ```
#[derive(Debug)]
pub struct World {
    pub(crate) config: WorldConfig,
    pub(crate) bodies: Vec<BodySlot>,
    free_bodies: Vec<u32>,
    pub(crate) constraints: Vec<ConstraintSlot>,
    free_constraints: Vec<u32>,
    /// Body pairs linked by a joint that disables their collisions.
    pub(crate) ignored_pairs: HashSet<(BodyHandle, BodyHandle)>,
    pub(crate) broad_phase: BroadPhaseDetector,
    pub(crate) dispatcher: CollisionDispatcher,
    pub(crate) solver: Box<dyn ConstraintSolver>,
    pub(crate) hooks: ContactHooks,
    pub(crate) pre_tick: Option<TickCallback>,
    pub(crate) post_tick: Option<TickCallback>,
    /// Time accumulated but not yet simulated (fixed-step mode).
    pub(crate) local_time: f64,
    pub(crate) time: f64,
    pub(crate) step_count: u64,
    pub(crate) phase: StepPhase,
    pub(crate) stats: StepStats,
}

impl Default for World {
    fn default() -> Self {
        Self::with_valid_config(WorldConfig::default())
    }
}

impl World {
    /// Create an empty world. Fails if the configuration does not validate.
    pub fn new(config: WorldConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: WorldConfig) -> Self {
        let mut broad_phase = BroadPhaseDetector::new(config.broad_phase.clone());
        broad_phase.set_deterministic(config.deterministic_pairs);
        Self {
            config,
            bodies: Vec::new(),
            free_bodies: Vec::new(),
            constraints: Vec::new(),
            free_constraints: Vec::new(),
            ignored_pairs: HashSet::new(),
            broad_phase,
            dispatcher: CollisionDispatcher::new(),
            solver: Box::new(SequentialImpulseSolver::new()),
            hooks: ContactHooks::new(),
            pre_tick: None,
            post_tick: None,
            local_time: 0.0,
            time: 0.0,
            step_count: 0,
            phase: StepPhase::Idle,
            stats: StepStats::default(),
        }
    }

    // ==================== Configuration ====================

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Replace the configuration.
    ///
    /// Gravity is not pushed to existing bodies; use [`set_gravity`](Self::set_gravity).
    pub fn set_config(&mut self, config: WorldConfig) -> Result<()> {
        config.validate()?;
        self.broad_phase.set_config(config.broad_phase.clone());
        self.broad_phase.set_deterministic(config.deterministic_pairs);
        self.config = config;
        Ok(())
    }

    /// World gravity.
    #[must_use]
    pub fn gravity(&self) -> Vector3<f64> {
        self.config.gravity
    }

    /// Set world gravity and copy it onto every dynamic body that has not
    /// opted out with [`CollisionFlags::DISABLE_WORLD_GRAVITY`].
    pub fn set_gravity(&mut self, gravity: Vector3<f64>) {
        self.config.gravity = gravity;
        for body in self.bodies.iter_mut().filter_map(|s| s.body.as_mut()) {
            if !body.flags().contains(CollisionFlags::DISABLE_WORLD_GRAVITY) {
                body.set_gravity(gravity);
            }
        }
    }

    /// Swap in a different constraint solver.
    pub fn set_constraint_solver(&mut self, solver: Box<dyn ConstraintSolver>) {
        self.solver = solver;
    }

    /// The constraint solver.
    #[must_use]
    pub fn constraint_solver(&self) -> &dyn ConstraintSolver {
        self.solver.as_ref()
    }

    /// Contact hooks fired by this world's manifolds.
    #[must_use]
    pub fn hooks(&self) -> &ContactHooks {
        &self.hooks
    }

    /// Contact hooks, for installing callbacks.
    pub fn hooks_mut(&mut self) -> &mut ContactHooks {
        &mut self.hooks
    }

    /// Run `f` at the start of every sub-step.
    pub fn set_pre_tick_callback<F>(&mut self, f: F)
    where
        F: Fn(&mut TickContext<'_>) + Send + Sync + 'static,
    {
        self.pre_tick = Some(Callback(Arc::new(f)));
    }

    /// Run `f` at the end of every sub-step.
    pub fn set_post_tick_callback<F>(&mut self, f: F)
    where
        F: Fn(&mut TickContext<'_>) + Send + Sync + 'static,
    {
        self.post_tick = Some(Callback(Arc::new(f)));
    }

    /// Remove both tick callbacks.
    pub fn clear_tick_callbacks(&mut self) {
        self.pre_tick = None;
        self.post_tick = None;
    }

    // ==================== Time ====================

    /// Simulated time (seconds).
    #[must_use]
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Number of sub-steps run so far.
    #[must_use]
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Time carried over to the next fixed-step call.
    #[must_use]
    pub fn local_time(&self) -> f64 {
        self.local_time
    }

    /// Pipeline phase. `Idle` between steps; after a failed step, the phase
    /// the step stopped in.
    #[must_use]
    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    /// Counters from the last sub-step.
    #[must_use]
    pub fn stats(&self) -> &StepStats {
        &self.stats
    }

    // ==================== Bodies ====================

    /// Insert a body and create its broadphase proxy.
    ///
    /// Dynamic bodies take the world gravity unless they carry
    /// [`CollisionFlags::DISABLE_WORLD_GRAVITY`]. Sleeping thresholds are
    /// reset to the configured solver defaults. Static bodies start asleep so
    /// they never keep a resting pair alive on their own.
    pub fn add_body(&mut self, mut body: RigidBody) -> BodyHandle {
        if body.is_dynamic() && !body.flags().contains(CollisionFlags::DISABLE_WORLD_GRAVITY) {
            body.set_gravity(self.config.gravity);
        }
        body.set_sleeping_thresholds(
            self.config.solver.linear_sleeping_threshold,
            self.config.solver.angular_sleeping_threshold,
        );
        if body.is_static() {
            body.force_activation_state(ActivationState::IslandSleeping);
        }

        let handle = if let Some(index) = self.free_bodies.pop() {
            let slot = &mut self.bodies[index as usize];
            slot.body = Some(body);
            BodyHandle::new(index, slot.generation)
        } else {
            let index = u32::try_from(self.bodies.len()).unwrap_or(u32::MAX);
            self.bodies.push(BodySlot {
                generation: 0,
                body: Some(body),
            });
            BodyHandle::new(index, 0)
        };

        self.create_proxy(handle);
        debug!(body = %handle, "body added");
        handle
    }

    /// Remove a body.
    ///
    /// Its proxy is destroyed, which retires every pair it was part of and
    /// clears their manifolds (firing contact-ended where points remained).
    /// Joints attached to the body are removed as well.
    pub fn remove_body(&mut self, handle: BodyHandle) -> Result<RigidBody> {
        lookup(&self.bodies, handle)?;

        let attached: Vec<ConstraintHandle> = self
            .constraint_handles()
            .filter(|&c| {
                self.constraint(c).is_ok_and(|joint| {
                    joint.body_a() == handle || joint.body_b() == Some(handle)
                })
            })
            .collect();
        for joint in attached {
            warn!(body = %handle, constraint = %joint, "removing joint attached to removed body");
            self.remove_constraint(joint)?;
        }

        self.destroy_proxy(handle);

        let slot = &mut self.bodies[handle.index()];
        let body = slot.body.take().ok_or(SimError::InvalidBodyHandle(handle))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_bodies.push(u32::try_from(handle.index()).unwrap_or(u32::MAX));
        debug!(body = %handle, "body removed");
        Ok(body)
    }

    /// Look up a body.
    pub fn body(&self, handle: BodyHandle) -> Result<&RigidBody> {
        lookup(&self.bodies, handle)
    }

    /// Look up a body mutably.
    pub fn body_mut(&mut self, handle: BodyHandle) -> Result<&mut RigidBody> {
        lookup_mut(&mut self.bodies, handle)
    }

    /// Whether a handle refers to a live body.
    #[must_use]
    pub fn contains_body(&self, handle: BodyHandle) -> bool {
        lookup(&self.bodies, handle).is_ok()
    }

    /// Number of live bodies.
    #[must_use]
    pub fn num_bodies(&self) -> usize {
        self.bodies.iter().filter(|s| s.body.is_some()).count()
    }

    /// Live bodies in slot order.
    pub fn bodies(&self) -> impl Iterator<Item = (BodyHandle, &RigidBody)> {
        self.bodies
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.body.as_ref().map(|b| (handle_of(i, slot), b)))
    }

    /// Live bodies in slot order, mutably.
    pub fn bodies_mut(&mut self) -> impl Iterator<Item = (BodyHandle, &mut RigidBody)> {
        self.bodies.iter_mut().enumerate().filter_map(|(i, slot)| {
            let handle = handle_of(i, slot);
            slot.body.as_mut().map(|b| (handle, b))
        })
    }

    /// Replace a body's collision shape. The proxy is recreated, so the
    /// body's existing pairs and manifolds are dropped.
    pub fn set_collision_shape(&mut self, handle: BodyHandle, shape: Arc<CollisionShape>) -> Result<()> {
        lookup_mut(&mut self.bodies, handle)?.set_shape(shape);
        self.destroy_proxy(handle);
        self.create_proxy(handle);
        Ok(())
    }

    /// Replace a body's collision filter and recreate its proxy.
    pub fn set_collision_filter(&mut self, handle: BodyHandle, filter: CollisionFilter) -> Result<()> {
        lookup_mut(&mut self.bodies, handle)?.set_filter(filter);
        self.destroy_proxy(handle);
        self.create_proxy(handle);
        Ok(())
    }

    /// Change a body's mass and local inertia diagonal.
    ///
    /// A mass of 0 turns the body static and a positive mass turns it
    /// dynamic. When the kind changes the proxy is recreated so its static
    /// flag and default filter match, a body turned dynamic takes the world
    /// gravity (unless it carries [`CollisionFlags::DISABLE_WORLD_GRAVITY`])
    /// and is woken, and a body turned static is put to sleep.
    pub fn set_mass_props(
        &mut self,
        handle: BodyHandle,
        mass: f64,
        local_inertia: Vector3<f64>,
    ) -> Result<()> {
        let gravity = self.config.gravity;
        let body = lookup_mut(&mut self.bodies, handle)?;
        let was_static = body.is_static();
        let was_dynamic = body.is_dynamic();
        body.set_mass_props(mass, local_inertia)?;
        if body.is_static() == was_static && body.is_dynamic() == was_dynamic {
            return Ok(());
        }

        if body.is_static() {
            body.force_activation_state(ActivationState::IslandSleeping);
        } else {
            if !body.flags().contains(CollisionFlags::DISABLE_WORLD_GRAVITY) {
                body.set_gravity(gravity);
            }
            body.activate(true);
        }
        self.destroy_proxy(handle);
        self.create_proxy(handle);
        debug!(body = %handle, mass, "body kind changed by mass update");
        Ok(())
    }

    fn create_proxy(&mut self, handle: BodyHandle) {
        let Ok(body) = lookup_mut(&mut self.bodies, handle) else {
            return;
        };
        let proxy = self.broad_phase.create_proxy(
            body.aabb(),
            body.collision_shape().shape_type(),
            handle,
            body.collision_filter(),
            body.is_static(),
        );
        body.set_broadphase_handle(Some(proxy));
    }

    fn destroy_proxy(&mut self, handle: BodyHandle) {
        let Ok(body) = lookup_mut(&mut self.bodies, handle) else {
            return;
        };
        let Some(proxy) = body.broadphase_handle() else {
            return;
        };
        body.set_broadphase_handle(None);
        let mut callback = DispatcherPairCallback {
            dispatcher: &mut self.dispatcher,
            hooks: &self.hooks,
            ignored: &self.ignored_pairs,
        };
        self.broad_phase.destroy_proxy(proxy, &mut callback);
    }

    // ==================== Constraints ====================

    /// Insert a joint.
    ///
    /// With `disable_collisions_between_linked` set, the two bodies stop
    /// colliding: their pair is retired at the next broadphase update.
    pub fn add_constraint(
        &mut self,
        constraint: Box<dyn TypedConstraint>,
        disable_collisions_between_linked: bool,
    ) -> Result<ConstraintHandle> {
        lookup(&self.bodies, constraint.body_a())?;
        if let Some(b) = constraint.body_b() {
            lookup(&self.bodies, b)?;
        }

        let entry = ConstraintEntry {
            constraint,
            disable_collisions: disable_collisions_between_linked,
        };
        let handle = if let Some(index) = self.free_constraints.pop() {
            let slot = &mut self.constraints[index as usize];
            slot.entry = Some(entry);
            ConstraintHandle::new(index, slot.generation)
        } else {
            let index = u32::try_from(self.constraints.len()).unwrap_or(u32::MAX);
            self.constraints.push(ConstraintSlot {
                generation: 0,
                entry: Some(entry),
            });
            ConstraintHandle::new(index, 0)
        };

        self.rebuild_ignored_pairs();
        debug!(constraint = %handle, "constraint added");
        Ok(handle)
    }

    /// Remove a joint and return it.
    pub fn remove_constraint(&mut self, handle: ConstraintHandle) -> Result<Box<dyn TypedConstraint>> {
        let slot = self
            .constraints
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation())
            .ok_or(SimError::InvalidConstraintHandle(handle))?;
        let entry = slot
            .entry
            .take()
            .ok_or(SimError::InvalidConstraintHandle(handle))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_constraints
            .push(u32::try_from(handle.index()).unwrap_or(u32::MAX));

        self.rebuild_ignored_pairs();
        debug!(constraint = %handle, "constraint removed");
        Ok(entry.constraint)
    }

    /// Look up a joint.
    pub fn constraint(&self, handle: ConstraintHandle) -> Result<&dyn TypedConstraint> {
        self.constraints
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.entry.as_ref())
            .map(|entry| entry.constraint.as_ref())
            .ok_or(SimError::InvalidConstraintHandle(handle))
    }

    /// Look up a joint mutably.
    pub fn constraint_mut(&mut self, handle: ConstraintHandle) -> Result<&mut dyn TypedConstraint> {
        match self
            .constraints
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.entry.as_mut())
        {
            Some(entry) => Ok(entry.constraint.as_mut()),
            None => Err(SimError::InvalidConstraintHandle(handle)),
        }
    }

    /// Number of live joints.
    #[must_use]
    pub fn num_constraints(&self) -> usize {
        self.constraints.iter().filter(|s| s.entry.is_some()).count()
    }

    /// Handles of every live joint, in slot order.
    pub fn constraint_handles(&self) -> impl Iterator<Item = ConstraintHandle> + '_ {
        self.constraints.iter().enumerate().filter_map(|(i, slot)| {
            slot.entry.as_ref().map(|_| {
                ConstraintHandle::new(u32::try_from(i).unwrap_or(u32::MAX), slot.generation)
            })
        })
    }

    fn rebuild_ignored_pairs(&mut self) {
        self.ignored_pairs = self
            .constraints
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .filter(|entry| entry.disable_collisions)
            .filter_map(|entry| {
                let a = entry.constraint.body_a();
                let b = entry.constraint.body_b()?;
                Some(if a <= b { (a, b) } else { (b, a) })
            })
            .collect();
    }

    // ==================== Queries ====================

    /// Bodies whose broadphase bounds overlap `aabb`.
    #[must_use]
    pub fn aabb_query(&self, aabb: &Aabb) -> Vec<BodyHandle> {
        self.broad_phase.aabb_test(aabb)
    }

    /// Live contact manifolds.
    pub fn manifolds(&self) -> impl Iterator<Item = (ManifoldHandle, &PersistentManifold)> {
        self.dispatcher.manifolds()
    }

    /// Number of live manifolds.
    #[must_use]
    pub fn num_manifolds(&self) -> usize {
        self.dispatcher.num_manifolds()
    }

    /// Manifold between two bodies, if their pair has one.
    #[must_use]
    pub fn manifold_between(&self, a: BodyHandle, b: BodyHandle) -> Option<&PersistentManifold> {
        let pa = self.body(a).ok()?.broadphase_handle()?;
        let pb = self.body(b).ok()?.broadphase_handle()?;
        let pair = self.broad_phase.pair_cache().find_pair(pa, pb)?;
        self.dispatcher.manifold(pair.manifold?)
    }

    /// Number of pairs in the broadphase cache.
    #[must_use]
    pub fn overlapping_pair_count(&self) -> usize {
        self.broad_phase.pair_cache().len()
    }

    /// The broadphase.
    #[must_use]
    pub fn broad_phase(&self) -> &BroadPhaseDetector {
        &self.broad_phase
    }

    /// Sum of kinetic energy over dynamic bodies.
    #[must_use]
    pub fn total_kinetic_energy(&self) -> f64 {
        self.bodies().map(|(_, b)| b.kinetic_energy()).sum()
    }
}
