//! Simulation stepping and control flow.
//!
//! [`World::step_simulation`] runs a fixed-step accumulator around the
//! sub-step pipeline. Each sub-step executes every phase exactly once, in
//! this order:
//!
//! ```text
//! pre-tick ─► kinematic poses ─► PredictMotion ─► BroadphaseUpdate
//!     ─► NarrowphaseDispatch ─► IslandComputation ─► ConstraintSolve
//!     ─► Integration ─► ActivationUpdate ─► post-tick
//! ```
//!
//! After the last sub-step of a call, forces are cleared and motion states
//! are synchronised (`MotionStateSync`).
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use sim_core::{CollisionShape, RigidBody, World};
//! use sim_types::Pose;
//! use nalgebra::Point3;
//!
//! let mut world = World::default();
//! let ball = world.add_body(RigidBody::dynamic(
//!     Arc::new(CollisionShape::sphere(0.5)),
//!     1.0,
//!     Pose::from_position(Point3::new(0.0, 10.0, 0.0)),
//! ));
//!
//! // One frame at 60 Hz: exactly one fixed sub-step.
//! let steps = world.step_simulation(1.0 / 60.0, 1, 1.0 / 60.0).unwrap();
//! assert_eq!(steps, 1);
//! assert!(world.body(ball).unwrap().world_transform().position.y < 10.0);
//! ```

use std::fmt;

use sim_constraint::{Island, SimulationIslands, SolverBody, TypedConstraint};
use sim_types::{ActivationState, BodyHandle, Result, SimError, SolverInfo};
use tracing::{debug_span, trace, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::dispatcher::{CollisionDispatcher, DispatcherPairCallback, ManifoldHandle};
use crate::integrators::integrate_transform;
use crate::narrow_phase::{ManifoldResult, process_collision};
use crate::rigid_body::RigidBody;
use crate::world::{BodySlot, ConstraintSlot, World, handle_of, lookup, lookup_mut};

/// Bounds larger than this (squared diagonal) on a moving body mean it has
/// flown off; the body is taken out of the simulation.
const MAX_MOVING_AABB_EXTENT_SQR: f64 = 1e12;

/// Phase of the sub-step pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StepPhase {
    /// Between steps.
    #[default]
    Idle,
    /// Velocity integration and pose prediction.
    PredictMotion,
    /// AABB refresh and pair update.
    BroadphaseUpdate,
    /// Contact generation and manifold refresh.
    NarrowphaseDispatch,
    /// Island building and island sleep/wake.
    IslandComputation,
    /// Constraint solve.
    ConstraintSolve,
    /// Pose integration.
    Integration,
    /// Deactivation timers and activation states.
    ActivationUpdate,
    /// Pushing poses to motion states.
    MotionStateSync,
}

impl fmt::Display for StepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::PredictMotion => "predict-motion",
            Self::BroadphaseUpdate => "broadphase-update",
            Self::NarrowphaseDispatch => "narrowphase-dispatch",
            Self::IslandComputation => "island-computation",
            Self::ConstraintSolve => "constraint-solve",
            Self::Integration => "integration",
            Self::ActivationUpdate => "activation-update",
            Self::MotionStateSync => "motion-state-sync",
        };
        f.write_str(name)
    }
}

/// Counters describing the last sub-step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StepStats {
    /// Sub-steps run by the last `step_simulation` call.
    pub sub_steps: usize,
    /// Pairs in the broadphase cache.
    pub pairs: usize,
    /// Live manifolds.
    pub manifolds: usize,
    /// Cached contact points over all manifolds.
    pub contacts: usize,
    /// Islands built.
    pub islands: usize,
    /// Islands handed to the solver.
    pub awake_islands: usize,
    /// Dynamic bodies asleep after the sub-step.
    pub sleeping_bodies: usize,
    /// Largest impulse change in the solver's last iteration.
    pub solver_residual: f64,
}

/// View of the world handed to tick callbacks.
///
/// Body state can be read and changed; bodies cannot be added or removed
/// while a step is running.
#[derive(Debug)]
pub struct TickContext<'a> {
    bodies: &'a mut [BodySlot],
    time_step: f64,
    time: f64,
}

impl TickContext<'_> {
    /// Length of the current sub-step.
    #[must_use]
    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    /// Simulated time at the start of the current sub-step.
    #[must_use]
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Look up a body.
    pub fn body(&self, handle: BodyHandle) -> Result<&RigidBody> {
        lookup(self.bodies, handle)
    }

    /// Look up a body mutably.
    pub fn body_mut(&mut self, handle: BodyHandle) -> Result<&mut RigidBody> {
        lookup_mut(self.bodies, handle)
    }

    /// Live bodies in slot order.
    pub fn bodies(&self) -> impl Iterator<Item = (BodyHandle, &RigidBody)> {
        self.bodies
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.body.as_ref().map(|b| (handle_of(i, slot), b)))
    }
}

fn live_bodies(slots: &mut [BodySlot]) -> impl Iterator<Item = &mut RigidBody> {
    slots.iter_mut().filter_map(|slot| slot.body.as_mut())
}

fn slot_body(slots: &[BodySlot], index: usize) -> Option<&RigidBody> {
    slots.get(index).and_then(|slot| slot.body.as_ref())
}

fn slot_body_mut(slots: &mut [BodySlot], index: usize) -> Option<&mut RigidBody> {
    slots.get_mut(index).and_then(|slot| slot.body.as_mut())
}

/// Mutable references to the joints in `order`, in that order.
fn constraints_in_order<'a>(
    slots: &'a mut [ConstraintSlot],
    order: &[usize],
) -> Vec<&'a mut (dyn TypedConstraint + 'static)> {
    let mut rank: Vec<Option<usize>> = vec![None; slots.len()];
    for (position, &slot) in order.iter().enumerate() {
        if let Some(cell) = rank.get_mut(slot) {
            cell.get_or_insert(position);
        }
    }
    let mut picked: Vec<(usize, &'a mut (dyn TypedConstraint + 'static))> = slots
        .iter_mut()
        .zip(rank)
        .filter_map(|(slot, rank)| Some((rank?, slot.entry.as_mut()?.constraint.as_mut())))
        .collect();
    picked.sort_unstable_by_key(|(rank, _)| *rank);
    picked.into_iter().map(|(_, c)| c).collect()
}

/// Contact and joint graph of one sub-step.
struct IslandGraph {
    islands: SimulationIslands,
    /// Manifold behind each contact edge.
    manifolds: Vec<ManifoldHandle>,
    /// Joint slot behind each joint edge.
    joints: Vec<usize>,
}

impl World {
    /// Advance the simulation by `time_step` seconds.
    ///
    /// With `max_sub_steps > 0` the call runs as many fixed sub-steps of
    /// `fixed_time_step` as fit into the accumulated time, at most
    /// `max_sub_steps`, and carries the remainder over. With
    /// `max_sub_steps == 0` it runs one sub-step of exactly `time_step`, or
    /// none when `time_step` is zero.
    ///
    /// Returns the number of sub-steps run.
    ///
    /// # Errors
    ///
    /// - [`SimError::InvalidTimestep`] for a negative or non-finite
    ///   `time_step`, or a non-positive `fixed_time_step` in fixed mode.
    /// - [`SimError::Diverged`] when a dynamic body ends a sub-step with a
    ///   non-finite pose or velocity. The world state is then unreliable.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn step_simulation(
        &mut self,
        time_step: f64,
        max_sub_steps: usize,
        fixed_time_step: f64,
    ) -> Result<usize> {
        if !time_step.is_finite() || time_step < 0.0 {
            return Err(SimError::InvalidTimestep(time_step));
        }

        let (num_sub_steps, sub_step, cap) = if max_sub_steps > 0 {
            if !fixed_time_step.is_finite() || fixed_time_step <= 0.0 {
                return Err(SimError::InvalidTimestep(fixed_time_step));
            }
            self.local_time += time_step;
            let n = (self.local_time / fixed_time_step).floor() as usize;
            self.local_time -= n as f64 * fixed_time_step;
            (n, fixed_time_step, max_sub_steps)
        } else {
            self.local_time = 0.0;
            if time_step < f64::EPSILON {
                (0, 0.0, 0)
            } else {
                (1, time_step, 1)
            }
        };

        let clamped = num_sub_steps.min(cap);
        if clamped < num_sub_steps {
            warn!(
                requested = num_sub_steps,
                clamped,
                dropped_seconds = (num_sub_steps - clamped) as f64 * sub_step,
                "sub-step count clamped, simulated time dropped"
            );
        }

        if clamped > 0 {
            for body in live_bodies(&mut self.bodies) {
                if body.is_dynamic() && body.is_active() {
                    body.apply_gravity();
                }
            }
            for _ in 0..clamped {
                self.internal_single_step(sub_step)?;
            }
        }

        self.phase = StepPhase::MotionStateSync;
        self.synchronize_motion_states();
        for body in live_bodies(&mut self.bodies) {
            body.clear_forces();
        }

        self.stats.sub_steps = clamped;
        self.phase = StepPhase::Idle;
        Ok(clamped)
    }

    /// Advance by `time_step` using the configured fixed step and sub-step cap.
    pub fn step(&mut self, time_step: f64) -> Result<usize> {
        self.step_simulation(time_step, self.config.max_sub_steps, self.config.fixed_timestep)
    }

    /// Run fixed sub-steps until `duration` seconds have been simulated.
    pub fn run_for(&mut self, duration: f64) -> Result<usize> {
        let dt = self.config.fixed_timestep;
        let mut total = 0;
        let mut remaining = duration;
        while remaining > dt * 0.5 {
            total += self.step_simulation(dt, 1, dt)?;
            remaining -= dt;
        }
        Ok(total)
    }

    fn internal_single_step(&mut self, dt: f64) -> Result<()> {
        let span = debug_span!("sub_step", step = self.step_count, dt);
        let _enter = span.enter();

        let mut info = self.config.solver.clone();
        info.timestep = dt;

        self.run_tick_callback(true, dt);
        self.save_kinematic_states(dt);

        self.phase = StepPhase::PredictMotion;
        self.predict_motion(dt);

        self.phase = StepPhase::BroadphaseUpdate;
        self.update_aabbs();
        let mut callback = DispatcherPairCallback {
            dispatcher: &mut self.dispatcher,
            hooks: &self.hooks,
            ignored: &self.ignored_pairs,
        };
        self.broad_phase.calculate_overlapping_pairs(&mut callback);

        self.phase = StepPhase::NarrowphaseDispatch;
        self.dispatch_all_collision_pairs();

        self.phase = StepPhase::IslandComputation;
        let graph = self.calculate_simulation_islands();

        self.phase = StepPhase::ConstraintSolve;
        self.solve_constraints(&graph, &info);

        self.phase = StepPhase::Integration;
        self.integrate_transforms(dt);

        self.phase = StepPhase::ActivationUpdate;
        self.update_activation_state(dt);

        self.run_tick_callback(false, dt);

        self.time += dt;
        self.step_count += 1;
        self.collect_stats(&graph);
        self.check_divergence()
    }

    fn run_tick_callback(&mut self, pre: bool, dt: f64) {
        let callback = if pre { &self.pre_tick } else { &self.post_tick };
        if let Some(cb) = callback {
            let mut ctx = TickContext {
                bodies: &mut self.bodies,
                time_step: dt,
                time: self.time,
            };
            (cb.0)(&mut ctx);
        }
    }

    fn save_kinematic_states(&mut self, dt: f64) {
        for body in live_bodies(&mut self.bodies).filter(|b| b.is_kinematic()) {
            body.save_kinematic_state(dt);
            // A kinematic body that was moved while asleep wakes up.
            if body.activation_state().is_sleeping()
                && (body.linear_velocity().norm_squared() > 0.0
                    || body.angular_velocity().norm_squared() > 0.0)
            {
                body.activate(true);
            }
        }
    }

    fn predict_motion(&mut self, dt: f64) {
        let mut moving = 0_usize;
        for body in live_bodies(&mut self.bodies) {
            if !body.is_dynamic() || !body.is_active() {
                continue;
            }
            body.integrate_velocities(dt);
            body.apply_damping(dt);
            let predicted = body.predict_integrated_transform(dt);
            if let Some(d) = body.dynamic_state_mut() {
                d.predicted_pose = predicted;
            }
            moving += 1;
        }
        trace!(moving, "motion predicted");
    }

    /// Refresh proxy bounds. Moving bodies get the union of their current and
    /// predicted bounds, both grown by the contact breaking threshold.
    fn update_aabbs(&mut self) {
        let threshold = self.config.contact_breaking_threshold;
        for body in live_bodies(&mut self.bodies) {
            let Some(proxy) = body.broadphase_handle() else {
                continue;
            };
            let mut aabb = body.aabb().expanded(threshold);
            if body.is_active() {
                if let Some(d) = body.dynamic_state() {
                    let predicted = body.collision_shape().aabb(&d.predicted_pose);
                    aabb = aabb.merged(&predicted.expanded(threshold));
                }
            }

            if !body.is_static() && (aabb.max - aabb.min).norm_squared() >= MAX_MOVING_AABB_EXTENT_SQR {
                warn!(
                    proxy = %proxy,
                    "moving body has overflowing bounds, disabling its simulation"
                );
                body.force_activation_state(ActivationState::DisableSimulation);
                continue;
            }
            self.broad_phase.set_aabb(proxy, aabb);
        }
    }

    fn dispatch_all_collision_pairs(&mut self) {
        let breaking = self.config.contact_breaking_threshold;
        let mut processed = 0_usize;
        for pair in self.broad_phase.pair_cache_mut().pairs_mut() {
            let (Ok(body0), Ok(body1)) = (lookup(&self.bodies, pair.body0), lookup(&self.bodies, pair.body1))
            else {
                continue;
            };
            if !CollisionDispatcher::needs_collision(body0, body1) {
                continue;
            }
            let Some(entry) = pair.algorithm else {
                continue;
            };

            let handle = *pair.manifold.get_or_insert_with(|| {
                let processing = body0
                    .contact_processing_threshold()
                    .min(body1.contact_processing_threshold());
                self.dispatcher
                    .get_new_manifold(pair.body0, pair.body1, breaking, processing)
            });
            let Some(manifold) = self.dispatcher.manifold_mut(handle) else {
                warn!(manifold = handle.index(), "pair refers to a missing manifold");
                pair.manifold = None;
                continue;
            };

            let mut result = ManifoldResult::new(manifold, &self.hooks, body0, body1, entry.swapped);
            process_collision(entry, body0, body1, &mut result);
            result.refresh_contact_points();
            processed += 1;
        }
        trace!(processed, manifolds = self.dispatcher.num_manifolds(), "narrow phase done");
    }

    fn calculate_simulation_islands(&mut self) -> IslandGraph {
        let participates: Vec<bool> = self
            .bodies
            .iter()
            .map(|slot| {
                slot.body.as_ref().is_some_and(|b| {
                    b.is_dynamic() && b.activation_state() != ActivationState::DisableSimulation
                })
            })
            .collect();

        let mut contact_edges = Vec::new();
        let mut manifolds = Vec::new();
        let mut wake = Vec::new();
        for (handle, manifold) in self.dispatcher.manifolds() {
            if manifold.is_empty() {
                continue;
            }
            let (Ok(a), Ok(b)) = (
                lookup(&self.bodies, manifold.body0()),
                lookup(&self.bodies, manifold.body1()),
            ) else {
                continue;
            };
            // Moving kinematic bodies wake what they touch without joining
            // its island.
            if a.is_kinematic() && a.is_active() && a.has_contact_response() {
                wake.push(manifold.body1());
            }
            if b.is_kinematic() && b.is_active() && b.has_contact_response() {
                wake.push(manifold.body0());
            }
            if !CollisionDispatcher::needs_response(a, b) {
                continue;
            }
            contact_edges.push((manifold.body0().index(), manifold.body1().index()));
            manifolds.push(handle);
        }
        for handle in wake {
            if let Ok(body) = lookup_mut(&mut self.bodies, handle) {
                body.activate(false);
            }
        }

        let mut joint_edges = Vec::new();
        let mut joints = Vec::new();
        for (slot_index, slot) in self.constraints.iter().enumerate() {
            let Some(entry) = &slot.entry else {
                continue;
            };
            if !entry.constraint.is_enabled() {
                continue;
            }
            joint_edges.push((
                entry.constraint.body_a().index(),
                entry.constraint.body_b().map(BodyHandle::index),
            ));
            joints.push(slot_index);
        }

        let islands = SimulationIslands::build(&participates, &contact_edges, &joint_edges);

        for island in islands.islands() {
            let all_sleeping = island.bodies.iter().all(|&i| {
                slot_body(&self.bodies, i).is_none_or(|b| {
                    !matches!(
                        b.activation_state(),
                        ActivationState::Active | ActivationState::DisableDeactivation
                    )
                })
            });
            for &i in &island.bodies {
                if let Some(body) = slot_body_mut(&mut self.bodies, i) {
                    if all_sleeping {
                        body.enter_sleep();
                    } else {
                        body.wake_into_island();
                    }
                }
            }
        }

        trace!(
            islands = islands.num_islands(),
            contact_edges = contact_edges.len(),
            joint_edges = joint_edges.len(),
            "islands built"
        );
        IslandGraph {
            islands,
            manifolds,
            joints,
        }
    }

    fn island_is_awake(&self, island: &Island) -> bool {
        island
            .bodies
            .iter()
            .any(|&i| slot_body(&self.bodies, i).is_some_and(RigidBody::is_active))
    }

    /// Batch every awake island into one solver call and write the result
    /// back: velocities, then split-impulse pose corrections.
    fn solve_constraints(&mut self, graph: &IslandGraph, info: &SolverInfo) {
        let mut movable = vec![false; self.bodies.len()];
        let mut manifold_order = Vec::new();
        let mut joint_order = Vec::new();
        for island in graph.islands.islands() {
            if !self.island_is_awake(island) {
                continue;
            }
            for &i in &island.bodies {
                movable[i] = true;
            }
            manifold_order.extend(island.manifolds.iter().map(|&k| graph.manifolds[k]));
            joint_order.extend(island.constraints.iter().map(|&k| graph.joints[k]));
        }

        let mut solver_bodies: Vec<SolverBody> = self
            .bodies
            .iter()
            .zip(&movable)
            .map(|(slot, &movable)| {
                slot.body
                    .as_ref()
                    .map_or_else(SolverBody::default, |b| b.solver_body(movable))
            })
            .collect();

        self.solver.prepare_solve(solver_bodies.len(), manifold_order.len());
        let mut manifolds = self.dispatcher.manifolds_mut(&manifold_order);
        let mut constraints = constraints_in_order(&mut self.constraints, &joint_order);
        let residual = self
            .solver
            .solve_group(&mut solver_bodies, &mut manifolds, &mut constraints, info);
        self.solver.all_solved(info);
        self.stats.solver_residual = residual;

        for (i, solved) in solver_bodies.iter().enumerate() {
            if !movable[i] {
                continue;
            }
            let Some(body) = slot_body_mut(&mut self.bodies, i) else {
                continue;
            };
            body.set_linear_velocity(solved.linear_velocity);
            body.set_angular_velocity(solved.angular_velocity);
            if info.split_impulse
                && (solved.push_velocity.norm_squared() > 0.0 || solved.turn_velocity.norm_squared() > 0.0)
            {
                let pose = integrate_transform(
                    body.world_transform(),
                    &solved.push_velocity,
                    &(solved.turn_velocity * info.split_impulse_turn_erp),
                    info.timestep,
                );
                body.set_world_transform(pose);
            }
        }
    }

    fn integrate_transforms(&mut self, dt: f64) {
        for body in live_bodies(&mut self.bodies) {
            if body.is_dynamic() && body.is_active() {
                let pose = body.predict_integrated_transform(dt);
                body.proceed_to_transform(pose);
            }
        }
    }

    fn update_activation_state(&mut self, dt: f64) {
        let deactivation_time = self.config.deactivation_time;
        let disable = self.config.disable_deactivation;
        for body in live_bodies(&mut self.bodies) {
            if body.is_static() {
                continue;
            }
            body.update_deactivation(dt);
            if body.wants_sleeping(deactivation_time, disable) {
                if body.is_static_or_kinematic() {
                    body.set_activation_state(ActivationState::IslandSleeping);
                } else if body.activation_state() == ActivationState::Active {
                    body.set_activation_state(ActivationState::WantsDeactivation);
                } else if body.activation_state() == ActivationState::IslandSleeping {
                    body.enter_sleep();
                }
            } else if body.activation_state() != ActivationState::DisableDeactivation {
                body.set_activation_state(ActivationState::Active);
            }
        }
    }

    /// Push poses to motion states, extrapolated by the time still in the
    /// accumulator.
    fn synchronize_motion_states(&mut self) {
        let all = self.config.synchronize_all_motion_states;
        let lead = self.local_time;
        for body in live_bodies(&mut self.bodies) {
            if !body.is_dynamic() || !(all || body.is_active()) {
                continue;
            }
            let pose = integrate_transform(
                body.world_transform(),
                &body.linear_velocity(),
                &body.angular_velocity(),
                lead,
            );
            if let Some(ms) = body.motion_state_mut() {
                ms.set_world_transform(&pose);
            }
        }
    }

    fn collect_stats(&mut self, graph: &IslandGraph) {
        self.stats.pairs = self.broad_phase.pair_cache().len();
        self.stats.manifolds = self.dispatcher.num_manifolds();
        self.stats.contacts = self
            .dispatcher
            .manifolds()
            .map(|(_, m)| m.num_contacts())
            .sum();
        self.stats.islands = graph.islands.num_islands();
        self.stats.awake_islands = graph
            .islands
            .islands()
            .iter()
            .filter(|island| self.island_is_awake(island))
            .count();
        self.stats.sleeping_bodies = self
            .bodies()
            .filter(|(_, b)| b.is_dynamic() && b.activation_state().is_sleeping())
            .count();
    }

    fn check_divergence(&self) -> Result<()> {
        for (handle, body) in self.bodies() {
            if !body.is_dynamic() {
                continue;
            }
            let finite = body.world_transform().is_finite()
                && body.linear_velocity().iter().all(|v| v.is_finite())
                && body.angular_velocity().iter().all(|v| v.is_finite());
            if !finite {
                return Err(SimError::diverged(format!(
                    "{handle} has a non-finite state after sub-step {}",
                    self.step_count
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use approx::assert_relative_eq;
    use nalgebra::{Point3, Vector3};
    use sim_types::{Pose, WorldConfig};

    use crate::motion_state::{DefaultMotionState, MotionState};
    use crate::shape::CollisionShape;

    fn ball(y: f64) -> RigidBody {
        RigidBody::dynamic(
            Arc::new(CollisionShape::sphere(0.5)),
            1.0,
            Pose::from_position(Point3::new(0.0, y, 0.0)),
        )
    }

    #[test]
    fn test_zero_variable_step_changes_nothing() {
        let mut world = World::default();
        let h = world.add_body(ball(3.0).with_linear_velocity(Vector3::new(1.0, 0.0, 0.0)));
        let before = *world.body(h).unwrap().world_transform();

        assert_eq!(world.step_simulation(0.0, 0, 1.0 / 60.0).unwrap(), 0);
        let body = world.body(h).unwrap();
        assert_eq!(*body.world_transform(), before);
        assert_eq!(body.linear_velocity(), Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(body.total_force(), Vector3::zeros());
        assert_eq!(world.time(), 0.0);
    }

    #[test]
    fn test_variable_step_runs_once() {
        let mut world = World::default();
        let h = world.add_body(ball(3.0));
        assert_eq!(world.step_simulation(0.05, 0, 1.0 / 60.0).unwrap(), 1);
        assert_relative_eq!(world.time(), 0.05, epsilon = 1e-12);
        assert_relative_eq!(world.body(h).unwrap().linear_velocity().y, -0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_accumulator_carries_remainder() {
        let mut world = World::default();
        let fixed = 1.0 / 60.0;
        assert_eq!(world.step_simulation(fixed / 2.0, 4, fixed).unwrap(), 0);
        assert_relative_eq!(world.local_time(), fixed / 2.0, epsilon = 1e-12);
        assert_eq!(world.step_simulation(fixed / 2.0, 4, fixed).unwrap(), 1);
        assert!(world.local_time() < 1e-12);
        assert_eq!(world.step_simulation(fixed * 2.5, 4, fixed).unwrap(), 2);
        assert_relative_eq!(world.local_time(), fixed / 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_sub_steps_are_clamped() {
        let mut world = World::default();
        let fixed = 1.0 / 60.0;
        assert_eq!(world.step_simulation(fixed * 10.0, 3, fixed).unwrap(), 3);
        assert_eq!(world.step_count(), 3);
        assert_eq!(world.stats().sub_steps, 3);
    }

    #[test]
    fn test_invalid_timesteps() {
        let mut world = World::default();
        assert!(matches!(
            world.step_simulation(-1.0, 1, 1.0 / 60.0),
            Err(SimError::InvalidTimestep(_))
        ));
        assert!(matches!(
            world.step_simulation(f64::NAN, 1, 1.0 / 60.0),
            Err(SimError::InvalidTimestep(_))
        ));
        assert!(matches!(
            world.step_simulation(0.1, 1, 0.0),
            Err(SimError::InvalidTimestep(_))
        ));
    }

    #[test]
    fn test_gravity_applied_once_per_call() {
        let mut world = World::default();
        let fixed = 1.0 / 60.0;
        let h = world.add_body(ball(100.0));
        world.step_simulation(fixed * 4.0, 4, fixed).unwrap();
        // Four sub-steps under one application of gravity.
        assert_relative_eq!(
            world.body(h).unwrap().linear_velocity().y,
            -10.0 * fixed * 4.0,
            epsilon = 1e-9
        );
        assert_eq!(world.body(h).unwrap().total_force(), Vector3::zeros());
    }

    #[test]
    fn test_tick_callbacks_run_around_each_sub_step() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut world = World::default();
        let pre_log = Arc::clone(&log);
        world.set_pre_tick_callback(move |ctx| {
            pre_log.lock().unwrap().push(("pre", ctx.time()));
        });
        let post_log = Arc::clone(&log);
        world.set_post_tick_callback(move |ctx| {
            post_log.lock().unwrap().push(("post", ctx.time()));
        });

        let fixed = 1.0 / 60.0;
        world.step_simulation(fixed * 2.0, 2, fixed).unwrap();
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 4);
        assert_eq!(log[0], ("pre", 0.0));
        assert_eq!(log[1], ("post", 0.0));
        assert_eq!(log[2].0, "pre");
        assert_relative_eq!(log[2].1, fixed, epsilon = 1e-12);
    }

    #[test]
    fn test_tick_callback_can_change_body_state() {
        let mut world = World::new(WorldConfig::default().zero_gravity()).unwrap();
        let h = world.add_body(ball(0.0));
        world.set_pre_tick_callback(move |ctx| {
            ctx.body_mut(h)
                .unwrap()
                .set_linear_velocity(Vector3::new(6.0, 0.0, 0.0));
        });
        world.step_simulation(0.5, 0, 0.5).unwrap();
        assert_relative_eq!(
            world.body(h).unwrap().world_transform().position.x,
            3.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_motion_state_receives_extrapolated_pose() {
        let mut world = World::new(WorldConfig::default().zero_gravity()).unwrap();
        let h = world.add_body(
            ball(0.0)
                .with_linear_velocity(Vector3::new(1.0, 0.0, 0.0))
                .with_motion_state(Box::new(DefaultMotionState::new(Pose::identity()))),
        );
        let fixed = 0.1;
        world.step_simulation(0.15, 1, fixed).unwrap();

        let body = world.body(h).unwrap();
        assert_relative_eq!(body.world_transform().position.x, 0.1, epsilon = 1e-9);
        let shown = body.motion_state().unwrap().world_transform();
        assert_relative_eq!(shown.position.x, 0.15, epsilon = 1e-9);
    }

    #[test]
    fn test_divergence_is_reported() {
        let mut world = World::default();
        let h = world.add_body(ball(0.0));
        world
            .body_mut(h)
            .unwrap()
            .set_linear_velocity(Vector3::new(f64::NAN, 0.0, 0.0));
        let err = world.step_simulation(1.0 / 60.0, 1, 1.0 / 60.0).unwrap_err();
        assert!(err.is_diverged());
        assert_ne!(world.phase(), StepPhase::Idle);
    }

    #[test]
    fn test_disable_simulation_bodies_stay_put() {
        let mut world = World::default();
        let h = world.add_body(ball(5.0));
        world
            .body_mut(h)
            .unwrap()
            .force_activation_state(ActivationState::DisableSimulation);
        world.run_for(0.5).unwrap();
        assert_eq!(world.body(h).unwrap().world_transform().position.y, 5.0);
    }

    #[test]
    fn test_kinematic_body_follows_motion_state() {
        let mut world = World::new(WorldConfig::default().zero_gravity()).unwrap();
        let h = world.add_body(
            RigidBody::kinematic(Arc::new(CollisionShape::sphere(0.5)), Pose::identity())
                .with_motion_state(Box::new(DefaultMotionState::new(Pose::identity()))),
        );
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        world.set_pre_tick_callback(move |ctx| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let target = Pose::from_position(Point3::new(0.1 * f64::from(n), 0.0, 0.0));
            if let Some(ms) = ctx.body_mut(h).unwrap().motion_state_mut() {
                ms.set_world_transform(&target);
            }
        });
        world.step_simulation(0.1, 1, 0.1).unwrap();
        world.step_simulation(0.1, 1, 0.1).unwrap();

        let body = world.body(h).unwrap();
        assert_relative_eq!(body.world_transform().position.x, 0.2, epsilon = 1e-9);
        assert_relative_eq!(body.linear_velocity().x, 1.0, epsilon = 1e-9);
    }
}
