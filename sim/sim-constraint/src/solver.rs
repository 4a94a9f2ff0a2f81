//! Sequential-impulse constraint solver.
//!
//! # Solver Approach
//!
//! Every contact point contributes one non-penetration row and two friction
//! rows; every joint contributes the rows it builds. The solver then sweeps
//! the rows in a fixed order for a fixed number of iterations:
//!
//! 1. For each row, compute the velocity error `target - J·v`
//! 2. Convert it to an impulse through the row's effective mass
//! 3. Clamp the accumulated impulse to the row's limits
//! 4. Apply the clamped change to both bodies
//!
//! Contacts push apart only (`λ ≥ 0`), friction rows stay inside the pyramid
//! `|λ_t| ≤ μ·λ_n`, and joint rows are unbounded. Rows start from last
//! step's accumulated impulses (scaled by the warm-start factor), which is what
//! keeps resting stacks quiet with few iterations.
//!
//! Penetration is corrected in one of two ways. Shallow overlap feeds a
//! Baumgarte bias (`erp · depth / dt`) into the contact's target velocity.
//! Deep overlap, with split impulse on, is resolved on separate push
//! velocities that move the bodies apart without adding kinetic energy.

use std::fmt;

use nalgebra::Vector3;
use tracing::{debug, trace};

use sim_contact::{ContactPointFlags, PersistentManifold, plane_space};
use sim_types::SolverInfo;

use crate::{JacobianRow, SolverBody, TypedConstraint};

/// Contract between the world and a constraint solver.
///
/// The world calls `prepare_solve`, then `solve_group`, then `all_solved`,
/// each exactly once per simulation sub-step.
pub trait ConstraintSolver: fmt::Debug + Send {
    /// Called before any group is solved.
    fn prepare_solve(&mut self, num_bodies: usize, num_manifolds: usize);

    /// Solve contacts and joints, updating body velocities in place.
    ///
    /// `bodies` is indexed by body slot. Contact impulses are written back
    /// into the manifold points for warm starting. Returns the largest impulse
    /// change of the final iteration.
    fn solve_group(
        &mut self,
        bodies: &mut [SolverBody],
        manifolds: &mut [&mut PersistentManifold],
        constraints: &mut [&mut (dyn TypedConstraint + 'static)],
        info: &SolverInfo,
    ) -> f64;

    /// Called after the last group of the sub-step.
    fn all_solved(&mut self, info: &SolverInfo);

    /// Drop any cached state.
    fn reset(&mut self);
}

/// Row counts and convergence of the last solve.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SolverStats {
    /// Non-penetration rows.
    pub contact_rows: usize,
    /// Friction rows.
    pub friction_rows: usize,
    /// Joint rows.
    pub joint_rows: usize,
    /// Iterations run.
    pub iterations: usize,
    /// Largest impulse change in the final iteration.
    pub residual: f64,
}

#[derive(Debug, Clone, Copy)]
struct SolverRow {
    body_a: usize,
    body_b: Option<usize>,
    linear_a: Vector3<f64>,
    angular_a: Vector3<f64>,
    linear_b: Vector3<f64>,
    angular_b: Vector3<f64>,
    angular_component_a: Vector3<f64>,
    angular_component_b: Vector3<f64>,
    jac_diag_inv: f64,
    target_velocity: f64,
    target_push: f64,
    cfm: f64,
    lower_limit: f64,
    upper_limit: f64,
    applied: f64,
    applied_push: f64,
    friction: f64,
    /// Contact row this friction row is bounded by.
    normal_row: usize,
    /// Manifold and point (contacts) or constraint (joints) the row came from.
    source: usize,
    point: usize,
}

impl SolverRow {
    fn new(
        bodies: &[SolverBody],
        body_a: usize,
        body_b: Option<usize>,
        jacobian: &JacobianRow,
    ) -> Self {
        let a = &bodies[body_a];
        let angular_component_a = a.angular_component(&jacobian.angular_a);
        let mut denom = jacobian
            .linear_a
            .dot(&jacobian.linear_a.component_mul(&a.inv_mass))
            + jacobian.angular_a.dot(&angular_component_a);

        let angular_component_b = match body_b {
            Some(b) => {
                let b = &bodies[b];
                let comp = b.angular_component(&jacobian.angular_b);
                denom += jacobian
                    .linear_b
                    .dot(&jacobian.linear_b.component_mul(&b.inv_mass))
                    + jacobian.angular_b.dot(&comp);
                comp
            }
            None => Vector3::zeros(),
        };

        let denom = denom + jacobian.cfm;
        let jac_diag_inv = if denom > f64::EPSILON { 1.0 / denom } else { 0.0 };

        Self {
            body_a,
            body_b,
            linear_a: jacobian.linear_a,
            angular_a: jacobian.angular_a,
            linear_b: jacobian.linear_b,
            angular_b: jacobian.angular_b,
            angular_component_a,
            angular_component_b,
            jac_diag_inv,
            target_velocity: jacobian.target_velocity,
            target_push: 0.0,
            cfm: jacobian.cfm,
            lower_limit: jacobian.lower_limit,
            upper_limit: jacobian.upper_limit,
            applied: 0.0,
            applied_push: 0.0,
            friction: 0.0,
            normal_row: 0,
            source: 0,
            point: 0,
        }
    }

    fn relative_velocity(&self, bodies: &[SolverBody]) -> f64 {
        let a = &bodies[self.body_a];
        let mut jv = self.linear_a.dot(&a.linear_velocity) + self.angular_a.dot(&a.angular_velocity);
        if let Some(b) = self.body_b {
            let b = &bodies[b];
            jv += self.linear_b.dot(&b.linear_velocity) + self.angular_b.dot(&b.angular_velocity);
        }
        jv
    }

    fn relative_push_velocity(&self, bodies: &[SolverBody]) -> f64 {
        let a = &bodies[self.body_a];
        let mut jv = self.linear_a.dot(&a.push_velocity) + self.angular_a.dot(&a.turn_velocity);
        if let Some(b) = self.body_b {
            let b = &bodies[b];
            jv += self.linear_b.dot(&b.push_velocity) + self.angular_b.dot(&b.turn_velocity);
        }
        jv
    }

    fn apply(&self, bodies: &mut [SolverBody], magnitude: f64) {
        let (a, b) = body_pair(bodies, self.body_a, self.body_b);
        a.apply_impulse(&self.linear_a, &self.angular_component_a, magnitude);
        if let Some(b) = b {
            b.apply_impulse(&self.linear_b, &self.angular_component_b, magnitude);
        }
    }

    /// One Gauss-Seidel update. Returns the magnitude of the impulse change.
    fn resolve(&mut self, bodies: &mut [SolverBody]) -> f64 {
        let jv = self.relative_velocity(bodies);
        let delta = (self.target_velocity - jv - self.cfm * self.applied) * self.jac_diag_inv;
        let accumulated = (self.applied + delta).clamp(self.lower_limit, self.upper_limit);
        let delta = accumulated - self.applied;
        self.applied = accumulated;
        self.apply(bodies, delta);
        delta.abs()
    }

    fn resolve_push(&mut self, bodies: &mut [SolverBody]) -> f64 {
        let jv = self.relative_push_velocity(bodies);
        let delta = (self.target_push - jv) * self.jac_diag_inv;
        let accumulated = (self.applied_push + delta).max(0.0);
        let delta = accumulated - self.applied_push;
        self.applied_push = accumulated;

        let (a, b) = body_pair(bodies, self.body_a, self.body_b);
        a.apply_push_impulse(&self.linear_a, &self.angular_component_a, delta);
        if let Some(b) = b {
            b.apply_push_impulse(&self.linear_b, &self.angular_component_b, delta);
        }
        delta.abs()
    }
}

/// Borrow two distinct bodies mutably.
fn body_pair(
    bodies: &mut [SolverBody],
    a: usize,
    b: Option<usize>,
) -> (&mut SolverBody, Option<&mut SolverBody>) {
    match b {
        None => (&mut bodies[a], None),
        Some(b) if a < b => {
            let (lo, hi) = bodies.split_at_mut(b);
            (&mut lo[a], Some(&mut hi[0]))
        }
        Some(b) => {
            debug_assert_ne!(a, b, "row couples a body with itself");
            let (lo, hi) = bodies.split_at_mut(a);
            (&mut hi[0], Some(&mut lo[b]))
        }
    }
}

/// Projected Gauss-Seidel over contact, friction and joint rows.
#[derive(Debug, Default)]
pub struct SequentialImpulseSolver {
    contact_rows: Vec<SolverRow>,
    friction_rows: Vec<SolverRow>,
    joint_rows: Vec<SolverRow>,
    scratch: Vec<JacobianRow>,
    stats: SolverStats,
}

impl SequentialImpulseSolver {
    /// Create a solver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics of the last `solve_group`.
    #[must_use]
    pub fn stats(&self) -> SolverStats {
        self.stats
    }

    // =========================================================================
    // Setup
    // =========================================================================

    fn setup_contacts(
        &mut self,
        bodies: &mut [SolverBody],
        manifolds: &[&mut PersistentManifold],
        info: &SolverInfo,
    ) {
        let inv_dt = if info.timestep > 0.0 {
            1.0 / info.timestep
        } else {
            0.0
        };

        for (m_idx, manifold) in manifolds.iter().enumerate() {
            let a = manifold.body0().index();
            let b = manifold.body1().index();
            if a == b || a >= bodies.len() || b >= bodies.len() {
                debug_assert!(false, "manifold references bodies outside the solver set");
                continue;
            }
            if bodies[a].is_fixed() && bodies[b].is_fixed() {
                continue;
            }

            for (p_idx, point) in manifold.points().iter().enumerate() {
                if point.distance > manifold.contact_processing_threshold() {
                    continue;
                }

                let body_a = bodies[a];
                let body_b = bodies[b];
                let rel_a = point.position_world_on_a - body_a.center_of_mass();
                let rel_b = point.position_world_on_b - body_b.center_of_mass();
                let n = point.normal_world_on_b;

                // Non-penetration row.
                let rel_vel = n.dot(&(body_a.velocity_at(&rel_a) - body_b.velocity_at(&rel_b)));
                let bounce = if -rel_vel > info.restitution_velocity_threshold {
                    (-rel_vel * point.combined_restitution).max(0.0)
                } else {
                    0.0
                };

                let penetration = point.distance + info.linear_slop;
                let mut target = bounce;
                let mut target_push = 0.0;
                if penetration > 0.0 {
                    // Speculative: allow closing the gap within this step.
                    target -= penetration * inv_dt;
                } else if info.split_impulse
                    && penetration <= info.split_impulse_penetration_threshold
                {
                    target_push = -penetration * info.erp2 * inv_dt;
                } else {
                    target -= penetration * info.erp * inv_dt;
                }

                let jacobian = JacobianRow {
                    linear_a: n,
                    angular_a: rel_a.cross(&n),
                    linear_b: -n,
                    angular_b: -rel_b.cross(&n),
                    target_velocity: target,
                    cfm: info.global_cfm,
                    lower_limit: 0.0,
                    upper_limit: f64::INFINITY,
                };
                let mut row = SolverRow::new(bodies, a, Some(b), &jacobian);
                row.target_push = target_push;
                row.source = m_idx;
                row.point = p_idx;
                if info.warmstarting {
                    row.applied = point.applied_impulse * info.warmstarting_factor;
                    row.apply(bodies, row.applied);
                }
                let normal_row = self.contact_rows.len();
                self.contact_rows.push(row);

                // Friction rows.
                let (dir1, dir2) = friction_directions(point, &body_a, &body_b, &rel_a, &rel_b);
                let warm = [point.applied_impulse_lateral1, point.applied_impulse_lateral2];
                for (dir, warm) in [(dir1, warm[0]), (dir2, warm[1])] {
                    let jacobian = JacobianRow {
                        linear_a: dir,
                        angular_a: rel_a.cross(&dir),
                        linear_b: -dir,
                        angular_b: -rel_b.cross(&dir),
                        target_velocity: 0.0,
                        cfm: 0.0,
                        lower_limit: 0.0,
                        upper_limit: 0.0,
                    };
                    let mut row = SolverRow::new(bodies, a, Some(b), &jacobian);
                    row.friction = point.combined_friction;
                    row.normal_row = normal_row;
                    row.source = m_idx;
                    row.point = p_idx;
                    if info.warmstarting {
                        row.applied = warm * info.warmstarting_factor;
                        row.apply(bodies, row.applied);
                    }
                    self.friction_rows.push(row);
                }
            }
        }
    }

    fn setup_joints(
        &mut self,
        bodies: &[SolverBody],
        constraints: &[&mut (dyn TypedConstraint + 'static)],
        info: &SolverInfo,
    ) {
        for (c_idx, constraint) in constraints.iter().enumerate() {
            if !constraint.is_enabled() {
                continue;
            }
            let a = constraint.body_a().index();
            let b = constraint.body_b().map(|h| h.index());
            if a >= bodies.len() || b.is_some_and(|b| b >= bodies.len() || b == a) {
                debug_assert!(false, "joint references bodies outside the solver set");
                continue;
            }

            self.scratch.clear();
            constraint.build_rows(&bodies[a], b.map(|b| &bodies[b]), info, &mut self.scratch);
            for jacobian in &self.scratch {
                let mut row = SolverRow::new(bodies, a, b, jacobian);
                row.source = c_idx;
                self.joint_rows.push(row);
            }
        }
    }

    // =========================================================================
    // Iteration and write-back
    // =========================================================================

    fn iterate(&mut self, bodies: &mut [SolverBody], info: &SolverInfo) -> f64 {
        let mut residual = 0.0_f64;
        for _ in 0..info.num_iterations {
            residual = 0.0;

            for row in &mut self.joint_rows {
                residual = residual.max(row.resolve(bodies));
            }

            for row in &mut self.contact_rows {
                residual = residual.max(row.resolve(bodies));
            }

            if info.split_impulse {
                for row in &mut self.contact_rows {
                    if row.target_push > 0.0 {
                        residual = residual.max(row.resolve_push(bodies));
                    }
                }
            }

            for row in &mut self.friction_rows {
                let limit = row.friction * self.contact_rows[row.normal_row].applied;
                row.lower_limit = -limit;
                row.upper_limit = limit;
                residual = residual.max(row.resolve(bodies));
            }
        }
        residual
    }

    fn write_back(
        &self,
        manifolds: &mut [&mut PersistentManifold],
        constraints: &mut [&mut (dyn TypedConstraint + 'static)],
    ) {
        for row in &self.contact_rows {
            if let Ok(point) = manifolds[row.source].contact_point_mut(row.point) {
                point.applied_impulse = row.applied;
            }
        }

        for pair in self.friction_rows.chunks_exact(2) {
            let (first, second) = (&pair[0], &pair[1]);
            if let Ok(point) = manifolds[first.source].contact_point_mut(first.point) {
                point.applied_impulse_lateral1 = first.applied;
                point.applied_impulse_lateral2 = second.applied;
                point.lateral_friction_dir1 = first.linear_a;
                point.lateral_friction_dir2 = second.linear_a;
                point.flags |= ContactPointFlags::LATERAL_FRICTION_INITIALIZED;
            }
        }

        let mut totals = vec![0.0; constraints.len()];
        for row in &self.joint_rows {
            totals[row.source] += row.applied.abs();
        }
        for (constraint, total) in constraints.iter_mut().zip(totals) {
            if !constraint.is_enabled() {
                continue;
            }
            constraint.set_applied_impulse(total);
            if total > constraint.breaking_impulse_threshold() {
                debug!(
                    body_a = %constraint.body_a(),
                    impulse = total,
                    "joint exceeded its breaking impulse, disabling"
                );
                constraint.set_enabled(false);
            }
        }
    }
}

impl ConstraintSolver for SequentialImpulseSolver {
    fn prepare_solve(&mut self, _num_bodies: usize, num_manifolds: usize) {
        self.contact_rows.clear();
        self.friction_rows.clear();
        self.joint_rows.clear();
        self.contact_rows.reserve(num_manifolds * 4);
        self.friction_rows.reserve(num_manifolds * 8);
        self.stats = SolverStats::default();
    }

    fn solve_group(
        &mut self,
        bodies: &mut [SolverBody],
        manifolds: &mut [&mut PersistentManifold],
        constraints: &mut [&mut (dyn TypedConstraint + 'static)],
        info: &SolverInfo,
    ) -> f64 {
        self.contact_rows.clear();
        self.friction_rows.clear();
        self.joint_rows.clear();

        self.setup_joints(bodies, constraints, info);
        self.setup_contacts(bodies, manifolds, info);

        let residual = if self.contact_rows.is_empty() && self.joint_rows.is_empty() {
            0.0
        } else {
            self.iterate(bodies, info)
        };

        self.write_back(manifolds, constraints);

        self.stats = SolverStats {
            contact_rows: self.contact_rows.len(),
            friction_rows: self.friction_rows.len(),
            joint_rows: self.joint_rows.len(),
            iterations: info.num_iterations,
            residual,
        };
        residual
    }

    fn all_solved(&mut self, _info: &SolverInfo) {
        trace!(
            contacts = self.stats.contact_rows,
            joints = self.stats.joint_rows,
            residual = self.stats.residual,
            "solve finished"
        );
    }

    fn reset(&mut self) {
        self.contact_rows.clear();
        self.friction_rows.clear();
        self.joint_rows.clear();
        self.scratch.clear();
        self.stats = SolverStats::default();
    }
}

/// Friction directions for a contact.
///
/// Directions cached on the point are reused while they still lie in the
/// contact plane. Otherwise the first direction follows the sliding velocity,
/// falling back to an arbitrary tangent basis when the contact is not sliding.
fn friction_directions(
    point: &sim_contact::ManifoldPoint,
    body_a: &SolverBody,
    body_b: &SolverBody,
    rel_a: &Vector3<f64>,
    rel_b: &Vector3<f64>,
) -> (Vector3<f64>, Vector3<f64>) {
    let n = point.normal_world_on_b;

    if point
        .flags
        .contains(ContactPointFlags::LATERAL_FRICTION_INITIALIZED)
    {
        let projected = point.lateral_friction_dir1 - n * n.dot(&point.lateral_friction_dir1);
        if projected.norm_squared() > 0.25 {
            let dir1 = projected.normalize();
            return (dir1, n.cross(&dir1));
        }
    }

    let vel = body_a.velocity_at(rel_a) - body_b.velocity_at(rel_b);
    let lateral = vel - n * n.dot(&vel);
    if lateral.norm_squared() > f64::EPSILON {
        let dir1 = lateral.normalize();
        (dir1, n.cross(&dir1))
    } else {
        plane_space(&n)
    }
}
