//! Typed constraints (joints) and their Jacobian rows.
//!
//! A joint describes itself to the solver as a list of [`JacobianRow`]s. Each
//! row constrains one scalar relative velocity between the two bodies:
//!
//! ```text
//! J·v = lin_a·v_a + ang_a·ω_a + lin_b·v_b + ang_b·ω_b   →   target
//! ```
//!
//! The solver accumulates an impulse per row, clamped to the row's limits.

use std::fmt;

use nalgebra::{Point3, Vector3};
use sim_types::{BodyHandle, SolverInfo};

use crate::SolverBody;

/// One scalar velocity constraint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JacobianRow {
    /// Linear Jacobian for body A.
    pub linear_a: Vector3<f64>,
    /// Angular Jacobian for body A.
    pub angular_a: Vector3<f64>,
    /// Linear Jacobian for body B.
    pub linear_b: Vector3<f64>,
    /// Angular Jacobian for body B.
    pub angular_b: Vector3<f64>,
    /// Target value of `J·v` after the solve.
    pub target_velocity: f64,
    /// Constraint force mixing for this row.
    pub cfm: f64,
    /// Lower bound on the accumulated impulse.
    pub lower_limit: f64,
    /// Upper bound on the accumulated impulse.
    pub upper_limit: f64,
}

impl JacobianRow {
    /// Bilateral (equality) row.
    #[must_use]
    pub fn bilateral(
        linear_a: Vector3<f64>,
        angular_a: Vector3<f64>,
        linear_b: Vector3<f64>,
        angular_b: Vector3<f64>,
        target_velocity: f64,
    ) -> Self {
        Self {
            linear_a,
            angular_a,
            linear_b,
            angular_b,
            target_velocity,
            cfm: 0.0,
            lower_limit: f64::NEG_INFINITY,
            upper_limit: f64::INFINITY,
        }
    }

    /// Set the row's CFM.
    #[must_use]
    pub fn with_cfm(mut self, cfm: f64) -> Self {
        self.cfm = cfm;
        self
    }
}

/// A joint between one body and either a second body or the world.
pub trait TypedConstraint: fmt::Debug + Send + Sync {
    /// First body.
    fn body_a(&self) -> BodyHandle;

    /// Second body, or `None` for a joint anchored to the world.
    fn body_b(&self) -> Option<BodyHandle>;

    /// Number of rows `build_rows` appends.
    fn num_rows(&self) -> usize;

    /// Append this joint's rows for the current poses.
    ///
    /// `body_b` is `None` for world-anchored joints.
    fn build_rows(
        &self,
        body_a: &SolverBody,
        body_b: Option<&SolverBody>,
        info: &SolverInfo,
        rows: &mut Vec<JacobianRow>,
    );

    /// Whether the joint takes part in solving.
    fn is_enabled(&self) -> bool;

    /// Enable or disable the joint.
    fn set_enabled(&mut self, enabled: bool);

    /// Accumulated impulse magnitude above which the joint breaks.
    fn breaking_impulse_threshold(&self) -> f64 {
        f64::INFINITY
    }

    /// Record the impulse the solver applied in the last solve.
    fn set_applied_impulse(&mut self, impulse: f64);

    /// Impulse applied in the last solve.
    fn applied_impulse(&self) -> f64;
}

/// Ball-socket joint: a pivot on body A coincides with a pivot on body B
/// (or a fixed world point).
///
/// # Example
///
/// ```
/// use sim_constraint::{Point2PointConstraint, TypedConstraint};
/// use sim_types::BodyHandle;
/// use nalgebra::Point3;
///
/// // Hang a body from a world anchor one unit above its center.
/// let joint = Point2PointConstraint::to_world(
///     BodyHandle::new(0, 0),
///     Point3::new(0.0, 1.0, 0.0),
///     Point3::new(0.0, 5.0, 0.0),
/// );
/// assert_eq!(joint.num_rows(), 3);
/// assert!(joint.body_b().is_none());
/// ```
#[derive(Debug, Clone)]
pub struct Point2PointConstraint {
    body_a: BodyHandle,
    body_b: Option<BodyHandle>,
    pivot_in_a: Point3<f64>,
    /// Pivot in B's frame, or in world space when `body_b` is `None`.
    pivot_in_b: Point3<f64>,
    enabled: bool,
    breaking_impulse_threshold: f64,
    applied_impulse: f64,
}

impl Point2PointConstraint {
    /// Join two bodies at the given local pivots.
    #[must_use]
    pub fn new(
        body_a: BodyHandle,
        body_b: BodyHandle,
        pivot_in_a: Point3<f64>,
        pivot_in_b: Point3<f64>,
    ) -> Self {
        Self {
            body_a,
            body_b: Some(body_b),
            pivot_in_a,
            pivot_in_b,
            enabled: true,
            breaking_impulse_threshold: f64::INFINITY,
            applied_impulse: 0.0,
        }
    }

    /// Pin a local pivot of body A to a world-space point.
    #[must_use]
    pub fn to_world(body_a: BodyHandle, pivot_in_a: Point3<f64>, world_pivot: Point3<f64>) -> Self {
        Self {
            body_a,
            body_b: None,
            pivot_in_a,
            pivot_in_b: world_pivot,
            enabled: true,
            breaking_impulse_threshold: f64::INFINITY,
            applied_impulse: 0.0,
        }
    }

    /// Break the joint once a solve needs more than `threshold` impulse.
    #[must_use]
    pub fn with_breaking_impulse_threshold(mut self, threshold: f64) -> Self {
        self.breaking_impulse_threshold = threshold;
        self
    }

    /// Pivot in A's frame.
    #[must_use]
    pub fn pivot_in_a(&self) -> Point3<f64> {
        self.pivot_in_a
    }

    /// Pivot in B's frame (world space for world-anchored joints).
    #[must_use]
    pub fn pivot_in_b(&self) -> Point3<f64> {
        self.pivot_in_b
    }

    /// Move the pivot on A.
    pub fn set_pivot_a(&mut self, pivot: Point3<f64>) {
        self.pivot_in_a = pivot;
    }

    /// Move the pivot on B.
    pub fn set_pivot_b(&mut self, pivot: Point3<f64>) {
        self.pivot_in_b = pivot;
    }
}

impl TypedConstraint for Point2PointConstraint {
    fn body_a(&self) -> BodyHandle {
        self.body_a
    }

    fn body_b(&self) -> Option<BodyHandle> {
        self.body_b
    }

    fn num_rows(&self) -> usize {
        3
    }

    fn build_rows(
        &self,
        body_a: &SolverBody,
        body_b: Option<&SolverBody>,
        info: &SolverInfo,
        rows: &mut Vec<JacobianRow>,
    ) {
        let world_a = body_a.pose.transform_point(&self.pivot_in_a);
        let rel_a = world_a - body_a.center_of_mass();
        let (world_b, rel_b) = match body_b {
            Some(b) => {
                let p = b.pose.transform_point(&self.pivot_in_b);
                (p, p - b.center_of_mass())
            }
            None => (self.pivot_in_b, Vector3::zeros()),
        };

        let error = world_a - world_b;
        let k = if info.timestep > 0.0 {
            info.erp / info.timestep
        } else {
            0.0
        };

        for axis in [Vector3::x(), Vector3::y(), Vector3::z()] {
            rows.push(
                JacobianRow::bilateral(
                    axis,
                    rel_a.cross(&axis),
                    -axis,
                    -rel_b.cross(&axis),
                    -k * error.dot(&axis),
                )
                .with_cfm(info.global_cfm),
            );
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn breaking_impulse_threshold(&self) -> f64 {
        self.breaking_impulse_threshold
    }

    fn set_applied_impulse(&mut self, impulse: f64) {
        self.applied_impulse = impulse;
    }

    fn applied_impulse(&self) -> f64 {
        self.applied_impulse
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sim_types::Pose;

    #[test]
    fn test_rows_measure_relative_pivot_velocity() {
        let joint = Point2PointConstraint::new(
            BodyHandle::new(0, 0),
            BodyHandle::new(1, 0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(-1.0, 0.0, 0.0),
        );
        let a = SolverBody {
            angular_velocity: Vector3::z(),
            ..SolverBody::fixed(Pose::identity())
        };
        let b = SolverBody::fixed(Pose::from_position(Point3::new(2.0, 0.0, 0.0)));

        let mut rows = Vec::new();
        joint.build_rows(&a, Some(&b), &SolverInfo::default(), &mut rows);
        assert_eq!(rows.len(), 3);

        // Pivots coincide, so no positional correction is requested.
        for row in &rows {
            assert_relative_eq!(row.target_velocity, 0.0, epsilon = 1e-12);
        }

        // Spinning A about z moves its pivot along +y at unit speed.
        let jv_y = rows[1].linear_a.dot(&a.linear_velocity) + rows[1].angular_a.dot(&a.angular_velocity);
        assert_relative_eq!(jv_y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_world_anchor_position_error() {
        let joint = Point2PointConstraint::to_world(
            BodyHandle::new(0, 0),
            Point3::origin(),
            Point3::new(0.0, 1.0, 0.0),
        );
        let a = SolverBody::fixed(Pose::identity());
        let info = SolverInfo::default();

        let mut rows = Vec::new();
        joint.build_rows(&a, None, &info, &mut rows);
        // A sits 1 below the anchor: the y row asks for upward motion.
        assert!(rows[1].target_velocity > 0.0);
        assert_relative_eq!(
            rows[1].target_velocity,
            info.erp / info.timestep,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_enable_toggle() {
        let mut joint = Point2PointConstraint::to_world(
            BodyHandle::new(0, 0),
            Point3::origin(),
            Point3::origin(),
        )
        .with_breaking_impulse_threshold(5.0);
        assert!(joint.is_enabled());
        joint.set_enabled(false);
        assert!(!joint.is_enabled());
        assert_relative_eq!(joint.breaking_impulse_threshold(), 5.0);
    }
}
