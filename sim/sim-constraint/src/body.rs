//! Per-body state seen by the solver.

use nalgebra::{Matrix3, Point3, Vector3};
use sim_types::Pose;

/// Snapshot of one body's dynamic state for the duration of a solve.
///
/// The world fills one `SolverBody` per body slot before solving and reads
/// the velocities back afterwards. Static, sleeping and vacant slots get a
/// [`SolverBody::fixed`] entry, which no impulse can move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverBody {
    /// Center-of-mass frame in world space.
    pub pose: Pose,
    /// Inverse mass per axis, already scaled by the linear factor.
    pub inv_mass: Vector3<f64>,
    /// Inverse inertia tensor in world space.
    pub inv_inertia_world: Matrix3<f64>,
    /// Per-axis angular freeze mask.
    pub angular_factor: Vector3<f64>,
    /// Linear velocity.
    pub linear_velocity: Vector3<f64>,
    /// Angular velocity.
    pub angular_velocity: Vector3<f64>,
    /// Split-impulse linear pseudo-velocity.
    pub push_velocity: Vector3<f64>,
    /// Split-impulse angular pseudo-velocity.
    pub turn_velocity: Vector3<f64>,
}

impl Default for SolverBody {
    fn default() -> Self {
        Self::fixed(Pose::identity())
    }
}

impl SolverBody {
    /// Immovable body at a pose.
    #[must_use]
    pub fn fixed(pose: Pose) -> Self {
        Self {
            pose,
            inv_mass: Vector3::zeros(),
            inv_inertia_world: Matrix3::zeros(),
            angular_factor: Vector3::zeros(),
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            push_velocity: Vector3::zeros(),
            turn_velocity: Vector3::zeros(),
        }
    }

    /// Center of mass in world space.
    #[must_use]
    pub fn center_of_mass(&self) -> Point3<f64> {
        self.pose.position
    }

    /// Whether impulses can change this body's velocity.
    #[must_use]
    pub fn is_fixed(&self) -> bool {
        self.inv_mass == Vector3::zeros() && self.angular_factor == Vector3::zeros()
    }

    /// Velocity of a point at offset `rel_pos` from the center of mass.
    #[must_use]
    pub fn velocity_at(&self, rel_pos: &Vector3<f64>) -> Vector3<f64> {
        self.linear_velocity + self.angular_velocity.cross(rel_pos)
    }

    /// Angular response to a unit impulse along a torque axis.
    #[must_use]
    pub fn angular_component(&self, torque_axis: &Vector3<f64>) -> Vector3<f64> {
        (self.inv_inertia_world * torque_axis).component_mul(&self.angular_factor)
    }

    /// Apply an impulse of `magnitude` along a Jacobian row.
    pub(crate) fn apply_impulse(
        &mut self,
        linear: &Vector3<f64>,
        angular_component: &Vector3<f64>,
        magnitude: f64,
    ) {
        self.linear_velocity += linear.component_mul(&self.inv_mass) * magnitude;
        self.angular_velocity += angular_component * magnitude;
    }

    /// Apply a split impulse to the pseudo-velocities.
    pub(crate) fn apply_push_impulse(
        &mut self,
        linear: &Vector3<f64>,
        angular_component: &Vector3<f64>,
        magnitude: f64,
    ) {
        self.push_velocity += linear.component_mul(&self.inv_mass) * magnitude;
        self.turn_velocity += angular_component * magnitude;
    }
}
