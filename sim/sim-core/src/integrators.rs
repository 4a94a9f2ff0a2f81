//! Transform and velocity integration helpers.
//!
//! The pipeline is semi-implicit Euler: forces update velocities first, the
//! solver corrects them, then the corrected velocities move the transform.
//!
//! ```text
//! v(t+dt) = v(t) + M⁻¹ F dt        (integrate_velocities)
//! v'      = solve(v(t+dt))          (constraint solver)
//! x(t+dt) = x(t) + v' dt            (integrate_transform)
//! ```
//!
//! # Example
//!
//! ```
//! use sim_core::integrators::integrate_transform;
//! use sim_types::Pose;
//! use nalgebra::{Point3, Vector3};
//!
//! let pose = Pose::from_position(Point3::new(0.0, 10.0, 0.0));
//! let next = integrate_transform(&pose, &Vector3::new(0.0, -1.0, 0.0), &Vector3::zeros(), 0.5);
//!
//! assert!((next.position.y - 9.5).abs() < 1e-12);
//! ```

use std::f64::consts::FRAC_PI_2;

use nalgebra::{UnitQuaternion, Vector3};
use sim_types::Pose;

/// Largest rotation a body may make in a single step.
pub const MAX_ANGULAR_STEP: f64 = FRAC_PI_2;

/// Advance a pose by constant world-space velocities over `dt`.
#[must_use]
pub fn integrate_transform(
    pose: &Pose,
    linear_velocity: &Vector3<f64>,
    angular_velocity: &Vector3<f64>,
    dt: f64,
) -> Pose {
    let mut rotation = pose.rotation;
    integrate_rotation(&mut rotation, angular_velocity, dt);
    Pose::from_position_rotation(pose.position + linear_velocity * dt, rotation)
}

/// Rotate by `omega * dt` using the exponential map.
///
/// `omega` is in world space, so the increment composes on the left.
pub fn integrate_rotation(rotation: &mut UnitQuaternion<f64>, omega: &Vector3<f64>, dt: f64) {
    let scaled = omega * dt;
    if scaled.norm_squared() < 1e-20 {
        return;
    }

    let delta_q = UnitQuaternion::from_scaled_axis(scaled);
    *rotation = UnitQuaternion::new_normalize((delta_q * *rotation).into_inner());
}

/// Scale `omega` down so that `|omega| * dt <= MAX_ANGULAR_STEP`.
#[must_use]
pub fn clamp_angular_step(omega: &Vector3<f64>, dt: f64) -> Vector3<f64> {
    let angle = omega.norm() * dt;
    if angle > MAX_ANGULAR_STEP {
        omega * (MAX_ANGULAR_STEP / angle)
    } else {
        *omega
    }
}

/// Per-step damping factor `(1 - damping)^dt`.
#[must_use]
pub fn damping_factor(damping: f64, dt: f64) -> f64 {
    (1.0 - damping.clamp(0.0, 1.0)).powf(dt)
}

/// Apply `(1 - d)^dt` damping to a pair of velocities.
#[must_use]
pub fn apply_damping(
    linear: &Vector3<f64>,
    angular: &Vector3<f64>,
    linear_damping: f64,
    angular_damping: f64,
    dt: f64,
) -> (Vector3<f64>, Vector3<f64>) {
    (
        linear * damping_factor(linear_damping, dt),
        angular * damping_factor(angular_damping, dt),
    )
}

/// Velocities that move `from` onto `to` in `dt`.
///
/// Used to give kinematic bodies a velocity the solver can see.
#[must_use]
pub fn calculate_velocity(from: &Pose, to: &Pose, dt: f64) -> (Vector3<f64>, Vector3<f64>) {
    if dt <= 0.0 {
        return (Vector3::zeros(), Vector3::zeros());
    }
    let linear = (to.position - from.position) / dt;
    let delta = to.rotation * from.rotation.inverse();
    let angular = delta.scaled_axis() / dt;
    (linear, angular)
}
