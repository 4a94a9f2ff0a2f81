//! Cached contact points.

use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Per-point state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct ContactPointFlags: u32 {
        /// `lateral_friction_dir1/2` hold directions from a previous step.
        const LATERAL_FRICTION_INITIALIZED = 0b0001;
        /// The point anchors static friction: while its lateral impulse stays
        /// inside the friction cone, refreshed geometry keeps its warm start.
        const FRICTION_ANCHOR = 0b0010;
    }
}

/// A single contact between two bodies, persisted across steps.
///
/// Positions are kept in each body's local frame so the point can be
/// re-projected into world space after the bodies move. The world normal
/// points from body B towards body A; `distance` is negative while the
/// bodies interpenetrate.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ManifoldPoint {
    /// Contact location in body A's local frame.
    pub local_point_a: Point3<f64>,
    /// Contact location in body B's local frame.
    pub local_point_b: Point3<f64>,
    /// Contact location on body A in world space.
    pub position_world_on_a: Point3<f64>,
    /// Contact location on body B in world space.
    pub position_world_on_b: Point3<f64>,
    /// Contact normal in world space, pointing from B to A.
    pub normal_world_on_b: Vector3<f64>,
    /// Signed separation along the normal (negative = penetration).
    pub distance: f64,
    /// Friction coefficient of the material pair.
    pub combined_friction: f64,
    /// Restitution coefficient of the material pair.
    pub combined_restitution: f64,
    /// Normal impulse accumulated by the solver in the last step.
    pub applied_impulse: f64,
    /// Impulse along `lateral_friction_dir1` from the last step.
    pub applied_impulse_lateral1: f64,
    /// Impulse along `lateral_friction_dir2` from the last step.
    pub applied_impulse_lateral2: f64,
    /// First friction direction.
    pub lateral_friction_dir1: Vector3<f64>,
    /// Second friction direction.
    pub lateral_friction_dir2: Vector3<f64>,
    /// Point state bits.
    pub flags: ContactPointFlags,
    /// Number of refreshes this point has survived.
    pub life_time: u32,
    /// Opaque user data; reported through the contact-destroyed hook when the
    /// point is dropped.
    pub user_persistent_data: Option<u64>,
}

impl ManifoldPoint {
    /// Create a point from local positions, the world normal and distance.
    ///
    /// World positions start at the local positions; narrow phase overwrites
    /// them before the point is cached.
    #[must_use]
    pub fn new(
        local_point_a: Point3<f64>,
        local_point_b: Point3<f64>,
        normal_world_on_b: Vector3<f64>,
        distance: f64,
    ) -> Self {
        Self {
            local_point_a,
            local_point_b,
            position_world_on_a: local_point_a,
            position_world_on_b: local_point_b,
            normal_world_on_b,
            distance,
            combined_friction: 0.0,
            combined_restitution: 0.0,
            applied_impulse: 0.0,
            applied_impulse_lateral1: 0.0,
            applied_impulse_lateral2: 0.0,
            lateral_friction_dir1: Vector3::zeros(),
            lateral_friction_dir2: Vector3::zeros(),
            flags: ContactPointFlags::empty(),
            life_time: 0,
            user_persistent_data: None,
        }
    }

    /// Set world-space positions.
    #[must_use]
    pub fn with_world_positions(mut self, on_a: Point3<f64>, on_b: Point3<f64>) -> Self {
        self.position_world_on_a = on_a;
        self.position_world_on_b = on_b;
        self
    }

    /// Set combined material coefficients.
    #[must_use]
    pub fn with_material(mut self, friction: f64, restitution: f64) -> Self {
        self.combined_friction = friction;
        self.combined_restitution = restitution;
        self
    }

    /// Whether the point is flagged as a friction anchor.
    #[must_use]
    pub fn is_friction_anchor(&self) -> bool {
        self.flags.contains(ContactPointFlags::FRICTION_ANCHOR)
    }

    /// Whether the accumulated lateral impulse lies outside the Coulomb cone
    /// spanned by the accumulated normal impulse.
    #[must_use]
    pub fn exceeds_friction_cone(&self) -> bool {
        let lateral_sq = self.applied_impulse_lateral1 * self.applied_impulse_lateral1
            + self.applied_impulse_lateral2 * self.applied_impulse_lateral2;
        let limit = self.combined_friction * self.applied_impulse;
        lateral_sq > limit * limit
    }

    /// Distance drifted tangentially since the point was cached, squared.
    ///
    /// Projects the point on A back onto B's surface along the normal and
    /// measures how far it lands from the point on B.
    #[must_use]
    pub fn tangential_drift_squared(&self) -> f64 {
        let projected = self.position_world_on_a - self.normal_world_on_b * self.distance;
        (self.position_world_on_b - projected).norm_squared()
    }

    /// Copy solver warm-start state from an older point.
    pub(crate) fn inherit_warm_start(&mut self, old: &Self) {
        self.applied_impulse = old.applied_impulse;
        self.applied_impulse_lateral1 = old.applied_impulse_lateral1;
        self.applied_impulse_lateral2 = old.applied_impulse_lateral2;
        self.life_time = old.life_time;
        if old
            .flags
            .contains(ContactPointFlags::LATERAL_FRICTION_INITIALIZED)
        {
            self.lateral_friction_dir1 = old.lateral_friction_dir1;
            self.lateral_friction_dir2 = old.lateral_friction_dir2;
            self.flags |= ContactPointFlags::LATERAL_FRICTION_INITIALIZED;
        }
        self.user_persistent_data = old.user_persistent_data;
    }
}
