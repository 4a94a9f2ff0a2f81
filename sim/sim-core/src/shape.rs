//! Collision shapes.
//!
//! Shapes are immutable geometry in the body's local frame. One shape value can
//! back many bodies through an `Arc`. Three kinds cover the pipeline:
//!
//! | Kind | [`ShapeType`] class | Notes |
//! |------|---------------------|-------|
//! | `Box` | polyhedral | full half extents, margin sits inside |
//! | `Sphere` | implicit convex | a point inflated by its radius |
//! | `StaticPlane` | concave | infinite half-space, static bodies only |
//!
//! The ordinal order of [`ShapeType`] is what the dispatch table relies on:
//! only pairs with `a <= b` are registered and the mirrored entry is marked
//! as swapped.

use nalgebra::{Point3, Vector3};
use sim_types::Pose;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::broad_phase::Aabb;

/// Collision margin used by polyhedral shapes.
pub const CONVEX_DISTANCE_MARGIN: f64 = 0.04;

/// Half-size of the bounds reported for unbounded shapes.
pub const LARGE_EXTENT: f64 = 1e18;

/// Shape class, ordered polyhedral < implicit convex < concave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ShapeType {
    /// Oriented box.
    Box,
    /// Sphere.
    Sphere,
    /// Infinite static plane.
    StaticPlane,
}

impl ShapeType {
    /// Number of shape types.
    pub const COUNT: usize = 3;

    /// All shape types in ordinal order.
    pub const ALL: [Self; Self::COUNT] = [Self::Box, Self::Sphere, Self::StaticPlane];

    /// Row/column of this type in the dispatch table.
    #[must_use]
    pub const fn ordinal(self) -> usize {
        match self {
            Self::Box => 0,
            Self::Sphere => 1,
            Self::StaticPlane => 2,
        }
    }

    /// Whether the shape is a polyhedron.
    #[must_use]
    pub const fn is_polyhedral(self) -> bool {
        matches!(self, Self::Box)
    }

    /// Whether the shape is convex.
    #[must_use]
    pub const fn is_convex(self) -> bool {
        matches!(self, Self::Box | Self::Sphere)
    }

    /// Whether the shape is concave (non-convex or unbounded).
    #[must_use]
    pub const fn is_concave(self) -> bool {
        matches!(self, Self::StaticPlane)
    }
}

/// Collision geometry in a body's local frame.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CollisionShape {
    /// Box centered at the origin.
    Box {
        /// Half extents along local x, y, z.
        half_extents: Vector3<f64>,
    },
    /// Sphere centered at the origin.
    Sphere {
        /// Radius.
        radius: f64,
    },
    /// Plane `normal · x = constant`; the solid side is opposite the normal.
    StaticPlane {
        /// Unit normal.
        normal: Vector3<f64>,
        /// Offset along the normal.
        constant: f64,
    },
}

impl CollisionShape {
    /// Box with the given half extents.
    #[must_use]
    pub fn cuboid(half_extents: Vector3<f64>) -> Self {
        Self::Box { half_extents }
    }

    /// Sphere with the given radius.
    #[must_use]
    pub fn sphere(radius: f64) -> Self {
        Self::Sphere { radius }
    }

    /// Plane through `normal * constant`. The normal is normalized.
    #[must_use]
    pub fn static_plane(normal: Vector3<f64>, constant: f64) -> Self {
        Self::StaticPlane {
            normal: normal.try_normalize(f64::EPSILON).unwrap_or_else(Vector3::y),
            constant,
        }
    }

    /// Ground plane `y = height` facing up.
    #[must_use]
    pub fn ground(height: f64) -> Self {
        Self::static_plane(Vector3::y(), height)
    }

    /// Shape class.
    #[must_use]
    pub fn shape_type(&self) -> ShapeType {
        match self {
            Self::Box { .. } => ShapeType::Box,
            Self::Sphere { .. } => ShapeType::Sphere,
            Self::StaticPlane { .. } => ShapeType::StaticPlane,
        }
    }

    /// Collision margin.
    ///
    /// A sphere is a point with a margin of its radius; a box keeps its margin
    /// inside its half extents; a plane has none.
    #[must_use]
    pub fn margin(&self) -> f64 {
        match self {
            Self::Box { .. } => CONVEX_DISTANCE_MARGIN,
            Self::Sphere { radius } => *radius,
            Self::StaticPlane { .. } => 0.0,
        }
    }

    /// World-space bounds at a pose, margin included.
    #[must_use]
    pub fn aabb(&self, pose: &Pose) -> Aabb {
        match self {
            Self::Box { half_extents } => {
                // |R| * h gives the tight extents of a rotated box.
                let abs_basis = pose.basis().abs();
                Aabb::from_center(pose.position, abs_basis * half_extents)
            }
            Self::Sphere { radius } => {
                Aabb::from_center(pose.position, Vector3::repeat(*radius))
            }
            Self::StaticPlane { normal, constant } => {
                let world_normal = pose.transform_vector(normal);
                let point = pose.transform_point(&Point3::from(normal * *constant));
                let mut min = Point3::from(Vector3::repeat(-LARGE_EXTENT));
                let mut max = Point3::from(Vector3::repeat(LARGE_EXTENT));
                // Axis-aligned planes get thin bounds on their normal axis.
                for axis in 0..3 {
                    if world_normal[axis].abs() > 1.0 - 1e-9 {
                        min[axis] = point[axis];
                        max[axis] = point[axis];
                    }
                }
                Aabb::new(min, max)
            }
        }
    }

    /// Farthest point of the shape along `direction`, margin included.
    ///
    /// Returns `None` for shapes without a support mapping.
    #[must_use]
    pub fn local_supporting_vertex(&self, direction: &Vector3<f64>) -> Option<Point3<f64>> {
        match self {
            Self::Box { half_extents } => Some(Point3::new(
                half_extents.x.copysign(direction.x),
                half_extents.y.copysign(direction.y),
                half_extents.z.copysign(direction.z),
            )),
            Self::Sphere { radius } => {
                let dir = direction
                    .try_normalize(f64::EPSILON)
                    .unwrap_or_else(Vector3::x);
                Some(Point3::from(dir * *radius))
            }
            Self::StaticPlane { .. } => None,
        }
    }

    /// Diagonal of the local inertia tensor for a given mass.
    #[must_use]
    pub fn calculate_local_inertia(&self, mass: f64) -> Vector3<f64> {
        match self {
            Self::Box { half_extents } => {
                let l = half_extents * 2.0;
                let (x2, y2, z2) = (l.x * l.x, l.y * l.y, l.z * l.z);
                Vector3::new(y2 + z2, x2 + z2, x2 + y2) * (mass / 12.0)
            }
            Self::Sphere { radius } => Vector3::repeat(0.4 * mass * radius * radius),
            Self::StaticPlane { .. } => Vector3::zeros(),
        }
    }

    /// Radius of a sphere that encloses the shape, for motion bounds.
    #[must_use]
    pub fn bounding_radius(&self) -> f64 {
        match self {
            Self::Box { half_extents } => half_extents.norm(),
            Self::Sphere { radius } => *radius,
            Self::StaticPlane { .. } => LARGE_EXTENT,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    #[test]
    fn test_shape_type_order() {
        assert!(ShapeType::Box < ShapeType::Sphere);
        assert!(ShapeType::Sphere < ShapeType::StaticPlane);
        assert!(ShapeType::Box.is_polyhedral());
        assert!(ShapeType::StaticPlane.is_concave());
        for (i, ty) in ShapeType::ALL.iter().enumerate() {
            assert_eq!(ty.ordinal(), i);
        }
    }

    #[test]
    fn test_box_aabb_rotated() {
        let shape = CollisionShape::cuboid(Vector3::new(1.0, 0.5, 0.5));
        let pose = Pose::from_position_rotation(
            Point3::new(0.0, 2.0, 0.0),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_2),
        );
        let aabb = shape.aabb(&pose);
        assert_relative_eq!(aabb.min.x, -0.5, epsilon = 1e-10);
        assert_relative_eq!(aabb.max.y, 3.0, epsilon = 1e-10);
    }

    #[test]
    fn test_sphere_aabb_and_support() {
        let shape = CollisionShape::sphere(0.5);
        let aabb = shape.aabb(&Pose::from_position(Point3::new(1.0, 0.0, 0.0)));
        assert_relative_eq!(aabb.min.x, 0.5, epsilon = 1e-12);
        assert_relative_eq!(aabb.max.x, 1.5, epsilon = 1e-12);

        let support = shape
            .local_supporting_vertex(&Vector3::new(0.0, 2.0, 0.0))
            .unwrap();
        assert_relative_eq!(support.y, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_box_support_picks_corner() {
        let shape = CollisionShape::cuboid(Vector3::new(1.0, 2.0, 3.0));
        let support = shape
            .local_supporting_vertex(&Vector3::new(-1.0, 1.0, -0.1))
            .unwrap();
        assert_eq!(support, Point3::new(-1.0, 2.0, -3.0));
    }

    #[test]
    fn test_plane_aabb_is_thin_along_normal() {
        let shape = CollisionShape::ground(0.0);
        let aabb = shape.aabb(&Pose::identity());
        assert_eq!(aabb.min.y, 0.0);
        assert_eq!(aabb.max.y, 0.0);
        assert!(aabb.max.x >= LARGE_EXTENT);
        assert!(shape.local_supporting_vertex(&Vector3::y()).is_none());
    }

    #[test]
    fn test_local_inertia() {
        let cube = CollisionShape::cuboid(Vector3::repeat(0.5));
        assert_relative_eq!(cube.calculate_local_inertia(6.0), Vector3::repeat(1.0), epsilon = 1e-12);

        let ball = CollisionShape::sphere(1.0);
        assert_relative_eq!(ball.calculate_local_inertia(5.0).x, 2.0, epsilon = 1e-12);

        assert_eq!(CollisionShape::ground(0.0).calculate_local_inertia(1.0), Vector3::zeros());
    }
}
