//! Surface materials, pair combination rules and friction geometry.

use nalgebra::Vector3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Upper bound on the combined friction coefficient.
pub const MAX_FRICTION: f64 = 10.0;

/// Surface properties of a collision object.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Material {
    /// Coulomb friction coefficient.
    pub friction: f64,
    /// Coefficient of restitution (0 = inelastic, 1 = elastic).
    pub restitution: f64,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            friction: 0.5,
            restitution: 0.0,
        }
    }
}

impl Material {
    /// Create a material.
    #[must_use]
    pub fn new(friction: f64, restitution: f64) -> Self {
        Self {
            friction,
            restitution,
        }
    }

    /// Frictionless, inelastic material.
    #[must_use]
    pub fn frictionless() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Combined friction and restitution of two materials.
    #[must_use]
    pub fn combine(&self, other: &Self) -> (f64, f64) {
        (
            combine_friction(self.friction, other.friction),
            combine_restitution(self.restitution, other.restitution),
        )
    }
}

/// Pair friction: product of both coefficients, clamped to
/// `[-MAX_FRICTION, MAX_FRICTION]`.
#[must_use]
pub fn combine_friction(a: f64, b: f64) -> f64 {
    (a * b).clamp(-MAX_FRICTION, MAX_FRICTION)
}

/// Pair restitution: product of both coefficients.
#[must_use]
pub fn combine_restitution(a: f64, b: f64) -> f64 {
    a * b
}

/// Friction cone `|lateral| <= mu * normal`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FrictionCone {
    /// Coulomb friction coefficient.
    pub mu: f64,
}

impl FrictionCone {
    /// Create a cone; negative coefficients are treated as zero.
    #[must_use]
    pub fn new(mu: f64) -> Self {
        Self { mu: mu.max(0.0) }
    }

    /// Largest lateral impulse magnitude allowed for a normal impulse.
    #[must_use]
    pub fn limit(&self, normal_impulse: f64) -> f64 {
        self.mu * normal_impulse.max(0.0)
    }

    /// Clamp one lateral impulse component to the pyramid approximation of the
    /// cone.
    #[must_use]
    pub fn clamp(&self, lateral_impulse: f64, normal_impulse: f64) -> f64 {
        let limit = self.limit(normal_impulse);
        lateral_impulse.clamp(-limit, limit)
    }
}

/// Two unit vectors spanning the plane orthogonal to `n`.
///
/// `n` must be unit length. The returned `(p, q)` satisfy `q = n × p`, so
/// `(n, p, q)` is right-handed.
#[must_use]
pub fn plane_space(n: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    debug_assert!((n.norm_squared() - 1.0).abs() < 1e-6, "plane_space needs a unit normal");
    if n.z.abs() > std::f64::consts::FRAC_1_SQRT_2 {
        // Choose p in the y-z plane.
        let a = n.y * n.y + n.z * n.z;
        let k = 1.0 / a.sqrt();
        let p = Vector3::new(0.0, -n.z * k, n.y * k);
        let q = Vector3::new(a * k, -n.x * p.z, n.x * p.y);
        (p, q)
    } else {
        // Choose p in the x-y plane.
        let a = n.x * n.x + n.y * n.y;
        let k = 1.0 / a.sqrt();
        let p = Vector3::new(-n.y * k, n.x * k, 0.0);
        let q = Vector3::new(-n.z * p.y, n.z * p.x, a * k);
        (p, q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_combine_rules() {
        assert_relative_eq!(combine_friction(0.5, 0.4), 0.2);
        assert_relative_eq!(combine_friction(5.0, 5.0), MAX_FRICTION);
        assert_relative_eq!(combine_restitution(0.5, 0.5), 0.25);

        let (f, r) = Material::new(1.0, 0.8).combine(&Material::frictionless());
        assert_relative_eq!(f, 0.0);
        assert_relative_eq!(r, 0.0);
    }

    #[test]
    fn test_friction_cone_clamp() {
        let cone = FrictionCone::new(0.5);
        assert_relative_eq!(cone.clamp(3.0, 2.0), 1.0);
        assert_relative_eq!(cone.clamp(-3.0, 2.0), -1.0);
        assert_relative_eq!(cone.clamp(0.4, 2.0), 0.4);
        assert_relative_eq!(cone.limit(-1.0), 0.0);
    }

    #[test]
    fn test_plane_space_is_orthonormal() {
        let normals = [
            Vector3::x(),
            Vector3::y(),
            Vector3::z(),
            Vector3::new(1.0, 2.0, 3.0).normalize(),
            Vector3::new(-0.3, 0.1, -0.9).normalize(),
        ];
        for n in normals {
            let (p, q) = plane_space(&n);
            assert_relative_eq!(p.norm(), 1.0, epsilon = 1e-12);
            assert_relative_eq!(q.norm(), 1.0, epsilon = 1e-12);
            assert_relative_eq!(p.dot(&n), 0.0, epsilon = 1e-12);
            assert_relative_eq!(q.dot(&n), 0.0, epsilon = 1e-12);
            assert_relative_eq!(p.dot(&q), 0.0, epsilon = 1e-12);
            assert_relative_eq!(n.cross(&p), q, epsilon = 1e-12);
        }
    }
}
