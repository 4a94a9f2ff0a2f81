//! Narrow phase: exact contact generation for one overlapping pair.
//!
//! Algorithms report points through [`ContactResult`] in their own body
//! order: the normal points from their second body to their first and the
//! point lies on the second body's surface. [`ManifoldResult`] converts that
//! into the manifold's order (undoing a swapped dispatch), merges each point
//! into the persistent cache and runs the contact-added hook.

use nalgebra::{Point3, Vector3};
use sim_contact::{ContactHooks, ContactPointFlags, ManifoldPoint, PersistentManifold};
use sim_types::{CollisionFlags, Pose};
use tracing::trace;

use crate::box_box::box_box;
use crate::dispatcher::{AlgorithmKind, DispatchEntry};
use crate::rigid_body::RigidBody;
use crate::shape::CollisionShape;

/// Sink for contact points produced by an algorithm.
pub trait ContactResult {
    /// Report a contact.
    ///
    /// `normal_on_b` points from the second body to the first, `point_on_b`
    /// lies on the second body and `depth` is the signed separation
    /// (negative while penetrating).
    fn add_contact_point(&mut self, normal_on_b: &Vector3<f64>, point_on_b: &Point3<f64>, depth: f64);

    /// Separation beyond which points are not worth reporting.
    fn breaking_threshold(&self) -> f64;
}

/// Feeds algorithm output into a persistent manifold.
#[derive(Debug)]
pub struct ManifoldResult<'a> {
    manifold: &'a mut PersistentManifold,
    hooks: &'a ContactHooks,
    pose0: Pose,
    pose1: Pose,
    swapped: bool,
    friction: f64,
    restitution: f64,
    friction_anchor: bool,
}

impl<'a> ManifoldResult<'a> {
    /// Result for the manifold of `body0` (A) and `body1` (B).
    ///
    /// `swapped` means the algorithm will see the bodies as `(body1, body0)`.
    pub fn new(
        manifold: &'a mut PersistentManifold,
        hooks: &'a ContactHooks,
        body0: &RigidBody,
        body1: &RigidBody,
        swapped: bool,
    ) -> Self {
        let (friction, restitution) = body0.material().combine(&body1.material());
        let friction_anchor = body0.flags().contains(CollisionFlags::FRICTION_ANCHOR)
            || body1.flags().contains(CollisionFlags::FRICTION_ANCHOR);
        Self {
            manifold,
            hooks,
            pose0: *body0.world_transform(),
            pose1: *body1.world_transform(),
            swapped,
            friction,
            restitution,
            friction_anchor,
        }
    }

    /// Re-project the cached points with the bodies' current poses.
    pub fn refresh_contact_points(&mut self) {
        self.manifold
            .refresh_contact_points(&self.pose0, &self.pose1, self.hooks);
    }

    /// The manifold being filled.
    #[must_use]
    pub fn manifold(&self) -> &PersistentManifold {
        self.manifold
    }
}

impl ContactResult for ManifoldResult<'_> {
    fn add_contact_point(&mut self, normal_on_b: &Vector3<f64>, point_on_b: &Point3<f64>, depth: f64) {
        if depth > self.manifold.contact_breaking_threshold() {
            return;
        }

        let (normal, on_a, on_b) = if self.swapped {
            (-normal_on_b, *point_on_b, point_on_b + normal_on_b * depth)
        } else {
            (*normal_on_b, point_on_b + normal_on_b * depth, *point_on_b)
        };

        let local_a = self.pose0.inverse_transform_point(&on_a);
        let local_b = self.pose1.inverse_transform_point(&on_b);
        let mut point = ManifoldPoint::new(local_a, local_b, normal, depth)
            .with_world_positions(on_a, on_b)
            .with_material(self.friction, self.restitution);
        if self.friction_anchor {
            point.flags |= ContactPointFlags::FRICTION_ANCHOR;
        }

        let index = match self.manifold.cache_entry(&point) {
            Some(index) => match self.manifold.replace_contact_point(point, index, self.hooks) {
                Ok(()) => index,
                Err(err) => {
                    trace!(%err, "cache entry vanished before replacement");
                    return;
                }
            },
            None => self.manifold.add_manifold_point(point, self.hooks),
        };

        if self.hooks.has_contact_added() {
            let (body0, body1) = (self.manifold.body0(), self.manifold.body1());
            if let Ok(point) = self.manifold.contact_point_mut(index) {
                self.hooks.contact_added(point, body0, body1);
            }
        }
    }

    fn breaking_threshold(&self) -> f64 {
        self.manifold.contact_breaking_threshold()
    }
}

/// Run the dispatched algorithm for a pair.
///
/// `body0` and `body1` are in pair order; the entry's `swapped` bit decides
/// the order the algorithm sees them in.
pub fn process_collision(
    entry: DispatchEntry,
    body0: &RigidBody,
    body1: &RigidBody,
    result: &mut dyn ContactResult,
) {
    let (a, b) = if entry.swapped {
        (body1, body0)
    } else {
        (body0, body1)
    };
    let (pose_a, pose_b) = (a.world_transform(), b.world_transform());

    match (entry.algorithm, a.collision_shape().as_ref(), b.collision_shape().as_ref()) {
        (AlgorithmKind::Empty, _, _) => {}
        (
            AlgorithmKind::SphereSphere,
            CollisionShape::Sphere { radius: ra },
            CollisionShape::Sphere { radius: rb },
        ) => sphere_sphere(pose_a, *ra, pose_b, *rb, result),
        (
            AlgorithmKind::BoxSphere,
            CollisionShape::Box { half_extents },
            CollisionShape::Sphere { radius },
        ) => box_sphere(pose_a, half_extents, pose_b, *radius, result),
        (
            AlgorithmKind::BoxBox,
            CollisionShape::Box { half_extents: ha },
            CollisionShape::Box { half_extents: hb },
        ) => {
            let threshold = result.breaking_threshold();
            box_box(pose_a, ha, pose_b, hb, threshold, result);
        }
        (
            AlgorithmKind::ConvexPlane,
            convex,
            CollisionShape::StaticPlane { normal, constant },
        ) => convex_plane(pose_a, convex, pose_b, normal, *constant, result),
        (algorithm, sa, sb) => {
            trace!(
                ?algorithm,
                a = ?sa.shape_type(),
                b = ?sb.shape_type(),
                "algorithm does not handle this shape pair"
            );
        }
    }
}

/// Two spheres.
pub fn sphere_sphere(
    pose_a: &Pose,
    radius_a: f64,
    pose_b: &Pose,
    radius_b: f64,
    out: &mut dyn ContactResult,
) {
    let diff = pose_a.position - pose_b.position;
    let len = diff.norm();
    let depth = len - radius_a - radius_b;
    if depth > out.breaking_threshold() {
        return;
    }
    // Concentric spheres push apart along +x.
    let normal = if len > f64::EPSILON {
        diff / len
    } else {
        Vector3::x()
    };
    let point_on_b = pose_b.position + normal * radius_b;
    out.add_contact_point(&normal, &point_on_b, depth);
}

/// Box (first) against sphere (second).
pub fn box_sphere(
    box_pose: &Pose,
    half_extents: &Vector3<f64>,
    sphere_pose: &Pose,
    radius: f64,
    out: &mut dyn ContactResult,
) {
    let center = box_pose.inverse_transform_point(&sphere_pose.position);
    let closest = Point3::new(
        center.x.clamp(-half_extents.x, half_extents.x),
        center.y.clamp(-half_extents.y, half_extents.y),
        center.z.clamp(-half_extents.z, half_extents.z),
    );

    let diff = center - closest;
    let len = diff.norm();
    // Outward box normal (from the box towards the sphere) and separation.
    let (local_normal, depth) = if len > f64::EPSILON {
        (diff / len, len - radius)
    } else {
        // Center inside the box: leave through the nearest face.
        let (axis, face_distance) = (0..3)
            .map(|k| (k, half_extents[k] - center[k].abs()))
            .min_by(|x, y| x.1.total_cmp(&y.1))
            .unwrap_or((0, half_extents.x - center.x.abs()));
        let mut n = Vector3::zeros();
        n[axis] = if center[axis] < 0.0 { -1.0 } else { 1.0 };
        (n, -face_distance - radius)
    };

    if depth > out.breaking_threshold() {
        return;
    }
    let normal_on_b = -box_pose.transform_vector(&local_normal);
    let point_on_b = sphere_pose.position + normal_on_b * radius;
    out.add_contact_point(&normal_on_b, &point_on_b, depth);
}

/// Convex shape (first) against a static plane (second).
pub fn convex_plane(
    convex_pose: &Pose,
    convex: &CollisionShape,
    plane_pose: &Pose,
    plane_normal: &Vector3<f64>,
    plane_constant: f64,
    out: &mut dyn ContactResult,
) {
    let normal = plane_pose.transform_vector(plane_normal);
    let origin = plane_pose.transform_point(&Point3::from(plane_normal * plane_constant));
    let offset = normal.dot(&origin.coords);
    let threshold = out.breaking_threshold();

    let mut report = |p: Point3<f64>| {
        let depth = normal.dot(&p.coords) - offset;
        if depth <= threshold {
            out.add_contact_point(&normal, &(p - normal * depth), depth);
        }
    };

    match convex {
        CollisionShape::Box { half_extents } => {
            for corner in 0..8_u8 {
                let local = Point3::new(
                    if corner & 1 == 0 { -half_extents.x } else { half_extents.x },
                    if corner & 2 == 0 { -half_extents.y } else { half_extents.y },
                    if corner & 4 == 0 { -half_extents.z } else { half_extents.z },
                );
                report(convex_pose.transform_point(&local));
            }
        }
        CollisionShape::Sphere { radius } => {
            report(convex_pose.position - normal * *radius);
        }
        CollisionShape::StaticPlane { .. } => {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use approx::assert_relative_eq;
    use sim_contact::Material;
    use sim_types::BodyHandle;

    use crate::dispatcher::DispatchTable;
    use crate::shape::ShapeType;

    /// Records raw algorithm output.
    #[derive(Debug)]
    pub(crate) struct Collector {
        pub points: Vec<(Vector3<f64>, Point3<f64>, f64)>,
        pub threshold: f64,
    }

    impl Default for Collector {
        fn default() -> Self {
            Self {
                points: Vec::new(),
                threshold: 0.02,
            }
        }
    }

    impl ContactResult for Collector {
        fn add_contact_point(&mut self, normal_on_b: &Vector3<f64>, point_on_b: &Point3<f64>, depth: f64) {
            self.points.push((*normal_on_b, *point_on_b, depth));
        }

        fn breaking_threshold(&self) -> f64 {
            self.threshold
        }
    }

    fn at(x: f64, y: f64, z: f64) -> Pose {
        Pose::from_position(Point3::new(x, y, z))
    }

    #[test]
    fn test_sphere_sphere_overlap() {
        let mut out = Collector::default();
        sphere_sphere(&at(0.0, 1.9, 0.0), 1.0, &Pose::identity(), 1.0, &mut out);
        let (normal, on_b, depth) = out.points[0];
        assert_relative_eq!(normal, Vector3::y(), epsilon = 1e-12);
        assert_relative_eq!(on_b, Point3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(depth, -0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_sphere_sphere_beyond_threshold() {
        let mut out = Collector::default();
        sphere_sphere(&at(3.0, 0.0, 0.0), 1.0, &Pose::identity(), 1.0, &mut out);
        assert!(out.points.is_empty());
    }

    #[test]
    fn test_box_sphere_outside() {
        let mut out = Collector::default();
        box_sphere(&Pose::identity(), &Vector3::repeat(1.0), &at(0.0, 1.4, 0.0), 0.5, &mut out);
        let (normal, on_b, depth) = out.points[0];
        // Normal points from the sphere towards the box.
        assert_relative_eq!(normal, -Vector3::y(), epsilon = 1e-12);
        assert_relative_eq!(on_b.y, 0.9, epsilon = 1e-12);
        assert_relative_eq!(depth, -0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_box_sphere_center_inside() {
        let mut out = Collector::default();
        box_sphere(&Pose::identity(), &Vector3::repeat(1.0), &at(0.8, 0.0, 0.0), 0.5, &mut out);
        let (normal, _, depth) = out.points[0];
        assert_relative_eq!(normal, -Vector3::x(), epsilon = 1e-12);
        assert_relative_eq!(depth, -0.7, epsilon = 1e-12);
    }

    #[test]
    fn test_box_on_plane_reports_bottom_corners() {
        let mut out = Collector::default();
        convex_plane(
            &at(0.0, 0.49, 0.0),
            &CollisionShape::cuboid(Vector3::repeat(0.5)),
            &Pose::identity(),
            &Vector3::y(),
            0.0,
            &mut out,
        );
        assert_eq!(out.points.len(), 4);
        for (normal, on_b, depth) in &out.points {
            assert_eq!(*normal, Vector3::y());
            assert_relative_eq!(*depth, -0.01, epsilon = 1e-12);
            assert_relative_eq!(on_b.y, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_sphere_on_raised_plane() {
        let mut out = Collector::default();
        convex_plane(
            &at(0.0, 2.4, 0.0),
            &CollisionShape::sphere(0.5),
            &Pose::identity(),
            &Vector3::y(),
            2.0,
            &mut out,
        );
        let (_, on_b, depth) = out.points[0];
        assert_relative_eq!(depth, -0.1, epsilon = 1e-12);
        assert_relative_eq!(on_b.y, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_swapped_dispatch_flips_into_manifold_order() {
        // Pair order (sphere, box): the table routes it to box-sphere swapped.
        let sphere = RigidBody::dynamic(Arc::new(CollisionShape::sphere(0.5)), 1.0, at(0.0, 1.4, 0.0));
        let cube = RigidBody::fixed(Arc::new(CollisionShape::cuboid(Vector3::repeat(1.0))), Pose::identity());
        let entry = DispatchTable::new().find(ShapeType::Sphere, ShapeType::Box);
        assert!(entry.swapped);

        let hooks = ContactHooks::new();
        let mut manifold = PersistentManifold::new(BodyHandle::new(0, 0), BodyHandle::new(1, 0), 0.02, f64::MAX);
        let mut result = ManifoldResult::new(&mut manifold, &hooks, &sphere, &cube, entry.swapped);
        process_collision(entry, &sphere, &cube, &mut result);

        assert_eq!(manifold.num_contacts(), 1);
        let point = &manifold.points()[0];
        // Normal from the box (B) towards the sphere (A).
        assert_relative_eq!(point.normal_world_on_b, Vector3::y(), epsilon = 1e-12);
        assert_relative_eq!(point.position_world_on_a.y, 0.9, epsilon = 1e-12);
        assert_relative_eq!(point.position_world_on_b.y, 1.0, epsilon = 1e-12);
        assert_relative_eq!(point.distance, -0.1, epsilon = 1e-12);
        let recomputed = (point.position_world_on_a - point.position_world_on_b).dot(&point.normal_world_on_b);
        assert_relative_eq!(recomputed, point.distance, epsilon = 1e-12);
    }

    #[test]
    fn test_manifold_result_merges_and_combines_material() {
        let ground = RigidBody::fixed(Arc::new(CollisionShape::ground(0.0)), Pose::identity())
            .with_material(Material::new(0.5, 0.0));
        let ball = RigidBody::dynamic(Arc::new(CollisionShape::sphere(0.5)), 1.0, at(0.0, 0.49, 0.0))
            .with_material(Material::new(0.8, 0.0));
        let entry = DispatchTable::new().find(ShapeType::Sphere, ShapeType::StaticPlane);

        let added = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&added);
        let mut hooks = ContactHooks::new();
        hooks.set_contact_added_callback(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut manifold = PersistentManifold::new(BodyHandle::new(0, 0), BodyHandle::new(1, 0), 0.02, f64::MAX);
        for _ in 0..3 {
            let mut result = ManifoldResult::new(&mut manifold, &hooks, &ball, &ground, entry.swapped);
            process_collision(entry, &ball, &ground, &mut result);
            result.refresh_contact_points();
        }
        // The same contact is found each time and replaces the cached one.
        assert_eq!(manifold.num_contacts(), 1);
        assert_eq!(added.load(Ordering::SeqCst), 3);
        assert_relative_eq!(manifold.points()[0].combined_friction, 0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_friction_anchor_flag_follows_bodies() {
        let ground = RigidBody::fixed(Arc::new(CollisionShape::ground(0.0)), Pose::identity())
            .with_flags(CollisionFlags::FRICTION_ANCHOR);
        let ball = RigidBody::dynamic(Arc::new(CollisionShape::sphere(0.5)), 1.0, at(0.0, 0.49, 0.0));
        let entry = DispatchTable::new().find(ShapeType::Sphere, ShapeType::StaticPlane);

        let hooks = ContactHooks::new();
        let mut manifold = PersistentManifold::new(BodyHandle::new(0, 0), BodyHandle::new(1, 0), 0.02, f64::MAX);
        let mut result = ManifoldResult::new(&mut manifold, &hooks, &ball, &ground, entry.swapped);
        process_collision(entry, &ball, &ground, &mut result);
        assert!(manifold.points()[0].is_friction_anchor());
    }
}
