//! Persistent contact manifolds.
//!
//! A [`PersistentManifold`] caches up to [`MANIFOLD_CACHE_SIZE`] contact
//! points for one overlapping pair. Narrow phase usually reports a single new
//! point per step; the cache accumulates them into a stable contact patch and
//! keeps the solver's accumulated impulses attached to each point so the next
//! step can warm start.
//!
//! Lifecycle per step:
//!
//! 1. [`refresh_contact_points`](PersistentManifold::refresh_contact_points)
//!    re-projects cached points with the bodies' new poses and drops the ones
//!    that separated or slid too far.
//! 2. For each narrow-phase point,
//!    [`cache_entry`](PersistentManifold::cache_entry) looks for a nearby
//!    cached point. A hit goes through
//!    [`replace_contact_point`](PersistentManifold::replace_contact_point),
//!    a miss through [`add_manifold_point`](PersistentManifold::add_manifold_point).
//! 3. When the pair stops overlapping, the owner calls
//!    [`clear_manifold`](PersistentManifold::clear_manifold).

use smallvec::SmallVec;
use tracing::trace;

use sim_types::{BodyHandle, Pose, Result, SimError};

use crate::{ContactHooks, ContactPointFlags, ManifoldPoint};

/// Maximum number of points a manifold holds.
pub const MANIFOLD_CACHE_SIZE: usize = 4;

/// Fixed-capacity contact cache for one body pair.
#[derive(Debug, Clone)]
pub struct PersistentManifold {
    points: SmallVec<[ManifoldPoint; MANIFOLD_CACHE_SIZE]>,
    body0: BodyHandle,
    body1: BodyHandle,
    contact_breaking_threshold: f64,
    contact_processing_threshold: f64,
}

impl PersistentManifold {
    /// Create an empty manifold between two bodies.
    ///
    /// `body0` is body A for every cached point; normals point from
    /// `body1` towards `body0`.
    #[must_use]
    pub fn new(
        body0: BodyHandle,
        body1: BodyHandle,
        contact_breaking_threshold: f64,
        contact_processing_threshold: f64,
    ) -> Self {
        Self {
            points: SmallVec::new(),
            body0,
            body1,
            contact_breaking_threshold,
            contact_processing_threshold,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Body A.
    #[must_use]
    pub fn body0(&self) -> BodyHandle {
        self.body0
    }

    /// Body B.
    #[must_use]
    pub fn body1(&self) -> BodyHandle {
        self.body1
    }

    /// Number of cached points.
    #[must_use]
    pub fn num_contacts(&self) -> usize {
        self.points.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Cached points.
    #[must_use]
    pub fn points(&self) -> &[ManifoldPoint] {
        &self.points
    }

    /// Cached points, mutable. Used by the solver to write impulses back.
    pub fn points_mut(&mut self) -> &mut [ManifoldPoint] {
        &mut self.points
    }

    /// Point at `index`.
    pub fn contact_point(&self, index: usize) -> Result<&ManifoldPoint> {
        let len = self.points.len();
        self.points
            .get(index)
            .ok_or(SimError::ManifoldIndexOutOfRange { index, len })
    }

    /// Point at `index`, mutable.
    pub fn contact_point_mut(&mut self, index: usize) -> Result<&mut ManifoldPoint> {
        let len = self.points.len();
        self.points
            .get_mut(index)
            .ok_or(SimError::ManifoldIndexOutOfRange { index, len })
    }

    /// Distance beyond which points are dropped.
    #[must_use]
    pub fn contact_breaking_threshold(&self) -> f64 {
        self.contact_breaking_threshold
    }

    /// Distance beyond which points are cached but not solved.
    #[must_use]
    pub fn contact_processing_threshold(&self) -> f64 {
        self.contact_processing_threshold
    }

    /// Set the breaking threshold.
    pub fn set_contact_breaking_threshold(&mut self, threshold: f64) {
        self.contact_breaking_threshold = threshold;
    }

    /// Set the processing threshold.
    pub fn set_contact_processing_threshold(&mut self, threshold: f64) {
        self.contact_processing_threshold = threshold;
    }

    /// Whether a point is close enough to stay cached.
    #[must_use]
    pub fn valid_contact_distance(&self, point: &ManifoldPoint) -> bool {
        point.distance <= self.contact_breaking_threshold
    }

    // =========================================================================
    // Cache operations
    // =========================================================================

    /// Index of the cached point nearest to `point` in body A's frame, if
    /// one lies within the breaking threshold.
    #[must_use]
    pub fn cache_entry(&self, point: &ManifoldPoint) -> Option<usize> {
        let mut shortest = self.contact_breaking_threshold * self.contact_breaking_threshold;
        let mut nearest = None;
        for (i, cached) in self.points.iter().enumerate() {
            let dist_sq = (cached.local_point_a - point.local_point_a).norm_squared();
            if dist_sq < shortest {
                shortest = dist_sq;
                nearest = Some(i);
            }
        }
        nearest
    }

    /// Insert a new point and return its slot.
    ///
    /// When the cache is full an existing point is evicted: the deepest
    /// cached point is kept, and among the remaining slots the one whose
    /// replacement leaves the largest contact area is chosen.
    pub fn add_manifold_point(&mut self, point: ManifoldPoint, hooks: &ContactHooks) -> usize {
        if self.points.len() < MANIFOLD_CACHE_SIZE {
            self.points.push(point);
            if self.points.len() == 1 {
                hooks.contact_started(self);
            }
            return self.points.len() - 1;
        }

        let slot = self.eviction_slot(&point);
        trace!(slot, body0 = %self.body0, body1 = %self.body1, "evicting contact point");
        hooks.contact_destroyed(&self.points[slot]);
        self.points[slot] = point;
        debug_assert!(self.points.len() <= MANIFOLD_CACHE_SIZE);
        slot
    }

    /// Overwrite the geometry of the point at `index` with `point`.
    ///
    /// The solver's warm-start state (impulses, friction directions, lifetime,
    /// user data) carries over to the new geometry. The exception is a friction
    /// anchor whose lateral impulse has left the friction cone: the anchor has
    /// slipped, so it is replaced outright.
    pub fn replace_contact_point(
        &mut self,
        mut point: ManifoldPoint,
        index: usize,
        hooks: &ContactHooks,
    ) -> Result<()> {
        let len = self.points.len();
        let old = self
            .points
            .get_mut(index)
            .ok_or(SimError::ManifoldIndexOutOfRange { index, len })?;

        if old.is_friction_anchor() && old.exceeds_friction_cone() {
            hooks.contact_destroyed(old);
            point.user_persistent_data = None;
        } else {
            point.inherit_warm_start(old);
        }
        *old = point;
        Ok(())
    }

    /// Re-project cached points with the bodies' current poses.
    ///
    /// Drops points that separated beyond the breaking threshold or whose
    /// contact locations drifted apart tangentially by more than it. Survivors
    /// age by one step.
    pub fn refresh_contact_points(&mut self, pose_a: &Pose, pose_b: &Pose, hooks: &ContactHooks) {
        for point in &mut self.points {
            point.position_world_on_a = pose_a.transform_point(&point.local_point_a);
            point.position_world_on_b = pose_b.transform_point(&point.local_point_b);
            point.distance =
                (point.position_world_on_a - point.position_world_on_b).dot(&point.normal_world_on_b);
            point.life_time = point.life_time.saturating_add(1);
        }

        let threshold_sq = self.contact_breaking_threshold * self.contact_breaking_threshold;
        // Reverse order keeps swap_remove from skipping entries.
        for i in (0..self.points.len()).rev() {
            let point = &self.points[i];
            if !self.valid_contact_distance(point) || point.tangential_drift_squared() > threshold_sq {
                self.remove_at(i, hooks);
            } else {
                hooks.contact_processed(point, self.body0, self.body1);
            }
        }
    }

    /// Drop every point. Fires contact-ended if the cache was not empty.
    pub fn clear_manifold(&mut self, hooks: &ContactHooks) {
        if self.points.is_empty() {
            return;
        }
        for point in &self.points {
            hooks.contact_destroyed(point);
        }
        self.points.clear();
        hooks.contact_ended(self);
    }

    /// Remove the point at `index`. Fires contact-ended if it was the last one.
    pub fn remove_contact_point(&mut self, index: usize, hooks: &ContactHooks) -> Result<ManifoldPoint> {
        let len = self.points.len();
        if index >= len {
            return Err(SimError::ManifoldIndexOutOfRange { index, len });
        }
        Ok(self.remove_at(index, hooks))
    }

    /// Mark every point as a friction anchor.
    pub fn mark_friction_anchors(&mut self) {
        for point in &mut self.points {
            point.flags |= ContactPointFlags::FRICTION_ANCHOR;
        }
    }

    fn remove_at(&mut self, index: usize, hooks: &ContactHooks) -> ManifoldPoint {
        let removed = self.points.swap_remove(index);
        hooks.contact_destroyed(&removed);
        if self.points.is_empty() {
            hooks.contact_ended(self);
        }
        removed
    }

    /// Slot to overwrite when inserting into a full cache.
    fn eviction_slot(&self, candidate: &ManifoldPoint) -> usize {
        debug_assert_eq!(self.points.len(), MANIFOLD_CACHE_SIZE);

        // The deepest point is protected unless the candidate is deeper still.
        let protected = self
            .points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.distance < candidate.distance)
            .min_by(|(_, a), (_, b)| a.distance.total_cmp(&b.distance))
            .map(|(i, _)| i);

        let mut best_slot = 0;
        let mut best_area = f64::NEG_INFINITY;
        for slot in 0..MANIFOLD_CACHE_SIZE {
            if Some(slot) == protected {
                continue;
            }
            let mut quad = [nalgebra::Point3::origin(); MANIFOLD_CACHE_SIZE];
            for (i, p) in self.points.iter().enumerate() {
                quad[i] = if i == slot {
                    candidate.local_point_a
                } else {
                    p.local_point_a
                };
            }
            let area = quad_area_measure(&quad);
            if area > best_area {
                best_area = area;
                best_slot = slot;
            }
        }
        best_slot
    }
}

/// Squared doubled area of the quadrilateral spanned by four points.
///
/// The vertex order is unknown, so every way of splitting the points into two
/// diagonals is tried. For a convex quadrilateral the true diagonals give the
/// largest cross product, `|d1 × d2| = 2 * area`.
fn quad_area_measure(p: &[nalgebra::Point3<f64>; 4]) -> f64 {
    let c1 = (p[0] - p[1]).cross(&(p[2] - p[3]));
    let c2 = (p[0] - p[2]).cross(&(p[1] - p[3]));
    let c3 = (p[0] - p[3]).cross(&(p[1] - p[2]));
    c1.norm_squared()
        .max(c2.norm_squared())
        .max(c3.norm_squared())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use nalgebra::{Point3, Vector3};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manifold() -> PersistentManifold {
        PersistentManifold::new(BodyHandle::new(0, 0), BodyHandle::new(1, 0), 0.02, f64::MAX)
    }

    fn point_at(x: f64, z: f64, distance: f64) -> ManifoldPoint {
        let on_a = Point3::new(x, distance, z);
        let on_b = Point3::new(x, 0.0, z);
        ManifoldPoint::new(on_a, on_b, Vector3::y(), distance).with_world_positions(on_a, on_b)
    }

    fn counting_hooks() -> (ContactHooks, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let started = Arc::new(AtomicUsize::new(0));
        let ended = Arc::new(AtomicUsize::new(0));
        let mut hooks = ContactHooks::new();
        let s = Arc::clone(&started);
        hooks.set_contact_started_callback(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });
        let e = Arc::clone(&ended);
        hooks.set_contact_ended_callback(move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });
        (hooks, started, ended)
    }

    #[test]
    fn test_cache_entry_finds_nearest_within_threshold() {
        let hooks = ContactHooks::new();
        let mut m = manifold();
        m.add_manifold_point(point_at(0.0, 0.0, -0.01), &hooks);
        m.add_manifold_point(point_at(1.0, 0.0, -0.01), &hooks);

        assert_eq!(m.cache_entry(&point_at(1.005, 0.0, -0.01)), Some(1));
        assert_eq!(m.cache_entry(&point_at(0.5, 0.0, -0.01)), None);
    }

    #[test]
    fn test_add_respects_capacity_and_keeps_deepest() {
        let hooks = ContactHooks::new();
        let mut m = manifold();
        m.add_manifold_point(point_at(-1.0, -1.0, -0.01), &hooks);
        m.add_manifold_point(point_at(1.0, -1.0, -0.05), &hooks);
        m.add_manifold_point(point_at(1.0, 1.0, -0.01), &hooks);
        m.add_manifold_point(point_at(-1.0, 1.0, -0.01), &hooks);
        assert_eq!(m.num_contacts(), MANIFOLD_CACHE_SIZE);

        // A point in the middle of the patch shrinks any quad it joins, and the
        // deepest corner must survive regardless.
        let slot = m.add_manifold_point(point_at(0.0, 0.0, -0.02), &hooks);
        assert_eq!(m.num_contacts(), MANIFOLD_CACHE_SIZE);
        assert_ne!(slot, 1);
        assert!(m.points().iter().any(|p| p.distance == -0.05));
    }

    #[test]
    fn test_eviction_prefers_larger_area() {
        let hooks = ContactHooks::new();
        let mut m = manifold();
        m.add_manifold_point(point_at(-1.0, -1.0, -0.05), &hooks);
        m.add_manifold_point(point_at(1.0, -1.0, -0.01), &hooks);
        m.add_manifold_point(point_at(1.0, 1.0, -0.01), &hooks);
        m.add_manifold_point(point_at(0.1, 0.1, -0.01), &hooks);

        // The inner point is the one to give up for an outer corner.
        let slot = m.add_manifold_point(point_at(-1.0, 1.0, -0.01), &hooks);
        assert_eq!(slot, 3);
    }

    #[test]
    fn test_new_deepest_point_may_evict_anything() {
        let hooks = ContactHooks::new();
        let mut m = manifold();
        for (x, z) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            m.add_manifold_point(point_at(x, z, -0.01), &hooks);
        }
        let slot = m.add_manifold_point(point_at(-1.0, 1.1, -0.5), &hooks);
        assert!(slot < MANIFOLD_CACHE_SIZE);
        assert_eq!(m.contact_point(slot).unwrap().distance, -0.5);
    }

    #[test]
    fn test_replace_preserves_warm_start() {
        let hooks = ContactHooks::new();
        let mut m = manifold();
        let idx = m.add_manifold_point(point_at(0.0, 0.0, -0.01), &hooks);
        {
            let p = m.contact_point_mut(idx).unwrap();
            p.applied_impulse = 3.0;
            p.applied_impulse_lateral1 = 0.2;
            p.life_time = 7;
            p.user_persistent_data = Some(99);
        }

        m.replace_contact_point(point_at(0.001, 0.0, -0.015), idx, &hooks)
            .unwrap();
        let p = m.contact_point(idx).unwrap();
        assert_eq!(p.distance, -0.015);
        assert_eq!(p.applied_impulse, 3.0);
        assert_eq!(p.applied_impulse_lateral1, 0.2);
        assert_eq!(p.life_time, 7);
        assert_eq!(p.user_persistent_data, Some(99));
    }

    #[test]
    fn test_replace_slipped_anchor_overwrites() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let mut hooks = ContactHooks::new();
        let d = Arc::clone(&destroyed);
        hooks.set_contact_destroyed_callback(move |data| {
            assert_eq!(data, 5);
            d.fetch_add(1, Ordering::SeqCst);
        });

        let mut m = manifold();
        let idx = m.add_manifold_point(point_at(0.0, 0.0, -0.01), &hooks);
        {
            let p = m.contact_point_mut(idx).unwrap();
            p.flags |= ContactPointFlags::FRICTION_ANCHOR;
            p.combined_friction = 0.5;
            p.applied_impulse = 1.0;
            p.applied_impulse_lateral1 = 0.9;
            p.user_persistent_data = Some(5);
        }

        m.replace_contact_point(point_at(0.0, 0.0, -0.02), idx, &hooks)
            .unwrap();
        let p = m.contact_point(idx).unwrap();
        assert_eq!(p.applied_impulse, 0.0);
        assert_eq!(p.applied_impulse_lateral1, 0.0);
        assert_eq!(p.user_persistent_data, None);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_replace_out_of_range() {
        let hooks = ContactHooks::new();
        let mut m = manifold();
        let err = m
            .replace_contact_point(point_at(0.0, 0.0, 0.0), 2, &hooks)
            .unwrap_err();
        assert_eq!(err, SimError::ManifoldIndexOutOfRange { index: 2, len: 0 });
    }

    #[test]
    fn test_refresh_drops_separated_and_slid_points() {
        let (hooks, started, ended) = counting_hooks();
        let mut m = manifold();
        m.add_manifold_point(point_at(0.0, 0.0, -0.01), &hooks);
        m.add_manifold_point(point_at(0.5, 0.0, -0.01), &hooks);
        assert_eq!(started.load(Ordering::SeqCst), 1);

        // Nothing moved: both survive and age.
        m.refresh_contact_points(&Pose::identity(), &Pose::identity(), &hooks);
        assert_eq!(m.num_contacts(), 2);
        assert!(m.points().iter().all(|p| p.life_time == 1));

        // Body A slides sideways by more than the breaking threshold.
        let slid = Pose::from_position(Point3::new(0.1, 0.0, 0.0));
        m.refresh_contact_points(&slid, &Pose::identity(), &hooks);
        assert!(m.is_empty());
        assert_eq!(ended.load(Ordering::SeqCst), 1);

        // Refreshing an empty manifold fires nothing more.
        m.refresh_contact_points(&slid, &Pose::identity(), &hooks);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_refresh_drops_points_beyond_breaking_distance() {
        let hooks = ContactHooks::new();
        let mut m = manifold();
        m.add_manifold_point(point_at(0.0, 0.0, -0.01), &hooks);

        let lifted = Pose::from_position(Point3::new(0.0, 0.05, 0.0));
        m.refresh_contact_points(&lifted, &Pose::identity(), &hooks);
        assert!(m.is_empty());
    }

    #[test]
    fn test_clear_fires_ended_once() {
        let (hooks, _, ended) = counting_hooks();
        let mut m = manifold();
        m.clear_manifold(&hooks);
        assert_eq!(ended.load(Ordering::SeqCst), 0);

        m.add_manifold_point(point_at(0.0, 0.0, -0.01), &hooks);
        m.clear_manifold(&hooks);
        m.clear_manifold(&hooks);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_quad_area_measure_is_order_independent() {
        let square = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 1.0),
            Point3::new(0.0, 0.0, 1.0),
        ];
        let shuffled = [square[0], square[2], square[1], square[3]];
        assert_eq!(quad_area_measure(&square), quad_area_measure(&shuffled));
        // |d1 x d2| = 2 for the unit square.
        assert!((quad_area_measure(&square) - 4.0).abs() < 1e-12);
    }
}
