//! Broad-phase collision detection using Sweep-and-Prune (SAP).
//!
//! The broad phase owns one [`BroadphaseProxy`] per collidable body and the
//! [`OverlappingPairCache`]: the set of proxy pairs whose bounds overlap. It
//! is the sole authority over which pairs exist. Every pair it creates or
//! retires is reported through a [`PairCallback`], which is how the
//! dispatcher keeps manifolds in lockstep with pairs.
//!
//! # Algorithm
//!
//! Sweep-and-Prune (also known as Sort-and-Sweep) works by:
//! 1. Projecting proxy AABBs onto the axis with the largest spread
//! 2. Sorting intervals by their minimum endpoint (ties by proxy id)
//! 3. Sweeping through sorted intervals to find overlaps
//! 4. Confirming each candidate on all three axes
//!
//! Small scenes fall back to an O(n²) [`BruteForce`] pass. Both produce the
//! same pairs; [`BroadPhaseDetector`] picks one per the configuration.
//!
//! # Determinism
//!
//! Proxy ids are assigned monotonically and never reused. Pairs are stored
//! lower id first, and with the deterministic flag set the cache is kept
//! sorted by `(id0, id1)`, so replaying the same inserts yields the same pair
//! sequence.
//!
//! # Example
//!
//! ```
//! use sim_core::broad_phase::{Aabb, BroadPhaseDetector, NullPairCallback};
//! use sim_core::ShapeType;
//! use sim_types::{BodyHandle, BroadPhaseConfig, CollisionFilter};
//! use nalgebra::{Point3, Vector3};
//!
//! let mut broad_phase = BroadPhaseDetector::new(BroadPhaseConfig::default());
//! let half = Vector3::repeat(1.0);
//! broad_phase.create_proxy(
//!     Aabb::from_center(Point3::origin(), half),
//!     ShapeType::Sphere,
//!     BodyHandle::new(0, 0),
//!     CollisionFilter::dynamic(),
//!     false,
//! );
//! broad_phase.create_proxy(
//!     Aabb::from_center(Point3::new(1.5, 0.0, 0.0), half),
//!     ShapeType::Sphere,
//!     BodyHandle::new(1, 0),
//!     CollisionFilter::dynamic(),
//!     false,
//! );
//!
//! broad_phase.calculate_overlapping_pairs(&mut NullPairCallback);
//!
//! // Bodies overlap, so we should get a potential pair
//! assert_eq!(broad_phase.pair_cache().len(), 1);
//! ```

use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};
use nalgebra::{Point3, Vector3};
use sim_types::{BodyHandle, BroadPhaseAlgorithm, BroadPhaseConfig, CollisionFilter, ProxyId};
use tracing::trace;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::dispatcher::{DispatchEntry, ManifoldHandle};
use crate::shape::{LARGE_EXTENT, ShapeType};

/// An axis-aligned bounding box (AABB) for broad-phase collision detection.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Aabb {
    /// Minimum corner of the bounding box.
    pub min: Point3<f64>,
    /// Maximum corner of the bounding box.
    pub max: Point3<f64>,
}

impl Aabb {
    /// Create a new AABB from minimum and maximum corners.
    #[must_use]
    pub const fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    /// Create an AABB centered at a point with the given half-extents.
    #[must_use]
    pub fn from_center(center: Point3<f64>, half_extents: Vector3<f64>) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Check if this AABB overlaps with another AABB.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Expand this AABB by a margin on all sides.
    #[must_use]
    pub fn expanded(&self, margin: f64) -> Self {
        let m = Vector3::repeat(margin);
        Self {
            min: self.min - m,
            max: self.max + m,
        }
    }

    /// Smallest AABB containing both.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        Self {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    /// Center point.
    #[must_use]
    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    /// Whether the box is unbounded on some axis (planes).
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        (self.max - self.min).max() >= LARGE_EXTENT
    }

    /// Get the minimum value along a specific axis.
    #[must_use]
    pub fn min_on_axis(&self, axis: Axis) -> f64 {
        self.min[axis.index()]
    }

    /// Get the maximum value along a specific axis.
    #[must_use]
    pub fn max_on_axis(&self, axis: Axis) -> f64 {
        self.max[axis.index()]
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::new(Point3::origin(), Point3::origin())
    }
}

/// Coordinate axis for sweep direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// X-axis.
    X,
    /// Y-axis.
    Y,
    /// Z-axis.
    Z,
}

impl Axis {
    /// Get all three axes.
    #[must_use]
    pub const fn all() -> [Self; 3] {
        [Self::X, Self::Y, Self::Z]
    }

    /// Component index.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::X => 0,
            Self::Y => 1,
            Self::Z => 2,
        }
    }
}

/// Broad-phase record of one collidable body.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadphaseProxy {
    /// Unique id, never reused.
    pub id: ProxyId,
    /// Current (motion-expanded) bounds.
    pub aabb: Aabb,
    /// Shape class of the owner's collision shape.
    pub shape_type: ShapeType,
    /// Group/mask filter.
    pub filter: CollisionFilter,
    /// Owning body.
    pub owner: BodyHandle,
    /// Static proxies never pair with each other.
    pub is_static: bool,
}

/// Two overlapping proxies, lower id first, plus what the dispatcher attached.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlappingPair {
    /// Proxy with the lower id.
    pub proxy0: ProxyId,
    /// Proxy with the higher id.
    pub proxy1: ProxyId,
    /// Owner of `proxy0`.
    pub body0: BodyHandle,
    /// Owner of `proxy1`.
    pub body1: BodyHandle,
    /// Narrow-phase algorithm chosen for the pair.
    pub algorithm: Option<DispatchEntry>,
    /// Manifold created on first contact.
    pub manifold: Option<ManifoldHandle>,
}

impl OverlappingPair {
    /// Canonical pair of two proxies, independent of argument order.
    #[must_use]
    pub fn new(a: &BroadphaseProxy, b: &BroadphaseProxy) -> Self {
        let (first, second) = if a.id <= b.id { (a, b) } else { (b, a) };
        Self {
            proxy0: first.id,
            proxy1: second.id,
            body0: first.owner,
            body1: second.owner,
            algorithm: None,
            manifold: None,
        }
    }

    /// Lookup key `(proxy0, proxy1)`.
    #[must_use]
    pub fn key(&self) -> (ProxyId, ProxyId) {
        (self.proxy0, self.proxy1)
    }

    /// Whether the pair involves a proxy.
    #[must_use]
    pub fn contains(&self, proxy: ProxyId) -> bool {
        self.proxy0 == proxy || self.proxy1 == proxy
    }
}

fn canonical(a: ProxyId, b: ProxyId) -> (ProxyId, ProxyId) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Receives pair lifecycle events from the broad phase.
pub trait PairCallback {
    /// Extra veto on top of the static and AABB checks.
    fn needs_broadphase_collision(&self, a: &BroadphaseProxy, b: &BroadphaseProxy) -> bool {
        a.filter.allows(&b.filter)
    }

    /// A new pair is about to enter the cache. `a` owns `proxy0`.
    fn pair_added(&mut self, pair: &mut OverlappingPair, a: &BroadphaseProxy, b: &BroadphaseProxy);

    /// A pair left the cache.
    fn pair_removed(&mut self, pair: OverlappingPair);
}

/// Callback that applies only the default filter and ignores events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPairCallback;

impl PairCallback for NullPairCallback {
    fn pair_added(&mut self, _pair: &mut OverlappingPair, _a: &BroadphaseProxy, _b: &BroadphaseProxy) {}

    fn pair_removed(&mut self, _pair: OverlappingPair) {}
}

/// Set of overlapping pairs with O(1) lookup by proxy ids.
#[derive(Debug, Clone, Default)]
pub struct OverlappingPairCache {
    pairs: Vec<OverlappingPair>,
    index: HashMap<(ProxyId, ProxyId), usize>,
}

impl OverlappingPairCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// All pairs in cache order.
    #[must_use]
    pub fn pairs(&self) -> &[OverlappingPair] {
        &self.pairs
    }

    /// All pairs, mutably.
    pub fn pairs_mut(&mut self) -> &mut [OverlappingPair] {
        &mut self.pairs
    }

    /// Find a pair in either argument order.
    #[must_use]
    pub fn find_pair(&self, a: ProxyId, b: ProxyId) -> Option<&OverlappingPair> {
        self.index.get(&canonical(a, b)).map(|&i| &self.pairs[i])
    }

    /// Find a pair in either argument order, mutably.
    pub fn find_pair_mut(&mut self, a: ProxyId, b: ProxyId) -> Option<&mut OverlappingPair> {
        let i = *self.index.get(&canonical(a, b))?;
        Some(&mut self.pairs[i])
    }

    /// Insert a pair. Returns `false` if it was already present.
    pub fn add_pair(&mut self, pair: OverlappingPair) -> bool {
        let key = pair.key();
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key, self.pairs.len());
        self.pairs.push(pair);
        true
    }

    /// Remove and return a pair.
    pub fn remove_pair(&mut self, a: ProxyId, b: ProxyId) -> Option<OverlappingPair> {
        let i = self.index.remove(&canonical(a, b))?;
        let pair = self.pairs.swap_remove(i);
        if let Some(moved) = self.pairs.get(i) {
            self.index.insert(moved.key(), i);
        }
        Some(pair)
    }

    /// Remove every pair involving `proxy`, in cache order.
    pub fn remove_pairs_containing(&mut self, proxy: ProxyId) -> Vec<OverlappingPair> {
        let keys: Vec<_> = self
            .pairs
            .iter()
            .filter(|p| p.contains(proxy))
            .map(OverlappingPair::key)
            .collect();
        keys.into_iter()
            .filter_map(|(a, b)| self.remove_pair(a, b))
            .collect()
    }

    /// Sort pairs by `(proxy0, proxy1)`.
    pub fn sort_pairs(&mut self) {
        self.pairs.sort_unstable_by_key(OverlappingPair::key);
        self.index.clear();
        for (i, pair) in self.pairs.iter().enumerate() {
            self.index.insert(pair.key(), i);
        }
    }
}

/// Trait for broad-phase pair-finding algorithms.
pub trait BroadPhase {
    /// Find all proxy pairs whose AABBs overlap.
    ///
    /// `proxies` is in ascending id order. Returned pairs are lower id first.
    /// Static-static pairs are never returned.
    fn find_potential_pairs(&mut self, proxies: &[&BroadphaseProxy]) -> Vec<(ProxyId, ProxyId)>;
}

/// Sweep-and-Prune (Sort-and-Sweep) broad-phase algorithm.
///
/// For temporal coherence (bodies moving slowly between frames), the
/// interval list stays nearly sorted and Rust's adaptive sort handles it in
/// close to linear time.
#[derive(Debug, Clone)]
pub struct SweepAndPrune {
    intervals: Vec<Interval>,
    sweep_axis: Axis,
}

/// An interval on the sweep axis.
#[derive(Debug, Clone, Copy)]
struct Interval {
    /// Index into the proxy slice.
    slot: usize,
    id: ProxyId,
    min: f64,
    max: f64,
    is_static: bool,
}

impl Default for SweepAndPrune {
    fn default() -> Self {
        Self::new()
    }
}

impl SweepAndPrune {
    /// Create a new sweep-and-prune broad phase.
    #[must_use]
    pub fn new() -> Self {
        Self {
            intervals: Vec::new(),
            sweep_axis: Axis::X,
        }
    }

    /// Axis used by the last sweep.
    #[must_use]
    pub fn sweep_axis(&self) -> Axis {
        self.sweep_axis
    }

    /// Choose the axis with the largest spread of proxy centers.
    ///
    /// Unbounded proxies are ignored; they overlap everything on every axis.
    fn choose_sweep_axis(proxies: &[&BroadphaseProxy]) -> Axis {
        let mut min_pos = Vector3::repeat(f64::INFINITY);
        let mut max_pos = Vector3::repeat(f64::NEG_INFINITY);

        for proxy in proxies.iter().filter(|p| !p.aabb.is_unbounded()) {
            let c = proxy.aabb.center().coords;
            min_pos = min_pos.inf(&c);
            max_pos = max_pos.sup(&c);
        }

        let extent = max_pos - min_pos;
        if !extent.iter().all(|e| e.is_finite()) {
            return Axis::X;
        }
        if extent.x >= extent.y && extent.x >= extent.z {
            Axis::X
        } else if extent.y >= extent.z {
            Axis::Y
        } else {
            Axis::Z
        }
    }
}

impl BroadPhase for SweepAndPrune {
    fn find_potential_pairs(&mut self, proxies: &[&BroadphaseProxy]) -> Vec<(ProxyId, ProxyId)> {
        self.sweep_axis = Self::choose_sweep_axis(proxies);
        let axis = self.sweep_axis;

        self.intervals.clear();
        self.intervals
            .extend(proxies.iter().enumerate().map(|(slot, p)| Interval {
                slot,
                id: p.id,
                min: p.aabb.min_on_axis(axis),
                max: p.aabb.max_on_axis(axis),
                is_static: p.is_static,
            }));

        // Ties on the minimum endpoint are broken by id.
        self.intervals
            .sort_by(|a, b| a.min.total_cmp(&b.min).then(a.id.cmp(&b.id)));

        let mut pairs = Vec::new();
        let n = self.intervals.len();
        for i in 0..n {
            let interval_i = self.intervals[i];
            for interval_j in &self.intervals[i + 1..] {
                // If j's min is past i's max, no more overlaps possible
                if interval_j.min > interval_i.max {
                    break;
                }
                if interval_i.is_static && interval_j.is_static {
                    continue;
                }
                if proxies[interval_i.slot]
                    .aabb
                    .overlaps(&proxies[interval_j.slot].aabb)
                {
                    pairs.push(canonical(interval_i.id, interval_j.id));
                }
            }
        }
        pairs
    }
}

/// Simple O(n²) brute-force broad phase for small scenes.
#[derive(Debug, Clone, Default)]
pub struct BruteForce;

impl BruteForce {
    /// Create a new brute-force broad phase.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl BroadPhase for BruteForce {
    fn find_potential_pairs(&mut self, proxies: &[&BroadphaseProxy]) -> Vec<(ProxyId, ProxyId)> {
        let mut pairs = Vec::new();
        for (i, a) in proxies.iter().enumerate() {
            for b in &proxies[i + 1..] {
                if a.is_static && b.is_static {
                    continue;
                }
                if a.aabb.overlaps(&b.aabb) {
                    pairs.push(canonical(a.id, b.id));
                }
            }
        }
        pairs
    }
}

/// Proxy store, pair cache and algorithm selection.
///
/// This wraps the algorithm selection and provides a stable interface
/// for the World to use.
#[derive(Debug, Clone)]
pub struct BroadPhaseDetector {
    config: BroadPhaseConfig,
    sap: SweepAndPrune,
    brute: BruteForce,
    proxies: BTreeMap<ProxyId, BroadphaseProxy>,
    next_id: u64,
    pairs: OverlappingPairCache,
    deterministic: bool,
}

impl Default for BroadPhaseDetector {
    fn default() -> Self {
        Self::new(BroadPhaseConfig::default())
    }
}

impl BroadPhaseDetector {
    /// Create a new broad-phase detector with the given configuration.
    #[must_use]
    pub fn new(config: BroadPhaseConfig) -> Self {
        Self {
            config,
            sap: SweepAndPrune::new(),
            brute: BruteForce::new(),
            proxies: BTreeMap::new(),
            next_id: 1,
            pairs: OverlappingPairCache::new(),
            deterministic: true,
        }
    }

    /// Get the current configuration.
    #[must_use]
    pub fn config(&self) -> &BroadPhaseConfig {
        &self.config
    }

    /// Update the configuration. Takes effect at the next `set_aabb`.
    pub fn set_config(&mut self, config: BroadPhaseConfig) {
        self.config = config;
    }

    /// Keep the pair cache sorted by proxy ids.
    pub fn set_deterministic(&mut self, deterministic: bool) {
        self.deterministic = deterministic;
    }

    /// Register a body's bounds. Returns the new proxy's id.
    pub fn create_proxy(
        &mut self,
        aabb: Aabb,
        shape_type: ShapeType,
        owner: BodyHandle,
        filter: CollisionFilter,
        is_static: bool,
    ) -> ProxyId {
        let id = ProxyId::new(self.next_id);
        self.next_id += 1;
        self.proxies.insert(
            id,
            BroadphaseProxy {
                id,
                aabb: aabb.expanded(self.config.margin),
                shape_type,
                filter,
                owner,
                is_static,
            },
        );
        trace!(proxy = %id, body = %owner, "proxy created");
        id
    }

    /// Remove a proxy and retire every pair it took part in.
    pub fn destroy_proxy(
        &mut self,
        id: ProxyId,
        callback: &mut dyn PairCallback,
    ) -> Option<BroadphaseProxy> {
        let proxy = self.proxies.remove(&id)?;
        for pair in self.pairs.remove_pairs_containing(id) {
            callback.pair_removed(pair);
        }
        trace!(proxy = %id, "proxy destroyed");
        Some(proxy)
    }

    /// Update a proxy's bounds. Returns `false` for an unknown id.
    pub fn set_aabb(&mut self, id: ProxyId, aabb: Aabb) -> bool {
        let margin = self.config.margin;
        match self.proxies.get_mut(&id) {
            Some(proxy) => {
                proxy.aabb = aabb.expanded(margin);
                true
            }
            None => false,
        }
    }

    /// Look up a proxy.
    #[must_use]
    pub fn proxy(&self, id: ProxyId) -> Option<&BroadphaseProxy> {
        self.proxies.get(&id)
    }

    /// Number of live proxies.
    #[must_use]
    pub fn num_proxies(&self) -> usize {
        self.proxies.len()
    }

    /// Current pairs.
    #[must_use]
    pub fn pair_cache(&self) -> &OverlappingPairCache {
        &self.pairs
    }

    /// Current pairs, mutably.
    pub fn pair_cache_mut(&mut self) -> &mut OverlappingPairCache {
        &mut self.pairs
    }

    fn use_brute_force(&self) -> bool {
        match self.config.algorithm {
            BroadPhaseAlgorithm::Auto => self.proxies.len() < self.config.brute_force_threshold,
            BroadPhaseAlgorithm::BruteForce => true,
            BroadPhaseAlgorithm::SweepAndPrune => false,
        }
    }

    /// Recompute overlaps, retiring stale pairs before adding new ones.
    pub fn calculate_overlapping_pairs(&mut self, callback: &mut dyn PairCallback) {
        let brute = self.use_brute_force();
        let proxies: Vec<&BroadphaseProxy> = self.proxies.values().collect();
        let candidates = if brute {
            self.brute.find_potential_pairs(&proxies)
        } else {
            self.sap.find_potential_pairs(&proxies)
        };

        let mut current = HashSet::with_capacity(candidates.len());
        let mut fresh = Vec::new();
        for (a, b) in candidates {
            let (Some(pa), Some(pb)) = (self.proxies.get(&a), self.proxies.get(&b)) else {
                continue;
            };
            if !callback.needs_broadphase_collision(pa, pb) || !current.insert((a, b)) {
                continue;
            }
            if self.pairs.find_pair(a, b).is_none() {
                fresh.push((pa, pb));
            }
        }

        let stale: Vec<_> = self
            .pairs
            .pairs()
            .iter()
            .map(OverlappingPair::key)
            .filter(|key| !current.contains(key))
            .collect();
        let retired = stale.len();
        for (a, b) in stale {
            if let Some(pair) = self.pairs.remove_pair(a, b) {
                callback.pair_removed(pair);
            }
        }

        let added = fresh.len();
        for (pa, pb) in fresh {
            let mut pair = OverlappingPair::new(pa, pb);
            callback.pair_added(&mut pair, pa, pb);
            self.pairs.add_pair(pair);
        }

        if self.deterministic {
            self.pairs.sort_pairs();
        }
        trace!(
            pairs = self.pairs.len(),
            added,
            retired,
            brute_force = brute,
            "overlapping pairs updated"
        );
    }

    /// Owners of every proxy whose bounds overlap `aabb`, in proxy id order.
    #[must_use]
    pub fn aabb_test(&self, aabb: &Aabb) -> Vec<BodyHandle> {
        self.proxies
            .values()
            .filter(|p| p.aabb.overlaps(aabb))
            .map(|p| p.owner)
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sim_types::CollisionGroups;

    #[derive(Default)]
    struct Recorder {
        added: Vec<(ProxyId, ProxyId)>,
        removed: Vec<(ProxyId, ProxyId)>,
    }

    impl PairCallback for Recorder {
        fn pair_added(&mut self, pair: &mut OverlappingPair, _a: &BroadphaseProxy, _b: &BroadphaseProxy) {
            self.added.push(pair.key());
        }

        fn pair_removed(&mut self, pair: OverlappingPair) {
            self.removed.push(pair.key());
        }
    }

    fn unit_box_at(x: f64) -> Aabb {
        Aabb::from_center(Point3::new(x, 0.0, 0.0), Vector3::repeat(0.5))
    }

    fn detector(algorithm: BroadPhaseAlgorithm) -> BroadPhaseDetector {
        BroadPhaseDetector::new(BroadPhaseConfig::default().with_algorithm(algorithm))
    }

    fn add(bp: &mut BroadPhaseDetector, index: u32, x: f64, is_static: bool) -> ProxyId {
        let filter = if is_static {
            CollisionFilter::fixed(CollisionGroups::STATIC)
        } else {
            CollisionFilter::dynamic()
        };
        bp.create_proxy(
            unit_box_at(x),
            ShapeType::Box,
            BodyHandle::new(index, 0),
            filter,
            is_static,
        )
    }

    #[test]
    fn test_aabb_overlap() {
        let a = unit_box_at(0.0);
        assert!(a.overlaps(&unit_box_at(0.9)));
        assert!(!a.overlaps(&unit_box_at(1.1)));
        let merged = a.merged(&unit_box_at(3.0));
        assert!((merged.max.x - 3.5).abs() < 1e-12);
    }

    #[test]
    fn test_pair_is_canonical() {
        let mut bp = detector(BroadPhaseAlgorithm::BruteForce);
        let p0 = add(&mut bp, 0, 0.0, false);
        let p1 = add(&mut bp, 1, 0.5, false);
        let a = bp.proxy(p0).unwrap();
        let b = bp.proxy(p1).unwrap();

        let forward = OverlappingPair::new(a, b);
        let backward = OverlappingPair::new(b, a);
        assert_eq!(forward, backward);
        assert_eq!(forward.proxy0, p0);
        assert_eq!(forward.body0, BodyHandle::new(0, 0));
    }

    #[test]
    fn test_sap_matches_brute_force() {
        let mut sap = detector(BroadPhaseAlgorithm::SweepAndPrune);
        let mut brute = detector(BroadPhaseAlgorithm::BruteForce);
        for (i, x) in [0.0, 0.8, 5.0, 1.7, 5.5, 9.0].into_iter().enumerate() {
            let index = u32::try_from(i).unwrap();
            add(&mut sap, index, x, false);
            add(&mut brute, index, x, false);
        }
        sap.calculate_overlapping_pairs(&mut NullPairCallback);
        brute.calculate_overlapping_pairs(&mut NullPairCallback);

        let keys = |bp: &BroadPhaseDetector| {
            bp.pair_cache()
                .pairs()
                .iter()
                .map(OverlappingPair::key)
                .collect::<Vec<_>>()
        };
        assert_eq!(keys(&sap), keys(&brute));
        assert_eq!(sap.pair_cache().len(), 3);
    }

    #[test]
    fn test_static_pairs_skipped() {
        let mut bp = detector(BroadPhaseAlgorithm::Auto);
        add(&mut bp, 0, 0.0, true);
        add(&mut bp, 1, 0.5, true);
        bp.calculate_overlapping_pairs(&mut NullPairCallback);
        assert!(bp.pair_cache().is_empty());
    }

    #[test]
    fn test_filter_rejects_pair() {
        let mut bp = detector(BroadPhaseAlgorithm::BruteForce);
        bp.create_proxy(
            unit_box_at(0.0),
            ShapeType::Box,
            BodyHandle::new(0, 0),
            CollisionFilter::new(CollisionGroups::DEBRIS, CollisionGroups::STATIC),
            false,
        );
        add(&mut bp, 1, 0.5, false);
        bp.calculate_overlapping_pairs(&mut NullPairCallback);
        assert!(bp.pair_cache().is_empty());
    }

    #[test]
    fn test_pair_lifecycle_notifies() {
        let mut bp = detector(BroadPhaseAlgorithm::SweepAndPrune);
        let p0 = add(&mut bp, 0, 0.0, false);
        let p1 = add(&mut bp, 1, 0.5, false);
        let mut recorder = Recorder::default();

        bp.calculate_overlapping_pairs(&mut recorder);
        assert_eq!(recorder.added, vec![(p0, p1)]);

        // Unchanged overlap produces no events.
        bp.calculate_overlapping_pairs(&mut recorder);
        assert_eq!(recorder.added.len(), 1);

        bp.set_aabb(p1, unit_box_at(4.0));
        bp.calculate_overlapping_pairs(&mut recorder);
        assert_eq!(recorder.removed, vec![(p0, p1)]);
        assert!(bp.pair_cache().is_empty());
    }

    #[test]
    fn test_destroy_proxy_retires_pairs() {
        let mut bp = detector(BroadPhaseAlgorithm::BruteForce);
        let p0 = add(&mut bp, 0, 0.0, false);
        add(&mut bp, 1, 0.5, false);
        add(&mut bp, 2, -0.5, false);
        bp.calculate_overlapping_pairs(&mut NullPairCallback);
        assert_eq!(bp.pair_cache().len(), 2);

        let mut recorder = Recorder::default();
        assert!(bp.destroy_proxy(p0, &mut recorder).is_some());
        assert_eq!(recorder.removed.len(), 2);
        assert!(bp.pair_cache().is_empty());
        assert!(bp.destroy_proxy(p0, &mut recorder).is_none());
    }

    #[test]
    fn test_ids_are_monotonic_and_pairs_sorted() {
        let mut bp = detector(BroadPhaseAlgorithm::SweepAndPrune);
        let ids: Vec<_> = [3.0, 2.5, 0.0, 0.5]
            .into_iter()
            .enumerate()
            .map(|(i, x)| add(&mut bp, u32::try_from(i).unwrap(), x, false))
            .collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        bp.calculate_overlapping_pairs(&mut NullPairCallback);
        let keys: Vec<_> = bp.pair_cache().pairs().iter().map(OverlappingPair::key).collect();
        assert_eq!(keys, vec![(ids[0], ids[1]), (ids[2], ids[3])]);
    }

    #[test]
    fn test_aabb_query() {
        let mut bp = detector(BroadPhaseAlgorithm::Auto);
        add(&mut bp, 0, 0.0, false);
        add(&mut bp, 1, 10.0, false);
        let hits = bp.aabb_test(&unit_box_at(9.5));
        assert_eq!(hits, vec![BodyHandle::new(1, 0)]);
    }

    #[test]
    fn test_cache_remove_keeps_index_consistent() {
        let mut bp = detector(BroadPhaseAlgorithm::BruteForce);
        let ids: Vec<_> = (0..4)
            .map(|i| add(&mut bp, i, f64::from(i) * 0.1, false))
            .collect();
        bp.calculate_overlapping_pairs(&mut NullPairCallback);
        assert_eq!(bp.pair_cache().len(), 6);

        let cache = bp.pair_cache_mut();
        assert!(cache.remove_pair(ids[1], ids[0]).is_some());
        for pair in cache.pairs().to_vec() {
            assert!(cache.find_pair(pair.proxy1, pair.proxy0).is_some());
        }
        assert!(cache.find_pair(ids[0], ids[1]).is_none());
    }
}
