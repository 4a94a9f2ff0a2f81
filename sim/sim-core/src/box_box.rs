//! Box-box contact generation.
//!
//! # Algorithm
//!
//! 1. Test the 15 candidate separating axes: 3 face normals of each box and
//!    the 9 cross products of their edge directions. Any axis separating the
//!    boxes by more than the breaking threshold means no contact.
//! 2. Pick the axis of least penetration. Face axes win ties; an edge axis
//!    must be clearly better to be chosen, since nearly parallel faces would
//!    otherwise flicker between face and edge contacts.
//! 3. Face axis: the box owning it provides the reference face, the other box
//!    the incident face (the one most anti-parallel to the normal). The
//!    incident face is clipped against the reference face's four side planes
//!    and every surviving vertex becomes a contact.
//! 4. Edge axis: one contact at the closest points of the two edges.
//!
//! Results are reported with the normal pointing from box B to box A, as
//! every narrow-phase algorithm does.

use nalgebra::{Point3, Vector3};
use smallvec::SmallVec;
use sim_types::Pose;

use crate::narrow_phase::ContactResult;

/// Relative margin an axis needs over the incumbent to replace it.
const REL_TOLERANCE: f64 = 0.05;
/// Absolute margin an axis needs over the incumbent to replace it.
const ABS_TOLERANCE: f64 = 1e-3;
/// Cross products shorter than this come from parallel edges.
const PARALLEL_EPSILON: f64 = 1e-6;

type Polygon = SmallVec<[Point3<f64>; 8]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Feature {
    FaceA(usize),
    FaceB(usize),
    Edge(usize, usize),
}

struct OrientedBox {
    center: Point3<f64>,
    axes: [Vector3<f64>; 3],
    half: Vector3<f64>,
}

impl OrientedBox {
    fn new(pose: &Pose, half: &Vector3<f64>) -> Self {
        let basis = pose.basis();
        Self {
            center: pose.position,
            axes: [
                basis.column(0).into_owned(),
                basis.column(1).into_owned(),
                basis.column(2).into_owned(),
            ],
            half: *half,
        }
    }

    /// Half-width of the box projected onto `axis`.
    fn projected_radius(&self, axis: &Vector3<f64>) -> f64 {
        (0..3)
            .map(|k| self.half[k] * self.axes[k].dot(axis).abs())
            .sum()
    }

    /// Face whose outward normal is closest to `direction`.
    fn face_towards(&self, direction: &Vector3<f64>) -> (usize, Vector3<f64>) {
        let k = (0..3)
            .max_by(|&i, &j| {
                self.axes[i]
                    .dot(direction)
                    .abs()
                    .total_cmp(&self.axes[j].dot(direction).abs())
            })
            .unwrap_or(0);
        (k, self.axes[k] * sign(self.axes[k].dot(direction)))
    }

    fn face_polygon(&self, k: usize, outward: &Vector3<f64>) -> Polygon {
        let center = self.center + outward * self.half[k];
        let (u, v) = other_axes(k);
        let du = self.axes[u] * self.half[u];
        let dv = self.axes[v] * self.half[v];
        SmallVec::from_slice(&[
            center + du + dv,
            center - du + dv,
            center - du - dv,
            center + du - dv,
        ])
    }

    /// Clip `polygon` to the slab of this box's face `k`.
    fn clip_to_face_sides(&self, k: usize, mut polygon: Polygon) -> Polygon {
        let (u, v) = other_axes(k);
        for side in [u, v] {
            let axis = self.axes[side];
            let c = axis.dot(&self.center.coords);
            polygon = clip(&polygon, &axis, c + self.half[side]);
            polygon = clip(&polygon, &(-axis), -c + self.half[side]);
        }
        polygon
    }

    /// Midpoint of the edge parallel to axis `k` that is farthest along `direction`.
    fn support_edge(&self, k: usize, direction: &Vector3<f64>) -> Point3<f64> {
        let (u, v) = other_axes(k);
        self.center
            + self.axes[u] * (self.half[u] * sign(self.axes[u].dot(direction)))
            + self.axes[v] * (self.half[v] * sign(self.axes[v].dot(direction)))
    }
}

fn sign(x: f64) -> f64 {
    if x < 0.0 { -1.0 } else { 1.0 }
}

fn other_axes(k: usize) -> (usize, usize) {
    ((k + 1) % 3, (k + 2) % 3)
}

fn clearly_better(candidate: f64, incumbent: f64) -> bool {
    candidate > incumbent + REL_TOLERANCE * incumbent.abs() + ABS_TOLERANCE
}

/// Sutherland-Hodgman: keep the part of `polygon` with `normal · p <= offset`.
fn clip(polygon: &[Point3<f64>], normal: &Vector3<f64>, offset: f64) -> Polygon {
    let mut out = Polygon::new();
    let n = polygon.len();
    for i in 0..n {
        let current = polygon[i];
        let next = polygon[(i + 1) % n];
        let dc = normal.dot(&current.coords) - offset;
        let dn = normal.dot(&next.coords) - offset;
        if dc <= 0.0 {
            out.push(current);
        }
        if (dc <= 0.0) != (dn <= 0.0) {
            let t = dc / (dc - dn);
            out.push(current + (next - current) * t);
        }
    }
    out
}

/// Generate contacts between two boxes.
pub fn box_box(
    pose_a: &Pose,
    half_a: &Vector3<f64>,
    pose_b: &Pose,
    half_b: &Vector3<f64>,
    breaking_threshold: f64,
    out: &mut dyn ContactResult,
) {
    let a = OrientedBox::new(pose_a, half_a);
    let b = OrientedBox::new(pose_b, half_b);
    let d = b.center - a.center;

    let separation = |axis: &Vector3<f64>| {
        d.dot(axis).abs() - a.projected_radius(axis) - b.projected_radius(axis)
    };

    let mut best_a = (f64::NEG_INFINITY, 0);
    for k in 0..3 {
        let sep = separation(&a.axes[k]);
        if sep > breaking_threshold {
            return;
        }
        if sep > best_a.0 {
            best_a = (sep, k);
        }
    }
    let mut best_b = (f64::NEG_INFINITY, 0);
    for k in 0..3 {
        let sep = separation(&b.axes[k]);
        if sep > breaking_threshold {
            return;
        }
        if sep > best_b.0 {
            best_b = (sep, k);
        }
    }

    let (mut best_sep, mut feature, mut axis) = if clearly_better(best_b.0, best_a.0) {
        (best_b.0, Feature::FaceB(best_b.1), b.axes[best_b.1])
    } else {
        (best_a.0, Feature::FaceA(best_a.1), a.axes[best_a.1])
    };

    for i in 0..3 {
        for j in 0..3 {
            let cross = a.axes[i].cross(&b.axes[j]);
            let len = cross.norm();
            if len < PARALLEL_EPSILON {
                continue;
            }
            let edge_axis = cross / len;
            let sep = separation(&edge_axis);
            if sep > breaking_threshold {
                return;
            }
            if clearly_better(sep, best_sep) {
                best_sep = sep;
                feature = Feature::Edge(i, j);
                axis = edge_axis;
            }
        }
    }

    // Normal from A towards B.
    let n = axis * sign(d.dot(&axis));
    let normal_on_b = -n;

    match feature {
        Feature::FaceA(k) => {
            let reference = a.center + n * a.half[k];
            let (j, outward) = b.face_towards(&-n);
            let incident = b.face_polygon(j, &outward);
            for p in a.clip_to_face_sides(k, incident) {
                let depth = (p - reference).dot(&n);
                if depth <= breaking_threshold {
                    out.add_contact_point(&normal_on_b, &p, depth);
                }
            }
        }
        Feature::FaceB(k) => {
            let reference = b.center - n * b.half[k];
            let (i, outward) = a.face_towards(&n);
            let incident = a.face_polygon(i, &outward);
            for q in b.clip_to_face_sides(k, incident) {
                let depth = (q - reference).dot(&normal_on_b);
                if depth <= breaking_threshold {
                    let on_b = q + n * depth;
                    out.add_contact_point(&normal_on_b, &on_b, depth);
                }
            }
        }
        Feature::Edge(i, j) => {
            let ea = a.support_edge(i, &n);
            let eb = b.support_edge(j, &-n);
            let (da, db) = (a.axes[i], b.axes[j]);
            let r = ea - eb;
            let bd = da.dot(&db);
            let c = da.dot(&r);
            let f = db.dot(&r);
            let denom = 1.0 - bd * bd;
            let s = if denom > PARALLEL_EPSILON {
                ((bd * f - c) / denom).clamp(-a.half[i], a.half[i])
            } else {
                0.0
            };
            let t = (f + s * bd).clamp(-b.half[j], b.half[j]);
            let on_a = ea + da * s;
            let on_b = eb + db * t;
            let depth = (on_a - on_b).dot(&normal_on_b);
            if depth <= breaking_threshold {
                out.add_contact_point(&normal_on_b, &on_b, depth);
            }
        }
    }
}
