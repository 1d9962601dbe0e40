use crate::math::TangentFrame;
use crate::scene::{triangle_normal, Scene};
use glam::Vec3A;
use smallvec::SmallVec;
use std::f32::consts::TAU;

/// Angular intervals on a circle, non-wrapping, within [0, 2pi).
type ArcSet = SmallVec<[(f32, f32); 4]>;

const MIN_ECCENTRIC_SLACK: f32 = 1e-4;
const MIN_TRANSVERSAL: f32 = 1e-4;

/// Ellipsoid with foci on the two connection endpoints and major diameter
/// equal to the residual path length; the constraint surface on which the
/// inserted vertex must lie.
#[derive(Copy, Clone, Debug)]
pub struct EllipsoidGeometry {
    center: Vec3A,
    axes: [Vec3A; 3],
    a: f32,
    b: f32,
    f1: Vec3A,
    f2: Vec3A,
}

impl EllipsoidGeometry {
    /// `tau` is the required sum of distances to the two foci. Returns None
    /// when the foci are too far apart for that length.
    pub fn new(f1: Vec3A, f2: Vec3A, tau: f32) -> Option<Self> {
        let span = f2 - f1;
        let d = span.length();
        if tau <= d + MIN_ECCENTRIC_SLACK || d == 0.0 {
            return None;
        }
        let a = 0.5 * tau;
        let c = 0.5 * d;
        let b = (a * a - c * c).sqrt();
        let major = span / d;
        let frame = TangentFrame::from_normal(major);
        Some(EllipsoidGeometry {
            center: 0.5 * (f1 + f2),
            axes: [major, frame.tangent, frame.bitangent],
            a,
            b,
            f1,
            f2,
        })
    }

    /// Affine map under which the ellipsoid becomes the unit sphere.
    fn to_sphere(&self, p: Vec3A) -> Vec3A {
        let rel = p - self.center;
        Vec3A::new(
            rel.dot(self.axes[0]) / self.a,
            rel.dot(self.axes[1]) / self.b,
            rel.dot(self.axes[2]) / self.b,
        )
    }

    fn from_sphere(&self, q: Vec3A) -> Vec3A {
        self.center + self.a * q.x * self.axes[0] + self.b * q.y * self.axes[1] + self.b * q.z * self.axes[2]
    }

    /// Linear part of `from_sphere`, for differentials.
    fn map_tangent(&self, v: Vec3A) -> Vec3A {
        self.a * v.x * self.axes[0] + self.b * v.y * self.axes[1] + self.b * v.z * self.axes[2]
    }
}

/// Circle in which a triangle's plane cuts the unit sphere.
#[derive(Copy, Clone)]
struct PlaneCircle {
    center: Vec3A,
    e1: Vec3A,
    e2: Vec3A,
    radius: f32,
}

impl PlaneCircle {
    fn point(&self, theta: f32) -> Vec3A {
        let (sin, cos) = theta.sin_cos();
        self.center + self.radius * (cos * self.e1 + sin * self.e2)
    }

    fn tangent(&self, theta: f32) -> Vec3A {
        let (sin, cos) = theta.sin_cos();
        self.radius * (-sin * self.e1 + cos * self.e2)
    }
}

/// Point sampled on the constraint surface, with the geometric factors the
/// evaluator needs.
#[derive(Copy, Clone, Debug)]
pub struct Insertion {
    pub position: Vec3A,
    pub normal: Vec3A,
    pub primitive: usize,
    pub len1: f32,
    pub len2: f32,
    /// Reciprocal sampling density on the length-constrained manifold; the
    /// elliptic geometry correction of the estimator.
    pub inv_pdf: f32,
}

/// Per-worker scratch for constrained-length vertex insertion. Pre-sized to
/// the scene's primitive count; the arc bookkeeping is rebuilt for every
/// candidate ellipsoid and consulted by both sampling and pdf evaluation.
pub struct Ellipsoid {
    arcs: Vec<ArcSet>,
    measures: Vec<f32>,
    pub max_depth: usize,
}

impl Ellipsoid {
    pub fn new(max_depth: usize, primitive_count: usize) -> Self {
        Ellipsoid {
            arcs: vec![ArcSet::new(); primitive_count],
            measures: vec![0.0; primitive_count],
            max_depth,
        }
    }

    /// Intersect every primitive with the ellipsoid and record the admissible
    /// angular intervals. Returns the total angular measure.
    fn prepare(&mut self, scene: &dyn Scene, geometry: &EllipsoidGeometry) -> f32 {
        let mut total = 0.0;
        for primitive in 0..scene.primitive_count() {
            self.arcs[primitive].clear();
            self.measures[primitive] = 0.0;
            let triangle = scene.triangle(primitive);
            if let Some((_, arcs)) = triangle_arcs(geometry, &triangle) {
                let measure: f32 = arcs.iter().map(|(lo, hi)| hi - lo).sum();
                self.measures[primitive] = measure;
                self.arcs[primitive] = arcs;
                total += measure;
            }
        }
        total
    }

    /// Sample the one-vertex insertion making the total path length hit the
    /// ellipsoid's constraint. A single uniform variate picks both the
    /// primitive (proportionally to its admissible arc) and the angle.
    pub fn sample(
        &mut self,
        scene: &dyn Scene,
        u: f32,
        f1: Vec3A,
        f2: Vec3A,
        tau: f32,
    ) -> Option<Insertion> {
        let geometry = EllipsoidGeometry::new(f1, f2, tau)?;
        let total = self.prepare(scene, &geometry);
        if total <= 0.0 {
            return None;
        }
        let mut remaining = u.clamp(0.0, 1.0 - f32::EPSILON) * total;
        for primitive in 0..self.measures.len() {
            let measure = self.measures[primitive];
            if remaining >= measure {
                remaining -= measure;
                continue;
            }
            let triangle = scene.triangle(primitive);
            let (circle, _) = triangle_arcs(&geometry, &triangle)?;
            let mut theta = None;
            for &(lo, hi) in &self.arcs[primitive] {
                let width = hi - lo;
                if remaining < width {
                    theta = Some(lo + remaining);
                    break;
                }
                remaining -= width;
            }
            // float drift past the last interval clamps to its end
            let theta = theta.unwrap_or_else(|| self.arcs[primitive].last().unwrap().1);
            return finish_insertion(&geometry, &circle, &triangle, primitive, theta, total);
        }
        None
    }

    /// Density (on the length-constrained manifold) with which `sample`
    /// produces `position`; used when weighting against other insertion
    /// strategies for the same path.
    pub fn pdf(
        &mut self,
        scene: &dyn Scene,
        f1: Vec3A,
        f2: Vec3A,
        tau: f32,
        position: Vec3A,
        primitive: usize,
    ) -> f32 {
        let geometry = match EllipsoidGeometry::new(f1, f2, tau) {
            Some(geometry) => geometry,
            None => return 0.0,
        };
        let total = self.prepare(scene, &geometry);
        if total <= 0.0 || self.measures[primitive] <= 0.0 {
            return 0.0;
        }
        let triangle = scene.triangle(primitive);
        let (circle, _) = match triangle_arcs(&geometry, &triangle) {
            Some(result) => result,
            None => return 0.0,
        };
        let q = geometry.to_sphere(position);
        let rel = q - circle.center;
        let theta = rel.dot(circle.e2).atan2(rel.dot(circle.e1));
        match finish_insertion(&geometry, &circle, &triangle, primitive, theta, total) {
            Some(insertion) => 1.0 / insertion.inv_pdf,
            None => 0.0,
        }
    }
}

fn finish_insertion(
    geometry: &EllipsoidGeometry,
    circle: &PlaneCircle,
    triangle: &[Vec3A; 3],
    primitive: usize,
    theta: f32,
    total_measure: f32,
) -> Option<Insertion> {
    let position = geometry.from_sphere(circle.point(theta));
    let speed_vec = geometry.map_tangent(circle.tangent(theta));
    let speed = speed_vec.length();
    if speed <= 0.0 {
        return None;
    }
    let len1 = (position - geometry.f1).length();
    let len2 = (position - geometry.f2).length();
    if len1 < MIN_ECCENTRIC_SLACK || len2 < MIN_ECCENTRIC_SLACK {
        return None;
    }
    let normal = triangle_normal(triangle);
    // transversal component of the length gradient, in the surface plane and
    // perpendicular to the constraint curve
    let gradient = (position - geometry.f1) / len1 + (position - geometry.f2) / len2;
    let across = normal.cross(speed_vec / speed);
    let transversal = gradient.dot(across).abs();
    if transversal < MIN_TRANSVERSAL {
        // grazing intersection: the curve runs along the gradient
        return None;
    }
    Some(Insertion {
        position,
        normal,
        primitive,
        len1,
        len2,
        inv_pdf: total_measure * speed / transversal,
    })
}

/// Admissible angular intervals in which the ellipsoid-plane circle stays
/// inside the triangle, unit-sphere space.
fn triangle_arcs(
    geometry: &EllipsoidGeometry,
    triangle: &[Vec3A; 3],
) -> Option<(PlaneCircle, ArcSet)> {
    let v = [
        geometry.to_sphere(triangle[0]),
        geometry.to_sphere(triangle[1]),
        geometry.to_sphere(triangle[2]),
    ];
    let normal = (v[1] - v[0]).cross(v[2] - v[0]);
    let normal_len = normal.length();
    if normal_len == 0.0 {
        return None;
    }
    let normal = normal / normal_len;
    let offset = normal.dot(v[0]);
    if offset.abs() >= 1.0 {
        return None;
    }
    let radius = (1.0 - offset * offset).sqrt();
    let frame = TangentFrame::from_normal(normal);
    let circle = PlaneCircle {
        center: offset * normal,
        e1: frame.tangent,
        e2: frame.bitangent,
        radius,
    };

    let mut arcs: ArcSet = SmallVec::new();
    arcs.push((0.0, TAU));
    for edge in 0..3 {
        let from = v[edge];
        let to = v[(edge + 1) % 3];
        let inward = normal.cross(to - from);
        // inward . p(theta) >= inward . from
        let a = circle.radius * inward.dot(circle.e1);
        let b = circle.radius * inward.dot(circle.e2);
        let c = inward.dot(from) - inward.dot(circle.center);
        let amplitude = (a * a + b * b).sqrt();
        if amplitude < 1e-12 {
            if c > 0.0 {
                return None;
            }
            continue;
        }
        if c <= -amplitude {
            continue; // constraint holds for all theta
        }
        if c >= amplitude {
            return None; // constraint never holds
        }
        let phi = b.atan2(a);
        let alpha = (c / amplitude).clamp(-1.0, 1.0).acos();
        arcs = intersect_arcs(&arcs, wrap_interval(phi - alpha, phi + alpha));
        if arcs.is_empty() {
            return None;
        }
    }
    Some((circle, arcs))
}

/// Normalize an interval into non-wrapping pieces within [0, 2pi).
fn wrap_interval(lo: f32, hi: f32) -> ArcSet {
    let mut out: ArcSet = SmallVec::new();
    let lo = lo.rem_euclid(TAU);
    let hi = hi.rem_euclid(TAU);
    if lo <= hi {
        out.push((lo, hi));
    } else {
        out.push((0.0, hi));
        out.push((lo, TAU));
    }
    out
}

fn intersect_arcs(a: &ArcSet, b: ArcSet) -> ArcSet {
    let mut out: ArcSet = SmallVec::new();
    for &(alo, ahi) in a {
        for &(blo, bhi) in &b {
            let lo = alo.max(blo);
            let hi = ahi.min(bhi);
            if lo < hi {
                out.push((lo, hi));
            }
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::BoxScene;

    #[test]
    fn test_insertion_hits_the_length_constraint() {
        let scene = BoxScene::area_light();
        let mut ellipsoid = Ellipsoid::new(6, crate::scene::Scene::primitive_count(&scene));
        let f1 = Vec3A::new(-0.8, 0.0, -0.5);
        let f2 = Vec3A::new(0.8, 0.0, -0.5);
        let tau = 3.1;
        let mut hits = 0;
        for i in 0..256 {
            let u = (i as f32 + 0.5) / 256.0;
            if let Some(insertion) = ellipsoid.sample(&scene, u, f1, f2, tau) {
                hits += 1;
                let total = insertion.len1 + insertion.len2;
                assert!(
                    (total - tau).abs() < 2e-3,
                    "constraint missed: {} vs {}",
                    total,
                    tau
                );
                assert!(insertion.inv_pdf > 0.0 && insertion.inv_pdf.is_finite());
            }
        }
        assert!(hits > 64, "only {} of 256 insertions landed", hits);
    }

    #[test]
    fn test_pdf_matches_sample() {
        let scene = BoxScene::area_light();
        let mut ellipsoid = Ellipsoid::new(6, crate::scene::Scene::primitive_count(&scene));
        let f1 = Vec3A::new(-0.5, 0.2, -0.4);
        let f2 = Vec3A::new(0.6, -0.1, -0.6);
        let tau = 3.4;
        let insertion = (0..64)
            .find_map(|i| ellipsoid.sample(&scene, (i as f32 + 0.5) / 64.0, f1, f2, tau))
            .expect("no insertion found");
        let pdf = ellipsoid.pdf(&scene, f1, f2, tau, insertion.position, insertion.primitive);
        assert!(
            (pdf * insertion.inv_pdf - 1.0).abs() < 1e-3,
            "pdf {} vs inv_pdf {}",
            pdf,
            insertion.inv_pdf
        );
    }

    #[test]
    fn test_too_short_target_has_no_solution() {
        let scene = BoxScene::area_light();
        let mut ellipsoid = Ellipsoid::new(6, crate::scene::Scene::primitive_count(&scene));
        let f1 = Vec3A::new(-0.8, 0.0, -0.5);
        let f2 = Vec3A::new(0.8, 0.0, -0.5);
        // tau below the focal distance defines no ellipsoid
        assert!(ellipsoid.sample(&scene, 0.5, f1, f2, 1.0).is_none());
    }

    #[test]
    fn test_arc_intersection() {
        let mut a: ArcSet = SmallVec::new();
        a.push((0.0, 3.0));
        let b = wrap_interval(2.0, 5.0);
        let out = intersect_arcs(&a, b);
        assert_eq!(out.len(), 1);
        assert!((out[0].0 - 2.0).abs() < 1e-6 && (out[0].1 - 3.0).abs() < 1e-6);

        // wrapping interval splits in two
        let wrapped = wrap_interval(5.5, 1.0);
        assert_eq!(wrapped.len(), 2);
    }
}
