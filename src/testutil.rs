//! Analytic box scene used by the integrator and renderer tests: diffuse
//! walls built from triangles, an area light or a laser on the ceiling, and a
//! pinhole sensor looking at the back wall.

use crate::math::{cosine_hemisphere_pdf, square_to_cosine_hemisphere, Spectrum, TangentFrame};
use crate::sampler::{Sample1D, Sample2D};
use crate::scene::{
    triangle_normal, Bsdf, BsdfSample, DirectSample, DirectionSample, EmitterId, Endpoint,
    EndpointKind, Measure, PositionSample, Ray, Scene, Sensor, SurfaceInteraction,
};
use crate::TransportMode;
use glam::{Vec2, Vec3A};

pub struct Lambertian {
    pub albedo: Spectrum,
}

impl Bsdf for Lambertian {
    fn eval(&self, wi: Vec3A, wo: Vec3A, _mode: TransportMode) -> Spectrum {
        if wi.z * wo.z <= 0.0 {
            return Spectrum::ZERO;
        }
        self.albedo * std::f32::consts::FRAC_1_PI
    }

    fn pdf(&self, wi: Vec3A, wo: Vec3A) -> f32 {
        if wi.z * wo.z <= 0.0 {
            return 0.0;
        }
        cosine_hemisphere_pdf(wo.z.abs())
    }

    fn sample(&self, wi: Vec3A, u: Sample2D) -> Option<BsdfSample> {
        if self.albedo.is_zero() {
            return None;
        }
        let mut wo = square_to_cosine_hemisphere((u.x, u.y));
        if wi.z < 0.0 {
            wo.z = -wo.z;
        }
        Some(BsdfSample {
            wo,
            pdf: cosine_hemisphere_pdf(wo.z.abs()),
            measure: Measure::SolidAngle,
            // f * cos / pdf collapses to the albedo
            weight: self.albedo,
        })
    }
}

/// Rectangular diffuse area light; emission is one-sided along `normal`.
pub struct AreaEmitter {
    pub corner: Vec3A,
    pub edge_u: Vec3A,
    pub edge_v: Vec3A,
    pub normal: Vec3A,
    pub radiance: Spectrum,
}

impl AreaEmitter {
    fn area(&self) -> f32 {
        self.edge_u.cross(self.edge_v).length()
    }
}

impl Endpoint for AreaEmitter {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Area
    }

    fn needs_position_sample(&self) -> bool {
        true
    }

    fn needs_direction_sample(&self) -> bool {
        true
    }

    fn sample_position(&self, u: Sample2D) -> PositionSample {
        PositionSample {
            position: self.corner + u.x * self.edge_u + u.y * self.edge_v,
            normal: self.normal,
            pdf: 1.0 / self.area(),
            measure: Measure::Area,
            // spatial emission component is flat; the weight is 1/pdf
            value: Spectrum::splat(self.area()),
        }
    }

    fn sample_direction(&self, origin: &PositionSample, u: Sample2D) -> DirectionSample {
        let frame = TangentFrame::from_normal(origin.normal);
        let local = square_to_cosine_hemisphere((u.x, u.y));
        DirectionSample {
            direction: frame.to_world(local),
            pdf: cosine_hemisphere_pdf(local.z),
            measure: Measure::SolidAngle,
            // radiance * cos / pdf
            value: self.radiance * std::f32::consts::PI,
        }
    }

    fn eval_direction(&self, _position: Vec3A, normal: Vec3A, direction: Vec3A) -> Spectrum {
        if normal.dot(direction) > 0.0 {
            self.radiance
        } else {
            Spectrum::ZERO
        }
    }

    fn pdf_direction(&self, _position: Vec3A, normal: Vec3A, direction: Vec3A) -> f32 {
        cosine_hemisphere_pdf(normal.dot(direction))
    }

    fn pdf_position(&self, _position: Vec3A) -> f32 {
        1.0 / self.area()
    }

    fn sample_direct(&self, reference: Vec3A, u: Sample2D) -> Option<DirectSample> {
        let position = self.corner + u.x * self.edge_u + u.y * self.edge_v;
        let to_ref = reference - position;
        if self.normal.dot(to_ref) <= 0.0 {
            return None;
        }
        let distance = to_ref.length();
        Some(DirectSample {
            position,
            normal: self.normal,
            direction: -to_ref / distance,
            distance,
            pdf: 1.0 / self.area(),
            measure: Measure::Area,
            value: self.radiance * self.area(),
            uv: Vec2::ZERO,
        })
    }

    fn pdf_direct(&self, reference: Vec3A, position: Vec3A, normal: Vec3A) -> f32 {
        if normal.dot(reference - position) <= 0.0 {
            return 0.0;
        }
        1.0 / self.area()
    }
}

/// Fixed origin and direction; degenerate in both position and direction.
pub struct LaserEmitter {
    pub origin: Vec3A,
    pub direction: Vec3A,
    pub power: Spectrum,
}

impl Endpoint for LaserEmitter {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Point
    }

    fn needs_position_sample(&self) -> bool {
        false
    }

    fn needs_direction_sample(&self) -> bool {
        false
    }

    fn sample_position(&self, _u: Sample2D) -> PositionSample {
        PositionSample {
            position: self.origin,
            normal: self.direction,
            pdf: 1.0,
            measure: Measure::Discrete,
            value: self.power,
        }
    }

    fn sample_direction(&self, _origin: &PositionSample, _u: Sample2D) -> DirectionSample {
        DirectionSample {
            direction: self.direction,
            pdf: 1.0,
            measure: Measure::Discrete,
            value: Spectrum::ONE,
        }
    }

    fn eval_direction(&self, _position: Vec3A, _normal: Vec3A, _direction: Vec3A) -> Spectrum {
        Spectrum::ZERO
    }

    fn pdf_direction(&self, _position: Vec3A, _normal: Vec3A, _direction: Vec3A) -> f32 {
        0.0
    }

    fn pdf_position(&self, _position: Vec3A) -> f32 {
        1.0
    }

    fn sample_direct(&self, _reference: Vec3A, _u: Sample2D) -> Option<DirectSample> {
        None
    }

    fn pdf_direct(&self, _reference: Vec3A, _position: Vec3A, _normal: Vec3A) -> f32 {
        0.0
    }
}

pub struct PinholeSensor {
    pub position: Vec3A,
    pub frame: TangentFrame, // normal = viewing direction
    pub tan_half_fov: f32,
    pub resolution: (u32, u32),
}

impl PinholeSensor {
    pub fn looking(position: Vec3A, target: Vec3A, fov_degrees: f32, resolution: (u32, u32)) -> Self {
        PinholeSensor {
            position,
            frame: TangentFrame::from_normal((target - position).normalize()),
            tan_half_fov: (fov_degrees.to_radians() * 0.5).tan(),
            resolution,
        }
    }

    fn aspect(&self) -> f32 {
        self.resolution.0 as f32 / self.resolution.1 as f32
    }

    fn film_area(&self) -> f32 {
        4.0 * self.tan_half_fov * self.tan_half_fov * self.aspect()
    }

    /// Per-pixel importance: the sampling density of `sample_pixel` over
    /// solid angle.
    fn importance(&self, direction: Vec3A) -> f32 {
        let cos_theta = self.frame.cos_theta(direction);
        if cos_theta <= 0.0 {
            return 0.0;
        }
        if self.film_coords(direction).is_none() {
            return 0.0;
        }
        let pixel_area = self.film_area() / (self.resolution.0 * self.resolution.1) as f32;
        1.0 / (pixel_area * cos_theta * cos_theta * cos_theta)
    }

    /// Continuous film coordinates (pixels) hit by a direction, if inside
    /// the frustum.
    fn film_coords(&self, direction: Vec3A) -> Option<Vec2> {
        let cos_theta = self.frame.cos_theta(direction);
        if cos_theta <= 1e-6 {
            return None;
        }
        let at_unit = direction / cos_theta;
        let sx = at_unit.dot(self.frame.tangent);
        let sy = at_unit.dot(self.frame.bitangent);
        let half_w = self.tan_half_fov * self.aspect();
        let half_h = self.tan_half_fov;
        if sx.abs() > half_w || sy.abs() > half_h {
            return None;
        }
        Some(Vec2::new(
            (sx / half_w * 0.5 + 0.5) * self.resolution.0 as f32,
            (0.5 - sy / half_h * 0.5) * self.resolution.1 as f32,
        ))
    }
}

impl Endpoint for PinholeSensor {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Point
    }

    fn needs_position_sample(&self) -> bool {
        false
    }

    fn needs_direction_sample(&self) -> bool {
        true
    }

    fn sample_position(&self, _u: Sample2D) -> PositionSample {
        PositionSample {
            position: self.position,
            normal: self.frame.normal,
            pdf: 1.0,
            measure: Measure::Discrete,
            value: Spectrum::ONE,
        }
    }

    fn sample_direction(&self, _origin: &PositionSample, u: Sample2D) -> DirectionSample {
        // uniform over the film plane; equivalent to a uniform pixel choice
        // followed by sample_pixel, hence the pixel-count weight
        let half_w = self.tan_half_fov * self.aspect();
        let sx = (2.0 * u.x - 1.0) * half_w;
        let sy = (2.0 * u.y - 1.0) * self.tan_half_fov;
        let direction =
            (self.frame.normal + sx * self.frame.tangent + sy * self.frame.bitangent).normalize();
        let pixels = (self.resolution.0 * self.resolution.1) as f32;
        DirectionSample {
            direction,
            pdf: self.importance(direction) / pixels,
            measure: Measure::SolidAngle,
            value: Spectrum::splat(pixels),
        }
    }

    fn eval_direction(&self, _position: Vec3A, _normal: Vec3A, direction: Vec3A) -> Spectrum {
        Spectrum::splat(self.importance(direction))
    }

    fn pdf_direction(&self, _position: Vec3A, _normal: Vec3A, direction: Vec3A) -> f32 {
        self.importance(direction)
    }

    fn pdf_position(&self, _position: Vec3A) -> f32 {
        1.0
    }

    fn sample_direct(&self, reference: Vec3A, _u: Sample2D) -> Option<DirectSample> {
        let to_ref = reference - self.position;
        let distance = to_ref.length();
        let direction = to_ref / distance;
        let uv = self.film_coords(direction)?;
        Some(DirectSample {
            position: self.position,
            normal: self.frame.normal,
            direction: -direction,
            distance,
            pdf: 1.0,
            measure: Measure::Discrete,
            value: Spectrum::splat(self.importance(direction)),
            uv,
        })
    }

    fn pdf_direct(&self, reference: Vec3A, _position: Vec3A, _normal: Vec3A) -> f32 {
        let direction = (reference - self.position).normalize();
        if self.film_coords(direction).is_some() {
            1.0
        } else {
            0.0
        }
    }
}

impl Sensor for PinholeSensor {
    fn sample_pixel(
        &self,
        pixel: (u32, u32),
        u_pos: Sample2D,
        _u_dir: Sample2D,
    ) -> (PositionSample, DirectionSample, Vec2) {
        let uv = Vec2::new(pixel.0 as f32 + u_pos.x, pixel.1 as f32 + u_pos.y);
        let half_w = self.tan_half_fov * self.aspect();
        let sx = (uv.x / self.resolution.0 as f32 * 2.0 - 1.0) * half_w;
        let sy = (1.0 - uv.y / self.resolution.1 as f32 * 2.0) * self.tan_half_fov;
        let direction =
            (self.frame.normal + sx * self.frame.tangent + sy * self.frame.bitangent).normalize();
        let position = PositionSample {
            position: self.position,
            normal: self.frame.normal,
            pdf: 1.0,
            measure: Measure::Discrete,
            value: Spectrum::ONE,
        };
        let direction_sample = DirectionSample {
            direction,
            pdf: self.importance(direction),
            measure: Measure::SolidAngle,
            value: Spectrum::ONE,
        };
        (position, direction_sample, uv)
    }

    fn film_position(&self, _position: Vec3A, direction: Vec3A) -> Option<Vec2> {
        self.film_coords(direction)
    }
}

enum SceneEmitter {
    Area(AreaEmitter),
    Laser(LaserEmitter),
}

impl SceneEmitter {
    fn endpoint(&self) -> &dyn Endpoint {
        match self {
            SceneEmitter::Area(e) => e,
            SceneEmitter::Laser(e) => e,
        }
    }
}

pub struct BoxScene {
    triangles: Vec<[Vec3A; 3]>,
    triangle_bsdfs: Vec<usize>,
    triangle_emitters: Vec<Option<EmitterId>>,
    bsdfs: Vec<Lambertian>,
    emitters: Vec<SceneEmitter>,
    sensor: PinholeSensor,
}

const WHITE: Spectrum = Spectrum::new(0.75, 0.75, 0.75);

impl BoxScene {
    /// Interior of a 2x2x2 box with a rectangular ceiling light.
    pub fn area_light() -> Self {
        let mut scene = Self::empty_box();
        let light = AreaEmitter {
            corner: Vec3A::new(-0.4, -0.4, 0.999),
            edge_u: Vec3A::new(0.8, 0.0, 0.0),
            edge_v: Vec3A::new(0.0, 0.8, 0.0),
            normal: Vec3A::new(0.0, 0.0, -1.0),
            radiance: Spectrum::new(4.0, 4.0, 4.0),
        };
        // the light's geometry is intersectable; its surface is black
        let black = scene.add_bsdf(Lambertian {
            albedo: Spectrum::ZERO,
        });
        let c = light.corner;
        let (eu, ev) = (light.edge_u, light.edge_v);
        scene.push_quad([c, c + eu, c + eu + ev, c + ev], black, Some(0));
        scene.emitters.push(SceneEmitter::Area(light));
        scene
    }

    /// Same box, lit by a single laser pointed at the floor.
    pub fn laser() -> Self {
        let mut scene = Self::empty_box();
        scene.emitters.push(SceneEmitter::Laser(LaserEmitter {
            origin: Vec3A::new(0.3, 0.0, 0.95),
            direction: Vec3A::new(0.0, 0.0, -1.0),
            power: Spectrum::new(8.0, 8.0, 8.0),
        }));
        scene
    }

    fn empty_box() -> Self {
        let mut scene = BoxScene {
            triangles: Vec::new(),
            triangle_bsdfs: Vec::new(),
            triangle_emitters: Vec::new(),
            bsdfs: Vec::new(),
            emitters: Vec::new(),
            sensor: PinholeSensor::looking(
                Vec3A::new(0.0, 1.7, 0.0),
                Vec3A::new(0.0, 0.0, 0.0),
                70.0,
                (8, 8),
            ),
        };
        let white = scene.add_bsdf(Lambertian { albedo: WHITE });
        let (lo, hi) = (-1.0f32, 1.0f32);
        // floor and ceiling
        scene.push_quad(
            [
                Vec3A::new(lo, lo, lo),
                Vec3A::new(hi, lo, lo),
                Vec3A::new(hi, hi, lo),
                Vec3A::new(lo, hi, lo),
            ],
            white,
            None,
        );
        scene.push_quad(
            [
                Vec3A::new(lo, lo, hi),
                Vec3A::new(lo, hi, hi),
                Vec3A::new(hi, hi, hi),
                Vec3A::new(hi, lo, hi),
            ],
            white,
            None,
        );
        // back wall (y = lo) and side walls
        scene.push_quad(
            [
                Vec3A::new(lo, lo, lo),
                Vec3A::new(lo, lo, hi),
                Vec3A::new(hi, lo, hi),
                Vec3A::new(hi, lo, lo),
            ],
            white,
            None,
        );
        scene.push_quad(
            [
                Vec3A::new(lo, lo, lo),
                Vec3A::new(lo, hi, lo),
                Vec3A::new(lo, hi, hi),
                Vec3A::new(lo, lo, hi),
            ],
            white,
            None,
        );
        scene.push_quad(
            [
                Vec3A::new(hi, lo, lo),
                Vec3A::new(hi, lo, hi),
                Vec3A::new(hi, hi, hi),
                Vec3A::new(hi, hi, lo),
            ],
            white,
            None,
        );
        scene
    }

    fn add_bsdf(&mut self, bsdf: Lambertian) -> usize {
        self.bsdfs.push(bsdf);
        self.bsdfs.len() - 1
    }

    fn push_quad(&mut self, corners: [Vec3A; 4], bsdf: usize, emitter: Option<EmitterId>) {
        self.triangles.push([corners[0], corners[1], corners[2]]);
        self.triangles.push([corners[0], corners[2], corners[3]]);
        for _ in 0..2 {
            self.triangle_bsdfs.push(bsdf);
            self.triangle_emitters.push(emitter);
        }
    }

    fn intersect_triangle(&self, index: usize, ray: &Ray) -> Option<f32> {
        let [a, b, c] = self.triangles[index];
        let e1 = b - a;
        let e2 = c - a;
        let p = ray.direction.cross(e2);
        let det = e1.dot(p);
        if det.abs() < 1e-9 {
            return None;
        }
        let inv_det = 1.0 / det;
        let s = ray.origin - a;
        let u = s.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = s.cross(e1);
        let v = ray.direction.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = e2.dot(q) * inv_det;
        (t > 1e-4 && t < ray.tmax).then_some(t)
    }
}

impl Scene for BoxScene {
    fn ray_intersect(&self, ray: &Ray) -> Option<SurfaceInteraction> {
        let mut nearest: Option<(f32, usize)> = None;
        for index in 0..self.triangles.len() {
            if let Some(t) = self.intersect_triangle(index, ray) {
                if nearest.map_or(true, |(best, _)| t < best) {
                    nearest = Some((t, index));
                }
            }
        }
        nearest.map(|(t, index)| SurfaceInteraction {
            position: ray.at(t),
            normal: triangle_normal(&self.triangles[index]),
            distance: t,
            bsdf: self.triangle_bsdfs[index],
            primitive: index,
            emitter: self.triangle_emitters[index],
        })
    }

    fn occluded(&self, p0: Vec3A, p1: Vec3A) -> bool {
        let segment = p1 - p0;
        let distance = segment.length();
        let direction = segment / distance;
        let mut ray = Ray::new(p0 + 1e-3 * direction, direction);
        ray.tmax = distance - 2e-3;
        (0..self.triangles.len()).any(|index| self.intersect_triangle(index, &ray).is_some())
    }

    fn bsdf(&self, id: usize) -> &dyn Bsdf {
        &self.bsdfs[id]
    }

    fn emitter_count(&self) -> usize {
        self.emitters.len()
    }

    fn emitter(&self, id: EmitterId) -> &dyn Endpoint {
        self.emitters[id].endpoint()
    }

    fn sample_emitter(&self, u: Sample1D) -> (EmitterId, f32) {
        let count = self.emitters.len();
        let index = ((u.x * count as f32) as usize).min(count - 1);
        (index, 1.0 / count as f32)
    }

    fn emitter_pick_pdf(&self, _id: EmitterId) -> f32 {
        1.0 / self.emitters.len() as f32
    }

    fn sensor(&self) -> &dyn Sensor {
        &self.sensor
    }

    fn primitive_count(&self) -> usize {
        self.triangles.len()
    }

    fn triangle(&self, primitive: usize) -> [Vec3A; 3] {
        self.triangles[primitive]
    }

    fn primitive_bsdf(&self, primitive: usize) -> usize {
        self.triangle_bsdfs[primitive]
    }
}
