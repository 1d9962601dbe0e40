use crate::math::Spectrum;
use crate::sampler::{Sample1D, Sample2D};
use crate::TransportMode;
use glam::{Vec2, Vec3A};

pub type BsdfId = usize;
pub type EmitterId = usize;

#[derive(Copy, Clone, Debug)]
pub struct Ray {
    pub origin: Vec3A,
    pub direction: Vec3A,
    pub tmax: f32,
}

impl Ray {
    pub fn new(origin: Vec3A, direction: Vec3A) -> Self {
        Ray {
            origin,
            direction,
            tmax: f32::INFINITY,
        }
    }

    pub fn at(&self, t: f32) -> Vec3A {
        self.origin + t * self.direction
    }
}

/// Measure with which an interaction was sampled. `Discrete` marks the
/// degenerate cases (mirror, point light, pinhole) that no connection
/// strategy can hit.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Measure {
    SolidAngle,
    Area,
    Discrete,
    Invalid,
}

#[derive(Copy, Clone, Debug)]
pub struct SurfaceInteraction {
    pub position: Vec3A,
    pub normal: Vec3A,
    pub distance: f32,
    pub bsdf: BsdfId,
    pub primitive: usize,
    /// Set when the surface belongs to an area emitter.
    pub emitter: Option<EmitterId>,
}

/// Position sampled on an endpoint (emitter surface or sensor aperture).
#[derive(Copy, Clone, Debug)]
pub struct PositionSample {
    pub position: Vec3A,
    pub normal: Vec3A,
    /// Area-measure pdf, or 1 for `Discrete`.
    pub pdf: f32,
    pub measure: Measure,
    /// Spatial emission/importance component, already divided by `pdf`.
    pub value: Spectrum,
}

/// Direction sampled from an endpoint position.
#[derive(Copy, Clone, Debug)]
pub struct DirectionSample {
    pub direction: Vec3A,
    /// Solid-angle pdf, or 1 for `Discrete`.
    pub pdf: f32,
    pub measure: Measure,
    /// Directional component, already divided by `pdf`.
    pub value: Spectrum,
}

/// Result of direct sampling an endpoint from a reference point.
#[derive(Copy, Clone, Debug)]
pub struct DirectSample {
    pub position: Vec3A,
    pub normal: Vec3A,
    /// Unit vector from the reference point towards the sampled position.
    pub direction: Vec3A,
    pub distance: f32,
    /// Area-measure pdf of the sampled position (1 for `Discrete`).
    pub pdf: f32,
    pub measure: Measure,
    /// Emission/importance towards the reference, already divided by `pdf`.
    pub value: Spectrum,
    /// Film-plane splat position; only meaningful for sensors.
    pub uv: Vec2,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum EndpointKind {
    Area,
    Point,
    Directional,
    Projective,
    Environment,
}

/// Capability set shared by emitters and sensors.
pub trait Endpoint: Send + Sync {
    fn kind(&self) -> EndpointKind;

    /// False when the position is fixed (point light, laser, pinhole).
    fn needs_position_sample(&self) -> bool;

    /// False when the direction is fixed (laser, directional light).
    fn needs_direction_sample(&self) -> bool;

    /// Degenerate endpoints cannot be hit by a connection edge.
    fn is_degenerate(&self) -> bool {
        !self.needs_position_sample()
    }

    fn sample_position(&self, u: Sample2D) -> PositionSample;

    fn sample_direction(&self, origin: &PositionSample, u: Sample2D) -> DirectionSample;

    /// Directional emission/importance leaving `position` towards `direction`.
    fn eval_direction(&self, position: Vec3A, normal: Vec3A, direction: Vec3A) -> Spectrum;

    /// Solid-angle pdf of `sample_direction`.
    fn pdf_direction(&self, position: Vec3A, normal: Vec3A, direction: Vec3A) -> f32;

    /// Area-measure pdf of `sample_position`.
    fn pdf_position(&self, position: Vec3A) -> f32;

    /// Sample a point on the endpoint as seen from `reference`. Returns None
    /// when the strategy does not exist (e.g. a laser).
    fn sample_direct(&self, reference: Vec3A, u: Sample2D) -> Option<DirectSample>;

    /// Area-measure pdf of `sample_direct` landing on `position`.
    fn pdf_direct(&self, reference: Vec3A, position: Vec3A, normal: Vec3A) -> f32;
}

/// Sensor-specific extensions of the endpoint capability set.
pub trait Sensor: Endpoint {
    fn needs_time_sample(&self) -> bool {
        false
    }

    fn sample_time(&self, _u: f32) -> f32 {
        0.0
    }

    /// Importance-sample the ray through a pixel with a sub-pixel offset.
    /// Returns the aperture position sample, the direction sample and the
    /// continuous film-plane position.
    fn sample_pixel(
        &self,
        pixel: (u32, u32),
        u_pos: Sample2D,
        u_dir: Sample2D,
    ) -> (PositionSample, DirectionSample, Vec2);

    /// Film-plane position hit by the ray (`position`, `direction`), if any.
    fn film_position(&self, position: Vec3A, direction: Vec3A) -> Option<Vec2>;
}

#[derive(Copy, Clone, Debug)]
pub struct BsdfSample {
    /// Sampled outgoing direction, local frame.
    pub wo: Vec3A,
    /// Solid-angle pdf (1 for `Discrete`).
    pub pdf: f32,
    pub measure: Measure,
    /// f * |cos| / pdf.
    pub weight: Spectrum,
}

/// Surface scattering model. Directions are in the local shading frame with
/// the normal along +z; `eval` excludes the cosine term.
pub trait Bsdf: Send + Sync {
    fn eval(&self, wi: Vec3A, wo: Vec3A, mode: TransportMode) -> Spectrum;
    fn pdf(&self, wi: Vec3A, wo: Vec3A) -> f32;
    fn sample(&self, wi: Vec3A, u: Sample2D) -> Option<BsdfSample>;
    fn is_degenerate(&self) -> bool {
        false
    }
}

/// The ray-intersection and scene-database service the core renders against.
pub trait Scene: Send + Sync {
    fn ray_intersect(&self, ray: &Ray) -> Option<SurfaceInteraction>;

    /// Visibility test between two surface points (offset handling is the
    /// implementation's responsibility).
    fn occluded(&self, p0: Vec3A, p1: Vec3A) -> bool;

    fn bsdf(&self, id: BsdfId) -> &dyn Bsdf;

    fn emitter_count(&self) -> usize;

    fn emitter(&self, id: EmitterId) -> &dyn Endpoint;

    /// Pick an emitter for position sampling; returns (id, pick pdf).
    fn sample_emitter(&self, u: Sample1D) -> (EmitterId, f32);

    fn emitter_pick_pdf(&self, id: EmitterId) -> f32;

    fn sensor(&self) -> &dyn Sensor;

    fn has_degenerate_sensor(&self) -> bool {
        self.sensor().is_degenerate()
    }

    fn has_degenerate_emitters(&self) -> bool {
        (0..self.emitter_count()).all(|i| self.emitter(i).is_degenerate())
    }

    fn primitive_count(&self) -> usize;

    /// Triangle vertices of a primitive, for constrained-length sampling.
    fn triangle(&self, primitive: usize) -> [Vec3A; 3];

    /// BSDF governing a point on a primitive.
    fn primitive_bsdf(&self, primitive: usize) -> BsdfId;
}

pub fn triangle_normal(tri: &[Vec3A; 3]) -> Vec3A {
    (tri[1] - tri[0]).cross(tri[2] - tri[0]).normalize()
}
