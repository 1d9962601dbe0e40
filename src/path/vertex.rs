use crate::math::{Spectrum, TangentFrame};
use crate::scene::{EmitterId, Measure, Scene, SurfaceInteraction};
use crate::TransportMode;
use glam::{Vec2, Vec3A};

#[derive(Copy, Clone, Debug)]
pub enum VertexKind {
    /// Abstract root of the emitter subpath (index 0).
    EmitterSupernode,
    /// Abstract root of the sensor subpath (index 0).
    SensorSupernode,
    /// Physical sample on an emitter (index 1 of the emitter subpath, or a
    /// temporary produced by direct sampling).
    EmitterSample {
        emitter: EmitterId,
        position: Vec3A,
        normal: Vec3A,
    },
    /// Physical sample on the sensor (index 1 of the sensor subpath, or a
    /// temporary produced by direct sampling).
    SensorSample {
        position: Vec3A,
        normal: Vec3A,
        sample_pos: Vec2,
    },
    /// Scattering event on scene geometry.
    Surface {
        si: SurfaceInteraction,
        frame: TangentFrame,
        /// Unit direction towards the walk predecessor, world space.
        wi_world: Vec3A,
    },
}

/// A point along a light-transport path.
///
/// `weight[mode]` is the throughput factor contributed by sampling the *next*
/// vertex from this one in the given transport direction (f·cos/pdf for
/// surface steps, the position/direction sample weights for endpoints).
/// `pdf[mode]` is the area-measure density with which *this* vertex was (or
/// would be) generated from its neighbor in that direction; `Discrete`
/// measures store the raw probability.
#[derive(Copy, Clone, Debug)]
pub struct PathVertex {
    pub kind: VertexKind,
    pub measure: Measure,
    pub degenerate: bool,
    pub rr_weight: f32,
    pub weight: [Spectrum; 2],
    pub pdf: [f32; 2],
}

impl PathVertex {
    pub fn emitter_supernode() -> Self {
        PathVertex {
            kind: VertexKind::EmitterSupernode,
            measure: Measure::Invalid,
            degenerate: true,
            rr_weight: 1.0,
            weight: [Spectrum::ONE; 2],
            pdf: [1.0; 2],
        }
    }

    pub fn sensor_supernode() -> Self {
        PathVertex {
            kind: VertexKind::SensorSupernode,
            measure: Measure::Invalid,
            degenerate: true,
            rr_weight: 1.0,
            weight: [Spectrum::ONE; 2],
            pdf: [1.0; 2],
        }
    }

    pub fn position(&self) -> Vec3A {
        match &self.kind {
            VertexKind::EmitterSupernode | VertexKind::SensorSupernode => {
                panic!("supernodes have no position")
            }
            VertexKind::EmitterSample { position, .. } => *position,
            VertexKind::SensorSample { position, .. } => *position,
            VertexKind::Surface { si, .. } => si.position,
        }
    }

    pub fn normal(&self) -> Vec3A {
        match &self.kind {
            VertexKind::EmitterSupernode | VertexKind::SensorSupernode => {
                panic!("supernodes have no normal")
            }
            VertexKind::EmitterSample { normal, .. } => *normal,
            VertexKind::SensorSample { normal, .. } => *normal,
            VertexKind::Surface { si, .. } => si.normal,
        }
    }

    pub fn is_supernode(&self) -> bool {
        matches!(
            self.kind,
            VertexKind::EmitterSupernode | VertexKind::SensorSupernode
        )
    }

    pub fn is_surface(&self) -> bool {
        matches!(self.kind, VertexKind::Surface { .. })
    }

    pub fn is_emitter_sample(&self) -> bool {
        matches!(self.kind, VertexKind::EmitterSample { .. })
    }

    pub fn is_sensor_sample(&self) -> bool {
        matches!(self.kind, VertexKind::SensorSample { .. })
    }

    pub fn is_degenerate(&self) -> bool {
        self.degenerate
    }

    pub fn is_connectable(&self) -> bool {
        !self.is_supernode() && !self.degenerate
    }

    /// Film-plane position of a sensor sample.
    pub fn sample_position(&self) -> Vec2 {
        match &self.kind {
            VertexKind::SensorSample { sample_pos, .. } => *sample_pos,
            _ => panic!("sample_position queried on a non-sensor vertex"),
        }
    }

    pub fn surface_primitive(&self) -> Option<usize> {
        match &self.kind {
            VertexKind::Surface { si, .. } => Some(si.primitive),
            _ => None,
        }
    }

    /// Scattering/emission value for transporting between `pred_pos` and
    /// `succ_pos` through this vertex. Solid-angle convention, cosine terms
    /// excluded (they live in the geometric term of the connecting edge).
    pub fn eval(
        &self,
        scene: &dyn Scene,
        pred_pos: Option<Vec3A>,
        succ_pos: Vec3A,
        mode: TransportMode,
    ) -> Spectrum {
        match &self.kind {
            VertexKind::EmitterSupernode | VertexKind::SensorSupernode => Spectrum::ONE,
            VertexKind::EmitterSample {
                emitter,
                position,
                normal,
            } => {
                let d = (succ_pos - *position).normalize();
                scene.emitter(*emitter).eval_direction(*position, *normal, d)
            }
            VertexKind::SensorSample {
                position, normal, ..
            } => {
                let d = (succ_pos - *position).normalize();
                scene.sensor().eval_direction(*position, *normal, d)
            }
            VertexKind::Surface { si, frame, wi_world } => {
                let wi_w = match pred_pos {
                    Some(p) => (p - si.position).normalize(),
                    None => *wi_world,
                };
                let wi = frame.to_local(wi_w);
                let wo = frame.to_local((succ_pos - si.position).normalize());
                scene.bsdf(si.bsdf).eval(wi, wo, mode)
            }
        }
    }

    /// Area-measure pdf of this vertex generating a vertex at `target` when
    /// walked through from `pred_pos`. Used by the MIS evaluation at the
    /// junction, where the incoming direction differs from the walk's.
    pub fn pdf_toward(
        &self,
        scene: &dyn Scene,
        pred_pos: Option<Vec3A>,
        target_pos: Vec3A,
        target_normal: Option<Vec3A>,
    ) -> f32 {
        let origin = match &self.kind {
            VertexKind::EmitterSupernode | VertexKind::SensorSupernode => return 0.0,
            _ => self.position(),
        };
        let to_target = target_pos - origin;
        let dist_sq = to_target.length_squared();
        if dist_sq == 0.0 {
            return 0.0;
        }
        let d = to_target / dist_sq.sqrt();
        let pdf_omega = match &self.kind {
            VertexKind::EmitterSample {
                emitter,
                position,
                normal,
            } => scene.emitter(*emitter).pdf_direction(*position, *normal, d),
            VertexKind::SensorSample {
                position, normal, ..
            } => scene.sensor().pdf_direction(*position, *normal, d),
            VertexKind::Surface { si, frame, wi_world } => {
                let wi_w = match pred_pos {
                    Some(p) => (p - si.position).normalize(),
                    None => *wi_world,
                };
                scene
                    .bsdf(si.bsdf)
                    .pdf(frame.to_local(wi_w), frame.to_local(d))
            }
            _ => unreachable!(),
        };
        let cos_target = target_normal.map(|n| n.dot(d).abs()).unwrap_or(1.0);
        pdf_omega * cos_target / dist_sq
    }
}
