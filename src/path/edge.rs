use crate::math::Spectrum;
use glam::Vec3A;

/// Segment between two adjacent path vertices. The two weight/pdf slots are
/// indexed by `TransportMode`; with vacuum between surfaces the transmittance
/// is one and the distance-sampling pdf is one, but the slots are kept so the
/// prefix-throughput products read the same as they would with media.
#[derive(Copy, Clone, Debug)]
pub struct PathEdge {
    /// Unit direction from the earlier vertex (walk order) to the later one.
    pub direction: Vec3A,
    /// Geometric length in world units; zero for supernode edges.
    pub length: f32,
    pub weight: [Spectrum; 2],
    pub pdf: [f32; 2],
}

impl PathEdge {
    /// Abstract zero-length edge between a supernode and its endpoint sample.
    pub fn supernode() -> Self {
        PathEdge {
            direction: Vec3A::ZERO,
            length: 0.0,
            weight: [Spectrum::ONE; 2],
            pdf: [1.0; 2],
        }
    }

    pub fn between(from: Vec3A, to: Vec3A) -> Self {
        let segment = to - from;
        let length = segment.length();
        PathEdge {
            direction: segment / length,
            length,
            weight: [Spectrum::ONE; 2],
            pdf: [1.0; 2],
        }
    }
}
