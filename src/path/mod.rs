mod edge;
mod pool;
mod vertex;

pub use edge::PathEdge;
pub use pool::{EdgeHandle, PathPool, VertexHandle};
pub use vertex::{PathVertex, VertexKind};

use crate::math::Spectrum;
use crate::profile::Stats;
use crate::sampler::Sampler;
use crate::scene::{DirectionSample, Measure, Ray, Scene};
use crate::{TransportMode, NORMAL_OFFSET};
use smallvec::SmallVec;

/// Inline capacity of per-path handle and prefix arrays; paths deeper than
/// this spill to the heap.
pub const MAX_INLINE_PATH: usize = 18;

pub type HandleVec<T> = SmallVec<[T; MAX_INLINE_PATH]>;
pub type ScalarVec = SmallVec<[f32; MAX_INLINE_PATH]>;
pub type SpectrumVec = SmallVec<[Spectrum; MAX_INLINE_PATH]>;

/// Ordered vertex/edge handle sequence; vertex 0 is the supernode, vertex 1
/// the physical endpoint sample. `vertex_count == edge_count + 1`.
#[derive(Default)]
pub struct Path {
    vertices: HandleVec<VertexHandle>,
    edges: HandleVec<EdgeHandle>,
}

impl Path {
    pub fn new_emitter(pool: &mut PathPool) -> Self {
        let mut path = Path::default();
        path.vertices.push(pool.alloc_vertex(PathVertex::emitter_supernode()));
        path
    }

    pub fn new_sensor(pool: &mut PathPool) -> Self {
        let mut path = Path::default();
        path.vertices.push(pool.alloc_vertex(PathVertex::sensor_supernode()));
        path
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn vertex<'p>(&self, pool: &'p PathPool, index: usize) -> &'p PathVertex {
        pool.vertex(self.vertices[index])
    }

    pub fn edge<'p>(&self, pool: &'p PathPool, index: usize) -> &'p PathEdge {
        pool.edge(self.edges[index])
    }

    pub fn vertex_handle(&self, index: usize) -> VertexHandle {
        self.vertices[index]
    }

    pub(crate) fn push(&mut self, pool: &mut PathPool, edge: PathEdge, vertex: PathVertex) {
        self.edges.push(pool.alloc_edge(edge));
        self.vertices.push(pool.alloc_vertex(vertex));
    }

    /// Return every vertex and edge to the pool.
    pub fn release(&mut self, pool: &mut PathPool) {
        for handle in self.edges.drain(..).rev() {
            pool.release_edge(handle);
        }
        for handle in self.vertices.drain(..).rev() {
            pool.release_vertex(handle);
        }
    }
}

/// One subpath being grown; holds the direction sample produced together with
/// the endpoint (for sensors the pixel determines both at once).
struct WalkSide {
    mode: TransportMode,
    /// Maximum number of physical vertices (excludes the supernode).
    cap: usize,
    alive: bool,
    pending_direction: Option<DirectionSample>,
    throughput: Spectrum,
}

impl WalkSide {
    fn real_len(&self, path: &Path) -> usize {
        path.vertex_count().saturating_sub(1)
    }
}

/// Grow the emitter and sensor subpaths jointly by alternating steps: at each
/// iteration the shorter subpath extends by one edge. A subpath terminates on
/// its depth cap, a zero-throughput interaction, Russian roulette past
/// `rr_depth`, or escaping the scene.
#[allow(clippy::too_many_arguments)]
pub fn alternating_random_walk(
    scene: &dyn Scene,
    sampler: &mut dyn Sampler,
    pool: &mut PathPool,
    emitter_path: &mut Path,
    emitter_cap: usize,
    sensor_path: &mut Path,
    sensor_cap: usize,
    pixel: (u32, u32),
    rr_depth: usize,
    stats: &mut Stats,
) {
    debug_assert_eq!(emitter_path.vertex_count(), 1);
    debug_assert_eq!(sensor_path.vertex_count(), 1);

    let mut emitter_side = WalkSide {
        mode: TransportMode::Importance,
        cap: emitter_cap,
        alive: emitter_cap > 0,
        pending_direction: None,
        throughput: Spectrum::ONE,
    };
    let mut sensor_side = WalkSide {
        mode: TransportMode::Radiance,
        cap: sensor_cap,
        alive: sensor_cap > 0,
        pending_direction: None,
        throughput: Spectrum::ONE,
    };

    loop {
        let e_len = emitter_side.real_len(emitter_path);
        let s_len = sensor_side.real_len(sensor_path);
        let e_can = emitter_side.alive && e_len < emitter_side.cap;
        let s_can = sensor_side.alive && s_len < sensor_side.cap;
        if !e_can && !s_can {
            break;
        }
        // pixel walks lead, emitter walks catch up
        if s_can && (s_len <= e_len || !e_can) {
            extend(scene, sampler, pool, sensor_path, &mut sensor_side, Some(pixel), rr_depth, stats);
        } else {
            extend(scene, sampler, pool, emitter_path, &mut emitter_side, None, rr_depth, stats);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn extend(
    scene: &dyn Scene,
    sampler: &mut dyn Sampler,
    pool: &mut PathPool,
    path: &mut Path,
    side: &mut WalkSide,
    pixel: Option<(u32, u32)>,
    rr_depth: usize,
    stats: &mut Stats,
) {
    match path.vertex_count() {
        1 => sample_endpoint(scene, sampler, pool, path, side, pixel),
        2 => sample_first_surface(scene, sampler, pool, path, side),
        _ => sample_surface_step(scene, sampler, pool, path, side, rr_depth, stats),
    }
}

/// Populate vertex 1 (the physical endpoint) below the supernode.
fn sample_endpoint(
    scene: &dyn Scene,
    sampler: &mut dyn Sampler,
    pool: &mut PathPool,
    path: &mut Path,
    side: &mut WalkSide,
    pixel: Option<(u32, u32)>,
) {
    let mode = side.mode as usize;
    match pixel {
        Some(pixel) => {
            let sensor = scene.sensor();
            let (ps, ds, uv) = sensor.sample_pixel(pixel, sampler.next_2d(), sampler.next_2d());
            let mut vertex = PathVertex {
                kind: VertexKind::SensorSample {
                    position: ps.position,
                    normal: ps.normal,
                    sample_pos: uv,
                },
                measure: ps.measure,
                degenerate: sensor.is_degenerate(),
                rr_weight: 1.0,
                weight: [Spectrum::ONE; 2],
                pdf: [0.0; 2],
            };
            vertex.pdf[mode] = ps.pdf;
            pool.vertex_mut(path.vertex_handle(0)).weight[mode] = ps.value;
            path.push(pool, PathEdge::supernode(), vertex);
            side.pending_direction = Some(ds);
            side.throughput = ps.value;
        }
        None => {
            let (emitter_id, pick_pdf) = scene.sample_emitter(sampler.next_1d());
            let emitter = scene.emitter(emitter_id);
            let ps = emitter.sample_position(sampler.next_2d());
            let ds = emitter.sample_direction(&ps, sampler.next_2d());
            let mut vertex = PathVertex {
                kind: VertexKind::EmitterSample {
                    emitter: emitter_id,
                    position: ps.position,
                    normal: ps.normal,
                },
                measure: ps.measure,
                degenerate: emitter.is_degenerate(),
                rr_weight: 1.0,
                weight: [Spectrum::ONE; 2],
                pdf: [0.0; 2],
            };
            vertex.pdf[mode] = pick_pdf * ps.pdf;
            pool.vertex_mut(path.vertex_handle(0)).weight[mode] = ps.value / pick_pdf;
            path.push(pool, PathEdge::supernode(), vertex);
            side.pending_direction = Some(ds);
            side.throughput = ps.value / pick_pdf;
        }
    }
}

/// First real edge: trace the endpoint's direction sample into the scene.
fn sample_first_surface(
    scene: &dyn Scene,
    sampler: &mut dyn Sampler,
    pool: &mut PathPool,
    path: &mut Path,
    side: &mut WalkSide,
) {
    let _ = sampler;
    let ds = side
        .pending_direction
        .take()
        .expect("endpoint direction sample missing");
    if ds.value.is_zero() {
        side.alive = false;
        return;
    }
    let mode = side.mode as usize;
    let endpoint = *path.vertex(pool, 1);
    let origin = endpoint.position() + NORMAL_OFFSET * ds.direction;
    let ray = Ray::new(origin, ds.direction);
    let si = match scene.ray_intersect(&ray) {
        Some(si) => si,
        None => {
            side.alive = false;
            return;
        }
    };
    let edge = PathEdge::between(endpoint.position(), si.position);
    let mut vertex = surface_vertex(scene, si, -ds.direction);
    vertex.pdf[mode] = match ds.measure {
        // deterministic direction (laser): keep the raw probability
        Measure::Discrete => ds.pdf,
        _ => ds.pdf * edge_conversion(edge.length, si.normal, ds.direction),
    };
    if ds.measure == Measure::Discrete {
        vertex.measure = Measure::Discrete;
    }
    pool.vertex_mut(path.vertex_handle(1)).weight[mode] = ds.value;
    path.push(pool, edge, vertex);
    side.throughput *= ds.value;
}

/// Interior step: BSDF-sample a new direction at the current end vertex.
fn sample_surface_step(
    scene: &dyn Scene,
    sampler: &mut dyn Sampler,
    pool: &mut PathPool,
    path: &mut Path,
    side: &mut WalkSide,
    rr_depth: usize,
    stats: &mut Stats,
) {
    let mode = side.mode as usize;
    let current_index = path.vertex_count() - 1;
    let current = *path.vertex(pool, current_index);
    let (si, frame, wi_world) = match current.kind {
        VertexKind::Surface { si, frame, wi_world } => (si, frame, wi_world),
        _ => {
            side.alive = false;
            return;
        }
    };

    let wi = frame.to_local(wi_world);
    let bs = match scene.bsdf(si.bsdf).sample(wi, sampler.next_2d()) {
        Some(bs) => bs,
        None => {
            side.alive = false;
            return;
        }
    };
    if bs.weight.is_zero() {
        side.alive = false;
        return;
    }

    // unbiased termination past rr_depth, compensated on the surviving branch
    let mut rr_weight = 1.0;
    if current_index > rr_depth {
        let q = (side.throughput * bs.weight).max_element().min(0.95);
        if sampler.next_float() >= q {
            side.alive = false;
            stats.rr_terminations += 1;
            return;
        }
        rr_weight = 1.0 / q;
    }

    let wo_world = frame.to_world(bs.wo);
    let offset_sign = if bs.wo.z > 0.0 { 1.0 } else { -1.0 };
    let ray = Ray::new(si.position + offset_sign * NORMAL_OFFSET * si.normal, wo_world);
    let next_si = match scene.ray_intersect(&ray) {
        Some(next_si) => next_si,
        None => {
            side.alive = false;
            return;
        }
    };

    let edge = PathEdge::between(si.position, next_si.position);
    let mut next_vertex = surface_vertex(scene, next_si, -wo_world);
    next_vertex.pdf[mode] = match bs.measure {
        Measure::Discrete => bs.pdf,
        _ => bs.pdf * edge_conversion(edge.length, next_si.normal, wo_world),
    };
    if bs.measure == Measure::Discrete {
        next_vertex.measure = Measure::Discrete;
    }

    {
        let current = pool.vertex_mut(path.vertex_handle(current_index));
        current.weight[mode] = bs.weight;
        current.rr_weight = rr_weight;
    }

    // reverse pdf of the predecessor: density of re-sampling it from here
    // given the new outgoing direction
    if current_index >= 2 {
        let pred = *path.vertex(pool, current_index - 1);
        if !pred.is_supernode() {
            let pdf_rev_omega = scene.bsdf(si.bsdf).pdf(frame.to_local(wo_world), wi);
            let pred_edge = path.edge(pool, current_index - 1);
            let reverse = TransportMode::reverse(side.mode) as usize;
            pool.vertex_mut(path.vertex_handle(current_index - 1)).pdf[reverse] =
                pdf_rev_omega * edge_conversion(pred_edge.length, pred.normal(), -wi_world);
        }
    }

    path.push(pool, edge, next_vertex);
    side.throughput *= bs.weight * rr_weight;
}

fn surface_vertex(scene: &dyn Scene, si: crate::scene::SurfaceInteraction, wi_world: glam::Vec3A) -> PathVertex {
    PathVertex {
        kind: VertexKind::Surface {
            si,
            frame: crate::math::TangentFrame::from_normal(si.normal),
            wi_world,
        },
        measure: Measure::Area,
        degenerate: scene.bsdf(si.bsdf).is_degenerate(),
        rr_weight: 1.0,
        weight: [Spectrum::ONE; 2],
        pdf: [0.0; 2],
    }
}

/// Solid-angle to area conversion at the far vertex of an edge.
pub fn edge_conversion(length: f32, far_normal: glam::Vec3A, direction: glam::Vec3A) -> f32 {
    far_normal.dot(direction).abs() / (length * length)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sampler::IndependentSampler;
    use crate::testutil::BoxScene;

    #[test]
    fn test_walk_releases_cleanly() {
        let scene = BoxScene::area_light();
        let mut pool = PathPool::with_capacity(8);
        let mut sampler = IndependentSampler::new(1, 4);
        sampler.generate((5, 5));
        for _ in 0..32 {
            let mut emitter_path = Path::new_emitter(&mut pool);
            let mut sensor_path = Path::new_sensor(&mut pool);
            alternating_random_walk(
                &scene,
                &mut sampler,
                &mut pool,
                &mut emitter_path,
                6,
                &mut sensor_path,
                6,
                (5, 5),
                5,
                &mut crate::profile::Stats::default(),
            );
            assert!(emitter_path.vertex_count() >= 2);
            assert!(sensor_path.vertex_count() >= 2);
            assert!(emitter_path.vertex_count() <= 7);
            assert!(sensor_path.vertex_count() <= 7);
            emitter_path.release(&mut pool);
            sensor_path.release(&mut pool);
            assert!(pool.unused(), "pool leaked after sample");
            sampler.advance();
        }
    }

    #[test]
    fn test_walk_vertex_types() {
        let scene = BoxScene::area_light();
        let mut pool = PathPool::with_capacity(8);
        let mut sampler = IndependentSampler::new(3, 4);
        sampler.generate((8, 8));
        let mut emitter_path = Path::new_emitter(&mut pool);
        let mut sensor_path = Path::new_sensor(&mut pool);
        alternating_random_walk(
            &scene,
            &mut sampler,
            &mut pool,
            &mut emitter_path,
            4,
            &mut sensor_path,
            4,
            (8, 8),
            5,
            &mut crate::profile::Stats::default(),
        );
        assert!(emitter_path.vertex(&pool, 0).is_supernode());
        assert!(emitter_path.vertex(&pool, 1).is_emitter_sample());
        assert!(sensor_path.vertex(&pool, 0).is_supernode());
        assert!(sensor_path.vertex(&pool, 1).is_sensor_sample());
        for i in 2..emitter_path.vertex_count() {
            assert!(emitter_path.vertex(&pool, i).is_surface());
            assert!(emitter_path.vertex(&pool, i).pdf[TransportMode::Importance as usize] > 0.0);
        }
        for i in 2..sensor_path.vertex_count() {
            assert!(sensor_path.vertex(&pool, i).is_surface());
            assert!(sensor_path.vertex(&pool, i).pdf[TransportMode::Radiance as usize] > 0.0);
        }
        emitter_path.release(&mut pool);
        sensor_path.release(&mut pool);
        assert!(pool.unused());
    }
}
