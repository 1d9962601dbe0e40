mod elliptic;
mod mis;

pub use elliptic::{Ellipsoid, EllipsoidGeometry, Insertion};
pub use mis::{balance_weight, MisVertex, MisVertices};

use crate::config::{Configuration, DecompositionType};
use crate::film::WorkResult;
use crate::filter::ReconstructionFilter;
use crate::math::{geometric_term, Spectrum, TangentFrame};
use crate::path::{Path, PathPool, PathVertex, ScalarVec, SpectrumVec, VertexKind};
use crate::pathlength::ModulationType;
use crate::profile::Stats;
use crate::sampler::Sampler;
use crate::scene::{Measure, Scene, Sensor, SurfaceInteraction};
use crate::{TransportMode, MIN_EDGE_LENGTH};
use glam::Vec3A;
use smallvec::SmallVec;

const IMP: usize = TransportMode::Importance as usize;
const RAD: usize = TransportMode::Radiance as usize;

/// Decomposition a candidate connection is routed to. Resolved once per
/// candidate at a single decision point; a candidate is never reclassified
/// after that.
#[derive(Copy, Clone, PartialEq, Debug)]
enum ActiveDecomposition {
    Steady,
    Transient { reweight: f32 },
    Bounce,
    Elliptic { reweight: f32 },
}

/// Connects every prefix pair of the two subpaths, weights the samples by
/// multiple importance sampling and routes contributions to the configured
/// output bins. One instance per worker; owns the elliptic scratch and the
/// per-sample channel buffers.
pub struct Evaluator<'a> {
    pub scene: &'a dyn Scene,
    pub ellipsoid: Ellipsoid,
    pub stats: Stats,
    /// Normalization of the modulation waveform over the decomposition
    /// bounds; the reciprocal-pdf factor of unmodulated targets is the plain
    /// bound span.
    target_norm: f32,
    decomposition_scratch: Vec<f32>,
    light_scratch: Vec<f32>,
}

impl<'a> Evaluator<'a> {
    pub fn new(scene: &'a dyn Scene, config: &Configuration) -> Self {
        let max_depth = if config.max_depth < 0 {
            crate::path::MAX_INLINE_PATH
        } else {
            config.max_depth as usize
        };
        let bounds = config.decomposition_bounds();
        let target_norm = match config.path_length_sampler.modulation {
            ModulationType::None => bounds.span(),
            _ => {
                // midpoint rule; the waveforms are smooth and periodic
                let slices = 512;
                let dx = bounds.span() / slices as f32;
                (0..slices)
                    .map(|i| config.path_length_sampler.correlation(bounds.lower + (i as f32 + 0.5) * dx))
                    .sum::<f32>()
                    * dx
            }
        };
        Evaluator {
            scene,
            ellipsoid: Ellipsoid::new(max_depth, scene.primitive_count()),
            stats: Stats::default(),
            target_norm,
            decomposition_scratch: Vec::new(),
            light_scratch: Vec::new(),
        }
    }

    /// Reciprocal pdf with which `sample_target` drew `target`.
    pub fn target_inv_pdf(&self, config: &Configuration, target: f32) -> f32 {
        match config.path_length_sampler.modulation {
            ModulationType::None => self.target_norm,
            _ => self.target_norm / config.path_length_sampler.correlation(target).max(1e-4),
        }
    }

    /// Evaluate the contributions of one emitter/sensor subpath pair and
    /// commit them to the work result. Returns the total pixel contribution,
    /// which drives the adaptive controller's variance tracking.
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate(
        &mut self,
        config: &Configuration,
        result: &mut WorkResult,
        filter: &dyn ReconstructionFilter,
        pool: &PathPool,
        emitter_path: &Path,
        sensor_path: &Path,
        path_length_target: f32,
        target_inv_pdf: f32,
        sampler: &mut dyn Sampler,
    ) -> Spectrum {
        let emitter_count = emitter_path.vertex_count();
        let sensor_count = sensor_path.vertex_count();
        self.stats.pixel_samples += 1;

        let is_emitter_laser = match emitter_path.vertex(pool, 1).kind {
            VertexKind::EmitterSample { emitter, .. } => {
                let e = self.scene.emitter(emitter);
                !e.needs_position_sample() && !e.needs_direction_sample()
            }
            _ => false,
        };

        let initial_sample_pos = sensor_path.vertex(pool, 1).sample_position();

        // in elliptic mode one edge of the depth budget is reserved for the
        // inserted connection vertex
        let depth_cap = if config.max_depth < 0 {
            None
        } else if config.decomposition == DecompositionType::TransientEllipse {
            Some(config.max_depth - 1)
        } else {
            Some(config.max_depth)
        };

        // cumulative per-prefix path "lengths" (world units, or bounces)
        let mut emitter_lengths: ScalarVec = SmallVec::new();
        let mut sensor_lengths: ScalarVec = SmallVec::new();
        if config.decomposition != DecompositionType::Steady {
            let step = |path: &Path, out: &mut ScalarVec| {
                out.push(0.0);
                out.push(0.0);
                for i in 2..path.vertex_count() {
                    let increment = match config.decomposition {
                        DecompositionType::Bounce => 1.0,
                        _ => path.edge(pool, i - 1).length,
                    };
                    out.push(out[i - 1] + increment);
                }
            };
            step(emitter_path, &mut emitter_lengths);
            step(sensor_path, &mut sensor_lengths);
        }

        // prefix throughputs along each subpath
        let mut importance_weights: SpectrumVec = SmallVec::new();
        importance_weights.push(Spectrum::ONE);
        for i in 1..emitter_count {
            let v = emitter_path.vertex(pool, i - 1);
            let e = emitter_path.edge(pool, i - 1);
            importance_weights
                .push(importance_weights[i - 1] * v.weight[IMP] * v.rr_weight * e.weight[IMP]);
        }
        let mut radiance_weights: SpectrumVec = SmallVec::new();
        radiance_weights.push(Spectrum::ONE);
        for i in 1..sensor_count {
            let v = sensor_path.vertex(pool, i - 1);
            let e = sensor_path.edge(pool, i - 1);
            radiance_weights
                .push(radiance_weights[i - 1] * v.weight[RAD] * v.rr_weight * e.weight[RAD]);
        }

        let channels = config.channel_count();
        let spectral = config.is_spectral_accumulation();
        if !spectral {
            self.decomposition_scratch.clear();
            self.decomposition_scratch.resize(channels, 0.0);
            self.light_scratch.clear();
            self.light_scratch.resize(channels, 0.0);
            self.light_scratch[channels - 2] = 1.0;
            self.light_scratch[channels - 1] = 1.0;
        }
        let mut sample_value = Spectrum::ZERO;
        let mut committed_total = Spectrum::ZERO;

        for s in (1..emitter_count).rev() {
            let min_t = (2i32 - s as i32).max(if config.light_image { 1 } else { 2 }) as usize;
            let mut max_t = sensor_count - 1;
            if let Some(cap) = depth_cap {
                let limit = cap + 1 - s as i32;
                if limit < min_t as i32 {
                    continue;
                }
                max_t = max_t.min(limit as usize);
            }
            for t in (min_t..=max_t).rev() {
                if config.decomposition == DecompositionType::Transient && s == 1 && t == 1 {
                    continue;
                }
                // a laser's first bounce never reaches the transient light
                // image directly
                if is_emitter_laser
                    && config.decomposition == DecompositionType::Transient
                    && s == 2
                    && t == 1
                {
                    continue;
                }
                if config.force_bounces && (s != config.s_bounces || t != config.t_bounces) {
                    continue;
                }
                self.stats.connection_attempts += 1;
                let outcome = self.connect(
                    config,
                    result,
                    filter,
                    pool,
                    emitter_path,
                    sensor_path,
                    s,
                    t,
                    &emitter_lengths,
                    &sensor_lengths,
                    &importance_weights,
                    &radiance_weights,
                    path_length_target,
                    target_inv_pdf,
                    sampler,
                );
                if let Some(contribution) = outcome {
                    if t >= 2 {
                        if spectral {
                            sample_value += contribution;
                        }
                        committed_total += contribution;
                    }
                }
            }
        }

        if spectral {
            let [r, g, b] = sample_value.to_rgb();
            result
                .block
                .put_sample(initial_sample_pos, &[r, g, b, 1.0, 1.0], filter);
        } else {
            self.decomposition_scratch[channels - 2] = 1.0;
            self.decomposition_scratch[channels - 1] = 1.0;
            let scratch = std::mem::take(&mut self.decomposition_scratch);
            result.block.put_sample(initial_sample_pos, &scratch, filter);
            self.decomposition_scratch = scratch;
        }
        committed_total
    }

    /// Handle one (s, t) candidate. Returns the weighted contribution when it
    /// was committed to the pixel accumulator (t >= 2); light-image splats
    /// return None.
    #[allow(clippy::too_many_arguments)]
    fn connect(
        &mut self,
        config: &Configuration,
        result: &mut WorkResult,
        filter: &dyn ReconstructionFilter,
        pool: &PathPool,
        emitter_path: &Path,
        sensor_path: &Path,
        s: usize,
        t: usize,
        emitter_lengths: &[f32],
        sensor_lengths: &[f32],
        importance_weights: &[Spectrum],
        radiance_weights: &[Spectrum],
        path_length_target: f32,
        target_inv_pdf: f32,
        sampler: &mut dyn Sampler,
    ) -> Option<Spectrum> {
        let mut vs = *emitter_path.vertex(pool, s);
        let mut vt = *sensor_path.vertex(pool, t);
        let vs_pred_pos = (s >= 2).then(|| emitter_path.vertex(pool, s - 1).position());
        let vt_pred_pos = (t >= 2).then(|| sensor_path.vertex(pool, t - 1).position());

        let mut value;
        let mut splat_pos = None;
        let mut s_substituted = false;
        let mut t_substituted = false;
        let mut emitter_pick_pdf = 1.0;

        let direct = config.sample_direct && ((t == 1 && s > 1) || (s == 1 && t > 1));
        if direct && s == 1 {
            // replace the walk's emitter endpoint with a freshly
            // direct-sampled one
            if vt.is_degenerate() {
                return None;
            }
            let (emitter_id, pick_pdf) = self.scene.sample_emitter(sampler.next_1d());
            emitter_pick_pdf = pick_pdf;
            let ds = self
                .scene
                .emitter(emitter_id)
                .sample_direct(vt.position(), sampler.next_2d())?;
            if ds.distance < MIN_EDGE_LENGTH {
                return None;
            }
            value = radiance_weights[t] * ds.value / pick_pdf;
            if value.is_zero() {
                self.stats.zero_throughput += 1;
                return None;
            }
            vs = PathVertex {
                kind: VertexKind::EmitterSample {
                    emitter: emitter_id,
                    position: ds.position,
                    normal: ds.normal,
                },
                measure: ds.measure,
                degenerate: self.scene.emitter(emitter_id).is_degenerate(),
                rr_weight: 1.0,
                weight: [Spectrum::ONE; 2],
                pdf: [0.0; 2],
            };
            s_substituted = true;
            value *= vt.eval(self.scene, vt_pred_pos, vs.position(), TransportMode::Radiance);
        } else if direct && t == 1 {
            // replace the sensor endpoint with a direct sensor sample and
            // remember the splat position it reports
            if vs.is_degenerate() {
                return None;
            }
            let ds = self.scene.sensor().sample_direct(vs.position(), sampler.next_2d())?;
            if ds.distance < MIN_EDGE_LENGTH {
                return None;
            }
            value = importance_weights[s] * ds.value;
            if value.is_zero() {
                self.stats.zero_throughput += 1;
                return None;
            }
            vt = PathVertex {
                kind: VertexKind::SensorSample {
                    position: ds.position,
                    normal: ds.normal,
                    sample_pos: ds.uv,
                },
                measure: ds.measure,
                degenerate: self.scene.sensor().is_degenerate(),
                rr_weight: 1.0,
                weight: [Spectrum::ONE; 2],
                pdf: [0.0; 2],
            };
            t_substituted = true;
            splat_pos = Some(ds.uv);
            value *= vs.eval(self.scene, vs_pred_pos, vt.position(), TransportMode::Importance);
        } else {
            // both prefixes end in real, connectable vertices
            if vs.is_degenerate() || vt.is_degenerate() {
                return None;
            }
            value = importance_weights[s] * radiance_weights[t];
            if t == 1 {
                splat_pos = Some(vt.sample_position());
            }
        }

        let connection_dist = (vt.position() - vs.position()).length();
        if connection_dist < MIN_EDGE_LENGTH {
            return None;
        }
        let direct_length = match config.decomposition {
            DecompositionType::Steady => 0.0,
            DecompositionType::Bounce => emitter_lengths[s] + sensor_lengths[t] + 1.0,
            _ => emitter_lengths[s] + sensor_lengths[t] + connection_dist,
        };

        // the one decomposition decision point for this candidate
        let current = self.classify(config, direct_length, sampler);

        if let ActiveDecomposition::Elliptic { reweight } = current {
            if direct {
                error!("direct ellipsoidal connection requested at s={}, t={}", s, t);
                panic!(
                    "elliptic insertion on a direct-sampling strategy (s={}, t={}) is geometrically ill-defined",
                    s, t
                );
            }
            // when combining, a direct length past the lower bound means any
            // inserted vertex could only overshoot the bin
            if config.combine_bdpt_and_elliptic
                && emitter_lengths[s] + sensor_lengths[t] + connection_dist > config.min_bound
            {
                return None;
            }
            return self.connect_elliptic(
                config,
                result,
                filter,
                pool,
                emitter_path,
                sensor_path,
                s,
                t,
                emitter_lengths,
                sensor_lengths,
                value,
                reweight,
                path_length_target,
                target_inv_pdf,
                sampler,
            );
        }

        // classical connection: endpoint evaluations and the geometric term
        if !s_substituted && !t_substituted {
            value = value
                * vs.eval(self.scene, vs_pred_pos, vt.position(), TransportMode::Importance)
                * vt.eval(self.scene, vt_pred_pos, vs.position(), TransportMode::Radiance);
        }
        if value.is_zero() {
            self.stats.zero_throughput += 1;
            return None;
        }

        let direction = (vt.position() - vs.position()) / connection_dist;
        let cos_s = vs.normal().dot(direction).abs();
        let cos_t = vt.normal().dot(direction).abs();
        let g = geometric_term(vs.position(), cos_s, vt.position(), cos_t);
        if g == 0.0 {
            self.stats.zero_throughput += 1;
            return None;
        }
        if self.scene.occluded(vs.position(), vt.position()) {
            self.stats.occluded_connections += 1;
            return None;
        }
        value *= g;

        let mut mi_weight = self.mis_weight_connection(
            config,
            pool,
            emitter_path,
            sensor_path,
            s,
            t,
            &vs,
            &vt,
            s_substituted,
            t_substituted,
            emitter_pick_pdf,
        );
        if mi_weight == 0.0 {
            return None;
        }
        debug_assert!(value.is_finite(), "non-finite throughput at ({}, {})", s, t);

        // route to the output bin
        let modulated = config.path_length_sampler.modulation != ModulationType::None;
        let binned_reweight = match current {
            ActiveDecomposition::Steady => None,
            ActiveDecomposition::Transient { reweight } => {
                if modulated {
                    // collapsed to one frame; the correlation becomes part of
                    // the sample weight
                    mi_weight *= config.path_length_sampler.correlation(direct_length) * reweight;
                    None
                } else {
                    Some(reweight)
                }
            }
            ActiveDecomposition::Bounce => Some(1.0),
            ActiveDecomposition::Elliptic { .. } => unreachable!(),
        };
        if let Some(reweight) = binned_reweight {
            let contribution = value * mi_weight * reweight;
            let Some(bin) = config.bin_index(direct_length) else {
                self.stats.out_of_bin += 1;
                return None;
            };
            let [r, g, b] = contribution.to_rgb();
            if t >= 2 {
                self.decomposition_scratch[3 * bin] += r;
                self.decomposition_scratch[3 * bin + 1] += g;
                self.decomposition_scratch[3 * bin + 2] += b;
                return Some(contribution);
            }
            self.light_scratch[3 * bin] = r;
            self.light_scratch[3 * bin + 1] = g;
            self.light_scratch[3 * bin + 2] = b;
            let scratch = std::mem::take(&mut self.light_scratch);
            result.put_light_sample(splat_pos.unwrap(), &scratch, filter);
            self.light_scratch = scratch;
            self.light_scratch[3 * bin] = 0.0;
            self.light_scratch[3 * bin + 1] = 0.0;
            self.light_scratch[3 * bin + 2] = 0.0;
            return None;
        }

        // steady state, or modulated transient collapsed to one frame
        let contribution = value * mi_weight;
        if t >= 2 {
            Some(contribution)
        } else {
            let [r, g, b] = contribution.to_rgb();
            let channels = config.channel_count();
            let mut values = vec![0.0; channels];
            values[0] = r;
            values[1] = g;
            values[2] = b;
            values[channels - 2] = 1.0;
            values[channels - 1] = 1.0;
            result.put_light_sample(splat_pos.unwrap(), &values, filter);
            None
        }
    }

    /// Insert one vertex on the connection so the total path length hits the
    /// target, then weight and bin the decomposed contribution.
    #[allow(clippy::too_many_arguments)]
    fn connect_elliptic(
        &mut self,
        config: &Configuration,
        result: &mut WorkResult,
        filter: &dyn ReconstructionFilter,
        pool: &PathPool,
        emitter_path: &Path,
        sensor_path: &Path,
        s: usize,
        t: usize,
        emitter_lengths: &[f32],
        sensor_lengths: &[f32],
        prefix_value: Spectrum,
        reweight: f32,
        path_length_target: f32,
        target_inv_pdf: f32,
        sampler: &mut dyn Sampler,
    ) -> Option<Spectrum> {
        let vs = *emitter_path.vertex(pool, s);
        let vt = *sensor_path.vertex(pool, t);
        let vs_pred_pos = (s >= 2).then(|| emitter_path.vertex(pool, s - 1).position());
        let vt_pred_pos = (t >= 2).then(|| sensor_path.vertex(pool, t - 1).position());

        let residual = path_length_target - emitter_lengths[s] - sensor_lengths[t];
        if residual <= 0.0 {
            return None;
        }
        if prefix_value.is_zero() {
            self.stats.zero_throughput += 1;
            return None;
        }

        self.stats.elliptic_attempts += 1;
        let insertion = match self.ellipsoid.sample(
            self.scene,
            sampler.next_float(),
            vs.position(),
            vt.position(),
            residual,
        ) {
            Some(insertion) => insertion,
            None => {
                self.stats.elliptic_misses += 1;
                return None;
            }
        };

        if self.scene.occluded(vs.position(), insertion.position)
            || self.scene.occluded(insertion.position, vt.position())
        {
            self.stats.occluded_connections += 1;
            return None;
        }

        // scattering at the three coupled vertices
        let f_vs = vs.eval(self.scene, vs_pred_pos, insertion.position, TransportMode::Importance);
        let f_vt = vt.eval(self.scene, vt_pred_pos, insertion.position, TransportMode::Radiance);
        let insertion_vertex = insertion_path_vertex(self.scene, &insertion, vs.position());
        let f_c = insertion_vertex.eval(
            self.scene,
            Some(vs.position()),
            vt.position(),
            TransportMode::Importance,
        );
        if f_vs.is_zero() || f_vt.is_zero() || f_c.is_zero() {
            self.stats.zero_throughput += 1;
            return None;
        }

        let to_c_from_s = (insertion.position - vs.position()) / insertion.len1;
        let to_t_from_c = (vt.position() - insertion.position) / insertion.len2;
        let g1 = geometric_term(
            vs.position(),
            vs.normal().dot(to_c_from_s).abs(),
            insertion.position,
            insertion.normal.dot(to_c_from_s).abs(),
        );
        let g2 = geometric_term(
            insertion.position,
            insertion.normal.dot(to_t_from_c).abs(),
            vt.position(),
            vt.normal().dot(to_t_from_c).abs(),
        );
        if g1 == 0.0 || g2 == 0.0 {
            self.stats.zero_throughput += 1;
            return None;
        }

        let mi_weight = self.mis_weight_elliptic(
            config,
            pool,
            emitter_path,
            sensor_path,
            s,
            t,
            &insertion_vertex,
            insertion.primitive,
        );
        if mi_weight == 0.0 {
            return None;
        }

        let modulated = config.path_length_sampler.modulation != ModulationType::None;
        let path_length = emitter_lengths[s] + sensor_lengths[t] + insertion.len1 + insertion.len2;
        let correlation = if modulated {
            config.path_length_sampler.correlation(path_length)
        } else {
            1.0
        };
        let contribution = prefix_value
            * f_vs
            * f_c
            * f_vt
            * (g1 * g2 * insertion.inv_pdf * target_inv_pdf * correlation * reweight * mi_weight);
        debug_assert!(
            contribution.is_finite(),
            "non-finite elliptic contribution at ({}, {})",
            s,
            t
        );

        // with an intersectable sensor the t=1 connection is a light-image
        // splat, through the film position of the inserted vertex
        let splat_pos = if t == 1 {
            match self.scene.sensor().film_position(
                vt.position(),
                (insertion.position - vt.position()) / insertion.len2,
            ) {
                Some(uv) => Some(uv),
                None => return None,
            }
        } else {
            None
        };

        if modulated {
            // one collapsed frame
            if let Some(uv) = splat_pos {
                let [r, g, b] = contribution.to_rgb();
                let channels = config.channel_count();
                let mut values = vec![0.0; channels];
                values[0] = r;
                values[1] = g;
                values[2] = b;
                values[channels - 2] = 1.0;
                values[channels - 1] = 1.0;
                result.put_light_sample(uv, &values, filter);
                return None;
            }
            return Some(contribution);
        }

        let Some(bin) = config.bin_index(path_length) else {
            self.stats.out_of_bin += 1;
            return None;
        };
        let [r, g, b] = contribution.to_rgb();
        if let Some(uv) = splat_pos {
            self.light_scratch[3 * bin] = r;
            self.light_scratch[3 * bin + 1] = g;
            self.light_scratch[3 * bin + 2] = b;
            let scratch = std::mem::take(&mut self.light_scratch);
            result.put_light_sample(uv, &scratch, filter);
            self.light_scratch = scratch;
            self.light_scratch[3 * bin] = 0.0;
            self.light_scratch[3 * bin + 1] = 0.0;
            self.light_scratch[3 * bin + 2] = 0.0;
            return None;
        }
        self.decomposition_scratch[3 * bin] += r;
        self.decomposition_scratch[3 * bin + 1] += g;
        self.decomposition_scratch[3 * bin + 2] += b;
        Some(contribution)
    }

    /// The `TransientEllipse -> Transient` transition when combining is the
    /// only reclassification the state machine allows, and it happens here.
    fn classify(
        &self,
        config: &Configuration,
        direct_length: f32,
        sampler: &mut dyn Sampler,
    ) -> ActiveDecomposition {
        match config.decomposition {
            DecompositionType::Steady => ActiveDecomposition::Steady,
            DecompositionType::Bounce => ActiveDecomposition::Bounce,
            DecompositionType::Transient => ActiveDecomposition::Transient { reweight: 1.0 },
            DecompositionType::TransientEllipse => {
                if config.combine_bdpt_and_elliptic
                    && config.decomposition_bounds().contains(direct_length)
                {
                    match config.path_length_sampler.modulation {
                        ModulationType::None => ActiveDecomposition::Transient { reweight: 1.0 },
                        _ => {
                            let w = config
                                .path_length_sampler
                                .correlation(direct_length)
                                .clamp(0.0, 1.0);
                            if w >= 1.0 {
                                ActiveDecomposition::Transient { reweight: 1.0 }
                            } else if w <= 0.0 {
                                ActiveDecomposition::Elliptic { reweight: 1.0 }
                            } else if sampler.next_float() < w {
                                ActiveDecomposition::Transient { reweight: 1.0 / w }
                            } else {
                                ActiveDecomposition::Elliptic {
                                    reweight: 1.0 / (1.0 - w),
                                }
                            }
                        }
                    }
                } else {
                    ActiveDecomposition::Elliptic { reweight: 1.0 }
                }
            }
        }
    }

    /// Balance-heuristic weight for a classical (s, t) connection, computed
    /// on the effective path view (substituted endpoints included).
    #[allow(clippy::too_many_arguments)]
    fn mis_weight_connection(
        &self,
        config: &Configuration,
        pool: &PathPool,
        emitter_path: &Path,
        sensor_path: &Path,
        s: usize,
        t: usize,
        vs: &PathVertex,
        vt: &PathVertex,
        s_substituted: bool,
        t_substituted: bool,
        emitter_pick_pdf: f32,
    ) -> f32 {
        let n = s + t;
        let scene = self.scene;

        // composite real vertices in emitter-to-sensor order
        let vertex_at = |i: usize| -> PathVertex {
            if i <= s {
                if i == s && s_substituted {
                    *vs
                } else {
                    *emitter_path.vertex(pool, i)
                }
            } else {
                let sensor_index = n + 1 - i;
                if i == s + 1 && t_substituted {
                    *vt
                } else {
                    *sensor_path.vertex(pool, sensor_index)
                }
            }
        };

        let mut view: MisVertices = SmallVec::new();
        for i in 1..=n {
            let vertex = vertex_at(i);
            let mut entry = MisVertex {
                p_fwd: vertex.pdf[IMP],
                p_bwd: vertex.pdf[RAD],
                connectable: vertex.is_connectable(),
                p_direct: 0.0,
            };
            if i == 1 {
                if let VertexKind::EmitterSample { emitter, position, normal } = vertex.kind {
                    let e = scene.emitter(emitter);
                    let pick = if s_substituted {
                        emitter_pick_pdf
                    } else {
                        scene.emitter_pick_pdf(emitter)
                    };
                    if s_substituted {
                        entry.p_fwd = pick * e.pdf_position(position);
                    }
                    if n >= 2 {
                        let reference = vertex_at(2).position();
                        entry.p_direct = pick * e.pdf_direct(reference, position, normal);
                    }
                }
            }
            if i == n {
                if let VertexKind::SensorSample { position, normal, .. } = vertex.kind {
                    if t_substituted {
                        entry.p_bwd = scene.sensor().pdf_position(position);
                    }
                    let reference = vertex_at(n - 1).position();
                    entry.p_direct = scene.sensor().pdf_direct(reference, position, normal);
                }
            }
            view.push(entry);
        }

        // the four pdfs the junction invalidates
        let vs_pred_pos = (s >= 2).then(|| vertex_at(s - 1).position());
        let vt_pred_pos = (t >= 2).then(|| vertex_at(s + 2).position());
        {
            let target = vertex_at(s + 1);
            view[s].p_fwd = vs.pdf_toward(scene, vs_pred_pos, target.position(), Some(target.normal()));
        }
        if t >= 2 {
            let target = vertex_at(s + 2);
            view[s + 1].p_fwd =
                vt.pdf_toward(scene, Some(vs.position()), target.position(), Some(target.normal()));
        }
        {
            let target = vertex_at(s);
            view[s - 1].p_bwd = vt.pdf_toward(scene, vt_pred_pos, target.position(), Some(target.normal()));
        }
        if s >= 2 {
            let target = vertex_at(s - 1);
            view[s - 2].p_bwd =
                vs.pdf_toward(scene, Some(vt.position()), target.position(), Some(target.normal()));
        }

        balance_weight(&view, s, config.sample_direct, config.light_image)
    }

    /// Balance weight of the elliptic insertion at the (s, t) junction over
    /// every other junction that could have inserted the same vertex of the
    /// same constrained-length path.
    #[allow(clippy::too_many_arguments)]
    fn mis_weight_elliptic(
        &mut self,
        config: &Configuration,
        pool: &PathPool,
        emitter_path: &Path,
        sensor_path: &Path,
        s: usize,
        t: usize,
        insertion_vertex: &PathVertex,
        insertion_primitive: usize,
    ) -> f32 {
        let n = s + t + 1; // real vertices including the insertion
        let scene = self.scene;
        let mut composite: SmallVec<[PathVertex; 2 * crate::path::MAX_INLINE_PATH]> =
            SmallVec::new();
        for i in 1..=s {
            composite.push(*emitter_path.vertex(pool, i));
        }
        composite.push(*insertion_vertex);
        for i in (1..=t).rev() {
            composite.push(*sensor_path.vertex(pool, i));
        }
        debug_assert_eq!(composite.len(), n);

        // per-vertex generation pdfs in both walk directions; endpoint
        // position pdfs are common to every strategy and cancel
        let position = |i: usize| composite[i - 1].position();
        let normal = |i: usize| composite[i - 1].normal();
        let mut p_fwd = vec![1.0f64; n + 1];
        let mut p_bwd = vec![1.0f64; n + 1];
        for i in 2..=n {
            // a degenerate vertex steps with probability one, not a density
            p_fwd[i] = if composite[i - 2].is_degenerate() {
                1.0
            } else {
                composite[i - 2].pdf_toward(
                    scene,
                    (i >= 3).then(|| position(i - 2)),
                    position(i),
                    Some(normal(i)),
                ) as f64
            };
        }
        for i in (1..n).rev() {
            p_bwd[i] = if composite[i].is_degenerate() {
                1.0
            } else {
                composite[i].pdf_toward(
                    scene,
                    (i + 2 <= n).then(|| position(i + 2)),
                    position(i),
                    Some(normal(i)),
                ) as f64
            };
        }

        let mut prefix = vec![1.0f64; n + 1];
        for i in 2..=n {
            prefix[i] = prefix[i - 1] * p_fwd[i];
        }
        let mut suffix = vec![1.0f64; n + 2];
        for i in (1..n).rev() {
            suffix[i] = suffix[i + 1] * p_bwd[i];
        }

        let actual = s + 1;
        let mut total = 0.0f64;
        let mut actual_density = 0.0f64;
        for m in 2..n {
            let vertex = &composite[m - 1];
            if !vertex.is_surface() || vertex.is_degenerate() {
                continue;
            }
            if !composite[m - 2].is_connectable() || !composite[m].is_connectable() {
                continue;
            }
            let left = position(m - 1);
            let right = position(m + 1);
            let residual =
                (position(m) - left).length() + (position(m) - right).length();
            let primitive = if m == actual {
                insertion_primitive
            } else {
                match vertex.surface_primitive() {
                    Some(primitive) => primitive,
                    None => continue,
                }
            };
            let p_curve =
                self.ellipsoid.pdf(scene, left, right, residual, position(m), primitive) as f64;
            if p_curve <= 0.0 {
                continue;
            }
            let density = prefix[m - 1] * p_curve * suffix[m + 1];
            total += density;
            if m == actual {
                actual_density = density;
            }
        }
        if actual_density <= 0.0 || total <= 0.0 {
            // the committed strategy must be able to account for itself
            return if total <= 0.0 { 1.0 } else { 0.0 };
        }
        (actual_density / total) as f32
    }
}

/// Wrap an elliptic insertion as a path vertex so the shared eval/pdf
/// machinery applies to it.
fn insertion_path_vertex(scene: &dyn Scene, insertion: &Insertion, toward: Vec3A) -> PathVertex {
    let si = SurfaceInteraction {
        position: insertion.position,
        normal: insertion.normal,
        distance: 0.0,
        bsdf: scene.primitive_bsdf(insertion.primitive),
        primitive: insertion.primitive,
        emitter: None,
    };
    PathVertex {
        kind: VertexKind::Surface {
            si,
            frame: TangentFrame::from_normal(insertion.normal),
            wi_world: (toward - insertion.position).normalize(),
        },
        measure: Measure::Area,
        degenerate: scene.bsdf(si.bsdf).is_degenerate(),
        rr_weight: 1.0,
        weight: [Spectrum::ONE; 2],
        pdf: [0.0; 2],
    }
}
