use crate::config::{ConfigError, Configuration, DecompositionType};
use crate::film::{Film, WorkResult, WorkUnit};
use crate::filter::ReconstructionFilter;
use crate::integrator::Evaluator;
use crate::math::HilbertCurve;
use crate::path::{alternating_random_walk, Path, PathPool, MAX_INLINE_PATH};
use crate::profile::Stats;
use crate::sampler::{IndependentSampler, Sampler};
use crate::scene::{EndpointKind, Scene};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEVELOP_INTERVAL: Duration = Duration::from_secs(2);
const PRETRAIN_SAMPLES: usize = 1000;

pub struct RenderOptions<'a> {
    pub seed: u64,
    pub threads: Option<usize>,
    /// Polled at every sample boundary; a set flag discards in-flight tiles.
    pub stop: Option<&'a AtomicBool>,
    /// Installed by interactive frontends; invoked at most every two seconds
    /// after a tile lands, with the film lock held.
    pub on_develop: Option<&'a (dyn Fn(&Film) + Sync)>,
}

impl Default for RenderOptions<'_> {
    fn default() -> Self {
        RenderOptions {
            seed: 0,
            threads: None,
            stop: None,
            on_develop: None,
        }
    }
}

/// Render the scene into the film: square tiles, Hilbert traversal within a
/// tile, one pool/sampler/ellipsoid per worker, reduction under the film
/// mutex.
pub fn render(
    scene: &dyn Scene,
    config: &Configuration,
    film: &mut Film,
    options: RenderOptions,
) -> Result<Stats, ConfigError> {
    config.validate()?;

    // a projective emitter cannot coexist with the light image: its direct
    // strategies have no film-plane footprint
    for i in 0..scene.emitter_count() {
        if config.light_image && scene.emitter(i).kind() == EndpointKind::Projective {
            error!("projective emitter {} while the light image is enabled", i);
            panic!("set light_image to false to render with projective emitters");
        }
    }

    let filter = config.filter.build();
    let crop_size = film.crop_size;
    let units = generate_work_units(crop_size, config.block_size);
    info!(
        "rendering {}x{} crop in {} work units of {} px",
        crop_size.0,
        crop_size.1,
        units.len(),
        config.block_size
    );

    let default_stop = AtomicBool::new(false);
    let stop = options.stop.unwrap_or(&default_stop);
    let film_lock = Mutex::new(film);
    let stats_lock = Mutex::new(Stats::default());
    let refresh = Mutex::new(Instant::now());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.threads.unwrap_or_else(num_cpus::get))
        .build()
        .expect("worker pool construction failed");

    let start = Instant::now();
    pool.install(|| {
        units.par_iter().for_each(|unit| {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            let result = process_unit(
                scene,
                config,
                filter.as_ref(),
                *unit,
                crop_size,
                options.seed,
                stop,
            );
            if stop.load(Ordering::Relaxed) {
                // partial tiles are discarded, not merged
                return;
            }
            let mut film = film_lock.lock().unwrap();
            film.put(&result);
            {
                let mut stats = stats_lock.lock().unwrap();
                *stats = stats.combine(result.stats);
            }
            if let Some(develop) = options.on_develop {
                if config.light_image {
                    let mut last = refresh.lock().unwrap();
                    if last.elapsed() >= DEVELOP_INTERVAL {
                        develop(&**film);
                        *last = Instant::now();
                    }
                }
            }
        });
    });

    let stats = *stats_lock.lock().unwrap();
    stats.pretty_print(start.elapsed().as_secs_f32());
    Ok(stats)
}

fn generate_work_units(crop_size: (u32, u32), block_size: u32) -> Vec<WorkUnit> {
    let mut units = Vec::new();
    let mut y = 0;
    while y < crop_size.1 {
        let height = block_size.min(crop_size.1 - y);
        let mut x = 0;
        while x < crop_size.0 {
            let width = block_size.min(crop_size.0 - x);
            units.push(WorkUnit {
                offset: (x, y),
                size: (width, height),
            });
            x += width;
        }
        y += height;
    }
    units
}

struct Worker<'a> {
    scene: &'a dyn Scene,
    config: &'a Configuration,
    filter: &'a dyn ReconstructionFilter,
    evaluator: Evaluator<'a>,
    pool: PathPool,
    sampler: IndependentSampler,
    emitter_cap: usize,
    sensor_cap: usize,
}

impl<'a> Worker<'a> {
    fn new(scene: &'a dyn Scene, config: &'a Configuration, filter: &'a dyn ReconstructionFilter, seed: u64) -> Self {
        // one edge of the budget goes to the elliptic insertion vertex
        let mut max_depth = config.max_depth;
        if config.decomposition == DecompositionType::TransientEllipse && max_depth > 0 {
            max_depth -= 1;
        }
        let base_depth = if max_depth < 0 {
            MAX_INLINE_PATH - 2
        } else {
            max_depth as usize
        };
        let mut emitter_depth = base_depth;
        let mut sensor_depth = base_depth;
        if !scene.has_degenerate_sensor() {
            emitter_depth += 1;
        }
        if !scene.has_degenerate_emitters() {
            sensor_depth += 1;
        }
        Worker {
            scene,
            config,
            filter,
            evaluator: Evaluator::new(scene, config),
            pool: PathPool::with_capacity(base_depth + 2),
            sampler: IndependentSampler::new(seed, config.sample_count),
            emitter_cap: emitter_depth + 1,
            sensor_cap: sensor_depth + 1,
        }
    }

    /// Trace one pixel sample and commit its contributions. Returns the
    /// pixel-accumulated spectrum for variance tracking.
    fn one_sample(
        &mut self,
        config: &Configuration,
        result: &mut WorkResult,
        pixel: (u32, u32),
        target_and_inv_pdf: (f32, f32),
    ) -> crate::math::Spectrum {
        let sensor = self.scene.sensor();
        if sensor.needs_time_sample() {
            let _ = sensor.sample_time(self.sampler.next_float());
        }
        let mut emitter_path = Path::new_emitter(&mut self.pool);
        let mut sensor_path = Path::new_sensor(&mut self.pool);
        alternating_random_walk(
            self.scene,
            &mut self.sampler,
            &mut self.pool,
            &mut emitter_path,
            self.emitter_cap,
            &mut sensor_path,
            self.sensor_cap,
            pixel,
            self.config.rr_depth,
            &mut self.evaluator.stats,
        );
        let value = self.evaluator.evaluate(
            config,
            result,
            self.filter,
            &self.pool,
            &emitter_path,
            &sensor_path,
            target_and_inv_pdf.0,
            target_and_inv_pdf.1,
            &mut self.sampler,
        );
        emitter_path.release(&mut self.pool);
        sensor_path.release(&mut self.pool);
        assert!(self.pool.unused(), "path pool leaked at pixel {:?}", pixel);
        self.sampler.advance();
        value
    }

    fn sample_target(&mut self, config: &Configuration, sample_index: usize) -> (f32, f32) {
        if config.decomposition != DecompositionType::TransientEllipse {
            return (0.0, 1.0);
        }
        if config.is_ld_sampling {
            // one sample per bin per full cycle of frames
            let bin = (sample_index % config.frames) as f32;
            let target = config.min_bound
                + config.bin_width * bin
                + config.bin_width * self.sampler.next_float();
            (target, config.bin_width)
        } else {
            let target = config
                .path_length_sampler
                .sample_target(config.decomposition_bounds(), &mut self.sampler);
            (target, self.evaluator.target_inv_pdf(config, target))
        }
    }
}

fn process_unit(
    scene: &dyn Scene,
    config: &Configuration,
    filter: &dyn ReconstructionFilter,
    unit: WorkUnit,
    crop_size: (u32, u32),
    seed: u64,
    stop: &AtomicBool,
) -> WorkResult {
    let border = filter.border_size();
    let mut result = WorkResult::new(config, unit, crop_size, border);
    result.clear();

    let mut hilbert = HilbertCurve::default();
    hilbert.initialize(unit.size);
    let mut worker = Worker::new(scene, config, filter, seed);

    if !config.is_adaptive {
        for i in 0..hilbert.point_count() {
            let (px, py) = hilbert.point(i);
            let pixel = (unit.offset.0 + px as u32, unit.offset.1 + py as u32);
            worker.sampler.generate(pixel);
            for j in 0..config.sample_count {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let target = worker.sample_target(config, j);
                worker.one_sample(config, &mut result, pixel, target);
            }
        }
    } else {
        process_unit_adaptive(config, unit, crop_size, &hilbert, &mut worker, &mut result, stop);
    }

    result.stats = worker.evaluator.stats;
    result
}

/// Variance-driven per-pixel sample loop with neighborhood snapshot/restore,
/// preceded by a pretraining pass that estimates the tile's luminance scale.
fn process_unit_adaptive(
    config: &Configuration,
    unit: WorkUnit,
    crop_size: (u32, u32),
    hilbert: &HilbertCurve,
    worker: &mut Worker,
    result: &mut WorkResult,
    stop: &AtomicBool,
) {
    // collapse all bins into one for the luminance estimate
    let mut fake_config = config.clone();
    fake_config.bin_width = fake_config.max_bound - fake_config.min_bound;
    fake_config.frames = 1;
    fake_config.is_adaptive = false;
    let border = worker.filter.border_size();
    let mut fake_result = WorkResult::new(&fake_config, unit, crop_size, border);
    fake_result.clear();

    let total_points = hilbert.point_count();
    for _ in 0..PRETRAIN_SAMPLES {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let index =
            ((worker.sampler.next_float() * total_points as f32) as usize).min(total_points - 1);
        let (px, py) = hilbert.point(index);
        let pixel = (unit.offset.0 + px as u32, unit.offset.1 + py as u32);
        worker.sampler.generate(pixel);
        let target = worker.sample_target(&fake_config, 0);
        worker.one_sample(&fake_config, &mut fake_result, pixel, target);
    }
    // the collapsed block holds the total over all bins; scale it back to a
    // single bin's expected luminance
    let average_luminance = fake_result.block.average().luminance() / config.frames as f32;

    let samples_per_bin = config.sample_count / config.frames;
    let footprint = (2 * border + 1) as usize;
    let mut snapshot = vec![0.0f32; 3 * footprint * footprint];

    for i in 0..hilbert.point_count() {
        let (px, py) = hilbert.point(i);
        let pixel = (unit.offset.0 + px as u32, unit.offset.1 + py as u32);
        worker.sampler.generate(pixel);

        for bin in 0..config.frames {
            // snapshot the bin's channels over the filter footprint so the
            // restore can keep neighbor contributions at the nominal budget
            for (patch, (x, y)) in footprint_pixels(px as usize, py as usize, footprint).enumerate()
            {
                let src = result.block.pixel(x, y);
                snapshot[3 * patch..3 * patch + 3].copy_from_slice(&src[3 * bin..3 * bin + 3]);
            }

            let mut mean = 0.0f32;
            let mut m2 = 0.0f32;
            let mut count = 0usize;
            loop {
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                let target = worker.sample_target(config, bin);
                let value = worker.one_sample(config, result, pixel, target);
                let luminance = value.luminance();
                count += 1;
                let delta = luminance - mean;
                mean += delta / count as f32;
                m2 += delta * (luminance - mean);

                if config.adap_max_sample_factor >= 0
                    && count >= config.adap_max_sample_factor as usize * samples_per_bin
                {
                    break;
                }
                if count >= samples_per_bin {
                    let variance = m2 / (count - 1) as f32;
                    let std_error = (variance / count as f32).sqrt();
                    let ci_width = std_error * config.adap_quantile;
                    let base = mean.max(0.01 * average_luminance);
                    if ci_width <= config.adap_max_error * base {
                        break;
                    }
                }
            }

            // blend back so neighbors see a contribution proportional to the
            // nominal budget rather than the inflated one
            let factor = samples_per_bin as f32 / count as f32;
            for (patch, (x, y)) in footprint_pixels(px as usize, py as usize, footprint).enumerate()
            {
                let dst = result.block.pixel_mut(x, y);
                for c in 0..3 {
                    let old = snapshot[3 * patch + c];
                    dst[3 * bin + c] = old * (1.0 - factor) + dst[3 * bin + c] * factor;
                }
            }
        }
    }
}

/// Padded-coordinate pixels of the reconstruction footprint around an
/// interior pixel.
fn footprint_pixels(
    px: usize,
    py: usize,
    footprint: usize,
) -> impl Iterator<Item = (usize, usize)> {
    (0..footprint).flat_map(move |y| (0..footprint).map(move |x| (px + x, py + y)))
}
