use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

#[derive(Copy, Clone, Debug)]
pub struct Sample1D {
    pub x: f32,
}

impl Sample1D {
    pub const fn new(x: f32) -> Self {
        Sample1D { x }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Sample2D {
    pub x: f32,
    pub y: f32,
}

impl Sample2D {
    pub const fn new(x: f32, y: f32) -> Self {
        Sample2D { x, y }
    }
}

/// Per-worker random sample source.
///
/// `generate` rebinds the stream to a pixel so that a render with the same
/// seed reproduces bit-identical pixel values regardless of tile order;
/// `advance` moves to the next sample within the pixel.
pub trait Sampler: Send {
    fn next_1d(&mut self) -> Sample1D;
    fn next_2d(&mut self) -> Sample2D;
    fn next_float(&mut self) -> f32 {
        self.next_1d().x
    }
    fn generate(&mut self, pixel: (u32, u32));
    fn advance(&mut self);
    fn sample_count(&self) -> usize;
    fn clone_with_seed(&self, seed: u64) -> Box<dyn Sampler>;
}

pub struct IndependentSampler {
    seed: u64,
    sample_count: usize,
    sample_index: usize,
    rng: SmallRng,
}

impl IndependentSampler {
    pub fn new(seed: u64, sample_count: usize) -> Self {
        IndependentSampler {
            seed,
            sample_count,
            sample_index: 0,
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

// splitmix64-style pixel decorrelation
fn mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

impl Sampler for IndependentSampler {
    fn next_1d(&mut self) -> Sample1D {
        Sample1D::new(self.rng.gen::<f32>())
    }

    fn next_2d(&mut self) -> Sample2D {
        Sample2D::new(self.rng.gen::<f32>(), self.rng.gen::<f32>())
    }

    fn generate(&mut self, pixel: (u32, u32)) {
        let key = ((pixel.0 as u64) << 32) | pixel.1 as u64;
        self.rng = SmallRng::seed_from_u64(mix(self.seed ^ mix(key)));
        self.sample_index = 0;
    }

    fn advance(&mut self) {
        self.sample_index += 1;
    }

    fn sample_count(&self) -> usize {
        self.sample_count
    }

    fn clone_with_seed(&self, seed: u64) -> Box<dyn Sampler> {
        Box::new(IndependentSampler::new(seed, self.sample_count))
    }
}
