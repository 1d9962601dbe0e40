use crate::math::Bounds1D;
use crate::sampler::Sampler;
use serde::{Deserialize, Serialize};

/// Correlation waveform applied to path lengths. `None` disables modulation
/// and the target length is drawn uniformly.
#[derive(Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum ModulationType {
    #[default]
    None,
    Sine,
    Square,
}

/// Chooses the target total length for each sample, and evaluates the
/// modulation correlation used when mixing classical and elliptic transport.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
pub struct PathLengthSampler {
    pub modulation: ModulationType,
    /// Modulation wavelength in world units.
    pub wavelength: f32,
    /// Phase offset in [0, 1) periods.
    pub phase: f32,
}

impl Default for PathLengthSampler {
    fn default() -> Self {
        PathLengthSampler {
            modulation: ModulationType::None,
            wavelength: 1.0,
            phase: 0.0,
        }
    }
}

impl PathLengthSampler {
    /// Normalized correlation w(l) in [0, 1].
    pub fn correlation(&self, length: f32) -> f32 {
        let t = (length / self.wavelength + self.phase).fract();
        match self.modulation {
            ModulationType::None => 1.0,
            ModulationType::Sine => 0.5 * (1.0 + (std::f32::consts::TAU * t).cos()),
            // cross-correlation of two square waves is a triangle wave
            ModulationType::Square => (2.0 * t - 1.0).abs(),
        }
    }

    /// Draw a target length in `bounds`, proportional to the correlation when
    /// modulation is active.
    pub fn sample_target(&self, bounds: Bounds1D, sampler: &mut dyn Sampler) -> f32 {
        match self.modulation {
            ModulationType::None => bounds.sample(sampler.next_float()),
            _ => {
                // the correlation is bounded by one, so plain rejection works
                for _ in 0..64 {
                    let candidate = bounds.sample(sampler.next_float());
                    if sampler.next_float() < self.correlation(candidate) {
                        return candidate;
                    }
                }
                bounds.sample(sampler.next_float())
            }
        }
    }
}
