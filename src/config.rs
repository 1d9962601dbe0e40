use crate::filter::FilterConfig;
use crate::math::{normal_quantile, Bounds1D};
use crate::pathlength::{ModulationType, PathLengthSampler};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("sample count {0} must be an integral multiple of the frame count {1} when low-discrepancy or adaptive sampling is enabled")]
    SampleCountNotMultiple(usize, usize),
    #[error("combining BDPT and elliptic sampling is only supported with the transientEllipse decomposition")]
    CombineRequiresEllipse,
    #[error("low-discrepancy and adaptive sampling cannot both be enabled")]
    LdAndAdaptiveExclusive,
    #[error("low-discrepancy/adaptive sampling requires the transientEllipse decomposition and no modulation")]
    LdAdaptiveRequiresEllipse,
    #[error("crop window offset {offset:?} size {size:?} does not fit a film of resolution {resolution:?}")]
    InvalidCropWindow {
        offset: (u32, u32),
        size: (u32, u32),
        resolution: (u32, u32),
    },
    #[error("unknown decomposition {0:?}: expected \"none\", \"transient\", \"bounce\" or \"transientEllipse\"")]
    UnknownDecomposition(String),
}

/// Partitioning of the estimator by a path attribute.
#[derive(Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum DecompositionType {
    #[default]
    Steady,
    Transient,
    Bounce,
    TransientEllipse,
}

impl FromStr for DecompositionType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(DecompositionType::Steady),
            "transient" => Ok(DecompositionType::Transient),
            "bounce" => Ok(DecompositionType::Bounce),
            "transientellipse" => Ok(DecompositionType::TransientEllipse),
            _ => Err(ConfigError::UnknownDecomposition(s.to_string())),
        }
    }
}

/// Constant-across-a-render configuration; the flat record is what travels to
/// distributed workers, so every derived field is part of it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Configuration {
    /// Maximum number of path edges; -1 leaves paths unbounded.
    pub max_depth: i32,
    /// First vertex index at which Russian roulette may terminate a walk.
    pub rr_depth: usize,
    pub block_size: u32,
    pub sample_count: usize,
    /// Enable the direct-sampling strategies at s=1 / t=1.
    pub sample_direct: bool,
    /// Enable splatting of t=1 paths into the light image.
    pub light_image: bool,
    pub show_weighted: bool,
    pub decomposition: DecompositionType,
    pub combine_bdpt_and_elliptic: bool,
    pub min_bound: f32,
    pub max_bound: f32,
    pub bin_width: f32,
    pub is_ld_sampling: bool,
    pub is_adaptive: bool,
    pub adap_max_error: f32,
    pub adap_p_value: f32,
    /// Standard-normal quantile for the confidence interval; derived from
    /// `adap_p_value` by `finalize`.
    pub adap_quantile: f32,
    pub adap_max_sample_factor: i32,
    /// Number of time bins; derived by `finalize`.
    pub frames: usize,
    pub sub_samples: usize,
    pub force_bounces: bool,
    pub s_bounces: usize,
    pub t_bounces: usize,
    pub path_length_sampler: PathLengthSampler,
    pub filter: FilterConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            max_depth: 5,
            rr_depth: 5,
            block_size: 32,
            sample_count: 64,
            sample_direct: true,
            light_image: true,
            show_weighted: false,
            decomposition: DecompositionType::Steady,
            combine_bdpt_and_elliptic: false,
            min_bound: 0.0,
            max_bound: 0.0,
            bin_width: 1.0,
            is_ld_sampling: false,
            is_adaptive: false,
            adap_max_error: 0.05,
            adap_p_value: 0.05,
            adap_quantile: 0.0,
            adap_max_sample_factor: 8,
            frames: 1,
            sub_samples: 1,
            force_bounces: false,
            s_bounces: 0,
            t_bounces: 0,
            path_length_sampler: PathLengthSampler::default(),
            filter: FilterConfig::default(),
        }
    }
}

impl Configuration {
    /// Compute the derived fields. Must run before `validate`.
    pub fn finalize(&mut self) {
        self.frames = if self.is_spectral_accumulation() {
            1
        } else {
            ((self.max_bound - self.min_bound) / self.bin_width).ceil().max(1.0) as usize
        };
        self.adap_quantile =
            normal_quantile(1.0 - 0.5 * self.adap_p_value as f64) as f32;
    }

    /// True when samples accumulate into a single spectrum instead of the
    /// per-bin decomposition buffer.
    pub fn is_spectral_accumulation(&self) -> bool {
        match self.decomposition {
            DecompositionType::Steady => true,
            DecompositionType::Transient | DecompositionType::TransientEllipse => {
                self.path_length_sampler.modulation != ModulationType::None
            }
            DecompositionType::Bounce => false,
        }
    }

    pub fn decomposition_bounds(&self) -> Bounds1D {
        Bounds1D::new(self.min_bound, self.max_bound)
    }

    /// Per-pixel channel count of the image blocks.
    pub fn channel_count(&self) -> usize {
        3 * self.frames + 2
    }

    /// Bin index for a committed path length, when it lies in range.
    pub fn bin_index(&self, path_length: f32) -> Option<usize> {
        if path_length < self.min_bound || path_length > self.max_bound {
            return None;
        }
        let index = ((path_length - self.min_bound) / self.bin_width).floor() as isize;
        if index >= 0 && (index as usize) < self.frames {
            Some(index as usize)
        } else {
            None
        }
    }

    /// The configuration errors of the validation rules are fatal: the render
    /// never starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if (self.is_ld_sampling || self.is_adaptive) && self.sample_count % self.frames != 0 {
            return Err(ConfigError::SampleCountNotMultiple(
                self.sample_count,
                self.frames,
            ));
        }
        if self.combine_bdpt_and_elliptic
            && self.decomposition != DecompositionType::TransientEllipse
        {
            return Err(ConfigError::CombineRequiresEllipse);
        }
        if self.is_ld_sampling && self.is_adaptive {
            return Err(ConfigError::LdAndAdaptiveExclusive);
        }
        if (self.is_ld_sampling || self.is_adaptive)
            && (self.decomposition != DecompositionType::TransientEllipse
                || self.path_length_sampler.modulation != ModulationType::None)
        {
            return Err(ConfigError::LdAdaptiveRequiresEllipse);
        }
        Ok(())
    }

    pub fn to_toml(&self) -> String {
        toml::to_string(self).expect("configuration serialization cannot fail")
    }

    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}
