use crate::config::{ConfigError, Configuration};
use crate::filter::ReconstructionFilter;
use crate::math::Spectrum;
use crate::profile::Stats;
use glam::Vec2;

/// Rectangular pixel region handed to a worker.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WorkUnit {
    pub offset: (u32, u32),
    pub size: (u32, u32),
}

/// Border-padded channel storage for one work unit (or the full frame, for
/// the light image).
///
/// Layout per pixel: `frames * (R, G, B)` followed by `weight, alpha`
/// (steady/modulated renders have one frame). Samples are splatted with the
/// reconstruction filter; `develop` style consumers divide by the weight
/// channel.
#[derive(Clone)]
pub struct ImageBlock {
    pub offset: (u32, u32),
    pub size: (u32, u32),
    pub border: u32,
    pub channels: usize,
    data: Vec<f32>,
}

impl ImageBlock {
    pub fn new(offset: (u32, u32), size: (u32, u32), channels: usize, border: u32) -> Self {
        let padded = ((size.0 + 2 * border) as usize) * ((size.1 + 2 * border) as usize);
        ImageBlock {
            offset,
            size,
            border,
            channels,
            data: vec![0.0; padded * channels],
        }
    }

    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    fn padded_width(&self) -> usize {
        (self.size.0 + 2 * self.border) as usize
    }

    fn padded_height(&self) -> usize {
        (self.size.1 + 2 * self.border) as usize
    }

    /// Channel slice at padded coordinates (interior pixel (0,0) sits at
    /// padded (border, border)).
    pub fn pixel(&self, x: usize, y: usize) -> &[f32] {
        let base = (y * self.padded_width() + x) * self.channels;
        &self.data[base..base + self.channels]
    }

    pub fn pixel_mut(&mut self, x: usize, y: usize) -> &mut [f32] {
        let width = self.padded_width();
        let base = (y * width + x) * self.channels;
        &mut self.data[base..base + self.channels]
    }

    /// Splat `values` (all channels, including trailing weight/alpha) at a
    /// continuous position in crop coordinates.
    pub fn put_sample(&mut self, pos: Vec2, values: &[f32], filter: &dyn ReconstructionFilter) {
        debug_assert_eq!(values.len(), self.channels);
        debug_assert!(values.iter().all(|v| v.is_finite()), "NaN splat at {:?}", pos);

        // position relative to the block interior, in pixel centers
        let px = pos.x - self.offset.0 as f32 - 0.5;
        let py = pos.y - self.offset.1 as f32 - 0.5;
        let radius = filter.radius();
        let min_x = (px - radius).ceil() as i64;
        let max_x = (px + radius).floor() as i64;
        let min_y = (py - radius).ceil() as i64;
        let max_y = (py + radius).floor() as i64;

        let border = self.border as i64;
        for y in min_y..=max_y {
            if y + border < 0 || y + border >= self.padded_height() as i64 {
                continue;
            }
            for x in min_x..=max_x {
                if x + border < 0 || x + border >= self.padded_width() as i64 {
                    continue;
                }
                let weight = filter.eval(x as f32 - px, y as f32 - py);
                if weight == 0.0 {
                    continue;
                }
                let pixel = self.pixel_mut((x + border) as usize, (y + border) as usize);
                for (dst, src) in pixel.iter_mut().zip(values.iter()) {
                    *dst += weight * src;
                }
            }
        }
    }

    /// Accumulate another block, folding its border into the pixels this
    /// block covers; contributions that fall outside are dropped.
    pub fn put_block(&mut self, other: &ImageBlock) {
        assert_eq!(self.channels, other.channels, "channel layout mismatch");
        for y in 0..other.padded_height() {
            for x in 0..other.padded_width() {
                let crop_x = other.offset.0 as i64 + x as i64 - other.border as i64;
                let crop_y = other.offset.1 as i64 + y as i64 - other.border as i64;
                let local_x = crop_x - self.offset.0 as i64 + self.border as i64;
                let local_y = crop_y - self.offset.1 as i64 + self.border as i64;
                if local_x < 0
                    || local_y < 0
                    || local_x >= self.padded_width() as i64
                    || local_y >= self.padded_height() as i64
                {
                    continue;
                }
                let src = other.pixel(x, y);
                let dst = self.pixel_mut(local_x as usize, local_y as usize);
                for (d, s) in dst.iter_mut().zip(src.iter()) {
                    *d += s;
                }
            }
        }
    }

    /// Mean RGB of the first frame over the interior, weight-normalized.
    /// Used by the adaptive pretraining pass.
    pub fn average(&self) -> Spectrum {
        let mut sum = Spectrum::ZERO;
        let mut count = 0usize;
        for y in 0..self.size.1 as usize {
            for x in 0..self.size.0 as usize {
                let pixel = self.pixel(x + self.border as usize, y + self.border as usize);
                let weight = pixel[self.channels - 2];
                if weight > 0.0 {
                    sum += Spectrum::new(pixel[0], pixel[1], pixel[2]) / weight;
                }
                count += 1;
            }
        }
        if count == 0 {
            Spectrum::ZERO
        } else {
            sum / count as f32
        }
    }
}

/// Everything a worker returns for one finished work unit.
pub struct WorkResult {
    pub block: ImageBlock,
    /// Full-frame buffer for t=1 splats; present only when the light image
    /// is enabled.
    pub light_image: Option<ImageBlock>,
    pub stats: Stats,
}

impl WorkResult {
    pub fn new(config: &Configuration, unit: WorkUnit, crop_size: (u32, u32), border: u32) -> Self {
        let channels = config.channel_count();
        WorkResult {
            block: ImageBlock::new(unit.offset, unit.size, channels, border),
            light_image: config
                .light_image
                .then(|| ImageBlock::new((0, 0), crop_size, channels, border)),
            stats: Stats::default(),
        }
    }

    pub fn clear(&mut self) {
        self.block.clear();
        if let Some(light) = &mut self.light_image {
            light.clear();
        }
        self.stats = Stats::default();
    }

    pub fn put_light_sample(&mut self, pos: Vec2, values: &[f32], filter: &dyn ReconstructionFilter) {
        if let Some(light) = &mut self.light_image {
            light.put_sample(pos, values, filter);
        }
    }
}

/// The coordinator-owned accumulation target. Worker blocks are merged in
/// under the caller's lock; the light image is blended in at develop time
/// with weight `1 / sample_count`.
pub struct Film {
    pub resolution: (u32, u32),
    pub crop_offset: (u32, u32),
    pub crop_size: (u32, u32),
    pub frames: usize,
    accum: ImageBlock,
    light_accum: Option<ImageBlock>,
    sample_count: usize,
}

impl Film {
    pub fn new(
        resolution: (u32, u32),
        crop_offset: (u32, u32),
        crop_size: (u32, u32),
        config: &Configuration,
        border: u32,
    ) -> Result<Self, ConfigError> {
        if crop_size.0 == 0
            || crop_size.1 == 0
            || crop_offset.0 + crop_size.0 > resolution.0
            || crop_offset.1 + crop_size.1 > resolution.1
        {
            return Err(ConfigError::InvalidCropWindow {
                offset: crop_offset,
                size: crop_size,
                resolution,
            });
        }
        let channels = config.channel_count();
        Ok(Film {
            resolution,
            crop_offset,
            crop_size,
            frames: config.frames,
            accum: ImageBlock::new((0, 0), crop_size, channels, 0),
            light_accum: config
                .light_image
                .then(|| ImageBlock::new((0, 0), crop_size, channels, border)),
            sample_count: config.sample_count,
        })
    }

    pub fn put(&mut self, result: &WorkResult) {
        self.accum.put_block(&result.block);
        if let (Some(accum), Some(light)) = (&mut self.light_accum, &result.light_image) {
            accum.put_block(light);
        }
    }

    /// Weight-normalized value of one pixel and time bin, including the
    /// light-image contribution.
    pub fn develop_pixel(&self, x: u32, y: u32, frame: usize) -> Spectrum {
        debug_assert!(frame < self.frames);
        let pixel = self.accum.pixel(x as usize, y as usize);
        let weight = pixel[self.accum.channels - 2];
        let mut value = Spectrum::new(
            pixel[3 * frame],
            pixel[3 * frame + 1],
            pixel[3 * frame + 2],
        );
        if weight > 0.0 {
            value /= weight;
        }
        if let Some(light) = &self.light_accum {
            let b = light.border as usize;
            let pixel = light.pixel(x as usize + b, y as usize + b);
            value += Spectrum::new(
                pixel[3 * frame],
                pixel[3 * frame + 1],
                pixel[3 * frame + 2],
            ) / self.sample_count as f32;
        }
        value
    }

    /// Mean luminance over all pixels of one bin.
    pub fn mean_luminance(&self, frame: usize) -> f32 {
        let mut sum = 0.0;
        for y in 0..self.crop_size.1 {
            for x in 0..self.crop_size.0 {
                sum += self.develop_pixel(x, y, frame).luminance();
            }
        }
        sum / (self.crop_size.0 * self.crop_size.1) as f32
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::filter::{BoxFilter, FilterConfig};

    fn block_config(frames: usize) -> Configuration {
        let mut config = Configuration {
            decomposition: if frames > 1 {
                crate::config::DecompositionType::Transient
            } else {
                crate::config::DecompositionType::Steady
            },
            min_bound: 0.0,
            max_bound: frames as f32,
            bin_width: 1.0,
            filter: FilterConfig::Box,
            light_image: false,
            ..Default::default()
        };
        config.finalize();
        config
    }

    #[test]
    fn test_box_splat_lands_in_one_pixel() {
        let mut block = ImageBlock::new((0, 0), (4, 4), 5, 0);
        block.put_sample(Vec2::new(2.5, 1.5), &[1.0, 2.0, 3.0, 1.0, 1.0], &BoxFilter);
        let pixel = block.pixel(2, 1);
        assert_eq!(pixel, &[1.0, 2.0, 3.0, 1.0, 1.0]);
        assert_eq!(block.pixel(2, 2), &[0.0; 5]);
    }

    #[test]
    fn test_put_block_respects_offsets() {
        let config = block_config(1);
        let mut film = Film::new((8, 8), (0, 0), (8, 8), &config, 0).unwrap();
        let unit = WorkUnit {
            offset: (4, 2),
            size: (2, 2),
        };
        let mut result = WorkResult::new(&config, unit, (8, 8), 0);
        result
            .block
            .put_sample(Vec2::new(5.5, 3.5), &[4.0, 0.0, 0.0, 1.0, 1.0], &BoxFilter);
        film.put(&result);
        assert_eq!(film.develop_pixel(5, 3, 0), Spectrum::new(4.0, 0.0, 0.0));
        assert_eq!(film.develop_pixel(4, 2, 0), Spectrum::ZERO);
    }

    #[test]
    fn test_develop_normalizes_by_weight() {
        let config = block_config(1);
        let mut film = Film::new((2, 2), (0, 0), (2, 2), &config, 0).unwrap();
        let unit = WorkUnit {
            offset: (0, 0),
            size: (2, 2),
        };
        let mut result = WorkResult::new(&config, unit, (2, 2), 0);
        // two samples of equal value; the developed pixel must equal the
        // sample value, not the sum
        for _ in 0..2 {
            result
                .block
                .put_sample(Vec2::new(0.5, 0.5), &[3.0, 3.0, 3.0, 1.0, 1.0], &BoxFilter);
        }
        film.put(&result);
        let value = film.develop_pixel(0, 0, 0);
        assert!((value.0.x - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_crop_window_validation() {
        let config = block_config(1);
        assert!(Film::new((8, 8), (4, 4), (8, 4), &config, 0).is_err());
        assert!(Film::new((8, 8), (0, 0), (0, 4), &config, 0).is_err());
        assert!(Film::new((8, 8), (2, 2), (6, 6), &config, 0).is_ok());
    }

    #[test]
    fn test_transient_layout() {
        let config = block_config(4);
        assert_eq!(config.channel_count(), 14);
        let mut block = ImageBlock::new((0, 0), (1, 1), 14, 0);
        let mut values = vec![0.0; 14];
        values[3 * 2] = 7.0; // bin 2, red
        values[12] = 1.0;
        values[13] = 1.0;
        block.put_sample(Vec2::new(0.5, 0.5), &values, &BoxFilter);
        let pixel = block.pixel(0, 0);
        assert_eq!(pixel[6], 7.0);
        assert_eq!(pixel[12], 1.0);
    }
}
