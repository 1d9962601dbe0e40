use serde::{Deserialize, Serialize};

/// Image reconstruction filter interface. Implementations are radially
/// separable and evaluated at signed pixel offsets from the sample position.
pub trait ReconstructionFilter: Send + Sync {
    fn radius(&self) -> f32;
    fn eval(&self, x: f32, y: f32) -> f32;

    /// Pixels of padding an image block needs on each side.
    fn border_size(&self) -> u32 {
        (self.radius() - 0.5).ceil().max(0.0) as u32
    }
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum FilterConfig {
    Box,
    Gaussian { stddev: f32 },
}

impl Default for FilterConfig {
    fn default() -> Self {
        // matches the original default when no filter is specified
        FilterConfig::Gaussian { stddev: 0.5 }
    }
}

impl FilterConfig {
    pub fn build(&self) -> Box<dyn ReconstructionFilter> {
        match *self {
            FilterConfig::Box => Box::new(BoxFilter),
            FilterConfig::Gaussian { stddev } => Box::new(GaussianFilter::new(stddev)),
        }
    }
}

pub struct BoxFilter;

impl ReconstructionFilter for BoxFilter {
    fn radius(&self) -> f32 {
        0.5
    }

    fn eval(&self, x: f32, y: f32) -> f32 {
        if x.abs() <= 0.5 && y.abs() <= 0.5 {
            1.0
        } else {
            0.0
        }
    }
}

/// Truncated gaussian, offset so it falls to zero at the truncation radius.
pub struct GaussianFilter {
    alpha: f32,
    radius: f32,
    offset: f32,
}

impl GaussianFilter {
    pub fn new(stddev: f32) -> Self {
        let radius = 4.0 * stddev;
        let alpha = 0.5 / (stddev * stddev);
        GaussianFilter {
            alpha,
            radius,
            offset: (-alpha * radius * radius).exp(),
        }
    }

    fn eval_1d(&self, x: f32) -> f32 {
        ((-self.alpha * x * x).exp() - self.offset).max(0.0)
    }
}

impl ReconstructionFilter for GaussianFilter {
    fn radius(&self) -> f32 {
        self.radius
    }

    fn eval(&self, x: f32, y: f32) -> f32 {
        self.eval_1d(x) * self.eval_1d(y)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_box_filter_footprint() {
        let f = BoxFilter;
        assert_eq!(f.border_size(), 0);
        assert_eq!(f.eval(0.2, -0.3), 1.0);
        assert_eq!(f.eval(0.7, 0.0), 0.0);
    }

    #[test]
    fn test_gaussian_vanishes_at_radius() {
        let f = GaussianFilter::new(0.5);
        assert!(f.border_size() >= 1);
        assert!(f.eval(0.0, 0.0) > 0.0);
        assert!(f.eval(f.radius(), 0.0).abs() < 1e-6);
        assert!(f.eval(0.3, 0.3) < f.eval(0.0, 0.0));
    }
}
