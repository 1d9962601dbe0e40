mod hilbert;

pub use hilbert::HilbertCurve;

use glam::Vec3A;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Sub};

/// Three-channel radiance/importance value.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct Spectrum(pub Vec3A);

impl Spectrum {
    pub const ZERO: Spectrum = Spectrum(Vec3A::ZERO);
    pub const ONE: Spectrum = Spectrum(Vec3A::ONE);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Spectrum(Vec3A::new(r, g, b))
    }

    pub fn splat(v: f32) -> Self {
        Spectrum(Vec3A::splat(v))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == Vec3A::ZERO
    }

    pub fn is_finite(&self) -> bool {
        self.0.is_finite()
    }

    pub fn max_element(&self) -> f32 {
        self.0.max_element()
    }

    /// ITU-R 709 luminance.
    pub fn luminance(&self) -> f32 {
        self.0.dot(Vec3A::new(0.212671, 0.715160, 0.072169))
    }

    pub fn to_rgb(&self) -> [f32; 3] {
        [self.0.x, self.0.y, self.0.z]
    }
}

impl Add for Spectrum {
    type Output = Spectrum;
    fn add(self, other: Spectrum) -> Spectrum {
        Spectrum(self.0 + other.0)
    }
}

impl AddAssign for Spectrum {
    fn add_assign(&mut self, other: Spectrum) {
        self.0 += other.0;
    }
}

impl Sub for Spectrum {
    type Output = Spectrum;
    fn sub(self, other: Spectrum) -> Spectrum {
        Spectrum(self.0 - other.0)
    }
}

impl Mul for Spectrum {
    type Output = Spectrum;
    fn mul(self, other: Spectrum) -> Spectrum {
        Spectrum(self.0 * other.0)
    }
}

impl MulAssign for Spectrum {
    fn mul_assign(&mut self, other: Spectrum) {
        self.0 *= other.0;
    }
}

impl Mul<f32> for Spectrum {
    type Output = Spectrum;
    fn mul(self, other: f32) -> Spectrum {
        Spectrum(self.0 * other)
    }
}

impl Mul<Spectrum> for f32 {
    type Output = Spectrum;
    fn mul(self, other: Spectrum) -> Spectrum {
        Spectrum(other.0 * self)
    }
}

impl MulAssign<f32> for Spectrum {
    fn mul_assign(&mut self, other: f32) {
        self.0 *= other;
    }
}

impl Div<f32> for Spectrum {
    type Output = Spectrum;
    fn div(self, other: f32) -> Spectrum {
        Spectrum(self.0 / other)
    }
}

impl DivAssign<f32> for Spectrum {
    fn div_assign(&mut self, other: f32) {
        self.0 /= other;
    }
}

/// Closed interval on the real line.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Bounds1D {
    pub lower: f32,
    pub upper: f32,
}

impl Bounds1D {
    pub const fn new(lower: f32, upper: f32) -> Self {
        Bounds1D { lower, upper }
    }

    pub fn span(&self) -> f32 {
        self.upper - self.lower
    }

    pub fn contains(&self, value: f32) -> bool {
        value >= self.lower && value <= self.upper
    }

    pub fn sample(&self, u: f32) -> f32 {
        self.lower + u * self.span()
    }
}

/// Orthonormal basis around a normal.
#[derive(Copy, Clone, Debug)]
pub struct TangentFrame {
    pub tangent: Vec3A,
    pub bitangent: Vec3A,
    pub normal: Vec3A,
}

impl TangentFrame {
    /// Branchless construction from Duff et al.
    pub fn from_normal(normal: Vec3A) -> Self {
        let sign = 1.0f32.copysign(normal.z);
        let a = -1.0 / (sign + normal.z);
        let b = normal.x * normal.y * a;
        TangentFrame {
            tangent: Vec3A::new(1.0 + sign * normal.x * normal.x * a, sign * b, -sign * normal.x),
            bitangent: Vec3A::new(b, sign + normal.y * normal.y * a, -normal.y),
            normal,
        }
    }

    #[inline(always)]
    pub fn to_world(&self, v: Vec3A) -> Vec3A {
        self.tangent * v.x + self.bitangent * v.y + self.normal * v.z
    }

    #[inline(always)]
    pub fn to_local(&self, v: Vec3A) -> Vec3A {
        Vec3A::new(self.tangent.dot(v), self.bitangent.dot(v), self.normal.dot(v))
    }

    /// Cosine of the angle between `v` (world space) and the normal.
    #[inline(always)]
    pub fn cos_theta(&self, v: Vec3A) -> f32 {
        self.normal.dot(v)
    }
}

pub fn square_to_cosine_hemisphere(u: (f32, f32)) -> Vec3A {
    let r = u.0.sqrt();
    let phi = std::f32::consts::TAU * u.1;
    let (sin_phi, cos_phi) = phi.sin_cos();
    let z = (1.0 - u.0).max(0.0).sqrt();
    Vec3A::new(r * cos_phi, r * sin_phi, z)
}

pub fn square_to_uniform_sphere(u: (f32, f32)) -> Vec3A {
    let z = 1.0 - 2.0 * u.0;
    let r = (1.0 - z * z).max(0.0).sqrt();
    let phi = std::f32::consts::TAU * u.1;
    let (sin_phi, cos_phi) = phi.sin_cos();
    Vec3A::new(r * cos_phi, r * sin_phi, z)
}

pub fn cosine_hemisphere_pdf(cos_theta: f32) -> f32 {
    cos_theta.max(0.0) * std::f32::consts::FRAC_1_PI
}

/// Geometric coupling term between two surface points, teacher-style:
/// |cos_i * cos_o| / r^2.
pub fn geometric_term(p0: Vec3A, cos_0: f32, p1: Vec3A, cos_1: f32) -> f32 {
    (cos_0 * cos_1).abs() / (p1 - p0).length_squared()
}

/// Quantile (inverse CDF) of the standard normal distribution, after
/// Acklam's rational approximation. Max relative error ~1.15e-9, which is
/// plenty for a confidence-interval width.
pub fn normal_quantile(p: f64) -> f64 {
    assert!(p > 0.0 && p < 1.0, "quantile argument {} out of (0, 1)", p);

    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -normal_quantile(1.0 - p)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tangent_frame_round_trip() {
        let n = Vec3A::new(0.3, -0.5, 0.9).normalize();
        let frame = TangentFrame::from_normal(n);
        let v = Vec3A::new(0.1, 0.7, -0.2);
        let back = frame.to_local(frame.to_world(v));
        assert!((back - v).length() < 1e-5, "{:?} != {:?}", back, v);
        assert!(frame.tangent.dot(frame.bitangent).abs() < 1e-5);
        assert!(frame.tangent.dot(frame.normal).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_hemisphere_mean() {
        // E[z] under cosine-weighted sampling is 2/3.
        let mut sum = 0.0;
        let n = 4096;
        for i in 0..n {
            let u = ((i as f32 + 0.5) / n as f32, ((i * 7919) % n) as f32 / n as f32);
            sum += square_to_cosine_hemisphere(u).z;
        }
        let mean = sum / n as f32;
        assert!((mean - 2.0 / 3.0).abs() < 0.02, "mean z {}", mean);
    }

    #[test]
    fn test_normal_quantile() {
        // Known two-sided quantiles.
        assert!((normal_quantile(0.975) - 1.959964).abs() < 1e-4);
        assert!((normal_quantile(0.995) - 2.575829).abs() < 1e-4);
        assert!((normal_quantile(0.5)).abs() < 1e-9);
        assert!((normal_quantile(0.025) + 1.959964).abs() < 1e-4);
    }

    #[test]
    fn test_spectrum_luminance() {
        let white = Spectrum::ONE;
        assert!((white.luminance() - 1.0).abs() < 1e-5);
        assert!(Spectrum::ZERO.is_zero());
        assert!(!white.is_zero());
    }
}
