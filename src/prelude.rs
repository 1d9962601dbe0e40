pub use glam::{Vec2, Vec3A};

pub use crate::config::{Configuration, DecompositionType};
pub use crate::math::{Bounds1D, Spectrum, TangentFrame};
pub use crate::sampler::{Sample1D, Sample2D, Sampler};
pub use crate::scene::{Measure, Ray, Scene};
pub use crate::{TransportMode, MIN_EDGE_LENGTH, NORMAL_OFFSET};

pub use std::f32::consts::{FRAC_1_PI, PI, TAU};
pub use std::f32::{EPSILON, INFINITY};
