#[macro_use]
extern crate log;

pub mod config;
pub mod film;
pub mod filter;
pub mod integrator;
pub mod math;
pub mod path;
pub mod pathlength;
pub mod prelude;
pub mod profile;
pub mod renderer;
pub mod sampler;
pub mod scene;

#[cfg(test)]
pub(crate) mod testutil;

/// Offset applied along the surface normal when spawning rays, to avoid
/// self-intersection.
pub const NORMAL_OFFSET: f32 = 1e-4;

/// Minimum edge length for a connection to be considered geometrically valid.
pub const MIN_EDGE_LENGTH: f32 = 1e-5;

/// Direction in which a quantity is transported along a path.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TransportMode {
    /// Importance flows from the emitter towards the sensor.
    Importance = 0,
    /// Radiance flows from the sensor towards the emitter.
    Radiance = 1,
}

impl TransportMode {
    pub fn reverse(self) -> Self {
        match self {
            TransportMode::Importance => TransportMode::Radiance,
            TransportMode::Radiance => TransportMode::Importance,
        }
    }
}

impl Default for TransportMode {
    fn default() -> Self {
        TransportMode::Importance
    }
}

#[cfg(test)]
pub fn log_test_setup() {
    use simplelog::{ColorChoice, LevelFilter, TermLogger, TerminalMode};

    let _ = TermLogger::init(
        LevelFilter::Debug,
        simplelog::Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
}
