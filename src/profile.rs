/// Per-worker counters for the runtime-skip outcomes of §connection work.
/// Skips are expected and silent; these exist so a render log can show where
/// the samples went.
#[derive(Copy, Clone, Default, Debug)]
pub struct Stats {
    pub connection_attempts: usize,
    pub zero_throughput: usize,
    pub occluded_connections: usize,
    pub out_of_bin: usize,
    pub rr_terminations: usize,
    pub elliptic_attempts: usize,
    pub elliptic_misses: usize,
    pub pixel_samples: usize,
}

impl Stats {
    pub fn combine(&self, other: Self) -> Self {
        Stats {
            connection_attempts: self.connection_attempts + other.connection_attempts,
            zero_throughput: self.zero_throughput + other.zero_throughput,
            occluded_connections: self.occluded_connections + other.occluded_connections,
            out_of_bin: self.out_of_bin + other.out_of_bin,
            rr_terminations: self.rr_terminations + other.rr_terminations,
            elliptic_attempts: self.elliptic_attempts + other.elliptic_attempts,
            elliptic_misses: self.elliptic_misses + other.elliptic_misses,
            pixel_samples: self.pixel_samples + other.pixel_samples,
        }
    }

    pub fn pretty_print(&self, elapsed: f32) {
        info!(
            "{} pixel samples at {:.0} per second",
            self.pixel_samples,
            self.pixel_samples as f32 / elapsed.max(1e-6)
        );
        info!(
            "{} connection attempts: {} zero-throughput, {} occluded, {} out of bin",
            self.connection_attempts,
            self.zero_throughput,
            self.occluded_connections,
            self.out_of_bin
        );
        info!("{} walks ended by Russian roulette", self.rr_terminations);
        if self.elliptic_attempts > 0 {
            info!(
                "{} elliptic connections attempted, {} missed the constraint",
                self.elliptic_attempts, self.elliptic_misses
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_combine_adds_fields() {
        let a = Stats {
            connection_attempts: 3,
            zero_throughput: 1,
            ..Default::default()
        };
        let b = Stats {
            connection_attempts: 4,
            occluded_connections: 2,
            ..Default::default()
        };
        let c = a.combine(b);
        assert_eq!(c.connection_attempts, 7);
        assert_eq!(c.zero_throughput, 1);
        assert_eq!(c.occluded_connections, 2);
    }
}
