// Minimal PRNG.
//
// This is NOT cryptographically secure.
// It only seeds weights and biases, and re-draws them on reset.

#[derive(Debug, Clone)]
pub struct Prng {
    state: u64,
}

impl Prng {
    pub fn new(seed: u64) -> Self {
        // Avoid a zero state.
        let seed = if seed == 0 { 0x9E3779B97F4A7C15 } else { seed };
        Self { state: seed }
    }

    pub fn state(&self) -> u64 {
        self.state
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    /// Uniform sample in the open interval (0, 1).
    #[inline]
    pub fn next_f64_open(&mut self) -> f64 {
        // 52 bits, shifted by half a step so neither end is reachable.
        let bits = self.next_u64() >> 12;
        (bits as f64 + 0.5) / (1u64 << 52) as f64
    }

    /// Uniform sample in the open interval (-half_width, half_width).
    #[inline]
    pub fn symmetric(&mut self, half_width: f64) -> f64 {
        half_width * (2.0 * self.next_f64_open() - 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = Prng::new(7);
        let mut b = Prng::new(7);
        for _ in 0..32 {
            assert_eq!(a.symmetric(0.1).to_bits(), b.symmetric(0.1).to_bits());
        }
    }

    #[test]
    fn symmetric_stays_inside_open_range() {
        let mut rng = Prng::new(0);
        for _ in 0..10_000 {
            let x = rng.symmetric(0.1);
            assert!(x > -0.1 && x < 0.1, "{x} escaped (-0.1, 0.1)");
        }
    }
}
