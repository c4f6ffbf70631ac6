use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Brown (Brownian / red) noise: integrated white noise, power falling 6 dB per
/// octave. Deep and rumbling.
pub struct BrownNoise {
    last_value: f32,
    rng: StdRng,
}

impl BrownNoise {
    pub fn new() -> Self {
        Self {
            last_value: 0.0,
            rng: StdRng::from_entropy(),
        }
    }
}

impl Iterator for BrownNoise {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        let white: f32 = self.rng.gen_range(-1.0..1.0);

        // Small random steps, clamped so the walk cannot drift off.
        self.last_value = (self.last_value + white * 0.02).clamp(-1.0, 1.0);
        // Leak towards zero to keep DC offset from building up.
        self.last_value *= 0.9999;

        Some(self.last_value * 0.3)
    }
}
