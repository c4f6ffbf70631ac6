use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Pink noise via Paul Kellet's economy filter: equal power per octave.
pub struct PinkNoise {
    b0: f32,
    b1: f32,
    b2: f32,
    rng: StdRng,
}

impl PinkNoise {
    pub fn new() -> Self {
        Self {
            b0: 0.0,
            b1: 0.0,
            b2: 0.0,
            rng: StdRng::from_entropy(),
        }
    }
}

impl Iterator for PinkNoise {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        let white: f32 = self.rng.gen_range(-1.0..1.0);
        self.b0 = 0.99765 * self.b0 + white * 0.0990460;
        self.b1 = 0.96300 * self.b1 + white * 0.2965164;
        self.b2 = 0.57000 * self.b2 + white * 1.0526913;
        let pink = self.b0 + self.b1 + self.b2 + white * 0.1848;
        Some((pink * 0.05).clamp(-1.0, 1.0))
    }
}
