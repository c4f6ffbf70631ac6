use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct WhiteNoise {
    rng: StdRng,
}

impl WhiteNoise {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Iterator for WhiteNoise {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        let sample: f32 = self.rng.gen_range(-1.0..1.0);
        Some(sample * 0.2)
    }
}
