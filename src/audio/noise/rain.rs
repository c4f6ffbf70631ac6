use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;

/// Rain: brown noise through a resonant band-pass, with a slow swell so the
/// texture does not sound static.
pub struct Rain {
    sample_rate: u32,
    last_brown: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
    rng: StdRng,
    swell_phase: f32,
}

impl Rain {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            last_brown: 0.0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
            rng: StdRng::from_entropy(),
            swell_phase: 0.0,
        }
    }

    fn brown_step(&mut self) -> f32 {
        let white: f32 = self.rng.gen_range(-1.0..1.0);
        self.last_brown = (self.last_brown + white * 0.02).clamp(-1.0, 1.0);
        self.last_brown *= 0.9999;
        self.last_brown
    }

    fn band_pass(&mut self, input: f32) -> f32 {
        // Second-order section, roughly centred on the 2-4 kHz hiss band.
        const B0: f32 = 0.1;
        const B2: f32 = -0.1;
        const A1: f32 = -1.8;
        const A2: f32 = 0.85;

        let output = B0 * input + B2 * self.x2 - A1 * self.y1 - A2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }
}

impl Iterator for Rain {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        let brown = self.brown_step();
        let filtered = self.band_pass(brown);

        self.swell_phase += 0.3 / self.sample_rate as f32;
        if self.swell_phase > TAU {
            self.swell_phase -= TAU;
        }
        let swell = 0.7 + 0.3 * self.swell_phase.sin();

        let mix = filtered * 0.8 + brown * 0.2;
        Some((mix * swell * 0.4).clamp(-1.0, 1.0))
    }
}
