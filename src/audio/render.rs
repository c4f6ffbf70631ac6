//! Built-in noise renderer. The controller treats this exactly like an external
//! renderer: it runs as `focustide render ...` in its own process and writes a
//! 16-bit WAV file.

use anyhow::{Context, Result};
use std::{f32::consts::FRAC_PI_2, path::PathBuf};

use super::NoiseKind;

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_CHANNELS: u16 = 2;

/// Everything a renderer needs to produce one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderJob {
    pub kind: NoiseKind,
    pub duration_secs: u32,
    pub fade_in_secs: u32,
    pub fade_out_secs: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub output: PathBuf,
}

impl RenderJob {
    pub fn total_frames(&self) -> u64 {
        u64::from(self.sample_rate) * u64::from(self.duration_secs)
    }

    /// Smallest plausible size of a rendered file for this job.
    pub fn min_expected_bytes(&self, min_bytes_per_second: u64) -> u64 {
        min_bytes_per_second * u64::from(self.duration_secs)
    }
}

/// Quarter-sine fade-in/fade-out gain curve over a fixed number of frames.
#[derive(Debug, Clone, Copy)]
pub struct Envelope {
    total: u64,
    fade_in: u64,
    fade_out: u64,
}

impl Envelope {
    pub fn new(total: u64, fade_in: u64, fade_out: u64) -> Self {
        // Overlapping fades would never reach full gain; shrink them to fit.
        let (fade_in, fade_out) = if fade_in + fade_out > total {
            (total / 2, total - total / 2)
        } else {
            (fade_in, fade_out)
        };
        Self {
            total,
            fade_in,
            fade_out,
        }
    }

    pub fn gain(&self, frame: u64) -> f32 {
        let rising = if self.fade_in > 0 && frame < self.fade_in {
            quarter_sine(frame as f32 / self.fade_in as f32)
        } else {
            1.0
        };
        let left = self.total.saturating_sub(frame);
        let falling = if self.fade_out > 0 && left < self.fade_out {
            quarter_sine(left as f32 / self.fade_out as f32)
        } else {
            1.0
        };
        rising.min(falling)
    }
}

fn quarter_sine(x: f32) -> f32 {
    (x.clamp(0.0, 1.0) * FRAC_PI_2).sin()
}

/// Synthesises `job` into `job.output`.
pub fn render_to_file(job: &RenderJob) -> Result<()> {
    let spec = hound::WavSpec {
        channels: job.channels.max(1),
        sample_rate: job.sample_rate.max(1),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&job.output, spec)
        .with_context(|| format!("failed to create {}", job.output.display()))?;

    let total = job.total_frames();
    let rate = u64::from(spec.sample_rate);
    let envelope = Envelope::new(
        total,
        u64::from(job.fade_in_secs) * rate,
        u64::from(job.fade_out_secs) * rate,
    );
    let mut source = job.kind.generator(spec.sample_rate);

    for frame in 0..total {
        let sample = source.next().unwrap_or(0.0) * envelope.gain(frame);
        let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        for _ in 0..spec.channels {
            writer
                .write_sample(value)
                .context("failed to write sample")?;
        }
    }

    writer
        .finalize()
        .with_context(|| format!("failed to finalize {}", job.output.display()))
}
