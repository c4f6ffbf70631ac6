pub mod brown;
pub mod pink;
pub mod rain;
pub mod white;

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use brown::BrownNoise;
use pink::PinkNoise;
use rain::Rain;
use white::WhiteNoise;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NoiseKind {
    #[serde(alias = "white", alias = "WhiteNoise")]
    WhiteNoise,
    #[serde(alias = "pink", alias = "PinkNoise")]
    PinkNoise,
    #[serde(alias = "brown", alias = "BrownNoise")]
    BrownNoise,
    #[serde(alias = "Rain")]
    Rain,
}

impl NoiseKind {
    pub const ALL: [NoiseKind; 4] = [
        NoiseKind::WhiteNoise,
        NoiseKind::PinkNoise,
        NoiseKind::BrownNoise,
        NoiseKind::Rain,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            NoiseKind::WhiteNoise => "white_noise",
            NoiseKind::PinkNoise => "pink_noise",
            NoiseKind::BrownNoise => "brown_noise",
            NoiseKind::Rain => "rain",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            NoiseKind::WhiteNoise => "White noise",
            NoiseKind::PinkNoise => "Pink noise",
            NoiseKind::BrownNoise => "Brown noise",
            NoiseKind::Rain => "Rain",
        }
    }

    /// `sox synth` generator name.
    pub fn sox_generator(self) -> &'static str {
        match self {
            NoiseKind::WhiteNoise => "whitenoise",
            NoiseKind::PinkNoise | NoiseKind::Rain => "pinknoise",
            NoiseKind::BrownNoise => "brownnoise",
        }
    }

    /// `sox` effects shaping the raw generator into this profile.
    pub fn filter_spec(self) -> &'static [&'static str] {
        match self {
            NoiseKind::WhiteNoise => &["lowpass", "9000"],
            NoiseKind::PinkNoise => &[],
            NoiseKind::BrownNoise => &["lowpass", "600"],
            NoiseKind::Rain => &[
                "highpass", "400", "lowpass", "5000", "tremolo", "0.3", "30",
            ],
        }
    }

    /// In-process sample source for the built-in renderer. Mono, roughly `[-1, 1]`.
    pub fn generator(self, sample_rate: u32) -> Box<dyn Iterator<Item = f32> + Send> {
        match self {
            NoiseKind::WhiteNoise => Box::new(WhiteNoise::new()),
            NoiseKind::PinkNoise => Box::new(PinkNoise::new()),
            NoiseKind::BrownNoise => Box::new(BrownNoise::new()),
            NoiseKind::Rain => Box::new(Rain::new(sample_rate)),
        }
    }
}

impl fmt::Display for NoiseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for NoiseKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "white" | "white_noise" | "whitenoise" => Ok(NoiseKind::WhiteNoise),
            "pink" | "pink_noise" | "pinknoise" => Ok(NoiseKind::PinkNoise),
            "brown" | "brown_noise" | "brownnoise" => Ok(NoiseKind::BrownNoise),
            "rain" => Ok(NoiseKind::Rain),
            _ => Err(anyhow::anyhow!("unknown noise kind '{value}'")),
        }
    }
}
