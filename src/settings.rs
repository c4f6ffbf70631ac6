use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::{
    audio::render::{DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE},
    playlist::NoiseKind,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimerSettings {
    pub work_minutes: u32,
    pub short_break_minutes: u32,
    pub long_break_minutes: u32,
    /// Every Nth completed work phase is followed by a long break.
    pub long_break_every: u32,
    pub min_minutes: u32,
    pub max_minutes: u32,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            work_minutes: 25,
            short_break_minutes: 5,
            long_break_minutes: 15,
            long_break_every: 4,
            min_minutes: 5,
            max_minutes: 60,
        }
    }
}

impl TimerSettings {
    /// Returns a copy with every phase length forced into `[min_minutes, max_minutes]`.
    pub fn clamped(&self) -> Self {
        let min = self.min_minutes.max(1);
        let max = self.max_minutes.max(min);
        Self {
            work_minutes: self.work_minutes.clamp(min, max),
            short_break_minutes: self.short_break_minutes.clamp(min, max),
            long_break_minutes: self.long_break_minutes.clamp(min, max),
            long_break_every: self.long_break_every.max(1),
            min_minutes: min,
            max_minutes: max,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    /// `sox -n ... synth`
    Sox,
    /// This executable's `render` subcommand.
    Builtin,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SoundscapeMode {
    /// Segment plans from the advisory service (or the default plan).
    Playlist,
    /// Periodic re-derivation from phase progress, no plan.
    Adaptive,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioSettings {
    pub renderer: RendererKind,
    pub renderer_program: String,
    pub player_program: String,
    /// `{file}` and `{volume}` are substituted per stream.
    pub player_args: Vec<String>,
    pub volume: f32,
    /// Output format of rendered segments.
    pub sample_rate: u32,
    pub channels: u16,
    pub fade_secs: u64,
    pub crossfade_secs: u64,
    pub min_bytes_per_second: u64,
    pub render_timeout_secs: u64,
    pub cleanup_grace_secs: u64,
    pub segment_poll_ms: u64,
    pub mode: SoundscapeMode,
    pub adaptive_update_secs: u64,
    /// Built-in three-kind rotation used when no plan is available.
    pub default_kinds: [NoiseKind; 3],
}

impl Default for AudioSettings {
    fn default() -> Self {
        let (player_program, player_args) = default_player();
        Self {
            renderer: RendererKind::Sox,
            renderer_program: "sox".into(),
            player_program,
            player_args,
            volume: 0.6,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            fade_secs: 2,
            crossfade_secs: 2,
            min_bytes_per_second: 16_000,
            render_timeout_secs: 60,
            cleanup_grace_secs: 3,
            segment_poll_ms: 100,
            mode: SoundscapeMode::Playlist,
            adaptive_update_secs: 30,
            default_kinds: [NoiseKind::PinkNoise, NoiseKind::BrownNoise, NoiseKind::Rain],
        }
    }
}

impl AudioSettings {
    pub fn fade_window(&self) -> Duration {
        Duration::from_secs(self.fade_secs)
    }

    pub fn crossfade_window(&self) -> Duration {
        Duration::from_secs(self.crossfade_secs)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs.max(1))
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_secs(self.cleanup_grace_secs)
    }

    pub fn segment_poll_interval(&self) -> Duration {
        Duration::from_millis(self.segment_poll_ms.clamp(10, 1_000))
    }
}

#[cfg(target_os = "macos")]
fn default_player() -> (String, Vec<String>) {
    ("afplay".into(), vec!["-v".into(), "{volume}".into(), "{file}".into()])
}

#[cfg(not(target_os = "macos"))]
fn default_player() -> (String, Vec<String>) {
    (
        "play".into(),
        vec!["-q".into(), "-v".into(), "{volume}".into(), "{file}".into()],
    )
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdvisorySettings {
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for AdvisorySettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 8,
        }
    }
}

impl AdvisorySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationSettings {
    pub enabled: bool,
    /// Desktop notifier invoked as `<command> <title> <message>`; logs only when unset.
    pub command: Option<String>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            command: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UserSettings {
    pub timer: TimerSettings,
    pub audio: AudioSettings,
    pub advisory: AdvisorySettings,
    pub notifications: NotificationSettings,
}

impl UserSettings {
    fn sanitized(mut self) -> Self {
        self.timer = self.timer.clamped();
        self.audio.volume = self.audio.volume.clamp(0.0, 1.0);
        self
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str::<UserSettings>(&contents) {
                Ok(parsed) => parsed,
                Err(err) => {
                    log::warn!(
                        "Ignoring malformed settings at {}: {err}",
                        path.display()
                    );
                    UserSettings::default()
                }
            }
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data.sanitized()),
        })
    }

    /// `<platform config dir>/settings.json`, or `./focustide-settings.json`
    /// when the platform has no home directory.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("dev", "focustide", "focustide")
            .map(|dirs| dirs.config_dir().join("settings.json"))
            .unwrap_or_else(|| PathBuf::from("focustide-settings.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> UserSettings {
        self.read().clone()
    }

    pub fn timer(&self) -> TimerSettings {
        self.read().timer.clone()
    }

    pub fn audio(&self) -> AudioSettings {
        self.read().audio.clone()
    }

    pub fn update_timer(&self, settings: TimerSettings) -> Result<TimerSettings> {
        let mut guard = self.write();
        guard.timer = settings.clamped();
        self.persist(&guard)?;
        Ok(guard.timer.clone())
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create settings directory {}", parent.display())
                })?;
            }
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
