//! In-process stand-in for the renderer and player subprocesses.

use std::{
    collections::HashSet,
    path::Path,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use futures_util::future::BoxFuture;
use focustide_lib::{
    audio::{AudioBackend, PlayerProcess, RenderJob},
    playlist::NoiseKind,
};
use tokio::time::Instant;

struct PlayerRecord {
    kind: NoiseKind,
    started_at: Instant,
    audio: Duration,
    alive: Arc<AtomicBool>,
}

/// When a player started and how much audio its file held.
#[derive(Debug, Clone, Copy)]
pub struct PlayerSpan {
    pub kind: NoiseKind,
    pub started_at: Instant,
    pub audio: Duration,
}

impl PlayerSpan {
    /// The moment its file runs out, had nothing killed it.
    pub fn audio_ends_at(&self) -> Instant {
        self.started_at + self.audio
    }
}

#[derive(Default)]
pub struct FakeBackend {
    render_delay: Mutex<Duration>,
    exit_delay: Mutex<Duration>,
    failing: Mutex<HashSet<NoiseKind>>,
    renders: AtomicU32,
    players: Mutex<Vec<PlayerRecord>>,
    next_pid: AtomicU32,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_render_delay(&self, delay: Duration) {
        *self.render_delay.lock().unwrap() = delay;
    }

    /// Players spawned from now on take `delay` to exit once killed.
    pub fn set_exit_delay(&self, delay: Duration) {
        *self.exit_delay.lock().unwrap() = delay;
    }

    /// Renders of `kind` exit non-zero from now on.
    pub fn fail_kind(&self, kind: NoiseKind) {
        self.failing.lock().unwrap().insert(kind);
    }

    pub fn render_count(&self) -> u32 {
        self.renders.load(Ordering::SeqCst)
    }

    /// Kinds of every player ever started, in start order.
    pub fn spawned_kinds(&self) -> Vec<NoiseKind> {
        self.players.lock().unwrap().iter().map(|p| p.kind).collect()
    }

    /// Kinds of players not yet killed, in start order.
    pub fn live_kinds(&self) -> Vec<NoiseKind> {
        self.players
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.alive.load(Ordering::SeqCst))
            .map(|p| p.kind)
            .collect()
    }

    /// Every player ever started, in start order.
    pub fn player_spans(&self) -> Vec<PlayerSpan> {
        self.players
            .lock()
            .unwrap()
            .iter()
            .map(|p| PlayerSpan {
                kind: p.kind,
                started_at: p.started_at,
                audio: p.audio,
            })
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.live_kinds().len()
    }

    async fn fake_render(&self, job: &RenderJob) -> Result<()> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        let delay = *self.render_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&job.kind) {
            bail!("renderer exited with status 2");
        }

        let spec = hound::WavSpec {
            channels: job.channels,
            sample_rate: job.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&job.output, spec)?;
        for _ in 0..job.total_frames() * u64::from(job.channels) {
            writer.write_sample(0i16)?;
        }
        writer.finalize()?;
        Ok(())
    }
}

impl AudioBackend for FakeBackend {
    fn render<'a>(&'a self, job: &'a RenderJob) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.fake_render(job))
    }

    fn spawn_player(&self, file: &Path) -> Result<Box<dyn PlayerProcess>> {
        if !file.exists() {
            bail!("player given missing file {}", file.display());
        }
        let stem = file
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.split('-').next())
            .ok_or_else(|| anyhow!("unexpected transient file name {}", file.display()))?;
        let kind = NoiseKind::from_str(stem)?;
        let reader = hound::WavReader::open(file)?;
        let rate = u64::from(reader.spec().sample_rate.max(1));
        let audio = Duration::from_millis(u64::from(reader.duration()) * 1_000 / rate);

        let alive = Arc::new(AtomicBool::new(true));
        self.players.lock().unwrap().push(PlayerRecord {
            kind,
            started_at: Instant::now(),
            audio,
            alive: Arc::clone(&alive),
        });
        Ok(Box::new(FakePlayer {
            pid: 1_000 + self.next_pid.fetch_add(1, Ordering::SeqCst),
            exit_delay: *self.exit_delay.lock().unwrap(),
            alive,
        }))
    }
}

struct FakePlayer {
    pid: u32,
    exit_delay: Duration,
    alive: Arc<AtomicBool>,
}

impl PlayerProcess for FakePlayer {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn start_kill(&mut self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn wait(&mut self) -> BoxFuture<'_, Result<()>> {
        let delay = self.exit_delay;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(())
        })
    }

    fn has_exited(&mut self) -> bool {
        !self.alive.load(Ordering::SeqCst)
    }
}

impl Drop for FakePlayer {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}
