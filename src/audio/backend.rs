use anyhow::{bail, Context, Result};
use futures_util::future::BoxFuture;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};
use tokio::{
    io::AsyncReadExt,
    process::{Child, Command},
};

use super::render::RenderJob;
use crate::settings::{AudioSettings, RendererKind};

const ENABLE_LOGS: bool = true;

use crate::log_debug;

/// Launches the two processes behind one audible stream: a renderer that writes
/// a segment to disk and a player that streams it.
pub trait AudioBackend: Send + Sync + 'static {
    /// Runs the renderer to completion. Fails on spawn errors, a non-zero exit
    /// or when the renderer outlives its time budget (it is killed).
    fn render<'a>(&'a self, job: &'a RenderJob) -> BoxFuture<'a, Result<()>>;

    fn spawn_player(&self, file: &Path) -> Result<Box<dyn PlayerProcess>>;
}

/// Handle to a running player. Dropping it kills the process.
pub trait PlayerProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Sends the kill signal without waiting.
    fn start_kill(&mut self) -> Result<()>;

    /// Waits for the process to exit and reaps it.
    fn wait(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Non-blocking exit check; reaps the process if it has exited.
    fn has_exited(&mut self) -> bool;
}

/// Real subprocesses: `sox` (or this executable's `render` subcommand) and a
/// command-line player such as `play` or `afplay`.
pub struct ExternalBackend {
    renderer: RendererKind,
    renderer_program: PathBuf,
    player_program: String,
    player_args: Vec<String>,
    volume: f32,
    render_timeout: Duration,
}

impl ExternalBackend {
    pub fn from_settings(settings: &AudioSettings) -> Result<Self> {
        let renderer_program = match settings.renderer {
            RendererKind::Sox => PathBuf::from(&settings.renderer_program),
            RendererKind::Builtin => std::env::current_exe()
                .context("cannot locate own executable for the built-in renderer")?,
        };
        Ok(Self {
            renderer: settings.renderer,
            renderer_program,
            player_program: settings.player_program.clone(),
            player_args: settings.player_args.clone(),
            volume: settings.volume,
            render_timeout: settings.render_timeout(),
        })
    }

    pub fn renderer_args(&self, job: &RenderJob) -> Vec<String> {
        match self.renderer {
            RendererKind::Sox => sox_args(job),
            RendererKind::Builtin => builtin_args(job),
        }
    }

    pub fn player_args_for(&self, file: &Path) -> Vec<String> {
        let file = file.to_string_lossy();
        let volume = format!("{:.2}", self.volume);
        self.player_args
            .iter()
            .map(|arg| arg.replace("{file}", &file).replace("{volume}", &volume))
            .collect()
    }

    async fn run_renderer(&self, job: &RenderJob) -> Result<()> {
        let args = self.renderer_args(job);
        log_debug!("render: {} {}", self.renderer_program.display(), args.join(" "));

        let mut command = Command::new(&self.renderer_program);
        command.args(&args);
        run_bounded(&mut command, self.render_timeout)
            .await
            .with_context(|| format!("renderer {}", self.renderer_program.display()))
    }
}

/// Runs `command` to completion within `timeout`. A non-zero exit fails with
/// the process's stderr; on timeout the process is killed and reaped.
async fn run_bounded(command: &mut Command, timeout: Duration) -> Result<()> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("failed to spawn")?;

    let mut stderr = child.stderr.take();
    let collect_stderr = async {
        let mut text = String::new();
        if let Some(stderr) = stderr.as_mut() {
            let _ = stderr.read_to_string(&mut text).await;
        }
        text
    };

    let finished =
        tokio::time::timeout(timeout, async { tokio::join!(child.wait(), collect_stderr) }).await;
    let (status, stderr) = match finished {
        Ok((status, stderr)) => (status.context("failed to wait")?, stderr),
        Err(_) => {
            if let Err(err) = child.kill().await {
                log_debug!("failed to kill timed out process: {err}");
            }
            bail!("timed out after {}s", timeout.as_secs_f32());
        }
    };

    if !status.success() {
        bail!("exited with {}: {}", status, stderr.trim());
    }
    Ok(())
}

impl AudioBackend for ExternalBackend {
    fn render<'a>(&'a self, job: &'a RenderJob) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.run_renderer(job))
    }

    fn spawn_player(&self, file: &Path) -> Result<Box<dyn PlayerProcess>> {
        let child = Command::new(&self.player_program)
            .args(self.player_args_for(file))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn player {}", self.player_program))?;
        Ok(Box::new(ChildPlayer { child }))
    }
}

fn sox_args(job: &RenderJob) -> Vec<String> {
    let duration = job.duration_secs.to_string();
    let mut args: Vec<String> = vec![
        "-q".into(),
        "-n".into(),
        "-r".into(),
        job.sample_rate.to_string(),
        "-c".into(),
        job.channels.to_string(),
        "-b".into(),
        "16".into(),
        job.output.to_string_lossy().into_owned(),
        "synth".into(),
        duration.clone(),
        job.kind.sox_generator().into(),
    ];
    args.extend(job.kind.filter_spec().iter().map(|arg| arg.to_string()));
    if job.fade_in_secs > 0 || job.fade_out_secs > 0 {
        args.extend([
            "fade".into(),
            "q".into(),
            job.fade_in_secs.to_string(),
            duration,
            job.fade_out_secs.to_string(),
        ]);
    }
    args
}

fn builtin_args(job: &RenderJob) -> Vec<String> {
    vec![
        "render".into(),
        "--kind".into(),
        job.kind.slug().into(),
        "--duration".into(),
        job.duration_secs.to_string(),
        "--fade-in".into(),
        job.fade_in_secs.to_string(),
        "--fade-out".into(),
        job.fade_out_secs.to_string(),
        "--sample-rate".into(),
        job.sample_rate.to_string(),
        "--channels".into(),
        job.channels.to_string(),
        "--output".into(),
        job.output.to_string_lossy().into_owned(),
    ]
}

struct ChildPlayer {
    child: Child,
}

impl PlayerProcess for ChildPlayer {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn start_kill(&mut self) -> Result<()> {
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            // Already exited and reaped.
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(err) => Err(err).context("failed to kill player"),
        }
    }

    fn wait(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.child
                .wait()
                .await
                .map(|_| ())
                .context("failed to reap player")
        })
    }

    fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }
}
