pub mod advisory;
pub mod app;
pub mod audio;
pub mod notify;
pub mod playlist;
pub mod settings;
pub mod timer;
pub mod utils;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};

use app::{App, AppParts};
use audio::RenderJob;
use settings::SettingsStore;

/// Time the runtime gets to wind down once the session is over. The stdin
/// reader parks a blocking thread that would otherwise hold exit hostage.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

/// Runs the interactive focus session until `quit`, end of input or Ctrl-C.
pub fn run(settings_path: Option<PathBuf>) -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    log::info!("focustide starting up...");

    let path = settings_path.unwrap_or_else(SettingsStore::default_path);
    let store = Arc::new(SettingsStore::new(path)?);
    log::info!("settings: {}", store.path().display());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let result = runtime.block_on(async {
        let mut parts = AppParts::from_settings(store.snapshot())?;
        parts.store = Some(Arc::clone(&store));
        let app = App::assemble(parts);
        app.run_interactive().await
    });
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}

/// Entry point of the built-in renderer subprocess: writes one segment and exits.
pub fn render(job: RenderJob) -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .init();
    audio::render_to_file(&job)
        .with_context(|| format!("failed to render {} to {}", job.kind, job.output.display()))
}
