use std::path::PathBuf;

use clap::{Parser, Subcommand};
use focustide_lib::audio::{
    render::{DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE},
    NoiseKind, RenderJob,
};

#[derive(Parser)]
#[command(name = "focustide")]
#[command(about = "Work/break focus timer with an adaptive ambient soundscape")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run an interactive session (the default)
    Run,
    /// Render one noise segment to a 16-bit WAV file
    Render {
        #[arg(long)]
        kind: NoiseKind,
        /// Length in seconds
        #[arg(long)]
        duration: u32,
        /// Sets both fades unless --fade-in/--fade-out are given
        #[arg(long, default_value_t = 0)]
        fade: u32,
        #[arg(long)]
        fade_in: Option<u32>,
        #[arg(long)]
        fade_out: Option<u32>,
        #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE)]
        sample_rate: u32,
        #[arg(long, default_value_t = DEFAULT_CHANNELS)]
        channels: u16,
        #[arg(long)]
        output: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => focustide_lib::run(cli.settings),
        Command::Render {
            kind,
            duration,
            fade,
            fade_in,
            fade_out,
            sample_rate,
            channels,
            output,
        } => focustide_lib::render(RenderJob {
            kind,
            duration_secs: duration,
            fade_in_secs: fade_in.unwrap_or(fade),
            fade_out_secs: fade_out.unwrap_or(fade),
            sample_rate,
            channels,
            output,
        }),
    }
}
