use super::{TimerController, TimerSnapshot};

/// Interactive commands accepted on stdin by the `focustide` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    Start,
    Pause,
    Resume,
    Toggle,
    Skip,
    Stop,
    Status,
    /// Ask the advisory service for a fresh plan mid-phase.
    Refresh,
    /// New phase lengths in minutes; omitted breaks keep their current length.
    Durations {
        work_minutes: u32,
        short_break_minutes: Option<u32>,
        long_break_minutes: Option<u32>,
    },
    Quit,
}

pub fn parse_command(input: &str) -> Option<TimerCommand> {
    let input = input.trim().to_ascii_lowercase();
    let mut words = input.split_whitespace();
    let name = words.next()?;
    let args: Vec<&str> = words.collect();

    if matches!(name, "durations" | "d") {
        return parse_durations(&args);
    }
    if !args.is_empty() {
        return None;
    }
    let command = match name {
        "start" | "s" => TimerCommand::Start,
        "pause" => TimerCommand::Pause,
        "resume" => TimerCommand::Resume,
        "toggle" | "t" => TimerCommand::Toggle,
        "skip" | "n" | "next" => TimerCommand::Skip,
        "stop" | "x" => TimerCommand::Stop,
        "status" | "?" => TimerCommand::Status,
        "refresh" | "r" => TimerCommand::Refresh,
        "quit" | "q" | "exit" => TimerCommand::Quit,
        _ => return None,
    };
    Some(command)
}

/// `durations <work> [short break] [long break]`, all in whole minutes.
fn parse_durations(args: &[&str]) -> Option<TimerCommand> {
    let minutes: Vec<u32> = args
        .iter()
        .map(|arg| arg.parse().ok())
        .collect::<Option<_>>()?;
    match minutes.as_slice() {
        [work, rest @ ..] if rest.len() <= 2 => Some(TimerCommand::Durations {
            work_minutes: *work,
            short_break_minutes: rest.first().copied(),
            long_break_minutes: rest.get(1).copied(),
        }),
        _ => None,
    }
}

/// Runs the commands that only touch the timer. Returns `None` for commands the
/// caller has to handle itself.
pub async fn apply_timer_command(
    timer: &TimerController,
    command: TimerCommand,
) -> Option<TimerSnapshot> {
    let snapshot = match command {
        TimerCommand::Start => timer.start().await,
        TimerCommand::Pause => timer.pause().await,
        TimerCommand::Resume => timer.resume().await,
        TimerCommand::Toggle => timer.toggle().await,
        TimerCommand::Skip => timer.skip().await,
        TimerCommand::Stop => timer.stop().await,
        TimerCommand::Status => timer.snapshot().await,
        TimerCommand::Refresh | TimerCommand::Durations { .. } | TimerCommand::Quit => {
            return None
        }
    };
    Some(snapshot)
}
