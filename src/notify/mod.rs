use std::{path::Path, process::Stdio, sync::Arc};

use tokio::process::Command;

use crate::settings::NotificationSettings;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Fire-and-forget user notifications. Implementations must never block or
/// fail loudly; the core treats delivery as best effort.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, title: &str, message: &str, sound_hint: Option<&str>);
}

/// Writes notifications to the log.
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, title: &str, message: &str, _sound_hint: Option<&str>) {
        log_info!("[notify] {title}: {message}");
    }
}

/// Spawns a desktop notifier (`notify-send`, `terminal-notifier`, ...) per call.
pub struct CommandNotifier {
    program: String,
}

impl CommandNotifier {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(&self, title: &str, message: &str, sound_hint: Option<&str>) -> Vec<String> {
        let mut args = Vec::new();
        let is_notify_send = Path::new(&self.program)
            .file_name()
            .map_or(false, |name| name == "notify-send");
        if let (true, Some(hint)) = (is_notify_send, sound_hint) {
            args.push(format!("--hint=string:sound-name:{hint}"));
        }
        args.push(title.to_string());
        args.push(message.to_string());
        args
    }
}

impl NotificationSink for CommandNotifier {
    fn notify(&self, title: &str, message: &str, sound_hint: Option<&str>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log_debug!("no runtime for notifier, dropping '{title}'");
            return;
        };
        let spawned = Command::new(&self.program)
            .args(self.args(title, message, sound_hint))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            Ok(mut child) => {
                runtime.spawn(async move {
                    let _ = child.wait().await;
                });
            }
            Err(err) => log_debug!("notifier {} unavailable: {err}", self.program),
        }
    }
}

pub fn from_settings(settings: &NotificationSettings) -> Option<Arc<dyn NotificationSink>> {
    if !settings.enabled {
        return None;
    }
    match settings.command.as_deref() {
        Some(program) if !program.trim().is_empty() => {
            Some(Arc::new(CommandNotifier::new(program.trim())))
        }
        _ => Some(Arc::new(LogNotifier)),
    }
}
