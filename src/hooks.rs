//! Completion hooks
//!
//! Notifiers run after an upload is finalized. They are fire-and-forget:
//! whatever they do, the upload has already succeeded.

use serde::Serialize;
use tokio::process::Command;

/// A finished upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookEvent {
    /// Event name, e.g. `upload`
    pub name: &'static str,
    /// Final target path
    pub path: String,
    pub size: u64,
}

pub trait HookNotifier: Send + Sync {
    fn notify(&self, event: HookEvent);
}

/// Records completions in the log only
pub struct LogNotifier;

impl HookNotifier for LogNotifier {
    fn notify(&self, event: HookEvent) {
        tracing::info!(
            event = event.name,
            path = %event.path,
            size = event.size,
            "Upload hook fired"
        );
    }
}

/// Runs a shell command per event with `FILE` and `TRIGGER` set
pub struct CommandNotifier {
    command: String,
}

impl CommandNotifier {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl HookNotifier for CommandNotifier {
    fn notify(&self, event: HookEvent) {
        let command = self.command.clone();

        tokio::spawn(async move {
            let status = Command::new("sh")
                .arg("-c")
                .arg(&command)
                .env("FILE", &event.path)
                .env("TRIGGER", event.name)
                .env("SIZE", event.size.to_string())
                .status()
                .await;

            match status {
                Ok(status) if status.success() => {
                    tracing::debug!(path = %event.path, command = %command, "Hook command finished");
                }
                Ok(status) => {
                    tracing::warn!(
                        path = %event.path,
                        command = %command,
                        status = %status,
                        "Hook command failed"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        path = %event.path,
                        command = %command,
                        error = %e,
                        "Could not run hook command"
                    );
                }
            }
        });
    }
}
