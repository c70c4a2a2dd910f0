//! Notification sinks the reminder scheduler can deliver to.

use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tasklist_core::{NotificationSink, Permission, ReminderError};
use tracing::{info, warn};

use crate::config::{ReminderSection, SinkKind};

/// Longest a notifier process may run before it is killed.
const NOTIFIER_TIMEOUT: Duration = Duration::from_secs(10);

/// Writes reminders to the log and stdout. Always available.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn permission(&self) -> Permission {
        Permission::Granted
    }

    async fn request_permission(&self) -> Permission {
        Permission::Granted
    }

    fn deliver(&self, title: &str, body: &str) -> Result<(), ReminderError> {
        info!(title, body, "reminder");
        println!("[{title}] {body}");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Notifier {
    NotifySend,
    Osascript,
}

impl Notifier {
    fn for_platform() -> Option<Self> {
        if cfg!(target_os = "macos") {
            Some(Notifier::Osascript)
        } else if cfg!(unix) {
            Some(Notifier::NotifySend)
        } else {
            None
        }
    }

    fn binary(self) -> &'static str {
        match self {
            Notifier::NotifySend => "notify-send",
            Notifier::Osascript => "osascript",
        }
    }
}

/// Desktop notifications through `notify-send` (Linux) or `osascript` (macOS).
#[derive(Debug)]
pub struct DesktopSink {
    program: Option<(Notifier, PathBuf)>,
    granted: AtomicBool,
}

impl DesktopSink {
    /// Look up the platform notifier on `PATH`.
    pub fn detect(enabled: bool) -> Self {
        let program = Notifier::for_platform().and_then(|n| match which::which(n.binary()) {
            Ok(path) => Some((n, path)),
            Err(_) => {
                warn!(binary = n.binary(), "notifier not found on PATH");
                None
            }
        });
        Self {
            program,
            granted: AtomicBool::new(enabled),
        }
    }
}

#[async_trait]
impl NotificationSink for DesktopSink {
    fn is_supported(&self) -> bool {
        self.program.is_some()
    }

    fn permission(&self) -> Permission {
        if self.granted.load(Ordering::SeqCst) {
            Permission::Granted
        } else {
            Permission::Prompt
        }
    }

    async fn request_permission(&self) -> Permission {
        if !self.is_supported() {
            return Permission::Denied;
        }
        self.granted.store(true, Ordering::SeqCst);
        Permission::Granted
    }

    fn deliver(&self, title: &str, body: &str) -> Result<(), ReminderError> {
        let Some((notifier, path)) = &self.program else {
            return Err(ReminderError::CapabilityUnavailable);
        };

        let mut cmd = Command::new(path);
        match notifier {
            Notifier::NotifySend => {
                cmd.args(["--app-name", "tasklist", title, body]);
            }
            Notifier::Osascript => {
                let script = format!(
                    r#"display notification "{}" with title "{}""#,
                    escape_applescript(body),
                    escape_applescript(title)
                );
                cmd.arg("-e").arg(script);
            }
        }

        let output = run_with_timeout(&mut cmd, NOTIFIER_TIMEOUT)
            .map_err(|e| ReminderError::DeliveryFailure(format!("running {}: {e}", notifier.binary())))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ReminderError::DeliveryFailure(stderr.trim().to_string()));
        }
        Ok(())
    }
}

/// Run `cmd` to completion, killing it once `timeout` has passed.
fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<Output, String> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| e.to_string())?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait().map_err(|e| e.to_string())? {
            Some(_) => return child.wait_with_output().map_err(|e| e.to_string()),
            None if Instant::now() >= deadline => {
                if let Err(e) = child.kill() {
                    warn!(error = %e, "cannot kill notifier process");
                }
                let _ = child.wait();
                return Err(format!("timed out after {}s", timeout.as_secs_f32()));
            }
            None => std::thread::sleep(Duration::from_millis(20)),
        }
    }
}

fn escape_applescript(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

/// Build the sink selected by `[reminders] sink`.
pub fn build_sink(cfg: &ReminderSection) -> Arc<dyn NotificationSink> {
    match cfg.sink {
        SinkKind::Log => Arc::new(LogSink),
        SinkKind::Desktop => Arc::new(DesktopSink::detect(cfg.enabled)),
    }
}
