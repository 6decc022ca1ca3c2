//! Native notification wrapper
//!
//! Desktop alerts go through two injected capabilities: a permission check
//! and a notifier that shows the alert. `SystemNotifier` provides both by
//! driving the platform's notification command (`notify-send` on Linux,
//! `osascript` on macOS). Tests substitute fakes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::WatchError;
use crate::opportunities::ClassifiedOpportunity;

const APP_NAME: &str = "crmwatch";

/// Longest notification body before truncation.
const MAX_BODY_CHARS: usize = 100;

/// Platform permission to raise intrusive notifications.
pub trait NotificationPermission: Send + Sync {
    fn is_granted(&self) -> bool;

    /// Ask for permission. Returns whether it is now granted.
    fn request(&self) -> bool;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn show(&self, notification: &DesktopNotification) -> Result<(), WatchError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopNotification {
    pub title: String,
    pub body: String,
    /// Notifications with the same tag replace each other where supported.
    pub tag: String,
    /// Stays on screen until dismissed.
    pub urgent: bool,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Shows notifications when, and only when, permission has been granted.
pub struct AlertDispatcher {
    permission: Arc<dyn NotificationPermission>,
    notifier: Arc<dyn Notifier>,
}

impl AlertDispatcher {
    pub fn new(permission: Arc<dyn NotificationPermission>, notifier: Arc<dyn Notifier>) -> Self {
        Self { permission, notifier }
    }

    /// Dispatcher backed by a single `SystemNotifier`.
    pub fn system() -> Self {
        let system = Arc::new(SystemNotifier::new());
        Self::new(system.clone(), system)
    }

    pub fn request_permission(&self) -> bool {
        self.permission.request()
    }

    /// Show `notification` in the background. Returns false when it was
    /// skipped for lack of permission.
    pub fn dispatch(&self, notification: DesktopNotification) -> bool {
        if !self.permission.is_granted() {
            log::debug!("Desktop notification skipped (not permitted): {}", notification.title);
            return false;
        }

        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.show(&notification).await {
                log::warn!("Failed to send notification: {}", e);
            }
        });
        true
    }
}

// ---------------------------------------------------------------------------
// Alert text
// ---------------------------------------------------------------------------

/// Build the alert for opportunities that just crossed `critical_days`.
pub fn critical_alert(
    opportunities: &[ClassifiedOpportunity],
    critical_days: i64,
) -> Option<DesktopNotification> {
    let first = opportunities.first()?;
    let count = opportunities.len();

    let (title, body) = if count == 1 {
        (
            format!("Critical alert: opportunity over {} days", critical_days),
            format!(
                "{} has gone {} days without a step update.",
                display_name(first),
                first.age_days
            ),
        )
    } else {
        (
            format!("Critical alert: {} opportunities over {} days", count, critical_days),
            format!(
                "{} opportunities have gone {}+ days without a step update.",
                count, critical_days
            ),
        )
    };

    Some(DesktopNotification {
        title,
        body: truncate_body(&body),
        tag: "critical-opportunities".to_string(),
        urgent: true,
    })
}

/// Send the critical-opportunity alert, if there is anything to say.
pub fn notify_critical_opportunities(
    dispatcher: &AlertDispatcher,
    opportunities: &[ClassifiedOpportunity],
    critical_days: i64,
) -> bool {
    match critical_alert(opportunities, critical_days) {
        Some(notification) => dispatcher.dispatch(notification),
        None => false,
    }
}

fn display_name(opportunity: &ClassifiedOpportunity) -> String {
    let record = &opportunity.record;
    record
        .company_name
        .as_deref()
        .or(record.reference_project.as_deref())
        .filter(|name| !name.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Opportunity #{}", record.id))
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() > MAX_BODY_CHARS {
        let cut: String = body.chars().take(MAX_BODY_CHARS).collect();
        format!("{}...", cut)
    } else {
        body.to_string()
    }
}

// ---------------------------------------------------------------------------
// System notifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    NotifySend,
    Osascript,
}

impl Backend {
    fn for_platform() -> Option<Self> {
        if cfg!(target_os = "macos") {
            Some(Backend::Osascript)
        } else if cfg!(unix) {
            Some(Backend::NotifySend)
        } else {
            None
        }
    }

    fn program(self) -> &'static str {
        match self {
            Backend::NotifySend => "notify-send",
            Backend::Osascript => "osascript",
        }
    }
}

/// Permission + notifier backed by the platform notification command.
///
/// Permission is the presence of that command on `PATH`, probed once by
/// `request()` and cached for the life of the notifier.
pub struct SystemNotifier {
    resolved: Mutex<Option<Option<PathBuf>>>,
}

impl Default for SystemNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemNotifier {
    pub fn new() -> Self {
        Self {
            resolved: Mutex::new(None),
        }
    }

    fn program_path(&self) -> Option<PathBuf> {
        self.resolved.lock().clone().flatten()
    }
}

impl NotificationPermission for SystemNotifier {
    fn is_granted(&self) -> bool {
        self.program_path().is_some()
    }

    fn request(&self) -> bool {
        let mut resolved = self.resolved.lock();
        if resolved.is_none() {
            let found = Backend::for_platform().and_then(|b| find_in_path(b.program()));
            match &found {
                Some(path) => log::info!("Desktop notifications enabled via {}", path.display()),
                None => log::info!("Desktop notifications unavailable: no notifier command found"),
            }
            *resolved = Some(found);
        }
        resolved.clone().flatten().is_some()
    }
}

#[async_trait]
impl Notifier for SystemNotifier {
    async fn show(&self, notification: &DesktopNotification) -> Result<(), WatchError> {
        let (Some(backend), Some(program)) = (Backend::for_platform(), self.program_path()) else {
            return Ok(());
        };

        let args = command_args(backend, notification);
        let status = tokio::process::Command::new(program)
            .args(&args)
            .status()
            .await?;

        if !status.success() {
            return Err(WatchError::Io(std::io::Error::other(format!(
                "{} exited with {}",
                backend.program(),
                status
            ))));
        }
        Ok(())
    }
}

fn command_args(backend: Backend, notification: &DesktopNotification) -> Vec<String> {
    match backend {
        Backend::NotifySend => {
            let urgency = if notification.urgent { "critical" } else { "normal" };
            vec![
                format!("--app-name={}", APP_NAME),
                format!("--urgency={}", urgency),
                format!("--hint=string:x-canonical-private-synchronous:{}", notification.tag),
                notification.title.clone(),
                notification.body.clone(),
            ]
        }
        Backend::Osascript => vec![
            "-e".to_string(),
            format!(
                "display notification \"{}\" with title \"{}\"",
                applescript_escape(&notification.body),
                applescript_escape(&notification.title)
            ),
        ],
    }
}

fn applescript_escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn find_in_path(program: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// ---------------------------------------------------------------------------
// Test fakes
// ---------------------------------------------------------------------------
