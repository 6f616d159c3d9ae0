//! User-facing notices for capture results, delivered via freedesktop D-Bus.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use url::Url;
use zbus::{Connection, proxy};

use crate::capture::{AggregateResult, CaptureError, Classification, OperationOutcome};

const APP_NAME: &str = "Capturecast";

/// D-Bus interface for freedesktop Notifications.
#[proxy(
    interface = "org.freedesktop.Notifications",
    default_service = "org.freedesktop.Notifications",
    default_path = "/org/freedesktop/Notifications"
)]
trait Notifications {
    /// Send a notification.
    ///
    /// # Arguments
    /// * `app_name` - Application name
    /// * `replaces_id` - ID of notification to replace (0 for new)
    /// * `app_icon` - Icon name or path
    /// * `summary` - Notification title
    /// * `body` - Notification body text
    /// * `actions` - Alternating action identifiers and labels
    /// * `hints` - Additional metadata
    /// * `expire_timeout` - Timeout in milliseconds (-1 for default)
    ///
    /// # Returns
    /// Notification ID
    fn notify(
        &self,
        app_name: &str,
        replaces_id: u32,
        app_icon: &str,
        summary: &str,
        body: &str,
        actions: Vec<&str>,
        hints: HashMap<&str, zbus::zvariant::Value<'_>>,
        expire_timeout: i32,
    ) -> zbus::Result<u32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Low,
    Normal,
    Critical,
}

impl Urgency {
    fn hint(self) -> u8 {
        match self {
            Urgency::Low => 0,
            Urgency::Normal => 1,
            Urgency::Critical => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeAction {
    pub key: String,
    pub label: String,
}

impl NoticeAction {
    fn new(key: &str, label: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
        }
    }
}

/// What to tell the user about one capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub summary: String,
    pub body: String,
    pub icon: &'static str,
    pub urgency: Urgency,
    pub actions: Vec<NoticeAction>,
    /// Target of the `open` action.
    pub target: Option<Url>,
}

impl Notice {
    /// Chooses the notice from the result's classification.
    ///
    /// * all failed: one consolidated error listing every cause
    /// * all succeeded: the first success, with an `open` action when a URI exists
    /// * partial: a warning offering both the results and the errors
    pub fn from_result(result: &AggregateResult) -> Self {
        match result.classification() {
            Classification::AllFailed => {
                let causes: Vec<String> = result
                    .failures()
                    .filter_map(|report| match &report.outcome {
                        OperationOutcome::Failure { cause } => {
                            Some(format!("{}: {}", report.sink.name, cause))
                        }
                        OperationOutcome::Success { .. } => None,
                    })
                    .collect();
                Self {
                    summary: "Capture failed".into(),
                    body: causes.join("\n"),
                    icon: "dialog-error",
                    urgency: Urgency::Critical,
                    actions: Vec::new(),
                    target: None,
                }
            }
            Classification::AllSucceeded => {
                let (summary, body) = result
                    .successes()
                    .find_map(|report| match &report.outcome {
                        OperationOutcome::Success { title, content, .. } => {
                            Some((title.clone(), content.clone()))
                        }
                        OperationOutcome::Failure { .. } => None,
                    })
                    .unwrap_or_else(|| ("Capture complete".into(), String::new()));
                let target = result.first_uri().cloned();
                let actions = if target.is_some() {
                    vec![NoticeAction::new("open", "Open")]
                } else {
                    Vec::new()
                };
                Self {
                    summary,
                    body,
                    icon: "camera-photo",
                    urgency: Urgency::Normal,
                    actions,
                    target,
                }
            }
            Classification::Partial => Self {
                summary: "Capture completed with errors".into(),
                body: format!(
                    "{} of {} destinations failed",
                    result.failures().count(),
                    result.len()
                ),
                icon: "dialog-warning",
                urgency: Urgency::Normal,
                actions: vec![
                    NoticeAction::new("view-results", "View results"),
                    NoticeAction::new("view-errors", "View errors"),
                ],
                target: result.first_uri().cloned(),
            },
        }
    }

    /// Notice for an operation that produced no result at all.
    pub fn from_error(error: &CaptureError) -> Self {
        Self {
            summary: "Capture failed".into(),
            body: error.to_string(),
            icon: "dialog-error",
            urgency: Urgency::Critical,
            actions: Vec::new(),
            target: None,
        }
    }
}

/// Delivers notices to the user.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &Notice) -> Result<(), String>;
}

/// Sends notices over the session bus.
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopNotifier;

#[async_trait]
impl Notifier for DesktopNotifier {
    async fn notify(&self, notice: &Notice) -> Result<(), String> {
        let connection = Connection::session()
            .await
            .map_err(|e| format!("Failed to connect to session bus: {}", e))?;

        let proxy = NotificationsProxy::new(&connection)
            .await
            .map_err(|e| format!("Failed to create notifications proxy: {}", e))?;

        let actions: Vec<&str> = notice
            .actions
            .iter()
            .flat_map(|action| [action.key.as_str(), action.label.as_str()])
            .collect();
        let mut hints = HashMap::new();
        hints.insert("urgency", zbus::zvariant::Value::from(notice.urgency.hint()));

        let body = match &notice.target {
            Some(target) if !notice.body.contains(target.as_str()) => {
                format!("{}\n{}", notice.body, target)
            }
            _ => notice.body.clone(),
        };
        let timeout = match notice.urgency {
            Urgency::Critical => 0,
            Urgency::Low | Urgency::Normal => 5000,
        };

        proxy
            .notify(
                APP_NAME,
                0,
                notice.icon,
                &notice.summary,
                &body,
                actions,
                hints,
                timeout,
            )
            .await
            .map_err(|e| format!("Failed to send notification: {}", e))?;

        Ok(())
    }
}

/// Send a notice in the background (non-blocking).
///
/// Spawns a tokio task to send the notice and logs errors.
pub fn send_notification_async(
    runtime_handle: &tokio::runtime::Handle,
    notifier: Arc<dyn Notifier>,
    notice: Notice,
) -> tokio::task::JoinHandle<()> {
    runtime_handle.spawn(async move {
        if let Err(e) = notifier.notify(&notice).await {
            log::warn!("Failed to send notification: {}", e);
        }
    })
}
