use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::format::Notification;

/// Where rendered notifications go. The production sink shells out to
/// `notify-send`; tests substitute a recording implementation.
#[async_trait(?Send)]
pub trait NotificationSink {
    async fn notify(&self, message: &Notification, icon: Option<&Path>) -> Result<()>;
}

/// Spawns `notify-send`, fire-and-forget.
pub struct NotifySendSink {
    display_timeout_ms: u64,
}

impl NotifySendSink {
    pub fn new(display_timeout_ms: u64) -> Self {
        Self { display_timeout_ms }
    }
}

#[async_trait(?Send)]
impl NotificationSink for NotifySendSink {
    async fn notify(&self, message: &Notification, icon: Option<&Path>) -> Result<()> {
        let mut command = Command::new("notify-send");
        command
            .arg(&message.summary)
            .arg(&message.body)
            .arg("-t")
            .arg(self.display_timeout_ms.to_string());
        if let Some(icon) = icon {
            command.arg("-i").arg(icon);
        }
        command.spawn().context("failed to spawn notify-send")?;
        debug!(summary = %message.summary, "notification sent");
        Ok(())
    }
}
