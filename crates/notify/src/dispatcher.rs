//! Fans a notification out to every configured channel.
//!
//! Channel failures are logged and reported but never block the other
//! channels. [`Dispatcher::send_detached`] lets a synchronous caller fire
//! notifications without waiting for delivery.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use blockflow_core::FlowConfig;

use crate::telegram::TelegramNotifier;
use crate::traits::{Notification, Notifier, NotifyError};

/// Outcome of delivering one notification through one channel.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub channel: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Delivers notifications to a fixed set of channels.
#[derive(Clone, Default)]
pub struct Dispatcher {
    channels: Vec<Arc<dyn Notifier>>,
}

impl Dispatcher {
    pub fn new(channels: Vec<Arc<dyn Notifier>>) -> Self {
        Self { channels }
    }

    /// Build the channels named by the notification settings.
    pub fn from_config(config: &FlowConfig) -> Result<Self, NotifyError> {
        let mut channels: Vec<Arc<dyn Notifier>> = Vec::new();
        if let Some(telegram) = TelegramNotifier::from_settings(&config.notifications.telegram)? {
            channels.push(Arc::new(telegram));
        }
        Ok(Self { channels })
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.channel_name()).collect()
    }

    /// Deliver to every channel in order, collecting per-channel results.
    pub async fn dispatch(&self, notification: &Notification) -> Vec<DispatchResult> {
        if self.channels.is_empty() {
            tracing::debug!("No notification channels configured");
            return Vec::new();
        }

        let mut results = Vec::with_capacity(self.channels.len());

        for channel in &self.channels {
            let start = Instant::now();
            let result = channel.send(notification).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let (success, error) = match result {
                Ok(()) => {
                    tracing::info!(
                        channel = channel.channel_name(),
                        duration_ms,
                        "Notification delivered"
                    );
                    (true, None)
                }
                Err(e) => {
                    tracing::warn!(
                        channel = channel.channel_name(),
                        error = %e,
                        duration_ms,
                        "Notification delivery failed"
                    );
                    (false, Some(e.to_string()))
                }
            };

            results.push(DispatchResult {
                channel: channel.channel_name().to_string(),
                success,
                error,
                duration_ms,
            });
        }

        results
    }

    /// Deliver on a background thread after `delay`.
    ///
    /// The caller does not wait for delivery. Returns `None` when no
    /// channel is configured.
    pub fn send_detached(
        &self,
        notification: Notification,
        delay: Duration,
    ) -> Option<JoinHandle<Vec<DispatchResult>>> {
        if self.channels.is_empty() {
            return None;
        }
        let dispatcher = self.clone();

        let spawned = std::thread::Builder::new()
            .name("blockflow-notify".into())
            .spawn(move || {
                std::thread::sleep(delay);
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        tracing::warn!(error = %e, "could not start notification runtime");
                        return Vec::new();
                    }
                };
                runtime.block_on(dispatcher.dispatch(&notification))
            });

        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, "could not spawn notification thread");
                None
            }
        }
    }
}
