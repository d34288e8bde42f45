//! Status event filter and router.
//!
//! A stateless per-event transform: terminal statuses become exactly one
//! [`Notification`] on the configured channel, everything else is ignored.
//! Duplicates in produce duplicates out; ordering is whatever the upstream
//! stream delivers.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::{JobStatusEvent, Notification, PublishError};

/// Outbound channel for job notifications.
///
/// Fan-out to subscribers is the channel's concern.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn publish(&self, notification: &Notification) -> Result<(), PublishError>;
}

/// What happened to one status event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Terminal status; the notification was accepted by the channel.
    Published(Notification),
    /// Non-terminal status; no side effect.
    Ignored,
    /// Terminal status, but the channel refused it. The notification is lost.
    Dropped {
        notification: Notification,
        error: PublishError,
    },
}

pub struct EventRouter {
    channel: Arc<dyn NotificationChannel>,
}

impl EventRouter {
    pub fn new(channel: Arc<dyn NotificationChannel>) -> Self {
        Self { channel }
    }

    /// Filters and forwards one status event. Never fails: publish errors are
    /// logged and reported as [`RouteOutcome::Dropped`].
    #[instrument(skip_all, fields(job_id = %event.job_id, status = %event.status))]
    pub async fn on_job_status_event(&self, event: &JobStatusEvent) -> RouteOutcome {
        let Some(notification) = Notification::from_terminal(event) else {
            debug!("Non-terminal status ignored");
            return RouteOutcome::Ignored;
        };

        match self.channel.publish(&notification).await {
            Ok(()) => {
                info!("Notification published");
                RouteOutcome::Published(notification)
            }
            Err(error) => {
                warn!(error = %error, "Notification publish failed; dropping");
                RouteOutcome::Dropped {
                    notification,
                    error,
                }
            }
        }
    }
}
