//! Offer push notifications
//!
//! Delivery transport (email/SMS/push routing) is owned by an external
//! service; the dispatcher only decides what to send and when. Delivery is
//! best-effort and fire-and-forget: an offer is valid even if its
//! notification never arrives, since agents also see pending offers by
//! polling.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::NotificationConfig;
use crate::error::{Result, RooftopError};

/// One offer push to one agent.
#[derive(Debug, Clone, Serialize)]
pub struct OfferNotification {
    pub agent_id: String,
    pub property_id: String,
    pub offer_id: Uuid,
    pub round: i32,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Best-effort delivery; failures are logged by the implementation and
    /// never propagated to the offer-creation path.
    async fn notify(&self, notification: OfferNotification);
}

/// Log-only notifier: used in dry-run mode and when no webhook is
/// configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: OfferNotification) {
        info!(
            agent_id = %notification.agent_id,
            property_id = %notification.property_id,
            offer_id = %notification.offer_id,
            round = notification.round,
            expires_at = %notification.expires_at,
            "Offer notification (log-only)"
        );
    }
}

/// Webhook notifier posting offer pushes to the delivery service.
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: String, timeout_ms: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            client,
            webhook_url,
        }
    }

    async fn deliver(&self, notification: &OfferNotification) -> Result<()> {
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(notification)
            .send()
            .await
            .map_err(|e| RooftopError::NotificationDelivery(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(RooftopError::NotificationDelivery(format!(
                "delivery service returned {}",
                resp.status()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: OfferNotification) {
        match self.deliver(&notification).await {
            Ok(()) => {
                debug!(offer_id = %notification.offer_id, "Offer notification delivered");
            }
            Err(e) => {
                warn!(offer_id = %notification.offer_id, "{}", e);
            }
        }
    }
}

/// Build a notifier from config: webhook when configured, log-only
/// otherwise.
pub fn from_config(config: &NotificationConfig) -> Arc<dyn Notifier> {
    match &config.webhook_url {
        Some(url) => {
            info!("Offer notifications via webhook: {}", url);
            Arc::new(WebhookNotifier::new(url.clone(), config.timeout_ms))
        }
        None => Arc::new(LogNotifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification() -> OfferNotification {
        OfferNotification {
            agent_id: "agent-a".to_string(),
            property_id: "prop-1".to_string(),
            offer_id: Uuid::new_v4(),
            round: 1,
            expires_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_a_delivery_error() {
        // Nothing listens on this port; the connection is refused.
        let notifier = WebhookNotifier::new("http://127.0.0.1:1/hooks".to_string(), 200);

        let err = notifier.deliver(&notification()).await.unwrap_err();
        assert!(matches!(err, RooftopError::NotificationDelivery(_)));
    }

    #[tokio::test]
    async fn test_notify_swallows_delivery_failure() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:1/hooks".to_string(), 200);

        // Best-effort contract: the failure is logged, never surfaced.
        notifier.notify(notification()).await;
    }
}
