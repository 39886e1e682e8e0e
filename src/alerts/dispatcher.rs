//! Alert fan-out to stored notifications and registered sinks.
//!
//! Every dispatch is stored as an unread notification first, so the read side
//! never depends on a sink being reachable. Sinks are best-effort.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use super::types::{AlertCategory, AlertSubscription, Notification};
use crate::error::Result;
use crate::persistence::Store;
use crate::utils::new_id;

/// Categories an owner may subscribe to.
pub const SUBSCRIBABLE: [AlertCategory; 3] = [
    AlertCategory::ApyDrop,
    AlertCategory::ArbOpportunity,
    AlertCategory::PositionHealth,
];

/// Outbound delivery channel (chat bot, webhook, log).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, notification: &Notification) -> Result<()>;
}

/// Writes each notification as one JSON line on the `alert` target.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, notification: &Notification) -> Result<()> {
        let line = serde_json::to_string(notification)?;
        info!(target: "alert", "{}", line);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertSetting {
    pub success: bool,
    pub message: String,
    pub subscription: Option<AlertSubscription>,
}

pub struct AlertDispatcher {
    store: Arc<Store>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    notification_limit: usize,
}

impl AlertDispatcher {
    pub fn new(store: Arc<Store>, notification_limit: usize) -> Self {
        Self {
            store,
            sinks: Vec::new(),
            notification_limit,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Store a notification for `owner`, forward it to every sink and stamp
    /// the owner's matching subscription.
    pub async fn dispatch(&self, owner: &str, category: AlertCategory, message: &str) -> Result<Notification> {
        let notification = Notification {
            id: new_id("ntf"),
            owner_id: owner.to_string(),
            category,
            message: message.to_string(),
            read: false,
            created_at: Utc::now(),
        };
        self.store.insert_notification(&notification)?;

        for sink in &self.sinks {
            if let Err(e) = sink.deliver(&notification).await {
                warn!(sink = sink.name(), %owner, %category, error = %e, "Alert delivery failed");
            }
        }

        let matching = self
            .store
            .subscriptions(owner)?
            .into_iter()
            .find(|s| s.category == category && s.active);
        if let Some(subscription) = matching {
            self.store.mark_triggered(&subscription.id, notification.created_at)?;
        }

        info!(%owner, %category, "Alert dispatched");
        Ok(notification)
    }

    /// Dispatch to every owner with an active subscription for `category`.
    /// Returns the number of owners reached.
    pub async fn broadcast(&self, category: AlertCategory, message: &str) -> Result<usize> {
        let subscribers = self.store.subscribers(category)?;
        for subscription in &subscribers {
            self.dispatch(&subscription.owner_id, category, message).await?;
        }
        if !subscribers.is_empty() {
            info!(%category, owners = subscribers.len(), "Alert broadcast");
        }
        Ok(subscribers.len())
    }

    /// Enable or disable an alert category for `owner`.
    pub fn set_alert(
        &self,
        owner: &str,
        category: &str,
        active: bool,
        threshold: Option<Decimal>,
    ) -> Result<AlertSetting> {
        let parsed = AlertCategory::from_str(category)
            .ok()
            .filter(|c| SUBSCRIBABLE.contains(c));
        let Some(category) = parsed else {
            let valid: Vec<&str> = SUBSCRIBABLE.iter().map(|c| c.as_str()).collect();
            return Ok(AlertSetting {
                success: false,
                message: format!("Invalid alert type. Valid types: {}", valid.join(", ")),
                subscription: None,
            });
        };

        let subscription = self.store.upsert_subscription(owner, category, active, threshold)?;
        info!(%owner, %category, active, threshold = ?threshold, "Alert subscription updated");

        let threshold_note = threshold
            .map(|t| format!(" (threshold: {})", t.normalize()))
            .unwrap_or_default();
        Ok(AlertSetting {
            success: true,
            message: format!(
                "Alert \"{}\" {}{}.",
                category,
                if active { "enabled" } else { "disabled" },
                threshold_note
            ),
            subscription: Some(subscription),
        })
    }

    /// The owner's subscriptions.
    pub fn alerts(&self, owner: &str) -> Result<Vec<AlertSubscription>> {
        self.store.subscriptions(owner)
    }

    /// Active threshold the owner set for `category`, if any.
    pub fn threshold(&self, owner: &str, category: AlertCategory) -> Result<Option<Decimal>> {
        Ok(self
            .store
            .subscriptions(owner)?
            .into_iter()
            .find(|s| s.category == category && s.active)
            .and_then(|s| s.threshold))
    }

    pub fn unread(&self, owner: &str) -> Result<Vec<Notification>> {
        self.store.notifications(owner, true, self.notification_limit)
    }

    pub fn notifications(&self, owner: &str) -> Result<Vec<Notification>> {
        self.store.notifications(owner, false, self.notification_limit)
    }

    /// Mark all unread notifications read; returns how many changed.
    pub fn mark_read(&self, owner: &str) -> Result<usize> {
        self.store.mark_read(owner)
    }
}
