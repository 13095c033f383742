use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::domain::{
    Alert, AlertChannel, AlertId, AlertRecipient, AlertStatus, ApplicantId, ChannelDelivery,
    NewAlert,
};
use super::ledger::{AlertRepository, ApplicantRepository};
use super::service::{report_side_effect_failure, LicensingError};
use crate::config::AlertDeliveryMode;

/// Error enumeration for outbound transport failures.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("recipient has no address for {0}")]
    MissingAddress(AlertChannel),
    #[error("no sender registered for {0}")]
    Unavailable(AlertChannel),
    #[error("transport failed: {0}")]
    Transport(String),
}

/// Outbound transport for one external channel (email, SMS, WhatsApp).
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, address: &str, alert: &Alert) -> Result<(), ChannelError>;
}

/// Outcome of a send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertDispatchReport {
    pub alert_id: AlertId,
    pub status: AlertStatus,
    pub deliveries: Vec<ChannelDelivery>,
}

/// Persists alerts and fans them out to the applicant's verified channels.
pub struct AlertDispatcher {
    store: Arc<dyn AlertRepository>,
    applicants: Arc<dyn ApplicantRepository>,
    mode: AlertDeliveryMode,
    senders: HashMap<AlertChannel, Arc<dyn NotificationSender>>,
}

impl AlertDispatcher {
    pub fn new(
        store: Arc<dyn AlertRepository>,
        applicants: Arc<dyn ApplicantRepository>,
        mode: AlertDeliveryMode,
    ) -> Self {
        Self {
            store,
            applicants,
            mode,
            senders: HashMap::new(),
        }
    }

    pub fn with_sender(
        mut self,
        channel: AlertChannel,
        sender: Arc<dyn NotificationSender>,
    ) -> Self {
        self.senders.insert(channel, sender);
        self
    }

    /// Persists the alert as pending and sends it when channels were requested. A failed
    /// send is logged; the stored alert is returned either way.
    pub async fn create_alert(&self, event: NewAlert) -> Result<Alert, LicensingError> {
        if event.title.trim().is_empty() {
            return Err(LicensingError::validation("alert title is required"));
        }
        if event.message.trim().is_empty() {
            return Err(LicensingError::validation("alert message is required"));
        }
        self.ensure_applicant(event.applicant_id).await?;

        let requested = event.channels.clone();
        let alert = self.store.insert_alert(event).await?;
        info!(
            alert_id = alert.id.0,
            applicant_id = alert.applicant_id.0,
            alert_type = ?alert.alert_type,
            "alert created"
        );
        if requested.is_empty() {
            return Ok(alert);
        }

        if let Err(error) = self.send_alert(alert.id, &requested).await {
            warn!(alert_id = alert.id.0, error = %error, "alert send failed after creation");
        }
        let stored = self.store.alert(alert.id).await?;
        Ok(stored.unwrap_or(alert))
    }

    /// Sends an alert over the requested channels, or the channels it was created with
    /// when none are given.
    pub async fn send_alert(
        &self,
        alert_id: AlertId,
        channels: &[AlertChannel],
    ) -> Result<AlertDispatchReport, LicensingError> {
        let mut alert = self
            .store
            .alert(alert_id)
            .await?
            .ok_or_else(|| LicensingError::not_found("alert", alert_id))?;
        let requested = if channels.is_empty() {
            alert.channels.clone()
        } else {
            channels.to_vec()
        };

        let recipient = self
            .store
            .recipient(alert.applicant_id)
            .await?
            .ok_or_else(|| LicensingError::not_found("alert recipient", alert.applicant_id))?;
        let mut valid: Vec<AlertChannel> = Vec::new();
        for channel in requested {
            if recipient.accepts(channel) && !valid.contains(&channel) {
                valid.push(channel);
            }
        }
        if valid.is_empty() {
            return Err(LicensingError::NoValidChannels(alert_id));
        }

        let mut deliveries = Vec::with_capacity(valid.len());
        for channel in &valid {
            let outcome = self.deliver(*channel, &recipient, &alert).await;
            let failed = outcome.is_err();
            deliveries.push(ChannelDelivery {
                channel: *channel,
                success: !failed,
                error: outcome.err().map(|error| error.to_string()),
            });
            if failed && self.mode == AlertDeliveryMode::FailFast {
                break;
            }
        }

        let any_failed = deliveries.iter().any(|delivery| !delivery.success);
        let any_succeeded = deliveries.iter().any(|delivery| delivery.success);
        let status = match self.mode {
            AlertDeliveryMode::FailFast if any_failed => AlertStatus::Failed,
            _ if any_succeeded => AlertStatus::Sent,
            _ => AlertStatus::Failed,
        };

        if any_failed {
            alert.retry_count += 1;
        }
        if status == AlertStatus::Sent {
            alert.sent_at = Some(Utc::now());
        }
        alert.status = status;
        alert.channels = valid;
        alert.deliveries = deliveries.clone();
        self.store.save_alert(alert).await?;

        info!(alert_id = alert_id.0, status = ?status, "alert dispatched");
        Ok(AlertDispatchReport {
            alert_id,
            status,
            deliveries,
        })
    }

    /// Raises a domain-event alert over the applicant's preferred channels. Never fails
    /// the caller.
    pub async fn notify(&self, mut event: NewAlert) {
        let applicant_id = event.applicant_id;
        if event.channels.is_empty() {
            match self.store.recipient(applicant_id).await {
                Ok(Some(recipient)) => event.channels = recipient.preferred_channels,
                Ok(None) => {}
                Err(error) => {
                    report_side_effect_failure("alert_notify", Some(applicant_id), &error);
                    return;
                }
            }
        }
        if let Err(error) = self.create_alert(event).await {
            report_side_effect_failure("alert_notify", Some(applicant_id), &error);
        }
    }

    pub async fn applicant_alerts(
        &self,
        applicant_id: ApplicantId,
        unread_only: bool,
    ) -> Result<Vec<Alert>, LicensingError> {
        self.ensure_applicant(applicant_id).await?;
        let alerts = self.store.alerts_for(applicant_id).await?;
        Ok(alerts
            .into_iter()
            .filter(|alert| !unread_only || !alert.is_read)
            .collect())
    }

    pub async fn unread_count(&self, applicant_id: ApplicantId) -> Result<usize, LicensingError> {
        self.ensure_applicant(applicant_id).await?;
        let alerts = self.store.alerts_for(applicant_id).await?;
        Ok(alerts.iter().filter(|alert| !alert.is_read).count())
    }

    /// Marks one alert read. Marking an already read alert returns it unchanged.
    pub async fn mark_as_read(&self, alert_id: AlertId) -> Result<Alert, LicensingError> {
        let alert = self
            .store
            .alert(alert_id)
            .await?
            .ok_or_else(|| LicensingError::not_found("alert", alert_id))?;
        if alert.is_read {
            return Ok(alert);
        }
        let alert = read(alert);
        self.store.save_alert(alert.clone()).await?;
        Ok(alert)
    }

    /// Marks the given alerts of one applicant read, or all of them when `ids` is empty.
    /// Returns how many alerts changed state.
    pub async fn mark_many_as_read(
        &self,
        applicant_id: ApplicantId,
        ids: &[AlertId],
    ) -> Result<usize, LicensingError> {
        self.ensure_applicant(applicant_id).await?;
        let mut changed = 0;
        for alert in self.store.alerts_for(applicant_id).await? {
            if alert.is_read || !(ids.is_empty() || ids.contains(&alert.id)) {
                continue;
            }
            self.store.save_alert(read(alert)).await?;
            changed += 1;
        }
        Ok(changed)
    }

    pub async fn recipient(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<Option<AlertRecipient>, LicensingError> {
        self.ensure_applicant(applicant_id).await?;
        Ok(self.store.recipient(applicant_id).await?)
    }

    pub async fn save_recipient(&self, recipient: AlertRecipient) -> Result<(), LicensingError> {
        self.ensure_applicant(recipient.applicant_id).await?;
        self.store.save_recipient(recipient).await?;
        Ok(())
    }

    async fn ensure_applicant(&self, applicant_id: ApplicantId) -> Result<(), LicensingError> {
        self.applicants
            .applicant(applicant_id)
            .await?
            .map(|_| ())
            .ok_or_else(|| LicensingError::not_found("applicant", applicant_id))
    }

    async fn deliver(
        &self,
        channel: AlertChannel,
        recipient: &AlertRecipient,
        alert: &Alert,
    ) -> Result<(), ChannelError> {
        let address = match channel {
            AlertChannel::InApp => return Ok(()),
            AlertChannel::Email => recipient.email.as_deref(),
            AlertChannel::Sms => recipient.phone.as_deref(),
            AlertChannel::WhatsApp => recipient
                .whatsapp
                .as_deref()
                .or(recipient.phone.as_deref()),
        }
        .filter(|address| !address.trim().is_empty())
        .ok_or(ChannelError::MissingAddress(channel))?;

        let sender = self
            .senders
            .get(&channel)
            .ok_or(ChannelError::Unavailable(channel))?;
        let result = sender.send(address, alert).await;
        if let Err(error) = &result {
            warn!(
                alert_id = alert.id.0,
                channel = %channel,
                error = %error,
                "channel delivery failed"
            );
        }
        result
    }
}

fn read(mut alert: Alert) -> Alert {
    alert.is_read = true;
    alert.status = AlertStatus::Read;
    alert.read_at = Some(Utc::now());
    alert
}
