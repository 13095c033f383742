use async_trait::async_trait;
use licensing_engine::error::AppError;
use licensing_engine::workflows::licensing::{
    Alert, AlertChannel, ChannelError, InMemoryLedger, LedgerSnapshot, NotificationSender,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Sender that records outbound alerts in the service log instead of calling a provider.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoggingSender {
    channel: AlertChannel,
}

impl LoggingSender {
    pub(crate) fn new(channel: AlertChannel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl NotificationSender for LoggingSender {
    async fn send(&self, address: &str, alert: &Alert) -> Result<(), ChannelError> {
        if address.trim().is_empty() {
            return Err(ChannelError::MissingAddress(self.channel));
        }
        info!(
            channel = %self.channel,
            address,
            alert_id = alert.id.0,
            applicant_id = alert.applicant_id.0,
            title = %alert.title,
            "alert delivered"
        );
        Ok(())
    }
}

pub(crate) fn external_channels() -> [AlertChannel; 3] {
    [AlertChannel::Email, AlertChannel::Sms, AlertChannel::WhatsApp]
}

pub(crate) fn parse_snapshot(raw: &str) -> Result<LedgerSnapshot, AppError> {
    Ok(serde_json::from_str(raw)?)
}

/// Loads the ledger from a snapshot file, or starts empty when no path is given.
pub(crate) async fn load_ledger(path: Option<&Path>) -> Result<InMemoryLedger, AppError> {
    let Some(path) = path else {
        return Ok(InMemoryLedger::new());
    };
    let raw = tokio::fs::read_to_string(path).await?;
    let snapshot = parse_snapshot(&raw)?;
    info!(
        path = %path.display(),
        applicants = snapshot.applicants.len(),
        payments = snapshot.payments.len(),
        "ledger snapshot loaded"
    );
    Ok(InMemoryLedger::from_snapshot(snapshot).await)
}
