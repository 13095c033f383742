use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use super::domain::{
    AlertPriority, AlertType, ApplicantId, NewAlert, PaymentRecord, PaymentRecordStatus,
};
use super::payments::{ensure_within_limit, PaymentConfirmation, PaymentService, PaymentStatus};
use super::service::{report_side_effect_failure, LicensingError};

/// Error enumeration for payment gateway clients.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Request(String),
    #[error("gateway returned an unreadable payload: {0}")]
    Malformed(String),
}

/// Payment state as reported by the gateway for one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayPayment {
    pub reference: String,
    pub transaction_id: Option<String>,
    pub status: PaymentRecordStatus,
    pub amount: Option<Decimal>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Client for pulling payment state from the external gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn payment_status(&self, reference: &str)
        -> Result<Option<GatewayPayment>, GatewayError>;
}

/// Gateway client for deployments that rely on webhooks only.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineGateway;

#[async_trait]
impl PaymentGateway for OfflineGateway {
    async fn payment_status(
        &self,
        _reference: &str,
    ) -> Result<Option<GatewayPayment>, GatewayError> {
        Ok(None)
    }
}

/// Gateway callback announcing a settled payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmed {
    pub reference: String,
    pub transaction_id: Option<String>,
    pub status: String,
    pub amount: Decimal,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Gateway callback announcing a failed payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentFailed {
    pub reference: String,
    pub transaction_id: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationOutcome {
    pub reference: String,
    pub applicant_id: Option<ApplicantId>,
    pub payment_status: PaymentRecordStatus,
    /// The reference was already known before this callback.
    pub replayed: bool,
    /// The callback was acknowledged without changing the ledger.
    pub ignored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applicant_payment: Option<PaymentStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PsidState {
    Confirmed,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PsidCheck {
    pub payment_confirmed: bool,
    pub status: PsidState,
}

impl PsidCheck {
    fn from_confirmed(confirmed: bool) -> Self {
        Self {
            payment_confirmed: confirmed,
            status: if confirmed {
                PsidState::Confirmed
            } else {
                PsidState::Pending
            },
        }
    }
}

/// Merges asynchronous gateway callbacks into the payment ledger.
///
/// Confirmations go through the same routine as manually recorded payments. Every
/// handler is keyed by the gateway reference, so retries and concurrent deliveries of one
/// callback converge on a single record.
pub struct GatewayReconciler {
    payments: Arc<PaymentService>,
    gateway: Arc<dyn PaymentGateway>,
}

impl GatewayReconciler {
    pub fn new(payments: Arc<PaymentService>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { payments, gateway }
    }

    pub async fn payment_confirmed(
        &self,
        event: PaymentConfirmed,
    ) -> Result<ReconciliationOutcome, LicensingError> {
        let reference = event.reference.trim().to_string();
        if reference.is_empty() {
            return Err(LicensingError::validation("PSID number is required"));
        }
        if event.amount < Decimal::ZERO {
            return Err(LicensingError::validation("amount cannot be negative"));
        }
        ensure_within_limit(event.amount, "amount")?;

        let result = self
            .payments
            .apply_confirmed_payment(PaymentConfirmation {
                reference,
                applicant_id: None,
                transaction_id: normalize(event.transaction_id),
                amount: event.amount,
                paid_at: event.paid_at.unwrap_or_else(Utc::now),
            })
            .await;

        match result {
            Ok(applied) => {
                let outcome = if applied.replayed { "replayed" } else { "applied" };
                record_callback("confirmed", outcome);
                info!(
                    reference = %applied.record.external_reference,
                    gateway_status = %event.status,
                    replayed = applied.replayed,
                    "gateway confirmation reconciled"
                );
                Ok(ReconciliationOutcome {
                    reference: applied.record.external_reference,
                    applicant_id: applied.record.applicant_id,
                    payment_status: applied.record.payment_status,
                    replayed: applied.replayed,
                    ignored: false,
                    applicant_payment: applied.status,
                })
            }
            Err(error) => {
                record_callback("confirmed", "error");
                Err(error)
            }
        }
    }

    /// Marks the reference failed. A failure reported after the payment settled is
    /// acknowledged and ignored.
    pub async fn payment_failed(
        &self,
        event: PaymentFailed,
    ) -> Result<ReconciliationOutcome, LicensingError> {
        let reference = event.reference.trim().to_string();
        if reference.is_empty() {
            return Err(LicensingError::validation("PSID number is required"));
        }

        let result = self.apply_failure(&reference, event).await;
        match &result {
            Ok(outcome) if outcome.ignored => record_callback("failed", "ignored"),
            Ok(outcome) if outcome.replayed => record_callback("failed", "replayed"),
            Ok(_) => record_callback("failed", "applied"),
            Err(_) => record_callback("failed", "error"),
        }
        let outcome = result?;

        if let (false, Some(applicant_id)) = (outcome.ignored, outcome.applicant_id) {
            self.payments
                .alerts()
                .notify(NewAlert {
                    applicant_id,
                    title: "Payment failed".to_string(),
                    message: format!(
                        "Payment against PSID {} could not be completed. Please retry.",
                        outcome.reference
                    ),
                    alert_type: AlertType::PaymentFailed,
                    priority: AlertPriority::High,
                    channels: Vec::new(),
                })
                .await;
        }
        Ok(outcome)
    }

    /// Reports whether the reference is paid, pulling from the gateway when the local
    /// record is not settled yet. A settled remote status is reconciled locally.
    pub async fn check_psid_payment_status(
        &self,
        reference: &str,
    ) -> Result<PsidCheck, LicensingError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(LicensingError::validation("PSID number is required"));
        }
        if self.payments.verify_psid_payment(reference).await? {
            return Ok(PsidCheck::from_confirmed(true));
        }

        let remote = match self.gateway.payment_status(reference).await {
            Ok(Some(remote)) if remote.status.is_settled() => remote,
            Ok(_) => return Ok(PsidCheck::from_confirmed(false)),
            Err(error) => {
                report_side_effect_failure("gateway_status_pull", None, &error);
                return Ok(PsidCheck::from_confirmed(false));
            }
        };

        let local = self
            .payments
            .ledger()
            .payments
            .payment_by_reference(reference)
            .await?;
        let Some(amount) = remote
            .amount
            .or_else(|| local.map(|record| record.amount_within_due_date))
        else {
            warn!(reference, "gateway reports payment without amount; leaving pending");
            return Ok(PsidCheck::from_confirmed(false));
        };

        self.payment_confirmed(PaymentConfirmed {
            reference: reference.to_string(),
            transaction_id: remote.transaction_id,
            status: remote.status.label().to_string(),
            amount,
            paid_at: remote.paid_at,
        })
        .await?;
        Ok(PsidCheck::from_confirmed(true))
    }

    async fn apply_failure(
        &self,
        reference: &str,
        event: PaymentFailed,
    ) -> Result<ReconciliationOutcome, LicensingError> {
        let _guard = self
            .payments
            .reference_locks()
            .acquire(&reference.to_string())
            .await;
        let ledger = self.payments.ledger();
        let existing = ledger.payments.payment_by_reference(reference).await?;
        let replayed = existing.is_some();

        let record = match existing {
            Some(record) if record.payment_status.is_settled() => {
                warn!(
                    reference,
                    status = record.payment_status.label(),
                    "failure reported for a settled payment; ignoring"
                );
                return Ok(ReconciliationOutcome {
                    reference: record.external_reference,
                    applicant_id: record.applicant_id,
                    payment_status: record.payment_status,
                    replayed,
                    ignored: true,
                    applicant_payment: None,
                });
            }
            Some(mut record) => {
                record.payment_status = PaymentRecordStatus::Failed;
                record.failure_reason = normalize(event.reason).or(record.failure_reason);
                record.external_transaction_id =
                    normalize(event.transaction_id).or(record.external_transaction_id);
                record.updated_at = Utc::now();
                record
            }
            None => PaymentRecord {
                applicant_id: None,
                external_reference: reference.to_string(),
                external_transaction_id: normalize(event.transaction_id),
                amount_within_due_date: Decimal::ZERO,
                amount_paid: None,
                payment_status: PaymentRecordStatus::Failed,
                failure_reason: normalize(event.reason),
                paid_at: None,
                updated_at: Utc::now(),
            },
        };

        let record = ledger.payments.upsert_payment(record).await?;
        info!(
            reference,
            applicant_id = record.applicant_id.map(|id| id.0),
            reason = record.failure_reason.as_deref().unwrap_or("unspecified"),
            "gateway failure recorded"
        );
        Ok(ReconciliationOutcome {
            reference: record.external_reference,
            applicant_id: record.applicant_id,
            payment_status: record.payment_status,
            replayed,
            ignored: false,
            applicant_payment: None,
        })
    }
}

fn record_callback(kind: &'static str, outcome: &'static str) {
    metrics::counter!(
        "licensing_gateway_callbacks_total",
        "kind" => kind,
        "outcome" => outcome
    )
    .increment(1);
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
