use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::alerts::AlertDispatcher;
use super::domain::{
    AlertPriority, AlertType, ApplicantId, Fee, NewAlert, NewFee, PaymentRecord,
    PaymentRecordStatus, ReviewGroup,
};
use super::ledger::Ledger;
use super::license::LicenseIssuer;
use super::locks::KeyedLocks;
use super::service::LicensingError;
use crate::config::LicensingConfig;

const SECONDS_PER_DAY: i64 = 86_400;

/// Largest single amount (PKR 1,000,000,000,000) accepted for a fee, invoice or payment.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xD4A5_1000, 0xE8, 0, false, 0);

pub(crate) fn ensure_within_limit(amount: Decimal, what: &str) -> Result<(), LicensingError> {
    if amount > MAX_AMOUNT {
        return Err(LicensingError::validation(format!(
            "{what} cannot exceed {MAX_AMOUNT}"
        )));
    }
    Ok(())
}

/// Headline payment state, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    Paid,
    Partial,
    Overdue,
    Pending,
}

/// Derived payment position of one applicant. Always computed from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatus {
    pub applicant_id: ApplicantId,
    pub total_due: Decimal,
    pub total_paid: Decimal,
    pub remaining_balance: Decimal,
    pub is_paid: bool,
    pub is_partially_paid: bool,
    pub next_due_date: DateTime<Utc>,
    pub days_overdue: i64,
    pub status: PaymentState,
    pub payment_percentage: u32,
}

impl PaymentStatus {
    /// Aggregates fee obligations against settled payment records as of `now`. Totals
    /// saturate instead of overflowing.
    pub fn compute(
        applicant_id: ApplicantId,
        fees: &[Fee],
        payments: &[PaymentRecord],
        now: DateTime<Utc>,
        due_window_days: i64,
    ) -> Self {
        let total_due = fees
            .iter()
            .fold(Decimal::ZERO, |total, fee| total.saturating_add(fee.amount));
        let settled: Vec<&PaymentRecord> = payments
            .iter()
            .filter(|record| record.payment_status.is_settled())
            .collect();
        let total_paid = settled.iter().fold(Decimal::ZERO, |total, record| {
            total.saturating_add(record.credited_amount())
        });

        let remaining_balance = total_due.saturating_sub(total_paid).max(Decimal::ZERO);
        let is_paid = remaining_balance <= Decimal::ZERO;
        let is_partially_paid = total_paid > Decimal::ZERO && !is_paid;

        let last_payment = settled
            .iter()
            .map(|record| record.paid_at.unwrap_or(record.updated_at))
            .max();
        let next_due_date = last_payment.unwrap_or(now) + Duration::days(due_window_days);

        let days_overdue = if is_paid || now <= next_due_date {
            0
        } else {
            let seconds = (now - next_due_date).num_seconds();
            (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
        };

        let status = if is_paid {
            PaymentState::Paid
        } else if is_partially_paid {
            PaymentState::Partial
        } else if days_overdue > 0 {
            PaymentState::Overdue
        } else {
            PaymentState::Pending
        };

        let payment_percentage = if total_due.is_zero() || is_paid {
            100
        } else {
            total_paid
                .checked_div(total_due)
                .and_then(|share| share.checked_mul(Decimal::ONE_HUNDRED))
                .and_then(|percent| {
                    percent
                        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                        .to_u32()
                })
                .unwrap_or(0)
                .min(100)
        };

        Self {
            applicant_id,
            total_due,
            total_paid,
            remaining_balance,
            is_paid,
            is_partially_paid,
            next_due_date,
            days_overdue,
            status,
            payment_percentage,
        }
    }
}

/// A settled payment as reported by a reviewer or by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    pub reference: String,
    pub applicant_id: Option<ApplicantId>,
    pub transaction_id: Option<String>,
    pub amount: Decimal,
    pub paid_at: DateTime<Utc>,
}

/// Result of applying a confirmation to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPayment {
    pub record: PaymentRecord,
    pub replayed: bool,
    /// Present when the record is linked to a known applicant.
    pub status: Option<PaymentStatus>,
}

/// Payment status engine plus the single "apply confirmed payment" routine shared by
/// manual payment entry and gateway reconciliation.
pub struct PaymentService {
    ledger: Ledger,
    config: LicensingConfig,
    applicant_locks: Arc<KeyedLocks<ApplicantId>>,
    reference_locks: KeyedLocks<String>,
    licenses: Arc<LicenseIssuer>,
    alerts: Arc<AlertDispatcher>,
}

impl PaymentService {
    pub fn new(
        ledger: Ledger,
        config: LicensingConfig,
        applicant_locks: Arc<KeyedLocks<ApplicantId>>,
        licenses: Arc<LicenseIssuer>,
        alerts: Arc<AlertDispatcher>,
    ) -> Self {
        Self {
            ledger,
            config,
            applicant_locks,
            reference_locks: KeyedLocks::new(),
            licenses,
            alerts,
        }
    }

    pub async fn payment_status(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<PaymentStatus, LicensingError> {
        self.ledger
            .applicants
            .applicant(applicant_id)
            .await?
            .ok_or_else(|| LicensingError::not_found("applicant", applicant_id))?;
        self.compute_status(applicant_id).await
    }

    /// Records a manually reported payment and settles the applicant when dues are met.
    pub async fn record_payment(
        &self,
        applicant_id: ApplicantId,
        amount: Decimal,
        reference: &str,
    ) -> Result<PaymentStatus, LicensingError> {
        if amount <= Decimal::ZERO {
            return Err(LicensingError::validation("amount must be greater than zero"));
        }
        ensure_within_limit(amount, "amount")?;
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(LicensingError::validation("reference number is required"));
        }
        self.ledger
            .applicants
            .applicant(applicant_id)
            .await?
            .ok_or_else(|| LicensingError::not_found("applicant", applicant_id))?;

        let applied = self
            .apply_confirmed_payment(PaymentConfirmation {
                reference: reference.to_string(),
                applicant_id: Some(applicant_id),
                transaction_id: None,
                amount,
                paid_at: Utc::now(),
            })
            .await?;

        match applied.status {
            Some(status) => Ok(status),
            None => self.compute_status(applicant_id).await,
        }
    }

    /// True when the record for `reference` carries a settled gateway status.
    pub async fn verify_psid_payment(&self, reference: &str) -> Result<bool, LicensingError> {
        let record = self
            .ledger
            .payments
            .payment_by_reference(reference.trim())
            .await?;
        Ok(record
            .map(|record| record.payment_status.is_settled())
            .unwrap_or(false))
    }

    pub async fn add_fee(
        &self,
        applicant_id: ApplicantId,
        amount: Decimal,
        reason: &str,
    ) -> Result<Fee, LicensingError> {
        if amount <= Decimal::ZERO {
            return Err(LicensingError::validation("fee amount must be greater than zero"));
        }
        ensure_within_limit(amount, "fee amount")?;
        self.ledger
            .applicants
            .applicant(applicant_id)
            .await?
            .ok_or_else(|| LicensingError::not_found("applicant", applicant_id))?;

        let fee = self
            .ledger
            .payments
            .add_fee(NewFee {
                applicant_id,
                amount,
                reason: reason.trim().to_string(),
            })
            .await?;
        info!(applicant_id = applicant_id.0, amount = %fee.amount, "fee raised");
        Ok(fee)
    }

    /// Opens a pending gateway obligation (PSID) so later callbacks correlate to the
    /// applicant. Re-registering the same reference for the same applicant is a no-op.
    pub async fn register_invoice(
        &self,
        applicant_id: ApplicantId,
        reference: &str,
        amount_within_due_date: Decimal,
    ) -> Result<PaymentRecord, LicensingError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(LicensingError::validation("PSID number is required"));
        }
        if amount_within_due_date <= Decimal::ZERO {
            return Err(LicensingError::validation(
                "invoice amount must be greater than zero",
            ));
        }
        ensure_within_limit(amount_within_due_date, "invoice amount")?;
        self.ledger
            .applicants
            .applicant(applicant_id)
            .await?
            .ok_or_else(|| LicensingError::not_found("applicant", applicant_id))?;

        let _reference_guard = self.reference_locks.acquire(&reference.to_string()).await;
        if let Some(existing) = self.ledger.payments.payment_by_reference(reference).await? {
            return match existing.applicant_id {
                Some(owner) if owner != applicant_id => Err(LicensingError::validation(format!(
                    "PSID {reference} belongs to another applicant"
                ))),
                _ => Ok(existing),
            };
        }

        let record = PaymentRecord {
            applicant_id: Some(applicant_id),
            external_reference: reference.to_string(),
            external_transaction_id: None,
            amount_within_due_date,
            amount_paid: None,
            payment_status: PaymentRecordStatus::Pending,
            failure_reason: None,
            paid_at: None,
            updated_at: Utc::now(),
        };
        let stored = self.ledger.payments.upsert_payment(record).await?;
        info!(applicant_id = applicant_id.0, reference, "invoice registered");
        Ok(stored)
    }

    /// Upserts the settled record for `confirmation.reference` and, for a known applicant,
    /// moves the application to `Download License` once nothing remains due.
    ///
    /// Replays update the existing record in place. A replay never lowers the amount
    /// already credited, so an applicant's total paid cannot decrease.
    pub async fn apply_confirmed_payment(
        &self,
        confirmation: PaymentConfirmation,
    ) -> Result<AppliedPayment, LicensingError> {
        let PaymentConfirmation {
            reference,
            applicant_id,
            transaction_id,
            amount,
            paid_at,
        } = confirmation;

        let reference_guard = self.reference_locks.acquire(&reference).await;
        let existing = self.ledger.payments.payment_by_reference(&reference).await?;
        let replayed = existing.is_some();
        let previously_credited = existing
            .as_ref()
            .filter(|record| record.payment_status.is_settled() && record.applicant_id.is_some())
            .map(PaymentRecord::credited_amount);

        let record = match existing {
            Some(mut record) => {
                if let (Some(owner), Some(requested)) = (record.applicant_id, applicant_id) {
                    if owner != requested {
                        return Err(LicensingError::validation(format!(
                            "reference {reference} belongs to another applicant"
                        )));
                    }
                }
                let credited = if record.payment_status.is_settled() {
                    let previous = record.credited_amount();
                    if amount < previous {
                        warn!(
                            reference = %reference,
                            previous = %previous,
                            replayed_amount = %amount,
                            "replayed confirmation carries a lower amount; keeping credited amount"
                        );
                    }
                    amount.max(previous)
                } else {
                    amount
                };
                record.applicant_id = record.applicant_id.or(applicant_id);
                record.payment_status = PaymentRecordStatus::Paid;
                record.amount_paid = Some(credited);
                record.paid_at = Some(paid_at);
                record.external_transaction_id = transaction_id.or(record.external_transaction_id);
                record.failure_reason = None;
                record.updated_at = Utc::now();
                record
            }
            None => PaymentRecord {
                applicant_id,
                external_reference: reference.clone(),
                external_transaction_id: transaction_id,
                amount_within_due_date: amount,
                amount_paid: Some(amount),
                payment_status: PaymentRecordStatus::Paid,
                failure_reason: None,
                paid_at: Some(paid_at),
                updated_at: Utc::now(),
            },
        };
        let record = self.ledger.payments.upsert_payment(record).await?;
        drop(reference_guard);
        let credit_changed = previously_credited != Some(record.credited_amount());

        info!(
            reference = %record.external_reference,
            applicant_id = record.applicant_id.map(|id| id.0),
            amount = %record.credited_amount(),
            replayed,
            "payment confirmed"
        );

        let status = match record.applicant_id {
            Some(applicant_id) => {
                self.settle_applicant(applicant_id, &record, credit_changed)
                    .await?
            }
            None => None,
        };

        Ok(AppliedPayment {
            record,
            replayed,
            status,
        })
    }

    pub(crate) fn reference_locks(&self) -> &KeyedLocks<String> {
        &self.reference_locks
    }

    pub(crate) fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub(crate) fn alerts(&self) -> &AlertDispatcher {
        &self.alerts
    }

    async fn settle_applicant(
        &self,
        applicant_id: ApplicantId,
        record: &PaymentRecord,
        credit_changed: bool,
    ) -> Result<Option<PaymentStatus>, LicensingError> {
        let applicant_guard = self.applicant_locks.acquire(&applicant_id).await;
        let Some(mut applicant) = self.ledger.applicants.applicant(applicant_id).await? else {
            warn!(
                applicant_id = applicant_id.0,
                reference = %record.external_reference,
                "payment linked to unknown applicant"
            );
            return Ok(None);
        };

        let status = self.compute_status(applicant_id).await?;
        if status.is_paid {
            applicant.assigned_group = ReviewGroup::DownloadLicense;
            applicant.application_status = self.config.paid_status_label.clone();
            self.ledger.applicants.save_applicant(applicant).await?;
            info!(applicant_id = applicant_id.0, "dues settled; application ready for license");
        }
        drop(applicant_guard);

        if status.is_paid {
            self.licenses.issue_best_effort(applicant_id).await;
        }

        // A replay that credits nothing new is acknowledged silently.
        if !credit_changed {
            return Ok(Some(status));
        }
        self.alerts
            .notify(NewAlert {
                applicant_id,
                title: "Payment received".to_string(),
                message: format!(
                    "Payment of PKR {} against PSID {} has been received. Remaining balance: PKR {}.",
                    record.credited_amount(),
                    record.external_reference,
                    status.remaining_balance
                ),
                alert_type: AlertType::PaymentReceived,
                priority: AlertPriority::Medium,
                channels: Vec::new(),
            })
            .await;

        Ok(Some(status))
    }

    async fn compute_status(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<PaymentStatus, LicensingError> {
        let fees = self.ledger.payments.fees_for(applicant_id).await?;
        let payments = self.ledger.payments.payments_for(applicant_id).await?;
        Ok(PaymentStatus::compute(
            applicant_id,
            &fees,
            &payments,
            Utc::now(),
            self.config.due_window_days,
        ))
    }
}
