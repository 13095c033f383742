use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::domain::{
    Alert, AlertId, AlertRecipient, Applicant, ApplicantId, AssignmentId, AssignmentRecord,
    BusinessProfile, Fee, License, NewAlert, NewAssignment, NewFee, PaymentRecord,
    RegistrationDetails,
};

/// Error enumeration for ledger failures.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("record not found")]
    NotFound,
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Applicant records, their workflow history and registration sub-entities.
#[async_trait]
pub trait ApplicantRepository: Send + Sync {
    async fn applicant(&self, id: ApplicantId) -> Result<Option<Applicant>, LedgerError>;
    async fn save_applicant(&self, applicant: Applicant) -> Result<(), LedgerError>;
    async fn applicants(&self) -> Result<Vec<Applicant>, LedgerError>;

    async fn append_assignment(
        &self,
        assignment: NewAssignment,
    ) -> Result<AssignmentRecord, LedgerError>;
    async fn assignment(&self, id: AssignmentId) -> Result<Option<AssignmentRecord>, LedgerError>;
    async fn update_assignment(&self, record: AssignmentRecord) -> Result<(), LedgerError>;
    /// History for one applicant, oldest first.
    async fn assignments_for(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<Vec<AssignmentRecord>, LedgerError>;

    async fn business_profile(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<Option<BusinessProfile>, LedgerError>;
    async fn registration_details(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<Option<RegistrationDetails>, LedgerError>;

    async fn record_submission(&self, applicant_id: ApplicantId) -> Result<(), LedgerError>;
    async fn submitted_applicants(&self) -> Result<BTreeSet<ApplicantId>, LedgerError>;
}

/// Fee obligations and gateway payment records.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    async fn fees_for(&self, applicant_id: ApplicantId) -> Result<Vec<Fee>, LedgerError>;
    async fn add_fee(&self, fee: NewFee) -> Result<Fee, LedgerError>;

    async fn payment_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<PaymentRecord>, LedgerError>;
    async fn payments_for(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<Vec<PaymentRecord>, LedgerError>;
    /// Inserts or replaces the record keyed by `external_reference`.
    async fn upsert_payment(&self, record: PaymentRecord) -> Result<PaymentRecord, LedgerError>;
}

#[async_trait]
pub trait LicenseRepository: Send + Sync {
    async fn license_for(&self, applicant_id: ApplicantId)
        -> Result<Option<License>, LedgerError>;
    /// Inserts or replaces the license keyed by `applicant_id`.
    async fn upsert_license(&self, license: License) -> Result<License, LedgerError>;
}

#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn insert_alert(&self, alert: NewAlert) -> Result<Alert, LedgerError>;
    async fn alert(&self, id: AlertId) -> Result<Option<Alert>, LedgerError>;
    async fn save_alert(&self, alert: Alert) -> Result<(), LedgerError>;
    /// Alerts for one applicant, newest first.
    async fn alerts_for(&self, applicant_id: ApplicantId) -> Result<Vec<Alert>, LedgerError>;

    async fn recipient(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<Option<AlertRecipient>, LedgerError>;
    async fn save_recipient(&self, recipient: AlertRecipient) -> Result<(), LedgerError>;
}

/// Invalidates derived views (list caches, dashboards) after an applicant changes.
#[async_trait]
pub trait ViewInvalidator: Send + Sync {
    async fn invalidate(&self, applicant_id: ApplicantId) -> Result<(), LedgerError>;
}

/// Invalidator for deployments without derived views.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInvalidator;

#[async_trait]
impl ViewInvalidator for NoopInvalidator {
    async fn invalidate(&self, _applicant_id: ApplicantId) -> Result<(), LedgerError> {
        Ok(())
    }
}

/// Handles to every table the engine touches.
#[derive(Clone)]
pub struct Ledger {
    pub applicants: Arc<dyn ApplicantRepository>,
    pub payments: Arc<dyn PaymentLedger>,
    pub licenses: Arc<dyn LicenseRepository>,
    pub alerts: Arc<dyn AlertRepository>,
}

impl Ledger {
    /// Builds a ledger where one backend serves every table.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ApplicantRepository + PaymentLedger + LicenseRepository + AlertRepository + 'static,
    {
        Self {
            applicants: store.clone(),
            payments: store.clone(),
            licenses: store.clone(),
            alerts: store,
        }
    }
}
