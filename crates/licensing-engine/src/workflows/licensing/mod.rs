//! Application workflow and payment reconciliation for the licensing backend.
//!
//! Reviewers move applications through the fixed review sequence, fees are reconciled
//! against gateway payments, and the license is issued once an application reaches
//! `Download License`. Ledger access goes through the traits in [`ledger`];
//! [`memory::InMemoryLedger`] backs the API binary and the tests.

pub mod alerts;
pub mod domain;
pub mod ledger;
pub mod license;
mod locks;
pub mod memory;
pub mod payments;
pub mod reconciler;
pub mod router;
pub mod service;
pub mod workflow;

#[cfg(test)]
mod tests;

pub use alerts::{AlertDispatchReport, AlertDispatcher, ChannelError, NotificationSender};
pub use domain::{
    Alert, AlertChannel, AlertId, AlertPriority, AlertRecipient, AlertStatus, AlertType,
    Applicant, ApplicantId, AssignmentId, AssignmentRecord, BusinessProfile, ChannelDelivery,
    Fee, FeeId, License, NewAlert, PaymentRecord, PaymentRecordStatus, RegistrationDetails,
    RegistrationType, ReviewGroup,
};
pub use ledger::{
    AlertRepository, ApplicantRepository, Ledger, LedgerError, LicenseRepository, NoopInvalidator,
    PaymentLedger, ViewInvalidator,
};
pub use license::{LicenseIssuer, LicenseView};
pub use memory::{InMemoryLedger, LedgerSnapshot, RegistrationEntry};
pub use payments::{
    AppliedPayment, PaymentConfirmation, PaymentService, PaymentState, PaymentStatus, MAX_AMOUNT,
};
pub use reconciler::{
    GatewayError, GatewayPayment, GatewayReconciler, OfflineGateway, PaymentConfirmed,
    PaymentFailed, PaymentGateway, PsidCheck, PsidState, ReconciliationOutcome,
};
pub use router::licensing_router;
pub use service::{LicensingError, LicensingService, LicensingServiceBuilder};
pub use workflow::{
    detect_sent_back, ApplicantListEntry, AssignmentRequest, GroupCount, GroupFilter,
    GroupSummary, WorkflowService,
};
