use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::domain::{
    Alert, AlertId, AlertRecipient, AlertStatus, Applicant, ApplicantId, AssignmentId,
    AssignmentRecord, BusinessProfile, Fee, FeeId, License, NewAlert, NewAssignment, NewFee,
    PaymentRecord, RegistrationDetails,
};
use super::ledger::{
    AlertRepository, ApplicantRepository, LedgerError, LicenseRepository, PaymentLedger,
};

/// A thread-safe in-memory ledger backing every repository trait.
///
/// Each table sits behind its own `Arc<RwLock<..>>`, so clones share state. Used by the
/// API binary and by tests; a database-backed ledger implements the same traits.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    applicants: Arc<RwLock<HashMap<ApplicantId, Applicant>>>,
    assignments: Arc<RwLock<Vec<AssignmentRecord>>>,
    profiles: Arc<RwLock<HashMap<ApplicantId, BusinessProfile>>>,
    registrations: Arc<RwLock<HashMap<ApplicantId, RegistrationDetails>>>,
    submissions: Arc<RwLock<BTreeSet<ApplicantId>>>,
    fees: Arc<RwLock<Vec<Fee>>>,
    payments: Arc<RwLock<HashMap<String, PaymentRecord>>>,
    licenses: Arc<RwLock<HashMap<ApplicantId, License>>>,
    alerts: Arc<RwLock<HashMap<AlertId, Alert>>>,
    recipients: Arc<RwLock<HashMap<ApplicantId, AlertRecipient>>>,
    sequence: Arc<AtomicU64>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a ledger pre-populated from an exported snapshot.
    pub async fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        let ledger = Self::new();
        ledger.import(snapshot).await;
        ledger
    }

    pub async fn import(&self, snapshot: LedgerSnapshot) {
        let LedgerSnapshot {
            applicants,
            business_profiles,
            registrations,
            fees,
            payments,
            recipients,
            submitted,
        } = snapshot;

        {
            let mut guard = self.applicants.write().await;
            for applicant in applicants {
                guard.insert(applicant.id, applicant);
            }
        }
        {
            let mut guard = self.profiles.write().await;
            for profile in business_profiles {
                guard.insert(profile.applicant_id, profile);
            }
        }
        {
            let mut guard = self.registrations.write().await;
            for entry in registrations {
                guard.insert(entry.applicant_id, entry.details);
            }
        }
        {
            let mut guard = self.fees.write().await;
            for fee in fees {
                self.bump_sequence(fee.id.0);
                guard.push(fee);
            }
        }
        {
            let mut guard = self.payments.write().await;
            for record in payments {
                guard.insert(record.external_reference.clone(), record);
            }
        }
        {
            let mut guard = self.recipients.write().await;
            for recipient in recipients {
                guard.insert(recipient.applicant_id, recipient);
            }
        }
        self.submissions.write().await.extend(submitted);
    }

    pub async fn insert_business_profile(&self, profile: BusinessProfile) {
        self.profiles
            .write()
            .await
            .insert(profile.applicant_id, profile);
    }

    pub async fn insert_registration(
        &self,
        applicant_id: ApplicantId,
        details: RegistrationDetails,
    ) {
        self.registrations
            .write()
            .await
            .insert(applicant_id, details);
    }

    fn next_id(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn bump_sequence(&self, seen: u64) {
        self.sequence.fetch_max(seen, Ordering::Relaxed);
    }
}

/// Serialized ledger contents. Field names follow the canonical camelCase spelling; the
/// entity types accept the legacy snake_case names as aliases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LedgerSnapshot {
    pub applicants: Vec<Applicant>,
    #[serde(alias = "business_profiles")]
    pub business_profiles: Vec<BusinessProfile>,
    pub registrations: Vec<RegistrationEntry>,
    pub fees: Vec<Fee>,
    #[serde(alias = "psid_tracking")]
    pub payments: Vec<PaymentRecord>,
    #[serde(alias = "alert_recipients")]
    pub recipients: Vec<AlertRecipient>,
    pub submitted: Vec<ApplicantId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationEntry {
    #[serde(alias = "applicant_id")]
    pub applicant_id: ApplicantId,
    #[serde(flatten)]
    pub details: RegistrationDetails,
}

#[async_trait]
impl ApplicantRepository for InMemoryLedger {
    async fn applicant(&self, id: ApplicantId) -> Result<Option<Applicant>, LedgerError> {
        Ok(self.applicants.read().await.get(&id).cloned())
    }

    async fn save_applicant(&self, applicant: Applicant) -> Result<(), LedgerError> {
        self.applicants.write().await.insert(applicant.id, applicant);
        Ok(())
    }

    async fn applicants(&self) -> Result<Vec<Applicant>, LedgerError> {
        let mut applicants: Vec<Applicant> =
            self.applicants.read().await.values().cloned().collect();
        applicants.sort_by_key(|applicant| applicant.id);
        Ok(applicants)
    }

    async fn append_assignment(
        &self,
        assignment: NewAssignment,
    ) -> Result<AssignmentRecord, LedgerError> {
        let NewAssignment {
            applicant_id,
            assigned_group,
            remarks,
            actor,
            created_at,
        } = assignment;
        let record = AssignmentRecord {
            id: AssignmentId(self.next_id()),
            applicant_id,
            assigned_group,
            remarks,
            actor,
            created_at,
        };
        self.assignments.write().await.push(record.clone());
        Ok(record)
    }

    async fn assignment(&self, id: AssignmentId) -> Result<Option<AssignmentRecord>, LedgerError> {
        let guard = self.assignments.read().await;
        Ok(guard.iter().find(|record| record.id == id).cloned())
    }

    async fn update_assignment(&self, record: AssignmentRecord) -> Result<(), LedgerError> {
        let mut guard = self.assignments.write().await;
        let slot = guard
            .iter_mut()
            .find(|existing| existing.id == record.id)
            .ok_or(LedgerError::NotFound)?;
        *slot = record;
        Ok(())
    }

    async fn assignments_for(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<Vec<AssignmentRecord>, LedgerError> {
        let guard = self.assignments.read().await;
        Ok(guard
            .iter()
            .filter(|record| record.applicant_id == applicant_id)
            .cloned()
            .collect())
    }

    async fn business_profile(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<Option<BusinessProfile>, LedgerError> {
        Ok(self.profiles.read().await.get(&applicant_id).cloned())
    }

    async fn registration_details(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<Option<RegistrationDetails>, LedgerError> {
        Ok(self.registrations.read().await.get(&applicant_id).cloned())
    }

    async fn record_submission(&self, applicant_id: ApplicantId) -> Result<(), LedgerError> {
        self.submissions.write().await.insert(applicant_id);
        Ok(())
    }

    async fn submitted_applicants(&self) -> Result<BTreeSet<ApplicantId>, LedgerError> {
        Ok(self.submissions.read().await.clone())
    }
}

#[async_trait]
impl PaymentLedger for InMemoryLedger {
    async fn fees_for(&self, applicant_id: ApplicantId) -> Result<Vec<Fee>, LedgerError> {
        let guard = self.fees.read().await;
        Ok(guard
            .iter()
            .filter(|fee| fee.applicant_id == applicant_id)
            .cloned()
            .collect())
    }

    async fn add_fee(&self, fee: NewFee) -> Result<Fee, LedgerError> {
        let fee = Fee {
            id: FeeId(self.next_id()),
            applicant_id: fee.applicant_id,
            amount: fee.amount,
            is_settled: false,
            reason: fee.reason,
        };
        self.fees.write().await.push(fee.clone());
        Ok(fee)
    }

    async fn payment_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<PaymentRecord>, LedgerError> {
        Ok(self.payments.read().await.get(reference).cloned())
    }

    async fn payments_for(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<Vec<PaymentRecord>, LedgerError> {
        let guard = self.payments.read().await;
        let mut records: Vec<PaymentRecord> = guard
            .values()
            .filter(|record| record.applicant_id == Some(applicant_id))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(records)
    }

    async fn upsert_payment(&self, record: PaymentRecord) -> Result<PaymentRecord, LedgerError> {
        self.payments
            .write()
            .await
            .insert(record.external_reference.clone(), record.clone());
        Ok(record)
    }
}

#[async_trait]
impl LicenseRepository for InMemoryLedger {
    async fn license_for(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<Option<License>, LedgerError> {
        Ok(self.licenses.read().await.get(&applicant_id).cloned())
    }

    async fn upsert_license(&self, license: License) -> Result<License, LedgerError> {
        self.licenses
            .write()
            .await
            .insert(license.applicant_id, license.clone());
        Ok(license)
    }
}

#[async_trait]
impl AlertRepository for InMemoryLedger {
    async fn insert_alert(&self, alert: NewAlert) -> Result<Alert, LedgerError> {
        let NewAlert {
            applicant_id,
            title,
            message,
            alert_type,
            priority,
            channels,
        } = alert;
        let alert = Alert {
            id: AlertId(self.next_id()),
            applicant_id,
            title,
            message,
            alert_type,
            priority,
            channels,
            status: AlertStatus::Pending,
            is_read: false,
            retry_count: 0,
            deliveries: Vec::new(),
            created_at: chrono::Utc::now(),
            sent_at: None,
            read_at: None,
        };
        self.alerts.write().await.insert(alert.id, alert.clone());
        Ok(alert)
    }

    async fn alert(&self, id: AlertId) -> Result<Option<Alert>, LedgerError> {
        Ok(self.alerts.read().await.get(&id).cloned())
    }

    async fn save_alert(&self, alert: Alert) -> Result<(), LedgerError> {
        let mut guard = self.alerts.write().await;
        if !guard.contains_key(&alert.id) {
            return Err(LedgerError::NotFound);
        }
        guard.insert(alert.id, alert);
        Ok(())
    }

    async fn alerts_for(&self, applicant_id: ApplicantId) -> Result<Vec<Alert>, LedgerError> {
        let guard = self.alerts.read().await;
        let mut alerts: Vec<Alert> = guard
            .values()
            .filter(|alert| alert.applicant_id == applicant_id)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(alerts)
    }

    async fn recipient(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<Option<AlertRecipient>, LedgerError> {
        Ok(self.recipients.read().await.get(&applicant_id).cloned())
    }

    async fn save_recipient(&self, recipient: AlertRecipient) -> Result<(), LedgerError> {
        self.recipients
            .write()
            .await
            .insert(recipient.applicant_id, recipient);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::licensing::domain::{ReviewGroup, RegistrationType};
    use chrono::Utc;

    #[tokio::test]
    async fn assignments_are_returned_in_append_order() {
        let ledger = InMemoryLedger::new();
        for group in [ReviewGroup::Applicant, ReviewGroup::Lso, ReviewGroup::Lsm] {
            ledger
                .append_assignment(NewAssignment {
                    applicant_id: ApplicantId(1),
                    assigned_group: group,
                    remarks: None,
                    actor: None,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let history = ledger.assignments_for(ApplicantId(1)).await.unwrap();
        let groups: Vec<_> = history.iter().map(|r| r.assigned_group).collect();
        assert_eq!(
            groups,
            vec![ReviewGroup::Applicant, ReviewGroup::Lso, ReviewGroup::Lsm]
        );
        assert!(ledger.assignments_for(ApplicantId(2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_assignment_rejects_unknown_ids() {
        let ledger = InMemoryLedger::new();
        let record = AssignmentRecord {
            id: AssignmentId(99),
            applicant_id: ApplicantId(1),
            assigned_group: ReviewGroup::Lso,
            remarks: None,
            actor: None,
            created_at: Utc::now(),
        };
        assert!(matches!(
            ledger.update_assignment(record).await,
            Err(LedgerError::NotFound)
        ));
    }

    #[tokio::test]
    async fn snapshot_import_accepts_legacy_names() {
        let raw = r#"{
            "applicants": [{
                "id": 3,
                "first_name": "Bilal",
                "registration_type": "Collector",
                "assigned_group": "LSO",
                "tracking_number": "LHR-COL-003"
            }],
            "business_profiles": [{
                "applicant_id": 3,
                "name": "Bilal Scrap Traders",
                "entity_type": "Individual"
            }],
            "registrations": [{
                "applicant_id": 3,
                "registrationType": "Collector",
                "selected_categories": ["PET", "HDPE"]
            }],
            "psid_tracking": [{
                "applicant_id": 3,
                "consumer_number": "PSID-3",
                "amount_within_due_date": "2500",
                "payment_status": "pending",
                "updated_at": "2025-01-01T00:00:00Z"
            }],
            "fees": [{ "id": 40, "applicant_id": 3, "amount": "2500" }],
            "submitted": [3]
        }"#;
        let snapshot: LedgerSnapshot = serde_json::from_str(raw).expect("snapshot parses");
        let ledger = InMemoryLedger::from_snapshot(snapshot).await;

        let applicant = ledger.applicant(ApplicantId(3)).await.unwrap().unwrap();
        assert_eq!(applicant.registration_type, RegistrationType::Collector);
        let details = ledger
            .registration_details(ApplicantId(3))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(details.plastic_types(), ["PET", "HDPE"]);
        let payments = ledger.payments_for(ApplicantId(3)).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].external_reference, "PSID-3");
        assert!(ledger
            .submitted_applicants()
            .await
            .unwrap()
            .contains(&ApplicantId(3)));

        let fee = ledger
            .add_fee(NewFee {
                applicant_id: ApplicantId(3),
                amount: rust_decimal::Decimal::ONE,
                reason: "late".to_string(),
            })
            .await
            .unwrap();
        assert!(fee.id.0 > 40, "imported ids are never reissued");
    }
}
