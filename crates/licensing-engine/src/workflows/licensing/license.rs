use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use super::alerts::AlertDispatcher;
use super::domain::{
    AlertPriority, AlertType, ApplicantId, License, NewAlert, RegistrationDetails, ReviewGroup,
};
use super::ledger::Ledger;
use super::service::{report_side_effect_failure, LicensingError};
use crate::config::LicensingConfig;

const PLASTICS_LIMIT: usize = 200;
const PARTICULARS_LIMIT: usize = 200;
const ADDRESS_LIMIT: usize = 300;

/// Read-only license projection joined with applicant and business profile data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseView {
    pub applicant_id: ApplicantId,
    pub license_number: String,
    pub owner_name: String,
    pub business_name: String,
    pub registration_type: String,
    pub tracking_number: String,
    pub types_of_plastics: String,
    pub particulars: String,
    pub fee_amount: Decimal,
    pub address: String,
    pub district: Option<String>,
    pub tehsil: Option<String>,
    pub license_duration: String,
    pub date_of_issue: DateTime<Utc>,
    pub is_active: bool,
}

/// Assembles and upserts the license record once an application reaches
/// `Download License`. Issuance is a pure function of current ledger state, so calling it
/// again refreshes the same record.
pub struct LicenseIssuer {
    ledger: Ledger,
    config: LicensingConfig,
    alerts: Arc<AlertDispatcher>,
}

impl LicenseIssuer {
    pub fn new(ledger: Ledger, config: LicensingConfig, alerts: Arc<AlertDispatcher>) -> Self {
        Self {
            ledger,
            config,
            alerts,
        }
    }

    /// Returns `Ok(None)` without touching the ledger unless the applicant sits in the
    /// terminal group.
    pub async fn create_or_update_license(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<Option<License>, LicensingError> {
        let applicant = self
            .ledger
            .applicants
            .applicant(applicant_id)
            .await?
            .ok_or_else(|| LicensingError::not_found("applicant", applicant_id))?;
        if applicant.assigned_group != ReviewGroup::DownloadLicense {
            return Ok(None);
        }

        let profile = self
            .ledger
            .applicants
            .business_profile(applicant_id)
            .await?
            .ok_or_else(|| {
                LicensingError::Upstream(format!(
                    "business profile missing for applicant {applicant_id}"
                ))
            })?;
        let details = self
            .ledger
            .applicants
            .registration_details(applicant_id)
            .await?
            .ok_or_else(|| {
                LicensingError::Upstream(format!(
                    "registration details missing for applicant {applicant_id}"
                ))
            })?;
        if details.registration_type() != applicant.registration_type {
            return Err(LicensingError::Upstream(format!(
                "registration details for applicant {applicant_id} do not match {:?}",
                applicant.registration_type
            )));
        }

        let fee_amount = self
            .ledger
            .payments
            .fees_for(applicant_id)
            .await?
            .iter()
            .try_fold(Decimal::ZERO, |total, fee| total.checked_add(fee.amount))
            .ok_or_else(|| {
                LicensingError::validation(format!(
                    "fee total for applicant {applicant_id} is out of range"
                ))
            })?;

        let particulars = match &details {
            RegistrationDetails::Producer {
                number_of_machines,
                ..
            } => format!("Number of machines: {number_of_machines}"),
            _ => profile.entity_type.clone(),
        };

        let existing = self.ledger.licenses.license_for(applicant_id).await?;
        let first_issue = existing.is_none();
        let license_number = existing
            .map(|license| license.license_number)
            .unwrap_or_else(|| applicant.tracking_number.clone());

        let license = License {
            applicant_id,
            license_number,
            owner_name: applicant.full_name(),
            business_name: profile.business_name.clone(),
            types_of_plastics: truncate_chars(&details.plastic_types().join(", "), PLASTICS_LIMIT),
            particulars: truncate_chars(&particulars, PARTICULARS_LIMIT),
            fee_amount,
            address: truncate_chars(&profile.address, ADDRESS_LIMIT),
            license_duration: self.config.license_duration.clone(),
            date_of_issue: Utc::now(),
            is_active: true,
        };
        let license = self.ledger.licenses.upsert_license(license).await?;
        info!(
            applicant_id = applicant_id.0,
            license_number = %license.license_number,
            first_issue,
            "license upserted"
        );

        if first_issue {
            self.alerts
                .notify(NewAlert {
                    applicant_id,
                    title: "License issued".to_string(),
                    message: format!(
                        "Your license {} is ready for download.",
                        license.license_number
                    ),
                    alert_type: AlertType::LicenseIssued,
                    priority: AlertPriority::High,
                    channels: Vec::new(),
                })
                .await;
        }

        Ok(Some(license))
    }

    /// Runs issuance as a side effect; failures are reported and swallowed.
    pub async fn issue_best_effort(&self, applicant_id: ApplicantId) -> Option<License> {
        match self.create_or_update_license(applicant_id).await {
            Ok(license) => license,
            Err(error) => {
                report_side_effect_failure("license_issue", Some(applicant_id), &error);
                None
            }
        }
    }

    /// Marks the applicant's license inactive after the application leaves
    /// `Download License`. Re-entering the terminal group reactivates it on upsert.
    pub async fn withdraw(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<Option<License>, LicensingError> {
        let Some(mut license) = self.ledger.licenses.license_for(applicant_id).await? else {
            return Ok(None);
        };
        if !license.is_active {
            return Ok(Some(license));
        }
        license.is_active = false;
        let license = self.ledger.licenses.upsert_license(license).await?;
        info!(
            applicant_id = applicant_id.0,
            license_number = %license.license_number,
            "license withdrawn"
        );
        Ok(Some(license))
    }

    pub async fn withdraw_best_effort(&self, applicant_id: ApplicantId) {
        if let Err(error) = self.withdraw(applicant_id).await {
            report_side_effect_failure("license_withdraw", Some(applicant_id), &error);
        }
    }

    pub async fn license_for(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<Option<LicenseView>, LicensingError> {
        let applicant = self
            .ledger
            .applicants
            .applicant(applicant_id)
            .await?
            .ok_or_else(|| LicensingError::not_found("applicant", applicant_id))?;
        let Some(license) = self.ledger.licenses.license_for(applicant_id).await? else {
            return Ok(None);
        };
        let profile = self.ledger.applicants.business_profile(applicant_id).await?;
        let (district, tehsil) = profile
            .map(|profile| (profile.district, profile.tehsil))
            .unwrap_or_default();

        Ok(Some(LicenseView {
            applicant_id,
            license_number: license.license_number,
            owner_name: license.owner_name,
            business_name: license.business_name,
            registration_type: format!("{:?}", applicant.registration_type),
            tracking_number: applicant.tracking_number,
            types_of_plastics: license.types_of_plastics,
            particulars: license.particulars,
            fee_amount: license.fee_amount,
            address: license.address,
            district,
            tehsil,
            license_duration: license.license_duration,
            date_of_issue: license.date_of_issue,
            is_active: license.is_active,
        }))
    }
}

fn truncate_chars(value: &str, limit: usize) -> String {
    value.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::truncate_chars;

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_chars("abcdef", 4), "abcd");
        assert_eq!(truncate_chars("ایک دو تین", 3), "ایک");
        assert_eq!(truncate_chars("short", 200), "short");
    }
}
